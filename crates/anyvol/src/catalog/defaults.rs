//! Built-in mount types.

use std::collections::BTreeMap;

use super::MountDefinition;
use crate::template::Value;

/// The catalog used when no configuration file is given.
pub(super) fn builtin_definitions() -> BTreeMap<String, MountDefinition> {
    let mut defs = BTreeMap::new();

    defs.insert(
        "davfs2".to_string(),
        MountDefinition::new(
            &["mount.davfs", "-o", "conf={{mountpoint}}.davfs.conf"],
            &["umount.davfs"],
        )
        .with_file("{{mountpoint}}.davfs.conf", Value::from(""))
        .stripping(&["username", "password"])
        .with_stdin("{{ options.username | default('') }}\n{{ options.password | default('') }}\n"),
    );

    defs.insert(
        "curlftpfs".to_string(),
        MountDefinition::new(&["curlftpfs"], &["fusermount", "-u"]),
    );

    defs.insert(
        "s3fs".to_string(),
        MountDefinition::new(
            &["s3fs", "-o", "passwd_file={{mountpoint}}.passwd-s3fs"],
            &["fusermount", "-u"],
        )
        .with_file(
            "{{mountpoint}}.passwd-s3fs",
            Value::Map(BTreeMap::from([
                (
                    "content".to_string(),
                    Value::from("{{options.access_key}}:{{options.secret_key}}\n"),
                ),
                ("mode".to_string(), Value::Integer(0o600)),
            ])),
        )
        .stripping(&["access_key", "secret_key"]),
    );

    defs.insert(
        "cifs".to_string(),
        MountDefinition::new(&["mount", "-t", "cifs"], &["umount"]),
    );

    defs.insert(
        "sshfs".to_string(),
        MountDefinition::new(&["sshfs"], &["fusermount", "-u"]),
    );

    defs.insert(
        "nfs".to_string(),
        MountDefinition::new(&["mount", "-t", "nfs"], &["umount"]),
    );

    defs.insert(
        "squashfuse".to_string(),
        MountDefinition::new(&["squashfuse"], &["fusermount", "-u"]).downloading_src(),
    );

    defs.insert(
        "any".to_string(),
        MountDefinition::new(
            &["mount", "-t", "{{ options.fstype | default('auto') }}"],
            &["umount"],
        )
        .stripping(&["fstype"]),
    );

    defs
}

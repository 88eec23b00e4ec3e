//! Writing auxiliary files to disk.

use std::fs::{DirBuilder, OpenOptions, Permissions};
use std::io::Write;
use std::os::unix::fs::{DirBuilderExt, MetadataExt, OpenOptionsExt, PermissionsExt};

use anyvol_common::{AnyvolError, AnyvolResult};
use nix::errno::Errno;
use nix::unistd::{Gid, Group, Uid, User};

use super::plan::{DEFAULT_FILE_MODE, Ownership, PlannedFile};

/// Mode of parent directories created for auxiliary files.
const PARENT_DIR_MODE: u32 = 0o700;

/// Write every planned file, creating parent directories as needed.
///
/// Files are created with a restrictive mode, written, then switched to
/// their requested mode and ownership.
///
/// # Errors
///
/// Returns an error if a file can not be written or an owner can not be
/// resolved. Files written before the failure are left in place.
pub fn materialize(files: &[PlannedFile]) -> AnyvolResult<()> {
    for file in files {
        if let Some(parent) = file.path.parent() {
            DirBuilder::new()
                .recursive(true)
                .mode(PARENT_DIR_MODE)
                .create(parent)?;
        }

        let mut handle = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(DEFAULT_FILE_MODE)
            .open(&file.path)?;
        handle.write_all(file.content.as_bytes())?;
        handle.set_permissions(Permissions::from_mode(file.mode))?;

        let uid = resolve_user(&file.owner)?;
        let gid = resolve_group(&file.group)?;
        let metadata = handle.metadata()?;
        if metadata.uid() != uid || metadata.gid() != gid {
            chown(&file.path, uid, gid)?;
        }

        tracing::debug!(
            path = %file.path.display(),
            mode = format_args!("{:o}", file.mode),
            uid,
            gid,
            "Wrote auxiliary file"
        );
    }
    Ok(())
}

fn chown(path: &std::path::Path, uid: u32, gid: u32) -> AnyvolResult<()> {
    match nix::unistd::chown(path, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid))) {
        Ok(()) => Ok(()),
        // Unprivileged runs (tests, rootless setups) keep the caller's ids.
        Err(Errno::EPERM) if !rustix::process::geteuid().is_root() => {
            tracing::warn!(
                path = %path.display(),
                uid,
                gid,
                "Cannot change file ownership without root, keeping current owner"
            );
            Ok(())
        }
        Err(e) => Err(AnyvolError::Io(e.into())),
    }
}

fn resolve_user(owner: &Ownership) -> AnyvolResult<u32> {
    match owner {
        Ownership::Id(id) => Ok(*id),
        Ownership::Name(name) => User::from_name(name)
            .map_err(|e| AnyvolError::Io(e.into()))?
            .map(|user| user.uid.as_raw())
            .ok_or_else(|| AnyvolError::validation(format!("unknown user: {name}"))),
    }
}

fn resolve_group(group: &Ownership) -> AnyvolResult<u32> {
    match group {
        Ownership::Id(id) => Ok(*id),
        Ownership::Name(name) => Group::from_name(name)
            .map_err(|e| AnyvolError::Io(e.into()))?
            .map(|group| group.gid.as_raw())
            .ok_or_else(|| AnyvolError::validation(format!("unknown group: {name}"))),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use tempfile::tempdir;

    use super::*;

    fn current_ids() -> (Ownership, Ownership) {
        (
            Ownership::Id(rustix::process::geteuid().as_raw()),
            Ownership::Id(rustix::process::getegid().as_raw()),
        )
    }

    fn planned(path: PathBuf, content: &str, mode: u32) -> PlannedFile {
        let (owner, group) = current_ids();
        PlannedFile {
            path,
            content: content.to_string(),
            mode,
            owner,
            group,
        }
    }

    #[test]
    fn writes_content_and_mode() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("nested").join("creds");

        materialize(&[planned(path.clone(), "key:secret\n", 0o640)]).unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "key:secret\n");
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o7777, 0o640);
        let parent_mode = std::fs::metadata(path.parent().unwrap())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(parent_mode & 0o777, PARENT_DIR_MODE);
    }

    #[test]
    fn overwrites_existing_file() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("creds");
        std::fs::write(&path, "a much longer previous content").unwrap();

        materialize(&[planned(path.clone(), "short", 0o600)]).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "short");
    }

    #[test]
    fn unknown_owner_is_rejected() {
        let temp = tempdir().unwrap();
        let mut file = planned(temp.path().join("creds"), "x", 0o600);
        file.owner = Ownership::Name("anyvol-no-such-user".to_string());

        let err = materialize(&[file]).unwrap_err();
        assert!(matches!(err, AnyvolError::Validation { .. }), "{err}");
    }

    #[test]
    fn numeric_ids_need_no_lookup() {
        assert_eq!(resolve_user(&Ownership::Id(1000)).unwrap(), 1000);
        assert_eq!(resolve_group(&Ownership::Id(0)).unwrap(), 0);
        assert_eq!(resolve_user(&Ownership::Name("root".to_string())).unwrap(), 0);
    }
}

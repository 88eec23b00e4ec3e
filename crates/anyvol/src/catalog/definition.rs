//! Per-filesystem-type mount templates.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::exec::CommandSpec;
use crate::template::Value;

/// How to mount and unmount one filesystem type.
///
/// Every string may contain `{{ placeholders }}` rendered against the
/// volume (`type`, `src`, `mountpoint`, `options.*`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountDefinition {
    /// Leading argv of the mount command. Options, `src` and the
    /// mountpoint are appended.
    pub mount_command: Vec<String>,

    /// Leading argv of the unmount command. The mountpoint is appended.
    pub umount_command: Vec<String>,

    /// Run before the mount command.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_mount: Option<CommandSpec>,

    /// Run after a successful mount command.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_mount: Option<CommandSpec>,

    /// Run before the unmount command.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_umount: Option<CommandSpec>,

    /// Run after a successful unmount command.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_umount: Option<CommandSpec>,

    /// Auxiliary files, keyed by path template.
    ///
    /// A value is either the content (a string or a list of lines) or a
    /// mapping with `content`, `mode`, `owner` and `group`.
    pub files: BTreeMap<String, Value>,

    /// Option keys left out of the `-o` expansion.
    pub strip_options: BTreeSet<String>,

    /// Stage a local copy of `src` when it is a URL.
    pub download_src: bool,

    /// Text fed to the mount command's standard input.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdin: Option<String>,
}

impl Default for MountDefinition {
    fn default() -> Self {
        Self {
            mount_command: Vec::new(),
            umount_command: vec!["umount".to_string()],
            pre_mount: None,
            post_mount: None,
            pre_umount: None,
            post_umount: None,
            files: BTreeMap::new(),
            strip_options: BTreeSet::new(),
            download_src: false,
            stdin: None,
        }
    }
}

impl MountDefinition {
    /// Start a definition from the leading mount and unmount argv.
    #[must_use]
    pub fn new(mount_command: &[&str], umount_command: &[&str]) -> Self {
        Self {
            mount_command: argv(mount_command),
            umount_command: argv(umount_command),
            ..Self::default()
        }
    }

    /// Declare an auxiliary file.
    #[must_use]
    pub fn with_file(mut self, path: &str, spec: Value) -> Self {
        self.files.insert(path.to_string(), spec);
        self
    }

    /// Keep the given option keys out of the command line.
    #[must_use]
    pub fn stripping(mut self, keys: &[&str]) -> Self {
        self.strip_options
            .extend(keys.iter().map(ToString::to_string));
        self
    }

    /// Feed a rendered template to the mount command's stdin.
    #[must_use]
    pub fn with_stdin(mut self, template: &str) -> Self {
        self.stdin = Some(template.to_string());
        self
    }

    /// Stage remote sources locally before mounting.
    #[must_use]
    pub const fn downloading_src(mut self) -> Self {
        self.download_src = true;
        self
    }
}

fn argv(args: &[&str]) -> Vec<String> {
    args.iter().map(ToString::to_string).collect()
}

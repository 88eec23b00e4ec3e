//! Rendered mount and unmount plans.
//!
//! Planning is pure: it turns a [`MountDefinition`] and a [`VolumeRecord`]
//! into concrete argv vectors and file contents without touching the host.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use anyvol_common::{AnyvolError, AnyvolResult};

use crate::catalog::MountDefinition;
use crate::exec::CommandSpec;
use crate::registry::{OptionValue, VolumeRecord};
use crate::template::{self, Value};

/// Default mode of an auxiliary file.
pub const DEFAULT_FILE_MODE: u32 = 0o600;

/// Owner or group of an auxiliary file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ownership {
    /// Numeric uid or gid.
    Id(u32),
    /// User or group name, resolved when the file is written.
    Name(String),
}

impl Default for Ownership {
    fn default() -> Self {
        Self::Id(0)
    }
}

/// An auxiliary file to write before mounting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedFile {
    /// Absolute path.
    pub path: PathBuf,
    /// Rendered content.
    pub content: String,
    /// Permission bits.
    pub mode: u32,
    /// Owning user.
    pub owner: Ownership,
    /// Owning group.
    pub group: Ownership,
}

/// Everything needed to mount a volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPlan {
    /// Files written before any command runs.
    pub files: Vec<PlannedFile>,
    /// Hook run before the mount command.
    pub pre_mount: Option<CommandSpec>,
    /// Full mount argv, ending with `src` and the mountpoint.
    pub command: Vec<String>,
    /// Input for the mount command.
    pub stdin: Option<String>,
    /// Hook run after the mount command.
    pub post_mount: Option<CommandSpec>,
}

/// Everything needed to unmount a volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnmountPlan {
    /// Hook run before the unmount command.
    pub pre_umount: Option<CommandSpec>,
    /// Full unmount argv, ending with the mountpoint.
    pub command: Vec<String>,
    /// Hook run after the unmount command.
    pub post_umount: Option<CommandSpec>,
    /// Auxiliary files removed afterwards.
    pub files: Vec<PathBuf>,
}

/// Render the mount plan of `record` for `mountpoint`.
///
/// # Errors
///
/// Returns a template error if a placeholder can not be resolved, or a
/// validation error if the definition or a file spec is malformed.
pub fn plan_mount(
    def: &MountDefinition,
    record: &VolumeRecord,
    mountpoint: &Path,
) -> AnyvolResult<MountPlan> {
    let context = record.context(mountpoint);

    let files = def
        .files
        .iter()
        .map(|(path, spec)| plan_file(path, spec, &context))
        .collect::<AnyvolResult<Vec<_>>>()?;

    let mut command = render_argv(&def.mount_command, &context)?;
    if command.is_empty() {
        return Err(AnyvolError::validation(format!(
            "type {} has no mount_command",
            record.fs_type
        )));
    }
    for (key, value) in &record.options {
        if def.strip_options.contains(key) {
            continue;
        }
        match value {
            OptionValue::Flag(true) => command.extend(["-o".to_string(), key.clone()]),
            OptionValue::Flag(false) => {}
            OptionValue::Text(text) => {
                command.extend(["-o".to_string(), format!("{key}={text}")]);
            }
        }
    }
    command.push(record.src.clone());
    command.push(mountpoint.display().to_string());

    Ok(MountPlan {
        files,
        pre_mount: render_hook(def.pre_mount.as_ref(), &context)?,
        command,
        stdin: def
            .stdin
            .as_deref()
            .map(|stdin| template::render_str(stdin, &context))
            .transpose()?,
        post_mount: render_hook(def.post_mount.as_ref(), &context)?,
    })
}

/// Render the unmount plan of `record` for `mountpoint`.
///
/// # Errors
///
/// Returns a template error if a placeholder can not be resolved, or a
/// validation error if the definition is malformed.
pub fn plan_unmount(
    def: &MountDefinition,
    record: &VolumeRecord,
    mountpoint: &Path,
) -> AnyvolResult<UnmountPlan> {
    let context = record.context(mountpoint);

    let mut command = render_argv(&def.umount_command, &context)?;
    if command.is_empty() {
        return Err(AnyvolError::validation(format!(
            "type {} has no umount_command",
            record.fs_type
        )));
    }
    command.push(mountpoint.display().to_string());

    let files = def
        .files
        .keys()
        .map(|path| render_path(path, &context))
        .collect::<AnyvolResult<Vec<_>>>()?;

    Ok(UnmountPlan {
        pre_umount: render_hook(def.pre_umount.as_ref(), &context)?,
        command,
        post_umount: render_hook(def.post_umount.as_ref(), &context)?,
        files,
    })
}

fn render_argv(args: &[String], context: &Value) -> AnyvolResult<Vec<String>> {
    args.iter()
        .map(|arg| template::render_str(arg, context).map_err(AnyvolError::from))
        .collect()
}

fn render_hook(spec: Option<&CommandSpec>, context: &Value) -> AnyvolResult<Option<CommandSpec>> {
    Ok(spec.map(|spec| spec.render(context)).transpose()?)
}

fn render_path(template: &str, context: &Value) -> AnyvolResult<PathBuf> {
    let path = PathBuf::from(template::render_str(template, context)?);
    if !path.is_absolute() || path.components().any(|c| c == Component::ParentDir) {
        return Err(AnyvolError::validation(format!(
            "file path must be absolute without '..': {}",
            path.display()
        )));
    }
    Ok(path)
}

fn plan_file(path: &str, spec: &Value, context: &Value) -> AnyvolResult<PlannedFile> {
    let path = render_path(path, context)?;
    let mut file = PlannedFile {
        path,
        content: String::new(),
        mode: DEFAULT_FILE_MODE,
        owner: Ownership::default(),
        group: Ownership::default(),
    };

    match template::render(spec, context)? {
        Value::Map(fields) => {
            check_known_keys(&fields, &file.path)?;
            if let Some(content) = fields.get("content") {
                file.content = content_text(content, &file.path)?;
            }
            if let Some(mode) = fields.get("mode") {
                file.mode = parse_mode(mode, &file.path)?;
            }
            if let Some(owner) = fields.get("owner") {
                file.owner = parse_ownership(owner, &file.path)?;
            }
            if let Some(group) = fields.get("group") {
                file.group = parse_ownership(group, &file.path)?;
            }
        }
        other => file.content = content_text(&other, &file.path)?,
    }

    Ok(file)
}

/// File content from a string, or from lines joined with trailing newlines.
fn content_text(content: &Value, path: &Path) -> AnyvolResult<String> {
    match content {
        Value::String(text) => Ok(text.clone()),
        Value::Seq(lines) => lines.iter().try_fold(String::new(), |mut out, line| {
            let line = line
                .as_str()
                .ok_or_else(|| invalid_file(path, "content lines must be strings"))?;
            out.push_str(line);
            out.push('\n');
            Ok(out)
        }),
        _ => Err(invalid_file(path, "content must be a string or a list of lines")),
    }
}

fn parse_mode(mode: &Value, path: &Path) -> AnyvolResult<u32> {
    let parsed = match mode {
        Value::Integer(bits) => u32::try_from(*bits).ok(),
        Value::String(text) => {
            let digits = text.strip_prefix("0o").unwrap_or(text);
            u32::from_str_radix(digits, 8).ok()
        }
        _ => None,
    };
    parsed
        .filter(|bits| *bits <= 0o7777)
        .ok_or_else(|| invalid_file(path, &format!("invalid mode {mode}")))
}

fn parse_ownership(value: &Value, path: &Path) -> AnyvolResult<Ownership> {
    match value {
        Value::Integer(id) => u32::try_from(*id)
            .map(Ownership::Id)
            .map_err(|_| invalid_file(path, &format!("invalid id {id}"))),
        Value::String(text) => Ok(text
            .parse::<u32>()
            .map_or_else(|_| Ownership::Name(text.clone()), Ownership::Id)),
        _ => Err(invalid_file(path, "owner and group must be an id or a name")),
    }
}

fn check_known_keys(fields: &BTreeMap<String, Value>, path: &Path) -> AnyvolResult<()> {
    match fields
        .keys()
        .find(|key| !matches!(key.as_str(), "content" | "mode" | "owner" | "group"))
    {
        Some(key) => Err(invalid_file(path, &format!("unknown key '{key}'"))),
        None => Ok(()),
    }
}

fn invalid_file(path: &Path, reason: &str) -> AnyvolError {
    AnyvolError::validation(format!("file {}: {reason}", path.display()))
}

//! Volume records and create-option normalization.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use anyvol_common::{AnyvolError, AnyvolResult, Digest};
use serde::{Deserialize, Serialize};

use crate::template::Value;

/// A per-volume mount option value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    /// A bare flag (`ro`), or an explicit boolean.
    Flag(bool),
    /// A `key=value` option.
    Text(String),
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flag(b) => write!(f, "{b}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<&OptionValue> for Value {
    fn from(option: &OptionValue) -> Self {
        match option {
            OptionValue::Flag(b) => Self::Bool(*b),
            OptionValue::Text(s) => Self::String(s.clone()),
        }
    }
}

/// Normalized volume options, sorted by key.
pub type VolumeOptions = BTreeMap<String, OptionValue>;

/// A persisted volume definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeRecord {
    /// Volume name (the registry key).
    #[serde(default)]
    pub name: String,

    /// Filesystem type, a key of the mount-type catalog.
    #[serde(rename = "type")]
    pub fs_type: String,

    /// Source path, URL or share. Points at the staged copy when
    /// `staged_source` is set.
    pub src: String,

    /// Mount options.
    #[serde(default)]
    pub options: VolumeOptions,

    /// Local directory the volume is mounted on.
    pub mountpoint: PathBuf,

    /// Locally downloaded copy of the source, owned by this record.
    #[serde(default, alias = "_remove", skip_serializing_if = "Option::is_none")]
    pub staged_source: Option<PathBuf>,

    /// Remote URL the staged copy was downloaded from.
    #[serde(default, alias = "_url", skip_serializing_if = "Option::is_none")]
    pub original_src: Option<String>,
}

impl VolumeRecord {
    /// Template context for this volume, with `mountpoint` overridden.
    #[must_use]
    pub fn context(&self, mountpoint: &Path) -> Value {
        let options = self
            .options
            .iter()
            .map(|(key, value)| (key.clone(), Value::from(value)))
            .collect();

        let mut ctx = BTreeMap::from([
            ("name".to_string(), Value::from(self.name.as_str())),
            ("type".to_string(), Value::from(self.fs_type.as_str())),
            ("src".to_string(), Value::from(self.src.as_str())),
            ("options".to_string(), Value::Map(options)),
            (
                "mountpoint".to_string(),
                Value::from(mountpoint.display().to_string()),
            ),
        ]);
        if let Some(staged) = &self.staged_source {
            ctx.insert(
                "staged_source".to_string(),
                Value::from(staged.display().to_string()),
            );
        }
        if let Some(url) = &self.original_src {
            ctx.insert("original_src".to_string(), Value::from(url.as_str()));
        }
        Value::Map(ctx)
    }
}

/// The `type`, `src` and options of a create request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateParams {
    /// Filesystem type.
    pub fs_type: String,
    /// Source.
    pub src: String,
    /// Options, with the `o=` string expanded.
    pub options: VolumeOptions,
}

impl CreateParams {
    /// Split raw request options into type, source and mount options.
    ///
    /// Explicit key/value options are merged with the comma-separated `o`
    /// string, which wins on conflicts; bare flags in it become `true`.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `type` or `src` is missing, or an
    /// option could be used to inject additional mount options.
    pub fn from_opts(opts: &BTreeMap<String, serde_json::Value>) -> AnyvolResult<Self> {
        let mut fs_type = None;
        let mut src = None;
        let mut option_string = None;
        let mut options = VolumeOptions::new();

        for (key, value) in opts {
            let value = option_value(key, value)?;
            match (key.as_str(), value) {
                ("type", OptionValue::Text(v)) => fs_type = Some(v),
                ("src", OptionValue::Text(v)) => src = Some(v),
                ("o", OptionValue::Text(v)) => option_string = Some(v),
                ("type" | "src" | "o", OptionValue::Flag(_)) => {
                    return Err(AnyvolError::validation(format!(
                        "option '{key}' must be a string"
                    )));
                }
                (_, value) => {
                    options.insert(key.clone(), value);
                }
            }
        }

        if let Some(o) = option_string {
            parse_option_string(&o, &mut options);
        }

        let fs_type = fs_type
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AnyvolError::validation("missing option: type"))?;
        let src = src
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AnyvolError::validation("missing option: src"))?;

        if src.starts_with('-') {
            return Err(AnyvolError::validation(format!("invalid src: {src}")));
        }
        for (key, value) in &options {
            check_option(key, value)?;
        }

        Ok(Self {
            fs_type,
            src,
            options,
        })
    }
}

/// Merge a comma-separated `o=` string into `options`.
///
/// `uid=1000,ro` yields `uid: "1000"` and `ro: true`. Empty entries are
/// skipped.
pub fn parse_option_string(o: &str, options: &mut VolumeOptions) {
    for entry in o.split(',').filter(|entry| !entry.is_empty()) {
        match entry.split_once('=') {
            Some((key, value)) => {
                options.insert(key.to_string(), OptionValue::Text(value.to_string()));
            }
            None => {
                options.insert(entry.to_string(), OptionValue::Flag(true));
            }
        }
    }
}

/// Hash of the full create request, used to name the mountpoint.
///
/// The volume name is part of the hashed document, so two volumes with the
/// same options still get distinct mountpoints.
#[must_use]
pub fn mountpoint_digest(name: &str, opts: &BTreeMap<String, serde_json::Value>) -> Digest {
    #[derive(Serialize)]
    struct Canonical<'a> {
        #[serde(rename = "Name")]
        name: &'a str,
        #[serde(rename = "Opts")]
        opts: &'a BTreeMap<String, serde_json::Value>,
    }

    // Serializing a struct of a str and a BTreeMap can not fail.
    let bytes = serde_json::to_vec(&Canonical { name, opts }).unwrap_or_default();
    Digest::sha256_of(&bytes)
}

fn option_value(key: &str, value: &serde_json::Value) -> AnyvolResult<OptionValue> {
    match value {
        serde_json::Value::String(s) => Ok(OptionValue::Text(s.clone())),
        serde_json::Value::Bool(b) => Ok(OptionValue::Flag(*b)),
        serde_json::Value::Number(n) => Ok(OptionValue::Text(n.to_string())),
        _ => Err(AnyvolError::validation(format!(
            "option '{key}' must be a string, number or boolean"
        ))),
    }
}

fn check_option(key: &str, value: &OptionValue) -> AnyvolResult<()> {
    if key.is_empty() || key.contains(['=', ',']) || key.starts_with('-') {
        return Err(AnyvolError::validation(format!("invalid option name: {key:?}")));
    }
    if let OptionValue::Text(text) = value {
        if text.contains(',') {
            return Err(AnyvolError::validation(format!(
                "option '{key}' must not contain ','"
            )));
        }
    }
    Ok(())
}

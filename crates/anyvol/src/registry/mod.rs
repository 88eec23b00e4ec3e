//! Persistent volume registry.
//!
//! Every known volume is kept in memory and mirrored to a single JSON state
//! file. Each mutation rewrites the file atomically, so a crash leaves either
//! the previous or the new state on disk.

mod record;

pub use record::{
    CreateParams, OptionValue, VolumeOptions, VolumeRecord, mountpoint_digest,
    parse_option_string,
};

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyvol_common::{AnyvolError, AnyvolResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Current state file format version.
const STATE_VERSION: u32 = 1;

#[derive(Serialize)]
struct StateRef<'a> {
    version: u32,
    volumes: &'a BTreeMap<String, VolumeRecord>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StateFile {
    Versioned {
        #[allow(dead_code)]
        version: u32,
        volumes: BTreeMap<String, VolumeRecord>,
    },
    /// Flat `name -> record` map written by earlier releases.
    Legacy(BTreeMap<String, VolumeRecord>),
}

/// Name-keyed store of volume records.
#[derive(Debug)]
pub struct VolumeRegistry {
    state_file: PathBuf,
    volumes: RwLock<BTreeMap<String, VolumeRecord>>,
}

impl VolumeRegistry {
    /// Open the registry backed by `state_file`.
    ///
    /// A missing file yields an empty registry. An unreadable or corrupt
    /// file is logged and also treated as empty; it is overwritten by the
    /// next mutation.
    #[must_use]
    pub fn open(state_file: impl Into<PathBuf>) -> Self {
        let state_file = state_file.into();
        let volumes = match Self::load(&state_file) {
            Ok(volumes) => volumes,
            Err(e) => {
                tracing::warn!(
                    path = %state_file.display(),
                    error = %e,
                    "Ignoring unreadable volume state"
                );
                BTreeMap::new()
            }
        };

        tracing::debug!(
            path = %state_file.display(),
            volumes = volumes.len(),
            "Opened volume registry"
        );

        Self {
            state_file,
            volumes: RwLock::new(volumes),
        }
    }

    /// Read a state file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but can not be read or parsed.
    pub fn load(path: &Path) -> AnyvolResult<BTreeMap<String, VolumeRecord>> {
        let json = match std::fs::read_to_string(path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };

        let mut volumes = match serde_json::from_str::<StateFile>(&json)? {
            StateFile::Versioned { volumes, .. } | StateFile::Legacy(volumes) => volumes,
        };
        for (name, record) in &mut volumes {
            if record.name.is_empty() {
                record.name.clone_from(name);
            }
        }
        Ok(volumes)
    }

    /// Look up a volume.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<VolumeRecord> {
        self.volumes.read().get(name).cloned()
    }

    /// Whether a volume exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.volumes.read().contains_key(name)
    }

    /// All volumes, sorted by name.
    #[must_use]
    pub fn list(&self) -> Vec<VolumeRecord> {
        self.volumes.read().values().cloned().collect()
    }

    /// Insert or replace a volume and persist.
    ///
    /// # Errors
    ///
    /// Returns an error if the state file can not be written; the in-memory
    /// registry is left unchanged in that case.
    pub fn put(&self, record: VolumeRecord) -> AnyvolResult<()> {
        let mut volumes = self.volumes.write();
        let name = record.name.clone();
        let previous = volumes.insert(name.clone(), record);

        if let Err(e) = write_state(&self.state_file, &volumes) {
            match previous {
                Some(previous) => volumes.insert(name, previous),
                None => volumes.remove(&name),
            };
            return Err(e);
        }

        tracing::debug!(volume = %name, "Stored volume");
        Ok(())
    }

    /// Remove a volume and persist, returning the removed record.
    ///
    /// # Errors
    ///
    /// Returns [`AnyvolError::VolumeNotFound`] if the volume does not exist,
    /// or an error if the state file can not be written.
    pub fn delete(&self, name: &str) -> AnyvolResult<VolumeRecord> {
        let mut volumes = self.volumes.write();
        let record = volumes.remove(name).ok_or_else(|| AnyvolError::VolumeNotFound {
            name: name.to_string(),
        })?;

        if let Err(e) = write_state(&self.state_file, &volumes) {
            volumes.insert(name.to_string(), record);
            return Err(e);
        }

        tracing::debug!(volume = %name, "Deleted volume");
        Ok(record)
    }

    /// Rewrite the state file from memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the state file can not be written.
    pub fn save(&self) -> AnyvolResult<()> {
        let volumes = self.volumes.read();
        write_state(&self.state_file, &volumes)
    }
}

/// Atomically replace `path` with the serialized registry.
fn write_state(path: &Path, volumes: &BTreeMap<String, VolumeRecord>) -> AnyvolResult<()> {
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let json = serde_json::to_vec_pretty(&StateRef {
        version: STATE_VERSION,
        volumes,
    })?;

    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(&json)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| AnyvolError::Io(e.error))?;

    tracing::trace!(path = %path.display(), volumes = volumes.len(), "Saved volume state");
    Ok(())
}

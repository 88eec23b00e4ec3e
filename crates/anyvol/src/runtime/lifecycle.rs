//! Protocol-facing volume state machine.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use anyvol_common::{AnyvolError, AnyvolPaths, AnyvolResult, VolumeName};
use dashmap::DashMap;
use tokio::sync::OwnedMutexGuard;

use super::locks::NameLocks;
use crate::engine::MountEngine;
use crate::exec::{blocking, remove_dir_if_present, remove_file_best_effort};
use crate::protocol::Capabilities;
use crate::registry::{CreateParams, VolumeRecord, VolumeRegistry, mountpoint_digest};
use crate::staging::{SourceFetcher, is_remote};

/// Raw create options as received from the runtime.
pub type CreateOpts = BTreeMap<String, serde_json::Value>;

/// Drives volumes through create, mount, unmount and remove.
///
/// Mutating operations on one name are serialized; different names
/// proceed in parallel. Reads never take the per-name locks.
pub struct VolumeLifecycle {
    paths: AnyvolPaths,
    registry: Arc<VolumeRegistry>,
    engine: MountEngine,
    fetcher: Arc<dyn SourceFetcher>,
    locks: NameLocks,
    /// Caller ids holding each mounted volume. Not persisted.
    active: DashMap<String, HashSet<String>>,
}

impl std::fmt::Debug for VolumeLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolumeLifecycle")
            .field("paths", &self.paths)
            .field("registry", &self.registry)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl VolumeLifecycle {
    /// Set up the data directories and load the registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the directories under `paths.root` can not be
    /// created. A corrupt state file is not an error.
    pub fn new(
        paths: AnyvolPaths,
        engine: MountEngine,
        fetcher: Arc<dyn SourceFetcher>,
    ) -> AnyvolResult<Self> {
        paths.create_dirs()?;
        let registry = Arc::new(VolumeRegistry::open(paths.state_file()));

        tracing::info!(
            root = %paths.root.display(),
            volumes = registry.list().len(),
            "Volume lifecycle ready"
        );

        Ok(Self {
            paths,
            registry,
            engine,
            fetcher,
            locks: NameLocks::new(),
            active: DashMap::new(),
        })
    }

    /// Create a volume.
    ///
    /// # Errors
    ///
    /// Fails if the name is invalid or taken, the options do not describe
    /// a mountable volume, staging fails, or the registry can not be saved.
    /// No record is stored on failure.
    pub async fn create(&self, name: &str, opts: Option<&CreateOpts>) -> AnyvolResult<()> {
        if name.is_empty() {
            return Err(AnyvolError::validation("missing volume name"));
        }
        let name = VolumeName::new(name)?;
        let empty = CreateOpts::new();
        let opts = opts.unwrap_or(&empty);

        let guard = self.locks.lock(name.as_str()).await;
        let result = self.create_locked(&name, opts).await;
        self.release(name.as_str(), guard);
        result
    }

    /// Drop the per-name guard, discarding the lock entry of a name that
    /// is not (or no longer) registered.
    fn release(&self, name: &str, guard: OwnedMutexGuard<()>) {
        drop(guard);
        if !self.registry.contains(name) {
            self.locks.prune(name);
        }
    }

    /// Apply a registry mutation on the blocking pool; it rewrites the
    /// state file.
    async fn persist<T, F>(&self, mutation: F) -> AnyvolResult<T>
    where
        F: FnOnce(&VolumeRegistry) -> AnyvolResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let registry = Arc::clone(&self.registry);
        blocking(move || mutation(&registry)).await
    }

    async fn create_locked(&self, name: &VolumeName, opts: &CreateOpts) -> AnyvolResult<()> {
        if self.registry.contains(name.as_str()) {
            return Err(AnyvolError::VolumeExists {
                name: name.to_string(),
            });
        }

        let params = CreateParams::from_opts(opts)?;
        let download_src = self.engine.catalog().resolve(&params.fs_type)?.download_src;
        let digest = mountpoint_digest(name.as_str(), opts);

        let mut record = VolumeRecord {
            name: name.to_string(),
            fs_type: params.fs_type,
            src: params.src,
            options: params.options,
            mountpoint: self.paths.mountpoint(&digest.hash),
            staged_source: None,
            original_src: None,
        };
        self.engine.validate(&record)?;

        if download_src && is_remote(&record.src) {
            let staged = self.stage(&record.src).await?;
            let url = std::mem::replace(&mut record.src, staged.display().to_string());
            record.original_src = Some(url);
            record.staged_source = Some(staged);
        }

        let stored = record.clone();
        if let Err(e) = self.persist(move |registry| registry.put(stored)).await {
            if let Some(staged) = &record.staged_source {
                remove_file_best_effort(staged).await;
            }
            return Err(e);
        }

        tracing::info!(
            volume = %record.name,
            fs_type = %record.fs_type,
            mountpoint = %record.mountpoint.display(),
            staged = record.staged_source.is_some(),
            "Volume created"
        );
        Ok(())
    }

    /// Download `url` into a fresh file under the staging directory.
    async fn stage(&self, url: &str) -> AnyvolResult<PathBuf> {
        let staging = self.paths.staging();
        tokio::fs::create_dir_all(&staging).await?;
        let path = tempfile::Builder::new()
            .prefix("staged-")
            .tempfile_in(&staging)?
            .into_temp_path()
            .keep()
            .map_err(|e| AnyvolError::Io(e.error))?;

        if let Err(e) = self.fetcher.fetch(url, &path).await {
            remove_file_best_effort(&path).await;
            return Err(e);
        }
        Ok(path)
    }

    /// Mount a volume for `caller` and return its mountpoint.
    ///
    /// Only the first caller triggers the mount; later callers are recorded
    /// and share it.
    ///
    /// # Errors
    ///
    /// Returns [`AnyvolError::VolumeNotFound`] for an unknown volume, or
    /// the first failure of the mount procedure.
    pub async fn mount(&self, name: &str, caller: Option<&str>) -> AnyvolResult<PathBuf> {
        let guard = self.locks.lock(name).await;
        let result = self.mount_locked(name, caller).await;
        self.release(name, guard);
        result
    }

    async fn mount_locked(&self, name: &str, caller: Option<&str>) -> AnyvolResult<PathBuf> {
        let record = self.lookup(name)?;
        let caller = caller.unwrap_or_default().to_string();

        let shared = match self.active.get_mut(name) {
            Some(mut holders) if !holders.is_empty() => {
                holders.insert(caller.clone());
                true
            }
            _ => false,
        };
        if shared {
            tracing::debug!(volume = %name, caller = %caller, "Volume already mounted, sharing");
            return Ok(record.mountpoint);
        }

        self.engine.mount(&record).await?;
        self.active
            .entry(name.to_string())
            .or_default()
            .insert(caller);
        Ok(record.mountpoint)
    }

    /// Release `caller`'s hold on a volume, unmounting it when no holder
    /// is left.
    ///
    /// A volume not known to be mounted (for example after a restart) is
    /// unmounted unconditionally.
    ///
    /// # Errors
    ///
    /// Returns [`AnyvolError::VolumeNotFound`] for an unknown volume, the
    /// first failure of the unmount procedure, or an error removing the
    /// mountpoint directory.
    pub async fn unmount(&self, name: &str, caller: Option<&str>) -> AnyvolResult<()> {
        let guard = self.locks.lock(name).await;
        let result = self.unmount_locked(name, caller).await;
        self.release(name, guard);
        result
    }

    async fn unmount_locked(&self, name: &str, caller: Option<&str>) -> AnyvolResult<()> {
        let record = self.lookup(name)?;
        let caller = caller.unwrap_or_default();

        let (was_held, remaining) = match self.active.get_mut(name) {
            Some(mut holders) => (holders.remove(caller), holders.len()),
            None => (false, 0),
        };
        if remaining > 0 {
            tracing::debug!(volume = %name, remaining, "Volume still in use, keeping it mounted");
            return Ok(());
        }

        if let Err(e) = self.engine.unmount(&record).await {
            if was_held {
                self.active
                    .entry(name.to_string())
                    .or_default()
                    .insert(caller.to_string());
            }
            return Err(e);
        }
        self.active.remove(name);

        remove_dir_if_present(&record.mountpoint).await?;
        Ok(())
    }

    /// Delete a volume and its staged source.
    ///
    /// # Errors
    ///
    /// Returns [`AnyvolError::VolumeNotFound`] for an unknown volume,
    /// [`AnyvolError::VolumeInUse`] while it is mounted, or an error if the
    /// registry can not be saved.
    pub async fn remove(&self, name: &str) -> AnyvolResult<()> {
        let guard = self.locks.lock(name).await;
        let result = self.remove_locked(name).await;
        self.release(name, guard);
        result
    }

    async fn remove_locked(&self, name: &str) -> AnyvolResult<()> {
        if !self.registry.contains(name) {
            return Err(not_found(name));
        }
        let callers = self.active_callers(name);
        if callers > 0 {
            return Err(AnyvolError::VolumeInUse {
                name: name.to_string(),
                callers,
            });
        }

        let owned = name.to_string();
        let record = self
            .persist(move |registry| registry.delete(&owned))
            .await?;
        self.active.remove(name);
        if let Some(staged) = &record.staged_source {
            remove_file_best_effort(staged).await;
        }

        tracing::info!(volume = %name, "Volume removed");
        Ok(())
    }

    /// Look up a volume.
    ///
    /// # Errors
    ///
    /// Returns [`AnyvolError::VolumeNotFound`] for an unknown volume.
    pub fn get(&self, name: &str) -> AnyvolResult<VolumeRecord> {
        self.lookup(name)
    }

    /// All volumes, sorted by name.
    #[must_use]
    pub fn list(&self) -> Vec<VolumeRecord> {
        self.registry.list()
    }

    /// Mountpoint of a volume.
    ///
    /// # Errors
    ///
    /// Returns [`AnyvolError::VolumeNotFound`] for an unknown volume.
    pub fn path(&self, name: &str) -> AnyvolResult<PathBuf> {
        self.lookup(name).map(|record| record.mountpoint)
    }

    /// Static driver capabilities.
    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    /// Number of callers currently holding `name` mounted.
    #[must_use]
    pub fn active_callers(&self, name: &str) -> usize {
        self.active.get(name).map_or(0, |holders| holders.len())
    }

    fn lookup(&self, name: &str) -> AnyvolResult<VolumeRecord> {
        self.registry.get(name).ok_or_else(|| not_found(name))
    }
}

fn not_found(name: &str) -> AnyvolError {
    AnyvolError::VolumeNotFound {
        name: name.to_string(),
    }
}

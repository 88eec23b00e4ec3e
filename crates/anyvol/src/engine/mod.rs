//! Mount engine.
//!
//! Renders a volume's [`MountDefinition`](crate::catalog::MountDefinition)
//! into a plan and carries it out: auxiliary files first, then the hook and
//! mount commands in order. Rendering always completes before the first
//! side effect, so a template error never leaves partial state behind.

mod files;
mod plan;

pub use files::materialize;
pub use plan::{
    DEFAULT_FILE_MODE, MountPlan, Ownership, PlannedFile, UnmountPlan, plan_mount, plan_unmount,
};

use std::path::Path;
use std::sync::Arc;

use anyvol_common::{AnyvolError, AnyvolResult};

use crate::catalog::MountTypeCatalog;
use crate::exec::{self, CommandExecutor, remove_file_best_effort};
use crate::registry::VolumeRecord;

/// Mountpoint substituted while validating a candidate volume.
pub const PLACEHOLDER_MOUNTPOINT: &str = "/nonexistent/anyvol-validate";

/// Drives mount and unmount procedures for volume records.
#[derive(Clone)]
pub struct MountEngine {
    catalog: Arc<MountTypeCatalog>,
    executor: Arc<dyn CommandExecutor>,
}

impl std::fmt::Debug for MountEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountEngine")
            .field("catalog", &self.catalog)
            .finish_non_exhaustive()
    }
}

impl MountEngine {
    /// Create an engine over a catalog and a command executor.
    pub fn new(catalog: Arc<MountTypeCatalog>, executor: Arc<dyn CommandExecutor>) -> Self {
        Self { catalog, executor }
    }

    /// The catalog in use.
    #[must_use]
    pub fn catalog(&self) -> &MountTypeCatalog {
        &self.catalog
    }

    /// Check that `record` renders completely, without side effects.
    ///
    /// Both plans are rendered against [`PLACEHOLDER_MOUNTPOINT`].
    ///
    /// # Errors
    ///
    /// Returns an error if the type is unknown, `src` is empty, or any
    /// template or file spec of the definition fails to render.
    pub fn validate(&self, record: &VolumeRecord) -> AnyvolResult<()> {
        let def = self.catalog.resolve(&record.fs_type)?;
        if record.src.is_empty() {
            return Err(AnyvolError::validation("missing option: src"));
        }

        let mountpoint = Path::new(PLACEHOLDER_MOUNTPOINT);
        plan_mount(def, record, mountpoint)?;
        plan_unmount(def, record, mountpoint)?;
        Ok(())
    }

    /// Mount `record` on its mountpoint.
    ///
    /// # Errors
    ///
    /// Returns the first failure. Steps already taken are not rolled back.
    pub async fn mount(&self, record: &VolumeRecord) -> AnyvolResult<()> {
        let def = self.catalog.resolve(&record.fs_type)?;
        let plan = plan_mount(def, record, &record.mountpoint)?;

        tracing::debug!(
            volume = %record.name,
            command = ?plan.command,
            files = plan.files.len(),
            "Rendered mount plan"
        );

        tokio::fs::create_dir_all(&record.mountpoint).await?;
        let files = plan.files.clone();
        exec::blocking(move || materialize(&files)).await?;

        exec::run(self.executor.as_ref(), plan.pre_mount.as_ref(), None).await?;
        self.executor
            .execute(&plan.command, plan.stdin.as_deref())
            .await?;
        exec::run(self.executor.as_ref(), plan.post_mount.as_ref(), None).await?;

        tracing::info!(
            volume = %record.name,
            fs_type = %record.fs_type,
            mountpoint = %record.mountpoint.display(),
            "Volume mounted"
        );
        Ok(())
    }

    /// Unmount `record`, then delete its auxiliary files.
    ///
    /// File deletion is best effort; the mountpoint directory is left for
    /// the caller.
    ///
    /// # Errors
    ///
    /// Returns the first command failure. Files are only removed after all
    /// commands succeeded.
    pub async fn unmount(&self, record: &VolumeRecord) -> AnyvolResult<()> {
        let def = self.catalog.resolve(&record.fs_type)?;
        let plan = plan_unmount(def, record, &record.mountpoint)?;

        tracing::debug!(
            volume = %record.name,
            command = ?plan.command,
            "Rendered unmount plan"
        );

        exec::run(self.executor.as_ref(), plan.pre_umount.as_ref(), None).await?;
        self.executor.execute(&plan.command, None).await?;
        exec::run(self.executor.as_ref(), plan.post_umount.as_ref(), None).await?;

        for path in &plan.files {
            remove_file_best_effort(path).await;
        }

        tracing::info!(
            volume = %record.name,
            mountpoint = %record.mountpoint.display(),
            "Volume unmounted"
        );
        Ok(())
    }
}

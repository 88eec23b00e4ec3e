//! Standard filesystem paths for anyvol.

use std::path::PathBuf;

use once_cell::sync::Lazy;

/// Default root directory for anyvol data.
pub static ANYVOL_ROOT: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("ANYVOL_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/var/lib/anyvol"))
});

/// Name of the registry state file.
pub const STATE_FILE: &str = "anyvol-state.json";

/// Standard paths used by the volume plugin.
#[derive(Debug, Clone)]
pub struct AnyvolPaths {
    /// Root data directory (default: /var/lib/anyvol).
    pub root: PathBuf,
}

impl AnyvolPaths {
    /// Create paths with default locations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create paths with a custom root directory.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding one mountpoint per volume.
    #[must_use]
    pub fn volumes(&self) -> PathBuf {
        self.root.join("volumes")
    }

    /// Mountpoint for a volume, keyed by its creation hash.
    #[must_use]
    pub fn mountpoint(&self, hash: &str) -> PathBuf {
        self.volumes().join(hash)
    }

    /// Directory for locally staged copies of remote sources.
    #[must_use]
    pub fn staging(&self) -> PathBuf {
        self.root.join("staging")
    }

    /// Directory for persisted plugin state.
    #[must_use]
    pub fn state(&self) -> PathBuf {
        self.root.join("state")
    }

    /// Registry state file.
    #[must_use]
    pub fn state_file(&self) -> PathBuf {
        self.state().join(STATE_FILE)
    }

    /// Create all necessary directories.
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation fails.
    pub fn create_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.volumes())?;
        std::fs::create_dir_all(self.staging())?;
        std::fs::create_dir_all(self.state())?;
        Ok(())
    }
}

impl Default for AnyvolPaths {
    fn default() -> Self {
        Self {
            root: ANYVOL_ROOT.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_root() {
        let paths = AnyvolPaths::with_root("/tmp/anyvol-test");
        assert_eq!(paths.volumes(), PathBuf::from("/tmp/anyvol-test/volumes"));
        assert_eq!(
            paths.mountpoint("abc123"),
            PathBuf::from("/tmp/anyvol-test/volumes/abc123")
        );
        assert_eq!(
            paths.state_file(),
            PathBuf::from("/tmp/anyvol-test/state/anyvol-state.json")
        );
        assert_eq!(paths.staging(), PathBuf::from("/tmp/anyvol-test/staging"));
    }

    #[test]
    fn create_dirs_builds_layout() {
        let temp = std::env::temp_dir().join(format!("anyvol-paths-{}", std::process::id()));
        let paths = AnyvolPaths::with_root(&temp);
        paths.create_dirs().unwrap();
        assert!(paths.volumes().is_dir());
        assert!(paths.staging().is_dir());
        assert!(paths.state().is_dir());
        std::fs::remove_dir_all(&temp).unwrap();
    }
}

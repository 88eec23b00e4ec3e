//! Mount-type catalog.
//!
//! Maps a filesystem type name to its [`MountDefinition`]. The catalog is
//! built once at startup, either from the built-in defaults or from a YAML
//! file, and is read-only afterwards.

mod defaults;
mod definition;

pub use definition::MountDefinition;

use std::collections::BTreeMap;
use std::path::Path;

use anyvol_common::{AnyvolError, AnyvolResult};

/// Read-only table of mount types.
#[derive(Debug, Clone)]
pub struct MountTypeCatalog {
    definitions: BTreeMap<String, MountDefinition>,
}

impl MountTypeCatalog {
    /// Catalog with the built-in types (`davfs2`, `curlftpfs`, `s3fs`,
    /// `cifs`, `sshfs`, `nfs`, `squashfuse`, `any`).
    #[must_use]
    pub fn builtin() -> Self {
        Self::from_definitions(defaults::builtin_definitions())
    }

    /// Catalog with exactly the given types.
    #[must_use]
    pub fn from_definitions(definitions: BTreeMap<String, MountDefinition>) -> Self {
        Self { definitions }
    }

    /// Parse a YAML mapping of type name to definition.
    ///
    /// The result replaces the built-in catalog; it is not merged into it.
    ///
    /// # Errors
    ///
    /// Returns [`AnyvolError::Config`] if the document does not parse.
    pub fn from_yaml_str(yaml: &str) -> AnyvolResult<Self> {
        let definitions: BTreeMap<String, MountDefinition> =
            serde_yaml::from_str(yaml).map_err(|e| AnyvolError::Config {
                message: format!("invalid mount type configuration: {e}"),
            })?;
        Ok(Self::from_definitions(definitions))
    }

    /// Load a YAML catalog from a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file can not be read or parsed.
    pub fn from_yaml_file(path: &Path) -> AnyvolResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| AnyvolError::Config {
            message: format!("cannot read {}: {e}", path.display()),
        })?;
        let catalog = Self::from_yaml_str(&content)?;
        tracing::info!(
            path = %path.display(),
            types = ?catalog.types().collect::<Vec<_>>(),
            "Loaded mount type configuration"
        );
        Ok(catalog)
    }

    /// Look up the definition for a filesystem type.
    ///
    /// # Errors
    ///
    /// Returns [`AnyvolError::UnknownType`] if the type is not configured.
    pub fn resolve(&self, fs_type: &str) -> AnyvolResult<&MountDefinition> {
        self.definitions
            .get(fs_type)
            .ok_or_else(|| AnyvolError::UnknownType {
                fs_type: fs_type.to_string(),
            })
    }

    /// Whether the type is configured.
    #[must_use]
    pub fn contains(&self, fs_type: &str) -> bool {
        self.definitions.contains_key(fs_type)
    }

    /// Configured type names, sorted.
    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.definitions.keys().map(String::as_str)
    }
}

impl Default for MountTypeCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_covers_glossary_types() {
        let catalog = MountTypeCatalog::builtin();
        for fs_type in ["davfs2", "curlftpfs", "s3fs", "cifs", "sshfs", "nfs", "any"] {
            assert!(catalog.contains(fs_type), "missing {fs_type}");
            assert!(!catalog.resolve(fs_type).unwrap().mount_command.is_empty());
        }
    }

    #[test]
    fn s3fs_strips_credentials() {
        let catalog = MountTypeCatalog::builtin();
        let s3fs = catalog.resolve("s3fs").unwrap();
        assert!(s3fs.strip_options.contains("access_key"));
        assert!(s3fs.strip_options.contains("secret_key"));
        assert_eq!(s3fs.files.len(), 1);
    }

    #[test]
    fn unknown_type_fails() {
        let err = MountTypeCatalog::builtin().resolve("zfs").unwrap_err();
        assert!(matches!(err, AnyvolError::UnknownType { ref fs_type } if fs_type == "zfs"));
    }

    #[test]
    fn yaml_replaces_builtin_catalog() {
        let catalog = MountTypeCatalog::from_yaml_str(
            "glusterfs:\n  mount_command: [mount, -t, glusterfs]\n",
        )
        .unwrap();
        assert_eq!(catalog.types().collect::<Vec<_>>(), vec!["glusterfs"]);
        assert!(!catalog.contains("nfs"));
    }

    #[test]
    fn invalid_yaml_is_a_config_error() {
        let err = MountTypeCatalog::from_yaml_str("nfs: 42").unwrap_err();
        assert!(matches!(err, AnyvolError::Config { .. }));
    }

    #[test]
    fn loads_from_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("types.yaml");
        std::fs::write(
            &path,
            "sshfs:\n  mount_command: [sshfs]\n  umount_command: [fusermount, -u]\n",
        )
        .unwrap();
        let catalog = MountTypeCatalog::from_yaml_file(&path).unwrap();
        assert_eq!(
            catalog.resolve("sshfs").unwrap().umount_command,
            vec!["fusermount", "-u"]
        );

        let missing = MountTypeCatalog::from_yaml_file(&temp.path().join("nope.yaml"));
        assert!(matches!(missing, Err(AnyvolError::Config { .. })));
    }
}

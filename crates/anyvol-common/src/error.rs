//! Common error types for anyvol.

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`AnyvolError`].
pub type AnyvolResult<T> = Result<T, AnyvolError>;

/// Errors raised while rendering a template against a context.
#[derive(Error, Diagnostic, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// A placeholder referenced a path that does not exist in the context.
    #[error("Undefined template variable '{path}' in \"{template}\"")]
    #[diagnostic(
        code(anyvol::template::undefined),
        help("Pass the missing key as a volume option or give the placeholder a default")
    )]
    Undefined {
        /// The dotted lookup path.
        path: String,
        /// The template being rendered.
        template: String,
    },

    /// A placeholder is malformed.
    #[error("Invalid template syntax in \"{template}\": {reason}")]
    #[diagnostic(code(anyvol::template::syntax))]
    Syntax {
        /// The template being rendered.
        template: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A placeholder resolved to a sequence or mapping.
    #[error("Template variable '{path}' is not a scalar value")]
    #[diagnostic(code(anyvol::template::not_scalar))]
    NotScalar {
        /// The dotted lookup path.
        path: String,
    },

    /// The value handed to the renderer has no rendering.
    #[error("Unsupported template value: {kind}")]
    #[diagnostic(code(anyvol::template::unsupported))]
    Unsupported {
        /// Kind of the offending value.
        kind: String,
    },
}

/// Common errors across anyvol.
#[derive(Error, Diagnostic, Debug)]
pub enum AnyvolError {
    /// Volume not found.
    #[error("no volume: {name}")]
    #[diagnostic(code(anyvol::volume::not_found))]
    VolumeNotFound {
        /// The volume name that was not found.
        name: String,
    },

    /// A volume with the same name already exists.
    #[error("volume already exists: {name}")]
    #[diagnostic(
        code(anyvol::volume::exists),
        help("Remove the existing volume first or pick another name")
    )]
    VolumeExists {
        /// The duplicate volume name.
        name: String,
    },

    /// The volume is still mounted by at least one caller.
    #[error("volume {name} is in use by {callers} mount(s)")]
    #[diagnostic(
        code(anyvol::volume::in_use),
        help("Unmount the volume before removing it")
    )]
    VolumeInUse {
        /// The volume name.
        name: String,
        /// Number of active mount callers.
        callers: usize,
    },

    /// Invalid volume name format.
    #[error("invalid volume name: {name}")]
    #[diagnostic(
        code(anyvol::volume::invalid_name),
        help("Volume names must start with an alphanumeric character and contain only [A-Za-z0-9_.-], at most 255 characters")
    )]
    InvalidVolumeName {
        /// The invalid name.
        name: String,
    },

    /// The requested filesystem type is not in the catalog.
    #[error("invalid type: {fs_type}")]
    #[diagnostic(code(anyvol::catalog::unknown_type))]
    UnknownType {
        /// The unknown type name.
        fs_type: String,
    },

    /// A create request or volume definition failed validation.
    #[error("{message}")]
    #[diagnostic(code(anyvol::validation))]
    Validation {
        /// The error message.
        message: String,
    },

    /// Template rendering failed.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Template(#[from] TemplateError),

    /// An external command exited unsuccessfully.
    #[error("command {command:?} failed with {}", describe_exit(.exit_code))]
    #[diagnostic(code(anyvol::exec::failed))]
    CommandFailed {
        /// The argv that was executed.
        command: Vec<String>,
        /// Exit code, `None` when the process was killed by a signal.
        exit_code: Option<i32>,
    },

    /// An external command could not be started.
    #[error("cannot execute {command:?}: {source}")]
    #[diagnostic(
        code(anyvol::exec::launch),
        help("Check that the mount helper is installed and on PATH")
    )]
    CommandLaunch {
        /// The argv that was executed.
        command: Vec<String>,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Staging a remote source failed.
    #[error("cannot download {url}: {message}")]
    #[diagnostic(code(anyvol::staging::download))]
    Download {
        /// The source URL.
        url: String,
        /// The error message.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(anyvol::io))]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    #[diagnostic(code(anyvol::serialization))]
    Serialization(String),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    #[diagnostic(code(anyvol::config))]
    Config {
        /// The error message.
        message: String,
    },

    /// Internal error (should not happen).
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(anyvol::internal),
        help("This is a bug, please report it at https://github.com/anyvol/anyvol/issues")
    )]
    Internal {
        /// The error message.
        message: String,
    },
}

fn describe_exit(code: &Option<i32>) -> String {
    code.map_or_else(|| "signal".to_string(), |c| format!("exit code {c}"))
}

impl AnyvolError {
    /// Shorthand for a [`AnyvolError::Validation`] error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Whether the error was caused by the request rather than the host.
    ///
    /// Client errors never have side effects and map to HTTP 400.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::VolumeNotFound { .. }
                | Self::VolumeExists { .. }
                | Self::VolumeInUse { .. }
                | Self::InvalidVolumeName { .. }
                | Self::UnknownType { .. }
                | Self::Validation { .. }
                | Self::Template(_)
        )
    }
}

impl From<serde_json::Error> for AnyvolError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

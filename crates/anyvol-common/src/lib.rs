//! # anyvol-common
//!
//! Shared utilities and types for the anyvol volume plugin.
//!
//! This crate provides common functionality used across the anyvol crates:
//! - Volume name validation and content digests
//! - Standard filesystem paths
//! - Common error types

#![warn(missing_docs)]

pub mod error;
pub mod name;
pub mod paths;

pub use error::{AnyvolError, AnyvolResult, TemplateError};
pub use name::{Digest, VolumeName};
pub use paths::AnyvolPaths;

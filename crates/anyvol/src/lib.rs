//! # anyvol
//!
//! Template-driven mount engine behind the Docker volume plugin protocol.
//!
//! ## Features
//!
//! - **Declarative mount types**: per-filesystem command, file and hook templates
//! - **Credential files**: secrets rendered into mode-restricted files instead of argv
//! - **Persistent registry**: atomic JSON state surviving daemon restarts
//! - **Per-volume serialization**: concurrent calls on one name never interleave
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use anyvol::catalog::MountTypeCatalog;
//! use anyvol::engine::MountEngine;
//! use anyvol::exec::SystemExecutor;
//! use anyvol::runtime::{CreateOpts, VolumeLifecycle};
//! use anyvol::staging::HttpFetcher;
//! use anyvol_common::AnyvolPaths;
//!
//! # async fn example() -> anyvol_common::AnyvolResult<()> {
//! let engine = MountEngine::new(
//!     Arc::new(MountTypeCatalog::builtin()),
//!     Arc::new(SystemExecutor),
//! );
//! let volumes = VolumeLifecycle::new(AnyvolPaths::new(), engine, Arc::new(HttpFetcher::new()))?;
//!
//! let opts: CreateOpts = serde_json::from_str(r#"{"type": "nfs", "src": "host:/export"}"#)?;
//! volumes.create("data", Some(&opts)).await?;
//! let mountpoint = volumes.mount("data", Some("container-1")).await?;
//! println!("mounted on {}", mountpoint.display());
//! volumes.unmount("data", Some("container-1")).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod catalog;
pub mod engine;
pub mod exec;
pub mod protocol;
pub mod registry;
pub mod runtime;
pub mod staging;
pub mod template;

pub use catalog::{MountDefinition, MountTypeCatalog};
pub use engine::MountEngine;
pub use runtime::VolumeLifecycle;

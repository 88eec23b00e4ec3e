//! Volume lifecycle runtime.

mod lifecycle;
mod locks;

pub use lifecycle::{CreateOpts, VolumeLifecycle};
pub use locks::NameLocks;

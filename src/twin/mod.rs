//! # Twin Registry
//!
//! The in-memory tree of providers, services and resources, reachable only
//! through handles given to a running command.

mod handle;
mod registry;
mod snapshot;

pub use handle::{ProviderHandle, ResourceHandle, ServiceHandle, TwinHandle};
pub use registry::ResourcePath;
pub use snapshot::{ProviderSnapshot, ResourceSnapshot, ServiceSnapshot, SnapshotFilter};

pub(crate) use registry::TwinRegistry;

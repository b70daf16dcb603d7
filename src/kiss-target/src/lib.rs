//! Targets as the client sees them: settings files, the plugin registry and
//! the per-document [`TargetSession`].

mod descriptor;
mod registry;
mod session;

pub use descriptor::{PluginSection, TargetDescriptor, TargetLoadError, TARGET_FILE_EXTENSION};
pub use registry::{PluginFactory, RegistryError, TargetRegistry};
pub use session::{SessionError, TargetSession};

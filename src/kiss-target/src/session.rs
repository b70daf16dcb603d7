use crate::descriptor::{TargetDescriptor, TargetLoadError};
use crate::registry::TargetRegistry;
use kiss_core::{BuildReport, PluginHandle, TargetCapabilities, TargetError, TargetOperation};
use kiss_debug::{DebugError, DebugSession};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no target file is bound")]
    Unbound,
    #[error("{0} is not supported by this target")]
    Unsupported(TargetOperation),
    #[error(transparent)]
    Target(#[from] TargetError),
    #[error(transparent)]
    Debug(#[from] DebugError),
}

struct Binding {
    descriptor: TargetDescriptor,
    plugin: PluginHandle,
}

/// Binds one document to one target and forwards operations to its plugin.
///
/// Every operation is gated on the capabilities the plugin advertised when
/// the target file was bound; a missing capability is refused without
/// calling the plugin.
pub struct TargetSession {
    registry: Arc<TargetRegistry>,
    binding: Option<Binding>,
    port: Option<String>,
    last_build: Option<BuildReport>,
}

impl std::fmt::Debug for TargetSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetSession")
            .field("target", &self.descriptor().map(|d| &d.name))
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

impl TargetSession {
    pub fn new(registry: Arc<TargetRegistry>) -> Self {
        Self {
            registry,
            binding: None,
            port: None,
            last_build: None,
        }
    }

    /// Bind the session to a target settings file.
    ///
    /// An empty path unbinds. Binding the file that is already bound does
    /// nothing. On any error the previous binding stays in place.
    pub fn set_target_file(&mut self, path: impl AsRef<Path>) -> Result<(), TargetLoadError> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            if self.binding.take().is_some() {
                tracing::debug!("target session unbound");
            }
            self.port = None;
            self.last_build = None;
            return Ok(());
        }
        if self.target_file() == Some(path) {
            return Ok(());
        }

        let mut descriptor = TargetDescriptor::load(path)?;
        let plugin = self.registry.try_get(descriptor.plugin_name())?;
        descriptor.capabilities = plugin.capabilities();

        tracing::info!(
            target_name = %descriptor.name,
            plugin = %descriptor.plugin_name(),
            path = %path.display(),
            "bound target file"
        );
        self.port = descriptor.port.clone();
        self.last_build = None;
        self.binding = Some(Binding { descriptor, plugin });
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.binding.is_some()
    }

    pub fn descriptor(&self) -> Option<&TargetDescriptor> {
        self.binding.as_ref().map(|b| &b.descriptor)
    }

    pub fn target_file(&self) -> Option<&Path> {
        self.descriptor().map(|d| d.config_path.as_path())
    }

    pub fn name(&self) -> Option<&str> {
        self.descriptor().map(|d| d.name.as_str())
    }

    pub fn display_name(&self) -> Option<&str> {
        self.descriptor().map(TargetDescriptor::display_name)
    }

    pub fn capabilities(&self) -> TargetCapabilities {
        self.descriptor()
            .map(|d| d.capabilities)
            .unwrap_or_else(TargetCapabilities::none)
    }

    pub fn has_compile(&self) -> bool {
        self.capabilities().compile
    }

    pub fn has_download(&self) -> bool {
        self.capabilities().download
    }

    pub fn has_run(&self) -> bool {
        self.capabilities().run
    }

    pub fn has_stop(&self) -> bool {
        self.capabilities().stop
    }

    pub fn has_simulate(&self) -> bool {
        self.capabilities().simulate
    }

    pub fn has_debug(&self) -> bool {
        self.capabilities().debug
    }

    pub fn set_port(&mut self, port: Option<String>) {
        self.port = port;
    }

    pub fn port(&self) -> Option<&str> {
        self.port.as_deref()
    }

    /// Result of the most recent compile or download.
    pub fn last_build(&self) -> Option<&BuildReport> {
        self.last_build.as_ref()
    }

    pub fn source_extensions(&self) -> Vec<String> {
        self.descriptor()
            .map(TargetDescriptor::source_extensions)
            .unwrap_or_default()
    }

    pub fn default_extension(&self) -> Option<&str> {
        self.descriptor()?.default_extension.as_deref()
    }

    /// Contents of the target's new-file template, if it has a readable one.
    pub fn source_template(&self) -> Option<String> {
        let path = self.descriptor()?.template_path.as_ref()?;
        match std::fs::read_to_string(path) {
            Ok(text) => Some(text),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "unreadable source template");
                None
            }
        }
    }

    pub fn manual_path(&self) -> Option<&Path> {
        self.descriptor()?.manual_path.as_deref()
    }

    pub fn compile(&mut self, file: &Path) -> Result<BuildReport, SessionError> {
        let plugin = self.plugin_for(TargetOperation::Compile)?;
        let report = plugin.compile(file, self.port())?;
        self.last_build = Some(report.clone());
        Ok(report)
    }

    pub fn download(&mut self, file: &Path) -> Result<BuildReport, SessionError> {
        let plugin = self.plugin_for(TargetOperation::Download)?;
        let report = plugin.download(file, self.port())?;
        self.last_build = Some(report.clone());
        Ok(report)
    }

    pub fn run(&self, file: &Path) -> Result<(), SessionError> {
        let plugin = self.plugin_for(TargetOperation::Run)?;
        Ok(plugin.run(file, self.port())?)
    }

    pub fn stop(&self) -> Result<(), SessionError> {
        let plugin = self.plugin_for(TargetOperation::Stop)?;
        Ok(plugin.stop(self.port())?)
    }

    pub fn simulate(&self, file: &Path) -> Result<(), SessionError> {
        let plugin = self.plugin_for(TargetOperation::Simulate)?;
        Ok(plugin.simulate(file, self.port())?)
    }

    /// Open a debug connection and wrap it in a running [`DebugSession`].
    pub fn debug(&self, file: &Path) -> Result<DebugSession, SessionError> {
        let plugin = self.plugin_for(TargetOperation::Debug)?;
        let connection = plugin.debug(file, self.port())?;
        Ok(DebugSession::start(connection)?)
    }

    fn plugin_for(&self, operation: TargetOperation) -> Result<PluginHandle, SessionError> {
        let binding = self.binding.as_ref().ok_or(SessionError::Unbound)?;
        if !binding.descriptor.capabilities.supports(operation) {
            tracing::debug!(
                target_name = %binding.descriptor.name,
                %operation,
                "refusing unsupported operation"
            );
            return Err(SessionError::Unsupported(operation));
        }
        Ok(Arc::clone(&binding.plugin))
    }
}

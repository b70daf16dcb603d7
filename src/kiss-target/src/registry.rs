use crate::descriptor::{TargetDescriptor, TargetLoadError, TARGET_FILE_EXTENSION};
use kiss_core::{PluginHandle, TargetCapabilities, TargetError, TargetOperation, TargetResult};
use kiss_plugin::ExecTargetPlugin;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Creates a plugin instance the first time its name is requested.
pub type PluginFactory = Box<dyn Fn() -> TargetResult<PluginHandle> + Send + Sync>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no target plugin named '{name}'")]
    PluginNotFound { name: String },
    #[error("target plugin '{name}' failed to load: {source}")]
    LoadFailed { name: String, source: TargetError },
    #[error("target registry has been shut down")]
    ShutDown,
}

impl From<RegistryError> for TargetLoadError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::PluginNotFound { name } => Self::PluginNotFound { plugin: name },
            RegistryError::LoadFailed { name, source } => Self::PluginUnavailable {
                plugin: name,
                reason: source.to_string(),
            },
            RegistryError::ShutDown => Self::PluginUnavailable {
                plugin: String::new(),
                reason: "target registry has been shut down".to_string(),
            },
        }
    }
}

/// Loads target plugins by name and keeps one shared instance of each.
///
/// Factories and the target catalogue are set up before the registry is
/// shared; afterwards it is used through `Arc<TargetRegistry>`. A plugin is
/// instantiated on first request and lives until [`TargetRegistry::shutdown`]
/// and the last session holding it are gone.
#[derive(Default)]
pub struct TargetRegistry {
    factories: BTreeMap<String, PluginFactory>,
    catalogue: BTreeMap<String, TargetDescriptor>,
    loaded: Mutex<HashMap<String, PluginHandle>>,
    shut_down: AtomicBool,
}

impl std::fmt::Debug for TargetRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetRegistry")
            .field("plugins", &self.factories.keys().collect::<Vec<_>>())
            .field("targets", &self.catalogue.keys().collect::<Vec<_>>())
            .field("shut_down", &self.shut_down.load(Ordering::SeqCst))
            .finish()
    }
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin factory. A later registration under the same name replaces it.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> TargetResult<PluginHandle> + Send + Sync + 'static,
    {
        let name = name.into();
        tracing::debug!(plugin = %name, "registered target plugin factory");
        self.factories.insert(name, Box::new(factory));
    }

    /// Register an already constructed plugin under its own name.
    pub fn register_instance(&mut self, plugin: PluginHandle) {
        let name = plugin.name().to_string();
        self.register(name, move || Ok(Arc::clone(&plugin)));
    }

    /// Add every `*.target` file in `dir` to the catalogue.
    ///
    /// Files that fail to load are logged and skipped. Targets with a
    /// `[plugin]` table get an exec plugin factory unless a factory of that
    /// name already exists. Returns the number of targets added.
    pub fn discover(&mut self, dir: impl AsRef<Path>) -> usize {
        let dir = dir.as_ref();
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::debug!(dir = %dir.display(), error = %err, "no target directory");
                return 0;
            }
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == TARGET_FILE_EXTENSION))
            .collect();
        paths.sort();

        let mut added = 0;
        for path in paths {
            match TargetDescriptor::load(&path) {
                Ok(descriptor) => {
                    self.add_descriptor(descriptor);
                    added += 1;
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "skipping target file");
                }
            }
        }
        tracing::info!(dir = %dir.display(), count = added, "discovered targets");
        added
    }

    /// Add one target to the catalogue.
    pub fn add_descriptor(&mut self, descriptor: TargetDescriptor) {
        if let Some(config) = descriptor.plugin_config() {
            let plugin = descriptor.plugin_name().to_string();
            if !self.factories.contains_key(&plugin) {
                let name = plugin.clone();
                self.register(plugin, move || {
                    let target = ExecTargetPlugin::with_name(config.clone(), name.clone())
                        .map_err(|err| TargetError::Other {
                            message: err.to_string(),
                        })?;
                    Ok(Arc::new(target) as PluginHandle)
                });
            }
        }
        self.catalogue.insert(descriptor.name.clone(), descriptor);
    }

    /// Cached plugin for `name`, loading it on first use.
    pub fn get(&self, name: &str) -> Option<PluginHandle> {
        match self.try_get(name) {
            Ok(plugin) => Some(plugin),
            Err(err) => {
                tracing::debug!(plugin = %name, error = %err, "target plugin unavailable");
                None
            }
        }
    }

    pub fn try_get(&self, name: &str) -> Result<PluginHandle, RegistryError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(RegistryError::ShutDown);
        }

        // held across the factory call so a plugin is never instantiated twice
        let mut loaded = self.lock_loaded();
        if let Some(plugin) = loaded.get(name) {
            return Ok(Arc::clone(plugin));
        }

        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| RegistryError::PluginNotFound {
                name: name.to_string(),
            })?;

        match factory() {
            Ok(plugin) => {
                tracing::info!(plugin = %name, display_name = %plugin.display_name(), "loaded target plugin");
                loaded.insert(name.to_string(), Arc::clone(&plugin));
                Ok(plugin)
            }
            Err(source) => {
                tracing::warn!(plugin = %name, error = %source, "target plugin failed to load");
                Err(RegistryError::LoadFailed {
                    name: name.to_string(),
                    source,
                })
            }
        }
    }

    /// Names of the targets in the catalogue, sorted.
    pub fn available_targets(&self) -> Vec<String> {
        self.catalogue.keys().cloned().collect()
    }

    /// Names of every plugin that can be loaded, sorted.
    pub fn available_plugins(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.lock_loaded().contains_key(name)
    }

    pub fn descriptor(&self, target: &str) -> Option<&TargetDescriptor> {
        self.catalogue.get(target)
    }

    /// Human-readable name for a catalogue target or a plugin.
    pub fn display_name(&self, name: &str) -> Option<String> {
        if let Some(descriptor) = self.catalogue.get(name) {
            return Some(descriptor.display_name().to_string());
        }
        self.get(name).map(|plugin| plugin.display_name().to_string())
    }

    /// Settings file of a catalogue target.
    pub fn target_file_path(&self, target: &str) -> Option<PathBuf> {
        self.catalogue
            .get(target)
            .map(|descriptor| descriptor.config_path.clone())
    }

    /// Capabilities of plugin `name`; none when it is unknown or fails to load.
    pub fn capabilities(&self, name: &str) -> TargetCapabilities {
        self.get(name)
            .map(|plugin| plugin.capabilities())
            .unwrap_or_else(TargetCapabilities::none)
    }

    pub fn supports(&self, name: &str, operation: TargetOperation) -> bool {
        self.capabilities(name).supports(operation)
    }

    pub fn has_compile(&self, name: &str) -> bool {
        self.supports(name, TargetOperation::Compile)
    }

    pub fn has_download(&self, name: &str) -> bool {
        self.supports(name, TargetOperation::Download)
    }

    pub fn has_run(&self, name: &str) -> bool {
        self.supports(name, TargetOperation::Run)
    }

    pub fn has_stop(&self, name: &str) -> bool {
        self.supports(name, TargetOperation::Stop)
    }

    pub fn has_simulate(&self, name: &str) -> bool {
        self.supports(name, TargetOperation::Simulate)
    }

    pub fn has_debug(&self, name: &str) -> bool {
        self.supports(name, TargetOperation::Debug)
    }

    /// Release every loaded plugin. Later lookups fail with [`RegistryError::ShutDown`].
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let plugins: Vec<(String, PluginHandle)> = self.lock_loaded().drain().collect();
        for (name, plugin) in plugins {
            tracing::debug!(plugin = %name, "shutting down target plugin");
            plugin.shutdown();
        }
        tracing::info!("target registry shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn lock_loaded(&self) -> MutexGuard<'_, HashMap<String, PluginHandle>> {
        self.loaded.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

//! `*.target` settings files.

use kiss_core::TargetCapabilities;
use kiss_plugin::PluginConfig;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File extension of target settings files.
pub const TARGET_FILE_EXTENSION: &str = "target";

#[derive(Debug, Error)]
pub enum TargetLoadError {
    #[error("failed to read target file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse target file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid target file {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },
    #[error("no target plugin named '{plugin}'")]
    PluginNotFound { plugin: String },
    #[error("target plugin '{plugin}' failed to load: {reason}")]
    PluginUnavailable { plugin: String, reason: String },
}

#[derive(Debug, Deserialize)]
struct TargetFile {
    #[serde(default)]
    name: String,
    display_name: Option<String>,
    base_target: Option<String>,
    #[serde(default)]
    extensions: String,
    default_extension: Option<String>,
    template: Option<PathBuf>,
    manual: Option<PathBuf>,
    port: Option<String>,
    plugin: Option<PluginSection>,
}

/// `[plugin]` table: the target is served by an external executable.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PluginSection {
    pub executable: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Everything a target settings file says about one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDescriptor {
    pub name: String,
    pub display_name: Option<String>,
    pub base_target: Option<String>,
    pub config_path: PathBuf,
    /// Snapshot of the bound plugin's capabilities; empty until bound.
    pub capabilities: TargetCapabilities,
    pub extensions: Vec<String>,
    pub default_extension: Option<String>,
    pub template_path: Option<PathBuf>,
    pub manual_path: Option<PathBuf>,
    pub port: Option<String>,
    pub plugin: Option<PluginSection>,
}

impl TargetDescriptor {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TargetLoadError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| TargetLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents, path)
    }

    /// Parse settings text as if it had been read from `path`.
    pub fn parse(contents: &str, path: &Path) -> Result<Self, TargetLoadError> {
        let file: TargetFile = toml::from_str(contents).map_err(|source| TargetLoadError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let name = file.name.trim().to_string();
        if name.is_empty() {
            return Err(TargetLoadError::Invalid {
                path: path.to_path_buf(),
                reason: "`name` must not be empty".to_string(),
            });
        }

        let base_dir = path.parent().unwrap_or_else(|| Path::new(""));
        let resolve = |p: PathBuf| {
            if p.as_os_str().is_empty() {
                None
            } else if p.is_absolute() {
                Some(p)
            } else {
                Some(base_dir.join(p))
            }
        };

        Ok(Self {
            name,
            display_name: non_empty(file.display_name),
            base_target: non_empty(file.base_target),
            config_path: path.to_path_buf(),
            capabilities: TargetCapabilities::none(),
            extensions: split_extensions(&file.extensions),
            default_extension: non_empty(file.default_extension),
            template_path: file.template.and_then(resolve),
            manual_path: file.manual.and_then(resolve),
            port: non_empty(file.port),
            plugin: file.plugin,
        })
    }

    /// Name of the plugin that serves this target: `base_target`, else `name`.
    pub fn plugin_name(&self) -> &str {
        self.base_target.as_deref().unwrap_or(&self.name)
    }

    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    /// Source extensions with the default extension first, without duplicates.
    pub fn source_extensions(&self) -> Vec<String> {
        let mut ordered: Vec<String> = Vec::with_capacity(self.extensions.len() + 1);
        let preferred = self.default_extension.iter();
        for ext in preferred.chain(self.extensions.iter()) {
            if !ordered.contains(ext) {
                ordered.push(ext.clone());
            }
        }
        ordered
    }

    /// Launch configuration when the target is served by an external plugin.
    pub fn plugin_config(&self) -> Option<PluginConfig> {
        let section = self.plugin.as_ref()?;
        let base_dir = self.config_path.parent().unwrap_or_else(|| Path::new(""));
        let relative = |p: &Path| {
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                base_dir.join(p)
            }
        };
        Some(PluginConfig {
            executable: relative(&section.executable),
            args: section.args.clone(),
            working_dir: section.working_dir.as_deref().map(relative),
            env: section
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn split_extensions(raw: &str) -> Vec<String> {
    raw.split('|')
        .map(|ext| ext.trim().trim_start_matches('.'))
        .filter(|ext| !ext.is_empty())
        .map(str::to_string)
        .collect()
}

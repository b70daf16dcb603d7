use crate::compile_output::CompileOutput;
use crate::debug::{DebugConnection, TransportError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Capability flags a target plugin advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TargetCapabilities {
    #[serde(default)]
    pub compile: bool,
    #[serde(default)]
    pub download: bool,
    #[serde(default)]
    pub run: bool,
    #[serde(default)]
    pub stop: bool,
    #[serde(default)]
    pub simulate: bool,
    #[serde(default)]
    pub debug: bool,
}

impl TargetCapabilities {
    /// No capabilities; what an unbound or unloadable target reports.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self {
            compile: true,
            download: true,
            run: true,
            stop: true,
            simulate: true,
            debug: true,
        }
    }

    pub fn supports(&self, operation: TargetOperation) -> bool {
        match operation {
            TargetOperation::Compile => self.compile,
            TargetOperation::Download => self.download,
            TargetOperation::Run => self.run,
            TargetOperation::Stop => self.stop,
            TargetOperation::Simulate => self.simulate,
            TargetOperation::Debug => self.debug,
        }
    }

    /// Advertised operations in canonical order.
    pub fn operations(&self) -> Vec<TargetOperation> {
        TargetOperation::ALL
            .into_iter()
            .filter(|op| self.supports(*op))
            .collect()
    }
}

/// The uniform operation set every target exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetOperation {
    Compile,
    Download,
    Run,
    Stop,
    Simulate,
    Debug,
}

impl TargetOperation {
    pub const ALL: [TargetOperation; 6] = [
        TargetOperation::Compile,
        TargetOperation::Download,
        TargetOperation::Run,
        TargetOperation::Stop,
        TargetOperation::Simulate,
        TargetOperation::Debug,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetOperation::Compile => "compile",
            TargetOperation::Download => "download",
            TargetOperation::Run => "run",
            TargetOperation::Stop => "stop",
            TargetOperation::Simulate => "simulate",
            TargetOperation::Debug => "debug",
        }
    }
}

impl fmt::Display for TargetOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures reported by a target plugin.
#[derive(Debug, Error)]
pub enum TargetError {
    #[error("operation not supported: {operation}")]
    NotSupported { operation: TargetOperation },
    #[error("failed to launch {tool}: {source}")]
    Launch {
        tool: String,
        source: std::io::Error,
    },
    #[error("no such file: {path}")]
    MissingFile { path: String },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("{message}")]
    Other { message: String },
}

impl TargetError {
    pub fn not_supported(operation: TargetOperation) -> Self {
        Self::NotSupported { operation }
    }
}

pub type TargetResult<T> = Result<T, TargetError>;

/// Outcome of a compile or download.
///
/// A build that ran but failed is `success == false` with its diagnostics, not an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildReport {
    pub success: bool,
    pub output: CompileOutput,
}

impl BuildReport {
    pub fn new(success: bool, output: CompileOutput) -> Self {
        Self { success, output }
    }
}

/// Contract every target backend implements.
///
/// One instance is shared by all sessions bound to the target, so anything a
/// single debug connection needs to remember belongs in the [`DebugConnection`]
/// returned from [`TargetPlugin::debug`].
pub trait TargetPlugin: Send + Sync {
    /// Stable plugin identifier, matched against `base_target`/`name` in target files.
    fn name(&self) -> &str;

    fn display_name(&self) -> &str {
        self.name()
    }

    fn capabilities(&self) -> TargetCapabilities;

    fn compile(&self, _file: &Path, _port: Option<&str>) -> TargetResult<BuildReport> {
        Err(TargetError::not_supported(TargetOperation::Compile))
    }

    /// Build and transfer the program to the device behind `port`.
    fn download(&self, _file: &Path, _port: Option<&str>) -> TargetResult<BuildReport> {
        Err(TargetError::not_supported(TargetOperation::Download))
    }

    fn run(&self, _file: &Path, _port: Option<&str>) -> TargetResult<()> {
        Err(TargetError::not_supported(TargetOperation::Run))
    }

    fn stop(&self, _port: Option<&str>) -> TargetResult<()> {
        Err(TargetError::not_supported(TargetOperation::Stop))
    }

    fn simulate(&self, _file: &Path, _port: Option<&str>) -> TargetResult<()> {
        Err(TargetError::not_supported(TargetOperation::Simulate))
    }

    fn debug(&self, _file: &Path, _port: Option<&str>) -> TargetResult<Box<dyn DebugConnection>> {
        Err(TargetError::not_supported(TargetOperation::Debug))
    }

    /// Release external resources; called once when the registry shuts down.
    fn shutdown(&self) {}
}

/// Shared handle to a loaded plugin.
pub type PluginHandle = Arc<dyn TargetPlugin>;

#[cfg(test)]
mod tests {
    use super::*;

    struct CompileOnly;

    impl TargetPlugin for CompileOnly {
        fn name(&self) -> &str {
            "compile-only"
        }

        fn capabilities(&self) -> TargetCapabilities {
            TargetCapabilities {
                compile: true,
                ..TargetCapabilities::none()
            }
        }
    }

    #[test]
    fn capabilities_list_operations_in_order() {
        let caps = TargetCapabilities {
            debug: true,
            compile: true,
            ..TargetCapabilities::none()
        };
        assert_eq!(
            caps.operations(),
            vec![TargetOperation::Compile, TargetOperation::Debug]
        );
        assert!(TargetCapabilities::none().operations().is_empty());
        assert_eq!(TargetCapabilities::all().operations().len(), 6);
    }

    #[test]
    fn default_operations_report_not_supported() {
        let plugin = CompileOnly;
        let err = plugin.run(Path::new("main.c"), None).unwrap_err();
        assert!(matches!(
            err,
            TargetError::NotSupported {
                operation: TargetOperation::Run
            }
        ));
        assert!(plugin.debug(Path::new("main.c"), None).is_err());
        assert_eq!(plugin.display_name(), "compile-only");
    }

    #[test]
    fn capabilities_deserialize_with_missing_flags() {
        let caps: TargetCapabilities = serde_json::from_str(r#"{"compile":true}"#).unwrap();
        assert!(caps.compile);
        assert!(!caps.debug);
    }
}

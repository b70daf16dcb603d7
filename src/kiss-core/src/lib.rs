//! Shared vocabulary for the KISS toolchain core: the target plugin contract,
//! the debug protocol model, compiler output parsing, and the ambient
//! configuration/logging/paths stack.

pub mod compile_output;
pub mod config;
pub mod debug;
pub mod lines;
pub mod logging;
pub mod paths;
pub mod target;
pub mod target_contract;

pub use compile_output::{CompileOutput, CompileOutputParser, DiagnosticMarker, Severity};
pub use config::{Config, ConfigError, LogLevel, LoggingConfig, ValidationError};
pub use debug::{
    BreakpointLocation, ConnectionEvent, DebugCommand, DebugConnection, DebugEvent, DebugState,
    EventSink, OutputStream, ProtocolBreakpoint, ProtocolLocation, StackFrame, TransportError,
    Variable,
};
pub use lines::{EditorLine, ProtocolLine};
pub use logging::{init_logging, LoggingError, LoggingGuard};
pub use paths::{AppDirs, DirsError};
pub use target::{
    BuildReport, PluginHandle, TargetCapabilities, TargetError, TargetOperation, TargetPlugin,
    TargetResult,
};

pub const APP_NAME: &str = "kiss";
pub const APP_AUTHOR: &str = "KIPR";
pub const APP_QUALIFIER: &str = "org";

//! External target plugins for KISS.
//!
//! A target that is not built into the toolchain can be supplied as a
//! separate executable. The host starts it and exchanges one JSON object per
//! line over its stdin/stdout:
//!
//! - KISS writes a [`PluginRequest`] to the plugin's stdin
//! - the plugin answers with a [`PluginResponse`] carrying the same `id`
//! - at any time, the plugin may write a [`PluginNotification`] such as
//!   `{"session":7,"event":{"kind":"halted"}}` for an open debug session
//!
//! Compile and download answers carry raw compiler/linker lines; the host
//! categorizes them with [`kiss_core::CompileOutputParser`], so every plugin
//! gets the same diagnostics handling.
//!
//! # Example plugin (pseudocode)
//!
//! ```text
//! while (line = read_stdin()):
//!     request = json_parse(line)
//!     if request.method.type == "Initialize":
//!         response = {"id": request.id, "result": {"status": "Initialized",
//!                     "id": "my-target", "name": "My Target",
//!                     "version": "1.0.0", "protocol_version": 1}}
//!     elif request.method.type == "Compile":
//!         # run the toolchain, collect its output lines
//!     write_stdout(json_stringify(response) + "\n")
//! ```

mod adapter;
mod host;
pub mod protocol;

pub use adapter::{ExecDebugConnection, ExecTargetPlugin};
pub use host::{ExecPluginHost, PluginConfig, PluginHostError};
pub use protocol::{
    BuildOutput, OutputChunk, PluginError, PluginErrorKind, PluginEvent, PluginInfo,
    PluginMessage, PluginMethod, PluginNotification, PluginRequest, PluginResponse, PluginResult,
    RemoteDebugCommand, PROTOCOL_VERSION,
};

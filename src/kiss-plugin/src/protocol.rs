//! Wire types for external target plugins.
//!
//! One JSON object per line in each direction. The host writes a
//! [`PluginRequest`] to the plugin's stdin and reads exactly one
//! [`PluginResponse`] with the same `id` from its stdout. Between responses
//! a plugin may also write [`PluginNotification`]s for an open debug session.

use kiss_core::{
    ConnectionEvent, OutputStream, ProtocolBreakpoint, ProtocolLocation, StackFrame,
    TargetCapabilities, TargetError, TargetOperation, Variable,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Protocol version for compatibility checking.
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginRequest {
    pub id: u64,
    pub method: PluginMethod,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginResponse {
    pub id: u64,
    pub result: PluginResult,
}

/// Methods the host invokes on a plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "params")]
pub enum PluginMethod {
    Initialize,
    Capabilities,
    /// Answered with [`PluginResult::Build`]; the host parses the raw lines.
    Compile {
        file: PathBuf,
        port: Option<String>,
    },
    Download {
        file: PathBuf,
        port: Option<String>,
    },
    Run {
        file: PathBuf,
        port: Option<String>,
    },
    Stop {
        port: Option<String>,
    },
    Simulate {
        file: PathBuf,
        port: Option<String>,
    },
    /// Open a debug connection; answered with [`PluginResult::DebugStarted`].
    Debug {
        file: PathBuf,
        port: Option<String>,
    },
    /// A command for a debug connection opened earlier.
    DebugCommand {
        session: u64,
        command: RemoteDebugCommand,
    },
    Shutdown,
}

/// Per-connection debug commands, in debugger (1-based) line numbers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum RemoteDebugCommand {
    Run,
    Pause,
    Step,
    Stop,
    SendInput { text: String },
    AddBreakpoint { location: ProtocolLocation },
    RemoveBreakpoint { location: ProtocolLocation },
    Backtrace,
    Variables,
    Breakpoints,
    Close,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum PluginResult {
    Initialized(PluginInfo),
    Capabilities(TargetCapabilities),
    Build(BuildOutput),
    /// Run, stop or simulate finished (or was started) successfully.
    Done,
    DebugStarted {
        session: u64,
    },
    /// A debug command was accepted; carries any output produced since the last one.
    DebugAck {
        #[serde(default)]
        output: Vec<OutputChunk>,
    },
    Frames {
        frames: Vec<StackFrame>,
    },
    Variables {
        variables: Vec<Variable>,
    },
    Breakpoints {
        breakpoints: Vec<ProtocolBreakpoint>,
    },
    ShutdownAck,
    Error(PluginError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    pub id: String,
    pub name: String,
    pub version: String,
    pub protocol_version: u32,
}

/// Raw tool output of a compile or download.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildOutput {
    pub success: bool,
    #[serde(default)]
    pub compiler: Vec<String>,
    #[serde(default)]
    pub linker: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputChunk {
    pub stream: OutputStream,
    pub text: String,
}

/// What a debugging plugin reports without being asked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PluginEvent {
    Output { stream: OutputStream, text: String },
    /// The program stopped on its own, e.g. at a breakpoint.
    Halted,
    Exited,
}

impl From<PluginEvent> for ConnectionEvent {
    fn from(event: PluginEvent) -> Self {
        match event {
            PluginEvent::Output { stream, text } => Self::Output { stream, text },
            PluginEvent::Halted => Self::Halted,
            PluginEvent::Exited => Self::Exited,
        }
    }
}

/// An unsolicited line addressed to one debug session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginNotification {
    pub session: u64,
    pub event: PluginEvent,
}

/// Any line a plugin writes to stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PluginMessage {
    Response(PluginResponse),
    Notification(PluginNotification),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginError {
    pub kind: PluginErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginErrorKind {
    /// The plugin does not implement the operation; `message` names it.
    NotSupported,
    MissingFile,
    /// An external tool could not be started.
    Launch,
    ProtocolMismatch,
    Internal,
}

impl From<PluginError> for TargetError {
    fn from(err: PluginError) -> Self {
        match err.kind {
            PluginErrorKind::NotSupported => {
                let operation = TargetOperation::ALL
                    .into_iter()
                    .find(|op| op.as_str() == err.message);
                match operation {
                    Some(operation) => Self::NotSupported { operation },
                    None => Self::Other {
                        message: format!("not supported: {}", err.message),
                    },
                }
            }
            PluginErrorKind::MissingFile => Self::MissingFile { path: err.message },
            PluginErrorKind::Launch => Self::Launch {
                tool: "plugin tool".to_string(),
                source: std::io::Error::other(err.message),
            },
            PluginErrorKind::ProtocolMismatch | PluginErrorKind::Internal => Self::Other {
                message: err.message,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiss_core::ProtocolLine;

    #[test]
    fn request_serializes_correctly() {
        let req = PluginRequest {
            id: 3,
            method: PluginMethod::Compile {
                file: PathBuf::from("main.c"),
                port: None,
            },
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"id\":3"));
        assert!(json.contains("\"type\":\"Compile\""));
        assert!(json.contains("\"file\":\"main.c\""));
    }

    #[test]
    fn debug_command_uses_protocol_lines() {
        let method = PluginMethod::DebugCommand {
            session: 1,
            command: RemoteDebugCommand::AddBreakpoint {
                location: ProtocolLocation {
                    file: "main.c".into(),
                    line: ProtocolLine(4),
                },
            },
        };
        let json = serde_json::to_string(&method).unwrap();
        assert!(json.contains("\"command\":\"add_breakpoint\""));
        assert!(json.contains("\"line\":4"));
    }

    #[test]
    fn build_response_deserializes() {
        let json = r#"{"id":2,"result":{"status":"Build","success":false,"compiler":["main.c:3:1: error: oops"]}}"#;
        let resp: PluginResponse = serde_json::from_str(json).unwrap();
        match resp.result {
            PluginResult::Build(build) => {
                assert!(!build.success);
                assert_eq!(build.compiler.len(), 1);
                assert!(build.linker.is_empty());
            }
            other => panic!("expected Build, got {other:?}"),
        }
    }

    #[test]
    fn debug_ack_output_is_optional() {
        let json = r#"{"id":9,"result":{"status":"DebugAck"}}"#;
        let resp: PluginResponse = serde_json::from_str(json).unwrap();
        assert!(matches!(resp.result, PluginResult::DebugAck { output } if output.is_empty()));
    }

    #[test]
    fn stdout_lines_are_responses_or_notifications() {
        let line = r#"{"id":4,"result":{"status":"Done"}}"#;
        assert!(matches!(
            serde_json::from_str::<PluginMessage>(line).unwrap(),
            PluginMessage::Response(PluginResponse { id: 4, .. })
        ));

        let line = r#"{"session":7,"event":{"kind":"output","stream":"stderr","text":"warn\n"}}"#;
        match serde_json::from_str::<PluginMessage>(line).unwrap() {
            PluginMessage::Notification(note) => {
                assert_eq!(note.session, 7);
                assert_eq!(
                    ConnectionEvent::from(note.event),
                    ConnectionEvent::Output {
                        stream: OutputStream::Stderr,
                        text: "warn\n".into()
                    }
                );
            }
            other => panic!("expected a notification, got {other:?}"),
        }

        let line = r#"{"session":7,"event":{"kind":"halted"}}"#;
        assert!(matches!(
            serde_json::from_str::<PluginMessage>(line).unwrap(),
            PluginMessage::Notification(PluginNotification {
                event: PluginEvent::Halted,
                ..
            })
        ));
        assert!(serde_json::from_str::<PluginMessage>(r#"{"session":7}"#).is_err());
    }

    #[test]
    fn not_supported_error_names_the_operation() {
        let err = PluginError {
            kind: PluginErrorKind::NotSupported,
            message: "simulate".to_string(),
        };
        match TargetError::from(err) {
            TargetError::NotSupported { operation } => {
                assert_eq!(operation, TargetOperation::Simulate)
            }
            other => panic!("expected NotSupported, got {other:?}"),
        }
    }
}

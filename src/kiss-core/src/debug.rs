//! Debug protocol vocabulary shared by debug engines and target plugins.

use crate::lines::{EditorLine, ProtocolLine};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{mpsc, Arc};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DebugState {
    #[default]
    Stopped,
    Running,
    Paused,
    /// The connection is gone; no further commands are accepted.
    Terminated,
}

impl DebugState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DebugState::Terminated)
    }
}

impl fmt::Display for DebugState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DebugState::Stopped => "stopped",
            DebugState::Running => "running",
            DebugState::Paused => "paused",
            DebugState::Terminated => "terminated",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
    DebugLog,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    /// Display text as produced by the debugger; never interpreted.
    pub value: String,
}

impl Variable {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.name, self.value)
    }
}

/// One frame of a backtrace, as reported by the debugger (1-based lines).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    pub file: String,
    pub line: ProtocolLine,
    pub function: String,
    #[serde(default)]
    pub variables: Vec<Variable>,
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args: Vec<String> = self.variables.iter().map(Variable::to_string).collect();
        write!(
            f,
            "{}:{}::{}({})",
            self.file,
            self.line,
            self.function,
            args.join(",")
        )
    }
}

/// A breakpoint as the editor sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakpointLocation {
    pub file: String,
    pub line: EditorLine,
    pub enabled: bool,
    /// Function containing the line, when the debugger reported one.
    #[serde(default)]
    pub function: Option<String>,
}

impl BreakpointLocation {
    pub fn new(file: impl Into<String>, line: EditorLine) -> Self {
        Self {
            file: file.into(),
            line,
            enabled: true,
            function: None,
        }
    }

    /// Identity of the breakpoint; `enabled` and `function` do not take part.
    pub fn same_place(&self, other: &BreakpointLocation) -> bool {
        self.file == other.file && self.line == other.line
    }

    pub fn to_protocol(&self) -> ProtocolLocation {
        ProtocolLocation {
            file: self.file.clone(),
            line: self.line.to_protocol(),
        }
    }

    /// `None` when the debugger reports a line the editor cannot show.
    pub fn from_protocol(breakpoint: &ProtocolBreakpoint) -> Option<Self> {
        Some(Self {
            file: breakpoint.location.file.clone(),
            line: breakpoint.location.line.to_editor()?,
            enabled: breakpoint.enabled,
            function: breakpoint.function.clone(),
        })
    }
}

impl fmt::Display for BreakpointLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = if self.enabled { "Enabled:" } else { "Disabled:" };
        write!(f, "{} {}:{}", label, self.file, self.line.to_protocol())?;
        if let Some(function) = &self.function {
            write!(f, "::{}", function)?;
        }
        Ok(())
    }
}

/// A source location in debugger terms.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProtocolLocation {
    pub file: String,
    pub line: ProtocolLine,
}

/// A breakpoint as reported back by a debugger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolBreakpoint {
    pub location: ProtocolLocation,
    pub enabled: bool,
    #[serde(default)]
    pub function: Option<String>,
}

/// Commands a client issues to a debug session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugCommand {
    Run,
    Pause,
    Step,
    Stop,
    SendInput(String),
    AddBreakpoint(BreakpointLocation),
    RemoveBreakpoint(BreakpointLocation),
    /// Re-read stack, variables and breakpoints while paused.
    Refresh,
}

/// Notifications delivered to the session observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugEvent {
    StateChanged(DebugState),
    StackUpdated(Vec<StackFrame>),
    VariablesUpdated(Vec<Variable>),
    BreakpointsUpdated(Vec<BreakpointLocation>),
    Output { stream: OutputStream, text: String },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("debug connection closed")]
    Closed,
    #[error("debug connection i/o failure: {0}")]
    Io(String),
    #[error("debug protocol violation: {0}")]
    Protocol(String),
    /// The debugger refused the command; the connection itself is fine.
    #[error("debugger rejected the command: {0}")]
    Rejected(String),
}

impl TransportError {
    /// Whether the connection is unusable after this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TransportError::Rejected(_))
    }
}

/// Something a connection reports outside of a command's return value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Output { stream: OutputStream, text: String },
    /// The program stopped on its own, e.g. at a breakpoint.
    Halted,
    /// The program ran to completion.
    Exited,
    Lost { reason: String },
}

/// Where a [`DebugConnection`] pushes output, halts, exits and asynchronous failures.
#[derive(Clone)]
pub struct EventSink {
    deliver: Arc<dyn Fn(ConnectionEvent) -> bool + Send + Sync>,
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink").finish_non_exhaustive()
    }
}

impl EventSink {
    pub fn new(deliver: impl Fn(ConnectionEvent) -> bool + Send + Sync + 'static) -> Self {
        Self {
            deliver: Arc::new(deliver),
        }
    }

    /// A sink backed by a plain channel, mostly useful for exercising connections directly.
    pub fn channel() -> (Self, mpsc::Receiver<ConnectionEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self::new(move |event| tx.send(event).is_ok()), rx)
    }

    /// Returns `false` once nobody is listening any more.
    /// Returns `false` once the session on the other end is gone.
    pub fn send(&self, event: ConnectionEvent) -> bool {
        (self.deliver)(event)
    }

    pub fn output(&self, stream: OutputStream, text: impl Into<String>) -> bool {
        (self.deliver)(ConnectionEvent::Output {
            stream,
            text: text.into(),
        })
    }

    pub fn stdout(&self, text: impl Into<String>) -> bool {
        self.output(OutputStream::Stdout, text)
    }

    pub fn stderr(&self, text: impl Into<String>) -> bool {
        self.output(OutputStream::Stderr, text)
    }

    pub fn debug_log(&self, text: impl Into<String>) -> bool {
        self.output(OutputStream::DebugLog, text)
    }

    /// Report that the program stopped by itself (breakpoint, signal).
    pub fn halted(&self) -> bool {
        (self.deliver)(ConnectionEvent::Halted)
    }

    pub fn exited(&self) -> bool {
        (self.deliver)(ConnectionEvent::Exited)
    }

    /// Report that the connection died between commands.
    pub fn connection_lost(&self, reason: impl Into<String>) -> bool {
        (self.deliver)(ConnectionEvent::Lost {
            reason: reason.into(),
        })
    }
}

/// A live connection to one debuggee, owned by exactly one debug session.
///
/// Methods block for as long as the backend needs; the session calls them
/// from a worker thread. Any [`TransportError`] ends the session.
pub trait DebugConnection: Send {
    /// Called once before the first command.
    fn attach(&mut self, sink: EventSink) -> Result<(), TransportError> {
        let _ = sink;
        Ok(())
    }

    /// Start, or continue after a pause.
    fn run(&mut self) -> Result<(), TransportError>;

    fn pause(&mut self) -> Result<(), TransportError>;

    fn step(&mut self) -> Result<(), TransportError>;

    fn stop(&mut self) -> Result<(), TransportError>;

    fn send_input(&mut self, text: &str) -> Result<(), TransportError>;

    fn add_breakpoint(&mut self, location: &ProtocolLocation) -> Result<(), TransportError>;

    fn remove_breakpoint(&mut self, location: &ProtocolLocation) -> Result<(), TransportError>;

    fn backtrace(&mut self) -> Result<Vec<StackFrame>, TransportError>;

    fn variables(&mut self) -> Result<Vec<Variable>, TransportError>;

    fn breakpoints(&mut self) -> Result<Vec<ProtocolBreakpoint>, TransportError>;

    /// Tear the connection down. Errors are irrelevant at this point.
    fn close(&mut self) {}
}

//! [`TargetPlugin`] and [`DebugConnection`] backed by an external plugin process.

use crate::host::{ExecPluginHost, PluginConfig, PluginHostError};
use crate::protocol::{BuildOutput, OutputChunk, PluginMethod, PluginResult, RemoteDebugCommand};
use kiss_core::{
    BuildReport, CompileOutput, CompileOutputParser, DebugConnection, EventSink,
    ProtocolBreakpoint, ProtocolLocation, StackFrame, TargetCapabilities, TargetError,
    TargetPlugin, TargetResult, TransportError, Variable,
};
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

/// A target backed by an external plugin process.
pub struct ExecTargetPlugin {
    host: Arc<ExecPluginHost>,
    name: String,
    display_name: String,
    capabilities: RwLock<Option<TargetCapabilities>>,
}

impl ExecTargetPlugin {
    /// Start the plugin and use the id it reports as the target name.
    pub fn new(config: PluginConfig) -> Result<Self, PluginHostError> {
        let host = ExecPluginHost::new(config);
        let info = host.start()?;
        Ok(Self::from_host(host, info.id, info.name))
    }

    /// Start the plugin under a name chosen by configuration.
    pub fn with_name(config: PluginConfig, name: String) -> Result<Self, PluginHostError> {
        let host = ExecPluginHost::new(config);
        let info = host.start()?;
        Ok(Self::from_host(host, name, info.name))
    }

    fn from_host(host: ExecPluginHost, name: String, display_name: String) -> Self {
        Self {
            host: Arc::new(host),
            name,
            display_name,
            capabilities: RwLock::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.host.is_running()
    }

    fn map_host_error(err: PluginHostError) -> TargetError {
        match err {
            PluginHostError::PluginError(err) => err.into(),
            PluginHostError::ProcessTerminated => TargetError::Transport(TransportError::Closed),
            other => TargetError::Other {
                message: other.to_string(),
            },
        }
    }

    fn unexpected(method: &str) -> TargetError {
        TargetError::Other {
            message: format!("unexpected plugin response to {method}"),
        }
    }

    fn build(&self, method: PluginMethod, name: &str) -> TargetResult<BuildReport> {
        match self.host.send_request(method).map_err(Self::map_host_error)? {
            PluginResult::Build(build) => Ok(parse_build(build)),
            _ => Err(Self::unexpected(name)),
        }
    }

    fn done(&self, method: PluginMethod, name: &str) -> TargetResult<()> {
        match self.host.send_request(method).map_err(Self::map_host_error)? {
            PluginResult::Done => Ok(()),
            _ => Err(Self::unexpected(name)),
        }
    }
}

fn parse_build(build: BuildOutput) -> BuildReport {
    let mut output: CompileOutput = CompileOutputParser::compiler(&build.compiler);
    output.extend(CompileOutputParser::linker(&build.linker));
    BuildReport::new(build.success, output)
}

fn port_arg(port: Option<&str>) -> Option<String> {
    port.map(str::to_string)
}

impl TargetPlugin for ExecTargetPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn capabilities(&self) -> TargetCapabilities {
        {
            let guard = self
                .capabilities
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(caps) = *guard {
                return caps;
            }
        }

        match self.host.send_request(PluginMethod::Capabilities) {
            Ok(PluginResult::Capabilities(caps)) => {
                let mut guard = self
                    .capabilities
                    .write()
                    .unwrap_or_else(PoisonError::into_inner);
                *guard = Some(caps);
                caps
            }
            _ => {
                tracing::warn!(
                    target_name = %self.name,
                    "Failed to fetch capabilities from plugin, advertising none"
                );
                TargetCapabilities::none()
            }
        }
    }

    fn compile(&self, file: &Path, port: Option<&str>) -> TargetResult<BuildReport> {
        self.build(
            PluginMethod::Compile {
                file: file.to_path_buf(),
                port: port_arg(port),
            },
            "Compile",
        )
    }

    fn download(&self, file: &Path, port: Option<&str>) -> TargetResult<BuildReport> {
        self.build(
            PluginMethod::Download {
                file: file.to_path_buf(),
                port: port_arg(port),
            },
            "Download",
        )
    }

    fn run(&self, file: &Path, port: Option<&str>) -> TargetResult<()> {
        self.done(
            PluginMethod::Run {
                file: file.to_path_buf(),
                port: port_arg(port),
            },
            "Run",
        )
    }

    fn stop(&self, port: Option<&str>) -> TargetResult<()> {
        self.done(
            PluginMethod::Stop {
                port: port_arg(port),
            },
            "Stop",
        )
    }

    fn simulate(&self, file: &Path, port: Option<&str>) -> TargetResult<()> {
        self.done(
            PluginMethod::Simulate {
                file: file.to_path_buf(),
                port: port_arg(port),
            },
            "Simulate",
        )
    }

    fn debug(&self, file: &Path, port: Option<&str>) -> TargetResult<Box<dyn DebugConnection>> {
        let method = PluginMethod::Debug {
            file: file.to_path_buf(),
            port: port_arg(port),
        };
        match self.host.send_request(method).map_err(Self::map_host_error)? {
            PluginResult::DebugStarted { session } => Ok(Box::new(ExecDebugConnection {
                host: Arc::clone(&self.host),
                session,
                sink: None,
            })),
            _ => Err(Self::unexpected("Debug")),
        }
    }

    fn shutdown(&self) {
        if let Err(err) = self.host.stop() {
            tracing::warn!(target_name = %self.name, error = %err, "Plugin shutdown failed");
        }
    }
}

/// One debug connection opened through an external plugin.
///
/// Output may arrive on a command's acknowledgement or as a notification
/// at any time; both end up in the attached sink.
pub struct ExecDebugConnection {
    host: Arc<ExecPluginHost>,
    session: u64,
    sink: Option<EventSink>,
}

impl ExecDebugConnection {
    fn request(&self, command: RemoteDebugCommand) -> Result<PluginResult, TransportError> {
        self.host
            .send_request(PluginMethod::DebugCommand {
                session: self.session,
                command,
            })
            .map_err(map_transport_error)
    }

    fn command(&mut self, command: RemoteDebugCommand) -> Result<(), TransportError> {
        match self.request(command)? {
            PluginResult::DebugAck { output } => {
                self.forward(output);
                Ok(())
            }
            other => Err(unexpected_debug_response(&other)),
        }
    }

    fn forward(&self, output: Vec<OutputChunk>) {
        let Some(sink) = &self.sink else {
            return;
        };
        for chunk in output {
            sink.output(chunk.stream, chunk.text);
        }
    }
}

fn map_transport_error(err: PluginHostError) -> TransportError {
    match err {
        PluginHostError::ProcessTerminated => TransportError::Closed,
        PluginHostError::PluginError(err) => TransportError::Rejected(err.message),
        PluginHostError::WriteError(err) | PluginHostError::ReadError(err) => {
            TransportError::Io(err.to_string())
        }
        other => TransportError::Protocol(other.to_string()),
    }
}

fn unexpected_debug_response(result: &PluginResult) -> TransportError {
    TransportError::Protocol(format!("unexpected debug response: {result:?}"))
}

impl DebugConnection for ExecDebugConnection {
    fn attach(&mut self, sink: EventSink) -> Result<(), TransportError> {
        self.host.subscribe(self.session, sink.clone());
        self.sink = Some(sink);
        Ok(())
    }

    fn run(&mut self) -> Result<(), TransportError> {
        self.command(RemoteDebugCommand::Run)
    }

    fn pause(&mut self) -> Result<(), TransportError> {
        self.command(RemoteDebugCommand::Pause)
    }

    fn step(&mut self) -> Result<(), TransportError> {
        self.command(RemoteDebugCommand::Step)
    }

    fn stop(&mut self) -> Result<(), TransportError> {
        self.command(RemoteDebugCommand::Stop)
    }

    fn send_input(&mut self, text: &str) -> Result<(), TransportError> {
        self.command(RemoteDebugCommand::SendInput {
            text: text.to_string(),
        })
    }

    fn add_breakpoint(&mut self, location: &ProtocolLocation) -> Result<(), TransportError> {
        self.command(RemoteDebugCommand::AddBreakpoint {
            location: location.clone(),
        })
    }

    fn remove_breakpoint(&mut self, location: &ProtocolLocation) -> Result<(), TransportError> {
        self.command(RemoteDebugCommand::RemoveBreakpoint {
            location: location.clone(),
        })
    }

    fn backtrace(&mut self) -> Result<Vec<StackFrame>, TransportError> {
        match self.request(RemoteDebugCommand::Backtrace)? {
            PluginResult::Frames { frames } => Ok(frames),
            other => Err(unexpected_debug_response(&other)),
        }
    }

    fn variables(&mut self) -> Result<Vec<Variable>, TransportError> {
        match self.request(RemoteDebugCommand::Variables)? {
            PluginResult::Variables { variables } => Ok(variables),
            other => Err(unexpected_debug_response(&other)),
        }
    }

    fn breakpoints(&mut self) -> Result<Vec<ProtocolBreakpoint>, TransportError> {
        match self.request(RemoteDebugCommand::Breakpoints)? {
            PluginResult::Breakpoints { breakpoints } => Ok(breakpoints),
            other => Err(unexpected_debug_response(&other)),
        }
    }

    fn close(&mut self) {
        if let Err(err) = self.command(RemoteDebugCommand::Close) {
            tracing::debug!(session = self.session, error = %err, "Closing plugin debug session failed");
        }
        self.host.unsubscribe(self.session);
        self.sink = None;
    }
}

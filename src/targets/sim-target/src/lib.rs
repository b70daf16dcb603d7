//! Simulator target: checks, runs and debugs programs without any hardware.

mod debugger;
mod program;

pub use debugger::SimDebugConnection;

use kiss_core::{
    BuildReport, CompileOutputParser, DebugConnection, TargetCapabilities, TargetError,
    TargetPlugin, TargetResult,
};
use program::{Machine, Program};
use std::io::Write;
use std::path::Path;

pub const PLUGIN_NAME: &str = "sim";

#[derive(Debug, Default, Clone, Copy)]
pub struct SimTarget;

impl SimTarget {
    pub fn new() -> Self {
        Self
    }

    fn caps() -> TargetCapabilities {
        TargetCapabilities {
            compile: true,
            download: false,
            run: false,
            stop: false,
            simulate: true,
            debug: true,
        }
    }

    fn load(file: &Path) -> TargetResult<Program> {
        let source = std::fs::read_to_string(file).map_err(|_| TargetError::MissingFile {
            path: file.display().to_string(),
        })?;
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.display().to_string());
        Ok(Program::parse(&name, &source))
    }

    fn load_clean(file: &Path) -> TargetResult<Program> {
        let program = Self::load(file)?;
        if program.has_errors() {
            return Err(TargetError::Other {
                message: format!("{} does not compile", program.file),
            });
        }
        Ok(program)
    }

    /// Execute the whole program, writing what it prints to `out`.
    pub fn simulate_to(&self, file: &Path, out: &mut dyn Write) -> TargetResult<()> {
        let program = Self::load_clean(file)?;
        let mut machine = Machine::default();
        tracing::info!(file = %program.file, statements = program.statements.len(), "simulating");
        while !machine.finished(&program) {
            if let Some(text) = machine.execute(&program) {
                out.write_all(text.as_bytes())
                    .map_err(|err| TargetError::Other {
                        message: format!("simulator output failed: {err}"),
                    })?;
            }
        }
        Ok(())
    }
}

impl TargetPlugin for SimTarget {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn display_name(&self) -> &str {
        "Simulator"
    }

    fn capabilities(&self) -> TargetCapabilities {
        Self::caps()
    }

    fn compile(&self, file: &Path, _port: Option<&str>) -> TargetResult<BuildReport> {
        let program = Self::load(file)?;
        let output = CompileOutputParser::compiler(&program.diagnostics);
        Ok(BuildReport::new(!program.has_errors(), output))
    }

    fn simulate(&self, file: &Path, _port: Option<&str>) -> TargetResult<()> {
        let stdout = std::io::stdout();
        let mut lock = stdout.lock();
        self.simulate_to(file, &mut lock)?;
        let _ = lock.flush();
        Ok(())
    }

    fn debug(&self, file: &Path, _port: Option<&str>) -> TargetResult<Box<dyn DebugConnection>> {
        let program = Self::load_clean(file)?;
        tracing::debug!(file = %program.file, "starting simulator debug connection");
        Ok(Box::new(SimDebugConnection::new(program)))
    }
}

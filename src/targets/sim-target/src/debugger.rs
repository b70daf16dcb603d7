use crate::program::{Machine, Program};
use kiss_core::{
    DebugConnection, EventSink, ProtocolBreakpoint, ProtocolLine, ProtocolLocation, StackFrame,
    TransportError, Variable,
};
use std::path::Path;

/// Debug connection that executes a [`Program`] in-process.
///
/// Execution is synchronous: `run` returns once the program hits a
/// breakpoint or exits, so `pause` only has to acknowledge. Both outcomes
/// are reported through the sink as `Halted` or `Exited`.
pub struct SimDebugConnection {
    program: Program,
    machine: Machine,
    breakpoints: Vec<ProtocolBreakpoint>,
    sink: Option<EventSink>,
    halted: bool,
    exited: bool,
}

impl SimDebugConnection {
    pub(crate) fn new(program: Program) -> Self {
        Self {
            program,
            machine: Machine::default(),
            breakpoints: Vec::new(),
            sink: None,
            halted: false,
            exited: false,
        }
    }

    fn breakpoint_at(&self, line: ProtocolLine) -> bool {
        self.breakpoints.iter().any(|bp| {
            bp.enabled && bp.location.line == line && same_file(&bp.location.file, &self.program.file)
        })
    }

    fn execute_one(&mut self) {
        if let Some(text) = self.machine.execute(&self.program) {
            if let Some(sink) = &self.sink {
                sink.stdout(text);
            }
        }
        if self.machine.finished(&self.program) {
            self.exit();
        }
    }

    fn exit(&mut self) {
        if self.exited {
            return;
        }
        self.exited = true;
        self.halted = false;
        self.log("program exited".to_string());
        if let Some(sink) = &self.sink {
            sink.exited();
        }
    }

    fn log(&self, text: String) {
        if let Some(sink) = &self.sink {
            sink.debug_log(text);
        }
    }

    fn reset(&mut self) {
        self.machine = Machine::default();
        self.halted = false;
        self.exited = false;
    }
}

fn same_file(a: &str, b: &str) -> bool {
    Path::new(a).file_name() == Path::new(b).file_name()
}

impl DebugConnection for SimDebugConnection {
    fn attach(&mut self, sink: EventSink) -> Result<(), TransportError> {
        self.sink = Some(sink);
        Ok(())
    }

    fn run(&mut self) -> Result<(), TransportError> {
        if self.exited {
            self.reset();
        }
        // resuming from a breakpoint must not stop on it again
        let mut skip_breakpoint = self.halted;
        self.halted = false;

        while let Some(statement) = self.machine.current(&self.program) {
            let line = statement.line;
            if !skip_breakpoint && self.breakpoint_at(line) {
                self.halted = true;
                self.log(format!("breakpoint hit at {}:{}", self.program.file, line));
                if let Some(sink) = &self.sink {
                    sink.halted();
                }
                return Ok(());
            }
            skip_breakpoint = false;
            self.execute_one();
        }
        self.exit();
        Ok(())
    }

    fn pause(&mut self) -> Result<(), TransportError> {
        if !self.exited {
            self.halted = true;
        }
        Ok(())
    }

    fn step(&mut self) -> Result<(), TransportError> {
        if self.exited {
            return Ok(());
        }
        self.execute_one();
        if !self.exited {
            self.halted = true;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), TransportError> {
        self.reset();
        Ok(())
    }

    fn send_input(&mut self, text: &str) -> Result<(), TransportError> {
        // no stdin in the simulator; echo like a terminal would
        if let Some(sink) = &self.sink {
            sink.stdout(text);
        }
        Ok(())
    }

    fn add_breakpoint(&mut self, location: &ProtocolLocation) -> Result<(), TransportError> {
        if self.breakpoints.iter().any(|bp| &bp.location == location) {
            return Ok(());
        }
        let function = self
            .program
            .statements
            .iter()
            .find(|s| s.line == location.line)
            .map(|s| s.function.clone());
        self.breakpoints.push(ProtocolBreakpoint {
            location: location.clone(),
            enabled: true,
            function,
        });
        Ok(())
    }

    fn remove_breakpoint(&mut self, location: &ProtocolLocation) -> Result<(), TransportError> {
        self.breakpoints.retain(|bp| &bp.location != location);
        Ok(())
    }

    fn backtrace(&mut self) -> Result<Vec<StackFrame>, TransportError> {
        let Some(statement) = self.machine.current(&self.program) else {
            return Ok(Vec::new());
        };
        Ok(vec![StackFrame {
            file: self.program.file.clone(),
            line: statement.line,
            function: statement.function.clone(),
            variables: Vec::new(),
        }])
    }

    fn variables(&mut self) -> Result<Vec<Variable>, TransportError> {
        Ok(self.machine.variables.clone())
    }

    fn breakpoints(&mut self) -> Result<Vec<ProtocolBreakpoint>, TransportError> {
        Ok(self.breakpoints.clone())
    }

    fn close(&mut self) {
        self.sink = None;
    }
}

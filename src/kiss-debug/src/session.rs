use crate::breakpoints::BreakpointSet;
use crate::worker::{run_worker, WorkerCommand, WorkerMessage, WorkerOp};
use kiss_core::{
    BreakpointLocation, ConnectionEvent, DebugCommand, DebugConnection, DebugEvent, DebugState,
    OutputStream, StackFrame, Variable,
};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DebugError {
    #[error("debug session has terminated")]
    Terminated,
    #[error("failed to start debug worker: {0}")]
    Spawn(std::io::Error),
}

/// Receives every event of one debug session, on the thread that owns it.
pub trait DebugObserver {
    fn on_event(&mut self, event: &DebugEvent);
}

impl<F> DebugObserver for F
where
    F: FnMut(&DebugEvent),
{
    fn on_event(&mut self, event: &DebugEvent) {
        self(event)
    }
}

/// What happened to a command handed to [`DebugSession::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Queued to the connection; effects arrive as events.
    Accepted,
    /// Not meaningful in the current state; nothing was sent.
    Ignored,
}

/// One live debug connection driven from a single owner thread.
///
/// State transitions happen synchronously in [`DebugSession::send`]. The
/// connection itself is driven by a worker thread; its snapshots and output
/// are applied when the owner calls [`DebugSession::process_events`],
/// [`DebugSession::wait_event`] or [`DebugSession::flush`]. A debugger that
/// halts on its own moves the session to `Paused`, and a program that exits
/// moves it back to `Stopped`.
pub struct DebugSession {
    state: DebugState,
    observer: Option<Box<dyn DebugObserver + Send>>,
    breakpoints: BreakpointSet,
    stack: Vec<StackFrame>,
    variables: Vec<Variable>,
    breakpoint_view: Vec<BreakpointLocation>,
    /// Bumped on every stop; snapshots from an older epoch are stale.
    epoch: u64,
    next_barrier: u64,
    /// Count of operations handed to the worker.
    dispatched: u64,
    commands: Option<Sender<WorkerCommand>>,
    messages: Receiver<WorkerMessage>,
    worker: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for DebugSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugSession")
            .field("state", &self.state)
            .field("breakpoints", &self.breakpoints)
            .field("has_observer", &self.observer.is_some())
            .finish_non_exhaustive()
    }
}

impl DebugSession {
    pub fn start(connection: Box<dyn DebugConnection>) -> Result<Self, DebugError> {
        let (command_tx, command_rx) = mpsc::channel();
        let (message_tx, message_rx) = mpsc::channel();
        let worker = thread::Builder::new()
            .name("kiss-debug-worker".into())
            .spawn(move || run_worker(connection, command_rx, message_tx))
            .map_err(DebugError::Spawn)?;

        Ok(Self {
            state: DebugState::Stopped,
            observer: None,
            breakpoints: BreakpointSet::new(),
            stack: Vec::new(),
            variables: Vec::new(),
            breakpoint_view: Vec::new(),
            epoch: 0,
            next_barrier: 0,
            dispatched: 0,
            commands: Some(command_tx),
            messages: message_rx,
            worker: Some(worker),
        })
    }

    pub fn state(&self) -> DebugState {
        self.state
    }

    pub fn set_observer(&mut self, observer: impl DebugObserver + Send + 'static) {
        self.observer = Some(Box::new(observer));
    }

    pub fn clear_observer(&mut self) {
        self.observer = None;
    }

    pub fn has_observer(&self) -> bool {
        self.observer.is_some()
    }

    /// Breakpoints the client asked for, in editor coordinates.
    pub fn breakpoints(&self) -> &BreakpointSet {
        &self.breakpoints
    }

    /// Latest backtrace reported while paused.
    pub fn stack(&self) -> &[StackFrame] {
        &self.stack
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    /// Breakpoints as last reported by the debugger.
    pub fn breakpoint_view(&self) -> &[BreakpointLocation] {
        &self.breakpoint_view
    }

    pub fn send(&mut self, command: DebugCommand) -> Result<Dispatch, DebugError> {
        if self.state.is_terminal() {
            return Err(DebugError::Terminated);
        }

        match command {
            DebugCommand::Run => {
                if self.state == DebugState::Running {
                    return Ok(Dispatch::Ignored);
                }
                if self.observer.is_none() {
                    tracing::debug!("ignoring run: no observer attached");
                    return Ok(Dispatch::Ignored);
                }
                self.dispatch(WorkerOp::Run)?;
                self.transition(DebugState::Running);
            }
            DebugCommand::Pause => {
                if self.state != DebugState::Running {
                    return Ok(Dispatch::Ignored);
                }
                self.dispatch(WorkerOp::Pause)?;
                self.transition(DebugState::Paused);
            }
            DebugCommand::Step => {
                if self.state != DebugState::Paused {
                    return Ok(Dispatch::Ignored);
                }
                self.dispatch(WorkerOp::Step)?;
            }
            DebugCommand::Refresh => {
                if self.state != DebugState::Paused {
                    return Ok(Dispatch::Ignored);
                }
                self.dispatch(WorkerOp::Snapshot)?;
            }
            DebugCommand::Stop => {
                if self.state == DebugState::Stopped {
                    return Ok(Dispatch::Ignored);
                }
                self.epoch += 1;
                self.dispatch(WorkerOp::Stop)?;
                self.transition(DebugState::Stopped);
                self.clear_views();
            }
            DebugCommand::SendInput(text) => {
                self.dispatch(WorkerOp::SendInput(text))?;
            }
            DebugCommand::AddBreakpoint(location) => {
                let protocol = location.to_protocol();
                if !self.breakpoints.insert(location) {
                    return Ok(Dispatch::Ignored);
                }
                self.dispatch(WorkerOp::AddBreakpoint(protocol))?;
            }
            DebugCommand::RemoveBreakpoint(location) => {
                if !self.breakpoints.remove(&location) {
                    return Ok(Dispatch::Ignored);
                }
                self.dispatch(WorkerOp::RemoveBreakpoint(location.to_protocol()))?;
            }
        }
        Ok(Dispatch::Accepted)
    }

    pub fn run(&mut self) -> Result<Dispatch, DebugError> {
        self.send(DebugCommand::Run)
    }

    pub fn pause(&mut self) -> Result<Dispatch, DebugError> {
        self.send(DebugCommand::Pause)
    }

    pub fn step(&mut self) -> Result<Dispatch, DebugError> {
        self.send(DebugCommand::Step)
    }

    /// Re-read stack, variables and breakpoints, typically after a step.
    pub fn refresh(&mut self) -> Result<Dispatch, DebugError> {
        self.send(DebugCommand::Refresh)
    }

    pub fn stop(&mut self) -> Result<Dispatch, DebugError> {
        self.send(DebugCommand::Stop)
    }

    pub fn send_input(&mut self, text: impl Into<String>) -> Result<Dispatch, DebugError> {
        self.send(DebugCommand::SendInput(text.into()))
    }

    pub fn add_breakpoint(&mut self, location: BreakpointLocation) -> Result<Dispatch, DebugError> {
        self.send(DebugCommand::AddBreakpoint(location))
    }

    pub fn remove_breakpoint(
        &mut self,
        location: BreakpointLocation,
    ) -> Result<Dispatch, DebugError> {
        self.send(DebugCommand::RemoveBreakpoint(location))
    }

    /// Apply everything the worker has produced so far without blocking.
    /// Returns the number of messages handled.
    pub fn process_events(&mut self) -> usize {
        let mut handled = 0;
        while !self.state.is_terminal() {
            match self.messages.try_recv() {
                Ok(message) => {
                    self.handle(message);
                    handled += 1;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.terminate("debug worker exited");
                    break;
                }
            }
        }
        handled
    }

    /// Block until at least one message has been handled or `timeout` passes.
    pub fn wait_event(&mut self, timeout: Duration) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        match self.messages.recv_timeout(timeout) {
            Ok(message) => {
                self.handle(message);
                self.process_events();
                true
            }
            Err(RecvTimeoutError::Timeout) => false,
            Err(RecvTimeoutError::Disconnected) => {
                self.terminate("debug worker exited");
                true
            }
        }
    }

    /// Wait until the worker has finished every command sent so far and
    /// apply the results. Commands issued while flushing, such as the
    /// snapshot fetch after a halt, are waited for as well. Returns `false`
    /// on timeout or termination.
    pub fn flush(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let dispatched = self.dispatched;
            if !self.barrier(deadline) {
                return false;
            }
            if self.dispatched == dispatched {
                return true;
            }
        }
    }

    fn barrier(&mut self, deadline: Instant) -> bool {
        let Some(commands) = &self.commands else {
            return false;
        };
        self.next_barrier += 1;
        let barrier = self.next_barrier;
        if commands.send(WorkerCommand::Barrier(barrier)).is_err() {
            self.process_events();
            self.terminate("debug worker exited");
            return false;
        }

        while !self.state.is_terminal() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.messages.recv_timeout(remaining) {
                Ok(WorkerMessage::Barrier(id)) if id == barrier => return true,
                Ok(message) => self.handle(message),
                Err(RecvTimeoutError::Timeout) => return false,
                Err(RecvTimeoutError::Disconnected) => self.terminate("debug worker exited"),
            }
        }
        false
    }

    /// Shut the worker down and wait for the connection to close.
    pub fn close(mut self) {
        self.shutdown_worker(true);
    }

    fn dispatch(&mut self, op: WorkerOp) -> Result<(), DebugError> {
        let sent = match &self.commands {
            Some(commands) => commands
                .send(WorkerCommand::Dispatch {
                    epoch: self.epoch,
                    op,
                })
                .is_ok(),
            None => false,
        };
        if sent {
            self.dispatched += 1;
            return Ok(());
        }
        // the worker only goes away after a transport failure; surface it first
        self.process_events();
        self.terminate("debug worker exited");
        Err(DebugError::Terminated)
    }

    fn handle(&mut self, message: WorkerMessage) {
        match message {
            WorkerMessage::Snapshot { epoch, event } => {
                if epoch != self.epoch {
                    tracing::trace!(epoch, current = self.epoch, "dropping stale snapshot");
                    return;
                }
                match &event {
                    DebugEvent::StackUpdated(frames) => self.stack = frames.clone(),
                    DebugEvent::VariablesUpdated(variables) => self.variables = variables.clone(),
                    DebugEvent::BreakpointsUpdated(breakpoints) => {
                        self.breakpoint_view = breakpoints.clone()
                    }
                    _ => {}
                }
                self.deliver(&event);
            }
            WorkerMessage::Connection { epoch, event } => self.connection_event(epoch, event),
            WorkerMessage::Rejected(err) => {
                tracing::warn!(error = %err, "debug command rejected");
                self.deliver(&DebugEvent::Output {
                    stream: OutputStream::DebugLog,
                    text: err.to_string(),
                });
            }
            WorkerMessage::Failed(err) => self.terminate(&err.to_string()),
            WorkerMessage::Barrier(_) => {}
        }
    }

    fn connection_event(&mut self, epoch: u64, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Output { stream, text } => {
                self.deliver(&DebugEvent::Output { stream, text });
            }
            ConnectionEvent::Lost { reason } => self.terminate(&reason),
            ConnectionEvent::Halted => {
                if epoch != self.epoch || self.state != DebugState::Running {
                    tracing::trace!(epoch, state = %self.state, "ignoring halt");
                    return;
                }
                self.transition(DebugState::Paused);
                // a failed dispatch has already terminated the session
                let _ = self.dispatch(WorkerOp::Snapshot);
            }
            ConnectionEvent::Exited => {
                if epoch != self.epoch || self.state == DebugState::Stopped {
                    tracing::trace!(epoch, state = %self.state, "ignoring exit");
                    return;
                }
                self.epoch += 1;
                self.transition(DebugState::Stopped);
                self.clear_views();
            }
        }
    }

    fn transition(&mut self, next: DebugState) {
        if self.state == next {
            return;
        }
        tracing::debug!(from = %self.state, to = %next, "debug state change");
        self.state = next;
        self.deliver(&DebugEvent::StateChanged(next));
    }

    fn clear_views(&mut self) {
        self.stack.clear();
        self.variables.clear();
        self.breakpoint_view.clear();
        self.deliver(&DebugEvent::StackUpdated(Vec::new()));
        self.deliver(&DebugEvent::VariablesUpdated(Vec::new()));
        self.deliver(&DebugEvent::BreakpointsUpdated(Vec::new()));
    }

    fn terminate(&mut self, reason: &str) {
        if self.state.is_terminal() {
            return;
        }
        tracing::warn!(reason, "debug session terminated");
        self.shutdown_worker(false);
        self.transition(DebugState::Terminated);
    }

    fn shutdown_worker(&mut self, join: bool) {
        if let Some(commands) = self.commands.take() {
            let _ = commands.send(WorkerCommand::Shutdown);
        }
        if let Some(worker) = self.worker.take() {
            if join {
                let _ = worker.join();
            }
        }
    }

    fn deliver(&mut self, event: &DebugEvent) {
        if let Some(observer) = self.observer.as_mut() {
            observer.on_event(event);
        }
    }
}

impl Drop for DebugSession {
    fn drop(&mut self) {
        // a connection blocked inside a call must not hang the owner
        self.shutdown_worker(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiss_core::{
        EditorLine, EventSink, ProtocolBreakpoint, ProtocolLine, ProtocolLocation, TransportError,
    };
    use std::sync::{Arc, Mutex};

    const WAIT: Duration = Duration::from_secs(5);

    #[derive(Clone, Default)]
    struct Script {
        calls: Arc<Mutex<Vec<String>>>,
        sink: Arc<Mutex<Option<EventSink>>>,
        fail_on: Option<&'static str>,
        reject_on: Option<&'static str>,
        /// Raised through the sink while `run` executes.
        on_run: Option<ConnectionEvent>,
    }

    impl Script {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn sink(&self) -> EventSink {
            self.sink.lock().unwrap().clone().expect("attached")
        }
    }

    struct ScriptedConnection {
        script: Script,
        breakpoints: Vec<ProtocolBreakpoint>,
        steps: u32,
    }

    impl ScriptedConnection {
        fn new(script: &Script) -> Box<Self> {
            Box::new(Self {
                script: script.clone(),
                breakpoints: Vec::new(),
                steps: 0,
            })
        }

        fn record(&self, call: impl Into<String>) -> Result<(), TransportError> {
            let call = call.into();
            let matches = |op: Option<&str>| op.map(|op| call.starts_with(op)).unwrap_or(false);
            let failing = matches(self.script.fail_on);
            let rejected = matches(self.script.reject_on);
            self.script.calls.lock().unwrap().push(call);
            if failing {
                Err(TransportError::Io("broken pipe".into()))
            } else if rejected {
                Err(TransportError::Rejected("no such frame".into()))
            } else {
                Ok(())
            }
        }
    }

    impl DebugConnection for ScriptedConnection {
        fn attach(&mut self, sink: EventSink) -> Result<(), TransportError> {
            *self.script.sink.lock().unwrap() = Some(sink);
            Ok(())
        }

        fn run(&mut self) -> Result<(), TransportError> {
            self.record("run")?;
            if let Some(event) = self.script.on_run.clone() {
                match event {
                    ConnectionEvent::Halted => self.script.sink().halted(),
                    ConnectionEvent::Exited => self.script.sink().exited(),
                    ConnectionEvent::Output { stream, text } => {
                        self.script.sink().output(stream, text)
                    }
                    ConnectionEvent::Lost { reason } => self.script.sink().connection_lost(reason),
                };
            }
            Ok(())
        }

        fn pause(&mut self) -> Result<(), TransportError> {
            self.record("pause")
        }

        fn step(&mut self) -> Result<(), TransportError> {
            self.record("step")?;
            self.steps += 1;
            Ok(())
        }

        fn stop(&mut self) -> Result<(), TransportError> {
            self.record("stop")
        }

        fn send_input(&mut self, text: &str) -> Result<(), TransportError> {
            self.record(format!("input {text}"))
        }

        fn add_breakpoint(&mut self, location: &ProtocolLocation) -> Result<(), TransportError> {
            self.record(format!("break {}:{}", location.file, location.line))?;
            self.breakpoints.push(ProtocolBreakpoint {
                location: location.clone(),
                enabled: true,
                function: None,
            });
            Ok(())
        }

        fn remove_breakpoint(&mut self, location: &ProtocolLocation) -> Result<(), TransportError> {
            self.record(format!("clear {}:{}", location.file, location.line))?;
            self.breakpoints.retain(|bp| &bp.location != location);
            Ok(())
        }

        fn backtrace(&mut self) -> Result<Vec<StackFrame>, TransportError> {
            self.record("backtrace")?;
            Ok(vec![StackFrame {
                file: "main.c".into(),
                line: ProtocolLine(7),
                function: "main".into(),
                variables: Vec::new(),
            }])
        }

        fn variables(&mut self) -> Result<Vec<Variable>, TransportError> {
            self.record("variables")?;
            let speed = 50 + 10 * self.steps;
            Ok(vec![Variable::new("speed", speed.to_string())])
        }

        fn breakpoints(&mut self) -> Result<Vec<ProtocolBreakpoint>, TransportError> {
            self.record("breakpoints")?;
            Ok(self.breakpoints.clone())
        }

        fn close(&mut self) {
            let _ = self.record("close");
        }
    }

    fn observed(session: &mut DebugSession) -> Arc<Mutex<Vec<DebugEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        session.set_observer(move |event: &DebugEvent| sink.lock().unwrap().push(event.clone()));
        events
    }

    fn take(events: &Arc<Mutex<Vec<DebugEvent>>>) -> Vec<DebugEvent> {
        std::mem::take(&mut *events.lock().unwrap())
    }

    #[test]
    fn run_without_observer_is_ignored() {
        let script = Script::default();
        let mut session = DebugSession::start(ScriptedConnection::new(&script)).unwrap();

        assert_eq!(session.run().unwrap(), Dispatch::Ignored);
        assert!(session.flush(WAIT));
        assert_eq!(session.state(), DebugState::Stopped);
        assert!(script.calls().is_empty());
    }

    #[test]
    fn pause_delivers_fresh_snapshots_in_order() {
        let script = Script::default();
        let mut session = DebugSession::start(ScriptedConnection::new(&script)).unwrap();
        let events = observed(&mut session);

        session
            .add_breakpoint(BreakpointLocation::new("main.c", EditorLine(6)))
            .unwrap();
        assert_eq!(session.run().unwrap(), Dispatch::Accepted);
        assert_eq!(session.pause().unwrap(), Dispatch::Accepted);
        assert!(session.flush(WAIT));

        let events = take(&events);
        assert_eq!(events.len(), 5);
        assert_eq!(events[0], DebugEvent::StateChanged(DebugState::Running));
        assert_eq!(events[1], DebugEvent::StateChanged(DebugState::Paused));
        assert!(matches!(&events[2], DebugEvent::StackUpdated(frames) if frames.len() == 1));
        assert_eq!(
            events[3],
            DebugEvent::VariablesUpdated(vec![Variable::new("speed", "50")])
        );
        assert_eq!(
            events[4],
            DebugEvent::BreakpointsUpdated(vec![BreakpointLocation::new("main.c", EditorLine(6))])
        );

        assert_eq!(session.stack()[0].line, ProtocolLine(7));
        assert_eq!(session.variables().len(), 1);
        assert_eq!(session.breakpoint_view().len(), 1);
        assert_eq!(
            script.calls(),
            vec!["break main.c:7", "run", "pause", "backtrace", "variables", "breakpoints"]
        );
    }

    #[test]
    fn pause_and_step_outside_their_states_are_ignored() {
        let script = Script::default();
        let mut session = DebugSession::start(ScriptedConnection::new(&script)).unwrap();
        let events = observed(&mut session);

        assert_eq!(session.pause().unwrap(), Dispatch::Ignored);
        assert_eq!(session.step().unwrap(), Dispatch::Ignored);
        assert_eq!(session.stop().unwrap(), Dispatch::Ignored);
        session.run().unwrap();
        assert_eq!(session.step().unwrap(), Dispatch::Ignored);
        assert!(session.flush(WAIT));

        assert_eq!(script.calls(), vec!["run"]);
        assert_eq!(
            take(&events),
            vec![DebugEvent::StateChanged(DebugState::Running)]
        );
    }

    #[test]
    fn step_while_paused_produces_no_snapshot() {
        let script = Script::default();
        let mut session = DebugSession::start(ScriptedConnection::new(&script)).unwrap();
        let events = observed(&mut session);

        session.run().unwrap();
        session.pause().unwrap();
        assert!(session.flush(WAIT));
        take(&events);

        assert_eq!(session.step().unwrap(), Dispatch::Accepted);
        assert!(session.flush(WAIT));
        assert_eq!(session.state(), DebugState::Paused);
        assert!(take(&events).is_empty());
        assert_eq!(script.calls().last().map(String::as_str), Some("step"));
    }

    #[test]
    fn stop_clears_views_and_discards_in_flight_snapshots() {
        let script = Script::default();
        let mut session = DebugSession::start(ScriptedConnection::new(&script)).unwrap();
        let events = observed(&mut session);

        session.run().unwrap();
        session.pause().unwrap();
        session.stop().unwrap();
        assert!(session.flush(WAIT));

        assert_eq!(session.state(), DebugState::Stopped);
        assert!(session.stack().is_empty());
        assert!(session.variables().is_empty());
        assert!(session.breakpoint_view().is_empty());
        assert_eq!(
            take(&events),
            vec![
                DebugEvent::StateChanged(DebugState::Running),
                DebugEvent::StateChanged(DebugState::Paused),
                DebugEvent::StateChanged(DebugState::Stopped),
                DebugEvent::StackUpdated(Vec::new()),
                DebugEvent::VariablesUpdated(Vec::new()),
                DebugEvent::BreakpointsUpdated(Vec::new()),
            ]
        );
        assert_eq!(script.calls().last().map(String::as_str), Some("stop"));
    }

    #[test]
    fn stop_while_running_clears_views_after_the_state_change() {
        let script = Script::default();
        let mut session = DebugSession::start(ScriptedConnection::new(&script)).unwrap();
        let events = observed(&mut session);

        session.run().unwrap();
        assert!(session.flush(WAIT));
        assert_eq!(session.stop().unwrap(), Dispatch::Accepted);
        assert!(session.flush(WAIT));

        assert_eq!(session.state(), DebugState::Stopped);
        assert!(session.stack().is_empty());
        assert!(session.variables().is_empty());
        assert!(session.breakpoint_view().is_empty());
        assert_eq!(
            take(&events),
            vec![
                DebugEvent::StateChanged(DebugState::Running),
                DebugEvent::StateChanged(DebugState::Stopped),
                DebugEvent::StackUpdated(Vec::new()),
                DebugEvent::VariablesUpdated(Vec::new()),
                DebugEvent::BreakpointsUpdated(Vec::new()),
            ]
        );
        assert_eq!(script.calls(), vec!["run", "stop"]);
    }

    #[test]
    fn halt_while_running_pauses_and_fetches_snapshots() {
        let script = Script {
            on_run: Some(ConnectionEvent::Halted),
            ..Script::default()
        };
        let mut session = DebugSession::start(ScriptedConnection::new(&script)).unwrap();
        let events = observed(&mut session);

        session.run().unwrap();
        assert!(session.flush(WAIT));

        assert_eq!(session.state(), DebugState::Paused);
        let events = take(&events);
        assert_eq!(events.len(), 5);
        assert_eq!(events[0], DebugEvent::StateChanged(DebugState::Running));
        assert_eq!(events[1], DebugEvent::StateChanged(DebugState::Paused));
        assert!(matches!(&events[2], DebugEvent::StackUpdated(frames) if frames.len() == 1));
        assert_eq!(session.stack()[0].function, "main");
        assert_eq!(
            script.calls(),
            vec!["run", "backtrace", "variables", "breakpoints"]
        );
    }

    #[test]
    fn halt_raised_before_a_stop_is_discarded() {
        let script = Script {
            on_run: Some(ConnectionEvent::Halted),
            ..Script::default()
        };
        let mut session = DebugSession::start(ScriptedConnection::new(&script)).unwrap();
        let events = observed(&mut session);

        session.run().unwrap();
        session.stop().unwrap();
        assert!(session.flush(WAIT));

        assert_eq!(session.state(), DebugState::Stopped);
        assert!(!take(&events).contains(&DebugEvent::StateChanged(DebugState::Paused)));
        assert_eq!(script.calls(), vec!["run", "stop"]);
    }

    #[test]
    fn program_exit_returns_to_stopped_and_clears_views() {
        let script = Script::default();
        let mut session = DebugSession::start(ScriptedConnection::new(&script)).unwrap();
        let events = observed(&mut session);

        session.run().unwrap();
        session.pause().unwrap();
        assert!(session.flush(WAIT));
        assert_eq!(session.variables().len(), 1);
        take(&events);

        script.sink().exited();
        assert!(session.wait_event(WAIT));

        assert_eq!(session.state(), DebugState::Stopped);
        assert!(session.stack().is_empty());
        assert!(session.variables().is_empty());
        assert_eq!(
            take(&events),
            vec![
                DebugEvent::StateChanged(DebugState::Stopped),
                DebugEvent::StackUpdated(Vec::new()),
                DebugEvent::VariablesUpdated(Vec::new()),
                DebugEvent::BreakpointsUpdated(Vec::new()),
            ]
        );
        assert!(!script.calls().contains(&"stop".to_string()));
        assert_eq!(session.run().unwrap(), Dispatch::Accepted);
    }

    #[test]
    fn exit_while_stopped_is_ignored() {
        let script = Script::default();
        let mut session = DebugSession::start(ScriptedConnection::new(&script)).unwrap();
        let events = observed(&mut session);
        assert!(session.flush(WAIT));

        script.sink().exited();
        assert!(session.wait_event(WAIT));

        assert_eq!(session.state(), DebugState::Stopped);
        assert!(take(&events).is_empty());
    }

    #[test]
    fn refresh_after_step_reports_new_variables() {
        let script = Script::default();
        let mut session = DebugSession::start(ScriptedConnection::new(&script)).unwrap();
        let events = observed(&mut session);

        assert_eq!(session.refresh().unwrap(), Dispatch::Ignored);
        session.run().unwrap();
        assert_eq!(session.refresh().unwrap(), Dispatch::Ignored);
        session.pause().unwrap();
        assert!(session.flush(WAIT));
        assert_eq!(session.variables(), &[Variable::new("speed", "50")]);
        take(&events);

        session.step().unwrap();
        assert_eq!(session.refresh().unwrap(), Dispatch::Accepted);
        assert!(session.flush(WAIT));

        assert_eq!(session.state(), DebugState::Paused);
        assert_eq!(session.variables(), &[Variable::new("speed", "60")]);
        assert_eq!(take(&events).len(), 3);
        let calls = script.calls();
        assert_eq!(
            calls[calls.len() - 4..],
            ["step", "backtrace", "variables", "breakpoints"]
        );
        assert_eq!(calls.iter().filter(|call| *call == "pause").count(), 1);
    }

    #[test]
    fn rejected_command_is_logged_and_the_session_continues() {
        let script = Script {
            reject_on: Some("step"),
            ..Script::default()
        };
        let mut session = DebugSession::start(ScriptedConnection::new(&script)).unwrap();
        let events = observed(&mut session);

        session.run().unwrap();
        session.pause().unwrap();
        assert!(session.flush(WAIT));
        take(&events);

        assert_eq!(session.step().unwrap(), Dispatch::Accepted);
        assert!(session.flush(WAIT));

        assert_eq!(session.state(), DebugState::Paused);
        assert_eq!(
            take(&events),
            vec![DebugEvent::Output {
                stream: OutputStream::DebugLog,
                text: "debugger rejected the command: no such frame".into(),
            }]
        );
        assert_eq!(session.refresh().unwrap(), Dispatch::Accepted);
        assert!(session.flush(WAIT));
        assert_eq!(script.calls().last().map(String::as_str), Some("breakpoints"));
    }

    #[test]
    fn transport_failure_terminates_once_and_rejects_later_commands() {
        let script = Script {
            fail_on: Some("run"),
            ..Script::default()
        };
        let mut session = DebugSession::start(ScriptedConnection::new(&script)).unwrap();
        let events = observed(&mut session);

        session.run().unwrap();
        assert!(!session.flush(WAIT));
        assert_eq!(session.state(), DebugState::Terminated);

        assert!(matches!(session.pause(), Err(DebugError::Terminated)));
        assert!(matches!(
            session.add_breakpoint(BreakpointLocation::new("main.c", EditorLine(0))),
            Err(DebugError::Terminated)
        ));
        assert_eq!(session.process_events(), 0);

        let terminated: Vec<_> = take(&events)
            .into_iter()
            .filter(|event| *event == DebugEvent::StateChanged(DebugState::Terminated))
            .collect();
        assert_eq!(terminated.len(), 1);
    }

    #[test]
    fn lost_connection_reported_through_sink_terminates() {
        let script = Script::default();
        let mut session = DebugSession::start(ScriptedConnection::new(&script)).unwrap();
        let events = observed(&mut session);
        assert!(session.flush(WAIT));

        script.sink().connection_lost("target reset");
        assert!(session.wait_event(WAIT));

        assert_eq!(session.state(), DebugState::Terminated);
        assert_eq!(
            take(&events),
            vec![DebugEvent::StateChanged(DebugState::Terminated)]
        );
    }

    #[test]
    fn breakpoints_are_translated_and_deduplicated() {
        let script = Script::default();
        let mut session = DebugSession::start(ScriptedConnection::new(&script)).unwrap();

        let bp = BreakpointLocation::new("main.c", EditorLine(0));
        assert_eq!(session.add_breakpoint(bp.clone()).unwrap(), Dispatch::Accepted);
        assert_eq!(session.add_breakpoint(bp.clone()).unwrap(), Dispatch::Ignored);
        assert_eq!(session.breakpoints().len(), 1);
        assert_eq!(session.remove_breakpoint(bp.clone()).unwrap(), Dispatch::Accepted);
        assert_eq!(session.remove_breakpoint(bp).unwrap(), Dispatch::Ignored);
        assert!(session.flush(WAIT));

        assert_eq!(script.calls(), vec!["break main.c:1", "clear main.c:1"]);
        assert!(session.breakpoints().is_empty());
    }

    #[test]
    fn output_keeps_order_within_each_stream() {
        let script = Script::default();
        let mut session = DebugSession::start(ScriptedConnection::new(&script)).unwrap();
        let events = observed(&mut session);
        assert!(session.flush(WAIT));

        let sink = script.sink();
        sink.stdout("a1");
        sink.stderr("b1");
        sink.stdout("a2");
        sink.debug_log("log");
        sink.stderr("b2");
        assert!(session.flush(WAIT));

        let text_for = |wanted: OutputStream| -> Vec<String> {
            events
                .lock()
                .unwrap()
                .iter()
                .filter_map(|event| match event {
                    DebugEvent::Output { stream, text } if *stream == wanted => Some(text.clone()),
                    _ => None,
                })
                .collect()
        };
        assert_eq!(text_for(OutputStream::Stdout), vec!["a1", "a2"]);
        assert_eq!(text_for(OutputStream::Stderr), vec!["b1", "b2"]);
        assert_eq!(text_for(OutputStream::DebugLog), vec!["log"]);
    }

    #[test]
    fn input_is_forwarded_and_close_shuts_the_connection() {
        let script = Script::default();
        let mut session = DebugSession::start(ScriptedConnection::new(&script)).unwrap();

        assert_eq!(session.send_input("42\n").unwrap(), Dispatch::Accepted);
        session.close();

        assert_eq!(script.calls(), vec!["input 42\n", "close"]);
    }
}

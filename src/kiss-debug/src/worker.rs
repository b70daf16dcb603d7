//! The thread that talks to a [`DebugConnection`] on behalf of a session.

use kiss_core::{
    BreakpointLocation, ConnectionEvent, DebugConnection, DebugEvent, EventSink,
    ProtocolLocation, TransportError,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;

pub(crate) enum WorkerCommand {
    Dispatch { epoch: u64, op: WorkerOp },
    Barrier(u64),
    Shutdown,
}

pub(crate) enum WorkerOp {
    Run,
    /// Pause, then fetch stack, variables and breakpoints.
    Pause,
    /// Fetch stack, variables and breakpoints without touching the program.
    Snapshot,
    Step,
    Stop,
    SendInput(String),
    AddBreakpoint(ProtocolLocation),
    RemoveBreakpoint(ProtocolLocation),
}

pub(crate) enum WorkerMessage {
    /// A snapshot produced by a command issued during `epoch`.
    Snapshot { epoch: u64, event: DebugEvent },
    /// Something the connection reported, while a command from `epoch` was current.
    Connection { epoch: u64, event: ConnectionEvent },
    Barrier(u64),
    /// The debugger refused a command; the session carries on.
    Rejected(TransportError),
    Failed(TransportError),
}

pub(crate) fn run_worker(
    mut connection: Box<dyn DebugConnection>,
    commands: Receiver<WorkerCommand>,
    messages: Sender<WorkerMessage>,
) {
    let current_epoch = Arc::new(AtomicU64::new(0));
    let sink = {
        let messages = messages.clone();
        let current_epoch = Arc::clone(&current_epoch);
        EventSink::new(move |event| {
            let epoch = current_epoch.load(Ordering::SeqCst);
            messages
                .send(WorkerMessage::Connection { epoch, event })
                .is_ok()
        })
    };
    if let Err(err) = connection.attach(sink) {
        let _ = messages.send(WorkerMessage::Failed(err));
        connection.close();
        return;
    }

    while let Ok(command) = commands.recv() {
        match command {
            WorkerCommand::Dispatch { epoch, op } => {
                current_epoch.store(epoch, Ordering::SeqCst);
                match execute(connection.as_mut(), epoch, op, &messages) {
                    Ok(()) => {}
                    Err(err) if !err.is_fatal() => {
                        tracing::info!(error = %err, "debug command refused");
                        if messages.send(WorkerMessage::Rejected(err)).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "debug transport failed");
                        let _ = messages.send(WorkerMessage::Failed(err));
                        break;
                    }
                }
            }
            WorkerCommand::Barrier(id) => {
                if messages.send(WorkerMessage::Barrier(id)).is_err() {
                    break;
                }
            }
            WorkerCommand::Shutdown => break,
        }
    }

    connection.close();
    tracing::debug!("debug worker exited");
}

fn execute(
    connection: &mut dyn DebugConnection,
    epoch: u64,
    op: WorkerOp,
    messages: &Sender<WorkerMessage>,
) -> Result<(), TransportError> {
    match op {
        WorkerOp::Run => connection.run(),
        WorkerOp::Pause => {
            connection.pause()?;
            snapshot(connection, epoch, messages)
        }
        WorkerOp::Snapshot => snapshot(connection, epoch, messages),
        WorkerOp::Step => connection.step(),
        WorkerOp::Stop => connection.stop(),
        WorkerOp::SendInput(text) => connection.send_input(&text),
        WorkerOp::AddBreakpoint(location) => connection.add_breakpoint(&location),
        WorkerOp::RemoveBreakpoint(location) => connection.remove_breakpoint(&location),
    }
}

fn snapshot(
    connection: &mut dyn DebugConnection,
    epoch: u64,
    messages: &Sender<WorkerMessage>,
) -> Result<(), TransportError> {
    let send = |event| messages.send(WorkerMessage::Snapshot { epoch, event });

    let frames = connection.backtrace()?;
    let _ = send(DebugEvent::StackUpdated(frames));

    let variables = connection.variables()?;
    let _ = send(DebugEvent::VariablesUpdated(variables));

    let breakpoints = connection
        .breakpoints()?
        .iter()
        .filter_map(BreakpointLocation::from_protocol)
        .collect();
    let _ = send(DebugEvent::BreakpointsUpdated(breakpoints));
    Ok(())
}

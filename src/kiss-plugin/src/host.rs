//! Exec-based plugin host that talks to an external process via JSON over stdio.

use crate::protocol::{
    PluginInfo, PluginMessage, PluginMethod, PluginNotification, PluginRequest,
    PluginResponse, PluginResult, PROTOCOL_VERSION,
};
use kiss_core::EventSink;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PluginHostError {
    #[error("failed to spawn plugin process: {0}")]
    SpawnFailed(std::io::Error),
    #[error("plugin process has no stdin")]
    NoStdin,
    #[error("plugin process has no stdout")]
    NoStdout,
    #[error("failed to write to plugin: {0}")]
    WriteError(std::io::Error),
    #[error("failed to read from plugin: {0}")]
    ReadError(std::io::Error),
    #[error("failed to parse plugin response: {0}")]
    ParseError(serde_json::Error),
    #[error("plugin returned error: {}", .0.message)]
    PluginError(crate::protocol::PluginError),
    #[error("protocol version mismatch: expected {expected}, got {actual}")]
    ProtocolMismatch { expected: u32, actual: u32 },
    #[error("unexpected response to {method}")]
    UnexpectedResponse { method: &'static str },
    #[error("request/response ID mismatch: sent {sent}, received {received}")]
    IdMismatch { sent: u64, received: u64 },
    #[error("plugin process terminated unexpectedly")]
    ProcessTerminated,
}

/// How to launch an external plugin; mirrors the `[plugin]` table of a target file.
#[derive(Debug, Clone, Default)]
pub struct PluginConfig {
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

type Reply = Result<PluginResponse, PluginHostError>;
type Subscribers = Arc<Mutex<HashMap<u64, EventSink>>>;

struct Pipes {
    stdin: ChildStdin,
    replies: Receiver<Reply>,
}

/// Host for one external plugin process.
///
/// Requests are serialized: a request and its response hold the pipe lock
/// together, so callers on different threads never see each other's replies.
/// A reader thread owns the plugin's stdout; it hands responses to the
/// waiting request and routes notifications to the subscribed debug session.
pub struct ExecPluginHost {
    config: PluginConfig,
    child: Mutex<Option<Child>>,
    pipes: Mutex<Option<Pipes>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    subscribers: Subscribers,
    request_id: AtomicU64,
    info: Mutex<Option<PluginInfo>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ExecPluginHost {
    pub fn new(config: PluginConfig) -> Self {
        Self {
            config,
            child: Mutex::new(None),
            pipes: Mutex::new(None),
            reader: Mutex::new(None),
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            request_id: AtomicU64::new(1),
            info: Mutex::new(None),
        }
    }

    /// Start the plugin process and perform the `Initialize` handshake.
    pub fn start(&self) -> Result<PluginInfo, PluginHostError> {
        let mut cmd = Command::new(&self.config.executable);
        cmd.args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        if let Some(ref dir) = self.config.working_dir {
            cmd.current_dir(dir);
        }

        for (key, value) in &self.config.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(PluginHostError::SpawnFailed)?;

        let stdin = child.stdin.take().ok_or(PluginHostError::NoStdin)?;
        let stdout = child.stdout.take().ok_or(PluginHostError::NoStdout)?;

        let (replies_tx, replies) = mpsc::channel();
        let subscribers = Arc::clone(&self.subscribers);
        let reader = thread::Builder::new()
            .name("kiss-plugin-reader".into())
            .spawn(move || read_messages(stdout, replies_tx, subscribers));
        let reader = match reader {
            Ok(reader) => reader,
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(PluginHostError::SpawnFailed(err));
            }
        };

        *lock(&self.child) = Some(child);
        *lock(&self.pipes) = Some(Pipes { stdin, replies });
        *lock(&self.reader) = Some(reader);

        let info = match self.initialize() {
            Ok(info) => info,
            Err(err) => {
                let _ = self.stop();
                return Err(err);
            }
        };
        *lock(&self.info) = Some(info.clone());

        Ok(info)
    }

    /// Ask the plugin to shut down, then make sure the process is gone.
    pub fn stop(&self) -> Result<(), PluginHostError> {
        // a deliberate shutdown is not a lost connection
        lock(&self.subscribers).clear();
        if lock(&self.pipes).is_some() {
            let _ = self.send_request(PluginMethod::Shutdown);
        }

        // closing stdin first lets a well-behaved plugin exit on EOF
        *lock(&self.pipes) = None;
        if let Some(mut child) = lock(&self.child).take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        if let Some(reader) = lock(&self.reader).take() {
            let _ = reader.join();
        }
        *lock(&self.info) = None;

        Ok(())
    }

    pub fn is_running(&self) -> bool {
        lock(&self.child)
            .as_mut()
            .map(|c| c.try_wait().ok().flatten().is_none())
            .unwrap_or(false)
    }

    /// Route notifications for debug `session` to `sink` until unsubscribed.
    /// The sink is told the connection was lost if the plugin's stdout closes.
    pub fn subscribe(&self, session: u64, sink: EventSink) {
        lock(&self.subscribers).insert(session, sink);
    }

    pub fn unsubscribe(&self, session: u64) {
        lock(&self.subscribers).remove(&session);
    }

    /// Plugin info, available after a successful [`ExecPluginHost::start`].
    pub fn info(&self) -> Option<PluginInfo> {
        lock(&self.info).clone()
    }

    /// Send a request and wait for its response.
    ///
    /// A [`PluginResult::Error`] reply is returned as [`PluginHostError::PluginError`].
    pub fn send_request(&self, method: PluginMethod) -> Result<PluginResult, PluginHostError> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let request = PluginRequest { id, method };
        let json = serde_json::to_string(&request).map_err(PluginHostError::ParseError)?;

        let response = {
            let mut guard = lock(&self.pipes);
            let pipes = guard.as_mut().ok_or(PluginHostError::ProcessTerminated)?;

            // replies nobody waited for belong to an earlier, failed request
            loop {
                match pipes.replies.try_recv() {
                    Ok(stale) => tracing::debug!(?stale, "Discarding stale plugin reply"),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        return Err(PluginHostError::ProcessTerminated)
                    }
                }
            }

            writeln!(pipes.stdin, "{}", json).map_err(PluginHostError::WriteError)?;
            pipes.stdin.flush().map_err(PluginHostError::WriteError)?;

            pipes
                .replies
                .recv()
                .map_err(|_| PluginHostError::ProcessTerminated)??
        };

        if response.id != id {
            return Err(PluginHostError::IdMismatch {
                sent: id,
                received: response.id,
            });
        }

        if let PluginResult::Error(err) = response.result {
            return Err(PluginHostError::PluginError(err));
        }

        Ok(response.result)
    }

    fn initialize(&self) -> Result<PluginInfo, PluginHostError> {
        match self.send_request(PluginMethod::Initialize)? {
            PluginResult::Initialized(info) => {
                if info.protocol_version != PROTOCOL_VERSION {
                    return Err(PluginHostError::ProtocolMismatch {
                        expected: PROTOCOL_VERSION,
                        actual: info.protocol_version,
                    });
                }
                tracing::info!(
                    plugin_id = %info.id,
                    plugin_name = %info.name,
                    plugin_version = %info.version,
                    "Target plugin initialized"
                );
                Ok(info)
            }
            _ => Err(PluginHostError::UnexpectedResponse {
                method: "Initialize",
            }),
        }
    }
}

/// Reader thread body: split the plugin's stdout into replies and notifications.
fn read_messages(stdout: ChildStdout, replies: Sender<Reply>, subscribers: Subscribers) {
    for line in BufReader::new(stdout).lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                let _ = replies.send(Err(PluginHostError::ReadError(err)));
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<PluginMessage>(&line) {
            Ok(PluginMessage::Response(response)) => {
                if replies.send(Ok(response)).is_err() {
                    break;
                }
            }
            Ok(PluginMessage::Notification(notification)) => notify(&subscribers, notification),
            Err(err) => {
                if replies.send(Err(PluginHostError::ParseError(err))).is_err() {
                    break;
                }
            }
        }
    }

    let orphaned: Vec<EventSink> = lock(&subscribers).drain().map(|(_, sink)| sink).collect();
    for sink in orphaned {
        sink.connection_lost("plugin process exited");
    }
    tracing::debug!("Plugin reader exited");
}

fn notify(subscribers: &Subscribers, notification: PluginNotification) {
    let sink = lock(subscribers).get(&notification.session).cloned();
    let Some(sink) = sink else {
        tracing::debug!(session = notification.session, "Notification for unknown debug session");
        return;
    };
    sink.send(notification.event.into());
}

impl Drop for ExecPluginHost {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

//! Exec-based plugin host that communicates with external processes via JSON over stdio.

use crate::protocol::{
    CallbackEvent, PluginError, PluginInfo, PluginMessage, PluginMethod, PluginRequest,
    PluginResult, PROTOCOL_VERSION,
};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Errors from plugin host operations.
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
    #[error("failed to encode request: {0}")]
    EncodeError(serde_json::Error),
    #[error("plugin returned error: {}", .0.message)]
    PluginError(PluginError),
    #[error("protocol version mismatch: expected {expected}, got {actual}")]
    ProtocolMismatch { expected: u32, actual: u32 },
    #[error("unexpected response to {method}")]
    UnexpectedResponse { method: &'static str },
    #[error("plugin did not answer {method} within {timeout:?}")]
    Timeout {
        method: &'static str,
        timeout: Duration,
    },
    #[error("plugin process terminated unexpectedly")]
    ProcessTerminated,
}

impl PluginHostError {
    /// Whether the plugin can no longer be talked to.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PluginHostError::SpawnFailed(_)
                | PluginHostError::NoStdin
                | PluginHostError::NoStdout
                | PluginHostError::WriteError(_)
                | PluginHostError::Timeout { .. }
                | PluginHostError::ProcessTerminated
        )
    }
}

/// Configuration for an external plugin.
#[derive(Debug, Clone)]
pub struct PluginConfig {
    /// Path to the plugin executable.
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// How long a single request may take before the plugin is considered hung.
    pub request_timeout: Duration,
}

impl PluginConfig {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Out-of-band messages from the plugin process.
#[derive(Debug)]
pub enum HostEvent {
    Callback(CallbackEvent),
    /// The process closed its stdout without being asked to stop.
    Terminated,
    /// The process exited after [`ExecPluginHost::stop`].
    Closed,
}

type PendingMap = HashMap<u64, Sender<PluginResult>>;

/// Host for an external plugin process.
///
/// A reader thread owns the plugin's stdout. Responses are routed to the
/// waiting caller by request id; callbacks and termination are published on
/// [`ExecPluginHost::events`]. Requests may be issued from several threads at
/// once.
pub struct ExecPluginHost {
    config: PluginConfig,
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    pending: Arc<Mutex<PendingMap>>,
    request_id: AtomicU64,
    info: Mutex<Option<PluginInfo>>,
    stopping: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
    events_tx: Sender<HostEvent>,
    events_rx: Receiver<HostEvent>,
}

impl ExecPluginHost {
    pub fn new(config: PluginConfig) -> Self {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        Self {
            config,
            child: Mutex::new(None),
            stdin: Mutex::new(None),
            pending: Arc::new(Mutex::new(HashMap::new())),
            request_id: AtomicU64::new(1),
            info: Mutex::new(None),
            stopping: Arc::new(AtomicBool::new(false)),
            reader: Mutex::new(None),
            events_tx,
            events_rx,
        }
    }

    /// Callback and termination events, in the order the plugin wrote them.
    pub fn events(&self) -> Receiver<HostEvent> {
        self.events_rx.clone()
    }

    /// Start the plugin process and perform the handshake.
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

        self.stopping.store(false, Ordering::Release);
        *self.child.lock() = Some(child);
        *self.stdin.lock() = Some(stdin);
        let reader = self.spawn_reader(stdout)?;
        *self.reader.lock() = Some(reader);

        let info = match self.initialize() {
            Ok(info) => info,
            Err(err) => {
                let _ = self.stop();
                return Err(err);
            }
        };
        *self.info.lock() = Some(info.clone());
        Ok(info)
    }

    fn spawn_reader(&self, stdout: ChildStdout) -> Result<JoinHandle<()>, PluginHostError> {
        let pending = Arc::clone(&self.pending);
        let stopping = Arc::clone(&self.stopping);
        let events = self.events_tx.clone();
        let label = self.config.executable.display().to_string();
        thread::Builder::new()
            .name("plugin-reader".into())
            .spawn(move || read_loop(BufReader::new(stdout), &pending, &stopping, &events, &label))
            .map_err(PluginHostError::SpawnFailed)
    }

    /// Stop the plugin process gracefully, killing it if it does not comply.
    pub fn stop(&self) -> Result<(), PluginHostError> {
        self.stopping.store(true, Ordering::Release);
        if self.is_running() {
            let _ = self.request(PluginMethod::Shutdown, SHUTDOWN_TIMEOUT);
        }

        *self.stdin.lock() = None;
        if let Some(mut child) = self.child.lock().take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        if let Some(reader) = self.reader.lock().take() {
            let _ = reader.join();
        }
        *self.info.lock() = None;
        Ok(())
    }

    /// Check if the plugin process is running.
    pub fn is_running(&self) -> bool {
        self.child
            .lock()
            .as_mut()
            .map(|c| c.try_wait().ok().flatten().is_none())
            .unwrap_or(false)
    }

    /// Get the plugin info (available after start).
    pub fn info(&self) -> Option<PluginInfo> {
        self.info.lock().clone()
    }

    /// Send a request and wait for its response.
    pub fn send_request(&self, method: PluginMethod) -> Result<PluginResult, PluginHostError> {
        self.request(method, self.config.request_timeout)
    }

    fn request(
        &self,
        method: PluginMethod,
        timeout: Duration,
    ) -> Result<PluginResult, PluginHostError> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let name = method.name();
        let json = serde_json::to_string(&PluginRequest { id, method })
            .map_err(PluginHostError::EncodeError)?;

        let (tx, rx) = crossbeam_channel::bounded(1);
        self.pending.lock().insert(id, tx);

        let written = {
            let mut stdin_guard = self.stdin.lock();
            match stdin_guard.as_mut() {
                Some(stdin) => writeln!(stdin, "{json}")
                    .and_then(|_| stdin.flush())
                    .map_err(PluginHostError::WriteError),
                None => Err(PluginHostError::ProcessTerminated),
            }
        };
        if let Err(err) = written {
            self.pending.lock().remove(&id);
            return Err(err);
        }

        match rx.recv_timeout(timeout) {
            Ok(PluginResult::Error(err)) => Err(PluginHostError::PluginError(err)),
            Ok(result) => Ok(result),
            Err(RecvTimeoutError::Timeout) => {
                self.pending.lock().remove(&id);
                Err(PluginHostError::Timeout {
                    method: name,
                    timeout,
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(PluginHostError::ProcessTerminated),
        }
    }

    fn initialize(&self) -> Result<PluginInfo, PluginHostError> {
        let result = self.send_request(PluginMethod::Initialize)?;
        match result {
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
                    "Plugin initialized"
                );
                Ok(info)
            }
            _ => Err(PluginHostError::UnexpectedResponse {
                method: "initialize",
            }),
        }
    }
}

impl Drop for ExecPluginHost {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn read_loop(
    mut stdout: BufReader<ChildStdout>,
    pending: &Mutex<PendingMap>,
    stopping: &AtomicBool,
    events: &Sender<HostEvent>,
    label: &str,
) {
    let mut line = String::new();
    loop {
        line.clear();
        match stdout.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(plugin = label, error = %err, "failed to read from plugin");
                break;
            }
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<PluginMessage>(trimmed) {
            Ok(PluginMessage::Response { id, result }) => match pending.lock().remove(&id) {
                Some(waiter) => {
                    let _ = waiter.send(result);
                }
                None => tracing::warn!(plugin = label, id, "response for unknown request"),
            },
            Ok(PluginMessage::Callback { event }) => {
                let _ = events.send(HostEvent::Callback(event));
            }
            Err(err) => {
                tracing::warn!(plugin = label, error = %err, "ignoring malformed plugin message");
            }
        }
    }

    // Dropping the senders wakes every caller still waiting for a reply.
    pending.lock().clear();
    if stopping.load(Ordering::Acquire) {
        let _ = events.send(HostEvent::Closed);
    } else {
        tracing::warn!(plugin = label, "plugin process closed its output");
        let _ = events.send(HostEvent::Terminated);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// A bash plugin that answers the handful of methods the tests use.
    #[cfg(unix)]
    pub(crate) fn create_test_plugin_script(protocol_version: u32) -> tempfile::TempPath {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"#!/bin/bash
respond() {{ echo "{{\"kind\":\"response\",\"id\":$1,\"result\":$2}}"; }}
while IFS= read -r line; do
    id=$(echo "$line" | grep -o '"id":[0-9]*' | head -1 | cut -d: -f2)
    case "$line" in
        *'"type":"Initialize"'*)
            respond $id '{{"status":"Initialized","id":"test","name":"Test","version":"1.0.0","protocol_version":{protocol_version}}}' ;;
        *'"type":"IsSetup"'*|*'"type":"IsAuthenticated"'*)
            respond $id '{{"status":"Flag","value":true}}' ;;
        *'"type":"GetSongs"'*)
            respond $id '{{"status":"Songs","songs":[{{"ref":"s:1","is_loaded":true,"title":"One"}}]}}' ;;
        *'"type":"GetPlaylists"'*)
            respond $id '{{"status":"Error","kind":"payload_too_large","message":"too many"}}' ;;
        *'"type":"StartSearch"'*)
            echo '{{"kind":"callback","event":{{"type":"SearchResult","params":{{"result":{{"query":"abc","songs":["s:1"]}}}}}}}}'
            respond $id '{{"status":"Ack"}}' ;;
        *'"type":"Login"'*)
            exit 3 ;;
        *'"type":"Shutdown"'*)
            respond $id '{{"status":"ShutdownAck"}}'
            exit 0 ;;
        *)
            respond $id '{{"status":"Ack"}}' ;;
    esac
done
"#
        )
        .unwrap();
        file.flush().unwrap();

        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o755)).unwrap();

        file.into_temp_path()
    }

    #[test]
    #[cfg(unix)]
    fn plugin_handshake_works() {
        let script = create_test_plugin_script(1);
        let host = ExecPluginHost::new(PluginConfig::new(script.to_path_buf()));
        let info = host.start().expect("failed to start plugin");

        assert_eq!(info.id, "test");
        assert_eq!(info.version, "1.0.0");
        assert!(host.is_running());

        host.stop().expect("failed to stop");
        assert!(!host.is_running());
        assert!(host.info().is_none());
    }

    #[test]
    #[cfg(unix)]
    fn protocol_mismatch_rejected() {
        let script = create_test_plugin_script(2);
        let host = ExecPluginHost::new(PluginConfig::new(script.to_path_buf()));
        let err = host.start().unwrap_err();
        assert!(matches!(
            err,
            PluginHostError::ProtocolMismatch {
                expected: 1,
                actual: 2
            }
        ));
    }

    #[test]
    #[cfg(unix)]
    fn callbacks_arrive_before_response() {
        let script = create_test_plugin_script(1);
        let host = ExecPluginHost::new(PluginConfig::new(script.to_path_buf()));
        host.start().unwrap();
        let events = host.events();

        let result = host
            .send_request(PluginMethod::StartSearch {
                query: "abc".into(),
            })
            .unwrap();
        assert!(matches!(result, PluginResult::Ack));
        match events.recv_timeout(Duration::from_secs(2)).unwrap() {
            HostEvent::Callback(CallbackEvent::SearchResult { result }) => {
                assert_eq!(result.query, "abc");
                assert_eq!(result.songs, vec!["s:1".to_string()]);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    #[cfg(unix)]
    fn crash_fails_request_and_reports_termination() {
        let script = create_test_plugin_script(1);
        let host = ExecPluginHost::new(PluginConfig::new(script.to_path_buf()));
        host.start().unwrap();
        let events = host.events();

        let err = host.send_request(PluginMethod::Login).unwrap_err();
        assert!(matches!(err, PluginHostError::ProcessTerminated));
        assert!(err.is_fatal());
        assert!(matches!(
            events.recv_timeout(Duration::from_secs(2)).unwrap(),
            HostEvent::Terminated
        ));
    }

    #[test]
    fn missing_executable_fails_to_spawn() {
        let host = ExecPluginHost::new(PluginConfig::new("/nonexistent/cadenza-plugin"));
        assert!(matches!(
            host.start(),
            Err(PluginHostError::SpawnFailed(_))
        ));
    }
}

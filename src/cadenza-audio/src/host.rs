use crate::pool::BufferPool;
use crate::protocol::{AudioFormat, Frame, FrameDecoder, FrameWriter, ProtocolError};
use crate::sink::{AudioSink, SinkError};
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use std::fs;
use std::io::{self, Read};
use std::net::Shutdown;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

const ACCEPT_POLL: Duration = Duration::from_millis(20);
const READ_POLL: Duration = Duration::from_millis(100);
const RELEASE_TIMEOUT: Duration = Duration::from_secs(2);
const READ_CHUNK: usize = 16 * 1024;

#[derive(Debug, Error)]
pub enum AudioSocketError {
    #[error("failed to remove stale socket {path}: {source}")]
    RemoveStale {
        path: PathBuf,
        source: io::Error,
    },
    #[error("failed to listen on {path}: {source}")]
    Bind {
        path: PathBuf,
        source: io::Error,
    },
    #[error("failed to configure socket {name}: {source}")]
    Configure { name: String, source: io::Error },
    #[error("failed to spawn thread for socket {name}: {source}")]
    Spawn { name: String, source: io::Error },
    #[error("socket {name} has no connected peer")]
    NotConnected { name: String },
    #[error("failed to write to socket {name}: {source}")]
    Write { name: String, source: io::Error },
    #[error("failed to read from socket {name}: {source}")]
    Read { name: String, source: io::Error },
    #[error("framing error on socket {name}: {source}")]
    Protocol {
        name: String,
        source: ProtocolError,
    },
}

impl From<AudioSocketError> for SinkError {
    fn from(err: AudioSocketError) -> Self {
        match err {
            AudioSocketError::NotConnected { name } => SinkError::NotConnected { name },
            AudioSocketError::Write { source, .. } | AudioSocketError::Read { source, .. } => {
                SinkError::Io(source)
            }
            other => SinkError::Io(io::Error::other(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HostOptions {
    pub max_frame_bytes: usize,
    /// Number of PCM buffers in flight between the reader and the sink.
    pub pool_buffers: usize,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            max_frame_bytes: 1024 * 1024,
            pool_buffers: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostStats {
    pub connections: u64,
    pub frames: u64,
    pub bytes: u64,
    pub format_changes: u64,
    pub framing_errors: u64,
}

#[derive(Default)]
struct Counters {
    connections: AtomicU64,
    frames: AtomicU64,
    bytes: AtomicU64,
    format_changes: AtomicU64,
    framing_errors: AtomicU64,
}

struct Shared {
    name: String,
    options: HostOptions,
    sink: Mutex<Box<dyn AudioSink>>,
    peer: Mutex<Option<UnixStream>>,
    counters: Counters,
}

struct ListenWorker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Listening endpoint for one named audio edge.
///
/// The socket lives at `<socket_dir>/<name>.sock`. One producer is served at
/// a time; its frames are decoded on the listener thread and handed to the
/// sink on a separate push thread through a bounded channel.
pub struct AudioSocketHost {
    path: PathBuf,
    shared: Arc<Shared>,
    worker: Mutex<Option<ListenWorker>>,
}

impl AudioSocketHost {
    pub fn new(
        name: impl Into<String>,
        socket_dir: &Path,
        sink: Box<dyn AudioSink>,
        options: HostOptions,
    ) -> Self {
        let name = name.into();
        Self {
            path: socket_dir.join(format!("{name}.sock")),
            shared: Arc::new(Shared {
                name,
                options,
                sink: Mutex::new(sink),
                peer: Mutex::new(None),
                counters: Counters::default(),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces the downstream sink. Takes effect with the next frame.
    pub fn set_sink(&self, sink: Box<dyn AudioSink>) {
        *self.shared.sink.lock() = sink;
    }

    /// Opens the endpoint, first closing any listener this host already had.
    pub fn start_listening(&self) -> Result<(), AudioSocketError> {
        self.release();

        if self.path.exists() {
            fs::remove_file(&self.path).map_err(|source| AudioSocketError::RemoveStale {
                path: self.path.clone(),
                source,
            })?;
        }
        let listener = UnixListener::bind(&self.path).map_err(|source| AudioSocketError::Bind {
            path: self.path.clone(),
            source,
        })?;
        listener
            .set_nonblocking(true)
            .map_err(|source| AudioSocketError::Configure {
                name: self.name().to_string(),
                source,
            })?;

        let stop = Arc::new(AtomicBool::new(false));
        let handle = thread::Builder::new()
            .name(format!("audio-{}", self.name()))
            .spawn({
                let shared = Arc::clone(&self.shared);
                let stop = Arc::clone(&stop);
                move || accept_loop(listener, shared, stop)
            })
            .map_err(|source| AudioSocketError::Spawn {
                name: self.name().to_string(),
                source,
            })?;

        tracing::debug!(socket = %self.name(), path = %self.path.display(), "audio socket listening");
        *self.worker.lock() = Some(ListenWorker { stop, handle });
        Ok(())
    }

    pub fn is_listening(&self) -> bool {
        self.worker.lock().is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.peer.lock().is_some()
    }

    /// Stops listening, disconnects the peer and removes the socket file.
    /// Waits at most two seconds for the socket thread.
    pub fn release(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        worker.stop.store(true, Ordering::Release);
        if let Some(peer) = self.shared.peer.lock().as_ref() {
            let _ = peer.shutdown(Shutdown::Both);
        }

        let deadline = Instant::now() + RELEASE_TIMEOUT;
        while !worker.handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        if worker.handle.is_finished() {
            let _ = worker.handle.join();
        } else {
            tracing::warn!(socket = %self.name(), "audio socket thread did not stop in time, detaching");
        }

        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != io::ErrorKind::NotFound {
                tracing::debug!(socket = %self.name(), error = %err, "failed to remove socket file");
            }
        }
        tracing::debug!(socket = %self.name(), "audio socket released");
    }

    pub fn send_format(&self, format: AudioFormat) -> Result<(), AudioSocketError> {
        self.with_peer(|writer| writer.write_format(format))
    }

    pub fn send_data(&self, pcm: &[u8]) -> Result<(), AudioSocketError> {
        self.with_peer(|writer| writer.write_data(pcm))
    }

    fn with_peer(
        &self,
        op: impl FnOnce(&mut FrameWriter<&UnixStream>) -> io::Result<()>,
    ) -> Result<(), AudioSocketError> {
        let peer = self.shared.peer.lock();
        let stream = peer.as_ref().ok_or_else(|| AudioSocketError::NotConnected {
            name: self.name().to_string(),
        })?;
        op(&mut FrameWriter::new(stream)).map_err(|source| AudioSocketError::Write {
            name: self.name().to_string(),
            source,
        })
    }

    pub fn stats(&self) -> HostStats {
        let c = &self.shared.counters;
        HostStats {
            connections: c.connections.load(Ordering::Relaxed),
            frames: c.frames.load(Ordering::Relaxed),
            bytes: c.bytes.load(Ordering::Relaxed),
            format_changes: c.format_changes.load(Ordering::Relaxed),
            framing_errors: c.framing_errors.load(Ordering::Relaxed),
        }
    }
}

impl Drop for AudioSocketHost {
    fn drop(&mut self) {
        self.release();
    }
}

fn accept_loop(listener: UnixListener, shared: Arc<Shared>, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, _)) => {
                shared.counters.connections.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(socket = %shared.name, "audio producer connected");
                match serve_peer(stream, &shared, &stop) {
                    Ok(()) => tracing::debug!(socket = %shared.name, "audio producer disconnected"),
                    Err(err @ AudioSocketError::Protocol { .. }) => {
                        shared.counters.framing_errors.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(socket = %shared.name, error = %err, "dropping audio producer");
                    }
                    Err(err) => {
                        tracing::warn!(socket = %shared.name, error = %err, "audio producer failed");
                    }
                }
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(err) => {
                tracing::error!(socket = %shared.name, error = %err, "audio socket accept failed");
                break;
            }
        }
    }
}

fn serve_peer(
    stream: UnixStream,
    shared: &Arc<Shared>,
    stop: &AtomicBool,
) -> Result<(), AudioSocketError> {
    let configure = |source| AudioSocketError::Configure {
        name: shared.name.clone(),
        source,
    };
    stream.set_nonblocking(false).map_err(configure)?;
    stream.set_read_timeout(Some(READ_POLL)).map_err(configure)?;
    *shared.peer.lock() = Some(stream.try_clone().map_err(configure)?);

    let options = shared.options;
    let (tx, rx) = crossbeam_channel::bounded::<Frame>(options.pool_buffers.max(1));
    let push = thread::Builder::new()
        .name(format!("audio-push-{}", shared.name))
        .spawn({
            let shared = Arc::clone(shared);
            move || push_loop(rx, &shared)
        });
    let push = match push {
        Ok(push) => push,
        Err(source) => {
            shared.peer.lock().take();
            return Err(AudioSocketError::Spawn {
                name: shared.name.clone(),
                source,
            });
        }
    };

    let mut decoder = FrameDecoder::new(
        BufferPool::new(options.pool_buffers),
        options.max_frame_bytes,
    );
    let mut chunk = vec![0u8; READ_CHUNK];
    let outcome = loop {
        if stop.load(Ordering::Acquire) {
            break Ok(());
        }
        match (&stream).read(&mut chunk) {
            Ok(0) if stop.load(Ordering::Acquire) => break Ok(()),
            Ok(0) => {
                break decoder.finish().map_err(|source| AudioSocketError::Protocol {
                    name: shared.name.clone(),
                    source,
                })
            }
            Ok(n) => {
                let fed = decoder.feed(&chunk[..n], &mut |frame| {
                    let _ = tx.send(frame);
                });
                if let Err(source) = fed {
                    break Err(AudioSocketError::Protocol {
                        name: shared.name.clone(),
                        source,
                    });
                }
            }
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) => {}
            Err(source) => {
                break Err(AudioSocketError::Read {
                    name: shared.name.clone(),
                    source,
                })
            }
        }
    };

    drop(tx);
    let _ = push.join();
    shared.peer.lock().take();
    let _ = stream.shutdown(Shutdown::Both);
    outcome
}

fn push_loop(frames: Receiver<Frame>, shared: &Shared) {
    let counters = &shared.counters;
    let mut current: Option<AudioFormat> = None;
    for frame in frames.iter() {
        match frame {
            Frame::Format(format) => {
                if current == Some(format) {
                    continue;
                }
                current = Some(format);
                counters.format_changes.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    socket = %shared.name,
                    channels = format.channels,
                    sample_rate = format.sample_rate,
                    "audio format changed"
                );
                if let Err(err) = shared.sink.lock().configure(format) {
                    tracing::warn!(socket = %shared.name, error = %err, "sink rejected format");
                }
            }
            Frame::Data(buffer) => {
                counters.frames.fetch_add(1, Ordering::Relaxed);
                counters
                    .bytes
                    .fetch_add(buffer.len() as u64, Ordering::Relaxed);
                if let Err(err) = shared.sink.lock().write(&buffer) {
                    tracing::trace!(socket = %shared.name, error = %err, "sink dropped buffer");
                }
            }
        }
    }
    shared.sink.lock().close();
}

use crate::pool::PcmBuffer;
use crate::protocol::AudioFormat;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink received data before any format")]
    Unconfigured,
    #[error("downstream edge {name} has no connected peer")]
    NotConnected { name: String },
    #[error("downstream write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Downstream stage of an audio socket edge.
///
/// `configure` runs whenever the incoming format changes; `write` once per
/// DATA frame, in arrival order.
pub trait AudioSink: Send {
    fn configure(&mut self, format: AudioFormat) -> Result<(), SinkError>;

    fn write(&mut self, buffer: &PcmBuffer) -> Result<(), SinkError>;

    /// The producer disconnected.
    fn close(&mut self) {}
}

/// Discards audio, counting what went through.
#[derive(Debug, Clone, Default)]
pub struct NullSink {
    bytes: Arc<AtomicU64>,
    buffers: Arc<AtomicU64>,
}

impl NullSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn buffers(&self) -> u64 {
        self.buffers.load(Ordering::Relaxed)
    }
}

impl AudioSink for NullSink {
    fn configure(&mut self, _format: AudioFormat) -> Result<(), SinkError> {
        Ok(())
    }

    fn write(&mut self, buffer: &PcmBuffer) -> Result<(), SinkError> {
        self.bytes.fetch_add(buffer.len() as u64, Ordering::Relaxed);
        self.buffers.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    Configured(AudioFormat),
    Data(Vec<u8>),
    Closed,
}

/// Records everything it receives. Clones share the recording.
#[derive(Debug, Clone, Default)]
pub struct CaptureSink {
    events: Arc<Mutex<Vec<CaptureEvent>>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<CaptureEvent> {
        self.events.lock().clone()
    }

    pub fn formats(&self) -> Vec<AudioFormat> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                CaptureEvent::Configured(format) => Some(*format),
                _ => None,
            })
            .collect()
    }

    /// Concatenation of every DATA payload seen so far.
    pub fn pcm(&self) -> Vec<u8> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                CaptureEvent::Data(bytes) => Some(bytes.as_slice()),
                _ => None,
            })
            .flatten()
            .copied()
            .collect()
    }
}

impl AudioSink for CaptureSink {
    fn configure(&mut self, format: AudioFormat) -> Result<(), SinkError> {
        self.events.lock().push(CaptureEvent::Configured(format));
        Ok(())
    }

    fn write(&mut self, buffer: &PcmBuffer) -> Result<(), SinkError> {
        self.events
            .lock()
            .push(CaptureEvent::Data(buffer.bytes().to_vec()));
        Ok(())
    }

    fn close(&mut self) {
        self.events.lock().push(CaptureEvent::Closed);
    }
}

#[cfg(unix)]
pub use forward::ForwardSink;

#[cfg(unix)]
mod forward {
    use super::{AudioSink, SinkError};
    use crate::host::AudioSocketHost;
    use crate::pool::PcmBuffer;
    use crate::protocol::AudioFormat;
    use std::sync::Arc;

    /// Passes audio on to the peer connected to another edge.
    pub struct ForwardSink {
        target: Arc<AudioSocketHost>,
        format: Option<AudioFormat>,
    }

    impl ForwardSink {
        pub fn new(target: Arc<AudioSocketHost>) -> Self {
            Self {
                target,
                format: None,
            }
        }

        pub fn target(&self) -> &str {
            self.target.name()
        }
    }

    impl AudioSink for ForwardSink {
        fn configure(&mut self, format: AudioFormat) -> Result<(), SinkError> {
            self.format = Some(format);
            self.target.send_format(format).map_err(Into::into)
        }

        fn write(&mut self, buffer: &PcmBuffer) -> Result<(), SinkError> {
            if self.format.is_none() {
                return Err(SinkError::Unconfigured);
            }
            self.target.send_data(buffer.bytes()).map_err(Into::into)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_sink_clones_share_recording() {
        let sink = CaptureSink::new();
        let mut writer = sink.clone();
        let format = AudioFormat::new(2, 44_100).unwrap();
        writer.configure(format).unwrap();
        writer
            .write(&PcmBuffer::detached(vec![1, 0, 2, 0]))
            .unwrap();
        writer.close();

        assert_eq!(sink.formats(), vec![format]);
        assert_eq!(sink.pcm(), vec![1, 0, 2, 0]);
        assert_eq!(sink.events().last(), Some(&CaptureEvent::Closed));
    }

    #[test]
    fn null_sink_counts() {
        let sink = NullSink::new();
        let mut writer = sink.clone();
        writer.write(&PcmBuffer::detached(vec![0; 8])).unwrap();
        writer.write(&PcmBuffer::detached(vec![0; 4])).unwrap();
        assert_eq!(sink.bytes(), 12);
        assert_eq!(sink.buffers(), 2);
    }
}

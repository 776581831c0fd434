mod pool;
mod protocol;
mod sink;

#[cfg(unix)]
mod chain;
#[cfg(unix)]
mod host;

pub use pool::{BufferPool, PcmBuffer};
pub use protocol::{
    AudioFormat, Frame, FrameDecoder, FrameWriter, ProtocolError, OPCODE_DATA, OPCODE_FORMAT,
};
pub use sink::{AudioSink, CaptureEvent, CaptureSink, NullSink, SinkError};

#[cfg(unix)]
pub use chain::DspChain;
#[cfg(unix)]
pub use host::{AudioSocketError, AudioSocketHost, HostOptions, HostStats};
#[cfg(unix)]
pub use sink::ForwardSink;

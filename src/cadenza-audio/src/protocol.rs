//! Audio socket framing.
//!
//! Each message starts with one opcode byte:
//!
//! * `FORMAT` (1): channel count (`u8`) then sample rate (`i32`, big-endian).
//! * `DATA` (2): byte length `N` (`u32`, big-endian) then `N` bytes of
//!   interleaved 16-bit little-endian PCM.
//!
//! EOF between messages closes the stream cleanly. EOF inside a message or an
//! unknown opcode is fatal for the connection.

use crate::pool::{BufferPool, PcmBuffer};
use std::io::{self, Write};
use thiserror::Error;

pub const OPCODE_FORMAT: u8 = 1;
pub const OPCODE_DATA: u8 = 2;

const FORMAT_HEADER_LEN: usize = 5;
const DATA_HEADER_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub channels: u8,
    pub sample_rate: i32,
}

impl AudioFormat {
    pub fn new(channels: u8, sample_rate: i32) -> Result<Self, ProtocolError> {
        if channels == 0 || sample_rate <= 0 {
            return Err(ProtocolError::InvalidFormat {
                channels,
                sample_rate,
            });
        }
        Ok(Self {
            channels,
            sample_rate,
        })
    }

    /// Bytes per interleaved sample frame.
    pub fn frame_bytes(&self) -> usize {
        usize::from(self.channels) * 2
    }
}

#[derive(Debug)]
pub enum Frame {
    Format(AudioFormat),
    Data(PcmBuffer),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown opcode {0:#04x}")]
    UnknownOpcode(u8),
    #[error("malformed format: {channels} channels at {sample_rate} Hz")]
    InvalidFormat { channels: u8, sample_rate: i32 },
    #[error("data frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },
    #[error("stream ended inside a frame ({missing} bytes missing)")]
    UnexpectedEof { missing: usize },
}

enum DecodeState {
    Opcode,
    Format {
        header: [u8; FORMAT_HEADER_LEN],
        filled: usize,
    },
    DataLength {
        header: [u8; DATA_HEADER_LEN],
        filled: usize,
    },
    DataBody {
        buffer: PcmBuffer,
        remaining: usize,
    },
}

/// Incremental decoder. Input may be split at any byte; state carries over
/// between calls to [`FrameDecoder::feed`].
pub struct FrameDecoder {
    state: DecodeState,
    pool: BufferPool,
    max_frame_bytes: usize,
}

impl FrameDecoder {
    pub fn new(pool: BufferPool, max_frame_bytes: usize) -> Self {
        Self {
            state: DecodeState::Opcode,
            pool,
            max_frame_bytes,
        }
    }

    pub fn at_boundary(&self) -> bool {
        matches!(self.state, DecodeState::Opcode)
    }

    /// Consumes `input`, emitting every completed frame. After an error the
    /// decoder must be discarded.
    pub fn feed(
        &mut self,
        mut input: &[u8],
        emit: &mut dyn FnMut(Frame),
    ) -> Result<(), ProtocolError> {
        while !input.is_empty() {
            match &mut self.state {
                DecodeState::Opcode => {
                    let opcode = input[0];
                    input = &input[1..];
                    self.state = match opcode {
                        OPCODE_FORMAT => DecodeState::Format {
                            header: [0; FORMAT_HEADER_LEN],
                            filled: 0,
                        },
                        OPCODE_DATA => DecodeState::DataLength {
                            header: [0; DATA_HEADER_LEN],
                            filled: 0,
                        },
                        other => return Err(ProtocolError::UnknownOpcode(other)),
                    };
                }
                DecodeState::Format { header, filled } => {
                    input = fill(header, filled, input);
                    if *filled == FORMAT_HEADER_LEN {
                        let channels = header[0];
                        let sample_rate =
                            i32::from_be_bytes([header[1], header[2], header[3], header[4]]);
                        let format = AudioFormat::new(channels, sample_rate)?;
                        self.state = DecodeState::Opcode;
                        emit(Frame::Format(format));
                    }
                }
                DecodeState::DataLength { header, filled } => {
                    input = fill(header, filled, input);
                    if *filled == DATA_HEADER_LEN {
                        let len = u32::from_be_bytes(*header) as usize;
                        if len > self.max_frame_bytes {
                            return Err(ProtocolError::FrameTooLarge {
                                len,
                                max: self.max_frame_bytes,
                            });
                        }
                        let mut buffer = self.pool.acquire();
                        buffer.reserve_exact(len);
                        if len == 0 {
                            self.state = DecodeState::Opcode;
                            emit(Frame::Data(buffer));
                        } else {
                            self.state = DecodeState::DataBody {
                                buffer,
                                remaining: len,
                            };
                        }
                    }
                }
                DecodeState::DataBody { buffer, remaining } => {
                    let take = (*remaining).min(input.len());
                    buffer.extend_from_slice(&input[..take]);
                    *remaining -= take;
                    input = &input[take..];
                    if *remaining == 0 {
                        if let DecodeState::DataBody { buffer, .. } =
                            std::mem::replace(&mut self.state, DecodeState::Opcode)
                        {
                            emit(Frame::Data(buffer));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Checks the decoder at end of stream.
    pub fn finish(&self) -> Result<(), ProtocolError> {
        let missing = match &self.state {
            DecodeState::Opcode => return Ok(()),
            DecodeState::Format { filled, .. } => FORMAT_HEADER_LEN - filled,
            DecodeState::DataLength { filled, .. } => DATA_HEADER_LEN - filled,
            DecodeState::DataBody { remaining, .. } => *remaining,
        };
        Err(ProtocolError::UnexpectedEof { missing })
    }
}

fn fill<'a, const N: usize>(header: &mut [u8; N], filled: &mut usize, input: &'a [u8]) -> &'a [u8] {
    let take = (N - *filled).min(input.len());
    header[*filled..*filled + take].copy_from_slice(&input[..take]);
    *filled += take;
    &input[take..]
}

/// Encodes frames onto any byte sink.
pub struct FrameWriter<W: Write> {
    inner: W,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn write_format(&mut self, format: AudioFormat) -> io::Result<()> {
        let mut frame = [0u8; 1 + FORMAT_HEADER_LEN];
        frame[0] = OPCODE_FORMAT;
        frame[1] = format.channels;
        frame[2..].copy_from_slice(&format.sample_rate.to_be_bytes());
        self.inner.write_all(&frame)?;
        self.inner.flush()
    }

    pub fn write_data(&mut self, pcm: &[u8]) -> io::Result<()> {
        let len = u32::try_from(pcm.len()).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "pcm block exceeds u32 length")
        })?;
        let mut header = [0u8; 1 + DATA_HEADER_LEN];
        header[0] = OPCODE_DATA;
        header[1..].copy_from_slice(&len.to_be_bytes());
        self.inner.write_all(&header)?;
        self.inner.write_all(pcm)?;
        self.inner.flush()
    }

    pub fn write_samples(&mut self, samples: &[i16]) -> io::Result<()> {
        let pcm: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        self.write_data(&pcm)
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder() -> FrameDecoder {
        FrameDecoder::new(BufferPool::new(3), 1024)
    }

    fn encoded(format: AudioFormat, samples: &[i16]) -> Vec<u8> {
        let mut writer = FrameWriter::new(Vec::new());
        writer.write_format(format).unwrap();
        writer.write_samples(samples).unwrap();
        writer.into_inner()
    }

    #[test]
    fn byte_by_byte_feeding_yields_one_format_and_one_data() {
        let format = AudioFormat::new(2, 44_100).unwrap();
        let samples = [1i16, -1, 300, -300, i16::MAX, i16::MIN];
        let bytes = encoded(format, &samples);

        let mut decoder = decoder();
        let mut formats = Vec::new();
        let mut data = Vec::new();
        for byte in &bytes {
            decoder
                .feed(std::slice::from_ref(byte), &mut |frame| match frame {
                    Frame::Format(f) => formats.push(f),
                    Frame::Data(buffer) => data.push(buffer.samples().collect::<Vec<_>>()),
                })
                .unwrap();
        }

        assert_eq!(formats, vec![format]);
        assert_eq!(data, vec![samples.to_vec()]);
        assert!(decoder.at_boundary());
        assert!(decoder.finish().is_ok());
    }

    #[test]
    fn header_integers_are_big_endian() {
        let bytes = encoded(AudioFormat::new(1, 48_000).unwrap(), &[0x0102]);
        assert_eq!(&bytes[..6], &[1, 1, 0x00, 0x00, 0xbb, 0x80]);
        assert_eq!(&bytes[6..11], &[2, 0, 0, 0, 2]);
        assert_eq!(&bytes[11..], &[0x02, 0x01]);
    }

    #[test]
    fn unknown_opcode_is_fatal() {
        let mut decoder = decoder();
        let err = decoder.feed(&[9], &mut |_| {}).unwrap_err();
        assert_eq!(err, ProtocolError::UnknownOpcode(9));
    }

    #[test]
    fn eof_inside_frame_reports_missing_bytes() {
        let mut decoder = decoder();
        decoder.feed(&[OPCODE_DATA, 0, 0, 0, 4, 1], &mut |_| {}).unwrap();
        assert!(!decoder.at_boundary());
        assert_eq!(
            decoder.finish(),
            Err(ProtocolError::UnexpectedEof { missing: 3 })
        );
    }

    #[test]
    fn zero_channels_rejected() {
        let mut decoder = decoder();
        let err = decoder
            .feed(&[OPCODE_FORMAT, 0, 0, 0, 0xac, 0x44], &mut |_| {})
            .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidFormat { channels: 0, .. }));
    }

    #[test]
    fn oversized_frame_rejected() {
        let mut decoder = FrameDecoder::new(BufferPool::new(1), 16);
        let err = decoder
            .feed(&[OPCODE_DATA, 0, 0, 0, 17], &mut |_| {})
            .unwrap_err();
        assert_eq!(err, ProtocolError::FrameTooLarge { len: 17, max: 16 });
    }

    #[test]
    fn several_frames_in_one_chunk() {
        let format = AudioFormat::new(2, 22_050).unwrap();
        let mut writer = FrameWriter::new(Vec::new());
        writer.write_format(format).unwrap();
        writer.write_samples(&[1, 2]).unwrap();
        writer.write_data(&[]).unwrap();
        writer.write_samples(&[3, 4]).unwrap();
        let bytes = writer.into_inner();

        let mut decoder = decoder();
        let mut lens = Vec::new();
        decoder
            .feed(&bytes, &mut |frame| {
                if let Frame::Data(buffer) = frame {
                    lens.push(buffer.len());
                }
            })
            .unwrap();
        assert_eq!(lens, vec![4, 0, 4]);
    }
}

use crossbeam_channel::{Receiver, Sender};
use std::fmt;
use std::ops::Deref;
use std::time::Duration;

/// Fixed set of reusable PCM buffers.
///
/// The pool starts with `capacity` buffers; acquiring blocks while all of
/// them are in flight, which bounds how far the socket reader can run ahead
/// of the sink.
#[derive(Clone)]
pub struct BufferPool {
    free_tx: Sender<Vec<u8>>,
    free_rx: Receiver<Vec<u8>>,
    capacity: usize,
}

impl BufferPool {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (free_tx, free_rx) = crossbeam_channel::bounded(capacity);
        for _ in 0..capacity {
            let _ = free_tx.send(Vec::new());
        }
        Self {
            free_tx,
            free_rx,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.free_rx.len()
    }

    pub fn acquire(&self) -> PcmBuffer {
        // Both ends live in `self`, so the channel never disconnects.
        let data = self.free_rx.recv().unwrap_or_default();
        self.wrap(data)
    }

    pub fn try_acquire(&self) -> Option<PcmBuffer> {
        self.free_rx.try_recv().ok().map(|data| self.wrap(data))
    }

    pub fn acquire_timeout(&self, timeout: Duration) -> Option<PcmBuffer> {
        self.free_rx
            .recv_timeout(timeout)
            .ok()
            .map(|data| self.wrap(data))
    }

    fn wrap(&self, mut data: Vec<u8>) -> PcmBuffer {
        data.clear();
        PcmBuffer {
            data,
            home: Some(self.free_tx.clone()),
        }
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("capacity", &self.capacity)
            .field("available", &self.available())
            .finish()
    }
}

/// Owned block of interleaved 16-bit little-endian PCM.
///
/// Dropping a pooled buffer hands its storage back to the pool.
pub struct PcmBuffer {
    data: Vec<u8>,
    home: Option<Sender<Vec<u8>>>,
}

impl PcmBuffer {
    /// A buffer that belongs to no pool.
    pub fn detached(data: Vec<u8>) -> Self {
        Self { data, home: None }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Decodes the samples. A trailing odd byte is ignored.
    pub fn samples(&self) -> impl Iterator<Item = i16> + '_ {
        self.data
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
    }

    pub(crate) fn reserve_exact(&mut self, additional: usize) {
        self.data.reserve_exact(additional);
    }

    pub(crate) fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }
}

impl Deref for PcmBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl Drop for PcmBuffer {
    fn drop(&mut self) {
        if let Some(home) = self.home.take() {
            let _ = home.try_send(std::mem::take(&mut self.data));
        }
    }
}

impl fmt::Debug for PcmBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcmBuffer")
            .field("len", &self.data.len())
            .field("pooled", &self.home.is_some())
            .finish()
    }
}

use crossbeam_channel::{RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);

/// Collects items and hands them over in one batch once no new item has
/// arrived for `delay`.
///
/// Each arrival reschedules the flush. The flush runs on the debouncer's own
/// thread. Items still pending when the debouncer is dropped are flushed.
pub struct Debouncer<T: Send + 'static> {
    tx: Option<Sender<T>>,
    worker: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn new(
        label: &str,
        delay: Duration,
        flush: impl FnMut(Vec<T>) + Send + 'static,
    ) -> std::io::Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded::<T>();
        let worker = thread::Builder::new()
            .name(format!("debounce-{label}"))
            .spawn(move || {
                let mut flush = flush;
                let mut pending = Vec::new();
                loop {
                    if pending.is_empty() {
                        match rx.recv() {
                            Ok(item) => pending.push(item),
                            Err(_) => return,
                        }
                        continue;
                    }
                    match rx.recv_timeout(delay) {
                        Ok(item) => pending.push(item),
                        Err(RecvTimeoutError::Timeout) => flush(std::mem::take(&mut pending)),
                        Err(RecvTimeoutError::Disconnected) => {
                            flush(std::mem::take(&mut pending));
                            return;
                        }
                    }
                }
            })?;

        Ok(Self {
            tx: Some(tx),
            worker: Some(worker),
        })
    }

    pub fn push(&self, item: T) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(item);
        }
    }
}

impl<T: Send + 'static> Drop for Debouncer<T> {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            if worker.thread().id() != thread::current().id() {
                let _ = worker.join();
            }
        }
    }
}

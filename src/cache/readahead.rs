//! Background read-ahead worker.
//!
//! Modeled as a worker thread draining a bounded channel rather than a
//! kernel task plus counting semaphore: `std::sync::mpsc`'s
//! `sync_channel` gives us the same "bounded FIFO, signalled wakeup"
//! behavior without a bespoke semaphore type. A sentinel shutdown message
//! takes the place of a cancellation mechanism a kernel task would lack.

use std::sync::mpsc::{sync_channel, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::param::READ_AHEAD_QUEUE_DEPTH;

use super::CacheInner;

pub(super) enum ReadAheadMsg {
    Prefetch(u32),
    Shutdown,
}

pub(super) struct ReadAhead {
    tx: SyncSender<ReadAheadMsg>,
    worker: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ReadAhead {
    pub fn spawn(inner: Arc<CacheInner>) -> Self {
        let (tx, rx) = sync_channel(READ_AHEAD_QUEUE_DEPTH);
        let worker = std::thread::spawn(move || {
            while let Ok(msg) = rx.recv() {
                match msg {
                    ReadAheadMsg::Prefetch(sector) => {
                        // Advisory: a prefetch that races a shrinking device
                        // or hits a transient panic is simply dropped.
                        if sector < inner.device.num_sectors() {
                            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                                inner.read(sector, &mut [], 0, 0, 0);
                            }));
                            if let Err(panic) = result {
                                let msg = panic
                                    .downcast_ref::<&str>()
                                    .copied()
                                    .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
                                    .unwrap_or("<no message>");
                                eprintln!(
                                    "read-ahead: prefetch of sector {sector} panicked, dropping: {msg}"
                                );
                            }
                        }
                    }
                    ReadAheadMsg::Shutdown => break,
                }
            }
        });
        Self {
            tx,
            worker: std::sync::Mutex::new(Some(worker)),
        }
    }

    /// Enqueues a prefetch request; never blocks the caller. A full queue
    /// (the worker is behind) or a closed queue (already shut down) just
    /// drops the request, matching "errors in read-ahead are swallowed".
    pub fn request(&self, sector: u32) {
        let _ = self.tx.try_send(ReadAheadMsg::Prefetch(sector));
    }

    /// Sends the shutdown sentinel and waits for the worker to drain and
    /// exit.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ReadAheadMsg::Shutdown);
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

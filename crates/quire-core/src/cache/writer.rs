use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc::{channel, Receiver, RecvTimeoutError, Sender},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use thiserror::Error;
use tracing::debug;

use crate::{
    layout::{CachedLayout, LayoutKey},
    types::Resource,
};

use super::{CachePayload, CacheStore};

#[derive(Debug, Error)]
pub enum WriterError {
    #[error("cache writer timed out with {pending} jobs pending")]
    Timeout { pending: usize },
    #[error("cache writer thread is gone")]
    WorkerGone,
}

#[derive(Debug)]
pub enum CacheJob {
    StoreLayout {
        fingerprint: String,
        key: LayoutKey,
        layout: CachedLayout,
    },
    StorePayload {
        payload: Box<CachePayload>,
        resources: Vec<Resource>,
    },
}

/// Write-behind worker: jobs run in submission order on one thread.
pub struct CacheWriter {
    tx: Option<Sender<CacheJob>>,
    pending: Arc<AtomicUsize>,
    done_rx: Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

impl CacheWriter {
    pub fn spawn(store: CacheStore) -> Self {
        let (tx, rx) = channel::<CacheJob>();
        let (done_tx, done_rx) = channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&pending);
        let handle = thread::spawn(move || {
            for job in rx {
                run_job(&store, job);
                counter.fetch_sub(1, Ordering::SeqCst);
            }
            let _ = done_tx.send(());
        });
        Self {
            tx: Some(tx),
            pending,
            done_rx,
            handle: Some(handle),
        }
    }

    pub fn submit(&self, job: CacheJob) -> Result<(), WriterError> {
        let tx = self.tx.as_ref().ok_or(WriterError::WorkerGone)?;
        self.pending.fetch_add(1, Ordering::SeqCst);
        tx.send(job).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            WriterError::WorkerGone
        })
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Stop accepting jobs and wait up to `timeout` for the queue to drain.
    pub fn shutdown(mut self, timeout: Duration) -> Result<(), WriterError> {
        drop(self.tx.take());
        match self.done_rx.recv_timeout(timeout) {
            Ok(()) => {
                if let Some(handle) = self.handle.take() {
                    handle.join().map_err(|_| WriterError::WorkerGone)?;
                }
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => Err(WriterError::Timeout {
                pending: self.pending(),
            }),
            Err(RecvTimeoutError::Disconnected) => Err(WriterError::WorkerGone),
        }
    }
}

impl Drop for CacheWriter {
    fn drop(&mut self) {
        // Closing the channel lets the worker finish its queue and exit.
        self.tx.take();
    }
}

fn run_job(store: &CacheStore, job: CacheJob) {
    match job {
        CacheJob::StoreLayout {
            fingerprint,
            key,
            layout,
        } => {
            let ok = store.mutate_layouts(&fingerprint, |layouts| {
                layouts.insert(key, layout);
            });
            debug!(target: "cache", key = %key, ok, "layout written");
        }
        CacheJob::StorePayload { payload, resources } => {
            let ok = store.save_book(&payload, &resources);
            debug!(target: "cache", fingerprint = payload.fingerprint(), ok, "payload written");
        }
    }
}

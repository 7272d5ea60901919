//! Background threads with bounded queues and an explicit stop.
//!
//! [`WorkerPool`] runs jobs from a bounded channel on a fixed set of threads.
//! [`Ticker`] calls a closure on a fixed interval. Both stop and join their
//! threads in `shutdown` or on drop, so no background work outlives its owner.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use cluso_core::error::{Error, Result};

pub struct WorkerPool<J: Send + 'static> {
    name: String,
    sender: Option<SyncSender<J>>,
    handles: Vec<JoinHandle<()>>,
}

impl<J: Send + 'static> WorkerPool<J> {
    /// Spawn `threads` workers sharing a queue of at most `queue_bound` jobs.
    pub fn start<F>(name: &str, threads: usize, queue_bound: usize, handler: F) -> Result<Self>
    where
        F: Fn(J) + Send + Sync + 'static,
    {
        let (sender, receiver) = mpsc::sync_channel::<J>(queue_bound.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let handler = Arc::new(handler);

        let mut handles = Vec::with_capacity(threads.max(1));
        for n in 0..threads.max(1) {
            let receiver = Arc::clone(&receiver);
            let handler = Arc::clone(&handler);
            let handle = thread::Builder::new()
                .name(format!("{}-{}", name, n))
                .spawn(move || worker_loop(&receiver, handler.as_ref()))
                .map_err(|e| Error::io(format!("Failed to spawn {} worker", name), e))?;
            handles.push(handle);
        }

        debug!("Started {} {} worker(s)", handles.len(), name);
        Ok(Self {
            name: name.to_string(),
            sender: Some(sender),
            handles,
        })
    }

    /// Queue a job without blocking. Returns false when the queue is full or
    /// the pool is shutting down.
    pub fn submit(&self, job: J) -> bool {
        match &self.sender {
            Some(sender) => match sender.try_send(job) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => false,
                Err(TrySendError::Disconnected(_)) => false,
            },
            None => false,
        }
    }

    /// A handle for queueing jobs from elsewhere. Every clone must be dropped
    /// before [`Self::shutdown`] can join the workers.
    pub fn sender(&self) -> Option<SyncSender<J>> {
        self.sender.clone()
    }

    pub fn threads(&self) -> usize {
        self.handles.len()
    }

    /// Close the queue and wait for every worker to finish its current job.
    pub fn shutdown(&mut self) {
        // Dropping the sender ends each worker's recv loop once the queue drains.
        self.sender.take();
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                warn!("A {} worker panicked", self.name);
            }
        }
    }
}

impl<J: Send + 'static> Drop for WorkerPool<J> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop<J, F: Fn(J)>(receiver: &Mutex<Receiver<J>>, handler: &F) {
    loop {
        let job = {
            let receiver = receiver.lock();
            receiver.recv()
        };
        match job {
            Ok(job) => handler(job),
            Err(_) => break,
        }
    }
}

/// Calls a closure every `interval` until stopped.
pub struct Ticker {
    stop: Option<SyncSender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    pub fn start<F>(name: &str, interval: Duration, tick: F) -> Result<Self>
    where
        F: Fn() + Send + 'static,
    {
        let (stop, stopped) = mpsc::sync_channel::<()>(1);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || loop {
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => tick(),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(|e| Error::io(format!("Failed to spawn {} ticker", name), e))?;

        Ok(Self {
            stop: Some(stop),
            handle: Some(handle),
        })
    }

    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.try_send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Ticker thread panicked");
            }
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop();
    }
}

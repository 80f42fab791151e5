//! pool.rs
//! Fixed-size pool of named send threads fed by a crossbeam job queue.
//! - the thread count bounds how many batches drive the device at once
//! - a panicking job is caught so its thread keeps serving the queue
//! - shutdown() closes the queue without joining; threads exit once it is drained

use crossbeam::channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use std::{
    io,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread::{self, JoinHandle},
};
use log::{debug, error};

use crate::error::PoolError;

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct WorkerPool {
    queue: Mutex<Option<Sender<Job>>>,
    active: Arc<AtomicUsize>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize, name: &str) -> io::Result<Self> {
        let size = size.max(1);
        let (tx, rx) = unbounded::<Job>();
        let active = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::with_capacity(size);
        for id in 0..size {
            let rx = rx.clone();
            let active = active.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-{}", name, id))
                .spawn(move || worker_loop(id, rx, active))?;
            handles.push(handle);
        }

        Ok(Self {
            queue: Mutex::new(Some(tx)),
            active,
            handles: Mutex::new(handles),
            size,
        })
    }

    pub fn submit<F>(&self, job: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        let queue = self.queue.lock();
        let tx = queue.as_ref().ok_or(PoolError::Closed)?;
        tx.send(Box::new(job)).map_err(|_| PoolError::Closed)
    }

    /// Stop accepting jobs. Running and already-queued jobs are not waited for.
    pub fn shutdown(&self) {
        if self.queue.lock().take().is_some() {
            debug!("[WorkerPool] queue closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.queue.lock().is_none()
    }

    /// Jobs currently executing.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Close the queue and wait for every thread to exit.
    pub fn join(&self) {
        self.shutdown();
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for h in handles {
            let _ = h.join();
        }
    }
}

fn worker_loop(id: usize, rx: Receiver<Job>, active: Arc<AtomicUsize>) {
    while let Ok(job) = rx.recv() {
        active.fetch_add(1, Ordering::AcqRel);
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            error!("[WorkerPool] job panicked on worker {}", id);
        }
        active.fetch_sub(1, Ordering::AcqRel);
    }
    debug!("[WorkerPool] worker {} exiting", id);
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

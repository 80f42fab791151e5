//! send_worker.rs
//! Runs submitted batches on a bounded pool of send threads.
//!
//! - newest sender wins: submitting a batch for a key cancels the batch already
//!   running under that key before the new one is scheduled
//! - cancellation is cooperative and checked at pass boundaries, so a pass that
//!   has started always finishes
//! - each sent frame is also broadcast on the bus so local subscribers see outbound traffic
//! - device errors stay inside their batch and surface as `SendOutcome::Failed`

use std::{
    io,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    time::Duration,
};

use log::{debug, info, warn};
use spin_sleep::{SpinSleeper, SpinStrategy};

use crate::{
    bus::EventBus,
    device::CanDevice,
    dispatch::{
        handle::{SendHandle, SendOutcome},
        pool::WorkerPool,
        registry::SendRegistry,
    },
    error::{DeviceError, SubmitError},
    frame::{Batch, DispatchControl, LoopCount},
    utils::{
        config::SendErrorPolicy,
        stats::DispatchStats,
        trace::{FrameRecorder, TraceEvent},
    },
};

pub struct BatchSendWorker {
    device: Arc<dyn CanDevice>,
    bus: Arc<dyn EventBus>,
    pool: WorkerPool,
    registry: Arc<SendRegistry>,
    stats: Arc<DispatchStats>,
    recorder: Option<Arc<FrameRecorder>>,
    policy: SendErrorPolicy,
}

impl BatchSendWorker {
    pub fn new(
        device: Arc<dyn CanDevice>,
        bus: Arc<dyn EventBus>,
        pool_size: usize,
        policy: SendErrorPolicy,
    ) -> io::Result<Self> {
        Ok(Self {
            device,
            bus,
            pool: WorkerPool::new(pool_size, "canbox-send")?,
            registry: Arc::new(SendRegistry::new()),
            stats: Arc::new(DispatchStats::new()),
            recorder: None,
            policy,
        })
    }

    pub fn with_stats(mut self, stats: Arc<DispatchStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<FrameRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Submit a batch under its own control token.
    pub fn send(&self, mut batch: Batch) -> Result<SendHandle, SubmitError> {
        batch.validate()?;
        if self.pool.is_closed() {
            return Err(SubmitError::PoolClosed);
        }
        let key = batch.key().ok_or(SubmitError::EmptyBatch)?;
        // Per-submission token: pre-empting this run never touches a group
        // token shared with other submissions.
        let control = batch.submission_control();
        batch.attach_control(&control);

        let handle = SendHandle::new(
            self.registry.next_token(),
            key,
            control,
            Arc::downgrade(&self.registry),
        );

        if let Some(previous) = self.registry.replace(key, handle.clone()) {
            if previous.control().cancel() {
                self.stats.record_preemption();
                info!(
                    "[SendWorker] 0x{:X}: pre-empted batch #{} with #{}",
                    key,
                    previous.token(),
                    handle.token()
                );
            }
        }

        let run = BatchRun {
            batch,
            handle: handle.clone(),
            device: self.device.clone(),
            bus: self.bus.clone(),
            registry: self.registry.clone(),
            stats: self.stats.clone(),
            recorder: self.recorder.clone(),
            policy: self.policy,
        };

        if let Err(e) = self.pool.submit(move || run.execute()) {
            self.registry.remove_if_current(key, handle.token());
            handle.control().cancel();
            handle.finish(SendOutcome::Cancelled);
            return Err(e.into());
        }

        debug!("[SendWorker] 0x{:X}: submitted batch #{}", key, handle.token());
        Ok(handle)
    }

    /// Submit a batch under an externally supplied token, e.g. to group batches
    /// that should be stopped together.
    pub fn send_with_control(
        &self,
        batch: Batch,
        control: Arc<DispatchControl>,
    ) -> Result<SendHandle, SubmitError> {
        self.send(batch.with_control(control))
    }

    /// Tear down: cancel every registered batch and close the pool without
    /// waiting for running tasks.
    pub fn kill(&self) {
        // Close first: a send racing with us either lands in the registry
        // before the drain or fails to submit and rolls itself back.
        self.pool.shutdown();
        let handles = self.registry.drain();
        for handle in &handles {
            handle.control().cancel();
        }
        info!("[SendWorker] killed, {} batch(es) cancelled", handles.len());
    }

    pub fn handle(&self, key: u32) -> Option<SendHandle> {
        self.registry.get(key)
    }

    /// Keys with a batch currently registered.
    pub fn active_keys(&self) -> Vec<u32> {
        self.registry.keys()
    }

    pub fn registry(&self) -> &SendRegistry {
        &self.registry
    }

    pub fn stats(&self) -> &Arc<DispatchStats> {
        &self.stats
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }
}

impl Drop for BatchSendWorker {
    fn drop(&mut self) {
        if !self.pool.is_closed() {
            self.kill();
        }
    }
}

/// Everything one pool thread needs to drive a batch.
struct BatchRun {
    batch: Batch,
    handle: SendHandle,
    device: Arc<dyn CanDevice>,
    bus: Arc<dyn EventBus>,
    registry: Arc<SendRegistry>,
    stats: Arc<DispatchStats>,
    recorder: Option<Arc<FrameRecorder>>,
    policy: SendErrorPolicy,
}

impl BatchRun {
    fn execute(self) {
        self.handle.mark_running();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.run_passes()))
            .unwrap_or_else(|_| SendOutcome::Failed("send loop panicked".into()));

        let key = self.handle.key();
        match &outcome {
            SendOutcome::Completed => {
                self.stats.record_completed();
                debug!(
                    "[SendWorker] 0x{:X}: batch #{} completed after {} pass(es)",
                    key,
                    self.handle.token(),
                    self.handle.passes_completed()
                );
            }
            SendOutcome::Cancelled => {
                self.stats.record_cancelled();
                debug!("[SendWorker] 0x{:X}: batch #{} cancelled", key, self.handle.token());
            }
            SendOutcome::Failed(reason) => {
                self.stats.record_failed();
                warn!("[SendWorker] 0x{:X}: batch #{} failed: {}", key, self.handle.token(), reason);
            }
        }
        if let Some(rec) = &self.recorder {
            rec.record(TraceEvent::BatchFinished { key, outcome: outcome.to_string() });
        }

        // Leave the registry before waking waiters.
        self.registry.remove_if_current(key, self.handle.token());
        self.handle.finish(outcome);
    }

    fn run_passes(&self) -> SendOutcome {
        let control = self.handle.control();
        let mut passes: u64 = 0;
        loop {
            if let LoopCount::Times(n) = self.batch.loop_count {
                if passes >= n as u64 {
                    return SendOutcome::Completed;
                }
            }
            if control.is_cancelled() {
                return SendOutcome::Cancelled;
            }
            if let Err(e) = self.send_pass() {
                return SendOutcome::Failed(e.to_string());
            }
            passes += 1;
            self.handle.record_pass();

            // Wakes early on cancel; the next iteration decides what that means.
            control.sleep(self.batch.loop_interval);
        }
    }

    /// One pass: every message in order, each repeated `count` times.
    fn send_pass(&self) -> Result<(), DeviceError> {
        let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);

        for msg in &self.batch.messages {
            for repeat in 0..msg.count {
                if repeat > 0 && msg.interval > Duration::ZERO {
                    sleeper.sleep(msg.interval);
                }
                match self.device.send(msg) {
                    Ok(()) => {
                        self.stats.record_sent(msg.id);
                        self.handle.record_frame();
                        if let Some(rec) = &self.recorder {
                            rec.record(TraceEvent::tx(msg));
                        }
                        self.bus.broadcast_msg(msg);
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        self.stats.record_send_error();
                        if let Some(rec) = &self.recorder {
                            rec.record(TraceEvent::TxError { id: msg.id, reason: e.to_string() });
                        }
                        match self.policy {
                            SendErrorPolicy::LogAndContinue => {
                                warn!("[SendWorker] {} not sent: {}", msg, e);
                            }
                            SendErrorPolicy::AbortBatch => return Err(e),
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

//! ConcurrentCanBox: one adapter, a pooled sender and a background receiver.
//!
//! Lifecycle calls report success as `bool` and log the device error, matching
//! how callers drive an adapter interactively. Batch submission returns a
//! `Result` so validation failures reach the caller.

use std::{io, sync::Arc};

use log::{error, info, warn};

use crate::{
    bus::EventBus,
    device::CanDevice,
    dispatch::{BatchSendWorker, SendHandle},
    error::{DeviceError, SubmitError},
    frame::Batch,
    receive::{BatchReceiveWorker, ReceiveState},
    utils::{
        config::CanBoxConfig,
        stats::{DispatchStats, StatsSnapshot},
        trace::FrameRecorder,
    },
};

pub struct ConcurrentCanBox {
    device: Arc<dyn CanDevice>,
    sender: BatchSendWorker,
    receiver: BatchReceiveWorker,
    stats: Arc<DispatchStats>,
    recorder: Option<Arc<FrameRecorder>>,
    config: CanBoxConfig,
}

impl ConcurrentCanBox {
    pub fn new(
        device: Arc<dyn CanDevice>,
        bus: Arc<dyn EventBus>,
        config: CanBoxConfig,
    ) -> io::Result<Self> {
        config
            .validate()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;

        let stats = Arc::new(DispatchStats::new());

        let recorder = match &config.trace_csv {
            Some(path) => {
                let recorder = Arc::new(FrameRecorder::new());
                recorder
                    .start_exporter(path.clone())
                    .map_err(io::Error::other)?;
                info!("[CanBox] tracing frames to {:?}", path);
                Some(recorder)
            }
            None => None,
        };

        let mut sender = BatchSendWorker::new(
            device.clone(),
            bus.clone(),
            config.pool_size,
            config.send_error_policy,
        )?
        .with_stats(stats.clone());

        let mut receiver = BatchReceiveWorker::new(
            device.clone(),
            bus,
            config.receive_timeout(),
            config.receive_error_policy,
        )
        .with_priority(config.elevate_receive_priority)
        .with_stats(stats.clone());

        if let Some(rec) = &recorder {
            sender = sender.with_recorder(rec.clone());
            receiver = receiver.with_recorder(rec.clone());
        }

        Ok(Self {
            device,
            sender,
            receiver,
            stats,
            recorder,
            config,
        })
    }

    pub fn open(&self) -> bool {
        report("open", self.device.open())
    }

    pub fn open_channel(&self) -> bool {
        report("open_channel", self.device.open_channel())
    }

    pub fn close_channel(&self) -> bool {
        report("close_channel", self.device.close_channel())
    }

    pub fn close(&self) -> bool {
        report("close", self.device.close())
    }

    pub fn send(&self, batch: Batch) -> Result<SendHandle, SubmitError> {
        self.sender.send(batch)
    }

    pub fn receive(&self) -> bool {
        self.receiver.receive()
    }

    pub fn stop_receiving(&self) {
        self.receiver.stop_receiving();
    }

    pub fn receive_state(&self) -> ReceiveState {
        self.receiver.state()
    }

    /// Cancel every running batch and close the send pool.
    pub fn kill(&self) {
        self.sender.kill();
    }

    /// Stop everything: receive loop, send pool, channel, device, trace exporter.
    pub fn shutdown(&self) {
        self.receiver.stop_receiving();
        self.sender.kill();
        self.receiver.join();
        if self.device.close_channel().is_err() || self.device.close().is_err() {
            warn!("[CanBox] device did not close cleanly");
        }
        if let Some(rec) = &self.recorder {
            rec.stop();
        }
        info!("[CanBox] shut down: {:?}", self.stats.snapshot());
    }

    pub fn sender(&self) -> &BatchSendWorker {
        &self.sender
    }

    pub fn receiver(&self) -> &BatchReceiveWorker {
        &self.receiver
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn config(&self) -> &CanBoxConfig {
        &self.config
    }
}

impl Drop for ConcurrentCanBox {
    fn drop(&mut self) {
        self.receiver.stop_receiving();
        self.sender.kill();
        if let Some(rec) = &self.recorder {
            rec.stop();
        }
    }
}

fn report(op: &str, result: Result<(), DeviceError>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            error!("[CanBox] {} failed: {}", op, e);
            false
        }
    }
}

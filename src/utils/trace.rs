//! trace.rs
//! Frame trace recorder with background CSV export.
//!
//! - `record()` pushes into a bounded lock-free queue and never blocks the caller;
//!   events are dropped (and counted) when the queue is full
//! - `start_exporter()` spawns a consumer that drains the queue in batches and writes one CSV row per event
//! - `stop()` drains what is left, flushes and joins the consumer

use std::{
    fs::{File, create_dir_all},
    io::BufWriter,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam_queue::ArrayQueue;
use csv::Writer;
use log::{debug, error};
use parking_lot::Mutex;
use serde::Serialize;

use crate::frame::CanMessage;

const TRACE_CAPACITY: usize = 16_384;
const EXPORTER_POLL_MS: u64 = 5;
const DRAIN_BATCH: usize = 256;
const FLUSH_BATCHES: usize = 8;

#[derive(Debug, Clone)]
pub enum TraceEvent {
    Tx { id: u32, data: Vec<u8> },
    Rx { id: u32, data: Vec<u8> },
    TxError { id: u32, reason: String },
    BatchFinished { key: u32, outcome: String },
}

impl TraceEvent {
    pub fn tx(msg: &CanMessage) -> Self {
        TraceEvent::Tx { id: msg.id, data: msg.data.clone() }
    }

    pub fn rx(msg: &CanMessage) -> Self {
        TraceEvent::Rx { id: msg.id, data: msg.data.clone() }
    }
}

#[derive(Debug, Clone)]
struct RawTrace {
    seq: u64,
    ts: Instant,
    event: TraceEvent,
}

#[derive(Debug, Serialize)]
struct CsvRow {
    seq: u64,
    ts_us: u64,
    direction: &'static str,
    id: String,
    dlc: usize,
    data: String,
    note: String,
}

impl RawTrace {
    fn to_row(&self, run_start: Instant) -> CsvRow {
        let ts_us = self.ts.saturating_duration_since(run_start).as_micros() as u64;
        let hex = |data: &[u8]| {
            data.iter().map(|b| format!("{:02X}", b)).collect::<Vec<_>>().join(" ")
        };
        let (direction, id, dlc, data, note) = match &self.event {
            TraceEvent::Tx { id, data } => ("tx", *id, data.len(), hex(data), String::new()),
            TraceEvent::Rx { id, data } => ("rx", *id, data.len(), hex(data), String::new()),
            TraceEvent::TxError { id, reason } => ("tx_error", *id, 0, String::new(), reason.clone()),
            TraceEvent::BatchFinished { key, outcome } => ("batch", *key, 0, String::new(), outcome.clone()),
        };
        CsvRow {
            seq: self.seq,
            ts_us,
            direction,
            id: format!("0x{:X}", id),
            dlc,
            data,
            note,
        }
    }
}

pub struct FrameRecorder {
    queue: Arc<ArrayQueue<RawTrace>>,
    run_start: Instant,
    seq: AtomicU64,
    dropped: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    exporter: Mutex<Option<JoinHandle<()>>>,
}

impl FrameRecorder {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(ArrayQueue::new(TRACE_CAPACITY)),
            run_start: Instant::now(),
            seq: AtomicU64::new(1),
            dropped: Arc::new(AtomicU64::new(0)),
            running: Arc::new(AtomicBool::new(false)),
            exporter: Mutex::new(None),
        }
    }

    #[inline]
    pub fn record(&self, event: TraceEvent) {
        let raw = RawTrace {
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            ts: Instant::now(),
            event,
        };
        if self.queue.push(raw).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn start_exporter(&self, output_csv: PathBuf) -> Result<(), String> {
        let mut slot = self.exporter.lock();
        if slot.is_some() {
            return Err("trace exporter already running".into());
        }
        if let Some(dir) = output_csv.parent().filter(|d| !d.as_os_str().is_empty()) {
            create_dir_all(dir).map_err(|e| format!("failed to create {:?}: {}", dir, e))?;
        }
        let file = File::create(&output_csv)
            .map_err(|e| format!("failed to create trace csv {:?}: {}", output_csv, e))?;

        let queue = self.queue.clone();
        let running = self.running.clone();
        let dropped = self.dropped.clone();
        let run_start = self.run_start;
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("canbox-trace".into())
            .spawn(move || {
                let mut wtr = Writer::from_writer(BufWriter::new(file));
                let mut flush_counter = 0usize;

                while running.load(Ordering::SeqCst) {
                    let mut any = false;
                    for _ in 0..DRAIN_BATCH {
                        match queue.pop() {
                            Some(raw) => {
                                any = true;
                                if let Err(e) = wtr.serialize(raw.to_row(run_start)) {
                                    error!("[FrameRecorder] write failed: {}", e);
                                }
                            }
                            None => break,
                        }
                    }
                    if any {
                        flush_counter += 1;
                        if flush_counter >= FLUSH_BATCHES {
                            wtr.flush().ok();
                            flush_counter = 0;
                        }
                    } else {
                        thread::sleep(Duration::from_millis(EXPORTER_POLL_MS));
                    }
                }

                while let Some(raw) = queue.pop() {
                    wtr.serialize(raw.to_row(run_start)).ok();
                }
                wtr.flush().ok();
                debug!(
                    "[FrameRecorder] exporter exiting. dropped={}",
                    dropped.load(Ordering::Relaxed)
                );
            })
            .map_err(|e| format!("failed to spawn trace exporter: {}", e))?;

        *slot = Some(handle);
        Ok(())
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.exporter.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Default for FrameRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for FrameRecorder {
    fn drop(&mut self) {
        self.stop();
    }
}

//! # canbox demo
//! Drives a loopback virtual adapter through the full dispatch engine:
//!
//! - **Heartbeat:** 0x100, infinite, pre-empted halfway by a new heartbeat on the same ID.
//! - **Burst:** 0x200, 5 repeats at 2 ms, 3 passes.
//! - **Noise:** 0x300, random payloads, 10 passes.
//! - **Receive:** loopback frames come back through the receive worker onto the bus.
//! - **Keys:** lines typed on stdin are broadcast as key events; `q` ends the run early.
//!
//! Usage: `canbox-demo [config.toml]`. Set `RUST_LOG=debug` for per-batch logs.

use canbox::{
    Batch, BusEvent, CanBoxConfig, CanMessage, ChannelBus, ChannelKeySource, ConcurrentCanBox,
    DispatchControl, KeyEvent, KeyWorker, LoopCount, SubmitError, VirtualCanDevice,
};
use crossbeam::channel::Receiver;
use log::{error, info};
use rand::random_range;
use std::{
    collections::BTreeMap,
    env,
    io::{BufRead, stdin},
    process::ExitCode,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

const DEMO_DURATION: Duration = Duration::from_secs(3);
const FRAME_TIME: Duration = Duration::from_micros(200);

fn main() -> ExitCode {
    env_logger::init();

    let config = match env::args().nth(1) {
        Some(path) => match CanBoxConfig::load(&path) {
            Ok(config) => config,
            Err(e) => {
                error!("{}", e);
                return ExitCode::FAILURE;
            }
        },
        None => CanBoxConfig::default(),
    };
    info!("=== CANBOX DEMO START === {:?}", config);

    let device = Arc::new(VirtualCanDevice::loopback().with_frame_time(FRAME_TIME));
    let bus = Arc::new(ChannelBus::new());
    let events = bus.subscribe(config.bus_capacity);

    let canbox = match ConcurrentCanBox::new(device.clone(), bus.clone(), config.clone()) {
        Ok(canbox) => canbox,
        Err(e) => {
            error!("failed to start: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if !(canbox.open() && canbox.open_channel()) {
        return ExitCode::FAILURE;
    }
    canbox.receive();

    let (key_tx, key_source) = ChannelKeySource::pair();
    let keys = KeyWorker::new(Arc::new(key_source), bus.clone(), config.key_timeout());
    keys.start();
    thread::spawn(move || {
        for line in stdin().lock().lines().map_while(Result::ok) {
            if key_tx.send(KeyEvent::new(line.trim())).is_err() {
                break;
            }
        }
    });

    let result = run_scenario(&canbox, &events);

    keys.stop();
    canbox.shutdown();

    match result {
        Ok(summary) => {
            for (id, (tx, rx)) in &summary {
                println!("0x{:03X}: bus saw {} outbound, {} inbound", id, tx, rx);
            }
            println!("{:#?}", canbox.stats());
            info!("=== CANBOX DEMO FINISHED ===");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// Submit the demo batches and tally bus traffic per ID until the run ends.
/// Outbound copies carry the sending batch's tagged control; inbound ones an untagged fresh one.
fn run_scenario(
    canbox: &ConcurrentCanBox,
    events: &Receiver<BusEvent>,
) -> Result<BTreeMap<u32, (u64, u64)>, SubmitError> {
    let heartbeat = canbox.send(
        Batch::new(vec![CanMessage::new(0x100, [0x01])])
            .looping(LoopCount::Infinite)
            .loop_interval(Duration::from_millis(100))
            .with_control(tagged("heartbeat")),
    )?;

    let burst = canbox.send(
        Batch::new(vec![
            CanMessage::new(0x200, [0xB0, 0x00]).with_repeat(5, Duration::from_millis(2)),
            CanMessage::new(0x201, [0xB0, 0x01]),
        ])
        .looping(LoopCount::Times(3))
        .loop_interval(Duration::from_millis(20))
        .with_control(tagged("burst")),
    )?;

    let noise: Vec<CanMessage> = (0..4)
        .map(|_| CanMessage::new(0x300, (0..8).map(|_| random_range(0..=u8::MAX)).collect::<Vec<u8>>()))
        .collect();
    let noise = canbox.send(
        Batch::new(noise)
            .looping(LoopCount::Times(10))
            .loop_interval(Duration::from_millis(5))
            .with_control(tagged("noise")),
    )?;

    let mut summary: BTreeMap<u32, (u64, u64)> = BTreeMap::new();
    let start = Instant::now();
    let mut preempted = false;

    while start.elapsed() < DEMO_DURATION {
        if !preempted && start.elapsed() >= DEMO_DURATION / 2 {
            // Same ID: the running heartbeat is cancelled before this one starts.
            canbox.send(
                Batch::new(vec![CanMessage::new(0x100, [0x02])])
                    .looping(LoopCount::Infinite)
                    .loop_interval(Duration::from_millis(50))
                    .with_control(tagged("heartbeat")),
            )?;
            preempted = true;
        }

        match events.recv_timeout(Duration::from_millis(20)) {
            Ok(BusEvent::Frame(msg)) => {
                let entry = summary.entry(msg.id).or_default();
                match msg.control.as_ref().and_then(|c| c.send_from()) {
                    Some(_) => entry.0 += 1,
                    None => entry.1 += 1,
                }
            }
            Ok(BusEvent::Key(key)) => {
                info!("key: {:?}", key.key);
                if key.key == "q" {
                    break;
                }
            }
            Err(_) => {}
        }
    }

    info!(
        "heartbeat #1 {:?}, burst {:?}, noise {:?}",
        heartbeat.outcome(),
        burst.after(Duration::from_millis(500)),
        noise.after(Duration::from_millis(500))
    );
    Ok(summary)
}

fn tagged(sender: &str) -> Arc<DispatchControl> {
    Arc::new(DispatchControl::tagged(sender))
}

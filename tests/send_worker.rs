mod helpers;

use canbox::{
    Batch, BatchSendWorker, CanDevice, CanMessage, DispatchControl, LoopCount, SendErrorPolicy,
    SendOutcome, SendState, SubmitError, VirtualCanDevice,
};
use helpers::{RecordingBus, wait_for};
use std::{sync::Arc, time::Duration};

const WAIT: Option<Duration> = Some(Duration::from_secs(5));

fn setup(frame_time: Duration) -> (Arc<VirtualCanDevice>, Arc<RecordingBus>, BatchSendWorker) {
    let device = Arc::new(VirtualCanDevice::new().with_frame_time(frame_time));
    device.open().unwrap();
    device.open_channel().unwrap();
    let bus = Arc::new(RecordingBus::default());
    let worker =
        BatchSendWorker::new(device.clone(), bus.clone(), 11, SendErrorPolicy::LogAndContinue)
            .unwrap();
    (device, bus, worker)
}

fn sent_by(msg: &CanMessage, control: &Arc<DispatchControl>) -> bool {
    msg.control.as_ref().is_some_and(|c| Arc::ptr_eq(c, control))
}

#[test]
fn newer_batch_preempts_older_on_same_id() {
    let (device, _bus, worker) = setup(Duration::from_millis(1));
    let old = worker
        .send(
            Batch::new(vec![CanMessage::new(0x10, [0xAA])])
                .looping(LoopCount::Infinite)
                .loop_interval(Duration::from_millis(2)),
        )
        .unwrap();
    assert!(wait_for(|| old.frames_sent() >= 3));

    let new = worker
        .send(Batch::new(vec![CanMessage::new(0x10, [0xBB])]).looping(LoopCount::Times(5)))
        .unwrap();

    assert_eq!(old.wait(WAIT), Some(SendOutcome::Cancelled));
    assert_eq!(new.wait(WAIT), Some(SendOutcome::Completed));

    // At most the old batch's in-flight frame may land after the new one starts.
    let log = device.sent();
    let first_new = log.iter().position(|m| sent_by(m, new.control())).unwrap();
    let old_after = log[first_new..].iter().filter(|m| sent_by(m, old.control())).count();
    assert!(old_after <= 1, "old sender kept transmitting: {} frames", old_after);
    assert_eq!(log.iter().filter(|m| sent_by(m, new.control())).count(), 5);
    assert_eq!(worker.stats().snapshot().preemptions, 1);
    assert!(worker.handle(0x10).is_none());
}

#[test]
fn registry_holds_one_entry_per_id() {
    let (_device, _bus, worker) = setup(Duration::ZERO);
    let handles: Vec<_> = (0..5u8)
        .map(|i| {
            worker
                .send(
                    Batch::new(vec![CanMessage::new(0x20, [i])])
                        .looping(LoopCount::Infinite)
                        .loop_interval(Duration::from_millis(5)),
                )
                .unwrap()
        })
        .collect();

    assert_eq!(worker.active_keys(), vec![0x20]);
    let live = worker.handle(0x20).unwrap();
    assert_eq!(live.token(), handles[4].token());

    for h in &handles[..4] {
        assert_eq!(h.wait(WAIT), Some(SendOutcome::Cancelled));
    }
    live.stop_sending();
    assert_eq!(live.wait(WAIT), Some(SendOutcome::Cancelled));
    assert!(worker.active_keys().is_empty());
}

#[test]
fn pass_sends_messages_in_declared_order() {
    let (device, _bus, worker) = setup(Duration::ZERO);
    let handle = worker
        .send(
            Batch::new(vec![CanMessage::new(0x1, [1]), CanMessage::new(0x2, [2])])
                .looping(LoopCount::Times(4))
                .stream_key(0x99),
        )
        .unwrap();
    assert_eq!(handle.wait(WAIT), Some(SendOutcome::Completed));
    let ids: Vec<u32> = device.sent().iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![1, 2, 1, 2, 1, 2, 1, 2]);
    assert_eq!(handle.key(), 0x99);
}

#[test]
fn finite_batch_completes_despite_late_cancel() {
    let (device, _bus, worker) = setup(Duration::from_millis(15));
    let handle = worker
        .send(
            Batch::new(vec![CanMessage::new(0x30, [1]), CanMessage::new(0x31, [2])])
                .looping(LoopCount::Times(3)),
        )
        .unwrap();

    // Fifth frame done: the third and last pass is under way.
    assert!(wait_for(|| handle.frames_sent() >= 5));
    handle.stop_sending();

    assert_eq!(handle.wait(WAIT), Some(SendOutcome::Completed));
    assert_eq!(handle.passes_completed(), 3);
    assert_eq!(device.sent_count(), 6);
}

#[test]
fn infinite_batch_finishes_current_pass_when_cancelled() {
    let (device, bus, worker) = setup(Duration::from_millis(10));
    let handle = worker
        .send(
            Batch::new(vec![
                CanMessage::new(0x40, [1]),
                CanMessage::new(0x41, [2]),
                CanMessage::new(0x42, [3]),
            ])
            .looping(LoopCount::Infinite),
        )
        .unwrap();

    assert!(wait_for(|| handle.frames_sent() >= 4));
    handle.stop_sending();
    assert_eq!(handle.wait(WAIT), Some(SendOutcome::Cancelled));

    let sent = device.sent_count();
    assert_eq!(sent % 3, 0, "pass aborted midway after {} frames", sent);
    assert_eq!(handle.passes_completed() * 3, sent);
    assert_eq!(bus.frame_count() as u64, sent);
}

#[test]
fn loop_interval_sleep_is_cut_short_by_cancel() {
    let (_device, _bus, worker) = setup(Duration::ZERO);
    let handle = worker
        .send(
            Batch::new(vec![CanMessage::new(0x50, [1])])
                .looping(LoopCount::Infinite)
                .loop_interval(Duration::from_secs(30)),
        )
        .unwrap();
    assert!(wait_for(|| handle.passes_completed() == 1));
    handle.stop_sending();
    assert_eq!(handle.wait(Some(Duration::from_secs(2))), Some(SendOutcome::Cancelled));
}

#[test]
fn stop_sending_is_idempotent() {
    let (_device, _bus, worker) = setup(Duration::ZERO);
    let handle = worker
        .send(
            Batch::new(vec![CanMessage::new(0x60, [1])])
                .looping(LoopCount::Infinite)
                .loop_interval(Duration::from_millis(1)),
        )
        .unwrap();
    handle.stop_sending();
    handle.stop_sending();
    assert_eq!(handle.wait(WAIT), Some(SendOutcome::Cancelled));
    handle.stop_sending();
    assert_eq!(handle.state(), SendState::Cancelled);
    assert!(worker.handle(0x60).is_none());
}

#[test]
fn stop_after_lets_batch_run_then_cancels() {
    let (device, _bus, worker) = setup(Duration::ZERO);
    let handle = worker
        .send(
            Batch::new(vec![CanMessage::new(0x70, [1])])
                .looping(LoopCount::Infinite)
                .loop_interval(Duration::from_millis(5)),
        )
        .unwrap();
    assert_eq!(handle.stop_after(Duration::from_millis(50)), Some(SendOutcome::Cancelled));
    assert!(device.sent_for(0x70) >= 2);

    let quick = worker.send(Batch::new(vec![CanMessage::new(0x71, [1])])).unwrap();
    assert_eq!(quick.stop_after(Duration::from_secs(5)), Some(SendOutcome::Completed));
}

#[test]
fn shared_control_stops_grouped_batches() {
    let (_device, _bus, worker) = setup(Duration::ZERO);
    let group = Arc::new(DispatchControl::tagged("group"));
    let infinite = |id: u32| {
        Batch::new(vec![CanMessage::new(id, [1])])
            .looping(LoopCount::Infinite)
            .loop_interval(Duration::from_millis(2))
    };
    let a = worker.send_with_control(infinite(0x80), group.clone()).unwrap();
    let b = worker.send_with_control(infinite(0x81), group.clone()).unwrap();
    group.cancel();
    assert_eq!(a.wait(WAIT), Some(SendOutcome::Cancelled));
    assert_eq!(b.wait(WAIT), Some(SendOutcome::Cancelled));
    assert_eq!(a.control().send_from(), Some("group"));
}

#[test]
fn invalid_batches_fail_fast() {
    let (device, _bus, worker) = setup(Duration::ZERO);
    assert_eq!(worker.send(Batch::new(vec![])).unwrap_err(), SubmitError::EmptyBatch);
    let zero = Batch::new(vec![CanMessage::new(0x90, [1]).with_repeat(0, Duration::ZERO)]);
    assert_eq!(worker.send(zero).unwrap_err(), SubmitError::ZeroRepeat { id: 0x90 });
    assert!(worker.registry().is_empty());
    assert_eq!(device.sent_count(), 0);
}

#[test]
fn kill_cancels_running_batches_and_refuses_new_ones() {
    let (_device, _bus, worker) = setup(Duration::ZERO);
    let handles: Vec<_> = (0xA0..0xA4)
        .map(|id| {
            worker
                .send(
                    Batch::new(vec![CanMessage::new(id, [1])])
                        .looping(LoopCount::Infinite)
                        .loop_interval(Duration::from_millis(2)),
                )
                .unwrap()
        })
        .collect();
    worker.kill();
    for h in &handles {
        assert_eq!(h.wait(WAIT), Some(SendOutcome::Cancelled));
    }
    assert!(worker.active_keys().is_empty());
    assert_eq!(
        worker.send(Batch::new(vec![CanMessage::new(0xA0, [1])])).unwrap_err(),
        SubmitError::PoolClosed
    );
}

#[test]
fn independent_ids_run_concurrently() {
    let (device, _bus, worker) = setup(Duration::from_millis(5));
    let handles: Vec<_> = (0..8u32)
        .map(|i| {
            worker
                .send(Batch::new(vec![CanMessage::new(0x100 + i, [i as u8])]).looping(LoopCount::Times(4)))
                .unwrap()
        })
        .collect();
    for h in &handles {
        assert_eq!(h.wait(WAIT), Some(SendOutcome::Completed));
    }
    for i in 0..8u32 {
        assert_eq!(device.sent_for(0x100 + i), 4);
    }
    let snap = worker.stats().snapshot();
    assert_eq!(snap.frames_sent, 32);
    assert_eq!(snap.batches_completed, 8);
}

#[test]
fn resending_a_cloned_batch_preempts_only_the_old_run() {
    let (device, _bus, worker) = setup(Duration::ZERO);
    let template = Batch::new(vec![CanMessage::new(0x10, [0x11])])
        .looping(LoopCount::Infinite)
        .loop_interval(Duration::from_millis(2));

    let old = worker.send(template.clone()).unwrap();
    assert!(wait_for(|| old.frames_sent() >= 1));
    let new = worker.send(template.clone().looping(LoopCount::Times(3))).unwrap();

    assert!(!Arc::ptr_eq(old.control(), new.control()));
    assert_eq!(old.wait(WAIT), Some(SendOutcome::Cancelled));
    assert_eq!(new.wait(WAIT), Some(SendOutcome::Completed));
    assert_eq!(new.frames_sent(), 3);
    assert_eq!(device.sent().iter().filter(|m| sent_by(m, new.control())).count(), 3);
}

#[test]
fn preempting_within_a_group_spares_the_replacement() {
    let (_device, _bus, worker) = setup(Duration::ZERO);
    let group = Arc::new(DispatchControl::tagged("group"));

    let old = worker
        .send_with_control(
            Batch::new(vec![CanMessage::new(0x12, [1])])
                .looping(LoopCount::Infinite)
                .loop_interval(Duration::from_millis(2)),
            group.clone(),
        )
        .unwrap();
    assert!(wait_for(|| old.frames_sent() >= 1));
    let new = worker
        .send_with_control(
            Batch::new(vec![CanMessage::new(0x12, [2])]).looping(LoopCount::Times(3)),
            group.clone(),
        )
        .unwrap();

    assert_eq!(old.wait(WAIT), Some(SendOutcome::Cancelled));
    assert_eq!(new.wait(WAIT), Some(SendOutcome::Completed));
    assert_eq!(new.frames_sent(), 3);
    assert!(!group.is_cancelled());
}

#[test]
fn kill_racing_with_send_leaves_nothing_running() {
    let (_device, _bus, worker) = setup(Duration::ZERO);
    let accepted = std::thread::scope(|s| {
        let senders: Vec<_> = (0..4u32)
            .map(|t| {
                let worker = &worker;
                s.spawn(move || {
                    let mut accepted = Vec::new();
                    for i in 0..10_000u32 {
                        let batch = Batch::new(vec![CanMessage::new(0x400 + t * 0x100 + i % 0x40, [1])])
                            .looping(LoopCount::Infinite)
                            .loop_interval(Duration::from_millis(1));
                        match worker.send(batch) {
                            Ok(handle) => accepted.push(handle),
                            Err(SubmitError::PoolClosed) => break,
                            Err(e) => panic!("unexpected {}", e),
                        }
                    }
                    accepted
                })
            })
            .collect();
        std::thread::sleep(Duration::from_millis(5));
        worker.kill();
        senders.into_iter().flat_map(|h| h.join().unwrap()).collect::<Vec<_>>()
    });

    for handle in &accepted {
        assert!(handle.control().is_cancelled(), "batch #{} survived kill", handle.token());
    }
    assert!(worker.active_keys().is_empty());
}

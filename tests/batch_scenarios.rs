//! End-to-end batch scenarios against the scripted transport: concurrency
//! bounds, partial failure, cancellation, retry ordering, and pause.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

use packhorse::binding::{bind, MetadataRecord};
use packhorse::model::{AssetMetadata, Batch, BatchItem, ItemStatus, RunState, SourceFile};
use packhorse::transport::{ScriptedOutcome, ScriptedTransport};
use packhorse::upload::{BatchCoordinator, BatchHooks, UploadOptions};

fn item(name: &str) -> BatchItem {
    BatchItem::new(
        SourceFile::from_bytes(name, vec![0u8; 1024]),
        AssetMetadata {
            layer: "media".into(),
            ..Default::default()
        },
    )
}

fn batch_of(names: &[&str]) -> Batch {
    Batch::new(names.iter().map(|n| item(n)).collect()).unwrap()
}

#[tokio::test]
async fn concurrency_never_exceeds_limit() {
    let transport = Arc::new(ScriptedTransport::with_fallback(
        ScriptedOutcome::succeed_after(Duration::from_millis(30)),
    ));
    let coordinator = BatchCoordinator::new(transport.clone());

    let result = coordinator
        .start(
            batch_of(&["a", "b", "c", "d", "e"]),
            UploadOptions::new().max_concurrent(2),
        )
        .await
        .unwrap();

    assert_eq!(result.success_count, 5);
    assert!(
        transport.max_active() <= 2,
        "at most 2 simultaneous uploads allowed, observed {}",
        transport.max_active()
    );
    assert!(transport.max_active() >= 1);
}

#[tokio::test]
async fn bound_batch_uploads_end_to_end() {
    let files = vec![
        SourceFile::from_bytes("a.png", vec![0u8; 512]),
        SourceFile::from_bytes("b.png", vec![0u8; 512]),
        SourceFile::from_bytes("c.png", vec![0u8; 512]),
    ];
    let records = vec![
        MetadataRecord::new("a.png", "artwork"),
        MetadataRecord::new("b.png", "artwork"),
    ];

    let outcome = bind(files, records);
    assert_eq!(outcome.items.len(), 2);
    assert_eq!(outcome.unmatched_files.len(), 1);
    assert_eq!(outcome.unmatched_files[0].name, "c.png");

    let coordinator = BatchCoordinator::new(Arc::new(ScriptedTransport::new()));
    let result = coordinator
        .start(Batch::new(outcome.items).unwrap(), UploadOptions::new())
        .await
        .unwrap();

    assert_eq!(result.total_count, 2);
    assert_eq!(result.success_count, 2);
}

#[tokio::test]
async fn retry_failed_relaunches_and_succeeds() {
    let transport = Arc::new(ScriptedTransport::new());
    // First attempt fails; the retry falls back to the default success.
    transport.script("flaky.png", ScriptedOutcome::fail("network timeout"));
    let coordinator = BatchCoordinator::new(transport.clone());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let hooks = BatchHooks::new().on_batch_complete(move |summary| {
        let _ = tx.send(summary.clone());
    });

    let b = batch_of(&["steady.png", "flaky.png"]);
    let flaky_id = b
        .items()
        .iter()
        .find(|i| i.source.name == "flaky.png")
        .unwrap()
        .id;

    let first = coordinator
        .start(b, UploadOptions::new().hooks(hooks))
        .await
        .unwrap();
    assert_eq!(first.success_count, 1);
    assert_eq!(first.failure_count, 1);
    assert!(first.failed[0].error.contains("network timeout"));

    // Drain the first run's completion callback.
    let _ = rx.recv().await.expect("first completion");

    // Batch is idle; retry_failed resets the item and relaunches.
    assert_eq!(coordinator.retry_failed(), 1);

    let second = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("retry run should complete")
        .expect("hook channel open");
    assert_eq!(second.total_count, 2);
    assert_eq!(second.success_count, 2);
    assert!(second.failed.is_empty());
    assert!(
        second.successful.iter().any(|c| c.id == flaky_id),
        "retried item must end up in the successful list"
    );
    assert_eq!(
        transport
            .start_order()
            .iter()
            .filter(|n| n.as_str() == "flaky.png")
            .count(),
        2,
        "flaky item uploads twice: original attempt plus retry"
    );
    assert_eq!(coordinator.run_state(), RunState::Idle);
}

#[tokio::test]
async fn cancel_all_completes_with_all_cancelled() {
    let transport = Arc::new(ScriptedTransport::with_fallback(ScriptedOutcome::Stall));
    let coordinator = BatchCoordinator::new(transport.clone());

    let completions = Arc::new(AtomicUsize::new(0));
    let hooks = {
        let completions = completions.clone();
        BatchHooks::new().on_batch_complete(move |_| {
            completions.fetch_add(1, Ordering::SeqCst);
        })
    };

    let controller = coordinator.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(60)).await;
        controller.cancel_all();
    });

    // max_concurrent = 1: one item uploading (stalled), four still pending.
    let result = coordinator
        .start(
            batch_of(&["a", "b", "c", "d", "e"]),
            UploadOptions::new().max_concurrent(1).hooks(hooks),
        )
        .await
        .unwrap();

    assert_eq!(result.total_count, 5);
    assert_eq!(result.success_count, 0);
    assert_eq!(result.failure_count, 0);
    assert_eq!(result.cancelled_count, 5);
    assert_eq!(
        completions.load(Ordering::SeqCst),
        1,
        "on_batch_complete fires exactly once even for an all-cancelled batch"
    );
    assert_eq!(
        transport.start_order().len(),
        1,
        "pending items were cancelled before ever reaching the transport"
    );
    assert_eq!(coordinator.run_state(), RunState::Idle);
}

#[tokio::test]
async fn retried_item_rejoins_at_queue_tail() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.script("a.png", ScriptedOutcome::fail("first attempt fails"));
    let coordinator = BatchCoordinator::new(transport.clone());

    let b = batch_of(&["a.png", "b.png"]);
    let a_id = b.items()[0].id;

    // Retry A as soon as its failure is reported, while B is still waiting.
    let retrier = coordinator.clone();
    let hooks = BatchHooks::new().on_item_error(move |id, _| {
        if id == a_id {
            retrier.retry_item(id);
        }
    });

    let result = coordinator
        .start(b, UploadOptions::new().max_concurrent(1).hooks(hooks))
        .await
        .unwrap();

    assert_eq!(result.success_count, 2);
    assert_eq!(
        transport.start_order(),
        vec!["a.png", "b.png", "a.png"],
        "retried item must not jump ahead of items already waiting"
    );
}

#[tokio::test]
async fn conservation_holds_at_completion() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.script("fail.bin", ScriptedOutcome::fail("bad"));
    transport.script("stall.bin", ScriptedOutcome::Stall);
    let coordinator = BatchCoordinator::new(transport.clone());

    let b = batch_of(&["ok1.bin", "fail.bin", "stall.bin", "ok2.bin"]);
    let stall_id = b.items()[2].id;

    let canceller = coordinator.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(80)).await;
        canceller.cancel_item(stall_id);
        // Cancelling again is an idempotent no-op.
        canceller.cancel_item(stall_id);
    });

    let progress_events = Arc::new(AtomicUsize::new(0));
    let hooks = {
        let progress_events = progress_events.clone();
        BatchHooks::new().on_batch_progress(move |_, _| {
            progress_events.fetch_add(1, Ordering::SeqCst);
        })
    };

    let result = coordinator
        .start(b, UploadOptions::new().max_concurrent(4).hooks(hooks))
        .await
        .unwrap();

    assert_eq!(result.total_count, 4);
    assert_eq!(result.success_count, 2);
    assert_eq!(result.failure_count, 1);
    assert_eq!(result.cancelled_count, 1);
    assert_eq!(
        result.success_count + result.failure_count + result.cancelled_count,
        result.total_count
    );
    assert_eq!(
        progress_events.load(Ordering::SeqCst),
        4,
        "one batch-progress event per settled item; duplicate cancel adds none"
    );
}

#[tokio::test]
async fn item_progress_is_monotone_and_completion_pins_100() {
    let transport = Arc::new(ScriptedTransport::new());
    // Deliberately out-of-order reports; the engine must never let the
    // observed value go backwards.
    transport.script(
        "clip.bin",
        ScriptedOutcome::Succeed {
            delay: Duration::from_millis(40),
            steps: vec![10, 80, 30, 95],
        },
    );
    let coordinator = BatchCoordinator::new(transport);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let hooks = {
        let seen = seen.clone();
        BatchHooks::new().on_item_progress(move |_, pct| {
            seen.lock().unwrap().push(pct);
        })
    };

    let result = coordinator
        .start(batch_of(&["clip.bin"]), UploadOptions::new().hooks(hooks))
        .await
        .unwrap();
    assert_eq!(result.success_count, 1);

    let seen = seen.lock().unwrap();
    assert!(!seen.is_empty());
    assert!(
        seen.windows(2).all(|w| w[0] <= w[1]),
        "per-item progress must be non-decreasing, saw {:?}",
        *seen
    );

    let snapshot = coordinator.snapshot();
    assert_eq!(snapshot[0].progress(), 100);
    assert_eq!(snapshot[0].status(), ItemStatus::Completed);
}

#[tokio::test]
async fn pause_blocks_new_admissions_only() {
    let transport = Arc::new(ScriptedTransport::with_fallback(
        ScriptedOutcome::succeed_after(Duration::from_millis(40)),
    ));
    let coordinator = BatchCoordinator::new(transport.clone());

    let b = batch_of(&["first.bin", "second.bin"]);
    let first_id = b.items()[0].id;
    let second_id = b.items()[1].id;

    let pauser = coordinator.clone();
    let hooks = BatchHooks::new().on_item_start(move |id| {
        if id == first_id {
            pauser.pause();
        }
    });

    let runner = coordinator.clone();
    let handle = tokio::spawn(async move {
        runner
            .start(b, UploadOptions::new().max_concurrent(1).hooks(hooks))
            .await
    });

    sleep(Duration::from_millis(150)).await;

    assert_eq!(coordinator.run_state(), RunState::Paused);
    let snapshot = coordinator.snapshot();
    let first = snapshot.iter().find(|i| i.id == first_id).unwrap();
    let second = snapshot.iter().find(|i| i.id == second_id).unwrap();
    assert_eq!(
        first.status(),
        ItemStatus::Completed,
        "the in-flight transfer runs to completion during pause"
    );
    assert_eq!(
        second.status(),
        ItemStatus::Pending,
        "no new admissions while paused"
    );

    coordinator.resume();
    let result = handle.await.unwrap().unwrap();
    assert_eq!(result.success_count, 2);
    assert_eq!(coordinator.run_state(), RunState::Idle);
}

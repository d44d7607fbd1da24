//! Batch upload coordination.
//!
//! The coordinator accepts a bound batch, admits pending items FIFO up to
//! the configured concurrency, and drives every item to a terminal state
//! regardless of individual failures. All item transitions are serialized
//! through one mutex plus an event channel, so two transfers can never
//! race on the same item; caller-facing hooks fire outside the lock.
//!
//! Cancellation and retry are per item and never disturb siblings. A
//! failed item stays inspectable and retryable; a retried item rejoins the
//! queue at the tail, behind items that were already waiting.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::UploadError;
use crate::model::{Batch, BatchItem, ItemId, ItemStatus, RunState, UploadReceipt};
use crate::transport::UploadTransport;
use crate::upload::progress::{self, BatchProgress};
use crate::upload::result::{self, BatchUploadResult};
use crate::upload::scheduler::UploadScheduler;
use crate::upload::task::{TaskEvent, UploadTask};

/// Default number of simultaneous transfers.
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

// ─────────────────────────────────────────────────────────────────────────────
// Hooks and Options
// ─────────────────────────────────────────────────────────────────────────────

/// Caller-supplied callbacks for batch and item lifecycle events.
///
/// All hooks are optional and may be invoked from the coordinator's event
/// loop or from the control method that triggered the transition. Hooks
/// may call back into the coordinator (e.g. retrying an item from
/// `on_item_error`).
#[derive(Default)]
pub struct BatchHooks {
    pub(crate) on_item_start: Option<Box<dyn Fn(ItemId) + Send + Sync>>,
    pub(crate) on_item_progress: Option<Box<dyn Fn(ItemId, u8) + Send + Sync>>,
    pub(crate) on_item_complete: Option<Box<dyn Fn(ItemId, &UploadReceipt) + Send + Sync>>,
    pub(crate) on_item_error: Option<Box<dyn Fn(ItemId, &str) + Send + Sync>>,
    pub(crate) on_batch_progress: Option<Box<dyn Fn(usize, usize) + Send + Sync>>,
    pub(crate) on_batch_complete: Option<Box<dyn Fn(&BatchUploadResult) + Send + Sync>>,
}

impl BatchHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called when an item is admitted and its transfer begins.
    pub fn on_item_start(mut self, f: impl Fn(ItemId) + Send + Sync + 'static) -> Self {
        self.on_item_start = Some(Box::new(f));
        self
    }

    /// Called with each item progress update (0–100).
    pub fn on_item_progress(mut self, f: impl Fn(ItemId, u8) + Send + Sync + 'static) -> Self {
        self.on_item_progress = Some(Box::new(f));
        self
    }

    /// Called when an item completes successfully.
    pub fn on_item_complete(
        mut self,
        f: impl Fn(ItemId, &UploadReceipt) + Send + Sync + 'static,
    ) -> Self {
        self.on_item_complete = Some(Box::new(f));
        self
    }

    /// Called when an item's transfer fails.
    pub fn on_item_error(mut self, f: impl Fn(ItemId, &str) + Send + Sync + 'static) -> Self {
        self.on_item_error = Some(Box::new(f));
        self
    }

    /// Called with `(finished, total)` whenever an item settles.
    pub fn on_batch_progress(mut self, f: impl Fn(usize, usize) + Send + Sync + 'static) -> Self {
        self.on_batch_progress = Some(Box::new(f));
        self
    }

    /// Called once every item has reached a terminal state.
    pub fn on_batch_complete(
        mut self,
        f: impl Fn(&BatchUploadResult) + Send + Sync + 'static,
    ) -> Self {
        self.on_batch_complete = Some(Box::new(f));
        self
    }
}

impl fmt::Debug for BatchHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchHooks").finish_non_exhaustive()
    }
}

/// Options for one batch run.
#[derive(Debug)]
pub struct UploadOptions {
    /// Upper bound on simultaneous transfers. Fixed for the run.
    pub max_concurrent: usize,
    /// Lifecycle callbacks.
    pub hooks: BatchHooks,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            hooks: BatchHooks::default(),
        }
    }
}

impl UploadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the concurrency bound.
    pub fn max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    /// Sets the lifecycle hooks.
    pub fn hooks(mut self, hooks: BatchHooks) -> Self {
        self.hooks = hooks;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal State
// ─────────────────────────────────────────────────────────────────────────────

/// Everything the coordinator knows about the installed batch.
struct BatchState {
    /// Items in insertion order.
    items: Vec<BatchItem>,
    /// Id → position in `items`.
    index: HashMap<ItemId, usize>,
    /// FIFO admission queue. May contain ids whose items already went
    /// terminal (cancelled while queued); those are skipped at admission.
    queue: VecDeque<ItemId>,
    run: RunState,
    /// Limiter for the current/most recent run.
    scheduler: Option<UploadScheduler>,
    /// Cancellation tokens of admitted items.
    tokens: HashMap<ItemId, CancellationToken>,
    /// Event sender while a run is active.
    events: Option<mpsc::UnboundedSender<TaskEvent>>,
}

impl BatchState {
    fn empty() -> Self {
        Self {
            items: Vec::new(),
            index: HashMap::new(),
            queue: VecDeque::new(),
            run: RunState::Idle,
            scheduler: None,
            tokens: HashMap::new(),
            events: None,
        }
    }

    fn item_mut(&mut self, id: ItemId) -> Option<&mut BatchItem> {
        let ix = *self.index.get(&id)?;
        self.items.get_mut(ix)
    }

    fn all_terminal(&self) -> bool {
        self.items.iter().all(|i| i.status().is_terminal())
    }
}

/// Hook invocations collected under the lock, fired after it is released.
enum Emit {
    ItemStart(ItemId),
    ItemProgress(ItemId, u8),
    ItemComplete(ItemId, UploadReceipt),
    ItemError(ItemId, String),
    BatchProgress(usize, usize),
}

struct CoordinatorInner<T: UploadTransport> {
    transport: Arc<T>,
    state: Mutex<BatchState>,
    /// Hooks from the most recent `start`, retained so `retry_failed` can
    /// relaunch an idle batch.
    hooks: Mutex<Arc<BatchHooks>>,
}

// ─────────────────────────────────────────────────────────────────────────────
// BatchCoordinator
// ─────────────────────────────────────────────────────────────────────────────

/// Top-level façade driving one batch at a time.
///
/// Cloning is cheap and every clone controls the same batch, so a UI can
/// hold one clone for control calls while another task awaits
/// [`start`](Self::start).
pub struct BatchCoordinator<T: UploadTransport> {
    inner: Arc<CoordinatorInner<T>>,
}

impl<T: UploadTransport> Clone for BatchCoordinator<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: UploadTransport> BatchCoordinator<T> {
    /// Creates a coordinator over the given transport.
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                transport,
                state: Mutex::new(BatchState::empty()),
                hooks: Mutex::new(Arc::new(BatchHooks::default())),
            }),
        }
    }

    /// Runs the batch until every item reaches a terminal state.
    ///
    /// Individual failures never abort the run: the returned summary
    /// separates successes, failures, and cancellations. The batch stays
    /// installed and inspectable after the run ends.
    ///
    /// # Errors
    ///
    /// `UploadError::BatchRunning` if a run is already active — a
    /// programmer error that fails fast instead of queueing.
    ///
    /// # Panics
    ///
    /// Panics if `options.max_concurrent` is 0.
    pub async fn start(
        &self,
        batch: Batch,
        options: UploadOptions,
    ) -> Result<BatchUploadResult, UploadError> {
        let scheduler = UploadScheduler::new(options.max_concurrent);
        {
            let mut st = self.state();
            if st.run != RunState::Idle {
                return Err(UploadError::BatchRunning);
            }
            let items = batch.into_items();
            let index = items.iter().enumerate().map(|(ix, it)| (it.id, ix)).collect();
            *st = BatchState {
                items,
                index,
                queue: VecDeque::new(),
                run: RunState::Running,
                scheduler: Some(scheduler),
                tokens: HashMap::new(),
                events: None,
            };
        }
        *self.inner.hooks.lock().expect("hooks lock poisoned") = Arc::new(options.hooks);

        info!(
            items = self.state().items.len(),
            max_concurrent = options.max_concurrent,
            "[COORDINATOR] starting batch"
        );

        Ok(self.run_pass().await)
    }

    // ── Control surface ──────────────────────────────────────────────────────

    /// Cancels every non-terminal item. Already-terminal items are
    /// untouched. The run (if one is active) then completes normally,
    /// firing `on_batch_complete` with an all-cancelled summary.
    pub fn cancel_all(&self) {
        let emits = {
            let mut st = self.state();
            let BatchState { items, tokens, .. } = &mut *st;
            let mut any = false;
            for item in items.iter_mut() {
                let was_uploading = item.status() == ItemStatus::Uploading;
                if item.cancel() {
                    any = true;
                    if was_uploading {
                        if let Some(token) = tokens.get(&item.id) {
                            token.cancel();
                        }
                    }
                    tokens.remove(&item.id);
                }
            }
            if any {
                info!("[COORDINATOR] cancel_all: all non-terminal items cancelled");
                let bp = progress::batch_progress(items);
                vec![Emit::BatchProgress(bp.finished, bp.total)]
            } else {
                Vec::new()
            }
        };
        self.fire(&emits);
        self.wake();
    }

    /// Cancels one item. Unknown ids and already-terminal items are
    /// silent no-ops; cancelling twice has no further effect.
    pub fn cancel_item(&self, id: ItemId) {
        let emits = {
            let mut st = self.state();
            let was_uploading;
            match st.item_mut(id) {
                Some(item) => {
                    was_uploading = item.status() == ItemStatus::Uploading;
                    if !item.cancel() {
                        return;
                    }
                }
                None => return,
            }
            info!(item = %id, "[COORDINATOR] item cancelled");
            if was_uploading {
                if let Some(token) = st.tokens.get(&id) {
                    token.cancel();
                }
            }
            st.tokens.remove(&id);
            let bp = progress::batch_progress(&st.items);
            vec![Emit::BatchProgress(bp.finished, bp.total)]
        };
        self.fire(&emits);
        self.wake();
    }

    /// Retries one failed item: progress resets to 0, the error clears,
    /// and the item rejoins the queue at the tail. A no-op unless the item
    /// is currently in the error state.
    pub fn retry_item(&self, id: ItemId) {
        let retried = {
            let mut st = self.state();
            let reset = st.item_mut(id).is_some_and(|item| item.reset_for_retry());
            if reset {
                st.queue.push_back(id);
            }
            reset
        };
        if retried {
            info!(item = %id, "[COORDINATOR] item queued for retry");
            self.wake();
        }
    }

    /// Retries every item currently in the error state; returns how many
    /// were reset. If no run is active, the batch is relaunched with the
    /// hooks from the previous `start` and the new summary is delivered
    /// through `on_batch_complete`.
    pub fn retry_failed(&self) -> usize {
        let (count, relaunch) = {
            let mut st = self.state();
            let BatchState {
                items, queue, run, ..
            } = &mut *st;
            let mut count = 0;
            for item in items.iter_mut() {
                if item.reset_for_retry() {
                    queue.push_back(item.id);
                    count += 1;
                }
            }
            let relaunch = count > 0 && *run == RunState::Idle;
            if relaunch {
                *run = RunState::Running;
            }
            (count, relaunch)
        };

        if relaunch {
            info!(count, "[COORDINATOR] relaunching batch for retried items");
            let this = self.clone();
            tokio::spawn(async move {
                this.run_pass().await;
            });
        } else if count > 0 {
            info!(count, "[COORDINATOR] retrying failed items");
            self.wake();
        }
        count
    }

    /// Holds back new admissions. Transfers already in flight continue
    /// (they remain individually cancellable).
    pub fn pause(&self) {
        let mut st = self.state();
        if st.run == RunState::Running {
            st.run = RunState::Paused;
            info!("[COORDINATOR] admissions paused");
        }
    }

    /// Resumes admissions after [`pause`](Self::pause).
    pub fn resume(&self) {
        let resumed = {
            let mut st = self.state();
            if st.run == RunState::Paused {
                st.run = RunState::Running;
                true
            } else {
                false
            }
        };
        if resumed {
            info!("[COORDINATOR] admissions resumed");
            self.wake();
        }
    }

    /// Removes a terminal item from an idle batch. Returns whether the
    /// item was removed.
    pub fn remove_item(&self, id: ItemId) -> bool {
        let mut st = self.state();
        if st.run != RunState::Idle {
            return false;
        }
        let Some(&ix) = st.index.get(&id) else {
            return false;
        };
        if !st.items[ix].status().is_terminal() {
            return false;
        }
        st.items.remove(ix);
        st.index = st.items.iter().enumerate().map(|(i, it)| (it.id, i)).collect();
        true
    }

    // ── Read surface ─────────────────────────────────────────────────────────

    /// Snapshot of every item's current state, in insertion order.
    pub fn snapshot(&self) -> Vec<BatchItem> {
        self.state().items.clone()
    }

    /// Snapshot of one item.
    pub fn item(&self, id: ItemId) -> Option<BatchItem> {
        let st = self.state();
        st.index.get(&id).map(|&ix| st.items[ix].clone())
    }

    /// Current batch completion progress.
    pub fn batch_progress(&self) -> BatchProgress {
        progress::batch_progress(&self.state().items)
    }

    /// Average throughput in bytes/sec over finished transfers, if any.
    pub fn average_throughput(&self) -> Option<f64> {
        progress::average_throughput(&self.state().items)
    }

    pub fn run_state(&self) -> RunState {
        self.state().run
    }

    // ── Dispatch loop ────────────────────────────────────────────────────────

    /// Drives the installed batch until every item is terminal. Assumes
    /// the run state was already set to `Running`.
    async fn run_pass(&self) -> BatchUploadResult {
        let (tx, mut rx) = mpsc::unbounded_channel();
        {
            let mut st = self.state();
            st.events = Some(tx);
            st.queue = st
                .items
                .iter()
                .filter(|i| i.status() == ItemStatus::Pending)
                .map(|i| i.id)
                .collect();
        }

        loop {
            let (emits, done) = {
                let mut st = self.state();
                let emits = self.admit_ready(&mut st);
                (emits, st.all_terminal())
            };
            self.fire(&emits);
            if done {
                break;
            }

            // The sender stored in state keeps the channel open until the
            // batch finishes, so recv only fails defensively.
            let Some(event) = rx.recv().await else { break };
            let emits = {
                let mut st = self.state();
                self.apply_event(&mut st, event)
            };
            self.fire(&emits);
        }

        let summary = {
            let mut st = self.state();
            st.run = RunState::Idle;
            st.events = None;
            st.tokens.clear();
            st.queue.clear();
            result::assemble(&st.items)
        };

        info!(
            total = summary.total_count,
            successes = summary.success_count,
            failures = summary.failure_count,
            cancelled = summary.cancelled_count,
            "[COORDINATOR] batch complete"
        );

        let hooks = self.hooks();
        if let Some(cb) = &hooks.on_batch_complete {
            cb(&summary);
        }
        summary
    }

    /// Promotes queued items into transfers while slots are free. Skips
    /// queue entries that went terminal while waiting.
    fn admit_ready(&self, st: &mut BatchState) -> Vec<Emit> {
        let mut emits = Vec::new();
        if st.run != RunState::Running {
            return emits;
        }
        let Some(scheduler) = st.scheduler.clone() else {
            return emits;
        };
        let Some(events) = st.events.clone() else {
            return emits;
        };

        loop {
            // Find the queue head that is still pending.
            let next_id = loop {
                match st.queue.front() {
                    None => return emits,
                    Some(&id) => {
                        let still_pending = st
                            .index
                            .get(&id)
                            .map(|&ix| st.items[ix].status() == ItemStatus::Pending)
                            .unwrap_or(false);
                        if still_pending {
                            break id;
                        }
                        st.queue.pop_front();
                    }
                }
            };

            let Some(permit) = scheduler.try_admit() else {
                return emits;
            };
            st.queue.pop_front();

            let token = CancellationToken::new();
            st.tokens.insert(next_id, token.clone());

            let ix = st.index[&next_id];
            let item = &mut st.items[ix];
            item.begin_upload();
            debug!(item = %next_id, file = %item.source.name, "[COORDINATOR] item admitted");

            UploadTask {
                id: next_id,
                transport: self.inner.transport.clone(),
                permit,
                cancel: token,
                events: events.clone(),
            }
            .spawn(item.source.clone(), item.metadata.clone());

            emits.push(Emit::ItemStart(next_id));
        }
    }

    /// Applies one task event. Events for items that already reached a
    /// terminal state (late progress/completion after cancellation) are
    /// dropped here.
    fn apply_event(&self, st: &mut BatchState, event: TaskEvent) -> Vec<Emit> {
        match event {
            TaskEvent::Progress { id, percent } => {
                if let Some(item) = st.item_mut(id) {
                    if let Some(updated) = item.apply_progress(percent) {
                        return vec![Emit::ItemProgress(id, updated)];
                    }
                }
                Vec::new()
            }
            TaskEvent::Completed { id, receipt } => {
                let applied = st
                    .item_mut(id)
                    .map(|item| item.complete(receipt.clone()))
                    .unwrap_or(false);
                if !applied {
                    return Vec::new();
                }
                info!(item = %id, "[COORDINATOR] item completed");
                st.tokens.remove(&id);
                let bp = progress::batch_progress(&st.items);
                vec![
                    Emit::ItemComplete(id, receipt),
                    Emit::BatchProgress(bp.finished, bp.total),
                ]
            }
            TaskEvent::Failed { id, message } => {
                let applied = st
                    .item_mut(id)
                    .map(|item| item.fail(message.clone()))
                    .unwrap_or(false);
                if !applied {
                    return Vec::new();
                }
                warn!(item = %id, error = %message, "[COORDINATOR] item failed");
                st.tokens.remove(&id);
                let bp = progress::batch_progress(&st.items);
                vec![
                    Emit::ItemError(id, message),
                    Emit::BatchProgress(bp.finished, bp.total),
                ]
            }
            // Settled frees a slot, Wake signals external mutation; both
            // just trigger the admission pass at the top of the loop.
            TaskEvent::Settled { .. } | TaskEvent::Wake => Vec::new(),
        }
    }

    // ── Helpers ──────────────────────────────────────────────────────────────

    fn state(&self) -> MutexGuard<'_, BatchState> {
        self.inner.state.lock().expect("coordinator state poisoned")
    }

    fn hooks(&self) -> Arc<BatchHooks> {
        self.inner.hooks.lock().expect("hooks lock poisoned").clone()
    }

    /// Nudges the dispatch loop after an external state change. No-op when
    /// no run is active.
    fn wake(&self) {
        let st = self.state();
        if let Some(tx) = &st.events {
            let _ = tx.send(TaskEvent::Wake);
        }
    }

    /// Invokes hooks for collected emissions. Must be called without the
    /// state lock held — hooks are allowed to call back into the
    /// coordinator.
    fn fire(&self, emits: &[Emit]) {
        if emits.is_empty() {
            return;
        }
        let hooks = self.hooks();
        for emit in emits {
            match emit {
                Emit::ItemStart(id) => {
                    if let Some(cb) = &hooks.on_item_start {
                        cb(*id);
                    }
                }
                Emit::ItemProgress(id, percent) => {
                    if let Some(cb) = &hooks.on_item_progress {
                        cb(*id, *percent);
                    }
                }
                Emit::ItemComplete(id, receipt) => {
                    if let Some(cb) = &hooks.on_item_complete {
                        cb(*id, receipt);
                    }
                }
                Emit::ItemError(id, message) => {
                    if let Some(cb) = &hooks.on_item_error {
                        cb(*id, message);
                    }
                }
                Emit::BatchProgress(finished, total) => {
                    if let Some(cb) = &hooks.on_batch_progress {
                        cb(*finished, *total);
                    }
                }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AssetMetadata, SourceFile};
    use crate::transport::{ScriptedOutcome, ScriptedTransport};
    use std::time::Duration;

    fn item(name: &str) -> BatchItem {
        BatchItem::new(
            SourceFile::from_bytes(name, vec![0u8; 256]),
            AssetMetadata {
                layer: "media".into(),
                ..Default::default()
            },
        )
    }

    fn batch(names: &[&str]) -> Batch {
        Batch::new(names.iter().map(|n| item(n)).collect()).unwrap()
    }

    #[tokio::test]
    async fn empty_batch_completes_immediately() {
        let coordinator = BatchCoordinator::new(Arc::new(ScriptedTransport::new()));
        let result = coordinator
            .start(Batch::new(Vec::new()).unwrap(), UploadOptions::new())
            .await
            .unwrap();
        assert_eq!(result.total_count, 0);
        assert_eq!(result.success_count, 0);
        assert_eq!(coordinator.run_state(), RunState::Idle);
        assert_eq!(coordinator.batch_progress().overall_percent, 100);
    }

    #[tokio::test]
    async fn start_while_running_fails_fast() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.script("stuck.bin", ScriptedOutcome::Stall);
        let coordinator = BatchCoordinator::new(transport);

        let runner = coordinator.clone();
        let handle =
            tokio::spawn(async move { runner.start(batch(&["stuck.bin"]), UploadOptions::new()).await });

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(coordinator.run_state(), RunState::Running);

        let err = coordinator
            .start(batch(&["other.bin"]), UploadOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::BatchRunning));

        coordinator.cancel_all();
        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.cancelled_count, 1);
    }

    #[tokio::test]
    async fn control_calls_with_unknown_ids_are_noops() {
        let coordinator = BatchCoordinator::new(Arc::new(ScriptedTransport::new()));
        let ghost = ItemId::new();

        coordinator.cancel_item(ghost);
        coordinator.retry_item(ghost);
        assert!(!coordinator.remove_item(ghost));
        assert_eq!(coordinator.retry_failed(), 0);
    }

    #[tokio::test]
    async fn remove_item_requires_idle_and_terminal() {
        let coordinator = BatchCoordinator::new(Arc::new(ScriptedTransport::new()));
        let b = batch(&["a.bin", "b.bin"]);
        let ids: Vec<ItemId> = b.items().iter().map(|i| i.id).collect();

        let result = coordinator.start(b, UploadOptions::new()).await.unwrap();
        assert_eq!(result.success_count, 2);

        assert!(coordinator.remove_item(ids[0]), "terminal item on idle batch");
        assert_eq!(coordinator.snapshot().len(), 1);
        assert!(coordinator.remove_item(ids[1]));
        assert!(coordinator.snapshot().is_empty());
    }

    #[tokio::test]
    async fn batch_stays_inspectable_after_completion() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.script("bad.bin", ScriptedOutcome::fail("boom"));
        let coordinator = BatchCoordinator::new(transport);

        let result = coordinator
            .start(batch(&["ok.bin", "bad.bin"]), UploadOptions::new())
            .await
            .unwrap();
        assert_eq!(result.success_count, 1);
        assert_eq!(result.failure_count, 1);

        let snapshot = coordinator.snapshot();
        let bad = snapshot.iter().find(|i| i.source.name == "bad.bin").unwrap();
        assert_eq!(bad.status(), ItemStatus::Error);
        assert!(bad.error().unwrap().contains("boom"));
        assert!(coordinator.average_throughput().is_some());
    }
}

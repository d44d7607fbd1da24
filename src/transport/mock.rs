//! Scripted in-process transport for exercising the coordinator.
//!
//! Hand-written rather than generated: the interesting behaviors here are
//! temporal (progress steps over a delay, stalling until cancelled) and a
//! mocking macro buys nothing. Outcomes are scripted per file name; each
//! upload of a name consumes the next scripted outcome, falling back to a
//! configurable default when the script runs dry — so "fail once, then
//! succeed" retry flows are one-liners.
//!
//! The transport also records the order in which uploads started and the
//! high-water mark of concurrently active transfers, which is exactly the
//! instrumentation concurrency tests need.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::error::UploadError;
use crate::model::{AssetMetadata, SourceFile, UploadReceipt};
use crate::transport::{ProgressSink, UploadTransport};

// ─────────────────────────────────────────────────────────────────────────────
// ScriptedOutcome
// ─────────────────────────────────────────────────────────────────────────────

/// What a scripted upload should do.
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    /// Report each progress step, spread across `delay`, then succeed.
    Succeed { delay: Duration, steps: Vec<u8> },
    /// Wait `delay`, then fail with `message`.
    Fail { delay: Duration, message: String },
    /// Never finish; resolves only through cancellation.
    Stall,
}

impl ScriptedOutcome {
    /// Quick success: 10ms, one midpoint progress report.
    pub fn succeed() -> Self {
        Self::Succeed {
            delay: Duration::from_millis(10),
            steps: vec![50],
        }
    }

    /// Success spread across the given delay.
    pub fn succeed_after(delay: Duration) -> Self {
        Self::Succeed {
            delay,
            steps: vec![25, 50, 75],
        }
    }

    /// Quick failure with the given message.
    pub fn fail(message: impl Into<String>) -> Self {
        Self::Fail {
            delay: Duration::from_millis(5),
            message: message.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ScriptedTransport
// ─────────────────────────────────────────────────────────────────────────────

/// Deterministic [`UploadTransport`] for tests.
pub struct ScriptedTransport {
    /// Per-file-name outcome queues; consumed front-first.
    scripts: Mutex<HashMap<String, VecDeque<ScriptedOutcome>>>,
    /// Outcome used when a name has no (remaining) script.
    fallback: ScriptedOutcome,
    /// File names in upload-start order.
    started: Mutex<Vec<String>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    next_asset: AtomicU64,
}

impl ScriptedTransport {
    /// Transport where every unscripted upload quickly succeeds.
    pub fn new() -> Self {
        Self::with_fallback(ScriptedOutcome::succeed())
    }

    /// Transport with a custom default outcome.
    pub fn with_fallback(fallback: ScriptedOutcome) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            fallback,
            started: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            next_asset: AtomicU64::new(0),
        }
    }

    /// Queues an outcome for the named file. Multiple calls queue up;
    /// each upload consumes one.
    pub fn script(&self, file_name: impl Into<String>, outcome: ScriptedOutcome) {
        self.scripts
            .lock()
            .unwrap()
            .entry(file_name.into())
            .or_default()
            .push_back(outcome);
    }

    /// File names in the order their uploads started.
    pub fn start_order(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    /// Highest number of simultaneously active uploads observed.
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn next_outcome(&self, file_name: &str) -> ScriptedOutcome {
        let mut scripts = self.scripts.lock().unwrap();
        scripts
            .get_mut(file_name)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| self.fallback.clone())
    }

    async fn run_outcome(
        &self,
        outcome: ScriptedOutcome,
        file_name: &str,
        progress: &ProgressSink,
    ) -> Result<UploadReceipt, UploadError> {
        match outcome {
            ScriptedOutcome::Succeed { delay, steps } => {
                let pause = delay / (steps.len() as u32 + 1);
                for step in steps {
                    sleep(pause).await;
                    progress.report(step);
                }
                sleep(pause).await;
                let n = self.next_asset.fetch_add(1, Ordering::SeqCst);
                Ok(UploadReceipt {
                    asset_id: format!("scripted-{}", n),
                    location: Some(format!("/assets/{}", file_name)),
                })
            }
            ScriptedOutcome::Fail { delay, message } => {
                sleep(delay).await;
                Err(UploadError::ConnectionFailed(message))
            }
            ScriptedOutcome::Stall => futures_util::future::pending().await,
        }
    }
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadTransport for ScriptedTransport {
    fn upload<'a>(
        &'a self,
        file: &'a SourceFile,
        _metadata: &'a AssetMetadata,
        progress: ProgressSink,
        cancel: CancellationToken,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<UploadReceipt, UploadError>> + Send + 'a>>
    {
        Box::pin(async move {
            self.started.lock().unwrap().push(file.name.clone());
            let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now_active, Ordering::SeqCst);

            let outcome = self.next_outcome(&file.name);
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(UploadError::Cancelled),
                result = self.run_outcome(outcome, &file.name, &progress) => result,
            };

            self.active.fetch_sub(1, Ordering::SeqCst);
            result
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

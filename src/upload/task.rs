//! Per-item transfer driver.
//!
//! An `UploadTask` is created when the coordinator admits one pending item.
//! It owns the item's scheduler permit and cancellation token, runs the
//! transport, and forwards everything the transport reports into the
//! coordinator's event channel. The task itself never touches item state —
//! all transitions happen in the coordinator, which also drops any event
//! that arrives after its item reached a terminal state.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::UploadError;
use crate::model::{AssetMetadata, ItemId, SourceFile, UploadReceipt};
use crate::transport::{ProgressSink, UploadTransport};
use crate::upload::scheduler::UploadPermit;

/// Events flowing from transfer tasks (and control methods) into the
/// coordinator's dispatch loop.
#[derive(Debug)]
pub(crate) enum TaskEvent {
    /// Transport progress report.
    Progress { id: ItemId, percent: u8 },
    /// Transport finished successfully.
    Completed { id: ItemId, receipt: UploadReceipt },
    /// Transport failed; the message becomes the item's error.
    Failed { id: ItemId, message: String },
    /// The transfer future ended and its permit was released.
    Settled { id: ItemId },
    /// State changed outside the loop (cancel/retry/resume); re-evaluate.
    Wake,
}

/// Driver for one admitted item's transfer.
pub(crate) struct UploadTask<T: UploadTransport> {
    pub id: ItemId,
    pub transport: Arc<T>,
    pub permit: UploadPermit,
    pub cancel: CancellationToken,
    pub events: mpsc::UnboundedSender<TaskEvent>,
}

impl<T: UploadTransport> UploadTask<T> {
    /// Spawns the transfer onto the runtime.
    ///
    /// The spawned future holds the permit until the transport settles, so
    /// the slot frees on every exit path. Sends into the event channel are
    /// best-effort: if the run has already finished, events fall on the
    /// floor, which is exactly what late events deserve.
    pub fn spawn(self, file: SourceFile, metadata: AssetMetadata) {
        let UploadTask {
            id,
            transport,
            permit,
            cancel,
            events,
        } = self;

        tokio::spawn(async move {
            let sink = {
                let events = events.clone();
                ProgressSink::new(move |percent| {
                    let _ = events.send(TaskEvent::Progress { id, percent });
                })
            };

            let outcome = transport
                .upload(&file, &metadata, sink, cancel.clone())
                .await;

            // A cancelled item is already terminal on the coordinator side;
            // whatever the transport ended up doing is not reported.
            if !cancel.is_cancelled() {
                match outcome {
                    Ok(receipt) => {
                        let _ = events.send(TaskEvent::Completed { id, receipt });
                    }
                    Err(UploadError::Cancelled) => {}
                    Err(e) => {
                        let _ = events.send(TaskEvent::Failed {
                            id,
                            message: e.to_string(),
                        });
                    }
                }
            }

            trace!(item = %id, "[UPLOAD-TASK] transfer settled");
            drop(permit);
            let _ = events.send(TaskEvent::Settled { id });
        });
    }
}

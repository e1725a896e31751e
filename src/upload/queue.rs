//! Upload queue for contract-template files.
//!
//! Items enter `Queued`, move to `Uploading` when started, and settle as
//! `Uploaded`, `Errored`, or `Canceled`. Settlement is guarded: a terminal
//! write only applies while the item is still `Uploading`, so a cancel can
//! never be overwritten by a late-resolving transfer.
//!
//! Progress is percent-based; 100 is reported only by settlement, so
//! `progress_percent == 100` holds exactly for `Uploaded` items.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::upload::scheduler::UploadScheduler;
use crate::upload::transport::{FilePayload, ProgressFn, UploadTransport};

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Largest accepted file: 10 MiB.
pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Capacity of the item event channel.
const EVENT_CAPACITY: usize = 256;

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle state of one queued file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Queued,
    Uploading,
    Uploaded,
    Errored,
    Canceled,
}

impl UploadStatus {
    /// True once the item can no longer change on its own.
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            UploadStatus::Uploaded | UploadStatus::Errored | UploadStatus::Canceled
        )
    }
}

/// Observable state of one queued file.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadItem {
    pub id: String,
    pub name: String,
    pub size_bytes: u64,
    pub status: UploadStatus,
    /// 0..=100; 100 exactly when `Uploaded`.
    pub progress_percent: u8,
    /// Name the server stored the file under, set on `Uploaded`.
    pub server_assigned_name: Option<String>,
    pub error_message: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal State
// ─────────────────────────────────────────────────────────────────────────────

struct ItemEntry {
    item: UploadItem,
    /// Payload bytes, consumed when the transfer starts.
    payload: Option<FilePayload>,
    /// Present exactly while the item is `Uploading`.
    cancel: Option<CancellationToken>,
}

struct QueueInner {
    entries: HashMap<String, ItemEntry>,
    /// Insertion order for display.
    order: Vec<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// UploadQueue
// ─────────────────────────────────────────────────────────────────────────────

/// Keyed store of upload items with per-item cancel and a transfer cap.
pub struct UploadQueue {
    transport: Arc<dyn UploadTransport>,
    scheduler: UploadScheduler,
    inner: Mutex<QueueInner>,
    events: broadcast::Sender<UploadItem>,
}

impl UploadQueue {
    pub fn new(transport: Arc<dyn UploadTransport>) -> Arc<Self> {
        Self::with_scheduler(transport, UploadScheduler::default())
    }

    pub fn with_scheduler(transport: Arc<dyn UploadTransport>, scheduler: UploadScheduler) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            transport,
            scheduler,
            inner: Mutex::new(QueueInner {
                entries: HashMap::new(),
                order: Vec::new(),
            }),
            events,
        })
    }

    /// State is only touched under this lock and never across an await;
    /// a poisoned lock still yields consistent data.
    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Subscribes to item-change events.
    pub fn subscribe(&self) -> broadcast::Receiver<UploadItem> {
        self.events.subscribe()
    }

    /// Items in insertion order.
    pub fn snapshot(&self) -> Vec<UploadItem> {
        let inner = self.lock();
        inner
            .order
            .iter()
            .filter_map(|id| inner.entries.get(id))
            .map(|entry| entry.item.clone())
            .collect()
    }

    pub fn item(&self, item_id: &str) -> Option<UploadItem> {
        self.lock().entries.get(item_id).map(|e| e.item.clone())
    }

    /// Number of transfers currently holding a scheduler slot. Items marked
    /// `Uploading` but still waiting for a slot are not counted.
    pub fn active_transfers(&self) -> usize {
        self.scheduler.active_transfers()
    }

    /// Number of free transfer slots.
    pub fn available_slots(&self) -> usize {
        self.scheduler.available_slots()
    }

    /// Adds a file to the queue and returns its item id.
    ///
    /// Files over [`MAX_FILE_SIZE`] enter the queue as `Errored` with a
    /// descriptive message and never reach the network.
    pub fn enqueue(&self, payload: FilePayload) -> String {
        let id = Uuid::new_v4().to_string();
        let size_bytes = payload.bytes.len() as u64;
        let oversized = size_bytes > MAX_FILE_SIZE;

        let item = UploadItem {
            id: id.clone(),
            name: payload.name.clone(),
            size_bytes,
            status: if oversized {
                UploadStatus::Errored
            } else {
                UploadStatus::Queued
            },
            progress_percent: 0,
            server_assigned_name: None,
            error_message: oversized.then(|| {
                AppError::FileTooLarge {
                    name: payload.name.clone(),
                    size_bytes,
                }
                .to_presentation()
                .message
            }),
        };

        if oversized {
            warn!("[UPLOAD] Rejected oversized file ({} bytes)", size_bytes);
        }

        let snapshot = item.clone();
        {
            let mut inner = self.lock();
            inner.entries.insert(
                id.clone(),
                ItemEntry {
                    item,
                    payload: (!oversized).then_some(payload),
                    cancel: None,
                },
            );
            inner.order.push(id.clone());
        }
        let _ = self.events.send(snapshot);

        id
    }

    /// Starts the transfer of a queued item to the given entity.
    ///
    /// The item is marked `Uploading` immediately; the spawned transfer
    /// waits for a scheduler slot, so items started beyond the cap are
    /// tracked rather than lost.
    ///
    /// # Errors
    ///
    /// `AppError::PreconditionUnmet` when the item is unknown or not `Queued`.
    pub fn start(self: &Arc<Self>, item_id: &str, entity_id: &str) -> Result<(), AppError> {
        let (payload, cancel, snapshot) = {
            let mut inner = self.lock();
            let entry = inner.entries.get_mut(item_id).ok_or_else(|| {
                AppError::PreconditionUnmet(format!("Unknown upload item: {}", item_id))
            })?;

            if entry.item.status != UploadStatus::Queued {
                return Err(AppError::PreconditionUnmet(
                    "Only queued files can be started".to_string(),
                ));
            }

            let payload = entry.payload.take().ok_or_else(|| {
                AppError::Internal("Queued item has no payload".to_string())
            })?;

            let cancel = CancellationToken::new();
            entry.item.status = UploadStatus::Uploading;
            entry.item.progress_percent = 0;
            entry.cancel = Some(cancel.clone());

            (payload, cancel, entry.item.clone())
        };
        let _ = self.events.send(snapshot);

        let queue = Arc::clone(self);
        let item_id = item_id.to_string();
        let entity_id = entity_id.to_string();
        tokio::spawn(async move {
            queue.run_transfer(item_id, entity_id, payload, cancel).await;
        });

        Ok(())
    }

    /// Starts every queued item.
    pub fn start_all(self: &Arc<Self>, entity_id: &str) {
        let queued: Vec<String> = {
            let inner = self.lock();
            inner
                .order
                .iter()
                .filter(|id| {
                    inner
                        .entries
                        .get(*id)
                        .is_some_and(|e| e.item.status == UploadStatus::Queued)
                })
                .cloned()
                .collect()
        };

        for id in queued {
            // Races with a concurrent start settle as PreconditionUnmet
            let _ = self.start(&id, entity_id);
        }
    }

    /// Cancels an in-flight transfer. Settles the item as `Canceled`
    /// immediately; the transfer's own outcome is then discarded.
    pub fn cancel(&self, item_id: &str) {
        let snapshot = {
            let mut inner = self.lock();
            let Some(entry) = inner.entries.get_mut(item_id) else {
                return;
            };
            if entry.item.status != UploadStatus::Uploading {
                return;
            }

            if let Some(token) = entry.cancel.take() {
                token.cancel();
            }
            entry.item.status = UploadStatus::Canceled;
            entry.item.error_message = Some("Canceled".to_string());
            entry.item.clone()
        };

        info!("[UPLOAD] Transfer canceled by operator");
        let _ = self.events.send(snapshot);
    }

    /// Aborts every in-flight transfer and clears the queue.
    pub fn cancel_all(&self) {
        let mut inner = self.lock();
        for entry in inner.entries.values_mut() {
            if let Some(token) = entry.cancel.take() {
                token.cancel();
            }
        }
        inner.entries.clear();
        inner.order.clear();
        info!("[UPLOAD] All transfers canceled, queue cleared");
    }

    /// Removes an item that is not currently uploading.
    ///
    /// # Errors
    ///
    /// `AppError::PreconditionUnmet` when the item is `Uploading`; cancel
    /// it first.
    pub fn remove(&self, item_id: &str) -> Result<(), AppError> {
        let mut inner = self.lock();
        let Some(entry) = inner.entries.get(item_id) else {
            return Ok(());
        };
        if entry.item.status == UploadStatus::Uploading {
            return Err(AppError::PreconditionUnmet(
                "Cancel the upload before removing it".to_string(),
            ));
        }

        inner.entries.remove(item_id);
        inner.order.retain(|id| id != item_id);
        Ok(())
    }

    /// Runs one transfer under a scheduler slot and settles the item.
    async fn run_transfer(
        self: Arc<Self>,
        item_id: String,
        entity_id: String,
        payload: FilePayload,
        cancel: CancellationToken,
    ) {
        let _permit = self.scheduler.acquire().await;

        // Canceled while waiting for a slot
        if cancel.is_cancelled() {
            return;
        }

        let progress: ProgressFn = {
            let queue = Arc::clone(&self);
            let item_id = item_id.clone();
            Arc::new(move |sent, total| {
                queue.report_progress(&item_id, sent, total);
            })
        };

        let result = self
            .transport
            .upload(&entity_id, payload, progress, cancel)
            .await;

        match result {
            Ok(server_name) => self.settle(&item_id, |item| {
                item.status = UploadStatus::Uploaded;
                item.progress_percent = 100;
                item.server_assigned_name = Some(server_name);
                item.error_message = None;
            }),
            Err(AppError::Cancelled) => self.settle(&item_id, |item| {
                item.status = UploadStatus::Canceled;
                item.error_message = Some("Canceled".to_string());
            }),
            Err(error) => {
                let message = match &error {
                    AppError::BackendRejected { status, .. } => {
                        format!("Server error {}", status)
                    }
                    AppError::Connectivity(_) => "Network error".to_string(),
                    other => other.to_presentation().message,
                };
                warn!("[UPLOAD] Transfer failed: {}", message);
                self.settle(&item_id, move |item| {
                    item.status = UploadStatus::Errored;
                    item.error_message = Some(message);
                });
            }
        }
    }

    /// Applies a terminal write, but only while the item is still
    /// `Uploading` (cancel wins any race with a late completion).
    fn settle(&self, item_id: &str, apply: impl FnOnce(&mut UploadItem)) {
        let snapshot = {
            let mut inner = self.lock();
            let Some(entry) = inner.entries.get_mut(item_id) else {
                return;
            };
            if entry.item.status != UploadStatus::Uploading {
                return;
            }

            apply(&mut entry.item);
            entry.cancel = None;
            entry.item.clone()
        };
        let _ = self.events.send(snapshot);
    }

    /// Recomputes percent progress for an in-flight item.
    ///
    /// Clamped to 99 so 100 is only ever written by settlement.
    fn report_progress(&self, item_id: &str, sent: u64, total: u64) {
        if total == 0 {
            return;
        }
        let percent = (((sent * 100 + total / 2) / total) as u8).min(99);

        let snapshot = {
            let mut inner = self.lock();
            let Some(entry) = inner.entries.get_mut(item_id) else {
                return;
            };
            if entry.item.status != UploadStatus::Uploading
                || entry.item.progress_percent == percent
            {
                return;
            }
            entry.item.progress_percent = percent;
            entry.item.clone()
        };
        let _ = self.events.send(snapshot);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

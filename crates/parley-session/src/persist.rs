use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::warn;

use parley_store::{SessionRecord, SessionStore, StoreError};

/// Coalescing per-session snapshot writer.
///
/// Every committed transition submits a full post-transition snapshot.
/// While a write is in flight, newer snapshots replace the pending slot so
/// rapid transitions collapse into the latest state. Snapshots carry a
/// sequence number and a stale write never lands over a newer one, so the
/// final stored record always reflects the final in-memory state.
pub(crate) struct SnapshotWriter {
    store: Arc<dyn SessionStore>,
    pending: Mutex<Option<(u64, SessionRecord)>>,
    next_seq: AtomicU64,
    /// Highest sequence number already written.
    written_seq: AtomicU64,
    /// True while a drain task owns the write loop.
    writing: AtomicBool,
    /// Serialises actual store writes, including direct flushes.
    gate: tokio::sync::Mutex<()>,
}

impl SnapshotWriter {
    pub fn new(store: Arc<dyn SessionStore>) -> Arc<Self> {
        Arc::new(Self {
            store,
            pending: Mutex::new(None),
            next_seq: AtomicU64::new(0),
            written_seq: AtomicU64::new(0),
            writing: AtomicBool::new(false),
            gate: tokio::sync::Mutex::new(()),
        })
    }

    /// Queue a snapshot for background persistence, superseding any
    /// not-yet-written one.
    pub fn submit(self: &Arc<Self>, record: SessionRecord) {
        let seq = self.next_seq.fetch_add(1, Ordering::AcqRel) + 1;
        *self.pending.lock().unwrap() = Some((seq, record));
        if self.writing.swap(true, Ordering::AcqRel) {
            return; // a drain task is already running
        }
        let this = self.clone();
        tokio::spawn(async move { this.drain().await });
    }

    /// Write `record` immediately, discarding any queued snapshot it
    /// supersedes. Used on release and cleanup, where the caller must know
    /// whether persistence succeeded.
    pub async fn flush(&self, record: &SessionRecord) -> Result<(), StoreError> {
        let seq = self.next_seq.fetch_add(1, Ordering::AcqRel) + 1;
        *self.pending.lock().unwrap() = None;
        let _gate = self.gate.lock().await;
        self.store.put_snapshot(record).await?;
        self.written_seq.fetch_max(seq, Ordering::AcqRel);
        Ok(())
    }

    async fn drain(self: Arc<Self>) {
        loop {
            let next = self.pending.lock().unwrap().take();
            let Some((seq, record)) = next else {
                self.writing.store(false, Ordering::Release);
                // A submit may have landed between the take above and the
                // store; reclaim the loop if the slot refilled.
                if self.pending.lock().unwrap().is_some()
                    && !self.writing.swap(true, Ordering::AcqRel)
                {
                    continue;
                }
                return;
            };

            let write = {
                let _gate = self.gate.lock().await;
                if seq <= self.written_seq.load(Ordering::Acquire) {
                    // A direct flush already wrote something newer.
                    continue;
                }
                let result = self.store.put_snapshot(&record).await;
                if result.is_ok() {
                    self.written_seq.fetch_max(seq, Ordering::AcqRel);
                }
                result
            };

            if let Err(e) = write {
                warn!(
                    session_id = %record.meta.session_id,
                    error = %e,
                    "snapshot write failed; session stays dirty until the next transition"
                );
                // Keep the unwritten snapshot unless a newer one arrived.
                let mut slot = self.pending.lock().unwrap();
                if slot.is_none() {
                    *slot = Some((seq, record));
                }
                drop(slot);
                self.writing.store(false, Ordering::Release);
                return;
            }
        }
    }
}

//! Fragment Request Scheduler
//!
//! Outgoing fragment fetches, one FIFO queue per supplier. A fetch placed
//! on a queue gets exactly one final answer through the caller's reply
//! channel: `received` after the payload was pulled and saved locally,
//! `exist` when the store already had the file, `failed` otherwise. A
//! duplicate of a fetch that is still waiting is answered `in queue` and
//! the original keeps its slot.
//!
//! The wire transfer itself goes through the [`SupplierClient`] port, so
//! tests (and the local-only binary) plug their own transport.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, instrument, warn};

use crate::contacts::SupplierId;
use crate::domain::ports::{FetchOutcome, FetchReply, FragmentRequest};
use crate::error::{Error, Result};
use crate::fragments::id::{BackupId, FragmentId};
use crate::fragments::store::FragmentStore;
use crate::metrics;

// =============================================================================
// Supplier Client Port
// =============================================================================

/// Port for talking to one remote supplier.
#[async_trait]
pub trait SupplierClient: Send + Sync {
    /// Ask the supplier for one fragment; resolves with the raw payload.
    async fn fetch(&self, supplier: &SupplierId, request: &FragmentRequest) -> Result<Bytes>;

    /// Cheap reachability probe.
    async fn ping(&self, supplier: &SupplierId) -> Result<()>;
}

/// Client for restores that run entirely off the local fragment cache.
///
/// Every fetch is refused; the scheduler's store short-circuit answers
/// `exist` for whatever is already on disk, which is all such a restore
/// can use.
#[derive(Debug, Default, Clone)]
pub struct LocalOnlyClient;

#[async_trait]
impl SupplierClient for LocalOnlyClient {
    async fn fetch(&self, _supplier: &SupplierId, request: &FragmentRequest) -> Result<Bytes> {
        Err(Error::FetchRefused {
            fragment: request.fragment.to_string(),
            reason: "no remote transport configured".to_string(),
        })
    }

    async fn ping(&self, _supplier: &SupplierId) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the request scheduler
#[derive(Debug, Clone)]
pub struct RequestSchedulerConfig {
    /// Concurrent fetches per supplier
    pub max_in_flight: usize,
}

impl Default for RequestSchedulerConfig {
    fn default() -> Self {
        Self { max_in_flight: 1 }
    }
}

// =============================================================================
// Supplier Queue
// =============================================================================

struct PendingFetch {
    request: FragmentRequest,
    reply: UnboundedSender<FetchReply>,
}

#[derive(Default)]
struct QueueState {
    waiting: VecDeque<PendingFetch>,
    /// Fragment ids currently on the wire
    in_flight: HashSet<String>,
}

/// FIFO fetch queue toward one supplier.
pub struct SupplierQueue {
    supplier: SupplierId,
    config: RequestSchedulerConfig,
    client: Arc<dyn SupplierClient>,
    store: Arc<FragmentStore>,
    state: Mutex<QueueState>,
    shutdown: AtomicBool,
}

impl SupplierQueue {
    fn new(
        supplier: SupplierId,
        config: RequestSchedulerConfig,
        client: Arc<dyn SupplierClient>,
        store: Arc<FragmentStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            supplier,
            config,
            client,
            store,
            state: Mutex::new(QueueState::default()),
            shutdown: AtomicBool::new(false),
        })
    }

    fn reply(&self, sender: &UnboundedSender<FetchReply>, fragment: FragmentId, outcome: FetchOutcome) {
        // a dropped receiver means the requester is gone; nothing to do
        let _ = sender.send(FetchReply {
            fragment,
            supplier: self.supplier.clone(),
            outcome,
        });
    }

    /// Queue one fetch. Returns whether the request was accepted.
    fn enqueue(self: &Arc<Self>, request: FragmentRequest, reply: UnboundedSender<FetchReply>) -> bool {
        let fragment = request.fragment.clone();
        if self.shutdown.load(Ordering::SeqCst) {
            debug!(supplier = %self.supplier, %fragment, "queue is shut down, refusing fetch");
            self.reply(&reply, fragment, FetchOutcome::Failed);
            return false;
        }

        let key = fragment.to_string();
        {
            let mut state = self.state.lock();
            let duplicate = state.in_flight.contains(&key)
                || state.waiting.iter().any(|p| p.request.fragment == fragment);
            if duplicate {
                warn!(supplier = %self.supplier, %fragment, "fragment already queued");
                drop(state);
                self.reply(&reply, fragment, FetchOutcome::InQueue);
                return false;
            }
            if self.store.exists(&fragment) {
                drop(state);
                debug!(supplier = %self.supplier, %fragment, "fragment already on disk");
                metrics::FRAGMENTS_RECEIVED.inc();
                self.reply(&reply, fragment, FetchOutcome::Exist);
                return true;
            }
            state.waiting.push_back(PendingFetch { request, reply });
        }
        metrics::FRAGMENTS_REQUESTED.inc();
        self.pump();
        true
    }

    /// Move waiting fetches onto the wire up to the in-flight cap.
    fn pump(self: &Arc<Self>) {
        loop {
            let next = {
                let mut state = self.state.lock();
                if state.in_flight.len() >= self.config.max_in_flight {
                    return;
                }
                match state.waiting.pop_front() {
                    Some(pending) => {
                        state.in_flight.insert(pending.request.fragment.to_string());
                        pending
                    }
                    None => return,
                }
            };
            let queue = Arc::clone(self);
            tokio::spawn(async move { queue.run_fetch(next).await });
        }
    }

    #[instrument(skip(self, pending), fields(supplier = %self.supplier, fragment = %pending.request.fragment))]
    async fn run_fetch(self: Arc<Self>, pending: PendingFetch) {
        let fragment = pending.request.fragment.clone();
        let outcome = match self.client.fetch(&self.supplier, &pending.request).await {
            Ok(payload) => match self.store.save(&fragment, payload.as_ref()) {
                Ok(path) => {
                    debug!(path = %path.display(), "fragment fetched and saved");
                    FetchOutcome::Received
                }
                Err(e) => {
                    warn!(error = %e, "fetched fragment could not be saved");
                    FetchOutcome::Failed
                }
            },
            Err(e) => {
                debug!(error = %e, "fetch failed");
                FetchOutcome::Failed
            }
        };
        if outcome.is_success() {
            metrics::FRAGMENTS_RECEIVED.inc();
        } else {
            metrics::FRAGMENTS_FAILED.inc();
        }

        self.state.lock().in_flight.remove(&fragment.to_string());
        self.reply(&pending.reply, fragment, outcome);
        self.pump();
    }

    fn has_pending(&self, fragment: &FragmentId) -> bool {
        let state = self.state.lock();
        state.in_flight.contains(&fragment.to_string())
            || state.waiting.iter().any(|p| p.request.fragment == *fragment)
    }

    /// Drop waiting fetches of one backup, answering each with `failed`.
    /// Fetches already on the wire run out on their own.
    fn cancel_backup(&self, backup: &BackupId) -> usize {
        let cancelled: Vec<PendingFetch> = {
            let mut state = self.state.lock();
            let (keep, cancel): (VecDeque<_>, VecDeque<_>) = state
                .waiting
                .drain(..)
                .partition(|p| p.request.fragment.backup != *backup);
            state.waiting = keep;
            cancel.into_iter().collect()
        };
        let count = cancelled.len();
        for pending in cancelled {
            metrics::FRAGMENTS_FAILED.inc();
            self.reply(&pending.reply, pending.request.fragment.clone(), FetchOutcome::Failed);
        }
        if count > 0 {
            debug!(supplier = %self.supplier, %backup, count, "cancelled waiting fetches");
        }
        count
    }

    fn close(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let drained: Vec<PendingFetch> = self.state.lock().waiting.drain(..).collect();
        for pending in drained {
            metrics::FRAGMENTS_FAILED.inc();
            self.reply(&pending.reply, pending.request.fragment.clone(), FetchOutcome::Failed);
        }
    }

    fn len(&self) -> usize {
        let state = self.state.lock();
        state.waiting.len() + state.in_flight.len()
    }
}

// =============================================================================
// Request Scheduler
// =============================================================================

/// Registry of per-supplier queues; the Request Queue of the restore flow.
pub struct RequestScheduler {
    config: RequestSchedulerConfig,
    client: Arc<dyn SupplierClient>,
    store: Arc<FragmentStore>,
    queues: DashMap<SupplierId, Arc<SupplierQueue>>,
}

impl RequestScheduler {
    pub fn new(
        config: RequestSchedulerConfig,
        client: Arc<dyn SupplierClient>,
        store: Arc<FragmentStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            client,
            store,
            queues: DashMap::new(),
        })
    }

    fn queue_for(&self, supplier: &SupplierId) -> Arc<SupplierQueue> {
        self.queues
            .entry(supplier.clone())
            .or_insert_with(|| {
                SupplierQueue::new(
                    supplier.clone(),
                    self.config.clone(),
                    Arc::clone(&self.client),
                    Arc::clone(&self.store),
                )
            })
            .clone()
    }

    /// Place one fetch on its supplier's queue.
    pub fn enqueue(&self, request: FragmentRequest, reply: UnboundedSender<FetchReply>) -> bool {
        let queue = self.queue_for(&request.supplier);
        queue.enqueue(request, reply)
    }

    /// Whether a fetch for this fragment is still open at this supplier.
    pub fn has_pending(&self, supplier: &SupplierId, fragment: &FragmentId) -> bool {
        self.queues
            .get(supplier)
            .map(|q| q.has_pending(fragment))
            .unwrap_or(false)
    }

    /// Fail every waiting fetch that belongs to one backup, on all queues.
    pub fn cancel_all(&self, backup: &BackupId) -> usize {
        self.queues.iter().map(|q| q.cancel_backup(backup)).sum()
    }

    /// Open fetches toward one supplier.
    pub fn queue_len(&self, supplier: &SupplierId) -> usize {
        self.queues.get(supplier).map(|q| q.len()).unwrap_or(0)
    }

    /// Refuse new fetches and fail everything still waiting.
    pub fn shutdown(&self) {
        for queue in self.queues.iter() {
            queue.close();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

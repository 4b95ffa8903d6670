//! Restore Worker
//!
//! Drives one restore from first fragment request to the final write. The
//! worker owns all per-restore bookkeeping (presence vectors, the open
//! request map, the failure list, the retry counter) and runs a single
//! event loop:
//!
//! ```text
//!   fetch replies ──┐
//!   decode results ─┤
//!   transfer watch ─┼──► transition() ──► effects ──► store / scheduler /
//!   ping ticks ─────┤       (pure)                    pool / output sink
//!   settle ticks ───┘
//! ```
//!
//! Every input becomes a [`machine::Event`]; the pure transition function
//! decides what happens; this module interprets the returned effects.
//! Effects may feed follow-up events straight back into the loop (a request
//! round that ends with nothing outstanding, a reassembled block that fails
//! to parse), which keeps the machine's view of the world current without
//! re-entrant dispatch.
//!
//! The open-request map is tri-state: absent means never requested, `None`
//! means in flight, `Some(true)`/`Some(false)` mean settled. The map only
//! covers the current block; a fetch still open when the block advances may
//! answer afterwards, so a reply matching no open request (even across a
//! rotated supplier identity) is logged and dropped.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::block::{EncryptedBlock, RestoredBlock};
use crate::contacts::SupplierId;
use crate::domain::events::DomainEvent;
use crate::domain::ports::{FetchOutcome, FetchReply, FragmentRequest, RestoreVerdict};
use crate::ecc::map::EccMap;
use crate::ecc::pool::{RaidOutcome, ReadTask};
use crate::error::Result;
use crate::fragments::id::{BackupId, CustomerId, FragmentId, FragmentKind};
use crate::metrics;
use crate::restore::machine::{transition, BlockStatus, Effect, Event, State};
use crate::restore::supervisor::RestoreContext;
use crate::transfer::monitor::TransferActivity;

// =============================================================================
// Configuration
// =============================================================================

/// Timing knobs of the restore loop, plus what this node knows about its
/// own backups.
#[derive(Debug, Clone)]
pub struct RestoreConfig {
    /// Cadence of the offline-supplier ping while requests are starving
    pub ping_interval: Duration,

    /// Delay before the machine re-evaluates a block after new input
    pub settle_delay: Duration,

    /// Customer identity this node stores backups under, if any
    pub own_customer: Option<CustomerId>,

    /// Parity scheme configured for this node's own backups
    pub own_scheme: Option<String>,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(5),
            settle_delay: Duration::from_millis(10),
            own_customer: None,
            own_scheme: None,
        }
    }
}

// =============================================================================
// RestoreWorker
// =============================================================================

/// Driver for one backup restore.
pub struct RestoreWorker {
    backup: BackupId,
    key_id: String,
    ecc: EccMap,
    ctx: RestoreContext,
    output: File,
    cancel: CancellationToken,
    done: Option<oneshot::Sender<RestoreVerdict>>,

    state: State,
    attempts: u32,
    max_errors: usize,
    block_number: u64,
    next_block: u64,
    blocks_written: u64,
    bytes_written: u64,
    on_hand_data: Vec<bool>,
    on_hand_parity: Vec<bool>,
    block_requests: HashMap<FragmentId, Option<bool>>,
    request_fails: Vec<FragmentId>,
    temp_path: Option<PathBuf>,

    running: bool,
    settle_at: Option<Instant>,

    event_tx: mpsc::UnboundedSender<Event>,
    event_rx: mpsc::UnboundedReceiver<Event>,
    reply_tx: mpsc::UnboundedSender<FetchReply>,
    reply_rx: mpsc::UnboundedReceiver<FetchReply>,
}

impl RestoreWorker {
    pub fn new(
        backup: BackupId,
        key_id: Option<String>,
        ecc: EccMap,
        output: File,
        ctx: RestoreContext,
        cancel: CancellationToken,
        done: oneshot::Sender<RestoreVerdict>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        // two fragments per supplier position, so the failure budget doubles
        let max_errors = ecc.correctable_errors() * 2;
        let data_slots = ecc.data_segments();
        let parity_slots = ecc.parity_segments();
        let key_id = key_id.unwrap_or_else(|| backup.customer.to_string());
        Self {
            backup,
            key_id,
            ecc,
            ctx,
            output,
            cancel,
            done: Some(done),
            state: State::AtStartup,
            attempts: 0,
            max_errors,
            block_number: 0,
            next_block: 0,
            blocks_written: 0,
            bytes_written: 0,
            on_hand_data: vec![false; data_slots],
            on_hand_parity: vec![false; parity_slots],
            block_requests: HashMap::new(),
            request_fails: Vec::new(),
            temp_path: None,
            running: true,
            settle_at: None,
            event_tx,
            event_rx,
            reply_tx,
            reply_rx,
        }
    }

    /// Run the restore to completion.
    ///
    /// The terminal verdict goes out through the completion sender; an `Err`
    /// here means the loop itself broke (output sink I/O), in which case the
    /// caller settles the verdict.
    #[instrument(skip(self), fields(backup = %self.backup, scheme = self.ecc.name()))]
    pub async fn run(mut self) -> Result<()> {
        info!(
            "starting restore, {} suppliers, error budget {}",
            self.ecc.num_suppliers(),
            self.max_errors
        );

        let mut activity = self.ctx.monitor.subscribe();
        let mut monitor_open = true;
        let mut ping = interval_at(
            Instant::now() + self.ctx.config.ping_interval,
            self.ctx.config.ping_interval,
        );

        self.dispatch(Event::Init).await?;

        while self.running {
            let settle_at = self.settle_at;
            let settle = async move {
                match settle_at {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                // external stop
                _ = self.cancel.cancelled() => {
                    self.dispatch(Event::Abort).await?;
                }

                // outcomes of fragment fetches
                Some(reply) = self.reply_rx.recv() => {
                    self.on_fetch_reply(reply).await?;
                }

                // outcomes of decode tasks
                Some(event) = self.event_rx.recv() => {
                    self.dispatch(event).await?;
                }

                // incoming-transfer activity edges
                changed = activity.changed(), if monitor_open => {
                    if changed.is_ok() {
                        let receiving = matches!(
                            *activity.borrow_and_update(),
                            TransferActivity::Receiving
                        );
                        let event = if receiving {
                            Event::DataReceivingStarted
                        } else {
                            Event::DataReceivingStopped
                        };
                        self.dispatch(event).await?;
                    } else {
                        monitor_open = false;
                    }
                }

                // supplier-ping cadence
                _ = ping.tick() => {
                    self.dispatch(Event::PingTick).await?;
                }

                // delayed re-evaluation of the current block
                _ = settle => {
                    self.settle_at = None;
                    self.dispatch(Event::Instant).await?;
                }
            }
        }

        info!(
            "restore loop finished in {} after {} blocks, {} bytes",
            self.state, self.blocks_written, self.bytes_written
        );
        Ok(())
    }

    // =========================================================================
    // Event dispatch
    // =========================================================================

    /// Feed one event through the machine and interpret the effects.
    ///
    /// Follow-up events produced by effects are processed in order before
    /// returning, so one external input settles completely.
    async fn dispatch(&mut self, event: Event) -> Result<()> {
        let mut queue = VecDeque::new();
        queue.push_back(event);
        while let Some(event) = queue.pop_front() {
            if !self.running {
                break;
            }
            let status = self.block_status();
            let name = event.name();
            let before = self.state;
            let outcome = transition(before, event, &status);
            if outcome.next != before {
                debug!(
                    from = %before,
                    to = %outcome.next,
                    event = name,
                    block = self.block_number,
                    "restore state changed"
                );
                self.state = outcome.next;
            }
            for effect in outcome.effects {
                if let Some(follow_up) = self.apply(effect).await? {
                    queue.push_back(follow_up);
                }
            }
        }
        Ok(())
    }

    fn block_status(&self) -> BlockStatus {
        BlockStatus {
            attempts: self.attempts,
            still_correctable: self.request_fails.len() <= self.max_errors,
            fixable: self.ecc.fixable(&self.on_hand_data, &self.on_hand_parity),
            receiving: self.block_requests.values().any(|v| v.is_none()),
        }
    }

    // =========================================================================
    // Effect interpreter
    // =========================================================================

    async fn apply(&mut self, effect: Effect) -> Result<Option<Event>> {
        match effect {
            Effect::Init => {
                self.ctx.rebuild.block(&self.backup);
                let cancelled = self.ctx.scheduler.cancel_all(&self.backup);
                if cancelled > 0 {
                    debug!("cancelled {} stale fetches before starting", cancelled);
                }
                self.publish(DomainEvent::restore_started(self.backup.to_string()))
                    .await;
                Ok(None)
            }

            Effect::ResetAttempts => {
                self.attempts = 1;
                Ok(None)
            }

            Effect::BumpAttempts => {
                self.attempts += 1;
                debug!(
                    "request round {} for block {}",
                    self.attempts, self.block_number
                );
                Ok(None)
            }

            Effect::StartNewBlock => {
                self.block_number = self.next_block;
                self.next_block += 1;
                self.on_hand_data = vec![false; self.ecc.data_segments()];
                self.on_hand_parity = vec![false; self.ecc.parity_segments()];
                self.block_requests.clear();
                self.request_fails.clear();
                debug!("starting block {}", self.block_number);
                Ok(None)
            }

            Effect::ScanLocalFragments => {
                let (data, parity) = self.ctx.store.scan_block(
                    &self.backup,
                    self.block_number,
                    self.ecc.data_segments(),
                    self.ecc.parity_segments(),
                );
                self.on_hand_data = data;
                self.on_hand_parity = parity;
                Ok(None)
            }

            Effect::RequestFragments => Ok(self.run_request_round()),

            Effect::PingOfflineSuppliers => {
                let suppliers = self.ctx.contacts.known_suppliers(&self.backup.customer);
                let recovered = self
                    .ctx
                    .online
                    .ping_offline_suppliers(&suppliers, Arc::clone(&self.ctx.client))
                    .await;
                if recovered > 0 {
                    info!("{} suppliers came back online", recovered);
                }
                Ok(None)
            }

            Effect::SaveFragment { fragment } => {
                match fragment.kind {
                    FragmentKind::Data => self.on_hand_data[fragment.slot] = true,
                    FragmentKind::Parity => self.on_hand_parity[fragment.slot] = true,
                }
                debug!("fragment {} on hand", fragment);
                Ok(None)
            }

            Effect::StartDecode => self.start_decode(),

            Effect::UnwrapBlock { decoded } => Ok(Some(self.unwrap_block(&decoded).await)),

            Effect::WriteBlock { block } => {
                self.write_block(block).await?;
                Ok(None)
            }

            Effect::CancelRequests => {
                let cancelled = self.ctx.scheduler.cancel_all(&self.backup);
                if cancelled > 0 {
                    debug!("cancelled {} open fetches", cancelled);
                }
                Ok(None)
            }

            Effect::RemoveTempFile => {
                self.remove_temp_and_fragments();
                Ok(None)
            }

            Effect::ReportDone => {
                self.output.flush().await?;
                metrics::RESTORES_DONE.inc();
                self.publish(DomainEvent::restore_done(
                    self.backup.to_string(),
                    self.blocks_written,
                ))
                .await;
                if let Some(done) = self.done.take() {
                    let _ = done.send(RestoreVerdict::Done);
                }
                info!(
                    "restore done: {} blocks, {} bytes",
                    self.blocks_written, self.bytes_written
                );
                Ok(None)
            }

            Effect::ReportFailed { verdict } => {
                if verdict == RestoreVerdict::Abort {
                    metrics::RESTORES_ABORTED.inc();
                    self.publish(DomainEvent::restore_aborted(
                        self.backup.to_string(),
                        self.block_number,
                    ))
                    .await;
                } else {
                    metrics::RESTORES_FAILED.inc();
                    self.publish(DomainEvent::restore_failed(
                        self.backup.to_string(),
                        self.block_number,
                        verdict.to_string(),
                    ))
                    .await;
                }
                if let Some(done) = self.done.take() {
                    let _ = done.send(verdict);
                }
                warn!(
                    "restore ended at block {} with verdict {}",
                    self.block_number, verdict
                );
                Ok(None)
            }

            Effect::Teardown => {
                self.ctx.rebuild.unblock(&self.backup);
                self.running = false;
                Ok(None)
            }

            Effect::ArmSettle => {
                self.settle_at = Some(Instant::now() + self.ctx.config.settle_delay);
                Ok(None)
            }
        }
    }

    // =========================================================================
    // Request round
    // =========================================================================

    /// Queue fetches for every fragment of the current block that is neither
    /// on hand nor already requested, then judge the round: more answers to
    /// wait for, a finished round, or a round with too many failures.
    fn run_request_round(&mut self) -> Option<Event> {
        let customer = self.backup.customer.clone();
        let mut to_request: Vec<(SupplierId, FragmentId)> = Vec::new();

        for slot in 0..self.ecc.data_segments() {
            let id = self
                .backup
                .fragment(self.block_number, slot, FragmentKind::Data);
            if self.on_hand_data[slot] {
                self.block_requests.entry(id).or_insert(Some(true));
                continue;
            }
            if self.block_requests.contains_key(&id) {
                continue;
            }
            let supplier = match self.ctx.contacts.supplier_at(&customer, slot) {
                Some(s) => s,
                None => {
                    warn!("no supplier at position {}", slot);
                    continue;
                }
            };
            if self.ctx.online.is_offline(&supplier) {
                debug!("skipping offline supplier {}", supplier);
                continue;
            }
            to_request.push((supplier, id));
        }

        for slot in 0..self.ecc.parity_segments() {
            let id = self
                .backup
                .fragment(self.block_number, slot, FragmentKind::Parity);
            if self.on_hand_parity[slot] {
                self.block_requests.entry(id).or_insert(Some(true));
                continue;
            }
            if self.block_requests.contains_key(&id) {
                continue;
            }
            let supplier = match self.ctx.contacts.supplier_at(&customer, slot) {
                Some(s) => s,
                None => {
                    warn!("no supplier at position {}", slot);
                    continue;
                }
            };
            if self.ctx.online.is_offline(&supplier) {
                debug!("skipping offline supplier {}", supplier);
                continue;
            }
            to_request.push((supplier, id));
        }

        let mut requests_made = 0usize;
        for (supplier, id) in to_request {
            if self.ctx.scheduler.has_pending(&supplier, &id) {
                warn!("fetch for {} already open at {}", id, supplier);
                continue;
            }
            self.block_requests.insert(id.clone(), None);
            let request = FragmentRequest::for_fragment(id.clone(), supplier.clone());
            if self.ctx.scheduler.enqueue(request, self.reply_tx.clone()) {
                requests_made += 1;
            } else {
                self.block_requests.insert(id, Some(false));
            }
        }

        if requests_made > 0 {
            debug!(
                "requested {} fragments for block {}",
                requests_made, self.block_number
            );
            return None;
        }
        let pending = self
            .block_requests
            .values()
            .filter(|v| v.is_none())
            .count();
        if pending > 0 {
            debug!(
                "nothing new to request, {} fetches pending for block {}",
                pending, self.block_number
            );
            return None;
        }
        let failed = self
            .block_requests
            .values()
            .filter(|v| matches!(v, Some(false)))
            .count();
        if failed > self.max_errors {
            error!(
                "{} of the fragment requests for block {} failed, block cannot be read",
                failed, self.block_number
            );
            return Some(Event::RequestFailed);
        }
        Some(Event::RequestFinished)
    }

    // =========================================================================
    // Fetch replies
    // =========================================================================

    /// Fold one fetch outcome into the request map and the machine.
    #[instrument(skip(self, reply), fields(fragment = %reply.fragment, outcome = %reply.outcome))]
    async fn on_fetch_reply(&mut self, reply: FetchReply) -> Result<()> {
        let fragment = match self.resolve_reply_fragment(&reply) {
            Some((fragment, rotated)) => {
                if rotated {
                    metrics::IDENTITY_REMATCHES.inc();
                    self.publish(DomainEvent::identity_rematched(
                        fragment.to_string(),
                        reply.fragment.to_string(),
                    ))
                    .await;
                }
                fragment
            }
            None => {
                // A fetch that was still open when the block advanced can
                // answer after its entry is gone.
                warn!(
                    "dropping reply for {} from {}, no open request matches it",
                    reply.fragment, reply.supplier
                );
                return Ok(());
            }
        };

        match reply.outcome {
            FetchOutcome::InQueue => {
                let settled = self
                    .block_requests
                    .get(&fragment)
                    .map(|v| v.is_some())
                    .unwrap_or(false);
                if settled {
                    error!(
                        "duplicate fetch reported for {} but its request is already settled",
                        fragment
                    );
                    return Ok(());
                }
                warn!("fetch for {} already queued", fragment);
                Ok(())
            }
            FetchOutcome::Received | FetchOutcome::Exist => {
                self.block_requests.insert(fragment.clone(), Some(true));
                if reply.outcome == FetchOutcome::Received {
                    self.publish(DomainEvent::fragment_saved(
                        fragment.to_string(),
                        reply.supplier.as_str(),
                    ))
                    .await;
                }
                self.dispatch(Event::DataReceived { fragment }).await
            }
            FetchOutcome::Failed => {
                self.block_requests.insert(fragment.clone(), Some(false));
                self.request_fails.push(fragment);
                self.dispatch(Event::RequestFailed).await
            }
        }
    }

    /// Match a reply to an open request, tolerating a supplier identity that
    /// moved to a new host between request and reply. Returns the key under
    /// which the request is registered and whether a rotation was involved.
    fn resolve_reply_fragment(&self, reply: &FetchReply) -> Option<(FragmentId, bool)> {
        if self.block_requests.contains_key(&reply.fragment) {
            return Some((reply.fragment.clone(), false));
        }
        let reported = &reply.fragment;
        let matched = self
            .block_requests
            .keys()
            .find(|known| {
                known.same_up_to_host(reported)
                    && self
                        .ctx
                        .contacts
                        .is_same_identity(&known.backup.customer, &reported.backup.customer)
            })
            .cloned()?;
        warn!(
            "reply for {} matched to open request {} after identity rotation",
            reported, matched
        );
        Some((matched, true))
    }

    // =========================================================================
    // Decode & block handling
    // =========================================================================

    /// Hand the current block to the decode pool; the outcome comes back
    /// through the event channel.
    fn start_decode(&mut self) -> Result<Option<Event>> {
        let output = match self.ctx.store.temp_block_path(&self.backup, self.block_number) {
            Ok(path) => path,
            Err(e) => {
                error!("unable to stage decode output: {}", e);
                return Ok(Some(Event::RaidFailed));
            }
        };
        self.temp_path = Some(output.clone());
        let task = ReadTask {
            map: self.ecc.clone(),
            block: self.block_number,
            fragment_dir: self.ctx.store.version_dir(&self.backup),
            output,
        };
        let receiver = match self.ctx.pool.submit_read(task) {
            Ok(rx) => rx,
            Err(e) => {
                warn!("decode pool refused block {}: {}", self.block_number, e);
                return Ok(Some(Event::RaidFailed));
            }
        };

        let events = self.event_tx.clone();
        let publisher = Arc::clone(&self.ctx.publisher);
        let backup_id = self.backup.to_string();
        let block = self.block_number;
        let started = Instant::now();
        tokio::spawn(async move {
            let event = match receiver.await {
                Ok(RaidOutcome::Done { output, bytes }) => {
                    debug!("block {} reassembled, {} bytes", block, bytes);
                    let _ = publisher
                        .publish(DomainEvent::decode_finished(
                            backup_id,
                            block,
                            started.elapsed(),
                        ))
                        .await;
                    Event::RaidDone { output }
                }
                Ok(RaidOutcome::Failed { reason }) => {
                    let _ = publisher
                        .publish(DomainEvent::decode_failed(backup_id, block, reason))
                        .await;
                    Event::RaidFailed
                }
                Err(_) => {
                    let _ = publisher
                        .publish(DomainEvent::decode_failed(
                            backup_id,
                            block,
                            "decode pool dropped the task",
                        ))
                        .await;
                    Event::RaidFailed
                }
            };
            let _ = events.send(event);
        });
        Ok(None)
    }

    /// Parse and open a reassembled block file.
    async fn unwrap_block(&mut self, decoded: &Path) -> Event {
        let bytes = match tokio::fs::read(decoded).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(
                    "unable to read reassembled block file {}: {}",
                    decoded.display(),
                    e
                );
                return Event::BlockFailed;
            }
        };
        if bytes.is_empty() {
            warn!("reassembled block file {} is empty", decoded.display());
            return Event::BlockFailed;
        }
        let block = match EncryptedBlock::parse_framed(&bytes) {
            Ok(block) => block,
            Err(e) => {
                warn!("bad block {}: {}", self.block_number, e);
                return Event::BlockFailed;
            }
        };
        match block.open(self.ctx.vault.as_ref(), &self.key_id) {
            Ok(restored) => Event::BlockRestored { block: restored },
            Err(e) => {
                warn!("block {} failed to open: {}", self.block_number, e);
                Event::BlockFailed
            }
        }
    }

    /// Append one opened block to the output sink.
    async fn write_block(&mut self, block: RestoredBlock) -> Result<()> {
        self.output.write_all(&block.data).await?;
        self.bytes_written += block.data.len() as u64;
        self.blocks_written += 1;
        metrics::BLOCKS_RESTORED.inc();
        self.publish(DomainEvent::block_restored(
            self.backup.to_string(),
            block.block_number,
            block.data.len() as u64,
        ))
        .await;
        debug!(
            "block {} written, {} bytes restored so far",
            block.block_number, self.bytes_written
        );
        Ok(())
    }

    /// Dispose the staged decode file and, unless the store keeps local
    /// copies or a rebuild is running on this backup, the block's local
    /// fragment files.
    fn remove_temp_and_fragments(&mut self) {
        if let Some(path) = self.temp_path.take() {
            self.ctx.store.discard_temp(&path);
        }
        if self.ctx.store.keep_local_copies() {
            return;
        }
        if self.ctx.rebuild.is_rebuilding(&self.backup) {
            debug!("rebuild running on this backup, keeping local fragments");
            return;
        }
        let removed = self.ctx.store.cleanup_block(
            &self.backup,
            self.block_number,
            self.ecc.num_suppliers(),
        );
        if removed > 0 {
            debug!(
                "removed {} local fragment files of block {}",
                removed, self.block_number
            );
        }
    }

    async fn publish(&self, event: DomainEvent) {
        if let Err(e) = self.ctx.publisher.publish(event).await {
            warn!("unable to publish event: {}", e);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

//! Restore Supervisor
//!
//! Owns the registry of live restores (at most one worker per backup id),
//! assembles the shared [`RestoreContext`] every worker runs against, and
//! resolves the parity scheme a backup was written with. Also home of
//! [`RebuildControl`], the small ledger through which restores and the
//! rebuilder stay out of each other's way.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::fs::File;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::block::KeyVault;
use crate::contacts::ContactBook;
use crate::domain::ports::{EventPublisher, RestoreVerdict};
use crate::ecc::map::{EccMap, DEFAULT_SUPPLIER_COUNT, SUPPLIER_COUNTS};
use crate::ecc::pool::RaidPool;
use crate::error::{Error, Result};
use crate::fragments::id::BackupId;
use crate::fragments::store::FragmentStore;
use crate::restore::worker::{RestoreConfig, RestoreWorker};
use crate::transfer::monitor::TransferMonitor;
use crate::transfer::online::OnlineStatusRegistry;
use crate::transfer::queue::{RequestScheduler, SupplierClient};

// =============================================================================
// RestoreContext
// =============================================================================

/// Everything a restore worker needs, shared across workers.
#[derive(Clone)]
pub struct RestoreContext {
    pub store: Arc<FragmentStore>,
    pub scheduler: Arc<RequestScheduler>,
    pub pool: Arc<RaidPool>,
    pub contacts: Arc<ContactBook>,
    pub online: Arc<OnlineStatusRegistry>,
    pub monitor: Arc<TransferMonitor>,
    pub client: Arc<dyn SupplierClient>,
    pub vault: Arc<dyn KeyVault>,
    pub publisher: Arc<dyn EventPublisher>,
    pub rebuild: Arc<RebuildControl>,
    pub config: RestoreConfig,
}

// =============================================================================
// RebuildControl
// =============================================================================

/// Coordination ledger between restores and the fragment rebuilder.
///
/// A restore blocks its backup so the rebuilder leaves the fragments alone
/// while they are being read; the rebuilder flags the backups it is
/// actively working on so a restore does not delete fragments out from
/// under it.
#[derive(Debug, Default)]
pub struct RebuildControl {
    blocked: DashMap<String, ()>,
    active: DashMap<String, ()>,
}

impl RebuildControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forbid rebuilding of this backup while a restore reads it.
    pub fn block(&self, backup: &BackupId) {
        self.blocked.insert(backup.to_string(), ());
    }

    pub fn unblock(&self, backup: &BackupId) {
        self.blocked.remove(&backup.to_string());
    }

    pub fn is_blocked(&self, backup: &BackupId) -> bool {
        self.blocked.contains_key(&backup.to_string())
    }

    /// Rebuilder-side flag: fragments of this backup are being rewritten.
    pub fn set_rebuilding(&self, backup: &BackupId) {
        self.active.insert(backup.to_string(), ());
    }

    pub fn clear_rebuilding(&self, backup: &BackupId) {
        self.active.remove(&backup.to_string());
    }

    pub fn is_rebuilding(&self, backup: &BackupId) -> bool {
        self.active.contains_key(&backup.to_string())
    }
}

// =============================================================================
// RestoreSupervisor
// =============================================================================

struct ActiveRestore {
    cancel: CancellationToken,
}

/// Handle to one running restore.
pub struct RestoreHandle {
    backup: BackupId,
    verdict: oneshot::Receiver<RestoreVerdict>,
    cancel: CancellationToken,
}

impl RestoreHandle {
    pub fn backup(&self) -> &BackupId {
        &self.backup
    }

    /// Ask the worker to stop; the verdict resolves with `abort`.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    /// Wait for the terminal verdict.
    pub async fn wait(self) -> Result<RestoreVerdict> {
        let backup = self.backup;
        self.verdict.await.map_err(|_| Error::WorkerVanished {
            backup_id: backup.to_string(),
        })
    }
}

/// Registry and factory for restore workers.
pub struct RestoreSupervisor {
    ctx: RestoreContext,
    workers: Arc<DashMap<String, ActiveRestore>>,
}

impl RestoreSupervisor {
    pub fn new(ctx: RestoreContext) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            workers: Arc::new(DashMap::new()),
        })
    }

    /// Start restoring one backup into `output`.
    ///
    /// Refused while another restore of the same backup is live.
    #[instrument(skip(self, output, key_id, scheme), fields(backup = %backup))]
    pub fn start_restore(
        &self,
        backup: BackupId,
        output: File,
        key_id: Option<String>,
        scheme: Option<&str>,
    ) -> Result<RestoreHandle> {
        let key = backup.to_string();
        let cancel = CancellationToken::new();
        match self.workers.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                warn!("restore already running");
                return Err(Error::RestoreInProgress { backup_id: key });
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(ActiveRestore {
                    cancel: cancel.clone(),
                });
            }
        }

        let ecc = match self.resolve_scheme(&backup, scheme) {
            Ok(map) => map,
            Err(e) => {
                self.workers.remove(&key);
                return Err(e);
            }
        };

        let (done_tx, done_rx) = oneshot::channel();
        let worker = RestoreWorker::new(
            backup.clone(),
            key_id,
            ecc,
            output,
            self.ctx.clone(),
            cancel.clone(),
            done_tx,
        );

        let workers = Arc::clone(&self.workers);
        let registry_key = key;
        let backup_for_task = backup.clone();
        tokio::spawn(async move {
            let join = tokio::spawn(worker.run());
            match join.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("restore of {} broke: {}", backup_for_task, e),
                Err(e) => error!("restore worker for {} panicked: {}", backup_for_task, e),
            }
            workers.remove(&registry_key);
        });

        Ok(RestoreHandle {
            backup,
            verdict: done_rx,
            cancel,
        })
    }

    /// Cancel a running restore. Returns whether one was live.
    pub fn abort(&self, backup: &BackupId) -> bool {
        match self.workers.get(&backup.to_string()) {
            Some(active) => {
                active.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, backup: &BackupId) -> bool {
        self.workers.contains_key(&backup.to_string())
    }

    pub fn active_count(&self) -> usize {
        self.workers.len()
    }

    /// Work out which parity scheme a backup was written with.
    ///
    /// Best-effort chain: explicit override, this node's own configuration,
    /// majority vote over supplier meta info, the share hint, and finally a
    /// guess from the supplier count. Never a hard failure unless an
    /// explicitly named scheme does not exist.
    fn resolve_scheme(&self, backup: &BackupId, explicit: Option<&str>) -> Result<EccMap> {
        if let Some(name) = explicit {
            let map = EccMap::by_name(name)?;
            info!("parity scheme {} set explicitly", map.name());
            return Ok(map);
        }

        let config = &self.ctx.config;
        if config.own_customer.as_ref() == Some(&backup.customer) {
            if let Some(name) = config.own_scheme.as_deref() {
                let map = EccMap::by_name(name)?;
                info!("parity scheme {} taken from local configuration", map.name());
                return Ok(map);
            }
        }

        if let Some(name) = self.ctx.contacts.scheme_votes(&backup.customer) {
            if let Ok(map) = EccMap::by_name(&name) {
                info!("parity scheme {} recognized from supplier meta info", map.name());
                return Ok(map);
            }
            warn!("suppliers voted for unknown scheme {:?}", name);
        }

        let key_id = backup.customer.to_string();
        if let Some(name) = self.ctx.contacts.share_scheme(&key_id) {
            if let Ok(map) = EccMap::by_name(&name) {
                info!("parity scheme {} recognized from share {}", map.name(), key_id);
                return Ok(map);
            }
            warn!("share {} hints at unknown scheme {:?}", key_id, name);
        }

        let mut count = self.ctx.contacts.known_suppliers(&backup.customer).len();
        if !SUPPLIER_COUNTS.contains(&count) {
            count = DEFAULT_SUPPLIER_COUNT;
        }
        let map = EccMap::for_suppliers(count)?;
        warn!(
            "no meta info found, guessed parity scheme {} from {} known suppliers",
            map.name(),
            count
        );
        Ok(map)
    }
}

// =============================================================================
// Tests
// =============================================================================

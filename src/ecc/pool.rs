//! Decode Task Pool
//!
//! Fragment XOR work is CPU and disk bound, so it runs on the blocking
//! thread pool behind a small semaphore instead of on the async workers.
//! Each submitted task hands back a oneshot receiver; a caller that loses
//! interest (an aborted restore) simply drops the receiver and the outcome
//! falls on the floor, which keeps finished tasks from calling back into
//! state machines that no longer exist.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{oneshot, Semaphore};
use tracing::{debug, error, info, instrument};

use crate::ecc::codec::XorCodec;
use crate::ecc::map::EccMap;
use crate::error::{Error, Result};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the decode pool
#[derive(Debug, Clone)]
pub struct RaidPoolConfig {
    /// Maximum decode/encode tasks running at once
    pub max_concurrent: usize,
}

impl Default for RaidPoolConfig {
    fn default() -> Self {
        Self { max_concurrent: 4 }
    }
}

// =============================================================================
// Tasks
// =============================================================================

/// Reassemble one block from its fragment files.
#[derive(Debug, Clone)]
pub struct ReadTask {
    /// Parity scheme of the backup
    pub map: EccMap,

    /// Block number inside the backup
    pub block: u64,

    /// Directory holding the `block-slot-Kind` fragment files
    pub fragment_dir: PathBuf,

    /// Where the reassembled block file goes
    pub output: PathBuf,
}

/// Split one block file into fragment files.
#[derive(Debug, Clone)]
pub struct MakeTask {
    /// Parity scheme of the backup
    pub map: EccMap,

    /// Block number inside the backup
    pub block: u64,

    /// Serialized block file to split
    pub source: PathBuf,

    /// Directory the fragment files go into
    pub target_dir: PathBuf,
}

/// Terminal outcome of a decode/encode task.
///
/// Deliberately binary: the per-step diagnostics stay in the pool logs, the
/// state machine only branches on done versus failed.
#[derive(Debug)]
pub enum RaidOutcome {
    /// Task finished; `bytes` is the amount written to the output
    Done { output: PathBuf, bytes: u64 },
    /// Task could not finish
    Failed { reason: String },
}

impl RaidOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, RaidOutcome::Done { .. })
    }
}

/// Bookkeeping entry for one running task.
#[derive(Debug, Clone)]
struct ActiveTask {
    kind: &'static str,
    block: u64,
}

// =============================================================================
// RaidPool
// =============================================================================

/// Bounded pool for fragment encode/decode work.
pub struct RaidPool {
    semaphore: Arc<Semaphore>,
    active: Arc<DashMap<u64, ActiveTask>>,
    next_task_id: AtomicU64,
    shutdown: AtomicBool,
}

impl RaidPool {
    pub fn new(config: RaidPoolConfig) -> Arc<Self> {
        info!("starting decode pool, max_concurrent={}", config.max_concurrent);
        Arc::new(Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
            active: Arc::new(DashMap::new()),
            next_task_id: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
        })
    }

    /// Submit a block-reassembly task.
    #[instrument(skip(self, task), fields(block = task.block))]
    pub fn submit_read(&self, task: ReadTask) -> Result<oneshot::Receiver<RaidOutcome>> {
        let ReadTask {
            map,
            block,
            fragment_dir,
            output,
        } = task;
        self.submit("read", block, map, move |codec| {
            let bytes = codec.read_block(block, &fragment_dir, &output)?;
            Ok(RaidOutcome::Done { output, bytes })
        })
    }

    /// Submit a fragment-building task.
    #[instrument(skip(self, task), fields(block = task.block))]
    pub fn submit_make(&self, task: MakeTask) -> Result<oneshot::Receiver<RaidOutcome>> {
        let MakeTask {
            map,
            block,
            source,
            target_dir,
        } = task;
        self.submit("make", block, map, move |codec| {
            let (data, parity) = codec.make_fragments(&source, block, &target_dir)?;
            Ok(RaidOutcome::Done {
                output: target_dir,
                bytes: (data + parity) as u64,
            })
        })
    }

    fn submit<F>(
        &self,
        kind: &'static str,
        block: u64,
        map: EccMap,
        work: F,
    ) -> Result<oneshot::Receiver<RaidOutcome>>
    where
        F: FnOnce(&XorCodec) -> Result<RaidOutcome> + Send + 'static,
    {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(Error::PoolUnavailable("pool is shut down".to_string()));
        }
        let task_id = self.next_task_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        let semaphore = Arc::clone(&self.semaphore);
        let active = Arc::clone(&self.active);
        active.insert(task_id, ActiveTask { kind, block });
        crate::metrics::DECODE_TASKS_SUBMITTED.inc();

        tokio::spawn(async move {
            let permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    active.remove(&task_id);
                    let _ = tx.send(RaidOutcome::Failed {
                        reason: "pool closed while task was queued".to_string(),
                    });
                    return;
                }
            };
            let joined = tokio::task::spawn_blocking(move || {
                let codec = XorCodec::new(map);
                work(&codec)
            })
            .await;
            drop(permit);
            active.remove(&task_id);

            let outcome = match joined {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => {
                    debug!("{} task {} for block {} failed: {}", kind, task_id, block, e);
                    crate::metrics::DECODE_TASKS_FAILED.inc();
                    RaidOutcome::Failed {
                        reason: e.to_string(),
                    }
                }
                Err(e) => {
                    error!("{} task {} for block {} panicked: {}", kind, task_id, block, e);
                    crate::metrics::DECODE_TASKS_FAILED.inc();
                    RaidOutcome::Failed {
                        reason: format!("task panicked: {e}"),
                    }
                }
            };
            // a dropped receiver means nobody is waiting anymore
            let _ = tx.send(outcome);
        });

        Ok(rx)
    }

    /// Number of tasks submitted but not yet finished.
    pub fn active_task_count(&self) -> usize {
        self.active.len()
    }

    /// Refuse new tasks; running tasks finish normally.
    pub fn shutdown(&self) {
        info!("decode pool shutting down");
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

// =============================================================================
// Tests
// =============================================================================

//! Restore Scenario Tests
//!
//! End-to-end restores through the supervisor, with a scripted supplier
//! network standing in for the remote side. Each scenario drives a real
//! worker against the real scheduler, store, codec and decode pool.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tempfile::TempDir;
use tokio::fs::File;
use tokio::sync::Notify;

use shardvault::block::{EncryptedBlock, PassthroughVault};
use shardvault::contacts::{ContactBook, SupplierId, SupplierInfo};
use shardvault::domain::events::InMemoryEventCollector;
use shardvault::domain::ports::{EventPublisher, FragmentRequest, RestoreVerdict};
use shardvault::ecc::pool::{RaidPool, RaidPoolConfig};
use shardvault::error::{Error, Result};
use shardvault::fragments::id::{local_file_name, BackupId, CustomerId, FragmentKind};
use shardvault::fragments::store::{FragmentStore, FragmentStoreConfig};
use shardvault::restore::supervisor::{RebuildControl, RestoreContext, RestoreSupervisor};
use shardvault::restore::worker::RestoreConfig;
use shardvault::transfer::monitor::TransferMonitor;
use shardvault::transfer::online::OnlineStatusRegistry;
use shardvault::transfer::queue::{RequestScheduler, RequestSchedulerConfig, SupplierClient};
use shardvault::{EccMap, XorCodec};

// =============================================================================
// Scripted Supplier Network
// =============================================================================

/// Serves prepared fragment payloads; named suppliers can be dead (every
/// fetch refused) and the whole network can be stalled behind a gate.
struct ScriptedNetwork {
    payloads: DashMap<String, Bytes>,
    dead: DashMap<String, ()>,
    stall: Option<Arc<Notify>>,
    fetches: AtomicUsize,
}

impl ScriptedNetwork {
    fn new() -> Self {
        Self {
            payloads: DashMap::new(),
            dead: DashMap::new(),
            stall: None,
            fetches: AtomicUsize::new(0),
        }
    }

    fn stalled(gate: Arc<Notify>) -> Self {
        let mut network = Self::new();
        network.stall = Some(gate);
        network
    }

    fn kill_supplier(&self, supplier: &str) {
        self.dead.insert(supplier.to_string(), ());
    }
}

#[async_trait]
impl SupplierClient for ScriptedNetwork {
    async fn fetch(&self, supplier: &SupplierId, request: &FragmentRequest) -> Result<Bytes> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.stall {
            gate.notified().await;
        }
        if self.dead.contains_key(supplier.as_str()) {
            return Err(Error::FetchRefused {
                fragment: request.fragment.to_string(),
                reason: "supplier is gone".to_string(),
            });
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
        self.payloads
            .get(&request.fragment.to_string())
            .map(|payload| payload.clone())
            .ok_or_else(|| Error::FetchRefused {
                fragment: request.fragment.to_string(),
                reason: "fragment not held".to_string(),
            })
    }

    async fn ping(&self, _supplier: &SupplierId) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// Scenario Fixtures
// =============================================================================

const SUPPLIERS: [&str; 2] = ["s0@host-a.net", "s1@host-b.net"];

fn backup() -> BackupId {
    let customer = CustomerId::new("master", "alice", "idhost.org");
    BackupId::new(customer, "0", "F20240115010203PM")
}

/// Context around a scripted network, suppliers registered and online.
fn context(
    root: &Path,
    client: Arc<ScriptedNetwork>,
    keep_local_copies: bool,
) -> (RestoreContext, Arc<InMemoryEventCollector>) {
    let store = Arc::new(FragmentStore::new(FragmentStoreConfig {
        root: root.to_path_buf(),
        keep_local_copies,
    }));
    let client: Arc<dyn SupplierClient> = client;
    let scheduler = RequestScheduler::new(
        RequestSchedulerConfig::default(),
        Arc::clone(&client),
        Arc::clone(&store),
    );
    let contacts = Arc::new(ContactBook::new());
    contacts.set_suppliers(
        &backup().customer,
        SUPPLIERS.iter().map(|s| Some(SupplierInfo::new(*s))).collect(),
    );
    let online = Arc::new(OnlineStatusRegistry::new());
    for supplier in SUPPLIERS {
        online.mark_online(&SupplierId::from(supplier));
    }
    let events = Arc::new(InMemoryEventCollector::new());
    let ctx = RestoreContext {
        store,
        scheduler,
        pool: RaidPool::new(RaidPoolConfig::default()),
        contacts,
        online,
        monitor: Arc::new(TransferMonitor::new()),
        client,
        vault: Arc::new(PassthroughVault),
        publisher: Arc::clone(&events) as Arc<dyn EventPublisher>,
        rebuild: Arc::new(RebuildControl::new()),
        config: RestoreConfig::default(),
    };
    (ctx, events)
}

/// Frame and split `blocks`, loading every fragment into the network.
fn seed_network(network: &ScriptedNetwork, blocks: &[&[u8]]) {
    let codec = XorCodec::new(EccMap::by_name("ecc/2x2").unwrap());
    let staging = TempDir::new().unwrap();
    for (number, plain) in blocks.iter().enumerate() {
        let block = EncryptedBlock {
            creator: "alice@idhost.org".to_string(),
            backup_id: backup().to_string(),
            block_number: number as u64,
            last_block: number == blocks.len() - 1,
            encrypted_session_key: b"session".to_vec(),
            session_key_type: "AES".to_string(),
            length: plain.len() as u64,
            payload: plain.to_vec(),
            signature: Vec::new(),
        };
        let source = staging.path().join(format!("block-{number}"));
        std::fs::write(&source, block.write_framed().unwrap()).unwrap();
        codec
            .make_fragments(&source, number as u64, staging.path())
            .unwrap();
        for kind in [FragmentKind::Data, FragmentKind::Parity] {
            for slot in 0..2 {
                let bytes =
                    std::fs::read(staging.path().join(local_file_name(number as u64, slot, kind)))
                        .unwrap();
                let id = backup().fragment(number as u64, slot, kind);
                network.payloads.insert(id.to_string(), Bytes::from(bytes));
            }
        }
    }
}

async fn wait_until_inactive(supervisor: &RestoreSupervisor) {
    for _ in 0..100 {
        if !supervisor.is_active(&backup()) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("restore stayed registered after its verdict");
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn test_restore_streams_blocks_from_suppliers() {
    let dir = TempDir::new().unwrap();
    let network = Arc::new(ScriptedNetwork::new());
    seed_network(&network, &[b"alpha ", b"beta ", b"gamma!"]);
    let (ctx, events) = context(dir.path(), Arc::clone(&network), true);
    let supervisor = RestoreSupervisor::new(ctx);

    let out_path = dir.path().join("restored.bin");
    let output = File::create(&out_path).await.unwrap();
    let handle = supervisor
        .start_restore(backup(), output, None, Some("ecc/2x2"))
        .unwrap();

    assert_eq!(handle.wait().await.unwrap(), RestoreVerdict::Done);
    assert_eq!(std::fs::read(&out_path).unwrap(), b"alpha beta gamma!");
    wait_until_inactive(&supervisor).await;

    // every fragment went over the wire exactly once
    assert_eq!(network.fetches.load(Ordering::SeqCst), 12);
    assert_eq!(events.events_of_type("RestoreStarted").len(), 1);
    assert_eq!(events.events_of_type("BlockRestored").len(), 3);
    assert_eq!(events.events_of_type("RestoreDone").len(), 1);
}

#[tokio::test]
async fn test_restore_survives_a_dead_supplier() {
    let dir = TempDir::new().unwrap();
    let network = Arc::new(ScriptedNetwork::new());
    seed_network(&network, &[b"first block ", b"second block"]);
    network.kill_supplier(SUPPLIERS[0]);
    let (ctx, _events) = context(dir.path(), Arc::clone(&network), true);
    let supervisor = RestoreSupervisor::new(ctx);

    let out_path = dir.path().join("restored.bin");
    let output = File::create(&out_path).await.unwrap();
    let handle = supervisor
        .start_restore(backup(), output, None, Some("ecc/2x2"))
        .unwrap();

    // supplier 0 refuses everything; each block is rebuilt from
    // supplier 1's data and parity fragments alone
    assert_eq!(handle.wait().await.unwrap(), RestoreVerdict::Done);
    assert_eq!(std::fs::read(&out_path).unwrap(), b"first block second block");
}

#[tokio::test]
async fn test_restore_fails_when_no_supplier_delivers() {
    let dir = TempDir::new().unwrap();
    let network = Arc::new(ScriptedNetwork::new());
    // nothing seeded: every fetch fails
    let (ctx, events) = context(dir.path(), Arc::clone(&network), true);
    let supervisor = RestoreSupervisor::new(ctx);

    let output = File::create(dir.path().join("restored.bin")).await.unwrap();
    let handle = supervisor
        .start_restore(backup(), output, None, Some("ecc/2x2"))
        .unwrap();

    assert_eq!(handle.wait().await.unwrap(), RestoreVerdict::Failed);
    wait_until_inactive(&supervisor).await;
    assert_eq!(events.events_of_type("RestoreFailed").len(), 1);
    assert!(events.events_of_type("RestoreDone").is_empty());
}

#[tokio::test]
async fn test_abort_stops_a_stalled_restore() {
    let dir = TempDir::new().unwrap();
    let gate = Arc::new(Notify::new());
    let network = Arc::new(ScriptedNetwork::stalled(Arc::clone(&gate)));
    let (ctx, events) = context(dir.path(), Arc::clone(&network), true);
    let supervisor = RestoreSupervisor::new(ctx);

    let output = File::create(dir.path().join("restored.bin")).await.unwrap();
    let handle = supervisor
        .start_restore(backup(), output, None, Some("ecc/2x2"))
        .unwrap();

    // let the first request round reach the stalled network
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(network.fetches.load(Ordering::SeqCst) > 0);
    assert!(supervisor.abort(&backup()));

    assert_eq!(handle.wait().await.unwrap(), RestoreVerdict::Abort);
    wait_until_inactive(&supervisor).await;
    assert_eq!(events.events_of_type("RestoreAborted").len(), 1);

    // no decode ever started, so no temp output may be left behind
    let tmp = dir.path().join(".tmp");
    let leftovers = std::fs::read_dir(&tmp)
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn test_abort_without_active_restore_returns_false() {
    let dir = TempDir::new().unwrap();
    let network = Arc::new(ScriptedNetwork::new());
    let (ctx, _events) = context(dir.path(), network, true);
    let supervisor = RestoreSupervisor::new(ctx);
    assert!(!supervisor.abort(&backup()));
}

#[tokio::test]
async fn test_concurrent_restore_of_same_backup_is_refused() {
    let dir = TempDir::new().unwrap();
    let gate = Arc::new(Notify::new());
    let network = Arc::new(ScriptedNetwork::stalled(Arc::clone(&gate)));
    let (ctx, _events) = context(dir.path(), network, true);
    let supervisor = RestoreSupervisor::new(ctx);

    let output = File::create(dir.path().join("a.bin")).await.unwrap();
    let handle = supervisor
        .start_restore(backup(), output, None, Some("ecc/2x2"))
        .unwrap();

    let second = File::create(dir.path().join("b.bin")).await.unwrap();
    let refused = supervisor.start_restore(backup(), second, None, Some("ecc/2x2"));
    assert!(matches!(refused, Err(Error::RestoreInProgress { .. })));

    handle.abort();
    assert_eq!(handle.wait().await.unwrap(), RestoreVerdict::Abort);
}

#[tokio::test]
async fn test_discard_fragments_empties_the_version_dir() {
    let dir = TempDir::new().unwrap();
    let network = Arc::new(ScriptedNetwork::new());
    seed_network(&network, &[b"one ", b"two "]);
    let (ctx, _events) = context(dir.path(), Arc::clone(&network), false);
    let store = Arc::clone(&ctx.store);
    let supervisor = RestoreSupervisor::new(ctx);

    let out_path = dir.path().join("restored.bin");
    let output = File::create(&out_path).await.unwrap();
    let handle = supervisor
        .start_restore(backup(), output, None, Some("ecc/2x2"))
        .unwrap();
    assert_eq!(handle.wait().await.unwrap(), RestoreVerdict::Done);
    assert_eq!(std::fs::read(&out_path).unwrap(), b"one two ");

    // with local copies off, each restored block's fragments are dropped
    let version_dir = store.version_dir(&backup());
    let remaining = std::fs::read_dir(&version_dir)
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(remaining, 0);
}

#[tokio::test]
async fn test_fragments_are_kept_by_default() {
    let dir = TempDir::new().unwrap();
    let network = Arc::new(ScriptedNetwork::new());
    seed_network(&network, &[b"sticky"]);
    let (ctx, _events) = context(dir.path(), Arc::clone(&network), true);
    let store = Arc::clone(&ctx.store);
    let supervisor = RestoreSupervisor::new(ctx);

    let output = File::create(dir.path().join("restored.bin")).await.unwrap();
    let handle = supervisor
        .start_restore(backup(), output, None, Some("ecc/2x2"))
        .unwrap();
    assert_eq!(handle.wait().await.unwrap(), RestoreVerdict::Done);

    let version_dir = store.version_dir(&backup());
    let names: Vec<String> = std::fs::read_dir(&version_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert!(names.contains(&"0-0-Data".to_string()));
    assert!(names.contains(&"0-1-Parity".to_string()));
}

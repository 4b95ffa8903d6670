//! ShardVault Restore Tool
//!
//! Rebuilds one backup from locally cached erasure-coded fragments.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                    shardvault restore                      │
//! ├────────────────────────────────────────────────────────────┤
//! │  ┌────────────┐    ┌─────────────┐    ┌────────────────┐   │
//! │  │  Fragment  │───▶│   Restore   │───▶│  Output file   │   │
//! │  │   Store    │    │   Worker    │    │  (plaintext)   │   │
//! │  └────────────┘    └─────────────┘    └────────────────┘   │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! The tool runs with the local-only supplier client: fragments must
//! already sit in the fragment store, remote fetches always miss. Wiring a
//! network transport in means handing the supervisor a real
//! [`SupplierClient`](shardvault::transfer::SupplierClient).

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::fs::File;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use shardvault::block::PassthroughVault;
use shardvault::contacts::ContactBook;
use shardvault::domain::events::LoggingEventPublisher;
use shardvault::domain::ports::RestoreVerdict;
use shardvault::ecc::pool::{RaidPool, RaidPoolConfig};
use shardvault::error::Result;
use shardvault::fragments::id::BackupId;
use shardvault::fragments::store::{FragmentStore, FragmentStoreConfig};
use shardvault::restore::supervisor::{RebuildControl, RestoreContext, RestoreSupervisor};
use shardvault::restore::worker::RestoreConfig;
use shardvault::transfer::monitor::TransferMonitor;
use shardvault::transfer::online::OnlineStatusRegistry;
use shardvault::transfer::queue::{
    LocalOnlyClient, RequestScheduler, RequestSchedulerConfig, SupplierClient,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// ShardVault - restore an erasure-coded backup to a plain file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Backup to restore, as `alias$user@host:path/version`
    backup: String,

    /// File the restored plaintext is written to
    output: PathBuf,

    /// Root directory of the local fragment store
    #[arg(long, env = "SHARDVAULT_STORE_ROOT", default_value = ".shardvault/fragments")]
    store_root: PathBuf,

    /// Key id used to unwrap the block session keys (defaults to the
    /// backup's customer id)
    #[arg(long, env = "SHARDVAULT_KEY_ID")]
    key_id: Option<String>,

    /// Parity scheme override, e.g. `ecc/4x4` (resolved from meta info
    /// when omitted)
    #[arg(long)]
    scheme: Option<String>,

    /// Delete local fragments of each block once it is written out
    #[arg(long, env = "SHARDVAULT_DISCARD_FRAGMENTS")]
    discard_fragments: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    info!("Starting ShardVault restore");
    info!("  Backup: {}", args.backup);
    info!("  Output: {}", args.output.display());
    info!("  Store root: {}", args.store_root.display());
    info!("  Keep local fragments: {}", !args.discard_fragments);

    let backup: BackupId = args.backup.parse()?;
    let output = File::create(&args.output).await?;

    let store = Arc::new(FragmentStore::new(FragmentStoreConfig {
        root: args.store_root.clone(),
        keep_local_copies: !args.discard_fragments,
    }));
    let client: Arc<dyn SupplierClient> = Arc::new(LocalOnlyClient);
    let scheduler = RequestScheduler::new(
        RequestSchedulerConfig::default(),
        Arc::clone(&client),
        Arc::clone(&store),
    );
    let ctx = RestoreContext {
        store,
        scheduler: Arc::clone(&scheduler),
        pool: RaidPool::new(RaidPoolConfig::default()),
        contacts: Arc::new(ContactBook::new()),
        online: Arc::new(OnlineStatusRegistry::new()),
        monitor: Arc::new(TransferMonitor::new()),
        client,
        vault: Arc::new(PassthroughVault),
        publisher: Arc::new(LoggingEventPublisher),
        rebuild: Arc::new(RebuildControl::new()),
        config: RestoreConfig::default(),
    };

    let supervisor = RestoreSupervisor::new(ctx);
    let handle = supervisor.start_restore(backup, output, args.key_id, args.scheme.as_deref())?;
    let verdict = handle.wait().await?;

    scheduler.shutdown();

    match verdict {
        RestoreVerdict::Done => {
            info!("Restore finished, output at {}", args.output.display());
            Ok(())
        }
        RestoreVerdict::Failed => {
            error!("Restore failed, output file is incomplete");
            std::process::exit(1);
        }
        RestoreVerdict::Abort => {
            warn!("Restore aborted");
            std::process::exit(2);
        }
    }
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

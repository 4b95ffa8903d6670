//! Transfer Plumbing
//!
//! Everything between a restore worker and the suppliers' bytes:
//!
//! - **Queue** (`queue.rs`) - per-supplier FIFO fetch queues behind the
//!   `SupplierClient` port
//! - **Monitor** (`monitor.rs`) - watch channel announcing incoming
//!   transfer activity
//! - **Online** (`online.rs`) - supplier reachability oracle and pinger

pub mod monitor;
pub mod online;
pub mod queue;

pub use monitor::{TransferActivity, TransferMonitor};
pub use online::OnlineStatusRegistry;
pub use queue::{LocalOnlyClient, RequestScheduler, RequestSchedulerConfig, SupplierClient};

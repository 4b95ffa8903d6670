//! ShardVault - Erasure-Coded Restore Engine
//!
//! Rebuilds a customer's backup out of XOR-parity fragments spread across a
//! ring of supplier nodes. Blocks are fetched fragment by fragment, decoded
//! as soon as enough fragments are on hand, decrypted, and streamed in order
//! into the output file.
//!
//! # Architecture
//!
//! One restore is one worker task around a pure state machine:
//!
//! ```text
//! Supervisor (registry) → Worker (async driver) → Machine (decisions)
//!                             │
//!             scheduler / store / raid pool / vault (effects)
//! ```
//!
//! # Modules
//!
//! - [`block`] - encrypted block framing, session key unwrap
//! - [`contacts`] - supplier rosters, identity rotation, scheme votes
//! - [`domain`] - ports and domain events (DDD)
//! - [`ecc`] - parity scheme tables, XOR codec, decode pool
//! - [`error`] - error types
//! - [`fragments`] - fragment addressing and the local fragment store
//! - [`metrics`] - Prometheus counters
//! - [`restore`] - the restore machine, worker and supervisor
//! - [`transfer`] - supplier fetch queues, activity monitor, online status

pub mod block;
pub mod contacts;
pub mod domain;
pub mod ecc;
pub mod error;
pub mod fragments;
pub mod metrics;
pub mod restore;
pub mod transfer;

// Re-export commonly used types
pub use block::{EncryptedBlock, KeyVault, RestoredBlock};
pub use contacts::{ContactBook, SupplierId, SupplierInfo};
pub use domain::{DomainEvent, EventPublisher, FetchReply, RestoreVerdict};
pub use ecc::{EccMap, RaidPool, XorCodec};
pub use error::{Error, Result};
pub use fragments::{BackupId, CustomerId, FragmentId, FragmentKind, FragmentStore};
pub use restore::{RestoreContext, RestoreHandle, RestoreSupervisor};
pub use transfer::{RequestScheduler, SupplierClient};

// Domain ports are defined for future adapter implementations
#![allow(dead_code)]

//! Domain Ports (DDD Port/Adapter Pattern)
//!
//! Core abstractions the restore domain depends on, plus the small value
//! objects that cross layer boundaries. Infrastructure adapters implement
//! the traits.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Domain Layer                            │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                    Ports (Traits)                    │    │
//! │  │   EventPublisher │ KeyVault │ SupplierClient         │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Infrastructure Layer                       │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                  Adapters (Impls)                    │    │
//! │  │  LoggingEventPublisher │ PassthroughVault │ Local…   │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! `KeyVault` lives next to the block object in [`crate::block`];
//! `SupplierClient` lives next to the scheduler in [`crate::transfer`].

use async_trait::async_trait;

use crate::contacts::SupplierId;
use crate::error::Result;
use crate::fragments::id::{CustomerId, FragmentId};

// =============================================================================
// Value Objects
// =============================================================================

/// Terminal verdict of one restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreVerdict {
    /// Every block written to the output sink
    Done,
    /// Retry budget exhausted, or a block failed to decode or unwrap
    Failed,
    /// Stopped from outside before completion
    Abort,
}

impl std::fmt::Display for RestoreVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RestoreVerdict::Done => write!(f, "done"),
            RestoreVerdict::Failed => write!(f, "failed"),
            RestoreVerdict::Abort => write!(f, "abort"),
        }
    }
}

/// Answer the request machinery gives for one fragment fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Payload arrived from the supplier and was saved locally
    Received,
    /// Fragment was already present in the local store
    Exist,
    /// Supplier unreachable, refused, or returned garbage
    Failed,
    /// Duplicate request folded into one already waiting in the queue
    InQueue,
}

impl FetchOutcome {
    /// Whether this outcome closes the request.
    ///
    /// `InQueue` is informational; a final answer for the same fragment
    /// still follows.
    pub fn is_final(&self) -> bool {
        !matches!(self, FetchOutcome::InQueue)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Received | FetchOutcome::Exist)
    }
}

impl std::fmt::Display for FetchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchOutcome::Received => write!(f, "received"),
            FetchOutcome::Exist => write!(f, "exist"),
            FetchOutcome::Failed => write!(f, "failed"),
            FetchOutcome::InQueue => write!(f, "in queue"),
        }
    }
}

/// One fragment fetch to be placed on a supplier's queue.
#[derive(Debug, Clone)]
pub struct FragmentRequest {
    /// Customer the fragment belongs to
    pub owner: CustomerId,
    /// Fragment to retrieve
    pub fragment: FragmentId,
    /// Supplier expected to hold it
    pub supplier: SupplierId,
}

impl FragmentRequest {
    /// Build a request for a fragment, owner taken from its backup id.
    pub fn for_fragment(fragment: FragmentId, supplier: SupplierId) -> Self {
        Self {
            owner: fragment.backup.customer.clone(),
            fragment,
            supplier,
        }
    }
}

/// Reply delivered back to the requester, exactly once per final outcome.
///
/// `fragment` is the id as the remote side reported it. After an identity
/// rotation it may carry a different host than the id that was requested,
/// so consumers match replies by logical identity, not by string equality.
#[derive(Debug, Clone)]
pub struct FetchReply {
    pub fragment: FragmentId,
    pub supplier: SupplierId,
    pub outcome: FetchOutcome,
}

/// Reachability of one supplier as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnlineStatus {
    Online,
    Offline,
}

impl OnlineStatus {
    pub fn is_offline(&self) -> bool {
        matches!(self, OnlineStatus::Offline)
    }
}

// =============================================================================
// Event Publisher Port
// =============================================================================

use super::events::DomainEvent;

/// Port for publishing domain events.
///
/// This trait abstracts event publishing, allowing different backends
/// (logging, in-memory, message bus) to be used.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a domain event.
    async fn publish(&self, event: DomainEvent) -> Result<()>;

    /// Publish multiple events.
    async fn publish_all(&self, events: Vec<DomainEvent>) -> Result<()>;
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragments::id::{BackupId, FragmentKind};

    fn fragment() -> FragmentId {
        let customer = CustomerId::new("master", "alice", "idhost.org");
        BackupId::new(customer, "0", "F20240115010203PM").fragment(0, 1, FragmentKind::Data)
    }

    #[test]
    fn test_verdict_display() {
        assert_eq!(RestoreVerdict::Done.to_string(), "done");
        assert_eq!(RestoreVerdict::Failed.to_string(), "failed");
        assert_eq!(RestoreVerdict::Abort.to_string(), "abort");
    }

    #[test]
    fn test_outcome_finality() {
        assert!(FetchOutcome::Received.is_final());
        assert!(FetchOutcome::Exist.is_final());
        assert!(FetchOutcome::Failed.is_final());
        assert!(!FetchOutcome::InQueue.is_final());
    }

    #[test]
    fn test_outcome_success() {
        assert!(FetchOutcome::Received.is_success());
        assert!(FetchOutcome::Exist.is_success());
        assert!(!FetchOutcome::Failed.is_success());
        assert!(!FetchOutcome::InQueue.is_success());
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(FetchOutcome::InQueue.to_string(), "in queue");
        assert_eq!(FetchOutcome::Received.to_string(), "received");
    }

    #[test]
    fn test_request_owner_defaults_to_backup_customer() {
        let req = FragmentRequest::for_fragment(fragment(), SupplierId::from("s0@host-a.net"));
        assert_eq!(req.owner, CustomerId::new("master", "alice", "idhost.org"));
    }

    #[test]
    fn test_online_status() {
        assert!(OnlineStatus::Offline.is_offline());
        assert!(!OnlineStatus::Online.is_offline());
    }
}

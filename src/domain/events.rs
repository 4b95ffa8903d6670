// Domain events are defined for future adapter implementations
#![allow(dead_code)]

//! Domain Events
//!
//! This module defines domain events that represent significant occurrences
//! in the system. Events are immutable records of things that have happened.
//!
//! # Usage
//!
//! Domain events are used for:
//! - Audit logging
//! - Decoupling components
//! - Observing restore progress from tests
//!
//! # Example
//!
//! ```ignore
//! let event = DomainEvent::restore_started("master$alice@idhost.org:0/F20240115010203PM");
//!
//! event_publisher.publish(event).await?;
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

use super::ports::EventPublisher;
use crate::error::Result;

/// Domain event representing a significant occurrence in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DomainEvent {
    // =========================================================================
    // Restore Lifecycle Events
    // =========================================================================
    /// A restore worker was created and began requesting fragments.
    RestoreStarted {
        backup_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A restore finished with every block written out.
    RestoreDone {
        backup_id: String,
        blocks_written: u64,
        timestamp: DateTime<Utc>,
    },

    /// A restore failed before reaching the last block.
    RestoreFailed {
        backup_id: String,
        block_number: u64,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A restore was stopped from outside.
    RestoreAborted {
        backup_id: String,
        block_number: u64,
        timestamp: DateTime<Utc>,
    },

    // =========================================================================
    // Block Events
    // =========================================================================
    /// One block was decoded, unwrapped and written to the output sink.
    BlockRestored {
        backup_id: String,
        block_number: u64,
        size_bytes: u64,
        timestamp: DateTime<Utc>,
    },

    /// The decode engine reconstructed one block from its fragments.
    DecodeFinished {
        backup_id: String,
        block_number: u64,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The decode engine gave up on one block.
    DecodeFailed {
        backup_id: String,
        block_number: u64,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    // =========================================================================
    // Fragment Events
    // =========================================================================
    /// An incoming fragment was written into the local store.
    FragmentSaved {
        fragment: String,
        supplier: String,
        timestamp: DateTime<Utc>,
    },

    /// A reply came back under a rotated identity and was matched to the
    /// requested fragment by its logical coordinates.
    IdentityRematched {
        requested: String,
        reported: String,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            DomainEvent::RestoreStarted { timestamp, .. } => *timestamp,
            DomainEvent::RestoreDone { timestamp, .. } => *timestamp,
            DomainEvent::RestoreFailed { timestamp, .. } => *timestamp,
            DomainEvent::RestoreAborted { timestamp, .. } => *timestamp,
            DomainEvent::BlockRestored { timestamp, .. } => *timestamp,
            DomainEvent::DecodeFinished { timestamp, .. } => *timestamp,
            DomainEvent::DecodeFailed { timestamp, .. } => *timestamp,
            DomainEvent::FragmentSaved { timestamp, .. } => *timestamp,
            DomainEvent::IdentityRematched { timestamp, .. } => *timestamp,
        }
    }

    /// Get the event type name.
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::RestoreStarted { .. } => "RestoreStarted",
            DomainEvent::RestoreDone { .. } => "RestoreDone",
            DomainEvent::RestoreFailed { .. } => "RestoreFailed",
            DomainEvent::RestoreAborted { .. } => "RestoreAborted",
            DomainEvent::BlockRestored { .. } => "BlockRestored",
            DomainEvent::DecodeFinished { .. } => "DecodeFinished",
            DomainEvent::DecodeFailed { .. } => "DecodeFailed",
            DomainEvent::FragmentSaved { .. } => "FragmentSaved",
            DomainEvent::IdentityRematched { .. } => "IdentityRematched",
        }
    }

    /// Get the backup ID if applicable.
    pub fn backup_id(&self) -> Option<&str> {
        match self {
            DomainEvent::RestoreStarted { backup_id, .. } => Some(backup_id),
            DomainEvent::RestoreDone { backup_id, .. } => Some(backup_id),
            DomainEvent::RestoreFailed { backup_id, .. } => Some(backup_id),
            DomainEvent::RestoreAborted { backup_id, .. } => Some(backup_id),
            DomainEvent::BlockRestored { backup_id, .. } => Some(backup_id),
            DomainEvent::DecodeFinished { backup_id, .. } => Some(backup_id),
            DomainEvent::DecodeFailed { backup_id, .. } => Some(backup_id),
            _ => None,
        }
    }
}

// =============================================================================
// Event Builders
// =============================================================================

impl DomainEvent {
    /// Create a RestoreStarted event.
    pub fn restore_started(backup_id: impl Into<String>) -> Self {
        DomainEvent::RestoreStarted {
            backup_id: backup_id.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a RestoreDone event.
    pub fn restore_done(backup_id: impl Into<String>, blocks_written: u64) -> Self {
        DomainEvent::RestoreDone {
            backup_id: backup_id.into(),
            blocks_written,
            timestamp: Utc::now(),
        }
    }

    /// Create a RestoreFailed event.
    pub fn restore_failed(
        backup_id: impl Into<String>,
        block_number: u64,
        reason: impl Into<String>,
    ) -> Self {
        DomainEvent::RestoreFailed {
            backup_id: backup_id.into(),
            block_number,
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a RestoreAborted event.
    pub fn restore_aborted(backup_id: impl Into<String>, block_number: u64) -> Self {
        DomainEvent::RestoreAborted {
            backup_id: backup_id.into(),
            block_number,
            timestamp: Utc::now(),
        }
    }

    /// Create a BlockRestored event.
    pub fn block_restored(
        backup_id: impl Into<String>,
        block_number: u64,
        size_bytes: u64,
    ) -> Self {
        DomainEvent::BlockRestored {
            backup_id: backup_id.into(),
            block_number,
            size_bytes,
            timestamp: Utc::now(),
        }
    }

    /// Create a DecodeFinished event.
    pub fn decode_finished(
        backup_id: impl Into<String>,
        block_number: u64,
        duration: Duration,
    ) -> Self {
        DomainEvent::DecodeFinished {
            backup_id: backup_id.into(),
            block_number,
            duration_ms: duration.as_millis() as u64,
            timestamp: Utc::now(),
        }
    }

    /// Create a DecodeFailed event.
    pub fn decode_failed(
        backup_id: impl Into<String>,
        block_number: u64,
        reason: impl Into<String>,
    ) -> Self {
        DomainEvent::DecodeFailed {
            backup_id: backup_id.into(),
            block_number,
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a FragmentSaved event.
    pub fn fragment_saved(fragment: impl Into<String>, supplier: impl Into<String>) -> Self {
        DomainEvent::FragmentSaved {
            fragment: fragment.into(),
            supplier: supplier.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create an IdentityRematched event.
    pub fn identity_rematched(requested: impl Into<String>, reported: impl Into<String>) -> Self {
        DomainEvent::IdentityRematched {
            requested: requested.into(),
            reported: reported.into(),
            timestamp: Utc::now(),
        }
    }
}

// =============================================================================
// Publisher Implementations
// =============================================================================

/// Publisher that writes every event to the tracing log.
#[derive(Debug, Default, Clone)]
pub struct LoggingEventPublisher;

#[async_trait]
impl EventPublisher for LoggingEventPublisher {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        match serde_json::to_string(&event) {
            Ok(payload) => info!(event = event.event_type(), %payload, "domain event"),
            Err(e) => warn!(event = event.event_type(), error = %e, "unserializable domain event"),
        }
        Ok(())
    }

    async fn publish_all(&self, events: Vec<DomainEvent>) -> Result<()> {
        for event in events {
            self.publish(event).await?;
        }
        Ok(())
    }
}

/// Publisher that stores events in memory, for tests and introspection.
#[derive(Debug, Default)]
pub struct InMemoryEventCollector {
    events: Mutex<Vec<DomainEvent>>,
}

impl InMemoryEventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything published so far.
    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().clone()
    }

    /// Events of one type, in publication order.
    pub fn events_of_type(&self, event_type: &str) -> Vec<DomainEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .cloned()
            .collect()
    }

    /// Drain the collected events.
    pub fn take(&self) -> Vec<DomainEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventCollector {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        self.events.lock().push(event);
        Ok(())
    }

    async fn publish_all(&self, events: Vec<DomainEvent>) -> Result<()> {
        self.events.lock().extend(events);
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

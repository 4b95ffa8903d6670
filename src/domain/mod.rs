// These are public API re-exports - they may not be used internally yet
#![allow(unused_imports)]

//! Domain Layer
//!
//! This module contains the core domain logic following Domain-Driven Design principles.
//!
//! # Architecture
//!
//! The domain layer is organized into:
//!
//! - **Ports** (`ports.rs`) - Trait abstractions for external dependencies
//! - **Events** (`events.rs`) - Domain events for audit and decoupling
//!
//! # Usage
//!
//! ```ignore
//! use shardvault::domain::ports::EventPublisher;
//! use shardvault::domain::events::DomainEvent;
//!
//! // Publish through the port so tests can observe the stream
//! async fn report_block<P>(publisher: &P, backup_id: &str, block: u64) -> Result<()>
//! where
//!     P: EventPublisher,
//! {
//!     publisher
//!         .publish(DomainEvent::block_restored(backup_id, block, 0))
//!         .await
//! }
//! ```

pub mod events;
pub mod ports;

// Re-export commonly used types
pub use events::{DomainEvent, InMemoryEventCollector, LoggingEventPublisher};
pub use ports::{
    // Port traits
    EventPublisher,
    // Value objects
    FetchOutcome,
    FetchReply,
    FragmentRequest,
    OnlineStatus,
    RestoreVerdict,
};

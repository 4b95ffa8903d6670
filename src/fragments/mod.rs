//! Fragment Addressing & Local Storage
//!
//! A backup block is stored as `2N` fragment files spread over `N`
//! suppliers. This module owns how those fragments are named
//! ([`id::FragmentId`]) and where their local copies live
//! ([`store::FragmentStore`]).

pub mod id;
pub mod store;

pub use id::{BackupId, CustomerId, FragmentId, FragmentKind};
pub use store::{FragmentStore, FragmentStoreConfig};

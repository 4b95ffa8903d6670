//! Restore Pipeline
//!
//! Rebuilding one backup out of erasure-coded fragments scattered over
//! suppliers. Three layers, pure to impure:
//!
//! - **Machine** (`machine.rs`) - the synchronous state machine; decides
//!   transitions and effects, touches nothing
//! - **Worker** (`worker.rs`) - one async task per restore; funnels inputs
//!   into the machine and interprets its effects against the real world
//! - **Supervisor** (`supervisor.rs`) - registry of live restores, scheme
//!   resolution, rebuilder coordination
//!
//! A restore walks blocks in ascending order, requesting fragments from
//! suppliers, decoding each block as soon as enough fragments are on hand,
//! and appending the decrypted plaintext to the output file. It ends with a
//! single verdict: `done`, `failed` or `abort`.

pub mod machine;
pub mod supervisor;
pub mod worker;

pub use machine::State;
pub use supervisor::{RebuildControl, RestoreContext, RestoreHandle, RestoreSupervisor};
pub use worker::{RestoreConfig, RestoreWorker};

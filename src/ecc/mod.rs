//! Erasure Coding Module
//!
//! Everything fragment math: the published XOR parity schemes, the codec
//! that splits blocks into fragment files and reassembles them, and the
//! bounded pool the blocking codec work runs on.
//!
//! # Components
//!
//! - **Scheme tables** (`map.rs`): the `ecc/2x2` .. `ecc/64x64` parity
//!   matrices, resolved into [`EccMap`] with the fixability predicates the
//!   restore pipeline branches on.
//!
//! - **Codec** (`codec.rs`): word-aligned XOR split/reassemble over fragment
//!   files, including single-segment repair from a parity row.
//!
//! - **Pool** (`pool.rs`): semaphore-capped blocking pool; tasks report
//!   through oneshot channels so abandoned restores never get called back.

pub mod codec;
pub mod map;
pub mod pool;
mod proptest;

pub use codec::XorCodec;
pub use map::EccMap;
pub use pool::{MakeTask, RaidOutcome, RaidPool, RaidPoolConfig, ReadTask};

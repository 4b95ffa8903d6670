//! Restore State Machine
//!
//! The decision core of a restore, kept pure: [`transition`] maps the
//! current state, one event and a snapshot of the block's recovery status
//! to the next state plus a list of [`Effect`]s. All I/O lives in the
//! worker that interprets the effects, so every edge of the machine can
//! be exercised in a plain unit test.
//!
//! ```text
//!                 init
//!  AT_STARTUP ──────────► REQUESTED ◄──────────────┐
//!                           │  ▲ │                  │
//!        data-receiving-    │  │ │ fixable          │ block done,
//!        started/stopped    ▼  │ ▼                  │ more to go
//!                        RECEIVING ──► RAID ──► BLOCK
//!                           │            │        │ last block
//!                           ▼            ▼        ▼
//!                         FAILED ◄─── FAILED    DONE
//! ```
//!
//! One block cycles REQUESTED ⇄ RECEIVING until its fragments are either
//! sufficient (→ RAID) or provably insufficient (→ FAILED). Every fragment
//! arrival re-arms a short settle tick so the machine re-evaluates itself
//! without recursing.

use std::path::PathBuf;

use crate::block::RestoredBlock;
use crate::domain::ports::RestoreVerdict;
use crate::fragments::id::FragmentId;

// =============================================================================
// State
// =============================================================================

/// Lifecycle state of one restore worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    AtStartup,
    Requested,
    Receiving,
    Raid,
    Block,
    Done,
    Failed,
}

impl State {
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Done | State::Failed)
    }

    /// States in which fragment requests are open and arrivals are expected.
    fn in_request_phase(&self) -> bool {
        matches!(self, State::Requested | State::Receiving)
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            State::AtStartup => "AT_STARTUP",
            State::Requested => "REQUESTED",
            State::Receiving => "RECEIVING",
            State::Raid => "RAID",
            State::Block => "BLOCK",
            State::Done => "DONE",
            State::Failed => "FAILED",
        };
        write!(f, "{name}")
    }
}

// =============================================================================
// Event
// =============================================================================

/// Everything that can happen to a restore worker.
#[derive(Debug, Clone)]
pub enum Event {
    /// Kick-off; valid only in `AT_STARTUP`
    Init,
    /// Settle tick: re-evaluate the current block without new input
    Instant,
    /// Periodic tick carrying the supplier-ping cadence
    PingTick,
    /// A fragment arrived from a supplier or turned out to exist locally
    DataReceived { fragment: FragmentId },
    /// Incoming transfer activity began
    DataReceivingStarted,
    /// Incoming transfer activity ceased
    DataReceivingStopped,
    /// A fragment fetch failed, or a whole request round came back short
    RequestFailed,
    /// A request round ended with nothing left pending
    RequestFinished,
    /// The decode engine produced a reconstructed block file
    RaidDone { output: PathBuf },
    /// The decode engine gave up on the block
    RaidFailed,
    /// The reconstructed block was parsed and decrypted
    BlockRestored { block: RestoredBlock },
    /// The reconstructed block would not parse or decrypt
    BlockFailed,
    /// External stop
    Abort,
}

impl Event {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Event::Init => "init",
            Event::Instant => "instant",
            Event::PingTick => "ping-tick",
            Event::DataReceived { .. } => "data-received",
            Event::DataReceivingStarted => "data-receiving-started",
            Event::DataReceivingStopped => "data-receiving-stopped",
            Event::RequestFailed => "request-failed",
            Event::RequestFinished => "request-finished",
            Event::RaidDone { .. } => "raid-done",
            Event::RaidFailed => "raid-failed",
            Event::BlockRestored { .. } => "block-restored",
            Event::BlockFailed => "block-failed",
            Event::Abort => "abort",
        }
    }

    fn re_evaluates(&self) -> bool {
        matches!(self, Event::Instant | Event::RequestFinished)
    }
}

// =============================================================================
// Conditions & Effects
// =============================================================================

/// Snapshot of the current block's recovery status, computed by the worker
/// before each dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockStatus {
    /// Request rounds spent on this block so far
    pub attempts: u32,
    /// Distinct fragment failures still within the error budget
    pub still_correctable: bool,
    /// Present fragments suffice to reconstruct the block
    pub fixable: bool,
    /// At least one fragment request is still unanswered
    pub receiving: bool,
}

/// Work the machine asks the worker to carry out, in order.
#[derive(Debug, Clone)]
pub enum Effect {
    /// Resolve the parity scheme and block the rebuilder
    Init,
    /// Advance to the next block and reset per-block bookkeeping
    StartNewBlock,
    /// Refresh fragment presence from the local store
    ScanLocalFragments,
    /// Queue fetches for every absent fragment of the block
    RequestFragments,
    /// Nudge suppliers that have gone quiet
    PingOfflineSuppliers,
    /// Record a fragment as on hand for the current block
    SaveFragment { fragment: FragmentId },
    /// Hand the block to the decode engine
    StartDecode,
    /// Parse and decrypt the reconstructed block file
    UnwrapBlock { decoded: PathBuf },
    /// Append the block's plaintext to the output sink
    WriteBlock { block: RestoredBlock },
    /// Fail every still-open fragment request of this backup
    CancelRequests,
    /// Dispose the decode temp file and the block's local fragments
    RemoveTempFile,
    /// Resolve the completion promise with `done`
    ReportDone,
    /// Resolve the completion promise with `failed` or `abort`
    ReportFailed { verdict: RestoreVerdict },
    /// Release bookkeeping and stop processing events
    Teardown,
    /// Re-fire `instant` after a short settle delay
    ArmSettle,
    /// Set the request-round counter back to one
    ResetAttempts,
    /// Count one more request round
    BumpAttempts,
}

/// Result of one dispatch.
#[derive(Debug, Clone)]
pub struct Transition {
    pub next: State,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn stay(state: State) -> Self {
        Self {
            next: state,
            effects: Vec::new(),
        }
    }

    fn to(next: State, effects: Vec<Effect>) -> Self {
        Self { next, effects }
    }
}

fn fail_effects(verdict: RestoreVerdict) -> Vec<Effect> {
    vec![
        Effect::CancelRequests,
        Effect::RemoveTempFile,
        Effect::ReportFailed { verdict },
        Effect::Teardown,
    ]
}

// =============================================================================
// Transition function
// =============================================================================

/// Pure dispatch: no I/O, no clocks, no interior mutability.
pub fn transition(state: State, event: Event, status: &BlockStatus) -> Transition {
    let mut result = dispatch(state, &event, status);

    // A short settle tick keeps the machine re-evaluating itself: once on
    // entering the request phase from outside it, and after every fragment
    // arrival that did not move the state.
    let entered_request_phase = result.next.in_request_phase()
        && !state.in_request_phase()
        && !matches!(event, Event::Instant);
    let absorbed_fragment =
        result.next == state && state.in_request_phase() && matches!(event, Event::DataReceived { .. });
    if entered_request_phase || absorbed_fragment {
        result.effects.push(Effect::ArmSettle);
    }
    result
}

fn dispatch(state: State, event: &Event, status: &BlockStatus) -> Transition {
    match state {
        // ---AT_STARTUP---
        State::AtStartup => match event {
            Event::Init => Transition::to(
                State::Requested,
                vec![
                    Effect::Init,
                    Effect::StartNewBlock,
                    Effect::ScanLocalFragments,
                    Effect::RequestFragments,
                    Effect::ResetAttempts,
                ],
            ),
            Event::Abort => Transition::to(
                State::Failed,
                vec![
                    Effect::ReportFailed {
                        verdict: RestoreVerdict::Abort,
                    },
                    Effect::Teardown,
                ],
            ),
            _ => Transition::stay(state),
        },

        // ---REQUESTED---
        State::Requested => match event {
            Event::DataReceivingStarted => Transition::to(State::Receiving, Vec::new()),
            Event::PingTick if status.attempts == 2 => Transition::to(
                State::Requested,
                vec![Effect::PingOfflineSuppliers],
            ),
            Event::DataReceived { fragment } => Transition::to(
                State::Requested,
                vec![Effect::SaveFragment {
                    fragment: fragment.clone(),
                }],
            ),
            Event::RequestFailed if status.still_correctable && status.attempts < 3 => {
                Transition::to(
                    State::Requested,
                    vec![
                        Effect::ScanLocalFragments,
                        Effect::RequestFragments,
                        Effect::BumpAttempts,
                    ],
                )
            }
            Event::Abort => Transition::to(State::Failed, fail_effects(RestoreVerdict::Abort)),
            Event::RequestFailed => {
                // correctability gone or retry rounds spent
                Transition::to(State::Failed, fail_effects(RestoreVerdict::Failed))
            }
            e if e.re_evaluates() && status.fixable => {
                Transition::to(State::Raid, vec![Effect::StartDecode])
            }
            e if e.re_evaluates() && !status.receiving => {
                Transition::to(State::Failed, fail_effects(RestoreVerdict::Failed))
            }
            _ => Transition::stay(state),
        },

        // ---RECEIVING---
        State::Receiving => match event {
            Event::DataReceivingStopped if status.still_correctable => Transition::to(
                State::Requested,
                vec![Effect::ScanLocalFragments, Effect::RequestFragments],
            ),
            Event::DataReceived { fragment } => Transition::to(
                State::Receiving,
                vec![Effect::SaveFragment {
                    fragment: fragment.clone(),
                }],
            ),
            Event::Abort => Transition::to(State::Failed, fail_effects(RestoreVerdict::Abort)),
            Event::RequestFailed | Event::DataReceivingStopped if !status.still_correctable => {
                Transition::to(State::Failed, fail_effects(RestoreVerdict::Failed))
            }
            e if e.re_evaluates() && status.fixable => {
                Transition::to(State::Raid, vec![Effect::StartDecode])
            }
            e if e.re_evaluates() && !status.receiving => {
                Transition::to(State::Failed, fail_effects(RestoreVerdict::Failed))
            }
            _ => Transition::stay(state),
        },

        // ---RAID---
        State::Raid => match event {
            Event::RaidDone { output } => Transition::to(
                State::Block,
                vec![Effect::UnwrapBlock {
                    decoded: output.clone(),
                }],
            ),
            Event::DataReceived { .. } => Transition::stay(state),
            Event::RaidFailed => {
                Transition::to(State::Failed, fail_effects(RestoreVerdict::Failed))
            }
            Event::Abort => Transition::to(State::Failed, fail_effects(RestoreVerdict::Abort)),
            _ => Transition::stay(state),
        },

        // ---BLOCK---
        State::Block => match event {
            Event::BlockRestored { block } if !block.last_block => Transition::to(
                State::Requested,
                vec![
                    Effect::WriteBlock {
                        block: block.clone(),
                    },
                    Effect::RemoveTempFile,
                    Effect::StartNewBlock,
                    Effect::ScanLocalFragments,
                    Effect::RequestFragments,
                    Effect::ResetAttempts,
                ],
            ),
            Event::BlockRestored { block } => Transition::to(
                State::Done,
                vec![
                    Effect::WriteBlock {
                        block: block.clone(),
                    },
                    Effect::CancelRequests,
                    Effect::RemoveTempFile,
                    Effect::ReportDone,
                    Effect::Teardown,
                ],
            ),
            Event::DataReceived { .. } => Transition::stay(state),
            Event::BlockFailed => {
                Transition::to(State::Failed, fail_effects(RestoreVerdict::Failed))
            }
            Event::Abort => Transition::to(State::Failed, fail_effects(RestoreVerdict::Abort)),
            _ => Transition::stay(state),
        },

        // ---DONE--- / ---FAILED---
        State::Done | State::Failed => Transition::stay(state),
    }
}

// =============================================================================
// Tests
// =============================================================================

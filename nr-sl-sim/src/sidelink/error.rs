/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Structured error types for the sidelink MAC scheduler.
//!
//! Two enums model the two failure layers:
//!
//! * [`PoolError`] – a resource pool could not be built or registered
//!   (configuration time, before the run starts).
//! * [`SidelinkError`] – a contract violation while the simulation runs.
//!   Every variant is fatal: it means a caller delivered an event the MAC
//!   state machine cannot accept.
//!
//! Running out of resources is **not** an error.  It is reported as
//! [`TickOutcome::PoolExhausted`](super::TickOutcome::PoolExhausted) /
//! [`ResourceOutcome::Exhausted`](super::ResourceOutcome::Exhausted) and
//! counted, and the UE retries on its next tick.

use thiserror::Error;

use super::context::{SlContextState, UeId};
use super::pool::PoolId;
use crate::des::SimTime;

// ── Pool construction ─────────────────────────────────────────────────────────

/// Why a resource pool was rejected by
/// [`ResourcePoolFactory::create_pool`](super::pool::ResourcePoolFactory::create_pool)
/// or [`PoolRegistry::insert`](super::pool::PoolRegistry::insert).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// Pool ids range from 0 to 15.
    #[error("pool id {0} is out of range (0..=15)")]
    IdOutOfRange(PoolId),

    /// Two pools were registered under the same id.
    #[error("pool id {0} is already registered")]
    DuplicateId(PoolId),

    /// The time-domain bitmap has no entries.
    #[error("sidelink time bitmap is empty")]
    EmptyBitmap,

    /// A bitmap string contained something other than `0` / `1`.
    #[error("invalid character '{ch}' at position {pos} in sidelink bitmap")]
    InvalidBitmapChar { ch: char, pos: usize },

    #[error("subchannel size {0} RBs is not one of 10, 12, 15, 20, 25, 50, 75, 100")]
    InvalidSubchannelSize(u16),

    #[error("PSCCH size {pscch_rbs} RBs must be one of 10, 12, 15, 20, 25 and fit in a {subchannel_size_rbs}-RB subchannel")]
    InvalidPscchSize {
        pscch_rbs: u16,
        subchannel_size_rbs: u16,
    },

    /// The bandwidth part cannot hold a single subchannel.
    #[error("bandwidth of {bandwidth_rbs} RBs is narrower than one {subchannel_size_rbs}-RB subchannel")]
    NoSubchannels {
        bandwidth_rbs: u16,
        subchannel_size_rbs: u16,
    },

    #[error("sensing window {0} ms is not one of 100, 1100")]
    InvalidSensingWindow(u32),

    #[error("selection window {0} ms is not one of 1, 5, 10, 20")]
    InvalidSelectionWindow(u32),

    #[error("max reservations per reserve must be at least 1")]
    ZeroMaxNumPerReserve,
}

// ── Runtime contract violations ───────────────────────────────────────────────

/// Fatal errors raised by [`SidelinkScheduler`](super::SidelinkScheduler).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SidelinkError {
    /// A scheduling tick reached a UE whose bearer is not active.
    ///
    /// The kernel must never deliver ticks after deactivation; seeing this
    /// means a tick event was not cancelled.  The context is left untouched.
    #[error("stale scheduling tick for UE {ue} at {at}: sidelink context is inactive")]
    StaleContext { ue: UeId, at: SimTime },

    /// The requested state change is not an edge of the context state machine.
    #[error("UE {ue}: invalid sidelink context transition {from} -> {to}")]
    InvalidTransition {
        ue: UeId,
        from: SlContextState,
        to: SlContextState,
    },

    /// No sidelink context exists for this UE.
    #[error("UE {0} has no sidelink context")]
    UnknownUe(UeId),

    /// The pool id is not present in the registry.
    #[error("resource pool {0} is not registered")]
    UnknownPool(PoolId),

    /// The pool handed to the scheduler is not the UE's active pool.
    #[error("UE {ue} is bound to pool {expected}, got pool {got}")]
    PoolMismatch {
        ue: UeId,
        expected: PoolId,
        got: PoolId,
    },

    /// A reservation exists on a pool whose bitmap has no sidelink slot.
    #[error("UE {ue}: pool {pool} has no sidelink-eligible slot for its reservation")]
    NoEligibleSlot { ue: UeId, pool: PoolId },
}

/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Per-UE sidelink state.
//!
//! ```text
//! Inactive ──activate_bearer──► AwaitingResource ──selection ok──► Reserved
//!                                      ▲                              │
//!                                      └──── reservation used up ─────┘
//!
//! AwaitingResource | Reserved ──deactivate_bearer / teardown──► Inactive
//! ```
//!
//! [`UeSlContext`] is owned by the [`SidelinkScheduler`](super::SidelinkScheduler);
//! it references its resource pool by id only.

use std::fmt;

use crate::des::EventHandle;

use super::error::SidelinkError;
use super::pool::PoolId;

/// UE identifier.
pub type UeId = u32;

// ── State machine ─────────────────────────────────────────────────────────────

/// Sidelink context state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlContextState {
    /// No active sidelink bearer.
    Inactive,
    /// Bearer active, no resource reserved yet (or the last one expired).
    AwaitingResource,
    /// A periodic resource is reserved.
    Reserved,
}

impl SlContextState {
    /// `true` if `self -> to` is an edge of the state machine.
    pub fn can_transition_to(self, to: SlContextState) -> bool {
        use SlContextState::*;
        matches!(
            (self, to),
            (Inactive, AwaitingResource)
                | (AwaitingResource, Reserved)
                | (Reserved, AwaitingResource)
                | (Reserved, Inactive)
                | (AwaitingResource, Inactive)
        )
    }
}

impl fmt::Display for SlContextState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SlContextState::Inactive => "Inactive",
            SlContextState::AwaitingResource => "AwaitingResource",
            SlContextState::Reserved => "Reserved",
        };
        f.write_str(s)
    }
}

// ── Bearer ────────────────────────────────────────────────────────────────────

/// QoS resource type of a sidelink radio bearer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QosResourceType {
    Gbr,
    NonGbr,
}

/// Cast type of the sidelink traffic flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastType {
    Unicast,
    Groupcast,
    Broadcast,
}

/// Logical channel → bearer QoS mapping for one UE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlBearer {
    pub lcid: u8,
    /// PC5 QoS identifier.
    pub pqi: u8,
    pub resource_type: QosResourceType,
    pub cast_type: CastType,
    /// Layer-2 destination id of the group.
    pub destination_l2_id: u32,
}

impl SlBearer {
    /// GBR mission-critical push-to-talk bearer (PQI 65) on LCID 4.
    pub fn push_to_talk(destination_l2_id: u32) -> Self {
        Self {
            lcid: 4,
            pqi: 65,
            resource_type: QosResourceType::Gbr,
            cast_type: CastType::Groupcast,
            destination_l2_id,
        }
    }
}

// ── Reservation ───────────────────────────────────────────────────────────────

/// A periodic resource held by one UE.
///
/// Positions are counted in logical slots, i.e. the sidelink-eligible slots
/// of the pool numbered consecutively (see
/// [`ResourcePool::logical_slot`](super::pool::ResourcePool::logical_slot)).
/// Occurrence `k` (0-based) is logical slot
/// `first_logical + k * period_logical`, so every occurrence lands on an
/// eligible slot whatever the bitmap length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    /// Absolute slot of the first occurrence.
    pub first_slot: u64,
    pub first_logical: u64,
    pub subchannel: u16,
    /// Subchannels spanned (always 1 for the simple scheduler).
    pub num_subchannels: u16,
    /// Reservation period in logical slots.
    pub period_logical: u64,
    /// Occurrences used so far.
    pub used: u8,
    /// Occurrences granted at selection time.
    pub total: u8,
    /// Slot at which the resource was selected.
    pub selected_at_slot: u64,
}

impl Reservation {
    /// Logical slot of the next unused occurrence.
    pub fn next_logical(&self) -> u64 {
        self.first_logical + u64::from(self.used) * self.period_logical
    }

    pub fn remaining(&self) -> u8 {
        self.total - self.used
    }

    pub fn is_exhausted(&self) -> bool {
        self.used >= self.total
    }

    /// `true` if an unused occurrence of this reservation sits on
    /// (`logical`, `subchannel`).
    pub fn occupies(&self, logical: u64, subchannel: u16) -> bool {
        if subchannel < self.subchannel || subchannel >= self.subchannel + self.num_subchannels {
            return false;
        }
        let next = self.next_logical();
        if logical < next || (logical - next) % self.period_logical != 0 {
            return false;
        }
        (logical - next) / self.period_logical < u64::from(self.remaining())
    }
}

// ── Buffer ────────────────────────────────────────────────────────────────────

/// Application data waiting in the UE's sidelink buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxBuffer {
    pub packets: u32,
    pub bytes: u64,
}

impl TxBuffer {
    pub fn push(&mut self, bytes: u32) {
        self.packets += 1;
        self.bytes += u64::from(bytes);
    }

    pub fn is_empty(&self) -> bool {
        self.packets == 0
    }

    /// Empty the buffer, returning what it held.
    pub fn take(&mut self) -> TxBuffer {
        std::mem::take(self)
    }
}

// ── Counters ──────────────────────────────────────────────────────────────────

/// Per-UE sidelink counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UeSlStats {
    /// Successful resource selections.
    pub selections: u64,
    /// Scheduling decisions produced.
    pub decisions: u64,
    /// Initial PSCCH/PSSCH transmissions that fired.
    pub initial_tx: u64,
    /// Blind retransmissions that fired.
    pub retx: u64,
    /// Ticks or activations that found no eligible resource.
    pub pool_exhausted: u64,
    /// Ticks skipped because the buffer was empty.
    pub idle_ticks: u64,
}

impl UeSlStats {
    pub fn merge(&mut self, other: &UeSlStats) {
        self.selections += other.selections;
        self.decisions += other.decisions;
        self.initial_tx += other.initial_tx;
        self.retx += other.retx;
        self.pool_exhausted += other.pool_exhausted;
        self.idle_ticks += other.idle_ticks;
    }
}

// ── UeSlContext ───────────────────────────────────────────────────────────────

/// Mutable sidelink state of one UE.
#[derive(Debug, Clone)]
pub struct UeSlContext {
    ue_id: UeId,
    state: SlContextState,
    pool_id: PoolId,
    pub(crate) reservation: Option<Reservation>,
    mcs: u8,
    retx_count: u8,
    bearer: SlBearer,
    pub(crate) tick_handle: Option<EventHandle>,
    pub(crate) buffer: TxBuffer,
    pub(crate) stats: UeSlStats,
}

impl UeSlContext {
    pub(crate) fn new(ue_id: UeId, pool_id: PoolId, bearer: SlBearer, mcs: u8, retx_count: u8) -> Self {
        Self {
            ue_id,
            state: SlContextState::Inactive,
            pool_id,
            reservation: None,
            mcs,
            retx_count,
            bearer,
            tick_handle: None,
            buffer: TxBuffer::default(),
            stats: UeSlStats::default(),
        }
    }

    pub fn ue_id(&self) -> UeId {
        self.ue_id
    }

    pub fn state(&self) -> SlContextState {
        self.state
    }

    pub fn pool_id(&self) -> PoolId {
        self.pool_id
    }

    pub fn reservation(&self) -> Option<&Reservation> {
        self.reservation.as_ref()
    }

    /// Assigned MCS index.
    pub fn mcs(&self) -> u8 {
        self.mcs
    }

    /// Blind retransmissions scheduled after every initial transmission.
    pub fn retx_count(&self) -> u8 {
        self.retx_count
    }

    pub fn bearer(&self) -> &SlBearer {
        &self.bearer
    }

    pub fn tick_handle(&self) -> Option<EventHandle> {
        self.tick_handle
    }

    /// Data not yet carried by a scheduling decision.
    pub fn buffer(&self) -> &TxBuffer {
        &self.buffer
    }

    pub fn stats(&self) -> &UeSlStats {
        &self.stats
    }

    pub fn is_active(&self) -> bool {
        self.state != SlContextState::Inactive
    }

    /// Move to `to`, rejecting anything that is not a state-machine edge.
    pub(crate) fn transition(&mut self, to: SlContextState) -> Result<(), SidelinkError> {
        if !self.state.can_transition_to(to) {
            return Err(SidelinkError::InvalidTransition {
                ue: self.ue_id,
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    pub(crate) fn set_bearer(&mut self, bearer: SlBearer) {
        self.bearer = bearer;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

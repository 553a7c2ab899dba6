//! MAC policy parameters for the sidelink scheduler.
//!
//! One flat, immutable [`SlMacConfig`] value is handed to
//! [`SidelinkScheduler::new`](super::SidelinkScheduler::new).  Behavioural
//! variation is expressed through small enums ([`McsPolicy`]) rather than
//! through scheduler subtypes.

use crate::des::{Delay, SimTime};

use super::pool::PoolId;

/// How the scheduler chooses the MCS for a transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McsPolicy {
    /// Always use this MCS index, regardless of channel conditions.
    Fixed(u8),
}

impl McsPolicy {
    pub fn mcs(&self) -> u8 {
        match self {
            McsPolicy::Fixed(mcs) => *mcs,
        }
    }
}

impl Default for McsPolicy {
    fn default() -> Self {
        McsPolicy::Fixed(14)
    }
}

/// Blind (feedback-less) retransmission settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlindRetx {
    pub enabled: bool,
    /// Retransmissions following every initial transmission.
    pub count: u8,
    /// Slots between consecutive transmissions of the same transport block.
    pub gap_slots: u32,
}

impl BlindRetx {
    /// Number of retransmissions actually scheduled (0 when disabled).
    pub fn effective_count(&self) -> u8 {
        if self.enabled {
            self.count
        } else {
            0
        }
    }
}

impl Default for BlindRetx {
    fn default() -> Self {
        Self {
            enabled: true,
            count: 2,
            gap_slots: 4,
        }
    }
}

/// Sidelink UE MAC configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlMacConfig {
    /// Start of the selection window, in slots after the current slot.
    pub t1: u32,
    /// End of the selection window, in slots after the current slot.
    pub t2: u32,
    /// Resource reservation period; also the scheduling tick period.
    pub reservation_period_ms: u32,
    /// Sidelink numerology μ: slot length is `1 ms / 2^μ`.
    pub numerology: u8,
    /// Exclude resources reserved by other UEs seen in the sensing window.
    pub enable_sensing: bool,
    /// Pool assigned to newly activated UEs.
    pub active_pool_id: PoolId,
    pub mcs_policy: McsPolicy,
    pub blind_retx: BlindRetx,
    /// Upper bound on PSSCH transmissions per transport block.
    pub max_tx_trans_num_pssch: u8,
}

impl Default for SlMacConfig {
    fn default() -> Self {
        Self {
            t1: 2,
            t2: 33,
            reservation_period_ms: 100,
            numerology: 2,
            enable_sensing: false,
            active_pool_id: 0,
            mcs_policy: McsPolicy::default(),
            blind_retx: BlindRetx::default(),
            max_tx_trans_num_pssch: 5,
        }
    }
}

impl SlMacConfig {
    /// Slot length in nanoseconds.
    pub fn slot_duration_ns(&self) -> u64 {
        1_000_000 >> self.numerology
    }

    /// Slots per millisecond.
    pub fn slots_per_ms(&self) -> u64 {
        1 << self.numerology
    }

    /// First slot boundary at or after `t`.
    pub fn slot_at_or_after(&self, t: SimTime) -> u64 {
        t.as_nanos().div_ceil(self.slot_duration_ns())
    }

    /// Start time of absolute slot `slot`.
    pub fn slot_start(&self, slot: u64) -> SimTime {
        SimTime::from_nanos(slot * self.slot_duration_ns())
    }

    pub fn reservation_period_slots(&self) -> u64 {
        u64::from(self.reservation_period_ms) * self.slots_per_ms()
    }

    pub fn reservation_period(&self) -> Delay {
        Delay::from_millis(i64::from(self.reservation_period_ms))
    }

    /// Effective selection window end: never shorter than the pool's T2min.
    pub fn t2_effective(&self, pool_selection_window_ms: u32) -> u64 {
        let t2min = u64::from(pool_selection_window_ms) * self.slots_per_ms();
        u64::from(self.t2).max(t2min)
    }

    pub fn sensing_window_slots(&self, pool_sensing_window_ms: u32) -> u64 {
        u64::from(pool_sensing_window_ms) * self.slots_per_ms()
    }
}

//! Sidelink resource pools.
//!
//! A [`ResourcePool`] describes the time/frequency grid a UE may transmit on:
//!
//! ```text
//!            slot →   0 1 2 3 4 5 6 7 8 9 10 11 | 12 ...   (bitmap repeats)
//! bitmap              1 1 1 1 1 1 0 0 0 1 1  1  | 1  ...
//! subchannel 0  [RB  0..50)   ■ ■ ■ ■ ■ ■ · · · ■ ■  ■
//! subchannel 1  [RB 50..100)  ■ ■ ■ ■ ■ ■ · · · ■ ■  ■
//! ```
//!
//! The eligible slots, numbered consecutively, are the pool's *logical*
//! slots: with the bitmap above, slots 0..=5 are logical 0..=5 and slots
//! 9, 10, 11, 12 are logical 6, 7, 8, 9.  Reservation periods and
//! retransmission gaps are counted in logical slots so they always land on
//! sidelink slots.
//!
//! Pools are built once through [`ResourcePoolFactory`] (which starts from a
//! valid default and validates every override) and are immutable afterwards.
//! The [`PoolRegistry`] hands out shared `Arc<ResourcePool>` references keyed
//! by pool id.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use super::error::PoolError;

/// Resource pool identifier (0..=15).
pub type PoolId = u16;

/// Highest valid pool id.
pub const MAX_POOL_ID: PoolId = 15;

const VALID_SUBCHANNEL_SIZES: [u16; 8] = [10, 12, 15, 20, 25, 50, 75, 100];
const VALID_PSCCH_SIZES: [u16; 5] = [10, 12, 15, 20, 25];
const VALID_SENSING_WINDOWS_MS: [u32; 2] = [100, 1100];
const VALID_SELECTION_WINDOWS_MS: [u32; 4] = [1, 5, 10, 20];

/// Parse a bitmap string such as `"111111000111"`.
///
/// Whitespace and `_` separators are ignored so long bitmaps can be grouped.
pub fn parse_bitmap(s: &str) -> Result<Vec<bool>, PoolError> {
    let bits = s
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '_')
        .enumerate()
        .map(|(pos, ch)| match ch {
            '1' => Ok(true),
            '0' => Ok(false),
            _ => Err(PoolError::InvalidBitmapChar { ch, pos }),
        })
        .collect::<Result<Vec<bool>, PoolError>>()?;

    if bits.is_empty() {
        return Err(PoolError::EmptyBitmap);
    }
    Ok(bits)
}

// ── ResourcePool ──────────────────────────────────────────────────────────────

/// Immutable sidelink resource pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcePool {
    id: PoolId,
    time_bitmap: Vec<bool>,
    pscch_rbs: u16,
    subchannel_size_rbs: u16,
    num_subchannels: u16,
    sensing_window_ms: u32,
    selection_window_ms: u32,
    max_num_per_reserve: u8,
}

impl ResourcePool {
    pub fn id(&self) -> PoolId {
        self.id
    }

    /// Periodic slot bitmap; slot `n` maps to bit `n % len`.
    pub fn time_bitmap(&self) -> &[bool] {
        &self.time_bitmap
    }

    pub fn pscch_rbs(&self) -> u16 {
        self.pscch_rbs
    }

    pub fn subchannel_size_rbs(&self) -> u16 {
        self.subchannel_size_rbs
    }

    pub fn num_subchannels(&self) -> u16 {
        self.num_subchannels
    }

    /// Sensing window T0, in milliseconds.
    pub fn sensing_window_ms(&self) -> u32 {
        self.sensing_window_ms
    }

    /// Minimum selection window length (T2min), in milliseconds.
    pub fn selection_window_ms(&self) -> u32 {
        self.selection_window_ms
    }

    /// Consecutive reservation periods a UE may hold one resource for.
    pub fn max_num_per_reserve(&self) -> u8 {
        self.max_num_per_reserve
    }

    /// `true` if absolute slot `slot` is a sidelink slot in this pool.
    pub fn is_slot_eligible(&self, slot: u64) -> bool {
        let len = self.time_bitmap.len() as u64;
        self.time_bitmap[(slot % len) as usize]
    }

    /// Eligible slots in the inclusive range `[first, last]`, ascending.
    pub fn eligible_slots(&self, first: u64, last: u64) -> impl Iterator<Item = u64> + '_ {
        (first..=last).filter(move |&s| self.is_slot_eligible(s))
    }

    /// Eligible slots per repetition of the bitmap.
    pub fn eligible_per_bitmap(&self) -> u64 {
        self.time_bitmap.iter().filter(|&&b| b).count() as u64
    }

    /// Logical index of `slot` (eligible slots before it), or `None` if
    /// `slot` is not eligible.
    pub fn logical_slot(&self, slot: u64) -> Option<u64> {
        if !self.is_slot_eligible(slot) {
            return None;
        }
        let len = self.time_bitmap.len() as u64;
        let offset = (slot % len) as usize;
        let before = self.time_bitmap[..offset].iter().filter(|&&b| b).count() as u64;
        Some(slot / len * self.eligible_per_bitmap() + before)
    }

    /// Absolute slot of logical slot `logical`; `None` if the bitmap has no
    /// eligible slot.
    pub fn physical_slot(&self, logical: u64) -> Option<u64> {
        let per_bitmap = self.eligible_per_bitmap();
        if per_bitmap == 0 {
            return None;
        }
        let len = self.time_bitmap.len() as u64;
        let nth = (logical % per_bitmap) as usize;
        let offset = self
            .time_bitmap
            .iter()
            .enumerate()
            .filter(|&(_, &b)| b)
            .nth(nth)
            .map(|(i, _)| i as u64)?;
        Some(logical / per_bitmap * len + offset)
    }

    /// A period of `period_slots` physical slots scaled to logical slots,
    /// rounded up.
    pub fn logical_period(&self, period_slots: u64) -> u64 {
        let len = self.time_bitmap.len() as u64;
        (period_slots * self.eligible_per_bitmap()).div_ceil(len)
    }

    /// First RB of `subchannel`.
    pub fn subchannel_start_rb(&self, subchannel: u16) -> u16 {
        subchannel * self.subchannel_size_rbs
    }
}

// ── ResourcePoolFactory ───────────────────────────────────────────────────────

/// Builder for [`ResourcePool`] that starts from a valid default pool.
///
/// # Example
/// ```rust
/// use nr_sl_sim::sidelink::pool::ResourcePoolFactory;
///
/// let pool = ResourcePoolFactory::new()
///     .set_time_resources(vec![true, true, false, true])
///     .set_subchannel_size(50)
///     .set_max_num_per_reserve(3)
///     .create_pool()
///     .unwrap();
/// assert!(pool.is_slot_eligible(4));
/// assert!(!pool.is_slot_eligible(6));
/// ```
#[derive(Debug, Clone)]
pub struct ResourcePoolFactory {
    id: PoolId,
    time_bitmap: Vec<bool>,
    pscch_rbs: u16,
    subchannel_size_rbs: u16,
    bandwidth_rbs: u16,
    sensing_window_ms: u32,
    selection_window_ms: u32,
    max_num_per_reserve: u8,
}

impl Default for ResourcePoolFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourcePoolFactory {
    /// Factory defaults: `111111000111` bitmap, 100 ms sensing, 5 ms
    /// selection, 10-RB PSCCH, 50-RB subchannels over 106 RBs, 3 reservations.
    pub fn new() -> Self {
        Self {
            id: 0,
            time_bitmap: vec![
                true, true, true, true, true, true, false, false, false, true, true, true,
            ],
            pscch_rbs: 10,
            subchannel_size_rbs: 50,
            bandwidth_rbs: 106,
            sensing_window_ms: 100,
            selection_window_ms: 5,
            max_num_per_reserve: 3,
        }
    }

    pub fn set_pool_id(mut self, id: PoolId) -> Self {
        self.id = id;
        self
    }

    pub fn set_time_resources(mut self, bitmap: Vec<bool>) -> Self {
        self.time_bitmap = bitmap;
        self
    }

    pub fn set_sensing_window(mut self, ms: u32) -> Self {
        self.sensing_window_ms = ms;
        self
    }

    pub fn set_selection_window(mut self, ms: u32) -> Self {
        self.selection_window_ms = ms;
        self
    }

    pub fn set_freq_resource_pscch(mut self, rbs: u16) -> Self {
        self.pscch_rbs = rbs;
        self
    }

    pub fn set_subchannel_size(mut self, rbs: u16) -> Self {
        self.subchannel_size_rbs = rbs;
        self
    }

    /// Bandwidth part size in RBs; the subchannel count is derived from it.
    pub fn set_bandwidth_rbs(mut self, rbs: u16) -> Self {
        self.bandwidth_rbs = rbs;
        self
    }

    pub fn set_max_num_per_reserve(mut self, n: u8) -> Self {
        self.max_num_per_reserve = n;
        self
    }

    /// Validate the parameters and build the pool.
    ///
    /// # Errors
    /// The first [`PoolError`] found, checked in field order.
    pub fn create_pool(&self) -> Result<ResourcePool, PoolError> {
        if self.id > MAX_POOL_ID {
            return Err(PoolError::IdOutOfRange(self.id));
        }
        if self.time_bitmap.is_empty() {
            return Err(PoolError::EmptyBitmap);
        }
        if !VALID_SUBCHANNEL_SIZES.contains(&self.subchannel_size_rbs) {
            return Err(PoolError::InvalidSubchannelSize(self.subchannel_size_rbs));
        }
        if !VALID_PSCCH_SIZES.contains(&self.pscch_rbs) || self.pscch_rbs > self.subchannel_size_rbs {
            return Err(PoolError::InvalidPscchSize {
                pscch_rbs: self.pscch_rbs,
                subchannel_size_rbs: self.subchannel_size_rbs,
            });
        }
        let num_subchannels = self.bandwidth_rbs / self.subchannel_size_rbs;
        if num_subchannels == 0 {
            return Err(PoolError::NoSubchannels {
                bandwidth_rbs: self.bandwidth_rbs,
                subchannel_size_rbs: self.subchannel_size_rbs,
            });
        }
        if !VALID_SENSING_WINDOWS_MS.contains(&self.sensing_window_ms) {
            return Err(PoolError::InvalidSensingWindow(self.sensing_window_ms));
        }
        if !VALID_SELECTION_WINDOWS_MS.contains(&self.selection_window_ms) {
            return Err(PoolError::InvalidSelectionWindow(self.selection_window_ms));
        }
        if self.max_num_per_reserve == 0 {
            return Err(PoolError::ZeroMaxNumPerReserve);
        }

        if !self.time_bitmap.iter().any(|&b| b) {
            warn!(pool = self.id, "sidelink bitmap has no eligible slot, every selection will fail");
        }

        debug!(
            pool = self.id,
            bitmap_len = self.time_bitmap.len(),
            num_subchannels,
            subchannel_size_rbs = self.subchannel_size_rbs,
            "resource pool created"
        );

        Ok(ResourcePool {
            id: self.id,
            time_bitmap: self.time_bitmap.clone(),
            pscch_rbs: self.pscch_rbs,
            subchannel_size_rbs: self.subchannel_size_rbs,
            num_subchannels,
            sensing_window_ms: self.sensing_window_ms,
            selection_window_ms: self.selection_window_ms,
            max_num_per_reserve: self.max_num_per_reserve,
        })
    }
}

// ── PoolRegistry ──────────────────────────────────────────────────────────────

/// Read-only set of pools shared by every UE, keyed by id.
///
/// `BTreeMap` so iteration (logging, reports) is ordered by id.
#[derive(Debug, Clone, Default)]
pub struct PoolRegistry {
    pools: BTreeMap<PoolId, Arc<ResourcePool>>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `pool` under its own id.
    ///
    /// # Errors
    /// [`PoolError::DuplicateId`] if the id is taken.
    pub fn insert(&mut self, pool: ResourcePool) -> Result<Arc<ResourcePool>, PoolError> {
        let id = pool.id();
        if self.pools.contains_key(&id) {
            return Err(PoolError::DuplicateId(id));
        }
        let pool = Arc::new(pool);
        self.pools.insert(id, Arc::clone(&pool));
        Ok(pool)
    }

    pub fn get(&self, id: PoolId) -> Option<&Arc<ResourcePool>> {
        self.pools.get(&id)
    }

    pub fn contains(&self, id: PoolId) -> bool {
        self.pools.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ResourcePool>> {
        self.pools.values()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

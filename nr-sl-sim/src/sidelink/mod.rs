//! Sidelink UE MAC scheduler (fixed-MCS "simple" policy).
//!
//! [`SidelinkScheduler`] owns one [`UeSlContext`] per UE and the shared
//! [`PoolRegistry`].  It never runs on its own: the event kernel calls
//! [`assign_initial_resource`](SidelinkScheduler::assign_initial_resource) at
//! bearer activation and
//! [`on_scheduling_tick`](SidelinkScheduler::on_scheduling_tick) once per
//! reservation period, and turns each [`SchedulingDecision`] into
//! transmission events (see [`network`]).
//!
//! # Resource selection
//!
//! Given the current slot `n` (first slot boundary at or after `now`):
//!
//! 1. The selection window is `[n + T1, n + T2eff]`, where
//!    `T2eff = max(T2, pool selection window in slots)`.
//! 2. Slots are visited in ascending order; a slot is a candidate only if its
//!    bit in the pool's periodic bitmap is set.
//! 3. Within a candidate slot, the lowest-indexed subchannel that is not
//!    occupied is taken.  With sensing disabled nothing is ever occupied; with
//!    sensing enabled, unused occurrences of other UEs' reservations that were
//!    selected within the sensing window count as occupied.
//! 4. The MCS comes from the [`McsPolicy`]; no channel feedback is consulted.
//!
//! The reservation repeats every reservation period for
//! `max_num_per_reserve` periods, after which the UE contends again.  The
//! period and the blind retransmission gap are both counted in the pool's
//! logical (sidelink-eligible) slots, so reuses and retransmissions never
//! fall on a slot the bitmap excludes.
//!
//! # Buffer
//! A tick only produces a decision when the UE has buffered data; the
//! decision carries the whole buffer.  An idle tick lets the current
//! occurrence of the reservation pass unused.
//!
//! # Determinism
//! Contexts live in a `BTreeMap` keyed by UE id and selection has no random
//! component, so identical inputs always produce identical decisions.

pub mod context;
pub mod error;
pub mod network;
pub mod policy;
pub mod pool;
pub mod stats;
pub mod traffic;

pub use context::{Reservation, SlBearer, SlContextState, TxBuffer, UeId, UeSlContext, UeSlStats};
pub use error::{PoolError, SidelinkError};
pub use policy::{BlindRetx, McsPolicy, SlMacConfig};
pub use pool::{PoolId, PoolRegistry, ResourcePool, ResourcePoolFactory};
pub use stats::{MemorySink, SlRecord, StatsSink, TeeSink, TracingSink, TxKind};
pub use traffic::{TrafficSource, TrafficStats};

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use crate::des::{EventHandle, SimTime};

// ── Outcomes ──────────────────────────────────────────────────────────────────

/// Result of one scheduling tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// A transmission (plus blind retransmissions) was scheduled.
    Scheduled(SchedulingDecision),
    /// No eligible resource in the selection window; retry next tick.
    PoolExhausted,
    /// The buffer was empty.
    NoData,
}

/// Result of a resource selection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceOutcome {
    Reserved(Reservation),
    Exhausted,
}

/// One transmission opportunity, ready to be turned into events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulingDecision {
    pub ue: UeId,
    pub pool: PoolId,
    /// Absolute slot of the initial transmission.
    pub slot: u64,
    pub subchannel: u16,
    pub rb_start: u16,
    pub rb_len: u16,
    pub mcs: u8,
    /// Start of the initial transmission.
    pub tx_time: SimTime,
    /// Blind retransmission slots, in order.
    pub retx_slots: Vec<u64>,
    /// Start of each blind retransmission.
    pub retx_times: Vec<SimTime>,
    /// Application packets in the transport block.
    pub packets: u32,
    pub bytes: u64,
}

impl SchedulingDecision {
    /// `(kind, slot, start)` of the initial transmission followed by each
    /// retransmission.
    pub fn transmissions(&self) -> impl Iterator<Item = (TxKind, u64, SimTime)> + '_ {
        std::iter::once((TxKind::Initial, self.slot, self.tx_time)).chain(
            self.retx_slots
                .iter()
                .zip(&self.retx_times)
                .enumerate()
                .map(|(i, (&slot, &at))| (TxKind::BlindRetx(i as u8 + 1), slot, at)),
        )
    }
}

// ── SidelinkScheduler ─────────────────────────────────────────────────────────

/// Sidelink MAC scheduler for all UEs of one simulation.
pub struct SidelinkScheduler<S: StatsSink = MemorySink> {
    config: SlMacConfig,
    pools: PoolRegistry,
    contexts: BTreeMap<UeId, UeSlContext>,
    sink: S,
}

impl<S: StatsSink> SidelinkScheduler<S> {
    /// Create a scheduler with an immutable MAC configuration and pool set.
    pub fn new(config: SlMacConfig, pools: PoolRegistry, sink: S) -> Self {
        info!(
            t1 = config.t1,
            t2 = config.t2,
            reservation_period_ms = config.reservation_period_ms,
            numerology = config.numerology,
            sensing = config.enable_sensing,
            mcs = config.mcs_policy.mcs(),
            blind_retx = config.blind_retx.effective_count(),
            pools = pools.len(),
            "sidelink scheduler initialised"
        );
        Self {
            config,
            pools,
            contexts: BTreeMap::new(),
            sink,
        }
    }

    pub fn config(&self) -> &SlMacConfig {
        &self.config
    }

    pub fn pools(&self) -> &PoolRegistry {
        &self.pools
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn context(&self, ue: UeId) -> Option<&UeSlContext> {
        self.contexts.get(&ue)
    }

    pub fn contexts(&self) -> impl Iterator<Item = &UeSlContext> {
        self.contexts.values()
    }

    /// Sum of all per-UE counters.
    pub fn total_stats(&self) -> UeSlStats {
        let mut total = UeSlStats::default();
        for ctx in self.contexts.values() {
            total.merge(&ctx.stats);
        }
        total
    }

    /// The pool a UE is bound to.
    ///
    /// # Errors
    /// [`SidelinkError::UnknownUe`] / [`SidelinkError::UnknownPool`].
    pub fn pool_for(&self, ue: UeId) -> Result<Arc<ResourcePool>, SidelinkError> {
        let ctx = self.contexts.get(&ue).ok_or(SidelinkError::UnknownUe(ue))?;
        self.pools
            .get(ctx.pool_id())
            .cloned()
            .ok_or(SidelinkError::UnknownPool(ctx.pool_id()))
    }

    /// Active UEs other than `ue` whose bearer targets the same layer-2
    /// destination, in id order.
    pub fn group_members(&self, ue: UeId) -> Result<Vec<UeId>, SidelinkError> {
        let dst = self
            .contexts
            .get(&ue)
            .ok_or(SidelinkError::UnknownUe(ue))?
            .bearer()
            .destination_l2_id;
        Ok(self
            .contexts
            .values()
            .filter(|c| c.ue_id() != ue && c.is_active() && c.bearer().destination_l2_id == dst)
            .map(|c| c.ue_id())
            .collect())
    }

    // ── Bearer lifecycle ──────────────────────────────────────────────────────

    /// Activate the sidelink bearer of `ue` on the configured active pool.
    ///
    /// Creates the context on first use; a deactivated context is reused.
    /// The context ends up in `AwaitingResource`.
    pub fn activate_bearer(&mut self, ue: UeId, bearer: SlBearer) -> Result<(), SidelinkError> {
        let pool_id = self.config.active_pool_id;
        if !self.pools.contains(pool_id) {
            return Err(SidelinkError::UnknownPool(pool_id));
        }
        let mcs = self.config.mcs_policy.mcs();
        let retx = self.config.blind_retx.effective_count();

        let ctx = self
            .contexts
            .entry(ue)
            .or_insert_with(|| UeSlContext::new(ue, pool_id, bearer.clone(), mcs, retx));
        ctx.transition(SlContextState::AwaitingResource)?;
        ctx.set_bearer(bearer);

        info!(
            ue,
            pool = pool_id,
            lcid = ctx.bearer().lcid,
            pqi = ctx.bearer().pqi,
            dst = ctx.bearer().destination_l2_id,
            "sidelink bearer activated"
        );
        Ok(())
    }

    /// Deactivate the bearer of `ue`: drop its reservation and buffered data
    /// and return the pending tick handle so the caller can cancel it.
    pub fn deactivate_bearer(&mut self, ue: UeId) -> Result<Option<EventHandle>, SidelinkError> {
        let ctx = self
            .contexts
            .get_mut(&ue)
            .ok_or(SidelinkError::UnknownUe(ue))?;
        ctx.transition(SlContextState::Inactive)?;
        ctx.reservation = None;
        let dropped = ctx.buffer.take();
        info!(ue, dropped_packets = dropped.packets, "sidelink bearer deactivated");
        Ok(ctx.tick_handle.take())
    }

    /// Remember the handle of the UE's next tick event.
    pub fn set_tick_handle(&mut self, ue: UeId, handle: EventHandle) -> Result<(), SidelinkError> {
        let ctx = self
            .contexts
            .get_mut(&ue)
            .ok_or(SidelinkError::UnknownUe(ue))?;
        ctx.tick_handle = Some(handle);
        Ok(())
    }

    /// Deactivate every active context and return the tick handles to cancel.
    ///
    /// Contexts are kept so their counters remain readable after the run.
    pub fn teardown(&mut self) -> Vec<EventHandle> {
        let mut handles = Vec::new();
        for ctx in self.contexts.values_mut() {
            if ctx.is_active() {
                let moved = ctx.transition(SlContextState::Inactive);
                debug_assert!(moved.is_ok(), "active context refused Inactive: {moved:?}");
                ctx.reservation = None;
                ctx.buffer.take();
            }
            handles.extend(ctx.tick_handle.take());
        }
        info!(ue_count = self.contexts.len(), "sidelink contexts torn down");
        handles
    }

    /// Append one application packet of `bytes` to the UE's buffer.
    ///
    /// # Errors
    /// [`SidelinkError::UnknownUe`], or [`SidelinkError::StaleContext`] if
    /// the bearer is not active.
    pub fn enqueue_packet(&mut self, ue: UeId, bytes: u32, now: SimTime) -> Result<(), SidelinkError> {
        let ctx = self.context_mut(ue)?;
        if !ctx.is_active() {
            return Err(SidelinkError::StaleContext { ue, at: now });
        }
        ctx.buffer.push(bytes);
        trace!(ue, bytes, queued = ctx.buffer.packets, "packet buffered");
        Ok(())
    }

    // ── Scheduling ────────────────────────────────────────────────────────────

    /// Select the first reservation for a freshly activated UE.
    ///
    /// # Errors
    /// * [`SidelinkError::UnknownUe`] if the UE has no context.
    /// * [`SidelinkError::PoolMismatch`] if `pool` is not the UE's pool.
    /// * [`SidelinkError::InvalidTransition`] unless the context is
    ///   `AwaitingResource`.
    pub fn assign_initial_resource(
        &mut self,
        ue: UeId,
        pool: &ResourcePool,
        now: SimTime,
    ) -> Result<ResourceOutcome, SidelinkError> {
        let ctx = self.contexts.get(&ue).ok_or(SidelinkError::UnknownUe(ue))?;
        self.check_pool(ctx, pool)?;
        if ctx.state() != SlContextState::AwaitingResource {
            return Err(SidelinkError::InvalidTransition {
                ue,
                from: ctx.state(),
                to: SlContextState::Reserved,
            });
        }
        self.reselect(ue, pool, now)
    }

    /// Handle one scheduling tick for `ue`.
    ///
    /// * `Inactive` → [`SidelinkError::StaleContext`], context unchanged.
    /// * Empty buffer → [`TickOutcome::NoData`]; a held reservation loses
    ///   its next occurrence.
    /// * `AwaitingResource` → try to select; on failure return
    ///   [`TickOutcome::PoolExhausted`] and stay put.
    /// * `Reserved` → use the next occurrence of the reservation (re-selecting
    ///   first if that occurrence is already in the past).
    ///
    /// A decision consumes one occurrence; the last one sends the context back
    /// to `AwaitingResource`.
    pub fn on_scheduling_tick(
        &mut self,
        ue: UeId,
        pool: &ResourcePool,
        now: SimTime,
    ) -> Result<TickOutcome, SidelinkError> {
        let ctx = self.contexts.get(&ue).ok_or(SidelinkError::UnknownUe(ue))?;
        if ctx.state() == SlContextState::Inactive {
            return Err(SidelinkError::StaleContext { ue, at: now });
        }
        self.check_pool(ctx, pool)?;

        let current_slot = self.config.slot_at_or_after(now);

        // A reservation whose next occurrence already passed is expired.
        if ctx.state() == SlContextState::Reserved {
            let next_slot = ctx
                .reservation
                .and_then(|r| pool.physical_slot(r.next_logical()));
            if next_slot.map_or(true, |slot| slot < current_slot) {
                debug!(ue, current_slot, "reservation expired before use, re-selecting");
                let ctx = self.context_mut(ue)?;
                ctx.reservation = None;
                ctx.transition(SlContextState::AwaitingResource)?;
            }
        }

        let ctx = self.context_mut(ue)?;
        if ctx.buffer.is_empty() {
            ctx.stats.idle_ticks += 1;
            if let Some(mut reservation) = ctx.reservation {
                reservation.used += 1;
                if reservation.is_exhausted() {
                    ctx.reservation = None;
                    ctx.transition(SlContextState::AwaitingResource)?;
                } else {
                    ctx.reservation = Some(reservation);
                }
            }
            trace!(ue, current_slot, "buffer empty, tick idle");
            return Ok(TickOutcome::NoData);
        }

        if ctx.state() == SlContextState::AwaitingResource {
            if let ResourceOutcome::Exhausted = self.reselect(ue, pool, now)? {
                return Ok(TickOutcome::PoolExhausted);
            }
        }

        let decision = self.consume_occurrence(ue, pool)?;
        Ok(TickOutcome::Scheduled(decision))
    }

    /// Record that the transmission of `kind` on `slot` fired.
    ///
    /// Transmissions of a UE that has been deactivated since the decision are
    /// still counted: the transport block was already committed.
    pub fn record_transmission(
        &mut self,
        decision: &SchedulingDecision,
        kind: TxKind,
        slot: u64,
        at: SimTime,
    ) -> Result<(), SidelinkError> {
        let ctx = self.context_mut(decision.ue)?;
        match kind {
            TxKind::Initial => ctx.stats.initial_tx += 1,
            TxKind::BlindRetx(_) => ctx.stats.retx += 1,
        }
        self.sink.record(SlRecord::Transmission {
            ue: decision.ue,
            kind,
            slot,
            subchannel: decision.subchannel,
            rb_start: decision.rb_start,
            rb_len: decision.rb_len,
            mcs: decision.mcs,
            at,
        });
        Ok(())
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    fn context_mut(&mut self, ue: UeId) -> Result<&mut UeSlContext, SidelinkError> {
        self.contexts
            .get_mut(&ue)
            .ok_or(SidelinkError::UnknownUe(ue))
    }

    fn check_pool(&self, ctx: &UeSlContext, pool: &ResourcePool) -> Result<(), SidelinkError> {
        if ctx.pool_id() != pool.id() {
            return Err(SidelinkError::PoolMismatch {
                ue: ctx.ue_id(),
                expected: ctx.pool_id(),
                got: pool.id(),
            });
        }
        Ok(())
    }

    /// Run selection for a context in `AwaitingResource` and apply the result.
    fn reselect(
        &mut self,
        ue: UeId,
        pool: &ResourcePool,
        now: SimTime,
    ) -> Result<ResourceOutcome, SidelinkError> {
        let current_slot = self.config.slot_at_or_after(now);
        let selected = self.select_resource(ue, pool, current_slot);

        let ctx = self
            .contexts
            .get_mut(&ue)
            .ok_or(SidelinkError::UnknownUe(ue))?;
        let Some(reservation) = selected else {
            ctx.stats.pool_exhausted += 1;
            warn!(
                ue,
                pool = pool.id(),
                current_slot,
                exhausted_count = ctx.stats.pool_exhausted,
                "no eligible sidelink resource in selection window"
            );
            self.sink.record(SlRecord::PoolExhausted {
                ue,
                pool: pool.id(),
                at: now,
            });
            return Ok(ResourceOutcome::Exhausted);
        };

        ctx.transition(SlContextState::Reserved)?;
        ctx.reservation = Some(reservation);
        ctx.stats.selections += 1;
        debug!(
            ue,
            slot = reservation.first_slot,
            logical = reservation.first_logical,
            subchannel = reservation.subchannel,
            occurrences = reservation.total,
            "resource reserved"
        );
        Ok(ResourceOutcome::Reserved(reservation))
    }

    /// Lowest eligible (slot, subchannel) in the selection window.
    fn select_resource(&self, ue: UeId, pool: &ResourcePool, current_slot: u64) -> Option<Reservation> {
        let first = current_slot + u64::from(self.config.t1);
        let last = current_slot + self.config.t2_effective(pool.selection_window_ms());
        let sensed = self.sensed_reservations(ue, pool, current_slot);
        let period_logical = pool.logical_period(self.config.reservation_period_slots());

        pool.eligible_slots(first, last).find_map(|slot| {
            let logical = pool.logical_slot(slot)?;
            let subchannel = (0..pool.num_subchannels())
                .find(|&sc| !sensed.iter().any(|r| r.occupies(logical, sc)))?;
            Some(Reservation {
                first_slot: slot,
                first_logical: logical,
                subchannel,
                num_subchannels: 1,
                period_logical,
                used: 0,
                total: pool.max_num_per_reserve(),
                selected_at_slot: current_slot,
            })
        })
    }

    /// Other UEs' reservations visible to `ue` through sensing.
    fn sensed_reservations(&self, ue: UeId, pool: &ResourcePool, current_slot: u64) -> Vec<Reservation> {
        if !self.config.enable_sensing {
            return Vec::new();
        }
        let window = self.config.sensing_window_slots(pool.sensing_window_ms());
        let window_start = current_slot.saturating_sub(window);
        self.contexts
            .values()
            .filter(|c| c.ue_id() != ue && c.pool_id() == pool.id())
            .filter_map(|c| c.reservation)
            .filter(|r| r.selected_at_slot >= window_start)
            .collect()
    }

    /// Turn the next occurrence of the UE's reservation into a decision
    /// carrying the whole buffer.
    fn consume_occurrence(&mut self, ue: UeId, pool: &ResourcePool) -> Result<SchedulingDecision, SidelinkError> {
        let config = &self.config;
        let ctx = self
            .contexts
            .get_mut(&ue)
            .ok_or(SidelinkError::UnknownUe(ue))?;
        let Some(mut reservation) = ctx.reservation else {
            return Err(SidelinkError::InvalidTransition {
                ue,
                from: ctx.state(),
                to: SlContextState::Reserved,
            });
        };

        let to_physical = |logical: u64| {
            pool.physical_slot(logical)
                .ok_or(SidelinkError::NoEligibleSlot { ue, pool: pool.id() })
        };
        let logical = reservation.next_logical();
        let gap = u64::from(config.blind_retx.gap_slots);
        let slot = to_physical(logical)?;
        let retx_slots = (1..=u64::from(ctx.retx_count()))
            .map(|k| to_physical(logical + k * gap))
            .collect::<Result<Vec<u64>, _>>()?;

        reservation.used += 1;
        if reservation.is_exhausted() {
            ctx.reservation = None;
            ctx.transition(SlContextState::AwaitingResource)?;
            debug!(ue, "reservation used up, back to AwaitingResource");
        } else {
            ctx.reservation = Some(reservation);
        }

        let payload = ctx.buffer.take();
        let tx_time = config.slot_start(slot);
        let decision = SchedulingDecision {
            ue,
            pool: pool.id(),
            slot,
            subchannel: reservation.subchannel,
            rb_start: pool.subchannel_start_rb(reservation.subchannel),
            rb_len: pool.subchannel_size_rbs(),
            mcs: ctx.mcs(),
            tx_time,
            retx_times: retx_slots.iter().map(|&s| config.slot_start(s)).collect(),
            retx_slots,
            packets: payload.packets,
            bytes: payload.bytes,
        };
        ctx.stats.decisions += 1;

        debug!(
            ue,
            slot,
            subchannel = decision.subchannel,
            mcs = decision.mcs,
            tx_time = %decision.tx_time,
            retx = decision.retx_slots.len(),
            packets = decision.packets,
            "scheduling decision"
        );
        self.sink.record(SlRecord::Decision {
            ue,
            pool: pool.id(),
            subchannel: decision.subchannel,
            slot,
            mcs: decision.mcs,
            at: tx_time,
        });
        Ok(decision)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── Test helpers ──────────────────────────────────────────────────────────

    fn all_ones_pool() -> ResourcePool {
        ResourcePoolFactory::new()
            .set_time_resources(vec![true; 10])
            .create_pool()
            .unwrap()
    }

    fn scheduler_with(pool: ResourcePool, config: SlMacConfig) -> SidelinkScheduler {
        let mut reg = PoolRegistry::new();
        reg.insert(pool).unwrap();
        SidelinkScheduler::new(config, reg, MemorySink::new())
    }

    fn active_ue(sched: &mut SidelinkScheduler, ue: UeId) {
        sched.activate_bearer(ue, SlBearer::push_to_talk(255)).unwrap();
    }

    fn queue_packet(sched: &mut SidelinkScheduler, ue: UeId) {
        sched.enqueue_packet(ue, 200, SimTime::ZERO).unwrap();
    }

    // ── assign_initial_resource ───────────────────────────────────────────────

    #[test]
    fn all_ones_bitmap_assigns_lowest_subchannel_at_t1() {
        let pool = all_ones_pool();
        let mut sched = scheduler_with(pool.clone(), SlMacConfig::default());
        active_ue(&mut sched, 1);

        let out = sched
            .assign_initial_resource(1, &pool, SimTime::from_millis(10))
            .unwrap();

        let ResourceOutcome::Reserved(r) = out else {
            panic!("expected a reservation, got {out:?}");
        };
        // 10 ms at 4 slots/ms = slot 40; T1 = 2.
        assert_eq!(r.first_slot, 42);
        assert_eq!(r.subchannel, 0);
        assert_eq!(r.total, 3);
        assert_eq!(sched.context(1).unwrap().state(), SlContextState::Reserved);
    }

    #[test]
    fn bitmap_gap_pushes_selection_to_next_eligible_slot() {
        // Slots 0..=5 eligible, 6..=8 not, 9..=11 eligible (period 12).
        let pool = ResourcePoolFactory::new().create_pool().unwrap();
        let cfg = SlMacConfig {
            t1: 6,
            ..Default::default()
        };
        let mut sched = scheduler_with(pool.clone(), cfg);
        active_ue(&mut sched, 1);

        let out = sched.assign_initial_resource(1, &pool, SimTime::ZERO).unwrap();
        assert!(matches!(out, ResourceOutcome::Reserved(r) if r.first_slot == 9));
    }

    #[test]
    fn all_zero_bitmap_is_reported_as_exhausted_not_error() {
        let pool = ResourcePoolFactory::new()
            .set_time_resources(vec![false; 12])
            .create_pool()
            .unwrap();
        let mut sched = scheduler_with(pool.clone(), SlMacConfig::default());
        active_ue(&mut sched, 1);

        let out = sched.assign_initial_resource(1, &pool, SimTime::ZERO).unwrap();
        assert_eq!(out, ResourceOutcome::Exhausted);
        let ctx = sched.context(1).unwrap();
        assert_eq!(ctx.state(), SlContextState::AwaitingResource);
        assert_eq!(ctx.stats().pool_exhausted, 1);

        // Retried on the tick, still exhausted, still counted.
        queue_packet(&mut sched, 1);
        let tick = sched.on_scheduling_tick(1, &pool, SimTime::from_millis(100)).unwrap();
        assert_eq!(tick, TickOutcome::PoolExhausted);
        assert_eq!(sched.context(1).unwrap().stats().pool_exhausted, 2);
        assert_eq!(
            sched
                .sink()
                .records()
                .iter()
                .filter(|r| matches!(r, SlRecord::PoolExhausted { .. }))
                .count(),
            2
        );
    }

    #[test]
    fn assign_requires_awaiting_resource() {
        let pool = all_ones_pool();
        let mut sched = scheduler_with(pool.clone(), SlMacConfig::default());
        active_ue(&mut sched, 1);
        sched.assign_initial_resource(1, &pool, SimTime::ZERO).unwrap();

        let err = sched.assign_initial_resource(1, &pool, SimTime::ZERO).unwrap_err();
        assert!(matches!(
            err,
            SidelinkError::InvalidTransition {
                from: SlContextState::Reserved,
                ..
            }
        ));
    }

    #[test]
    fn wrong_pool_is_rejected() {
        let pool = all_ones_pool();
        let other = ResourcePoolFactory::new().set_pool_id(5).create_pool().unwrap();
        let mut sched = scheduler_with(pool, SlMacConfig::default());
        active_ue(&mut sched, 1);

        let err = sched.on_scheduling_tick(1, &other, SimTime::ZERO).unwrap_err();
        assert_eq!(
            err,
            SidelinkError::PoolMismatch {
                ue: 1,
                expected: 0,
                got: 5
            }
        );
    }

    // ── on_scheduling_tick ────────────────────────────────────────────────────

    #[test]
    fn tick_with_blind_retx_two_gives_three_transmissions_at_fixed_offsets() {
        let pool = all_ones_pool();
        let cfg = SlMacConfig {
            blind_retx: BlindRetx {
                enabled: true,
                count: 2,
                gap_slots: 4,
            },
            ..Default::default()
        };
        let mut sched = scheduler_with(pool.clone(), cfg);
        active_ue(&mut sched, 1);
        sched.assign_initial_resource(1, &pool, SimTime::ZERO).unwrap();
        queue_packet(&mut sched, 1);

        let TickOutcome::Scheduled(d) = sched.on_scheduling_tick(1, &pool, SimTime::ZERO).unwrap() else {
            panic!("expected a decision");
        };
        let txs: Vec<_> = d.transmissions().collect();
        assert_eq!(txs.len(), 3);
        // slot 2 → 0.5 ms, then +4 slots (1 ms) each
        assert_eq!(txs[0], (TxKind::Initial, 2, SimTime::from_micros(500)));
        assert_eq!(txs[1], (TxKind::BlindRetx(1), 6, SimTime::from_micros(1_500)));
        assert_eq!(txs[2], (TxKind::BlindRetx(2), 10, SimTime::from_micros(2_500)));
        assert_eq!(d.mcs, 14);
        assert_eq!(d.rb_start, 0);
        assert_eq!(d.rb_len, 50);
    }

    #[test]
    fn reservation_lasts_max_num_per_reserve_ticks_then_reselects() {
        let pool = all_ones_pool(); // max_num_per_reserve = 3
        let mut sched = scheduler_with(pool.clone(), SlMacConfig::default());
        active_ue(&mut sched, 1);
        sched.assign_initial_resource(1, &pool, SimTime::ZERO).unwrap();

        let mut slots = Vec::new();
        for k in 0..3u64 {
            let now = SimTime::from_millis(100 * k);
            queue_packet(&mut sched, 1);
            let TickOutcome::Scheduled(d) = sched.on_scheduling_tick(1, &pool, now).unwrap() else {
                panic!("tick {k} should schedule");
            };
            slots.push(d.slot);
        }
        // Same resource, one period (400 slots) apart.
        assert_eq!(slots, vec![2, 402, 802]);
        assert_eq!(sched.context(1).unwrap().state(), SlContextState::AwaitingResource);
        assert!(sched.context(1).unwrap().reservation().is_none());

        // Fourth tick re-selects relative to its own time.
        queue_packet(&mut sched, 1);
        let TickOutcome::Scheduled(d) = sched
            .on_scheduling_tick(1, &pool, SimTime::from_millis(300))
            .unwrap()
        else {
            panic!("reselection should succeed");
        };
        assert_eq!(d.slot, 1_202);
        assert_eq!(sched.context(1).unwrap().stats().selections, 2);
        assert_eq!(sched.context(1).unwrap().stats().decisions, 4);
    }

    #[test]
    fn stale_reservation_is_reselected() {
        let pool = all_ones_pool();
        let mut sched = scheduler_with(pool.clone(), SlMacConfig::default());
        active_ue(&mut sched, 1);
        sched.assign_initial_resource(1, &pool, SimTime::ZERO).unwrap();

        // Skip far past the reserved slot 2.
        queue_packet(&mut sched, 1);
        let TickOutcome::Scheduled(d) = sched
            .on_scheduling_tick(1, &pool, SimTime::from_millis(50))
            .unwrap()
        else {
            panic!("expected a decision");
        };
        assert_eq!(d.slot, 202);
        assert_eq!(sched.context(1).unwrap().stats().selections, 2);
    }

    #[test]
    fn tick_on_inactive_context_is_stale_and_changes_nothing() {
        let pool = all_ones_pool();
        let mut sched = scheduler_with(pool.clone(), SlMacConfig::default());
        active_ue(&mut sched, 1);
        sched.assign_initial_resource(1, &pool, SimTime::ZERO).unwrap();
        sched.deactivate_bearer(1).unwrap();

        let before = sched.context(1).unwrap().clone();
        let records_before = sched.sink().records().len();

        let err = sched
            .on_scheduling_tick(1, &pool, SimTime::from_millis(100))
            .unwrap_err();
        assert_eq!(
            err,
            SidelinkError::StaleContext {
                ue: 1,
                at: SimTime::from_millis(100)
            }
        );

        let after = sched.context(1).unwrap();
        assert_eq!(after.state(), SlContextState::Inactive);
        assert_eq!(after.stats(), before.stats());
        assert_eq!(after.reservation(), before.reservation());
        assert_eq!(sched.sink().records().len(), records_before);
    }

    #[test]
    fn unknown_ue_is_an_error() {
        let pool = all_ones_pool();
        let mut sched = scheduler_with(pool.clone(), SlMacConfig::default());
        assert_eq!(
            sched.on_scheduling_tick(9, &pool, SimTime::ZERO).unwrap_err(),
            SidelinkError::UnknownUe(9)
        );
    }

    #[test]
    fn disabled_blind_retx_gives_single_transmission() {
        let pool = all_ones_pool();
        let cfg = SlMacConfig {
            blind_retx: BlindRetx {
                enabled: false,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut sched = scheduler_with(pool.clone(), cfg);
        active_ue(&mut sched, 1);
        queue_packet(&mut sched, 1);
        let TickOutcome::Scheduled(d) = sched.on_scheduling_tick(1, &pool, SimTime::ZERO).unwrap() else {
            panic!("expected a decision");
        };
        assert_eq!(d.transmissions().count(), 1);
        assert!(d.retx_slots.is_empty());
    }

    #[test]
    fn default_bitmap_keeps_reuses_and_retx_on_sidelink_slots() {
        // 111111000111 with a 400-slot period: 400 % 12 != 0, so a plain
        // physical offset would drift onto slots 6..=8.
        let pool = ResourcePoolFactory::new().create_pool().unwrap();
        let mut sched = scheduler_with(pool.clone(), SlMacConfig::default());
        active_ue(&mut sched, 1);

        let mut decisions = Vec::new();
        for k in 0..12u64 {
            queue_packet(&mut sched, 1);
            let now = SimTime::from_millis(100 * k);
            let TickOutcome::Scheduled(d) = sched.on_scheduling_tick(1, &pool, now).unwrap() else {
                panic!("tick {k} should schedule");
            };
            decisions.push(d);
        }

        for d in &decisions {
            for (kind, slot, at) in d.transmissions() {
                assert!(pool.is_slot_eligible(slot), "{kind:?} on slot {slot}");
                assert_eq!(at, sched.config().slot_start(slot));
            }
        }
        // logical 2, 302, 602 → slots 2, 401, 803; retx of the first at
        // logical 6 and 10 → slots 9 and 13.
        let slots: Vec<u64> = decisions.iter().take(3).map(|d| d.slot).collect();
        assert_eq!(slots, vec![2, 401, 803]);
        assert_eq!(decisions[0].retx_slots, vec![9, 13]);
        assert_eq!(sched.context(1).unwrap().stats().selections, 4);
    }

    // ── Buffer ────────────────────────────────────────────────────────────────

    #[test]
    fn empty_buffer_tick_is_idle_and_lets_the_occurrence_pass() {
        let pool = all_ones_pool();
        let mut sched = scheduler_with(pool.clone(), SlMacConfig::default());
        active_ue(&mut sched, 1);
        sched.assign_initial_resource(1, &pool, SimTime::ZERO).unwrap();

        let out = sched.on_scheduling_tick(1, &pool, SimTime::ZERO).unwrap();
        assert_eq!(out, TickOutcome::NoData);
        let ctx = sched.context(1).unwrap();
        assert_eq!(ctx.stats().idle_ticks, 1);
        assert_eq!(ctx.stats().decisions, 0);
        assert_eq!(ctx.reservation().unwrap().used, 1);
        assert!(sched.sink().decisions().next().is_none());

        // The second occurrence is the first one used.
        queue_packet(&mut sched, 1);
        let TickOutcome::Scheduled(d) = sched
            .on_scheduling_tick(1, &pool, SimTime::from_millis(100))
            .unwrap()
        else {
            panic!("expected a decision");
        };
        assert_eq!(d.slot, 402);

        // Idling through the last occurrence releases the reservation.
        sched.on_scheduling_tick(1, &pool, SimTime::from_millis(200)).unwrap();
        let ctx = sched.context(1).unwrap();
        assert_eq!(ctx.state(), SlContextState::AwaitingResource);
        assert!(ctx.reservation().is_none());
    }

    #[test]
    fn decision_carries_the_whole_buffer() {
        let pool = all_ones_pool();
        let mut sched = scheduler_with(pool.clone(), SlMacConfig::default());
        active_ue(&mut sched, 1);
        for bytes in [100, 200, 300] {
            sched.enqueue_packet(1, bytes, SimTime::ZERO).unwrap();
        }

        let TickOutcome::Scheduled(d) = sched.on_scheduling_tick(1, &pool, SimTime::ZERO).unwrap() else {
            panic!("expected a decision");
        };
        assert_eq!((d.packets, d.bytes), (3, 600));
        assert!(sched.context(1).unwrap().buffer().is_empty());
    }

    #[test]
    fn enqueue_needs_an_active_bearer() {
        let pool = all_ones_pool();
        let mut sched = scheduler_with(pool, SlMacConfig::default());
        assert_eq!(
            sched.enqueue_packet(1, 200, SimTime::ZERO).unwrap_err(),
            SidelinkError::UnknownUe(1)
        );

        active_ue(&mut sched, 1);
        queue_packet(&mut sched, 1);
        sched.deactivate_bearer(1).unwrap();
        assert!(sched.context(1).unwrap().buffer().is_empty(), "dropped on deactivation");
        assert!(matches!(
            sched.enqueue_packet(1, 200, SimTime::from_millis(5)),
            Err(SidelinkError::StaleContext { ue: 1, .. })
        ));
    }

    #[test]
    fn group_members_share_the_destination_and_are_active() {
        let pool = all_ones_pool();
        let mut sched = scheduler_with(pool, SlMacConfig::default());
        for ue in 1..=3 {
            active_ue(&mut sched, ue);
        }
        sched.activate_bearer(4, SlBearer::push_to_talk(7)).unwrap();
        sched.deactivate_bearer(3).unwrap();

        assert_eq!(sched.group_members(1).unwrap(), vec![2]);
        assert_eq!(sched.group_members(4).unwrap(), Vec::<UeId>::new());
        assert_eq!(sched.group_members(9).unwrap_err(), SidelinkError::UnknownUe(9));
    }

    // ── Sensing ───────────────────────────────────────────────────────────────

    #[test]
    fn without_sensing_ues_pick_the_same_resource() {
        let pool = all_ones_pool();
        let mut sched = scheduler_with(pool.clone(), SlMacConfig::default());
        for ue in [1, 2] {
            active_ue(&mut sched, ue);
            sched.assign_initial_resource(ue, &pool, SimTime::ZERO).unwrap();
        }
        let r1 = *sched.context(1).unwrap().reservation().unwrap();
        let r2 = *sched.context(2).unwrap().reservation().unwrap();
        assert_eq!((r1.first_slot, r1.subchannel), (r2.first_slot, r2.subchannel));
    }

    #[test]
    fn with_sensing_second_ue_avoids_sensed_reservation() {
        let pool = all_ones_pool(); // 2 subchannels
        let cfg = SlMacConfig {
            enable_sensing: true,
            ..Default::default()
        };
        let mut sched = scheduler_with(pool.clone(), cfg);
        for ue in [1, 2, 3] {
            active_ue(&mut sched, ue);
            sched.assign_initial_resource(ue, &pool, SimTime::ZERO).unwrap();
        }
        let pick = |ue| {
            let r = sched.context(ue).unwrap().reservation().copied().unwrap();
            (r.first_slot, r.subchannel)
        };
        assert_eq!(pick(1), (2, 0));
        assert_eq!(pick(2), (2, 1));
        assert_eq!(pick(3), (3, 0));
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    #[test]
    fn double_activation_is_invalid() {
        let pool = all_ones_pool();
        let mut sched = scheduler_with(pool, SlMacConfig::default());
        active_ue(&mut sched, 1);
        let err = sched
            .activate_bearer(1, SlBearer::push_to_talk(255))
            .unwrap_err();
        assert!(matches!(err, SidelinkError::InvalidTransition { .. }));
    }

    #[test]
    fn reactivation_after_deactivation_reuses_context() {
        let pool = all_ones_pool();
        let mut sched = scheduler_with(pool, SlMacConfig::default());
        active_ue(&mut sched, 1);
        sched.deactivate_bearer(1).unwrap();
        active_ue(&mut sched, 1);
        assert_eq!(
            sched.context(1).unwrap().state(),
            SlContextState::AwaitingResource
        );
        assert_eq!(sched.contexts().count(), 1);
    }

    #[test]
    fn activation_on_missing_pool_fails() {
        let pool = all_ones_pool();
        let cfg = SlMacConfig {
            active_pool_id: 4,
            ..Default::default()
        };
        let mut sched = scheduler_with(pool, cfg);
        assert_eq!(
            sched
                .activate_bearer(1, SlBearer::push_to_talk(255))
                .unwrap_err(),
            SidelinkError::UnknownPool(4)
        );
    }

    #[test]
    fn teardown_deactivates_everything_and_returns_handles() {
        let pool = all_ones_pool();
        let mut sched = scheduler_with(pool, SlMacConfig::default());
        active_ue(&mut sched, 1);
        active_ue(&mut sched, 2);
        let h = crate::des::EventHandle::new(3, SimTime::ZERO);
        sched.set_tick_handle(2, h).unwrap();

        let handles = sched.teardown();
        assert_eq!(handles, vec![h]);
        assert!(sched.contexts().all(|c| !c.is_active()));
    }

    #[test]
    fn decisions_are_deterministic() {
        let run = || {
            let pool = all_ones_pool();
            let cfg = SlMacConfig {
                enable_sensing: true,
                ..Default::default()
            };
            let mut sched = scheduler_with(pool.clone(), cfg);
            let mut out = Vec::new();
            for ue in 1..=4 {
                active_ue(&mut sched, ue);
            }
            for k in 0..5u64 {
                for ue in 1..=4 {
                    queue_packet(&mut sched, ue);
                    let now = SimTime::from_millis(100 * k);
                    out.push(sched.on_scheduling_tick(ue, &pool, now).unwrap());
                }
            }
            out
        };
        let reference = run();
        for _ in 0..10 {
            assert_eq!(run(), reference);
        }
    }
}

//! Event-driven host world for the sidelink MAC.
//!
//! [`SidelinkNetwork`] is the `W` of a [`Scheduler<W>`]: every callback gets
//! the scheduler (to queue follow-up events) and the network (to reach the
//! MAC).  Per UE the event chain is:
//!
//! ```text
//! bearer activation ─► initial selection ─► tick ─┬─► tx (initial) ─► rx at the group
//!                                                 ├─► tx (blind retx 1..=n)
//!                                                 └─► tick (+ reservation period) ─► …
//!
//! traffic source ─► packet into MAC buffer ─► packet (+ interval) ─► …
//! ```
//!
//! Tick and traffic handles are kept so deactivation can cancel both.

use std::collections::BTreeMap;

use tracing::{debug, info, trace};

use crate::des::{EventHandle, Scheduler, SchedulerError, SimTime};

use super::{
    MemorySink, ResourceOutcome, SchedulingDecision, SidelinkError, SidelinkScheduler, SlBearer,
    StatsSink, TickOutcome, TrafficSource, TrafficStats, TxKind, UeId,
};

/// Kernel type driving a [`SidelinkNetwork`].
pub type NetworkScheduler<S = MemorySink> = Scheduler<SidelinkNetwork<S>>;

/// Simulated sidelink network: the MAC plus whatever the events touch.
pub struct SidelinkNetwork<S: StatsSink = MemorySink> {
    pub mac: SidelinkScheduler<S>,
    /// Application Tx/Rx counters of the whole group.
    pub traffic: TrafficStats,
    traffic_handles: BTreeMap<UeId, EventHandle>,
}

impl<S: StatsSink + 'static> SidelinkNetwork<S> {
    pub fn new(mac: SidelinkScheduler<S>) -> Self {
        Self {
            mac,
            traffic: TrafficStats::new(),
            traffic_handles: BTreeMap::new(),
        }
    }

    /// Queue the activation of `bearer` for `ue` at `at`.
    ///
    /// When the event fires the bearer is activated, the first resource is
    /// selected and the UE's first scheduling tick is queued for the same
    /// instant.
    pub fn schedule_bearer_activation(
        sched: &mut NetworkScheduler<S>,
        ue: UeId,
        bearer: SlBearer,
        at: SimTime,
    ) -> Result<EventHandle, SchedulerError> {
        debug!(ue, at = %at, "bearer activation queued");
        sched.schedule_at(at, move |s, net| on_bearer_activation(s, net, ue, bearer))
    }

    /// Queue the deactivation of the bearer of `ue` at `at`.
    pub fn schedule_bearer_deactivation(
        sched: &mut NetworkScheduler<S>,
        ue: UeId,
        at: SimTime,
    ) -> Result<EventHandle, SchedulerError> {
        debug!(ue, at = %at, "bearer deactivation queued");
        sched.schedule_at(at, move |s, net| on_bearer_deactivation(s, net, ue))
    }

    /// Start a constant-rate source for `ue` whose first packet is produced
    /// at `first_packet`.
    ///
    /// The source stops by itself as soon as it finds the UE without an
    /// active bearer.
    pub fn schedule_traffic_source(
        sched: &mut NetworkScheduler<S>,
        ue: UeId,
        source: TrafficSource,
        first_packet: SimTime,
    ) -> Result<EventHandle, SchedulerError> {
        debug!(
            ue,
            at = %first_packet,
            bytes = source.packet_size_bytes(),
            interval = %source.interval(),
            "traffic source queued"
        );
        sched.schedule_at(first_packet, move |s, net| on_packet(s, net, ue, source))
    }

    /// Deactivate every UE and cancel their pending ticks and packets.
    ///
    /// Transmission events already queued stay queued.
    pub fn teardown(&mut self, sched: &mut NetworkScheduler<S>) {
        for handle in self.mac.teardown() {
            sched.cancel(handle);
        }
        for handle in std::mem::take(&mut self.traffic_handles).into_values() {
            sched.cancel(handle);
        }
    }
}

// ── Event callbacks ───────────────────────────────────────────────────────────

fn on_bearer_activation<S: StatsSink + 'static>(
    sched: &mut NetworkScheduler<S>,
    net: &mut SidelinkNetwork<S>,
    ue: UeId,
    bearer: SlBearer,
) -> anyhow::Result<()> {
    let now = sched.now();
    net.mac.activate_bearer(ue, bearer)?;
    let pool = net.mac.pool_for(ue)?;

    match net.mac.assign_initial_resource(ue, &pool, now)? {
        ResourceOutcome::Reserved(r) => info!(
            ue,
            slot = r.first_slot,
            subchannel = r.subchannel,
            "initial sidelink resource assigned"
        ),
        ResourceOutcome::Exhausted => info!(ue, "no initial resource, retrying on first tick"),
    }

    let handle = sched.schedule_now(move |s, n| on_tick(s, n, ue));
    net.mac.set_tick_handle(ue, handle)?;
    Ok(())
}

fn on_bearer_deactivation<S: StatsSink + 'static>(
    sched: &mut NetworkScheduler<S>,
    net: &mut SidelinkNetwork<S>,
    ue: UeId,
) -> anyhow::Result<()> {
    if let Some(handle) = net.mac.deactivate_bearer(ue)? {
        sched.cancel(handle);
    }
    if let Some(handle) = net.traffic_handles.remove(&ue) {
        sched.cancel(handle);
    }
    Ok(())
}

fn on_tick<S: StatsSink + 'static>(
    sched: &mut NetworkScheduler<S>,
    net: &mut SidelinkNetwork<S>,
    ue: UeId,
) -> anyhow::Result<()> {
    let now = sched.now();
    trace!(ue, now = %now, "scheduling tick");

    let pool = net.mac.pool_for(ue)?;
    if let TickOutcome::Scheduled(decision) = net.mac.on_scheduling_tick(ue, &pool, now)? {
        dispatch_transmissions(sched, decision)?;
    }

    let period = net.mac.config().reservation_period();
    let handle = sched.schedule(period, move |s, n| on_tick(s, n, ue))?;
    net.mac.set_tick_handle(ue, handle)?;
    Ok(())
}

fn on_packet<S: StatsSink + 'static>(
    sched: &mut NetworkScheduler<S>,
    net: &mut SidelinkNetwork<S>,
    ue: UeId,
    source: TrafficSource,
) -> anyhow::Result<()> {
    let now = sched.now();
    if !net.mac.context(ue).is_some_and(|c| c.is_active()) {
        debug!(ue, now = %now, "no active bearer, traffic source stopped");
        net.traffic_handles.remove(&ue);
        return Ok(());
    }

    let bytes = source.packet_size_bytes();
    net.mac.enqueue_packet(ue, bytes, now)?;
    net.traffic.on_transmit(bytes);

    let handle = sched.schedule(source.interval(), move |s, n| on_packet(s, n, ue, source))?;
    net.traffic_handles.insert(ue, handle);
    Ok(())
}

/// One event per PSCCH/PSSCH transmission of `decision`.
fn dispatch_transmissions<S: StatsSink + 'static>(
    sched: &mut NetworkScheduler<S>,
    decision: SchedulingDecision,
) -> Result<(), SchedulerError> {
    for (kind, slot, at) in decision.transmissions() {
        let decision = decision.clone();
        sched.schedule_at(at, move |_, net| {
            net.mac.record_transmission(&decision, kind, slot, at)?;
            if kind == TxKind::Initial {
                deliver(net, &decision, at)?;
            }
            Ok(())
        })?;
    }
    Ok(())
}

/// Hand the packets of an initial transmission to the rest of the group.
fn deliver<S: StatsSink>(
    net: &mut SidelinkNetwork<S>,
    decision: &SchedulingDecision,
    at: SimTime,
) -> Result<(), SidelinkError> {
    for rx in net.mac.group_members(decision.ue)? {
        net.traffic.on_receive(rx, decision.packets, decision.bytes, at);
        trace!(tx = decision.ue, rx, packets = decision.packets, "packets received");
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sidelink::{
        PoolRegistry, ResourcePoolFactory, SlContextState, SlMacConfig, SlRecord,
    };

    fn network(config: SlMacConfig) -> SidelinkNetwork {
        let pool = ResourcePoolFactory::new()
            .set_time_resources(vec![true; 10])
            .create_pool()
            .unwrap();
        let mut pools = PoolRegistry::new();
        pools.insert(pool).unwrap();
        SidelinkNetwork::new(SidelinkScheduler::new(config, pools, MemorySink::new()))
    }

    /// Activate `ue` at 0 with a 100 ms source whose first packet is
    /// buffered before the first tick.
    fn talker(sched: &mut NetworkScheduler, ue: UeId) {
        SidelinkNetwork::schedule_bearer_activation(
            sched,
            ue,
            SlBearer::push_to_talk(255),
            SimTime::ZERO,
        )
        .unwrap();
        let source = TrafficSource::new(200, 16).unwrap();
        SidelinkNetwork::schedule_traffic_source(sched, ue, source, SimTime::ZERO).unwrap();
    }

    fn tx_times(net: &SidelinkNetwork) -> Vec<(TxKind, u64, SimTime)> {
        net.mac
            .sink()
            .transmissions()
            .map(|r| match r {
                SlRecord::Transmission { kind, slot, at, .. } => (*kind, *slot, *at),
                _ => unreachable!(),
            })
            .collect()
    }

    #[test]
    fn one_tick_with_two_blind_retx_fires_three_transmissions() {
        let mut net = network(SlMacConfig::default());
        let mut sched = NetworkScheduler::new();
        talker(&mut sched, 1);

        sched.run(&mut net, SimTime::from_millis(50)).unwrap();

        assert_eq!(
            tx_times(&net),
            vec![
                (TxKind::Initial, 2, SimTime::from_micros(500)),
                (TxKind::BlindRetx(1), 6, SimTime::from_micros(1_500)),
                (TxKind::BlindRetx(2), 10, SimTime::from_micros(2_500)),
            ]
        );
        let stats = net.mac.context(1).unwrap().stats();
        assert_eq!(stats.initial_tx, 1);
        assert_eq!(stats.retx, 2);
        assert_eq!(net.traffic.tx_packets, 1);
    }

    #[test]
    fn ticks_repeat_every_reservation_period() {
        let mut net = network(SlMacConfig::default());
        let mut sched = NetworkScheduler::new();
        talker(&mut sched, 1);

        // Ticks at 0, 100, 200 and 300 ms; the next one (400 ms) is past the stop.
        sched.run(&mut net, SimTime::from_millis(350)).unwrap();

        let ctx = net.mac.context(1).unwrap();
        assert_eq!(ctx.stats().decisions, 4);
        assert_eq!(ctx.stats().initial_tx, 4);
        assert_eq!(ctx.stats().retx, 8);
        // 3 uses of the first reservation, then one fresh selection.
        assert_eq!(ctx.stats().selections, 2);
        assert_eq!(
            ctx.tick_handle().map(|h| h.at()),
            Some(SimTime::from_millis(400))
        );
        assert!(sched.is_pending(ctx.tick_handle().unwrap()));
    }

    #[test]
    fn ticks_without_traffic_stay_idle() {
        let mut net = network(SlMacConfig::default());
        let mut sched = NetworkScheduler::new();
        SidelinkNetwork::schedule_bearer_activation(
            &mut sched,
            1,
            SlBearer::push_to_talk(255),
            SimTime::ZERO,
        )
        .unwrap();

        sched.run(&mut net, SimTime::from_millis(350)).unwrap();

        let stats = net.mac.context(1).unwrap().stats();
        assert_eq!(stats.idle_ticks, 4);
        assert_eq!(stats.decisions, 0);
        assert!(tx_times(&net).is_empty());
    }

    #[test]
    fn initial_transmissions_reach_the_rest_of_the_group() {
        let mut net = network(SlMacConfig::default());
        let mut sched = NetworkScheduler::new();
        talker(&mut sched, 1);
        // Listener on the same group, no traffic of its own.
        SidelinkNetwork::schedule_bearer_activation(
            &mut sched,
            2,
            SlBearer::push_to_talk(255),
            SimTime::ZERO,
        )
        .unwrap();
        // Different group: never receives.
        SidelinkNetwork::schedule_bearer_activation(
            &mut sched,
            3,
            SlBearer::push_to_talk(9),
            SimTime::ZERO,
        )
        .unwrap();

        sched.run(&mut net, SimTime::from_millis(250)).unwrap();

        // Packets at 0, 100, 200 ms; each carried by one initial tx, the
        // blind retransmissions add nothing.
        assert_eq!(net.traffic.tx_packets, 3);
        assert_eq!(net.traffic.rx_packets, 3);
        assert_eq!(net.traffic.rx_bits(), 3 * 1600);
        let pir = net.traffic.average_pir_secs().unwrap();
        assert!((pir - 0.100).abs() < 1e-9, "pir = {pir}");
    }

    #[test]
    fn deactivation_cancels_the_pending_tick_and_packet() {
        let mut net = network(SlMacConfig::default());
        let mut sched = NetworkScheduler::new();
        talker(&mut sched, 1);
        SidelinkNetwork::schedule_bearer_deactivation(&mut sched, 1, SimTime::from_millis(150))
            .unwrap();

        sched.run(&mut net, SimTime::from_secs(1)).unwrap();

        let ctx = net.mac.context(1).unwrap();
        assert_eq!(ctx.state(), SlContextState::Inactive);
        assert_eq!(ctx.stats().decisions, 2);
        assert_eq!(ctx.stats().initial_tx, 2);
        assert_eq!(net.traffic.tx_packets, 2);
        assert_eq!(sched.pending_events(), 0);
    }

    #[test]
    fn source_stops_without_an_active_bearer() {
        let mut net = network(SlMacConfig::default());
        let mut sched = NetworkScheduler::new();
        let source = TrafficSource::new(200, 16).unwrap();
        SidelinkNetwork::schedule_traffic_source(&mut sched, 5, source, SimTime::ZERO).unwrap();

        let summary = sched.run(&mut net, SimTime::from_secs(1)).unwrap();
        assert_eq!(summary.executed, 1);
        assert_eq!(net.traffic.tx_packets, 0);
        assert_eq!(sched.pending_events(), 0);
    }

    #[test]
    fn teardown_stops_all_ticks_and_sources() {
        let mut net = network(SlMacConfig::default());
        let mut sched = NetworkScheduler::new();
        for ue in 1..=3 {
            talker(&mut sched, ue);
        }
        sched.run(&mut net, SimTime::from_millis(120)).unwrap();
        // one tick and one packet per UE
        assert_eq!(sched.pending_events(), 6);

        net.teardown(&mut sched);
        assert_eq!(sched.pending_events(), 0);
        assert!(net.mac.contexts().all(|c| !c.is_active()));

        let summary = sched.run_to_completion(&mut net).unwrap();
        assert_eq!(summary.executed, 0);
        assert_eq!(summary.skipped_cancelled, 6);
    }

    #[test]
    fn tick_for_unknown_ue_fails_the_run() {
        let mut net = network(SlMacConfig::default());
        let mut sched = NetworkScheduler::new();
        sched.schedule_now(|s, n| on_tick(s, n, 42));

        let err = sched.run(&mut net, SimTime::from_millis(10)).unwrap_err();
        let SchedulerError::EventFailed { source, .. } = err else {
            panic!("expected EventFailed");
        };
        assert_eq!(
            source.downcast_ref::<SidelinkError>(),
            Some(&SidelinkError::UnknownUe(42))
        );
    }

    #[test]
    fn tick_for_deactivated_ue_is_stale() {
        let mut net = network(SlMacConfig::default());
        let mut sched = NetworkScheduler::new();
        talker(&mut sched, 1);
        sched.run(&mut net, SimTime::from_millis(10)).unwrap();
        net.mac.deactivate_bearer(1).unwrap();

        // A tick that escaped cancellation.
        sched.schedule_now(|s, n| on_tick(s, n, 1));
        let err = sched.run(&mut net, SimTime::from_millis(20)).unwrap_err();
        let SchedulerError::EventFailed { source, .. } = err else {
            panic!("expected EventFailed");
        };
        assert!(matches!(
            source.downcast_ref::<SidelinkError>(),
            Some(SidelinkError::StaleContext { ue: 1, .. })
        ));
    }
}

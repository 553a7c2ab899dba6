//! Scenario driver: builds the network from a [`ScenarioConfig`], runs the
//! kernel to the stop time and summarises what happened.

use std::fmt;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::ScenarioConfig;
use crate::des::{RunSummary, SchedulerError, SimTime};
use crate::sidelink::network::{NetworkScheduler, SidelinkNetwork};
use crate::sidelink::{
    MemorySink, SidelinkScheduler, SlBearer, SlContextState, StatsSink, TrafficStats, UeId,
    UeSlStats,
};

// ── Report ────────────────────────────────────────────────────────────────────

/// Final state and counters of one UE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UeReport {
    pub ue: UeId,
    pub state: SlContextState,
    pub stats: UeSlStats,
}

/// Outcome of [`V2xSimulation::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationReport {
    pub run: RunSummary,
    /// One entry per UE whose bearer was activated, ordered by UE id.
    pub ues: Vec<UeReport>,
    pub total: UeSlStats,
    pub traffic: TrafficStats,
    /// Time of the first application packet.
    pub app_start: SimTime,
}

impl SimulationReport {
    /// Every PSCCH/PSSCH transmission that fired.
    pub fn total_transmissions(&self) -> u64 {
        self.total.initial_tx + self.total.retx
    }

    /// Received bits per second between the first packet and the end of the
    /// run, in kbit/s.
    pub fn throughput_kbps(&self) -> f64 {
        self.traffic.throughput_kbps(self.app_start, self.run.end_time)
    }
}

impl fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Simulated time = {}", self.run.end_time)?;
        writeln!(f, "Events executed = {}", self.run.executed)?;
        writeln!(f, "Total scheduling decisions = {}", self.total.decisions)?;
        writeln!(f, "Total initial transmissions = {}", self.total.initial_tx)?;
        writeln!(f, "Total blind retransmissions = {}", self.total.retx)?;
        writeln!(f, "Total resource selections = {}", self.total.selections)?;
        writeln!(f, "Pool exhaustion events = {}", self.total.pool_exhausted)?;
        writeln!(f, "Total Tx bits = {}", self.traffic.tx_bits())?;
        writeln!(f, "Total Tx packets = {}", self.traffic.tx_packets)?;
        writeln!(f, "Total Rx bits = {}", self.traffic.rx_bits())?;
        writeln!(f, "Total Rx packets = {}", self.traffic.rx_packets)?;
        writeln!(f, "Avrg thput = {:.3} kbps", self.throughput_kbps())?;
        match self.traffic.average_pir_secs() {
            Some(pir) => write!(f, "Average Packet Inter-Reception (PIR) {pir:.6} sec"),
            None => write!(f, "Average Packet Inter-Reception (PIR) n/a"),
        }
    }
}

// ── V2xSimulation ─────────────────────────────────────────────────────────────

/// One configured sidelink scenario, ready to run.
pub struct V2xSimulation<S: StatsSink = MemorySink> {
    stop: SimTime,
    app_start: SimTime,
    sched: NetworkScheduler<S>,
    net: SidelinkNetwork<S>,
}

impl<S: StatsSink + 'static> V2xSimulation<S> {
    /// Validate `config`, build the pools and MAC, and queue for UEs
    /// `1..=ue_count` the bearer activation, the optional deactivation and
    /// a traffic source whose first packet follows activation by one packet
    /// interval.
    ///
    /// # Errors
    /// The scenario fails validation, or an event cannot be queued.
    pub fn from_config(config: &ScenarioConfig, sink: S) -> Result<Self> {
        config.validate().context("Invalid scenario configuration")?;
        let mac_config = config.mac_config()?;
        let pools = config.build_pools()?;
        let source = config.traffic_source()?;
        let params = &config.simulation;

        let stop = ScenarioConfig::instant("stop_ms", params.stop_ms)?;
        let activation = ScenarioConfig::instant("bearer_activation_ms", params.bearer_activation_ms)?;
        let deactivation = params
            .bearer_deactivation_ms
            .map(|ms| ScenarioConfig::instant("bearer_deactivation_ms", ms))
            .transpose()?;
        let app_start = activation
            .checked_add(source.interval())
            .context("First application packet is beyond the simulation clock")?;

        let mut sched = NetworkScheduler::<S>::new();
        let net = SidelinkNetwork::new(SidelinkScheduler::new(mac_config, pools, sink));

        for ue in 1..=params.ue_count {
            let bearer = SlBearer::push_to_talk(params.destination_l2_id);
            SidelinkNetwork::schedule_bearer_activation(&mut sched, ue, bearer, activation)?;
            if let Some(at) = deactivation {
                SidelinkNetwork::schedule_bearer_deactivation(&mut sched, ue, at)?;
            }
            SidelinkNetwork::schedule_traffic_source(&mut sched, ue, source, app_start)?;
        }

        info!(
            ue_count = params.ue_count,
            activation = %activation,
            deactivation = ?deactivation.map(|t| t.to_string()),
            app_start = %app_start,
            packet_size_bytes = source.packet_size_bytes(),
            data_rate_kbps = source.data_rate_kbps(),
            stop = %stop,
            "scenario built"
        );

        Ok(Self {
            stop,
            app_start,
            sched,
            net,
        })
    }

    pub fn network(&self) -> &SidelinkNetwork<S> {
        &self.net
    }

    /// Kernel access for additional event sources (mobility, traffic).
    pub fn scheduler_mut(&mut self) -> &mut NetworkScheduler<S> {
        &mut self.sched
    }

    pub fn stop_time(&self) -> SimTime {
        self.stop
    }

    /// Run to the stop time, then tear every sidelink context down.
    ///
    /// # Errors
    /// The first failing event, as [`SchedulerError::EventFailed`].
    pub fn run(&mut self) -> Result<SimulationReport, SchedulerError> {
        let run = self.sched.run(&mut self.net, self.stop)?;
        self.net.teardown(&mut self.sched);

        let ues: Vec<UeReport> = self
            .net
            .mac
            .contexts()
            .map(|ctx| UeReport {
                ue: ctx.ue_id(),
                state: ctx.state(),
                stats: *ctx.stats(),
            })
            .collect();
        let total = self.net.mac.total_stats();
        let traffic = self.net.traffic.clone();

        info!(
            end_time = %run.end_time,
            decisions = total.decisions,
            initial_tx = total.initial_tx,
            retx = total.retx,
            pool_exhausted = total.pool_exhausted,
            tx_packets = traffic.tx_packets,
            rx_packets = traffic.rx_packets,
            "simulation finished"
        );

        Ok(SimulationReport {
            run,
            ues,
            total,
            traffic,
            app_start: self.app_start,
        })
    }

    pub fn into_network(self) -> SidelinkNetwork<S> {
        self.net
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

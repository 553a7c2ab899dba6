//! Scenario configuration loading and validation.
//!
//! A scenario file describes one simulation run: how long it lasts, how many
//! UEs carry a sidelink bearer, the MAC parameters and the resource pools.
//! Every section and every field is optional; missing values fall back to
//! the defaults of the reference mobility scenario.
//!
//! The expected YAML structure is:
//! ```yaml
//! simulation:
//!   stop_ms: 10000
//!   ue_count: 2
//!   bearer_activation_ms: 2000
//!   bearer_deactivation_ms: 8000   # optional
//!   destination_l2_id: 255
//!   packet_size_bytes: 200
//!   data_rate_kbps: 16
//! mac:
//!   t1: 2
//!   t2: 33
//!   reservation_period_ms: 100
//!   numerology: 2
//!   enable_sensing: false
//!   active_pool_id: 0
//!   fixed_mcs: true
//!   mcs: 14
//!   blind_retx: true
//!   blind_retx_count: 2
//!   retx_gap_slots: 4
//!   max_tx_trans_num_pssch: 5
//! pools:
//!   - id: 0
//!     time_bitmap: "111111000111"
//!     bandwidth_rbs: 106
//!     pscch_rbs: 10
//!     subchannel_size_rbs: 50
//!     sensing_window_ms: 100
//!     selection_window_ms: 5
//!     max_num_per_reserve: 3
//! ```
//!
//! Bitmaps must be quoted, otherwise YAML reads them as integers.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::sidelink::pool::parse_bitmap;
use crate::des::SimTime;
use crate::sidelink::{
    BlindRetx, McsPolicy, PoolError, PoolId, PoolRegistry, ResourcePoolFactory, SlMacConfig,
    TrafficSource,
};

/// Highest MCS index of the 64-QAM table.
pub const MAX_MCS: u8 = 28;

/// Blind retransmissions must fall within this many pool slots of the
/// initial one.
pub const MAX_RETX_SPAN_SLOTS: u64 = 32;

/// Latest instant a scenario may name, in ms.  Keeps every configured time
/// inside both the unsigned clock and the signed delay range.
pub const MAX_TIME_MS: u64 = i64::MAX as u64 / 1_000_000;

const MAX_NUMEROLOGY: u8 = 4;

// ── Private YAML deserialization types ────────────────────────────────────────

/// Top-level wrapper that maps directly onto the YAML file layout.
#[derive(Debug, Default, Deserialize)]
struct ScenarioFile {
    #[serde(default)]
    simulation: SimulationParams,
    #[serde(default)]
    mac: MacParams,
    #[serde(default)]
    pools: Vec<PoolParams>,
}

// ── Public data structures ────────────────────────────────────────────────────

/// Run length, UE population and bearer timing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SimulationParams {
    pub stop_ms: u64,
    pub ue_count: u32,
    pub bearer_activation_ms: u64,
    /// Deactivate every bearer at this time; `None` keeps them up until the end.
    pub bearer_deactivation_ms: Option<u64>,
    /// Group destination of the push-to-talk bearers.
    pub destination_l2_id: u32,
    /// Size of every application packet.
    pub packet_size_bytes: u32,
    /// Constant application rate of each UE.
    pub data_rate_kbps: u32,
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            stop_ms: 10_000,
            ue_count: 2,
            bearer_activation_ms: 2_000,
            bearer_deactivation_ms: None,
            destination_l2_id: 255,
            packet_size_bytes: 200,
            data_rate_kbps: 16,
        }
    }
}

/// UE MAC parameters as they appear in the scenario file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MacParams {
    pub t1: u32,
    pub t2: u32,
    pub reservation_period_ms: u32,
    pub numerology: u8,
    pub enable_sensing: bool,
    pub active_pool_id: PoolId,
    /// Only `true` is supported.
    pub fixed_mcs: bool,
    pub mcs: u8,
    pub blind_retx: bool,
    pub blind_retx_count: u8,
    pub retx_gap_slots: u32,
    pub max_tx_trans_num_pssch: u8,
}

impl Default for MacParams {
    fn default() -> Self {
        let mac = SlMacConfig::default();
        Self {
            t1: mac.t1,
            t2: mac.t2,
            reservation_period_ms: mac.reservation_period_ms,
            numerology: mac.numerology,
            enable_sensing: mac.enable_sensing,
            active_pool_id: mac.active_pool_id,
            fixed_mcs: true,
            mcs: mac.mcs_policy.mcs(),
            blind_retx: mac.blind_retx.enabled,
            blind_retx_count: mac.blind_retx.count,
            retx_gap_slots: mac.blind_retx.gap_slots,
            max_tx_trans_num_pssch: mac.max_tx_trans_num_pssch,
        }
    }
}

/// One resource pool as it appears in the scenario file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PoolParams {
    pub id: PoolId,
    pub time_bitmap: String,
    pub bandwidth_rbs: u16,
    pub pscch_rbs: u16,
    pub subchannel_size_rbs: u16,
    pub sensing_window_ms: u32,
    pub selection_window_ms: u32,
    pub max_num_per_reserve: u8,
}

impl Default for PoolParams {
    fn default() -> Self {
        Self {
            id: 0,
            time_bitmap: String::from("111111000111"),
            bandwidth_rbs: 106,
            pscch_rbs: 10,
            subchannel_size_rbs: 50,
            sensing_window_ms: 100,
            selection_window_ms: 5,
            max_num_per_reserve: 3,
        }
    }
}

impl PoolParams {
    fn factory(&self) -> Result<ResourcePoolFactory, PoolError> {
        Ok(ResourcePoolFactory::new()
            .set_pool_id(self.id)
            .set_time_resources(parse_bitmap(&self.time_bitmap)?)
            .set_bandwidth_rbs(self.bandwidth_rbs)
            .set_freq_resource_pscch(self.pscch_rbs)
            .set_subchannel_size(self.subchannel_size_rbs)
            .set_sensing_window(self.sensing_window_ms)
            .set_selection_window(self.selection_window_ms)
            .set_max_num_per_reserve(self.max_num_per_reserve))
    }
}

/// A complete, validated-on-demand scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioConfig {
    pub simulation: SimulationParams,
    pub mac: MacParams,
    pub pools: Vec<PoolParams>,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl ScenarioConfig {
    /// The scenario used when no configuration file is supplied: default
    /// simulation and MAC parameters over a single default pool.
    pub fn default_config() -> Self {
        Self {
            simulation: SimulationParams::default(),
            mac: MacParams::default(),
            pools: vec![PoolParams::default()],
        }
    }

    /// Check cross-field constraints and build every pool once.
    ///
    /// # Errors
    /// The first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sim = &self.simulation;
        if sim.ue_count == 0 {
            return Err(ConfigError::NoUes);
        }
        let times = [
            ("stop_ms", Some(sim.stop_ms)),
            ("bearer_activation_ms", Some(sim.bearer_activation_ms)),
            ("bearer_deactivation_ms", sim.bearer_deactivation_ms),
        ];
        for (field, ms) in times {
            if let Some(ms) = ms.filter(|&ms| ms > MAX_TIME_MS) {
                return Err(ConfigError::TimeOutOfRange { field, ms });
            }
        }
        if let Some(deactivation_ms) = sim.bearer_deactivation_ms {
            if deactivation_ms < sim.bearer_activation_ms {
                return Err(ConfigError::DeactivationBeforeActivation {
                    activation_ms: sim.bearer_activation_ms,
                    deactivation_ms,
                });
            }
        }

        self.traffic_source()?;
        self.mac_config()?;
        let pools = self.build_pools()?;
        if !pools.contains(self.mac.active_pool_id) {
            return Err(ConfigError::ActivePoolMissing(self.mac.active_pool_id));
        }
        Ok(())
    }

    /// The per-UE application source described by the `simulation` section.
    ///
    /// # Errors
    /// [`ConfigError::InvalidTraffic`] for a zero size or rate, or a rate so
    /// high the packet interval is below one nanosecond.
    pub fn traffic_source(&self) -> Result<TrafficSource, ConfigError> {
        let sim = &self.simulation;
        TrafficSource::new(sim.packet_size_bytes, sim.data_rate_kbps).ok_or(
            ConfigError::InvalidTraffic {
                packet_size_bytes: sim.packet_size_bytes,
                data_rate_kbps: sim.data_rate_kbps,
            },
        )
    }

    /// Checked conversion of a validated scenario time.
    ///
    /// # Errors
    /// [`ConfigError::TimeOutOfRange`] if `ms` exceeds [`MAX_TIME_MS`].
    pub fn instant(field: &'static str, ms: u64) -> Result<SimTime, ConfigError> {
        if ms > MAX_TIME_MS {
            return Err(ConfigError::TimeOutOfRange { field, ms });
        }
        SimTime::try_from_millis(ms).ok_or(ConfigError::TimeOutOfRange { field, ms })
    }

    /// Translate the `mac` section into the scheduler's configuration.
    ///
    /// # Errors
    /// [`ConfigError`] for any MAC parameter out of range.
    pub fn mac_config(&self) -> Result<SlMacConfig, ConfigError> {
        let mac = &self.mac;
        if mac.t1 > mac.t2 {
            return Err(ConfigError::InvalidSelectionWindow { t1: mac.t1, t2: mac.t2 });
        }
        if mac.reservation_period_ms == 0 {
            return Err(ConfigError::ZeroReservationPeriod);
        }
        if mac.numerology > MAX_NUMEROLOGY {
            return Err(ConfigError::InvalidNumerology(mac.numerology));
        }
        if !mac.fixed_mcs {
            return Err(ConfigError::AdaptiveMcsUnsupported);
        }
        if mac.mcs > MAX_MCS {
            return Err(ConfigError::McsOutOfRange(mac.mcs));
        }

        let blind_retx = BlindRetx {
            enabled: mac.blind_retx,
            count: mac.blind_retx_count,
            gap_slots: mac.retx_gap_slots,
        };
        let retx = blind_retx.effective_count();
        if u16::from(retx) + 1 > u16::from(mac.max_tx_trans_num_pssch) {
            return Err(ConfigError::TooManyTransmissions {
                retx,
                max: mac.max_tx_trans_num_pssch,
            });
        }
        let span_slots = u64::from(retx) * u64::from(mac.retx_gap_slots);
        if span_slots > MAX_RETX_SPAN_SLOTS {
            return Err(ConfigError::RetxSpanTooLong { span_slots });
        }

        Ok(SlMacConfig {
            t1: mac.t1,
            t2: mac.t2,
            reservation_period_ms: mac.reservation_period_ms,
            numerology: mac.numerology,
            enable_sensing: mac.enable_sensing,
            active_pool_id: mac.active_pool_id,
            mcs_policy: McsPolicy::Fixed(mac.mcs),
            blind_retx,
            max_tx_trans_num_pssch: mac.max_tx_trans_num_pssch,
        })
    }

    /// Build and register every configured pool.
    ///
    /// # Errors
    /// [`ConfigError::NoPools`] or [`ConfigError::Pool`] for the first pool
    /// that fails validation or registration.
    pub fn build_pools(&self) -> Result<PoolRegistry, ConfigError> {
        if self.pools.is_empty() {
            return Err(ConfigError::NoPools);
        }
        let mut registry = PoolRegistry::new();
        for params in &self.pools {
            let wrap = |source| ConfigError::Pool { id: params.id, source };
            let pool = params.factory().and_then(|f| f.create_pool()).map_err(wrap)?;
            registry.insert(pool).map_err(wrap)?;
        }
        Ok(registry)
    }
}

// ── ConfigError ───────────────────────────────────────────────────────────────

/// A scenario that parsed but cannot be simulated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("scenario has no UEs")]
    NoUes,

    #[error("bearer deactivation at {deactivation_ms} ms precedes activation at {activation_ms} ms")]
    DeactivationBeforeActivation { activation_ms: u64, deactivation_ms: u64 },

    /// A `simulation` time beyond [`MAX_TIME_MS`].
    #[error("simulation.{field} = {ms} ms is beyond the simulation clock")]
    TimeOutOfRange { field: &'static str, ms: u64 },

    #[error("traffic source of {packet_size_bytes} B at {data_rate_kbps} kbit/s is not usable")]
    InvalidTraffic { packet_size_bytes: u32, data_rate_kbps: u32 },

    #[error("selection window start T1={t1} is after its end T2={t2}")]
    InvalidSelectionWindow { t1: u32, t2: u32 },

    #[error("reservation period must be at least 1 ms")]
    ZeroReservationPeriod,

    #[error("numerology {0} is out of range (0..=4)")]
    InvalidNumerology(u8),

    /// Only the fixed-MCS policy is implemented.
    #[error("adaptive MCS is not supported; set mac.fixed_mcs to true")]
    AdaptiveMcsUnsupported,

    #[error("MCS index {0} is out of range (0..=28)")]
    McsOutOfRange(u8),

    /// Initial transmission plus retransmissions exceed the PSSCH budget.
    #[error("{retx} blind retransmissions plus the initial one exceed max_tx_trans_num_pssch={max}")]
    TooManyTransmissions { retx: u8, max: u8 },

    #[error("last blind retransmission lands {span_slots} slots after the initial one (max 32)")]
    RetxSpanTooLong { span_slots: u64 },

    #[error("no resource pools configured")]
    NoPools,

    #[error("active pool {0} is not configured")]
    ActivePoolMissing(PoolId),

    #[error("pool {id}: {source}")]
    Pool {
        id: PoolId,
        #[source]
        source: PoolError,
    },
}

// ── ScenarioConfigManager ─────────────────────────────────────────────────────

/// Loads a [`ScenarioConfig`] from a YAML file.
#[derive(Debug, Default)]
pub struct ScenarioConfigManager {
    config: ScenarioConfig,

    /// Set to `true` after a successful [`load_from_file`](Self::load_from_file).
    loaded: bool,
}

impl ScenarioConfigManager {
    /// Creates a manager holding [`ScenarioConfig::default_config`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses and validates `path`, replacing the current scenario.
    ///
    /// * Missing sections and fields take their defaults.
    /// * An empty or missing `pools` list gets the single default pool.
    /// * On failure the manager is left holding the default scenario.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened, the YAML is
    /// structurally invalid, or the scenario fails [`ScenarioConfig::validate`].
    pub fn load_from_file(&mut self, path: &Path) -> Result<()> {
        info!("Loading scenario configuration from: {}", path.display());

        // Reset state before (re-)loading
        self.config = ScenarioConfig::default_config();
        self.loaded = false;

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open configuration file: {}", path.display()))?;

        // An empty document deserializes to `()`, not to an empty mapping.
        let file: ScenarioFile = if content.trim().is_empty() {
            ScenarioFile::default()
        } else {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML file: {}", path.display()))?
        };

        let mut config = ScenarioConfig {
            simulation: file.simulation,
            mac: file.mac,
            pools: file.pools,
        };

        if config.pools.is_empty() {
            warn!("No pools found in configuration file, using default pool");
            config.pools.push(PoolParams::default());
        }

        for pool in &config.pools {
            debug!(
                "  Pool: {} | bitmap: {} | BW: {} RBs | subchannel: {} RBs",
                pool.id, pool.time_bitmap, pool.bandwidth_rbs, pool.subchannel_size_rbs,
            );
        }

        config
            .validate()
            .with_context(|| format!("Invalid scenario configuration: {}", path.display()))?;

        info!(
            "Successfully loaded scenario: {} UE(s), {} pool(s), stop at {} ms",
            config.simulation.ue_count,
            config.pools.len(),
            config.simulation.stop_ms,
        );

        self.config = config;
        self.loaded = true;
        Ok(())
    }

    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut ScenarioConfig {
        &mut self.config
    }

    pub fn into_config(self) -> ScenarioConfig {
        self.config
    }

    /// Returns `true` after a successful call to [`load_from_file`](Self::load_from_file).
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

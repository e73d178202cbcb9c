//! Cycle configuration.
//!
//! A single immutable value threaded through the orchestrator at
//! construction; changing it requires a restart. Weight state is *not*
//! here – the weight vector is a projection over adjustment events, this
//! only carries the defaults and the adjustment guard-rails.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use blessed_karma::KarmaConfig;
use blessed_types::{Regime, TradeMode};

/// Maximum cycle wall-clock budget.
pub const DEFAULT_CYCLE_DEADLINE: Duration = Duration::from_secs(10);

/// Maximum budget for any single phase.
pub const DEFAULT_PHASE_DEADLINE: Duration = Duration::from_secs(3);

/// Orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrainConfig {
    /// Assets the cycle evaluates, in order.
    pub assets: Vec<String>,
    /// Paper or live execution; karma only exists in live mode.
    pub mode: TradeMode,
    /// Whole-cycle deadline in milliseconds.
    pub cycle_deadline_ms: u64,
    /// Per-phase deadline in milliseconds (also caps producer fetches).
    pub phase_deadline_ms: u64,
    /// Conviction needed to emit an opening intent.
    pub entry_threshold: f64,
    /// Conviction floor under which an open position is closed.
    pub exit_threshold: f64,
    /// PCS level that triggers counter-thesis scoring.
    pub cts_trigger: f64,
    /// Base position size (equity fraction) before conviction and regime
    /// scaling.
    pub base_size: f64,
    /// Per-domain freshness windows in seconds; signals older than this at
    /// cycle start are stale.
    pub freshness_secs: BTreeMap<String, u64>,
    /// Consecutive producer failures tolerated before a health event.
    pub max_consecutive_failures: u32,
    /// Default synthesis weights until the first adjustment event.
    pub default_weights: BTreeMap<String, f64>,
    /// How many recent events a non-full collection pass reads.
    pub collection_window_events: u64,
    /// Stop distance as a multiple of the volatility band.
    pub stop_band_mult: f64,
    /// Target distance as a multiple of the volatility band.
    pub target_band_mult: f64,
    /// Karma policy.
    pub karma: KarmaConfig,
    /// Journal age (days) under which weight adjustment is suppressed.
    pub weight_cold_start_days: i64,
    /// Journal age (days) under which the adjustment delta is halved.
    pub weight_warm_days: i64,
}

impl Default for BrainConfig {
    fn default() -> Self {
        Self {
            assets: vec!["BTC".to_string(), "ETH".to_string()],
            mode: TradeMode::Paper,
            cycle_deadline_ms: DEFAULT_CYCLE_DEADLINE.as_millis() as u64,
            phase_deadline_ms: DEFAULT_PHASE_DEADLINE.as_millis() as u64,
            entry_threshold: 0.7,
            exit_threshold: 0.3,
            cts_trigger: 0.75,
            base_size: 0.1,
            freshness_secs: BTreeMap::from([
                ("ta".to_string(), 3_600),
                ("onchain".to_string(), 7_200),
                ("sentiment".to_string(), 14_400),
                ("macro".to_string(), 86_400),
                ("vol".to_string(), 3_600),
                ("basis".to_string(), 3_600),
            ]),
            max_consecutive_failures: 3,
            default_weights: BTreeMap::from([
                ("ta".to_string(), 0.30),
                ("onchain".to_string(), 0.25),
                ("sentiment".to_string(), 0.15),
                ("macro".to_string(), 0.10),
                ("vol".to_string(), 0.10),
                ("basis".to_string(), 0.10),
            ]),
            collection_window_events: 5_000,
            stop_band_mult: 1.0,
            target_band_mult: 2.0,
            karma: KarmaConfig::default(),
            weight_cold_start_days: 30,
            weight_warm_days: 90,
        }
    }
}

impl BrainConfig {
    /// Whole-cycle deadline.
    pub fn cycle_deadline(&self) -> Duration {
        Duration::from_millis(self.cycle_deadline_ms)
    }

    /// Per-phase deadline.
    pub fn phase_deadline(&self) -> Duration {
        Duration::from_millis(self.phase_deadline_ms)
    }

    /// Freshness window for a producer domain; unknown domains get the
    /// tightest configured window.
    pub fn freshness_for(&self, domain: &str) -> u64 {
        self.freshness_secs.get(domain).copied().unwrap_or_else(|| {
            self.freshness_secs.values().copied().min().unwrap_or(3_600)
        })
    }

    /// Leverage cap applied to position sizing per regime.
    pub fn regime_leverage_cap(&self, regime: Regime) -> f64 {
        match regime {
            Regime::EarlyBull => 1.0,
            Regime::Bull => 1.2,
            Regime::Chop => 0.6,
            Regime::Bear => 0.4,
            Regime::Crisis => 0.0,
        }
    }
}

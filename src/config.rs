//! Engine configuration
//!
//! One explicit configuration struct, constructed at startup and passed by
//! reference into every component. No global mutable state.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// How spot candidates are ranked and bid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ForecastMode {
    /// Rank by live spot price, bid `bid_percent` of the on-demand price
    #[default]
    Off,
    /// Rank and bid by the predicted price just past the one-hour mark
    NearTerm,
    /// Rank and bid by the predicted price past the job's expected duration
    Horizon,
}

impl ForecastMode {
    /// Whether forecast curves are consulted at all.
    pub fn enabled(&self) -> bool {
        !matches!(self, ForecastMode::Off)
    }
}

/// When the simulator revokes a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TerminationPolicy {
    /// Reclaim non-executing resources as they approach each elapsed-hour boundary
    #[default]
    Hourly,
    /// Reclaim non-executing resources after a single fixed lifetime
    FixedLifetime,
    /// Reclaim resources that sit idle past the idle timeout
    IdleTimeout,
}

/// Execution-time scaling between instance types.
///
/// Maps (source type, target type) to the factor applied to a job's recorded
/// duration when it runs on the target type instead. Data, not code: extend
/// it from configuration without recompiling.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScalingTable {
    factors: HashMap<String, f64>,
    /// Source type assumed when a job does not carry one
    pub default_source: String,
}

impl ScalingTable {
    fn key(source: &str, target: &str) -> String {
        format!("{source}:{target}")
    }

    /// Register a scaling factor for a (source, target) pair.
    pub fn insert(&mut self, source: &str, target: &str, factor: f64) {
        self.factors.insert(Self::key(source, target), factor);
    }

    /// Factor for running a job recorded on `source` on a `target` instance.
    /// Unknown pairs scale by 1.0.
    pub fn factor(&self, source: Option<&str>, target: &str) -> f64 {
        let source = source.unwrap_or(&self.default_source);
        self.factors
            .get(&Self::key(source, target))
            .copied()
            .unwrap_or(1.0)
    }

    /// The scaling table fit from the original r3.8xlarge / m3.2xlarge
    /// benchmark runs.
    pub fn benchmark_defaults() -> Self {
        let mut table = ScalingTable {
            factors: HashMap::new(),
            default_source: "m3.2xlarge".to_string(),
        };
        for (target, factor) in [
            ("c3.2xlarge", 2.022),
            ("c3.4xlarge", 1.167),
            ("c3.8xlarge", 0.944),
            ("g2.2xlarge", 2.226),
            ("g2.8xlarge", 1.039),
            ("m3.2xlarge", 2.064),
            ("r3.2xlarge", 2.106),
            ("r3.4xlarge", 1.257),
            ("r3.8xlarge", 1.0),
        ] {
            table.insert("r3.8xlarge", target, factor);
        }
        for (target, factor) in [
            ("c3.2xlarge", 0.980),
            ("c3.4xlarge", 0.565),
            ("c3.8xlarge", 0.457),
            ("g2.2xlarge", 1.078),
            ("g2.8xlarge", 0.503),
            ("m3.2xlarge", 1.0),
            ("r3.2xlarge", 1.02),
            ("r3.4xlarge", 0.609),
            ("r3.8xlarge", 0.484),
        ] {
            table.insert("m3.2xlarge", target, factor);
        }
        table
    }
}

/// Retry policy for transient provider failures.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

/// Parameters for the simulator's offline-fit latency distributions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LatencyParams {
    /// Log-normal (mu, sigma) of the negotiation delay, seconds
    pub negotiate: (f64, f64),
    /// Log-normal (mu, sigma) of the contextualization delay, seconds
    pub contextualize: (f64, f64),
    /// Normal (mean, sd) of the request fulfillment delay, seconds
    pub fulfill: (f64, f64),
}

impl Default for LatencyParams {
    fn default() -> Self {
        // Fits from the recorded launch_stats latency data.
        LatencyParams {
            negotiate: (3.2, 0.8),
            contextualize: (4.1, 0.6),
            fulfill: (7.118134, 0.895632),
        }
    }
}

/// Simulation-mode settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    /// Virtual clock increment per tick, seconds
    pub step_seconds: i64,
    /// RNG seed; fixed seed + fixed inputs => deterministic run
    pub seed: u64,
    pub termination: TerminationPolicy,
    /// Abort the run after this many simulated seconds
    pub wall_clock_cap: i64,
    /// Seconds a resource may sit idle before the IdleTimeout policy reclaims it
    pub idle_reclaim_seconds: i64,
    /// Lifetime threshold used by the Hourly and FixedLifetime policies, seconds
    pub lifetime_seconds: i64,
    /// How often the outbid check runs, in simulated seconds
    pub price_check_seconds: i64,
    pub latency: LatencyParams,
    pub duration_scaling: ScalingTable,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            step_seconds: 2,
            seed: 42,
            termination: TerminationPolicy::Hourly,
            wall_clock_cap: 1_400_000,
            idle_reclaim_seconds: 600,
            lifetime_seconds: 3480,
            price_check_seconds: 60,
            latency: LatencyParams::default(),
            duration_scaling: ScalingTable::benchmark_defaults(),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionerConfig {
    /// Spot prices above `threshold * ondemand_price` escalate to on-demand
    pub ondemand_price_threshold: f64,
    /// Maximum open requests per job
    pub max_requests: usize,
    /// Cycle period, seconds
    pub run_rate: i64,
    pub forecast: ForecastMode,
    /// Bid placed when the computed bid would exceed the tenant ceiling
    pub fallback_bid: f64,
    /// Seconds without a fulfilling instance before a fulfilled flag reverts
    pub revocation_window: i64,
    /// Zone consulted for another zone's forecast curve; data, not a constant
    pub zone_affinity: HashMap<String, String>,
    /// Bound on parallel per-tenant provider polling
    pub poll_concurrency: usize,
    pub retry: RetryPolicy,
    pub sim: SimConfig,
}

impl ProvisionerConfig {
    /// The forecast zone for a priced zone; zones without a mapping use
    /// their own curve.
    pub fn forecast_zone<'a>(&'a self, zone: &'a str) -> &'a str {
        self.zone_affinity.get(zone).map(String::as_str).unwrap_or(zone)
    }

    /// The fixed us-east-1 rotation the forecast curves were published under.
    pub fn default_zone_affinity() -> HashMap<String, String> {
        [
            ("us-east-1a", "us-east-1e"),
            ("us-east-1b", "us-east-1d"),
            ("us-east-1c", "us-east-1a"),
            ("us-east-1d", "us-east-1b"),
            ("us-east-1e", "us-east-1c"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        ProvisionerConfig {
            ondemand_price_threshold: 0.9,
            max_requests: 3,
            run_rate: 60,
            forecast: ForecastMode::Off,
            fallback_bid: 0.40,
            revocation_window: 600,
            zone_affinity: Self::default_zone_affinity(),
            poll_concurrency: 4,
            retry: RetryPolicy::default(),
            sim: SimConfig::default(),
        }
    }
}

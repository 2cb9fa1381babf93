//! Engine configuration
//!
//! Read once by the composition root from environment variables (dotenv in
//! the binaries), with defaults matching the reference system: 15%
//! commission, hourly sweep, 24h grace window.

use crate::commission::DEFAULT_COMMISSION_RATE_BPS;
use std::env;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Smallest acceptable gross amount in cents
    pub min_amount_cents: i64,
    /// Largest acceptable gross amount in cents
    pub max_amount_cents: i64,
    /// Platform commission in basis points
    pub commission_rate_bps: i64,
    /// Sweeper cadence in seconds; tuning, not correctness
    pub sweep_interval_secs: u64,
    /// Hours past end time before the sweeper force-completes
    pub sweep_grace_hours: i64,
    /// HTTP adapter port
    pub api_port: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_amount_cents: 500,
            max_amount_cents: 1_000_000,
            commission_rate_bps: DEFAULT_COMMISSION_RATE_BPS,
            sweep_interval_secs: 3_600,
            sweep_grace_hours: 24,
            api_port: 8080,
        }
    }
}

impl EngineConfig {
    /// Build from environment, falling back to defaults per field
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            min_amount_cents: env_parse("ESCROW_MIN_AMOUNT_CENTS", defaults.min_amount_cents),
            max_amount_cents: env_parse("ESCROW_MAX_AMOUNT_CENTS", defaults.max_amount_cents),
            commission_rate_bps: env_parse("COMMISSION_RATE_BPS", defaults.commission_rate_bps),
            sweep_interval_secs: env_parse("SWEEP_INTERVAL_SECS", defaults.sweep_interval_secs),
            sweep_grace_hours: env_parse("SWEEP_GRACE_HOURS", defaults.sweep_grace_hours),
            api_port: env_parse("PORT", defaults.api_port),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

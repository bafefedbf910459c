//! Sender tuning knobs.
//!
//! Every field has a default, so a config file only needs to name what it
//! overrides:
//!
//! ```toml
//! idle-timeout = 5000
//! max-packets-in-flight = 10
//! default-slippage = "0.005"
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};

use crate::error::ConfigError;
use crate::filters::rate_probe::DEFAULT_PROBE_AMOUNTS;
use crate::math::Ratio;
use crate::trackers::{AimdConfig, PacingConfig};

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_PACKET_EXPIRY: Duration = Duration::from_secs(30);
pub const DEFAULT_ROUND_TRIP_TIME: Duration = Duration::from_millis(200);
pub const DEFAULT_RATE_PROBE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_PACKETS_IN_FLIGHT: u32 = 20;
pub const DEFAULT_PACKETS_PER_SECOND: u32 = 40;

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SenderConfig {
    /// Fail the payment if nothing is fulfilled for this long.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub idle_timeout: Duration,
    /// Lifetime of each Prepare, also the bound on waiting for its reply.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub packet_expiry: Duration,
    pub max_packets_in_flight: u32,
    pub initial_packets_per_second: u32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub default_round_trip_time: Duration,
    pub aimd_start_amount: u64,
    pub aimd_increase_amount: u64,
    pub aimd_decrease_factor: Ratio,
    /// Used when a quote request names no slippage.
    pub default_slippage: Ratio,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub rate_probe_timeout: Duration,
    pub rate_probe_amounts: Vec<u64>,
}

impl Default for SenderConfig {
    fn default() -> Self {
        let aimd = AimdConfig::default();
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            packet_expiry: DEFAULT_PACKET_EXPIRY,
            max_packets_in_flight: DEFAULT_MAX_PACKETS_IN_FLIGHT,
            initial_packets_per_second: DEFAULT_PACKETS_PER_SECOND,
            default_round_trip_time: DEFAULT_ROUND_TRIP_TIME,
            aimd_start_amount: aimd.start_amount,
            aimd_increase_amount: aimd.increase_amount,
            aimd_decrease_factor: aimd.decrease_factor,
            default_slippage: Ratio::new(1u64, 100u64).unwrap_or_else(|_| Ratio::zero()),
            rate_probe_timeout: DEFAULT_RATE_PROBE_TIMEOUT,
            rate_probe_amounts: DEFAULT_PROBE_AMOUNTS.to_vec(),
        }
    }
}

impl SenderConfig {
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config = toml::from_str::<SenderConfig>(content)
            .context("failed to parse sender configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        tracing::debug!(path = ?path, "Reading sender configuration");
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("invalid config in {}", path.display()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("idle-timeout", self.idle_timeout),
            ("packet-expiry", self.packet_expiry),
            ("default-round-trip-time", self.default_round_trip_time),
            ("rate-probe-timeout", self.rate_probe_timeout),
        ];
        for (field, value) in durations {
            if value.is_zero() {
                return Err(ConfigError::NotPositive { field });
            }
        }
        if self.max_packets_in_flight == 0 {
            return Err(ConfigError::NotPositive {
                field: "max-packets-in-flight",
            });
        }
        if self.initial_packets_per_second == 0 {
            return Err(ConfigError::NotPositive {
                field: "initial-packets-per-second",
            });
        }
        if self.aimd_start_amount == 0 {
            return Err(ConfigError::NotPositive {
                field: "aimd-start-amount",
            });
        }
        if self.aimd_decrease_factor < Ratio::one() {
            return Err(ConfigError::NotPositive {
                field: "aimd-decrease-factor",
            });
        }
        if self.default_slippage >= Ratio::one() {
            return Err(ConfigError::Slippage(self.default_slippage.clone()));
        }
        if !self.rate_probe_amounts.iter().any(|amount| *amount > 0) {
            return Err(ConfigError::NoProbeAmounts);
        }
        Ok(())
    }

    pub fn pacing(&self) -> PacingConfig {
        PacingConfig {
            max_in_flight: self.max_packets_in_flight,
            default_round_trip_time: self.default_round_trip_time,
            initial_packets_per_second: self.initial_packets_per_second,
        }
    }

    pub fn aimd(&self) -> AimdConfig {
        AimdConfig {
            start_amount: self.aimd_start_amount,
            increase_amount: self.aimd_increase_amount,
            decrease_factor: self.aimd_decrease_factor.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = SenderConfig::default();
        config.validate().unwrap();
        assert_eq!(config.idle_timeout, Duration::from_secs(10));
        assert_eq!(config.pacing().max_in_flight, 20);
        assert_eq!(config.aimd().start_amount, 1000);
        assert_eq!(config.default_slippage, Ratio::new(1u64, 100u64).unwrap());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = SenderConfig::from_toml_str(
            r#"
            idle-timeout = 2500
            max-packets-in-flight = 4
            default-slippage = "0.005"
            "#,
        )
        .unwrap();
        assert_eq!(config.idle_timeout, Duration::from_millis(2500));
        assert_eq!(config.max_packets_in_flight, 4);
        assert_eq!(config.default_slippage, Ratio::new(5u64, 1000u64).unwrap());
        assert_eq!(config.packet_expiry, DEFAULT_PACKET_EXPIRY);
        assert_eq!(config.rate_probe_amounts, DEFAULT_PROBE_AMOUNTS.to_vec());
    }

    #[test]
    fn rejects_invalid_values() {
        let err = SenderConfig::from_toml_str("default-slippage = \"1\"").unwrap_err();
        assert!(format!("{err:#}").contains("slippage"));

        let config = SenderConfig {
            max_packets_in_flight: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NotPositive {
                field: "max-packets-in-flight"
            })
        ));

        let config = SenderConfig {
            rate_probe_amounts: vec![0],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::NoProbeAmounts)));
    }

    #[test]
    fn loads_from_file() -> anyhow::Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, "packet-expiry = 1000")?;
        writeln!(file, "aimd-decrease-factor = \"3/2\"")?;
        let config = SenderConfig::load(file.path())?;
        assert_eq!(config.packet_expiry, Duration::from_secs(1));
        assert_eq!(config.aimd().decrease_factor, Ratio::new(3u64, 2u64)?);

        let missing = SenderConfig::load(file.path().with_extension("missing"));
        assert!(missing.is_err());
        Ok(())
    }

    #[test]
    fn round_trips_through_toml() {
        let config = SenderConfig::default();
        let encoded = toml::to_string(&config).unwrap();
        assert_eq!(SenderConfig::from_toml_str(&encoded).unwrap(), config);
    }
}

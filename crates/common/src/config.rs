/*
 * Configuration for the table copy.
 */

use crate::{CopyError, Result};
use config::{Config, Environment};
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Prefix for environment overrides of the operational constants,
/// e.g. `COPY__MAX_CONNECTIONS=64`.
pub const ENV_PREFIX: &str = "COPY";

/// Operational constants. These are fixed for a run and never computed by the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[builder(setter(into), default)]
pub struct OperationalConfig {
    /// Connection limit per client (source and destination each get their own)
    pub max_connections: usize,

    /// Preferred core size for both executor pools
    pub executor_core_pool_size: usize,

    /// Idle time after which non-core pool threads exit
    pub executor_keep_alive_ms: u64,

    /// Items per BatchWriteItem request (the service caps this at 25)
    pub batch_write_size: usize,

    /// Maximum items returned per Scan page (None lets the service decide)
    pub scan_page_limit: Option<i32>,
}

impl Default for OperationalConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            max_connections: 200,
            executor_core_pool_size: cpus * 4,
            executor_keep_alive_ms: 60_000,
            batch_write_size: 25,
            scan_page_limit: None,
        }
    }
}

impl OperationalConfig {
    /// Loads the defaults, overridden by `COPY__*` environment variables.
    pub fn load() -> Result<Self> {
        let defaults = Self::default();
        let mut builder = Config::builder()
            .set_default("max_connections", defaults.max_connections as i64)
            .and_then(|b| {
                b.set_default(
                    "executor_core_pool_size",
                    defaults.executor_core_pool_size as i64,
                )
            })
            .and_then(|b| {
                b.set_default(
                    "executor_keep_alive_ms",
                    defaults.executor_keep_alive_ms as i64,
                )
            })
            .and_then(|b| b.set_default("batch_write_size", defaults.batch_write_size as i64))
            .map_err(config_error)?;
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let loaded: Self = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(config_error)?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Returns the keep-alive as a Duration.
    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.executor_keep_alive_ms)
    }

    /// Rejects constants the service or the pools cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(CopyError::InvalidParameter(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if self.executor_core_pool_size == 0 {
            return Err(CopyError::InvalidParameter(
                "executor_core_pool_size must be at least 1".to_string(),
            ));
        }
        if !(1..=25).contains(&self.batch_write_size) {
            return Err(CopyError::InvalidParameter(format!(
                "batch_write_size must be within 1..=25, got {}",
                self.batch_write_size
            )));
        }
        Ok(())
    }
}

fn config_error(e: config::ConfigError) -> CopyError {
    CopyError::InvalidParameter(format!("operational config: {}", e))
}

/// Configuration for capacity planning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[builder(setter(into), default)]
pub struct PlanningConfig {
    /// Read capacity units one segment is expected to consume
    pub read_units_per_segment: u64,

    /// Table bytes one segment is expected to cover (default: 2GB)
    pub bytes_per_segment: u64,

    /// Upper bound on the derived segment count
    pub max_segments: u32,
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self {
            read_units_per_segment: 100,
            bytes_per_segment: 2 * 1024 * 1024 * 1024, // 2GB
            max_segments: 256,
        }
    }
}

/// Identity of one table plus how to reach it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableEndpoint {
    /// Service endpoint, e.g. `dynamodb.us-west-2.amazonaws.com` or `http://localhost:8000`
    pub endpoint: Option<String>,
    /// Table name
    pub table: String,
    /// Named credential profile (required in cross-account mode)
    pub profile: Option<String>,
}

/// Parameters of one copy job, resolved from the command line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[builder(setter(into), default)]
pub struct CopyConfig {
    pub source: TableEndpoint,

    pub destination: TableEndpoint,

    /// Fraction of the source read capacity to consume
    pub read_throughput_ratio: f64,

    /// Fraction of the destination write capacity to consume
    pub write_throughput_ratio: f64,

    /// Fixed rate for both sides; overrides the ratios when set
    pub throughput_rate: Option<f64>,

    /// Ceiling on write-side threads
    pub max_write_threads: usize,

    /// Use strongly consistent reads while scanning
    pub consistent_scan: bool,

    /// Resolve each side from its own named profile
    pub cross_account: bool,

    /// This process's section index
    pub section: i64,

    /// Number of cooperating processes
    pub total_sections: i64,
}

impl Default for CopyConfig {
    fn default() -> Self {
        Self {
            source: TableEndpoint::default(),
            destination: TableEndpoint::default(),
            read_throughput_ratio: 0.5,
            write_throughput_ratio: 0.5,
            throughput_rate: None,
            max_write_threads: 64,
            consistent_scan: false,
            cross_account: false,
            section: 0,
            total_sections: 1,
        }
    }
}

impl CopyConfig {
    /// Validates the throughput and thread parameters.
    ///
    /// Profile and section checks happen in their own phases so they can
    /// report their own exit statuses.
    pub fn validate(&self) -> Result<()> {
        if self.source.table.is_empty() {
            return Err(CopyError::InvalidParameter(
                "source table name is required".to_string(),
            ));
        }
        if self.destination.table.is_empty() {
            return Err(CopyError::InvalidParameter(
                "destination table name is required".to_string(),
            ));
        }
        match self.throughput_rate {
            Some(rate) if !(rate.is_finite() && rate > 0.0) => {
                return Err(CopyError::InvalidParameter(format!(
                    "throughput rate must be positive, got {}",
                    rate
                )));
            }
            Some(_) => {}
            None => {
                check_ratio("read throughput ratio", self.read_throughput_ratio)?;
                check_ratio("write throughput ratio", self.write_throughput_ratio)?;
            }
        }
        if self.max_write_threads == 0 {
            return Err(CopyError::InvalidParameter(
                "max write threads must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn check_ratio(name: &str, ratio: f64) -> Result<()> {
    if ratio.is_finite() && ratio > 0.0 && ratio <= 1.0 {
        Ok(())
    } else {
        Err(CopyError::InvalidParameter(format!(
            "{} must be within (0, 1], got {}",
            name, ratio
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CopyConfig {
        CopyConfigBuilder::default()
            .source(TableEndpoint {
                table: "orders".into(),
                ..Default::default()
            })
            .destination(TableEndpoint {
                table: "orders_copy".into(),
                ..Default::default()
            })
            .build()
            .unwrap()
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(config().validate().is_ok());
        assert!(OperationalConfig::default().validate().is_ok());
    }

    #[test]
    fn test_ratio_bounds() {
        let mut cfg = config();
        cfg.read_throughput_ratio = 0.0;
        assert!(matches!(cfg.validate(), Err(CopyError::InvalidParameter(_))));

        cfg.read_throughput_ratio = 1.0;
        cfg.write_throughput_ratio = 1.5;
        assert!(cfg.validate().is_err());

        // A fixed rate makes the ratios irrelevant.
        cfg.throughput_rate = Some(40.0);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_fixed_rate_must_be_positive() {
        let mut cfg = config();
        cfg.throughput_rate = Some(-1.0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_batch_size_capped() {
        let cfg = OperationalConfigBuilder::default()
            .batch_write_size(26usize)
            .build()
            .unwrap();
        assert!(cfg.validate().is_err());
    }
}

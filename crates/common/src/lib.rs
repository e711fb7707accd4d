/*
 * DynamoDB Table Copy - Common Types
 *
 * Shared errors, configuration, retry and metrics used across
 * planner, worker and the command line.
 */

pub mod config;
pub mod error;
pub mod metrics;
pub mod retry;

pub use self::config::*;
pub use error::{exit_codes, CopyError, Result, ResultExt, TableRole};
pub use metrics::{CopyMetrics, MetricsSnapshot};
pub use retry::{RetryBuilder, RetryConfig};

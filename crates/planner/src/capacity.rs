/*
 * Capacity planning.
 *
 * Turns a table's provisioned capacity into a scan parallelism and
 * into the read/write rates handed to the producer and consumer.
 */

use copy_common::{CopyConfig, CopyError, PlanningConfig, Result};
use serde::{Deserialize, Serialize};

/// Segment count used when the source table reports no read capacity.
pub const DEFAULT_SEGMENTS: u32 = 10;

/// Capacity snapshot of one table, read once per job.
///
/// Units are `None` for on-demand tables. That is distinct from zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableCapacity {
    pub table: String,
    pub read_units: Option<u64>,
    pub write_units: Option<u64>,
    pub size_bytes: Option<u64>,
}

impl TableCapacity {
    /// Creates a provisioned capacity snapshot.
    pub fn provisioned(table: impl Into<String>, read_units: u64, write_units: u64) -> Self {
        Self {
            table: table.into(),
            read_units: Some(read_units),
            write_units: Some(write_units),
            size_bytes: None,
        }
    }

    /// Creates a snapshot for a table without fixed capacity.
    pub fn on_demand(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Default::default()
        }
    }

    /// Sets the reported table size.
    pub fn with_size_bytes(mut self, size_bytes: u64) -> Self {
        self.size_bytes = Some(size_bytes);
        self
    }

    fn units(&self, direction: Direction) -> Option<u64> {
        match direction {
            Direction::Read => self.read_units,
            Direction::Write => self.write_units,
        }
        .filter(|&u| u > 0)
    }
}

/// Which side of the copy a rate is computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::Read => "read",
            Direction::Write => "write",
        }
    }
}

/// How much of a table's capacity a job may consume.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ThroughputBudget {
    /// Fraction of the table's provisioned units, in (0, 1]
    Ratio(f64),
    /// Explicit units per second, ignoring table capacity
    Fixed(f64),
}

impl ThroughputBudget {
    /// Derives the active budget for one direction from the job parameters.
    pub fn from_config(config: &CopyConfig, direction: Direction) -> Self {
        match config.throughput_rate {
            Some(rate) => ThroughputBudget::Fixed(rate),
            None => match direction {
                Direction::Read => ThroughputBudget::Ratio(config.read_throughput_ratio),
                Direction::Write => ThroughputBudget::Ratio(config.write_throughput_ratio),
            },
        }
    }
}

/// How the segment count was derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentSource {
    Capacity,
    Fallback,
}

/// Number of parallel scan partitions for the whole table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentPlan {
    pub total_segments: u32,
    pub source: SegmentSource,
}

impl SegmentPlan {
    /// The plan used when capacity is unknown.
    pub fn fallback() -> Self {
        Self {
            total_segments: DEFAULT_SEGMENTS,
            source: SegmentSource::Fallback,
        }
    }
}

/// Derives the segment count from the source table's read capacity.
///
/// Grows with read capacity (one segment per `read_units_per_segment`) and
/// with table size (one segment per `bytes_per_segment`), clamped to
/// `[1, max_segments]`. Fails with `MissingCapacity` when the read capacity
/// is absent so the caller can fall back to [`DEFAULT_SEGMENTS`].
pub fn compute_segments(capacity: &TableCapacity, config: &PlanningConfig) -> Result<SegmentPlan> {
    let read_units = capacity
        .units(Direction::Read)
        .ok_or_else(|| CopyError::MissingCapacity {
            table: capacity.table.clone(),
            what: "read",
        })?;

    let for_throughput = read_units.div_ceil(config.read_units_per_segment.max(1));
    let for_size = capacity
        .size_bytes
        .map(|bytes| bytes.div_ceil(config.bytes_per_segment.max(1)))
        .unwrap_or(0);

    let max_segments = u64::from(config.max_segments.max(1));
    let total = for_throughput.max(for_size).clamp(1, max_segments);

    Ok(SegmentPlan {
        total_segments: total as u32,
        source: SegmentSource::Capacity,
    })
}

/// Computes the rate handed to the producer (read) or consumer (write).
///
/// A fixed budget is returned verbatim for both directions. A ratio budget
/// scales the table's units for that direction, and fails with
/// `MissingCapacity` when the table has none.
pub fn compute_throughput(
    capacity: &TableCapacity,
    budget: ThroughputBudget,
    direction: Direction,
) -> Result<f64> {
    match budget {
        ThroughputBudget::Fixed(rate) => Ok(rate),
        ThroughputBudget::Ratio(ratio) => capacity
            .units(direction)
            .map(|units| units as f64 * ratio)
            .ok_or_else(|| CopyError::MissingCapacity {
                table: capacity.table.clone(),
                what: direction.as_str(),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratio_throughput() {
        let source = TableCapacity::provisioned("orders", 100, 40);
        let dest = TableCapacity::provisioned("orders_copy", 10, 200);

        let read = compute_throughput(&source, ThroughputBudget::Ratio(0.5), Direction::Read);
        let write = compute_throughput(&dest, ThroughputBudget::Ratio(0.25), Direction::Write);

        assert_eq!(read.unwrap(), 50.0);
        assert_eq!(write.unwrap(), 50.0);
    }

    #[test]
    fn test_fixed_rate_ignores_capacity() {
        let table = TableCapacity::provisioned("orders", 1000, 5);
        let budget = ThroughputBudget::Fixed(75.0);

        assert_eq!(
            compute_throughput(&table, budget, Direction::Read).unwrap(),
            75.0
        );
        assert_eq!(
            compute_throughput(&table, budget, Direction::Write).unwrap(),
            75.0
        );
        // Even without any capacity.
        let on_demand = TableCapacity::on_demand("events");
        assert_eq!(
            compute_throughput(&on_demand, budget, Direction::Read).unwrap(),
            75.0
        );
    }

    #[test]
    fn test_ratio_on_demand_is_missing_capacity() {
        let table = TableCapacity::on_demand("events");
        let err = compute_throughput(&table, ThroughputBudget::Ratio(0.5), Direction::Write)
            .unwrap_err();
        assert!(matches!(
            err,
            CopyError::MissingCapacity { what: "write", .. }
        ));
    }

    #[test]
    fn test_segments_missing_capacity() {
        let config = PlanningConfig::default();
        let err = compute_segments(&TableCapacity::on_demand("events"), &config).unwrap_err();
        assert!(err.is_recoverable());

        // Zero units count as absent.
        let zero = TableCapacity::provisioned("events", 0, 0);
        assert!(compute_segments(&zero, &config).is_err());
    }

    #[test]
    fn test_segments_grow_with_read_capacity() {
        let config = PlanningConfig::default();
        let mut previous = 0;
        for units in [1, 50, 100, 101, 400, 1_000, 10_000, 1_000_000] {
            let plan =
                compute_segments(&TableCapacity::provisioned("t", units, 1), &config).unwrap();
            assert!(plan.total_segments >= previous);
            assert!(plan.total_segments >= 1);
            assert!(plan.total_segments <= config.max_segments);
            assert_eq!(plan.source, SegmentSource::Capacity);
            previous = plan.total_segments;
        }
        assert_eq!(previous, config.max_segments);
    }

    #[test]
    fn test_segments_from_size() {
        let config = PlanningConfig::default();
        let table = TableCapacity::provisioned("t", 100, 1).with_size_bytes(9 * 1024 * 1024 * 1024);
        // 9GB at 2GB per segment beats one segment for 100 read units.
        assert_eq!(compute_segments(&table, &config).unwrap().total_segments, 5);
    }

    #[test]
    fn test_planning_is_idempotent() {
        let config = PlanningConfig::default();
        let table = TableCapacity::provisioned("orders", 750, 300).with_size_bytes(1 << 30);
        let budget = ThroughputBudget::Ratio(0.3);

        let first = (
            compute_segments(&table, &config).unwrap(),
            compute_throughput(&table, budget, Direction::Read).unwrap(),
            compute_throughput(&table, budget, Direction::Write).unwrap(),
        );
        let second = (
            compute_segments(&table, &config).unwrap(),
            compute_throughput(&table, budget, Direction::Read).unwrap(),
            compute_throughput(&table, budget, Direction::Write).unwrap(),
        );
        assert_eq!(first, second);
    }

    #[test]
    fn test_budget_from_config() {
        let mut config = CopyConfig {
            read_throughput_ratio: 0.4,
            write_throughput_ratio: 0.6,
            ..Default::default()
        };
        assert_eq!(
            ThroughputBudget::from_config(&config, Direction::Write),
            ThroughputBudget::Ratio(0.6)
        );
        config.throughput_rate = Some(10.0);
        assert_eq!(
            ThroughputBudget::from_config(&config, Direction::Read),
            ThroughputBudget::Fixed(10.0)
        );
    }
}

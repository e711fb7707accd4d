/*
 * DynamoDB Table Copy - Planner
 *
 * The planner is responsible for:
 * 1. Reading capacity snapshots for the source and destination tables
 * 2. Deriving the scan segment count
 * 3. Turning throughput budgets into read/write rates
 * 4. Validating this process's section of the segment space
 */

pub mod capacity;
pub mod section;
pub mod table_provider;

pub use capacity::{
    compute_segments, compute_throughput, Direction, SegmentPlan, SegmentSource, TableCapacity,
    ThroughputBudget, DEFAULT_SEGMENTS,
};
pub use section::{validate_section, SectionSpec};
pub use table_provider::{capacity_from_description, DynamoDbTableProvider, TableMetadataSource};

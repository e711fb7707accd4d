/*
 * Table Metadata Abstraction
 *
 * Provides the capacity snapshot the planner works from. The DynamoDB
 * implementation reads it from DescribeTable; tests use an in-memory map.
 */

use async_trait::async_trait;
use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::types::{BillingMode, TableDescription};
use aws_sdk_dynamodb::Client;
use copy_common::{CopyError, Result};
use tracing::debug;

use crate::capacity::TableCapacity;

/// Trait for reading a table's capacity snapshot.
#[async_trait]
pub trait TableMetadataSource: Send + Sync {
    /// Describes a table by name.
    async fn describe_table(&self, table: &str) -> Result<TableCapacity>;
}

/// Metadata source backed by the DynamoDB DescribeTable API.
pub struct DynamoDbTableProvider {
    client: Client,
}

impl DynamoDbTableProvider {
    /// Creates a new provider with the given client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TableMetadataSource for DynamoDbTableProvider {
    async fn describe_table(&self, table: &str) -> Result<TableCapacity> {
        let output = self
            .client
            .describe_table()
            .table_name(table)
            .send()
            .await
            .map_err(|e| {
                CopyError::Metadata(format!(
                    "describe table '{}': {}",
                    table,
                    DisplayErrorContext(&e)
                ))
            })?;

        let description = output
            .table()
            .ok_or_else(|| CopyError::Metadata(format!("table '{}' has no description", table)))?;

        let capacity = capacity_from_description(table, description);
        debug!(
            table,
            read_units = ?capacity.read_units,
            write_units = ?capacity.write_units,
            size_bytes = ?capacity.size_bytes,
            "Described table"
        );
        Ok(capacity)
    }
}

/// Extracts the capacity snapshot from a table description.
///
/// Pay-per-request tables report zero provisioned units; both that and a
/// missing throughput block map to absent units.
pub fn capacity_from_description(table: &str, description: &TableDescription) -> TableCapacity {
    let on_demand = description
        .billing_mode_summary()
        .and_then(|summary| summary.billing_mode())
        .is_some_and(|mode| *mode == BillingMode::PayPerRequest);

    let positive = |units: Option<i64>| {
        units
            .filter(|&u| u > 0 && !on_demand)
            .map(|u| u as u64)
    };

    let throughput = description.provisioned_throughput();
    TableCapacity {
        table: table.to_string(),
        read_units: positive(throughput.and_then(|t| t.read_capacity_units())),
        write_units: positive(throughput.and_then(|t| t.write_capacity_units())),
        size_bytes: description
            .table_size_bytes()
            .filter(|&b| b >= 0)
            .map(|b| b as u64),
    }
}

/// In-memory metadata source for testing.
#[cfg(test)]
pub struct MockTableProvider {
    tables: std::collections::HashMap<String, TableCapacity>,
}

#[cfg(test)]
impl MockTableProvider {
    pub fn new(tables: impl IntoIterator<Item = TableCapacity>) -> Self {
        Self {
            tables: tables.into_iter().map(|t| (t.table.clone(), t)).collect(),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl TableMetadataSource for MockTableProvider {
    async fn describe_table(&self, table: &str) -> Result<TableCapacity> {
        self.tables
            .get(table)
            .cloned()
            .ok_or_else(|| CopyError::Metadata(format!("Table not found: {}", table)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_dynamodb::types::{BillingModeSummary, ProvisionedThroughputDescription};

    #[test]
    fn test_provisioned_description() {
        let description = TableDescription::builder()
            .provisioned_throughput(
                ProvisionedThroughputDescription::builder()
                    .read_capacity_units(100)
                    .write_capacity_units(200)
                    .build(),
            )
            .table_size_bytes(4096)
            .build();

        let capacity = capacity_from_description("orders", &description);
        assert_eq!(capacity.read_units, Some(100));
        assert_eq!(capacity.write_units, Some(200));
        assert_eq!(capacity.size_bytes, Some(4096));
    }

    #[test]
    fn test_pay_per_request_has_no_capacity() {
        let description = TableDescription::builder()
            .billing_mode_summary(
                BillingModeSummary::builder()
                    .billing_mode(BillingMode::PayPerRequest)
                    .build(),
            )
            .provisioned_throughput(
                ProvisionedThroughputDescription::builder()
                    .read_capacity_units(0)
                    .write_capacity_units(0)
                    .build(),
            )
            .build();

        let capacity = capacity_from_description("events", &description);
        assert_eq!(capacity.read_units, None);
        assert_eq!(capacity.write_units, None);
    }

    #[tokio::test]
    async fn test_mock_provider() {
        let provider = MockTableProvider::new([TableCapacity::provisioned("orders", 5, 5)]);
        assert_eq!(
            provider.describe_table("orders").await.unwrap().read_units,
            Some(5)
        );
        assert!(matches!(
            provider.describe_table("missing").await,
            Err(CopyError::Metadata(_))
        ));
    }
}

/*
 * DynamoDB backend of the orchestrator.
 *
 * Owns one client per side and wires the segmented scan producer into
 * the paced write consumer.
 */

use copy_common::{Result, TableRole};
use copy_planner::{DynamoDbTableProvider, TableCapacity, TableMetadataSource};
use copy_worker::{
    ClientContext, DynamoDbBatchWriter, DynamoDbClient, DynamoDbSegmentScanner, InterruptSignal,
    PacedWriteConsumer, ScanProducer, SegmentScanProducer,
};
use std::sync::Arc;
use tokio::runtime::Handle;

use crate::orchestrator::{CopyBackend, Delegation};

pub struct DynamoDbBackend {
    runtime: Handle,
    source: DynamoDbClient,
    destination: DynamoDbClient,
    interrupt: InterruptSignal,
}

impl DynamoDbBackend {
    /// Builds both clients on `runtime`. Must not be called from inside it.
    pub fn connect(
        runtime: Handle,
        source: &ClientContext,
        destination: &ClientContext,
        interrupt: InterruptSignal,
    ) -> Self {
        let (source, destination) = runtime.block_on(async {
            futures::join!(
                DynamoDbClient::connect(source),
                DynamoDbClient::connect(destination)
            )
        });
        Self {
            runtime,
            source,
            destination,
            interrupt,
        }
    }

    fn client(&self, role: TableRole) -> &DynamoDbClient {
        match role {
            TableRole::Source => &self.source,
            TableRole::Destination => &self.destination,
        }
    }
}

impl CopyBackend for DynamoDbBackend {
    fn describe_table(&self, role: TableRole, table: &str) -> Result<TableCapacity> {
        let provider = DynamoDbTableProvider::new(self.client(role).inner().clone());
        self.runtime.block_on(provider.describe_table(table))
    }

    fn pipe(&self, delegation: Delegation) -> Result<()> {
        let Delegation {
            scan,
            read_pool,
            write,
            write_pool,
            metrics,
        } = delegation;

        let consumer = Arc::new(PacedWriteConsumer::new(
            DynamoDbBatchWriter::new(self.destination.clone()),
            write,
            write_pool,
            self.runtime.clone(),
            metrics.clone(),
            self.interrupt.clone(),
        ));
        let producer = SegmentScanProducer::new(
            DynamoDbSegmentScanner::new(self.source.clone()),
            scan,
            read_pool,
            self.runtime.clone(),
            metrics,
            self.interrupt.clone(),
        );

        producer.pipe(consumer)
    }
}

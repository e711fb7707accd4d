/*
 * DynamoDB Table Copy - Worker
 *
 * The worker side of a copy job:
 * 1. Bounded thread pools with caller-runs backpressure
 * 2. A segmented scan producer paced on read capacity
 * 3. A batch write consumer paced on write capacity
 * 4. Per-side DynamoDB clients and interrupt handling
 */

pub mod client;
pub mod pacer;
pub mod pool;
pub mod scan;
pub mod shutdown;
pub mod tracker;
pub mod writer;

pub use client::{
    classify_sdk_error, resolve_client_contexts, ClientContext, CredentialSource, DynamoDbClient,
};
pub use pacer::Pacer;
pub use pool::{build_pool, BackpressurePolicy, BoundedPool, PoolSpec, PoolStats};
pub use scan::{
    DynamoDbSegmentScanner, Item, PageRequest, ScanJob, ScanPage, ScanProducer, ScannedPage,
    SegmentScanProducer, SegmentScanner,
};
pub use shutdown::{wait_for_signal, InterruptSignal};
pub use tracker::TaskTracker;
pub use writer::{
    BatchOutcome, BatchWriter, DynamoDbBatchWriter, PacedWriteConsumer, WriteConsumer, WriteJob,
    MAX_BATCH_SIZE,
};

/*
 * Paced batch write consumer.
 *
 * Splits scanned pages into BatchWriteItem chunks and runs them on the
 * write pool. Every chunk waits for write capacity before its next
 * request, and unprocessed items are resubmitted with backoff.
 */

use async_trait::async_trait;
use aws_sdk_dynamodb::types::{PutRequest, ReturnConsumedCapacity, WriteRequest};
use copy_common::metrics::spans;
use copy_common::{CopyError, CopyMetrics, Result, RetryBuilder, RetryConfig};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, info_span, warn};

use crate::client::{classify_sdk_error, DynamoDbClient};
use crate::pacer::Pacer;
use crate::pool::BoundedPool;
use crate::scan::{Item, ScannedPage};
use crate::shutdown::InterruptSignal;
use crate::tracker::TaskTracker;

/// Largest batch accepted by BatchWriteItem.
pub const MAX_BATCH_SIZE: usize = 25;

/// What the consumer writes and how fast.
#[derive(Debug, Clone)]
pub struct WriteJob {
    pub table: String,
    /// Write units per second; `None` runs unpaced
    pub write_throughput: Option<f64>,
    pub batch_size: usize,
}

/// Result of one batch write request.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    /// Items the service did not apply
    pub unprocessed: Vec<Item>,
    pub consumed_capacity: f64,
}

/// Writes one batch of items.
#[async_trait]
pub trait BatchWriter: Send + Sync + 'static {
    async fn write_batch(&self, table: &str, items: Vec<Item>) -> Result<BatchOutcome>;
}

/// Writer backed by the DynamoDB BatchWriteItem API.
pub struct DynamoDbBatchWriter {
    client: DynamoDbClient,
}

impl DynamoDbBatchWriter {
    pub fn new(client: DynamoDbClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BatchWriter for DynamoDbBatchWriter {
    async fn write_batch(&self, table: &str, items: Vec<Item>) -> Result<BatchOutcome> {
        let requests = items
            .into_iter()
            .map(|item| {
                let put = PutRequest::builder()
                    .set_item(Some(item))
                    .build()
                    .map_err(|e| CopyError::Unexpected(format!("invalid put request: {}", e)))?;
                Ok(WriteRequest::builder().put_request(put).build())
            })
            .collect::<Result<Vec<_>>>()?;

        let _permit = self.client.acquire().await?;
        let output = self
            .client
            .inner()
            .batch_write_item()
            .request_items(table, requests)
            .return_consumed_capacity(ReturnConsumedCapacity::Total)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&format!("batch write {}", table), e))?;

        let unprocessed = output
            .unprocessed_items
            .and_then(|mut pending| pending.remove(table))
            .unwrap_or_default()
            .into_iter()
            .filter_map(|request| request.put_request.map(|put| put.item))
            .collect();
        let consumed_capacity = output
            .consumed_capacity
            .unwrap_or_default()
            .iter()
            .filter_map(|c| c.capacity_units)
            .sum();

        Ok(BatchOutcome {
            unprocessed,
            consumed_capacity,
        })
    }
}

/// Receives scanned pages.
pub trait WriteConsumer: Send + Sync {
    /// Accepts one page. May block while the write pool is saturated.
    fn consume(&self, page: ScannedPage) -> Result<()>;

    /// Blocks until every accepted page is written.
    fn finish(&self) -> Result<()>;
}

/// Write consumer running one pool task per chunk.
pub struct PacedWriteConsumer<W: BatchWriter> {
    inner: Arc<ChunkContext<W>>,
    pool: Arc<BoundedPool>,
    tracker: Arc<TaskTracker>,
}

struct ChunkContext<W> {
    writer: W,
    job: WriteJob,
    runtime: Handle,
    pacer: Pacer,
    retry: RetryConfig,
    metrics: Arc<CopyMetrics>,
    interrupt: InterruptSignal,
}

impl<W: BatchWriter> PacedWriteConsumer<W> {
    pub fn new(
        writer: W,
        mut job: WriteJob,
        pool: Arc<BoundedPool>,
        runtime: Handle,
        metrics: Arc<CopyMetrics>,
        interrupt: InterruptSignal,
    ) -> Self {
        job.batch_size = job.batch_size.clamp(1, MAX_BATCH_SIZE);
        let pacer = Pacer::new(job.write_throughput);
        Self {
            inner: Arc::new(ChunkContext {
                writer,
                job,
                runtime,
                pacer,
                retry: RetryConfig::for_batch_write(),
                metrics,
                interrupt,
            }),
            pool,
            tracker: Arc::new(TaskTracker::new()),
        }
    }

    /// Overrides the retry policy for batch requests and unprocessed items.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.retry = retry;
        }
        self
    }
}

impl<W: BatchWriter> WriteConsumer for PacedWriteConsumer<W> {
    fn consume(&self, page: ScannedPage) -> Result<()> {
        if self.tracker.has_failed() {
            return Err(CopyError::Execution(format!(
                "writes to '{}' already failed, dropping page from segment {}",
                self.inner.job.table, page.segment
            )));
        }

        let mut remaining = page.items;
        while !remaining.is_empty() {
            let rest = remaining.split_off(remaining.len().min(self.inner.job.batch_size));
            let chunk = std::mem::replace(&mut remaining, rest);

            self.tracker.begin();
            let ctx = self.inner.clone();
            let tracker = self.tracker.clone();
            let segment = page.segment;
            let submitted = self.pool.execute(move || {
                tracker.run_task(&format!("batch from segment {}", segment), || {
                    ctx.write_chunk(segment, chunk)
                });
            });
            if let Err(e) = submitted {
                self.tracker.complete(Err(e.clone()));
                return Err(e);
            }
        }
        Ok(())
    }

    fn finish(&self) -> Result<()> {
        debug!(
            table = %self.inner.job.table,
            in_flight = self.tracker.pending(),
            write_throughput = ?self.inner.pacer.rate(),
            "Waiting for batch writes"
        );
        self.tracker.wait()
    }
}

impl<W: BatchWriter> ChunkContext<W> {
    fn write_chunk(&self, segment: u32, chunk: Vec<Item>) -> Result<()> {
        let span = info_span!(
            spans::WRITE_BATCH,
            table = %self.job.table,
            segment,
            items = chunk.len()
        );
        let _enter = span.enter();

        if self.interrupt.is_triggered() {
            return Err(CopyError::Interrupted(format!(
                "dropped {} items bound for '{}'",
                chunk.len(),
                self.job.table
            )));
        }

        let result = self.runtime.block_on(self.write_until_processed(chunk));
        if let Err(e) = &result {
            warn!("Batch write failed: {}", e);
        }
        result
    }

    async fn write_until_processed(&self, mut pending: Vec<Item>) -> Result<()> {
        let mut attempt = 0;
        loop {
            let sent = pending.len();
            let outcome = RetryBuilder::new(&self.retry)
                .operation(format!("batch write {}", self.job.table))
                .run(|| self.writer.write_batch(&self.job.table, pending.clone()))
                .await?;

            let applied = sent.saturating_sub(outcome.unprocessed.len());

            // Local endpoints report no consumed capacity; fall back to one unit per item.
            let units = if outcome.consumed_capacity > 0.0 {
                outcome.consumed_capacity
            } else {
                applied as f64
            };
            self.pacer.acquire(units).await;
            self.metrics.record_batch(applied as u64, units);

            if outcome.unprocessed.is_empty() {
                return Ok(());
            }
            if attempt >= self.retry.max_retries {
                return Err(CopyError::Execution(format!(
                    "{} items still unprocessed by '{}' after {} retries",
                    outcome.unprocessed.len(),
                    self.job.table,
                    attempt
                )));
            }

            self.metrics.record_unprocessed_retry();
            let delay = self.retry.delay_for_attempt(attempt);
            debug!(
                unprocessed = outcome.unprocessed.len(),
                attempt = attempt + 1,
                "Resubmitting unprocessed items in {:?}",
                delay
            );
            tokio::time::sleep(delay).await;
            pending = outcome.unprocessed;
            attempt += 1;
        }
    }
}

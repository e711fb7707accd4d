/*
 * Segmented scan producer.
 *
 * Runs one task per owned segment on the read pool. Each task pages
 * through its segment, paces on the consumed read capacity and hands
 * every page to the write consumer. Segments finish in any order.
 */

use async_trait::async_trait;
use aws_sdk_dynamodb::types::{AttributeValue, ReturnConsumedCapacity};
use copy_common::metrics::spans;
use copy_common::{CopyError, CopyMetrics, Result, RetryBuilder, RetryConfig};
use copy_planner::{SectionSpec, SegmentPlan};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, info, info_span, warn};

use crate::client::{classify_sdk_error, DynamoDbClient};
use crate::pacer::Pacer;
use crate::pool::BoundedPool;
use crate::shutdown::InterruptSignal;
use crate::tracker::TaskTracker;
use crate::writer::WriteConsumer;

/// One table item.
pub type Item = HashMap<String, AttributeValue>;

/// Items scanned from one page of one segment.
#[derive(Debug, Clone)]
pub struct ScannedPage {
    pub segment: u32,
    pub items: Vec<Item>,
}

/// Parameters of one Scan request.
#[derive(Debug, Clone)]
pub struct PageRequest {
    pub table: String,
    pub segment: u32,
    pub total_segments: u32,
    pub consistent_read: bool,
    pub limit: Option<i32>,
    pub exclusive_start_key: Option<Item>,
}

/// Result of one Scan request.
#[derive(Debug, Clone, Default)]
pub struct ScanPage {
    pub items: Vec<Item>,
    pub last_evaluated_key: Option<Item>,
    pub consumed_capacity: f64,
}

/// Reads one page of one segment.
#[async_trait]
pub trait SegmentScanner: Send + Sync + 'static {
    async fn scan_page(&self, request: &PageRequest) -> Result<ScanPage>;
}

/// Scanner backed by the DynamoDB Scan API.
pub struct DynamoDbSegmentScanner {
    client: DynamoDbClient,
}

impl DynamoDbSegmentScanner {
    pub fn new(client: DynamoDbClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SegmentScanner for DynamoDbSegmentScanner {
    async fn scan_page(&self, request: &PageRequest) -> Result<ScanPage> {
        let _permit = self.client.acquire().await?;
        let output = self
            .client
            .inner()
            .scan()
            .table_name(&request.table)
            .segment(request.segment as i32)
            .total_segments(request.total_segments as i32)
            .consistent_read(request.consistent_read)
            .return_consumed_capacity(ReturnConsumedCapacity::Total)
            .set_limit(request.limit)
            .set_exclusive_start_key(request.exclusive_start_key.clone())
            .send()
            .await
            .map_err(|e| {
                classify_sdk_error(
                    &format!("scan {} segment {}", request.table, request.segment),
                    e,
                )
            })?;

        Ok(ScanPage {
            items: output.items.unwrap_or_default(),
            last_evaluated_key: output.last_evaluated_key.filter(|k| !k.is_empty()),
            consumed_capacity: output
                .consumed_capacity
                .and_then(|c| c.capacity_units)
                .unwrap_or(0.0),
        })
    }
}

/// What the producer scans and how.
#[derive(Debug, Clone)]
pub struct ScanJob {
    pub table: String,
    /// Read units per second; `None` runs unpaced
    pub read_throughput: Option<f64>,
    pub plan: SegmentPlan,
    pub section: SectionSpec,
    pub consistent_read: bool,
    pub page_limit: Option<i32>,
}

/// Streams a table into a write consumer.
pub trait ScanProducer: Send + Sync {
    /// Scans every owned segment into `consumer`, then waits for the
    /// consumer to drain. Returns the first fault from either side.
    fn pipe(&self, consumer: Arc<dyn WriteConsumer>) -> Result<()>;
}

/// Scan producer running one pool task per owned segment.
pub struct SegmentScanProducer<S: SegmentScanner> {
    inner: Arc<SegmentContext<S>>,
    pool: Arc<BoundedPool>,
}

struct SegmentContext<S> {
    scanner: S,
    job: ScanJob,
    runtime: Handle,
    pacer: Pacer,
    retry: RetryConfig,
    metrics: Arc<CopyMetrics>,
    interrupt: InterruptSignal,
}

impl<S: SegmentScanner> SegmentScanProducer<S> {
    pub fn new(
        scanner: S,
        job: ScanJob,
        pool: Arc<BoundedPool>,
        runtime: Handle,
        metrics: Arc<CopyMetrics>,
        interrupt: InterruptSignal,
    ) -> Self {
        let pacer = Pacer::new(job.read_throughput);
        Self {
            inner: Arc::new(SegmentContext {
                scanner,
                job,
                runtime,
                pacer,
                retry: RetryConfig::for_scan(),
                metrics,
                interrupt,
            }),
            pool,
        }
    }

    /// Overrides the retry policy for scan pages.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.retry = retry;
        }
        self
    }
}

impl<S: SegmentScanner> ScanProducer for SegmentScanProducer<S> {
    fn pipe(&self, consumer: Arc<dyn WriteConsumer>) -> Result<()> {
        let job = &self.inner.job;
        let tracker = Arc::new(TaskTracker::new());
        let segments: Vec<u32> = job.section.owned_segments(&job.plan).collect();

        info!(
            table = %job.table,
            section = job.section.index,
            total_sections = job.section.total_sections,
            total_segments = job.plan.total_segments,
            owned = segments.len(),
            read_throughput = ?self.inner.pacer.rate(),
            "Scanning segments"
        );

        for segment in segments {
            if self.inner.interrupt.is_triggered() || tracker.has_failed() {
                break;
            }
            tracker.begin();
            let ctx = self.inner.clone();
            let task_tracker = tracker.clone();
            let task_consumer = consumer.clone();
            let submitted = self.pool.execute(move || {
                task_tracker.run_task(&format!("segment {}", segment), || {
                    ctx.run_segment(segment, task_consumer.as_ref())
                });
            });
            if let Err(e) = submitted {
                tracker.complete(Err(e));
            }
        }

        let scanned = tracker.wait();
        // Drain writes even when scanning failed; the pools are shut down next.
        let written = consumer.finish();

        if self.inner.interrupt.is_triggered() {
            return Err(CopyError::Interrupted(format!(
                "scan of '{}' interrupted",
                job.table
            )));
        }
        scanned.and(written)
    }
}

impl<S: SegmentScanner> SegmentContext<S> {
    fn run_segment(&self, segment: u32, consumer: &dyn WriteConsumer) -> Result<()> {
        let span = info_span!(spans::SCAN_SEGMENT, table = %self.job.table, segment);
        let _enter = span.enter();

        self.metrics.record_segment_start();
        let result = self.scan_segment(segment, consumer);
        self.metrics.record_segment_complete(result.is_ok());

        match &result {
            Ok(pages) => debug!(pages, "Segment complete"),
            Err(e) => warn!("Segment failed: {}", e),
        }
        result.map(|_| ())
    }

    fn scan_segment(&self, segment: u32, consumer: &dyn WriteConsumer) -> Result<u64> {
        let mut request = PageRequest {
            table: self.job.table.clone(),
            segment,
            total_segments: self.job.plan.total_segments,
            consistent_read: self.job.consistent_read,
            limit: self.job.page_limit,
            exclusive_start_key: None,
        };
        let mut pages = 0u64;

        loop {
            if self.interrupt.is_triggered() {
                return Err(CopyError::Interrupted(format!(
                    "segment {} stopped after {} pages",
                    segment, pages
                )));
            }

            // SDK calls run on the shared runtime; handing the page to the
            // consumer stays outside it because it may block on caller-runs.
            let page = self.runtime.block_on(async {
                let page = RetryBuilder::new(&self.retry)
                    .operation(format!("scan {} segment {}", request.table, segment))
                    .run(|| self.scanner.scan_page(&request))
                    .await?;
                self.pacer.acquire(page.consumed_capacity).await;
                Ok::<_, CopyError>(page)
            })?;

            pages += 1;
            self.metrics
                .record_page(page.items.len() as u64, page.consumed_capacity);

            if !page.items.is_empty() {
                consumer.consume(ScannedPage {
                    segment,
                    items: page.items,
                })?;
            }

            match page.last_evaluated_key {
                Some(key) => request.exclusive_start_key = Some(key),
                None => return Ok(pages),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::build_pool;
    use crate::writer::WriteConsumer;
    use copy_planner::{validate_section, SegmentSource};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Serves `pages_per_segment` pages of `items_per_page` items for every segment.
    struct FakeScanner {
        pages_per_segment: usize,
        items_per_page: usize,
        fail_segment: Option<u32>,
        panic_segment: Option<u32>,
        requests: Mutex<Vec<(u32, u32)>>,
    }

    impl FakeScanner {
        fn new(pages_per_segment: usize, items_per_page: usize) -> Self {
            Self {
                pages_per_segment,
                items_per_page,
                fail_segment: None,
                panic_segment: None,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SegmentScanner for FakeScanner {
        async fn scan_page(&self, request: &PageRequest) -> Result<ScanPage> {
            self.requests
                .lock()
                .unwrap()
                .push((request.segment, request.total_segments));
            if self.panic_segment == Some(request.segment) {
                panic!("corrupt page in segment {}", request.segment);
            }
            if self.fail_segment == Some(request.segment) {
                return Err(CopyError::Execution(format!(
                    "segment {} unreadable",
                    request.segment
                )));
            }

            let page_no = match &request.exclusive_start_key {
                Some(key) => match key.get("page") {
                    Some(AttributeValue::N(n)) => n.parse::<usize>().unwrap(),
                    _ => unreachable!(),
                },
                None => 0,
            };
            let items = (0..self.items_per_page)
                .map(|i| {
                    HashMap::from([(
                        "id".to_string(),
                        AttributeValue::S(format!("{}-{}-{}", request.segment, page_no, i)),
                    )])
                })
                .collect();
            let last_evaluated_key = (page_no + 1 < self.pages_per_segment).then(|| {
                HashMap::from([("page".to_string(), AttributeValue::N((page_no + 1).to_string()))])
            });

            Ok(ScanPage {
                items,
                last_evaluated_key,
                consumed_capacity: 0.5,
            })
        }
    }

    #[derive(Default)]
    struct CollectingConsumer {
        pages: Mutex<Vec<ScannedPage>>,
        finished: Mutex<bool>,
    }

    impl WriteConsumer for CollectingConsumer {
        fn consume(&self, page: ScannedPage) -> Result<()> {
            self.pages.lock().unwrap().push(page);
            Ok(())
        }

        fn finish(&self) -> Result<()> {
            *self.finished.lock().unwrap() = true;
            Ok(())
        }
    }

    fn job(total_segments: u32, section: SectionSpec) -> ScanJob {
        ScanJob {
            table: "orders".into(),
            read_throughput: None,
            plan: SegmentPlan {
                total_segments,
                source: SegmentSource::Capacity,
            },
            section,
            consistent_read: false,
            page_limit: None,
        }
    }

    fn producer<S: SegmentScanner>(
        scanner: S,
        job: ScanJob,
        runtime: &tokio::runtime::Runtime,
        interrupt: InterruptSignal,
    ) -> (SegmentScanProducer<S>, Arc<CopyMetrics>) {
        let pool = Arc::new(BoundedPool::new(
            "scan",
            build_pool(job.plan.total_segments as usize, 4, Duration::from_millis(50)),
        ));
        let metrics = Arc::new(CopyMetrics::new());
        let producer = SegmentScanProducer::new(
            scanner,
            job,
            pool,
            runtime.handle().clone(),
            metrics.clone(),
            interrupt,
        )
        .with_retry(RetryConfig::no_retry());
        (producer, metrics)
    }

    #[test]
    fn test_scans_only_owned_segments() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let section = validate_section(2, 3, 10).unwrap();
        let (producer, metrics) = producer(
            FakeScanner::new(3, 4),
            job(10, section),
            &runtime,
            InterruptSignal::new(),
        );
        let consumer = Arc::new(CollectingConsumer::default());

        producer.pipe(consumer.clone()).unwrap();

        let mut segments: Vec<u32> = consumer.pages.lock().unwrap().iter().map(|p| p.segment).collect();
        segments.sort();
        segments.dedup();
        assert_eq!(segments, vec![2, 5, 8]);
        assert!(*consumer.finished.lock().unwrap());

        let requests = producer.inner.scanner.requests.lock().unwrap();
        assert!(requests.iter().all(|&(_, total)| total == 10));

        let snap = metrics.snapshot();
        assert_eq!(snap.segments_completed, 3);
        assert_eq!(snap.pages_scanned, 9);
        assert_eq!(snap.items_read, 36);
        assert!((snap.read_capacity_units - 4.5).abs() < 1e-9);
    }

    #[test]
    fn test_segment_fault_propagates() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let mut scanner = FakeScanner::new(2, 1);
        scanner.fail_segment = Some(1);
        let (producer, metrics) = producer(
            scanner,
            job(4, SectionSpec::whole()),
            &runtime,
            InterruptSignal::new(),
        );
        let consumer = Arc::new(CollectingConsumer::default());

        let err = producer.pipe(consumer.clone()).unwrap_err();
        assert!(matches!(err, CopyError::Execution(_)));
        assert!(*consumer.finished.lock().unwrap());
        assert_eq!(metrics.snapshot().segments_failed, 1);
    }

    #[test]
    fn test_panicking_segment_fails_pipe() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let mut scanner = FakeScanner::new(2, 1);
        scanner.panic_segment = Some(0);
        let (producer, _) = producer(
            scanner,
            job(2, SectionSpec::whole()),
            &runtime,
            InterruptSignal::new(),
        );
        let consumer = Arc::new(CollectingConsumer::default());

        let err = producer.pipe(consumer.clone()).unwrap_err();
        assert!(matches!(err, CopyError::Execution(_)));
        assert!(err.to_string().contains("segment 0 panicked"), "{}", err);
        assert!(*consumer.finished.lock().unwrap());
    }

    #[test]
    fn test_interrupted_before_start() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let interrupt = InterruptSignal::new();
        interrupt.trigger();
        let (producer, _) = producer(
            FakeScanner::new(1, 1),
            job(2, SectionSpec::whole()),
            &runtime,
            interrupt,
        );

        let err = producer
            .pipe(Arc::new(CollectingConsumer::default()))
            .unwrap_err();
        assert!(matches!(err, CopyError::Interrupted(_)));
    }
}

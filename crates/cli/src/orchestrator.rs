/*
 * Copy job orchestration.
 *
 * Drives one job from parameters to exit status:
 * Initializing -> Planning -> PoolBuilding -> Delegating -> Completed | Failed.
 * Both pools are shut down on every path once they exist.
 */

use copy_common::metrics::spans;
use copy_common::{
    exit_codes, CopyConfig, CopyMetrics, MetricsSnapshot, OperationalConfig,
    PlanningConfig, Result, ResultExt, TableRole,
};
use copy_planner::{
    compute_segments, compute_throughput, validate_section, Direction, SectionSpec, SegmentPlan,
    TableCapacity, ThroughputBudget,
};
use copy_worker::{
    build_pool, resolve_client_contexts, BoundedPool, ClientContext, PoolSpec, PoolStats, ScanJob,
    WriteJob,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;

/// Lifecycle of a copy job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobState {
    Initializing,
    Planning,
    PoolBuilding,
    Delegating,
    Completed,
    Failed,
}

/// Everything handed to the producer/consumer pair.
pub struct Delegation {
    pub scan: ScanJob,
    pub read_pool: Arc<BoundedPool>,
    pub write: WriteJob,
    pub write_pool: Arc<BoundedPool>,
    pub metrics: Arc<CopyMetrics>,
}

/// The outside world of a copy job: table metadata and the data path.
pub trait CopyBackend {
    /// Reads the capacity snapshot of one table.
    fn describe_table(&self, role: TableRole, table: &str) -> Result<TableCapacity>;

    /// Runs the scan producer into the write consumer and blocks until both
    /// are done.
    fn pipe(&self, delegation: Delegation) -> Result<()>;
}

impl<T: CopyBackend + ?Sized> CopyBackend for &T {
    fn describe_table(&self, role: TableRole, table: &str) -> Result<TableCapacity> {
        (**self).describe_table(role, table)
    }

    fn pipe(&self, delegation: Delegation) -> Result<()> {
        (**self).pipe(delegation)
    }
}

/// The resolved plan of a job, fixed before delegation starts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CopyJob {
    pub source_table: String,
    pub destination_table: String,
    pub plan: SegmentPlan,
    pub section: SectionSpec,
    pub owned_segments: usize,
    /// `None` when the side runs unpaced
    pub read_throughput: Option<f64>,
    pub write_throughput: Option<f64>,
    pub read_pool: PoolSpec,
    pub write_pool: PoolSpec,
}

/// Outcome of a job.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job_id: String,
    pub state: JobState,
    pub exit_code: i32,
    pub error: Option<String>,
    pub job: Option<CopyJob>,
    pub read_pool: Option<PoolStats>,
    pub write_pool: Option<PoolStats>,
    pub metrics: MetricsSnapshot,
    pub elapsed: Duration,
}

impl JobReport {
    pub fn succeeded(&self) -> bool {
        self.state == JobState::Completed
    }
}

#[derive(Default)]
struct JobOutcome {
    job: Option<CopyJob>,
    read_pool: Option<PoolStats>,
    write_pool: Option<PoolStats>,
}

/// Runs one copy job.
pub struct Orchestrator {
    config: CopyConfig,
    operational: OperationalConfig,
    planning: PlanningConfig,
    state: JobState,
}

impl Orchestrator {
    pub fn new(config: CopyConfig, operational: OperationalConfig, planning: PlanningConfig) -> Self {
        Self {
            config,
            operational,
            planning,
            state: JobState::Initializing,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    fn transition(&mut self, next: JobState) {
        debug!(from = ?self.state, to = ?next, "Job state");
        self.state = next;
    }

    /// Runs the job to completion.
    ///
    /// `connect` builds the backend from the resolved client contexts. It is
    /// not called when the contexts or parameters are invalid.
    pub fn run<B, F>(&mut self, connect: F) -> JobReport
    where
        B: CopyBackend,
        F: FnOnce(&ClientContext, &ClientContext) -> Result<B>,
    {
        let job_id = Uuid::now_v7().to_string();
        let span = info_span!(
            spans::COPY_JOB,
            job_id = %job_id,
            source = %self.config.source.table,
            destination = %self.config.destination.table
        );
        let _enter = span.enter();

        let start = Instant::now();
        let metrics = Arc::new(CopyMetrics::new());
        let mut outcome = JobOutcome::default();
        self.state = JobState::Initializing;

        let result = self.run_inner(connect, &metrics, &mut outcome);
        let snapshot = metrics.snapshot();
        let elapsed = start.elapsed();

        let (exit_code, error) = match result {
            Ok(()) => {
                self.transition(JobState::Completed);
                info!(
                    items_read = snapshot.items_read,
                    items_written = snapshot.items_written,
                    segments = snapshot.segments_completed,
                    elapsed_ms = elapsed.as_millis() as u64,
                    write_rate = snapshot.write_rate(elapsed),
                    "Copy completed"
                );
                (exit_codes::SUCCESS, None)
            }
            Err(e) => {
                let failed_in = self.state;
                self.transition(JobState::Failed);
                error!(
                    state = ?failed_in,
                    exit_code = e.exit_code(),
                    items_written = snapshot.items_written,
                    items_pending = snapshot.items_pending(),
                    "Copy failed: {}",
                    e
                );
                (e.exit_code(), Some(e.to_string()))
            }
        };

        JobReport {
            job_id,
            state: self.state,
            exit_code,
            error,
            job: outcome.job,
            read_pool: outcome.read_pool,
            write_pool: outcome.write_pool,
            metrics: snapshot,
            elapsed,
        }
    }

    fn run_inner<B, F>(
        &mut self,
        connect: F,
        metrics: &Arc<CopyMetrics>,
        outcome: &mut JobOutcome,
    ) -> Result<()>
    where
        B: CopyBackend,
        F: FnOnce(&ClientContext, &ClientContext) -> Result<B>,
    {
        let (source_ctx, destination_ctx) =
            resolve_client_contexts(&self.config, &self.operational)?;
        self.config.validate()?;
        self.operational.validate()?;
        let backend = connect(&source_ctx, &destination_ctx)?;

        self.transition(JobState::Planning);
        let source = backend.describe_table(TableRole::Source, &self.config.source.table)?;
        let destination =
            backend.describe_table(TableRole::Destination, &self.config.destination.table)?;
        let plan = self.plan_segments(&source)?;
        let read_throughput = self.plan_throughput(&source, Direction::Read)?;
        let write_throughput = self.plan_throughput(&destination, Direction::Write)?;

        self.transition(JobState::PoolBuilding);
        let section = validate_section(
            self.config.section,
            self.config.total_sections,
            plan.total_segments,
        )?;
        let keep_alive = self.operational.keep_alive();
        let core = self.operational.executor_core_pool_size;
        let job = CopyJob {
            source_table: source.table.clone(),
            destination_table: destination.table.clone(),
            plan,
            section,
            owned_segments: section.owned_segments(&plan).count(),
            read_throughput,
            write_throughput,
            read_pool: build_pool(plan.total_segments as usize, core, keep_alive),
            write_pool: build_pool(self.config.max_write_threads, core, keep_alive),
        };
        info!(
            total_segments = plan.total_segments,
            segment_source = ?plan.source,
            section = section.index,
            total_sections = section.total_sections,
            owned_segments = job.owned_segments,
            read_throughput = ?read_throughput,
            write_throughput = ?write_throughput,
            "Planned copy"
        );
        outcome.job = Some(job.clone());

        let read_pool = Arc::new(BoundedPool::new("read", job.read_pool));
        let write_pool = Arc::new(BoundedPool::new("write", job.write_pool));

        self.transition(JobState::Delegating);
        let delegation = Delegation {
            scan: ScanJob {
                table: job.source_table.clone(),
                read_throughput,
                plan,
                section,
                consistent_read: self.config.consistent_scan,
                page_limit: self.operational.scan_page_limit,
            },
            read_pool: read_pool.clone(),
            write: WriteJob {
                table: job.destination_table.clone(),
                write_throughput,
                batch_size: self.operational.batch_write_size,
            },
            write_pool: write_pool.clone(),
            metrics: metrics.clone(),
        };
        let result = backend.pipe(delegation).with_context(|| {
            format!(
                "copying '{}' section {}/{} into '{}'",
                job.source_table, section.index, section.total_sections, job.destination_table
            )
        });

        read_pool.shutdown();
        write_pool.shutdown();
        outcome.read_pool = Some(read_pool.stats());
        outcome.write_pool = Some(write_pool.stats());
        debug!(read = ?outcome.read_pool, write = ?outcome.write_pool, "Pools released");

        result
    }

    fn plan_segments(&self, source: &TableCapacity) -> Result<SegmentPlan> {
        match compute_segments(source, &self.planning) {
            Ok(plan) => Ok(plan),
            Err(e) if e.is_recoverable() => {
                let plan = SegmentPlan::fallback();
                warn!("{}; defaulting to {} segments", e, plan.total_segments);
                Ok(plan)
            }
            Err(e) => Err(e),
        }
    }

    fn plan_throughput(&self, table: &TableCapacity, direction: Direction) -> Result<Option<f64>> {
        let budget = ThroughputBudget::from_config(&self.config, direction);
        match compute_throughput(table, budget, direction) {
            Ok(rate) => Ok(Some(rate)),
            Err(e) if e.is_recoverable() => {
                warn!("{}; running {:?} side unpaced", e, direction);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

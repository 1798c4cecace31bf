// SPDX-License-Identifier: MIT OR Apache-2.0
//! The task engine: dispatches a [`Task`] to one of the four execution-mode
//! drivers and aggregates their output into a [`TaskResult`].

use crate::cancel::CancellationToken;
use crate::driver::{run_iteration, EngineHooks, ExecutionContext, ExecutorRegistry, NoopHooks};
use crate::vu_pool::VuPool;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;
use wf_core::{ExecutionError, ExecutionMode, StepResult, Task, TaskResult, TaskStatus, Workflow};
use wf_error::WfErrorCode;
use wf_metrics::MetricsAggregator;

/// Cap on step results retained per task, to bound memory on long-running
/// soak tests. The HDR histogram in [`MetricsAggregator`] remains the
/// authoritative source for aggregate latency figures regardless of this
/// cap; this list exists for recent-activity debugging only.
const MAX_RETAINED_STEP_RESULTS: usize = 2_000;

/// Cap on driver-local errors retained per task, evicting the oldest first
/// like [`MAX_RETAINED_STEP_RESULTS`] above.
const MAX_RETAINED_ERRORS: usize = 500;

struct ResultLog {
    results: Mutex<VecDeque<StepResult>>,
}

impl ResultLog {
    fn new() -> Self {
        Self {
            results: Mutex::new(VecDeque::new()),
        }
    }

    fn extend(&self, batch: Vec<StepResult>) {
        let mut log = self.results.lock().expect("result log lock poisoned");
        for r in batch {
            if log.len() >= MAX_RETAINED_STEP_RESULTS {
                log.pop_front();
            }
            log.push_back(r);
        }
    }

    fn snapshot(&self) -> Vec<StepResult> {
        self.results.lock().expect("result log lock poisoned").iter().cloned().collect()
    }
}

/// Collects [`ExecutionError`] records from failed step results as an
/// iteration completes, so `TaskResult.errors[0]` can surface the first
/// failure a task hit.
struct ErrorLog {
    errors: Mutex<VecDeque<ExecutionError>>,
}

impl ErrorLog {
    fn new() -> Self {
        Self {
            errors: Mutex::new(VecDeque::new()),
        }
    }

    fn record(&self, results: &[StepResult]) {
        let mut log = self.errors.lock().expect("error log lock poisoned");
        for r in results {
            if !r.is_failed() {
                continue;
            }
            if log.len() >= MAX_RETAINED_ERRORS {
                log.pop_front();
            }
            let code = if r.status == wf_core::StepStatus::Timeout {
                WfErrorCode::StepTimeout.to_string()
            } else {
                WfErrorCode::StepFailure.to_string()
            };
            log.push_back(ExecutionError {
                code,
                message: r.error.clone().unwrap_or_else(|| "step failed".to_string()),
                step_id: r.step_id.clone(),
                timestamp_ms: r.timestamp_ms,
            });
        }
    }

    fn snapshot(&self) -> Vec<ExecutionError> {
        self.errors.lock().expect("error log lock poisoned").iter().cloned().collect()
    }
}

/// What ends one VU's iteration loop.
enum IterationBudget {
    /// Run until wall-clock `Instant` is reached.
    Deadline(Instant),
    /// Run a fixed number of iterations, then stop.
    FixedCount(u64),
    /// Draw from a shared pool of remaining iterations across every VU.
    Shared(Arc<AtomicI64>),
    /// No intrinsic stop condition; the caller's `should_run` flag is the
    /// only thing that ends the loop. Used by the ramping-vus driver.
    Unbounded,
}

impl IterationBudget {
    /// Attempt to claim the next iteration. For [`Self::Shared`] this
    /// atomically decrements the remaining count.
    fn claim(&self, iteration: u64) -> bool {
        match self {
            Self::Deadline(deadline) => Instant::now() < *deadline,
            Self::FixedCount(max) => iteration < *max,
            Self::Unbounded => true,
            Self::Shared(counter) => {
                let prev = counter.fetch_sub(1, Ordering::SeqCst);
                if prev > 0 {
                    true
                } else {
                    counter.fetch_add(1, Ordering::SeqCst);
                    false
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn vu_loop(
    index: u32,
    pool: Arc<VuPool>,
    workflow: Arc<Workflow>,
    registry: Arc<ExecutorRegistry>,
    metrics: Arc<MetricsAggregator>,
    hooks: Arc<dyn EngineHooks>,
    default_timeout: Duration,
    cancellation: CancellationToken,
    execution_id: Uuid,
    task_id: Uuid,
    budget: IterationBudget,
    log: Arc<ResultLog>,
    errors: Arc<ErrorLog>,
    total_iterations: Arc<AtomicU64>,
    should_run: Option<Arc<AtomicBool>>,
) {
    let vu = match pool.acquire(index) {
        Ok(vu) => vu,
        Err(_) => return,
    };

    let mut iteration: u64 = 0;
    loop {
        if cancellation.is_cancelled() {
            break;
        }
        if let Some(flag) = &should_run {
            if !flag.load(Ordering::SeqCst) {
                break;
            }
        }
        if !budget.claim(iteration) {
            break;
        }

        let ctx = ExecutionContext {
            execution_id,
            task_id,
            vu,
            iteration,
            variables: BTreeMap::new(),
            cancellation: cancellation.clone(),
        };

        let outcome = run_iteration(&ctx, &workflow, &registry, &metrics, hooks.as_ref(), default_timeout).await;
        let results = outcome.into_results();
        errors.record(&results);
        log.extend(results);
        iteration += 1;
        total_iterations.fetch_add(1, Ordering::SeqCst);
        hooks.on_progress(&ctx, iteration).await;
    }

    pool.release(vu);
}

/// Drives a [`Task`]'s workflow against a VU pool according to its
/// configured [`ExecutionMode`], producing a [`TaskResult`].
pub struct TaskEngine {
    registry: Arc<ExecutorRegistry>,
    hooks: Arc<dyn EngineHooks>,
}

impl TaskEngine {
    /// Build an engine with no lifecycle observer.
    pub fn new(registry: Arc<ExecutorRegistry>) -> Self {
        Self {
            registry,
            hooks: Arc::new(NoopHooks),
        }
    }

    /// Build an engine that reports lifecycle events through `hooks`.
    pub fn with_hooks(registry: Arc<ExecutorRegistry>, hooks: Arc<dyn EngineHooks>) -> Self {
        Self { registry, hooks }
    }

    /// Execute `task` to completion (or until `cancellation` fires),
    /// reporting results as if produced by `worker_id`.
    pub async fn execute(&self, worker_id: &str, task: &Task, cancellation: CancellationToken) -> TaskResult {
        let pool_capacity = task.segment.apportion(task.options.mode.max_vus());
        let pool = Arc::new(VuPool::new(pool_capacity));
        let metrics = Arc::new(MetricsAggregator::new());
        let workflow = Arc::new(task.workflow.clone());
        let log = Arc::new(ResultLog::new());
        let errors = Arc::new(ErrorLog::new());
        let total_iterations = Arc::new(AtomicU64::new(0));

        info!(task_id = %task.id, execution_id = %task.execution_id, vus = pool_capacity, "task execution starting");

        match &task.options.mode {
            ExecutionMode::ConstantVus { vus, duration } => {
                self.run_constant_vus(
                    task,
                    task.segment.apportion(*vus),
                    *duration,
                    &pool,
                    &workflow,
                    &metrics,
                    &cancellation,
                    &log,
                    &errors,
                    &total_iterations,
                )
                .await;
            }
            ExecutionMode::PerVuIterations { vus, iterations } => {
                self.run_per_vu_iterations(
                    task,
                    task.segment.apportion(*vus),
                    *iterations,
                    &pool,
                    &workflow,
                    &metrics,
                    &cancellation,
                    &log,
                    &errors,
                    &total_iterations,
                )
                .await;
            }
            ExecutionMode::SharedIterations { vus, iterations } => {
                self.run_shared_iterations(
                    task,
                    task.segment.apportion(*vus),
                    task.segment.apportion(*iterations),
                    &pool,
                    &workflow,
                    &metrics,
                    &cancellation,
                    &log,
                    &errors,
                    &total_iterations,
                )
                .await;
            }
            ExecutionMode::RampingVus { start_vus, stages } => {
                self.run_ramping_vus(
                    task,
                    task.segment.apportion(*start_vus),
                    stages,
                    pool_capacity,
                    &pool,
                    &workflow,
                    &metrics,
                    &cancellation,
                    &log,
                    &errors,
                    &total_iterations,
                )
                .await;
            }
        }

        pool.stop_all();

        let error_snapshot = errors.snapshot();
        let status = if cancellation.is_cancelled() {
            TaskStatus::Cancelled
        } else if !error_snapshot.is_empty() {
            TaskStatus::Failed
        } else {
            TaskStatus::Completed
        };

        info!(task_id = %task.id, status = ?status, "task execution finished");

        TaskResult {
            task_id: task.id,
            execution_id: task.execution_id,
            worker_id: worker_id.to_string(),
            status,
            iterations: total_iterations.load(Ordering::SeqCst),
            step_results: log.snapshot(),
            metrics: metrics.snapshot(),
            errors: error_snapshot,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_constant_vus(
        &self,
        task: &Task,
        vus: u32,
        duration: Duration,
        pool: &Arc<VuPool>,
        workflow: &Arc<Workflow>,
        metrics: &Arc<MetricsAggregator>,
        cancellation: &CancellationToken,
        log: &Arc<ResultLog>,
        errors: &Arc<ErrorLog>,
        total_iterations: &Arc<AtomicU64>,
    ) {
        let deadline = Instant::now() + duration;
        let handles: Vec<JoinHandle<()>> = (0..vus)
            .map(|index| {
                tokio::spawn(vu_loop(
                    index,
                    pool.clone(),
                    workflow.clone(),
                    self.registry.clone(),
                    metrics.clone(),
                    self.hooks.clone(),
                    task.options.step_timeout,
                    cancellation.clone(),
                    task.execution_id,
                    task.id,
                    IterationBudget::Deadline(deadline),
                    log.clone(),
                    errors.clone(),
                    total_iterations.clone(),
                    None,
                ))
            })
            .collect();
        for handle in handles {
            let _ = handle.await;
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_per_vu_iterations(
        &self,
        task: &Task,
        vus: u32,
        iterations: u32,
        pool: &Arc<VuPool>,
        workflow: &Arc<Workflow>,
        metrics: &Arc<MetricsAggregator>,
        cancellation: &CancellationToken,
        log: &Arc<ResultLog>,
        errors: &Arc<ErrorLog>,
        total_iterations: &Arc<AtomicU64>,
    ) {
        let handles: Vec<JoinHandle<()>> = (0..vus)
            .map(|index| {
                tokio::spawn(vu_loop(
                    index,
                    pool.clone(),
                    workflow.clone(),
                    self.registry.clone(),
                    metrics.clone(),
                    self.hooks.clone(),
                    task.options.step_timeout,
                    cancellation.clone(),
                    task.execution_id,
                    task.id,
                    IterationBudget::FixedCount(iterations as u64),
                    log.clone(),
                    errors.clone(),
                    total_iterations.clone(),
                    None,
                ))
            })
            .collect();
        for handle in handles {
            let _ = handle.await;
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_shared_iterations(
        &self,
        task: &Task,
        vus: u32,
        iterations: u32,
        pool: &Arc<VuPool>,
        workflow: &Arc<Workflow>,
        metrics: &Arc<MetricsAggregator>,
        cancellation: &CancellationToken,
        log: &Arc<ResultLog>,
        errors: &Arc<ErrorLog>,
        total_iterations: &Arc<AtomicU64>,
    ) {
        let remaining = Arc::new(AtomicI64::new(iterations as i64));
        let handles: Vec<JoinHandle<()>> = (0..vus)
            .map(|index| {
                tokio::spawn(vu_loop(
                    index,
                    pool.clone(),
                    workflow.clone(),
                    self.registry.clone(),
                    metrics.clone(),
                    self.hooks.clone(),
                    task.options.step_timeout,
                    cancellation.clone(),
                    task.execution_id,
                    task.id,
                    IterationBudget::Shared(remaining.clone()),
                    log.clone(),
                    errors.clone(),
                    total_iterations.clone(),
                    None,
                ))
            })
            .collect();
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Re-evaluates the target active-VU count every 100ms, interpolating
    /// linearly within the current stage:
    /// `target = currentVUs + (stageTarget - currentVUs) * elapsed / stageDuration`.
    #[allow(clippy::too_many_arguments)]
    async fn run_ramping_vus(
        &self,
        task: &Task,
        start_vus: u32,
        stages: &[wf_core::RampStage],
        capacity: u32,
        pool: &Arc<VuPool>,
        workflow: &Arc<Workflow>,
        metrics: &Arc<MetricsAggregator>,
        cancellation: &CancellationToken,
        log: &Arc<ResultLog>,
        errors: &Arc<ErrorLog>,
        total_iterations: &Arc<AtomicU64>,
    ) {
        const TICK: Duration = Duration::from_millis(100);

        let should_run: Vec<Arc<AtomicBool>> = (0..capacity).map(|_| Arc::new(AtomicBool::new(false))).collect();
        let active: Vec<Arc<AtomicBool>> = (0..capacity).map(|_| Arc::new(AtomicBool::new(false))).collect();
        let mut handles: Vec<JoinHandle<()>> = Vec::new();

        let apply_target = |target: u32, handles: &mut Vec<JoinHandle<()>>| {
            for idx in 0..capacity {
                let want = idx < target;
                should_run[idx as usize].store(want, Ordering::SeqCst);
                if want && !active[idx as usize].swap(true, Ordering::SeqCst) {
                    let active_flag = active[idx as usize].clone();
                    let should_run_flag = should_run[idx as usize].clone();
                    let pool = pool.clone();
                    let workflow = workflow.clone();
                    let registry = self.registry.clone();
                    let metrics = metrics.clone();
                    let hooks = self.hooks.clone();
                    let cancellation = cancellation.clone();
                    let log = log.clone();
                    let errors = errors.clone();
                    let total_iterations = total_iterations.clone();
                    let step_timeout = task.options.step_timeout;
                    let execution_id = task.execution_id;
                    let task_id = task.id;
                    handles.push(tokio::spawn(async move {
                        vu_loop(
                            idx,
                            pool,
                            workflow,
                            registry,
                            metrics,
                            hooks,
                            step_timeout,
                            cancellation,
                            execution_id,
                            task_id,
                            IterationBudget::Unbounded,
                            log,
                            errors,
                            total_iterations,
                            Some(should_run_flag),
                        )
                        .await;
                        active_flag.store(false, Ordering::SeqCst);
                    }));
                }
            }
        };

        apply_target(start_vus.min(capacity), &mut handles);
        let mut current_target = start_vus.min(capacity);

        for stage in stages {
            if cancellation.is_cancelled() {
                break;
            }
            let stage_start = Instant::now();
            let from = current_target;
            let to = task.segment.apportion(stage.target).min(capacity);
            let stage_duration = stage.duration;

            loop {
                if cancellation.is_cancelled() {
                    break;
                }
                let elapsed = stage_start.elapsed();
                if elapsed >= stage_duration {
                    break;
                }
                let frac = if stage_duration.is_zero() {
                    1.0
                } else {
                    elapsed.as_secs_f64() / stage_duration.as_secs_f64()
                };
                let target_at_point = (from as f64 + (to as f64 - from as f64) * frac).round().clamp(0.0, capacity as f64) as u32;
                apply_target(target_at_point, &mut handles);
                tokio::time::sleep(TICK).await;
            }
            apply_target(to, &mut handles);
            current_target = to;
        }

        for flag in &should_run {
            flag.store(false, Ordering::SeqCst);
        }
        for handle in handles {
            let _ = handle.await;
        }
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! Step execution: the per-step contract and the pluggable executors that
//! carry it out.

use crate::cancel::CancellationToken;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};
use uuid::Uuid;
use wf_core::{OnError, Step, StepResult, StepStatus, VirtualUser, Workflow};
use wf_error::{WfError, WfErrorCode};
use wf_metrics::MetricsAggregator;

/// Per-iteration state handed to a [`StepExecutor`].
///
/// Cloneable and cheap: the VU handle is `Copy`, the token shares its inner
/// state, and variables are only cloned when a new iteration starts.
#[derive(Clone)]
pub struct ExecutionContext {
    /// Parent execution this task belongs to.
    pub execution_id: Uuid,
    /// The task being run.
    pub task_id: Uuid,
    /// The virtual user driving this iteration.
    pub vu: VirtualUser,
    /// Zero-based iteration number for this VU.
    pub iteration: u64,
    /// Iteration-scoped variables, seeded from the workflow and mutated by
    /// steps that extract values (e.g. a login token) for later steps.
    pub variables: BTreeMap<String, serde_json::Value>,
    /// Cooperative cancellation signal checked between steps.
    pub cancellation: CancellationToken,
}

/// Executes one step's action against external systems.
///
/// Implementations are registered into an [`ExecutorRegistry`] keyed by
/// [`Step::action`] and resolved at execution time.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Run the step, returning an opaque result value stored into the
    /// iteration's variables, or an error describing why it failed.
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        step: &Step,
    ) -> Result<serde_json::Value, WfError>;
}

/// Lookup table from [`Step::action`] to the executor that implements it.
#[derive(Default, Clone)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn StepExecutor>>,
}

impl ExecutorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor for the given action name, replacing any
    /// previous registration.
    pub fn register(&mut self, action: impl Into<String>, executor: Arc<dyn StepExecutor>) {
        self.executors.insert(action.into(), executor);
    }

    /// Look up the executor registered for `action`, if any.
    pub fn resolve(&self, action: &str) -> Option<Arc<dyn StepExecutor>> {
        self.executors.get(action).cloned()
    }

    /// Action names this registry can execute, for advertising worker
    /// capabilities at registration time.
    pub fn capabilities(&self) -> Vec<String> {
        self.executors.keys().cloned().collect()
    }
}

/// Lifecycle callbacks fired around step execution.
///
/// All methods are no-ops by default; implementors override only the
/// callbacks they care about (metrics export, SSE fan-out, etc).
#[async_trait]
pub trait EngineHooks: Send + Sync {
    /// Called immediately before a step begins, after the cancellation
    /// check passes.
    async fn on_step_start(&self, _ctx: &ExecutionContext, _step: &Step) {}
    /// Called after a step completes successfully.
    async fn on_step_complete(&self, _ctx: &ExecutionContext, _result: &StepResult) {}
    /// Called after a step fails, regardless of its `on_error` policy.
    async fn on_step_failed(&self, _ctx: &ExecutionContext, _result: &StepResult) {}
    /// Called once per completed iteration, for progress reporting.
    async fn on_progress(&self, _ctx: &ExecutionContext, _completed_iterations: u64) {}
}

/// An [`EngineHooks`] that does nothing; the default when no observer is
/// wired up.
pub struct NoopHooks;

#[async_trait]
impl EngineHooks for NoopHooks {}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Outcome of running every step of one iteration.
pub enum IterationOutcome {
    /// The iteration ran to completion (or stopped early via `on_error:
    /// abort`); the task should continue with its next iteration.
    Completed(Vec<StepResult>),
    /// The iteration was cut short by cancellation before it started.
    Cancelled(Vec<StepResult>),
}

impl IterationOutcome {
    /// The step results gathered regardless of how the iteration ended.
    pub fn into_results(self) -> Vec<StepResult> {
        match self {
            Self::Completed(r) | Self::Cancelled(r) => r,
        }
    }
}

/// Run a single step to completion, enforcing its timeout and isolating any
/// panic to this step's task rather than the whole engine.
///
/// Implements the per-step contract: cancellation check, start callback,
/// executor resolution, timeout enforcement, panic-safe execution, metrics
/// recording, and the complete/failed callback.
pub async fn run_step(
    ctx: &ExecutionContext,
    step: &Step,
    registry: &ExecutorRegistry,
    metrics: &MetricsAggregator,
    hooks: &dyn EngineHooks,
    default_timeout: Duration,
) -> StepResult {
    let timestamp_ms = now_ms();

    if ctx.cancellation.is_cancelled() {
        return StepResult {
            step_id: step.id.clone(),
            step_name: step.name.clone(),
            status: StepStatus::Failed,
            duration: Duration::ZERO,
            error: Some(WfErrorCode::TaskCancelled.to_string()),
            timestamp_ms,
            output: None,
            custom_metrics: BTreeMap::new(),
            logs: Vec::new(),
        };
    }

    hooks.on_step_start(ctx, step).await;

    let Some(executor) = registry.resolve(&step.action) else {
        warn!(action = %step.action, step = %step.name, "no executor registered for step action");
        let result = StepResult {
            step_id: step.id.clone(),
            step_name: step.name.clone(),
            status: StepStatus::Failed,
            duration: Duration::ZERO,
            error: Some(format!("no executor registered for action {:?}", step.action)),
            timestamp_ms,
            output: None,
            custom_metrics: BTreeMap::new(),
            logs: Vec::new(),
        };
        metrics.record(&step.name, 0, false);
        hooks.on_step_failed(ctx, &result).await;
        return result;
    };

    let timeout = step.timeout.unwrap_or(default_timeout);
    let started = Instant::now();

    let ctx_owned = ctx.clone();
    let step_owned = step.clone();
    let mut handle = tokio::spawn(async move { executor.execute(&ctx_owned, &step_owned).await });

    let (status, error, output) = match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(Ok(value))) => (StepStatus::Success, None, Some(value)),
        Ok(Ok(Err(err))) => (StepStatus::Failed, Some(err.message), None),
        Ok(Err(join_err)) if join_err.is_panic() => {
            (StepStatus::Failed, Some(WfErrorCode::EnginePanic.to_string()), None)
        }
        Ok(Err(join_err)) => (StepStatus::Failed, Some(join_err.to_string()), None),
        Err(_elapsed) => {
            handle.abort();
            (StepStatus::Timeout, Some(WfErrorCode::StepTimeout.to_string()), None)
        }
    };

    let duration = started.elapsed();
    let success = status == StepStatus::Success;
    metrics.record(&step.name, duration.as_micros() as u64, success);

    let result = StepResult {
        step_id: step.id.clone(),
        step_name: step.name.clone(),
        status,
        duration,
        error,
        timestamp_ms,
        output,
        custom_metrics: BTreeMap::new(),
        logs: Vec::new(),
    };

    if success {
        debug!(step = %step.name, duration_us = result.duration.as_micros() as u64, "step completed");
        hooks.on_step_complete(ctx, &result).await;
    } else {
        warn!(step = %step.name, error = ?result.error, "step failed");
        hooks.on_step_failed(ctx, &result).await;
    }
    result
}

/// Run every step of one iteration in order, honoring each step's
/// `on_error` policy and `think_time` pause.
pub async fn run_iteration(
    ctx: &ExecutionContext,
    workflow: &Workflow,
    registry: &ExecutorRegistry,
    metrics: &MetricsAggregator,
    hooks: &dyn EngineHooks,
    default_timeout: Duration,
) -> IterationOutcome {
    let mut results = Vec::with_capacity(workflow.steps.len());

    if ctx.cancellation.is_cancelled() {
        return IterationOutcome::Cancelled(results);
    }

    for step in &workflow.steps {
        if ctx.cancellation.is_cancelled() {
            return IterationOutcome::Cancelled(results);
        }

        let result = run_step(ctx, step, registry, metrics, hooks, default_timeout).await;
        let failed = result.is_failed();
        results.push(result);

        if failed {
            match step.on_error {
                OnError::Abort => return IterationOutcome::Completed(results),
                OnError::Continue => {}
                OnError::Skip => {
                    // Same control flow as `Continue`: the failure already
                    // recorded above is relabeled so it is never retried.
                    if let Some(last) = results.last_mut() {
                        last.status = StepStatus::Skipped;
                    }
                }
            }
        }

        if let Some(think) = step.think_time {
            tokio::time::sleep(think).await;
        }
    }

    IterationOutcome::Completed(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wf_core::VuState;

    struct AlwaysOk;
    #[async_trait]
    impl StepExecutor for AlwaysOk {
        async fn execute(&self, _ctx: &ExecutionContext, _step: &Step) -> Result<serde_json::Value, WfError> {
            Ok(serde_json::json!({"ok": true}))
        }
    }

    struct AlwaysFails;
    #[async_trait]
    impl StepExecutor for AlwaysFails {
        async fn execute(&self, _ctx: &ExecutionContext, _step: &Step) -> Result<serde_json::Value, WfError> {
            Err(WfError::new(WfErrorCode::StepFailure, "boom"))
        }
    }

    struct NeverReturns;
    #[async_trait]
    impl StepExecutor for NeverReturns {
        async fn execute(&self, _ctx: &ExecutionContext, _step: &Step) -> Result<serde_json::Value, WfError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(serde_json::Value::Null)
        }
    }

    struct CountingHooks {
        starts: AtomicUsize,
        completes: AtomicUsize,
        fails: AtomicUsize,
    }

    impl CountingHooks {
        fn new() -> Self {
            Self {
                starts: AtomicUsize::new(0),
                completes: AtomicUsize::new(0),
                fails: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl EngineHooks for CountingHooks {
        async fn on_step_start(&self, _ctx: &ExecutionContext, _step: &Step) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }
        async fn on_step_complete(&self, _ctx: &ExecutionContext, _result: &StepResult) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }
        async fn on_step_failed(&self, _ctx: &ExecutionContext, _result: &StepResult) {
            self.fails.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn sample_ctx() -> ExecutionContext {
        ExecutionContext {
            execution_id: Uuid::new_v4(),
            task_id: Uuid::new_v4(),
            vu: VirtualUser {
                id: Uuid::new_v4(),
                index: 0,
                state: VuState::Busy,
            },
            iteration: 0,
            variables: BTreeMap::new(),
            cancellation: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn unregistered_action_fails_without_panicking() {
        let ctx = sample_ctx();
        let step = Step::new("ghost", "no_such_action");
        let registry = ExecutorRegistry::new();
        let metrics = MetricsAggregator::new();
        let result = run_step(&ctx, &step, &registry, &metrics, &NoopHooks, Duration::from_secs(1)).await;
        assert!(result.is_failed());
    }

    #[tokio::test]
    async fn successful_step_records_metrics_and_fires_complete() {
        let ctx = sample_ctx();
        let step = Step::new("ping", "always_ok");
        let mut registry = ExecutorRegistry::new();
        registry.register("always_ok", Arc::new(AlwaysOk));
        let metrics = MetricsAggregator::new();
        let hooks = CountingHooks::new();
        let result = run_step(&ctx, &step, &registry, &metrics, &hooks, Duration::from_secs(1)).await;
        assert_eq!(result.status, StepStatus::Success);
        assert_eq!(result.output, Some(serde_json::json!({"ok": true})));
        assert_eq!(hooks.completes.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.snapshot().total_requests, 1);
    }

    #[tokio::test]
    async fn failing_executor_is_reported_not_panicked() {
        let ctx = sample_ctx();
        let step = Step::new("bad", "always_fails");
        let mut registry = ExecutorRegistry::new();
        registry.register("always_fails", Arc::new(AlwaysFails));
        let metrics = MetricsAggregator::new();
        let hooks = CountingHooks::new();
        let result = run_step(&ctx, &step, &registry, &metrics, &hooks, Duration::from_secs(1)).await;
        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("boom"));
        assert_eq!(hooks.fails.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_executor_is_cut_off_by_timeout() {
        let ctx = sample_ctx();
        let step = Step::new("slow", "never_returns");
        let mut registry = ExecutorRegistry::new();
        registry.register("never_returns", Arc::new(NeverReturns));
        let metrics = MetricsAggregator::new();
        let result = run_step(
            &ctx,
            &step,
            &registry,
            &metrics,
            &NoopHooks,
            Duration::from_millis(20),
        )
        .await;
        assert_eq!(result.status, StepStatus::Timeout);
        assert_eq!(result.error.as_deref(), Some(WfErrorCode::StepTimeout.to_string().as_str()));
    }

    #[tokio::test]
    async fn already_cancelled_context_short_circuits_iteration() {
        let mut ctx = sample_ctx();
        ctx.cancellation.cancel();
        let workflow = Workflow::new("noop", vec![Step::new("a", "always_ok")]);
        let mut registry = ExecutorRegistry::new();
        registry.register("always_ok", Arc::new(AlwaysOk));
        let metrics = MetricsAggregator::new();
        let outcome = run_iteration(&ctx, &workflow, &registry, &metrics, &NoopHooks, Duration::from_secs(1)).await;
        assert!(matches!(outcome, IterationOutcome::Cancelled(_)));
    }

    #[tokio::test]
    async fn on_error_continue_runs_every_step() {
        let ctx = sample_ctx();
        let mut first = Step::new("a", "always_fails");
        first.on_error = OnError::Continue;
        let second = Step::new("b", "always_ok");
        let workflow = Workflow::new("wf", vec![first, second]);
        let mut registry = ExecutorRegistry::new();
        registry.register("always_fails", Arc::new(AlwaysFails));
        registry.register("always_ok", Arc::new(AlwaysOk));
        let metrics = MetricsAggregator::new();
        let outcome = run_iteration(&ctx, &workflow, &registry, &metrics, &NoopHooks, Duration::from_secs(1)).await;
        let results = outcome.into_results();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn on_error_skip_continues_and_marks_result_skipped() {
        let ctx = sample_ctx();
        let mut first = Step::new("a", "always_fails");
        first.on_error = OnError::Skip;
        let second = Step::new("b", "always_ok");
        let workflow = Workflow::new("wf", vec![first, second]);
        let mut registry = ExecutorRegistry::new();
        registry.register("always_fails", Arc::new(AlwaysFails));
        registry.register("always_ok", Arc::new(AlwaysOk));
        let metrics = MetricsAggregator::new();
        let outcome = run_iteration(&ctx, &workflow, &registry, &metrics, &NoopHooks, Duration::from_secs(1)).await;
        let results = outcome.into_results();
        assert_eq!(results.len(), 2, "skip proceeds to the next step, unlike abort");
        assert_eq!(results[0].status, StepStatus::Skipped);
        assert_eq!(results[0].error.as_deref(), Some("boom"), "the underlying failure is still recorded for diagnosis");
        assert_eq!(results[1].status, StepStatus::Success);
    }

    #[tokio::test]
    async fn on_error_abort_stops_after_first_failure() {
        let ctx = sample_ctx();
        let mut first = Step::new("a", "always_fails");
        first.on_error = OnError::Abort;
        let second = Step::new("b", "always_ok");
        let workflow = Workflow::new("wf", vec![first, second]);
        let mut registry = ExecutorRegistry::new();
        registry.register("always_fails", Arc::new(AlwaysFails));
        registry.register("always_ok", Arc::new(AlwaysOk));
        let metrics = MetricsAggregator::new();
        let outcome = run_iteration(&ctx, &workflow, &registry, &metrics, &NoopHooks, Duration::from_secs(1)).await;
        assert!(matches!(outcome, IterationOutcome::Completed(_)));
        assert_eq!(outcome.into_results().len(), 1);
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Per-session SSE event pipeline: filtering, transformation, recording,
//! and multiplexing for the streaming dispatch front-end.
//!
//! One [`StreamEvent`] is produced per driver callback and per worker
//! `MetricsReport`/`TaskUpdate`. [`SessionEventStream`] wraps the
//! `mpsc::Receiver` a session's writer task drains; [`StreamEvent::to_sse`]
//! renders the `event: <name>\ndata: <json>\n\n` wire form named in the
//! event-stream external interface. The channel is bounded and unbuffered
//! beyond its capacity: back-pressure blocks the emitting side rather than
//! dropping events, matching the "writer drops nothing" rule.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::error;
use uuid::Uuid;

use wf_core::{Metrics, SessionStatus, StepResult, TaskResult};

// ---------------------------------------------------------------------------
// StreamEvent
// ---------------------------------------------------------------------------

/// One record emitted onto a session's event stream.
///
/// Variant names map 1:1 to the wire `event:` names: `connected`,
/// `step-start`, `step-progress`, `step-complete`, `step-failed`, `log`,
/// `interaction`, `error`, `metrics`, `summary`, `complete`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum StreamEvent {
    /// Sent once, immediately after the stream opens.
    Connected {
        /// Session this stream belongs to.
        session_id: Uuid,
    },
    /// A step began executing.
    StepStart {
        /// Name of the step, matching [`wf_core::Step::name`].
        step_name: String,
        /// When the step started, milliseconds since the Unix epoch.
        timestamp_ms: i64,
    },
    /// Mid-step progress, e.g. iteration count for a loop step.
    StepProgress {
        /// Name of the step reporting progress.
        step_name: String,
        /// Free-form progress detail (iteration number, percent, message).
        detail: serde_json::Value,
    },
    /// A step finished successfully.
    StepComplete {
        /// The step's result.
        result: StepResult,
    },
    /// A step finished unsuccessfully.
    StepFailed {
        /// The step's result (`success: false`).
        result: StepResult,
    },
    /// A retained console/assertion log line.
    Log {
        /// Step the log line belongs to.
        step_name: String,
        /// Log message text.
        message: String,
        /// Milliseconds since the Unix epoch.
        timestamp_ms: i64,
    },
    /// A step is parked waiting for an operator response.
    Interaction {
        /// Correlates this prompt to the eventual `InteractionResponse`.
        correlation_id: Uuid,
        /// Step-supplied prompt payload (shape defined by the step).
        prompt: serde_json::Value,
    },
    /// A non-fatal error surfaced mid-execution.
    Error {
        /// Human-readable message.
        message: String,
        /// Stable machine-readable code, when available.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
    /// A metrics snapshot for the in-flight task.
    Metrics {
        /// Aggregated metrics as of this report.
        snapshot: Metrics,
    },
    /// The task's final aggregated result.
    Summary {
        /// The completed (or failed/cancelled) task result.
        result: TaskResult,
    },
    /// Terminal event; the stream closes immediately after this is sent.
    Complete {
        /// Final session status.
        status: SessionStatus,
    },
}

impl StreamEvent {
    /// Render as a newline-delimited SSE record: `event: <name>\ndata:
    /// <json>\n\n`.
    ///
    /// # Errors
    ///
    /// Returns a `serde_json::Error` if the payload cannot be serialized
    /// (only possible for a hand-built `serde_json::Value` containing
    /// non-finite floats).
    pub fn to_sse(&self) -> Result<String, serde_json::Error> {
        let name = self.kind_name();
        let data = serde_json::to_value(self)?;
        let payload = data.get("data").cloned().unwrap_or(serde_json::Value::Null);
        Ok(format!("event: {name}\ndata: {}\n\n", serde_json::to_string(&payload)?))
    }

    /// The wire `event:` name for this record.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::StepStart { .. } => "step-start",
            Self::StepProgress { .. } => "step-progress",
            Self::StepComplete { .. } => "step-complete",
            Self::StepFailed { .. } => "step-failed",
            Self::Log { .. } => "log",
            Self::Interaction { .. } => "interaction",
            Self::Error { .. } => "error",
            Self::Metrics { .. } => "metrics",
            Self::Summary { .. } => "summary",
            Self::Complete { .. } => "complete",
        }
    }

    /// Whether this event is the stream's terminator.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. })
    }
}

// ---------------------------------------------------------------------------
// EventFilter
// ---------------------------------------------------------------------------

/// Filters events by wire kind name or a custom predicate.
#[derive(Clone)]
pub struct EventFilter {
    predicate: Arc<dyn Fn(&StreamEvent) -> bool + Send + Sync>,
}

impl std::fmt::Debug for EventFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventFilter").finish_non_exhaustive()
    }
}

impl EventFilter {
    /// Create a filter from a custom predicate.
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&StreamEvent) -> bool + Send + Sync + 'static,
    {
        Self { predicate: Arc::new(predicate) }
    }

    /// Filter events by their wire kind name (e.g. `"step-complete"`).
    pub fn by_kind(kind_name: &str) -> Self {
        let kind_name = kind_name.to_string();
        Self::new(move |ev| ev.kind_name() == kind_name)
    }

    /// Filter to allow only error events.
    pub fn errors_only() -> Self {
        Self::new(|ev| matches!(ev, StreamEvent::Error { .. }))
    }

    /// Filter to exclude error events.
    pub fn exclude_errors() -> Self {
        Self::new(|ev| !matches!(ev, StreamEvent::Error { .. }))
    }

    /// Returns `true` if the event passes the filter.
    pub fn matches(&self, event: &StreamEvent) -> bool {
        (self.predicate)(event)
    }
}

// ---------------------------------------------------------------------------
// EventTransform
// ---------------------------------------------------------------------------

/// Transforms events in-flight.
#[derive(Clone)]
pub struct EventTransform {
    transform: Arc<dyn Fn(StreamEvent) -> StreamEvent + Send + Sync>,
}

impl std::fmt::Debug for EventTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventTransform").finish_non_exhaustive()
    }
}

impl EventTransform {
    /// Create a transform from a closure.
    pub fn new<F>(transform: F) -> Self
    where
        F: Fn(StreamEvent) -> StreamEvent + Send + Sync + 'static,
    {
        Self { transform: Arc::new(transform) }
    }

    /// Identity transform — passes events through unchanged.
    pub fn identity() -> Self {
        Self::new(|ev| ev)
    }

    /// Apply the transform to an event.
    pub fn apply(&self, event: StreamEvent) -> StreamEvent {
        (self.transform)(event)
    }
}

// ---------------------------------------------------------------------------
// EventRecorder
// ---------------------------------------------------------------------------

/// Records all events for later replay or inspection (e.g. a reconnecting
/// subscriber that missed the `connected` event).
#[derive(Debug, Clone, Default)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<StreamEvent>>>,
}

impl EventRecorder {
    /// Create a new empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event.
    pub fn record(&self, event: &StreamEvent) {
        self.events.lock().expect("recorder lock poisoned").push(event.clone());
    }

    /// Return a snapshot of all recorded events.
    pub fn events(&self) -> Vec<StreamEvent> {
        self.events.lock().expect("recorder lock poisoned").clone()
    }

    /// Number of recorded events.
    pub fn len(&self) -> usize {
        self.events.lock().expect("recorder lock poisoned").len()
    }

    /// Whether no events have been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear all recorded events.
    pub fn clear(&self) {
        self.events.lock().expect("recorder lock poisoned").clear();
    }
}

// ---------------------------------------------------------------------------
// EventStats
// ---------------------------------------------------------------------------

/// Tracks event statistics for a session: count by kind, error count.
#[derive(Debug, Clone, Default)]
pub struct EventStats {
    inner: Arc<Mutex<StatsInner>>,
}

#[derive(Debug, Default)]
struct StatsInner {
    counts: HashMap<String, u64>,
    total_events: u64,
    error_count: u64,
}

impl EventStats {
    /// Create a new empty stats tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event's statistics.
    pub fn observe(&self, event: &StreamEvent) {
        let mut inner = self.inner.lock().expect("stats lock poisoned");
        let name = event.kind_name().to_string();
        *inner.counts.entry(name).or_insert(0) += 1;
        inner.total_events += 1;
        if matches!(event, StreamEvent::Error { .. } | StreamEvent::StepFailed { .. }) {
            inner.error_count += 1;
        }
    }

    /// Total number of events observed.
    pub fn total_events(&self) -> u64 {
        self.inner.lock().expect("stats lock poisoned").total_events
    }

    /// Count of events for a given kind name.
    pub fn count_for(&self, kind_name: &str) -> u64 {
        self.inner.lock().expect("stats lock poisoned").counts.get(kind_name).copied().unwrap_or(0)
    }

    /// Number of error/step-failed events observed.
    pub fn error_count(&self) -> u64 {
        self.inner.lock().expect("stats lock poisoned").error_count
    }

    /// Return a snapshot of per-kind counts.
    pub fn kind_counts(&self) -> HashMap<String, u64> {
        self.inner.lock().expect("stats lock poisoned").counts.clone()
    }

    /// Reset all statistics.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().expect("stats lock poisoned");
        inner.counts.clear();
        inner.total_events = 0;
        inner.error_count = 0;
    }
}

// ---------------------------------------------------------------------------
// SessionEventStream
// ---------------------------------------------------------------------------

/// Wrapper around `mpsc::Receiver<StreamEvent>` for one session's writer
/// task.
///
/// The writer is the single serialized consumer of this stream; nothing
/// else may drain it, matching the "no reentrancy" rule on the streaming
/// surface.
pub struct SessionEventStream {
    rx: mpsc::Receiver<StreamEvent>,
}

impl SessionEventStream {
    /// Wrap an existing receiver.
    pub fn new(rx: mpsc::Receiver<StreamEvent>) -> Self {
        Self { rx }
    }

    /// Receive the next event, returning `None` when the channel closes.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    /// Collect all remaining events into a vec (consumes the stream).
    pub async fn collect_all(mut self) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        while let Some(ev) = self.rx.recv().await {
            out.push(ev);
        }
        out
    }

    /// Collect events that pass the given filter.
    pub async fn collect_filtered(mut self, filter: &EventFilter) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        while let Some(ev) = self.rx.recv().await {
            if filter.matches(&ev) {
                out.push(ev);
            }
        }
        out
    }

    /// Consume the stream, forwarding events through a pipeline until the
    /// pipeline's filters drop an event, the source closes, or a
    /// [`StreamEvent::Complete`] is forwarded (after which the loop stops,
    /// closing the connection).
    ///
    /// A panic inside `pipeline.process` is caught so a single malformed
    /// event closes this session's connection instead of taking the
    /// process down.
    pub async fn pipe(mut self, pipeline: &StreamPipeline, tx: mpsc::Sender<StreamEvent>) {
        while let Some(ev) = self.rx.recv().await {
            let processed = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| pipeline.process(ev)));
            let ev = match processed {
                Ok(Some(ev)) => ev,
                Ok(None) => continue,
                Err(_) => {
                    error!("stream pipeline panicked while processing an event; closing connection");
                    break;
                }
            };
            let terminal = ev.is_terminal();
            if tx.send(ev).await.is_err() || terminal {
                break;
            }
        }
    }

    /// Return the inner receiver.
    pub fn into_inner(self) -> mpsc::Receiver<StreamEvent> {
        self.rx
    }
}

// ---------------------------------------------------------------------------
// StreamPipeline
// ---------------------------------------------------------------------------

/// A composed pipeline of filters, transforms, recording, and statistics,
/// run per-session between the engine's callbacks and the SSE writer.
#[derive(Debug, Clone, Default)]
pub struct StreamPipeline {
    filters: Vec<EventFilter>,
    transforms: Vec<EventTransform>,
    recorder: Option<EventRecorder>,
    stats: Option<EventStats>,
}

impl StreamPipeline {
    /// Create an empty pipeline (pass-through).
    pub fn new() -> Self {
        Self::default()
    }

    /// Process a single event through the pipeline.
    ///
    /// Returns `None` if the event was filtered out. A `Complete` event is
    /// never filtered, so the stream always gets a chance to close cleanly.
    pub fn process(&self, mut event: StreamEvent) -> Option<StreamEvent> {
        if !event.is_terminal() {
            for f in &self.filters {
                if !f.matches(&event) {
                    return None;
                }
            }
        }

        for t in &self.transforms {
            event = t.apply(event);
        }

        if let Some(ref stats) = self.stats {
            stats.observe(&event);
        }
        if let Some(ref recorder) = self.recorder {
            recorder.record(&event);
        }

        Some(event)
    }

    /// Return the pipeline's recorder, if any.
    pub fn recorder(&self) -> Option<&EventRecorder> {
        self.recorder.as_ref()
    }

    /// Return the pipeline's stats tracker, if any.
    pub fn stats(&self) -> Option<&EventStats> {
        self.stats.as_ref()
    }
}

// ---------------------------------------------------------------------------
// StreamPipelineBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`StreamPipeline`].
#[derive(Debug, Default)]
pub struct StreamPipelineBuilder {
    filters: Vec<EventFilter>,
    transforms: Vec<EventTransform>,
    recorder: Option<EventRecorder>,
    stats: Option<EventStats>,
}

impl StreamPipelineBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter stage.
    pub fn filter(mut self, filter: EventFilter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Add a transform stage.
    pub fn transform(mut self, transform: EventTransform) -> Self {
        self.transforms.push(transform);
        self
    }

    /// Enable recording.
    pub fn record(mut self) -> Self {
        self.recorder = Some(EventRecorder::new());
        self
    }

    /// Attach an external recorder.
    pub fn with_recorder(mut self, recorder: EventRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Attach an external stats tracker.
    pub fn with_stats(mut self, stats: EventStats) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Build the pipeline.
    pub fn build(self) -> StreamPipeline {
        StreamPipeline {
            filters: self.filters,
            transforms: self.transforms,
            recorder: self.recorder,
            stats: self.stats,
        }
    }
}

// ---------------------------------------------------------------------------
// EventMultiplexer
// ---------------------------------------------------------------------------

/// Fans multiple per-worker or per-step event sources into one ordered
/// stream, for a session whose task was split across several VUs or a
/// composite step with concurrent children.
pub struct EventMultiplexer {
    receivers: Vec<mpsc::Receiver<StreamEvent>>,
}

impl EventMultiplexer {
    /// Create a new multiplexer from multiple receivers.
    pub fn new(receivers: Vec<mpsc::Receiver<StreamEvent>>) -> Self {
        Self { receivers }
    }

    /// Drain all sources to completion and return their events in arrival
    /// order per-source, concatenated source by source.
    ///
    /// Stream events don't carry a shared timestamp the way engine-internal
    /// events do, so ordering here is simply "exhaust each source in turn";
    /// callers that need true interleaving should use [`Self::merge`].
    pub async fn collect_all(self) -> Vec<StreamEvent> {
        let mut all = Vec::new();
        for mut rx in self.receivers {
            while let Some(ev) = rx.recv().await {
                all.push(ev);
            }
        }
        all
    }

    /// Merge streams into a single output channel, forwarding events as
    /// they arrive from any source (first-ready-wins).
    ///
    /// Returns the receiving end of the merged stream.
    pub fn merge(self, buffer: usize) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(buffer);
        let mut receivers = self.receivers;

        tokio::spawn(async move {
            loop {
                if receivers.is_empty() {
                    break;
                }
                let mut dead = Vec::new();
                let mut delivered = false;
                for (idx, r) in receivers.iter_mut().enumerate() {
                    match r.try_recv() {
                        Ok(ev) => {
                            delivered = true;
                            if tx.send(ev).await.is_err() {
                                return;
                            }
                        }
                        Err(mpsc::error::TryRecvError::Disconnected) => dead.push(idx),
                        Err(mpsc::error::TryRecvError::Empty) => {}
                    }
                }
                for idx in dead.into_iter().rev() {
                    receivers.remove(idx);
                }
                if !delivered && !receivers.is_empty() {
                    tokio::task::yield_now().await;
                }
            }
        });

        rx
    }
}

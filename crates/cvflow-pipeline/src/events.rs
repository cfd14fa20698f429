//! Run event stream for observers.
//!
//! The scheduler publishes [`RunEvent`]s through an [`EventEmitter`]; the caller
//! consumes them from the paired [`EventStream`]. The channel is unbounded so a
//! slow observer never loses events and never blocks a step.
//!
//! Per run the stream is `run-started`, then `step-started` / `step-progress` /
//! `step-finished` for each executed step, then exactly one of `run-error` or
//! `run-finished`. Once a terminal event is out the emitter is sealed. A step
//! that fails contributes only its `step-started`.

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use cvflow_types::StepId;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    RunStarted,
    StepStarted,
    StepProgress,
    StepFinished,
    RunError,
    RunFinished,
}

impl EventKind {
    pub fn is_terminal(self) -> bool {
        matches!(self, EventKind::RunError | EventKind::RunFinished)
    }
}

/// One observable occurrence during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    pub run_id: Uuid,
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<StepId>,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl RunEvent {
    fn base(run_id: Uuid, kind: EventKind, step: Option<StepId>, label: impl Into<String>) -> Self {
        Self {
            run_id,
            kind,
            step,
            label: label.into(),
            payload: None,
            message: None,
            timestamp: Utc::now(),
        }
    }

    pub fn run_started(run_id: Uuid) -> Self {
        Self::base(run_id, EventKind::RunStarted, None, "Screening started")
    }

    pub fn step_started(run_id: Uuid, step: StepId) -> Self {
        Self::base(run_id, EventKind::StepStarted, Some(step), step.label())
    }

    pub fn step_progress(
        run_id: Uuid,
        step: StepId,
        message: impl Into<String>,
        payload: Option<serde_json::Value>,
    ) -> Self {
        Self {
            payload,
            message: Some(message.into()),
            ..Self::base(run_id, EventKind::StepProgress, Some(step), step.label())
        }
    }

    pub fn step_finished(run_id: Uuid, step: StepId, payload: serde_json::Value) -> Self {
        Self {
            payload: Some(payload),
            ..Self::base(run_id, EventKind::StepFinished, Some(step), step.label())
        }
    }

    pub fn run_error(run_id: Uuid, step: Option<StepId>, message: impl Into<String>) -> Self {
        let label = step.map_or("Screening failed", StepId::label);
        Self {
            message: Some(message.into()),
            ..Self::base(run_id, EventKind::RunError, step, label)
        }
    }

    pub fn run_finished(run_id: Uuid, payload: serde_json::Value) -> Self {
        Self {
            payload: Some(payload),
            ..Self::base(run_id, EventKind::RunFinished, None, "Screening finished")
        }
    }
}

// ---------------------------------------------------------------------------
// EventEmitter
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct EmitterState {
    /// Set once the run has failed; step-level events are dropped from then on.
    failed: bool,
    /// Set after the terminal event; everything is dropped from then on.
    sealed: bool,
}

/// Sending half of a run's event channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    sender: mpsc::UnboundedSender<RunEvent>,
    state: Arc<Mutex<EmitterState>>,
}

impl EventEmitter {
    /// Create an emitter and the stream its events arrive on.
    pub fn channel() -> (Self, EventStream) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let emitter = Self {
            sender,
            state: Arc::new(Mutex::new(EmitterState::default())),
        };
        (emitter, EventStream { receiver })
    }

    /// Emit an event.
    ///
    /// Dropped silently when the stream has been closed, when the emitter is
    /// sealed, or when it is a step event arriving after the run failed.
    pub fn emit(&self, event: RunEvent) {
        {
            let mut state = match self.state.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if state.sealed {
                tracing::debug!(kind = ?event.kind, "Event dropped after terminal event");
                return;
            }
            let step_event = matches!(
                event.kind,
                EventKind::StepStarted | EventKind::StepProgress | EventKind::StepFinished
            );
            if state.failed && step_event {
                tracing::debug!(kind = ?event.kind, step = ?event.step, "Step event dropped after run error");
                return;
            }
            if event.kind.is_terminal() {
                state.sealed = true;
            }
        }
        let _ = self.sender.send(event);
    }

    /// Suppress further step-level events. Terminal events still go through.
    pub fn mark_failed(&self) {
        match self.state.lock() {
            Ok(mut guard) => guard.failed = true,
            Err(poisoned) => poisoned.into_inner().failed = true,
        }
    }
}

/// Per-step handle for progress reporting, bound to one run and one step.
///
/// Progress is held back until the step settles: the scheduler publishes it
/// right before `step-finished` when the step succeeds and discards it when
/// the step fails, so a failing step leaves only `step-started` on the stream.
#[derive(Debug, Clone)]
pub struct StepEvents {
    emitter: EventEmitter,
    run_id: Uuid,
    step: StepId,
    pending: Arc<Mutex<Vec<RunEvent>>>,
}

impl StepEvents {
    pub fn new(emitter: EventEmitter, run_id: Uuid, step: StepId) -> Self {
        Self {
            emitter,
            run_id,
            step,
            pending: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn step(&self) -> StepId {
        self.step
    }

    pub fn progress(&self, message: impl Into<String>) {
        self.push(RunEvent::step_progress(self.run_id, self.step, message, None));
    }

    pub fn progress_with(&self, message: impl Into<String>, payload: serde_json::Value) {
        self.push(RunEvent::step_progress(
            self.run_id,
            self.step,
            message,
            Some(payload),
        ));
    }

    /// Number of progress events held back so far.
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    /// Publish every held-back progress event in the order it was reported.
    pub fn flush(&self) {
        let events = std::mem::take(&mut *self.lock());
        for event in events {
            self.emitter.emit(event);
        }
    }

    /// Drop every held-back progress event. Returns how many were dropped.
    pub fn discard(&self) -> usize {
        let dropped = std::mem::take(&mut *self.lock()).len();
        if dropped > 0 {
            tracing::debug!(step = %self.step, dropped, "Progress of failed step discarded");
        }
        dropped
    }

    fn push(&self, event: RunEvent) {
        self.lock().push(event);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<RunEvent>> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

// ---------------------------------------------------------------------------
// EventStream
// ---------------------------------------------------------------------------

/// Receiving half of a run's event channel.
#[derive(Debug)]
pub struct EventStream {
    receiver: mpsc::UnboundedReceiver<RunEvent>,
}

impl EventStream {
    /// Wait for the next event. `None` once every emitter is gone.
    pub async fn recv(&mut self) -> Option<RunEvent> {
        self.receiver.recv().await
    }

    /// Take every event already buffered without waiting.
    pub fn collect_remaining(&mut self) -> Vec<RunEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }
}

impl tokio_stream::Stream for EventStream {
    type Item = RunEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<RunEvent>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

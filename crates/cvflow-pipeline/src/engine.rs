//! Screening executor: the scheduling loop over the workflow graph.
//!
//! Steps run as tokio tasks against an immutable snapshot of the record.
//! Completions are handled one at a time in completion order: the update is
//! merged, the step's router picks successors, and any step whose activated
//! predecessors have all settled is spawned. The first failure stops all
//! further scheduling; in-flight steps are drained and the error step closes
//! the run.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use cvflow_types::{CvflowError, ProcessingRecord, RecordUpdate, Result, StepId};

use crate::events::{EventEmitter, RunEvent, StepEvents};
use crate::graph::Workflow;
use crate::step::StepRegistry;
use crate::validation::validate_or_raise;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Pending,
    Running,
    Completed,
    Errored,
}

impl StepState {
    pub fn is_settled(self) -> bool {
        matches!(self, StepState::Completed | StepState::Errored)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Finished,
    /// Carries the message of the error that stopped the run.
    Failed(String),
}

/// The result of one screening run.
#[derive(Debug)]
pub struct RunReport {
    pub record: ProcessingRecord,
    pub step_states: BTreeMap<StepId, StepState>,
    /// Steps whose update was merged, in completion order.
    pub executed: Vec<StepId>,
    pub outcome: RunOutcome,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.outcome == RunOutcome::Finished
    }

    pub fn state(&self, step: StepId) -> Option<StepState> {
        self.step_states.get(&step).copied()
    }
}

/// Drives a [`Workflow`] using the steps in a [`StepRegistry`].
pub struct ScreeningExecutor {
    registry: StepRegistry,
    workflow: Workflow,
}

type StepResult = (StepId, Result<RecordUpdate>);

/// Mutable bookkeeping for one run.
struct RunState {
    record: Arc<ProcessingRecord>,
    states: BTreeMap<StepId, StepState>,
    /// Activated steps waiting for their predecessors, in activation order.
    pending: Vec<StepId>,
    executed: Vec<StepId>,
    started_at: HashMap<StepId, Instant>,
    /// Progress handles of running steps, published only if the step succeeds.
    progress: HashMap<StepId, StepEvents>,
    /// First failure: the failing step and its message.
    failure: Option<(StepId, String)>,
}

impl RunState {
    fn new(record: ProcessingRecord, entry: StepId) -> Self {
        Self {
            record: Arc::new(record),
            states: BTreeMap::from([(entry, StepState::Pending)]),
            pending: vec![entry],
            executed: Vec::new(),
            started_at: HashMap::new(),
            progress: HashMap::new(),
            failure: None,
        }
    }

    fn run_id(&self) -> uuid::Uuid {
        self.record.run_id()
    }

    /// Remove and return every pending step whose activated predecessors have settled.
    fn take_ready(&mut self, workflow: &Workflow) -> Vec<StepId> {
        let states = &self.states;
        let (ready, waiting): (Vec<StepId>, Vec<StepId>) =
            self.pending.iter().partition(|step| {
                workflow
                    .predecessors(**step)
                    .iter()
                    .all(|p| states.get(p).map_or(true, |s| s.is_settled()))
            });
        self.pending = waiting;
        ready
    }
}

// ---------------------------------------------------------------------------
// ScreeningExecutor
// ---------------------------------------------------------------------------

impl ScreeningExecutor {
    pub fn new(registry: StepRegistry, workflow: Workflow) -> Self {
        Self { registry, workflow }
    }

    /// Executor for the standard screening workflow.
    pub fn screening(registry: StepRegistry) -> Self {
        Self::new(registry, Workflow::screening())
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    fn check_registry(&self) -> Result<()> {
        let missing: Vec<String> = self
            .workflow
            .steps()
            .filter(|step| !self.registry.has(*step))
            .map(|step| step.to_string())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(CvflowError::WorkflowInvalid(format!(
                "no step registered for: {}",
                missing.join(", ")
            )))
        }
    }

    /// Run the workflow over `record`, publishing progress on `emitter`.
    ///
    /// Returns `Err` only when the workflow itself is unusable. Step failures
    /// end the run through the error step and come back as
    /// [`RunOutcome::Failed`].
    pub async fn run(&self, record: ProcessingRecord, emitter: &EventEmitter) -> Result<RunReport> {
        validate_or_raise(&self.workflow)?;
        self.check_registry()?;

        let mut run = RunState::new(record, self.workflow.entry());
        let run_id = run.run_id();
        let mut tasks: JoinSet<StepResult> = JoinSet::new();

        tracing::info!(run_id = %run_id, workflow = %self.workflow.name, "Screening run started");
        emitter.emit(RunEvent::run_started(run_id));

        loop {
            if run.failure.is_none() {
                for step in run.take_ready(&self.workflow) {
                    self.spawn_step(&mut tasks, &mut run, step, emitter);
                }
            }
            let Some(joined) = tasks.join_next().await else {
                break;
            };
            let (step, result) = joined.map_err(|e| CvflowError::Task(e.to_string()))?;
            self.complete_step(&mut run, step, result, emitter);
        }

        if run.failure.is_none() {
            if let Some(&stuck) = run.pending.first() {
                let waiting: Vec<String> = run.pending.iter().map(|s| s.to_string()).collect();
                let err = CvflowError::Routing {
                    from: stuck.to_string(),
                    message: format!("steps never became ready: {}", waiting.join(", ")),
                };
                self.record_failure(&mut run, stuck, err, emitter);
            }
        }

        let outcome = match run.failure.clone() {
            Some((failed_step, message)) => {
                self.run_error_step(&mut run, emitter).await;
                tracing::error!(run_id = %run_id, step = %failed_step, error = %message, "Screening run failed");
                emitter.emit(RunEvent::run_error(run_id, Some(failed_step), message.clone()));
                RunOutcome::Failed(message)
            }
            None => {
                let payload = serde_json::json!({
                    "final_assessment": run.record.final_assessment(),
                    "proceed_to_interview": run.record.proceed_to_interview(),
                    "executed": run.executed,
                });
                tracing::info!(run_id = %run_id, steps = run.executed.len(), "Screening run finished");
                emitter.emit(RunEvent::run_finished(run_id, payload));
                RunOutcome::Finished
            }
        };

        let record = Arc::try_unwrap(run.record).unwrap_or_else(|shared| (*shared).clone());
        Ok(RunReport {
            record,
            step_states: run.states,
            executed: run.executed,
            outcome,
        })
    }

    fn spawn_step(
        &self,
        tasks: &mut JoinSet<StepResult>,
        run: &mut RunState,
        step: StepId,
        emitter: &EventEmitter,
    ) {
        let Some(handler) = self.registry.get(step) else {
            let err = CvflowError::Routing {
                from: step.to_string(),
                message: "no step registered".into(),
            };
            self.record_failure(run, step, err, emitter);
            return;
        };

        let run_id = run.run_id();
        run.states.insert(step, StepState::Running);
        run.started_at.insert(step, Instant::now());
        tracing::info!(run_id = %run_id, step = %step, "Step started");
        emitter.emit(RunEvent::step_started(run_id, step));

        let snapshot = Arc::clone(&run.record);
        let events = StepEvents::new(emitter.clone(), run_id, step);
        run.progress.insert(step, events.clone());
        tasks.spawn(async move {
            // The inner task isolates panics so the step id survives them.
            let joined = tokio::spawn(async move { handler.run(&snapshot, &events).await }).await;
            let result = joined
                .unwrap_or_else(|e| Err(CvflowError::Task(format!("step '{step}' did not complete: {e}"))));
            (step, result)
        });
    }

    fn complete_step(
        &self,
        run: &mut RunState,
        step: StepId,
        result: Result<RecordUpdate>,
        emitter: &EventEmitter,
    ) {
        let elapsed_ms = run
            .started_at
            .remove(&step)
            .map_or(0, |t| t.elapsed().as_millis() as u64);
        let progress = run.progress.remove(&step);

        if run.failure.is_some() {
            // Drained after the run already failed: nothing from it is kept.
            if let Some(progress) = &progress {
                progress.discard();
            }
            match result {
                Ok(_) => {
                    tracing::debug!(step = %step, elapsed_ms, "Discarding update of step drained after failure");
                    run.states.insert(step, StepState::Completed);
                }
                Err(err) => self.record_failure(run, step, err, emitter),
            }
            return;
        }

        let settled = result.and_then(|update| self.apply_update(run, step, update));
        let (payload, successors) = match settled {
            Ok(settled) => settled,
            Err(err) => {
                if let Some(progress) = &progress {
                    progress.discard();
                }
                return self.record_failure(run, step, err, emitter);
            }
        };

        run.states.insert(step, StepState::Completed);
        run.executed.push(step);
        tracing::info!(step = %step, elapsed_ms, "Step finished");
        if let Some(progress) = &progress {
            progress.flush();
        }
        emitter.emit(RunEvent::step_finished(run.run_id(), step, payload));

        for next in successors {
            if !run.states.contains_key(&next) {
                tracing::debug!(from = %step, to = %next, "Step activated");
                run.states.insert(next, StepState::Pending);
                run.pending.push(next);
            }
        }
    }

    /// Merge `update` and pick the successors. Returns the step-finished payload with them.
    fn apply_update(
        &self,
        run: &mut RunState,
        step: StepId,
        update: RecordUpdate,
    ) -> Result<(serde_json::Value, Vec<StepId>)> {
        let payload = update.payload();
        Arc::make_mut(&mut run.record).merge(step, update)?;
        let successors = self.successors(run, step)?;
        Ok((payload, successors))
    }

    /// Consult `step`'s router and check every target against the declared edges.
    fn successors(&self, run: &RunState, step: StepId) -> Result<Vec<StepId>> {
        let router = self.workflow.router(step).ok_or_else(|| CvflowError::Routing {
            from: step.to_string(),
            message: "no router".into(),
        })?;
        let mut successors = Vec::new();
        for next in router(&run.record).targets() {
            if next == self.workflow.error_step() {
                if !run.record.has_error() {
                    return Err(CvflowError::Routing {
                        from: step.to_string(),
                        message: "routed to the error step without an error".into(),
                    });
                }
                continue;
            }
            if !self.workflow.has_edge(step, next) {
                return Err(CvflowError::Routing {
                    from: step.to_string(),
                    message: format!("'{next}' is not a declared successor"),
                });
            }
            successors.push(next);
        }
        Ok(successors)
    }

    fn record_failure(&self, run: &mut RunState, step: StepId, err: CvflowError, emitter: &EventEmitter) {
        run.states.insert(step, StepState::Errored);
        let message = err.to_string();
        let first = Arc::make_mut(&mut run.record).fail(step, message.clone());
        if first {
            tracing::warn!(step = %step, category = err.category(), error = %message, "Step failed, aborting run");
            run.failure = Some((step, message));
            emitter.mark_failed();
        } else {
            tracing::warn!(step = %step, category = err.category(), error = %message, "Step failed after run error");
        }
    }

    async fn run_error_step(&self, run: &mut RunState, emitter: &EventEmitter) {
        let error_step = self.workflow.error_step();
        let Some(handler) = self.registry.get(error_step) else {
            return;
        };
        run.states.insert(error_step, StepState::Running);
        let events = StepEvents::new(emitter.clone(), run.run_id(), error_step);
        let snapshot = Arc::clone(&run.record);
        let result = handler.run(&snapshot, &events).await;
        drop(snapshot);

        let merged = result.and_then(|update| Arc::make_mut(&mut run.record).merge(error_step, update));
        match merged {
            Ok(()) => {
                run.states.insert(error_step, StepState::Completed);
                run.executed.push(error_step);
            }
            Err(err) => {
                tracing::error!(step = %error_step, error = %err, "Error step failed");
                run.states.insert(error_step, StepState::Errored);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use crate::router::{self, Route};
    use crate::step::Step;
    use crate::steps::ErrorHandlerStep;
    use async_trait::async_trait;
    use cvflow_types::{
        CandidateProfile, DocumentRef, FinalAssessment, JobRequirement, LogLevel, Slot,
    };
    use std::time::Duration;

    #[derive(Clone)]
    enum Behavior {
        Update(RecordUpdate),
        Sleep(u64, RecordUpdate),
        Fail(&'static str),
        Panic,
        /// Report progress, then behave as the inner behavior.
        Progress(&'static str, Box<Behavior>),
    }

    struct Stub {
        id: StepId,
        behavior: Behavior,
    }

    #[async_trait]
    impl Step for Stub {
        fn id(&self) -> StepId {
            self.id
        }

        async fn run(&self, _: &ProcessingRecord, events: &StepEvents) -> Result<RecordUpdate> {
            let mut behavior = self.behavior.clone();
            while let Behavior::Progress(message, inner) = behavior {
                events.progress(message);
                behavior = *inner;
            }
            match behavior {
                Behavior::Update(update) => Ok(update),
                Behavior::Sleep(ms, update) => {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    Ok(update)
                }
                Behavior::Fail(msg) => Err(CvflowError::collaborator("stub", msg)),
                Behavior::Panic => panic!("stub exploded"),
                Behavior::Progress(..) => unreachable!(),
            }
        }
    }

    fn profile_update() -> RecordUpdate {
        RecordUpdate {
            candidate_profile: Some(CandidateProfile {
                name: "Ada".into(),
                markdown: "cv".into(),
                ..Default::default()
            }),
            ..RecordUpdate::new()
        }
        .log(LogLevel::Success, "extracted")
    }

    fn job_update() -> RecordUpdate {
        RecordUpdate {
            job_requirement: Some(JobRequirement {
                title: "Engineer".into(),
                ..Default::default()
            }),
            ..RecordUpdate::new()
        }
    }

    fn stop(_: &ProcessingRecord) -> Route {
        Route::Terminal
    }

    fn to_report(record: &ProcessingRecord) -> Route {
        if record.has_error() {
            Route::Single(StepId::ErrorHandler)
        } else {
            Route::Single(StepId::Report)
        }
    }

    fn two_step_workflow(after_job: router::Router) -> Workflow {
        Workflow::builder("two", StepId::Extraction)
            .step(StepId::Extraction, router::after_extraction)
            .step(StepId::JobPosting, after_job)
            .step(StepId::ErrorHandler, router::after_error_handler)
            .edge(StepId::Extraction, StepId::JobPosting)
            .build()
    }

    fn registry(stubs: Vec<Stub>) -> StepRegistry {
        let mut registry = StepRegistry::new();
        for stub in stubs {
            registry.register(stub);
        }
        registry.register(ErrorHandlerStep);
        registry
    }

    fn record() -> ProcessingRecord {
        ProcessingRecord::new(DocumentRef::new("cv.pdf"))
    }

    #[tokio::test]
    async fn linear_workflow_completes() {
        let executor = ScreeningExecutor::new(
            registry(vec![
                Stub { id: StepId::Extraction, behavior: Behavior::Update(profile_update()) },
                Stub { id: StepId::JobPosting, behavior: Behavior::Update(job_update()) },
            ]),
            two_step_workflow(stop),
        );
        let (emitter, mut stream) = EventEmitter::channel();

        let report = executor.run(record(), &emitter).await.unwrap();
        assert!(report.succeeded());
        assert_eq!(report.executed, vec![StepId::Extraction, StepId::JobPosting]);
        assert_eq!(report.record.version(), 2);
        assert_eq!(report.state(StepId::ErrorHandler), None);

        let kinds: Vec<_> = stream.collect_remaining().into_iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::RunStarted,
                EventKind::StepStarted,
                EventKind::StepFinished,
                EventKind::StepStarted,
                EventKind::StepFinished,
                EventKind::RunFinished,
            ]
        );
    }

    #[tokio::test]
    async fn step_error_runs_error_step_and_emits_run_error() {
        let executor = ScreeningExecutor::new(
            registry(vec![
                Stub { id: StepId::Extraction, behavior: Behavior::Fail("unreadable") },
                Stub { id: StepId::JobPosting, behavior: Behavior::Update(job_update()) },
            ]),
            two_step_workflow(stop),
        );
        let (emitter, mut stream) = EventEmitter::channel();

        let report = executor.run(record(), &emitter).await.unwrap();
        assert!(matches!(report.outcome, RunOutcome::Failed(ref m) if m.contains("unreadable")));
        assert_eq!(report.state(StepId::Extraction), Some(StepState::Errored));
        assert_eq!(report.state(StepId::JobPosting), None);
        assert_eq!(report.state(StepId::ErrorHandler), Some(StepState::Completed));
        let last = report.record.message_log().entries().last().unwrap();
        assert!(last.message.starts_with("Screening aborted"));

        let events = stream.collect_remaining();
        assert_eq!(events.len(), 3);
        assert_eq!(events[2].kind, EventKind::RunError);
        assert_eq!(events[2].step, Some(StepId::Extraction));
    }

    #[tokio::test]
    async fn failing_step_progress_is_not_published() {
        let executor = ScreeningExecutor::new(
            registry(vec![
                Stub {
                    id: StepId::Extraction,
                    behavior: Behavior::Progress("reading", Box::new(Behavior::Update(profile_update()))),
                },
                Stub {
                    id: StepId::JobPosting,
                    behavior: Behavior::Progress("matching", Box::new(Behavior::Fail("catalog down"))),
                },
            ]),
            two_step_workflow(stop),
        );
        let (emitter, mut stream) = EventEmitter::channel();

        let report = executor.run(record(), &emitter).await.unwrap();
        assert!(!report.succeeded());

        let events = stream.collect_remaining();
        let kinds: Vec<_> = events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::RunStarted,
                EventKind::StepStarted,
                EventKind::StepProgress,
                EventKind::StepFinished,
                EventKind::StepStarted,
                EventKind::RunError,
            ]
        );
        assert_eq!(events[2].step, Some(StepId::Extraction));
        assert_eq!(events[2].message.as_deref(), Some("reading"));
        assert_eq!(events[4].step, Some(StepId::JobPosting));
        assert_eq!(events[5].step, Some(StepId::JobPosting));
    }

    #[tokio::test]
    async fn ownership_violation_fails_run() {
        let foreign = RecordUpdate {
            final_assessment: Some(FinalAssessment::default()),
            ..profile_update()
        };
        let executor = ScreeningExecutor::new(
            registry(vec![
                Stub { id: StepId::Extraction, behavior: Behavior::Update(foreign) },
                Stub { id: StepId::JobPosting, behavior: Behavior::Update(job_update()) },
            ]),
            two_step_workflow(stop),
        );
        let (emitter, _stream) = EventEmitter::channel();

        let report = executor.run(record(), &emitter).await.unwrap();
        assert!(!report.succeeded());
        assert!(report.record.candidate_profile().is_none(), "rejected update is not applied");
        assert!(report.record.error_flag().unwrap().contains("final_assessment"));
    }

    #[tokio::test]
    async fn undeclared_successor_is_routing_error() {
        let executor = ScreeningExecutor::new(
            registry(vec![
                Stub { id: StepId::Extraction, behavior: Behavior::Update(profile_update()) },
                Stub { id: StepId::JobPosting, behavior: Behavior::Update(job_update()) },
            ]),
            two_step_workflow(to_report),
        );
        let (emitter, mut stream) = EventEmitter::channel();

        let report = executor.run(record(), &emitter).await.unwrap();
        assert!(matches!(report.outcome, RunOutcome::Failed(ref m) if m.contains("not a declared successor")));
        assert_eq!(report.state(StepId::Report), None);
        // the misrouted step is folded into run-error instead of finishing
        let kinds: Vec<_> = stream.collect_remaining().into_iter().map(|e| e.kind).collect();
        assert_eq!(kinds.iter().filter(|k| **k == EventKind::StepFinished).count(), 1);
        assert_eq!(kinds.last(), Some(&EventKind::RunError));
    }

    #[tokio::test]
    async fn panicking_step_becomes_task_error() {
        let executor = ScreeningExecutor::new(
            registry(vec![
                Stub { id: StepId::Extraction, behavior: Behavior::Panic },
                Stub { id: StepId::JobPosting, behavior: Behavior::Update(job_update()) },
            ]),
            two_step_workflow(stop),
        );
        let (emitter, _stream) = EventEmitter::channel();

        let report = executor.run(record(), &emitter).await.unwrap();
        assert!(matches!(report.outcome, RunOutcome::Failed(ref m) if m.contains("did not complete")));
        assert_eq!(report.state(StepId::Extraction), Some(StepState::Errored));
    }

    #[tokio::test]
    async fn missing_registration_refuses_to_run() {
        let mut registry = StepRegistry::new();
        registry.register(Stub { id: StepId::Extraction, behavior: Behavior::Update(profile_update()) });
        let executor = ScreeningExecutor::new(registry, two_step_workflow(stop));
        let (emitter, mut stream) = EventEmitter::channel();

        let err = executor.run(record(), &emitter).await.unwrap_err();
        assert!(matches!(err, CvflowError::WorkflowInvalid(_)));
        assert!(stream.collect_remaining().is_empty());
    }

    #[tokio::test]
    async fn join_waits_for_every_branch() {
        let workflow = Workflow::builder("fan", StepId::JobPosting)
            .step(StepId::JobPosting, |_| {
                Route::Parallel(vec![StepId::Scoring, StepId::WorldCheck])
            })
            .step(StepId::Scoring, router::after_screening_branch)
            .step(StepId::WorldCheck, router::after_screening_branch)
            .step(StepId::Assessment, stop)
            .step(StepId::ErrorHandler, router::after_error_handler)
            .edge(StepId::JobPosting, StepId::Scoring)
            .edge(StepId::JobPosting, StepId::WorldCheck)
            .edge(StepId::Scoring, StepId::Assessment)
            .edge(StepId::WorldCheck, StepId::Assessment)
            .build();
        let executor = ScreeningExecutor::new(
            registry(vec![
                Stub { id: StepId::JobPosting, behavior: Behavior::Update(job_update()) },
                Stub {
                    id: StepId::Scoring,
                    behavior: Behavior::Update(RecordUpdate {
                        score_result: Some(Slot::Skipped("fast".into())),
                        ..RecordUpdate::new()
                    }),
                },
                Stub {
                    id: StepId::WorldCheck,
                    behavior: Behavior::Sleep(
                        50,
                        RecordUpdate {
                            world_check: Some(Slot::Skipped("slow".into())),
                            ..RecordUpdate::new()
                        },
                    ),
                },
                Stub { id: StepId::Assessment, behavior: Behavior::Update(RecordUpdate::new()) },
            ]),
            workflow,
        );
        let (emitter, mut stream) = EventEmitter::channel();

        let report = executor.run(record(), &emitter).await.unwrap();
        assert!(report.succeeded());
        assert_eq!(
            report.executed,
            vec![StepId::JobPosting, StepId::Scoring, StepId::WorldCheck, StepId::Assessment]
        );
        // Assessment is activated once, by whichever branch routes first.
        let events = stream.collect_remaining();
        let started: Vec<_> = events
            .iter()
            .filter(|e| e.kind == EventKind::StepStarted)
            .filter_map(|e| e.step)
            .collect();
        assert_eq!(started.iter().filter(|s| **s == StepId::Assessment).count(), 1);
        let world_done = events
            .iter()
            .position(|e| e.kind == EventKind::StepFinished && e.step == Some(StepId::WorldCheck))
            .unwrap();
        let assessment_started = events
            .iter()
            .position(|e| e.kind == EventKind::StepStarted && e.step == Some(StepId::Assessment))
            .unwrap();
        assert!(world_done < assessment_started);
    }

    #[test]
    fn step_state_settled() {
        assert!(StepState::Completed.is_settled());
        assert!(StepState::Errored.is_settled());
        assert!(!StepState::Pending.is_settled());
        assert!(!StepState::Running.is_settled());
    }
}

//! End-to-end tests for the screening workflow.
//!
//! Each test runs the full workflow: build collaborators -> register steps ->
//! validate -> execute -> inspect the record, the step states and the event stream.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use cvflow_pipeline::{
    screening_registry, EmbeddingQuestionValidator, EventEmitter, EventKind, HashingEmbedder,
    QuestionGenerator, RunEvent, RunOutcome, RunReport, ScreeningExecutor, Script,
    ScriptedCollaborators, Step, StepEvents, StepRegistry, StepState,
};
use cvflow_types::{
    CandidateProfile, EngineConfig, FinalAssessment, FlaggedQuestion, InterviewQuestions,
    JobRequirement, LogEntry, LogLevel, ProcessingRecord, RecordUpdate, Result, Slot, StepId,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn profile() -> CandidateProfile {
    CandidateProfile {
        name: "Grace Hopper".into(),
        email: "grace@example.com".into(),
        skills: vec!["COBOL".into(), "compilers".into()],
        linkedin_url: Some("https://linkedin.com/in/grace".into()),
        github_url: Some("https://github.com/grace".into()),
        markdown: "# Grace Hopper\nBuilt the first compiler.".into(),
        ..Default::default()
    }
}

fn job() -> JobRequirement {
    JobRequirement {
        id: "job-7".into(),
        title: "Compiler Engineer".into(),
        description: "Design and build compilers".into(),
        skills: vec!["compilers".into()],
        ..Default::default()
    }
}

fn questions(n: usize) -> InterviewQuestions {
    InterviewQuestions {
        technical_questions: (0..n).map(|i| format!("Technical question {i}")).collect(),
        interview_duration: "45 minutes".into(),
        ..Default::default()
    }
}

/// A script where every collaborator answers and the candidate proceeds.
fn happy_script() -> Script {
    Script {
        profile: profile(),
        matched_job: Some(job()),
        assessment: FinalAssessment {
            final_recommendation: "Recommended".into(),
            proceed_to_interview: true,
        },
        question_rounds: vec![questions(5)],
        ..Script::default()
    }
}

async fn run_script(script: Script, config: &EngineConfig) -> (RunReport, Vec<RunEvent>, ScriptedCollaborators) {
    let scripted = ScriptedCollaborators::new(script);
    let registry = screening_registry(&scripted.collaborators(), config);
    let executor = ScreeningExecutor::screening(registry);
    let (emitter, mut stream) = EventEmitter::channel();

    let report = executor
        .run(scripted.script().record(), &emitter)
        .await
        .expect("workflow should be runnable");
    (report, stream.collect_remaining(), scripted)
}

fn kinds(events: &[RunEvent]) -> Vec<EventKind> {
    events.iter().map(|e| e.kind).collect()
}

fn position(events: &[RunEvent], kind: EventKind, step: StepId) -> Option<usize> {
    events.iter().position(|e| e.kind == kind && e.step == Some(step))
}

fn started_steps(events: &[RunEvent]) -> Vec<StepId> {
    events
        .iter()
        .filter(|e| e.kind == EventKind::StepStarted)
        .filter_map(|e| e.step)
        .collect()
}

// ---------------------------------------------------------------------------
// Scenario 1: candidate does not proceed, run ends after the report
// ---------------------------------------------------------------------------

#[tokio::test]
async fn no_interview_when_candidate_does_not_proceed() {
    let script = Script {
        assessment: FinalAssessment {
            final_recommendation: "Not Recommended".into(),
            proceed_to_interview: false,
        },
        ..happy_script()
    };
    let (report, events, scripted) = run_script(script, &EngineConfig::default()).await;

    assert!(report.succeeded());
    assert_eq!(report.executed.last(), Some(&StepId::Report));
    assert!(!report.executed.contains(&StepId::InterviewQuestions));
    assert_eq!(report.state(StepId::InterviewQuestions), None);
    assert_eq!(scripted.generations(), 0);
    assert!(report.record.candidate_report().is_some());
    assert!(!report.record.proceed_to_interview());

    let last = events.last().unwrap();
    assert_eq!(last.kind, EventKind::RunFinished);
    let payload = last.payload.as_ref().unwrap();
    assert_eq!(payload["proceed_to_interview"], false);
    assert_eq!(payload["final_assessment"]["proceed_to_interview"], "No");
}

#[tokio::test]
async fn proceeding_candidate_gets_interview_questions() {
    let (report, events, scripted) = run_script(happy_script(), &EngineConfig::default()).await;

    assert!(report.succeeded());
    assert_eq!(report.executed.len(), 9);
    assert_eq!(report.executed.last(), Some(&StepId::InterviewQuestions));
    assert_eq!(report.record.interview_questions().unwrap().len(), 5);
    assert_eq!(scripted.generations(), 1);
    // optional screeners with nothing scripted are skipped, not errored
    assert!(matches!(report.record.social_score(), Slot::Skipped(_)));
    assert!(matches!(report.record.world_check(), Slot::Skipped(_)));
    assert_eq!(events.first().unwrap().kind, EventKind::RunStarted);
    assert_eq!(events.last().unwrap().kind, EventKind::RunFinished);
    assert!(events.iter().all(|e| e.run_id == report.record.run_id()));
}

// ---------------------------------------------------------------------------
// Scenario 2: extraction fails
// ---------------------------------------------------------------------------

#[tokio::test]
async fn extraction_failure_short_circuits() {
    let script = Script {
        failures: BTreeMap::from([("extractor".to_string(), "unreadable pdf".to_string())]),
        ..happy_script()
    };
    let (report, events, _) = run_script(script, &EngineConfig::default()).await;

    assert_eq!(
        kinds(&events),
        vec![EventKind::RunStarted, EventKind::StepStarted, EventKind::RunError]
    );
    assert_eq!(events[1].step, Some(StepId::Extraction));
    assert_eq!(events[2].step, Some(StepId::Extraction));
    assert!(events[2].message.as_deref().unwrap().contains("unreadable pdf"));

    assert!(matches!(report.outcome, RunOutcome::Failed(_)));
    assert!(report.record.has_error());
    for step in [StepId::JobPosting, StepId::Scoring, StepId::SocialScreening] {
        assert_eq!(report.state(step), None, "{step} must never be scheduled");
    }
    assert_eq!(report.state(StepId::ErrorHandler), Some(StepState::Completed));
}

// ---------------------------------------------------------------------------
// Scenario 3: social screening errors while scoring is still running
// ---------------------------------------------------------------------------

#[tokio::test]
async fn branch_error_discards_late_sibling_and_skips_join() {
    let script = Script {
        failures: BTreeMap::from([("social".to_string(), "crawler blocked".to_string())]),
        delays_ms: BTreeMap::from([("scorer".to_string(), 100)]),
        ..happy_script()
    };
    let (report, events, _) = run_script(script, &EngineConfig::default()).await;

    assert!(matches!(report.outcome, RunOutcome::Failed(ref m) if m.contains("crawler blocked")));
    assert!(report.record.social_score().is_error());
    // scoring finished after the error: its update was discarded
    assert_eq!(report.record.score_result(), &Slot::Unset);
    assert_eq!(position(&events, EventKind::StepFinished, StepId::Scoring), None);
    assert_eq!(report.state(StepId::Assessment), None);
    assert!(!started_steps(&events).contains(&StepId::Assessment));

    let run_errors: Vec<_> = events.iter().filter(|e| e.kind == EventKind::RunError).collect();
    assert_eq!(run_errors.len(), 1);
    assert_eq!(run_errors[0].step, Some(StepId::SocialScreening));
    assert_eq!(events.last().unwrap().kind, EventKind::RunError);
}

// ---------------------------------------------------------------------------
// Scenario 4: validation keeps flagging, loop exhausts the ceiling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn exhausted_question_loop_degrades_gracefully() {
    let script = Script {
        flag_counts: vec![2, 1, 1],
        ..happy_script()
    };
    let config = EngineConfig {
        max_question_retries: 2,
        ..EngineConfig::default()
    };
    let (report, _, scripted) = run_script(script, &config).await;

    assert!(report.succeeded());
    assert_eq!(scripted.generations(), 3);
    assert_eq!(scripted.validations(), 3);
    assert_eq!(report.record.interview_questions().unwrap().len(), 5);

    let warning = report
        .record
        .message_log()
        .iter()
        .find(|e| e.level == LogLevel::Warning && e.step == Some(StepId::InterviewQuestions))
        .expect("degradation warning");
    assert!(warning.message.contains("1 unsupported"));
}

#[tokio::test]
async fn question_loop_stops_once_validation_passes() {
    let script = Script {
        flag_counts: vec![2, 0],
        ..happy_script()
    };
    let (report, _, scripted) = run_script(script, &EngineConfig::default()).await;

    assert!(report.succeeded());
    assert_eq!(scripted.generations(), 2);
    assert!(report
        .record
        .message_log()
        .iter()
        .all(|e| e.level != LogLevel::Warning));
}

// ---------------------------------------------------------------------------
// Scenario 5: no job posting clears the threshold
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_job_match_fails_scoring() {
    let script = Script {
        matched_job: None,
        ..happy_script()
    };
    let (report, events, _) = run_script(script, &EngineConfig::default()).await;

    assert!(matches!(
        report.outcome,
        RunOutcome::Failed(ref m) if m.contains("'scoring'") && m.contains("job_requirement")
    ));
    assert_eq!(report.state(StepId::Scoring), Some(StepState::Errored));
    assert!(report
        .record
        .message_log()
        .iter()
        .any(|e| e.level == LogLevel::Warning && e.step == Some(StepId::JobPosting)));
    assert!(report.record.job_requirement().is_none());
    assert_eq!(events.last().unwrap().kind, EventKind::RunError);
}

#[tokio::test]
async fn supplied_requirement_bypasses_matcher() {
    let script = Script {
        job_requirement: Some(job()),
        matched_job: None,
        failures: BTreeMap::from([("job_matcher".to_string(), "must not be called".to_string())]),
        ..happy_script()
    };
    let (report, _, _) = run_script(script, &EngineConfig::default()).await;

    assert!(report.succeeded());
    assert_eq!(report.record.job_requirement(), Some(&job()));
}

// ---------------------------------------------------------------------------
// P1: nothing but the error step is scheduled after an error
// ---------------------------------------------------------------------------

#[tokio::test]
async fn nothing_scheduled_after_error() {
    let script = Script {
        failures: BTreeMap::from([("assessor".to_string(), "model unavailable".to_string())]),
        ..happy_script()
    };
    let (report, events, scripted) = run_script(script, &EngineConfig::default()).await;

    assert!(!report.succeeded());
    assert_eq!(report.state(StepId::Assessment), Some(StepState::Errored));
    assert_eq!(report.state(StepId::Report), None);
    assert_eq!(report.state(StepId::InterviewQuestions), None);
    assert_eq!(scripted.generations(), 0);
    assert_eq!(started_steps(&events).last(), Some(&StepId::Assessment));
}

// ---------------------------------------------------------------------------
// P2: the join waits for every branch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn assessment_starts_after_every_branch_finishes() {
    let script = Script {
        delays_ms: BTreeMap::from([
            ("world_check".to_string(), 80),
            ("projects".to_string(), 40),
            ("scorer".to_string(), 10),
        ]),
        ..happy_script()
    };
    let (report, events, _) = run_script(script, &EngineConfig::default()).await;
    assert!(report.succeeded());

    let assessment_started = position(&events, EventKind::StepStarted, StepId::Assessment).unwrap();
    for branch in [
        StepId::Scoring,
        StepId::SocialScreening,
        StepId::ProjectScreening,
        StepId::WorldCheck,
    ] {
        let finished = position(&events, EventKind::StepFinished, branch).unwrap();
        assert!(finished < assessment_started, "{branch} finished after the join started");
    }
    assert_eq!(
        started_steps(&events).iter().filter(|s| **s == StepId::Assessment).count(),
        1
    );
}

#[tokio::test]
async fn branches_run_concurrently() {
    let script = Script {
        delays_ms: BTreeMap::from([
            ("scorer".to_string(), 100),
            ("social".to_string(), 100),
            ("projects".to_string(), 100),
            ("world_check".to_string(), 100),
        ]),
        ..happy_script()
    };
    let started = std::time::Instant::now();
    let (report, _, _) = run_script(script, &EngineConfig::default()).await;
    assert!(report.succeeded());
    assert!(started.elapsed() < std::time::Duration::from_millis(350));
}

// ---------------------------------------------------------------------------
// P3: generation calls bounded by ceiling + 1
// ---------------------------------------------------------------------------

/// Generator that always produces flaggable questions and counts its calls.
struct CountingGenerator {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl QuestionGenerator for CountingGenerator {
    async fn generate(&self, _: &CandidateProfile, _: &JobRequirement) -> Result<InterviewQuestions> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(questions(5))
    }

    async fn regenerate(
        &self,
        _: &CandidateProfile,
        _: &JobRequirement,
        _: &InterviewQuestions,
        _: &[FlaggedQuestion],
    ) -> Result<InterviewQuestions> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(questions(5))
    }
}

#[tokio::test]
async fn generation_calls_bounded_by_ceiling() {
    for max_retries in [0, 1, 3] {
        let scripted = ScriptedCollaborators::new(Script {
            flag_counts: vec![5; 10],
            ..happy_script()
        });
        let calls = Arc::new(AtomicUsize::new(0));
        let mut collaborators = scripted.collaborators();
        collaborators.question_generator = Arc::new(CountingGenerator {
            calls: calls.clone(),
        });
        let config = EngineConfig {
            max_question_retries: max_retries,
            ..EngineConfig::default()
        };
        let executor = ScreeningExecutor::screening(screening_registry(&collaborators, &config));
        let (emitter, _stream) = EventEmitter::channel();

        let report = executor.run(scripted.script().record(), &emitter).await.unwrap();
        assert!(report.succeeded(), "exhaustion is not an error");
        assert_eq!(calls.load(Ordering::SeqCst), max_retries + 1);
    }
}

// ---------------------------------------------------------------------------
// P5: the message log only grows
// ---------------------------------------------------------------------------

/// Wraps a step and records the log it was handed.
struct LogProbe {
    inner: Arc<dyn Step>,
    seen: Arc<Mutex<Vec<Vec<LogEntry>>>>,
}

#[async_trait]
impl Step for LogProbe {
    fn id(&self) -> StepId {
        self.inner.id()
    }

    async fn run(&self, record: &ProcessingRecord, events: &StepEvents) -> Result<RecordUpdate> {
        self.seen
            .lock()
            .unwrap()
            .push(record.message_log().entries().to_vec());
        self.inner.run(record, events).await
    }
}

#[tokio::test]
async fn message_log_is_append_only() {
    let scripted = ScriptedCollaborators::new(Script {
        flag_counts: vec![1],
        ..happy_script()
    });
    let base = screening_registry(&scripted.collaborators(), &EngineConfig::default());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut probed = StepRegistry::new();
    for step in StepId::ALL {
        if let Some(inner) = base.get(step) {
            probed.register(LogProbe {
                inner,
                seen: seen.clone(),
            });
        }
    }
    let (emitter, _stream) = EventEmitter::channel();

    let report = ScreeningExecutor::screening(probed)
        .run(scripted.script().record(), &emitter)
        .await
        .unwrap();
    assert!(report.succeeded());

    let snapshots = seen.lock().unwrap();
    let final_log = report.record.message_log().entries();
    let mut previous_len = 0;
    for snapshot in snapshots.iter() {
        assert!(snapshot.len() >= previous_len);
        assert_eq!(snapshot.as_slice(), &final_log[..snapshot.len()]);
        previous_len = snapshot.len();
    }
    assert!(final_log.len() > previous_len);
}

// ---------------------------------------------------------------------------
// P6: step-started pairs with one step-finished or folds into run-error
// ---------------------------------------------------------------------------

fn assert_event_pairing(events: &[RunEvent]) {
    let run_error = events.iter().find(|e| e.kind == EventKind::RunError);
    for step in started_steps(events) {
        let finished = events
            .iter()
            .filter(|e| e.kind == EventKind::StepFinished && e.step == Some(step))
            .count();
        match finished {
            1 => assert_ne!(run_error.and_then(|e| e.step), Some(step), "{step} finished and errored"),
            0 => assert!(run_error.is_some(), "{step} started but never settled"),
            n => panic!("{step} finished {n} times"),
        }
    }
    assert_eq!(events.iter().filter(|e| e.kind.is_terminal()).count(), 1);
    assert!(events.last().unwrap().kind.is_terminal());
}

#[tokio::test]
async fn events_pair_up_on_success_and_failure() {
    let (_, events, _) = run_script(happy_script(), &EngineConfig::default()).await;
    assert_event_pairing(&events);

    let failing = Script {
        failures: BTreeMap::from([("world_check".to_string(), "registry down".to_string())]),
        delays_ms: BTreeMap::from([("scorer".to_string(), 50), ("projects".to_string(), 50)]),
        ..happy_script()
    };
    let (report, events, _) = run_script(failing, &EngineConfig::default()).await;
    assert!(!report.succeeded());
    assert_event_pairing(&events);
}

#[tokio::test]
async fn failing_branch_publishes_no_progress() {
    let script = Script {
        failures: BTreeMap::from([("scorer".to_string(), "scoring model offline".to_string())]),
        ..happy_script()
    };
    let (report, events, _) = run_script(script, &EngineConfig::default()).await;
    assert!(!report.succeeded());
    assert_eq!(report.state(StepId::Scoring), Some(StepState::Errored));

    let run_error = events.last().unwrap();
    assert_eq!(run_error.kind, EventKind::RunError);
    assert_eq!(run_error.step, Some(StepId::Scoring));
    assert!(events
        .iter()
        .all(|e| !(e.kind == EventKind::StepProgress && e.step == Some(StepId::Scoring))));

    // progress that did get out belongs to a step that finished right after it
    for (i, event) in events.iter().enumerate() {
        if event.kind != EventKind::StepProgress {
            continue;
        }
        let finished = events[i..]
            .iter()
            .any(|e| e.kind == EventKind::StepFinished && e.step == event.step);
        assert!(finished, "{:?} progress without step-finished", event.step);
    }
    assert_event_pairing(&events);
}

#[tokio::test]
async fn step_finished_carries_written_fields() {
    let (_, events, _) = run_script(happy_script(), &EngineConfig::default()).await;

    let extraction = events
        .iter()
        .find(|e| e.kind == EventKind::StepFinished && e.step == Some(StepId::Extraction))
        .unwrap();
    let payload = extraction.payload.as_ref().unwrap();
    assert_eq!(payload["candidate_profile"]["name"], "Grace Hopper");
    assert!(payload.get("score_result").is_none());
    assert_eq!(extraction.label, StepId::Extraction.label());
}

// ---------------------------------------------------------------------------
// Semantic validation in a full run
// ---------------------------------------------------------------------------

#[tokio::test]
async fn embedding_validator_regenerates_off_topic_questions() {
    let off_topic = InterviewQuestions {
        technical_questions: vec![
            "Which compilers did you design and build?".into(),
            "What is your favourite holiday destination?".into(),
        ],
        ..Default::default()
    };
    let grounded = InterviewQuestions {
        technical_questions: vec!["Which compilers did you design and build?".into()],
        ..Default::default()
    };
    let scripted = ScriptedCollaborators::new(Script {
        question_rounds: vec![off_topic, grounded],
        ..happy_script()
    });
    let config = EngineConfig::default();
    let mut collaborators = scripted.collaborators();
    collaborators.question_validator = Arc::new(EmbeddingQuestionValidator::from_config(
        Arc::new(HashingEmbedder::default()),
        &config,
    ));
    let executor = ScreeningExecutor::screening(screening_registry(&collaborators, &config));
    let (emitter, _stream) = EventEmitter::channel();

    let report = executor.run(scripted.script().record(), &emitter).await.unwrap();
    assert!(report.succeeded());
    assert_eq!(scripted.generations(), 2);
    assert_eq!(report.record.interview_questions().unwrap().len(), 1);
}

//! The processing record: the single piece of state threaded through a screening run.
//!
//! Steps never mutate the record directly. They return a [`RecordUpdate`] which the
//! scheduler merges with [`ProcessingRecord::merge`]; ownership of every field is
//! fixed per step by [`StepId::owned_fields`], so concurrent branches cannot race.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    CandidateProfile, CandidateReport, DocumentRef, FinalAssessment, InterviewQuestions,
    JobRequirement, ProjectInfo, ScoreResult, SocialScore, WorldCheckRecord,
};
use crate::{CvflowError, Result};

// ---------------------------------------------------------------------------
// StepId: the closed set of workflow steps
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepId {
    Extraction,
    JobPosting,
    Scoring,
    SocialScreening,
    ProjectScreening,
    WorldCheck,
    Assessment,
    Report,
    InterviewQuestions,
    ErrorHandler,
}

impl StepId {
    pub const ALL: [StepId; 10] = [
        StepId::Extraction,
        StepId::JobPosting,
        StepId::Scoring,
        StepId::SocialScreening,
        StepId::ProjectScreening,
        StepId::WorldCheck,
        StepId::Assessment,
        StepId::Report,
        StepId::InterviewQuestions,
        StepId::ErrorHandler,
    ];

    /// Stable snake-case identifier.
    pub fn name(self) -> &'static str {
        match self {
            StepId::Extraction => "extraction",
            StepId::JobPosting => "job_posting",
            StepId::Scoring => "scoring",
            StepId::SocialScreening => "social_screening",
            StepId::ProjectScreening => "project_screening",
            StepId::WorldCheck => "world_check",
            StepId::Assessment => "assessment",
            StepId::Report => "report",
            StepId::InterviewQuestions => "interview_questions",
            StepId::ErrorHandler => "error_handler",
        }
    }

    /// Human-readable label carried by events.
    pub fn label(self) -> &'static str {
        match self {
            StepId::Extraction => "CV Extraction",
            StepId::JobPosting => "Job Posting Determination",
            StepId::Scoring => "CV Scoring",
            StepId::SocialScreening => "Social Media Screening",
            StepId::ProjectScreening => "Project Contribution Screening",
            StepId::WorldCheck => "World Check",
            StepId::Assessment => "Candidate Final Assessment",
            StepId::Report => "Candidate Report",
            StepId::InterviewQuestions => "Interview Question Generation",
            StepId::ErrorHandler => "Error Handler",
        }
    }

    /// Record fields this step is allowed to write.
    pub fn owned_fields(self) -> &'static [Field] {
        match self {
            StepId::Extraction => &[Field::CandidateProfile],
            StepId::JobPosting => &[Field::JobRequirement],
            StepId::Scoring => &[Field::ScoreResult],
            StepId::SocialScreening => &[Field::SocialScore],
            StepId::ProjectScreening => &[Field::ProjectInfo],
            StepId::WorldCheck => &[Field::WorldCheck],
            StepId::Assessment => &[Field::FinalAssessment],
            StepId::Report => &[Field::CandidateReport],
            StepId::InterviewQuestions => &[Field::InterviewQuestions],
            StepId::ErrorHandler => &[],
        }
    }

    pub fn from_name(name: &str) -> Option<StepId> {
        StepId::ALL.into_iter().find(|s| s.name() == name)
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Writable business fields of the record. The message log is shared
/// append-only and the error flag belongs to the scheduler, so neither is here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    CandidateProfile,
    JobRequirement,
    ScoreResult,
    SocialScore,
    ProjectInfo,
    WorldCheck,
    FinalAssessment,
    CandidateReport,
    InterviewQuestions,
}

impl Field {
    pub fn name(self) -> &'static str {
        match self {
            Field::CandidateProfile => "candidate_profile",
            Field::JobRequirement => "job_requirement",
            Field::ScoreResult => "score_result",
            Field::SocialScore => "social_score",
            Field::ProjectInfo => "project_info",
            Field::WorldCheck => "world_check",
            Field::FinalAssessment => "final_assessment",
            Field::CandidateReport => "candidate_report",
            Field::InterviewQuestions => "interview_questions",
        }
    }
}

// ---------------------------------------------------------------------------
// Slot: optional step output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "data", rename_all = "snake_case")]
pub enum Slot<T> {
    #[default]
    Unset,
    Value(T),
    /// The step ran but had nothing to screen ("skipped" / "not found").
    Skipped(String),
    Error(String),
}

impl<T> Slot<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Slot::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_set(&self) -> bool {
        !matches!(self, Slot::Unset)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Slot::Error(_))
    }
}

// ---------------------------------------------------------------------------
// MessageLog: append-only diagnostics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub step: Option<StepId>,
    pub message: String,
    pub at: chrono::DateTime<chrono::Utc>,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            step: None,
            message: message.into(),
            at: chrono::Utc::now(),
        }
    }
}

/// Ordered diagnostics. Entries can be appended and read, never removed or edited.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageLog {
    entries: Vec<LogEntry>,
}

impl MessageLog {
    pub fn push(&mut self, entry: LogEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn warnings(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter().filter(|e| e.level == LogLevel::Warning)
    }
}

// ---------------------------------------------------------------------------
// RecordUpdate: a step's partial update
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordUpdate {
    pub candidate_profile: Option<CandidateProfile>,
    pub job_requirement: Option<JobRequirement>,
    pub score_result: Option<Slot<ScoreResult>>,
    pub social_score: Option<Slot<SocialScore>>,
    pub project_info: Option<Slot<ProjectInfo>>,
    pub world_check: Option<Slot<WorldCheckRecord>>,
    pub final_assessment: Option<FinalAssessment>,
    pub candidate_report: Option<CandidateReport>,
    pub interview_questions: Option<InterviewQuestions>,
    pub messages: Vec<LogEntry>,
}

impl RecordUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a log entry to be merged with this update.
    pub fn log(mut self, level: LogLevel, message: impl Into<String>) -> Self {
        self.messages.push(LogEntry::new(level, message));
        self
    }

    /// Fields this update assigns, in declaration order.
    pub fn fields(&self) -> Vec<Field> {
        let mut fields = Vec::new();
        if self.candidate_profile.is_some() {
            fields.push(Field::CandidateProfile);
        }
        if self.job_requirement.is_some() {
            fields.push(Field::JobRequirement);
        }
        if self.score_result.is_some() {
            fields.push(Field::ScoreResult);
        }
        if self.social_score.is_some() {
            fields.push(Field::SocialScore);
        }
        if self.project_info.is_some() {
            fields.push(Field::ProjectInfo);
        }
        if self.world_check.is_some() {
            fields.push(Field::WorldCheck);
        }
        if self.final_assessment.is_some() {
            fields.push(Field::FinalAssessment);
        }
        if self.candidate_report.is_some() {
            fields.push(Field::CandidateReport);
        }
        if self.interview_questions.is_some() {
            fields.push(Field::InterviewQuestions);
        }
        fields
    }

    /// JSON object holding only the assigned fields, keyed by field name.
    pub fn payload(&self) -> serde_json::Value {
        fn put<T: Serialize>(map: &mut serde_json::Map<String, serde_json::Value>, field: Field, value: &Option<T>) {
            if let Some(v) = value {
                map.insert(
                    field.name().to_string(),
                    serde_json::to_value(v).unwrap_or(serde_json::Value::Null),
                );
            }
        }

        let mut map = serde_json::Map::new();
        put(&mut map, Field::CandidateProfile, &self.candidate_profile);
        put(&mut map, Field::JobRequirement, &self.job_requirement);
        put(&mut map, Field::ScoreResult, &self.score_result);
        put(&mut map, Field::SocialScore, &self.social_score);
        put(&mut map, Field::ProjectInfo, &self.project_info);
        put(&mut map, Field::WorldCheck, &self.world_check);
        put(&mut map, Field::FinalAssessment, &self.final_assessment);
        put(&mut map, Field::CandidateReport, &self.candidate_report);
        put(&mut map, Field::InterviewQuestions, &self.interview_questions);
        serde_json::Value::Object(map)
    }
}

// ---------------------------------------------------------------------------
// ProcessingRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ProcessingRecord {
    run_id: Uuid,
    version: u64,
    source_document: DocumentRef,
    job_requirement: Option<JobRequirement>,
    candidate_profile: Option<CandidateProfile>,
    score_result: Slot<ScoreResult>,
    social_score: Slot<SocialScore>,
    project_info: Slot<ProjectInfo>,
    world_check: Slot<WorldCheckRecord>,
    final_assessment: Option<FinalAssessment>,
    candidate_report: Option<CandidateReport>,
    interview_questions: Option<InterviewQuestions>,
    message_log: MessageLog,
    error_flag: Option<String>,
}

impl ProcessingRecord {
    /// Fresh record for one run, with every output empty.
    pub fn new(source_document: DocumentRef) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            version: 0,
            source_document,
            job_requirement: None,
            candidate_profile: None,
            score_result: Slot::Unset,
            social_score: Slot::Unset,
            project_info: Slot::Unset,
            world_check: Slot::Unset,
            final_assessment: None,
            candidate_report: None,
            interview_questions: None,
            message_log: MessageLog::default(),
            error_flag: None,
        }
    }

    /// Seed the job requirement at initialization instead of having it determined.
    pub fn with_job_requirement(mut self, job: JobRequirement) -> Self {
        self.job_requirement = Some(job);
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Number of merges applied so far.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn source_document(&self) -> &DocumentRef {
        &self.source_document
    }

    pub fn job_requirement(&self) -> Option<&JobRequirement> {
        self.job_requirement.as_ref()
    }

    pub fn candidate_profile(&self) -> Option<&CandidateProfile> {
        self.candidate_profile.as_ref()
    }

    pub fn score_result(&self) -> &Slot<ScoreResult> {
        &self.score_result
    }

    pub fn social_score(&self) -> &Slot<SocialScore> {
        &self.social_score
    }

    pub fn project_info(&self) -> &Slot<ProjectInfo> {
        &self.project_info
    }

    pub fn world_check(&self) -> &Slot<WorldCheckRecord> {
        &self.world_check
    }

    pub fn final_assessment(&self) -> Option<&FinalAssessment> {
        self.final_assessment.as_ref()
    }

    pub fn candidate_report(&self) -> Option<&CandidateReport> {
        self.candidate_report.as_ref()
    }

    pub fn interview_questions(&self) -> Option<&InterviewQuestions> {
        self.interview_questions.as_ref()
    }

    pub fn message_log(&self) -> &MessageLog {
        &self.message_log
    }

    pub fn error_flag(&self) -> Option<&str> {
        self.error_flag.as_deref()
    }

    pub fn has_error(&self) -> bool {
        self.error_flag.is_some()
    }

    /// True only once assessment and report have both landed on an error-free record.
    pub fn proceed_to_interview(&self) -> bool {
        !self.has_error()
            && self.candidate_report.is_some()
            && self
                .final_assessment
                .as_ref()
                .is_some_and(|a| a.proceed_to_interview)
    }

    /// Merge `update` produced by `step`.
    ///
    /// Rejects the whole update, without applying any of it, when it touches a
    /// field `step` does not own.
    pub fn merge(&mut self, step: StepId, update: RecordUpdate) -> Result<()> {
        let owned = step.owned_fields();
        if let Some(field) = update.fields().into_iter().find(|f| !owned.contains(f)) {
            return Err(CvflowError::OwnershipViolation {
                step: step.name().to_string(),
                field: field.name().to_string(),
            });
        }

        let RecordUpdate {
            candidate_profile,
            job_requirement,
            score_result,
            social_score,
            project_info,
            world_check,
            final_assessment,
            candidate_report,
            interview_questions,
            messages,
        } = update;

        if candidate_profile.is_some() {
            self.candidate_profile = candidate_profile;
        }
        if job_requirement.is_some() {
            self.job_requirement = job_requirement;
        }
        if let Some(slot) = score_result {
            self.score_result = slot;
        }
        if let Some(slot) = social_score {
            self.social_score = slot;
        }
        if let Some(slot) = project_info {
            self.project_info = slot;
        }
        if let Some(slot) = world_check {
            self.world_check = slot;
        }
        if final_assessment.is_some() {
            self.final_assessment = final_assessment;
        }
        if candidate_report.is_some() {
            self.candidate_report = candidate_report;
        }
        if interview_questions.is_some() {
            self.interview_questions = interview_questions;
        }
        for mut entry in messages {
            entry.step.get_or_insert(step);
            self.message_log.push(entry);
        }
        self.version += 1;
        Ok(())
    }

    /// Record a failure of `step`.
    ///
    /// The first failure sets the error flag; later ones are only logged. The
    /// flag is never cleared. Returns `true` when this call set the flag.
    pub fn fail(&mut self, step: StepId, message: impl Into<String>) -> bool {
        let message = message.into();
        for field in step.owned_fields() {
            match field {
                Field::ScoreResult => self.score_result = Slot::Error(message.clone()),
                Field::SocialScore => self.social_score = Slot::Error(message.clone()),
                Field::ProjectInfo => self.project_info = Slot::Error(message.clone()),
                Field::WorldCheck => self.world_check = Slot::Error(message.clone()),
                _ => {}
            }
        }
        self.message_log.push(LogEntry {
            step: Some(step),
            ..LogEntry::new(LogLevel::Error, format!("{} failed: {}", step.label(), message))
        });
        self.version += 1;

        if self.error_flag.is_some() {
            return false;
        }
        self.error_flag = Some(message);
        true
    }

    /// Append a diagnostic outside of a step merge.
    pub fn log(&mut self, step: Option<StepId>, level: LogLevel, message: impl Into<String>) {
        self.message_log.push(LogEntry {
            step,
            ..LogEntry::new(level, message)
        });
    }
}

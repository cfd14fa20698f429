//! Canned collaborators driven by a JSON script.
//!
//! Every collaborator answers from the [`Script`]; failures and delays can be
//! injected per collaborator by name. Used by the `cvflow run` command and by
//! tests that need a whole screening run without external services.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use cvflow_types::{
    CandidateProfile, CandidateReport, CvflowError, DocumentRef, FinalAssessment,
    FlaggedQuestion, InterviewQuestions, JobRequirement, ProcessingRecord, ProjectInfo, Result,
    ScoreResult, SocialScore, WorldCheckRecord,
};

use crate::collaborators::{
    AssessmentInputs, Assessor, Collaborators, CvScorer, DocumentExtractor, JobMatcher,
    ProjectScreener, QuestionGenerator, QuestionValidator, ReportWriter, SocialScreener,
    WorldCheckRegistry,
};

/// Collaborator names accepted as keys of [`Script::failures`] and [`Script::delays_ms`].
pub const COLLABORATOR_NAMES: [&str; 10] = [
    "extractor",
    "job_matcher",
    "scorer",
    "social",
    "projects",
    "world_check",
    "assessor",
    "reporter",
    "question_generator",
    "question_validator",
];

/// Scripted answers for one screening run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Script {
    pub document: DocumentRef,
    /// Requirement supplied by the caller up front. Skips job matching.
    pub job_requirement: Option<JobRequirement>,
    pub profile: CandidateProfile,
    /// What the job matcher returns.
    pub matched_job: Option<JobRequirement>,
    pub score: ScoreResult,
    pub social: Option<SocialScore>,
    pub projects: Option<ProjectInfo>,
    pub world_check: Option<WorldCheckRecord>,
    pub assessment: FinalAssessment,
    pub report: Option<CandidateReport>,
    /// Question set returned by each generation; the last one repeats.
    pub question_rounds: Vec<InterviewQuestions>,
    /// Questions flagged by each validation; missing rounds flag nothing.
    pub flag_counts: Vec<usize>,
    /// Collaborator name to failure message.
    pub failures: BTreeMap<String, String>,
    /// Collaborator name to artificial latency.
    pub delays_ms: BTreeMap<String, u64>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            document: DocumentRef::new("candidate.pdf"),
            job_requirement: None,
            profile: CandidateProfile::default(),
            matched_job: None,
            score: ScoreResult::default(),
            social: None,
            projects: None,
            world_check: None,
            assessment: FinalAssessment::default(),
            report: None,
            question_rounds: Vec::new(),
            flag_counts: Vec::new(),
            failures: BTreeMap::new(),
            delays_ms: BTreeMap::new(),
        }
    }
}

impl Script {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let script: Self = serde_json::from_str(&data)?;
        script.validate()?;
        tracing::debug!(path = %path.display(), "Script loaded");
        Ok(script)
    }

    /// Reject failure or delay keys that name no collaborator.
    pub fn validate(&self) -> Result<()> {
        let unknown: Vec<&str> = self
            .failures
            .keys()
            .chain(self.delays_ms.keys())
            .map(String::as_str)
            .filter(|name| !COLLABORATOR_NAMES.contains(name))
            .collect();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(CvflowError::Config(format!(
                "unknown collaborator(s) in script: {}",
                unknown.join(", ")
            )))
        }
    }

    /// The initial record this script describes.
    pub fn record(&self) -> ProcessingRecord {
        let record = ProcessingRecord::new(self.document.clone());
        match &self.job_requirement {
            Some(job) => record.with_job_requirement(job.clone()),
            None => record,
        }
    }
}

/// One object playing every collaborator, answering from a [`Script`].
///
/// Clones share the call counters.
#[derive(Debug, Clone)]
pub struct ScriptedCollaborators {
    script: Arc<Script>,
    generations: Arc<AtomicUsize>,
    validations: Arc<AtomicUsize>,
}

impl ScriptedCollaborators {
    pub fn new(script: Script) -> Self {
        Self {
            script: Arc::new(script),
            generations: Arc::new(AtomicUsize::new(0)),
            validations: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn script(&self) -> &Script {
        &self.script
    }

    /// Question generator calls so far, first generation included.
    pub fn generations(&self) -> usize {
        self.generations.load(Ordering::SeqCst)
    }

    pub fn validations(&self) -> usize {
        self.validations.load(Ordering::SeqCst)
    }

    pub fn collaborators(&self) -> Collaborators {
        let this = Arc::new(self.clone());
        Collaborators {
            extractor: this.clone(),
            job_matcher: this.clone(),
            scorer: this.clone(),
            social: this.clone(),
            projects: this.clone(),
            world_check: this.clone(),
            assessor: this.clone(),
            reporter: this.clone(),
            question_generator: this.clone(),
            question_validator: this,
        }
    }

    /// Apply the scripted delay, then the scripted failure, for `name`.
    async fn gate(&self, name: &str) -> Result<()> {
        if let Some(ms) = self.script.delays_ms.get(name) {
            tokio::time::sleep(Duration::from_millis(*ms)).await;
        }
        match self.script.failures.get(name) {
            Some(message) => Err(CvflowError::collaborator(name, message.clone())),
            None => Ok(()),
        }
    }

    fn next_questions(&self) -> InterviewQuestions {
        let round = self.generations.fetch_add(1, Ordering::SeqCst);
        let rounds = &self.script.question_rounds;
        rounds
            .get(round)
            .or_else(|| rounds.last())
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl DocumentExtractor for ScriptedCollaborators {
    async fn extract(&self, _document: &DocumentRef) -> Result<CandidateProfile> {
        self.gate("extractor").await?;
        Ok(self.script.profile.clone())
    }
}

#[async_trait]
impl JobMatcher for ScriptedCollaborators {
    async fn best_match(&self, _profile: &CandidateProfile) -> Result<Option<JobRequirement>> {
        self.gate("job_matcher").await?;
        Ok(self.script.matched_job.clone())
    }
}

#[async_trait]
impl CvScorer for ScriptedCollaborators {
    async fn score(&self, _profile: &CandidateProfile, _job: &JobRequirement) -> Result<ScoreResult> {
        self.gate("scorer").await?;
        Ok(self.script.score.clone())
    }
}

#[async_trait]
impl SocialScreener for ScriptedCollaborators {
    async fn screen(&self, _profile_url: &str) -> Result<Option<SocialScore>> {
        self.gate("social").await?;
        Ok(self.script.social.clone())
    }
}

#[async_trait]
impl ProjectScreener for ScriptedCollaborators {
    async fn summarize(&self, _profile_url: &str) -> Result<Option<ProjectInfo>> {
        self.gate("projects").await?;
        Ok(self.script.projects.clone())
    }
}

#[async_trait]
impl WorldCheckRegistry for ScriptedCollaborators {
    async fn lookup(&self, _profile: &CandidateProfile) -> Result<Option<WorldCheckRecord>> {
        self.gate("world_check").await?;
        Ok(self.script.world_check.clone())
    }
}

#[async_trait]
impl Assessor for ScriptedCollaborators {
    async fn assess(&self, _inputs: AssessmentInputs<'_>) -> Result<FinalAssessment> {
        self.gate("assessor").await?;
        Ok(self.script.assessment.clone())
    }
}

#[async_trait]
impl ReportWriter for ScriptedCollaborators {
    async fn write_report(
        &self,
        profile: &CandidateProfile,
        assessment: &FinalAssessment,
    ) -> Result<CandidateReport> {
        self.gate("reporter").await?;
        Ok(self.script.report.clone().unwrap_or_else(|| CandidateReport {
            candidate_name: profile.name.clone(),
            summary: profile.summary.clone().unwrap_or_default(),
            recommendation: assessment.final_recommendation.clone(),
        }))
    }
}

#[async_trait]
impl QuestionGenerator for ScriptedCollaborators {
    async fn generate(
        &self,
        _profile: &CandidateProfile,
        _job: &JobRequirement,
    ) -> Result<InterviewQuestions> {
        self.gate("question_generator").await?;
        Ok(self.next_questions())
    }

    async fn regenerate(
        &self,
        _profile: &CandidateProfile,
        _job: &JobRequirement,
        _previous: &InterviewQuestions,
        _flagged: &[FlaggedQuestion],
    ) -> Result<InterviewQuestions> {
        self.gate("question_generator").await?;
        Ok(self.next_questions())
    }
}

#[async_trait]
impl QuestionValidator for ScriptedCollaborators {
    async fn validate(
        &self,
        questions: &InterviewQuestions,
        _profile: &CandidateProfile,
        _job: &JobRequirement,
    ) -> Result<Vec<FlaggedQuestion>> {
        self.gate("question_validator").await?;
        let round = self.validations.fetch_add(1, Ordering::SeqCst);
        let count = self.script.flag_counts.get(round).copied().unwrap_or(0);
        Ok(questions
            .validated_questions()
            .take(count)
            .map(|q| FlaggedQuestion::new(q, 0.1, 0.1))
            .collect())
    }
}

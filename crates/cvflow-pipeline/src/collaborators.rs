//! External collaborators the steps call out to.
//!
//! Each trait stands for one external service (document parser, model-backed
//! scorer, web crawler, registry lookup). Implementations are expected to be
//! async; wrap blocking clients in `tokio::task::spawn_blocking` so parallel
//! branches really run side by side.

use std::sync::Arc;

use async_trait::async_trait;

use cvflow_types::{
    CandidateProfile, CandidateReport, DocumentRef, FinalAssessment, FlaggedQuestion,
    InterviewQuestions, JobRequirement, ProjectInfo, Result, ScoreResult, SocialScore,
    WorldCheckRecord,
};

#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    async fn extract(&self, document: &DocumentRef) -> Result<CandidateProfile>;
}

/// Picks the job posting that best fits a candidate. `None` when nothing
/// clears the match threshold.
#[async_trait]
pub trait JobMatcher: Send + Sync {
    async fn best_match(&self, profile: &CandidateProfile) -> Result<Option<JobRequirement>>;
}

#[async_trait]
pub trait CvScorer: Send + Sync {
    async fn score(&self, profile: &CandidateProfile, job: &JobRequirement) -> Result<ScoreResult>;
}

/// Screens a public social profile. `None` when the profile has nothing to screen.
#[async_trait]
pub trait SocialScreener: Send + Sync {
    async fn screen(&self, profile_url: &str) -> Result<Option<SocialScore>>;
}

#[async_trait]
pub trait ProjectScreener: Send + Sync {
    async fn summarize(&self, profile_url: &str) -> Result<Option<ProjectInfo>>;
}

/// Compliance registry lookup. `None` means the candidate was not found.
#[async_trait]
pub trait WorldCheckRegistry: Send + Sync {
    async fn lookup(&self, profile: &CandidateProfile) -> Result<Option<WorldCheckRecord>>;
}

/// Everything the assessor may weigh. Screening results are `None` when
/// skipped or not found.
#[derive(Debug, Clone, Copy)]
pub struct AssessmentInputs<'a> {
    pub profile: &'a CandidateProfile,
    pub job: &'a JobRequirement,
    pub score: &'a ScoreResult,
    pub social: Option<&'a SocialScore>,
    pub projects: Option<&'a ProjectInfo>,
    pub world_check: Option<&'a WorldCheckRecord>,
}

#[async_trait]
pub trait Assessor: Send + Sync {
    async fn assess(&self, inputs: AssessmentInputs<'_>) -> Result<FinalAssessment>;
}

#[async_trait]
pub trait ReportWriter: Send + Sync {
    async fn write_report(
        &self,
        profile: &CandidateProfile,
        assessment: &FinalAssessment,
    ) -> Result<CandidateReport>;
}

#[async_trait]
pub trait QuestionGenerator: Send + Sync {
    async fn generate(
        &self,
        profile: &CandidateProfile,
        job: &JobRequirement,
    ) -> Result<InterviewQuestions>;

    /// Produce a new set given the previous one and the questions flagged in it.
    async fn regenerate(
        &self,
        profile: &CandidateProfile,
        job: &JobRequirement,
        previous: &InterviewQuestions,
        flagged: &[FlaggedQuestion],
    ) -> Result<InterviewQuestions>;
}

/// Flags questions that are not grounded in the CV or the job requirement.
#[async_trait]
pub trait QuestionValidator: Send + Sync {
    async fn validate(
        &self,
        questions: &InterviewQuestions,
        profile: &CandidateProfile,
        job: &JobRequirement,
    ) -> Result<Vec<FlaggedQuestion>>;
}

/// Text embedding backend.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// A job posting with its precomputed embedding.
#[derive(Debug, Clone)]
pub struct IndexedPosting {
    pub requirement: JobRequirement,
    pub embedding: Vec<f32>,
}

#[async_trait]
pub trait JobCatalog: Send + Sync {
    async fn postings(&self) -> Result<Vec<IndexedPosting>>;
}

/// The full set of collaborators one screening run needs.
#[derive(Clone)]
pub struct Collaborators {
    pub extractor: Arc<dyn DocumentExtractor>,
    pub job_matcher: Arc<dyn JobMatcher>,
    pub scorer: Arc<dyn CvScorer>,
    pub social: Arc<dyn SocialScreener>,
    pub projects: Arc<dyn ProjectScreener>,
    pub world_check: Arc<dyn WorldCheckRegistry>,
    pub assessor: Arc<dyn Assessor>,
    pub reporter: Arc<dyn ReportWriter>,
    pub question_generator: Arc<dyn QuestionGenerator>,
    pub question_validator: Arc<dyn QuestionValidator>,
}

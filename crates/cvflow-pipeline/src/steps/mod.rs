//! The business steps of the screening workflow and the terminal error step.

mod assessment;
mod error_handler;
mod extraction;
mod interview;
mod job_posting;
mod scoring;
mod screening;

pub use assessment::{AssessmentStep, ReportStep};
pub use error_handler::ErrorHandlerStep;
pub use extraction::ExtractionStep;
pub use interview::{InterviewQuestionsStep, QuestionRefiner};
pub use job_posting::JobPostingStep;
pub use scoring::ScoringStep;
pub use screening::{ProjectScreeningStep, SocialScreeningStep, WorldCheckStep};

use cvflow_types::{
    CandidateProfile, CvflowError, EngineConfig, Field, JobRequirement, ProcessingRecord,
    Result, StepId,
};

use crate::collaborators::Collaborators;
use crate::retry::RegenerationPolicy;
use crate::step::StepRegistry;

/// Registry holding every screening step wired to `collaborators`.
pub fn screening_registry(collaborators: &Collaborators, config: &EngineConfig) -> StepRegistry {
    let c = collaborators.clone();
    let mut registry = StepRegistry::new();
    registry.register(ExtractionStep::new(c.extractor));
    registry.register(JobPostingStep::new(c.job_matcher));
    registry.register(ScoringStep::new(c.scorer));
    registry.register(SocialScreeningStep::new(c.social));
    registry.register(ProjectScreeningStep::new(c.projects));
    registry.register(WorldCheckStep::new(c.world_check));
    registry.register(AssessmentStep::new(c.assessor));
    registry.register(ReportStep::new(c.reporter));
    registry.register(InterviewQuestionsStep::new(
        c.question_generator,
        c.question_validator,
        RegenerationPolicy::from_config(config),
    ));
    registry.register(ErrorHandlerStep);
    registry
}

fn require_profile(record: &ProcessingRecord, step: StepId) -> Result<&CandidateProfile> {
    record
        .candidate_profile()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| CvflowError::input_missing(step, Field::CandidateProfile))
}

fn require_job(record: &ProcessingRecord, step: StepId) -> Result<&JobRequirement> {
    record
        .job_requirement()
        .filter(|j| !j.is_empty())
        .ok_or_else(|| CvflowError::input_missing(step, Field::JobRequirement))
}

/// A profile URL worth screening: present and not blank.
fn usable_url(url: Option<&String>) -> Option<&str> {
    url.map(|u| u.trim()).filter(|u| !u.is_empty())
}

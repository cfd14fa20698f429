//! Routers: pure functions from the record to the next step(s).
//!
//! Every router checks the error flag first and diverts to the error handler,
//! so a failure anywhere ends the run through the same path.

use cvflow_types::{ProcessingRecord, StepId};

/// Where the scheduler goes after a step completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// No successor; this branch of the run is done.
    Terminal,
    Single(StepId),
    /// Fan out to branches that run concurrently.
    Parallel(Vec<StepId>),
}

impl Route {
    pub fn targets(&self) -> Vec<StepId> {
        match self {
            Route::Terminal => Vec::new(),
            Route::Single(step) => vec![*step],
            Route::Parallel(steps) => steps.clone(),
        }
    }
}

pub type Router = fn(&ProcessingRecord) -> Route;

/// Steps run concurrently between job-posting determination and assessment.
pub const SCREENING_BRANCHES: [StepId; 4] = [
    StepId::Scoring,
    StepId::SocialScreening,
    StepId::ProjectScreening,
    StepId::WorldCheck,
];

fn on_error(record: &ProcessingRecord) -> Option<Route> {
    record
        .has_error()
        .then_some(Route::Single(StepId::ErrorHandler))
}

pub fn after_extraction(record: &ProcessingRecord) -> Route {
    on_error(record).unwrap_or(Route::Single(StepId::JobPosting))
}

pub fn after_job_posting(record: &ProcessingRecord) -> Route {
    on_error(record).unwrap_or_else(|| Route::Parallel(SCREENING_BRANCHES.to_vec()))
}

/// Shared by every screening branch; the scheduler holds assessment until all
/// branches have finished.
pub fn after_screening_branch(record: &ProcessingRecord) -> Route {
    on_error(record).unwrap_or(Route::Single(StepId::Assessment))
}

pub fn after_assessment(record: &ProcessingRecord) -> Route {
    on_error(record).unwrap_or(Route::Single(StepId::Report))
}

pub fn after_report(record: &ProcessingRecord) -> Route {
    on_error(record).unwrap_or_else(|| {
        if record.proceed_to_interview() {
            Route::Single(StepId::InterviewQuestions)
        } else {
            Route::Terminal
        }
    })
}

pub fn after_interview_questions(record: &ProcessingRecord) -> Route {
    on_error(record).unwrap_or(Route::Terminal)
}

pub fn after_error_handler(_: &ProcessingRecord) -> Route {
    Route::Terminal
}

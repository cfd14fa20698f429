use std::sync::Arc;

use async_trait::async_trait;

use cvflow_types::{LogLevel, ProcessingRecord, RecordUpdate, Result, StepId};

use super::require_profile;
use crate::collaborators::JobMatcher;
use crate::events::StepEvents;
use crate::step::Step;

/// Determines the job requirement the candidate is screened against.
///
/// A requirement supplied when the record was created is kept as is. When the
/// matcher finds nothing the requirement stays empty and the run carries on;
/// scoring then reports the missing input.
pub struct JobPostingStep {
    matcher: Arc<dyn JobMatcher>,
}

impl JobPostingStep {
    pub fn new(matcher: Arc<dyn JobMatcher>) -> Self {
        Self { matcher }
    }
}

#[async_trait]
impl Step for JobPostingStep {
    fn id(&self) -> StepId {
        StepId::JobPosting
    }

    async fn run(&self, record: &ProcessingRecord, events: &StepEvents) -> Result<RecordUpdate> {
        if let Some(job) = record.job_requirement().filter(|j| !j.is_empty()) {
            return Ok(RecordUpdate::new().log(
                LogLevel::Info,
                format!("Using provided job requirement '{}'", job.title),
            ));
        }

        let profile = require_profile(record, StepId::JobPosting)?;
        events.progress("Evaluating job postings");
        match self.matcher.best_match(profile).await? {
            Some(job) => {
                tracing::info!(job = %job.title, "Job posting determined");
                let message = format!("Job posting determined: {}", job.title);
                Ok(RecordUpdate {
                    job_requirement: Some(job),
                    ..RecordUpdate::new()
                }
                .log(LogLevel::Success, message))
            }
            None => {
                tracing::warn!("No job posting matched the candidate");
                Ok(RecordUpdate::new().log(
                    LogLevel::Warning,
                    "No job posting matched the candidate above the threshold",
                ))
            }
        }
    }
}

use std::sync::Arc;

use async_trait::async_trait;

use cvflow_types::{LogLevel, ProcessingRecord, RecordUpdate, Result, Slot, StepId};

use super::{require_job, require_profile};
use crate::collaborators::CvScorer;
use crate::events::StepEvents;
use crate::step::Step;

pub struct ScoringStep {
    scorer: Arc<dyn CvScorer>,
}

impl ScoringStep {
    pub fn new(scorer: Arc<dyn CvScorer>) -> Self {
        Self { scorer }
    }
}

#[async_trait]
impl Step for ScoringStep {
    fn id(&self) -> StepId {
        StepId::Scoring
    }

    async fn run(&self, record: &ProcessingRecord, events: &StepEvents) -> Result<RecordUpdate> {
        let profile = require_profile(record, StepId::Scoring)?;
        let job = require_job(record, StepId::Scoring)?;
        events.progress(format!("Scoring CV against '{}'", job.title));

        let score = self.scorer.score(profile, job).await?;
        tracing::info!(fit = %score.overall_recommendation, "CV scored");
        Ok(RecordUpdate {
            score_result: Some(Slot::Value(score)),
            ..RecordUpdate::new()
        }
        .log(LogLevel::Success, "CV scored"))
    }
}

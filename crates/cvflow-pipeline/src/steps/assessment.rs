use std::sync::Arc;

use async_trait::async_trait;

use cvflow_types::{CvflowError, Field, LogLevel, ProcessingRecord, RecordUpdate, Result, StepId};

use super::{require_job, require_profile};
use crate::collaborators::{AssessmentInputs, Assessor, ReportWriter};
use crate::events::StepEvents;
use crate::step::Step;

/// Join point of the screening branches. Weighs the CV score together with
/// whatever the optional branches produced.
pub struct AssessmentStep {
    assessor: Arc<dyn Assessor>,
}

impl AssessmentStep {
    pub fn new(assessor: Arc<dyn Assessor>) -> Self {
        Self { assessor }
    }
}

#[async_trait]
impl Step for AssessmentStep {
    fn id(&self) -> StepId {
        StepId::Assessment
    }

    async fn run(&self, record: &ProcessingRecord, events: &StepEvents) -> Result<RecordUpdate> {
        let score = record
            .score_result()
            .value()
            .ok_or_else(|| CvflowError::input_missing(StepId::Assessment, Field::ScoreResult))?;
        let inputs = AssessmentInputs {
            profile: require_profile(record, StepId::Assessment)?,
            job: require_job(record, StepId::Assessment)?,
            score,
            social: record.social_score().value(),
            projects: record.project_info().value(),
            world_check: record.world_check().value(),
        };
        events.progress("Assessing candidate");

        let assessment = self.assessor.assess(inputs).await?;
        tracing::info!(
            recommendation = %assessment.final_recommendation,
            proceed = assessment.proceed_to_interview,
            "Candidate assessed"
        );
        let message = format!(
            "Final assessment: {} (proceed to interview: {})",
            assessment.final_recommendation,
            if assessment.proceed_to_interview { "Yes" } else { "No" }
        );
        Ok(RecordUpdate {
            final_assessment: Some(assessment),
            ..RecordUpdate::new()
        }
        .log(LogLevel::Success, message))
    }
}

pub struct ReportStep {
    writer: Arc<dyn ReportWriter>,
}

impl ReportStep {
    pub fn new(writer: Arc<dyn ReportWriter>) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl Step for ReportStep {
    fn id(&self) -> StepId {
        StepId::Report
    }

    async fn run(&self, record: &ProcessingRecord, events: &StepEvents) -> Result<RecordUpdate> {
        let profile = require_profile(record, StepId::Report)?;
        let assessment = record
            .final_assessment()
            .ok_or_else(|| CvflowError::input_missing(StepId::Report, Field::FinalAssessment))?;
        events.progress("Writing candidate report");

        let report = self.writer.write_report(profile, assessment).await?;
        Ok(RecordUpdate {
            candidate_report: Some(report),
            ..RecordUpdate::new()
        }
        .log(LogLevel::Success, "Report generated"))
    }
}

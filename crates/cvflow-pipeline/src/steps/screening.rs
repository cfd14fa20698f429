//! The optional screening branches: social presence, public projects, and
//! the compliance registry. Each one degrades to `Slot::Skipped` when there
//! is nothing to screen.

use std::sync::Arc;

use async_trait::async_trait;

use cvflow_types::{LogLevel, ProcessingRecord, RecordUpdate, Result, Slot, StepId};

use super::{require_profile, usable_url};
use crate::collaborators::{ProjectScreener, SocialScreener, WorldCheckRegistry};
use crate::events::StepEvents;
use crate::step::Step;

// ---------------------------------------------------------------------------
// Social screening
// ---------------------------------------------------------------------------

pub struct SocialScreeningStep {
    screener: Arc<dyn SocialScreener>,
}

impl SocialScreeningStep {
    pub fn new(screener: Arc<dyn SocialScreener>) -> Self {
        Self { screener }
    }
}

#[async_trait]
impl Step for SocialScreeningStep {
    fn id(&self) -> StepId {
        StepId::SocialScreening
    }

    async fn run(&self, record: &ProcessingRecord, events: &StepEvents) -> Result<RecordUpdate> {
        let profile = require_profile(record, StepId::SocialScreening)?;
        let Some(url) = usable_url(profile.linkedin_url.as_ref()) else {
            let reason = "No LinkedIn URL available for screening";
            return Ok(RecordUpdate {
                social_score: Some(Slot::Skipped(reason.into())),
                ..RecordUpdate::new()
            }
            .log(LogLevel::Warning, reason));
        };

        events.progress(format!("Screening {url}"));
        let update = match self.screener.screen(url).await? {
            Some(score) => {
                tracing::info!(recommendation = %score.screening_recommendation, "Social profile screened");
                RecordUpdate {
                    social_score: Some(Slot::Value(score)),
                    ..RecordUpdate::new()
                }
                .log(LogLevel::Success, "Social media screening completed")
            }
            None => {
                let reason = "No social media information available";
                RecordUpdate {
                    social_score: Some(Slot::Skipped(reason.into())),
                    ..RecordUpdate::new()
                }
                .log(LogLevel::Info, reason)
            }
        };
        Ok(update)
    }
}

// ---------------------------------------------------------------------------
// Project screening
// ---------------------------------------------------------------------------

pub struct ProjectScreeningStep {
    screener: Arc<dyn ProjectScreener>,
}

impl ProjectScreeningStep {
    pub fn new(screener: Arc<dyn ProjectScreener>) -> Self {
        Self { screener }
    }
}

#[async_trait]
impl Step for ProjectScreeningStep {
    fn id(&self) -> StepId {
        StepId::ProjectScreening
    }

    async fn run(&self, record: &ProcessingRecord, events: &StepEvents) -> Result<RecordUpdate> {
        let profile = require_profile(record, StepId::ProjectScreening)?;
        let Some(url) = usable_url(profile.github_url.as_ref()) else {
            let reason = "No GitHub URL available for screening";
            return Ok(RecordUpdate {
                project_info: Some(Slot::Skipped(reason.into())),
                ..RecordUpdate::new()
            }
            .log(LogLevel::Warning, reason));
        };

        events.progress(format!("Summarizing projects at {url}"));
        let update = match self.screener.summarize(url).await? {
            Some(info) => {
                tracing::info!(repositories = info.repositories.len(), "Projects screened");
                RecordUpdate {
                    project_info: Some(Slot::Value(info)),
                    ..RecordUpdate::new()
                }
                .log(LogLevel::Success, "Projects screening completed")
            }
            None => {
                let reason = "No project information available";
                RecordUpdate {
                    project_info: Some(Slot::Skipped(reason.into())),
                    ..RecordUpdate::new()
                }
                .log(LogLevel::Info, reason)
            }
        };
        Ok(update)
    }
}

// ---------------------------------------------------------------------------
// World check
// ---------------------------------------------------------------------------

pub struct WorldCheckStep {
    registry: Arc<dyn WorldCheckRegistry>,
}

impl WorldCheckStep {
    pub fn new(registry: Arc<dyn WorldCheckRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Step for WorldCheckStep {
    fn id(&self) -> StepId {
        StepId::WorldCheck
    }

    async fn run(&self, record: &ProcessingRecord, events: &StepEvents) -> Result<RecordUpdate> {
        let profile = require_profile(record, StepId::WorldCheck)?;
        events.progress(format!("Looking up {}", profile.name));

        let update = match self.registry.lookup(profile).await? {
            Some(entry) => RecordUpdate {
                world_check: Some(Slot::Value(entry)),
                ..RecordUpdate::new()
            }
            .log(LogLevel::Success, "Candidate world check complete"),
            None => {
                let reason = "No record in the world check registry";
                RecordUpdate {
                    world_check: Some(Slot::Skipped(reason.into())),
                    ..RecordUpdate::new()
                }
                .log(LogLevel::Info, reason)
            }
        };
        Ok(update)
    }
}

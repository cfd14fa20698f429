use std::sync::Arc;

use async_trait::async_trait;

use cvflow_types::{CvflowError, LogLevel, ProcessingRecord, RecordUpdate, Result, StepId};

use crate::collaborators::DocumentExtractor;
use crate::events::StepEvents;
use crate::step::Step;

/// Turns the source document into a structured candidate profile.
pub struct ExtractionStep {
    extractor: Arc<dyn DocumentExtractor>,
}

impl ExtractionStep {
    pub fn new(extractor: Arc<dyn DocumentExtractor>) -> Self {
        Self { extractor }
    }
}

#[async_trait]
impl Step for ExtractionStep {
    fn id(&self) -> StepId {
        StepId::Extraction
    }

    async fn run(&self, record: &ProcessingRecord, events: &StepEvents) -> Result<RecordUpdate> {
        let document = record.source_document();
        if document.is_empty() {
            return Err(CvflowError::InputMissing {
                step: StepId::Extraction.name().to_string(),
                field: "source_document".to_string(),
            });
        }
        events.progress(format!("Extracting {}", document.as_str()));

        let profile = self.extractor.extract(document).await?;
        if profile.is_empty() {
            return Err(CvflowError::collaborator(
                "document_extractor",
                format!("no content extracted from {}", document.as_str()),
            ));
        }
        tracing::info!(candidate = %profile.name, skills = profile.skills.len(), "CV extracted");

        Ok(RecordUpdate {
            candidate_profile: Some(profile),
            ..RecordUpdate::new()
        }
        .log(LogLevel::Success, "CV extracted successfully"))
    }
}

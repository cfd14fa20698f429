use async_trait::async_trait;

use cvflow_types::{CvflowError, LogLevel, ProcessingRecord, RecordUpdate, Result, StepId};

use crate::events::StepEvents;
use crate::step::Step;

/// Terminal step of the error path. Records why the run stopped.
pub struct ErrorHandlerStep;

#[async_trait]
impl Step for ErrorHandlerStep {
    fn id(&self) -> StepId {
        StepId::ErrorHandler
    }

    async fn run(&self, record: &ProcessingRecord, _events: &StepEvents) -> Result<RecordUpdate> {
        let error = record.error_flag().ok_or_else(|| {
            CvflowError::Other("error handler reached without an error".into())
        })?;
        Ok(RecordUpdate::new().log(LogLevel::Error, format!("Screening aborted: {error}")))
    }
}

//! Shared types, errors, domain models, and the processing record for the cvflow engine.
//!
//! This crate provides the foundational types used across the other cvflow crates:
//! - `CvflowError`: unified error taxonomy
//! - `ProcessingRecord`: the single mutable state threaded through a screening run
//! - `StepId` / `Field`: the closed set of steps and the record fields they own
//! - domain models exchanged with the external collaborators
//! - `EngineConfig`: tunables for the retry controller and semantic checks

pub mod models;
pub mod record;

pub use models::{
    CandidateProfile, CandidateReport, DocumentRef, Education, Experience, FinalAssessment,
    FlaggedQuestion, InterviewQuestions, JobRequirement, ProjectInfo, RepositoryInfo,
    ScoreDetail, ScoreResult, SocialScore, WorldCheckRecord,
};
pub use record::{
    Field, LogEntry, LogLevel, MessageLog, ProcessingRecord, RecordUpdate, Slot, StepId,
};

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Unified error type for all cvflow subsystems.
#[derive(Debug, thiserror::Error)]
pub enum CvflowError {
    // === Run errors ===
    #[error("Step '{step}' is missing required input '{field}'")]
    InputMissing { step: String, field: String },

    #[error("Collaborator '{collaborator}' failed: {message}")]
    Collaborator {
        collaborator: String,
        message: String,
    },

    #[error("Routing error after '{from}': {message}")]
    Routing { from: String, message: String },

    #[error("Step '{step}' wrote field '{field}' it does not own")]
    OwnershipViolation { step: String, field: String },

    // === Setup errors ===
    #[error("Workflow validation failed: {0}")]
    WorkflowInvalid(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Step task failed: {0}")]
    Task(String),

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl CvflowError {
    /// Shorthand for an input-missing error raised by `step`.
    pub fn input_missing(step: StepId, field: Field) -> Self {
        CvflowError::InputMissing {
            step: step.name().to_string(),
            field: field.name().to_string(),
        }
    }

    /// Shorthand for a failed external collaborator call.
    pub fn collaborator(collaborator: impl Into<String>, message: impl Into<String>) -> Self {
        CvflowError::Collaborator {
            collaborator: collaborator.into(),
            message: message.into(),
        }
    }

    pub fn is_input_missing(&self) -> bool {
        matches!(self, CvflowError::InputMissing { .. })
    }

    /// Taxonomy label used in logs and event payloads.
    pub fn category(&self) -> &'static str {
        match self {
            CvflowError::InputMissing { .. } => "input-missing",
            CvflowError::Collaborator { .. } => "collaborator",
            CvflowError::Routing { .. } | CvflowError::OwnershipViolation { .. } => "routing",
            _ => "internal",
        }
    }
}

/// A convenience alias for `Result<T, CvflowError>`.
pub type Result<T> = std::result::Result<T, CvflowError>;

// ---------------------------------------------------------------------------
// EngineConfig: tunables for a screening run
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Regenerations allowed after the first interview-question set.
    pub max_question_retries: usize,
    /// Questions below this similarity to both the CV and the job are flagged.
    pub similarity_threshold: f32,
    /// A job posting must score strictly above this to be selected.
    pub job_match_threshold: f32,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Delay between regenerations, in milliseconds. Zero disables it.
    pub regeneration_backoff_ms: u64,
    /// When set, the delay doubles on every regeneration up to this ceiling.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regeneration_backoff_max_ms: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_question_retries: 2,
            similarity_threshold: 0.5,
            job_match_threshold: 0.4,
            chunk_size: 2000,
            chunk_overlap: 200,
            regeneration_backoff_ms: 0,
            regeneration_backoff_max_ms: None,
        }
    }
}

impl EngineConfig {
    /// Read a JSON config file. Missing keys fall back to the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "Engine config loaded");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(CvflowError::Config("chunk_size must be positive".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(CvflowError::Config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        for (name, value) in [
            ("similarity_threshold", self.similarity_threshold),
            ("job_match_threshold", self.job_match_threshold),
        ] {
            if !(-1.0..=1.0).contains(&value) {
                return Err(CvflowError::Config(format!(
                    "{name} must lie in [-1, 1], got {value}"
                )));
            }
        }
        if let Some(max) = self.regeneration_backoff_max_ms {
            if max < self.regeneration_backoff_ms {
                return Err(CvflowError::Config(format!(
                    "regeneration_backoff_max_ms ({max}) must not be below regeneration_backoff_ms ({})",
                    self.regeneration_backoff_ms
                )));
            }
        }
        Ok(())
    }
}

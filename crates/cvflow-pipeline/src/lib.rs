//! Screening workflow scheduler, steps, routers, and validators.
//!
//! This crate implements the cvflow screening runner: a static workflow graph
//! with one router per step, a scheduler that fans the screening branches out
//! onto tokio tasks and joins them before assessment, the bounded
//! regenerate/validate loop for interview questions, and the event stream a
//! caller watches while a run progresses.

pub mod collaborators;
pub mod engine;
pub mod events;
pub mod graph;
pub mod retry;
pub mod router;
pub mod scripted;
pub mod semantic;
pub mod step;
pub mod steps;
pub mod validation;

pub use collaborators::{
    AssessmentInputs, Assessor, Collaborators, CvScorer, DocumentExtractor, Embedder,
    IndexedPosting, JobCatalog, JobMatcher, ProjectScreener, QuestionGenerator,
    QuestionValidator, ReportWriter, SocialScreener, WorldCheckRegistry,
};
pub use engine::{RunOutcome, RunReport, ScreeningExecutor, StepState};
pub use events::{EventEmitter, EventKind, EventStream, RunEvent, StepEvents};
pub use graph::{Workflow, WorkflowBuilder, WorkflowEdge};
pub use retry::{refine_until_valid, BackoffPolicy, Refine, Refined, RegenerationPolicy};
pub use router::{Route, Router};
pub use scripted::{Script, ScriptedCollaborators};
pub use semantic::{
    cosine_similarity, Chunker, EmbeddingJobMatcher, EmbeddingQuestionValidator, HashingEmbedder,
};
pub use step::{Step, StepRegistry};
pub use steps::screening_registry;
pub use validation::{validate, validate_or_raise, Diagnostic, LintRule, Severity};

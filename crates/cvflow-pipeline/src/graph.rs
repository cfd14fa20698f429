use std::collections::BTreeMap;

use cvflow_types::StepId;

use crate::router::{self, Router, SCREENING_BRANCHES};

/// Static workflow definition: steps, their routers, and the declared edges
/// routers are allowed to take.
///
/// Edges into the error step are implicit; every step may divert there.
#[derive(Clone)]
pub struct Workflow {
    pub name: String,
    entry: StepId,
    error_step: StepId,
    routers: BTreeMap<StepId, Router>,
    edges: Vec<WorkflowEdge>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkflowEdge {
    pub from: StepId,
    pub to: StepId,
}

impl Workflow {
    pub fn builder(name: impl Into<String>, entry: StepId) -> WorkflowBuilder {
        WorkflowBuilder {
            name: name.into(),
            entry,
            error_step: StepId::ErrorHandler,
            routers: BTreeMap::new(),
            edges: Vec::new(),
        }
    }

    /// The CV screening workflow:
    ///
    /// ```text
    /// extraction -> job_posting -> { scoring | social_screening | project_screening | world_check }
    ///            -> assessment -> report -> (proceed ? interview_questions : end)
    /// ```
    pub fn screening() -> Self {
        let mut builder = Workflow::builder("cv_screening", StepId::Extraction)
            .step(StepId::Extraction, router::after_extraction)
            .step(StepId::JobPosting, router::after_job_posting)
            .step(StepId::Assessment, router::after_assessment)
            .step(StepId::Report, router::after_report)
            .step(StepId::InterviewQuestions, router::after_interview_questions)
            .step(StepId::ErrorHandler, router::after_error_handler)
            .edge(StepId::Extraction, StepId::JobPosting)
            .edge(StepId::Assessment, StepId::Report)
            .edge(StepId::Report, StepId::InterviewQuestions);
        for branch in SCREENING_BRANCHES {
            builder = builder
                .step(branch, router::after_screening_branch)
                .edge(StepId::JobPosting, branch)
                .edge(branch, StepId::Assessment);
        }
        builder.build()
    }

    pub fn entry(&self) -> StepId {
        self.entry
    }

    pub fn error_step(&self) -> StepId {
        self.error_step
    }

    pub fn router(&self, step: StepId) -> Option<Router> {
        self.routers.get(&step).copied()
    }

    pub fn steps(&self) -> impl Iterator<Item = StepId> + '_ {
        self.routers.keys().copied()
    }

    pub fn contains(&self, step: StepId) -> bool {
        self.routers.contains_key(&step)
    }

    pub fn edges(&self) -> &[WorkflowEdge] {
        &self.edges
    }

    pub fn has_edge(&self, from: StepId, to: StepId) -> bool {
        self.edges.iter().any(|e| e.from == from && e.to == to)
    }

    pub fn successors(&self, step: StepId) -> Vec<StepId> {
        self.edges
            .iter()
            .filter(|e| e.from == step)
            .map(|e| e.to)
            .collect()
    }

    pub fn predecessors(&self, step: StepId) -> Vec<StepId> {
        self.edges
            .iter()
            .filter(|e| e.to == step)
            .map(|e| e.from)
            .collect()
    }
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("name", &self.name)
            .field("entry", &self.entry)
            .field("error_step", &self.error_step)
            .field("steps", &self.routers.keys().collect::<Vec<_>>())
            .field("edges", &self.edges)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// WorkflowBuilder
// ---------------------------------------------------------------------------

pub struct WorkflowBuilder {
    name: String,
    entry: StepId,
    error_step: StepId,
    routers: BTreeMap<StepId, Router>,
    edges: Vec<WorkflowEdge>,
}

impl WorkflowBuilder {
    pub fn step(mut self, step: StepId, router: Router) -> Self {
        self.routers.insert(step, router);
        self
    }

    pub fn edge(mut self, from: StepId, to: StepId) -> Self {
        let edge = WorkflowEdge { from, to };
        if !self.edges.contains(&edge) {
            self.edges.push(edge);
        }
        self
    }

    pub fn error_step(mut self, step: StepId) -> Self {
        self.error_step = step;
        self
    }

    /// Finish the definition. Structural checks live in [`crate::validation`].
    pub fn build(self) -> Workflow {
        Workflow {
            name: self.name,
            entry: self.entry,
            error_step: self.error_step,
            routers: self.routers,
            edges: self.edges,
        }
    }
}

//! Step trait and step registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use cvflow_types::{ProcessingRecord, RecordUpdate, Result, StepId};

use crate::events::StepEvents;

// ---------------------------------------------------------------------------
// Step trait
// ---------------------------------------------------------------------------

/// One unit of work in the screening workflow.
///
/// A step reads an immutable snapshot of the record and returns the update it
/// wants merged. It must only assign the fields its [`StepId`] owns; the
/// scheduler rejects anything else.
#[async_trait]
pub trait Step: Send + Sync {
    fn id(&self) -> StepId;

    async fn run(&self, record: &ProcessingRecord, events: &StepEvents) -> Result<RecordUpdate>;
}

// ---------------------------------------------------------------------------
// StepRegistry
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct StepRegistry {
    steps: HashMap<StepId, Arc<dyn Step>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a step under its own id, replacing any previous one.
    pub fn register(&mut self, step: impl Step + 'static) {
        self.steps.insert(step.id(), Arc::new(step));
    }

    pub fn get(&self, id: StepId) -> Option<Arc<dyn Step>> {
        self.steps.get(&id).cloned()
    }

    pub fn has(&self, id: StepId) -> bool {
        self.steps.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl std::fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<_> = self.steps.keys().collect();
        ids.sort();
        f.debug_struct("StepRegistry").field("steps", &ids).finish()
    }
}

use std::sync::Arc;

use tracing::debug;

use tour_core::types::StepRecord;
use tour_core::{TourError, TourResult, User};

use crate::registry::DefinitionRegistry;

/// Runs step predicates over a flattened sequence for one user.
#[derive(Debug, Clone)]
pub struct CompletionEvaluator {
    registry: Arc<DefinitionRegistry>,
}

impl CompletionEvaluator {
    pub fn new(registry: Arc<DefinitionRegistry>) -> Self {
        Self { registry }
    }

    /// Evaluates one step. A step whose definition is no longer registered
    /// is an error, never an answer.
    pub fn is_step_complete(&self, step: &StepRecord, user: &User) -> TourResult<bool> {
        let definition = self.registry.step(&step.step_class)?;
        definition
            .predicate
            .is_complete(user)
            .map_err(|source| TourError::Predicate {
                step: step.step_class.clone(),
                source,
            })
    }

    /// The earliest step of `sequence` the user has not completed, or `None`
    /// when every step is complete. Stops at the first incomplete step.
    pub fn find_first_incomplete(
        &self,
        sequence: &[StepRecord],
        user: &User,
    ) -> TourResult<Option<StepRecord>> {
        for step in sequence {
            if !self.is_step_complete(step, user)? {
                debug!(step = %step.step_class, "First incomplete step");
                return Ok(Some(step.clone()));
            }
        }
        Ok(None)
    }

    pub fn is_sequence_complete(&self, sequence: &[StepRecord], user: &User) -> TourResult<bool> {
        Ok(self.find_first_incomplete(sequence, user)?.is_none())
    }
}

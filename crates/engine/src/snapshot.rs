//! Serializable view of a tour and one user's progress through it, for
//! navigation widgets and API responses.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use tour_core::types::{StepId, StepRecord};
use tour_core::{TourResult, User};

use crate::sequencer::Depth;
use crate::tours::TourInstance;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TourSnapshot {
    pub name: String,
    pub display_name: String,
    pub complete_url: Option<String>,
    pub complete: bool,
    /// Name of the first incomplete step.
    pub current_step: Option<String>,
    pub steps: Vec<StepSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSnapshot {
    pub name: String,
    pub display_name: String,
    pub url: Option<String>,
    pub sort_order: i32,
    pub complete: bool,
    /// Every earlier step in canonical order is complete.
    pub available: bool,
    pub steps: Vec<StepSnapshot>,
}

struct StepState {
    complete: bool,
    available: bool,
}

impl TourInstance {
    /// Evaluates every step for `user` (not just up to the current one) and
    /// returns the tour as a nested tree. Does not record completion.
    pub fn snapshot(&self, user: &User) -> TourResult<TourSnapshot> {
        let sequence = self.get_steps(Depth::Unlimited)?;

        let mut states: HashMap<StepId, StepState> = HashMap::with_capacity(sequence.len());
        let mut current_step = None;
        for step in &sequence {
            let complete = self.evaluator.is_step_complete(step, user)?;
            states.insert(
                step.id,
                StepState {
                    complete,
                    available: current_step.is_none(),
                },
            );
            if !complete && current_step.is_none() {
                current_step = Some(step.name.clone());
            }
        }

        let record = self.record();
        Ok(TourSnapshot {
            name: record.name.clone(),
            display_name: record.display_name.clone(),
            complete_url: record.complete_url.clone(),
            complete: current_step.is_none(),
            current_step,
            steps: build_level(&sequence, None, &states),
        })
    }
}

/// `sequence` is already in canonical order, so filtering keeps siblings
/// sorted.
fn build_level(
    sequence: &[StepRecord],
    parent: Option<StepId>,
    states: &HashMap<StepId, StepState>,
) -> Vec<StepSnapshot> {
    sequence
        .iter()
        .filter(|s| s.parent_id == parent)
        .map(|s| {
            let state = states.get(&s.id);
            StepSnapshot {
                name: s.name.clone(),
                display_name: s.display_name.clone(),
                url: s.url.clone(),
                sort_order: s.sort_order,
                complete: state.is_some_and(|st| st.complete),
                available: state.is_some_and(|st| st.available),
                steps: build_level(sequence, Some(s.id), states),
            }
        })
        .collect()
}

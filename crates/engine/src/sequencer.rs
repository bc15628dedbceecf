//! Canonical ordering of a tour's step tree.
//!
//! Steps are emitted depth-first in pre-order. Siblings are ordered by
//! `sort_order`, then by id so that creation order breaks ties.

use std::collections::{HashMap, HashSet};

use tour_core::types::{StepId, StepRecord};
use tour_core::{TourError, TourResult};

/// How far below the starting level the walk descends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Depth {
    #[default]
    Unlimited,
    /// `Levels(0)` yields only the immediate children of the start node.
    Levels(usize),
}

impl Depth {
    pub const TOP_LEVEL: Depth = Depth::Levels(0);

    fn descend(self) -> Option<Depth> {
        match self {
            Depth::Unlimited => Some(Depth::Unlimited),
            Depth::Levels(0) => None,
            Depth::Levels(n) => Some(Depth::Levels(n - 1)),
        }
    }
}

impl From<i32> for Depth {
    /// Negative values mean unlimited.
    fn from(value: i32) -> Self {
        usize::try_from(value).map_or(Depth::Unlimited, Depth::Levels)
    }
}

/// Flattens `steps` (every step of one tour) starting below `parent`
/// (`None` for the top level).
///
/// Fails when a step points at a parent outside `steps`, or when a full walk
/// from the top level cannot reach every step (a cycle).
pub fn flatten(
    steps: &[StepRecord],
    parent: Option<StepId>,
    depth: Depth,
) -> TourResult<Vec<StepRecord>> {
    let known: HashSet<StepId> = steps.iter().map(|s| s.id).collect();
    let mut children: HashMap<Option<StepId>, Vec<&StepRecord>> = HashMap::new();
    for step in steps {
        if let Some(parent_id) = step.parent_id {
            if !known.contains(&parent_id) {
                return Err(TourError::Structure(format!(
                    "step {} points at missing parent {}",
                    step.step_class, parent_id
                )));
            }
        }
        children.entry(step.parent_id).or_default().push(step);
    }
    for siblings in children.values_mut() {
        siblings.sort_by_key(|s| (s.sort_order, s.id));
    }

    let mut out = Vec::with_capacity(steps.len());
    let mut visited = HashSet::with_capacity(steps.len());
    walk(&children, parent, depth, &mut visited, &mut out)?;

    if parent.is_none() && depth == Depth::Unlimited && out.len() != steps.len() {
        let unreachable: Vec<&str> = steps
            .iter()
            .filter(|s| !visited.contains(&s.id))
            .map(|s| s.step_class.as_str())
            .collect();
        return Err(TourError::Structure(format!(
            "steps unreachable from the top level: {}",
            unreachable.join(", ")
        )));
    }
    Ok(out)
}

fn walk(
    children: &HashMap<Option<StepId>, Vec<&StepRecord>>,
    parent: Option<StepId>,
    depth: Depth,
    visited: &mut HashSet<StepId>,
    out: &mut Vec<StepRecord>,
) -> TourResult<()> {
    let Some(level) = children.get(&parent) else {
        return Ok(());
    };
    for step in level {
        if !visited.insert(step.id) {
            return Err(TourError::Structure(format!(
                "step {} is its own ancestor",
                step.step_class
            )));
        }
        out.push((*step).clone());
        if let Some(next) = depth.descend() {
            walk(children, Some(step.id), next, visited, out)?;
        }
    }
    Ok(())
}

/// Urls of the flattened sequence, skipping steps without one.
pub fn url_list(sequence: &[StepRecord]) -> Vec<String> {
    sequence.iter().filter_map(|s| s.url.clone()).collect()
}

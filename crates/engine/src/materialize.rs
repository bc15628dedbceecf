//! Syncs static definitions into persisted tour and step records.
//!
//! Records are created when absent and updated in place when the definition
//! has drifted; running a sync twice leaves the store unchanged.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};

use tour_core::types::{NewStep, NewTour, StepId, TourRecord};
use tour_core::{TourError, TourResult};
use tour_store::TourStore;

use crate::definition::{StepDefinition, TourDefinition};

/// Outcome of one materialization pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub tour: TourRecord,
    pub tour_created: bool,
    pub steps_created: usize,
    pub steps_updated: usize,
}

#[derive(Clone)]
pub struct Materializer {
    store: Arc<dyn TourStore>,
}

impl std::fmt::Debug for Materializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Materializer").finish_non_exhaustive()
    }
}

impl Materializer {
    pub fn new(store: Arc<dyn TourStore>) -> Self {
        Self { store }
    }

    /// Creates or refreshes the tour record and the steps `definition`
    /// contributes. A child definition materializes its storage owner first
    /// and attaches its steps to the owner's record.
    pub fn materialize(&self, definition: &TourDefinition) -> TourResult<SyncReport> {
        // Reject bad definitions before anything is written.
        definition.validate()?;
        let steps = definition.ordered_steps()?;

        let (tour, tour_created) = match &definition.owner {
            Some(owner) => {
                let owner_report = self.materialize(owner)?;
                (owner_report.tour, false)
            }
            None => self.sync_tour(definition)?,
        };

        let mut report = SyncReport {
            tour: tour.clone(),
            tour_created,
            steps_created: 0,
            steps_updated: 0,
        };
        for step in &steps {
            self.sync_step(&tour, step, &mut report)?;
        }

        if report.tour_created || report.steps_created > 0 || report.steps_updated > 0 {
            info!(
                tour = %definition.key,
                tour_id = report.tour.id,
                tour_created = report.tour_created,
                steps_created = report.steps_created,
                steps_updated = report.steps_updated,
                "Materialized tour"
            );
        }
        Ok(report)
    }

    fn sync_tour(&self, definition: &TourDefinition) -> TourResult<(TourRecord, bool)> {
        let wanted = NewTour {
            name: definition.name.clone(),
            display_name: definition.display_name.clone(),
            complete_url: definition.complete_url.clone(),
        };
        let (mut tour, created) = self
            .store
            .get_or_create_tour(&definition.key, wanted.clone())?;
        if !created && !tour.matches(&wanted) {
            debug!(tour = %definition.key, "Tour definition drifted, updating record");
            tour.name = wanted.name;
            tour.display_name = wanted.display_name;
            tour.complete_url = wanted.complete_url;
            self.store.update_tour(&tour)?;
        }
        Ok((tour, created))
    }

    fn sync_step(
        &self,
        tour: &TourRecord,
        definition: &StepDefinition,
        report: &mut SyncReport,
    ) -> TourResult<()> {
        let parent_id = match &definition.parent {
            Some(parent_key) => {
                let parent = self
                    .store
                    .get_step_by_class(tour.id, parent_key)?
                    .ok_or_else(|| TourError::ParentStepNotFound {
                        step: definition.key.clone(),
                        parent: parent_key.clone(),
                    })?;
                Some(parent.id)
            }
            None => None,
        };

        let wanted = NewStep {
            name: definition.name.clone(),
            display_name: definition.display_name.clone(),
            url: definition.url.clone(),
            parent_id,
            sort_order: definition.sort_order,
        };
        let (mut step, created) =
            self.store
                .get_or_create_step(tour.id, &definition.key, wanted.clone())?;
        if created {
            report.steps_created += 1;
        } else if !step.matches(&wanted) {
            debug!(step = %definition.key, "Step definition drifted, updating record");
            step.name = wanted.name;
            step.display_name = wanted.display_name;
            step.url = wanted.url;
            step.parent_id = wanted.parent_id;
            step.sort_order = wanted.sort_order;
            self.store.update_step(&step)?;
            report.steps_updated += 1;
        }
        Ok(())
    }

    /// Removes what `definition` put into the store.
    ///
    /// An owner definition deletes its whole record, cascading to steps and
    /// statuses. A child definition only removes the steps it contributed,
    /// along with anything nested under them. Returns false when there was
    /// nothing to delete.
    pub fn delete(&self, definition: &TourDefinition) -> TourResult<bool> {
        let Some(tour) = self.store.get_tour_by_class(definition.storage_key())? else {
            return Ok(false);
        };

        if !definition.is_child() {
            let deleted = self.store.delete_tour(tour.id)?;
            info!(tour = %definition.key, tour_id = tour.id, "Deleted tour");
            return Ok(deleted);
        }

        let steps = self.store.steps_for_tour(tour.id)?;
        let own: HashSet<&str> = definition.steps.iter().map(|s| s.key.as_str()).collect();
        let mut doomed: HashSet<StepId> = steps
            .iter()
            .filter(|s| own.contains(s.step_class.as_str()))
            .map(|s| s.id)
            .collect();
        // Pull in descendants until the set stops growing.
        loop {
            let before = doomed.len();
            for step in &steps {
                if step.parent_id.is_some_and(|p| doomed.contains(&p)) {
                    doomed.insert(step.id);
                }
            }
            if doomed.len() == before {
                break;
            }
        }

        let ids: Vec<StepId> = doomed.into_iter().collect();
        let deleted = self.store.delete_steps(&ids)?;
        info!(
            tour = %definition.key,
            owner = %definition.storage_key(),
            steps_deleted = deleted,
            "Deleted child tour steps"
        );
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use tour_store::MemoryStore;

    use super::*;
    use crate::predicate::Always;

    fn parent_tour() -> Arc<TourDefinition> {
        Arc::new(
            TourDefinition::new("mock.tour", "Mock Tour")
                .with_complete_url("mock_complete1")
                .step(StepDefinition::new("mock.step1", "Step 1", Always(false)).with_url("mock1"))
                .step(StepDefinition::new("mock.step2", "Step 2", Always(false)).with_url("mock2")),
        )
    }

    fn child_tour(owner: Arc<TourDefinition>) -> TourDefinition {
        TourDefinition::new("mock.tour2", "Mock Tour 2")
            .with_complete_url("mock_complete2")
            .owned_by(owner)
            .step(
                StepDefinition::new("mock.step3", "Step 3", Always(false))
                    .with_url("mock3")
                    .with_parent("mock.step1"),
            )
            .step(
                StepDefinition::new("mock.step4", "Step 4", Always(false))
                    .with_url("mock4")
                    .with_parent("mock.step1"),
            )
    }

    fn setup() -> (Materializer, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (Materializer::new(store.clone()), store)
    }

    #[test]
    fn test_materialize_is_idempotent() {
        let (materializer, store) = setup();
        let tour = parent_tour();

        let first = materializer.materialize(&tour).unwrap();
        assert!(first.tour_created);
        assert_eq!(first.steps_created, 2);

        let second = materializer.materialize(&tour).unwrap();
        assert!(!second.tour_created);
        assert_eq!(second.steps_created, 0);
        assert_eq!(second.steps_updated, 0);

        assert_eq!(store.list_tours().unwrap().len(), 1);
        assert_eq!(store.steps_for_tour(first.tour.id).unwrap().len(), tour.steps.len());
    }

    #[test]
    fn test_child_tour_shares_owner_record() {
        let (materializer, store) = setup();
        let owner = parent_tour();
        materializer.materialize(&owner).unwrap();
        let report = materializer.materialize(&child_tour(owner.clone())).unwrap();

        assert!(!report.tour_created);
        assert_eq!(report.tour.tour_class, "mock.tour");
        assert_eq!(report.tour.complete_url.as_deref(), Some("mock_complete1"));
        assert_eq!(store.list_tours().unwrap().len(), 1);

        let steps = store.steps_for_tour(report.tour.id).unwrap();
        assert_eq!(steps.len(), 4);
        assert_eq!(steps[0].parent_id, None);
        assert_eq!(steps[1].parent_id, None);
        assert_eq!(steps[2].parent_id, Some(steps[0].id));
        assert_eq!(steps[3].parent_id, Some(steps[0].id));
    }

    #[test]
    fn test_child_tour_materializes_missing_owner() {
        let (materializer, store) = setup();
        let report = materializer.materialize(&child_tour(parent_tour())).unwrap();
        assert_eq!(store.steps_for_tour(report.tour.id).unwrap().len(), 4);
    }

    #[test]
    fn test_drift_updates_in_place() {
        let (materializer, store) = setup();
        let first = materializer.materialize(&parent_tour()).unwrap();
        let before = store.steps_for_tour(first.tour.id).unwrap();

        let moved = TourDefinition::new("mock.tour", "Mock Tour")
            .with_display_name("Getting started")
            .with_complete_url("mock_done")
            .step(StepDefinition::new("mock.step1", "Step 1", Always(false)).with_url("mock1/new"))
            .step(StepDefinition::new("mock.step2", "Step 2", Always(false)).with_url("mock2"));
        let report = materializer.materialize(&moved).unwrap();
        assert_eq!(report.steps_updated, 1);
        assert_eq!(report.tour.display_name, "Getting started");

        let after = store.steps_for_tour(first.tour.id).unwrap();
        assert_eq!(before[0].id, after[0].id);
        assert_eq!(after[0].url.as_deref(), Some("mock1/new"));
        let tour = store.get_tour(first.tour.id).unwrap().unwrap();
        assert_eq!(tour.complete_url.as_deref(), Some("mock_done"));
    }

    #[test]
    fn test_missing_parent_fails() {
        let (materializer, store) = setup();
        let orphan = TourDefinition::new("orphan", "Orphan").step(
            StepDefinition::new("orphan.step", "Step", Always(false)).with_parent("nowhere"),
        );
        assert!(matches!(
            materializer.materialize(&orphan),
            Err(TourError::ParentStepNotFound { parent, .. }) if parent == "nowhere"
        ));
        assert!(store.list_tours().unwrap().is_empty());
    }

    #[test]
    fn test_child_listed_before_parent_materializes() {
        let (materializer, store) = setup();
        let tour = TourDefinition::new("t", "T")
            .step(
                StepDefinition::new("t.child", "Child", Always(false))
                    .with_url("child")
                    .with_parent("t.parent"),
            )
            .step(StepDefinition::new("t.parent", "Parent", Always(false)).with_url("parent"));

        let report = materializer.materialize(&tour).unwrap();
        assert_eq!(report.steps_created, 2);

        let parent = store.get_step_by_class(report.tour.id, "t.parent").unwrap().unwrap();
        let child = store.get_step_by_class(report.tour.id, "t.child").unwrap().unwrap();
        assert_eq!(child.parent_id, Some(parent.id));

        let again = materializer.materialize(&tour).unwrap();
        assert_eq!(again.steps_created + again.steps_updated, 0);
    }

    #[test]
    fn test_missing_key_fails_before_writing() {
        let (materializer, store) = setup();
        let nameless = TourDefinition::new("", "Nameless");
        assert!(matches!(
            materializer.materialize(&nameless),
            Err(TourError::MissingTourKey { .. })
        ));
        assert!(store.list_tours().unwrap().is_empty());
    }

    #[test]
    fn test_delete_child_keeps_owner() {
        let (materializer, store) = setup();
        let owner = parent_tour();
        let child = child_tour(owner.clone());
        let report = materializer.materialize(&child).unwrap();

        assert!(materializer.delete(&child).unwrap());
        let steps = store.steps_for_tour(report.tour.id).unwrap();
        let keys: Vec<&str> = steps.iter().map(|s| s.step_class.as_str()).collect();
        assert_eq!(keys, vec!["mock.step1", "mock.step2"]);
        assert!(!materializer.delete(&child).unwrap());

        assert!(materializer.delete(&owner).unwrap());
        assert!(store.list_tours().unwrap().is_empty());
        assert!(!materializer.delete(&owner).unwrap());
    }
}

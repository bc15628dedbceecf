use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use tour_core::{TourError, TourResult};

use crate::definition::{StepDefinition, TourDefinition};

/// Maps definition keys to the tour and step definitions compiled into the
/// process. Populated at startup; persisted records resolve their logic
/// through it.
#[derive(Default)]
pub struct DefinitionRegistry {
    tours: DashMap<String, Arc<TourDefinition>>,
    steps: DashMap<String, Arc<StepDefinition>>,
}

impl std::fmt::Debug for DefinitionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefinitionRegistry")
            .field("tours", &self.tours.len())
            .field("steps", &self.steps.len())
            .finish()
    }
}

impl DefinitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tour and every step it contributes. Tour and step keys
    /// must be unique across the registry; nothing is registered when any
    /// key is rejected.
    pub fn register(&self, tour: TourDefinition) -> TourResult<Arc<TourDefinition>> {
        let tour = Arc::new(tour);
        self.register_arc(tour.clone())?;
        Ok(tour)
    }

    pub fn register_arc(&self, tour: Arc<TourDefinition>) -> TourResult<()> {
        tour.validate()?;
        // The vacant entry holds the tour key until the steps are in.
        let slot = match self.tours.entry(tour.key.clone()) {
            Entry::Occupied(_) => return Err(TourError::DuplicateTourKey(tour.key.clone())),
            Entry::Vacant(slot) => slot,
        };

        let mut inserted: Vec<&str> = Vec::with_capacity(tour.steps.len());
        for step in &tour.steps {
            // The entry guard must be gone before rolling back, since a
            // removal may land on the same shard.
            let taken = match self.steps.entry(step.key.clone()) {
                Entry::Occupied(_) => true,
                Entry::Vacant(entry) => {
                    entry.insert(step.clone());
                    false
                }
            };
            if taken {
                for key in inserted {
                    self.steps.remove(key);
                }
                return Err(TourError::DuplicateStepKey(step.key.clone()));
            }
            inserted.push(&step.key);
        }

        debug!(tour = %tour.key, steps = tour.steps.len(), "Registered tour definition");
        slot.insert(tour.clone());
        Ok(())
    }

    pub fn load_tour(&self, key: &str) -> Option<Arc<TourDefinition>> {
        self.tours.get(key).map(|r| r.value().clone())
    }

    pub fn load_step(&self, key: &str) -> Option<Arc<StepDefinition>> {
        self.steps.get(key).map(|r| r.value().clone())
    }

    pub fn tour(&self, key: &str) -> TourResult<Arc<TourDefinition>> {
        self.load_tour(key)
            .ok_or_else(|| TourError::TourDefinitionNotFound(key.to_string()))
    }

    pub fn step(&self, key: &str) -> TourResult<Arc<StepDefinition>> {
        self.load_step(key)
            .ok_or_else(|| TourError::StepDefinitionNotFound(key.to_string()))
    }

    /// Registered tours, owners before the definitions they own.
    pub fn tours(&self) -> Vec<Arc<TourDefinition>> {
        let mut tours: Vec<Arc<TourDefinition>> =
            self.tours.iter().map(|r| r.value().clone()).collect();
        tours.sort_by(|a, b| {
            owner_depth(a)
                .cmp(&owner_depth(b))
                .then_with(|| a.key.cmp(&b.key))
        });
        tours
    }
}

fn owner_depth(tour: &TourDefinition) -> usize {
    let mut depth = 0;
    let mut current = tour;
    while let Some(owner) = &current.owner {
        depth += 1;
        current = owner;
    }
    depth
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::Always;

    fn intro() -> TourDefinition {
        TourDefinition::new("intro", "Intro")
            .step(StepDefinition::new("intro.profile", "Profile", Always(false)))
            .step(StepDefinition::new("intro.invite", "Invite", Always(false)))
    }

    #[test]
    fn test_register_and_load() {
        let registry = DefinitionRegistry::new();
        registry.register(intro()).unwrap();

        assert!(registry.load_tour("intro").is_some());
        assert!(registry.load_step("intro.invite").is_some());
        assert!(registry.load_step("missing").is_none());
        assert!(matches!(
            registry.step("missing"),
            Err(TourError::StepDefinitionNotFound(key)) if key == "missing"
        ));
    }

    #[test]
    fn test_duplicate_keys_are_rejected_atomically() {
        let registry = DefinitionRegistry::new();
        registry.register(intro()).unwrap();
        assert!(matches!(
            registry.register(intro()),
            Err(TourError::DuplicateTourKey(_))
        ));

        let clash = TourDefinition::new("other", "Other")
            .step(StepDefinition::new("other.first", "First", Always(false)))
            .step(StepDefinition::new("intro.profile", "Profile", Always(false)));
        assert!(matches!(
            registry.register(clash),
            Err(TourError::DuplicateStepKey(key)) if key == "intro.profile"
        ));
        assert!(registry.load_step("other.first").is_none());
        assert!(registry.load_tour("other").is_none());
    }

    #[test]
    fn test_duplicate_step_within_one_tour_rolls_back() {
        let registry = DefinitionRegistry::new();
        let twice = TourDefinition::new("twice", "Twice")
            .step(StepDefinition::new("twice.first", "First", Always(false)))
            .step(StepDefinition::new("twice.step", "Step", Always(false)))
            .step(StepDefinition::new("twice.step", "Again", Always(false)));
        assert!(matches!(
            registry.register(twice),
            Err(TourError::DuplicateStepKey(key)) if key == "twice.step"
        ));
        assert!(registry.load_step("twice.first").is_none());
        assert!(registry.load_step("twice.step").is_none());
        assert!(registry.load_tour("twice").is_none());
    }

    #[test]
    fn test_concurrent_registration_of_one_key() {
        let registry = Arc::new(DefinitionRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    registry
                        .register(TourDefinition::new("race", format!("Race {i}")).step(
                            StepDefinition::new(format!("race.step{i}"), "Step", Always(false)),
                        ))
                        .is_ok()
                })
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(winners, 1);

        // Only the winner's steps stay registered.
        let tour = registry.tour("race").unwrap();
        assert_eq!(tour.steps.len(), 1);
        let registered = (0..8)
            .filter(|i| registry.load_step(&format!("race.step{i}")).is_some())
            .count();
        assert_eq!(registered, 1);
        assert!(registry.load_step(&tour.steps[0].key).is_some());
    }

    #[test]
    fn test_tours_lists_owners_first() {
        let registry = DefinitionRegistry::new();
        let owner = registry.register(intro()).unwrap();
        registry
            .register(TourDefinition::new("a.child", "Child").owned_by(owner))
            .unwrap();

        let keys: Vec<String> = registry.tours().iter().map(|t| t.key.clone()).collect();
        assert_eq!(keys, vec!["intro", "a.child"]);
    }
}

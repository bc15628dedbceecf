use std::sync::Arc;

use tracing::debug;

use tour_core::types::{StepRecord, TourId, TourRecord, TourStatus};
use tour_core::{TourError, TourResult, User};
use tour_store::TourStore;

use crate::definition::TourDefinition;
use crate::evaluator::CompletionEvaluator;
use crate::materialize::{Materializer, SyncReport};
use crate::progress::ProgressTracker;
use crate::registry::DefinitionRegistry;
use crate::sequencer::{self, Depth};

/// Entry point for everything tour related: syncing definitions, enrolling
/// users and answering "where should this user go next".
///
/// Cloning is cheap; clones share the store and registry.
#[derive(Clone)]
pub struct TourEngine {
    store: Arc<dyn TourStore>,
    registry: Arc<DefinitionRegistry>,
    materializer: Materializer,
    tracker: ProgressTracker,
    evaluator: CompletionEvaluator,
}

impl std::fmt::Debug for TourEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TourEngine")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl TourEngine {
    pub fn new(store: Arc<dyn TourStore>, registry: Arc<DefinitionRegistry>) -> Self {
        Self {
            materializer: Materializer::new(store.clone()),
            tracker: ProgressTracker::new(store.clone()),
            evaluator: CompletionEvaluator::new(registry.clone()),
            store,
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<DefinitionRegistry> {
        &self.registry
    }

    pub fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    /// Registers a definition; it is not persisted until materialized.
    pub fn register(&self, definition: TourDefinition) -> TourResult<Arc<TourDefinition>> {
        self.registry.register(definition)
    }

    pub fn materialize(&self, key: &str) -> TourResult<SyncReport> {
        let definition = self.registry.tour(key)?;
        self.materializer.materialize(&definition)
    }

    /// Materializes every registered tour, owners first.
    pub fn materialize_all(&self) -> TourResult<Vec<SyncReport>> {
        self.registry
            .tours()
            .iter()
            .map(|definition| self.materializer.materialize(definition))
            .collect()
    }

    /// Deletes the persisted data of the tour `key`. See
    /// [`Materializer::delete`] for what a child definition removes.
    pub fn delete_tour(&self, key: &str) -> TourResult<bool> {
        let definition = self.registry.tour(key)?;
        self.materializer.delete(&definition)
    }

    /// The materialized tour for definition `key`. A child definition
    /// resolves to its owner's record.
    pub fn instance(&self, key: &str) -> TourResult<TourInstance> {
        let definition = self.registry.tour(key)?;
        let storage_key = definition.storage_key();
        let record = self
            .store
            .get_tour_by_class(storage_key)?
            .ok_or_else(|| TourError::TourNotMaterialized(storage_key.to_string()))?;
        self.load_instance(record)
    }

    /// Binds a persisted record to its registered definition.
    pub fn load_instance(&self, record: TourRecord) -> TourResult<TourInstance> {
        let definition = self.registry.tour(&record.tour_class)?;
        Ok(TourInstance {
            record,
            definition,
            store: self.store.clone(),
            evaluator: self.evaluator.clone(),
            tracker: self.tracker.clone(),
        })
    }

    fn instance_by_id(&self, tour_id: TourId) -> TourResult<TourInstance> {
        let record = self.store.get_tour(tour_id)?.ok_or_else(|| {
            TourError::Store(format!("status references missing tour {tour_id}"))
        })?;
        self.load_instance(record)
    }

    /// Enrolls `user` in tour `key`, materializing the tour first if it has
    /// never been synced.
    pub fn add_user(&self, key: &str, user: &User) -> TourResult<Option<TourStatus>> {
        if !user.is_authenticated() {
            return Ok(None);
        }
        let definition = self.registry.tour(key)?;
        let tour = match self.store.get_tour_by_class(definition.storage_key())? {
            Some(tour) => tour,
            None => self.materializer.materialize(&definition)?.tour,
        };
        self.tracker.add_user(tour.id, user)
    }

    /// Marks complete every active tour of `user` whose steps are now all
    /// done. Returns how many tours were completed.
    pub fn complete_tours(&self, user: &User) -> TourResult<usize> {
        let mut completed = 0;
        for tour_id in self.tracker.active_tour_ids(user)? {
            let instance = self.instance_by_id(tour_id)?;
            if instance.evaluate(user)?.is_complete() && instance.mark_complete(Some(user))? {
                completed += 1;
            }
        }
        if completed > 0 {
            debug!(user_id = ?user.id(), completed, "Swept completed tours");
        }
        Ok(completed)
    }

    /// The tour the user is working through, newest enrollment first.
    /// Completed tours are swept before the lookup.
    pub fn get_active_tour(&self, user: &User) -> TourResult<Option<TourInstance>> {
        if !user.is_authenticated() {
            return Ok(None);
        }
        self.complete_tours(user)?;
        for tour_id in self.tracker.active_tour_ids(user)? {
            let instance = self.instance_by_id(tour_id)?;
            if !instance.evaluate(user)?.is_complete() {
                return Ok(Some(instance));
            }
        }
        Ok(None)
    }

    /// An active tour if there is one, otherwise the most recently completed.
    pub fn get_most_recent_tour(&self, user: &User) -> TourResult<Option<TourInstance>> {
        match self.tracker.most_recent_status(user)? {
            Some(status) => Ok(Some(self.instance_by_id(status.tour_id)?)),
            None => Ok(None),
        }
    }

    /// Where the user should go next: the current step of the active (or
    /// most recent) tour, else that tour's completion url.
    pub fn get_next_url(&self, user: &User) -> TourResult<Option<String>> {
        if !user.is_authenticated() {
            return Ok(None);
        }
        let tour = match self.get_active_tour(user)? {
            Some(tour) => Some(tour),
            None => self.get_most_recent_tour(user)?,
        };
        match tour {
            Some(tour) => tour.get_next_url(user),
            None => Ok(None),
        }
    }

    /// Every tour the user is still working through, optionally only those
    /// named `name`.
    pub fn list_active_tours(
        &self,
        user: &User,
        name: Option<&str>,
    ) -> TourResult<Vec<TourInstance>> {
        if !user.is_authenticated() {
            return Ok(Vec::new());
        }
        self.complete_tours(user)?;
        let mut tours = Vec::new();
        for tour_id in self.tracker.active_tour_ids(user)? {
            let instance = self.instance_by_id(tour_id)?;
            if name.map_or(true, |name| instance.record().name == name) {
                tours.push(instance);
            }
        }
        Ok(tours)
    }
}

/// Result of walking a tour's steps for one user. Pure: computing it never
/// touches stored statuses.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub sequence: Vec<StepRecord>,
    pub current_step: Option<StepRecord>,
    pub complete_url: Option<String>,
}

impl Evaluation {
    pub fn is_complete(&self) -> bool {
        self.current_step.is_none()
    }

    /// The current step's url while incomplete, the completion url after.
    pub fn next_url(&self) -> Option<&str> {
        match &self.current_step {
            Some(step) => step.url.as_deref(),
            None => self.complete_url.as_deref(),
        }
    }

    pub fn url_list(&self) -> Vec<String> {
        sequencer::url_list(&self.sequence)
    }
}

/// A materialized tour bound to its definition.
#[derive(Clone)]
pub struct TourInstance {
    record: TourRecord,
    definition: Arc<TourDefinition>,
    store: Arc<dyn TourStore>,
    pub(crate) evaluator: CompletionEvaluator,
    tracker: ProgressTracker,
}

impl std::fmt::Debug for TourInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TourInstance")
            .field("record", &self.record)
            .finish_non_exhaustive()
    }
}

impl PartialEq for TourInstance {
    fn eq(&self, other: &Self) -> bool {
        self.record == other.record
    }
}

impl TourInstance {
    pub fn record(&self) -> &TourRecord {
        &self.record
    }

    pub fn definition(&self) -> &Arc<TourDefinition> {
        &self.definition
    }

    pub fn id(&self) -> TourId {
        self.record.id
    }

    /// Steps in canonical order, down to `depth` below the top level.
    pub fn get_steps(&self, depth: Depth) -> TourResult<Vec<StepRecord>> {
        let steps = self.store.steps_for_tour(self.record.id)?;
        sequencer::flatten(&steps, None, depth)
    }

    /// Steps nested under `step`, in canonical order.
    pub fn get_child_steps(&self, step: &StepRecord, depth: Depth) -> TourResult<Vec<StepRecord>> {
        let steps = self.store.steps_for_tour(self.record.id)?;
        sequencer::flatten(&steps, Some(step.id), depth)
    }

    pub fn get_url_list(&self) -> TourResult<Vec<String>> {
        Ok(sequencer::url_list(&self.get_steps(Depth::Unlimited)?))
    }

    /// Walks every step for `user` without recording anything.
    pub fn evaluate(&self, user: &User) -> TourResult<Evaluation> {
        let sequence = self.get_steps(Depth::Unlimited)?;
        let current_step = self.evaluator.find_first_incomplete(&sequence, user)?;
        Ok(Evaluation {
            sequence,
            current_step,
            complete_url: self.record.complete_url.clone(),
        })
    }

    /// Whether `user` has completed every step. Always false for anonymous
    /// users.
    ///
    /// This is not a pure read: when the answer is true the user's active
    /// status is marked complete. Repeating the call returns the same answer
    /// and finds nothing left to mark. Use [`TourInstance::evaluate`] for a
    /// side-effect-free check.
    pub fn is_complete(&self, user: &User) -> TourResult<bool> {
        if !user.is_authenticated() {
            return Ok(false);
        }
        let complete = self.evaluate(user)?.is_complete();
        if complete {
            self.mark_complete(Some(user))?;
        }
        Ok(complete)
    }

    pub fn get_current_step(&self, user: &User) -> TourResult<Option<StepRecord>> {
        if !user.is_authenticated() {
            return Ok(None);
        }
        Ok(self.evaluate(user)?.current_step)
    }

    pub fn get_next_url(&self, user: &User) -> TourResult<Option<String>> {
        if !user.is_authenticated() {
            return Ok(None);
        }
        Ok(self.evaluate(user)?.next_url().map(str::to_string))
    }

    pub fn add_user(&self, user: &User) -> TourResult<Option<TourStatus>> {
        self.tracker.add_user(self.record.id, user)
    }

    pub fn mark_complete(&self, user: Option<&User>) -> TourResult<bool> {
        let changed = self.tracker.mark_complete(self.record.id, user)?;
        if changed {
            debug!(tour = %self.record.tour_class, user_id = ?user.and_then(User::id), "Tour completed");
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use tour_store::MemoryStore;

    use super::*;
    use crate::definition::StepDefinition;
    use crate::predicate::{Always, ToggleCompletion};

    struct Fixture {
        engine: TourEngine,
        store: Arc<MemoryStore>,
        step1: ToggleCompletion,
        user: User,
        user2: User,
    }

    /// Tour one has a single toggled step; tour two has one that is
    /// always complete.
    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let engine = TourEngine::new(store.clone(), Arc::new(DefinitionRegistry::new()));
        let step1 = ToggleCompletion::new();
        engine
            .register(
                TourDefinition::new("tour1", "Tour 1")
                    .with_complete_url("mock_complete1")
                    .step(StepDefinition::new("tour1.step1", "Step 1", step1.clone()).with_url("mock1")),
            )
            .unwrap();
        engine
            .register(
                TourDefinition::new("tour2", "Tour 2")
                    .with_complete_url("mock_complete2")
                    .step(StepDefinition::new("tour2.step2", "Step 2", Always(true)).with_url("mock2")),
            )
            .unwrap();
        engine.materialize_all().unwrap();
        Fixture {
            engine,
            store,
            step1,
            user: User::new(1),
            user2: User::new(2),
        }
    }

    fn enroll_everyone(f: &Fixture) {
        for key in ["tour1", "tour2"] {
            f.engine.add_user(key, &f.user).unwrap();
            f.engine.add_user(key, &f.user2).unwrap();
        }
    }

    fn key_of(tour: Option<TourInstance>) -> Option<String> {
        tour.map(|t| t.record().tour_class.clone())
    }

    #[test]
    fn test_complete_tours_sweeps_done_tours() {
        let f = fixture();
        f.engine.add_user("tour1", &f.user).unwrap();
        f.engine.add_user("tour2", &f.user).unwrap();

        assert_eq!(f.engine.complete_tours(&f.user).unwrap(), 1);
        let statuses = f.engine.tracker().statuses(&f.user).unwrap();
        assert_eq!(statuses.iter().filter(|s| s.complete).count(), 1);
        assert_eq!(statuses.iter().filter(|s| !s.complete).count(), 1);

        assert_eq!(f.engine.complete_tours(&f.user).unwrap(), 0);
    }

    #[test]
    fn test_anonymous_user_gets_nothing() {
        let f = fixture();
        let anon = User::anonymous();
        assert_eq!(f.engine.complete_tours(&anon).unwrap(), 0);
        assert!(f.engine.get_active_tour(&anon).unwrap().is_none());
        assert!(f.engine.get_most_recent_tour(&anon).unwrap().is_none());
        assert!(f.engine.get_next_url(&anon).unwrap().is_none());
        assert!(f.engine.add_user("tour1", &anon).unwrap().is_none());
        assert!(f.engine.list_active_tours(&anon, None).unwrap().is_empty());
    }

    #[test]
    fn test_get_active_tour_skips_completed() {
        let f = fixture();
        enroll_everyone(&f);
        assert_eq!(key_of(f.engine.get_active_tour(&f.user).unwrap()).as_deref(), Some("tour1"));
    }

    #[test]
    fn test_get_active_tour_none_when_all_done() {
        let f = fixture();
        f.step1.set(true);
        enroll_everyone(&f);
        assert!(f.engine.get_active_tour(&f.user).unwrap().is_none());
        let statuses = f.engine.tracker().statuses(&f.user).unwrap();
        assert!(statuses.iter().all(|s| s.complete && s.complete_time.is_some()));
    }

    #[test]
    fn test_get_most_recent_tour() {
        let f = fixture();
        enroll_everyone(&f);
        let tracker = f.engine.tracker();
        let tour1 = f.engine.instance("tour1").unwrap().id();
        let tour2 = f.engine.instance("tour2").unwrap().id();

        let earlier = Utc::now();
        let later = earlier + Duration::seconds(1);
        tracker.mark_complete_at(tour2, Some(&f.user), earlier).unwrap();
        tracker.mark_complete_at(tour1, Some(&f.user), later).unwrap();
        tracker.mark_complete_at(tour1, Some(&f.user2), earlier).unwrap();

        assert_eq!(key_of(f.engine.get_most_recent_tour(&f.user).unwrap()).as_deref(), Some("tour1"));
        assert_eq!(key_of(f.engine.get_most_recent_tour(&f.user2).unwrap()).as_deref(), Some("tour2"));
    }

    #[test]
    fn test_get_most_recent_tour_none() {
        let f = fixture();
        assert!(f.engine.get_most_recent_tour(&f.user).unwrap().is_none());
        assert!(f.engine.get_next_url(&f.user).unwrap().is_none());
    }

    #[test]
    fn test_get_next_url_current_and_recent() {
        let f = fixture();
        enroll_everyone(&f);
        assert_eq!(f.engine.get_next_url(&f.user).unwrap().as_deref(), Some("mock1"));

        // Nothing active any more: fall back to the latest completed tour.
        f.step1.set(true);
        let next = f.engine.get_next_url(&f.user).unwrap();
        assert!(matches!(next.as_deref(), Some("mock_complete1") | Some("mock_complete2")));
    }

    #[test]
    fn test_add_user_materializes_missing_tour() {
        let store = Arc::new(MemoryStore::new());
        let engine = TourEngine::new(store.clone(), Arc::new(DefinitionRegistry::new()));
        engine
            .register(TourDefinition::new("lazy", "Lazy").step(StepDefinition::new(
                "lazy.step",
                "Step",
                Always(false),
            )))
            .unwrap();

        assert!(matches!(engine.instance("lazy"), Err(TourError::TourNotMaterialized(_))));
        let status = engine.add_user("lazy", &User::new(3)).unwrap().unwrap();
        assert!(!status.complete);
        assert_eq!(store.list_tours().unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_tour_key() {
        let f = fixture();
        assert!(matches!(
            f.engine.add_user("nope", &f.user),
            Err(TourError::TourDefinitionNotFound(_))
        ));
    }

    #[test]
    fn test_is_complete_marks_status() {
        let f = fixture();
        let tour = f.engine.instance("tour1").unwrap();
        tour.add_user(&f.user).unwrap();

        assert!(!tour.is_complete(&f.user).unwrap());
        f.step1.set(true);
        assert!(tour.evaluate(&f.user).unwrap().is_complete());
        assert_eq!(f.engine.tracker().active_tour_ids(&f.user).unwrap().len(), 1);

        assert!(tour.is_complete(&f.user).unwrap());
        assert!(f.engine.tracker().active_tour_ids(&f.user).unwrap().is_empty());
        // Same answer, nothing left to mark.
        assert!(tour.is_complete(&f.user).unwrap());
        assert!(!tour.mark_complete(Some(&f.user)).unwrap());
    }

    #[test]
    fn test_instance_queries_skip_anonymous_users() {
        let f = fixture();
        let tour = f.engine.instance("tour2").unwrap();
        let anon = User::anonymous();

        assert!(!tour.is_complete(&anon).unwrap());
        assert!(tour.get_current_step(&anon).unwrap().is_none());
        assert!(tour.get_next_url(&anon).unwrap().is_none());
        assert!(tour.add_user(&anon).unwrap().is_none());

        // The same tour answers normally for a real user.
        assert_eq!(tour.get_next_url(&f.user).unwrap().as_deref(), Some("mock_complete2"));
    }

    #[test]
    fn test_list_active_tours_with_name_filter() {
        let f = fixture();
        enroll_everyone(&f);
        let all = f.engine.list_active_tours(&f.user, None).unwrap();
        assert_eq!(all.len(), 1);
        assert!(f.engine.list_active_tours(&f.user, Some("Tour 2")).unwrap().is_empty());
        assert_eq!(f.engine.list_active_tours(&f.user, Some("Tour 1")).unwrap().len(), 1);
    }

    #[test]
    fn test_removed_step_definition_is_an_error() {
        let f = fixture();
        let tour = f.engine.instance("tour1").unwrap();
        f.store
            .get_or_create_step(
                tour.id(),
                "tour1.removed",
                tour_core::types::NewStep {
                    name: "removed".into(),
                    display_name: "Removed".into(),
                    url: None,
                    parent_id: None,
                    sort_order: 0,
                },
            )
            .unwrap();
        f.step1.set(true);
        assert!(matches!(
            tour.get_current_step(&f.user),
            Err(TourError::StepDefinitionNotFound(key)) if key == "tour1.removed"
        ));
    }

    #[test]
    fn test_delete_and_rematerialize() {
        let f = fixture();
        f.engine.add_user("tour1", &f.user).unwrap();
        assert!(f.engine.delete_tour("tour1").unwrap());
        assert!(f.engine.tracker().statuses(&f.user).unwrap().is_empty());
        assert!(f.engine.materialize("tour1").unwrap().tour_created);
    }
}

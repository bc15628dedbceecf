//! In-process store backed by DashMap for lock-free concurrent access.
//! Status writes rely on the per-key atomicity of DashMap entries; catalog
//! writes (tours and steps) are serialized by a single mutex.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use tour_core::types::{
    NewStep, NewTour, StatusId, StepId, StepRecord, TourId, TourRecord, TourStatus, UserId,
};
use tour_core::{TourError, TourResult};

use crate::store::TourStore;

pub struct MemoryStore {
    tours: DashMap<TourId, TourRecord>,
    tour_classes: DashMap<String, TourId>,
    steps: DashMap<StepId, StepRecord>,
    step_classes: DashMap<(TourId, String), StepId>,
    statuses: DashMap<StatusId, TourStatus>,
    /// (tour, user) -> id of the single incomplete status.
    active: DashMap<(TourId, UserId), StatusId>,
    next_id: AtomicU64,
    catalog: Mutex<()>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("tours", &self.tours.len())
            .field("steps", &self.steps.len())
            .field("statuses", &self.statuses.len())
            .field("active", &self.active.len())
            .finish()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Pre-size the status tables, which grow with the number of users.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            tours: DashMap::new(),
            tour_classes: DashMap::new(),
            steps: DashMap::new(),
            step_classes: DashMap::new(),
            statuses: DashMap::with_capacity(capacity),
            active: DashMap::with_capacity(capacity),
            next_id: AtomicU64::new(1),
            catalog: Mutex::new(()),
        }
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn flip_complete(&self, status_id: StatusId, at: DateTime<Utc>) -> bool {
        match self.statuses.get_mut(&status_id) {
            Some(mut status) if !status.complete => {
                status.complete = true;
                status.complete_time = Some(at);
                true
            }
            _ => false,
        }
    }
}

impl TourStore for MemoryStore {
    fn get_tour(&self, id: TourId) -> TourResult<Option<TourRecord>> {
        Ok(self.tours.get(&id).map(|r| r.clone()))
    }

    fn get_tour_by_class(&self, tour_class: &str) -> TourResult<Option<TourRecord>> {
        let id = match self.tour_classes.get(tour_class) {
            Some(id) => *id,
            None => return Ok(None),
        };
        self.get_tour(id)
    }

    fn get_or_create_tour(
        &self,
        tour_class: &str,
        defaults: NewTour,
    ) -> TourResult<(TourRecord, bool)> {
        let _guard = self.catalog.lock();
        if let Some(existing) = self.get_tour_by_class(tour_class)? {
            return Ok((existing, false));
        }

        let tour = TourRecord {
            id: self.allocate_id(),
            name: defaults.name,
            display_name: defaults.display_name,
            tour_class: tour_class.to_string(),
            complete_url: defaults.complete_url,
        };
        debug!(tour_id = tour.id, tour_class = %tour_class, "Inserted tour record");
        self.tour_classes.insert(tour_class.to_string(), tour.id);
        self.tours.insert(tour.id, tour.clone());
        Ok((tour, true))
    }

    fn update_tour(&self, tour: &TourRecord) -> TourResult<()> {
        let _guard = self.catalog.lock();
        let mut entry = self
            .tours
            .get_mut(&tour.id)
            .ok_or_else(|| TourError::Store(format!("tour {} does not exist", tour.id)))?;
        if entry.tour_class != tour.tour_class {
            return Err(TourError::Store(format!(
                "tour class of tour {} cannot change",
                tour.id
            )));
        }
        *entry = tour.clone();
        Ok(())
    }

    fn delete_tour(&self, id: TourId) -> TourResult<bool> {
        let _guard = self.catalog.lock();
        let Some((_, tour)) = self.tours.remove(&id) else {
            return Ok(false);
        };
        self.tour_classes.remove(&tour.tour_class);
        self.steps.retain(|_, step| step.tour_id != id);
        self.step_classes.retain(|(tour_id, _), _| *tour_id != id);
        self.active.retain(|(tour_id, _), _| *tour_id != id);
        self.statuses.retain(|_, status| status.tour_id != id);
        debug!(tour_id = id, "Deleted tour record with its steps and statuses");
        Ok(true)
    }

    fn list_tours(&self) -> TourResult<Vec<TourRecord>> {
        let mut tours: Vec<TourRecord> = self.tours.iter().map(|r| r.value().clone()).collect();
        tours.sort_by_key(|t| t.id);
        Ok(tours)
    }

    fn get_step_by_class(
        &self,
        tour_id: TourId,
        step_class: &str,
    ) -> TourResult<Option<StepRecord>> {
        let key = (tour_id, step_class.to_string());
        let id = match self.step_classes.get(&key) {
            Some(id) => *id,
            None => return Ok(None),
        };
        Ok(self.steps.get(&id).map(|r| r.clone()))
    }

    fn get_or_create_step(
        &self,
        tour_id: TourId,
        step_class: &str,
        defaults: NewStep,
    ) -> TourResult<(StepRecord, bool)> {
        let _guard = self.catalog.lock();
        if !self.tours.contains_key(&tour_id) {
            return Err(TourError::Store(format!("tour {tour_id} does not exist")));
        }
        if let Some(existing) = self.get_step_by_class(tour_id, step_class)? {
            return Ok((existing, false));
        }

        let step = StepRecord {
            id: self.allocate_id(),
            name: defaults.name,
            display_name: defaults.display_name,
            url: defaults.url,
            tour_id,
            parent_id: defaults.parent_id,
            step_class: step_class.to_string(),
            sort_order: defaults.sort_order,
        };
        debug!(step_id = step.id, tour_id, step_class = %step_class, "Inserted step record");
        self.step_classes
            .insert((tour_id, step_class.to_string()), step.id);
        self.steps.insert(step.id, step.clone());
        Ok((step, true))
    }

    fn update_step(&self, step: &StepRecord) -> TourResult<()> {
        let _guard = self.catalog.lock();
        let mut entry = self
            .steps
            .get_mut(&step.id)
            .ok_or_else(|| TourError::Store(format!("step {} does not exist", step.id)))?;
        if entry.tour_id != step.tour_id || entry.step_class != step.step_class {
            return Err(TourError::Store(format!(
                "step {} cannot move between tours or change class",
                step.id
            )));
        }
        *entry = step.clone();
        Ok(())
    }

    fn delete_steps(&self, ids: &[StepId]) -> TourResult<usize> {
        let _guard = self.catalog.lock();
        let mut deleted = 0;
        for id in ids {
            if let Some((_, step)) = self.steps.remove(id) {
                self.step_classes.remove(&(step.tour_id, step.step_class));
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    fn steps_for_tour(&self, tour_id: TourId) -> TourResult<Vec<StepRecord>> {
        let mut steps: Vec<StepRecord> = self
            .steps
            .iter()
            .filter(|r| r.value().tour_id == tour_id)
            .map(|r| r.value().clone())
            .collect();
        steps.sort_by_key(|s| s.id);
        Ok(steps)
    }

    fn get_or_create_active_status(
        &self,
        tour_id: TourId,
        user_id: UserId,
    ) -> TourResult<(TourStatus, bool)> {
        if !self.tours.contains_key(&tour_id) {
            return Err(TourError::Store(format!("tour {tour_id} does not exist")));
        }

        let mut created = None;
        // The entry guard holds the shard lock for (tour, user) until the
        // new row is in place, so racing callers observe the same id.
        let status_id = *self
            .active
            .entry((tour_id, user_id))
            .or_insert_with(|| {
                let status = TourStatus {
                    id: self.allocate_id(),
                    tour_id,
                    user_id,
                    complete: false,
                    create_time: Utc::now(),
                    complete_time: None,
                };
                let id = status.id;
                self.statuses.insert(id, status.clone());
                created = Some(status);
                id
            });

        if let Some(status) = created {
            // A concurrent delete_tour may have finished between the check
            // above and the insert; never leave a status behind for it.
            if !self.tours.contains_key(&tour_id) {
                self.active
                    .remove_if(&(tour_id, user_id), |_, id| *id == status.id);
                self.statuses.remove(&status.id);
                return Err(TourError::Store(format!("tour {tour_id} does not exist")));
            }
            return Ok((status, true));
        }
        let status = self
            .statuses
            .get(&status_id)
            .map(|r| r.clone())
            .ok_or_else(|| TourError::Store(format!("status {status_id} vanished")))?;
        Ok((status, false))
    }

    fn complete_statuses(
        &self,
        tour_id: TourId,
        user_id: Option<UserId>,
        at: DateTime<Utc>,
    ) -> TourResult<usize> {
        let keys: Vec<(TourId, UserId)> = match user_id {
            Some(user_id) => vec![(tour_id, user_id)],
            None => self
                .active
                .iter()
                .filter(|r| r.key().0 == tour_id)
                .map(|r| *r.key())
                .collect(),
        };

        let mut changed = 0;
        for key in keys {
            // Whoever removes the index entry owns the transition.
            if let Some((_, status_id)) = self.active.remove(&key) {
                if self.flip_complete(status_id, at) {
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    fn statuses_for_user(&self, user_id: UserId) -> TourResult<Vec<TourStatus>> {
        let mut statuses: Vec<TourStatus> = self
            .statuses
            .iter()
            .filter(|r| r.value().user_id == user_id)
            .map(|r| r.value().clone())
            .collect();
        statuses.sort_by_key(|s| s.id);
        Ok(statuses)
    }

    fn statuses_for_tour(&self, tour_id: TourId) -> TourResult<Vec<TourStatus>> {
        let mut statuses: Vec<TourStatus> = self
            .statuses
            .iter()
            .filter(|r| r.value().tour_id == tour_id)
            .map(|r| r.value().clone())
            .collect();
        statuses.sort_by_key(|s| s.id);
        Ok(statuses)
    }
}

//! Per-user tour status bookkeeping.
//!
//! Each (user, tour) pair has at most one active status. Completing it
//! stamps `complete_time` once; enrolling again afterwards starts a new pass.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use tour_core::types::{TourId, TourStatus};
use tour_core::{TourResult, User};
use tour_store::TourStore;

#[derive(Clone)]
pub struct ProgressTracker {
    store: Arc<dyn TourStore>,
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker").finish_non_exhaustive()
    }
}

impl ProgressTracker {
    pub fn new(store: Arc<dyn TourStore>) -> Self {
        Self { store }
    }

    /// Returns the user's active status for the tour, creating one if none
    /// exists. Anonymous users are never enrolled.
    pub fn add_user(&self, tour_id: TourId, user: &User) -> TourResult<Option<TourStatus>> {
        let Some(user_id) = user.id() else {
            return Ok(None);
        };
        let (status, created) = self.store.get_or_create_active_status(tour_id, user_id)?;
        if created {
            info!(tour_id, user_id = %user_id, status_id = status.id, "User enrolled in tour");
        }
        Ok(Some(status))
    }

    /// Marks active statuses of the tour complete: the given user's, or every
    /// user's when `user` is `None`. Returns whether anything changed.
    pub fn mark_complete(&self, tour_id: TourId, user: Option<&User>) -> TourResult<bool> {
        self.mark_complete_at(tour_id, user, Utc::now())
    }

    pub fn mark_complete_at(
        &self,
        tour_id: TourId,
        user: Option<&User>,
        at: DateTime<Utc>,
    ) -> TourResult<bool> {
        let user_id = match user {
            Some(user) => match user.id() {
                Some(id) => Some(id),
                None => return Ok(false),
            },
            None => None,
        };
        let changed = self.store.complete_statuses(tour_id, user_id, at)?;
        if changed > 0 {
            info!(tour_id, user_id = ?user_id, changed, "Tour marked complete");
        } else {
            debug!(tour_id, user_id = ?user_id, "No active status to complete");
        }
        Ok(changed > 0)
    }

    /// Tours the user currently has an active status for, newest status first.
    pub fn active_tour_ids(&self, user: &User) -> TourResult<Vec<TourId>> {
        let Some(user_id) = user.id() else {
            return Ok(Vec::new());
        };
        let mut active: Vec<TourStatus> = self
            .store
            .statuses_for_user(user_id)?
            .into_iter()
            .filter(|s| !s.complete)
            .collect();
        active.sort_by(|a, b| {
            b.create_time
                .cmp(&a.create_time)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(active.into_iter().map(|s| s.tour_id).collect())
    }

    /// The status to fall back to when nothing is active: an active one if
    /// any, else the most recently completed.
    pub fn most_recent_status(&self, user: &User) -> TourResult<Option<TourStatus>> {
        let Some(user_id) = user.id() else {
            return Ok(None);
        };
        let statuses = self.store.statuses_for_user(user_id)?;
        Ok(statuses.into_iter().min_by(|a, b| {
            a.complete
                .cmp(&b.complete)
                .then_with(|| b.complete_time.cmp(&a.complete_time))
                .then_with(|| b.create_time.cmp(&a.create_time))
                .then_with(|| b.id.cmp(&a.id))
        }))
    }

    pub fn statuses(&self, user: &User) -> TourResult<Vec<TourStatus>> {
        match user.id() {
            Some(user_id) => self.store.statuses_for_user(user_id),
            None => Ok(Vec::new()),
        }
    }
}

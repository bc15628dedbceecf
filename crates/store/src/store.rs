use chrono::{DateTime, Utc};
use tour_core::types::{
    NewStep, NewTour, StepId, StepRecord, TourId, TourRecord, TourStatus, UserId,
};
use tour_core::TourResult;

/// Persistence seam for tours, steps and per-user statuses.
///
/// Implementations must make `get_or_create_active_status` atomic per
/// (tour, user) and `complete_statuses` a conditional update that only
/// touches rows with `complete == false`.
pub trait TourStore: Send + Sync {
    // ---- tours ----

    fn get_tour(&self, id: TourId) -> TourResult<Option<TourRecord>>;

    fn get_tour_by_class(&self, tour_class: &str) -> TourResult<Option<TourRecord>>;

    /// Returns the tour for `tour_class`, creating it from `defaults` when
    /// absent. The flag is true when a record was created.
    fn get_or_create_tour(
        &self,
        tour_class: &str,
        defaults: NewTour,
    ) -> TourResult<(TourRecord, bool)>;

    fn update_tour(&self, tour: &TourRecord) -> TourResult<()>;

    /// Deletes the tour along with its steps and statuses.
    fn delete_tour(&self, id: TourId) -> TourResult<bool>;

    fn list_tours(&self) -> TourResult<Vec<TourRecord>>;

    // ---- steps ----

    fn get_step_by_class(&self, tour_id: TourId, step_class: &str)
        -> TourResult<Option<StepRecord>>;

    fn get_or_create_step(
        &self,
        tour_id: TourId,
        step_class: &str,
        defaults: NewStep,
    ) -> TourResult<(StepRecord, bool)>;

    fn update_step(&self, step: &StepRecord) -> TourResult<()>;

    /// Deletes the given steps, returning how many existed.
    fn delete_steps(&self, ids: &[StepId]) -> TourResult<usize>;

    /// All steps of a tour in id order.
    fn steps_for_tour(&self, tour_id: TourId) -> TourResult<Vec<StepRecord>>;

    // ---- statuses ----

    /// Returns the active status for (tour, user), creating one when none
    /// exists. The flag is true when a status was created.
    fn get_or_create_active_status(
        &self,
        tour_id: TourId,
        user_id: UserId,
    ) -> TourResult<(TourStatus, bool)>;

    /// Flips every active status of the tour (only `user_id`'s when given)
    /// to complete, stamping `at`. Returns the number of rows changed.
    fn complete_statuses(
        &self,
        tour_id: TourId,
        user_id: Option<UserId>,
        at: DateTime<Utc>,
    ) -> TourResult<usize>;

    fn statuses_for_user(&self, user_id: UserId) -> TourResult<Vec<TourStatus>>;

    fn statuses_for_tour(&self, tour_id: TourId) -> TourResult<Vec<TourStatus>>;
}

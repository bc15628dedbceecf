use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type TourId = u64;
pub type StepId = u64;
pub type StatusId = u64;

// ─── Users ──────────────────────────────────────────────────────────────────

/// Opaque identifier of a real (non-anonymous) user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The user a request is made on behalf of. Anonymous users carry no id and
/// never take part in tours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct User {
    id: Option<UserId>,
}

impl User {
    pub fn new(id: u64) -> Self {
        Self {
            id: Some(UserId(id)),
        }
    }

    pub fn anonymous() -> Self {
        Self { id: None }
    }

    pub fn id(&self) -> Option<UserId> {
        self.id
    }

    pub fn is_authenticated(&self) -> bool {
        self.id.is_some()
    }
}

// ─── Persisted records ──────────────────────────────────────────────────────

/// Persisted tour. `tour_class` is the registry key its definition is
/// re-loaded from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TourRecord {
    pub id: TourId,
    pub name: String,
    pub display_name: String,
    pub tour_class: String,
    pub complete_url: Option<String>,
}

impl fmt::Display for TourRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name)
    }
}

/// Persisted step. Steps of one tour form a forest through `parent_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub id: StepId,
    pub name: String,
    pub display_name: String,
    pub url: Option<String>,
    pub tour_id: TourId,
    pub parent_id: Option<StepId>,
    pub step_class: String,
    pub sort_order: i32,
}

impl fmt::Display for StepRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name)
    }
}

/// One user's pass through one tour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TourStatus {
    pub id: StatusId,
    pub tour_id: TourId,
    pub user_id: UserId,
    pub complete: bool,
    pub create_time: DateTime<Utc>,
    pub complete_time: Option<DateTime<Utc>>,
}

/// Field values used when a tour record has to be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTour {
    pub name: String,
    pub display_name: String,
    pub complete_url: Option<String>,
}

/// Field values used when a step record has to be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewStep {
    pub name: String,
    pub display_name: String,
    pub url: Option<String>,
    pub parent_id: Option<StepId>,
    pub sort_order: i32,
}

impl StepRecord {
    /// Whether the persisted fields still match `wanted`.
    pub fn matches(&self, wanted: &NewStep) -> bool {
        self.name == wanted.name
            && self.display_name == wanted.display_name
            && self.url == wanted.url
            && self.parent_id == wanted.parent_id
            && self.sort_order == wanted.sort_order
    }
}

impl TourRecord {
    pub fn matches(&self, wanted: &NewTour) -> bool {
        self.name == wanted.name
            && self.display_name == wanted.display_name
            && self.complete_url == wanted.complete_url
    }
}

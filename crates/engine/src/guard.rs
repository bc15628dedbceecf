//! Keeps users on a tour's prescribed path.
//!
//! The guard only decides; performing the redirect is the request layer's
//! job.

use serde::{Deserialize, Serialize};
use tracing::debug;

use tour_core::config::EngineConfig;
use tour_core::{TourResult, User};

use crate::tours::{TourEngine, TourInstance};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "decision", content = "target")]
pub enum NavigationDecision {
    Allow,
    Redirect(String),
}

impl NavigationDecision {
    pub fn redirect_target(&self) -> Option<&str> {
        match self {
            NavigationDecision::Allow => None,
            NavigationDecision::Redirect(target) => Some(target),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NavigationGuard {
    enforce: bool,
}

impl Default for NavigationGuard {
    fn default() -> Self {
        Self { enforce: true }
    }
}

impl NavigationGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            enforce: config.enforce_navigation,
        }
    }

    /// Decides whether a request for `requested_path` should be sent
    /// elsewhere.
    ///
    /// While the tour is incomplete, jumping ahead of the current step
    /// redirects back to it. Once complete, any tour page other than the
    /// final destination redirects to the completion url. Pages outside the
    /// tour are always allowed.
    pub fn should_redirect(
        &self,
        requested_path: &str,
        tour: &TourInstance,
        user: &User,
    ) -> TourResult<NavigationDecision> {
        if !self.enforce || !user.is_authenticated() {
            return Ok(NavigationDecision::Allow);
        }

        let evaluation = tour.evaluate(user)?;
        let url_list = evaluation.url_list();
        let Some(next_url) = evaluation.next_url() else {
            return Ok(NavigationDecision::Allow);
        };
        let current_index = url_list.iter().position(|u| u == requested_path);
        let next_index = url_list.iter().position(|u| u == next_url);

        let redirect = if evaluation.is_complete() {
            current_index.is_some() && current_index != next_index
        } else {
            matches!((current_index, next_index), (Some(current), Some(next)) if current > next)
        };

        if redirect {
            debug!(
                tour = %tour.record().tour_class,
                requested = %requested_path,
                target = %next_url,
                "Redirecting off-path request"
            );
            Ok(NavigationDecision::Redirect(next_url.to_string()))
        } else {
            Ok(NavigationDecision::Allow)
        }
    }

    /// Full request-time check: the user's active tour, or failing that the
    /// most recent one, decides. Users without a tour are always allowed.
    pub fn check(
        &self,
        engine: &TourEngine,
        requested_path: &str,
        user: &User,
    ) -> TourResult<NavigationDecision> {
        if !self.enforce {
            return Ok(NavigationDecision::Allow);
        }
        let tour = match engine.get_active_tour(user)? {
            Some(tour) => Some(tour),
            None => engine.get_most_recent_tour(user)?,
        };
        match tour {
            Some(tour) => self.should_redirect(requested_path, &tour, user),
            None => Ok(NavigationDecision::Allow),
        }
    }
}

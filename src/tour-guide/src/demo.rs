//! Demo tour set served by the command-line driver.
//!
//! Step predicates consult the set of step keys passed with `--done`, so a
//! user's progress can be replayed from the shell.

use std::collections::HashSet;
use std::sync::Arc;

use tour_core::{TourResult, User};
use tour_engine::{DefinitionRegistry, StepDefinition, TourDefinition};

pub const ONBOARDING: &str = "onboarding";
pub const ONBOARDING_EXTRAS: &str = "onboarding.extras";
pub const REPORTS: &str = "reports";

fn step(key: &str, name: &str, url: &str, done: &Arc<HashSet<String>>) -> StepDefinition {
    let done = done.clone();
    let owned_key = key.to_string();
    StepDefinition::new(key, name, move |_user: &User| -> anyhow::Result<bool> {
        Ok(done.contains(&owned_key))
    })
    .with_url(url)
}

/// Registers the demo tours. `onboarding.extras` extends `onboarding` with
/// steps nested under the profile step.
pub fn register(registry: &DefinitionRegistry, done: Arc<HashSet<String>>) -> TourResult<()> {
    let onboarding = registry.register(
        TourDefinition::new(ONBOARDING, "Onboarding")
            .with_display_name("Getting started")
            .with_complete_url("/dashboard")
            .step(step("onboarding.profile", "Profile", "/profile", &done))
            .step(step("onboarding.team", "Team", "/team", &done).with_sort_order(1))
            .step(step("onboarding.billing", "Billing", "/billing", &done).with_sort_order(2)),
    )?;

    registry.register(
        TourDefinition::new(ONBOARDING_EXTRAS, "Onboarding extras")
            .owned_by(onboarding)
            .step(
                step("onboarding.avatar", "Avatar", "/profile/avatar", &done)
                    .with_parent("onboarding.profile"),
            )
            .step(
                step("onboarding.timezone", "Time zone", "/profile/timezone", &done)
                    .with_parent("onboarding.profile")
                    .with_sort_order(1),
            ),
    )?;

    registry.register(
        TourDefinition::new(REPORTS, "Reports")
            .with_complete_url("/reports")
            .step(step("reports.create", "Create a report", "/reports/new", &done))
            .step(
                step("reports.share", "Share it", "/reports/share", &done).with_sort_order(1),
            ),
    )?;

    Ok(())
}

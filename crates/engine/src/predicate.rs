//! Completion predicates: the per-step logic deciding whether a user has
//! finished a step.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tour_core::User;

/// Decides whether `user` has completed a step. Implementations may consult
/// any application state; the engine never caches the answer.
pub trait Completable: Send + Sync {
    fn is_complete(&self, user: &User) -> Result<bool>;
}

impl<F> Completable for F
where
    F: Fn(&User) -> Result<bool> + Send + Sync,
{
    fn is_complete(&self, user: &User) -> Result<bool> {
        self(user)
    }
}

/// Predicate with a fixed answer.
#[derive(Debug, Clone, Copy)]
pub struct Always(pub bool);

impl Completable for Always {
    fn is_complete(&self, _user: &User) -> Result<bool> {
        Ok(self.0)
    }
}

/// Shared switch for flipping a step's completion from the outside. Clones
/// share the same flag, so a test can keep one handle and hand another to
/// the step definition.
#[derive(Debug, Clone, Default)]
pub struct ToggleCompletion {
    flag: Arc<AtomicBool>,
}

impl ToggleCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, complete: bool) {
        self.flag.store(complete, Ordering::SeqCst);
    }

    pub fn get(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

impl Completable for ToggleCompletion {
    fn is_complete(&self, _user: &User) -> Result<bool> {
        Ok(self.get())
    }
}

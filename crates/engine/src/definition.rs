//! Static, code-defined descriptions of tours and their steps.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tour_core::{TourError, TourResult};

use crate::predicate::Completable;

/// One step of a tour. The key identifies the step across the whole
/// registry and is what persisted step records point back to.
#[derive(Clone)]
pub struct StepDefinition {
    pub key: String,
    pub name: String,
    pub display_name: String,
    pub url: Option<String>,
    pub parent: Option<String>,
    pub sort_order: i32,
    pub predicate: Arc<dyn Completable>,
}

impl fmt::Debug for StepDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDefinition")
            .field("key", &self.key)
            .field("name", &self.name)
            .field("url", &self.url)
            .field("parent", &self.parent)
            .field("sort_order", &self.sort_order)
            .finish()
    }
}

impl StepDefinition {
    pub fn new(
        key: impl Into<String>,
        name: impl Into<String>,
        predicate: impl Completable + 'static,
    ) -> Self {
        let name = name.into();
        Self {
            key: key.into(),
            display_name: name.clone(),
            name,
            url: None,
            parent: None,
            sort_order: 0,
            predicate: Arc::new(predicate),
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Nest this step under the step with key `parent`.
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_sort_order(mut self, sort_order: i32) -> Self {
        self.sort_order = sort_order;
        self
    }

    pub fn validate(&self) -> TourResult<()> {
        if self.key.trim().is_empty() {
            return Err(TourError::MissingStepKey {
                name: self.name.clone(),
            });
        }
        Ok(())
    }
}

/// A tour: the steps it contributes plus where to send the user once every
/// step is done.
///
/// A definition with an `owner` shares the owner's persisted tour record and
/// only adds its steps to it.
#[derive(Debug, Clone)]
pub struct TourDefinition {
    pub key: String,
    pub name: String,
    pub display_name: String,
    pub complete_url: Option<String>,
    pub steps: Vec<Arc<StepDefinition>>,
    pub owner: Option<Arc<TourDefinition>>,
}

impl TourDefinition {
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            key: key.into(),
            display_name: name.clone(),
            name,
            complete_url: None,
            steps: Vec::new(),
            owner: None,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn with_complete_url(mut self, url: impl Into<String>) -> Self {
        self.complete_url = Some(url.into());
        self
    }

    /// Append a step. A parent may be listed after its children.
    pub fn step(mut self, step: StepDefinition) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    pub fn owned_by(mut self, owner: Arc<TourDefinition>) -> Self {
        self.owner = Some(owner);
        self
    }

    /// The definition whose record this tour is persisted under.
    pub fn storage_owner(&self) -> &TourDefinition {
        let mut current = self;
        while let Some(owner) = &current.owner {
            current = owner;
        }
        current
    }

    pub fn storage_key(&self) -> &str {
        &self.storage_owner().key
    }

    pub fn is_child(&self) -> bool {
        self.owner.is_some()
    }

    pub fn validate(&self) -> TourResult<()> {
        if self.key.trim().is_empty() {
            return Err(TourError::MissingTourKey {
                name: self.name.clone(),
            });
        }
        for step in &self.steps {
            step.validate()?;
        }
        self.ordered_steps().map(|_| ())
    }

    /// Steps reordered so every parent comes before its children, keeping
    /// list order otherwise. A parent may live in this tour or in any
    /// owner; owner steps count as already placed.
    pub fn ordered_steps(&self) -> TourResult<Vec<Arc<StepDefinition>>> {
        let own: HashSet<&str> = self.steps.iter().map(|s| s.key.as_str()).collect();
        for step in &self.steps {
            if let Some(parent) = &step.parent {
                if !own.contains(parent.as_str()) && !self.owner_has_step(parent) {
                    return Err(TourError::ParentStepNotFound {
                        step: step.key.clone(),
                        parent: parent.clone(),
                    });
                }
            }
        }

        let mut placed: HashSet<String> = HashSet::with_capacity(self.steps.len());
        let mut ordered = Vec::with_capacity(self.steps.len());
        let mut pending: Vec<Arc<StepDefinition>> = self.steps.clone();
        while !pending.is_empty() {
            let before = pending.len();
            pending.retain(|step| {
                let ready = match &step.parent {
                    Some(parent) => {
                        !own.contains(parent.as_str()) || placed.contains(parent.as_str())
                    }
                    None => true,
                };
                if ready {
                    placed.insert(step.key.clone());
                    ordered.push(step.clone());
                }
                !ready
            });
            if pending.len() == before {
                let keys: Vec<&str> = pending.iter().map(|s| s.key.as_str()).collect();
                return Err(TourError::Structure(format!(
                    "steps are their own ancestors: {}",
                    keys.join(", ")
                )));
            }
        }
        Ok(ordered)
    }

    fn owner_has_step(&self, key: &str) -> bool {
        let mut current = self.owner.as_deref();
        while let Some(owner) = current {
            if owner.steps.iter().any(|s| s.key == key) {
                return true;
            }
            current = owner.owner.as_deref();
        }
        false
    }
}

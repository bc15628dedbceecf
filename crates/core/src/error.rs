use thiserror::Error;

pub type TourResult<T> = Result<T, TourError>;

#[derive(Error, Debug)]
pub enum TourError {
    #[error("Step {name} needs a step key in order to be materialized")]
    MissingStepKey { name: String },

    #[error("Tour {name} needs a tour key in order to be materialized")]
    MissingTourKey { name: String },

    #[error("Step key already registered: {0}")]
    DuplicateStepKey(String),

    #[error("Tour key already registered: {0}")]
    DuplicateTourKey(String),

    #[error("Step definition not found: {0}")]
    StepDefinitionNotFound(String),

    #[error("Tour definition not found: {0}")]
    TourDefinitionNotFound(String),

    #[error("Tour {0} has not been materialized")]
    TourNotMaterialized(String),

    #[error("Parent step {parent} of step {step} has not been materialized")]
    ParentStepNotFound { step: String, parent: String },

    #[error("Broken step tree: {0}")]
    Structure(String),

    #[error("Completion check failed for step {step}: {source}")]
    Predicate {
        step: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Store error: {0}")]
    Store(String),
}

impl TourError {
    /// True for errors caused by static definitions or the persisted tree
    /// rather than by a predicate or the store backend.
    pub fn is_structural(&self) -> bool {
        !matches!(self, TourError::Predicate { .. } | TourError::Store(_))
    }
}

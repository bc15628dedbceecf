//! Tour orchestration: ordered, nested steps a user works through, with
//! per-user completion tracking and navigation guarding.

pub mod definition;
pub mod evaluator;
pub mod guard;
pub mod materialize;
pub mod predicate;
pub mod progress;
pub mod registry;
pub mod sequencer;
pub mod snapshot;
pub mod tours;

pub use definition::{StepDefinition, TourDefinition};
pub use evaluator::CompletionEvaluator;
pub use guard::{NavigationDecision, NavigationGuard};
pub use materialize::{Materializer, SyncReport};
pub use predicate::{Always, Completable, ToggleCompletion};
pub use progress::ProgressTracker;
pub use registry::DefinitionRegistry;
pub use sequencer::Depth;
pub use snapshot::{StepSnapshot, TourSnapshot};
pub use tours::{Evaluation, TourEngine, TourInstance};

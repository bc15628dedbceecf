pub mod config;
pub mod error;
pub mod types;

pub use config::AppConfig;
pub use error::{TourError, TourResult};
pub use types::{StepRecord, TourRecord, TourStatus, User, UserId};

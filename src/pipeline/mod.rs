pub mod scheduler;
pub mod services;
pub mod types;

pub use scheduler::{InferenceScheduler, SchedulerState, SchedulerStatus};
pub use services::{InferenceService, RunOptions};
pub use types::{ActiveConfiguration, ConfigurationDocument, InferenceConfig};

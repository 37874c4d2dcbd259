mod configuration_slot;
mod inference_scheduler;
mod scheduled_run;

pub use configuration_slot::ConfigurationSlot;
pub use inference_scheduler::{InferenceScheduler, SchedulerState, SchedulerStatus};
pub use scheduled_run::ScheduledRun;

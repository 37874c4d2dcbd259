pub mod config;
pub mod coordinator;
pub mod edge;
pub mod error;
pub mod pipeline;

#[cfg(test)]
mod testing;

pub use config::EdgeSettings;
pub use coordinator::{Coordinator, CoordinatorBuilder};
pub use error::AppError;

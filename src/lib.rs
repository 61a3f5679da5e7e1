pub mod api;
pub mod config;
pub mod error;
pub mod job;
pub mod outline;
pub mod producer;
pub mod progress;
pub mod store;
pub mod utils;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
pub use job::{LaunchReceipt, Launcher, pipeline::Pipeline};
pub use outline::Outline;
pub use progress::ProgressStore;
pub use store::{CourseStore, sqlite::SqliteStore};

//! Kernel module - server infrastructure and dependencies.

pub mod ai;
pub mod deps;
pub mod jobs;
pub mod scheduler;
pub mod stores;
pub mod test_dependencies;
pub mod traits;

pub use ai::{NoopAI, OpenAIClient};
pub use deps::ServerDeps;
pub use scheduler::{PressureScheduler, TickReport};
pub use test_dependencies::TestDependencies;
pub use traits::*;

//! Automations: background variants that react to a seed's history.
//!
//! Each kind scores seeds with a pressure function; the scheduler queues a
//! run once the score crosses the kind's threshold, and a worker executes it
//! through `activities::run_automation_job`.

pub mod activities;
pub mod automation;
pub mod kinds;
pub mod models;
pub mod registry;

pub use activities::{JobError, JobReport, TriggerError};
pub use automation::{
    clamp_pressure, Automation, AutomationContext, PressureOutcome, DEFAULT_THRESHOLD,
};
pub use kinds::builtin_automations;
pub use models::{AutomationSettings, RunCommit};
pub use registry::{AutomationRegistry, RegisteredAutomation, RegistryError};

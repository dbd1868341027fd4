//! Automations domain activities - triggers and job execution

pub mod run_job;
pub mod trigger;

pub use run_job::{
    commit_automation_run, prepare_automation_job, run_automation_job, JobError, JobReport,
    PreparedRun,
};
pub use trigger::{regenerate_automation, trigger_automation, TriggerError};

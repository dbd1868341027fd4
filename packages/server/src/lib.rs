// Seeds Core - automation engine for atomic notes
//
// Seeds are short notes whose state is derived by replaying an append-only
// transaction log. Automations enrich seeds in the background: a pressure
// scheduler decides when each automation should run, a job queue and worker
// pool execute the runs, and followups turn scheduled reminders into a
// small state machine.

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;

pub use config::*;

//! Store implementations for the `Base*` infrastructure traits.
//!
//! - `postgres` - durable stores used by the server binary
//! - `memory` - process-local stores for tests and local runs

pub mod memory;
pub mod postgres;

pub use memory::{
    MemoryAutomationRunStore, MemoryAutomationSettingsStore, MemoryFollowupStore,
    MemorySeedStore, MemoryTransactionStore,
};
pub use postgres::{
    PgAutomationRunStore, PgAutomationSettingsStore, PgFollowupStore, PgSeedStore,
    PgTransactionStore,
};

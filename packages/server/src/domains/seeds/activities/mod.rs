//! Seeds domain activities - entry-point business logic
//!
//! Called by the (external) HTTP layer, the scheduler and the workers.
//! Every activity takes `&ServerDeps` and returns final models or a
//! `SeedError`.

pub mod lifecycle;
pub mod state;
pub mod transactions;

pub use lifecycle::{archive_seed, create_seed, get_seed, list_seeds_for_user, CreatedSeed};
pub use state::{compute_state, load_seed_view, SeedView};
pub use transactions::{edit_content, list_transactions, record_transaction, set_transaction_enabled};

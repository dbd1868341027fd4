pub mod seed;
pub mod state;
pub mod transaction;

pub use seed::Seed;
pub use state::{create_base, Category, SeedSnapshot, SeedState, Tag};
pub use transaction::{Transaction, TransactionData, TransactionDraft, TransactionType};

pub mod activities;
pub mod error;
pub mod models;
pub mod patch;
pub mod replay;

pub use error::SeedError;
pub use models::{
    create_base, Category, Seed, SeedSnapshot, SeedState, Tag, Transaction, TransactionData,
    TransactionDraft, TransactionType,
};
pub use patch::{PatchOperation, ValidationError};
pub use replay::{apply_patch, replay, ApplyError};

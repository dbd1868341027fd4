pub mod activities;
pub mod models;

pub use models::{
    DismissalType, Followup, FollowupChanges, FollowupError, FollowupOrigin, FollowupStatus,
    NewFollowup,
};

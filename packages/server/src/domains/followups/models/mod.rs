pub mod followup;

pub use followup::{
    normalize_message, parse_due_time, DismissalType, Followup, FollowupChanges, FollowupError,
    FollowupOrigin, FollowupStatus, NewFollowup,
};

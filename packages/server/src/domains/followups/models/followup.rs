use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::common::{FollowupId, SeedId, TransactionId};
use crate::domains::seeds::{Transaction, TransactionData, TransactionType};

// ============================================================================
// Enums
// ============================================================================

/// Who caused a followup (or a snooze) to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FollowupOrigin {
    #[default]
    Manual,
    Automation,
}

/// How a followup was dismissed: explicitly, or from a snooze prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DismissalType {
    #[default]
    Followup,
    Snooze,
}

/// Lifecycle position at a given instant.
///
/// ```text
/// Scheduled ──due──► Due ──snooze──► Snoozed ──due──► Due
///                     │                 │
///                     └──dismiss──► Dismissed ◄──dismiss──┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowupStatus {
    Scheduled,
    Due,
    Snoozed,
    Dismissed,
}

macro_rules! string_enum {
    ($ty:ty { $($variant:path => $name:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($variant => $name),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = anyhow::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok($variant),)+
                    other => Err(anyhow::anyhow!("unknown {}: {}", stringify!($ty), other)),
                }
            }
        }
    };
}

string_enum!(FollowupOrigin {
    FollowupOrigin::Manual => "manual",
    FollowupOrigin::Automation => "automation",
});

string_enum!(DismissalType {
    DismissalType::Followup => "followup",
    DismissalType::Snooze => "snooze",
});

// ============================================================================
// Errors
// ============================================================================

/// Reminder rule violations and lookup failures.
///
/// Everything except `Store` is caller-correctable.
#[derive(Debug, thiserror::Error)]
pub enum FollowupError {
    #[error("followup {0} not found")]
    NotFound(FollowupId),

    #[error("seed {0} not found")]
    SeedNotFound(SeedId),

    #[error("due_time must be an RFC 3339 timestamp, got `{0}`")]
    InvalidDueTime(String),

    #[error("message must not be empty")]
    EmptyMessage,

    #[error("at least one of due_time or message must be provided")]
    NothingToUpdate,

    #[error("duration_minutes must be greater than 0")]
    InvalidDuration,

    #[error("followup already dismissed")]
    AlreadyDismissed,

    #[error("schedule_followup payload is invalid: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl FollowupError {
    pub fn is_client_error(&self) -> bool {
        !matches!(self, FollowupError::Store(_))
    }
}

// ============================================================================
// Inputs
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct NewFollowup {
    pub due_time: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FollowupChanges {
    pub due_time: Option<String>,
    pub message: Option<String>,
}

pub fn parse_due_time(raw: &str) -> Result<DateTime<Utc>, FollowupError> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|_| FollowupError::InvalidDueTime(raw.to_string()))
}

pub fn normalize_message(raw: &str) -> Result<String, FollowupError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(FollowupError::EmptyMessage);
    }
    Ok(trimmed.to_string())
}

// ============================================================================
// Followup Model
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Followup {
    pub id: FollowupId,
    pub seed_id: SeedId,
    pub due_time: DateTime<Utc>,
    pub message: String,
    pub dismissed: bool,
    pub dismissed_at: Option<DateTime<Utc>>,
    pub dismissal_type: Option<DismissalType>,
    pub origin: FollowupOrigin,
    pub snooze_count: i32,
    pub last_snoozed_at: Option<DateTime<Utc>>,
    pub last_snooze_origin: Option<FollowupOrigin>,
    /// Transaction that produced this followup, when an automation did.
    pub transaction_id: Option<TransactionId>,
    pub created_at: DateTime<Utc>,
}

impl Followup {
    /// Validates input and builds a new, scheduled followup.
    pub fn create(
        seed_id: SeedId,
        input: &NewFollowup,
        origin: FollowupOrigin,
        now: DateTime<Utc>,
    ) -> Result<Self, FollowupError> {
        let due_time = parse_due_time(&input.due_time)?;
        let message = normalize_message(&input.message)?;

        Ok(Self {
            id: FollowupId::new(),
            seed_id,
            due_time,
            message,
            dismissed: false,
            dismissed_at: None,
            dismissal_type: None,
            origin,
            snooze_count: 0,
            last_snoozed_at: None,
            last_snooze_origin: None,
            transaction_id: None,
            created_at: now,
        })
    }

    /// The followup a `schedule_followup` transaction asks for, linked back
    /// to it. `None` for every other transaction type.
    pub fn from_transaction(
        transaction: &Transaction,
        now: DateTime<Utc>,
    ) -> Result<Option<Self>, FollowupError> {
        if transaction.transaction_type != TransactionType::ScheduleFollowup {
            return Ok(None);
        }
        let TransactionData::Payload(payload) = &transaction.data else {
            return Err(FollowupError::InvalidPayload(
                "expected an object with due_time and message".to_string(),
            ));
        };
        let input: NewFollowup = serde_json::from_value(payload.clone())
            .map_err(|e| FollowupError::InvalidPayload(e.to_string()))?;

        let origin = if transaction.is_from_automation() {
            FollowupOrigin::Automation
        } else {
            FollowupOrigin::Manual
        };
        let mut followup = Self::create(transaction.seed_id, &input, origin, now)?;
        followup.transaction_id = Some(transaction.id);
        Ok(Some(followup))
    }

    pub fn status(&self, now: DateTime<Utc>) -> FollowupStatus {
        if self.dismissed {
            FollowupStatus::Dismissed
        } else if self.due_time <= now {
            FollowupStatus::Due
        } else if self.snooze_count > 0 {
            FollowupStatus::Snoozed
        } else {
            FollowupStatus::Scheduled
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status(now) == FollowupStatus::Due
    }

    /// Changes due time and/or message. Both are validated before either is
    /// applied.
    pub fn edit(&mut self, changes: &FollowupChanges) -> Result<(), FollowupError> {
        self.ensure_open()?;
        if changes.due_time.is_none() && changes.message.is_none() {
            return Err(FollowupError::NothingToUpdate);
        }

        let due_time = changes.due_time.as_deref().map(parse_due_time).transpose()?;
        let message = changes.message.as_deref().map(normalize_message).transpose()?;

        if let Some(due_time) = due_time {
            self.due_time = due_time;
        }
        if let Some(message) = message {
            self.message = message;
        }
        Ok(())
    }

    /// Pushes the due time forward by `duration_minutes` from the current
    /// due time.
    pub fn snooze(
        &mut self,
        duration_minutes: i64,
        origin: FollowupOrigin,
        now: DateTime<Utc>,
    ) -> Result<(), FollowupError> {
        self.ensure_open()?;
        if duration_minutes <= 0 {
            return Err(FollowupError::InvalidDuration);
        }
        let delta = Duration::try_minutes(duration_minutes).ok_or(FollowupError::InvalidDuration)?;
        self.due_time = self
            .due_time
            .checked_add_signed(delta)
            .ok_or(FollowupError::InvalidDuration)?;
        self.snooze_count += 1;
        self.last_snoozed_at = Some(now);
        self.last_snooze_origin = Some(origin);
        Ok(())
    }

    pub fn dismiss(&mut self, kind: DismissalType, now: DateTime<Utc>) -> Result<(), FollowupError> {
        self.ensure_open()?;
        self.dismissed = true;
        self.dismissed_at = Some(now);
        self.dismissal_type = Some(kind);
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), FollowupError> {
        if self.dismissed {
            return Err(FollowupError::AlreadyDismissed);
        }
        Ok(())
    }
}

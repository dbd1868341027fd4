//! Typed entity IDs.
//!
//! `Id<T, V>` is a UUID tagged with the entity it identifies, so a `SeedId`
//! cannot be passed where a `FollowupId` is expected. `V` picks how fresh
//! IDs are generated:
//!
//! - `V7` (default): time-ordered, so IDs created later sort later. Replay
//!   uses this to break `created_at` ties between transactions.
//! - `V4`: random, for IDs whose order must carry no meaning (queue jobs).
//!
//! ```rust
//! use seeds_core::common::{FollowupId, SeedId};
//!
//! let seed_id = SeedId::new();
//! let same: SeedId = seed_id.to_string().parse().unwrap();
//! assert_eq!(seed_id, same);
//! let _followup_id = FollowupId::new();
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::{PgArgumentBuffer, PgHasArrayType, PgTypeInfo, PgValueRef, Postgres};
use uuid::Uuid;

/// How new IDs of a given kind are generated.
pub trait IdVersion {
    fn generate() -> Uuid;
}

/// Time-ordered UUIDs.
pub struct V7;

/// Random UUIDs.
pub struct V4;

impl IdVersion for V7 {
    fn generate() -> Uuid {
        Uuid::now_v7()
    }
}

impl IdVersion for V4 {
    fn generate() -> Uuid {
        Uuid::new_v4()
    }
}

#[repr(transparent)]
pub struct Id<T, V = V7> {
    uuid: Uuid,
    marker: PhantomData<fn() -> (T, V)>,
}

impl<T, V: IdVersion> Id<T, V> {
    pub fn new() -> Self {
        Self::from(V::generate())
    }
}

impl<T, V: IdVersion> Default for Id<T, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, V> Id<T, V> {
    pub fn as_uuid(&self) -> &Uuid {
        &self.uuid
    }
}

impl<T, V> From<Uuid> for Id<T, V> {
    fn from(uuid: Uuid) -> Self {
        Self {
            uuid,
            marker: PhantomData,
        }
    }
}

impl<T, V> From<Id<T, V>> for Uuid {
    fn from(id: Id<T, V>) -> Self {
        id.uuid
    }
}

// Manual impls: derives would needlessly require `T` and `V` to implement
// the same traits.

impl<T, V> Clone for Id<T, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T, V> Copy for Id<T, V> {}

impl<T, V> PartialEq for Id<T, V> {
    fn eq(&self, other: &Self) -> bool {
        self.uuid == other.uuid
    }
}

impl<T, V> Eq for Id<T, V> {}

impl<T, V> PartialOrd for Id<T, V> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T, V> Ord for Id<T, V> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.uuid.cmp(&other.uuid)
    }
}

impl<T, V> Hash for Id<T, V> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.uuid.hash(state);
    }
}

impl<T, V> fmt::Debug for Id<T, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entity = std::any::type_name::<T>().rsplit("::").next().unwrap_or("Entity");
        write!(f, "{entity}Id({})", self.uuid)
    }
}

impl<T, V> fmt::Display for Id<T, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.uuid.fmt(f)
    }
}

impl<T, V> FromStr for Id<T, V> {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self::from)
    }
}

impl<T, V> Serialize for Id<T, V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.uuid.serialize(serializer)
    }
}

impl<'de, T, V> Deserialize<'de> for Id<T, V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Uuid::deserialize(deserializer).map(Self::from)
    }
}

// ============================================================================
// Postgres: stored as UUID columns
// ============================================================================

impl<T, V> sqlx::Type<Postgres> for Id<T, V> {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <Uuid as sqlx::Type<Postgres>>::compatible(ty)
    }
}

impl<T, V> PgHasArrayType for Id<T, V> {
    fn array_type_info() -> PgTypeInfo {
        <Uuid as PgHasArrayType>::array_type_info()
    }
}

impl<T, V> sqlx::Encode<'_, Postgres> for Id<T, V> {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        <Uuid as sqlx::Encode<Postgres>>::encode_by_ref(&self.uuid, buf)
    }
}

impl<T, V> sqlx::Decode<'_, Postgres> for Id<T, V> {
    fn decode(value: PgValueRef<'_>) -> Result<Self, BoxDynError> {
        <Uuid as sqlx::Decode<Postgres>>::decode(value).map(Self::from)
    }
}

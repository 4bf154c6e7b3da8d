//! Monotonic clock abstraction and typed, ULID-shaped identifiers.
//!
//! Mirrors the workspace's `Id<T, V>` typed-UUID wrapper (see `common_rs::id`)
//! but backs the wrapper with a [`ulid::Ulid`] instead of a `Uuid` so that
//! job, event, and artifact identifiers sort lexicographically by creation
//! time, as required by §3 of the data model (`job_id (ULID)`).

use std::cmp::Ordering;
use std::fmt::{self, Debug, Display};
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use ulid::Ulid;

/// Source of "now". Abstracted so tests can freeze or fast-forward time
/// without sleeping, matching the in-process synchronous test runtime
/// called for in SPEC_FULL.md §9 design notes.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock implementation used by the worker binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only ever advances when told to. Used by scenario tests
/// that need deterministic lease-expiry and day-rollover behavior (the
/// lease-expiry scenario in §8 sets TTL to 0s rather than sleeping).
#[derive(Debug)]
pub struct FrozenClock {
    millis_since_epoch: AtomicI64,
}

impl FrozenClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            millis_since_epoch: AtomicI64::new(now.timestamp_millis()),
        }
    }

    pub fn advance(&self, duration: chrono::Duration) {
        self.millis_since_epoch
            .fetch_add(duration.num_milliseconds(), AtomicOrdering::SeqCst);
    }

    pub fn set(&self, now: DateTime<Utc>) {
        self.millis_since_epoch
            .store(now.timestamp_millis(), AtomicOrdering::SeqCst);
    }
}

impl Clock for FrozenClock {
    fn now(&self) -> DateTime<Utc> {
        let millis = self.millis_since_epoch.load(AtomicOrdering::SeqCst);
        DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
    }
}

/// A typed wrapper around [`Ulid`] that prevents accidentally mixing up
/// job, event, and artifact identifiers at compile time, the same way
/// `Id<T, V>` prevents mixing up entity UUIDs elsewhere in the workspace.
#[repr(transparent)]
pub struct Id<T>(Ulid, PhantomData<fn() -> T>);

impl<T> Id<T> {
    /// Mints a new, time-ordered identifier.
    #[inline]
    pub fn new() -> Self {
        Self(Ulid::new(), PhantomData)
    }

    #[inline]
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid, PhantomData)
    }

    #[inline]
    pub fn into_ulid(self) -> Ulid {
        self.0
    }

    #[inline]
    pub fn as_ulid(&self) -> &Ulid {
        &self.0
    }

    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?, PhantomData))
    }

    /// The creation timestamp encoded in the identifier's high bits.
    pub fn timestamp(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.0.timestamp_ms() as i64).unwrap_or_else(Utc::now)
    }
}

impl<T> Default for Id<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Id<T> {}

impl<T> Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple(&format!("Id<{}>", std::any::type_name::<T>()))
            .field(&self.0.to_string())
            .finish()
    }
}

impl<T> Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl<T> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl<T> Eq for Id<T> {}

impl<T> PartialOrd for Id<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl<T> Ord for Id<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl<T> Hash for Id<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl<T> FromStr for Id<T> {
    type Err = ulid::DecodeError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl<T> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.to_string().serialize(serializer)
    }
}

impl<'de, T> Deserialize<'de> for Id<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ulid::from_string(&s)
            .map(Self::from_ulid)
            .map_err(serde::de::Error::custom)
    }
}

/// Marker types for [`Id`].
pub struct JobMarker;
pub struct EventMarker;
pub struct ArtifactMarker;

pub type JobId = Id<JobMarker>;
pub type EventId = Id<EventMarker>;
pub type ArtifactId = Id<ArtifactMarker>;

/// Tenants are created by an external collaborator (§3: "Created
/// externally; never deleted by the core") so they are a plain opaque
/// string rather than a minted [`Id`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub String);

impl TenantId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TenantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

//! Identity and time types for Conduit entities

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Common behaviour of strongly-typed entity identifiers.
///
/// Every id wraps a UUIDv7 so ids sort by creation time.
pub trait EntityIdType: Copy + Eq + std::hash::Hash + fmt::Display {
    /// Wrap an existing UUID.
    fn new(uuid: Uuid) -> Self;

    /// Borrow the underlying UUID.
    fn as_uuid(&self) -> Uuid;

    /// Generate a fresh timestamp-sortable id.
    fn now_v7() -> Self {
        Self::new(Uuid::now_v7())
    }

    /// The nil id, used as a placeholder in tests.
    fn nil() -> Self {
        Self::new(Uuid::nil())
    }
}

macro_rules! define_entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl EntityIdType for $name {
            fn new(uuid: Uuid) -> Self {
                Self(uuid)
            }

            fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

define_entity_id!(
    /// Identifier of a Project (the tenant boundary).
    ProjectId
);
define_entity_id!(
    /// Identifier of an Agent within a Project.
    AgentId
);
define_entity_id!(
    /// Identifier of a stored LinkedAccount row.
    LinkedAccountId
);

// ============================================================================
// CLOCK ABSTRACTION
// ============================================================================

/// Source of "now" for expiry and quota-period decisions.
///
/// Injected so token expiry and period rollover are testable without sleeping.
pub trait Clock: Send + Sync {
    /// Current time as Unix epoch seconds.
    fn now_epoch_secs(&self) -> i64;

    /// Current time as a [`Timestamp`].
    fn now(&self) -> Timestamp {
        Utc.timestamp_opt(self.now_epoch_secs(), 0)
            .single()
            .unwrap_or_else(Utc::now)
    }
}

/// Production clock using system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch_secs(&self) -> i64 {
        Utc::now().timestamp()
    }

    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// Fixed clock for deterministic tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn now_epoch_secs(&self) -> i64 {
        self.0
    }
}

//! Wall-clock timestamps for entity metadata and the sync log.
//!
//! Entities carry their creation and modification times as RFC 3339 strings
//! inside `_kmd`; sync entries carry milliseconds since the Unix epoch so they
//! can be ordered cheaply.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::{Error, Result};

/// Milliseconds since the Unix epoch, UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp at the current time.
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    /// Creates a timestamp from milliseconds since the Unix epoch.
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns milliseconds since the Unix epoch.
    #[must_use]
    pub const fn as_millis(&self) -> i64 {
        self.0
    }

    /// Returns a timestamp strictly after `self`, using the current time when
    /// the clock has moved forward.
    ///
    /// Used to keep sync entries recorded in the same millisecond ordered.
    #[must_use]
    pub fn tick(&self) -> Self {
        let now = Utc::now().timestamp_millis();
        if now > self.0 {
            Self(now)
        } else {
            Self(self.0.saturating_add(1))
        }
    }

    /// Formats the timestamp as RFC 3339 with millisecond precision
    /// (`2024-01-01T00:00:00.000Z`).
    pub fn to_rfc3339(&self) -> String {
        match Utc.timestamp_millis_opt(self.0).single() {
            Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Millis, true),
            None => DateTime::<Utc>::UNIX_EPOCH.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    /// Parses an RFC 3339 string.
    pub fn parse_rfc3339(s: &str) -> Result<Self> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| Self(dt.with_timezone(&Utc).timestamp_millis()))
            .map_err(|e| Error::InvalidTimestamp(format!("{s}: {e}")))
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}

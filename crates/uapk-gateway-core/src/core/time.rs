// crates/uapk-gateway-core/src/core/time.rs
// ============================================================================
// Module: UAPK Gateway Time Model
// Description: RFC3339 UTC timestamps and day stamps for counters.
// Purpose: Provide deterministic, replayable time values across gateway records.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! Gateway records embed explicit UTC timestamps so hashing and replay stay
//! deterministic. The core engine never reads wall-clock time directly; hosts
//! supply timestamps through the [`crate::interfaces::Clock`] interface.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use thiserror::Error;
use time::Date;
use time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised when formatting or parsing timestamps.
#[derive(Debug, Error)]
pub enum TimeError {
    /// Timestamp could not be formatted as RFC3339.
    #[error("failed to format timestamp: {0}")]
    Format(String),
    /// Timestamp could not be parsed from RFC3339.
    #[error("failed to parse timestamp: {0}")]
    Parse(String),
}

// ============================================================================
// SECTION: Timestamp
// ============================================================================

/// Canonical UTC timestamp used in gateway records.
///
/// # Invariants
/// - Always normalized to UTC.
/// - Serializes as an RFC3339 string on the wire and in canonical JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(OffsetDateTime);

impl Timestamp {
    /// Creates a timestamp from an `OffsetDateTime`, normalizing to UTC.
    #[must_use]
    pub fn new(value: OffsetDateTime) -> Self {
        Self(value.to_offset(time::UtcOffset::UTC))
    }

    /// Creates a timestamp from unix seconds.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::Parse`] when the value is outside the representable range.
    pub fn from_unix_seconds(seconds: i64) -> Result<Self, TimeError> {
        OffsetDateTime::from_unix_timestamp(seconds)
            .map(Self)
            .map_err(|err| TimeError::Parse(err.to_string()))
    }

    /// Returns the timestamp as unix seconds.
    #[must_use]
    pub const fn unix_seconds(&self) -> i64 {
        self.0.unix_timestamp()
    }

    /// Formats the timestamp as an RFC3339 UTC string.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::Format`] when formatting fails.
    pub fn to_rfc3339(&self) -> Result<String, TimeError> {
        self.0.format(&Rfc3339).map_err(|err| TimeError::Format(err.to_string()))
    }

    /// Parses a timestamp from an RFC3339 string.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::Parse`] when the input is not valid RFC3339.
    pub fn parse_rfc3339(value: &str) -> Result<Self, TimeError> {
        OffsetDateTime::parse(value, &Rfc3339)
            .map(Self::new)
            .map_err(|err| TimeError::Parse(err.to_string()))
    }

    /// Returns the UTC day stamp for this timestamp.
    #[must_use]
    pub const fn day(&self) -> DayStamp {
        DayStamp(self.0.date())
    }

    /// Returns this timestamp advanced by whole seconds.
    #[must_use]
    pub fn plus_seconds(&self, seconds: i64) -> Self {
        Self(self.0.saturating_add(Duration::seconds(seconds)))
    }

    /// Returns this timestamp advanced by whole hours.
    #[must_use]
    pub fn plus_hours(&self, hours: i64) -> Self {
        Self(self.0.saturating_add(Duration::hours(hours)))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_rfc3339() {
            Ok(text) => f.write_str(&text),
            Err(_) => f.write_str("<invalid timestamp>"),
        }
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let text = self.to_rfc3339().map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&text)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse_rfc3339(&text).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// SECTION: Day Stamp
// ============================================================================

/// Calendar day (UTC) used to key daily action counters.
///
/// # Invariants
/// - Serializes as `YYYY-MM-DD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DayStamp(Date);

impl DayStamp {
    /// Returns the day as an ISO `YYYY-MM-DD` string.
    #[must_use]
    pub fn as_iso_string(&self) -> String {
        format!("{:04}-{:02}-{:02}", self.0.year(), u8::from(self.0.month()), self.0.day())
    }
}

impl fmt::Display for DayStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_iso_string())
    }
}

impl Serialize for DayStamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_iso_string())
    }
}

//! Time ranges for metric queries.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use pulsewatch_state::parse_duration;

/// Range used when a query names none.
pub const DEFAULT_RANGE: Duration = Duration::from_secs(24 * 3600);

/// A closed time interval `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The window of length `span` ending at `now`. Spans reaching before
    /// the representable epoch start at the minimum timestamp.
    pub fn last(span: Duration, now: DateTime<Utc>) -> Self {
        let start = chrono::Duration::from_std(span)
            .ok()
            .and_then(|d| now.checked_sub_signed(d))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self { start, end: now }
    }

    /// Parse a `range` query value such as `30m`, `1h` or `7d`.
    /// `None` selects [`DEFAULT_RANGE`]; malformed values yield `None`.
    pub fn parse(value: Option<&str>, now: DateTime<Utc>) -> Option<Self> {
        let span = match value.map(str::trim) {
            None | Some("") => DEFAULT_RANGE,
            Some(s) => parse_duration(s)?,
        };
        Some(Self::last(span, now))
    }

    /// Inclusive on both ends.
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts <= self.end
    }
}

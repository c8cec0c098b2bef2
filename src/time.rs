use std::fmt;

use log::error;
use serde::{Deserialize, Serialize};
use ::time::{macros::format_description, OffsetDateTime};

#[derive(Debug, Clone, Copy, PartialOrd, Ord, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    pub fn now() -> Result<Self, ()> {
        use std::time::SystemTime;

        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|duration| duration.as_secs() as i64)
            .map(Self)
            .map_err(|e| {
                error!("couldn't get time: {e:?}");
            })
    }

    pub const fn from_i64(secs: i64) -> Self {
        Self(secs)
    }

    /// Seconds elapsed from `earlier` to `self`, negative if `earlier` is in the future.
    pub fn since(self, earlier: Timestamp) -> i64 {
        self.0.saturating_sub(earlier.0)
    }

    pub fn plus_secs(self, secs: i64) -> Self {
        Self(self.0.saturating_add(secs))
    }

    fn datetime(self) -> Option<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp(self.0).ok()
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self(0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return write!(fmt, "<epoch>");
        }

        use ::time::format_description::well_known::Rfc3339;

        let formatted = self.datetime().and_then(|when| when.format(&Rfc3339).ok());

        match formatted {
            Some(s) => write!(fmt, "{}", s),
            None => write!(fmt, "{}", self.0),
        }
    }
}

/// "Oct 19, 2026"
pub fn format_date(when: Timestamp) -> String {
    let format = format_description!("[month repr:short] [day padding:none], [year]");

    when.datetime()
        .and_then(|dt| dt.format(&format).ok())
        .unwrap_or_else(|| when.0.to_string())
}

/// "Oct 19, 2026 14:05", in UTC
pub fn format_datetime(when: Timestamp) -> String {
    let format =
        format_description!("[month repr:short] [day padding:none], [year] [hour]:[minute]");

    when.datetime()
        .and_then(|dt| dt.format(&format).ok())
        .unwrap_or_else(|| when.0.to_string())
}

/// Relative description of `then`, falling back to the date after a week.
pub fn time_ago(then: Timestamp, now: Timestamp) -> String {
    const MINUTE: i64 = 60;
    const HOUR: i64 = 60 * MINUTE;
    const DAY: i64 = 24 * HOUR;

    fn plural(n: i64, unit: &str) -> String {
        if n == 1 {
            format!("1 {unit} ago")
        } else {
            format!("{n} {unit}s ago")
        }
    }

    match now.since(then) {
        secs if secs < MINUTE => "just now".into(),
        secs if secs < HOUR => plural(secs / MINUTE, "minute"),
        secs if secs < DAY => plural(secs / HOUR, "hour"),
        secs if secs < 7 * DAY => plural(secs / DAY, "day"),
        _ => format_date(then),
    }
}

//! Capture timestamp naming for remuxed recordings.
//!
//! Capture tools often embed the recording start time in the container's
//! `comment` tag. When enabled, the remux stage prefixes the destination
//! name with that time, expressed in a configured UTC offset:
//! `rec.flv` recorded at 2024-03-05 21:14:09 becomes `20240305-211409_rec.mp4`.

use chrono::{FixedOffset, NaiveDateTime, TimeZone};
use regex::Regex;
use std::sync::LazyLock;

static CAPTURE_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(\d{4}-\d{2}-\d{2})[T ](\d{2}:\d{2}:\d{2})(?:\.\d+)?(Z|[+-]\d{2}:?\d{2})?",
    )
    .unwrap()
});

const PREFIX_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Renames recordings after their embedded capture time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureTimestamp {
    offset: FixedOffset,
}

impl CaptureTimestamp {
    /// Returns `None` if the offset is outside ±24h.
    pub fn new(utc_offset_minutes: i32) -> Option<Self> {
        FixedOffset::east_opt(utc_offset_minutes.checked_mul(60)?).map(|offset| Self { offset })
    }

    /// Finds the first timestamp in `comment` and converts it to local time
    /// in the configured offset.
    ///
    /// A timestamp without an explicit offset is taken to be local already.
    pub fn parse(&self, comment: &str) -> Option<NaiveDateTime> {
        let caps = CAPTURE_TIME.captures(comment)?;
        let naive = NaiveDateTime::parse_from_str(
            &format!("{} {}", &caps[1], &caps[2]),
            "%Y-%m-%d %H:%M:%S",
        )
        .ok()?;

        let Some(zone) = caps.get(3) else {
            return Some(naive);
        };
        let source_offset = parse_offset(zone.as_str())?;
        let instant = source_offset.from_local_datetime(&naive).single()?;
        Some(instant.with_timezone(&self.offset).naive_local())
    }

    /// Destination stem for a recording named `stem` with container comment
    /// `comment`.
    ///
    /// Unchanged when no timestamp is found or the stem already carries it.
    pub fn destination_stem(&self, stem: &str, comment: Option<&str>) -> String {
        let Some(captured) = comment.and_then(|c| self.parse(c)) else {
            return stem.to_string();
        };
        let prefix = captured.format(PREFIX_FORMAT).to_string();
        if stem.starts_with(&prefix) {
            stem.to_string()
        } else {
            format!("{}_{}", prefix, stem)
        }
    }
}

/// Parses `Z`, `+HH:MM` or `-HHMM`.
fn parse_offset(zone: &str) -> Option<FixedOffset> {
    if zone == "Z" {
        return FixedOffset::east_opt(0);
    }
    let sign = if zone.starts_with('-') { -1 } else { 1 };
    let digits: String = zone[1..].chars().filter(|c| *c != ':').collect();
    let hours: i32 = digits.get(..2)?.parse().ok()?;
    let minutes: i32 = digits.get(2..4)?.parse().ok()?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

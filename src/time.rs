//! Reference time handling.
//!
//! Solvers write relative times (hours or seconds since the start of the
//! run). Absolute dates need an origin, which may be embedded in the result
//! file or supplied by the caller.

use chrono::{NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M:%S%.f",
    "%d/%m/%Y %H:%M",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Hours,
    Seconds,
}

impl TimeUnit {
    /// Factor converting a value in this unit to hours.
    pub fn to_hours(self) -> f64 {
        match self {
            TimeUnit::Hours => 1.0,
            TimeUnit::Seconds => 1.0 / 3600.0,
        }
    }

    /// Detect the unit from a CSV time header such as `Time (h)` or `Time (s)`.
    pub fn from_header(label: &str) -> Self {
        let lower = label.to_ascii_lowercase();
        if lower.contains("(s)") || lower.contains("sec") {
            TimeUnit::Seconds
        } else {
            TimeUnit::Hours
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ReferenceTime {
    pub origin: NaiveDateTime,
    pub unit: TimeUnit,
}

impl ReferenceTime {
    pub fn new(origin: NaiveDateTime, unit: TimeUnit) -> Self {
        ReferenceTime { origin, unit }
    }

    /// Parse `hours since 2000-01-01 00:00:00` style CF units strings.
    pub fn from_cf_units(units: &str) -> Option<Self> {
        let lower = units.trim().to_ascii_lowercase();
        let (unit_word, rest) = lower.split_once(" since ")?;
        let unit = match unit_word.trim() {
            "hours" | "hour" | "h" => TimeUnit::Hours,
            "seconds" | "second" | "s" => TimeUnit::Seconds,
            _ => return None,
        };
        let origin = parse_datetime(rest)?;
        Some(ReferenceTime { origin, unit })
    }

    /// Pick the embedded reference time when the file has one, otherwise the
    /// caller's default.
    pub fn reconcile(embedded: Option<Self>, default: Option<NaiveDateTime>) -> Option<Self> {
        embedded.or_else(|| default.map(|origin| ReferenceTime::new(origin, TimeUnit::Hours)))
    }

    /// Absolute date for a relative time expressed in hours, or `None` when
    /// the offset is not finite or falls outside the calendar range.
    pub fn to_datetime(&self, hours: f64) -> Option<NaiveDateTime> {
        if !hours.is_finite() {
            return None;
        }
        let millis = (hours * 3_600_000.0).round() as i64;
        self.origin.checked_add_signed(TimeDelta::try_milliseconds(millis)?)
    }

    /// Relative hours of an absolute date.
    pub fn to_hours(&self, datetime: &NaiveDateTime) -> f64 {
        (*datetime - self.origin).num_milliseconds() as f64 / 3_600_000.0
    }
}

pub fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .or_else(|| {
            chrono::NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cf_units_hours() {
        let rt = ReferenceTime::from_cf_units("hours since 2000-01-01 00:00:00").unwrap();
        assert_eq!(rt.unit, TimeUnit::Hours);
        assert_eq!(rt.to_datetime(1.5).unwrap().to_string(), "2000-01-01 01:30:00");
    }

    #[test]
    fn cf_units_rejects_unknown_unit() {
        assert!(ReferenceTime::from_cf_units("days since 2000-01-01").is_none());
        assert!(ReferenceTime::from_cf_units("hours").is_none());
    }

    #[test]
    fn embedded_reference_wins() {
        let embedded = ReferenceTime::new(parse_datetime("2021-05-01 12:00").unwrap(), TimeUnit::Hours);
        let default = parse_datetime("2000-01-01 00:00:00");
        let rt = ReferenceTime::reconcile(Some(embedded), default).unwrap();
        assert_eq!(rt.origin, embedded.origin);

        let fallback = ReferenceTime::reconcile(None, default).unwrap();
        assert_eq!(fallback.origin, default.unwrap());
        assert!(ReferenceTime::reconcile(None, None).is_none());
    }

    #[test]
    fn header_unit_detection() {
        assert_eq!(TimeUnit::from_header("Time (h)"), TimeUnit::Hours);
        assert_eq!(TimeUnit::from_header("Time (s)"), TimeUnit::Seconds);
    }

    #[test]
    fn hours_round_trip_through_datetime() {
        let rt = ReferenceTime::new(parse_datetime("2000-01-01 00:00:00").unwrap(), TimeUnit::Hours);
        let dt = rt.to_datetime(2.25).unwrap();
        assert!((rt.to_hours(&dt) - 2.25).abs() < 1e-9);
    }

    #[test]
    fn out_of_range_offsets_have_no_date() {
        let rt = ReferenceTime::new(parse_datetime("2000-01-01 00:00:00").unwrap(), TimeUnit::Hours);
        assert!(rt.to_datetime(1.0e13).is_none());
        assert!(rt.to_datetime(f64::INFINITY).is_none());
        assert!(rt.to_datetime(f64::NAN).is_none());
        assert!(rt.to_datetime(-1.0).is_some());
    }

    #[test]
    fn day_first_with_fraction_parses() {
        let dt = parse_datetime("01/02/2000 06:30:00.000").unwrap();
        assert_eq!(dt.to_string(), "2000-02-01 06:30:00");
    }
}

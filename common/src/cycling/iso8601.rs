//! Date-time cycle points, backed by `chrono`. Mirrors the subset of
//! `original_source/lib/cylc/cycling/iso8601.py`'s `ISO8601Point` behaviour this
//! engine needs: parsing, canonical dumping, and calendar-correct arithmetic
//! with an [`IsoDuration`].

use super::interval::IsoDuration;
use crate::error::CycleTimeError;
use chrono::{DateTime, Datelike, FixedOffset, TimeZone, Timelike};

/// A point in date-time cycling, always normalised to an explicit UTC offset
/// so two points parsed from differently-zoned strings still compare
/// correctly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IsoPoint(DateTime<FixedOffset>);

impl IsoPoint {
    pub fn from_datetime(dt: DateTime<FixedOffset>) -> Self {
        IsoPoint(dt)
    }

    pub fn datetime(&self) -> DateTime<FixedOffset> {
        self.0
    }

    /// Parse extended or basic ISO-8601 date-time strings, with optional
    /// truncation (`2024`, `2024-01`, `2024-01-01`) defaulting missing
    /// fields to their minimum.
    pub fn parse(s: &str) -> Result<Self, CycleTimeError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(CycleTimeError::Unparsable(s.to_string()));
        }

        for fmt in &[
            "%Y-%m-%dT%H:%M:%S%:z",
            "%Y-%m-%dT%H:%M%:z",
            "%Y%m%dT%H%M%S%:z",
            "%Y%m%dT%H%M%z",
        ] {
            if let Ok(dt) = DateTime::parse_from_str(trimmed, fmt) {
                return Ok(IsoPoint(dt));
            }
        }

        let (body, offset) = split_offset(trimmed);
        let offset = match offset {
            Some(o) => parse_offset(o).ok_or_else(|| CycleTimeError::Unparsable(s.to_string()))?,
            None => FixedOffset::east_opt(0).unwrap(),
        };

        let digits_only: String = body.chars().filter(|c| c.is_ascii_digit()).collect();
        let (date_str, time_str) = match body.split_once('T') {
            Some((d, t)) => (d.to_string(), t.to_string()),
            None => (body.to_string(), String::new()),
        };
        let date_digits: String = date_str.chars().filter(|c| c.is_ascii_digit()).collect();
        if date_digits.is_empty() || digits_only.len() < 4 {
            return Err(CycleTimeError::Unparsable(s.to_string()));
        }
        let year: i32 = date_digits[0..4.min(date_digits.len())]
            .parse()
            .map_err(|_| CycleTimeError::Unparsable(s.to_string()))?;
        let month: u32 = if date_digits.len() >= 6 {
            date_digits[4..6].parse().unwrap_or(1)
        } else {
            1
        };
        let day: u32 = if date_digits.len() >= 8 {
            date_digits[6..8].parse().unwrap_or(1)
        } else {
            1
        };

        let time_digits: String = time_str.chars().filter(|c| c.is_ascii_digit()).collect();
        let hour: u32 = if time_digits.len() >= 2 {
            time_digits[0..2].parse().unwrap_or(0)
        } else {
            0
        };
        let minute: u32 = if time_digits.len() >= 4 {
            time_digits[2..4].parse().unwrap_or(0)
        } else {
            0
        };
        let second: u32 = if time_digits.len() >= 6 {
            time_digits[4..6].parse().unwrap_or(0)
        } else {
            0
        };

        let dt = offset
            .with_ymd_and_hms(year, month.max(1), day.max(1), hour, minute, second)
            .single()
            .ok_or_else(|| CycleTimeError::Unparsable(s.to_string()))?;
        Ok(IsoPoint(dt))
    }

    /// Canonical extended form, e.g. `2024-01-01T00:00:00Z`.
    pub fn dump(&self) -> String {
        let dt = self.0;
        let offset_str = if dt.offset().local_minus_utc() == 0 {
            "Z".to_string()
        } else {
            dt.format("%:z").to_string()
        };
        format!(
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}{}",
            dt.year(),
            dt.month(),
            dt.day(),
            dt.hour(),
            dt.minute(),
            dt.second(),
            offset_str
        )
    }

    /// Add a (possibly negative) duration, applying years and months as
    /// calendar steps with end-of-month clamping, and the rest as exact
    /// elapsed time.
    pub fn add(&self, d: &IsoDuration) -> IsoPoint {
        let mut dt = self.0;
        if d.years != 0 || d.months != 0 {
            let total_months = d.years * 12 + d.months;
            dt = add_months(dt, total_months);
        }
        let seconds = d.weeks * 7 * 86_400 + d.days * 86_400 + d.hours * 3_600 + d.minutes * 60 + d.seconds;
        if seconds != 0 {
            dt = dt + chrono::Duration::seconds(seconds);
        }
        IsoPoint(dt)
    }

    pub fn sub_point(&self, other: &IsoPoint) -> IsoDuration {
        let delta = self.0.signed_duration_since(other.0);
        IsoDuration {
            years: 0,
            months: 0,
            weeks: 0,
            days: 0,
            hours: 0,
            minutes: 0,
            seconds: delta.num_seconds(),
        }
    }
}

fn add_months(dt: DateTime<FixedOffset>, total_months: i64) -> DateTime<FixedOffset> {
    let y = dt.year() as i64;
    let m0 = dt.month0() as i64;
    let total = y * 12 + m0 + total_months;
    let new_year = total.div_euclid(12) as i32;
    let new_month0 = total.rem_euclid(12) as u32;
    let new_month = new_month0 + 1;
    let mut day = dt.day();
    loop {
        if let Some(candidate) = dt
            .timezone()
            .with_ymd_and_hms(new_year, new_month, day, dt.hour(), dt.minute(), dt.second())
            .single()
        {
            return candidate;
        }
        day -= 1;
        if day == 0 {
            // should not happen; every month has at least one day
            return dt;
        }
    }
}

fn split_offset(s: &str) -> (&str, Option<&str>) {
    if let Some(stripped) = s.strip_suffix('Z') {
        return (stripped, Some("Z"));
    }
    // search from the right for a +HH:MM / -HH:MM style offset, being careful
    // not to match the leading sign of the year or a date separator.
    if s.len() > 6 {
        let tail = &s[s.len() - 6..];
        if (tail.starts_with('+') || tail.starts_with('-')) && tail.as_bytes()[3] == b':' {
            return (&s[..s.len() - 6], Some(tail));
        }
    }
    if s.len() > 5 {
        let tail = &s[s.len() - 5..];
        if tail.starts_with('+') || tail.starts_with('-') {
            if tail[1..].chars().all(|c| c.is_ascii_digit()) {
                return (&s[..s.len() - 5], Some(tail));
            }
        }
    }
    (s, None)
}

fn parse_offset(s: &str) -> Option<FixedOffset> {
    if s == "Z" {
        return FixedOffset::east_opt(0);
    }
    let sign = if s.starts_with('-') { -1 } else { 1 };
    let digits: String = s.chars().filter(|c| c.is_ascii_digit()).collect();
    let (h, m) = if digits.len() >= 4 {
        (digits[0..2].parse::<i32>().ok()?, digits[2..4].parse::<i32>().ok()?)
    } else if digits.len() == 2 {
        (digits.parse::<i32>().ok()?, 0)
    } else {
        return None;
    };
    FixedOffset::east_opt(sign * (h * 3600 + m * 60))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_dumps_extended_form() {
        let p = IsoPoint::parse("2024-03-01T12:00:00Z").unwrap();
        assert_eq!(p.dump(), "2024-03-01T12:00:00Z");
    }

    #[test]
    fn truncated_forms_default_missing_fields() {
        let p = IsoPoint::parse("2024").unwrap();
        assert_eq!(p.dump(), "2024-01-01T00:00:00Z");
        let p = IsoPoint::parse("2024-06").unwrap();
        assert_eq!(p.dump(), "2024-06-01T00:00:00Z");
    }

    #[test]
    fn adding_months_clamps_to_month_end() {
        let p = IsoPoint::parse("2024-01-31T00:00:00Z").unwrap();
        let d = IsoDuration::parse("P1M").unwrap();
        assert_eq!(p.add(&d).dump(), "2024-02-29T00:00:00Z");
    }

    #[test]
    fn adding_days_crosses_month_boundary() {
        let p = IsoPoint::parse("2024-01-31T00:00:00Z").unwrap();
        let d = IsoDuration::parse("P1D").unwrap();
        assert_eq!(p.add(&d).dump(), "2024-02-01T00:00:00Z");
    }

    #[test]
    fn offsets_normalise_for_comparison() {
        let a = IsoPoint::parse("2024-01-01T01:00:00+01:00").unwrap();
        let b = IsoPoint::parse("2024-01-01T00:00:00Z").unwrap();
        assert_eq!(a, b);
    }
}

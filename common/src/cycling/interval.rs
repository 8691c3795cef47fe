//! Signed durations: an ISO-8601 duration for date-time cycling, or a plain
//! integer for integer cycling. Mirrors `original_source/lib/cylc/cycling/iso8601.py`'s
//! `ISO8601Interval` and the integer-cycling counterpart, unified into one type.

use crate::error::CycleTimeError;
use std::cmp::Ordering;
use std::fmt;

/// An ISO-8601 duration, kept as signed calendar components rather than a
/// single span of seconds: years and months are variable-length and must be
/// applied to a date, not folded into a fixed number of seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IsoDuration {
    pub years: i64,
    pub months: i64,
    pub weeks: i64,
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
    pub seconds: i64,
}

impl IsoDuration {
    pub fn is_zero(&self) -> bool {
        *self == IsoDuration::default()
    }

    pub fn negate(&self) -> IsoDuration {
        IsoDuration {
            years: -self.years,
            months: -self.months,
            weeks: -self.weeks,
            days: -self.days,
            hours: -self.hours,
            minutes: -self.minutes,
            seconds: -self.seconds,
        }
    }

    pub fn scale(&self, m: i64) -> IsoDuration {
        IsoDuration {
            years: self.years * m,
            months: self.months * m,
            weeks: self.weeks * m,
            days: self.days * m,
            hours: self.hours * m,
            minutes: self.minutes * m,
            seconds: self.seconds * m,
        }
    }

    pub fn add(&self, other: &IsoDuration) -> IsoDuration {
        IsoDuration {
            years: self.years + other.years,
            months: self.months + other.months,
            weeks: self.weeks + other.weeks,
            days: self.days + other.days,
            hours: self.hours + other.hours,
            minutes: self.minutes + other.minutes,
            seconds: self.seconds + other.seconds,
        }
    }

    /// An approximate magnitude in seconds, used only for ordering and for
    /// the runahead-limit "multiple of the shortest sequence interval"
    /// calculation. Years are averaged at 365.25 days, months at 30.44 days,
    /// matching the approximation the original cylc-flow documents for
    /// cross-unit interval comparison.
    pub fn approx_seconds(&self) -> f64 {
        self.years as f64 * 365.25 * 86_400.0
            + self.months as f64 * 30.44 * 86_400.0
            + self.weeks as f64 * 7.0 * 86_400.0
            + self.days as f64 * 86_400.0
            + self.hours as f64 * 3_600.0
            + self.minutes as f64 * 60.0
            + self.seconds as f64
    }

    /// Parse an ISO-8601 duration such as `P1D`, `PT30S`, `-P1DT6H`, `P1Y2M`.
    pub fn parse(s: &str) -> Result<Self, CycleTimeError> {
        let mut rest = s.trim();
        if rest.is_empty() {
            return Err(CycleTimeError::Unparsable(s.to_string()));
        }
        let negative = if let Some(stripped) = rest.strip_prefix('-') {
            rest = stripped;
            true
        } else {
            false
        };
        let rest = rest
            .strip_prefix('P')
            .ok_or_else(|| CycleTimeError::Unparsable(s.to_string()))?;
        let (date_part, time_part) = match rest.split_once('T') {
            Some((d, t)) => (d, Some(t)),
            None => (rest, None),
        };

        let mut out = IsoDuration::default();
        parse_components(date_part, &[('Y', 0), ('M', 1), ('W', 2), ('D', 3)], &mut out, s)?;
        if let Some(t) = time_part {
            parse_components(t, &[('H', 4), ('M', 5), ('S', 6)], &mut out, s)?;
        }
        if negative {
            out = out.negate();
        }
        Ok(out)
    }

    pub fn dump(&self) -> String {
        if self.is_zero() {
            return "P0D".to_string();
        }
        let mut neg = self.clone();
        let all_non_positive = [
            self.years, self.months, self.weeks, self.days, self.hours, self.minutes, self.seconds,
        ]
        .iter()
        .all(|v| *v <= 0);
        let sign = if all_non_positive {
            neg = self.negate();
            "-"
        } else {
            ""
        };
        let mut date_part = String::new();
        if neg.years != 0 {
            date_part.push_str(&format!("{}Y", neg.years));
        }
        if neg.months != 0 {
            date_part.push_str(&format!("{}M", neg.months));
        }
        if neg.weeks != 0 {
            date_part.push_str(&format!("{}W", neg.weeks));
        }
        if neg.days != 0 {
            date_part.push_str(&format!("{}D", neg.days));
        }
        let mut time_part = String::new();
        if neg.hours != 0 {
            time_part.push_str(&format!("{}H", neg.hours));
        }
        if neg.minutes != 0 {
            time_part.push_str(&format!("{}M", neg.minutes));
        }
        if neg.seconds != 0 {
            time_part.push_str(&format!("{}S", neg.seconds));
        }
        let mut out = format!("{}P{}", sign, date_part);
        if !time_part.is_empty() {
            out.push('T');
            out.push_str(&time_part);
        }
        if date_part.is_empty() && time_part.is_empty() {
            out = format!("{}P0D", sign);
        }
        out
    }
}

fn parse_components(
    s: &str,
    units: &[(char, usize)],
    out: &mut IsoDuration,
    original: &str,
) -> Result<(), CycleTimeError> {
    let mut num = String::new();
    for ch in s.chars() {
        if ch.is_ascii_digit() {
            num.push(ch);
        } else if units.iter().any(|(u, _)| *u == ch) {
            if num.is_empty() {
                return Err(CycleTimeError::Unparsable(original.to_string()));
            }
            let value: i64 = num
                .parse()
                .map_err(|_| CycleTimeError::Unparsable(original.to_string()))?;
            num.clear();
            match ch {
                'Y' => out.years = value,
                'W' => out.weeks = value,
                'D' => out.days = value,
                'H' => out.hours = value,
                'S' => out.seconds = value,
                'M' => {
                    // disambiguated by caller: date-part M is months, time-part M is minutes
                    if units.iter().any(|(u, idx)| *u == 'Y' && *idx == 0) {
                        out.months = value;
                    } else {
                        out.minutes = value;
                    }
                }
                _ => unreachable!(),
            }
        } else if !ch.is_whitespace() {
            return Err(CycleTimeError::Unparsable(original.to_string()));
        }
    }
    if !num.is_empty() {
        return Err(CycleTimeError::Unparsable(original.to_string()));
    }
    Ok(())
}

/// A signed duration: either an ISO-8601 calendar duration, or a plain
/// integer step for integer cycling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interval {
    Iso(IsoDuration),
    Int(i64),
}

impl Interval {
    pub fn parse_iso(s: &str) -> Result<Self, CycleTimeError> {
        Ok(Interval::Iso(IsoDuration::parse(s)?))
    }

    pub fn zero_like(&self) -> Interval {
        match self {
            Interval::Iso(_) => Interval::Iso(IsoDuration::default()),
            Interval::Int(_) => Interval::Int(0),
        }
    }

    pub fn negate(&self) -> Interval {
        match self {
            Interval::Iso(d) => Interval::Iso(d.negate()),
            Interval::Int(i) => Interval::Int(-i),
        }
    }

    pub fn scale(&self, m: i64) -> Interval {
        match self {
            Interval::Iso(d) => Interval::Iso(d.scale(m)),
            Interval::Int(i) => Interval::Int(i * m),
        }
    }

    pub fn add(&self, other: &Interval) -> Interval {
        match (self, other) {
            (Interval::Iso(a), Interval::Iso(b)) => Interval::Iso(a.add(b)),
            (Interval::Int(a), Interval::Int(b)) => Interval::Int(a + b),
            _ => *self,
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            Interval::Iso(d) => d.is_zero(),
            Interval::Int(i) => *i == 0,
        }
    }

    pub fn dump(&self) -> String {
        match self {
            Interval::Iso(d) => d.dump(),
            Interval::Int(i) => i.to_string(),
        }
    }

    pub(crate) fn approx_key(&self) -> f64 {
        match self {
            Interval::Iso(d) => d.approx_seconds(),
            Interval::Int(i) => *i as f64,
        }
    }
}

impl PartialOrd for Interval {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Interval {
    fn cmp(&self, other: &Self) -> Ordering {
        self.approx_key()
            .partial_cmp(&other.approx_key())
            .unwrap_or(Ordering::Equal)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.dump())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_date_and_time_components() {
        let d = IsoDuration::parse("P1Y2M3DT4H5M6S").unwrap();
        assert_eq!(d.years, 1);
        assert_eq!(d.months, 2);
        assert_eq!(d.days, 3);
        assert_eq!(d.hours, 4);
        assert_eq!(d.minutes, 5);
        assert_eq!(d.seconds, 6);
    }

    #[test]
    fn round_trips_simple_duration() {
        let d = IsoDuration::parse("P1D").unwrap();
        assert_eq!(d.dump(), "P1D");
    }

    #[test]
    fn negative_duration_parses_and_dumps() {
        let d = IsoDuration::parse("-P1D").unwrap();
        assert_eq!(d.days, -1);
        assert_eq!(d.dump(), "-P1D");
    }

    #[test]
    fn ordering_is_approximate_but_sane() {
        let one_day = Interval::parse_iso("P1D").unwrap();
        let one_hour = Interval::parse_iso("PT1H").unwrap();
        assert!(one_day > one_hour);
    }
}

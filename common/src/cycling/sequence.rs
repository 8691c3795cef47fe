//! Recurrence sequences: `Rn/start/period`, `R/start/period`, `period/end`,
//! `Rn/period/end`, and their integer-cycling equivalents, as used on the
//! right-hand side of a graph section header. Grounded on the recurrence
//! handling in `original_source/lib/cylc/cycling/iso8601.py`
//! (`ISO8601Sequence`, `get_prev_point`, `get_next_point`, `is_on_sequence`).

use super::{CyclePoint, CyclingMode, Interval};
use crate::error::SequenceError;

/// A single recurrence: an anchor point plus a step, optionally bounded by a
/// repetition count and/or a start/end cycle point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequence {
    anchor: CyclePoint,
    interval: Interval,
    max_reps: Option<u64>,
    start_bound: Option<CyclePoint>,
    end_bound: Option<CyclePoint>,
}

impl Sequence {
    /// Parse a recurrence string. `context_start` / `context_end` supply the
    /// workflow's initial/final cycle point, used when the recurrence itself
    /// doesn't name a start or end (`period/end`, bare `period`).
    pub fn parse(
        s: &str,
        mode: CyclingMode,
        context_start: Option<&CyclePoint>,
        context_end: Option<&CyclePoint>,
    ) -> Result<Sequence, SequenceError> {
        let raw = s.trim();
        if raw.is_empty() {
            return Err(SequenceError::Unparsable(s.to_string()));
        }
        let parts: Vec<&str> = raw.split('/').collect();

        let (reps_token, rest): (Option<&str>, &[&str]) = if parts[0].starts_with('R') {
            (Some(parts[0]), &parts[1..])
        } else {
            (None, &parts[..])
        };

        let max_reps = match reps_token {
            None => None,
            Some("R") => None,
            Some(tok) => {
                let digits = &tok[1..];
                if digits.is_empty() {
                    None
                } else {
                    Some(
                        digits
                            .parse::<u64>()
                            .map_err(|_| SequenceError::Unparsable(s.to_string()))?,
                    )
                }
            }
        };

        let is_interval = |t: &str| t.starts_with('P') || t.starts_with("-P");

        let (anchor, interval, start_bound, end_bound) = match rest.len() {
            1 if is_interval(rest[0]) => {
                // bare period, e.g. "P1D": implicit start/end taken from context
                let interval = parse_interval(rest[0], mode, s)?;
                let start = context_start
                    .copied()
                    .ok_or_else(|| SequenceError::MissingStart {
                        recurrence: s.to_string(),
                    })?;
                (start, interval, Some(start), context_end.copied())
            }
            1 => {
                // Rn/point  -- a single occurrence (or n occurrences) at one point
                let point = CyclePoint::parse(rest[0], mode)
                    .map_err(|_| SequenceError::Unparsable(s.to_string()))?;
                (point, zero_interval(mode), Some(point), Some(point))
            }
            2 => {
                if is_interval(rest[0]) && !is_interval(rest[1]) {
                    // period/end (unbounded, anchored at the workflow start)
                    // or Rn/period/end (bounded, anchored backwards from end)
                    let interval = parse_interval(rest[0], mode, s)?;
                    let end = CyclePoint::parse(rest[1], mode)
                        .map_err(|_| SequenceError::Unparsable(s.to_string()))?;
                    let start = if let Some(reps) = max_reps {
                        end.add(&interval.scale(-(reps as i64 - 1)))
                            .map_err(|_| SequenceError::InvalidInterval(s.to_string()))?
                    } else {
                        context_start
                            .copied()
                            .ok_or_else(|| SequenceError::MissingStart {
                                recurrence: s.to_string(),
                            })?
                    };
                    (start, interval, Some(start), Some(end))
                } else if !is_interval(rest[0]) && is_interval(rest[1]) {
                    // start/period (R/start/period, optionally bounded by max_reps)
                    let start = CyclePoint::parse(rest[0], mode)
                        .map_err(|_| SequenceError::Unparsable(s.to_string()))?;
                    let interval = parse_interval(rest[1], mode, s)?;
                    (start, interval, Some(start), context_end.copied())
                } else {
                    return Err(SequenceError::Unparsable(s.to_string()));
                }
            }
            3 => {
                return Err(SequenceError::Unparsable(s.to_string()));
            }
            _ => return Err(SequenceError::Unparsable(s.to_string())),
        };

        Ok(Sequence {
            anchor,
            interval,
            max_reps,
            start_bound,
            end_bound,
        })
    }

    /// Parse the genuine three-token forms `Rn/start/period` and
    /// `Rn/period/end` directly; used by callers that already split the
    /// recurrence into its `R`-token and two remaining tokens.
    pub fn parse_three(
        reps: Option<u64>,
        a: &str,
        b: &str,
        mode: CyclingMode,
        full: &str,
    ) -> Result<Sequence, SequenceError> {
        let is_interval = |t: &str| t.starts_with('P') || t.starts_with("-P");
        if !is_interval(a) && is_interval(b) {
            let start = CyclePoint::parse(a, mode)
                .map_err(|_| SequenceError::Unparsable(full.to_string()))?;
            let interval = parse_interval(b, mode, full)?;
            Ok(Sequence {
                anchor: start,
                interval,
                max_reps: reps,
                start_bound: Some(start),
                end_bound: None,
            })
        } else if is_interval(a) && !is_interval(b) {
            let interval = parse_interval(a, mode, full)?;
            let end = CyclePoint::parse(b, mode)
                .map_err(|_| SequenceError::Unparsable(full.to_string()))?;
            let reps = reps.ok_or_else(|| SequenceError::Unparsable(full.to_string()))?;
            let start = end.add(&interval.scale(-(reps as i64 - 1))).map_err(|_| {
                SequenceError::InvalidInterval(full.to_string())
            })?;
            Ok(Sequence {
                anchor: start,
                interval,
                max_reps: Some(reps),
                start_bound: Some(start),
                end_bound: Some(end),
            })
        } else {
            Err(SequenceError::Unparsable(full.to_string()))
        }
    }

    fn kth(&self, k: i64) -> Option<CyclePoint> {
        if let Some(max) = self.max_reps {
            if k < 0 || k as u64 >= max {
                return None;
            }
        } else if k < 0 {
            return None;
        }
        let p = self.anchor.add(&self.interval.scale(k)).ok()?;
        if let Some(sb) = &self.start_bound {
            if p < *sb {
                return None;
            }
        }
        if let Some(eb) = &self.end_bound {
            if p > *eb {
                return None;
            }
        }
        Some(p)
    }

    fn estimate_k(&self, p: &CyclePoint) -> i64 {
        if self.interval.is_zero() {
            return 0;
        }
        let diff = match p.sub(&self.anchor) {
            Some(d) => d,
            None => return 0,
        };
        let ratio = diff.approx_key() / self.interval.approx_key();
        if ratio.is_finite() {
            ratio.round() as i64
        } else {
            0
        }
    }

    /// Whether `p` falls exactly on this recurrence.
    pub fn on_sequence(&self, p: &CyclePoint) -> bool {
        let k0 = self.estimate_k(p);
        for k in (k0 - 2)..=(k0 + 2) {
            if self.kth(k).as_ref() == Some(p) {
                return true;
            }
        }
        false
    }

    /// The first recurrence point strictly after `p`.
    pub fn next(&self, p: &CyclePoint) -> Option<CyclePoint> {
        let k0 = self.estimate_k(p);
        let mut k = k0 - 3;
        let mut best: Option<CyclePoint> = None;
        for _ in 0..4000 {
            match self.kth(k) {
                Some(candidate) if candidate > *p => {
                    best = Some(candidate);
                    break;
                }
                Some(_) => {}
                None if k > k0 + 3 && self.max_reps.is_some() => break,
                None => {}
            }
            k += 1;
            if self.max_reps.map(|m| k as u64 > m + 5).unwrap_or(false) {
                break;
            }
        }
        best
    }

    /// The last recurrence point strictly before `p`.
    pub fn prev(&self, p: &CyclePoint) -> Option<CyclePoint> {
        let k0 = self.estimate_k(p);
        let mut k = k0 + 3;
        let mut best: Option<CyclePoint> = None;
        for _ in 0..4000 {
            match self.kth(k) {
                Some(candidate) if candidate < *p => {
                    best = Some(candidate);
                    break;
                }
                _ => {}
            }
            k -= 1;
            if k < -5 {
                break;
            }
        }
        best
    }

    /// The first recurrence point at or after `p`.
    pub fn first_on_or_after(&self, p: &CyclePoint) -> Option<CyclePoint> {
        if self.on_sequence(p) {
            return Some(*p);
        }
        self.next(p)
    }

    /// The first point in the recurrence (its earliest generated point).
    pub fn first_point(&self) -> Option<CyclePoint> {
        self.kth(0)
    }

    pub fn interval(&self) -> &Interval {
        &self.interval
    }
}

fn zero_interval(mode: CyclingMode) -> Interval {
    match mode {
        CyclingMode::Iso8601 => Interval::Iso(super::IsoDuration::default()),
        CyclingMode::Integer => Interval::Int(0),
    }
}

fn parse_interval(t: &str, mode: CyclingMode, full: &str) -> Result<Interval, SequenceError> {
    match mode {
        CyclingMode::Iso8601 => {
            Interval::parse_iso(t).map_err(|_| SequenceError::InvalidInterval(full.to_string()))
        }
        CyclingMode::Integer => {
            let digits = t.trim_start_matches('-').trim_start_matches('P');
            let magnitude: i64 = digits
                .parse()
                .map_err(|_| SequenceError::InvalidInterval(full.to_string()))?;
            let signed = if t.starts_with("-P") { -magnitude } else { magnitude };
            Ok(Interval::Int(signed))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iso(s: &str) -> CyclePoint {
        CyclePoint::parse(s, CyclingMode::Iso8601).unwrap()
    }

    #[test]
    fn repeating_daily_sequence_from_start() {
        let seq = Sequence::parse(
            "2024-01-01T00:00:00Z/P1D",
            CyclingMode::Iso8601,
            None,
            None,
        )
        .unwrap();
        assert!(seq.on_sequence(&iso("2024-01-02T00:00:00Z")));
        assert!(!seq.on_sequence(&iso("2024-01-02T12:00:00Z")));
        assert_eq!(
            seq.next(&iso("2024-01-01T00:00:00Z")),
            Some(iso("2024-01-02T00:00:00Z"))
        );
    }

    #[test]
    fn bounded_recurrence_via_parse_three() {
        let seq = Sequence::parse_three(
            Some(3),
            "2024-01-01T00:00:00Z",
            "P1D",
            CyclingMode::Iso8601,
            "R3/2024-01-01T00:00:00Z/P1D",
        )
        .unwrap();
        assert!(seq.on_sequence(&iso("2024-01-03T00:00:00Z")));
        assert!(!seq.on_sequence(&iso("2024-01-04T00:00:00Z")));
        assert_eq!(seq.next(&iso("2024-01-03T00:00:00Z")), None);
    }

    #[test]
    fn period_end_form_uses_context_start() {
        let start = iso("2024-01-01T00:00:00Z");
        let end = iso("2024-01-05T00:00:00Z");
        let seq = Sequence::parse(
            "P1D/2024-01-05T00:00:00Z",
            CyclingMode::Iso8601,
            Some(&start),
            Some(&end),
        )
        .unwrap();
        assert!(seq.on_sequence(&start));
        assert!(seq.on_sequence(&end));
        assert!(!seq.on_sequence(&iso("2024-01-06T00:00:00Z")));
    }

    #[test]
    fn integer_sequence_steps_by_period() {
        let seq = Sequence::parse("1/P2", CyclingMode::Integer, None, None).unwrap();
        let p1 = CyclePoint::parse("1", CyclingMode::Integer).unwrap();
        let p3 = CyclePoint::parse("3", CyclingMode::Integer).unwrap();
        assert!(seq.on_sequence(&p3));
        assert_eq!(seq.next(&p1), Some(p3));
    }
}

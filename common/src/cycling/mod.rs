//! Cycle-point algebra: points, intervals and recurrence sequences for both
//! the date-time and integer cycling modes a workflow can declare.
//!
//! A single workflow runs in exactly one mode, fixed by its scheduling
//! config at load time; the [`CyclePoint`] / [`Interval`] enums exist so the
//! rest of the engine (task pool, graph, prerequisites) can stay generic
//! over which mode is in effect rather than branching on it everywhere.

mod integer;
mod interval;
mod iso8601;
mod sequence;

pub use integer::IntPoint;
pub use interval::{Interval, IsoDuration};
pub use iso8601::IsoPoint;
pub use sequence::Sequence;

use crate::error::CycleTimeError;
use std::cmp::Ordering;
use std::fmt;

/// The cycling mode a workflow is configured for, fixed for its whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CyclingMode {
    Iso8601,
    Integer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CyclePoint {
    Iso(IsoPoint),
    Int(IntPoint),
}

impl CyclePoint {
    pub fn parse(s: &str, mode: CyclingMode) -> Result<Self, CycleTimeError> {
        match mode {
            CyclingMode::Iso8601 => IsoPoint::parse(s).map(CyclePoint::Iso),
            CyclingMode::Integer => IntPoint::parse(s).map(CyclePoint::Int),
        }
    }

    pub fn dump(&self) -> String {
        match self {
            CyclePoint::Iso(p) => p.dump(),
            CyclePoint::Int(p) => p.dump(),
        }
    }

    pub fn mode(&self) -> CyclingMode {
        match self {
            CyclePoint::Iso(_) => CyclingMode::Iso8601,
            CyclePoint::Int(_) => CyclingMode::Integer,
        }
    }

    /// Add an interval, returning `Err` if the point and interval belong to
    /// different cycling modes (a configuration/programming error, since a
    /// workflow never mixes the two).
    pub fn add(&self, interval: &Interval) -> Result<CyclePoint, CycleTimeError> {
        match (self, interval) {
            (CyclePoint::Iso(p), Interval::Iso(d)) => Ok(CyclePoint::Iso(p.add(d))),
            (CyclePoint::Int(p), Interval::Int(step)) => Ok(CyclePoint::Int(p.add(*step))),
            _ => Err(CycleTimeError::WrongMode {
                point: self.dump(),
                mode: interval.dump(),
            }),
        }
    }

    pub fn sub(&self, other: &CyclePoint) -> Option<Interval> {
        match (self, other) {
            (CyclePoint::Iso(a), CyclePoint::Iso(b)) => Some(Interval::Iso(a.sub_point(b))),
            (CyclePoint::Int(a), CyclePoint::Int(b)) => Some(Interval::Int(a.sub_point(b))),
            _ => None,
        }
    }
}

impl fmt::Display for CyclePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.dump())
    }
}

impl PartialOrd for CyclePoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (CyclePoint::Iso(a), CyclePoint::Iso(b)) => a.partial_cmp(b),
            (CyclePoint::Int(a), CyclePoint::Int(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

impl Ord for CyclePoint {
    fn cmp(&self, other: &Self) -> Ordering {
        self.partial_cmp(other)
            .expect("cannot compare cycle points from different cycling modes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_sub_round_trips_for_iso() {
        let p = CyclePoint::parse("2024-01-01T00:00:00Z", CyclingMode::Iso8601).unwrap();
        let i = Interval::parse_iso("P1D").unwrap();
        let next = p.add(&i).unwrap();
        assert_eq!(next.sub(&p), Some(Interval::Iso(IsoDuration {
            days: 1,
            ..Default::default()
        })));
    }

    #[test]
    fn mismatched_mode_add_is_an_error() {
        let p = CyclePoint::parse("1", CyclingMode::Integer).unwrap();
        let i = Interval::parse_iso("P1D").unwrap();
        assert!(p.add(&i).is_err());
    }
}

//! Integer cycle points, for workflows that cycle on a plain counter rather
//! than calendar time (`cyclepoint-format = integer` in the SPEC_FULL
//! scheduling config).

use crate::error::CycleTimeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IntPoint(pub i64);

impl IntPoint {
    pub fn parse(s: &str) -> Result<Self, CycleTimeError> {
        s.trim()
            .parse::<i64>()
            .map(IntPoint)
            .map_err(|_| CycleTimeError::Unparsable(s.to_string()))
    }

    pub fn dump(&self) -> String {
        self.0.to_string()
    }

    pub fn add(&self, step: i64) -> IntPoint {
        IntPoint(self.0 + step)
    }

    pub fn sub_point(&self, other: &IntPoint) -> i64 {
        self.0 - other.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_dumps() {
        let p = IntPoint::parse(" 7 ").unwrap();
        assert_eq!(p.dump(), "7");
    }

    #[test]
    fn rejects_non_numeric() {
        assert!(IntPoint::parse("abc").is_err());
    }

    #[test]
    fn step_moves_by_delta() {
        let p = IntPoint::parse("5").unwrap();
        assert_eq!(p.add(3), IntPoint(8));
        assert_eq!(p.add(-3), IntPoint(2));
    }
}

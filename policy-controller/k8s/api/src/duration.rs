//! Durations as written in Gateway API resources, e.g. `1h30m` or `250ms`.
//!
//! A duration is a sequence of up to four `<integer><unit>` components where
//! the unit is one of `h`, `m`, `s` or `ms`. `0s` is valid; negative and
//! fractional values are not.

use std::time::Duration;

const MAX_COMPONENTS: usize = 4;

#[derive(Debug, thiserror::Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum ParseError {
    #[error("duration is empty")]
    Empty,

    #[error("missing a unit after {0:?}: expected one of 'h', 'm', 's' or 'ms'")]
    NoUnit(String),

    #[error("invalid unit {0:?}: expected one of 'h', 'm', 's' or 'ms'")]
    InvalidUnit(String),

    #[error("expected a number before {0:?}")]
    NoValue(String),

    #[error("invalid number: {0}")]
    NotANumber(#[from] std::num::ParseIntError),

    #[error("duration has more than {MAX_COMPONENTS} components")]
    TooManyComponents,

    #[error("duration overflows")]
    Overflow,
}

pub fn parse(s: &str) -> Result<Duration, ParseError> {
    if s.is_empty() {
        return Err(ParseError::Empty);
    }

    let mut rest = s;
    let mut total = Duration::ZERO;
    let mut components = 0;
    while !rest.is_empty() {
        components += 1;
        if components > MAX_COMPONENTS {
            return Err(ParseError::TooManyComponents);
        }

        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        let (value, tail) = rest.split_at(digits);
        if value.is_empty() {
            return Err(ParseError::NoValue(tail.to_string()));
        }
        let value = value.parse::<u64>()?;

        let unit_len = tail.find(|c: char| c.is_ascii_digit()).unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);
        let component = match unit {
            "h" => value.checked_mul(60 * 60).map(Duration::from_secs),
            "m" => value.checked_mul(60).map(Duration::from_secs),
            "s" => Some(Duration::from_secs(value)),
            "ms" => Some(Duration::from_millis(value)),
            "" => return Err(ParseError::NoUnit(rest.to_string())),
            unit => return Err(ParseError::InvalidUnit(unit.to_string())),
        };
        total = component
            .and_then(|c| total.checked_add(c))
            .ok_or(ParseError::Overflow)?;
        rest = tail;
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("0s", Duration::ZERO)]
    #[case("250ms", Duration::from_millis(250))]
    #[case("10s", Duration::from_secs(10))]
    #[case("1h30m", Duration::from_secs(90 * 60))]
    #[case("1h2m3s4ms", Duration::from_millis(3_723_004))]
    fn parses(#[case] input: &str, #[case] expected: Duration) {
        assert_eq!(parse(input), Ok(expected));
    }

    #[rstest]
    #[case("", ParseError::Empty)]
    #[case("10", ParseError::NoUnit("10".to_string()))]
    #[case("5d", ParseError::InvalidUnit("d".to_string()))]
    #[case("1.5s", ParseError::InvalidUnit(".".to_string()))]
    #[case("-1s", ParseError::NoValue("-1s".to_string()))]
    #[case("1h1m1s1ms1h", ParseError::TooManyComponents)]
    fn rejects(#[case] input: &str, #[case] expected: ParseError) {
        assert_eq!(parse(input), Err(expected));
    }
}

//! Integer wire encoding of datetimes.
//!
//! A datetime is carried on the wire as a count of fixed-resolution ticks
//! since the configured epoch. Encoding quantizes (floor or ceiling);
//! decoding is exact.

use crate::config::Settings;
use chrono::{DateTime, Duration, Utc};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Rounding {
    Floor,
    Ceiling,
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum TimeError {
    #[error("datetimes must be no earlier than {0}")]
    BeforeEpoch(DateTime<Utc>),
}

pub fn min_datetime() -> DateTime<Utc> {
    Settings::global().min_datetime
}

pub fn time_resolution() -> Duration {
    Settings::global().time_resolution()
}

pub fn encode_datetime(val: DateTime<Utc>, rounding: Rounding) -> Result<u32, TimeError> {
    let min = min_datetime();
    if val < min {
        return Err(TimeError::BeforeEpoch(min));
    }
    let resolution_ms = time_resolution().num_milliseconds();
    let delta = val - min;
    let ticks = delta.num_milliseconds() / resolution_ms;
    let ticks = match rounding {
        Rounding::Floor => ticks,
        Rounding::Ceiling if delta == Duration::milliseconds(ticks * resolution_ms) => ticks,
        Rounding::Ceiling => ticks + 1,
    };
    Ok(ticks as u32)
}

pub fn decode_datetime(val: u32) -> DateTime<Utc> {
    min_datetime() + Duration::milliseconds(val as i64 * time_resolution().num_milliseconds())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fraction_of_tick(num: i64, den: i64) -> Duration {
        Duration::milliseconds(time_resolution().num_milliseconds() * num / den)
    }

    #[test]
    fn encode_at_epoch_is_zero_for_both_roundings() {
        let min = min_datetime();
        assert_eq!(encode_datetime(min, Rounding::Floor).unwrap(), 0);
        assert_eq!(encode_datetime(min, Rounding::Ceiling).unwrap(), 0);
    }

    #[test]
    fn encode_quantizes_off_boundary_datetimes() {
        let min = min_datetime();

        let near_one = min + fraction_of_tick(9, 10);
        assert_eq!(encode_datetime(near_one, Rounding::Floor).unwrap(), 0);
        assert_eq!(encode_datetime(near_one, Rounding::Ceiling).unwrap(), 1);

        let exactly_one = min + fraction_of_tick(1, 1);
        assert_eq!(encode_datetime(exactly_one, Rounding::Floor).unwrap(), 1);
        assert_eq!(encode_datetime(exactly_one, Rounding::Ceiling).unwrap(), 1);

        let past_one = min + fraction_of_tick(11, 10);
        assert_eq!(encode_datetime(past_one, Rounding::Floor).unwrap(), 1);
        assert_eq!(encode_datetime(past_one, Rounding::Ceiling).unwrap(), 2);
    }

    #[test]
    fn encode_rejects_datetimes_before_epoch() {
        let too_early = min_datetime() - Duration::seconds(1);
        assert_eq!(
            encode_datetime(too_early, Rounding::Floor),
            Err(TimeError::BeforeEpoch(min_datetime()))
        );
    }

    #[test]
    fn decode_is_exact() {
        for ticks in [0u32, 1, 17, 1_000_000] {
            let decoded = decode_datetime(ticks);
            assert_eq!(encode_datetime(decoded, Rounding::Floor).unwrap(), ticks);
            assert_eq!(encode_datetime(decoded, Rounding::Ceiling).unwrap(), ticks);
        }
    }
}

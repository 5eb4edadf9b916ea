//! Dual 32-bit timestamp
//!
//! Conversion between `f64` seconds and a `(u32 sec, u32 nsec)` pair,
//! following the ROS `fromSec` convention.

use std::fmt::Display;

use thiserror::Error;

pub const NSEC_PER_SEC: u32 = 1_000_000_000;
const SEC_PER_NSEC: f64 = 1e-9;
const NSEC_PER_SEC_F64: f64 = 1e9;

#[derive(Debug, Error, PartialEq)]
pub enum TimestampError {
    #[error("time {0} is out of dual 32-bit range")]
    OutOfRange(f64),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimestampPair {
    pub sec: u32,
    /// always < [NSEC_PER_SEC]
    pub nsec: u32,
}

impl TimestampPair {
    pub fn to_seconds(&self) -> f64 {
        to_seconds(self)
    }
}

impl TryFrom<f64> for TimestampPair {
    type Error = TimestampError;

    fn try_from(seconds: f64) -> Result<Self, Self::Error> {
        to_pair(seconds)
    }
}

impl Display for TimestampPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:09}", self.sec, self.nsec)
    }
}

#[inline]
pub fn to_seconds(pair: &TimestampPair) -> f64 {
    pair.sec as f64 + pair.nsec as f64 * SEC_PER_NSEC
}

pub fn to_pair(seconds: f64) -> Result<TimestampPair, TimestampError> {
    if !seconds.is_finite() {
        return Err(TimestampError::OutOfRange(seconds));
    }
    let floored = seconds.floor();
    let sec64 = floored as i64;
    if sec64 < 0 || sec64 > u32::MAX as i64 {
        return Err(TimestampError::OutOfRange(seconds));
    }
    let mut sec = sec64 as u32;
    let mut nsec = ((seconds - floored) * NSEC_PER_SEC_F64).round() as u32;
    // rounding can land exactly on the next second
    if nsec >= NSEC_PER_SEC {
        sec = sec
            .checked_add(1)
            .ok_or(TimestampError::OutOfRange(seconds))?;
        nsec -= NSEC_PER_SEC;
    }
    Ok(TimestampPair { sec, nsec })
}

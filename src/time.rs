//! Event time for the probe controller.
//!
//! The controller never reads a clock. Every event carries a [`Timestamp`]
//! supplied by the caller, and all scheduling is relative arithmetic on those
//! values. `Timestamp` and [`TimeDelta`] extend `std::time` with points in the
//! distant past/future so that "never probed" and "probing disabled" fall out
//! of ordinary comparisons instead of sentinel flags.

use std::cmp::Ordering;
use std::ops::{Add, Sub};
use std::time as std_time;

/// A point in event time.
///
/// Wrapper for [`std::time::Instant`] that provides additional time points in
/// the past or future.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timestamp {
    /// A time in the past that already happened.
    DistantPast,

    /// An exact instant.
    Exact(std_time::Instant),

    /// A time in the future that will never happen.
    DistantFuture,
}

/// A signed time interval between two [`Timestamp`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeDelta {
    /// Delta to some event in the distant past.
    MinusInf,

    /// An exact negative duration.
    Negative(std_time::Duration),

    /// An exact positive duration.
    Positive(std_time::Duration),

    /// Delta to some event in the distant future.
    PlusInf,
}

impl Timestamp {
    /// The current instant, as a starting point for event time.
    pub fn now() -> Self {
        Self::Exact(std_time::Instant::now())
    }

    pub const fn is_finite(&self) -> bool {
        matches!(self, Self::Exact(_))
    }
}

impl TimeDelta {
    pub const ZERO: Self = Self::Positive(std_time::Duration::ZERO);

    /// Creates a [`TimeDelta`] from milliseconds.
    pub const fn from_millis(millis: u64) -> Self {
        Self::Positive(std_time::Duration::from_millis(millis))
    }

    /// Creates a [`TimeDelta`] from seconds.
    pub const fn from_secs(secs: u64) -> Self {
        Self::Positive(std_time::Duration::from_secs(secs))
    }

    pub const fn is_finite(&self) -> bool {
        matches!(self, Self::Negative(_) | Self::Positive(_))
    }

    /// The interval as an unsigned duration, when positive and finite.
    pub fn as_std(&self) -> Option<std_time::Duration> {
        match self {
            Self::Positive(d) => Some(*d),
            _ => None,
        }
    }
}

impl Add<TimeDelta> for Timestamp {
    type Output = Self;

    fn add(self, rhs: TimeDelta) -> Self::Output {
        match (self, rhs) {
            (Self::DistantFuture, _) | (_, TimeDelta::PlusInf) => Self::DistantFuture,
            (Self::DistantPast, _) | (_, TimeDelta::MinusInf) => Self::DistantPast,
            (Self::Exact(i), TimeDelta::Negative(d)) => Self::Exact(i - d),
            (Self::Exact(i), TimeDelta::Positive(d)) => Self::Exact(i + d),
        }
    }
}

impl Sub<Self> for Timestamp {
    type Output = TimeDelta;

    fn sub(self, rhs: Self) -> Self::Output {
        match (self, rhs) {
            (Self::DistantFuture, _) | (_, Self::DistantPast) => TimeDelta::PlusInf,
            (Self::DistantPast, _) | (_, Self::DistantFuture) => TimeDelta::MinusInf,
            (Self::Exact(this), Self::Exact(that)) => match this.cmp(&that) {
                Ordering::Less => TimeDelta::Negative(that - this),
                Ordering::Equal => TimeDelta::ZERO,
                Ordering::Greater => TimeDelta::Positive(this - that),
            },
        }
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(Self::cmp(self, other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::DistantPast, Self::DistantPast) => Ordering::Equal,
            (Self::DistantPast, _) => Ordering::Less,
            (_, Self::DistantPast) => Ordering::Greater,
            (Self::DistantFuture, Self::DistantFuture) => Ordering::Equal,
            (Self::DistantFuture, _) => Ordering::Greater,
            (_, Self::DistantFuture) => Ordering::Less,
            (Self::Exact(v1), Self::Exact(v2)) => v1.cmp(v2),
        }
    }
}

impl Add<Self> for TimeDelta {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        match (self, rhs) {
            (Self::PlusInf, _) | (_, Self::PlusInf) => Self::PlusInf,
            (Self::MinusInf, _) | (_, Self::MinusInf) => Self::MinusInf,
            (Self::Negative(this), Self::Negative(that)) => Self::Negative(this + that),
            (Self::Positive(this), Self::Positive(that)) => Self::Positive(this + that),
            (Self::Positive(this), Self::Negative(that)) => match this.cmp(&that) {
                Ordering::Less => Self::Negative(that - this),
                Ordering::Equal => Self::ZERO,
                Ordering::Greater => Self::Positive(this - that),
            },
            (Self::Negative(this), Self::Positive(that)) => match this.cmp(&that) {
                Ordering::Less => Self::Positive(that - this),
                Ordering::Equal => Self::ZERO,
                Ordering::Greater => Self::Negative(this - that),
            },
        }
    }
}

impl PartialOrd for TimeDelta {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(Self::cmp(self, other))
    }
}

impl Ord for TimeDelta {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::MinusInf, Self::MinusInf) => Ordering::Equal,
            (Self::MinusInf, _) => Ordering::Less,
            (_, Self::MinusInf) => Ordering::Greater,
            (Self::PlusInf, Self::PlusInf) => Ordering::Equal,
            (Self::PlusInf, _) => Ordering::Greater,
            (_, Self::PlusInf) => Ordering::Less,
            (Self::Negative(_), Self::Positive(_)) => Ordering::Less,
            (Self::Positive(_), Self::Negative(_)) => Ordering::Greater,
            (Self::Positive(this), Self::Positive(that)) => this.cmp(that),
            (Self::Negative(this), Self::Negative(that)) => that.cmp(this),
        }
    }
}

impl Default for TimeDelta {
    fn default() -> Self {
        TimeDelta::ZERO
    }
}

impl From<std_time::Duration> for TimeDelta {
    fn from(value: std_time::Duration) -> Self {
        Self::Positive(value)
    }
}

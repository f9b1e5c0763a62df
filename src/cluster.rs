//! Probe cluster descriptors handed to the pacer.
//!
//! A probe cluster is a short burst of packets sent at a target bitrate so
//! the bandwidth estimator can observe whether capacity exists above the
//! current estimate. The controller only produces the plan; sending and
//! measuring belong to the pacer and the estimator.

use std::fmt;

use crate::rate::Bitrate;
use crate::time::{TimeDelta, Timestamp};

/// Identifies a probe cluster across the send side.
///
/// Ids are handed out strictly increasing, starting at 1, and are never
/// reused — not even across a controller reset — so that late feedback for an
/// old cluster can't be attributed to a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProbeClusterId(u64);

impl ProbeClusterId {
    pub(crate) const FIRST: Self = Self(1);

    /// Returns the current id and advances to the next.
    pub(crate) fn inc(&mut self) -> Self {
        let id = *self;
        self.0 += 1;
        id
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for ProbeClusterId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for ProbeClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Configuration for a probe cluster (the plan).
///
/// This is the immutable blueprint for one bandwidth probe: what bitrate to
/// test, for at least how long, and with what minimum packet count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeClusterConfig {
    /// When the cluster was created.
    at_time: Timestamp,

    /// Target bitrate to probe at.
    target_rate: Bitrate,

    /// How long to sustain the target bitrate.
    target_duration: TimeDelta,

    /// Minimum number of packets to send. Ensures statistical validity even
    /// for short bursts.
    target_probe_count: usize,

    /// Unique identifier for this probe cluster.
    id: ProbeClusterId,
}

impl ProbeClusterConfig {
    /// Create a new probe cluster configuration with standard defaults:
    /// 15ms duration and 5 minimum packets.
    pub(crate) fn new(id: ProbeClusterId, at_time: Timestamp, target_rate: Bitrate) -> Self {
        Self {
            at_time,
            target_rate,
            target_duration: TimeDelta::from_millis(15),
            target_probe_count: 5,
            id,
        }
    }

    /// Set a custom target duration for this probe.
    pub(crate) fn with_duration(mut self, duration: TimeDelta) -> Self {
        self.target_duration = duration;
        self
    }

    /// Set a custom minimum packet count for this probe.
    pub(crate) fn with_probe_count(mut self, target_probe_count: usize) -> Self {
        self.target_probe_count = target_probe_count;
        self
    }

    /// When the cluster was created.
    pub fn at_time(&self) -> Timestamp {
        self.at_time
    }

    /// The target bitrate.
    pub fn target_rate(&self) -> Bitrate {
        self.target_rate
    }

    /// The minimum time the pacer should sustain the target rate.
    pub fn target_duration(&self) -> TimeDelta {
        self.target_duration
    }

    /// The minimum packet count required for a valid probe.
    pub fn target_probe_count(&self) -> usize {
        self.target_probe_count
    }

    /// The probe cluster id.
    pub fn id(&self) -> ProbeClusterId {
        self.id
    }
}

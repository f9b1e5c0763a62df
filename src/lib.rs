//! Bandwidth probe controller for send-side congestion control.
//!
//! A probe is a short burst of padding or media packets sent at a target
//! bitrate so the sender's bandwidth estimator can detect capacity it would
//! not discover from ambient traffic alone. This crate implements the policy
//! side of probing as found in WebRTC's GoogCC: a timestamp-driven state
//! machine that decides *when* to probe and *how large*, while the pacer
//! (sending), the estimator (measuring) and the event log (recording) remain
//! external collaborators.
//!
//! The probing regimes:
//!
//! - Initial exponential ramp-up when a session starts (one or two probes at
//!   multiples of the start bitrate, then follow-ups chained off each
//!   confirming estimate).
//! - Periodic probing while the application is in ALR (application limited
//!   region) and has headroom to grow into.
//! - Network-state-estimate driven probing, periodic or triggered by sharp
//!   capacity changes.
//! - Probing on raised max bitrate or raised stream allocation.
//! - Rapid recovery probing after a large estimate drop.
//!
//! The controller owns no I/O and reads no clock; every event carries its
//! own timestamp and returns the clusters to emit:
//!
//! ```
//! use probe_control::{Bitrate, NetworkAvailability, ProbeController};
//! use probe_control::{ProbeControllerConfig, Timestamp};
//!
//! let mut controller = ProbeController::new(ProbeControllerConfig::default());
//! let now = Timestamp::now();
//!
//! controller.on_network_availability(NetworkAvailability {
//!     at_time: now,
//!     network_available: true,
//! });
//!
//! let probes = controller
//!     .set_bitrates(
//!         Bitrate::kbps(50),
//!         Bitrate::kbps(300),
//!         Bitrate::mbps(5),
//!         now,
//!     )
//!     .unwrap();
//!
//! // Hand the clusters to the pacer.
//! assert_eq!(probes.len(), 2);
//! assert_eq!(probes[0].target_rate(), Bitrate::kbps(900));
//! ```

#[macro_use]
extern crate tracing;

use thiserror::Error;

mod cluster;
mod config;
mod control;
mod events;
mod rate;
mod time;

pub use cluster::{ProbeClusterConfig, ProbeClusterId};
pub use config::ProbeControllerConfig;
pub use control::{NetworkAvailability, NetworkStateEstimate, ProbeController};
pub use events::ProbeLog;
pub use rate::Bitrate;
pub use time::{TimeDelta, Timestamp};

/// Errors surfaced by the probe controller's event methods.
///
/// All errors are non-fatal: the offending event is ignored and the
/// controller's state is unchanged.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Bitrate constraints out of order, or a supplied rate is negative.
    #[error("invalid bitrate range: {0}")]
    InvalidRange(String),
}

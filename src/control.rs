//! Probing controller - decides when and how to probe network capacity.
//!
//! The controller is a timestamp-driven state machine for discovering
//! available bandwidth through intentional bursts of packets at rates higher
//! than the current estimate. It consumes rate signals (configured bitrates,
//! estimator output, network-state estimates, ALR intervals) and emits
//! [`ProbeClusterConfig`] values for the pacer to execute.

use crate::cluster::{ProbeClusterConfig, ProbeClusterId};
use crate::config::ProbeControllerConfig;
use crate::events::ProbeLog;
use crate::rate::Bitrate;
use crate::time::{TimeDelta, Timestamp};
use crate::ProbeError;

/// Network reachability signal from the transport.
#[derive(Debug, Clone, Copy)]
pub struct NetworkAvailability {
    pub at_time: Timestamp,
    pub network_available: bool,
}

/// Externally supplied path capacity prediction.
#[derive(Debug, Clone, Copy)]
pub struct NetworkStateEstimate {
    /// Upper bound on the currently estimated link capacity.
    pub link_capacity_upper: Bitrate,
}

#[derive(Debug, Clone, Copy)]
enum State {
    /// No probing has been triggered yet.
    Init,
    /// Probes are in flight and the next estimate decides whether to
    /// continue the chain.
    WaitingForProbingResult {
        since: Timestamp,
        /// Estimate required to trigger a follow-up exponential probe.
        min_bitrate_to_probe_further: Bitrate,
    },
    /// Probing is complete.
    ProbingComplete,
}

/// Controls initiation of probing to estimate channel capacity.
///
/// Emits initial exponential probes when a session starts, follow-up probes
/// while estimates keep confirming capacity, and periodic probes during ALR
/// or when a network-state estimate suggests the path changed. There is also
/// support for probing when the max bitrate or the allocated bitrate is
/// adjusted by the application, and for rapid recovery after a large drop.
///
/// All methods take the event time from the caller; the controller never
/// reads a clock. Event times must be non-decreasing across calls.
pub struct ProbeController {
    config: ProbeControllerConfig,
    log: Option<Box<dyn ProbeLog>>,

    state: State,
    network_available: bool,
    bwe_limited_due_to_packet_loss: bool,
    time_last_probing_initiated: Timestamp,
    estimated_bitrate: Bitrate,
    send_probe_on_next_process_interval: bool,
    network_estimate: Option<NetworkStateEstimate>,
    start_bitrate: Bitrate,
    max_bitrate: Bitrate,
    max_total_allocated_bitrate: Bitrate,
    alr_start_time: Option<Timestamp>,
    alr_end_time: Option<Timestamp>,
    enable_periodic_alr_probing: bool,
    time_of_last_large_drop: Timestamp,
    bitrate_before_last_large_drop: Bitrate,
    last_bwe_drop_probing_time: Timestamp,
    in_rapid_recovery_experiment: bool,

    next_cluster_id: ProbeClusterId,
    last_event_time: Timestamp,
}

impl ProbeController {
    /// How long to stay in the waiting state when no estimate arrives for a
    /// probe that was sent.
    const PROBE_CLUSTER_TIMEOUT: TimeDelta = TimeDelta::from_secs(5);

    /// An estimate below this factor of its previous value counts as a large
    /// drop worth rapid recovery.
    const BITRATE_DROP_THRESHOLD: f64 = 0.5;

    /// Debounce between recorded large drops.
    const MIN_TIME_BETWEEN_LARGE_DROPS: TimeDelta = TimeDelta::from_secs(1);

    /// Fraction of the pre-drop bitrate that recovery probes aim for.
    const PROBE_FRACTION_AFTER_DROP: f64 = 0.85;

    pub fn new(config: ProbeControllerConfig) -> Self {
        let config = config.sanitized();
        let in_rapid_recovery_experiment = config.rapid_recovery_experiment;

        Self {
            config,
            log: None,
            state: State::Init,
            network_available: false,
            bwe_limited_due_to_packet_loss: false,
            time_last_probing_initiated: Timestamp::DistantPast,
            estimated_bitrate: Bitrate::ZERO,
            send_probe_on_next_process_interval: false,
            network_estimate: None,
            start_bitrate: Bitrate::ZERO,
            max_bitrate: Bitrate::INFINITY,
            max_total_allocated_bitrate: Bitrate::ZERO,
            alr_start_time: None,
            alr_end_time: None,
            enable_periodic_alr_probing: false,
            time_of_last_large_drop: Timestamp::DistantPast,
            bitrate_before_last_large_drop: Bitrate::ZERO,
            last_bwe_drop_probing_time: Timestamp::DistantPast,
            in_rapid_recovery_experiment,
            next_cluster_id: ProbeClusterId::FIRST,
            last_event_time: Timestamp::DistantPast,
        }
    }

    /// Attach a sink that receives a record for every emitted cluster.
    pub fn with_log(mut self, log: Box<dyn ProbeLog>) -> Self {
        self.log = Some(log);
        self
    }

    /// Update the configured min/start/max bitrates.
    ///
    /// Starts initial exponential probing when this is the event that
    /// completes the startup conditions, and may emit a single probe when the
    /// max is raised above an estimate that has already converged.
    pub fn set_bitrates(
        &mut self,
        min_bitrate: Bitrate,
        start_bitrate: Bitrate,
        max_bitrate: Bitrate,
        at_time: Timestamp,
    ) -> Result<Vec<ProbeClusterConfig>, ProbeError> {
        let at_time = self.checked_time(at_time);

        if min_bitrate < Bitrate::ZERO || min_bitrate > start_bitrate || start_bitrate > max_bitrate
        {
            return Err(ProbeError::InvalidRange(format!(
                "bitrates must be ordered: min {} <= start {} <= max {}",
                min_bitrate, start_bitrate, max_bitrate
            )));
        }

        self.start_bitrate = start_bitrate;

        let old_max_bitrate = self.max_bitrate;
        self.max_bitrate = max_bitrate;

        match self.state {
            State::Init => {
                if self.network_available && !self.start_bitrate.is_zero() {
                    return Ok(self.initiate_exponential_probing(at_time));
                }
            }
            State::WaitingForProbingResult { .. } => (),
            State::ProbingComplete => {
                // If the max bitrate was raised and the estimate hasn't
                // reached it, probe towards the new headroom.
                if !self.estimated_bitrate.is_zero()
                    && old_max_bitrate < max_bitrate
                    && self.estimated_bitrate < max_bitrate
                {
                    let rate = (self.estimated_bitrate
                        * self.config.further_exponential_probe_scale)
                        .min(max_bitrate);
                    return Ok(self.initiate_probing(at_time, &[rate], false));
                }
            }
        }

        Ok(vec![])
    }

    /// The total bitrate, as opposed to the max bitrate, is the sum of the
    /// configured bitrates for all active streams.
    pub fn on_max_total_allocated_bitrate(
        &mut self,
        max_total_allocated_bitrate: Bitrate,
        at_time: Timestamp,
    ) -> Result<Vec<ProbeClusterConfig>, ProbeError> {
        let at_time = self.checked_time(at_time);

        if max_total_allocated_bitrate < Bitrate::ZERO {
            return Err(ProbeError::InvalidRange(format!(
                "negative allocated bitrate: {}",
                max_total_allocated_bitrate
            )));
        }

        let increased = max_total_allocated_bitrate > self.max_total_allocated_bitrate;

        let mut probes = vec![];

        if increased
            && matches!(self.state, State::ProbingComplete)
            && self.estimated_bitrate < self.max_bitrate
        {
            if let Some(first_scale) = self.config.first_allocation_probe_scale {
                let cap = self.config.allocation_probe_max;

                let first = (max_total_allocated_bitrate * first_scale).min(cap);
                let mut rates = vec![first];

                if let Some(second_scale) = self.config.second_allocation_probe_scale {
                    let second = (max_total_allocated_bitrate * second_scale).min(cap);
                    if second > first {
                        rates.push(second);
                    }
                }

                let probe_further = self.config.allocation_allow_further_probing;
                probes = self.initiate_probing(at_time, &rates, probe_further);
            }
        }

        self.max_total_allocated_bitrate = max_total_allocated_bitrate;

        Ok(probes)
    }

    /// Update network reachability.
    ///
    /// A transition to available while still in the initial state kicks off
    /// initial exponential probing. While unavailable, no event emits probes.
    pub fn on_network_availability(&mut self, msg: NetworkAvailability) -> Vec<ProbeClusterConfig> {
        let at_time = self.checked_time(msg.at_time);

        self.network_available = msg.network_available;

        if self.network_available
            && matches!(self.state, State::Init)
            && !self.start_bitrate.is_zero()
        {
            return self.initiate_exponential_probing(at_time);
        }

        vec![]
    }

    /// Feed back the estimator's latest result.
    ///
    /// While waiting for a probing result, an estimate that confirms the last
    /// probe keeps the exponential chain going; one that falls short ends it.
    /// A large drop is recorded for later recovery probing, and probed at
    /// once when in ALR or when the rapid recovery experiment is on.
    pub fn set_estimated_bitrate(
        &mut self,
        bitrate: Bitrate,
        bwe_limited_due_to_packet_loss: bool,
        at_time: Timestamp,
    ) -> Result<Vec<ProbeClusterConfig>, ProbeError> {
        let at_time = self.checked_time(at_time);

        if bitrate < Bitrate::ZERO {
            return Err(ProbeError::InvalidRange(format!(
                "negative estimated bitrate: {}",
                bitrate
            )));
        }

        self.bwe_limited_due_to_packet_loss = bwe_limited_due_to_packet_loss;

        // Large drops are detected against the previous estimate, debounced
        // so a collapsing estimate doesn't overwrite the pre-drop rate.
        let mut recorded_large_drop = false;
        if !self.estimated_bitrate.is_zero()
            && bitrate < self.estimated_bitrate * Self::BITRATE_DROP_THRESHOLD
            && at_time - self.time_of_last_large_drop > Self::MIN_TIME_BETWEEN_LARGE_DROPS
        {
            debug!(
                "Large drop detected: {} -> {}",
                self.estimated_bitrate, bitrate
            );
            self.time_of_last_large_drop = at_time;
            self.bitrate_before_last_large_drop = self.estimated_bitrate;
            recorded_large_drop = true;
        }

        self.estimated_bitrate = bitrate;

        let mut probes = vec![];

        if let State::WaitingForProbingResult {
            min_bitrate_to_probe_further,
            ..
        } = self.state
        {
            if bitrate >= min_bitrate_to_probe_further {
                // Continue probing as long as probing results indicate the
                // channel has greater capacity.
                let rate = bitrate * self.config.further_exponential_probe_scale;
                probes = self.initiate_probing(at_time, &[rate], true);
            } else {
                self.state = State::ProbingComplete;
            }
        }

        if probes.is_empty()
            && recorded_large_drop
            && (self.in_rapid_recovery_experiment || self.is_in_alr())
        {
            let rate = self.bitrate_before_last_large_drop * Self::PROBE_FRACTION_AFTER_DROP;
            probes = self.initiate_probing(at_time, &[rate], false);
        }

        Ok(probes)
    }

    /// Toggle periodic probing while in the application limited region.
    pub fn enable_periodic_alr_probing(&mut self, enable: bool) {
        self.enable_periodic_alr_probing = enable;
    }

    /// Record when the application limited region started. `None` means the
    /// sender is not application limited.
    pub fn set_alr_start_time(&mut self, alr_start_time: Option<Timestamp>) {
        self.alr_start_time = alr_start_time;
    }

    /// Record when the application limited region ended.
    pub fn set_alr_ended_time(&mut self, alr_end_time: Timestamp) {
        self.alr_end_time = Some(alr_end_time);
    }

    /// Caller-initiated probe after a perceived bandwidth drop.
    ///
    /// Initiates a single probe session (if not already probing) aimed below
    /// the pre-drop bitrate. If the probe fails, the assumption is the drop
    /// was a real one, from a competing flow or a network change.
    pub fn request_probe(&mut self, at_time: Timestamp) -> Vec<ProbeClusterConfig> {
        let at_time = self.checked_time(at_time);

        let alr_ended_recently = !self.is_in_alr()
            && self
                .alr_end_time
                .map(|end| at_time - end < self.config.alr_probing_interval)
                .unwrap_or(false);

        if !(self.is_in_alr() || alr_ended_recently) {
            return vec![];
        }
        if !self.network_available {
            return vec![];
        }
        if !matches!(self.state, State::ProbingComplete) {
            return vec![];
        }
        if self.estimated_bitrate >= self.max_bitrate {
            return vec![];
        }
        if at_time - self.last_bwe_drop_probing_time <= self.config.alr_probing_interval {
            return vec![];
        }

        let rate = (self.estimated_bitrate * Self::PROBE_FRACTION_AFTER_DROP)
            .min(self.bitrate_before_last_large_drop * Self::PROBE_FRACTION_AFTER_DROP);

        let probes = self.initiate_probing(at_time, &[rate], false);
        if !probes.is_empty() {
            debug!("Detected big bandwidth drop, start probing");
            self.last_bwe_drop_probing_time = at_time;
        }
        probes
    }

    /// Set a new maximum probing bitrate, without generating a new probe
    /// cluster.
    pub fn set_max_bitrate(&mut self, max_bitrate: Bitrate) -> Result<(), ProbeError> {
        if max_bitrate < Bitrate::ZERO {
            return Err(ProbeError::InvalidRange(format!(
                "negative max bitrate: {}",
                max_bitrate
            )));
        }
        self.max_bitrate = max_bitrate;
        Ok(())
    }

    /// Update the network-state estimate.
    ///
    /// A sharp capacity change relative to the previous estimate arms a probe
    /// for the next [`process`][Self::process] tick.
    pub fn set_network_state_estimate(&mut self, estimate: NetworkStateEstimate) {
        if let Some(prev) = self.network_estimate {
            let prev_capacity = prev.link_capacity_upper;
            let new_capacity = estimate.link_capacity_upper;

            if !prev_capacity.is_zero() && prev_capacity.is_finite() && new_capacity.is_finite() {
                let ratio = new_capacity.as_f64() / prev_capacity.as_f64();

                let fast_rampup = self.config.network_state_estimate_fast_rampup_rate;
                let drop_down = self.config.network_state_estimate_drop_down_rate;

                if (fast_rampup > 0.0 && ratio >= fast_rampup)
                    || (drop_down > 0.0 && ratio <= drop_down)
                {
                    debug!(
                        "Link capacity changed {} -> {}, probing on next process",
                        prev_capacity, new_capacity
                    );
                    self.send_probe_on_next_process_interval = true;
                }
            }
        }

        self.network_estimate = Some(estimate);
    }

    /// Return the controller to a state equivalent to just-created, except
    /// for the periodic ALR probing flag, the configuration and the cluster
    /// id counter.
    pub fn reset(&mut self, at_time: Timestamp) {
        let at_time = self.checked_time(at_time);

        self.state = State::Init;
        self.network_available = false;
        self.bwe_limited_due_to_packet_loss = false;
        self.time_last_probing_initiated = Timestamp::DistantPast;
        self.estimated_bitrate = Bitrate::ZERO;
        self.send_probe_on_next_process_interval = false;
        self.network_estimate = None;
        self.start_bitrate = Bitrate::ZERO;
        self.max_bitrate = Bitrate::INFINITY;
        self.max_total_allocated_bitrate = Bitrate::ZERO;
        self.alr_start_time = None;
        self.alr_end_time = None;
        self.time_of_last_large_drop = Timestamp::DistantPast;
        self.bitrate_before_last_large_drop = Bitrate::ZERO;
        self.last_bwe_drop_probing_time = Timestamp::DistantPast;
        self.last_event_time = at_time;
    }

    /// Periodic tick. The caller schedules this at its own cadence,
    /// typically around once per second.
    pub fn process(&mut self, at_time: Timestamp) -> Vec<ProbeClusterConfig> {
        let at_time = self.checked_time(at_time);

        if let State::WaitingForProbingResult { since, .. } = self.state {
            if at_time - since > Self::PROBE_CLUSTER_TIMEOUT {
                debug!("Timed out waiting for probing result");
                self.state = State::ProbingComplete;
            }
        }

        if self.estimated_bitrate.is_zero() || !matches!(self.state, State::ProbingComplete) {
            return vec![];
        }

        if self.send_probe_on_next_process_interval {
            self.send_probe_on_next_process_interval = false;
            return self.initiate_network_state_probe(at_time);
        }

        if self.time_for_alr_probe(at_time) {
            let rate = self.estimated_bitrate * self.config.alr_probe_scale;
            return self.initiate_probing(at_time, &[rate], true);
        }

        if self.time_for_network_state_probe(at_time) {
            return self.initiate_network_state_probe(at_time);
        }

        vec![]
    }

    fn is_in_alr(&self) -> bool {
        match (self.alr_start_time, self.alr_end_time) {
            (Some(start), Some(end)) => end < start,
            (Some(_), None) => true,
            _ => false,
        }
    }

    fn time_for_alr_probe(&self, at_time: Timestamp) -> bool {
        self.enable_periodic_alr_probing
            && self.is_in_alr()
            && !self.estimated_bitrate.is_zero()
            && self.estimated_bitrate < self.max_bitrate
            && at_time - self.time_last_probing_initiated >= self.config.alr_probing_interval
    }

    fn time_for_network_state_probe(&self, at_time: Timestamp) -> bool {
        self.network_estimate.is_some()
            && self.config.network_state_estimate_probing_interval.is_finite()
            && at_time - self.time_last_probing_initiated
                >= self.config.network_state_estimate_probing_interval
    }

    fn initiate_network_state_probe(&mut self, at_time: Timestamp) -> Vec<ProbeClusterConfig> {
        let Some(estimate) = self.network_estimate else {
            return vec![];
        };

        let rate = self.estimated_bitrate.min(estimate.link_capacity_upper)
            * self.config.network_state_probe_scale;

        self.initiate_probing(at_time, &[rate], false)
    }

    fn initiate_exponential_probing(&mut self, at_time: Timestamp) -> Vec<ProbeClusterConfig> {
        debug_assert!(self.network_available);
        debug_assert!(matches!(self.state, State::Init));
        debug_assert!(!self.start_bitrate.is_zero());

        // When probing at 1.8 Mbps (6x 300), this represents a threshold of
        // 1.26 Mbps to continue probing.
        let mut probes = vec![self.start_bitrate * self.config.first_exponential_probe_scale];
        if let Some(second_scale) = self.config.second_exponential_probe_scale {
            probes.push(self.start_bitrate * second_scale);
        }

        self.initiate_probing(at_time, &probes, true)
    }

    /// The single emission point. Stamps ids, applies caps and the skip
    /// rule, advances state and logs every emitted cluster.
    fn initiate_probing(
        &mut self,
        now: Timestamp,
        bitrates_to_probe: &[Bitrate],
        mut probe_further: bool,
    ) -> Vec<ProbeClusterConfig> {
        if !self.network_available {
            return vec![];
        }

        if self.config.skip_if_estimate_larger_than_fraction_of_max > 0.0 {
            let network_estimate = self
                .network_estimate
                .map(|e| e.link_capacity_upper)
                .unwrap_or(Bitrate::INFINITY);
            let current = self.estimated_bitrate.min(network_estimate);

            if current
                >= self.max_bitrate * self.config.skip_if_estimate_larger_than_fraction_of_max
            {
                debug!(
                    "Not probing, estimate {} is close to the max bitrate {}",
                    current, self.max_bitrate
                );
                self.state = State::ProbingComplete;
                return vec![];
            }
        }

        let mut pending_probes = Vec::with_capacity(bitrates_to_probe.len());

        for bitrate in bitrates_to_probe.iter().copied() {
            let mut bitrate = bitrate;

            if self.config.limit_probe_target_rate_to_loss_bwe
                && self.bwe_limited_due_to_packet_loss
            {
                bitrate = bitrate.min(self.estimated_bitrate);
            }

            if bitrate >= self.max_bitrate {
                bitrate = self.max_bitrate;
                // Probing at the cap cannot discover capacity beyond it.
                probe_further = false;
            }

            if bitrate.is_zero() {
                continue;
            }

            pending_probes.push(self.create_probe_cluster(now, bitrate));
        }

        if pending_probes.is_empty() {
            return pending_probes;
        }

        self.time_last_probing_initiated = now;

        if probe_further {
            // Don't expect probe results to be larger than a fraction of the
            // actual probe rate.
            let last_rate = pending_probes[pending_probes.len() - 1].target_rate();
            self.state = State::WaitingForProbingResult {
                since: now,
                min_bitrate_to_probe_further: last_rate * self.config.further_probe_threshold,
            };
        } else {
            self.state = State::ProbingComplete;
        }

        for cluster in &pending_probes {
            debug!(
                "Probe cluster {}: {} for at least {:?}",
                cluster.id(),
                cluster.target_rate(),
                cluster.target_duration()
            );
            if let Some(log) = &mut self.log {
                log.probe_cluster_created(cluster);
            }
        }

        pending_probes
    }

    fn create_probe_cluster(&mut self, at_time: Timestamp, bitrate: Bitrate) -> ProbeClusterConfig {
        let target_duration = if self.network_estimate.is_some()
            && self.config.network_state_estimate_probing_interval.is_finite()
        {
            self.config.network_state_probe_duration
        } else {
            self.config.min_probe_duration
        };

        ProbeClusterConfig::new(self.next_cluster_id.inc(), at_time, bitrate)
            .with_duration(target_duration)
            .with_probe_count(self.config.min_probe_packets_sent)
    }

    /// Event times must not go backwards. Asserts in debug builds, clamps to
    /// the previous event time in release.
    fn checked_time(&mut self, at_time: Timestamp) -> Timestamp {
        debug_assert!(at_time >= self.last_event_time, "event time went backwards");
        let at_time = at_time.max(self.last_event_time);
        self.last_event_time = at_time;
        at_time
    }
}

use crate::rate::Bitrate;
use crate::time::TimeDelta;

/// Tunables for the probe controller.
///
/// The defaults correspond to WebRTC's probing configuration. First we send
/// one or two probes of sizes `first_exponential_probe_scale * start_bitrate`
/// and `second_exponential_probe_scale * start_bitrate`. Then whenever we get
/// a bitrate estimate of at least `further_probe_threshold` times the size of
/// the last sent probe, we send another one of size
/// `further_exponential_probe_scale` times the new estimate.
///
/// The struct is plain data; parsing from a textual key/value format is the
/// caller's concern. Values outside their valid range are replaced by the
/// defaults when the controller is constructed.
#[derive(Debug, Clone)]
pub struct ProbeControllerConfig {
    /// Multiplier on start_bitrate for the first initial probe.
    pub first_exponential_probe_scale: f64,
    /// Multiplier for the second initial probe. `None` issues only one
    /// initial probe.
    pub second_exponential_probe_scale: Option<f64>,
    /// Multiplier on the newest estimate for follow-up exponential probes.
    pub further_exponential_probe_scale: f64,
    /// Fraction of the last probe's target the new estimate must reach to
    /// trigger a follow-up probe.
    pub further_probe_threshold: f64,

    /// Minimum wall-time gap between ALR probes.
    pub alr_probing_interval: TimeDelta,
    /// Multiplier on the current estimate for ALR probes.
    pub alr_probe_scale: f64,

    /// Minimum wall-time gap between network-state-driven probes.
    /// `PlusInf` disables periodic network-state probing.
    pub network_state_estimate_probing_interval: TimeDelta,
    /// Ratio of new/old network-state link capacity at or above which a probe
    /// is sent on the next process tick. Zero disables.
    pub network_state_estimate_fast_rampup_rate: f64,
    /// Ratio of new/old network-state link capacity at or below which a probe
    /// is sent on the next process tick (detecting rebound). Zero disables.
    pub network_state_estimate_drop_down_rate: f64,
    /// Multiplier applied to min(estimate, link capacity) for network-state
    /// probes.
    pub network_state_probe_scale: f64,
    /// Overrides min_probe_duration while a network state estimate is known
    /// and network-state probing is enabled.
    pub network_state_probe_duration: TimeDelta,

    /// Multiplier on a newly reported max allocated bitrate for the first
    /// allocation probe. `None` disables allocation probing.
    pub first_allocation_probe_scale: Option<f64>,
    /// Multiplier for the second allocation probe.
    pub second_allocation_probe_scale: Option<f64>,
    /// Allow follow-up exponential probing after allocation probes.
    pub allocation_allow_further_probing: bool,
    /// Absolute cap on allocation probe target rates.
    pub allocation_probe_max: Bitrate,

    /// Minimum packet count written into each emitted cluster.
    pub min_probe_packets_sent: usize,
    /// Minimum duration written into each emitted cluster.
    pub min_probe_duration: TimeDelta,

    /// Clamp probe targets to the current estimate while the estimator
    /// reports loss-limited state.
    pub limit_probe_target_rate_to_loss_bwe: bool,
    /// Suppress all probes when min(estimate, link capacity) exceeds this
    /// fraction of max_bitrate. Zero disables.
    pub skip_if_estimate_larger_than_fraction_of_max: f64,

    /// Probe aggressively after a large estimate drop even outside ALR.
    pub rapid_recovery_experiment: bool,
}

impl Default for ProbeControllerConfig {
    fn default() -> Self {
        Self {
            first_exponential_probe_scale: 3.0,
            second_exponential_probe_scale: Some(6.0),
            further_exponential_probe_scale: 2.0,
            further_probe_threshold: 0.7,

            alr_probing_interval: TimeDelta::from_secs(5),
            alr_probe_scale: 2.0,

            network_state_estimate_probing_interval: TimeDelta::PlusInf,
            network_state_estimate_fast_rampup_rate: 0.0,
            network_state_estimate_drop_down_rate: 0.0,
            network_state_probe_scale: 1.0,
            network_state_probe_duration: TimeDelta::from_millis(15),

            first_allocation_probe_scale: Some(1.0),
            second_allocation_probe_scale: Some(2.0),
            allocation_allow_further_probing: false,
            allocation_probe_max: Bitrate::INFINITY,

            min_probe_packets_sent: 5,
            min_probe_duration: TimeDelta::from_millis(15),

            limit_probe_target_rate_to_loss_bwe: false,
            skip_if_estimate_larger_than_fraction_of_max: 0.0,

            rapid_recovery_experiment: false,
        }
    }
}

impl ProbeControllerConfig {
    /// Replace out-of-range values with the documented defaults.
    ///
    /// Applied once at controller construction. A rejected value is logged
    /// and the rest of the configuration is kept as supplied.
    pub(crate) fn sanitized(mut self) -> Self {
        let defaults = Self::default();

        if !(self.first_exponential_probe_scale > 0.0) {
            warn!(
                "first_exponential_probe_scale {} out of range, using {}",
                self.first_exponential_probe_scale, defaults.first_exponential_probe_scale
            );
            self.first_exponential_probe_scale = defaults.first_exponential_probe_scale;
        }

        if let Some(scale) = self.second_exponential_probe_scale {
            if !(scale > 0.0) {
                warn!(
                    "second_exponential_probe_scale {} out of range, disabling",
                    scale
                );
                self.second_exponential_probe_scale = None;
            }
        }

        if !(self.further_exponential_probe_scale > 0.0) {
            warn!(
                "further_exponential_probe_scale {} out of range, using {}",
                self.further_exponential_probe_scale, defaults.further_exponential_probe_scale
            );
            self.further_exponential_probe_scale = defaults.further_exponential_probe_scale;
        }

        if !(self.further_probe_threshold > 0.0 && self.further_probe_threshold <= 1.0) {
            warn!(
                "further_probe_threshold {} out of range, using {}",
                self.further_probe_threshold, defaults.further_probe_threshold
            );
            self.further_probe_threshold = defaults.further_probe_threshold;
        }

        if !(self.alr_probe_scale > 0.0) {
            warn!(
                "alr_probe_scale {} out of range, using {}",
                self.alr_probe_scale, defaults.alr_probe_scale
            );
            self.alr_probe_scale = defaults.alr_probe_scale;
        }

        if self.alr_probing_interval <= TimeDelta::ZERO {
            warn!("alr_probing_interval out of range, using default");
            self.alr_probing_interval = defaults.alr_probing_interval;
        }

        if !(self.network_state_probe_scale > 0.0) {
            warn!(
                "network_state_probe_scale {} out of range, using {}",
                self.network_state_probe_scale, defaults.network_state_probe_scale
            );
            self.network_state_probe_scale = defaults.network_state_probe_scale;
        }

        if self.network_state_estimate_fast_rampup_rate < 0.0 {
            warn!("network_state_estimate_fast_rampup_rate negative, disabling");
            self.network_state_estimate_fast_rampup_rate = 0.0;
        }

        if self.network_state_estimate_drop_down_rate < 0.0 {
            warn!("network_state_estimate_drop_down_rate negative, disabling");
            self.network_state_estimate_drop_down_rate = 0.0;
        }

        if let Some(scale) = self.first_allocation_probe_scale {
            if !(scale > 0.0) {
                warn!(
                    "first_allocation_probe_scale {} out of range, disabling",
                    scale
                );
                self.first_allocation_probe_scale = None;
            }
        }

        if let Some(scale) = self.second_allocation_probe_scale {
            if !(scale > 0.0) {
                warn!(
                    "second_allocation_probe_scale {} out of range, disabling",
                    scale
                );
                self.second_allocation_probe_scale = None;
            }
        }

        if self.allocation_probe_max <= Bitrate::ZERO {
            warn!("allocation_probe_max out of range, uncapping");
            self.allocation_probe_max = defaults.allocation_probe_max;
        }

        if self.min_probe_packets_sent == 0 {
            warn!(
                "min_probe_packets_sent is zero, using {}",
                defaults.min_probe_packets_sent
            );
            self.min_probe_packets_sent = defaults.min_probe_packets_sent;
        }

        if self.min_probe_duration <= TimeDelta::ZERO {
            warn!("min_probe_duration out of range, using default");
            self.min_probe_duration = defaults.min_probe_duration;
        }

        if self.network_state_probe_duration <= TimeDelta::ZERO {
            warn!("network_state_probe_duration out of range, using default");
            self.network_state_probe_duration = defaults.network_state_probe_duration;
        }

        if !(self.skip_if_estimate_larger_than_fraction_of_max >= 0.0
            && self.skip_if_estimate_larger_than_fraction_of_max <= 1.0)
        {
            warn!(
                "skip_if_estimate_larger_than_fraction_of_max {} out of range, disabling",
                self.skip_if_estimate_larger_than_fraction_of_max
            );
            self.skip_if_estimate_larger_than_fraction_of_max = 0.0;
        }

        self
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_pass_sanitation_unchanged() {
        let config = ProbeControllerConfig::default().sanitized();
        let defaults = ProbeControllerConfig::default();

        assert_eq!(
            config.first_exponential_probe_scale,
            defaults.first_exponential_probe_scale
        );
        assert_eq!(
            config.further_probe_threshold,
            defaults.further_probe_threshold
        );
        assert_eq!(config.min_probe_packets_sent, defaults.min_probe_packets_sent);
        assert_eq!(
            config.second_exponential_probe_scale,
            defaults.second_exponential_probe_scale
        );
    }

    #[test]
    fn out_of_range_values_fall_back_field_by_field() {
        let config = ProbeControllerConfig {
            further_probe_threshold: 0.0,
            first_exponential_probe_scale: -3.0,
            alr_probe_scale: 7.0,
            ..Default::default()
        }
        .sanitized();

        assert_eq!(config.further_probe_threshold, 0.7);
        assert_eq!(config.first_exponential_probe_scale, 3.0);
        // Valid fields are kept as supplied.
        assert_eq!(config.alr_probe_scale, 7.0);
    }

    #[test]
    fn nan_threshold_is_rejected() {
        let config = ProbeControllerConfig {
            further_probe_threshold: f64::NAN,
            ..Default::default()
        }
        .sanitized();

        assert_eq!(config.further_probe_threshold, 0.7);
    }

    #[test]
    fn invalid_optional_scales_disable() {
        let config = ProbeControllerConfig {
            second_exponential_probe_scale: Some(-1.0),
            first_allocation_probe_scale: Some(0.0),
            ..Default::default()
        }
        .sanitized();

        assert_eq!(config.second_exponential_probe_scale, None);
        assert_eq!(config.first_allocation_probe_scale, None);
    }
}

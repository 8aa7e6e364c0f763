use nalgebra::Matrix2;
use serde_derive::{Deserialize, Serialize};

/// The flat tracker configuration record. Loaded once per tracker and read as
/// a copy on every tick; replace it between ticks with
/// [`crate::tracker::Mtt::set_parameters`].
///
/// Times are seconds, distances meters, variances squared units of the
/// quantity they bound. The defaults reproduce a medium-range surveillance
/// setup: slow process noise for straight flight, an 8 m/s^2 class turn
/// model, and a 20 s decorrelation for the vertical velocity channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MttParameters {
    // Stale-drop horizons per track kind.
    pub embryonic_track_drop_time: f64,
    pub candidate_track_drop_time: f64,
    pub active_track_drop_time: f64,
    /// Idle horizon after which a track's vertical channel deactivates,
    /// independently of the horizontal lifecycle.
    pub vertical_channel_drop_time: f64,
    /// Delay before an active track is reported out; consumed by the
    /// enclosing reporting layer, not by the correlator.
    pub active_track_report_delay: f64,

    // Process noise for candidate (information-form) propagation.
    pub candidate_track_x_acceleration: f64,
    pub candidate_track_y_acceleration: f64,

    // Process noise per IMM model.
    pub straight_flight_x_acceleration: f64,
    pub straight_flight_y_acceleration: f64,
    pub turning_flight_x_acceleration: f64,
    pub turning_flight_y_acceleration: f64,

    // Gauss-Markov parameters of the vertical channel.
    pub vertical_velocity: f64,
    pub vertical_velocity_decorrelation_time: f64,

    // Promotion thresholds.
    pub velocity_limit_promote_embryonic_track: f64,
    pub velocity_variance_promote_embryonic_track: f64,
    pub position_variance_promote_candidate_track: f64,
    pub velocity_variance_promote_candidate_track: f64,
    pub position_variance_promote_vertical_channel: f64,
    pub velocity_variance_promote_vertical_channel: f64,
    /// Minimum consecutive same-sensor hits before an embryonic track may be
    /// promoted; 0 disables the rule.
    pub promote_single_source_hit_threshold: u32,
    pub promote_track_horizontal_threshold: f64,
    pub promote_track_vertical_threshold: f64,

    // Variance rescale bounds applied inside the gates.
    pub straight_flight_max_variance: f64,
    pub turning_flight_max_variance: f64,
    pub straight_flight_min_variance: f64,
    pub turning_flight_min_variance: f64,

    // First-order Markov mode transition matrix; each row sums to one.
    pub straight_to_straight_flight: f64,
    pub straight_to_turning_flight: f64,
    pub turning_to_straight_flight: f64,
    pub turning_to_turning_flight: f64,

    // Probability of falsely rejecting a correct correlation.
    pub m2t_false_reject_probability: f64,
    pub t2t_false_reject_probability: f64,

    // Geometric alternative to the statistical track-to-track gate; a zero
    // diameter disables it.
    pub track_correlation_cylinder_height: f64,
    pub track_correlation_cylinder_diameter: f64,
}

impl Default for MttParameters {
    fn default() -> Self {
        Self {
            embryonic_track_drop_time: 30.0,
            candidate_track_drop_time: 30.0,
            active_track_drop_time: 60.0,
            vertical_channel_drop_time: 60.0,
            active_track_report_delay: 0.0,

            candidate_track_x_acceleration: 9.0,
            candidate_track_y_acceleration: 9.0,

            straight_flight_x_acceleration: 0.09,
            straight_flight_y_acceleration: 0.09,
            turning_flight_x_acceleration: 8.0,
            turning_flight_y_acceleration: 8.0,

            vertical_velocity: 6.25,
            vertical_velocity_decorrelation_time: 20.0,

            velocity_limit_promote_embryonic_track: 700.0,
            velocity_variance_promote_embryonic_track: 22_500.0,
            position_variance_promote_candidate_track: 250_000.0,
            velocity_variance_promote_candidate_track: 1_600.0,
            position_variance_promote_vertical_channel: 250_000.0,
            velocity_variance_promote_vertical_channel: 1_600.0,

            promote_single_source_hit_threshold: 0,
            promote_track_horizontal_threshold: 2.0e4,
            promote_track_vertical_threshold: 1.0e10,

            straight_flight_max_variance: 64_000.0,
            turning_flight_max_variance: 64_000.0,
            straight_flight_min_variance: 16_000.0,
            turning_flight_min_variance: 16_000.0,

            straight_to_straight_flight: 0.70,
            straight_to_turning_flight: 0.30,
            turning_to_straight_flight: 0.70,
            turning_to_turning_flight: 0.30,

            m2t_false_reject_probability: 1.0e-20,
            t2t_false_reject_probability: 1.0e-20,

            track_correlation_cylinder_height: 0.0,
            track_correlation_cylinder_diameter: 0.0,
        }
    }
}

impl MttParameters {
    /// Loads a parameter record from a TOML document; unspecified options
    /// keep their defaults.
    pub fn from_toml(document: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(document)
    }

    /// The mode transition matrix with rows (straight -> straight, straight
    /// -> turning) and (turning -> straight, turning -> turning).
    pub fn mode_transition_matrix(&self) -> Matrix2<f64> {
        Matrix2::new(
            self.straight_to_straight_flight,
            self.straight_to_turning_flight,
            self.turning_to_straight_flight,
            self.turning_to_turning_flight,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn defaults_match_the_shipped_tuning() {
        let p = MttParameters::default();
        assert_abs_diff_eq!(p.active_track_drop_time, 60.0);
        assert_abs_diff_eq!(p.promote_track_horizontal_threshold, 2.0e4);
        assert_abs_diff_eq!(p.m2t_false_reject_probability, 1.0e-20);
        let mtp = p.mode_transition_matrix();
        assert_abs_diff_eq!(mtp.row(0).sum(), 1.0, epsilon = 1.0e-12);
        assert_abs_diff_eq!(mtp.row(1).sum(), 1.0, epsilon = 1.0e-12);
    }

    #[test]
    fn toml_overrides_only_named_options() {
        let p = MttParameters::from_toml(
            r#"
            active_track_drop_time = 120.0
            vertical_channel_drop_time = 5.0
            track_correlation_cylinder_diameter = 2000.0
            "#,
        )
        .unwrap();
        assert_abs_diff_eq!(p.active_track_drop_time, 120.0);
        assert_abs_diff_eq!(p.vertical_channel_drop_time, 5.0);
        assert_abs_diff_eq!(p.track_correlation_cylinder_diameter, 2000.0);
        // Untouched options keep their defaults.
        assert_abs_diff_eq!(p.embryonic_track_drop_time, 30.0);
        assert_abs_diff_eq!(p.turning_flight_x_acceleration, 8.0);
    }

    #[test]
    fn round_trips_through_toml() {
        let p = MttParameters::default();
        let doc = toml::to_string(&p).unwrap();
        let back = MttParameters::from_toml(&doc).unwrap();
        assert_eq!(p, back);
    }
}

//! Statistical gating: decides whether a measurement or an external track is
//! close enough, in whitened innovation units, to belong to a track.
//!
//! Every gate runs both IMM models, propagates each to the evaluation time,
//! and reports the smaller hypothesis test statistic together with the
//! corresponding physical innovation norm. A correlation is accepted when
//! the statistic beats the critical threshold `sqrt(-2 ln alpha)` for the
//! configured probability of falsely rejecting a correct correlation.

use crate::filter::propagate::{propagate_straight, propagate_turning};
use crate::filter::{radar_geometry, RadarGeometry, RangeVariance};
use crate::linalg::{symmetrize, whiten_2x2};
use crate::measurement::Measurement;
use crate::params::MttParameters;
use crate::track::ActiveTrackData;
use nalgebra::{Matrix2, Matrix2x4, Matrix4, Vector2, Vector4};

/// Returned in place of a test statistic when the gate math breaks down
/// (indefinite innovation covariance, failed Cholesky, imaginary ground
/// range); large enough that such a candidate never wins.
pub const GATE_SENTINEL: f64 = 9_999_999_999.99999;

/// Critical threshold for a gate with false-rejection probability `alpha`.
pub fn critical_threshold(alpha: f64) -> f64 {
    (-2.0 * alpha.ln()).sqrt()
}

/// Outcome of one gate evaluation: the whitened hypothesis test statistic
/// and the raw innovation norm used for tie-breaking among accepted gates.
#[derive(Debug, Clone, Copy)]
pub struct GateResult {
    pub test: f64,
    pub norm: f64,
}

impl GateResult {
    fn sentinel() -> Self {
        Self {
            test: GATE_SENTINEL,
            norm: GATE_SENTINEL,
        }
    }

    fn min(self, other: Self) -> Self {
        Self {
            test: self.test.min(other.test),
            norm: self.norm.min(other.norm),
        }
    }
}

/// Whitens the innovation against its covariance; sentinel on failure.
fn whitened_result(s: &Matrix2<f64>, delz: &Vector2<f64>) -> GateResult {
    match whiten_2x2(s, delz) {
        Some(x) => GateResult {
            test: x.norm(),
            norm: delz.norm(),
        },
        None => GateResult::sentinel(),
    }
}

/// Clamps the horizontal variances of a propagated gate covariance: rescale
/// the whole matrix down when the largest of the first `n_max` diagonals
/// exceeds `max_var`, and up when the smallest position diagonal falls below
/// `min_var`.
fn rescale_max<const D: usize>(
    p: &mut nalgebra::SMatrix<f64, D, D>,
    n_max: usize,
    max_var: f64,
) {
    let mut maxvar: f64 = 0.0;
    for i in 0..n_max {
        maxvar = maxvar.max(p[(i, i)]);
    }
    if maxvar > max_var {
        *p *= max_var / maxvar;
    }
}

fn rescale_min<const D: usize>(p: &mut nalgebra::SMatrix<f64, D, D>, min_var: f64) {
    let mut minvar = min_var;
    for i in 0..2 {
        minvar = minvar.min(p[(i, i)]);
    }
    if minvar < min_var {
        *p *= min_var / minvar;
    }
}

/// Gate query against the straight-flight model.
pub fn gate_straight(
    params: &MttParameters,
    x4: &Vector4<f64>,
    p4: &Matrix4<f64>,
    vertical: Option<(&Matrix2<f64>, &Vector2<f64>)>,
    meas: &Measurement,
    dt: f64,
) -> GateResult {
    let mut p = *p4;
    let mut x = *x4;
    propagate_straight(
        dt,
        &mut p,
        &mut x,
        params.straight_flight_x_acceleration,
        params.straight_flight_y_acceleration,
    );
    rescale_max(&mut p, 4, params.straight_flight_max_variance);

    let geometry = match radar_geometry(
        meas.radar_data(),
        meas.available,
        vertical,
        RangeVariance::Gate,
    ) {
        Some(g) => g,
        None => return GateResult::sentinel(),
    };
    gate_position(&p, &x, &geometry)
}

/// Gate query against the turning-flight model. The 6-state prediction is
/// truncated to its position/velocity block before the position gate.
pub fn gate_turning(
    params: &MttParameters,
    data: &ActiveTrackData,
    vertical: Option<(&Matrix2<f64>, &Vector2<f64>)>,
    meas: &Measurement,
    dt: f64,
) -> GateResult {
    let mut p6 = data.covariance;
    let mut x6 = data.state;
    propagate_turning(
        dt,
        &mut p6,
        &mut x6,
        params.turning_flight_x_acceleration,
        params.turning_flight_y_acceleration,
    );
    rescale_max(&mut p6, 4, params.turning_flight_max_variance);

    let p = p6.fixed_view::<4, 4>(0, 0).into_owned();
    let x = x6.fixed_view::<4, 1>(0, 0).into_owned();

    let geometry = match radar_geometry(
        meas.radar_data(),
        meas.available,
        vertical,
        RangeVariance::Gate,
    ) {
        Some(g) => g,
        None => return GateResult::sentinel(),
    };
    gate_position(&p, &x, &geometry)
}

/// The shared tail of both gate queries: innovation covariance, innovation,
/// whitening.
fn gate_position(p: &Matrix4<f64>, x: &Vector4<f64>, geometry: &RadarGeometry) -> GateResult {
    let h = Matrix2x4::<f64>::identity();
    let mut s = h * *p * h.transpose() + geometry.r;
    symmetrize(&mut s);
    let delz = Vector2::new(
        geometry.dx + geometry.sensor[0] - x[0],
        geometry.dy + geometry.sensor[1] - x[1],
    );
    whitened_result(&s, &delz)
}

/// Measurement-to-track gate: both models, best statistic wins.
pub fn gate_measurement_to_track(
    params: &MttParameters,
    data: &ActiveTrackData,
    vertical_channel_active: bool,
    meas: &Measurement,
    dt: f64,
) -> GateResult {
    let vertical = if vertical_channel_active {
        Some((&data.vertical_info_matrix, &data.vertical_info_state))
    } else {
        None
    };

    let x4 = data.state.fixed_view::<4, 1>(0, 0).into_owned();
    let p4 = data.covariance.fixed_view::<4, 4>(0, 0).into_owned();
    let straight = gate_straight(params, &x4, &p4, vertical, meas, dt);
    let turning = gate_turning(params, data, vertical, meas, dt);

    if straight.test < turning.test {
        straight
    } else {
        turning
    }
}

/// Track-to-track gate: the "measurement" is a temporary active track built
/// from the incoming nonlocal track, already propagated to the evaluation
/// time. Both models of the local track are propagated by `dt` and clamped
/// into the configured variance band before whitening.
pub fn gate_track_to_track(
    params: &MttParameters,
    local: &ActiveTrackData,
    temp: &ActiveTrackData,
    dt: f64,
) -> GateResult {
    let cmp_x4 = temp.state.fixed_view::<4, 1>(0, 0).into_owned();
    let cmp_p4 = temp.covariance.fixed_view::<4, 4>(0, 0).into_owned();

    // Straight-flight hypothesis.
    let mut p = local.covariance.fixed_view::<4, 4>(0, 0).into_owned();
    let mut x = local.state.fixed_view::<4, 1>(0, 0).into_owned();
    propagate_straight(
        dt,
        &mut p,
        &mut x,
        params.straight_flight_x_acceleration,
        params.straight_flight_y_acceleration,
    );
    rescale_max(&mut p, 4, params.straight_flight_max_variance);
    rescale_min(&mut p, params.straight_flight_min_variance);
    let mut s = p + cmp_p4;
    symmetrize(&mut s);
    let delz = cmp_x4 - x;
    let straight = whitened_result(
        &s.fixed_view::<2, 2>(0, 0).into_owned(),
        &delz.fixed_view::<2, 1>(0, 0).into_owned(),
    );

    // Turning-flight hypothesis.
    let mut p6 = local.covariance;
    let mut x6 = local.state;
    propagate_turning(
        dt,
        &mut p6,
        &mut x6,
        params.turning_flight_x_acceleration,
        params.turning_flight_y_acceleration,
    );
    rescale_max(&mut p6, 4, params.turning_flight_max_variance);
    rescale_min(&mut p6, params.turning_flight_min_variance);
    let p = p6.fixed_view::<4, 4>(0, 0).into_owned();
    let x = x6.fixed_view::<4, 1>(0, 0).into_owned();
    let mut s = p + cmp_p4;
    symmetrize(&mut s);
    let delz = cmp_x4 - x;
    let turning = whitened_result(
        &s.fixed_view::<2, 2>(0, 0).into_owned(),
        &delz.fixed_view::<2, 1>(0, 0).into_owned(),
    );

    straight.min(turning)
}

//! Covariance-form measurement updates for the two active-track models.
//!
//! Each update propagates its model to the measurement time, folds the
//! east/north position fix through a standard Kalman gain, optionally
//! augments the velocity estimate with Doppler, and returns the Gaussian
//! likelihood of the innovation for the first-order generalized
//! pseudo-Bayesian mode update.

use super::propagate::{propagate_straight, propagate_turning};
use super::{radar_geometry, RadarGeometry, RangeVariance};
use crate::linalg::{invert_2x2, symmetrize};
use crate::measurement::Measurement;
use crate::params::MttParameters;
use nalgebra::{Matrix2, Matrix2x4, Matrix2x6, Matrix4, Matrix6, Vector2, Vector4, Vector6};
use std::f64::consts::PI;

/// Likelihoods are floored here so that a wildly inconsistent model never
/// zeroes out its mode probability for good.
pub const LIKELIHOOD_FLOOR: f64 = 1.0e-10;

/// Gaussian likelihood of a 2D innovation, clamped to the floor, with the
/// quadratic capped at 50 to keep the exponential in range.
pub(crate) fn innovation_likelihood(s: &Matrix2<f64>, delz: &Vector2<f64>) -> f64 {
    let det = s[(0, 0)] * s[(1, 1)] - s[(0, 1)] * s[(1, 0)];
    let dist = match invert_2x2(s) {
        Ok(s_inv) => (delz.transpose() * s_inv * delz)[0],
        Err(_) => return LIKELIHOOD_FLOOR,
    };
    if det >= 0.0 && dist <= 50.0 {
        ((1.0 / (2.0 * PI * det.sqrt())) * (-0.5 * dist).exp()).max(LIKELIHOOD_FLOOR)
    } else {
        LIKELIHOOD_FLOOR
    }
}

/// Augments the horizontal velocity estimate with a range-rate measurement
/// (Blackman's radar tracking form). Only applies when both range rate and
/// elevation are available; returns the corrected (vx, vy).
fn doppler_augment(
    meas: &Measurement,
    var_vx: f64,
    var_vy: f64,
    vx: f64,
    vy: f64,
) -> (f64, f64) {
    if !(meas.available.has_range_rate() && meas.available.has_elevation()) {
        return (vx, vy);
    }
    let radar = meas.radar_data();
    let az = radar.azimuth;
    let (sin_az, cos_az) = az.sin_cos();
    let residual = (radar.range_rate * radar.elevation.cos()
        + (radar.sensor_velocity[0] * cos_az + radar.sensor_velocity[1] * sin_az))
        - (vx * cos_az + vy * sin_az);
    let var_rr = radar.range_rate_std_dev * radar.range_rate_std_dev;
    let c = var_vx * cos_az * cos_az + var_vy * sin_az * sin_az + var_rr;
    (
        vx + (var_vx * cos_az / c) * residual,
        vy + (var_vy * sin_az / c) * residual,
    )
}

/// Folds a radar measurement into the straight-flight (4-state) model.
/// Returns the innovation likelihood.
pub fn update_straight_model(
    params: &MttParameters,
    dt: f64,
    x: &mut Vector4<f64>,
    p: &mut Matrix4<f64>,
    vertical: Option<(&Matrix2<f64>, &Vector2<f64>)>,
    meas: &Measurement,
) -> f64 {
    propagate_straight(
        dt,
        p,
        x,
        params.straight_flight_x_acceleration,
        params.straight_flight_y_acceleration,
    );

    let geometry = radar_geometry(
        meas.radar_data(),
        meas.available,
        vertical,
        RangeVariance::Update,
    )
    .expect("update geometry is always resolvable");
    let RadarGeometry {
        dx, dy, r, sensor, ..
    } = geometry;

    let h = Matrix2x4::<f64>::identity();
    let s = {
        let mut s = h * *p * h.transpose() + r;
        symmetrize(&mut s);
        s
    };
    let delz = Vector2::new(dx + sensor[0] - x[0], dy + sensor[1] - x[1]);

    let s_inv = match invert_2x2(&s) {
        Ok(inv) => inv,
        // Expected numerical failure: skip the fold, keep the propagated
        // state, and let the mode update see a floor likelihood.
        Err(_) => return LIKELIHOOD_FLOOR,
    };
    let k = *p * h.transpose() * s_inv;
    *x += k * delz;
    *p = (Matrix4::identity() - k * h) * *p;
    symmetrize(p);

    let (vx, vy) = doppler_augment(meas, p[(2, 2)], p[(3, 3)], x[2], x[3]);
    x[2] = vx;
    x[3] = vy;

    innovation_likelihood(&s, &delz)
}

/// Folds a radar measurement into the turning-flight (6-state) model.
/// Returns the innovation likelihood.
pub fn update_turning_model(
    params: &MttParameters,
    dt: f64,
    x: &mut Vector6<f64>,
    p: &mut Matrix6<f64>,
    vertical: Option<(&Matrix2<f64>, &Vector2<f64>)>,
    meas: &Measurement,
) -> f64 {
    propagate_turning(
        dt,
        p,
        x,
        params.turning_flight_x_acceleration,
        params.turning_flight_y_acceleration,
    );

    let geometry = radar_geometry(
        meas.radar_data(),
        meas.available,
        vertical,
        RangeVariance::Update,
    )
    .expect("update geometry is always resolvable");
    let RadarGeometry {
        dx, dy, r, sensor, ..
    } = geometry;

    let h = Matrix2x6::<f64>::identity();
    let s = {
        let mut s = h * *p * h.transpose() + r;
        symmetrize(&mut s);
        s
    };
    let delz = Vector2::new(dx + sensor[0] - x[0], dy + sensor[1] - x[1]);

    let s_inv = match invert_2x2(&s) {
        Ok(inv) => inv,
        Err(_) => return LIKELIHOOD_FLOOR,
    };
    let k = *p * h.transpose() * s_inv;
    *x += k * delz;
    *p = (Matrix6::identity() - k * h) * *p;
    symmetrize(p);

    let (vx, vy) = doppler_augment(meas, p[(2, 2)], p[(3, 3)], x[2], x[3]);
    x[2] = vx;
    x[3] = vy;

    innovation_likelihood(&s, &delz)
}

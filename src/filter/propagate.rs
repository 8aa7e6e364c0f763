//! Closed-form time updates for the two horizontal process models.
//!
//! Straight flight is a 4-state constant-velocity model (x, y, vx, vy);
//! turning flight is a 6-state constant-acceleration model (x, y, vx, vy,
//! ax, ay). Both use the analytic white-noise-acceleration Q, weighted per
//! axis by the configured process noise.

use crate::linalg::symmetrize;
use nalgebra::{Matrix4, Matrix6, Vector4, Vector6};

/// State transition matrix of the straight-flight model.
pub fn straight_transition(dt: f64) -> Matrix4<f64> {
    let mut phi = Matrix4::identity();
    phi[(0, 2)] = dt;
    phi[(1, 3)] = dt;
    phi
}

/// Process noise of the straight-flight model.
pub fn straight_process_noise(dt: f64, wx: f64, wy: f64) -> Matrix4<f64> {
    let mut q = Matrix4::zeros();
    let dt2 = dt * dt;
    let dt3 = dt2 * dt;
    q[(0, 0)] = dt3 * wx / 3.0;
    q[(0, 2)] = dt2 * wx / 2.0;
    q[(1, 1)] = dt3 * wy / 3.0;
    q[(1, 3)] = dt2 * wy / 2.0;
    q[(2, 0)] = dt2 * wx / 2.0;
    q[(2, 2)] = dt * wx;
    q[(3, 1)] = dt2 * wy / 2.0;
    q[(3, 3)] = dt * wy;
    q
}

/// State transition matrix of the turning-flight model.
pub fn turning_transition(dt: f64) -> Matrix6<f64> {
    let mut phi = Matrix6::identity();
    let half_dt2 = dt * dt / 2.0;
    phi[(0, 2)] = dt;
    phi[(0, 4)] = half_dt2;
    phi[(1, 3)] = dt;
    phi[(1, 5)] = half_dt2;
    phi[(2, 4)] = dt;
    phi[(3, 5)] = dt;
    phi
}

/// Process noise of the turning-flight model, Van Loan's closed form for a
/// white-noise jerk driving the acceleration states.
pub fn turning_process_noise(dt: f64, wx: f64, wy: f64) -> Matrix6<f64> {
    let dt2 = dt * dt;
    let dt3 = dt2 * dt;
    let dt4 = dt3 * dt;
    let dt5 = dt4 * dt;
    let mut q = Matrix6::zeros();
    q[(0, 0)] = dt5 * wx / 20.0;
    q[(0, 2)] = dt4 * wx / 8.0;
    q[(0, 4)] = dt3 * wx / 6.0;
    q[(1, 1)] = dt5 * wy / 20.0;
    q[(1, 3)] = dt4 * wy / 8.0;
    q[(1, 5)] = dt3 * wy / 6.0;
    q[(2, 0)] = dt4 * wx / 8.0;
    q[(2, 2)] = dt3 * wx / 3.0;
    q[(2, 4)] = dt2 * wx / 2.0;
    q[(3, 1)] = dt4 * wy / 8.0;
    q[(3, 3)] = dt3 * wy / 3.0;
    q[(3, 5)] = dt2 * wy / 2.0;
    q[(4, 0)] = dt3 * wx / 6.0;
    q[(4, 2)] = dt2 * wx / 2.0;
    q[(4, 4)] = dt * wx;
    q[(5, 1)] = dt3 * wy / 6.0;
    q[(5, 3)] = dt2 * wy / 2.0;
    q[(5, 5)] = dt * wy;
    q
}

/// Propagates the straight-flight covariance and state forward by `dt`
/// seconds. A non-positive `dt` leaves both untouched.
pub fn propagate_straight(dt: f64, p: &mut Matrix4<f64>, x: &mut Vector4<f64>, wx: f64, wy: f64) {
    if dt <= 0.0 {
        return;
    }
    let phi = straight_transition(dt);
    let q = straight_process_noise(dt, wx, wy);
    *x = phi * *x;
    *p = phi * *p * phi.transpose() + q;
    symmetrize(p);
}

/// Propagates the turning-flight covariance and state forward by `dt`
/// seconds. A non-positive `dt` leaves both untouched.
pub fn propagate_turning(dt: f64, p: &mut Matrix6<f64>, x: &mut Vector6<f64>, wx: f64, wy: f64) {
    if dt <= 0.0 {
        return;
    }
    let phi = turning_transition(dt);
    let q = turning_process_noise(dt, wx, wy);
    *x = phi * *x;
    *p = phi * *p * phi.transpose() + q;
    symmetrize(p);
}

//! Information-form measurement updates.
//!
//! Embryonic and candidate tracks, and every vertical channel, live in
//! information form (Y = P^-1, y = Y x): a brand-new track has zero
//! information rather than an unrepresentable infinite covariance. The time
//! update happens on the information matrix directly, through the inverse
//! state transition, so the filter never has to invert a rank-deficient Y.

use super::propagate::straight_process_noise;
use super::FilterError;
use crate::linalg::{invert_2x2, symmetrize, try_invert};
use crate::params::MttParameters;
use nalgebra::{Matrix2, Matrix2x4, Matrix4, Vector2, Vector4};

/// Propagates and updates the 4-state horizontal information filter with an
/// east/north position fix.
///
/// `r` is the rotated covariance of the (dx, dy) offsets and `sensor` the
/// east/north sensor position; the absolute measurement folded in is
/// `sensor + (dx, dy)`.
///
/// When the process noise cannot be inverted the whole step is abandoned:
/// the filter keeps its prior state and the error is reported.
#[allow(clippy::too_many_arguments)]
pub fn update_horizontal_info(
    dt: f64,
    wx: f64,
    wy: f64,
    info_matrix: &mut Matrix4<f64>,
    info_state: &mut Vector4<f64>,
    r: &Matrix2<f64>,
    sensor_x: f64,
    sensor_y: f64,
    dx: f64,
    dy: f64,
) -> Result<(), FilterError> {
    let h = Matrix2x4::<f64>::identity();

    if dt > 0.0 {
        // Inverse transition: positions walk back by velocity * dt.
        let mut phi_inv = Matrix4::<f64>::identity();
        phi_inv[(0, 2)] = -dt;
        phi_inv[(1, 3)] = -dt;
        let phi_inv_t = phi_inv.transpose();

        let q = straight_process_noise(dt, wx, wy);
        let mut q_inv = q.try_inverse().ok_or(FilterError::SingularProcessNoise)?;
        symmetrize(&mut q_inv);

        let mut m = phi_inv_t * *info_matrix * phi_inv;
        symmetrize(&mut m);
        let n = m * try_invert(&(m + q_inv))?;
        let gain = Matrix4::identity() - n;

        *info_matrix = gain * m;
        symmetrize(info_matrix);
        *info_state = gain * phi_inv_t * *info_state;
    }

    // Fold the measurement: Y += H^T R^-1 H, y += H^T R^-1 z.
    let ht_r_inv = h.transpose() * invert_2x2(r)?;
    let mut info_update = ht_r_inv * h;
    symmetrize(&mut info_update);
    *info_matrix += info_update;
    symmetrize(info_matrix);
    let z = Vector2::new(sensor_x + dx, sensor_y + dy);
    *info_state += ht_r_inv * z;
    Ok(())
}

/// Builds the vertical channel's state transition and process noise: a
/// first-order Gauss-Markov vertical velocity with variance `va_var` and time
/// constant `tau`, driving a constant altitude.
fn vertical_model(dt: f64, va_var: f64, tau: f64) -> (Matrix2<f64>, Matrix2<f64>) {
    let e1 = (-dt / tau).exp();
    let e2 = (-2.0 * dt / tau).exp();
    let tau2 = tau * tau;
    let phi = Matrix2::new(1.0, tau * (1.0 - e1), 0.0, e1);
    let q = Matrix2::new(
        va_var * tau2 * (dt + 2.0 * tau * (e1 - 1.0) - tau * (e2 - 1.0) / 2.0),
        va_var * tau2 * ((e2 - 1.0) / 2.0 - (e1 - 1.0)),
        va_var * tau2 * ((e2 - 1.0) / 2.0 - (e1 - 1.0)),
        va_var * tau * (1.0 - e2) / 2.0,
    );
    (phi, q)
}

/// Propagates the 2-state vertical information filter forward by `dt`
/// seconds. Leaves the filter untouched on a non-positive `dt` or when any
/// of the required inversions fails.
pub fn propagate_vertical(
    dt: f64,
    va_var: f64,
    tau: f64,
    info_matrix: &mut Matrix2<f64>,
    info_state: &mut Vector2<f64>,
) -> Result<(), FilterError> {
    if dt <= 0.0 {
        return Ok(());
    }
    let (phi, q) = vertical_model(dt, va_var, tau);
    let q_inv = invert_2x2(&q).map_err(|_| FilterError::SingularProcessNoise)?;
    let phi_t_inv = invert_2x2(&phi.transpose())?;
    let phi_inv = invert_2x2(&phi)?;

    let m = phi_t_inv * *info_matrix * phi_inv;
    let n = m * invert_2x2(&(m + q_inv))?;
    let gain = Matrix2::identity() - n;

    *info_matrix = gain * m;
    symmetrize(info_matrix);
    *info_state = gain * phi_t_inv * *info_state;
    Ok(())
}

/// Propagates (only if the channel holds any information, so a dead channel
/// is never woken by propagation alone) and folds a z-axis measurement into
/// the vertical information filter.
///
/// `r_inv` is the inverse measurement variance matrix, `dz` the measured
/// height above the sensor; both are ignored unless range and elevation were
/// both available.
#[allow(clippy::too_many_arguments)]
pub fn update_vertical_info(
    dt: f64,
    va_var: f64,
    tau: f64,
    info_matrix: &mut Matrix2<f64>,
    info_state: &mut Vector2<f64>,
    r_inv: &Matrix2<f64>,
    sensor_z: f64,
    dz: f64,
    range_valid: bool,
    elevation_valid: bool,
) {
    if info_state[0] != 0.0 || info_state[1] != 0.0 {
        // A failed propagation keeps the prior state; the fold below still
        // applies, same as any other skipped sub-step.
        let _ = propagate_vertical(dt, va_var, tau, info_matrix, info_state);
    }

    if range_valid && elevation_valid {
        *info_matrix += r_inv;
        symmetrize(info_matrix);
        let z = Vector2::new(sensor_z + dz, 0.0);
        *info_state += r_inv * z;
    }
}

/// Whether the vertical information filter has converged enough to activate
/// the channel: condition number below the vertical threshold and both
/// post-inversion variances below their promotion ceilings.
pub fn vertical_promotion_passes(params: &MttParameters, info_matrix: &Matrix2<f64>) -> bool {
    let cond = crate::linalg::condition_number(info_matrix);
    if cond >= params.promote_track_vertical_threshold {
        return false;
    }
    match invert_2x2(info_matrix) {
        Ok(pv) => {
            pv[(0, 0)] < params.position_variance_promote_vertical_channel
                && pv[(1, 1)] < params.velocity_variance_promote_vertical_channel
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn first_fix_sets_position_information_only() {
        let mut y = Matrix4::zeros();
        let mut ys = Vector4::zeros();
        let r = Matrix2::new(25.0, 0.0, 0.0, 1.0);
        update_horizontal_info(0.0, 9.0, 9.0, &mut y, &mut ys, &r, 100.0, 0.0, 900.0, 50.0)
            .unwrap();
        assert_abs_diff_eq!(y[(0, 0)], 1.0 / 25.0, epsilon = 1.0e-12);
        assert_abs_diff_eq!(y[(1, 1)], 1.0, epsilon = 1.0e-12);
        assert_abs_diff_eq!(y[(2, 2)], 0.0, epsilon = 1.0e-15);
        assert_abs_diff_eq!(ys[0], 1000.0 / 25.0, epsilon = 1.0e-9);
        assert_abs_diff_eq!(ys[1], 50.0, epsilon = 1.0e-9);
    }

    #[test]
    fn two_fixes_make_the_filter_observable() {
        let mut y = Matrix4::zeros();
        let mut ys = Vector4::zeros();
        let r = Matrix2::new(25.0, 0.0, 0.0, 25.0);
        update_horizontal_info(0.0, 9.0, 9.0, &mut y, &mut ys, &r, 0.0, 0.0, 1000.0, 0.0)
            .unwrap();
        assert!(y.try_inverse().is_none() || y[(2, 2)] == 0.0);
        update_horizontal_info(1.0, 9.0, 9.0, &mut y, &mut ys, &r, 0.0, 0.0, 1100.0, 0.0)
            .unwrap();
        // Velocity is now observable: x = Y^-1 y recovers ~100 m/s east.
        let p = y.try_inverse().expect("information matrix became full rank");
        let x = p * ys;
        assert_abs_diff_eq!(x[0], 1100.0, epsilon = 20.0);
        assert!((x[2] - 100.0).abs() < 30.0);
    }

    #[test]
    fn symmetry_is_restored_after_every_update() {
        let mut y = Matrix4::zeros();
        let mut ys = Vector4::zeros();
        let r = Matrix2::new(25.0, 3.0, 3.0, 16.0);
        for k in 0..5 {
            let dt = if k == 0 { 0.0 } else { 1.0 };
            update_horizontal_info(
                dt,
                9.0,
                9.0,
                &mut y,
                &mut ys,
                &r,
                0.0,
                0.0,
                1000.0 + 100.0 * k as f64,
                10.0,
            )
            .unwrap();
            assert_abs_diff_eq!((y - y.transpose()).norm(), 0.0, epsilon = 1.0e-9);
        }
    }

    #[test]
    fn dead_vertical_channel_stays_dead_without_measurements() {
        let mut y = Matrix2::zeros();
        let mut ys = Vector2::zeros();
        update_vertical_info(
            5.0,
            6.25,
            20.0,
            &mut y,
            &mut ys,
            &Matrix2::zeros(),
            0.0,
            0.0,
            false,
            false,
        );
        assert_eq!(y, Matrix2::zeros());
        assert_eq!(ys, Vector2::zeros());
    }

    #[test]
    fn vertical_fixes_converge_to_the_measured_altitude() {
        let mut y = Matrix2::zeros();
        let mut ys = Vector2::zeros();
        let var_z = 2.0;
        let r_inv = Matrix2::new(1.0 / var_z, 0.0, 0.0, 0.0);
        // Constant 600 m above a sensor at 0 m.
        for k in 0..4 {
            let dt = if k == 0 { 0.0 } else { 1.0 };
            update_vertical_info(dt, 6.25, 20.0, &mut y, &mut ys, &r_inv, 0.0, 600.0, true, true);
        }
        let pv = invert_2x2(&y).expect("vertical filter became full rank");
        let xv = pv * ys;
        assert_abs_diff_eq!(xv[0], 600.0, epsilon = 5.0);
        assert!(xv[1].abs() < 5.0);
    }

    #[test]
    fn vertical_promotion_requires_tight_variances() {
        let params = MttParameters::default();
        // Tight, well-conditioned filter passes.
        let tight = Matrix2::new(1.0, 0.0, 0.0, 0.5);
        assert!(vertical_promotion_passes(&params, &tight));
        // Zero information fails.
        assert!(!vertical_promotion_passes(&params, &Matrix2::zeros()));
        // Loose position variance fails: Y = diag(1e-6) -> P = diag(1e6).
        let loose = Matrix2::new(1.0e-6, 0.0, 0.0, 1.0);
        assert!(!vertical_promotion_passes(&params, &loose));
    }
}

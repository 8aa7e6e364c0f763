//! Track-to-track fusion and the interacting-multiple-model combination.
//!
//! An external track that survived the track-to-track gate is folded into
//! the local active track with a centralized Kalman filter: the external
//! covariance contributes only the information it gained since its previous
//! report (Y_ext - Y_ext_prev), which keeps common process noise from being
//! double counted. Each IMM model fuses independently; the mode
//! probabilities then mix through the first-order generalized
//! pseudo-Bayesian estimator.

use crate::filter::info::propagate_vertical;
use crate::filter::propagate::{propagate_straight, propagate_turning};
use crate::filter::update::LIKELIHOOD_FLOOR;
use crate::filter::FilterError;
use crate::linalg::{invert_2x2, symmetrize, try_invert};
use crate::measurement::NonlocalUpdateFlag;
use crate::params::MttParameters;
use crate::time::Epoch;
use crate::track::{ActiveTrack, ActiveTrackData};
use nalgebra::{Matrix2, Matrix4, Matrix6, Vector2, Vector4, Vector6};
use std::f64::consts::PI;

/// Mode probabilities never drop below this floor.
pub const MODE_PROBABILITY_FLOOR: f64 = 1.0e-10;

/// Gaussian likelihood of the position part of a fusion innovation,
/// clamped exactly like the measurement-update likelihood.
fn fusion_likelihood(sxy: &Matrix2<f64>, delz_xy: &Vector2<f64>) -> f64 {
    let det = sxy[(0, 0)] * sxy[(1, 1)] - sxy[(0, 1)] * sxy[(1, 0)];
    let dist = match invert_2x2(sxy) {
        Ok(s_inv) => (delz_xy.transpose() * s_inv * delz_xy)[0],
        Err(_) => return LIKELIHOOD_FLOOR,
    };
    if det >= 0.0 && dist <= 50.0 {
        ((1.0 / (2.0 * PI * det.sqrt())) * (-0.5 * dist).exp()).max(LIKELIHOOD_FLOOR)
    } else {
        LIKELIHOOD_FLOOR
    }
}

/// Fuses the external 4-state snapshot into the local straight-flight model.
/// Returns the innovation likelihood; on a singular intermediate the local
/// model keeps its propagated prediction and the caller sees the error.
pub fn fuse_straight(
    params: &MttParameters,
    dt: f64,
    x: &mut Vector4<f64>,
    p: &mut Matrix4<f64>,
    x_ext: &Vector4<f64>,
    p_ext: &Matrix4<f64>,
    p_ext_prev: &Matrix4<f64>,
) -> Result<f64, FilterError> {
    let mut p_pred = *p;
    let mut x_pred = *x;
    propagate_straight(
        dt,
        &mut p_pred,
        &mut x_pred,
        params.straight_flight_x_acceleration,
        params.straight_flight_y_acceleration,
    );
    *p = p_pred;
    *x = x_pred;

    let delz = x_ext - x_pred;
    let s = p_ext + p_pred;
    let sxy = s.fixed_view::<2, 2>(0, 0).into_owned();
    let delz_xy = delz.fixed_view::<2, 1>(0, 0).into_owned();
    let likelihood = fusion_likelihood(&sxy, &delz_xy);

    // Information-form covariance fusion.
    let mut y_local = try_invert(&p_pred)?;
    symmetrize(&mut y_local);
    let mut y_ext_prev = try_invert(p_ext_prev)?;
    symmetrize(&mut y_ext_prev);
    let mut y_ext = try_invert(p_ext)?;
    symmetrize(&mut y_ext);
    let mut y_new = y_ext - y_ext_prev + y_local;
    symmetrize(&mut y_new);
    let mut p_new = try_invert(&y_new)?;
    symmetrize(&mut p_new);

    // State through the Kalman gain against the full innovation covariance.
    let k = p_pred * try_invert(&s)?;
    *x = x_pred + k * delz;
    *p = p_new;
    Ok(likelihood)
}

/// Fuses the external 6-state snapshot into the local turning-flight model.
pub fn fuse_turning(
    params: &MttParameters,
    dt: f64,
    x: &mut Vector6<f64>,
    p: &mut Matrix6<f64>,
    x_ext: &Vector6<f64>,
    p_ext: &Matrix6<f64>,
    p_ext_prev: &Matrix6<f64>,
) -> Result<f64, FilterError> {
    let mut p_pred = *p;
    let mut x_pred = *x;
    propagate_turning(
        dt,
        &mut p_pred,
        &mut x_pred,
        params.turning_flight_x_acceleration,
        params.turning_flight_y_acceleration,
    );
    *p = p_pred;
    *x = x_pred;

    let delz = x_ext - x_pred;
    let s = p_ext + p_pred;
    let sxy = s.fixed_view::<2, 2>(0, 0).into_owned();
    let delz_xy = delz.fixed_view::<2, 1>(0, 0).into_owned();
    let likelihood = fusion_likelihood(&sxy, &delz_xy);

    let mut y_local = try_invert(&p_pred)?;
    symmetrize(&mut y_local);
    let mut y_ext_prev = try_invert(p_ext_prev)?;
    symmetrize(&mut y_ext_prev);
    let mut y_ext = try_invert(p_ext)?;
    symmetrize(&mut y_ext);
    let mut y_new = y_ext - y_ext_prev + y_local;
    symmetrize(&mut y_new);
    let mut p_new = try_invert(&y_new)?;
    symmetrize(&mut p_new);

    let k = p_pred * try_invert(&s)?;
    *x = x_pred + k * delz;
    *p = p_new;
    Ok(likelihood)
}

/// The IMM combination: updates the mode probabilities from the two model
/// likelihoods through the mode transition matrix, then mixes the
/// zero-padded straight state with the turning state, spreading each model's
/// covariance by its distance from the mixture.
#[allow(clippy::too_many_arguments)]
pub fn imm_blend(
    params: &MttParameters,
    likelihood_straight: f64,
    likelihood_turning: f64,
    mode_straight: &mut f64,
    mode_turning: &mut f64,
    x_straight: &Vector4<f64>,
    p_straight: &Matrix4<f64>,
    x_turning: &Vector6<f64>,
    p_turning: &Matrix6<f64>,
    x_out: &mut Vector6<f64>,
    p_out: &mut Matrix6<f64>,
) {
    let mtp = params.mode_transition_matrix();
    let mu_s = *mode_straight;
    let mu_t = *mode_turning;

    let into_straight = mtp[(0, 0)] * mu_s + mtp[(1, 0)] * mu_t;
    let into_turning = mtp[(0, 1)] * mu_s + mtp[(1, 1)] * mu_t;
    let c = likelihood_straight * into_straight + likelihood_turning * into_turning;

    *mode_straight = (likelihood_straight / c) * into_straight;
    *mode_turning = (likelihood_turning / c) * into_turning;
    normalize_mode_probabilities(mode_straight, mode_turning);

    let mut x_straight6 = Vector6::zeros();
    x_straight6.fixed_view_mut::<4, 1>(0, 0).copy_from(x_straight);
    let mut p_straight6 = Matrix6::zeros();
    p_straight6
        .fixed_view_mut::<4, 4>(0, 0)
        .copy_from(p_straight);

    *x_out = *mode_straight * x_straight6 + *mode_turning * x_turning;

    let d_straight = *x_out - x_straight6;
    let d_turning = *x_out - x_turning;
    let spread_straight = p_straight6 + d_straight * d_straight.transpose();
    let spread_turning = p_turning + d_turning * d_turning.transpose();
    *p_out = *mode_straight * spread_straight + *mode_turning * spread_turning;
    symmetrize(p_out);
}

/// Fuses a correlated nonlocal track (expanded to the temporary active form
/// and propagated to the evaluation time during correlation) into the local
/// active track.
///
/// Horizontal fusion runs only for 2D/3D inputs; a height-finder input just
/// propagates the horizontal filters. Vertical data (height-finder or 3D)
/// fuses additively in information form, or replaces the local vertical
/// filter outright when the local channel is dormant.
pub fn fuse_nonlocal_track(
    params: &MttParameters,
    track: &mut ActiveTrack,
    temp: &ActiveTrackData,
    update_flag: NonlocalUpdateFlag,
    time: Epoch,
    dt: f64,
) {
    let vertical_was_active = track.vertical_channel_active;
    let data = &mut track.data;

    if vertical_was_active {
        let _ = propagate_vertical(
            dt,
            params.vertical_velocity,
            params.vertical_velocity_decorrelation_time,
            &mut data.vertical_info_matrix,
            &mut data.vertical_info_state,
        );
    }

    if update_flag.has_horizontal() {
        // Snapshot the pre-fusion state, propagated forward, so the next
        // fusion can subtract what this sender already contributed.
        data.previous_state = data.state;
        data.previous_covariance = data.covariance;
        propagate_turning(
            dt,
            &mut data.previous_covariance,
            &mut data.previous_state,
            params.turning_flight_x_acceleration,
            params.turning_flight_y_acceleration,
        );

        let mut x4 = data.state.fixed_view::<4, 1>(0, 0).into_owned();
        let mut p4 = data.covariance.fixed_view::<4, 4>(0, 0).into_owned();
        let x_ext4 = temp.state.fixed_view::<4, 1>(0, 0).into_owned();
        let p_ext4 = temp.covariance.fixed_view::<4, 4>(0, 0).into_owned();
        let p_ext_prev4 = temp.previous_covariance.fixed_view::<4, 4>(0, 0).into_owned();
        let likelihood_straight =
            fuse_straight(params, dt, &mut x4, &mut p4, &x_ext4, &p_ext4, &p_ext_prev4)
                .unwrap_or(LIKELIHOOD_FLOOR);

        let mut x6 = data.state;
        let mut p6 = data.covariance;
        let likelihood_turning = fuse_turning(
            params,
            dt,
            &mut x6,
            &mut p6,
            &temp.state,
            &temp.covariance,
            &temp.previous_covariance,
        )
        .unwrap_or(LIKELIHOOD_FLOOR);

        imm_blend(
            params,
            likelihood_straight,
            likelihood_turning,
            &mut data.straight_mode_probability,
            &mut data.turning_mode_probability,
            &x4,
            &p4,
            &x6,
            &p6,
            &mut data.state,
            &mut data.covariance,
        );
    } else {
        // Height-only input: no horizontal information, just advance both
        // horizontal snapshots to the current time.
        propagate_turning(
            dt,
            &mut data.previous_covariance,
            &mut data.previous_state,
            params.turning_flight_x_acceleration,
            params.turning_flight_y_acceleration,
        );
        propagate_turning(
            dt,
            &mut data.covariance,
            &mut data.state,
            params.turning_flight_x_acceleration,
            params.turning_flight_y_acceleration,
        );
    }

    if update_flag.has_vertical() {
        if vertical_was_active {
            data.vertical_info_matrix += temp.vertical_info_matrix;
            symmetrize(&mut data.vertical_info_matrix);
            data.vertical_info_state += temp.vertical_info_state;
        } else {
            data.vertical_info_matrix = temp.vertical_info_matrix;
            data.vertical_info_state = temp.vertical_info_state;
            track.vertical_channel_active = true;
        }
        track.vertical_update_time = time;
    }
}

/// Clamps both mode probabilities to the floor and renormalizes their sum
/// to one.
pub fn normalize_mode_probabilities(mode_straight: &mut f64, mode_turning: &mut f64) {
    let s = mode_straight.max(MODE_PROBABILITY_FLOOR);
    let t = mode_turning.max(MODE_PROBABILITY_FLOOR);
    let sum = s + t;
    *mode_straight = s / sum;
    *mode_turning = t / sum;
}

//! Projection of an active track into the report form consumed by the
//! enclosing track manager.

use crate::linalg::{invert_2x2, symmetrize};
use crate::time::Epoch;
use crate::track::{ActiveTrack, TrackId};
use nalgebra::{Matrix2, Matrix6, Vector3};

/// Variance planted on the vertical position diagonal when the vertical
/// channel is inactive.
const UNKNOWN_ALTITUDE_VARIANCE: f64 = 1.0e12;
/// Same, vertical velocity.
const UNKNOWN_CLIMB_VARIANCE: f64 = 1.0e6;

/// Supplies the transforms from the tracker's locally flat east-north-up
/// frame to world coordinates. The enclosing simulator owns the reference
/// latitude/longitude/altitude and the actual ellipsoid math.
pub trait ReferencePoint {
    /// Converts an ENU position (meters from the reference point) to a
    /// world-coordinate position.
    fn enu_to_wcs_position(&self, enu: &Vector3<f64>) -> Vector3<f64>;
    /// Converts an ENU direction vector (e.g. a velocity) to world
    /// coordinates.
    fn enu_to_wcs_vector(&self, enu: &Vector3<f64>) -> Vector3<f64>;
}

/// An active track rendered for the local track store: world-frame
/// kinematics, a full 6x6 ENU covariance over (e, n, u, ve, vn, vu), and the
/// auxiliary data another tracker needs to fuse this track losslessly.
#[derive(Debug, Clone)]
pub struct LocalTrackReport {
    pub time: Epoch,
    pub track_id: TrackId,
    pub location_wcs: Vector3<f64>,
    pub velocity_wcs: Vector3<f64>,
    /// True when the vertical channel contributed a real altitude.
    pub is_3d: bool,
    pub covariance_enu: Matrix6<f64>,
    pub east_acceleration: f64,
    pub north_acceleration: f64,
    /// The horizontal matrix exactly as the filter carries it, for
    /// downstream trackers that re-ingest this report as a nonlocal track.
    pub horizontal_matrix: Matrix6<f64>,
    /// Vertical covariance when the channel is active.
    pub vertical_covariance: Option<Matrix2<f64>>,
}

/// State index (x, y, vx, vy) -> ENU covariance index (e, n, u, ve, vn, vu).
const ENU_INDEX: [usize; 4] = [0, 1, 3, 4];

/// Renders an active track as a [`LocalTrackReport`].
pub fn local_track_report(
    track: &ActiveTrack,
    time: Epoch,
    reference: &dyn ReferencePoint,
) -> LocalTrackReport {
    let data = &track.data;

    let mut is_3d = track.vertical_channel_active;
    let mut altitude = 0.0;
    let mut climb = 0.0;
    let mut vertical_covariance = None;
    if is_3d {
        // The active flag can outrun the filter when 2D and 3D sources mix;
        // fall back to a 2D report if the matrix will not invert.
        match invert_2x2(&data.vertical_info_matrix) {
            Ok(pv) => {
                let xv = pv * data.vertical_info_state;
                altitude = xv[0];
                climb = xv[1];
                vertical_covariance = Some(pv);
            }
            Err(_) => {
                is_3d = false;
            }
        }
    }

    let location_enu = Vector3::new(data.state[0], data.state[1], altitude);
    let velocity_enu = Vector3::new(data.state[2], data.state[3], climb);

    let mut covariance_enu = Matrix6::zeros();
    for (si, &ei) in ENU_INDEX.iter().enumerate() {
        for (sj, &ej) in ENU_INDEX.iter().enumerate() {
            covariance_enu[(ei, ej)] = data.covariance[(si, sj)];
        }
    }
    match vertical_covariance {
        Some(pv) => {
            covariance_enu[(2, 2)] = pv[(0, 0)];
            covariance_enu[(2, 5)] = pv[(0, 1)];
            covariance_enu[(5, 2)] = pv[(1, 0)];
            covariance_enu[(5, 5)] = pv[(1, 1)];
        }
        None => {
            covariance_enu[(2, 2)] = UNKNOWN_ALTITUDE_VARIANCE;
            covariance_enu[(5, 5)] = UNKNOWN_CLIMB_VARIANCE;
        }
    }
    symmetrize(&mut covariance_enu);

    LocalTrackReport {
        time,
        track_id: track.id,
        location_wcs: reference.enu_to_wcs_position(&location_enu),
        velocity_wcs: reference.enu_to_wcs_vector(&velocity_enu),
        is_3d,
        covariance_enu,
        east_acceleration: data.state[4],
        north_acceleration: data.state[5],
        horizontal_matrix: data.covariance,
        vertical_covariance,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::ActiveTrackData;
    use approx::assert_abs_diff_eq;
    use nalgebra::{Vector2, Vector6};

    /// A degenerate reference point whose world frame IS the ENU frame.
    struct FlatEarth;

    impl ReferencePoint for FlatEarth {
        fn enu_to_wcs_position(&self, enu: &Vector3<f64>) -> Vector3<f64> {
            *enu
        }
        fn enu_to_wcs_vector(&self, enu: &Vector3<f64>) -> Vector3<f64> {
            *enu
        }
    }

    fn sample_track(vertical: bool) -> ActiveTrack {
        let mut track = ActiveTrack::new(5, Epoch::from_tai_seconds(10.0));
        let mut data = ActiveTrackData::default();
        data.state = Vector6::new(1000.0, 2000.0, 100.0, -20.0, 0.5, -0.1);
        data.covariance = Matrix6::from_diagonal(&Vector6::new(
            25.0, 36.0, 4.0, 9.0, 1.0, 1.0,
        ));
        if vertical {
            // Y = diag(0.1, 0.5) -> P = diag(10, 2); x = (3000, 5).
            data.vertical_info_matrix = Matrix2::new(0.1, 0.0, 0.0, 0.5);
            data.vertical_info_state = data.vertical_info_matrix * Vector2::new(3000.0, 5.0);
            track.vertical_channel_active = true;
        }
        track.data = data;
        track
    }

    #[test]
    fn report_with_vertical_channel() {
        let track = sample_track(true);
        let report = local_track_report(&track, Epoch::from_tai_seconds(10.0), &FlatEarth);
        assert!(report.is_3d);
        assert_abs_diff_eq!(report.location_wcs[0], 1000.0);
        assert_abs_diff_eq!(report.location_wcs[2], 3000.0, epsilon = 1.0e-9);
        assert_abs_diff_eq!(report.velocity_wcs[2], 5.0, epsilon = 1.0e-9);
        // ENU ordering: east/north variances first, altitude third.
        assert_abs_diff_eq!(report.covariance_enu[(0, 0)], 25.0);
        assert_abs_diff_eq!(report.covariance_enu[(1, 1)], 36.0);
        assert_abs_diff_eq!(report.covariance_enu[(2, 2)], 10.0, epsilon = 1.0e-9);
        assert_abs_diff_eq!(report.covariance_enu[(3, 3)], 4.0);
        assert_abs_diff_eq!(report.covariance_enu[(5, 5)], 2.0, epsilon = 1.0e-9);
        assert_abs_diff_eq!(report.east_acceleration, 0.5);
    }

    #[test]
    fn report_without_vertical_channel_inflates_the_unknowns() {
        let track = sample_track(false);
        let report = local_track_report(&track, Epoch::from_tai_seconds(10.0), &FlatEarth);
        assert!(!report.is_3d);
        assert!(report.vertical_covariance.is_none());
        assert_abs_diff_eq!(report.location_wcs[2], 0.0);
        assert_abs_diff_eq!(report.covariance_enu[(2, 2)], 1.0e12);
        assert_abs_diff_eq!(report.covariance_enu[(5, 5)], 1.0e6);
    }
}

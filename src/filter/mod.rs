//! The filter layer: closed-form propagation, information-form updates, and
//! per-model measurement updates shared by every stage of the track
//! lifecycle.

use crate::linalg::invert_2x2;
use crate::measurement::{DataAvailability, RadarData};
use nalgebra::{Matrix2, Vector2, Vector3};
use std::fmt;

pub mod info;
pub mod propagate;
pub mod update;

/// Expected numerical failures inside a filter step. These are per-tick
/// decisions: the caller skips the offending sub-step, keeps the prior state,
/// and retries on the next update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterError {
    /// A matrix inversion hit a pivot below tolerance.
    SingularMatrix,
    /// The process noise matrix could not be inverted during an
    /// information-form propagation; the whole step is abandoned.
    SingularProcessNoise,
}

impl fmt::Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FilterError::SingularMatrix => write!(f, "matrix is singular to working precision"),
            FilterError::SingularProcessNoise => {
                write!(f, "process noise matrix is singular, propagation abandoned")
            }
        }
    }
}

/// Which range variance the caller wants: the gate queries inflate the range
/// term to keep marginal detections inside the ellipse, while measurement
/// updates use the sensor's reported sigma directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RangeVariance {
    Update,
    Gate,
}

/// A radar measurement resolved into the tracker's inertial frame: ground
/// range, east/north offsets from the sensor, and the rotated measurement
/// covariance of those offsets.
#[derive(Debug, Clone)]
pub(crate) struct RadarGeometry {
    pub range: f64,
    pub dx: f64,
    pub dy: f64,
    pub r: Matrix2<f64>,
    pub sensor: Vector3<f64>,
}

/// The rotation that aligns the (range, cross-range) measurement frame with
/// the inertial axes. Orthonormal, so its transpose undoes it.
pub fn rotation_to_inertial(dx: f64, dy: f64, range: f64) -> Matrix2<f64> {
    let a11 = dx / range;
    let a12 = dy / range;
    Matrix2::new(a11, -a12, a12, a11)
}

/// Resolves the measured slant range into ground range and the rotated
/// covariance of the east/north offsets.
///
/// With elevation available the ground range is `slant * cos(el)`. Without
/// it, a running vertical channel supplies a filtered altitude and the ground
/// range follows from Pythagoras; when even that fails, the slant range is
/// used as-is for an update, while a gate query gives up on the measurement
/// (`None`).
pub(crate) fn radar_geometry(
    radar: &RadarData,
    available: DataAvailability,
    vertical: Option<(&Matrix2<f64>, &Vector2<f64>)>,
    variance: RangeVariance,
) -> Option<RadarGeometry> {
    let slant = radar.range;
    let sensor = radar.sensor_location;

    let mut range = slant;
    if available.has_elevation() {
        range = slant * radar.elevation.cos();
    } else if let Some((vert_info, vert_state)) = vertical {
        // Estimate the ground range from the filtered altitude. A
        // non-invertible vertical filter is ignored.
        if let Ok(pv) = invert_2x2(vert_info) {
            let altitude = (pv * vert_state)[0];
            let offset = altitude - sensor[2];
            let discrm = slant * slant - offset * offset;
            if discrm > 0.0 {
                range = discrm.sqrt();
            } else if variance == RangeVariance::Gate {
                return None;
            }
        }
    }

    let dx = range * radar.azimuth.cos();
    let dy = range * radar.azimuth.sin();

    let range_var = match variance {
        RangeVariance::Update => radar.range_std_dev * radar.range_std_dev,
        RangeVariance::Gate => {
            let widened =
                radar.range_std_dev + range / (radar.azimuth_std_dev * 10.0).cos() - range;
            widened * widened
        }
    };
    let cross_var = range * range * radar.azimuth_std_dev * radar.azimuth_std_dev;
    let r0 = Matrix2::new(range_var, 0.0, 0.0, cross_var);

    let b = rotation_to_inertial(dx, dy, range);
    let mut r = b * r0 * b.transpose();
    crate::linalg::symmetrize(&mut r);

    Some(RadarGeometry {
        range,
        dx,
        dy,
        r,
        sensor,
    })
}

/// The vertical (z-axis) part of a radar measurement: the inverse measurement
/// variance matrix and the height offset above the sensor. Requires both
/// range and elevation.
pub(crate) fn vertical_measurement(
    radar: &RadarData,
    available: DataAvailability,
) -> Option<(Matrix2<f64>, f64)> {
    if !(available.has_range() && available.has_elevation()) {
        return None;
    }
    let sin_el = radar.elevation.sin();
    let mut var_z = sin_el * sin_el * radar.range_std_dev * radar.range_std_dev;
    var_z += radar.range * radar.range * radar.elevation_std_dev * radar.elevation_std_dev;
    let r_inv = Matrix2::new(1.0 / var_z, 0.0, 0.0, 0.0);
    Some((r_inv, radar.range * sin_el))
}

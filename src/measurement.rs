use crate::time::Epoch;
use nalgebra::{Matrix2, Matrix6, Vector3, Vector6};
use std::fmt;

/// Validity bitfield of a radar measurement. A bit is set when the sensor
/// actually produced the corresponding quantity this scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DataAvailability(u32);

impl DataAvailability {
    pub const RANGE: u32 = 1;
    pub const AZIMUTH: u32 = 1 << 1;
    pub const ELEVATION: u32 = 1 << 2;
    pub const RANGE_RATE: u32 = 1 << 3;
    pub const SENSOR_LOCATION: u32 = 1 << 4;
    pub const SENSOR_VELOCITY: u32 = 1 << 5;

    pub fn new(bits: u32) -> Self {
        Self(bits)
    }

    /// Range, azimuth, elevation and sensor location: what a 3D surveillance
    /// radar reports every scan.
    pub fn radar_3d() -> Self {
        Self(Self::RANGE | Self::AZIMUTH | Self::ELEVATION | Self::SENSOR_LOCATION)
    }

    /// Range, azimuth and sensor location only (no height information).
    pub fn radar_2d() -> Self {
        Self(Self::RANGE | Self::AZIMUTH | Self::SENSOR_LOCATION)
    }

    pub fn with(self, bits: u32) -> Self {
        Self(self.0 | bits)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn has_range(&self) -> bool {
        self.0 & Self::RANGE != 0
    }

    pub fn has_azimuth(&self) -> bool {
        self.0 & Self::AZIMUTH != 0
    }

    pub fn has_elevation(&self) -> bool {
        self.0 & Self::ELEVATION != 0
    }

    pub fn has_range_rate(&self) -> bool {
        self.0 & Self::RANGE_RATE != 0
    }

    pub fn has_sensor_location(&self) -> bool {
        self.0 & Self::SENSOR_LOCATION != 0
    }

    pub fn has_sensor_velocity(&self) -> bool {
        self.0 & Self::SENSOR_VELOCITY != 0
    }
}

/// Raw radar observables with their one-sigma errors, in a locally flat
/// east-north-up frame centered on the scenario reference point. Azimuth is
/// measured counterclockwise from east; range is the slant range.
#[derive(Debug, Clone)]
pub struct RadarData {
    pub range: f64,
    pub azimuth: f64,
    pub elevation: f64,
    pub range_rate: f64,
    pub range_std_dev: f64,
    pub azimuth_std_dev: f64,
    pub elevation_std_dev: f64,
    pub range_rate_std_dev: f64,
    pub sensor_location: Vector3<f64>,
    pub sensor_velocity: Vector3<f64>,
    pub signal_to_noise: f64,
}

impl Default for RadarData {
    fn default() -> Self {
        Self {
            range: 0.0,
            azimuth: 0.0,
            elevation: 0.0,
            range_rate: 0.0,
            range_std_dev: 0.0,
            azimuth_std_dev: 0.0,
            elevation_std_dev: 0.0,
            range_rate_std_dev: 0.0,
            sensor_location: Vector3::zeros(),
            sensor_velocity: Vector3::zeros(),
            signal_to_noise: 0.0,
        }
    }
}

/// The measured payload. Radar is the only source today; the enum leaves the
/// dispatch point explicit for future sensor kinds.
#[derive(Debug, Clone)]
pub enum MeasurementData {
    Radar(RadarData),
}

/// A single sensor report together with its availability bits.
#[derive(Debug, Clone)]
pub struct Measurement {
    pub available: DataAvailability,
    pub data: MeasurementData,
}

impl Measurement {
    pub fn radar(available: DataAvailability, data: RadarData) -> Self {
        Self {
            available,
            data: MeasurementData::Radar(data),
        }
    }

    /// The radar payload of this measurement.
    pub fn radar_data(&self) -> &RadarData {
        match &self.data {
            MeasurementData::Radar(d) => d,
        }
    }
}

/// 1 = height finder, 2 = 2D, 3 = 3D. Controls which channels of a nonlocal
/// track take part in fusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonlocalUpdateFlag {
    HeightFinder,
    TwoDimensional,
    ThreeDimensional,
}

impl NonlocalUpdateFlag {
    /// The track carries usable horizontal data.
    pub fn has_horizontal(&self) -> bool {
        matches!(self, Self::TwoDimensional | Self::ThreeDimensional)
    }

    /// The track carries usable vertical data.
    pub fn has_vertical(&self) -> bool {
        matches!(self, Self::HeightFinder | Self::ThreeDimensional)
    }
}

impl fmt::Display for NonlocalUpdateFlag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::HeightFinder => write!(f, "height finder"),
            Self::TwoDimensional => write!(f, "2D"),
            Self::ThreeDimensional => write!(f, "3D"),
        }
    }
}

/// Filter snapshot embedded in a nonlocal track. The 6-state vector is
/// ordered (x, y, vx, vy, z, vz); the two-steps-of-history layout feeds the
/// centralized Kalman fusion, which needs the contribution the sender already
/// folded in since its previous report.
#[derive(Debug, Clone)]
pub struct NonlocalTrackFilter {
    pub update_time: Epoch,
    pub state: Vector6<f64>,
    pub covariance: Matrix6<f64>,
    pub last_vertical_update_time: Epoch,
    pub x_acceleration: f64,
    pub y_acceleration: f64,
    pub vertical_info_matrix: Matrix2<f64>,
    pub previous_update_time: Epoch,
    pub previous_state: Vector6<f64>,
    pub previous_covariance: Matrix6<f64>,
}

impl Default for NonlocalTrackFilter {
    fn default() -> Self {
        Self {
            update_time: Epoch::from_tai_seconds(0.0),
            state: Vector6::zeros(),
            covariance: Matrix6::zeros(),
            last_vertical_update_time: Epoch::from_tai_seconds(0.0),
            x_acceleration: 0.0,
            y_acceleration: 0.0,
            vertical_info_matrix: Matrix2::zeros(),
            previous_update_time: Epoch::from_tai_seconds(0.0),
            previous_state: Vector6::zeros(),
            previous_covariance: Matrix6::zeros(),
        }
    }
}

/// An externally originated (combined) track offered to this tracker for
/// track-to-track correlation and fusion.
#[derive(Debug, Clone)]
pub struct NonlocalTrack {
    pub filter: NonlocalTrackFilter,
    pub has_vertical_data: bool,
    pub update_flag: NonlocalUpdateFlag,
}

/// The dispatcher input: exactly one of a measurement or a nonlocal track.
///
/// `track_number` is nonzero only for height-finder measurements addressed to
/// a specific active track. The tracker clears it when the addressed track no
/// longer exists or a source-matching rule rejects the correlation.
#[derive(Debug, Clone, Default)]
pub struct PerceivedCluster {
    pub measurement: Option<Measurement>,
    pub nonlocal_track: Option<NonlocalTrack>,
    pub track_number: u32,
    pub last_originator_id: u32,
    pub last_sensor_id: u32,
    pub consecutive_single_source_hits: u32,
}

impl PerceivedCluster {
    pub fn from_measurement(measurement: Measurement) -> Self {
        Self {
            measurement: Some(measurement),
            ..Default::default()
        }
    }

    pub fn from_nonlocal_track(track: NonlocalTrack) -> Self {
        Self {
            nonlocal_track: Some(track),
            ..Default::default()
        }
    }

    /// A height-finder report addressed at an active track.
    pub fn height_finder(measurement: Measurement, track_number: u32) -> Self {
        Self {
            measurement: Some(measurement),
            track_number,
            ..Default::default()
        }
    }
}

//! Measurement devices: concrete producers of the perceived clusters the
//! tracker consumes.

use crate::measurement::{DataAvailability, Measurement, PerceivedCluster, RadarData};
use crate::time::Epoch;
use nalgebra::Vector3;
use rand::Rng;
use rand_distr::{Distribution, Normal};

/// Delivers (sim-time, cluster) pairs to a tracker. The enclosing simulator
/// implements this over its sensor chain; [`RadarSite`] is a self-contained
/// implementation detail for building one from truth states.
pub trait MeasurementSource {
    fn next_cluster(&mut self) -> Option<(Epoch, PerceivedCluster)>;
}

/// A fixed radar site measuring range, azimuth, elevation and range rate of
/// a truth state, with additive Gaussian noise per quantity.
///
/// Positions are in the tracker's locally flat east-north-up frame; azimuth
/// is counterclockwise from east.
#[derive(Debug, Clone)]
pub struct RadarSite {
    pub name: String,
    pub location: Vector3<f64>,
    pub velocity: Vector3<f64>,
    range_std_dev: f64,
    azimuth_std_dev: f64,
    elevation_std_dev: f64,
    range_rate_std_dev: f64,
    range_noise: Normal<f64>,
    azimuth_noise: Normal<f64>,
    elevation_noise: Normal<f64>,
    range_rate_noise: Normal<f64>,
}

impl RadarSite {
    /// Initializes a radar site from its one-sigma measurement errors.
    pub fn from_noise_values(
        name: &str,
        location: Vector3<f64>,
        range_std_dev: f64,
        azimuth_std_dev: f64,
        elevation_std_dev: f64,
        range_rate_std_dev: f64,
    ) -> Self {
        Self {
            name: name.to_string(),
            location,
            velocity: Vector3::zeros(),
            range_std_dev,
            azimuth_std_dev,
            elevation_std_dev,
            range_rate_std_dev,
            range_noise: Normal::new(0.0, range_std_dev).unwrap(),
            azimuth_noise: Normal::new(0.0, azimuth_std_dev).unwrap(),
            elevation_noise: Normal::new(0.0, elevation_std_dev).unwrap(),
            range_rate_noise: Normal::new(0.0, range_rate_std_dev).unwrap(),
        }
    }

    /// A site whose reported sigmas are kept but whose samples carry no
    /// noise; useful for regression scenarios.
    pub fn noiseless(
        name: &str,
        location: Vector3<f64>,
        range_std_dev: f64,
        azimuth_std_dev: f64,
        elevation_std_dev: f64,
        range_rate_std_dev: f64,
    ) -> Self {
        Self {
            name: name.to_string(),
            location,
            velocity: Vector3::zeros(),
            range_std_dev,
            azimuth_std_dev,
            elevation_std_dev,
            range_rate_std_dev,
            range_noise: Normal::new(0.0, 0.0).unwrap(),
            azimuth_noise: Normal::new(0.0, 0.0).unwrap(),
            elevation_noise: Normal::new(0.0, 0.0).unwrap(),
            range_rate_noise: Normal::new(0.0, 0.0).unwrap(),
        }
    }

    /// Measures a truth position and velocity: slant range, azimuth
    /// (counterclockwise from east), elevation, and the closing range rate,
    /// each perturbed by its noise distribution.
    pub fn measure<R: Rng>(
        &self,
        target: &Vector3<f64>,
        target_velocity: &Vector3<f64>,
        rng: &mut R,
    ) -> Measurement {
        let rel = target - self.location;
        let slant = rel.norm();
        let ground = (rel[0] * rel[0] + rel[1] * rel[1]).sqrt();
        let azimuth = rel[1].atan2(rel[0]);
        let elevation = rel[2].atan2(ground);
        let rel_vel = target_velocity - self.velocity;
        let range_rate = rel.dot(&rel_vel) / slant;

        let available = DataAvailability::radar_3d()
            .with(DataAvailability::RANGE_RATE)
            .with(DataAvailability::SENSOR_VELOCITY);

        Measurement::radar(
            available,
            RadarData {
                range: slant + self.range_noise.sample(rng),
                azimuth: azimuth + self.azimuth_noise.sample(rng),
                elevation: elevation + self.elevation_noise.sample(rng),
                range_rate: range_rate + self.range_rate_noise.sample(rng),
                range_std_dev: self.range_std_dev,
                azimuth_std_dev: self.azimuth_std_dev,
                elevation_std_dev: self.elevation_std_dev,
                range_rate_std_dev: self.range_rate_std_dev,
                sensor_location: self.location,
                sensor_velocity: self.velocity,
                signal_to_noise: 0.0,
            },
        )
    }
}

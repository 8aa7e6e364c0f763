extern crate mtt;
extern crate nalgebra as na;
extern crate pretty_env_logger;
extern crate rand;
extern crate rand_pcg;

use mtt::measurement::{
    DataAvailability, Measurement, NonlocalTrack, NonlocalTrackFilter, NonlocalUpdateFlag,
    PerceivedCluster, RadarData,
};
use mtt::params::MttParameters;
use mtt::time::Epoch;
use mtt::tracker::{CorrelationOutcome, Mtt, TrackObserver};
use na::{Matrix2, Matrix6, Vector6};
use rand::Rng;
use rand_pcg::Pcg64Mcg;
use std::cell::RefCell;
use std::rc::Rc;

fn t(seconds: f64) -> Epoch {
    Epoch::from_tai_seconds(seconds)
}

/// A 3D radar report from a sensor at the origin.
fn radar_cluster(range: f64, azimuth: f64, elevation: f64) -> PerceivedCluster {
    PerceivedCluster::from_measurement(Measurement::radar(
        DataAvailability::radar_3d(),
        RadarData {
            range,
            azimuth,
            elevation,
            range_std_dev: 5.0,
            azimuth_std_dev: 0.001,
            elevation_std_dev: 0.001,
            ..Default::default()
        },
    ))
}

/// A 2D radar report (no elevation) from a sensor at the origin.
fn radar_cluster_2d(range: f64, azimuth: f64) -> PerceivedCluster {
    PerceivedCluster::from_measurement(Measurement::radar(
        DataAvailability::radar_2d(),
        RadarData {
            range,
            azimuth,
            range_std_dev: 5.0,
            azimuth_std_dev: 0.001,
            ..Default::default()
        },
    ))
}

/// A nonlocal track input at the given position/velocity. The vertical
/// filter, when carried, holds the given altitude with tight variances.
fn nonlocal_cluster(
    update_time: Epoch,
    east: f64,
    north: f64,
    veast: f64,
    vnorth: f64,
    altitude: Option<f64>,
    update_flag: NonlocalUpdateFlag,
) -> PerceivedCluster {
    let mut state = Vector6::zeros();
    state[0] = east;
    state[1] = north;
    state[2] = veast;
    state[3] = vnorth;
    state[4] = altitude.unwrap_or(0.0);

    let covariance = Matrix6::from_diagonal(&Vector6::new(
        100.0, 100.0, 25.0, 25.0, 1.0, 1.0,
    ));
    let previous_covariance = Matrix6::from_diagonal(&Vector6::new(
        1.0e6, 1.0e6, 1.0e6, 1.0e6, 1.0e6, 1.0e6,
    ));
    // Altitude variance 100 m^2, climb variance 10 (m/s)^2.
    let vertical_info_matrix = Matrix2::new(1.0 / 100.0, 0.0, 0.0, 1.0 / 10.0);

    PerceivedCluster::from_nonlocal_track(NonlocalTrack {
        filter: NonlocalTrackFilter {
            update_time,
            state,
            covariance,
            vertical_info_matrix,
            previous_covariance,
            ..Default::default()
        },
        has_vertical_data: altitude.is_some(),
        update_flag,
    })
}

#[derive(Default)]
struct EventLog {
    embryonic_initiated: u32,
    embryonic_dropped: u32,
    candidate_initiated: u32,
    candidate_dropped: u32,
    active_initiated: u32,
    active_dropped: u32,
}

struct Recorder(Rc<RefCell<EventLog>>);

impl TrackObserver for Recorder {
    fn embryonic_track_initiated(&mut self, _t: Epoch, _track: &mtt::track::EmbryonicTrack) {
        self.0.borrow_mut().embryonic_initiated += 1;
    }
    fn embryonic_track_dropped(&mut self, _t: Epoch, _track: &mtt::track::EmbryonicTrack) {
        self.0.borrow_mut().embryonic_dropped += 1;
    }
    fn candidate_track_initiated(
        &mut self,
        _t: Epoch,
        _track: &mtt::track::CandidateTrack,
        _source: &mtt::track::EmbryonicTrack,
    ) {
        self.0.borrow_mut().candidate_initiated += 1;
    }
    fn candidate_track_dropped(&mut self, _t: Epoch, _track: &mtt::track::CandidateTrack) {
        self.0.borrow_mut().candidate_dropped += 1;
    }
    fn active_track_initiated(
        &mut self,
        _t: Epoch,
        _track: &mtt::track::ActiveTrack,
        _source: Option<&mtt::track::CandidateTrack>,
    ) {
        self.0.borrow_mut().active_initiated += 1;
    }
    fn active_track_dropped(&mut self, _t: Epoch, _track: &mtt::track::ActiveTrack) {
        self.0.borrow_mut().active_dropped += 1;
    }
}

#[test]
fn single_target_straight_flight() {
    let _ = pretty_env_logger::try_init();
    let mut tracker = Mtt::new(MttParameters::default()).with_name("straight");
    let log = Rc::new(RefCell::new(EventLog::default()));
    tracker.add_observer(Box::new(Recorder(log.clone())));

    // Constant radial speed of 100 m/s along azimuth 0.1 rad, elevation
    // 0.05 rad, five scans one second apart.
    for k in 0..5 {
        let range = 1000.0 + 100.0 * k as f64;
        let mut cluster = radar_cluster(range, 0.1, 0.05);
        tracker.update(t(k as f64), &mut cluster);
    }

    let tracks = tracker.tracks();
    assert_eq!(tracks.active.len(), 1, "exactly one active track expected");
    assert!(tracks.candidate.len() <= 1, "at most one candidate leftover");

    let active = tracks.active.get(0);
    assert!(active.vertical_channel_active);

    // The estimated east velocity tracks the ground-projected radial rate.
    let expected_vx = 100.0 * 0.1f64.cos() * 0.05f64.cos();
    let vx = active.data.state[2];
    assert!(
        (vx - expected_vx).abs() / expected_vx < 0.2,
        "vx = {} expected about {}",
        vx,
        expected_vx
    );

    // Mode probabilities stay a proper distribution.
    let mu_s = active.data.straight_mode_probability;
    let mu_t = active.data.turning_mode_probability;
    assert!(mu_s >= 1.0e-10 && mu_s <= 1.0);
    assert!(mu_t >= 1.0e-10 && mu_t <= 1.0);
    assert!((mu_s + mu_t - 1.0).abs() < 1.0e-9);

    // The covariance stays symmetric through every update.
    let p = active.data.covariance;
    assert!((p - p.transpose()).norm() < 1.0e-9 * p.norm().max(1.0));

    // One active initiation, from a candidate that was then dropped.
    let log = log.borrow();
    assert_eq!(log.active_initiated, 1);
    assert_eq!(log.candidate_dropped, 1);
    assert!(log.candidate_initiated >= 1);
    assert!(log.embryonic_initiated >= 1);
}

#[test]
fn clutter_produces_no_active_tracks() {
    let mut params = MttParameters::default();
    params.m2t_false_reject_probability = 1.0e-30;
    let mut tracker = Mtt::new(params).with_name("clutter");

    // 20 detections scattered uniformly in a 10 km box over 10 seconds.
    let mut rng = Pcg64Mcg::new(0xcafe_f00d_d15e_a5e5);
    for k in 0..20 {
        let east: f64 = rng.gen_range(-5000.0..5000.0);
        let north: f64 = rng.gen_range(-5000.0..5000.0);
        let range = (east * east + north * north).sqrt();
        let azimuth = north.atan2(east);
        let mut cluster = radar_cluster_2d(range, azimuth);
        tracker.update(t(0.5 * k as f64), &mut cluster);
        assert!(
            tracker.tracks().active.is_empty(),
            "clutter must never promote to an active track"
        );
    }
}

#[test]
fn track_to_track_correlation_through_the_cylinder() {
    let mut params = MttParameters::default();
    params.track_correlation_cylinder_diameter = 2000.0;
    params.track_correlation_cylinder_height = 500.0;
    let mut tracker = Mtt::new(params).with_name("cylinder");

    // First nonlocal track starts a new active track at the origin,
    // 1000 m up.
    let mut first = nonlocal_cluster(
        t(0.0),
        0.0,
        0.0,
        50.0,
        0.0,
        Some(1000.0),
        NonlocalUpdateFlag::ThreeDimensional,
    );
    let outcome = tracker.update(t(0.0), &mut first);
    let first_id = match outcome {
        CorrelationOutcome::ActiveTrackStarted(id) => id,
        other => panic!("expected a new active track, got {:?}", other),
    };
    assert!(tracker.tracks().active.find(first_id).unwrap().vertical_channel_active);

    // Second input at (500, 500, 1200): inside the 1000 m radius and the
    // 250 m half-height, so the cylinder accepts it.
    let mut second = nonlocal_cluster(
        t(1.0),
        500.0,
        500.0,
        50.0,
        0.0,
        Some(1200.0),
        NonlocalUpdateFlag::ThreeDimensional,
    );
    let outcome = tracker.update(t(1.0), &mut second);
    assert_eq!(outcome, CorrelationOutcome::FusionPending(first_id));

    // After fusion, the track position lies strictly between the local
    // prediction and the external input.
    let active = tracker.tracks().active.find(first_id).unwrap();
    assert_eq!(tracker.tracks().active.len(), 1);
    assert!(
        active.data.state[0] > 0.0 && active.data.state[0] < 500.0,
        "east = {}",
        active.data.state[0]
    );
    assert!(
        active.data.state[1] > 0.0 && active.data.state[1] < 500.0,
        "north = {}",
        active.data.state[1]
    );
    let mu_sum = active.data.straight_mode_probability + active.data.turning_mode_probability;
    assert!((mu_sum - 1.0).abs() < 1.0e-9);
}

#[test]
fn cylinder_rejects_an_input_outside_the_height_band() {
    let mut params = MttParameters::default();
    params.track_correlation_cylinder_diameter = 2000.0;
    params.track_correlation_cylinder_height = 500.0;
    let mut tracker = Mtt::new(params);

    let mut first = nonlocal_cluster(
        t(0.0),
        0.0,
        0.0,
        0.0,
        0.0,
        Some(1000.0),
        NonlocalUpdateFlag::ThreeDimensional,
    );
    tracker.update(t(0.0), &mut first);

    // Horizontally inside the cylinder but 800 m above the track.
    let mut second = nonlocal_cluster(
        t(1.0),
        100.0,
        100.0,
        0.0,
        0.0,
        Some(1800.0),
        NonlocalUpdateFlag::ThreeDimensional,
    );
    let outcome = tracker.update(t(1.0), &mut second);
    match outcome {
        CorrelationOutcome::ActiveTrackStarted(_) => {}
        other => panic!("expected a second active track, got {:?}", other),
    }
    assert_eq!(tracker.tracks().active.len(), 2);
}

#[test]
fn vertical_channel_deactivates_after_the_drop_time() {
    let mut params = MttParameters::default();
    params.vertical_channel_drop_time = 5.0;
    params.active_track_drop_time = 100.0;
    let mut tracker = Mtt::new(params);

    let mut first = nonlocal_cluster(
        t(0.0),
        0.0,
        0.0,
        0.0,
        0.0,
        Some(1000.0),
        NonlocalUpdateFlag::ThreeDimensional,
    );
    let id = match tracker.update(t(0.0), &mut first) {
        CorrelationOutcome::ActiveTrackStarted(id) => id,
        other => panic!("unexpected outcome {:?}", other),
    };
    assert!(tracker.tracks().active.find(id).unwrap().vertical_channel_active);

    // Any later tick sweeps the active list; the far-away measurement does
    // not correlate but the stale vertical channel dies on the way.
    let mut probe = radar_cluster(90_000.0, -2.0, 0.0);
    tracker.update(t(6.0), &mut probe);

    let track = tracker.tracks().active.find(id).unwrap();
    assert!(!track.vertical_channel_active);
    assert_eq!(track.data.vertical_info_matrix, Matrix2::zeros());
    assert_eq!(track.data.vertical_info_state, na::Vector2::zeros());
}

#[test]
fn repeated_identical_returns_never_promote_to_active() {
    let mut tracker = Mtt::new(MttParameters::default());

    // Two identical returns ten seconds apart: whatever they seed, nothing
    // reaches active strength.
    for k in 0..2 {
        let mut cluster = radar_cluster(2000.0, 0.3, 0.0);
        tracker.update(t(10.0 * k as f64), &mut cluster);
        assert!(tracker.tracks().active.is_empty());
    }

    // Long after the candidate horizon, an unrelated return sweeps the
    // lists; the stale pair is gone and still nothing active came of it.
    let mut probe = radar_cluster(50_000.0, -2.0, 0.0);
    tracker.update(t(100.0), &mut probe);
    assert!(tracker.tracks().active.is_empty());
    assert!(tracker.tracks().candidate.is_empty());
}

#[test]
fn height_finder_routes_to_the_addressed_track() {
    let mut tracker = Mtt::new(MttParameters::default());

    // A 2D nonlocal track starts an active track with a dormant vertical
    // channel.
    let mut first = nonlocal_cluster(
        t(0.0),
        2000.0,
        1000.0,
        0.0,
        0.0,
        None,
        NonlocalUpdateFlag::TwoDimensional,
    );
    let id = match tracker.update(t(0.0), &mut first) {
        CorrelationOutcome::ActiveTrackStarted(id) => id,
        other => panic!("unexpected outcome {:?}", other),
    };
    assert!(!tracker.tracks().active.find(id).unwrap().vertical_channel_active);

    // Height-finder reports addressed at that track id: slant 3000 m at
    // 0.2 rad elevation.
    for k in 1..=3 {
        let meas = Measurement::radar(
            DataAvailability::radar_3d(),
            RadarData {
                range: 3000.0,
                azimuth: 0.4636,
                elevation: 0.2,
                range_std_dev: 5.0,
                azimuth_std_dev: 0.001,
                elevation_std_dev: 0.001,
                ..Default::default()
            },
        );
        let mut cluster = PerceivedCluster::height_finder(meas, id);
        let outcome = tracker.update(t(k as f64), &mut cluster);
        assert_eq!(outcome, CorrelationOutcome::HeightFinderUpdated(id));
    }

    let track = tracker.tracks().active.find(id).unwrap();
    assert!(track.vertical_channel_active);
    let altitude = track.altitude().expect("vertical filter is invertible");
    let expected = 3000.0 * 0.2f64.sin();
    assert!(
        (altitude - expected).abs() < 5.0,
        "altitude = {} expected about {}",
        altitude,
        expected
    );
}

#[test]
fn height_finder_with_a_dead_track_number_clears_it() {
    let mut tracker = Mtt::new(MttParameters::default());
    let meas = Measurement::radar(
        DataAvailability::radar_3d(),
        RadarData {
            range: 3000.0,
            elevation: 0.2,
            range_std_dev: 5.0,
            azimuth_std_dev: 0.001,
            elevation_std_dev: 0.001,
            ..Default::default()
        },
    );
    let mut cluster = PerceivedCluster::height_finder(meas, 42);
    let outcome = tracker.update(t(0.0), &mut cluster);
    assert_eq!(outcome, CorrelationOutcome::NoCorrelation);
    assert_eq!(cluster.track_number, 0);
}

#[test]
fn tracks_drop_after_their_horizons() {
    let mut tracker = Mtt::new(MttParameters::default());
    let log = Rc::new(RefCell::new(EventLog::default()));
    tracker.add_observer(Box::new(Recorder(log.clone())));

    // Seed an embryonic track, then stay silent past its 30 s horizon.
    let mut cluster = radar_cluster(1000.0, 0.1, 0.05);
    tracker.update(t(0.0), &mut cluster);
    assert_eq!(tracker.tracks().embryonic.len(), 1);

    // The next measurement sweeps the list: the stale embryonic track goes,
    // a fresh one is seeded.
    let mut cluster = radar_cluster(4000.0, -1.0, 0.05);
    tracker.update(t(31.0), &mut cluster);
    assert_eq!(tracker.tracks().embryonic.len(), 1);
    assert_eq!(log.borrow().embryonic_dropped, 1);
    assert_eq!(log.borrow().embryonic_initiated, 2);

    // Same rule for active tracks at their own horizon.
    let mut first = nonlocal_cluster(
        t(40.0),
        0.0,
        0.0,
        0.0,
        0.0,
        None,
        NonlocalUpdateFlag::TwoDimensional,
    );
    tracker.update(t(40.0), &mut first);
    assert_eq!(tracker.tracks().active.len(), 1);

    let mut late = nonlocal_cluster(
        t(150.0),
        50_000.0,
        50_000.0,
        0.0,
        0.0,
        None,
        NonlocalUpdateFlag::TwoDimensional,
    );
    tracker.update(t(150.0), &mut late);
    // The stale track fell; only the new one remains.
    assert_eq!(tracker.tracks().active.len(), 1);
    assert_eq!(log.borrow().active_dropped, 1);
}

#[test]
fn active_track_ids_are_monotonic() {
    let mut tracker = Mtt::new(MttParameters::default());

    let mut first = nonlocal_cluster(
        t(0.0),
        0.0,
        0.0,
        0.0,
        0.0,
        None,
        NonlocalUpdateFlag::TwoDimensional,
    );
    let first_id = match tracker.update(t(0.0), &mut first) {
        CorrelationOutcome::ActiveTrackStarted(id) => id,
        other => panic!("unexpected outcome {:?}", other),
    };

    let mut second = nonlocal_cluster(
        t(1.0),
        60_000.0,
        0.0,
        0.0,
        0.0,
        None,
        NonlocalUpdateFlag::TwoDimensional,
    );
    let second_id = match tracker.update(t(1.0), &mut second) {
        CorrelationOutcome::ActiveTrackStarted(id) => id,
        other => panic!("unexpected outcome {:?}", other),
    };
    assert!(second_id > first_id);

    // A candidate promoted to active also draws from the same counter.
    for k in 0..5 {
        let range = 20_000.0 + 100.0 * k as f64;
        let mut cluster = radar_cluster(range, -1.5, 0.05);
        tracker.update(t(10.0 + k as f64), &mut cluster);
    }
    let max_id = tracker
        .tracks()
        .active
        .iter()
        .map(|tr| tr.id)
        .max()
        .unwrap();
    assert!(max_id > second_id, "promotion allocates a fresh, larger id");
}

#[test]
fn statistical_track_to_track_gate_without_a_cylinder() {
    let mut tracker = Mtt::new(MttParameters::default());

    let mut first = nonlocal_cluster(
        t(0.0),
        1000.0,
        1000.0,
        20.0,
        0.0,
        None,
        NonlocalUpdateFlag::TwoDimensional,
    );
    let id = match tracker.update(t(0.0), &mut first) {
        CorrelationOutcome::ActiveTrackStarted(id) => id,
        other => panic!("unexpected outcome {:?}", other),
    };

    // A nearly coincident input correlates statistically and fuses.
    let mut second = nonlocal_cluster(
        t(1.0),
        1030.0,
        1005.0,
        20.0,
        0.0,
        None,
        NonlocalUpdateFlag::TwoDimensional,
    );
    let outcome = tracker.update(t(1.0), &mut second);
    assert_eq!(outcome, CorrelationOutcome::FusionPending(id));
    assert_eq!(tracker.tracks().active.len(), 1);
}

//! The multiple target tracker itself: a single-threaded cooperative
//! processor that correlates perceived clusters against the managed track
//! hierarchy (embryonic -> candidate -> active), promotes tracks as
//! statistical confidence builds, and fuses correlated nonlocal tracks into
//! the active state estimate.
//!
//! Within one tick, operations run in order: drop stale tracks, gate,
//! update, check promotion, fire observers. The enclosing simulator must
//! schedule ticks in increasing time order; measurement times at or before
//! the tick time propagate forward, never backward.

use crate::filter::info::{
    propagate_vertical, update_horizontal_info, update_vertical_info, vertical_promotion_passes,
};
use crate::filter::propagate::propagate_turning;
use crate::filter::update::{update_straight_model, update_turning_model};
use crate::filter::{radar_geometry, vertical_measurement, RangeVariance};
use crate::fusion::{fuse_nonlocal_track, imm_blend};
use crate::gate::{critical_threshold, gate_measurement_to_track, gate_track_to_track, GATE_SENTINEL};
use crate::linalg::{condition_number, symmetrize, try_invert};
use crate::measurement::{Measurement, NonlocalTrack, PerceivedCluster};
use crate::params::MttParameters;
use crate::time::Epoch;
use crate::track::{
    ActiveTrack, ActiveTrackData, CandidateTrack, EmbryonicTrack, InfoFilterData, Track, TrackId,
    TrackStore,
};
use nalgebra::{Matrix2, Vector2};
use std::collections::HashMap;

/// Synchronous subscriber slots, one method per lifecycle transition. Every
/// method has a no-op default so observers implement only what they need.
/// Observers must not retain track references past the call and must not
/// re-enter the tracker.
pub trait TrackObserver {
    fn embryonic_track_initiated(&mut self, _time: Epoch, _track: &EmbryonicTrack) {}
    fn embryonic_track_dropped(&mut self, _time: Epoch, _track: &EmbryonicTrack) {}
    fn candidate_track_initiated(
        &mut self,
        _time: Epoch,
        _track: &CandidateTrack,
        _source: &EmbryonicTrack,
    ) {
    }
    fn candidate_track_dropped(&mut self, _time: Epoch, _track: &CandidateTrack) {}
    fn active_track_initiated(
        &mut self,
        _time: Epoch,
        _track: &ActiveTrack,
        _source: Option<&CandidateTrack>,
    ) {
    }
    fn active_track_dropped(&mut self, _time: Epoch, _track: &ActiveTrack) {}
}

/// What the correlation phase decided for one cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationOutcome {
    /// Measurement correlated with an existing active track, which has been
    /// updated.
    ActiveTrackUpdated(TrackId),
    /// Measurement promoted a candidate; the new active track id.
    CandidatePromoted(TrackId),
    /// Measurement correlated with a candidate track (updated, not yet
    /// promotable).
    CandidateUpdated,
    /// No correlation; a fresh embryonic track was seeded.
    EmbryonicCreated,
    /// Height-finder measurement routed into the vertical channel of the
    /// addressed active track.
    HeightFinderUpdated(TrackId),
    /// Nonlocal track correlated with an active track; call
    /// [`Mtt::fuse`] with the same cluster to complete the update.
    FusionPending(TrackId),
    /// Nonlocal track did not correlate; a new active track was started
    /// from it.
    ActiveTrackStarted(TrackId),
    /// Nothing could be done (missing addressed track, source mismatch, or
    /// an empty cluster).
    NoCorrelation,
}

/// Result of trying a measurement against the candidate list.
enum CandidateOutcome {
    Promoted(TrackId),
    Correlated,
    NoCorrelation,
}

/// The multiple target tracker.
pub struct Mtt {
    name: String,
    debug: bool,
    /// When false, a track-to-track correlation is kept only for the track's
    /// original source (same originator, different sensor).
    correlate_all_sources: bool,
    params: MttParameters,
    tracks: TrackStore,
    observers: Vec<Box<dyn TrackObserver>>,
    /// Temporary active-track data stashed between the correlation and
    /// fusion phases, keyed by the correlated track id.
    saved_fusion_data: HashMap<TrackId, ActiveTrackData>,
}

impl Mtt {
    pub fn new(params: MttParameters) -> Self {
        Self {
            name: String::new(),
            debug: false,
            correlate_all_sources: true,
            params,
            tracks: TrackStore::new(),
            observers: Vec::new(),
            saved_fusion_data: HashMap::new(),
        }
    }

    /// Names this tracker in debug output.
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    pub fn set_correlate_all_sources(&mut self, all_sources: bool) {
        self.correlate_all_sources = all_sources;
    }

    pub fn add_observer(&mut self, observer: Box<dyn TrackObserver>) {
        self.observers.push(observer);
    }

    pub fn params(&self) -> &MttParameters {
        &self.params
    }

    /// Replaces the parameter record between ticks.
    pub fn set_parameters(&mut self, params: MttParameters) {
        self.params = params;
    }

    pub fn tracks(&self) -> &TrackStore {
        &self.tracks
    }

    /// One full tick: correlation, then fusion when the cluster is a
    /// correlated nonlocal track.
    pub fn update(&mut self, time: Epoch, cluster: &mut PerceivedCluster) -> CorrelationOutcome {
        let outcome = self.correlate(time, cluster);
        if let CorrelationOutcome::FusionPending(id) = outcome {
            let cl = cluster.clone();
            self.fuse(time, &cl, id);
        }
        outcome
    }

    /// Correlation phase: routes the cluster to the measurement dispatcher
    /// or to track-to-track correlation.
    pub fn correlate(&mut self, time: Epoch, cluster: &mut PerceivedCluster) -> CorrelationOutcome {
        if cluster.measurement.is_some() {
            self.correlate_measurement(time, cluster)
        } else if cluster.nonlocal_track.is_some() {
            self.correlate_nonlocal(time, cluster)
        } else {
            // The setup calling this routine has an error.
            warn!("{}: perceived cluster carries neither measurement nor track", self.name);
            CorrelationOutcome::NoCorrelation
        }
    }

    /// Fusion phase: folds the nonlocal track saved during correlation into
    /// the correlated active track.
    pub fn fuse(&mut self, time: Epoch, cluster: &PerceivedCluster, track_id: TrackId) {
        let nonlocal = match &cluster.nonlocal_track {
            Some(n) => n.clone(),
            None => return,
        };
        let temp = match self.saved_fusion_data.remove(&track_id) {
            Some(t) => t,
            None => {
                warn!(
                    "{}: no saved correlation data for track {}, fusion skipped",
                    self.name, track_id
                );
                return;
            }
        };
        let params = self.params.clone();
        let track = match self.tracks.active.find_mut(track_id) {
            Some(t) => t,
            None => return,
        };
        let dt = (time - track.update_time).to_seconds();
        fuse_nonlocal_track(&params, track, &temp, nonlocal.update_flag, time, dt);
        track.update_time = time;
    }

    /// Measurement dispatcher: 2D/3D radar measurements run the
    /// active/candidate/embryonic cascade; a nonzero track number routes to
    /// the height-finder path.
    fn correlate_measurement(
        &mut self,
        time: Epoch,
        cluster: &mut PerceivedCluster,
    ) -> CorrelationOutcome {
        if cluster.track_number != 0 {
            return match self.update_height_filter(time, cluster) {
                Some(id) => CorrelationOutcome::HeightFinderUpdated(id),
                None => CorrelationOutcome::NoCorrelation,
            };
        }

        let meas = cluster.measurement.clone().expect("checked by correlate");

        if let Some(id) = self.try_correlate_active(time, &meas) {
            let params = self.params.clone();
            let track = self.tracks.active.find_mut(id).expect("gated track exists");
            update_active_track(&params, track, time, &meas);
            if self.debug {
                debug!(
                    "{}: t={:.3} correlation with active track {}",
                    self.name,
                    time.to_tai_seconds(),
                    id
                );
            }
            return CorrelationOutcome::ActiveTrackUpdated(id);
        }

        match self.try_promote_candidate(time, cluster, &meas) {
            CandidateOutcome::Promoted(id) => CorrelationOutcome::CandidatePromoted(id),
            CandidateOutcome::Correlated => CorrelationOutcome::CandidateUpdated,
            CandidateOutcome::NoCorrelation => {
                self.spawn_embryonic(time, cluster, &meas);
                if self.debug {
                    debug!(
                        "{}: t={:.3} no correlation, embryonic track seeded",
                        self.name,
                        time.to_tai_seconds()
                    );
                }
                CorrelationOutcome::EmbryonicCreated
            }
        }
    }

    /// Checks the measurement against every active track; returns the id of
    /// the best gate under the critical threshold. Stale tracks and stale
    /// vertical channels encountered on the way are dropped.
    fn try_correlate_active(&mut self, time: Epoch, meas: &Measurement) -> Option<TrackId> {
        let zc = critical_threshold(self.params.m2t_false_reject_probability);
        let mut best: Option<(TrackId, f64)> = None;

        let mut i = 0;
        while i < self.tracks.active.len() {
            let dt = (time - self.tracks.active.get(i).update_time).to_seconds();
            if dt > self.params.active_track_drop_time {
                let dropped = self.tracks.active.remove_at(i);
                if self.debug {
                    debug!(
                        "{}: t={:.3} dropping stale active track {}",
                        self.name,
                        time.to_tai_seconds(),
                        dropped.id
                    );
                }
                for obs in self.observers.iter_mut() {
                    obs.active_track_dropped(time, &dropped);
                }
                continue;
            }
            {
                let track = self.tracks.active.get_mut(i);
                deactivate_stale_vertical(
                    track,
                    time,
                    self.params.vertical_channel_drop_time,
                    |d| {
                        d.vertical_info_matrix = Matrix2::zeros();
                        d.vertical_info_state = Vector2::zeros();
                    },
                );
            }

            let track = self.tracks.active.get(i);
            let gate = gate_measurement_to_track(
                &self.params,
                &track.data,
                track.vertical_channel_active,
                meas,
                dt,
            );
            if gate.test < zc && best.map_or(true, |(_, n)| gate.norm < n) {
                best = Some((track.id, gate.norm));
            }
            i += 1;
        }
        best.map(|(id, _)| id)
    }

    /// Tries the measurement against the candidate list; the best-gated
    /// candidate absorbs the measurement and, if its information filter has
    /// converged, is promoted to a new active track.
    fn try_promote_candidate(
        &mut self,
        time: Epoch,
        cluster: &PerceivedCluster,
        meas: &Measurement,
    ) -> CandidateOutcome {
        let zc = critical_threshold(self.params.m2t_false_reject_probability);
        let mut best: Option<(TrackId, f64)> = None;

        let mut i = 0;
        while i < self.tracks.candidate.len() {
            let dt = (time - self.tracks.candidate.get(i).update_time).to_seconds();
            if dt > self.params.candidate_track_drop_time {
                let dropped = self.tracks.candidate.remove_at(i);
                if self.debug {
                    debug!(
                        "{}: t={:.3} dropping stale candidate track {}",
                        self.name,
                        time.to_tai_seconds(),
                        dropped.id
                    );
                }
                for obs in self.observers.iter_mut() {
                    obs.candidate_track_dropped(time, &dropped);
                }
                continue;
            }
            {
                let track = self.tracks.candidate.get_mut(i);
                deactivate_stale_vertical(
                    track,
                    time,
                    self.params.vertical_channel_drop_time,
                    |d| {
                        d.vertical_info_matrix = Matrix2::zeros();
                        d.vertical_info_state = Vector2::zeros();
                    },
                );
            }

            let track = self.tracks.candidate.get(i);
            // Temporarily promote the candidate so the active-track gate
            // applies; a singular information matrix just means this
            // candidate cannot be examined yet.
            if let Ok(temp) = ActiveTrackData::from_info_filter(&track.data) {
                let gate = gate_measurement_to_track(
                    &self.params,
                    &temp,
                    track.vertical_channel_active,
                    meas,
                    dt,
                );
                if gate.test < zc && best.map_or(true, |(_, n)| gate.norm < n) {
                    best = Some((track.id, gate.norm));
                }
            }
            i += 1;
        }

        let (win_id, _) = match best {
            Some(b) => b,
            None => return CandidateOutcome::NoCorrelation,
        };

        let radar = meas.radar_data();
        let geometry = radar_geometry(radar, meas.available, None, RangeVariance::Update)
            .expect("update geometry is always resolvable");
        let vertical = vertical_measurement(radar, meas.available);
        let has_vertical_fix = vertical.is_some();
        let (r_inv, dz) = vertical.unwrap_or((Matrix2::zeros(), 0.0));

        // Fold the measurement into a copy of the winner and decide
        // promotion on the result.
        let params = self.params.clone();
        let promoted = {
            let track = self
                .tracks
                .candidate
                .find_mut(win_id)
                .expect("winner still in list");
            let dt = (time - track.update_time).to_seconds();

            let mut folded = track.data.clone();
            let _ = update_horizontal_info(
                dt,
                params.candidate_track_x_acceleration,
                params.candidate_track_y_acceleration,
                &mut folded.info_matrix,
                &mut folded.info_state,
                &geometry.r,
                geometry.sensor[0],
                geometry.sensor[1],
                geometry.dx,
                geometry.dy,
            );
            update_vertical_info(
                dt,
                params.vertical_velocity,
                params.vertical_velocity_decorrelation_time,
                &mut folded.vertical_info_matrix,
                &mut folded.vertical_info_state,
                &r_inv,
                geometry.sensor[2],
                dz,
                meas.available.has_range(),
                meas.available.has_elevation(),
            );
            if has_vertical_fix {
                track.vertical_update_time = time;
            }
            if !track.vertical_channel_active
                && vertical_promotion_passes(&params, &folded.vertical_info_matrix)
            {
                track.vertical_channel_active = true;
            }

            // The promotion tests run on the folded copy, but the promoted
            // track converts the stored candidate filter: the measurement is
            // folded exactly once, by the active-track update below.
            let converted = if candidate_promotion_passes(&params, &folded) {
                ActiveTrackData::from_info_filter(&track.data).ok()
            } else {
                None
            };
            match converted {
                Some(temp_data) => {
                    // Run the measurement through the temporary active track
                    // so the new track starts from an IMM-updated state.
                    let mut temp_track = ActiveTrack {
                        update_time: track.update_time,
                        id: 0,
                        originator_id: track.originator_id,
                        sensor_id: track.sensor_id,
                        vertical_channel_active: track.vertical_channel_active,
                        vertical_update_time: track.vertical_update_time,
                        data: temp_data,
                    };
                    update_active_track(&params, &mut temp_track, time, meas);
                    Some(temp_track)
                }
                None => {
                    // Not promotable this tick: commit the folded filter and
                    // keep waiting.
                    track.data = folded;
                    track.update_time = time;
                    None
                }
            }
        };

        match promoted {
            Some(temp_track) => {
                let new_id = self.tracks.next_active_id();
                let active = ActiveTrack {
                    update_time: time,
                    id: new_id,
                    originator_id: cluster.last_originator_id,
                    sensor_id: cluster.last_sensor_id,
                    vertical_channel_active: temp_track.vertical_channel_active,
                    vertical_update_time: temp_track.vertical_update_time,
                    data: temp_track.data,
                };
                if self.debug {
                    debug!(
                        "{}: t={:.3} promoting candidate track {} to active track {}",
                        self.name,
                        time.to_tai_seconds(),
                        win_id,
                        new_id
                    );
                }
                self.tracks.active.push(active);

                let Mtt {
                    tracks, observers, ..
                } = self;
                let winner = tracks.candidate.find(win_id).expect("winner still in list");
                let active_ref = tracks.active.find(new_id).expect("just pushed");
                for obs in observers.iter_mut() {
                    obs.active_track_initiated(time, active_ref, Some(winner));
                }
                for obs in observers.iter_mut() {
                    obs.candidate_track_dropped(time, winner);
                }
                self.tracks.candidate.remove(win_id);
                CandidateOutcome::Promoted(new_id)
            }
            None => CandidateOutcome::Correlated,
        }
    }

    /// The measurement matched nothing: examine every embryonic track for
    /// promotion to candidate with this measurement folded in, then always
    /// seed a fresh embryonic track from the measurement alone.
    fn spawn_embryonic(&mut self, time: Epoch, cluster: &PerceivedCluster, meas: &Measurement) {
        let radar = meas.radar_data();
        let geometry = radar_geometry(radar, meas.available, None, RangeVariance::Update)
            .expect("update geometry is always resolvable");
        let vertical = vertical_measurement(radar, meas.available);
        let has_vertical_fix = vertical.is_some();
        let (r_inv, dz) = vertical.unwrap_or((Matrix2::zeros(), 0.0));
        let params = self.params.clone();

        let mut i = 0;
        while i < self.tracks.embryonic.len() {
            let dt = (time - self.tracks.embryonic.get(i).update_time).to_seconds();
            if dt > params.embryonic_track_drop_time {
                let dropped = self.tracks.embryonic.remove_at(i);
                if self.debug {
                    debug!(
                        "{}: t={:.3} dropping stale embryonic track {}",
                        self.name,
                        time.to_tai_seconds(),
                        dropped.id
                    );
                }
                for obs in self.observers.iter_mut() {
                    obs.embryonic_track_dropped(time, &dropped);
                }
                continue;
            }

            // Fold the measurement into a candidate-grade copy of this
            // embryonic track and see whether the result clears the
            // promotion bar.
            let candidate_data = {
                let track = self.tracks.embryonic.get_mut(i);
                deactivate_stale_vertical(track, time, params.vertical_channel_drop_time, |d| {
                    d.vertical_info_matrix = Matrix2::zeros();
                    d.vertical_info_state = Vector2::zeros();
                });

                let mut folded = track.data.clone();
                let fold = update_horizontal_info(
                    dt,
                    params.candidate_track_x_acceleration,
                    params.candidate_track_y_acceleration,
                    &mut folded.info_matrix,
                    &mut folded.info_state,
                    &geometry.r,
                    geometry.sensor[0],
                    geometry.sensor[1],
                    geometry.dx,
                    geometry.dy,
                );
                update_vertical_info(
                    dt,
                    params.vertical_velocity,
                    params.vertical_velocity_decorrelation_time,
                    &mut folded.vertical_info_matrix,
                    &mut folded.vertical_info_state,
                    &r_inv,
                    geometry.sensor[2],
                    dz,
                    meas.available.has_range(),
                    meas.available.has_elevation(),
                );
                if !track.vertical_channel_active
                    && vertical_promotion_passes(&params, &folded.vertical_info_matrix)
                {
                    track.vertical_channel_active = true;
                }
                if has_vertical_fix {
                    track.vertical_update_time = time;
                }

                if fold.is_ok() && embryonic_promotion_passes(&params, cluster, &folded) {
                    Some(folded)
                } else {
                    None
                }
            };

            if let Some(data) = candidate_data {
                let id = self.tracks.next_candidate_id();
                let source = self.tracks.embryonic.get(i);
                let candidate = Track {
                    update_time: time,
                    id,
                    originator_id: source.originator_id,
                    sensor_id: source.sensor_id,
                    vertical_channel_active: source.vertical_channel_active,
                    vertical_update_time: source.vertical_update_time,
                    data,
                };
                if self.debug {
                    debug!(
                        "{}: t={:.3} embryonic track {} promoted to candidate track {}",
                        self.name,
                        time.to_tai_seconds(),
                        source.id,
                        id
                    );
                }
                self.tracks.candidate.push(candidate);
                let Mtt {
                    tracks, observers, ..
                } = self;
                let candidate_ref = tracks.candidate.find(id).expect("just pushed");
                let source_ref = tracks.embryonic.get(i);
                for obs in observers.iter_mut() {
                    obs.candidate_track_initiated(time, candidate_ref, source_ref);
                }
            }
            i += 1;
        }

        // Always seed a fresh embryonic track from this measurement.
        let id = self.tracks.next_embryonic_id();
        let mut embryonic = EmbryonicTrack::new(id, time);
        embryonic.originator_id = cluster.last_originator_id;
        embryonic.sensor_id = cluster.last_sensor_id;
        let _ = update_horizontal_info(
            0.0,
            self.params.candidate_track_x_acceleration,
            self.params.candidate_track_y_acceleration,
            &mut embryonic.data.info_matrix,
            &mut embryonic.data.info_state,
            &geometry.r,
            geometry.sensor[0],
            geometry.sensor[1],
            geometry.dx,
            geometry.dy,
        );
        update_vertical_info(
            0.0,
            self.params.vertical_velocity,
            self.params.vertical_velocity_decorrelation_time,
            &mut embryonic.data.vertical_info_matrix,
            &mut embryonic.data.vertical_info_state,
            &r_inv,
            geometry.sensor[2],
            dz,
            meas.available.has_range(),
            meas.available.has_elevation(),
        );
        if has_vertical_fix {
            embryonic.vertical_update_time = time;
        }
        self.tracks.embryonic.push(embryonic);
        let Mtt {
            tracks, observers, ..
        } = self;
        let new_ref = tracks.embryonic.find(id).expect("just pushed");
        for obs in observers.iter_mut() {
            obs.embryonic_track_initiated(time, new_ref);
        }
    }

    /// Height-finder path: the measurement is addressed to an active track
    /// by id. Missing targets clear the cluster's track number.
    fn update_height_filter(
        &mut self,
        time: Epoch,
        cluster: &mut PerceivedCluster,
    ) -> Option<TrackId> {
        let meas = cluster.measurement.clone()?;
        let params = self.params.clone();
        let track = match self.tracks.active.find_mut(cluster.track_number) {
            Some(t) => t,
            None => {
                cluster.track_number = 0;
                return None;
            }
        };
        let dt = (time - track.update_time).to_seconds();
        let radar = meas.radar_data();

        let data = &mut track.data;
        propagate_turning(
            dt,
            &mut data.previous_covariance,
            &mut data.previous_state,
            params.turning_flight_x_acceleration,
            params.turning_flight_y_acceleration,
        );
        // Too long since the last height update: restart the vertical
        // filter from scratch.
        if dt > params.vertical_channel_drop_time {
            data.vertical_info_matrix = Matrix2::zeros();
            data.vertical_info_state = Vector2::zeros();
        }
        propagate_turning(
            dt,
            &mut data.covariance,
            &mut data.state,
            params.turning_flight_x_acceleration,
            params.turning_flight_y_acceleration,
        );

        let vertical = vertical_measurement(radar, meas.available);
        let has_vertical_fix = vertical.is_some();
        let (r_inv, dz) = vertical.unwrap_or((Matrix2::zeros(), 0.0));
        if has_vertical_fix {
            track.vertical_update_time = time;
        }
        update_vertical_info(
            dt,
            params.vertical_velocity,
            params.vertical_velocity_decorrelation_time,
            &mut data.vertical_info_matrix,
            &mut data.vertical_info_state,
            &r_inv,
            radar.sensor_location[2],
            dz,
            meas.available.has_range(),
            meas.available.has_elevation(),
        );
        if !track.vertical_channel_active
            && vertical_promotion_passes(&params, &track.data.vertical_info_matrix)
        {
            track.vertical_channel_active = true;
        }
        track.update_time = time;
        Some(track.id)
    }

    /// Track-to-track correlation: builds a temporary active track from the
    /// nonlocal input, gates it against every active track (statistically or
    /// through the correlation cylinder), and either schedules fusion or
    /// starts a new active track.
    fn correlate_nonlocal(
        &mut self,
        time: Epoch,
        cluster: &mut PerceivedCluster,
    ) -> CorrelationOutcome {
        let nonlocal = cluster.nonlocal_track.clone().expect("checked by correlate");
        let temp = self.temporary_active_from_nonlocal(time, &nonlocal);

        let zc = critical_threshold(self.params.t2t_false_reject_probability);
        let cylinder_diameter = self.params.track_correlation_cylinder_diameter;
        let mut best: Option<(TrackId, f64)> = None;

        let mut i = 0;
        while i < self.tracks.active.len() {
            let dt = (time - self.tracks.active.get(i).update_time).to_seconds();
            if dt > self.params.active_track_drop_time {
                let dropped = self.tracks.active.remove_at(i);
                for obs in self.observers.iter_mut() {
                    obs.active_track_dropped(time, &dropped);
                }
                continue;
            }
            {
                let track = self.tracks.active.get_mut(i);
                deactivate_stale_vertical(
                    track,
                    time,
                    self.params.vertical_channel_drop_time,
                    |d| {
                        d.vertical_info_matrix = Matrix2::zeros();
                        d.vertical_info_state = Vector2::zeros();
                    },
                );
            }

            let track = self.tracks.active.get(i);
            let gate = gate_track_to_track(&self.params, &track.data, &temp, dt);

            let correlated = if cylinder_diameter > 0.0 {
                // The cylinder takes precedence over the statistical gate.
                let radius = cylinder_diameter / 2.0;
                let mut inside = gate.norm < GATE_SENTINEL && gate.norm < radius;
                if inside && nonlocal.has_vertical_data && track.vertical_channel_active {
                    let half_height = self.params.track_correlation_cylinder_height / 2.0;
                    let altitude = track.altitude().unwrap_or(0.0);
                    inside = (nonlocal.filter.state[4] - altitude).abs() <= half_height;
                }
                inside
            } else {
                gate.test < zc
            };

            if correlated && best.map_or(true, |(_, n)| gate.norm < n) {
                best = Some((track.id, gate.norm));
            }
            i += 1;
        }

        match best {
            None => {
                // Uncorrelated: start a new active track from the input.
                let id = self.tracks.next_active_id();
                let mut track = ActiveTrack::new(id, time);
                track.data = temp;
                track.originator_id = cluster.last_originator_id;
                track.sensor_id = cluster.last_sensor_id;
                if nonlocal.has_vertical_data {
                    track.vertical_channel_active = true;
                    track.vertical_update_time = time;
                }
                if self.debug {
                    debug!(
                        "{}: t={:.3} nonlocal track started active track {}",
                        self.name,
                        time.to_tai_seconds(),
                        id
                    );
                }
                self.tracks.active.push(track);
                let Mtt {
                    tracks, observers, ..
                } = self;
                let track_ref = tracks.active.find(id).expect("just pushed");
                for obs in observers.iter_mut() {
                    obs.active_track_initiated(time, track_ref, None);
                }
                CorrelationOutcome::ActiveTrackStarted(id)
            }
            Some((id, _)) => {
                let track = self.tracks.active.find(id).expect("gated track exists");
                if !self.correlate_all_sources
                    && (cluster.last_originator_id != track.originator_id
                        || cluster.last_sensor_id == track.sensor_id)
                {
                    // Initial-source-only fusion: reject and clear the
                    // addressed track id so no stale perception lingers.
                    cluster.track_number = 0;
                    return CorrelationOutcome::NoCorrelation;
                }
                self.saved_fusion_data.insert(id, temp);
                CorrelationOutcome::FusionPending(id)
            }
        }
    }

    /// Expands the nonlocal snapshot into active-track form, propagated to
    /// the evaluation time.
    fn temporary_active_from_nonlocal(&self, time: Epoch, nonlocal: &NonlocalTrack) -> ActiveTrackData {
        let filter = &nonlocal.filter;
        let mut temp = ActiveTrackData::default();
        temp.state[0] = filter.state[0];
        temp.state[1] = filter.state[1];
        temp.state[2] = filter.state[2];
        temp.state[3] = filter.state[3];
        temp.state[4] = filter.x_acceleration;
        temp.state[5] = filter.y_acceleration;
        temp.covariance = filter.covariance;
        temp.previous_state = filter.previous_state;
        temp.previous_covariance = filter.previous_covariance;
        temp.straight_mode_probability = 0.5;
        temp.turning_mode_probability = 0.5;

        let dt = (time - filter.update_time).to_seconds();
        if nonlocal.has_vertical_data {
            temp.vertical_info_matrix = filter.vertical_info_matrix;
            let xv = Vector2::new(filter.state[4], filter.state[5]);
            temp.vertical_info_state = temp.vertical_info_matrix * xv;
            let _ = propagate_vertical(
                dt,
                self.params.vertical_velocity,
                self.params.vertical_velocity_decorrelation_time,
                &mut temp.vertical_info_matrix,
                &mut temp.vertical_info_state,
            );
        }

        propagate_turning(
            dt,
            &mut temp.covariance,
            &mut temp.state,
            self.params.turning_flight_x_acceleration,
            self.params.turning_flight_y_acceleration,
        );
        propagate_turning(
            dt,
            &mut temp.previous_covariance,
            &mut temp.previous_state,
            self.params.turning_flight_x_acceleration,
            self.params.turning_flight_y_acceleration,
        );
        temp
    }
}

/// Deactivates the vertical channel of a track whose last vertical update is
/// older than the drop horizon, zeroing the channel through `reset`.
fn deactivate_stale_vertical<D>(
    track: &mut Track<D>,
    time: Epoch,
    drop_time: f64,
    reset: impl FnOnce(&mut D),
) {
    if !track.vertical_channel_active {
        return;
    }
    let dtv = (time - track.vertical_update_time).to_seconds();
    if dtv > drop_time {
        track.vertical_channel_active = false;
        track.vertical_update_time = Epoch::from_tai_seconds(0.0);
        reset(&mut track.data);
    }
}

/// Whether the candidate filter, with the measurement folded in, clears the
/// bar for promotion to active: condition number, position variances, and
/// velocity variances all below their thresholds.
fn candidate_promotion_passes(params: &MttParameters, folded: &InfoFilterData) -> bool {
    let cond = condition_number(&folded.info_matrix);
    if cond >= params.promote_track_horizontal_threshold {
        debug!("candidate not promoted: condition number {:.3e} above threshold", cond);
        return false;
    }
    let pc = match try_invert(&folded.info_matrix) {
        Ok(pc) => pc,
        Err(_) => return false,
    };
    let position_ok = pc[(0, 0)] < params.position_variance_promote_candidate_track
        && pc[(1, 1)] < params.position_variance_promote_candidate_track;
    let velocity_ok = pc[(2, 2)] < params.velocity_variance_promote_candidate_track
        && pc[(3, 3)] < params.velocity_variance_promote_candidate_track;
    if !(position_ok && velocity_ok) {
        debug!("candidate not promoted: position/velocity error too large");
        return false;
    }
    true
}

/// Whether an embryonic filter, with the measurement folded in, may become a
/// candidate: condition number, summed velocity variance, horizontal speed
/// limit, and (when enabled) the consecutive-single-source-hits rule.
fn embryonic_promotion_passes(
    params: &MttParameters,
    cluster: &PerceivedCluster,
    folded: &InfoFilterData,
) -> bool {
    let cond = condition_number(&folded.info_matrix);
    if cond >= params.promote_track_horizontal_threshold {
        return false;
    }
    let pc = match try_invert(&folded.info_matrix) {
        Ok(pc) => pc,
        Err(_) => return false,
    };
    if pc[(2, 2)] + pc[(3, 3)] >= params.velocity_variance_promote_embryonic_track {
        debug!("embryonic not promoted: velocity error limit failed");
        return false;
    }
    let x = pc * folded.info_state;
    let speed = (x[2] * x[2] + x[3] * x[3]).sqrt();
    if speed > params.velocity_limit_promote_embryonic_track {
        debug!("embryonic not promoted: speed {:.1} m/s above limit", speed);
        return false;
    }
    if params.promote_single_source_hit_threshold > 0
        && cluster.consecutive_single_source_hits < params.promote_single_source_hit_threshold
    {
        debug!("embryonic not promoted: single-source hit count not reached");
        return false;
    }
    true
}

/// Folds a 2D/3D radar measurement into an active track: both IMM models
/// update independently, the mode probabilities mix, and the vertical
/// channel absorbs the z-axis part of the measurement.
fn update_active_track(
    params: &MttParameters,
    track: &mut ActiveTrack,
    time: Epoch,
    meas: &Measurement,
) {
    let dt = (time - track.update_time).to_seconds();
    let vertical_active = track.vertical_channel_active;
    let vert_info = track.data.vertical_info_matrix;
    let vert_state = track.data.vertical_info_state;
    let vertical = if vertical_active {
        Some((&vert_info, &vert_state))
    } else {
        None
    };

    let data = &mut track.data;

    // Snapshot the pre-update state, propagated to the measurement time,
    // for later centralized fusion.
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
    let likelihood_straight =
        update_straight_model(params, dt, &mut x4, &mut p4, vertical, meas);

    let mut x6 = data.state;
    let mut p6 = data.covariance;
    let likelihood_turning = update_turning_model(params, dt, &mut x6, &mut p6, vertical, meas);

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

    // Vertical channel.
    let radar = meas.radar_data();
    let vertical_fix = vertical_measurement(radar, meas.available);
    if vertical_fix.is_some() {
        track.vertical_update_time = time;
    }
    let (r_inv, dz) = vertical_fix.unwrap_or((Matrix2::zeros(), 0.0));
    update_vertical_info(
        dt,
        params.vertical_velocity,
        params.vertical_velocity_decorrelation_time,
        &mut data.vertical_info_matrix,
        &mut data.vertical_info_state,
        &r_inv,
        radar.sensor_location[2],
        dz,
        meas.available.has_range(),
        meas.available.has_elevation(),
    );
    symmetrize(&mut data.vertical_info_matrix);
    if !track.vertical_channel_active
        && vertical_promotion_passes(params, &track.data.vertical_info_matrix)
    {
        track.vertical_channel_active = true;
    }
    track.update_time = time;
}

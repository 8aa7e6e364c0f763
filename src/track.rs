use crate::filter::FilterError;
use crate::linalg::{invert_2x2, try_invert};
use crate::time::Epoch;
use nalgebra::{Matrix2, Matrix4, Matrix6, Vector2, Vector4, Vector6};

/// Track identifiers are unique within one kind (embryonic, candidate,
/// active) and allocated monotonically from that kind's counter.
pub type TrackId = u32;

/// Header shared by every track kind. The payload `D` carries the filter
/// state for that stage of the lifecycle.
#[derive(Debug, Clone)]
pub struct Track<D> {
    pub update_time: Epoch,
    pub id: TrackId,
    pub originator_id: u32,
    pub sensor_id: u32,
    pub vertical_channel_active: bool,
    pub vertical_update_time: Epoch,
    pub data: D,
}

impl<D: Default> Track<D> {
    pub fn new(id: TrackId, update_time: Epoch) -> Self {
        Self {
            update_time,
            id,
            originator_id: 0,
            sensor_id: 0,
            vertical_channel_active: false,
            vertical_update_time: Epoch::from_tai_seconds(0.0),
            data: D::default(),
        }
    }
}

/// Payload of embryonic and candidate tracks: a 4-state horizontal filter and
/// a 2-state vertical filter, both in information form so that the initial
/// "infinite variance" state is simply the zero matrix.
#[derive(Debug, Clone)]
pub struct InfoFilterData {
    /// Y = P^-1 over (x, y, vx, vy).
    pub info_matrix: Matrix4<f64>,
    /// y = Y * x.
    pub info_state: Vector4<f64>,
    pub vertical_info_matrix: Matrix2<f64>,
    pub vertical_info_state: Vector2<f64>,
}

impl Default for InfoFilterData {
    fn default() -> Self {
        Self {
            info_matrix: Matrix4::zeros(),
            info_state: Vector4::zeros(),
            vertical_info_matrix: Matrix2::zeros(),
            vertical_info_state: Vector2::zeros(),
        }
    }
}

impl InfoFilterData {
    /// Reconstructs the horizontal state x = Y^-1 * y.
    pub fn horizontal_state(&self) -> Result<Vector4<f64>, FilterError> {
        Ok(try_invert(&self.info_matrix)? * self.info_state)
    }

    /// Reconstructs the vertical state (altitude, vertical velocity), or zero
    /// when the vertical information matrix carries no information yet.
    pub fn vertical_state(&self) -> Vector2<f64> {
        match invert_2x2(&self.vertical_info_matrix) {
            Ok(pv) => pv * self.vertical_info_state,
            Err(_) => Vector2::zeros(),
        }
    }
}

pub type EmbryonicTrack = Track<InfoFilterData>;
pub type CandidateTrack = Track<InfoFilterData>;

/// Payload of an active track: the full IMM state. The horizontal filter is
/// kept in covariance form (the candidate's information matrix is inverted on
/// promotion); the vertical channel stays in information form. The previous
/// snapshot is the last accepted update, propagated forward at evaluation
/// time for centralized Kalman fusion.
#[derive(Debug, Clone)]
pub struct ActiveTrackData {
    /// 6x6 covariance over (x, y, vx, vy, ax, ay).
    pub covariance: Matrix6<f64>,
    pub state: Vector6<f64>,
    pub vertical_info_matrix: Matrix2<f64>,
    pub vertical_info_state: Vector2<f64>,
    pub straight_mode_probability: f64,
    pub turning_mode_probability: f64,
    pub previous_state: Vector6<f64>,
    pub previous_covariance: Matrix6<f64>,
}

impl Default for ActiveTrackData {
    fn default() -> Self {
        Self {
            covariance: Matrix6::zeros(),
            state: Vector6::zeros(),
            vertical_info_matrix: Matrix2::zeros(),
            vertical_info_state: Vector2::zeros(),
            straight_mode_probability: 0.0,
            turning_mode_probability: 0.0,
            previous_state: Vector6::zeros(),
            previous_covariance: Matrix6::zeros(),
        }
    }
}

impl ActiveTrackData {
    /// Promotes a candidate filter to the active representation: invert the
    /// 4x4 information matrix into the upper-left block of the 6x6 covariance
    /// (acceleration rows and columns start at zero), recover the state, copy
    /// the vertical filter as-is, and seed the mode probabilities at one half
    /// each.
    pub fn from_info_filter(candidate: &InfoFilterData) -> Result<Self, FilterError> {
        let pc = try_invert(&candidate.info_matrix)?;
        let x = pc * candidate.info_state;

        let mut covariance = Matrix6::zeros();
        covariance.fixed_view_mut::<4, 4>(0, 0).copy_from(&pc);
        let mut state = Vector6::zeros();
        state.fixed_view_mut::<4, 1>(0, 0).copy_from(&x);

        Ok(Self {
            covariance,
            state,
            vertical_info_matrix: candidate.vertical_info_matrix,
            vertical_info_state: candidate.vertical_info_state,
            straight_mode_probability: 0.5,
            turning_mode_probability: 0.5,
            previous_state: Vector6::zeros(),
            previous_covariance: Matrix6::zeros(),
        })
    }
}

pub type ActiveTrack = Track<ActiveTrackData>;

impl ActiveTrack {
    /// Perceived altitude of this track, available while the vertical channel
    /// is active and its information matrix is invertible.
    pub fn altitude(&self) -> Option<f64> {
        if !self.vertical_channel_active {
            return None;
        }
        let pv = invert_2x2(&self.data.vertical_info_matrix).ok()?;
        Some((pv * self.data.vertical_info_state)[0])
    }
}

/// An ordered, id-keyed collection of one track kind. Iteration order is
/// insertion order; removal keeps that order, which the correlation loops
/// rely on when they erase while walking.
#[derive(Debug, Clone, Default)]
pub struct TrackList<D> {
    entries: Vec<Track<D>>,
}

impl<D> TrackList<D> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, track: Track<D>) {
        self.entries.push(track);
    }

    pub fn get(&self, index: usize) -> &Track<D> {
        &self.entries[index]
    }

    pub fn get_mut(&mut self, index: usize) -> &mut Track<D> {
        &mut self.entries[index]
    }

    /// Removes and returns the entry at `index`, preserving order.
    pub fn remove_at(&mut self, index: usize) -> Track<D> {
        self.entries.remove(index)
    }

    pub fn find(&self, id: TrackId) -> Option<&Track<D>> {
        self.entries.iter().find(|t| t.id == id)
    }

    pub fn find_mut(&mut self, id: TrackId) -> Option<&mut Track<D>> {
        self.entries.iter_mut().find(|t| t.id == id)
    }

    pub fn remove(&mut self, id: TrackId) -> Option<Track<D>> {
        let index = self.entries.iter().position(|t| t.id == id)?;
        Some(self.entries.remove(index))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Track<D>> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Track<D>> {
        self.entries.iter_mut()
    }
}

/// The track registry: three ordered keyed lists with their monotonic id
/// counters. The registry exclusively owns every track.
#[derive(Debug, Clone, Default)]
pub struct TrackStore {
    embryonic_counter: TrackId,
    candidate_counter: TrackId,
    active_counter: TrackId,
    pub embryonic: TrackList<InfoFilterData>,
    pub candidate: TrackList<InfoFilterData>,
    pub active: TrackList<ActiveTrackData>,
}

impl TrackStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_embryonic_id(&mut self) -> TrackId {
        self.embryonic_counter += 1;
        self.embryonic_counter
    }

    pub fn next_candidate_id(&mut self) -> TrackId {
        self.candidate_counter += 1;
        self.candidate_counter
    }

    pub fn next_active_id(&mut self) -> TrackId {
        self.active_counter += 1;
        self.active_counter
    }

    pub fn active_counter(&self) -> TrackId {
        self.active_counter
    }
}

/*! # mtt

A multiple target tracker (MTT) for radar simulation, built around coupled
Kalman filters with interacting multiple models. The tracker ingests radar
measurements and nonlocal (externally originated) tracks, correlates them
against a managed hierarchy of embryonic, candidate and active tracks,
promotes tracks through that hierarchy as statistical confidence builds, and
fuses correlated inputs into the active state estimate.

The horizontal channel runs two process models in parallel (4-state straight
flight, 6-state turning flight) blended by their mode probabilities; the
vertical channel is an independent 2-state Gauss-Markov filter that activates
and deactivates on its own schedule. Embryonic and candidate tracks live in
information form so a newborn track needs no artificial initial covariance.

The tracker is single threaded and cooperative: one `Mtt` instance per
logical tracker, updates strictly in increasing time order, observers
invoked synchronously. Run multiple trackers in parallel only as separate
instances with no shared mutable state.

```
use mtt::params::MttParameters;
use mtt::tracker::Mtt;

let tracker = Mtt::new(MttParameters::default()).with_name("ew-site-1");
assert!(tracker.tracks().active.is_empty());
```
*/

#[macro_use]
extern crate log;

/// Provides the epoch and duration types every record is stamped with.
pub mod time {
    pub use hifitime::{Duration, Epoch, Unit};
}

/// Dense small-matrix helpers layered over nalgebra.
pub mod linalg;

/// Radar measurement records, perceived clusters and nonlocal tracks.
pub mod measurement;

/// Measurement devices and the measurement source contract.
pub mod sensor;

/// The flat tracker configuration record.
pub mod params;

/// Track records and the track registry.
pub mod track;

/// Propagators and information/covariance-form filter updates.
pub mod filter;

/// Statistical gating tests.
pub mod gate;

/// Track-to-track fusion and the IMM combination.
pub mod fusion;

/// The tracker: dispatcher, lifecycle and observers.
pub mod tracker;

/// Active-track projection into the local track store.
pub mod report;

pub use crate::measurement::{Measurement, PerceivedCluster};
pub use crate::params::MttParameters;
pub use crate::tracker::{CorrelationOutcome, Mtt, TrackObserver};

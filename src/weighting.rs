//! Edge weightings
//!
//! A weighting turns an edge's distance and speed into an integer cost.
//! Fastest weighs deciseconds, shortest weighs decimetres. Both always report a
//! duration so matrices and paths can expose travel time.

use std::fmt;

use chrono::{DateTime, Datelike, Duration, FixedOffset, Timelike};
use serde::{Deserialize, Serialize};

use crate::graph::{Direction, Edge, EdgeId, NodeId, RoadGraph, VehicleClass, Weight, INFINITE};

/// Routing profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    Car,
    Hgv,
    Bike,
    Foot,
}

impl Profile {
    pub fn all() -> &'static [Profile] {
        &[Profile::Car, Profile::Hgv, Profile::Bike, Profile::Foot]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Profile::Car => "car",
            Profile::Hgv => "hgv",
            Profile::Bike => "bike",
            Profile::Foot => "foot",
        }
    }

    pub fn from_name(name: &str) -> Option<Profile> {
        match name {
            "car" | "driving-car" => Some(Profile::Car),
            "hgv" | "driving-hgv" => Some(Profile::Hgv),
            "bike" | "cycling-regular" => Some(Profile::Bike),
            "foot" | "foot-walking" => Some(Profile::Foot),
            _ => None,
        }
    }

    /// Speed used when an edge carries none (km/h)
    pub fn default_speed(&self) -> f64 {
        match self {
            Profile::Car => 50.0,
            Profile::Hgv => 40.0,
            Profile::Bike => 18.0,
            Profile::Foot => 5.0,
        }
    }

    /// Cap applied to edge speeds (km/h)
    pub fn max_speed(&self) -> f64 {
        match self {
            Profile::Car => 140.0,
            Profile::Hgv => 90.0,
            Profile::Bike => 30.0,
            Profile::Foot => 6.0,
        }
    }

    pub fn vehicle_class(&self) -> VehicleClass {
        match self {
            Profile::Car => VehicleClass::Car,
            Profile::Hgv => VehicleClass::Hgv,
            Profile::Bike => VehicleClass::Bicycle,
            Profile::Foot => VehicleClass::Pedestrian,
        }
    }

    /// Effective speed on an edge with the given stored speed
    pub fn speed(&self, edge_speed: f64) -> f64 {
        if edge_speed > 0.0 {
            edge_speed.min(self.max_speed())
        } else {
            self.default_speed()
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Weight and duration of one traversal
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cost {
    pub weight: Weight,
    /// Deciseconds
    pub duration: Weight,
}

/// Travel time in deciseconds, `None` if the speed is not positive or the
/// result does not fit a weight
pub fn duration_ds(distance: f64, speed_kmh: f64) -> Option<Weight> {
    if speed_kmh <= 0.0 || !speed_kmh.is_finite() {
        return None;
    }
    to_weight(distance / (speed_kmh / 3.6) * 10.0)
}

/// Rounded down and clamped below [`INFINITE`]
fn floor_weight(value: f64) -> Weight {
    if value.is_nan() || value <= 0.0 {
        0
    } else {
        value.floor().min((INFINITE - 1) as f64) as Weight
    }
}

fn to_weight(value: f64) -> Option<Weight> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    let rounded = value.round();
    if rounded >= INFINITE as f64 {
        None
    } else {
        Some(rounded as Weight)
    }
}

pub trait Weighting: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn profile(&self) -> Profile;

    /// Cost of `distance` metres at `speed_kmh`
    fn weight(&self, distance: f64, speed_kmh: f64) -> Option<Weight>;

    /// Lower bound on the weight of `distance` metres of road, whatever its
    /// speed. Never above `weight(distance, s)` for an admissible speed `s`.
    fn min_weight(&self, distance: f64) -> Weight;

    /// Identifies the weighting a contracted graph was built for
    fn key(&self) -> String {
        format!("{}|{}", self.name(), self.profile().name())
    }

    /// Cost of an original edge travelled at `speed_kmh`. `direction` is the
    /// traversal relative to the stored orientation, `Forward` for base -> adj.
    fn cost_at_speed(&self, edge: &Edge, _direction: Direction, speed_kmh: f64) -> Option<Cost> {
        Some(Cost {
            weight: self.weight(edge.distance, speed_kmh)?,
            duration: duration_ds(edge.distance, speed_kmh)?,
        })
    }

    /// Static cost of traversing an edge in `direction` (see
    /// [`Weighting::cost_at_speed`]). Shortcuts report their stored values.
    fn edge_cost(&self, edge: &Edge, direction: Direction) -> Option<Cost> {
        if let Some(sc) = edge.shortcut {
            return Some(Cost {
                weight: sc.weight,
                duration: sc.duration,
            });
        }
        self.cost_at_speed(edge, direction, self.profile().speed(edge.speed_kmh))
    }

    fn edge_weight(&self, edge: &Edge, direction: Direction) -> Option<Weight> {
        self.edge_cost(edge, direction).map(|c| c.weight)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FastestWeighting {
    pub profile: Profile,
}

impl FastestWeighting {
    pub fn new(profile: Profile) -> Self {
        Self { profile }
    }
}

impl Weighting for FastestWeighting {
    fn name(&self) -> &'static str {
        "fastest"
    }

    fn profile(&self) -> Profile {
        self.profile
    }

    fn weight(&self, distance: f64, speed_kmh: f64) -> Option<Weight> {
        duration_ds(distance, speed_kmh)
    }

    fn min_weight(&self, distance: f64) -> Weight {
        floor_weight(distance / (self.profile.max_speed() / 3.6) * 10.0)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ShortestWeighting {
    pub profile: Profile,
}

impl ShortestWeighting {
    pub fn new(profile: Profile) -> Self {
        Self { profile }
    }
}

impl Weighting for ShortestWeighting {
    fn name(&self) -> &'static str {
        "shortest"
    }

    fn profile(&self) -> Profile {
        self.profile
    }

    fn weight(&self, distance: f64, _speed_kmh: f64) -> Option<Weight> {
        to_weight(distance * 10.0)
    }

    fn min_weight(&self, distance: f64) -> Weight {
        floor_weight(distance * 10.0)
    }
}

/// Build a weighting by name ("fastest" / "recommended" / "shortest")
pub fn by_name(name: &str, profile: Profile) -> Option<Box<dyn Weighting>> {
    match name {
        "fastest" | "recommended" => Some(Box::new(FastestWeighting::new(profile))),
        "shortest" => Some(Box::new(ShortestWeighting::new(profile))),
        _ => None,
    }
}

/// Time-dependent speed source
pub trait SpeedCalculator: Send + Sync {
    /// Speed on `edge` at `at`, `None` if the edge has no time-dependent speed
    fn speed_at(&self, graph: &RoadGraph, edge: EdgeId, at: DateTime<FixedOffset>) -> Option<f64>;
}

/// Reads the hourly speed profiles from side storage
#[derive(Debug, Clone, Copy, Default)]
pub struct HourlySpeeds;

impl SpeedCalculator for HourlySpeeds {
    fn speed_at(&self, graph: &RoadGraph, edge: EdgeId, at: DateTime<FixedOffset>) -> Option<f64> {
        graph
            .storage()
            .speed_profile(edge)
            .map(|p| p.speed(at.weekday().num_days_from_monday(), at.hour()))
    }
}

/// Which end of a traversal the clock refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clock {
    /// Time at which the traversal starts
    Depart(DateTime<FixedOffset>),
    /// Time at which the traversal ends
    Arrive(DateTime<FixedOffset>),
}

/// Time-dependent evaluation context
#[derive(Clone, Copy)]
pub struct Departure<'a> {
    pub at: DateTime<FixedOffset>,
    pub speeds: &'a dyn SpeedCalculator,
}

impl fmt::Debug for Departure<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Departure").field("at", &self.at).finish()
    }
}

impl<'a> Departure<'a> {
    pub fn new(at: DateTime<FixedOffset>, speeds: &'a dyn SpeedCalculator) -> Self {
        Self { at, speeds }
    }

    /// Clock `elapsed` deciseconds after (or, with `reverse`, before) `self.at`
    pub fn clock(&self, elapsed: Weight, reverse: bool) -> Clock {
        let offset = Duration::milliseconds(elapsed as i64 * 100);
        if reverse {
            Clock::Arrive(self.at - offset)
        } else {
            Clock::Depart(self.at + offset)
        }
    }

    /// Cost of travelling edge `id` out of `from` under `clock`. Shortcuts are
    /// unpacked and their parts evaluated in travel order.
    pub fn cost(
        &self,
        weighting: &dyn Weighting,
        graph: &RoadGraph,
        id: EdgeId,
        from: NodeId,
        clock: Clock,
    ) -> Option<Cost> {
        let edge = graph.edge(id);
        let Some(sc) = edge.shortcut else {
            let at = match clock {
                Clock::Depart(t) | Clock::Arrive(t) => t,
            };
            let speed = match self.speeds.speed_at(graph, id, at) {
                Some(s) => s.min(weighting.profile().max_speed()),
                None => weighting.profile().speed(edge.speed_kmh),
            };
            return weighting.cost_at_speed(edge, edge.orientation_from(from), speed);
        };

        // travel order of the skipped edges, with the node each is entered from
        let (first, second) = if from == edge.base {
            ((sc.skipped[0], from), (sc.skipped[1], sc.via))
        } else {
            ((sc.skipped[1], from), (sc.skipped[0], sc.via))
        };

        match clock {
            Clock::Depart(t) => {
                let a = self.cost(weighting, graph, first.0, first.1, clock)?;
                let t2 = t + Duration::milliseconds(a.duration as i64 * 100);
                let b = self.cost(weighting, graph, second.0, second.1, Clock::Depart(t2))?;
                add(a, b)
            }
            Clock::Arrive(t) => {
                let b = self.cost(weighting, graph, second.0, second.1, clock)?;
                let t2 = t - Duration::milliseconds(b.duration as i64 * 100);
                let a = self.cost(weighting, graph, first.0, first.1, Clock::Arrive(t2))?;
                add(a, b)
            }
        }
    }
}

fn add(a: Cost, b: Cost) -> Option<Cost> {
    let weight = a.weight.checked_add(b.weight).filter(|w| *w < INFINITE)?;
    let duration = a.duration.checked_add(b.duration).filter(|d| *d < INFINITE)?;
    Some(Cost { weight, duration })
}

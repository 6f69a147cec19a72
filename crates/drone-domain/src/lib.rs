//! # Drone Traffic Simulation - Domain Model
//!
//! Value objects and geometry shared by the simulator and its input
//! loaders. Every type here is immutable once built.

use chrono::{NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// GEOMETRY
// =============================================================================

/// Mean Earth radius used by the haversine formula.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in meters between two lat/lon points (Haversine formula)
#[must_use]
pub fn distance_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Initial bearing in degrees, normalized to `[0, 360)`.
///
/// Identical points have no direction; they yield `0.0`.
#[must_use]
pub fn bearing_degrees(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let y = delta_lon.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * delta_lon.cos();

    let bearing = (y.atan2(x).to_degrees() + 360.0) % 360.0;
    // (-0.0 + 360) % 360 can round to 360 for tiny negative angles
    if bearing >= 360.0 { 0.0 } else { bearing }
}

// =============================================================================
// VALUE OBJECTS
// =============================================================================

/// Geographic position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Validated constructor for externally supplied positions.
    pub fn checked(latitude: f64, longitude: f64) -> Result<Self, DomainError> {
        if !latitude.is_finite()
            || !longitude.is_finite()
            || !(-90.0..=90.0).contains(&latitude)
            || !(-180.0..=180.0).contains(&longitude)
        {
            return Err(DomainError::InvalidCoordinates {
                lat: latitude,
                lon: longitude,
            });
        }
        Ok(Self::new(latitude, longitude))
    }

    #[must_use]
    pub fn distance_to_m(&self, other: &Coordinates) -> f64 {
        distance_meters(self.latitude, self.longitude, other.latitude, other.longitude)
    }

    #[must_use]
    pub fn bearing_to_deg(&self, other: &Coordinates) -> f64 {
        bearing_degrees(self.latitude, self.longitude, other.latitude, other.longitude)
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.latitude, self.longitude)
    }
}

/// Drone identifier as it appears in the route files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DroneId(pub u32);

impl fmt::Display for DroneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A timed destination: the drone must be at `position` by `arrival`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub drone_id: DroneId,
    pub position: Coordinates,
    pub arrival: NaiveDateTime,
}

impl Waypoint {
    pub fn new(drone_id: DroneId, latitude: f64, longitude: f64, arrival: NaiveDateTime) -> Self {
        Self {
            drone_id,
            position: Coordinates::new(latitude, longitude),
            arrival,
        }
    }

    /// Time of day the drone is due; the simulated clock carries no date.
    #[must_use]
    pub fn arrival_time(&self) -> NaiveTime {
        self.arrival.time()
    }
}

/// Fixed ground station checked for drone proximity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub name: String,
    pub position: Coordinates,
}

impl Station {
    pub fn new(name: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            name: name.into(),
            position: Coordinates::new(latitude, longitude),
        }
    }
}

// =============================================================================
// ENUMS
// =============================================================================

/// Synthetic traffic condition observed near a station
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrafficCondition {
    Heavy,
    Light,
    Moderate,
}

impl TrafficCondition {
    pub const ALL: [TrafficCondition; 3] = [Self::Heavy, Self::Light, Self::Moderate];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Heavy => "HEAVY",
            Self::Light => "LIGHT",
            Self::Moderate => "MODERATE",
        }
    }
}

impl fmt::Display for TrafficCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// REPORTS
// =============================================================================

/// Traffic report forwarded by the dispatcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficReport {
    pub drone_id: DroneId,
    pub station: String,
    pub sim_time: NaiveTime,
    pub speed_mps: f64,
    pub condition: TrafficCondition,
}

// =============================================================================
// ERRORS
// =============================================================================

/// Domain-level errors
#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("Invalid coordinates: lat={lat}, lon={lon}")]
    InvalidCoordinates { lat: f64, lon: f64 },

    #[error("No initial waypoint for drone {0}")]
    MissingInitialWaypoint(DroneId),
}

//! # Drone Simulator
//!
//! Time-synchronized simulation of drones flying timed waypoint routes and
//! reporting synthetic traffic conditions near ground stations.
//!
//! ## Features
//!
//! - Shared simulated clock advanced by the dispatcher, read by every drone
//! - Bounded per-drone waypoint queues topped up from a backlog each tick
//! - Great-circle targeting with dead-reckoning motion
//! - Station proximity reports streamed back through the dispatcher

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod drone;
pub mod error;
pub mod input;
pub mod queue;

pub use clock::SimClock;
pub use config::SimConfig;
pub use dispatcher::{Dispatcher, SimulationSummary};
pub use drone::{
    DispatchLink, Drone, DroneHandle, DroneOutcome, DroneSummary, FlightPhase, FlightSettings,
};
pub use error::{Result, SimulationError};
pub use queue::WaypointQueue;

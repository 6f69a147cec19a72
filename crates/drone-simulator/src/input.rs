//! CSV loaders for stations and drone routes.
//!
//! # Formats
//!
//! Stations, one per row, no header:
//!
//! ```csv
//! Acton Town,51.503071,-0.280303
//! ```
//!
//! Routes live in `<drone_id>.csv`, one waypoint per row, no header:
//!
//! ```csv
//! 5937,"51.476105","-0.100224","2011-03-22 07:55:26"
//! ```
//!
//! Rows are expected in arrival order. The loader keeps file order and only
//! logs when it sees a row that goes back in time.

use crate::error::{Result, SimulationError};
use chrono::NaiveDateTime;
use csv::{ReaderBuilder, Trim};
use drone_domain::{Coordinates, DroneId, Station, Waypoint};
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use tracing::debug;

const ARRIVAL_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Deserialize)]
struct StationRecord {
    name: String,
    latitude: f64,
    longitude: f64,
}

#[derive(Deserialize)]
struct WaypointRecord {
    drone_id: u32,
    latitude: f64,
    longitude: f64,
    arrival: String,
}

fn reader<R: Read>(source: R) -> csv::Reader<R> {
    ReaderBuilder::new()
        .has_headers(false)
        .trim(Trim::All)
        .from_reader(source)
}

/// Read stations from any `Read` source.
pub fn load_stations_reader<R: Read>(source: R) -> Result<Vec<Station>> {
    let mut stations = Vec::new();
    for row in reader(source).deserialize::<StationRecord>() {
        let row = row?;
        let position = Coordinates::checked(row.latitude, row.longitude)?;
        stations.push(Station {
            name: row.name,
            position,
        });
    }
    Ok(stations)
}

pub fn load_stations(path: &Path) -> Result<Vec<Station>> {
    let file = std::fs::File::open(path)?;
    load_stations_reader(file)
}

/// Read one drone's route from any `Read` source.
///
/// Every row must belong to `drone_id`.
pub fn load_route_reader<R: Read>(source: R, drone_id: DroneId) -> Result<Vec<Waypoint>> {
    let mut route: Vec<Waypoint> = Vec::new();

    for (line, row) in reader(source).deserialize::<WaypointRecord>().enumerate() {
        let row = row?;
        if row.drone_id != drone_id.0 {
            return Err(SimulationError::Input(format!(
                "row {} belongs to drone {}, expected {drone_id}",
                line + 1,
                row.drone_id
            )));
        }

        let position = Coordinates::checked(row.latitude, row.longitude)?;
        let arrival = NaiveDateTime::parse_from_str(&row.arrival, ARRIVAL_FORMAT).map_err(|e| {
            SimulationError::Input(format!(
                "row {}: invalid arrival '{}': {e}",
                line + 1,
                row.arrival
            ))
        })?;

        if route.last().is_some_and(|prev| prev.arrival > arrival) {
            debug!(
                drone_id = %drone_id,
                row = line + 1,
                "Route row arrives before its predecessor"
            );
        }

        route.push(Waypoint {
            drone_id,
            position,
            arrival,
        });
    }

    Ok(route)
}

pub fn load_route(path: &Path, drone_id: DroneId) -> Result<Vec<Waypoint>> {
    let file = std::fs::File::open(path)?;
    load_route_reader(file, drone_id)
}

/// Load `<id>.csv` from `dir` for every drone in `drone_ids`.
pub fn load_routes(dir: &Path, drone_ids: &[DroneId]) -> Result<HashMap<DroneId, Vec<Waypoint>>> {
    drone_ids
        .iter()
        .map(|&id| {
            let path = dir.join(format!("{id}.csv"));
            load_route(&path, id).map(|route| (id, route))
        })
        .collect()
}

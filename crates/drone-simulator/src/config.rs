//! # Simulation Configuration
//!
//! Environment-based configuration for a simulation run.

use crate::error::{Result, SimulationError};
use crate::queue::DEFAULT_QUEUE_CAPACITY;
use chrono::NaiveTime;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Simulation run configuration
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Simulated time of day the run starts at
    pub start_time: NaiveTime,

    /// Simulated time of day the run ends at
    pub end_time: NaiveTime,

    /// Real time per simulated second
    pub sample_interval: Duration,

    /// Idle wait between drone polls
    pub poll_interval: Duration,

    /// Station proximity radius in meters
    pub proximity_radius_m: f64,

    /// Waypoints a drone can hold at once
    pub queue_capacity: usize,

    /// Crash chance per motion step
    pub crash_probability: f64,

    /// Seed for per-drone RNGs; entropy when unset
    pub seed: Option<u64>,
}

impl SimConfig {
    pub const DEFAULT_SAMPLE_INTERVAL_NS: u64 = 10_000_000;
    pub const DEFAULT_POLL_INTERVAL_US: u64 = 1_000;
    pub const DEFAULT_PROXIMITY_RADIUS_M: f64 = 350.0;
    pub const DEFAULT_CRASH_PROBABILITY: f64 = 1e-6;

    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            start_time: env_time("SIM_START_TIME").unwrap_or(defaults.start_time),

            end_time: env_time("SIM_END_TIME").unwrap_or(defaults.end_time),

            sample_interval: env_parse("SIM_SAMPLE_INTERVAL_NS")
                .map(Duration::from_nanos)
                .unwrap_or(defaults.sample_interval),

            poll_interval: env_parse("SIM_POLL_INTERVAL_US")
                .map(Duration::from_micros)
                .unwrap_or(defaults.poll_interval),

            proximity_radius_m: env_parse("SIM_PROXIMITY_RADIUS_M")
                .unwrap_or(defaults.proximity_radius_m),

            queue_capacity: env_parse("SIM_QUEUE_CAPACITY").unwrap_or(defaults.queue_capacity),

            crash_probability: env_parse("SIM_CRASH_PROBABILITY")
                .unwrap_or(defaults.crash_probability),

            seed: env_parse("SIM_SEED"),
        }
    }

    /// Reject settings the run loop cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.end_time <= self.start_time {
            return Err(SimulationError::Config(format!(
                "end time {} is not after start time {}",
                self.end_time, self.start_time
            )));
        }
        if self.sample_interval.is_zero() {
            return Err(SimulationError::Config("sample interval must be positive".into()));
        }
        if self.poll_interval.is_zero() {
            return Err(SimulationError::Config("poll interval must be positive".into()));
        }
        if self.queue_capacity == 0 {
            return Err(SimulationError::Config("queue capacity must be positive".into()));
        }
        if self.proximity_radius_m.is_nan() || self.proximity_radius_m < 0.0 {
            return Err(SimulationError::Config(format!(
                "invalid proximity radius {}",
                self.proximity_radius_m
            )));
        }
        if !(0.0..=1.0).contains(&self.crash_probability) {
            return Err(SimulationError::Config(format!(
                "crash probability {} outside [0, 1]",
                self.crash_probability
            )));
        }
        Ok(())
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            start_time: NaiveTime::from_hms_opt(7, 47, 54).unwrap_or_default(),
            end_time: NaiveTime::from_hms_opt(8, 10, 0).unwrap_or_default(),
            sample_interval: Duration::from_nanos(Self::DEFAULT_SAMPLE_INTERVAL_NS),
            poll_interval: Duration::from_micros(Self::DEFAULT_POLL_INTERVAL_US),
            proximity_radius_m: Self::DEFAULT_PROXIMITY_RADIUS_M,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            crash_probability: Self::DEFAULT_CRASH_PROBABILITY,
            seed: None,
        }
    }
}

/// Parse a `HH:MM:SS` time of day.
pub fn parse_time_of_day(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M:%S")
        .map_err(|e| SimulationError::Config(format!("invalid time of day '{value}': {e}")))
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_time(key: &str) -> Option<NaiveTime> {
    env::var(key).ok().and_then(|v| parse_time_of_day(&v).ok())
}

//! Dispatcher: owns simulated time and each drone's waypoint backlog.

use crate::clock::SimClock;
use crate::config::SimConfig;
use crate::drone::{DispatchLink, Drone, DroneHandle, DroneSummary, FlightSettings};
use crate::error::Result;
use chrono::{Duration as TimeDelta, NaiveTime};
use drone_domain::{DomainError, DroneId, Station, TrafficCondition, TrafficReport, Waypoint};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{Instant, sleep};
use tracing::{info, warn};

/// 64-bit fractional golden-ratio constant for per-drone seed mixing.
const SEED_MIXING_CONSTANT: u64 = 0x9e37_79b9_7f4a_7c15;

/// Shared state drones reach through [`DispatchLink`].
struct DispatchHub {
    clock: SimClock,
    roster: RwLock<HashMap<DroneId, Arc<DroneHandle>>>,
    reports: UnboundedSender<TrafficReport>,
}

impl DispatchHub {
    fn speed_of(&self, drone_id: DroneId) -> f64 {
        self.roster
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&drone_id)
            .map_or(0.0, |handle| handle.speed())
    }
}

impl DispatchLink for DispatchHub {
    fn current_time(&self) -> NaiveTime {
        self.clock.now()
    }

    fn report_traffic(&self, drone_id: DroneId, station: &Station, condition: TrafficCondition) {
        let report = TrafficReport {
            drone_id,
            station: station.name.clone(),
            sim_time: self.clock.now(),
            speed_mps: self.speed_of(drone_id),
            condition,
        };

        info!(
            drone_id = %report.drone_id,
            station = %report.station,
            sim_time = %report.sim_time,
            speed_mps = report.speed_mps,
            condition = %report.condition,
            "Dispatcher is reporting traffic"
        );

        // Nobody listening is fine; the log line above is the record.
        let _ = self.reports.send(report);
    }
}

/// Outcome of a full simulation run.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationSummary {
    pub final_time: NaiveTime,
    pub drones: Vec<DroneSummary>,
}

impl SimulationSummary {
    pub fn total_reports(&self) -> u64 {
        self.drones.iter().map(|d| d.reports_sent).sum()
    }
}

/// Simulation coordinator.
pub struct Dispatcher {
    config: SimConfig,
    hub: Arc<DispatchHub>,
    backlogs: BTreeMap<DroneId, VecDeque<Waypoint>>,
    handles: BTreeMap<DroneId, Arc<DroneHandle>>,
    drones: Vec<Drone>,
    drained: BTreeSet<DroneId>,
    report_rx: Option<UnboundedReceiver<TrafficReport>>,
}

impl Dispatcher {
    /// Build a dispatcher and one parked drone per backlog.
    ///
    /// Each backlog must be sorted by arrival time and hold at least the
    /// drone's starting waypoint.
    pub fn new(
        config: SimConfig,
        backlogs: HashMap<DroneId, Vec<Waypoint>>,
        stations: Vec<Station>,
    ) -> Result<Self> {
        config.validate()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let hub = Arc::new(DispatchHub {
            clock: SimClock::new(config.start_time),
            roster: RwLock::new(HashMap::with_capacity(backlogs.len())),
            reports: tx,
        });

        let stations: Arc<[Station]> = stations.into();
        let settings = FlightSettings::from(&config);
        let link: Arc<dyn DispatchLink> = hub.clone();

        let mut queued = BTreeMap::new();
        let mut handles = BTreeMap::new();
        let mut drones = Vec::with_capacity(backlogs.len());

        let ordered: BTreeMap<_, _> = backlogs.into_iter().collect();
        for (drone_id, backlog) in ordered {
            let first = backlog
                .first()
                .ok_or(DomainError::MissingInitialWaypoint(drone_id))?;

            let rng = match config.seed {
                Some(seed) => StdRng::seed_from_u64(
                    seed ^ u64::from(drone_id.0).wrapping_mul(SEED_MIXING_CONSTANT),
                ),
                None => StdRng::from_entropy(),
            };

            let drone = Drone::new(
                drone_id,
                Arc::clone(&stations),
                first,
                Arc::clone(&link),
                settings,
            )
            .with_rng(rng);

            handles.insert(drone_id, drone.handle());
            queued.insert(drone_id, VecDeque::from(backlog));
            drones.push(drone);
        }

        hub.roster
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(handles.iter().map(|(id, h)| (*id, Arc::clone(h))));

        Ok(Self {
            config,
            hub,
            backlogs: queued,
            handles,
            drones,
            drained: BTreeSet::new(),
            report_rx: Some(rx),
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Snapshot of the simulated clock.
    pub fn current_time(&self) -> NaiveTime {
        self.hub.clock.now()
    }

    /// Move the simulated clock forward.
    pub fn advance_time(&self, delta: TimeDelta) -> NaiveTime {
        self.hub.clock.advance(delta)
    }

    /// Record a traffic report from a drone.
    pub fn report_traffic(
        &self,
        drone_id: DroneId,
        station: &Station,
        condition: TrafficCondition,
    ) {
        self.hub.report_traffic(drone_id, station, condition);
    }

    /// Take the receiving end of the report stream. Only the first call gets it.
    pub fn take_reports(&mut self) -> Option<UnboundedReceiver<TrafficReport>> {
        self.report_rx.take()
    }

    pub fn drone_ids(&self) -> impl Iterator<Item = DroneId> + '_ {
        self.handles.keys().copied()
    }

    pub fn handle(&self, drone_id: DroneId) -> Option<&Arc<DroneHandle>> {
        self.handles.get(&drone_id)
    }

    /// Waypoints not yet handed to `drone_id`.
    pub fn backlog_len(&self, drone_id: DroneId) -> usize {
        self.backlogs.get(&drone_id).map_or(0, VecDeque::len)
    }

    /// Fill every drone's queue from its backlog until full or drained.
    /// Returns the number of waypoints delivered.
    pub fn load_initial_destinations(&mut self) -> usize {
        let mut delivered = 0;
        for (drone_id, backlog) in &mut self.backlogs {
            let Some(handle) = self.handles.get(drone_id) else {
                continue;
            };
            info!(drone_id = %drone_id, "Sending initial destinations to drone");

            while let Some(next) = backlog.front() {
                if !handle.enqueue(*next) {
                    break;
                }
                backlog.pop_front();
                delivered += 1;
            }
        }
        delivered
    }

    /// Offer each drone the next backlog entry. A full queue keeps the entry
    /// for the next tick. Returns the number of waypoints delivered.
    pub fn dispatch_tick(&mut self) -> usize {
        let mut delivered = 0;
        for (drone_id, backlog) in &mut self.backlogs {
            let Some(handle) = self.handles.get(drone_id) else {
                continue;
            };

            match backlog.front() {
                Some(next) => {
                    if handle.enqueue(*next) {
                        backlog.pop_front();
                        delivered += 1;
                    }
                }
                None => {
                    if self.drained.insert(*drone_id) {
                        info!(
                            drone_id = %drone_id,
                            "Dispatcher has no more destinations for drone"
                        );
                    }
                }
            }
        }
        delivered
    }

    /// Run the simulation to the configured end time, then stop every drone
    /// and wait for them.
    pub async fn run(mut self) -> Result<SimulationSummary> {
        info!(
            drones = self.handles.len(),
            start = %self.config.start_time,
            end = %self.config.end_time,
            "Starting simulation"
        );

        // Unclaimed report stream: close it so reports are only logged.
        drop(self.report_rx.take());

        self.load_initial_destinations();

        let tasks: Vec<_> = std::mem::take(&mut self.drones)
            .into_iter()
            .map(|drone| (drone.id(), tokio::spawn(drone.run())))
            .collect();

        let interval = self.config.sample_interval;
        let mut t0 = Instant::now();
        while self.current_time() < self.config.end_time {
            sleep(interval).await;

            let elapsed = t0.elapsed();
            if elapsed < interval {
                continue;
            }
            let ticks = elapsed.as_nanos() / interval.as_nanos();
            let ticks = u32::try_from(ticks).unwrap_or(u32::MAX);

            self.advance_time(TimeDelta::seconds(i64::from(ticks)));
            self.dispatch_tick();
            t0 += interval * ticks;
        }

        let final_time = self.current_time();
        info!(sim_time = %final_time, "Shutting down");

        for handle in self.handles.values() {
            handle.terminate();
        }

        let mut drones = Vec::with_capacity(tasks.len());
        for (drone_id, task) in tasks {
            match task.await {
                Ok(summary) => drones.push(summary),
                Err(err) => {
                    warn!(drone_id = %drone_id, error = %err, "Drone task failed");
                    return Err(err.into());
                }
            }
        }

        Ok(SimulationSummary { final_time, drones })
    }
}

//! Drone flight loop: waypoint targeting, dead reckoning, and station
//! proximity reports.

use crate::config::SimConfig;
use crate::queue::WaypointQueue;
use chrono::NaiveTime;
use drone_domain::{Coordinates, DroneId, Station, TrafficCondition, Waypoint};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Meters per degree of latitude.
const METERS_PER_DEG_LAT: f64 = 110_540.0;
/// Meters per degree of longitude at the equator.
const METERS_PER_DEG_LON: f64 = 111_320.0;

/// What a drone may ask of its dispatcher.
pub trait DispatchLink: Send + Sync {
    /// Current simulated time.
    fn current_time(&self) -> NaiveTime;

    /// Forward a traffic observation. Must not block the caller.
    fn report_traffic(&self, drone_id: DroneId, station: &Station, condition: TrafficCondition);
}

/// Motion state of a drone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FlightPhase {
    IdleAtWaypoint,
    EnRoute,
    Arrived,
    Terminated,
}

/// Why a drone stopped flying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DroneOutcome {
    /// Ran out of waypoints
    Exhausted,
    /// Simulated catastrophic failure
    Crashed,
    /// Stopped by the dispatcher
    Shutdown,
}

/// Per-drone tuning taken from [`SimConfig`].
#[derive(Debug, Clone, Copy)]
pub struct FlightSettings {
    pub proximity_radius_m: f64,
    pub crash_probability: f64,
    pub poll_interval: Duration,
    pub queue_capacity: usize,
}

impl From<&SimConfig> for FlightSettings {
    fn from(config: &SimConfig) -> Self {
        Self {
            proximity_radius_m: config.proximity_radius_m,
            crash_probability: config.crash_probability,
            poll_interval: config.poll_interval,
            queue_capacity: config.queue_capacity,
        }
    }
}

impl FlightSettings {
    /// Crash chance usable as a Bernoulli parameter; NaN counts as zero.
    pub fn crash_chance(&self) -> f64 {
        if self.crash_probability.is_nan() {
            0.0
        } else {
            self.crash_probability.clamp(0.0, 1.0)
        }
    }
}

impl Default for FlightSettings {
    fn default() -> Self {
        Self::from(&SimConfig::default())
    }
}

/// The part of a drone the dispatcher holds on to while the drone flies.
#[derive(Debug)]
pub struct DroneHandle {
    id: DroneId,
    queue: WaypointQueue,
    speed_bits: AtomicU64,
    terminated: AtomicBool,
}

impl DroneHandle {
    fn new(id: DroneId, capacity: usize) -> Self {
        Self {
            id,
            queue: WaypointQueue::new(capacity),
            speed_bits: AtomicU64::new(0.0_f64.to_bits()),
            terminated: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> DroneId {
        self.id
    }

    /// Hand the drone another waypoint; `false` when its memory is full.
    pub fn enqueue(&self, waypoint: Waypoint) -> bool {
        self.queue.offer(waypoint)
    }

    /// Ask the drone to stop. Observed on its next loop iteration.
    pub fn terminate(&self) {
        self.terminated.store(true, Ordering::Release);
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Current speed in m/s.
    pub fn speed(&self) -> f64 {
        f64::from_bits(self.speed_bits.load(Ordering::Relaxed))
    }

    pub fn queue(&self) -> &WaypointQueue {
        &self.queue
    }

    fn set_speed(&self, speed_mps: f64) {
        self.speed_bits.store(speed_mps.to_bits(), Ordering::Relaxed);
    }
}

/// Final state of a drone after its loop exits.
#[derive(Debug, Clone, Serialize)]
pub struct DroneSummary {
    pub drone_id: DroneId,
    pub outcome: DroneOutcome,
    pub position: Coordinates,
    pub waypoints_reached: u32,
    pub reports_sent: u64,
}

/// Simulated drone.
pub struct Drone {
    handle: Arc<DroneHandle>,
    stations: Arc<[Station]>,
    link: Arc<dyn DispatchLink>,
    settings: FlightSettings,
    rng: StdRng,

    position: Coordinates,
    bearing_deg: f64,
    speed_mps: f64,
    /// Distance from the last retarget to the current waypoint
    distance_to_destination_m: f64,
    /// Distance flown since the last retarget
    distance_travelled_m: f64,
    last_update: NaiveTime,

    phase: FlightPhase,
    outcome: Option<DroneOutcome>,
    waypoints_reached: u32,
    reports_sent: u64,
}

impl Drone {
    /// Create a drone parked on its first waypoint.
    pub fn new(
        id: DroneId,
        stations: Arc<[Station]>,
        initial: &Waypoint,
        link: Arc<dyn DispatchLink>,
        settings: FlightSettings,
    ) -> Self {
        let last_update = link.current_time();
        Self {
            handle: Arc::new(DroneHandle::new(id, settings.queue_capacity)),
            stations,
            link,
            settings,
            rng: StdRng::from_entropy(),
            position: initial.position,
            bearing_deg: 0.0,
            speed_mps: 0.0,
            distance_to_destination_m: 0.0,
            distance_travelled_m: 0.0,
            last_update,
            phase: FlightPhase::IdleAtWaypoint,
            outcome: None,
            waypoints_reached: 0,
            reports_sent: 0,
        }
    }

    /// Replace the random source used for crash draws and conditions.
    #[must_use]
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn id(&self) -> DroneId {
        self.handle.id
    }

    pub fn handle(&self) -> Arc<DroneHandle> {
        Arc::clone(&self.handle)
    }

    pub fn enqueue(&self, waypoint: Waypoint) -> bool {
        self.handle.enqueue(waypoint)
    }

    pub fn terminate(&self) {
        self.handle.terminate();
    }

    pub fn speed(&self) -> f64 {
        self.handle.speed()
    }

    pub fn position(&self) -> Coordinates {
        self.position
    }

    pub fn bearing(&self) -> f64 {
        self.bearing_deg
    }

    pub fn phase(&self) -> FlightPhase {
        self.phase
    }

    pub fn outcome(&self) -> Option<DroneOutcome> {
        self.outcome
    }

    pub fn distance_to_destination(&self) -> f64 {
        self.distance_to_destination_m
    }

    pub fn distance_travelled(&self) -> f64 {
        self.distance_travelled_m
    }

    /// Still flying and not asked to stop.
    pub fn is_active(&self) -> bool {
        self.phase != FlightPhase::Terminated && !self.handle.is_terminated()
    }

    /// Fly until out of waypoints, crashed, or terminated.
    pub async fn run(mut self) -> DroneSummary {
        self.launch();

        while self.is_active() {
            if !self.poll() {
                tokio::time::sleep(self.settings.poll_interval).await;
            }
        }

        if self.outcome.is_none() {
            self.finish(DroneOutcome::Shutdown);
        }
        info!(
            drone_id = %self.id(),
            outcome = ?self.outcome,
            reports = self.reports_sent,
            position = %self.position,
            "Drone stopped"
        );
        self.summary()
    }

    /// Reset the update marker and target the head of the queue.
    pub fn launch(&mut self) {
        self.last_update = self.link.current_time();
        self.acquire_target(self.last_update);
    }

    /// One loop iteration. Returns `true` when a motion step was taken.
    pub fn poll(&mut self) -> bool {
        if !self.is_active() {
            return false;
        }

        let now = self.link.current_time();
        let elapsed = now.signed_duration_since(self.last_update).num_seconds();
        if elapsed < 1 {
            return false;
        }

        self.check_nearby_stations();
        self.advance(elapsed as f64, now);
        self.last_update = now;
        true
    }

    pub fn summary(&self) -> DroneSummary {
        DroneSummary {
            drone_id: self.id(),
            outcome: self.outcome.unwrap_or(DroneOutcome::Shutdown),
            position: self.position,
            waypoints_reached: self.waypoints_reached,
            reports_sent: self.reports_sent,
        }
    }

    /// Set speed and bearing to make the queue head on time.
    fn acquire_target(&mut self, now: NaiveTime) {
        loop {
            let Some(target) = self.handle.queue.peek() else {
                info!(drone_id = %self.id(), "Drone has no more destinations");
                self.finish(DroneOutcome::Exhausted);
                return;
            };

            let seconds = target.arrival_time().signed_duration_since(now).num_seconds();
            if seconds <= 0 {
                // Already due: place the drone on it and move on.
                warn!(
                    drone_id = %self.id(),
                    due = %target.arrival_time(),
                    sim_time = %now,
                    "Waypoint is overdue, skipping ahead"
                );
                self.position = target.position;
                self.handle.queue.pop();
                self.waypoints_reached += 1;
                continue;
            }

            self.distance_to_destination_m = self.position.distance_to_m(&target.position);
            self.distance_travelled_m = 0.0;
            self.speed_mps = self.distance_to_destination_m / seconds as f64;
            self.bearing_deg = self.position.bearing_to_deg(&target.position);
            self.handle.set_speed(self.speed_mps);
            self.phase = FlightPhase::EnRoute;

            debug!(
                drone_id = %self.id(),
                target = %target.position,
                distance_m = self.distance_to_destination_m,
                speed_mps = self.speed_mps,
                bearing_deg = self.bearing_deg,
                "Drone heading to next waypoint"
            );
            return;
        }
    }

    /// Report a random condition for every station within range.
    fn check_nearby_stations(&mut self) {
        let radius = self.settings.proximity_radius_m;
        for station in self.stations.iter() {
            if self.position.distance_to_m(&station.position) <= radius {
                let index = self.rng.gen_range(0..TrafficCondition::ALL.len());
                let condition = TrafficCondition::ALL[index];
                debug!(
                    drone_id = %self.id(),
                    station = %station.name,
                    "Drone is sending report to dispatcher"
                );
                self.link.report_traffic(self.id(), station, condition);
                self.reports_sent += 1;
            }
        }
    }

    /// Dead-reckoning step over `elapsed_s` simulated seconds.
    ///
    /// The bearing is a compass bearing: its north component (cos) moves
    /// latitude and its east component (sin) moves longitude.
    fn advance(&mut self, elapsed_s: f64, now: NaiveTime) {
        if self.rng.gen_bool(self.settings.crash_chance()) {
            warn!(
                drone_id = %self.id(),
                position = %self.position,
                "Drone crashed into a building"
            );
            self.finish(DroneOutcome::Crashed);
            return;
        }

        let d = self.speed_mps * elapsed_s;
        let bearing = self.bearing_deg.to_radians();

        self.position.latitude += d * bearing.cos() / METERS_PER_DEG_LAT;
        self.position.longitude +=
            d * bearing.sin() / (METERS_PER_DEG_LON * self.position.latitude.to_radians().cos());
        self.distance_travelled_m += d;

        if self.distance_travelled_m >= self.distance_to_destination_m {
            if let Some(reached) = self.handle.queue.pop() {
                self.position = reached.position;
                self.waypoints_reached += 1;
                self.phase = FlightPhase::Arrived;
                debug!(drone_id = %self.id(), position = %self.position, "Drone reached waypoint");
            }
            self.acquire_target(now);
        }
    }

    fn finish(&mut self, outcome: DroneOutcome) {
        self.phase = FlightPhase::Terminated;
        self.outcome = Some(outcome);
        self.handle.terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as TimeDelta, NaiveDate, NaiveDateTime};
    use std::sync::{Mutex, RwLock};

    /// Dispatcher stand-in with a hand-driven clock.
    struct ManualLink {
        now: RwLock<NaiveTime>,
        reports: Mutex<Vec<(DroneId, String, TrafficCondition)>>,
    }

    impl ManualLink {
        fn new(now: NaiveTime) -> Arc<Self> {
            Arc::new(Self {
                now: RwLock::new(now),
                reports: Mutex::new(Vec::new()),
            })
        }

        fn advance(&self, seconds: i64) {
            let mut now = self.now.write().unwrap();
            *now += TimeDelta::seconds(seconds);
        }

        fn report_count(&self) -> usize {
            self.reports.lock().unwrap().len()
        }
    }

    impl DispatchLink for ManualLink {
        fn current_time(&self) -> NaiveTime {
            *self.now.read().unwrap()
        }

        fn report_traffic(
            &self,
            drone_id: DroneId,
            station: &Station,
            condition: TrafficCondition,
        ) {
            self.reports
                .lock()
                .unwrap()
                .push((drone_id, station.name.clone(), condition));
        }
    }

    fn at(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    fn at_date(time: NaiveTime) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2011, 3, 22).unwrap().and_time(time)
    }

    fn waypoint(lat: f64, lon: f64, time: NaiveTime) -> Waypoint {
        Waypoint::new(DroneId(5937), lat, lon, at_date(time))
    }

    fn settings(crash_probability: f64) -> FlightSettings {
        FlightSettings {
            crash_probability,
            poll_interval: Duration::from_millis(1),
            ..FlightSettings::default()
        }
    }

    fn drone(link: &Arc<ManualLink>, stations: Vec<Station>, crash_probability: f64) -> Drone {
        let first = waypoint(51.5, -0.12, at(8, 0, 0));
        let drone = Drone::new(
            DroneId(5937),
            stations.into(),
            &first,
            Arc::clone(link) as Arc<dyn DispatchLink>,
            settings(crash_probability),
        )
        .with_rng(StdRng::seed_from_u64(7));
        assert!(drone.enqueue(first));
        drone
    }

    #[test]
    fn test_enqueue_respects_capacity() {
        let link = ManualLink::new(at(8, 0, 0));
        let drone = drone(&link, Vec::new(), 0.0);
        for i in 1..10 {
            assert!(drone.enqueue(waypoint(51.5 + f64::from(i) * 0.001, -0.12, at(8, i, 0))));
        }
        let before = drone.handle().queue().snapshot();
        assert!(!drone.enqueue(waypoint(52.0, -0.12, at(9, 0, 0))));
        assert_eq!(drone.handle().queue().snapshot(), before);
    }

    #[test]
    fn test_overdue_first_waypoint_targets_next() {
        let link = ManualLink::new(at(8, 0, 0));
        let mut drone = drone(&link, Vec::new(), 0.0);
        assert!(drone.enqueue(waypoint(51.501, -0.12, at(8, 1, 40))));

        drone.launch();

        assert_eq!(drone.phase(), FlightPhase::EnRoute);
        assert_eq!(drone.handle().queue().len(), 1);
        assert!(drone.bearing().abs() < 1e-6);
        let expected_distance = drone_domain::distance_meters(51.5, -0.12, 51.501, -0.12);
        assert!((drone.distance_to_destination() - expected_distance).abs() < 1e-9);
        assert!((drone.speed() - expected_distance / 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_motion_step_moves_along_bearing() {
        let link = ManualLink::new(at(8, 0, 0));
        let mut drone = drone(&link, Vec::new(), 0.0);
        assert!(drone.enqueue(waypoint(51.501, -0.12, at(8, 1, 40))));
        drone.launch();

        assert!(!drone.poll(), "no simulated time has passed");
        link.advance(10);
        assert!(drone.poll());

        let step = drone.speed() * 10.0;
        assert!((drone.distance_travelled() - step).abs() < 1e-9);
        assert!((drone.position().latitude - (51.5 + step / METERS_PER_DEG_LAT)).abs() < 1e-9);
        assert!((drone.position().longitude + 0.12).abs() < 1e-9);
        assert_eq!(drone.phase(), FlightPhase::EnRoute);
    }

    #[test]
    fn test_exhausted_drone_terminates_and_stays_terminated() {
        let link = ManualLink::new(at(8, 0, 0));
        let mut drone = drone(&link, Vec::new(), 0.0);
        assert!(drone.enqueue(waypoint(51.501, -0.12, at(8, 1, 40))));
        drone.launch();

        link.advance(101);
        assert!(drone.poll());

        assert_eq!(drone.phase(), FlightPhase::Terminated);
        assert_eq!(drone.outcome(), Some(DroneOutcome::Exhausted));
        assert!(drone.handle().is_terminated());
        assert_eq!(drone.position(), Coordinates::new(51.501, -0.12));

        // Late deliveries do not revive it.
        assert!(drone.enqueue(waypoint(51.502, -0.12, at(8, 5, 0))));
        link.advance(10);
        assert!(!drone.poll());
        assert_eq!(drone.phase(), FlightPhase::Terminated);
        assert_eq!(drone.summary().waypoints_reached, 2);
    }

    #[test]
    fn test_forced_crash_terminates_on_next_step() {
        let link = ManualLink::new(at(8, 0, 0));
        let mut drone = drone(&link, Vec::new(), 1.0);
        for i in 1..5 {
            assert!(drone.enqueue(waypoint(51.5 + f64::from(i) * 0.001, -0.12, at(8, i, 0))));
        }
        drone.launch();
        let start = drone.position();

        link.advance(1);
        assert!(drone.poll());

        assert_eq!(drone.outcome(), Some(DroneOutcome::Crashed));
        assert_eq!(drone.position(), start);
        assert_eq!(drone.handle().queue().len(), 4);
    }

    #[test]
    fn test_crash_leaves_other_drones_flying() {
        let link = ManualLink::new(at(8, 0, 0));
        let mut crashing = drone(&link, Vec::new(), 1.0);
        assert!(crashing.enqueue(waypoint(51.501, -0.12, at(8, 1, 40))));

        let first = Waypoint::new(DroneId(6043), 51.6, -0.12, at_date(at(8, 0, 0)));
        let mut steady = Drone::new(
            DroneId(6043),
            Vec::<Station>::new().into(),
            &first,
            Arc::clone(&link) as Arc<dyn DispatchLink>,
            settings(0.0),
        )
        .with_rng(StdRng::seed_from_u64(11));
        assert!(steady.enqueue(first));
        assert!(steady.enqueue(Waypoint::new(DroneId(6043), 51.601, -0.12, at_date(at(8, 1, 40)))));

        crashing.launch();
        steady.launch();

        link.advance(1);
        assert!(crashing.poll());
        assert!(steady.poll());

        assert_eq!(crashing.outcome(), Some(DroneOutcome::Crashed));
        assert_eq!(steady.phase(), FlightPhase::EnRoute);
        assert!(steady.is_active());
        assert!(steady.position().latitude > 51.6);

        link.advance(100);
        assert!(!crashing.poll());
        assert!(steady.poll());

        assert_eq!(crashing.outcome(), Some(DroneOutcome::Crashed));
        assert_eq!(steady.outcome(), Some(DroneOutcome::Exhausted));
        assert_eq!(steady.position(), Coordinates::new(51.601, -0.12));
        assert_eq!(steady.summary().waypoints_reached, 2);
    }

    #[test]
    fn test_nan_crash_probability_never_crashes() {
        let link = ManualLink::new(at(8, 0, 0));
        let mut drone = drone(&link, Vec::new(), f64::NAN);
        assert!(drone.enqueue(waypoint(51.501, -0.12, at(8, 1, 40))));
        drone.launch();

        link.advance(2);
        assert!(drone.poll());

        assert!(settings(f64::NAN).crash_chance().abs() < f64::EPSILON);
        assert!((settings(7.0).crash_chance() - 1.0).abs() < f64::EPSILON);
        assert_eq!(drone.phase(), FlightPhase::EnRoute);
        assert!(drone.outcome().is_none());
    }

    #[test]
    fn test_reports_only_nearby_stations() {
        let link = ManualLink::new(at(8, 0, 0));
        let stations = vec![
            Station::new("Oval", 51.5015, -0.1205),
            Station::new("Far Away", 51.59, -0.12),
        ];
        let mut drone = drone(&link, stations, 0.0);
        assert!(drone.enqueue(waypoint(51.501, -0.12, at(8, 10, 0))));
        drone.launch();

        link.advance(1);
        assert!(drone.poll());
        link.advance(1);
        assert!(drone.poll());

        let reports = link.reports.lock().unwrap();
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|(id, station, _)| *id == DroneId(5937) && station == "Oval"));
    }

    #[tokio::test]
    async fn test_terminate_stops_running_drone() {
        let link = ManualLink::new(at(8, 0, 0));
        let drone = drone(&link, Vec::new(), 0.0);
        assert!(drone.enqueue(waypoint(51.6, -0.12, at(9, 0, 0))));
        let handle = drone.handle();

        let task = tokio::spawn(drone.run());
        tokio::time::sleep(Duration::from_millis(5)).await;
        handle.terminate();

        let summary = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("drone did not stop")
            .unwrap();
        assert_eq!(summary.outcome, DroneOutcome::Shutdown);
        assert_eq!(link.report_count(), 0);
    }
}

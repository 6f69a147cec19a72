//! Drone Traffic Simulator CLI
//!
//! Loads stations and routes from CSV files and runs the simulation to the
//! configured end time.

use anyhow::Result;
use clap::Parser;
use drone_domain::{DroneId, TrafficCondition};
use drone_simulator::config::parse_time_of_day;
use drone_simulator::{input, Dispatcher, SimConfig};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "drone-simulator")]
#[command(about = "Simulate drones reporting traffic near tube stations")]
struct Args {
    /// Station list (name,latitude,longitude)
    #[arg(short, long, default_value = "tube.csv")]
    stations: PathBuf,

    /// Directory holding one <drone_id>.csv route per drone
    #[arg(short, long, default_value = ".")]
    routes: PathBuf,

    /// Drone ids to simulate
    #[arg(short, long, value_delimiter = ',', default_value = "5937,6043")]
    drones: Vec<u32>,

    /// Simulated end time (HH:MM:SS), overrides SIM_END_TIME
    #[arg(long)]
    end_time: Option<String>,

    /// RNG seed, overrides SIM_SEED
    #[arg(long)]
    seed: Option<u64>,

    /// Print every traffic report as a JSON line on stdout
    #[arg(long)]
    json: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::from_default_env().add_directive("drone_simulator=info".parse()?);
    let logs = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if args.json_logs {
        logs.json().init();
    } else {
        logs.init();
    }

    let mut config = SimConfig::from_env();
    if let Some(end) = &args.end_time {
        config.end_time = parse_time_of_day(end)?;
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }

    let drone_ids: Vec<DroneId> = args.drones.iter().copied().map(DroneId).collect();
    let stations = input::load_stations(&args.stations)?;
    let routes = input::load_routes(&args.routes, &drone_ids)?;

    info!(
        "Loaded {} stations and {} routes ({} waypoints)",
        stations.len(),
        routes.len(),
        routes.values().map(Vec::len).sum::<usize>()
    );

    let mut dispatcher = Dispatcher::new(config, routes, stations)?;
    let mut reports = dispatcher
        .take_reports()
        .ok_or_else(|| anyhow::anyhow!("report stream already taken"))?;

    let json = args.json;
    let printer = tokio::spawn(async move {
        let mut tally: HashMap<TrafficCondition, u64> = HashMap::new();
        while let Some(report) = reports.recv().await {
            *tally.entry(report.condition).or_default() += 1;
            if json {
                match serde_json::to_string(&report) {
                    Ok(line) => println!("{line}"),
                    Err(err) => tracing::warn!("Failed to encode report: {}", err),
                }
            }
        }
        tally
    });

    let summary = dispatcher.run().await?;
    let tally = printer.await?;

    info!("Simulation finished at {}", summary.final_time);
    for drone in &summary.drones {
        info!(
            "Drone {} | {:?} | {} waypoints | {} reports | at {}",
            drone.drone_id,
            drone.outcome,
            drone.waypoints_reached,
            drone.reports_sent,
            drone.position
        );
    }
    for condition in TrafficCondition::ALL {
        info!("{}: {}", condition, tally.get(&condition).copied().unwrap_or(0));
    }

    Ok(())
}

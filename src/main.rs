use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::{debug, info};
use rand::Rng;

use traffic_light::simulation::{CycleTiming, DrainOrder, LightConfig, TrafficLight};

#[derive(Parser)]
#[command(name = "traffic_light")]
#[command(about = "Headless intersection driven by a randomized traffic light")]
struct Cli {
    /// Number of vehicles queuing at the intersection
    #[arg(long, default_value = "3")]
    vehicles: u32,

    /// How long to run the intersection, in seconds
    #[arg(long, default_value = "20")]
    run_secs: f32,

    /// Shortest phase duration in seconds
    #[arg(long, default_value = "4")]
    min_cycle: f32,

    /// Longest phase duration in seconds
    #[arg(long, default_value = "6")]
    max_cycle: f32,

    /// Seed for the phase duration RNG
    #[arg(long)]
    seed: Option<u64>,

    /// Deliver a backlog of phase changes newest first
    #[arg(long)]
    lifo: bool,

    /// Poll every millisecond and count elapsed time in whole seconds
    #[arg(long)]
    polling: bool,
}

impl Cli {
    fn light_config(&self) -> Result<LightConfig> {
        let min_cycle = Duration::try_from_secs_f32(self.min_cycle)
            .with_context(|| format!("invalid --min-cycle {}", self.min_cycle))?;
        let max_cycle = Duration::try_from_secs_f32(self.max_cycle)
            .with_context(|| format!("invalid --max-cycle {}", self.max_cycle))?;

        let mut config = LightConfig::default().with_cycle_range(min_cycle, max_cycle);
        if self.lifo {
            config = config.with_drain_order(DrainOrder::Lifo);
        }
        if self.polling {
            config = config.with_timing(CycleTiming::polling_whole_seconds());
        }
        if let Some(seed) = self.seed {
            config = config.with_seed(seed);
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("warn,traffic_light=info"),
    )
    .init();

    let cli = Cli::parse();
    let run_time = Duration::try_from_secs_f32(cli.run_secs)
        .with_context(|| format!("invalid --run-secs {}", cli.run_secs))?;
    run_headless(cli.light_config()?, cli.vehicles, run_time)
}

/// Run vehicles against the light until `run_time` has passed
fn run_headless(config: LightConfig, vehicles: u32, run_time: Duration) -> Result<()> {
    info!(
        "Running intersection with {} vehicles for {:.1}s",
        vehicles,
        run_time.as_secs_f32()
    );

    let light = Arc::new(TrafficLight::with_config(config)?);
    info!("Initial phase: {}", light.current_phase());
    light.simulate()?;

    let crossings = Arc::new(AtomicU64::new(0));
    let deadline = Instant::now() + run_time;
    let handles = (0..vehicles)
        .map(|vehicle| {
            let light = Arc::clone(&light);
            let crossings = Arc::clone(&crossings);
            thread::Builder::new()
                .name(format!("vehicle-{vehicle}"))
                .spawn(move || drive_vehicle(vehicle, &light, &crossings, deadline))
                .context("failed to spawn vehicle thread")
        })
        .collect::<Result<Vec<_>>>()?;

    thread::sleep(deadline.saturating_duration_since(Instant::now()));
    light.shutdown();

    for handle in handles {
        handle
            .join()
            .map_err(|_| anyhow!("vehicle thread panicked"))??;
    }

    let stats = light.stats();
    info!("=== SIMULATION COMPLETE ===");
    info!("Elapsed time: {:.2}s", run_time.as_secs_f32());
    info!("Total flips: {}", stats.flips);
    info!("Vehicles crossed: {}", crossings.load(Ordering::Relaxed));
    info!("Final phase: {}", stats.current_phase);
    info!("{}", stats.summary());
    Ok(())
}

/// Repeatedly wait for green, cross, then come back around
fn drive_vehicle(
    vehicle: u32,
    light: &TrafficLight,
    crossings: &AtomicU64,
    deadline: Instant,
) -> Result<()> {
    let mut rng = rand::rng();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(());
        }

        match light.wait_for_green_timeout(remaining) {
            Ok(true) => {
                crossings.fetch_add(1, Ordering::Relaxed);
                info!("Vehicle {} crossed on {}", vehicle, light.current_phase());
            }
            Ok(false) => return Ok(()),
            Err(e) => {
                debug!("Vehicle {} stopped waiting: {:#}", vehicle, e);
                return Ok(());
            }
        }

        // Time to drive around the block before arriving again
        let lap = Duration::from_millis(rng.random_range(200..=800));
        if Instant::now() + lap >= deadline {
            return Ok(());
        }
        thread::sleep(lap);
        debug!("Vehicle {} arrived at {}", vehicle, light.current_phase());
    }
}

mod cluster;

use clap::Parser;
use pkg_api::{Simulation, SimulationConfig};
use pkg_types::config::{SimConfigFile, load_config_file};
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Real-time frame interval of the interactive driver.
const FRAME_MS: u64 = 16;
/// Simulated seconds between status lines.
const STATUS_EVERY_SECS: f64 = 10.0;

#[derive(Parser, Debug)]
#[command(name = "k3sim", about = "k3sim cluster simulator")]
struct Cli {
    /// Path to YAML config file
    #[arg(long, short, default_value = "k3sim.yaml")]
    config: String,

    /// RNG seed; omit for a random run
    #[arg(long)]
    seed: Option<u64>,

    /// Simulated seconds per real second
    #[arg(long)]
    time_scale: Option<f64>,

    /// Stop after this many simulated seconds
    #[arg(long, default_value_t = 60)]
    duration_secs: u64,

    /// Fixed tick length in milliseconds
    #[arg(long)]
    tick_ms: Option<u64>,

    /// Write the final store snapshot as JSON to this path
    #[arg(long)]
    snapshot_out: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, default_value_t = false)]
    json_logs: bool,

    /// Run as fast as possible instead of pacing against the wall clock
    #[arg(long, default_value_t = false)]
    headless: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).compact().init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    // Load config file (returns defaults if file not found)
    let mut file_cfg: SimConfigFile = load_config_file(&cli.config)?;
    info!("Config file: {}", cli.config);

    // Merge: CLI args > config file > defaults
    file_cfg.seed = cli.seed.or(file_cfg.seed);
    file_cfg.time_scale = cli.time_scale.or(file_cfg.time_scale);
    file_cfg.tick_ms = cli.tick_ms.or(file_cfg.tick_ms);
    let config = SimulationConfig::from_file(&file_cfg);

    info!("Starting k3sim");
    info!("  Seed:        {:?}", config.seed);
    info!("  Tick:        {:?}", config.tick);
    info!("  Time scale:  {}", config.time_scale);
    info!("  Duration:    {}s", cli.duration_secs);

    let mut sim = Simulation::new(config);
    let manifests = if file_cfg.manifests.is_empty() {
        info!("No manifests configured, using the starter cluster");
        cluster::default_cluster()
    } else {
        file_cfg.manifests
    };
    sim.bootstrap(&manifests)?;

    let duration = Duration::from_secs(cli.duration_secs);
    if cli.headless {
        let ticks = sim.run_for(duration);
        info!("Ran {} ticks in headless mode", ticks);
    } else {
        run_realtime(&mut sim, duration).await;
    }

    report(&sim);
    if let Some(path) = &cli.snapshot_out {
        let snapshot = sim.snapshot();
        std::fs::write(path, serde_json::to_vec_pretty(&snapshot)?)?;
        info!("Snapshot with {} resources written to {}", snapshot.resource_count, path);
    }
    Ok(())
}

async fn run_realtime(sim: &mut Simulation, duration: Duration) {
    let start = sim.now();
    let mut interval = tokio::time::interval(Duration::from_millis(FRAME_MS));
    let mut last = Instant::now();
    let mut last_status = 0.0;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let now = Instant::now();
                sim.advance(now - last);
                last = now;

                let elapsed = sim.now().since(start).as_secs_f64();
                if elapsed - last_status >= STATUS_EVERY_SECS {
                    last_status = elapsed;
                    report(sim);
                }
                if elapsed >= duration.as_secs_f64() {
                    break;
                }
            }
            _ = &mut ctrl_c => {
                warn!("Interrupted at {}", sim.now());
                break;
            }
        }
    }
}

fn report(sim: &Simulation) {
    let s = sim.store().summary();
    info!(
        "[{}] nodes {}/{} ready, pods {} running / {} pending / {} failed, {} open incidents",
        sim.now(),
        s.ready_nodes,
        s.nodes,
        s.running_pods,
        s.pending_pods,
        s.failed_pods,
        sim.incidents().open_incidents().len()
    );
}

use anyhow::{Context, bail};
use clap::Parser;
use lockstep::{FrameDriver, LockstepConfig, World, preset_by_name};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Widest grid `--print` will render.
const MAX_PRINT_WIDTH: usize = 160;

#[derive(Parser, Debug)]
#[command(name = "lockstep", version, about = "Headless Game of Life on the lockstep frame driver")]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, env = "LOCKSTEP_CONFIG")]
    config: Option<PathBuf>,

    /// Grid width in cells
    #[arg(long)]
    width: Option<usize>,

    /// Grid height in cells
    #[arg(long)]
    height: Option<usize>,

    /// Worker threads (clamped to 1..=256)
    #[arg(long)]
    workers: Option<usize>,

    /// Starting pattern: random, blank, full, dancing-border, upper-right-checkered, glider-gun
    #[arg(long)]
    preset: Option<String>,

    /// Generations to run
    #[arg(long)]
    generations: Option<u64>,

    /// Seed for the random preset
    #[arg(long)]
    seed: Option<u64>,

    /// Print the final grid
    #[arg(long)]
    print: bool,

    /// Seconds to wait for a single generation
    #[arg(long, default_value_t = 10)]
    frame_timeout: u64,
}

fn load_config(cli: &Cli) -> anyhow::Result<LockstepConfig> {
    let mut config = match &cli.config {
        Some(path) => LockstepConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => LockstepConfig::default(),
    };

    if let Some(width) = cli.width {
        config.engine.width = width;
    }
    if let Some(height) = cli.height {
        config.engine.height = height;
    }
    if let Some(workers) = cli.workers {
        config.engine.scheduler.num_workers = workers;
    }
    if let Some(preset) = &cli.preset {
        config.simulation.preset = preset.clone();
    }
    if let Some(generations) = cli.generations {
        config.simulation.generations = generations;
    }
    if cli.seed.is_some() {
        config.simulation.seed = cli.seed;
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn print_grid(driver: &FrameDriver) {
    let engine = driver.lock();
    if engine.width() > MAX_PRINT_WIDTH {
        warn!(width = engine.width(), "grid too wide to print");
        return;
    }

    for y in 0..engine.height() as i64 {
        let row: String = (0..engine.width() as i64)
            .map(|x| match engine.get_cell(x, y) {
                Ok(0) | Err(_) => '.',
                Ok(_) => '#',
            })
            .collect();
        println!("{row}");
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let simulation = &config.simulation;

    let preset = preset_by_name(&simulation.preset, simulation.seed)
        .with_context(|| format!("unknown preset '{}'", simulation.preset))?;
    let world = World::new(preset.name().to_string(), preset);

    let driver = FrameDriver::new(config.engine.clone());
    driver.start().context("failed to start engine")?;
    world.init_engine(&driver).context("failed to apply preset")?;
    info!(
        preset = %world,
        width = driver.width(),
        height = driver.height(),
        workers = driver.num_workers(),
        population = driver.lock().population(),
        "simulation initialized"
    );

    let frame_timeout = Duration::from_secs(cli.frame_timeout);
    let started = Instant::now();
    for generation in 1..=simulation.generations {
        driver.step()?;
        if !driver.wait_until_settled(frame_timeout) {
            bail!("generation {generation} did not finish within {frame_timeout:?}");
        }
        info!(generation, population = driver.lock().population(), "generation complete");
    }

    let elapsed = started.elapsed();
    let seconds = elapsed.as_secs_f64().max(f64::EPSILON);
    let cells = (driver.width() * driver.height()) as f64 * simulation.generations as f64;
    info!(
        generations = simulation.generations,
        elapsed_ms = elapsed.as_millis() as u64,
        generations_per_sec = simulation.generations as f64 / seconds,
        cells_per_sec = cells / seconds,
        "simulation finished"
    );

    #[cfg(feature = "metrics")]
    {
        let metrics = driver.scheduler().metrics();
        info!(
            jobs_executed = metrics.jobs_executed,
            groups_executed = metrics.groups_executed,
            batches_allocated = metrics.batches_allocated,
            frames_completed = metrics.frames_completed,
            jobs_per_sec = metrics.jobs_per_second(),
            "scheduler metrics"
        );
    }

    if cli.print {
        print_grid(&driver);
    }

    driver.shutdown().context("engine shutdown failed")?;
    Ok(())
}

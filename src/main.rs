use auto_menorah::app::{run_from_config, CalendarSource, Menorah, MenorahDisplay};
use auto_menorah::config::DisplayBackend;
use auto_menorah::*;
use clap::{Parser, Subcommand};
use color_eyre::eyre::{eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the menorah for this year's holiday
    Run,
    /// Print the eight lighting windows
    Schedule,
    /// Light a number of candles and exit
    Light {
        /// Candles to light (0-8)
        #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=8))]
        nights: u8,
        /// Leave the shamash off
        #[arg(long)]
        no_shamash: bool,
    },
    /// Turn every candle off
    Off,
    /// Play the night tune once
    Play,
    /// Play a holiday through on a simulated clock
    Simulate {
        /// First night's lighting instant (RFC 3339)
        #[arg(short, long)]
        first_night: Timestamp,
        /// Simulated start instant (defaults to one minute before the first night)
        #[arg(short, long)]
        start: Option<Timestamp>,
        /// Simulated seconds per real second (0 fast-forwards)
        #[arg(long, default_value_t = 0.0)]
        speed: f64,
        /// Drive the configured GPIO lines instead of logging
        #[arg(long)]
        gpio: bool,
    },
}

#[tokio::main]
#[instrument]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RUST_LOG")
                .unwrap_or_else(|_| EnvFilter::new("auto_menorah=info")),
        )
        .compact()
        .init();

    color_eyre::install()?;

    let cli = Cli::parse();
    debug!("Parsed command line arguments");

    let config = Config::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await?,
        Commands::Schedule => print_schedule(&config).await?,
        Commands::Light { nights, no_shamash } => {
            let mut display = MenorahDisplay::open(&config).await?;
            display.set_lit(nights, !no_shamash)?;
            info!("{}", display::render(nights, !no_shamash));
        }
        Commands::Off => {
            MenorahDisplay::open(&config).await?.clear()?;
        }
        Commands::Play => play(&config).await?,
        Commands::Simulate {
            first_night,
            start,
            speed,
            gpio,
        } => simulate(config, first_night, start, speed, gpio).await?,
    }

    Ok(())
}

/// Runs the menorah until the holiday is over, clearing the candles on Ctrl-C
async fn run(config: Config) -> Result<()> {
    tokio::select! {
        report = run_from_config(SystemClock, config.clone()) => {
            let report = report?;
            info!("Run finished: {:?}", report);
        }
        interrupted = tokio::signal::ctrl_c() => {
            interrupted?;
            warn!("Interrupted, turning candles off");
            MenorahDisplay::open(&config).await?.clear()?;
        }
    }
    Ok(())
}

#[instrument(skip(config))]
async fn print_schedule(config: &Config) -> Result<()> {
    let mut provider = CalendarSource::from_config(config)?;
    let schedule = provider.fetch_schedule().await?;
    let policy = config.off_time_policy;

    println!("Off-time policy: {}", policy.name());
    for (night, &lighting) in schedule.nights().iter().enumerate() {
        println!(
            "Night {}: {} -> {}",
            night + 1,
            lighting.format("%a %Y-%m-%d %H:%M %:z"),
            policy.off_time(lighting).format("%a %Y-%m-%d %H:%M %:z"),
        );
    }
    if !config.burnout {
        println!("Candles stay lit until {}", schedule.final_cutoff());
    }
    Ok(())
}

async fn play(config: &Config) -> Result<()> {
    let tune = Tune::parse(&config.signal.tune)?;
    let player = audio::TunePlayer::new(tune, MuteSwitch::Fixed(false))
        .with_device(config.signal.output_device.clone())
        .with_waveform(config.signal.waveform);

    tokio::task::spawn_blocking(move || player.play_blocking()).await??;
    Ok(())
}

/// Plays a holiday on a simulated clock, without touching the network
#[instrument(skip(config))]
async fn simulate(
    mut config: Config,
    first_night: Timestamp,
    start: Option<Timestamp>,
    speed: f64,
    gpio: bool,
) -> Result<()> {
    if !speed.is_finite() || speed < 0.0 {
        return Err(eyre!("speed must be a non-negative number, got {}", speed));
    }
    let start = start.unwrap_or(first_night - chrono::Duration::minutes(1));

    config.calendar.first_night = Some(first_night);
    if !gpio {
        config.display.backend = DisplayBackend::Log;
    }

    let clock = Arc::new(SimulatedClock::with_speed(start, speed));
    let display = MenorahDisplay::open(&config).await?;
    let provider = CalendarSource::from_config(&config)?;
    let signal = app::signal_from_config(&config)?;

    info!("Simulating from {} at speed {}", start, speed);
    let mut menorah = Menorah::new(
        clock.clone(),
        display,
        provider,
        None::<TcpProbe>,
        signal,
        config.into(),
    );
    let report = menorah.run_or_signal_distress().await?;

    info!("Simulation ended at {}", clock.now());
    println!("{:#?}", report);
    Ok(())
}

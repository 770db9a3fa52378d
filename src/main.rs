//! Humidity Thing - Main Entry Point

use clap::{Args, Parser, Subcommand};
use humidity_thing::config::{ConfigOverrides, ThingConfig};
use humidity_thing::factory::{AdapterFactory, BrokerKind, SensorKind};
use humidity_thing::monitor::StopHandle;
use humidity_thing::observability::{init_default_logging, HealthServer, MonitorMetrics};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

/// Config files tried when `--config` is not given
const DEFAULT_CONFIG_PATHS: &[&str] = &[
    "humidity-thing.toml",
    "/usr/local/etc/humidity-thing/config.toml",
];

/// Publish sensor readings to a message broker with at-least-once delivery
#[derive(Parser)]
#[command(name = "humidity-thing")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "HUMIDITY_THING_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the sensor and publish readings until SIGINT or SIGTERM
    Run(RunArgs),
    /// Validate the configuration file
    Config {
        /// Print the merged configuration
        #[arg(long)]
        show: bool,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Thing identifier, also used as MQTT client id
    thing_name: Option<String>,

    /// Topic readings are published to
    topic_name: Option<String>,

    /// Broker adapter (test, mqtt) [default: mqtt]
    #[arg(long)]
    broker: Option<BrokerKind>,

    /// Broker URL, e.g. mqtts://iot.example.com:8883
    #[arg(long, env = "BROKER_ADDRESS")]
    broker_address: Option<String>,

    /// File the test broker appends publications to
    #[arg(long, value_name = "FILE")]
    log_publications_file: Option<PathBuf>,

    /// Sensor adapter (test, dht22) [default: dht22]
    #[arg(long)]
    sensor: Option<SensorKind>,

    /// Delay between readings in milliseconds [default: 60000]
    #[arg(long, value_name = "MS")]
    sensor_period: Option<u64>,

    /// Script run by the dht22 sensor [default: /usr/local/etc/sensor/sensor.py]
    #[arg(long, value_name = "FILE")]
    sensor_script_path: Option<PathBuf>,

    #[arg(long, value_name = "FILE", env = "TLS_CERT_PATH")]
    tls_cert_path: Option<PathBuf>,

    #[arg(long, value_name = "FILE", env = "TLS_KEY_PATH")]
    tls_key_path: Option<PathBuf>,

    #[arg(long, value_name = "FILE", env = "TLS_CA_PATH")]
    tls_ca_path: Option<PathBuf>,

    /// Serve /health, /metrics and /live on this port
    #[arg(long, env = "HEALTH_PORT")]
    health_port: Option<u16>,
}

impl From<RunArgs> for ConfigOverrides {
    fn from(args: RunArgs) -> Self {
        ConfigOverrides {
            thing_name: args.thing_name,
            topic_name: args.topic_name,
            sensor_period_ms: args.sensor_period,
            broker: args.broker,
            broker_address: args.broker_address,
            log_publications_file: args.log_publications_file,
            tls_ca_path: args.tls_ca_path,
            tls_cert_path: args.tls_cert_path,
            tls_key_path: args.tls_key_path,
            sensor: args.sensor,
            sensor_script_path: args.sensor_script_path,
            health_port: args.health_port,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_default_logging() {
        eprintln!("Failed to initialise logging: {e}");
    }

    info!(version = env!("CARGO_PKG_VERSION"), "Starting humidity thing");

    let mut config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run(args) => match config.apply_overrides(args.into()) {
            Ok(()) => run_thing(config).await,
            Err(e) => Err(e.into()),
        },
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Shutdown complete");
}

fn load_configuration(path: Option<&Path>) -> Result<ThingConfig, Box<dyn std::error::Error>> {
    if let Some(path) = path {
        info!(path = %path.display(), "Loading configuration");
        return Ok(ThingConfig::load_from_file(path)?);
    }

    for candidate in DEFAULT_CONFIG_PATHS.iter().map(Path::new) {
        if candidate.exists() {
            info!(path = %candidate.display(), "Loading configuration");
            return Ok(ThingConfig::load_from_file(candidate)?);
        }
    }

    info!("No configuration file found, using command line and defaults");
    Ok(ThingConfig::default())
}

async fn run_thing(config: ThingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let metrics = Arc::new(MonitorMetrics::new());
    let mut factory = AdapterFactory::new();

    let mut monitor = factory
        .create_monitor(
            config.broker.kind,
            config.sensor.kind,
            &config.to_adapter_options(),
        )
        .await?
        .with_metrics(metrics.clone());

    let health_task = config.health.port.map(|port| {
        let thing_name = config.thing.name.clone().unwrap_or_default();
        let server = Arc::new(HealthServer::new(thing_name, port, metrics.clone()));
        tokio::spawn(server.start())
    });

    let signal_task = tokio::spawn(stop_on_signal(monitor.stop_handle()));

    let result = monitor.start(config.to_monitor_options()).await;

    signal_task.abort();
    if let Some(task) = health_task {
        task.abort();
    }

    result?;

    let unsent = monitor.queued_readings().len();
    if unsent > 0 {
        warn!(unsent, "Stopped with readings still queued");
    }
    Ok(())
}

/// Stop the monitor on SIGINT or SIGTERM
async fn stop_on_signal(stop: StopHandle) {
    let (mut sigint, mut sigterm) = match (
        signal::unix::signal(signal::unix::SignalKind::interrupt()),
        signal::unix::signal(signal::unix::SignalKind::terminate()),
    ) {
        (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
        (Err(e), _) | (_, Err(e)) => {
            error!(error = %e, "Failed to install signal handlers");
            return;
        }
    };

    tokio::select! {
        _ = sigint.recv() => info!("Received SIGINT, stopping"),
        _ = sigterm.recv() => info!("Received SIGTERM, stopping"),
    }
    stop.stop();
}

fn handle_config_command(config: &ThingConfig, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;
    if show {
        println!("{}", toml::to_string_pretty(config)?);
    } else {
        println!("Configuration is valid");
    }
    Ok(())
}

//! Sensor Agent - Main Entry Point

use clap::{Parser, Subcommand};
use sensor_agent::agent::SensorAgent;
use sensor_agent::config::AgentConfig;
use sensor_agent::error::AgentError;
use sensor_agent::observability::{init_default_logging, metrics::metrics};
use sensor_agent::sensor::{DriverRegistry, Sensor, SensorInfo};
use sensor_agent::transport::mqtt::MqttLink;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "sensor-agent.toml",
    "config/sensor-agent.toml",
    "/etc/sensor-agent/config.toml",
];

/// Environmental sensor telemetry agent
#[derive(Parser)]
#[command(name = "sensor-agent")]
#[command(about = "Publishes environmental sensor readings over MQTT")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent until SIGINT or SIGTERM
    Run,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// List the sensors found for the configured sensor types
    Sensors,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            init_default_logging(true);
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    init_default_logging(cli.verbose > 0 || config.agent.verbose);

    info!("Starting sensor agent v{}", env!("CARGO_PKG_VERSION"));

    let result = match cli.command {
        Commands::Run => run_agent(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
        Commands::Sensors => list_sensors(&config).await,
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<AgentConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        return Ok(AgentConfig::load_from_file(path)?);
    }

    for path_str in DEFAULT_CONFIG_PATHS {
        let path = PathBuf::from(path_str);
        if path.exists() {
            return Ok(AgentConfig::load_from_file(&path)?);
        }
    }

    Err(format!(
        "No configuration file found. Provide one with -c/--config or create one of: {}",
        DEFAULT_CONFIG_PATHS.join(", ")
    )
    .into())
}

async fn enumerate_sensors(config: &AgentConfig) -> Result<Vec<Box<dyn Sensor>>, AgentError> {
    let registry = DriverRegistry::with_builtin_drivers();
    registry
        .enumerate(&config.agent.sensor_types, &config.drivers)
        .await
}

async fn run_agent(config: AgentConfig) -> Result<(), Box<dyn std::error::Error>> {
    let config = Arc::new(config);

    // A sensorless agent has nothing to do
    let sensors = enumerate_sensors(&config).await?;

    let link = Arc::new(MqttLink::new(config.mqtt.clone())?);
    let (session_tx, session_rx) = mpsc::unbounded_channel();
    link.set_session_sender(session_tx).await;

    let mut agent = SensorAgent::new(config.clone(), link.clone(), sensors)?;
    agent.start(session_rx)?;

    // Readings are dropped until the link is up; the poll loop does not wait
    let connect_link = link.clone();
    let connect_task = tokio::spawn(async move {
        match connect_link.connect_with_recovery().await {
            Ok(()) => info!("MQTT link established"),
            Err(e) => warn!("MQTT link not confirmed yet, recovery continues: {}", e),
        }
    });

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    info!(
        sensors = agent.sensor_infos().len(),
        broker = %config.mqtt.broker_address(),
        "Agent is running"
    );

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }

    connect_task.abort();
    agent.shutdown().await?;
    link.disconnect().await?;

    let link_health = link.health_metrics().await;
    info!(
        sessions = link_health.session_count,
        reconnects = link_health.reconnect_count,
        metrics = %serde_json::to_string(&metrics().snapshot())?,
        "Final metrics"
    );
    Ok(())
}

fn handle_config_command(
    config: &AgentConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(&config.redacted())?);
    }

    info!("Configuration validation complete");
    Ok(())
}

async fn list_sensors(config: &AgentConfig) -> Result<(), Box<dyn std::error::Error>> {
    let sensors = enumerate_sensors(config).await?;

    for sensor in &sensors {
        let info = SensorInfo::from_sensor(sensor.as_ref());
        let measurements: Vec<_> = info.measurements.iter().map(|m| m.name).collect();
        println!(
            "{}\t{} {}\tserial {}\t[{}]",
            info.id,
            info.manufacturer,
            info.model,
            info.serial_number,
            measurements.join(", ")
        );
    }

    Ok(())
}

//! valve-node - Main Entry Point
//!
//! Loads configuration, sets up logging, builds the actuator backend and the
//! MQTT transport, and runs the node until SIGINT or SIGTERM.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_appender::non_blocking::WorkerGuard;
use valve_node::actuator::{ActuatorBackend, SimulatedBackend, SysfsGpioBackend};
use valve_node::config::{BackendKind, ConfigError, NodeConfig};
use valve_node::error::{NodeError, NodeResult};
use valve_node::node::ValveController;
use valve_node::observability::LogSettings;
use valve_node::transport::mqtt::MqttClient;

/// Locations searched when no `--config` is given
const DEFAULT_CONFIG_PATHS: &[&str] = &["valve-node.toml", "config/valve-node.toml", "config.json"];

/// MQTT-controlled valve node
#[derive(Parser)]
#[command(name = "valve-node")]
#[command(about = "Bridges MQTT valve commands to GPIO outputs")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Use in-memory valves instead of GPIO hardware
    #[arg(long)]
    simulate: bool,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the node until SIGINT or SIGTERM
    Run,
    /// Validate configuration
    Config {
        /// Print the effective configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = load_configuration(cli.config.as_deref(), cli.simulate);

    let log_file = config.as_ref().ok().and_then(|c| c.logging.file.clone());
    let guard = match init_logging(cli.verbose, log_file.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            process::exit(1);
        }
    };

    info!("Starting valve-node v{}", env!("CARGO_PKG_VERSION"));

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            exit_with(guard, 1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_node(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        exit_with(guard, 1);
    }

    info!("Application shutdown complete");
}

/// Flush the log file before leaving the process
fn exit_with(guard: Option<WorkerGuard>, code: i32) -> ! {
    drop(guard);
    process::exit(code);
}

fn init_logging(verbose: u8, log_file: Option<&Path>) -> NodeResult<Option<WorkerGuard>> {
    let mut settings = LogSettings::from_env();
    settings.level = match verbose {
        0 => settings.level,
        1 => settings.level.max(Level::DEBUG),
        _ => Level::TRACE,
    };
    valve_node::observability::init_logging(settings, log_file)
}

fn load_configuration(path: Option<&Path>, simulate: bool) -> Result<NodeConfig, ConfigError> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => DEFAULT_CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|p| p.exists())
            .ok_or_else(|| ConfigError::NotFound(DEFAULT_CONFIG_PATHS.join(", ")))?,
    };

    let mut config = NodeConfig::read_from_file(&path)?;
    if simulate {
        config.backend.kind = BackendKind::Simulated;
    }
    config.validate()?;
    Ok(config)
}

fn build_backend(config: &NodeConfig) -> Arc<dyn ActuatorBackend> {
    match config.backend.kind {
        BackendKind::Gpio => Arc::new(SysfsGpioBackend::with_pin_map(
            &config.backend.gpio_root,
            config.backend.pin_map(),
        )),
        BackendKind::Simulated => Arc::new(SimulatedBackend::new()),
    }
}

async fn run_node(config: NodeConfig) -> NodeResult<()> {
    info!(
        device_id = %config.device_id,
        broker = %format!("{}:{}", config.mqtt.broker_host, config.mqtt.broker_port),
        "Application starting"
    );

    let backend = build_backend(&config);
    let transport = MqttClient::new(
        &config.device_id,
        config.mqtt.clone(),
        config.timing.connect_timeout(),
    )
    .map_err(NodeError::transport)?;

    let mut node = ValveController::initialize(config, backend, transport)?;
    node.run().await
}

fn handle_config_command(config: &NodeConfig, show: bool) -> NodeResult<()> {
    if show {
        let rendered = toml::to_string_pretty(config)
            .map_err(|e| NodeError::internal(format!("Failed to render configuration: {e}")))?;
        println!("{rendered}");
    }

    info!(
        device_id = %config.device_id,
        valves = config.valves.len(),
        "Configuration validation complete"
    );
    Ok(())
}

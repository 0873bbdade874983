use anyhow::Result;
use clap::Parser;
use remora_controller::{
    actuator::ExclusiveActuator,
    arm_config::ArmConfig,
    arm_driver::{ArmDriver, JointPositions, MockArmDriver},
    feetech::FeetechArmDriver,
};
use remora_remote::{config::ServerConfig, logging, server::RemoteServer};
use std::time::Duration;
use tokio::sync::watch;

#[derive(Parser)]
#[command(author, version)]
struct Args {
    /// Serial port of the arm, e.g. /dev/ttyUSB0
    #[arg(conflicts_with = "mock")]
    port: Option<String>,

    /// Run against a loopback driver instead of real hardware
    #[arg(long)]
    mock: bool,

    /// Address to bind the control endpoint to
    #[arg(long)]
    host: Option<String>,

    /// Port of the control endpoint
    #[arg(short, long)]
    listen_port: Option<u16>,

    /// Server config file (JSON or YAML)
    #[arg(short, long)]
    config: Option<String>,

    /// Arm config file (JSON or YAML)
    #[arg(long)]
    arm_config: Option<String>,

    /// Sets the level of verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn load_server_config(args: &Args) -> Result<ServerConfig> {
    let mut config = match &args.config {
        Some(path) if path.ends_with(".yaml") || path.ends_with(".yml") => {
            ServerConfig::load_yaml(path).map_err(|e| anyhow::anyhow!("{}", e))?
        }
        Some(path) => ServerConfig::load_json(path).map_err(|e| anyhow::anyhow!("{}", e))?,
        None => ServerConfig::default(),
    };
    if let Some(host) = &args.host {
        config.host = host.clone();
    }
    if let Some(port) = args.listen_port {
        config.port = port;
    }
    if let Some(port) = &args.port {
        config.channel = port.clone();
    }
    Ok(config)
}

fn load_arm_config(args: &Args) -> Result<ArmConfig> {
    match &args.arm_config {
        Some(path) if path.ends_with(".yaml") || path.ends_with(".yml") => {
            ArmConfig::load_yaml(path).map_err(|e| anyhow::anyhow!("{}", e))
        }
        Some(path) => ArmConfig::load_json(path).map_err(|e| anyhow::anyhow!("{}", e)),
        None => Ok(ArmConfig::included()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::setup_tracing(args.verbose);

    let server_config = load_server_config(&args)?;
    let arm_config = load_arm_config(&args)?;

    let driver: Box<dyn ArmDriver> = if args.mock {
        tracing::warn!("Running with the mock driver, no hardware attached");
        MockArmDriver::new(JointPositions::default())
    } else {
        let port = args
            .port
            .as_deref()
            .unwrap_or(server_config.channel.as_str());
        tracing::info!("Opening motor bus on {}", port);
        FeetechArmDriver::open(port, arm_config.clone())?
    };

    // the only fatal hardware error: no initial position to hold
    let actuator = ExclusiveActuator::connect(
        driver,
        Duration::from_millis(arm_config.bus_timeout_ms),
    )
    .await?;
    tracing::info!("Arm connected, initial position read");

    let (shutdown_sender, shutdown) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Detected Ctrl+c");
            let _ = shutdown_sender.send(true);
        }
    });

    let server = RemoteServer::new(server_config, arm_config, std::sync::Arc::new(actuator));
    server.run(shutdown).await?;
    Ok(())
}

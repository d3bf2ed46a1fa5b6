//! Pluggable Transceiver Daemon
//!
//! Main entry point for xcvrd. Loads the configuration and port inventory,
//! then polls every front panel module and publishes its state to
//! STATE_DB.
//!
//! Signals:
//! - SIGHUP: reload the inventory file
//! - SIGUSR1: log a JSON dump of every port
//! - SIGINT/SIGTERM: shut down

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use sonic_xcvrd::{
    DatabaseBackend, DriverCommand, FileInventory, HardwareBackend, InMemoryDatabase, Inventory,
    ModuleHardware, PollSettings, PortRegistry, RedisStateDb, SimulatedHardware, StateDatabase,
    SyncDriver, SysfsHardware, XcvrdConfig,
};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

/// Command channel depth between the signal loop and the driver
const COMMAND_QUEUE_DEPTH: usize = 16;

#[derive(Parser, Debug)]
#[command(name = "xcvrd")]
#[command(author, version, about = "SONiC pluggable transceiver daemon", long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "/etc/sonic/xcvrd.conf")]
    config: PathBuf,

    /// Use simulated modules instead of sysfs
    #[arg(long)]
    simulate: bool,

    /// Log level, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Run a single tick, print every port and exit
    #[arg(long)]
    dump_once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    info!("xcvrd: Starting transceiver daemon");

    match start(args).await {
        Ok(()) => {
            info!("xcvrd: Daemon exiting normally");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "xcvrd: Daemon exiting with error");
            Err(e)
        }
    }
}

fn init_logging(log_level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .compact(),
        )
        .init();
}

async fn start(args: Args) -> Result<()> {
    let mut config = XcvrdConfig::load_or_default(&args.config)
        .with_context(|| format!("loading config {}", args.config.display()))?;
    if args.simulate {
        config.hardware.backend = HardwareBackend::Simulated;
    }
    config.validate().context("invalid configuration")?;

    let inventory = FileInventory::new(&config.inventory_path);
    let ports = inventory
        .load()
        .with_context(|| format!("loading inventory {}", inventory.path().display()))?;
    let registry = PortRegistry::from_inventory(&ports).context("rejecting inventory")?;
    info!(
        ports = registry.len(),
        backend = ?config.hardware.backend,
        database = ?config.database.backend,
        "xcvrd: Inventory loaded"
    );

    match config.hardware.backend {
        HardwareBackend::Real => {
            let hardware = SysfsHardware::default();
            with_database(&config, &args, inventory, registry, hardware).await
        }
        HardwareBackend::Simulated => {
            let hardware = SimulatedHardware::from_inventory(&ports);
            with_database(&config, &args, inventory, registry, hardware).await
        }
    }
}

async fn with_database<H>(
    config: &XcvrdConfig,
    args: &Args,
    inventory: FileInventory,
    registry: PortRegistry,
    hardware: H,
) -> Result<()>
where
    H: ModuleHardware + 'static,
{
    match config.database.backend {
        DatabaseBackend::Redis => {
            let database = RedisStateDb::new(
                &config.database.redis_host,
                config.database.redis_port,
                config.database.state_db_number,
                config.database.config_db_number,
            )
            .await
            .context("connecting to redis")?;
            run_daemon(config, args, inventory, registry, hardware, database).await
        }
        DatabaseBackend::Memory => {
            warn!("xcvrd: Using in-memory database, nothing will be published");
            let database = InMemoryDatabase::new();
            run_daemon(config, args, inventory, registry, hardware, database).await
        }
    }
}

async fn run_daemon<H, D>(
    config: &XcvrdConfig,
    args: &Args,
    inventory: FileInventory,
    registry: PortRegistry,
    hardware: H,
    database: D,
) -> Result<()>
where
    H: ModuleHardware + 'static,
    D: StateDatabase + 'static,
{
    let mut driver = SyncDriver::new(
        hardware,
        database,
        registry,
        PollSettings::from_config(config),
        config.poll_interval(),
    );

    if args.dump_once {
        let report = driver.tick().await;
        info!(writes = report.writes, clears = report.clears, "xcvrd: Single tick complete");
        println!("{}", driver.registry().dump_all()?);
        return Ok(());
    }

    let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    let handle = tokio::spawn(driver.run(rx));

    let mut hangup = signal(SignalKind::hangup()).context("installing SIGHUP handler")?;
    let mut usr1 = signal(SignalKind::user_defined1()).context("installing SIGUSR1 handler")?;
    let mut terminate = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;

    loop {
        tokio::select! {
            _ = hangup.recv() => {
                info!("xcvrd: SIGHUP received, reloading inventory");
                match inventory.load() {
                    Ok(ports) => {
                        if tx.send(DriverCommand::Reload(ports)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => error!(error = %e, "xcvrd: Inventory reload failed, keeping current ports"),
                }
            }
            _ = usr1.recv() => {
                let (reply, response) = oneshot::channel();
                if tx.send(DriverCommand::Dump { key: None, reply }).await.is_err() {
                    break;
                }
                match response.await {
                    Ok(Ok(dump)) => info!(dump = %dump, "xcvrd: Port dump"),
                    Ok(Err(e)) => warn!(error = %e, "xcvrd: Port dump failed"),
                    Err(_) => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("xcvrd: Received SIGINT, shutting down");
                break;
            }
            _ = terminate.recv() => {
                info!("xcvrd: Received SIGTERM, shutting down");
                break;
            }
        }
    }

    // The driver may already be gone if it stopped on its own
    let _ = tx.send(DriverCommand::Shutdown).await;
    drop(tx);
    handle.await.context("driver task failed")?;
    Ok(())
}

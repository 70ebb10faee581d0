// blerelay: desktop harness for the BLE relay core
//
// Drives RelayFacade against the in-process loopback radio, checks parameter
// sets against a simulated platform environment, and manages the JSON config.

mod config;

use anyhow::{Context, Result};
use blerelay_core::{
    init_logging, ConnectionStatus, DiscoveredDevice, LoopbackRadio, ParameterValidator,
    RadioEvent, RelayConfig, RelayFacade, RelayListener, StaticEnvironment, StatusCode,
};
use clap::{Parser, Subcommand};
use colored::*;
use config::ConfigStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "blerelay")]
#[command(about = "BLE dual-role relay harness", long_about = None)]
#[command(version)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full relay lifecycle against the loopback radio
    Demo {
        /// Relay mode: 1 = central only, 2 = peripheral only, 3 = both
        #[arg(short, long, default_value_t = 3)]
        mode: i32,
        /// Advertised filter value (at most 10 bytes)
        #[arg(short, long, default_value = "")]
        filter: String,
        /// Encryption key (at least 8 bytes); config default if omitted
        #[arg(short, long)]
        key: Option<String>,
        /// Payload to relay
        #[arg(long, default_value = "hello")]
        message: String,
        /// Drop the radio link mid-run to show automatic resume
        #[arg(long)]
        drop_link: bool,
    },
    /// Validate a parameter set against a simulated environment
    Validate {
        #[arg(short, long, default_value_t = 3)]
        mode: i32,
        #[arg(short, long, default_value = "")]
        filter: String,
        #[arg(short, long)]
        key: Option<String>,
        /// Simulate a device without BLE support
        #[arg(long)]
        no_ble: bool,
        #[arg(long)]
        bluetooth_off: bool,
        #[arg(long)]
        location_off: bool,
        /// Simulate a missing location permission
        #[arg(long)]
        no_permission: bool,
    },
    /// Inspect or edit the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print every setting
    Show,
    /// Write the default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the config file location
    Path,
    Get { key: String },
    Set { key: String, value: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let store = ConfigStore::default_location()?;
    let mut relay_config = store.load()?;
    if cli.verbose {
        relay_config.logging.level = "debug".to_string();
    }
    let _log_guard = init_logging(&relay_config.logging).context("Failed to initialize logging")?;
    tracing::debug!("Config file: {}", store.path().display());

    match cli.command {
        Commands::Demo {
            mode,
            filter,
            key,
            message,
            drop_link,
        } => cmd_demo(relay_config, mode, filter, key, message, drop_link).await,
        Commands::Validate {
            mode,
            filter,
            key,
            no_ble,
            bluetooth_off,
            location_off,
            no_permission,
        } => {
            let env = StaticEnvironment {
                ble_supported: !no_ble,
                bluetooth_enabled: !bluetooth_off,
                location_enabled: !location_off,
                location_permission: !no_permission,
            };
            cmd_validate(&relay_config, mode, &filter, key.as_deref(), env)
        }
        Commands::Config { action } => cmd_config(&store, action),
    }
}

// ============================================================================
// DEMO
// ============================================================================

/// Forwards listener callbacks to the demo loop for printing
struct DemoListener {
    tx: mpsc::UnboundedSender<RadioEvent>,
}

impl RelayListener for DemoListener {
    fn on_payload(&self, payload: Vec<u8>) {
        let _ = self.tx.send(RadioEvent::PayloadReceived(payload));
    }

    fn on_device_discovered(&self, device: DiscoveredDevice) {
        let _ = self.tx.send(RadioEvent::DeviceDiscovered(device));
    }
}

async fn cmd_demo(
    config: RelayConfig,
    mode: i32,
    filter: String,
    key: Option<String>,
    message: String,
    drop_link: bool,
) -> Result<()> {
    println!("{}", "BLE relay demo (loopback radio)".bold());
    println!();

    let radio = LoopbackRadio::new();
    let relay = RelayFacade::new(
        Arc::new(radio.clone()),
        Arc::new(StaticEnvironment::ready()),
        config,
    )
    .context("Invalid relay configuration")?;

    let (tx, mut events) = mpsc::unbounded_channel();
    relay.set_listener(Some(Arc::new(DemoListener { tx })));

    report("init", relay.init());
    wait_for_status(&relay, ConnectionStatus::Bound).await?;
    println!("  {} Radio service {}", "✓".green(), "bound".bright_cyan());

    let status = relay.update_parameters_code(mode, &filter, key.as_deref());
    report("update_parameters", status);
    if !status.is_success() {
        anyhow::bail!("Parameters rejected: {}", status);
    }

    relay.start();
    println!("  {} Active mode: {}", "✓".green(), relay.active_mode().to_string().bright_cyan());

    radio.inject_device(DiscoveredDevice::new(
        "C0:FF:EE:00:00:01",
        Some("loopback-peer".to_string()),
    ));
    report("relay_data", relay.relay_data(message.as_str()));
    drain_events(&mut events, 2).await;

    if drop_link {
        println!();
        println!("{}", "Dropping radio link...".yellow());
        radio.drop_link();
        wait_for_status(&relay, ConnectionStatus::Disconnected).await?;
        println!("  {} Connection {}", "•".bright_yellow(), "lost".bright_red());
        wait_for_status(&relay, ConnectionStatus::Bound).await?;
        println!(
            "  {} Rebound, active mode resumed: {}",
            "✓".green(),
            relay.active_mode().to_string().bright_cyan()
        );
    }

    println!();
    println!("{}", "Discovered devices".bold());
    let devices = relay.get_discovered_devices();
    if devices.is_empty() {
        println!("  {}", "(none)".dimmed());
    }
    for device in devices {
        println!("  {} {}", "•".bright_green(), device);
    }

    relay.shutdown();
    println!();
    println!("{}", "Stats".bold());
    println!("{}", serde_json::to_string_pretty(&relay.stats())?);

    Ok(())
}

fn report(operation: &str, status: StatusCode) {
    if status.is_success() {
        println!("  {} {}", "✓".green(), operation);
    } else {
        println!("  {} {}: {}", "✗".red(), operation, status.to_string().bright_red());
    }
}

async fn wait_for_status(relay: &RelayFacade, status: ConnectionStatus) -> Result<()> {
    for _ in 0..1000 {
        if relay.connection_status() == status {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    anyhow::bail!(
        "Timed out waiting for connection {} (currently {})",
        status,
        relay.connection_status()
    )
}

async fn drain_events(events: &mut mpsc::UnboundedReceiver<RadioEvent>, expected: usize) {
    for _ in 0..expected {
        match tokio::time::timeout(Duration::from_secs(2), events.recv()).await {
            Ok(Some(RadioEvent::PayloadReceived(payload))) => {
                println!(
                    "  {} Payload: {} ({})",
                    "←".bright_blue(),
                    String::from_utf8_lossy(&payload).bright_cyan(),
                    hex::encode(&payload).dimmed()
                );
            }
            Ok(Some(RadioEvent::DeviceDiscovered(device))) => {
                println!("  {} Discovered: {}", "←".bright_blue(), device);
            }
            Ok(None) | Err(_) => break,
        }
    }
}

// ============================================================================
// VALIDATE
// ============================================================================

fn cmd_validate(
    config: &RelayConfig,
    mode: i32,
    filter: &str,
    key: Option<&str>,
    env: StaticEnvironment,
) -> Result<()> {
    let validator = ParameterValidator::new(&config.default_encryption_key);

    match validator.validate(mode, filter, key, &env) {
        Ok(params) => {
            println!("{} {}", "✓".green(), StatusCode::Success);
            println!("  Mode:   {}", params.mode.to_string().bright_cyan());
            println!(
                "  Filter: {:?} ({})",
                String::from_utf8_lossy(&params.filter_value),
                hex::encode(&params.filter_value)
            );
            println!("  Key:    <{} bytes>", params.encryption_key().len());
            Ok(())
        }
        Err(e) => {
            let status = StatusCode::from(&e);
            println!("{} {}", "✗".red(), status.to_string().bright_red());
            anyhow::bail!("{}", e)
        }
    }
}

// ============================================================================
// CONFIG
// ============================================================================

fn cmd_config(store: &ConfigStore, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let relay_config = store.load()?;
            println!("{}", "Configuration".bold());
            if !store.exists() {
                println!("  {}", "(defaults, no config file yet)".dimmed());
            }
            println!();
            for (key, value) in config::list(&relay_config) {
                println!("  {:<28} {}", key.bright_cyan(), value);
            }
        }

        ConfigAction::Init { force } => {
            if store.exists() && !force {
                anyhow::bail!(
                    "{} already exists (use --force to overwrite)",
                    store.path().display()
                );
            }
            store.save(&RelayConfig::default())?;
            println!("{} Wrote {}", "✓".green(), store.path().display());
        }

        ConfigAction::Path => {
            println!("{}", store.path().display());
        }

        ConfigAction::Get { key } => {
            let relay_config = store.load()?;
            match config::get_value(&relay_config, &key) {
                Some(value) => println!("{} = {}", key.bright_cyan(), value),
                None => anyhow::bail!("Unknown config key: {}", key),
            }
        }

        ConfigAction::Set { key, value } => {
            store.set(&key, &value)?;
            tracing::info!("Config key {} updated", key);
            println!("{} Set {}", "✓".green(), key.bright_cyan());
        }
    }

    Ok(())
}

//! Host build of the connectivity gateway
//!
//! Boots the gateway tasks against simulated hardware and drives the console
//! menu from stdin. Ctrl-C or the end of stdin shuts every task down.

mod console;
mod sim;

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use gateway_node::{Gateway, GatewayConfig};
use log::*;

use crate::console::StdinConsole;

#[derive(Parser)]
#[command(name = "gateway-device")]
#[command(about = "Connectivity gateway on simulated hardware")]
struct Cli {
    /// Config file (default: $GATEWAY_HOME/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Boot the gateway and drive the console over stdin
    Run {
        /// Simulated Wi-Fi and PPP addresses expire this many seconds after connecting
        #[arg(long, value_name = "SECS")]
        drop_ip_after: Option<u64>,
    },
    /// Print the effective configuration as JSON
    PrintConfig,
}

/// GATEWAY_HOME, or ~/.gateway
fn gateway_home() -> anyhow::Result<PathBuf> {
    if let Ok(home) = std::env::var("GATEWAY_HOME") {
        return Ok(PathBuf::from(home));
    }
    let home = dirs::home_dir().context("could not determine home directory")?;
    Ok(home.join(".gateway"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let path = match cli.config {
        Some(path) => path,
        None => gateway_home()?.join("config.json"),
    };
    let config = GatewayConfig::load(&path).with_context(|| format!("loading {}", path.display()))?;

    match cli.command {
        Commands::PrintConfig => println!("{}", config.to_json_pretty()?),
        Commands::Run { drop_ip_after } => run(config, drop_ip_after.map(Duration::from_secs)).await?,
    }
    Ok(())
}

async fn run(config: GatewayConfig, address_lifetime: Option<Duration>) -> anyhow::Result<()> {
    let mut gateway = Gateway::start(config, sim::collaborators(StdinConsole::new(), address_lifetime))?;

    match gateway.take_console() {
        Some(menu) => {
            let (done_tx, done_rx) = tokio::sync::oneshot::channel();
            // Not joined: it may be parked in a stdin read when we exit
            thread::Builder::new().name("console".into()).spawn(move || {
                menu.run();
                let _ = done_tx.send(());
            })?;
            tokio::select! {
                _ = done_rx => info!("console closed"),
                signal = tokio::signal::ctrl_c() => {
                    signal?;
                    info!("interrupted");
                }
            }
        }
        None => {
            tokio::signal::ctrl_c().await?;
            info!("interrupted");
        }
    }

    tokio::task::spawn_blocking(move || gateway.shutdown()).await?;
    Ok(())
}

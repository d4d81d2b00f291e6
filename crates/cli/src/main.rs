//! guardant CLI: discover, probe, and talk to Guardant dongles from the command line.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use guardant_core::enumerate::{self, DeviceInfo};
use guardant_core::{lock, probe, protocol, Config, ProductId};

#[derive(Parser)]
#[command(
    name = "guardant",
    version,
    about = "Linux access layer for Guardant USB dongles"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List connected Guardant dongles.
    List {
        /// Print every candidate node, not just recognized dongles.
        #[arg(long)]
        all: bool,
        /// Emit JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Identify the dongle behind a device node.
    Probe {
        /// usbfs or hiddev node, e.g. /dev/bus/usb/001/004 or /dev/grdhid0.
        path: String,
    },
    /// Send a command and read the response.
    Exchange {
        /// Device node to talk to.
        path: String,
        /// Product ID (e.g. 0x08); probed when omitted.
        #[arg(long, value_parser = parse_u32)]
        product: Option<u32>,
        /// Packet size both buffers are split into.
        #[arg(long)]
        pack_size: usize,
        /// Output bytes as hex.
        #[arg(long, default_value = "")]
        out: String,
        /// Number of response bytes to read.
        #[arg(long, default_value_t = 0)]
        in_len: usize,
    },
    /// Show the lock file guarding a device node.
    LockPath {
        /// Device node.
        path: String,
    },
    /// Print the configuration resolved from the environment.
    Config,
    /// Print the driver version.
    Version,
}

fn parse_u32(s: &str) -> std::result::Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number '{s}': {e}"))
}

fn print_devices(devices: &[DeviceInfo], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(devices)?);
    } else if devices.is_empty() {
        println!("No Guardant dongles found.");
        println!("Check that the dongle is plugged in and its device node is accessible.");
    } else {
        for dev in devices {
            println!("{} (PID: 0x{:02X}, path: {})", dev.product.name(), dev.pid, dev.path);
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Commands::List { all, json } => {
            if all {
                let paths: Vec<String> = enumerate::candidates(&config)?
                    .map(|p| p.display().to_string())
                    .collect();
                if json {
                    println!("{}", serde_json::to_string_pretty(&paths)?);
                } else {
                    for path in &paths {
                        println!("{path}");
                    }
                }
            } else {
                let devices = enumerate::discover_devices(&config)?;
                print_devices(&devices, json)?;
            }
        }
        Commands::Probe { path } => {
            let product = probe::probe(&config, &path)?;
            println!("{product}");
        }
        Commands::Exchange {
            path,
            product,
            pack_size,
            out,
            in_len,
        } => {
            let out = hex::decode(out.trim()).context("--out must be hex")?;
            let pid = match product {
                Some(pid) => pid,
                None => probe::probe(&config, &path)?.pid(),
            };
            if let Some(known) = ProductId::from_pid(pid) {
                tracing::info!(product = %known, "Using product");
            }
            let mut input = vec![0u8; in_len];
            protocol::exchange(&config, &path, pid, pack_size, &out, &mut input)?;
            println!("{}", hex::encode(&input));
        }
        Commands::LockPath { path } => {
            let lock_path = lock::lock_path(&config.lock_dir, &path)?;
            println!("{} (bucket {:02})", lock_path.display(), lock::lock_bucket(&path));
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Version => {
            println!("0x{:04X}", guardant_core::api::driver_version());
        }
    }

    Ok(())
}

//! Speeduino probe
//!
//! Connects to an ECU, prints its signature and version, and dumps one
//! realtime data frame.
//!
//! Usage:
//!   speeduino-probe [OPTIONS] [PORT]
//!
//! Options:
//!   --port PORT       Serial port (default: /dev/ttyACM0)
//!   --baud RATE       Baud rate (default: 115200)
//!   --config FILE     Load link settings from a JSON file
//!   --length N        Realtime bytes to read (default: 16)
//!   --demo            Talk to the built-in simulated ECU
//!   --list            List serial ports and exit
//!
//! Logging is controlled with RUST_LOG (default: info).

use anyhow::{bail, Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use speeduino_link::demo::DemoEcu;
use speeduino_link::protocol::{list_ports, LinkEvent};
use speeduino_link::{LinkConfig, Speeduino};

struct Args {
    config: LinkConfig,
    length: u16,
    demo: bool,
    list: bool,
}

fn parse_args() -> Result<Option<Args>> {
    let mut config = LinkConfig::for_port("/dev/ttyACM0");
    let mut length = 16u16;
    let mut demo = false;
    let mut list = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--port" | "-p" => {
                config.port_name = args.next().context("--port needs a value")?;
            }
            "--baud" | "-b" => {
                let value = args.next().context("--baud needs a value")?;
                config.baud_rate = value.parse().context("invalid baud rate")?;
            }
            "--config" | "-c" => {
                let path = args.next().context("--config needs a value")?;
                config = LinkConfig::from_json_file(&path)
                    .with_context(|| format!("loading {}", path))?;
            }
            "--length" | "-n" => {
                let value = args.next().context("--length needs a value")?;
                length = value.parse().context("invalid length")?;
            }
            "--demo" => demo = true,
            "--list" => list = true,
            "--help" | "-h" => {
                print_help();
                return Ok(None);
            }
            other if other.starts_with('-') => bail!("unknown option: {}", other),
            other => config.port_name = other.to_string(),
        }
    }

    Ok(Some(Args {
        config,
        length,
        demo,
        list,
    }))
}

fn print_help() {
    println!("Usage: speeduino-probe [--port PORT] [--baud RATE] [--config FILE] [--length N] [--demo] [--list]");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let Some(args) = parse_args()? else {
        return Ok(());
    };

    if args.list {
        for port in list_ports() {
            println!(
                "{}\t{}",
                port.name,
                port.product.as_deref().unwrap_or("-")
            );
        }
        return Ok(());
    }

    let ecu = if args.demo {
        info!("using simulated ECU");
        Speeduino::from_stream(DemoEcu::new().spawn(), &args.config)
    } else {
        info!(
            "opening {} at {} baud",
            args.config.port_name, args.config.baud_rate
        );
        Speeduino::open(&args.config)
            .with_context(|| format!("opening {}", args.config.port_name))?
    };

    let mut events = ecu.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                LinkEvent::Unexpected(bytes) => warn!("unexpected bytes: {:02x?}", bytes),
                LinkEvent::TransportError(cause) => warn!("link failed: {}", cause),
            }
        }
    });

    let signature = ecu.signature().await.context("signature query failed")?;
    println!("Signature: {}", signature.trim_end());

    let version = ecu.version_info().await.context("version query failed")?;
    println!("Version:   {}", version.trim_end());

    let frame = ecu
        .output_channels(args.length)
        .await
        .context("output channel read failed")?;
    println!("Realtime:  {:02x?}", frame);

    let stats = ecu.stats();
    info!(
        "tx {} bytes, rx {} bytes, {} requests",
        stats.tx_bytes, stats.rx_bytes, stats.requests_completed
    );

    ecu.close();
    ecu.closed().await;
    Ok(())
}

//! Tally Cycle
//!
//! Exercises a tally indicator panel's serial command interface by sending
//! every `Q<tally><state>W` command in a fixed order, forever.
//!
//! # Usage
//!
//! ```bash
//! # List available serial ports
//! tally-cycle ports
//!
//! # Print one cycle of commands without touching a port
//! tally-cycle sequence
//!
//! # Cycle through every command until interrupted
//! tally-cycle run -p /dev/cu.usbmodemfa131
//!
//! # Stop after two full cycles
//! tally-cycle run -p /dev/ttyACM0 --cycles 2
//!
//! # Send a single command
//! tally-cycle send -p /dev/ttyACM0 -t A -s 3
//! ```

mod config;
mod driver;
mod message;
mod serial;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use log::{debug, info};
use std::io;
use std::path::PathBuf;

use config::Settings;
use driver::{Driver, DriverConfig, SerialConnector, ThreadSleeper};
use message::{Cycle, Message};
use serial::PortConfig;

/// Tally Cycle
///
/// Serial exerciser for tally indicator panels
#[derive(Parser)]
#[command(name = "tally-cycle")]
#[command(author = "Prasanna Gautam")]
#[command(version = "0.1.0")]
#[command(about = "Cycles every tally/state command through a tally indicator panel")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Port selection shared by commands that open the panel
#[derive(clap::Args, Debug)]
struct PortArgs {
    /// Serial port path (auto-detects a USB adapter when omitted)
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate (default: 115200)
    #[arg(short, long)]
    baud: Option<u32>,

    /// Settings file (TOML with `port` and `baud_rate`)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Send every tally/state command in order, repeating until stopped
    Run {
        #[command(flatten)]
        port: PortArgs,

        /// Stop after this many full cycles
        #[arg(long)]
        cycles: Option<u64>,
    },

    /// Send a single command
    Send {
        #[command(flatten)]
        port: PortArgs,

        /// Tally (1-9, A-F)
        #[arg(short, long)]
        tally: char,

        /// State (0-4)
        #[arg(short, long)]
        state: char,
    },

    /// Print one cycle of commands
    Sequence,

    /// List available serial ports
    Ports,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match cli.command {
        Commands::Run { port, cycles } => handle_run(port, cycles),
        Commands::Send { port, tally, state } => handle_send(port, tally, state),
        Commands::Sequence => handle_sequence(),
        Commands::Ports => serial::port::print_ports(),
    }
}

fn handle_run(args: PortArgs, cycles: Option<u64>) -> Result<()> {
    let port_config = resolve_port(args)?;
    let config = DriverConfig::new(port_config).with_max_cycles(cycles);

    let mut driver = Driver::new(config, ThreadSleeper, io::stdout());
    let result = driver.run(&mut SerialConnector);
    debug!("Driver stopped in state {:?}", driver.state());
    let summary = result?;

    println!(
        "{} Sent {} messages ({} bytes)",
        "[OK]".green().bold(),
        summary.messages_sent,
        summary.bytes_written
    );
    Ok(())
}

fn handle_send(args: PortArgs, tally: char, state: char) -> Result<()> {
    let message = Message::new(tally, state)?;
    let port_config = resolve_port(args)?;

    let mut driver = Driver::new(DriverConfig::new(port_config), ThreadSleeper, io::stdout());
    driver.send(&mut SerialConnector, message)?;

    println!("{}", "[OK] Command sent".green());
    Ok(())
}

fn handle_sequence() -> Result<()> {
    println!("{}", "=".repeat(40));
    println!("{}", "Tally Command Cycle".cyan().bold());
    println!("{}", "=".repeat(40));

    for (index, message) in Cycle::new().enumerate() {
        println!(
            "  {:>2}  T: {} S: {}  {}",
            index + 1,
            message.tally(),
            message.state(),
            message.to_string().white().bold()
        );
    }

    println!("{}", "=".repeat(40));
    Ok(())
}

/// Build the port configuration from flags, settings file, and auto-detection
fn resolve_port(args: PortArgs) -> Result<PortConfig> {
    let settings = Settings::load_optional(args.config.as_deref())?.merge(args.port, args.baud);

    let port_path = match settings.port {
        Some(p) => p,
        None => {
            let detected = serial::port::detect_usb_ports()?;
            let first = detected.into_iter().next().ok_or_else(|| {
                anyhow!("No USB serial ports detected. Use -p to specify the port manually.")
            })?;
            println!(
                "{} Auto-detected: {}",
                "[OK]".green().bold(),
                first.path.white()
            );
            first.path
        }
    };

    info!("Using {} at {} baud", port_path, settings.baud_rate);
    Ok(PortConfig::new(&port_path).with_baud_rate(settings.baud_rate))
}

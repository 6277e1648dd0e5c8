//! # devhal Binary
//!
//! Command-line front end to the hardware abstraction layer: list drivers,
//! or connect one, perform a write/action/read and disconnect again.
//! Fingerprints persist in the store directory, so a second invocation
//! restores the same device without prompting.
//!
//! # Usage
//!
//! ```bash
//! # List drivers on simulated platforms
//! devhal -s list
//!
//! # Echo through the simulated serial port
//! devhal -s run serial --write hello --read
//!
//! # Real serial port at 9600 baud (requires feature native-serial)
//! devhal --config /etc/devhal/devhal.toml run serial --baud-rate 9600 --read --timeout-ms 500
//!
//! # Write a file into a granted directory
//! devhal run storage --entry notes.txt --write "hello"
//!
//! # Hold the screen awake
//! devhal -s run wakelock --action acquire --read
//!
//! # Drop the remembered serial port; the next run prompts again
//! devhal forget serial
//! ```

use clap::{Args as ClapArgs, Parser, Subcommand};
use devhal::core::HalCore;
use devhal::platform::Platforms;
use devhal::platform::console::ConsolePrompter;
use devhal_common::config::{ConfigLoader, LogLevel};
use devhal_common::hal::config::HalConfig;
use devhal_common::hal::consts::{DEFAULT_CONFIG_PATH, OPT_BAUD_RATE};
use devhal_common::hal::driver::{Driver, HalError};
use devhal_common::hal::types::{ConnectOptions, ReadOutput, ReadRequest, WriteRequest};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

/// devhal - Hardware Abstraction Layer for host peripherals
#[derive(Parser, Debug)]
#[command(name = "devhal")]
#[command(version)]
#[command(about = "Hardware Abstraction Layer with persistent device reconnection")]
#[command(long_about = None)]
struct Args {
    /// Path to the configuration file (devhal.toml).
    /// Defaults apply when the default path does not exist.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Use simulated platforms instead of the host's devices
    #[arg(short = 's', long)]
    simulate: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List registered drivers with their detection result
    List,
    /// Connect a driver, perform the requested operations, disconnect
    Run(RunArgs),
    /// Delete a driver's remembered device so the next connect prompts
    Forget {
        /// Driver name
        driver: String,
    },
}

#[derive(ClapArgs, Debug)]
struct RunArgs {
    /// Driver name
    driver: String,

    /// Text to write (stream data, or entry content with --entry)
    #[arg(long, value_name = "TEXT")]
    write: Option<String>,

    /// Storage entry targeted by --write and --read
    #[arg(long, value_name = "NAME")]
    entry: Option<String>,

    /// Wake-lock action (acquire or release)
    #[arg(long, value_name = "ACTION")]
    action: Option<String>,

    /// Read once after writing
    #[arg(long)]
    read: bool,

    /// Read deadline in milliseconds
    #[arg(long, value_name = "MS")]
    timeout_ms: Option<u64>,

    /// Serial baud rate for interactive acquisition
    #[arg(long, value_name = "BAUD")]
    baud_rate: Option<u32>,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("devhal failed: {}", e);
        eprintln!("devhal: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let path = config_path(args.config.as_deref());
    setup_tracing(&args, configured_level(path.as_deref()));

    info!("devhal v{} starting...", env!("CARGO_PKG_VERSION"));
    let (config, config_dir) = resolve_config(path.as_deref())?;

    let platforms = if args.simulate {
        info!("Simulation mode enabled");
        Platforms::simulated()
    } else {
        Platforms::native(&config, Arc::new(ConsolePrompter::new()))
    };

    let core = HalCore::new(config, &config_dir, platforms)?;

    let result = match &args.command {
        Command::List => {
            list(&core).await;
            Ok(())
        }
        Command::Run(run_args) => {
            let driver = core.driver(&run_args.driver)?;
            tokio::select! {
                result = exercise(driver.as_ref(), run_args) => result,
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    Ok(())
                }
            }
        }
        Command::Forget { driver } => core.forget(driver).await.map(|()| {
            println!("forgot {driver}");
        }),
    };

    core.shutdown().await;
    info!("devhal shutdown complete");
    result.map_err(Into::into)
}

/// The configuration file to load: the explicit path, else the default
/// path when it exists.
fn config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    match explicit {
        Some(p) => Some(p.to_path_buf()),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG_PATH);
            default.exists().then_some(default)
        }
    }
}

/// Log level from the configuration file, read without logging so the
/// subscriber can be installed before the file is loaded for real.
/// Unreadable files fall back to the default; `resolve_config` reports them.
fn configured_level(path: Option<&Path>) -> LogLevel {
    path.and_then(|p| HalConfig::load(p).ok())
        .map_or_else(LogLevel::default, |config| config.shared.log_level)
}

/// Load and validate the configuration file, or use defaults when there is
/// none. Returns the config with the directory relative paths resolve against.
fn resolve_config(path: Option<&Path>) -> Result<(HalConfig, PathBuf), HalError> {
    let Some(path) = path else {
        info!("No configuration file, using defaults");
        return Ok((HalConfig::default(), PathBuf::from(".")));
    };

    let config = HalCore::load_config(path)?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    Ok((config, dir))
}

async fn list(core: &HalCore) {
    for driver in core.registry().list() {
        let detected = driver.detect().await;
        let descriptor = driver.descriptor();
        println!(
            "{:<12} {:<9} v{:<8} {:<12} {}",
            descriptor.name,
            descriptor.kind.as_str(),
            descriptor.version,
            if detected { "supported" } else { "unsupported" },
            descriptor.state
        );
    }
}

async fn exercise(driver: &dyn Driver, args: &RunArgs) -> Result<(), HalError> {
    let mut options = ConnectOptions::new();
    if let Some(baud) = args.baud_rate {
        options = options.with(OPT_BAUD_RATE, baud);
    }

    let info = driver.connect(&options).await?;
    println!(
        "connected {} to {} ({})",
        info.driver, info.resource, info.method
    );
    for (key, value) in &info.details {
        println!("  {key}: {value}");
    }

    if let Some(text) = &args.write {
        let request = match &args.entry {
            Some(name) => WriteRequest::entry(name.as_str(), text.as_str()),
            None => WriteRequest::data(text.as_str()),
        };
        let outcome = driver.write(request).await?;
        match outcome.bytes_written() {
            Some(n) => println!("wrote {n} byte(s)"),
            None => println!("write: {outcome:?}"),
        }
    }

    if let Some(action) = &args.action {
        let outcome = driver.write(WriteRequest::action(action.as_str())).await?;
        println!("{action}: {outcome:?}");
    }

    if args.read {
        let mut request = match &args.entry {
            Some(name) => ReadRequest::entry(name.as_str()),
            None => ReadRequest::default(),
        };
        request.timeout = args.timeout_ms.map(Duration::from_millis);

        match driver.read(request).await {
            Ok(output) => print_output(&output),
            Err(HalError::ReadTimeout(t)) => warn!("No data within {:?}", t),
            Err(e) => return Err(e),
        }
    }

    Ok(())
}

fn print_output(output: &ReadOutput) {
    match output {
        ReadOutput::Bytes(bytes) => println!("{}", String::from_utf8_lossy(bytes)),
        ReadOutput::Entries(entries) => {
            for entry in entries {
                println!("{:?}\t{}", entry.kind, entry.name);
            }
        }
        ReadOutput::WakeLock(status) => println!(
            "{} wake-lock {}",
            status.kind,
            if status.active { "active" } else { "inactive" }
        ),
    }
}

/// Setup tracing subscriber based on CLI arguments and the configured level.
fn setup_tracing(args: &Args, configured: LogLevel) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::from(configured)
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

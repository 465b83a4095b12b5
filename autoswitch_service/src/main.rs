use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use autoswitch_service::config::ServiceConfig;
use autoswitch_service::ingest::api::HttpDeviceSource;
use autoswitch_service::logging::{self, Component, LogLevel};
use autoswitch_service::scheduler::{AutoSwitchController, AutoSwitchHandle, InboundEvent, Interaction};
use autoswitch_service::sink::TracingSink;
use autoswitch_service::staleness;

/// Command line arguments for the auto-switch service
#[derive(Parser, Debug)]
#[command(name = "autoswitch_service")]
#[command(about = "Cycles the flood map focus through monitoring stations")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Start cycling as soon as the controller is up
    #[arg(long)]
    autostart: bool,

    /// Minimum log level (debug, info, warn, error)
    #[arg(long)]
    log_level: Option<LogLevel>,
}

const HELP: &str = "commands: start stop toggle pause resume refresh on off status quit, or a JSON event";

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = ServiceConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if args.autostart {
        config.autoswitch.is_auto_switch_on = true;
    }

    logging::init_logger(
        config.logging.level,
        config.logging.file.as_deref(),
        config.logging.timestamps,
    )
    .context("failed to open log file")?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build runtime")?;
    runtime.block_on(run(config))
}

async fn run(config: ServiceConfig) -> anyhow::Result<()> {
    let source = HttpDeviceSource::new(&config.endpoint).context("failed to build HTTP client")?;
    logging::info(Component::System, None, &format!("Device endpoint: {}", source.url()));

    let (handle, controller) =
        AutoSwitchController::spawn(&config.autoswitch, Arc::new(source), Arc::new(TracingSink));

    let mut signals = handle.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match signals.recv().await {
                Ok(signal) => match serde_json::to_string(&signal) {
                    Ok(line) => println!("{}", line),
                    Err(e) => logging::error(Component::System, None, &format!("Cannot encode signal: {}", e)),
                },
                Err(RecvError::Lagged(missed)) => {
                    logging::warn(Component::System, None, &format!("Dropped {} signals", missed));
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let stale_after = config.autoswitch.stale_after();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                if !apply_line(&handle, line.trim(), stale_after).await? {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                logging::info(Component::System, None, "Interrupted");
                break;
            }
        }
    }

    handle.shutdown().await.ok();
    controller.await.context("controller task failed")?;
    printer.abort();
    Ok(())
}

/// Applies one stdin line. Returns `false` on `quit`.
async fn apply_line(
    handle: &AutoSwitchHandle,
    line: &str,
    stale_after: std::time::Duration,
) -> anyhow::Result<bool> {
    let applied = match line {
        "" => Ok(()),
        "start" => handle.start().await,
        "stop" => handle.stop().await,
        "toggle" => handle.toggle().await,
        "pause" => handle.pause(Interaction::Manual).await,
        "resume" => handle.resume().await,
        "refresh" => handle.refresh().await,
        "on" => handle.set_external_flag(true).await,
        "off" => handle.set_external_flag(false).await,
        "status" => {
            print_status(handle, stale_after);
            Ok(())
        }
        "quit" | "exit" => return Ok(false),
        text if text.starts_with('{') => match InboundEvent::from_json(text) {
            Ok(event) => handle.dispatch(event).await,
            Err(e) => {
                eprintln!("{}", e);
                Ok(())
            }
        },
        _ => {
            eprintln!("{}", HELP);
            Ok(())
        }
    };
    applied.context("controller is gone")?;
    Ok(true)
}

fn print_status(handle: &AutoSwitchHandle, stale_after: std::time::Duration) {
    let status = handle.status();
    let devices = handle.store().snapshot();
    let line = serde_json::json!({
        "state": status.state,
        "currentIndex": status.current_index,
        "deviceCount": status.device_count,
        "loading": devices.loading,
        "lastFetch": devices.last_fetch,
        "stale": staleness::is_stale(devices.last_fetch, stale_after),
        "lastError": devices.last_error,
        "lastAdapterError": status.last_adapter_error,
    });
    println!("{}", line);
}

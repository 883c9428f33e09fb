//! yearcache - command-line driver for the yearcache library.
//!
//! Commands:
//!
//! - `yearcache range <SYMBOL> <FROM> <TO>`: fetch missing years directly
//!   and print the records in range as JSON
//! - `yearcache hub <SYMBOL> <YEAR>...`: run a local connection hub, connect
//!   one context per year plus a watcher, and print every event delivered
//!
//! `--log-file <DIR>` additionally writes daily-rolling logs to `DIR`.

use std::io;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::join_all;
use serde_json::json;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use yearcache_core::cache::PENDING_NOTICE;
use yearcache_core::hub::{HubOptions, HubSnapshot};
use yearcache_core::models::bars_in;
use yearcache_core::{
    Config, ConnectionHub, FetchRequest, HttpProvider, HubEvent, HubRequest, RangeError,
    YearlyRecordStore,
};

const USAGE: &str = "\
Usage:
  yearcache [--log-file <DIR>] range <SYMBOL> <FROM> <TO>
  yearcache [--log-file <DIR>] hub <SYMBOL> <YEAR>...

Dates accept YYYY-MM-DD, YYYY/MM/DD or YYYYMMDD.
Set RUST_LOG (e.g. RUST_LOG=debug) to control log output.";

/// Initialize the tracing subscriber for logging.
///
/// The returned guard flushes the file writer and must live until exit.
fn init_tracing(log_dir: Option<&str>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr));

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "yearcache.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            registry
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            registry.init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let mut args: Vec<String> = std::env::args().skip(1).collect();

    let mut log_dir = None;
    if let Some(pos) = args.iter().position(|a| a == "--log-file") {
        if pos + 1 >= args.len() {
            anyhow::bail!("--log-file requires a directory\n\n{}", USAGE);
        }
        log_dir = Some(args.remove(pos + 1));
        args.remove(pos);
    }
    let _guard = init_tracing(log_dir.as_deref());

    let config = Config::load().context("Failed to load configuration")?;

    match args.first().map(String::as_str) {
        Some("range") if args.len() == 4 => run_range(&config, &args[1], &args[2], &args[3]).await,
        Some("hub") if args.len() >= 3 => {
            let years = args[2..]
                .iter()
                .map(|y| y.parse::<i32>().with_context(|| format!("Invalid year: {}", y)))
                .collect::<Result<Vec<_>>>()?;
            run_hub(&config, &args[1], &years).await
        }
        Some("-h") | Some("--help") | Some("help") => {
            println!("{}", USAGE);
            Ok(())
        }
        _ => {
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    }
}

/// Direct path: one store, fetching each missing year from the data origin.
async fn run_range(config: &Config, symbol: &str, from: &str, to: &str) -> Result<()> {
    let provider = HttpProvider::new(config.data_base_url.as_str(), config.request_timeout())
        .context("Failed to build HTTP client")?;
    let mut store = YearlyRecordStore::new(symbol, Arc::new(provider))
        .with_current_year_staleness(config.current_year_stale_minutes);

    info!(symbol = symbol, from = from, to = to, "Range query");

    match store.get_str(from, to).await {
        Ok(records) => {
            println!("{}", serde_json::to_string_pretty(&records)?);

            let bars = bars_in(&records);
            if let (Some((first_day, first)), Some((last_day, last))) = (bars.first(), bars.last()) {
                eprintln!(
                    "{} records ({} bars), {} close {:.2} -> {} close {:.2}",
                    records.len(),
                    bars.len(),
                    first_day,
                    first.close,
                    last_day,
                    last.close
                );
            } else {
                eprintln!("{} records", records.len());
            }
            Ok(())
        }
        Err(RangeError::Pending { years }) => {
            eprintln!("{} (pending years: {:?})", PENDING_NOTICE, years);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Shared path: a local hub with one context per requested year.
async fn run_hub(config: &Config, symbol: &str, years: &[i32]) -> Result<()> {
    let upstream = HttpProvider::new(config.hub_upstream_url.as_str(), config.request_timeout())
        .context("Failed to build HTTP client")?;
    let options: HubOptions = config.hub_options();
    let hub = ConnectionHub::spawn(Arc::new(upstream), options);

    let mut watcher = hub.connect().await?;
    let mut ports = Vec::with_capacity(years.len());
    for &year in years {
        ports.push((year, hub.connect().await?));
    }

    watcher
        .send(HubRequest::BroadcastStatus(json!({"syncing": symbol, "years": years})))
        .await?;

    let fetches = ports.iter().map(|(year, port)| {
        let key = format!("{}/{}", port.id(), year);
        port.send(HubRequest::FetchData(FetchRequest::new(symbol, *year, key)))
    });
    for sent in join_all(fetches).await {
        sent?;
    }

    for (year, port) in ports.iter_mut() {
        while let Some(event) = port.recv().await {
            println!("{} {}: {}", port.id(), year, serde_json::to_string(&event)?);
            if matches!(event, HubEvent::DataResult(_)) {
                break;
            }
        }
    }
    while let Some(event) = watcher.try_recv() {
        println!("{} watcher: {}", watcher.id(), serde_json::to_string(&event)?);
    }

    let HubSnapshot {
        connections,
        cached_keys,
        ..
    } = hub.snapshot().await?;
    eprintln!("{} connections, cached: {:?}", connections.len(), cached_keys);

    hub.shutdown().await?;
    Ok(())
}

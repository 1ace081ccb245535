use clap::Parser;
use safe_entry_watcher::clock::{Clock, SystemClock};
use safe_entry_watcher::config::{load_config, ConfigFile, WatcherSettings};
use safe_entry_watcher::notify::{AlertSink, CompositeSink, LogSink, WebhookSink};
use safe_entry_watcher::persist::{JsonFileStore, MemoryStateStore, StateStore};
use safe_entry_watcher::types::Instrument;
use safe_entry_watcher::watcher::{SyntheticSource, Watcher};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "watcher", about = "Safe-entry market watcher over a synthetic feed")]
struct Args {
    /// TOML config file; a built-in sample is used when omitted.
    #[arg(long, env = "WATCHER_CONFIG")]
    config: Option<PathBuf>,

    /// Override the watched instruments (comma separated).
    #[arg(long, value_delimiter = ',')]
    instruments: Vec<String>,

    /// Persist watcher state to this JSON file.
    #[arg(long, env = "WATCHER_STATE")]
    state: Option<PathBuf>,

    #[arg(long, env = "WATCHER_WEBHOOK_URL")]
    webhook_url: Option<String>,

    #[arg(long, env = "WATCHER_MIN_POLL_MS", default_value_t = 2_000)]
    min_poll_ms: u64,

    #[arg(long, default_value_t = 3_000)]
    fetch_timeout_ms: u64,

    #[arg(long, default_value_t = 5_000)]
    stop_grace_ms: u64,

    /// Mute instruments at startup for this many minutes (comma separated).
    #[arg(long, value_delimiter = ',')]
    mute: Vec<String>,

    #[arg(long, default_value_t = 60)]
    mute_minutes: u64,

    /// Exit after this many seconds instead of waiting for Ctrl-C.
    #[arg(long)]
    run_secs: Option<u64>,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    #[arg(long, default_value_t = 100.0)]
    base_mid: f64,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    let mut file = match &args.config {
        Some(path) => load_config(path)?,
        None => ConfigFile::sample(),
    };
    if !args.instruments.is_empty() {
        file.watch.instruments = args.instruments.iter().map(Instrument::new).collect();
    }
    if let Some(url) = &args.webhook_url {
        file.notify.webhook_url = Some(url.clone());
    }
    file.validate()?;

    let settings = WatcherSettings {
        min_poll_interval: Duration::from_millis(args.min_poll_ms),
        fetch_timeout: Duration::from_millis(args.fetch_timeout_ms),
        stop_grace: Duration::from_millis(args.stop_grace_ms),
        state_path: args.state.clone(),
    }
    .clamped();

    let mut sinks: Vec<Arc<dyn AlertSink>> = Vec::new();
    if file.notify.log {
        sinks.push(Arc::new(LogSink));
    }
    if let Some(url) = &file.notify.webhook_url {
        sinks.push(Arc::new(WebhookSink::new(url.clone(), settings.fetch_timeout)?));
    }
    let sink: Arc<dyn AlertSink> = Arc::new(CompositeSink::new(sinks));

    let store: Arc<dyn StateStore> = match &settings.state_path {
        Some(path) => Arc::new(JsonFileStore::new(path.clone())),
        None => Arc::new(MemoryStateStore::default()),
    };
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let source = Arc::new(SyntheticSource::new(clock.clone(), args.seed).with_base_mid(args.base_mid));

    let watcher = Watcher::new(file.watch, settings, source, sink, store, clock);
    for symbol in &args.mute {
        watcher.mute_for(Instrument::new(symbol.as_str()), Duration::from_secs(args.mute_minutes.saturating_mul(60)));
    }
    watcher.start()?;

    match args.run_secs {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => tokio::signal::ctrl_c().await?,
    }
    watcher.stop().await;

    let report = json!({
        "metrics": watcher.metrics(),
        "status": watcher.status(),
        "calibration": watcher.calibration(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

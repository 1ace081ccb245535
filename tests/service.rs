use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use safe_entry_watcher::clock::{Clock, ManualClock};
use safe_entry_watcher::events::{FillOutcome, Leg};
use safe_entry_watcher::fill::FillModelParameters;
use safe_entry_watcher::notify::{AlertMessage, AlertSink};
use safe_entry_watcher::persist::{JsonFileStore, MemoryStateStore, PersistedState, StateStore};
use safe_entry_watcher::scoring::{ScoreWeights, ScoringConfig};
use safe_entry_watcher::types::{Instrument, MarketSnapshot, SideFilter};
use safe_entry_watcher::watcher::MarketDataSource;
use safe_entry_watcher::{Lifecycle, WatchConfig, Watcher, WatcherSettings};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Tight, deep, fairly priced book for every symbol, answered after an
/// optional per-symbol delay.
struct CalmMarket {
    clock: Arc<dyn Clock>,
    delays: HashMap<String, Duration>,
}

#[async_trait]
impl MarketDataSource for CalmMarket {
    async fn fetch_snapshot(&self, instrument: &Instrument) -> anyhow::Result<MarketSnapshot> {
        if let Some(delay) = self.delays.get(instrument.as_str()) {
            tokio::time::sleep(*delay).await;
        }
        Ok(MarketSnapshot {
            instrument: instrument.clone(),
            best_bid: 99.999,
            best_ask: 100.001,
            mid: 100.0,
            mark: 100.0,
            oracle: 100.0,
            funding_rate: 0.0,
            volume_24h: 2e7,
            depth: 20_000.0,
            sentiment: None,
            ts: self.clock.now(),
        })
    }
}

#[derive(Default)]
struct RecordingSink {
    sent: Mutex<Vec<AlertMessage>>,
}

#[async_trait]
impl AlertSink for RecordingSink {
    async fn send(&self, message: &AlertMessage) -> anyhow::Result<()> {
        self.sent.lock().push(message.clone());
        Ok(())
    }
}

/// Webhook that stalls for an hour before it records anything.
#[derive(Default)]
struct StalledSink {
    sent: Mutex<Vec<AlertMessage>>,
}

#[async_trait]
impl AlertSink for StalledSink {
    async fn send(&self, message: &AlertMessage) -> anyhow::Result<()> {
        tokio::time::sleep(Duration::from_secs(3_600)).await;
        self.sent.lock().push(message.clone());
        Ok(())
    }
}

fn config(symbols: &[&str]) -> WatchConfig {
    WatchConfig {
        instruments: symbols.iter().map(|s| Instrument::new(*s)).collect(),
        side: SideFilter::Long,
        poll_interval_ms: 2_000,
        scoring: ScoringConfig {
            weights: ScoreWeights::equal(),
            ..ScoringConfig::default()
        },
        ..WatchConfig::default()
    }
}

struct Setup {
    settings: WatcherSettings,
    store: Arc<dyn StateStore>,
    sink: Arc<dyn AlertSink>,
    delays: HashMap<String, Duration>,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            settings: WatcherSettings::default(),
            store: Arc::new(MemoryStateStore::default()),
            sink: Arc::new(RecordingSink::default()),
            delays: HashMap::new(),
        }
    }
}

impl Setup {
    fn build(self, config: WatchConfig) -> Watcher {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap()));
        let source = CalmMarket {
            clock: clock.clone(),
            delays: self.delays,
        };
        Watcher::new(config, self.settings, Arc::new(source), self.sink, self.store, clock)
    }
}

fn watcher_with(config: WatchConfig, store: Arc<dyn StateStore>) -> (Watcher, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let watcher = Setup {
        store,
        sink: sink.clone(),
        ..Setup::default()
    }
    .build(config);
    (watcher, sink)
}

fn watcher(config: WatchConfig) -> (Watcher, Arc<RecordingSink>) {
    watcher_with(config, Arc::new(MemoryStateStore::default()))
}

#[tokio::test(start_paused = true)]
async fn stop_on_a_stopped_watcher_is_a_no_op() {
    let (w, _) = watcher(config(&["BTC"]));
    let before = w.status();
    assert_eq!(w.stop().await, Lifecycle::Stopped);
    assert_eq!(w.status(), before);
    assert_eq!(w.pause(), Lifecycle::Stopped);
    assert_eq!(w.resume(), Lifecycle::Stopped);
}

#[tokio::test(start_paused = true)]
async fn invalid_config_refuses_to_start() {
    let mut cfg = config(&["BTC"]);
    cfg.hysteresis = 95.0;
    let (w, _) = watcher(cfg);
    assert!(w.start().is_err());
    assert_eq!(w.lifecycle(), Lifecycle::Stopped);
    assert!(!w.status().running);
}

#[tokio::test(start_paused = true)]
async fn lifecycle_transitions_are_idempotent() {
    let (w, _) = watcher(config(&["BTC"]));
    assert_eq!(w.start().unwrap(), Lifecycle::Running);
    assert_eq!(w.start().unwrap(), Lifecycle::Running);

    assert_eq!(w.pause(), Lifecycle::Paused);
    assert_eq!(w.pause(), Lifecycle::Paused);
    let status = w.status();
    assert!(status.running && status.paused);

    assert_eq!(w.resume(), Lifecycle::Running);
    assert_eq!(w.resume(), Lifecycle::Running);

    assert_eq!(w.stop().await, Lifecycle::Stopped);
    assert_eq!(w.stop().await, Lifecycle::Stopped);
    assert!(!w.status().running);
}

#[tokio::test(start_paused = true)]
async fn loop_fires_once_after_debounce() {
    let (w, sink) = watcher(config(&["BTC"]));
    w.start().unwrap();
    tokio::time::sleep(Duration::from_secs(7)).await;
    w.stop().await;

    assert!(w.ticks_started() >= 3);
    assert_eq!(sink.sent.lock().len(), 1);
    let metrics = w.metrics();
    assert_eq!(metrics.alerts_fired, 1);
    assert!(metrics.cooldown_suppressed >= 1);
    assert!(w.last_snapshot().is_some());

    let recent = w.status().recent_alerts;
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].id, sink.sent.lock()[0].alert.id);
}

#[tokio::test(start_paused = true)]
async fn nothing_is_dispatched_while_paused() {
    let (w, sink) = watcher(config(&["BTC"]));
    w.start().unwrap();
    w.pause();
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert!(sink.sent.lock().is_empty());
    w.stop().await;
}

#[tokio::test(start_paused = true)]
async fn restart_keeps_the_alert_state() {
    let (w, _) = watcher(config(&["BTC"]));
    w.start().unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;
    w.stop().await;
    let keys = w.status().keys;
    assert_eq!(keys.len(), 1);

    w.start().unwrap();
    assert_eq!(w.status().keys, keys);
    w.stop().await;
}

#[tokio::test(start_paused = true)]
async fn configure_prunes_removed_instruments() {
    let (w, _) = watcher(config(&["BTC", "ETH"]));
    w.start().unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(w.status().keys.len(), 2);

    let generation = w.status().config_generation;
    assert_eq!(w.configure(config(&["BTC", "ETH"])).unwrap(), generation);
    assert_eq!(w.configure(config(&["BTC"])).unwrap(), generation + 1);

    let mut bad = config(&["BTC"]);
    bad.instruments.clear();
    assert!(w.configure(bad).is_err());
    assert_eq!(w.config().instruments, vec![Instrument::new("BTC")]);

    tokio::time::sleep(Duration::from_secs(2)).await;
    let keys = w.status().keys;
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0].0.instrument, Instrument::new("BTC"));
    w.stop().await;
}

#[tokio::test(start_paused = true)]
async fn evaluate_now_has_no_side_effects() {
    let (w, sink) = watcher(config(&["BTC"]));
    for _ in 0..5 {
        let report = w.evaluate_now().await.unwrap();
        assert_eq!(report.instruments.len(), 1);
        assert!(report.candidates.is_empty());
    }
    assert!(sink.sent.lock().is_empty());
    assert!(w.status().keys.is_empty());
    assert_eq!(w.metrics().ticks, 0);
}

#[tokio::test(start_paused = true)]
async fn restores_calibrated_parameters_from_the_store() {
    let params = FillModelParameters {
        intercept: 0.4,
        updates: 17,
        ..FillModelParameters::default()
    };
    let store = Arc::new(MemoryStateStore::with_state(PersistedState::new(Vec::new(), params.clone())));
    let (w, _) = watcher_with(config(&["BTC"]), store);
    w.start().unwrap();
    assert_eq!(w.fill_parameters(), params);
    w.stop().await;
}

#[tokio::test(start_paused = true)]
async fn corrupt_state_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    std::fs::write(&path, b"{ not json").unwrap();

    let (w, _) = watcher_with(config(&["BTC"]), Arc::new(JsonFileStore::new(path.clone())));
    w.start().unwrap();
    assert_eq!(w.metrics().schema_fallbacks, 1);
    assert_eq!(w.fill_parameters(), FillModelParameters::default());
    tokio::time::sleep(Duration::from_secs(1)).await;
    w.stop().await;

    let saved = JsonFileStore::new(path).load_state().unwrap().unwrap();
    assert_eq!(saved.watch.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn pause_discards_an_evaluation_under_way() {
    let w = Setup {
        delays: HashMap::from([("ETH".to_string(), Duration::from_secs(1))]),
        ..Setup::default()
    }
    .build(config(&["BTC", "ETH"]));
    w.start().unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(w.pause(), Lifecycle::Paused);
    let keys = w.status().keys;

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(w.status().keys, keys);
    assert!(keys.is_empty());
    assert!(w.last_snapshot().is_none());
    assert_eq!(w.metrics().ticks, 0);

    w.resume();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(w.status().keys.len(), 2);
    w.stop().await;
}

#[tokio::test(start_paused = true)]
async fn stop_aborts_a_stalled_send_after_the_grace_period() {
    let sink = Arc::new(StalledSink::default());
    let w = Setup {
        sink: sink.clone(),
        ..Setup::default()
    }
    .build(config(&["BTC"]));
    w.start().unwrap();
    // Third tick at t=4s releases the candidate; its send never returns.
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(w.ticks_started(), 3);

    let asked = tokio::time::Instant::now();
    assert_eq!(w.stop().await, Lifecycle::Stopped);
    assert!(asked.elapsed() >= WatcherSettings::default().stop_grace);
    assert!(!w.status().running);

    tokio::time::sleep(Duration::from_secs(7_200)).await;
    assert!(sink.sent.lock().is_empty());
    assert_eq!(w.metrics().alerts_fired, 0);
    assert_eq!(w.ticks_started(), 3);
}

#[tokio::test(start_paused = true)]
async fn feedback_is_persisted_by_the_running_loop() {
    let store = Arc::new(MemoryStateStore::default());
    let (w, sink) = watcher_with(config(&["BTC"]), store.clone());
    w.start().unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    let id = sink.sent.lock()[0].alert.id.clone();

    let applied = w.submit_feedback(&id, Leg::Open, FillOutcome::Filled).unwrap();
    assert_eq!(applied.params.updates, 1);
    assert!(w.submit_feedback(&id, Leg::Open, FillOutcome::Filled).is_err());

    tokio::time::sleep(Duration::from_secs(2)).await;
    let saved = store.load_state().unwrap().unwrap();
    assert_eq!(saved.fill_params.updates, 1);
    assert!(saved.watch[0].1.last_alert_ts.is_some());
    assert_eq!(saved.recent_alerts.len(), 1);

    w.stop().await;
    let saves = store.saves();
    w.submit_feedback(&id, Leg::Close, FillOutcome::Missed).unwrap();
    assert_eq!(store.saves(), saves + 1);
    let saved = store.load_state().unwrap().unwrap();
    assert_eq!(saved.fill_params.updates, 2);
    assert!(saved.watch[0].1.last_alert_ts.is_some());
    assert_eq!(w.fill_parameters(), saved.fill_params);
}

#[tokio::test(start_paused = true)]
async fn muted_instruments_stay_quiet_until_unmuted() {
    let store = Arc::new(MemoryStateStore::default());
    let (w, sink) = watcher_with(config(&["BTC"]), store.clone());
    let until = w.mute_for(Instrument::new("BTC"), Duration::from_secs(3_600));
    assert_eq!(w.mutes(), vec![(Instrument::new("BTC"), until)]);
    assert_eq!(w.status().muted.len(), 1);
    assert_eq!(store.load_state().unwrap().unwrap().mutes.len(), 1);

    w.start().unwrap();
    tokio::time::sleep(Duration::from_secs(7)).await;
    assert!(sink.sent.lock().is_empty());
    let report = w.last_snapshot().unwrap();
    assert!(report.instruments.is_empty());
    assert_eq!(report.muted[0].until, until);

    assert!(w.unmute(&Instrument::new("BTC")));
    assert!(!w.unmute(&Instrument::new("BTC")));
    tokio::time::sleep(Duration::from_secs(7)).await;
    assert_eq!(sink.sent.lock().len(), 1);
    w.stop().await;

    assert!(w.mutes().is_empty());
    assert!(store.load_state().unwrap().unwrap().mutes.is_empty());
}

#[tokio::test(start_paused = true)]
async fn mutes_survive_a_restart_from_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let (first, _) = watcher_with(config(&["BTC"]), Arc::new(JsonFileStore::new(path.clone())));
    first.mute_for(Instrument::new("ETH"), Duration::from_secs(600));
    drop(first);

    let (second, _) = watcher_with(config(&["BTC"]), Arc::new(JsonFileStore::new(path)));
    second.start().unwrap();
    assert_eq!(second.mutes().len(), 1);
    assert_eq!(second.mutes()[0].0, Instrument::new("ETH"));
    second.stop().await;
}

#[tokio::test(start_paused = true)]
async fn a_zero_poll_floor_is_raised_to_the_minimum() {
    let mut cfg = config(&["BTC"]);
    cfg.poll_interval_ms = 1;
    let w = Setup {
        settings: WatcherSettings {
            min_poll_interval: Duration::ZERO,
            ..WatcherSettings::default()
        },
        ..Setup::default()
    }
    .build(cfg);
    w.start().unwrap();
    tokio::time::sleep(Duration::from_secs(7)).await;
    w.stop().await;
    assert!(w.ticks_started() <= 4, "{} ticks", w.ticks_started());
}

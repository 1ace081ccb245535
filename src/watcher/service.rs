use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::engine::{evaluate_pass, DispatchGate, EngineDeps, Pass, Published, WatchEngine};
use super::source::MarketDataSource;
use super::EvaluationReport;
use crate::alert::{AlertStateMachine, KeyState, MuteList, RateLimitState, WatchKey};
use crate::clock::Clock;
use crate::config::{WatchConfig, WatcherSettings};
use crate::error::{ConfigError, WatchError};
use crate::events::{AlertDecision, FillOutcome, Leg};
use crate::fill::{CalibrationSummary, FeedbackApplied, FillModel, FillModelParameters};
use crate::metrics::{MetricsSnapshot, WatcherMetrics};
use crate::notify::AlertSink;
use crate::persist::StateStore;
use crate::types::Instrument;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Stopped,
    Running,
    Paused,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WatcherStatus {
    pub lifecycle: Lifecycle,
    pub running: bool,
    pub paused: bool,
    pub last_tick: Option<DateTime<Utc>>,
    pub config_generation: u64,
    pub keys: Vec<(WatchKey, KeyState)>,
    pub rate_limit: RateLimitState,
    pub muted: Vec<(Instrument, DateTime<Utc>)>,
    /// Most recent dispatched alerts, oldest first.
    pub recent_alerts: Vec<AlertDecision>,
}

struct Shared {
    config: RwLock<(Arc<WatchConfig>, u64)>,
    lifecycle: RwLock<Lifecycle>,
    paused: AtomicBool,
    gate: DispatchGate,
    deps: EngineDeps,
    settings: WatcherSettings,
    ticks_started: AtomicU64,
}

impl Shared {
    fn current_config(&self) -> (Arc<WatchConfig>, u64) {
        let guard = self.config.read();
        (guard.0.clone(), guard.1)
    }

    fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.read()
    }

    fn set_lifecycle(&self, to: Lifecycle) {
        *self.lifecycle.write() = to;
    }
}

struct RunningTask {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<WatchEngine>,
}

#[derive(Default)]
struct Control {
    task: Option<RunningTask>,
    /// Engine handed back by the last clean stop.
    parked: Option<WatchEngine>,
    /// Fill parameters and mutes were restored from the store.
    params_loaded: bool,
}

/// Control and inspection surface for the background watch loop.
pub struct Watcher {
    shared: Arc<Shared>,
    control: Mutex<Control>,
}

impl Watcher {
    pub fn new(
        config: WatchConfig,
        settings: WatcherSettings,
        source: Arc<dyn MarketDataSource>,
        sink: Arc<dyn AlertSink>,
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let settings = settings.clamped();
        let deps = EngineDeps {
            source,
            sink,
            store,
            clock,
            fill: Arc::new(FillModel::default()),
            metrics: Arc::new(WatcherMetrics::default()),
            published: Arc::new(RwLock::new(Published::default())),
            mutes: MuteList::default(),
            fetch_timeout: settings.fetch_timeout,
        };
        Self {
            shared: Arc::new(Shared {
                config: RwLock::new((Arc::new(config), 0)),
                lifecycle: RwLock::new(Lifecycle::Stopped),
                paused: AtomicBool::new(false),
                gate: DispatchGate::default(),
                deps,
                settings,
                ticks_started: AtomicU64::new(0),
            }),
            control: Mutex::new(Control::default()),
        }
    }

    pub fn config(&self) -> Arc<WatchConfig> {
        self.shared.current_config().0
    }

    /// Validate and swap in a new config. An invalid config leaves the current
    /// one in place; an identical config changes nothing.
    pub fn configure(&self, config: WatchConfig) -> Result<u64, ConfigError> {
        config.validate()?;
        let mut guard = self.shared.config.write();
        if *guard.0 == config {
            return Ok(guard.1);
        }
        let generation = guard.1 + 1;
        *guard = (Arc::new(config), generation);
        tracing::info!(generation, instruments = guard.0.instruments.len(), "watch config applied");
        Ok(generation)
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.shared.lifecycle()
    }

    /// Spawn the watch loop. Fails only when the current config is invalid.
    pub fn start(&self) -> Result<Lifecycle, ConfigError> {
        let mut control = self.control.lock();
        let current = self.shared.lifecycle();
        if current != Lifecycle::Stopped {
            return Ok(current);
        }
        let (config, _) = self.shared.current_config();
        config.validate()?;

        let engine = match control.parked.take() {
            Some(engine) => engine,
            None => self.build_engine(!control.params_loaded),
        };
        control.params_loaded = true;

        let (stop_tx, stop_rx) = watch::channel(false);
        self.shared.paused.store(false, Ordering::SeqCst);
        self.shared.gate.open();
        self.shared.set_lifecycle(Lifecycle::Running);
        let handle = tokio::spawn(run_loop(engine, self.shared.clone(), stop_rx));
        control.task = Some(RunningTask { stop_tx, handle });
        tracing::info!(instruments = config.instruments.len(), "watcher started");
        Ok(Lifecycle::Running)
    }

    /// Stop the loop. A tick in progress gets the grace period to finish
    /// before the task is aborted. Once this returns no further alert is
    /// dispatched.
    pub async fn stop(&self) -> Lifecycle {
        let task = {
            let mut control = self.control.lock();
            self.shared.gate.close();
            control.task.take()
        };
        let Some(task) = task else {
            return self.shared.lifecycle();
        };

        let _ = task.stop_tx.send(true);
        let mut handle = task.handle;
        let engine = match tokio::time::timeout(self.shared.settings.stop_grace, &mut handle).await {
            Ok(Ok(engine)) => Some(engine),
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "watch loop ended abnormally");
                None
            }
            Err(_) => {
                tracing::warn!(grace = ?self.shared.settings.stop_grace, "watch loop did not stop in time; aborting");
                handle.abort();
                let _ = handle.await;
                None
            }
        };

        let mut control = self.control.lock();
        if let Some(engine) = &engine {
            engine.persist();
        }
        control.parked = engine;
        drop(control);
        self.shared.paused.store(false, Ordering::SeqCst);
        self.shared.set_lifecycle(Lifecycle::Stopped);
        tracing::info!("watcher stopped");
        Lifecycle::Stopped
    }

    /// Suspend evaluation and dispatch. An evaluation under way is discarded
    /// without touching key state; a send already in flight completes and is
    /// recorded.
    pub fn pause(&self) -> Lifecycle {
        let _control = self.control.lock();
        match self.shared.lifecycle() {
            Lifecycle::Running => {
                self.shared.paused.store(true, Ordering::SeqCst);
                self.shared.gate.close();
                self.shared.set_lifecycle(Lifecycle::Paused);
                tracing::info!("watcher paused");
                Lifecycle::Paused
            }
            other => other,
        }
    }

    pub fn resume(&self) -> Lifecycle {
        let _control = self.control.lock();
        match self.shared.lifecycle() {
            Lifecycle::Paused => {
                self.shared.paused.store(false, Ordering::SeqCst);
                self.shared.gate.open();
                self.shared.set_lifecycle(Lifecycle::Running);
                tracing::info!("watcher resumed");
                Lifecycle::Running
            }
            other => other,
        }
    }

    pub fn status(&self) -> WatcherStatus {
        let lifecycle = self.shared.lifecycle();
        let (_, generation) = self.shared.current_config();
        let muted = self.mutes();
        let published = self.shared.deps.published.read();
        WatcherStatus {
            lifecycle,
            running: lifecycle != Lifecycle::Stopped,
            paused: lifecycle == Lifecycle::Paused,
            last_tick: published.last_tick,
            config_generation: generation,
            keys: published.keys.clone(),
            rate_limit: published.rate_limit.clone(),
            muted,
            recent_alerts: published.recent_alerts.clone(),
        }
    }

    /// Latest full evaluation, if any tick has completed its scoring pass.
    pub fn last_snapshot(&self) -> Option<EvaluationReport> {
        self.shared.deps.published.read().last_snapshot.clone()
    }

    /// Score the watch list right now without dispatching or mutating state.
    pub async fn evaluate_now(&self) -> Result<EvaluationReport, ConfigError> {
        let (config, _) = self.shared.current_config();
        config.validate()?;
        let mut preview = AlertStateMachine::from_states(self.shared.deps.published.read().keys.clone());
        let now = self.shared.deps.clock.now();
        let evaluation = evaluate_pass(&self.shared.deps, &config, &mut preview, now, Pass::Preview).await;
        Ok(evaluation.report)
    }

    /// Apply realized fill feedback to the calibrator. The watch loop persists
    /// the new parameters on its next iteration.
    pub fn submit_feedback(&self, trade_id: &str, leg: Leg, outcome: FillOutcome) -> Result<FeedbackApplied, WatchError> {
        self.apply_shared(|| self.shared.deps.fill.submit(trade_id, leg, outcome))
    }

    /// Leave `instrument` out of evaluation until `until`.
    pub fn mute(&self, instrument: Instrument, until: DateTime<Utc>) {
        tracing::info!(%instrument, %until, "instrument muted");
        self.apply_shared(|| self.shared.deps.mutes.mute(instrument, until));
    }

    pub fn mute_for(&self, instrument: Instrument, duration: std::time::Duration) -> DateTime<Utc> {
        let delta = chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero());
        let until = self.shared.deps.clock.now() + delta;
        self.mute(instrument, until);
        until
    }

    /// Returns whether `instrument` was muted.
    pub fn unmute(&self, instrument: &Instrument) -> bool {
        let removed = self.apply_shared(|| self.shared.deps.mutes.unmute(instrument));
        if removed {
            tracing::info!(%instrument, "instrument unmuted");
        }
        removed
    }

    /// Mutes still in force, with their unmute time.
    pub fn mutes(&self) -> Vec<(Instrument, DateTime<Utc>)> {
        self.shared.deps.mutes.active(self.shared.deps.clock.now())
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.deps.metrics.snapshot()
    }

    pub fn fill_parameters(&self) -> FillModelParameters {
        self.shared.deps.fill.params()
    }

    pub fn calibration(&self) -> CalibrationSummary {
        self.shared.deps.fill.summary()
    }

    /// Number of loop iterations that began a tick.
    pub fn ticks_started(&self) -> u64 {
        self.shared.ticks_started.load(Ordering::Relaxed)
    }

    /// Run an operator change to shared state. While the loop runs it
    /// persists the change itself; otherwise the parked engine writes it now,
    /// so the state file keeps a single writer either way.
    fn apply_shared<R>(&self, change: impl FnOnce() -> R) -> R {
        let mut control = self.control.lock();
        if control.task.is_some() {
            return change();
        }
        let engine = match control.parked.take() {
            Some(engine) => engine,
            None => self.build_engine(!control.params_loaded),
        };
        control.params_loaded = true;
        let out = change();
        engine.flush_pending();
        control.parked = Some(engine);
        out
    }

    fn build_engine(&self, restore_shared: bool) -> WatchEngine {
        let deps = &self.shared.deps;
        let (machine, recent) = match deps.store.load_state() {
            Ok(Some(state)) => {
                if restore_shared {
                    deps.fill.restore(state.fill_params);
                    deps.mutes.replace(state.mutes);
                }
                tracing::info!(keys = state.watch.len(), "restored watcher state");
                (AlertStateMachine::from_states(state.watch), state.recent_alerts)
            }
            Ok(None) => (AlertStateMachine::default(), Vec::new()),
            Err(WatchError::Schema(reason)) => {
                deps.metrics.schema_fallback();
                tracing::warn!(%reason, "persisted state unusable; starting from defaults");
                (AlertStateMachine::default(), Vec::new())
            }
            Err(err) => {
                deps.metrics.persist_failed();
                tracing::warn!(error = %err, "unable to load persisted state; starting from defaults");
                (AlertStateMachine::default(), Vec::new())
            }
        };
        WatchEngine::new(deps.clone(), machine).with_recent_alerts(recent)
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        if let Some(task) = self.control.get_mut().task.take() {
            self.shared.gate.close();
            task.handle.abort();
        }
    }
}

/// The tick itself is not raced against the stop signal: stop closes the
/// gate, lets the tick wind down within the grace period and aborts otherwise.
async fn run_loop(mut engine: WatchEngine, shared: Arc<Shared>, mut stop_rx: watch::Receiver<bool>) -> WatchEngine {
    loop {
        if *stop_rx.borrow() {
            break;
        }
        let (config, generation) = shared.current_config();
        if shared.paused.load(Ordering::SeqCst) {
            engine.flush_pending();
        } else {
            engine.apply_config(&config, generation);
            shared.ticks_started.fetch_add(1, Ordering::Relaxed);
            let summary = engine.tick(&config, &shared.gate).await;
            tracing::debug!(?summary, "tick complete");
            engine.flush_pending();
        }
        let interval = config.poll_interval(shared.settings.min_poll_interval);
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = stop_rx.changed() => break,
        }
    }
    tracing::debug!("watch loop exited");
    engine
}

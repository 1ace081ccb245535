use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::source::MarketDataSource;
use super::{EvaluationReport, InstrumentEvaluation, MutedInstrument, SideEvaluation, SkippedInstrument};
use crate::alert::{AlertStateMachine, KeyState, MuteList, RateLimiter, RateLimitState, Transition, WatchKey};
use crate::clock::Clock;
use crate::config::WatchConfig;
use crate::error::WatchError;
use crate::events::{alert_id, AlertDecision, Leg, LegQuote, RecentAlerts, RECENT_ALERTS};
use crate::fill::{FillInputs, FillModel};
use crate::metrics::WatcherMetrics;
use crate::notify::{AlertMessage, AlertSink};
use crate::persist::{PersistedState, StateStore};
use crate::pricing::suggested_limit_prices;
use crate::scoring::{score_snapshot, ScoreReport};
use crate::types::{Instrument, MarketSnapshot};

/// Open while the loop may commit evaluations and dispatch; closed by stop
/// and pause. `close` waits for a commit already in progress, so once it
/// returns no tick can change key state.
#[derive(Clone, Debug, Default)]
pub struct DispatchGate(Arc<RwLock<bool>>);

impl DispatchGate {
    pub fn open(&self) {
        *self.0.write() = true;
    }

    pub fn close(&self) {
        *self.0.write() = false;
    }

    pub fn is_open(&self) -> bool {
        *self.0.read()
    }

    /// Run `f` only if the gate is open, holding it open until `f` returns.
    pub fn while_open<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let open = self.0.read();
        if *open {
            Some(f())
        } else {
            None
        }
    }
}

/// Read-side copy of the engine's state, replaced after every tick.
#[derive(Clone, Debug, Default)]
pub struct Published {
    pub last_snapshot: Option<EvaluationReport>,
    pub last_tick: Option<DateTime<Utc>>,
    pub keys: Vec<(WatchKey, KeyState)>,
    pub rate_limit: RateLimitState,
    pub recent_alerts: Vec<AlertDecision>,
}

/// Collaborators and shared handles the engine works against.
#[derive(Clone)]
pub struct EngineDeps {
    pub source: Arc<dyn MarketDataSource>,
    pub sink: Arc<dyn AlertSink>,
    pub store: Arc<dyn StateStore>,
    pub clock: Arc<dyn Clock>,
    pub fill: Arc<FillModel>,
    pub metrics: Arc<WatcherMetrics>,
    pub published: Arc<RwLock<Published>>,
    pub mutes: MuteList,
    pub fetch_timeout: Duration,
}

/// A candidate that cleared the state machine and awaits the rate limiter.
#[derive(Clone, Debug)]
pub(crate) struct Candidate {
    key: WatchKey,
    decision: AlertDecision,
    open_inputs: FillInputs,
    close_inputs: FillInputs,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub evaluated: usize,
    pub skipped: usize,
    pub muted: usize,
    pub candidates: usize,
    pub sent: usize,
    pub dropped: usize,
    /// The gate closed before the evaluation was committed; nothing changed.
    pub abandoned: bool,
}

/// Whether an evaluation pass may touch shared learning state. A live pass
/// stops as soon as its gate closes.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Pass<'a> {
    Live(&'a DispatchGate),
    Preview,
}

impl Pass<'_> {
    fn is_live(&self) -> bool {
        matches!(self, Pass::Live(_))
    }

    fn interrupted(&self) -> bool {
        match self {
            Pass::Live(gate) => !gate.is_open(),
            Pass::Preview => false,
        }
    }
}

pub(crate) struct Evaluation {
    pub(crate) report: EvaluationReport,
    pub(crate) candidates: Vec<Candidate>,
    pub(crate) interrupted: bool,
}

/// Fetch every watched instrument, score it and step `machine` for each
/// configured side. Muted instruments are left out. Failures are recorded per
/// instrument and never abort the pass.
pub(crate) async fn evaluate_pass(
    deps: &EngineDeps,
    cfg: &WatchConfig,
    machine: &mut AlertStateMachine,
    now: DateTime<Utc>,
    pass: Pass<'_>,
) -> Evaluation {
    let thresholds = cfg.thresholds();
    let mut report = EvaluationReport {
        ts: now,
        instruments: Vec::new(),
        skipped: Vec::new(),
        muted: Vec::new(),
        candidates: Vec::new(),
    };
    let mut candidates = Vec::new();

    for instrument in &cfg.instruments {
        if pass.interrupted() {
            return Evaluation {
                report,
                candidates,
                interrupted: true,
            };
        }
        if let Some(until) = deps.mutes.muted_until(instrument, now) {
            tracing::debug!(%instrument, %until, "instrument muted; skipping");
            report.muted.push(MutedInstrument {
                instrument: instrument.clone(),
                until,
            });
            continue;
        }
        let snap = match fetch(deps, instrument).await {
            Ok(snap) => snap,
            Err(err) => {
                if pass.is_live() {
                    deps.metrics.data_unavailable();
                }
                tracing::warn!(%instrument, error = %err, "snapshot unavailable; skipping");
                report.skipped.push(SkippedInstrument::new(instrument, &err));
                continue;
            }
        };
        if pass.is_live() {
            deps.fill.record_mid(&snap);
        }
        let scored = match score_snapshot(&snap, cfg.funding_kind, &cfg.scoring) {
            Ok(scored) => scored,
            Err(err) => {
                if pass.is_live() {
                    deps.metrics.evaluation_error();
                }
                tracing::warn!(%instrument, error = %err, "evaluation failed; skipping");
                report.skipped.push(SkippedInstrument::new(instrument, &err));
                continue;
            }
        };

        let mut sides = Vec::new();
        for side in cfg.side.sides() {
            let key = WatchKey::new(instrument.clone(), *side);
            let transition = machine.observe(&key, scored.score, now, &thresholds);
            tracing::debug!(key = %key, score = scored.score, ?transition, "observed");
            if transition == Transition::Candidate {
                let candidate = build_candidate(deps, cfg, &key, &snap, &scored, now);
                report.candidates.push(candidate.decision.clone());
                candidates.push(candidate);
            }
            sides.push(SideEvaluation {
                side: *side,
                transition,
                state: machine.get(&key).cloned().unwrap_or_default(),
            });
        }

        report.instruments.push(InstrumentEvaluation {
            volatility: deps.fill.volatility(instrument),
            snapshot: snap,
            report: scored,
            sides,
        });
    }
    Evaluation {
        report,
        candidates,
        interrupted: pass.interrupted(),
    }
}

async fn fetch(deps: &EngineDeps, instrument: &Instrument) -> Result<MarketSnapshot, WatchError> {
    let unavailable = |reason: String| WatchError::DataUnavailable {
        instrument: instrument.clone(),
        reason,
    };
    match tokio::time::timeout(deps.fetch_timeout, deps.source.fetch_snapshot(instrument)).await {
        Ok(Ok(snap)) if snap.instrument == *instrument => Ok(snap),
        Ok(Ok(snap)) => Err(unavailable(format!("source answered for {}", snap.instrument))),
        Ok(Err(err)) => Err(unavailable(format!("{err:#}"))),
        Err(_) => Err(unavailable(format!("timed out after {:?}", deps.fetch_timeout))),
    }
}

fn build_candidate(
    deps: &EngineDeps,
    cfg: &WatchConfig,
    key: &WatchKey,
    snap: &MarketSnapshot,
    scored: &ScoreReport,
    now: DateTime<Utc>,
) -> Candidate {
    let spread_bps = scored.metrics.spread_bps;
    let (open_px, close_px) = suggested_limit_prices(
        key.side,
        snap.best_bid,
        snap.best_ask,
        cfg.open_offset_bps,
        cfg.close_offset_bps,
    );
    let open_inputs = deps
        .fill
        .inputs_for(snap, spread_bps, cfg.open_offset_bps, cfg.order_notional);
    let close_inputs = deps
        .fill
        .inputs_for(snap, spread_bps, cfg.close_offset_bps, cfg.order_notional);
    let decision = AlertDecision {
        id: alert_id(&key.instrument, key.side, now),
        instrument: key.instrument.clone(),
        side: key.side,
        score: scored.score,
        reasons: scored.reasons.clone(),
        open: LegQuote {
            limit_price: open_px,
            fill_probability: deps.fill.probability(&open_inputs, cfg.fill_prob_override),
        },
        close: LegQuote {
            limit_price: close_px,
            fill_probability: deps.fill.probability(&close_inputs, cfg.fill_prob_override),
        },
        ts: now,
    };
    Candidate {
        key: key.clone(),
        decision,
        open_inputs,
        close_inputs,
    }
}

/// Single-writer owner of the alert state, rate-limit bookkeeping and the
/// persisted state file.
pub struct WatchEngine {
    deps: EngineDeps,
    machine: AlertStateMachine,
    limiter: RateLimiter,
    recent: RecentAlerts,
    applied_generation: Option<u64>,
}

impl WatchEngine {
    pub fn new(deps: EngineDeps, machine: AlertStateMachine) -> Self {
        let engine = Self {
            deps,
            machine,
            limiter: RateLimiter::default(),
            recent: RecentAlerts::new(RECENT_ALERTS),
            applied_generation: None,
        };
        engine.publish(None);
        engine
    }

    pub fn with_recent_alerts(mut self, alerts: Vec<AlertDecision>) -> Self {
        self.recent = RecentAlerts::from_alerts(alerts, RECENT_ALERTS);
        self.publish(None);
        self
    }

    pub fn machine(&self) -> &AlertStateMachine {
        &self.machine
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn recent_alerts(&self) -> Vec<AlertDecision> {
        self.recent.to_vec()
    }

    /// Prune keys the config no longer watches. Cheap when `generation` was
    /// already applied.
    pub fn apply_config(&mut self, cfg: &WatchConfig, generation: u64) {
        if self.applied_generation == Some(generation) {
            return;
        }
        self.applied_generation = Some(generation);
        let pruned = self.machine.prune(|k| cfg.watches(k));
        self.limiter.retain_keys(|k| cfg.watches(k));
        self.deps
            .fill
            .retain_instruments(|i| cfg.instruments.contains(i));
        if pruned > 0 {
            tracing::info!(pruned, generation, "dropped state for unwatched keys");
            self.publish(None);
            self.persist();
        } else {
            self.publish(None);
        }
    }

    /// One evaluation and dispatch round. The evaluation runs on a copy of
    /// the key state and is committed only while `gate` is open; a gate
    /// closed mid-tick leaves key state and the state file untouched.
    pub async fn tick(&mut self, cfg: &WatchConfig, gate: &DispatchGate) -> TickSummary {
        let started = Instant::now();
        let now = self.deps.clock.now();
        let mut working = self.machine.clone();
        let Evaluation {
            report,
            candidates,
            interrupted,
        } = evaluate_pass(&self.deps, cfg, &mut working, now, Pass::Live(gate)).await;

        let mut summary = TickSummary {
            evaluated: report.instruments.len(),
            skipped: report.skipped.len(),
            muted: report.muted.len(),
            candidates: candidates.len(),
            ..TickSummary::default()
        };
        if interrupted {
            return self.abandon(summary);
        }

        let committed = gate.while_open(|| {
            self.machine = working;
            for eval in &report.instruments {
                for side in &eval.sides {
                    if let Transition::CooldownSuppressed { .. } = side.transition {
                        self.deps.metrics.cooldown_suppressed();
                        self.limiter.charge_suppressed(now, &cfg.rate_limit);
                    }
                }
            }
            let expired = self.deps.mutes.purge_expired(now);
            if expired > 0 {
                tracing::info!(expired, "expired mutes cleared");
            }
            self.publish(Some(report));
            self.persist();
        });
        if committed.is_none() {
            return self.abandon(summary);
        }

        let mut remaining = candidates.len();
        self.deps.metrics.set_queue_depth(remaining);
        for candidate in candidates {
            if !gate.is_open() {
                tracing::debug!(key = %candidate.key, "dispatch gate closed; abandoning candidate");
                break;
            }
            if self.dispatch(candidate, cfg, now).await {
                summary.sent += 1;
            } else {
                summary.dropped += 1;
            }
            remaining -= 1;
            self.deps.metrics.set_queue_depth(remaining);
        }
        self.deps.metrics.set_queue_depth(0);

        if summary.sent > 0 {
            self.publish(None);
            self.persist();
        }
        self.deps.metrics.tick_completed(started.elapsed());
        summary
    }

    fn abandon(&self, mut summary: TickSummary) -> TickSummary {
        tracing::debug!("dispatch gate closed mid-evaluation; tick abandoned");
        summary.abandoned = true;
        summary.candidates = 0;
        summary
    }

    async fn dispatch(&mut self, candidate: Candidate, cfg: &WatchConfig, now: DateTime<Utc>) -> bool {
        if let Err(reason) = self.limiter.check(now, &cfg.rate_limit) {
            self.deps.metrics.alert_dropped(reason);
            tracing::info!(key = %candidate.key, %reason, "alert dropped by rate limiter");
            return false;
        }
        let message = AlertMessage::new(candidate.decision);
        match self.deps.sink.send(&message).await {
            Ok(()) => {
                self.limiter.record_send(&candidate.key, now);
                self.machine.record_fire(&candidate.key, now);
                self.deps.metrics.alert_fired();
                let id = &message.alert.id;
                self.deps.fill.register(id, Leg::Open, &candidate.open_inputs);
                self.deps.fill.register(id, Leg::Close, &candidate.close_inputs);
                tracing::info!(key = %candidate.key, id = %id, score = message.alert.score, "alert dispatched");
                self.recent.push(message.alert);
                true
            }
            Err(err) => {
                self.deps.metrics.transport_failed();
                tracing::warn!(key = %candidate.key, error = %format!("{err:#}"), "alert transport failed");
                false
            }
        }
    }

    pub fn persisted_state(&self) -> PersistedState {
        PersistedState::new(self.machine.snapshot(), self.deps.fill.params())
            .with_mutes(self.deps.mutes.entries())
            .with_recent_alerts(self.recent.to_vec())
    }

    /// Save feedback or mute changes made outside a tick. Returns whether
    /// anything was written.
    pub fn flush_pending(&self) -> bool {
        let fill = self.deps.fill.take_dirty();
        let mutes = self.deps.mutes.take_changed();
        if !(fill || mutes) {
            return false;
        }
        self.publish(None);
        self.persist();
        true
    }

    pub(crate) fn persist(&self) {
        self.deps.fill.take_dirty();
        self.deps.mutes.take_changed();
        if let Err(err) = self.deps.store.save_state(&self.persisted_state()) {
            self.deps.metrics.persist_failed();
            tracing::warn!(error = %err, "unable to persist watcher state");
        }
    }

    fn publish(&self, report: Option<EvaluationReport>) {
        let mut published = self.deps.published.write();
        if let Some(report) = report {
            published.last_tick = Some(report.ts);
            published.last_snapshot = Some(report);
        }
        published.keys = self.machine.snapshot();
        published.rate_limit = self.limiter.state();
        published.recent_alerts = self.recent.to_vec();
    }
}

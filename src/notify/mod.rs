//! Outbound alert delivery. Sinks are best effort: a failure is reported to
//! the caller, which counts it as a drop; nothing is retried here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;

use crate::events::AlertDecision;

pub mod webhook;

pub use webhook::WebhookSink;

/// A dispatched alert: the decision plus its human-readable rendering.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertMessage {
    pub text: String,
    pub alert: AlertDecision,
}

impl AlertMessage {
    pub fn new(alert: AlertDecision) -> Self {
        Self {
            text: format_alert(&alert),
            alert,
        }
    }
}

pub fn format_alert(alert: &AlertDecision) -> String {
    let mut text = format!(
        "SAFE ENTRY {} {} score {:.1} | open {:.6} (p={:.2}) | close {:.6} (p={:.2})",
        alert.instrument,
        alert.side,
        alert.score,
        alert.open.limit_price,
        alert.open.fill_probability,
        alert.close.limit_price,
        alert.close.fill_probability,
    );
    if !alert.reasons.is_empty() {
        text.push_str(" | watch:");
        for (i, reason) in alert.reasons.iter().enumerate() {
            let sep = if i == 0 { " " } else { "; " };
            let _ = write!(text, "{sep}{reason}");
        }
    }
    text
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, message: &AlertMessage) -> anyhow::Result<()>;
}

/// Discards every alert.
#[derive(Clone, Debug, Default)]
pub struct NoopSink;

#[async_trait]
impl AlertSink for NoopSink {
    async fn send(&self, _message: &AlertMessage) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Emits alerts as structured `tracing` events.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    async fn send(&self, message: &AlertMessage) -> anyhow::Result<()> {
        let alert = &message.alert;
        tracing::info!(
            target: "safe_entry::alert",
            id = %alert.id,
            instrument = %alert.instrument,
            side = %alert.side,
            score = alert.score,
            open_px = alert.open.limit_price,
            close_px = alert.close.limit_price,
            "{}",
            message.text
        );
        Ok(())
    }
}

/// Fan-out to several sinks. Every sink is attempted; the call fails if any did.
pub struct CompositeSink {
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl CompositeSink {
    pub fn new(sinks: Vec<Arc<dyn AlertSink>>) -> Self {
        Self { sinks }
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl AlertSink for CompositeSink {
    async fn send(&self, message: &AlertMessage) -> anyhow::Result<()> {
        let mut failures = Vec::new();
        for sink in &self.sinks {
            if let Err(err) = sink.send(message).await {
                failures.push(format!("{err:#}"));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            anyhow::bail!(
                "{} of {} sinks failed: {}",
                failures.len(),
                self.sinks.len(),
                failures.join("; ")
            )
        }
    }
}

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use super::{AlertMessage, AlertSink};

/// POSTs each alert as JSON (`{"text": ..., "alert": {...}}`) to a webhook.
#[derive(Clone, Debug)]
pub struct WebhookSink {
    url: String,
    http: Client,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("build webhook http client")?;
        Ok(Self { url: url.into(), http })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

pub fn webhook_payload(message: &AlertMessage) -> Value {
    json!({
        "text": message.text,
        "alert": message.alert,
    })
}

#[async_trait]
impl AlertSink for WebhookSink {
    async fn send(&self, message: &AlertMessage) -> anyhow::Result<()> {
        let res = self
            .http
            .post(&self.url)
            .json(&webhook_payload(message))
            .send()
            .await
            .with_context(|| format!("webhook post to {}", self.url))?;
        if !res.status().is_success() {
            anyhow::bail!("webhook rejected alert {}: {}", message.alert.id, res.status());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{AlertDecision, LegQuote};
    use crate::types::{Instrument, WatchSide};
    use chrono::Utc;

    fn message() -> AlertMessage {
        AlertMessage::new(AlertDecision {
            id: "deadbeef".into(),
            instrument: Instrument::new("ETH"),
            side: WatchSide::Short,
            score: 91.0,
            reasons: Vec::new(),
            open: LegQuote {
                limit_price: 2_000.5,
                fill_probability: 0.7,
            },
            close: LegQuote {
                limit_price: 1_999.5,
                fill_probability: 0.6,
            },
            ts: Utc::now(),
        })
    }

    #[test]
    fn payload_carries_text_and_alert() {
        let payload = webhook_payload(&message());
        assert!(payload["text"].as_str().unwrap().starts_with("SAFE ENTRY ETH short"));
        assert_eq!(payload["alert"]["id"], "deadbeef");
        assert_eq!(payload["alert"]["side"], "short");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_an_error() {
        let sink = WebhookSink::new("http://127.0.0.1:9/alerts", Duration::from_millis(500)).unwrap();
        assert_eq!(sink.url(), "http://127.0.0.1:9/alerts");
        assert!(sink.send(&message()).await.is_err());
    }
}

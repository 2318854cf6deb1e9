//! InfluxDB v2 sink (line protocol over HTTP)

use super::{ExportItem, ExportSink};
use crate::config::{InfluxSinkConfig, RelayState};
use crate::controller::Decision;
use crate::error::{MeterlinkError, Result};
use crate::snapshot::Snapshot;
use chrono::{DateTime, Utc};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use std::time::Duration;
use tracing::debug;

/// Posts every item as line protocol to `/api/v2/write`
pub struct InfluxSink {
    client: reqwest::Client,
    write_url: reqwest::Url,
    token: String,
}

impl InfluxSink {
    pub fn new(config: InfluxSinkConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms.max(1)))
            .build()?;
        let base = config.url.trim_end_matches('/');
        let write_url = reqwest::Url::parse_with_params(
            &format!("{}/api/v2/write", base),
            &[
                ("org", config.org.as_str()),
                ("bucket", config.bucket.as_str()),
                ("precision", "ns"),
            ],
        )
        .map_err(|e| MeterlinkError::config(format!("Invalid influx url {}: {}", config.url, e)))?;

        Ok(Self {
            client,
            write_url,
            token: config.token,
        })
    }
}

/// Escape a tag value (commas, spaces, equal signs)
fn escape_tag(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, ',' | ' ' | '=') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn nanos(at: DateTime<Utc>) -> i64 {
    at.timestamp_nanos_opt().unwrap_or(at.timestamp() * 1_000_000_000)
}

/// `electricity` point, plus a `gas` point when the telegram carried a reading
pub fn snapshot_lines(snapshot: &Snapshot) -> Vec<String> {
    let meter = escape_tag(&snapshot.meter_id);
    let mut lines = Vec::with_capacity(2);

    let fields: Vec<String> = snapshot
        .measurements()
        .into_iter()
        .filter(|(name, _)| !name.contains("gas"))
        .filter_map(|(name, value)| value.map(|v| format!("{}={}", name, v)))
        .collect();
    lines.push(format!(
        "electricity,meter={} {} {}",
        meter,
        fields.join(","),
        nanos(snapshot.measured_at())
    ));

    if let Some(gas) = &snapshot.gas
        && let (Some(volume), Some(ts)) = (gas.volume_m3, gas.timestamp)
    {
        lines.push(format!(
            "gas,meter={} total_gas_consumption={} {}",
            meter,
            volume,
            nanos(ts.utc)
        ));
    }
    lines
}

/// `relay` point of one decision
pub fn decision_line(decision: &Decision) -> String {
    let state = match decision.target {
        RelayState::On => 1,
        RelayState::Off => 0,
    };
    let mut fields = vec![
        format!("state={}i", state),
        format!("reason=\"{}\"", decision.reason),
    ];
    if let Some(avg) = decision.average_surplus_kw {
        fields.push(format!("average_surplus_kw={}", avg));
    }
    format!(
        "relay,load={} {} {}",
        escape_tag(&decision.load),
        fields.join(","),
        nanos(decision.at)
    )
}

#[async_trait::async_trait]
impl ExportSink for InfluxSink {
    fn name(&self) -> &str {
        "influx"
    }

    async fn export(&mut self, item: &ExportItem) -> Result<()> {
        let body = match item {
            ExportItem::Snapshot(s) => snapshot_lines(s).join("\n"),
            ExportItem::Decision(d) => decision_line(d),
        };
        debug!("Influx write: {}", body);

        let resp = self
            .client
            .post(self.write_url.clone())
            .header(AUTHORIZATION, format!("Token {}", self.token.trim()))
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(MeterlinkError::export(
                "influx".to_string(),
                format!("write rejected: {}", resp.status()),
            ));
        }
        Ok(())
    }
}

//! Metrics port and its sinks.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

pub const INCORRECT_ACCOUNT_NUMBER: &str = "incorrect_account_number";
pub const PAYMENTS_COUNT: &str = "payments_count";
pub const PAYMENTS_AMOUNT: &str = "payments_amount";
pub const MISSING_FUNDING: &str = "missing_funding";
pub const PAYMENT_PROCESSING_DURATION: &str = "payment_processing_duration";
pub const PROCESSING_DISABLED: &str = "processing_disabled";
pub const MESSAGES_PROCESSED: &str = "messages_processed";
pub const MESSAGES_DEAD_LETTERED: &str = "messages_dead_lettered";

pub type Tags<'a> = &'a [(&'static str, &'a str)];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpCallMetric {
    pub operation: &'static str,
    pub latency: Duration,
    /// `status / 100`, or 0 when no response was received.
    pub status_class: u16,
    pub connection_reused: bool,
}

pub trait Metrics: Send + Sync {
    fn increment(&self, name: &'static str, tags: Tags<'_>);

    fn record_amount(&self, name: &'static str, amount: f64, tags: Tags<'_>);

    fn record_duration(&self, name: &'static str, duration: Duration, tags: Tags<'_>);

    fn record_http_call(&self, call: &HttpCallMetric);
}

fn render_tags(tags: Tags<'_>) -> String {
    tags.iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Emits every measurement as a `tracing` event on the `metrics` target, for collection
/// by the log pipeline.
#[derive(Debug, Clone, Default)]
pub struct TracingMetrics;

impl Metrics for TracingMetrics {
    fn increment(&self, name: &'static str, tags: Tags<'_>) {
        tracing::info!(target: "metrics", metric = name, kind = "counter", tags = %render_tags(tags), value = 1);
    }

    fn record_amount(&self, name: &'static str, amount: f64, tags: Tags<'_>) {
        tracing::info!(target: "metrics", metric = name, kind = "amount", tags = %render_tags(tags), value = amount);
    }

    fn record_duration(&self, name: &'static str, duration: Duration, tags: Tags<'_>) {
        tracing::info!(
            target: "metrics",
            metric = name,
            kind = "duration",
            tags = %render_tags(tags),
            value_ms = duration.as_millis() as u64
        );
    }

    fn record_http_call(&self, call: &HttpCallMetric) {
        tracing::info!(
            target: "metrics",
            metric = "provider_http_call",
            operation = call.operation,
            status_class = call.status_class,
            connection_reused = call.connection_reused,
            latency_ms = call.latency.as_millis() as u64
        );
    }
}

/// In-memory sink used by tests to assert on recorded measurements.
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    counters: Mutex<HashMap<String, u64>>,
    amounts: Mutex<Vec<(String, f64)>>,
    durations: Mutex<Vec<(String, Duration)>>,
    http_calls: Mutex<Vec<HttpCallMetric>>,
}

impl RecordingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(name: &str, tags: Tags<'_>) -> String {
        if tags.is_empty() {
            name.to_string()
        } else {
            format!("{name}{{{}}}", render_tags(tags))
        }
    }

    /// Counter value for an exact name and tag set.
    pub fn counter(&self, name: &str, tags: Tags<'_>) -> u64 {
        let key = Self::key(name, tags);
        self.counters
            .lock()
            .map(|counters| counters.get(&key).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Counter value summed over every tag set.
    pub fn total(&self, name: &str) -> u64 {
        self.counters
            .lock()
            .map(|counters| {
                counters
                    .iter()
                    .filter(|(key, _)| *key == name || key.starts_with(&format!("{name}{{")))
                    .map(|(_, value)| *value)
                    .sum()
            })
            .unwrap_or(0)
    }

    pub fn amounts(&self, name: &str) -> Vec<f64> {
        self.amounts
            .lock()
            .map(|amounts| {
                amounts
                    .iter()
                    .filter(|(key, _)| key.starts_with(name))
                    .map(|(_, value)| *value)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn durations(&self, name: &str) -> usize {
        self.durations
            .lock()
            .map(|durations| durations.iter().filter(|(key, _)| key.starts_with(name)).count())
            .unwrap_or(0)
    }

    pub fn http_calls(&self) -> Vec<HttpCallMetric> {
        self.http_calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }
}

impl Metrics for RecordingMetrics {
    fn increment(&self, name: &'static str, tags: Tags<'_>) {
        if let Ok(mut counters) = self.counters.lock() {
            *counters.entry(Self::key(name, tags)).or_insert(0) += 1;
        }
    }

    fn record_amount(&self, name: &'static str, amount: f64, tags: Tags<'_>) {
        if let Ok(mut amounts) = self.amounts.lock() {
            amounts.push((Self::key(name, tags), amount));
        }
    }

    fn record_duration(&self, name: &'static str, duration: Duration, tags: Tags<'_>) {
        if let Ok(mut durations) = self.durations.lock() {
            durations.push((Self::key(name, tags), duration));
        }
    }

    fn record_http_call(&self, call: &HttpCallMetric) {
        if let Ok(mut calls) = self.http_calls.lock() {
            calls.push(call.clone());
        }
    }
}

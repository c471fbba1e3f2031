//! Per-source fetch metrics
//!
//! Every adapter request is counted here. Rate-limit and auth rejections are
//! split out so a run summary shows whether a provider is pushing back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::error::SyncError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceMetrics {
    pub source_name: String,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub format_errors: u64,
    pub rate_limit_hits: u64,
    pub auth_failures: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub average_response_time_ms: f64,
    pub total_response_time_ms: u64,
}

impl SourceMetrics {
    pub fn new(source_name: String) -> Self {
        Self {
            source_name,
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            format_errors: 0,
            rate_limit_hits: 0,
            auth_failures: 0,
            last_success: None,
            last_failure: None,
            last_error: None,
            average_response_time_ms: 0.0,
            total_response_time_ms: 0,
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            (self.successful_requests as f64 / self.total_requests as f64) * 100.0
        }
    }

    pub fn record_success(&mut self, response_time: Duration) {
        self.total_requests += 1;
        self.successful_requests += 1;
        self.last_success = Some(Utc::now());

        let response_ms = response_time.as_millis() as u64;
        self.total_response_time_ms += response_ms;
        self.average_response_time_ms =
            self.total_response_time_ms as f64 / self.successful_requests as f64;
    }

    pub fn record_failure(&mut self, error: &SyncError, status: Option<u16>) {
        self.total_requests += 1;
        self.failed_requests += 1;
        self.last_failure = Some(Utc::now());
        self.last_error = Some(error.to_string());

        match status {
            Some(429) => self.rate_limit_hits += 1,
            Some(401) | Some(403) => self.auth_failures += 1,
            _ => {}
        }
        if matches!(error, SyncError::SourceFormat { .. }) {
            self.format_errors += 1;
        }
    }
}

/// Shared tracker, one entry per source name
#[derive(Default)]
pub struct MetricsTracker {
    metrics: Mutex<HashMap<String, SourceMetrics>>,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SourceMetrics>> {
        // counters stay usable even if a holder panicked
        self.metrics.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record_success(&self, source_name: &str, response_time: Duration) {
        let mut metrics = self.lock();
        let source_metrics = metrics
            .entry(source_name.to_string())
            .or_insert_with(|| SourceMetrics::new(source_name.to_string()));
        source_metrics.record_success(response_time);

        log::debug!(
            "[{}] ok in {}ms - success rate {:.2}%",
            source_name,
            response_time.as_millis(),
            source_metrics.success_rate()
        );
    }

    pub fn record_failure(&self, source_name: &str, error: &SyncError, status: Option<u16>) {
        let mut metrics = self.lock();
        let source_metrics = metrics
            .entry(source_name.to_string())
            .or_insert_with(|| SourceMetrics::new(source_name.to_string()));
        source_metrics.record_failure(error, status);

        log::warn!(
            "[{}] request failed: {} - success rate {:.2}%",
            source_name,
            error,
            source_metrics.success_rate()
        );
    }

    pub fn get_metrics(&self, source_name: &str) -> Option<SourceMetrics> {
        self.lock().get(source_name).cloned()
    }

    pub fn get_all_metrics(&self) -> Vec<SourceMetrics> {
        let mut all: Vec<SourceMetrics> = self.lock().values().cloned().collect();
        all.sort_by(|a, b| a.source_name.cmp(&b.source_name));
        all
    }

    pub fn log_summary(&self) {
        for m in self.get_all_metrics() {
            log::info!(
                "[{}] requests={} ok={} failed={} format_errors={} rate_limited={} auth_failures={} avg={:.0}ms success={:.2}%",
                m.source_name,
                m.total_requests,
                m.successful_requests,
                m.failed_requests,
                m.format_errors,
                m.rate_limit_hits,
                m.auth_failures,
                m.average_response_time_ms,
                m.success_rate()
            );
            if let Some(last_error) = &m.last_error {
                log::info!("[{}] last error: {}", m.source_name, last_error);
            }
        }
    }
}

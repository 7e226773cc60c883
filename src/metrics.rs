//! Metrics sink (C1)
//!
//! Thread-safe counters and gauges with label tuples, exported as
//! `text/plain; version=0.0.4` for scraping. Append-only at runtime: labels
//! are created lazily on first observation and never removed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use dashmap::DashMap;

/// Process-wide metrics registry for bioproxy.
pub struct Metrics {
    start: Instant,
    requests_total: DashMap<(String, String), AtomicU64>,
    warmup_checks_total: AtomicU64,
    warmup_executions_total: DashMap<String, AtomicU64>,
    warmup_errors_total: DashMap<(String, String), AtomicU64>,
    warmup_duration_seconds_total: DashMap<String, AtomicU64>,
    warmup_duration_seconds_count: DashMap<String, AtomicU64>,
    warmup_cancellations_total: DashMap<String, AtomicU64>,
    kv_cache_saves_total: DashMap<String, AtomicU64>,
    kv_cache_restores_total: DashMap<(String, String), AtomicU64>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create an empty registry, with the uptime clock starting now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            requests_total: DashMap::new(),
            warmup_checks_total: AtomicU64::new(0),
            warmup_executions_total: DashMap::new(),
            warmup_errors_total: DashMap::new(),
            warmup_duration_seconds_total: DashMap::new(),
            warmup_duration_seconds_count: DashMap::new(),
            warmup_cancellations_total: DashMap::new(),
            kv_cache_saves_total: DashMap::new(),
            kv_cache_restores_total: DashMap::new(),
        }
    }

    /// Seconds since the registry (and therefore the process) started.
    #[must_use]
    pub fn uptime_seconds(&self) -> u64 {
        self.start.elapsed().as_secs()
    }

    /// Record one completed chat-completion request.
    pub fn record_request(&self, endpoint: &str, status: u16) {
        bump(&self.requests_total, (endpoint.to_string(), status.to_string()));
    }

    /// Record that a warmup-scheduler tick ran.
    pub fn record_warmup_check(&self) {
        self.warmup_checks_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful warmup execution for `prefix`.
    pub fn record_warmup_execution(&self, prefix: &str) {
        bump(&self.warmup_executions_total, prefix.to_string());
    }

    /// Record a warmup failure of `kind` for `prefix` (e.g.
    /// `template_error`, `completion_failed`, `save_failed`).
    pub fn record_warmup_error(&self, prefix: &str, kind: &str) {
        bump(&self.warmup_errors_total, (prefix.to_string(), kind.to_string()));
    }

    /// Record the wall-clock duration of a warmup attempt for `prefix`.
    ///
    /// Accumulated internally as whole nanoseconds (a plain integer counter,
    /// safe to `fetch_add`) and converted back to seconds only when
    /// rendered.
    pub fn record_warmup_duration(&self, prefix: &str, seconds: f64) {
        let nanos = (seconds * 1_000_000_000.0).round() as u64;
        self.warmup_duration_seconds_total
            .entry(prefix.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(nanos, Ordering::Relaxed);
        bump(&self.warmup_duration_seconds_count, prefix.to_string());
    }

    /// Record that an in-flight warmup for `prefix` was cancelled by a
    /// pre-empting user request.
    pub fn record_warmup_cancellation(&self, prefix: &str) {
        bump(&self.warmup_cancellations_total, prefix.to_string());
    }

    /// Record a KV-cache save for `prefix`.
    pub fn record_kv_cache_save(&self, prefix: &str) {
        bump(&self.kv_cache_saves_total, prefix.to_string());
    }

    /// Record a KV-cache restore outcome (`success`, `not_found`, `error`)
    /// for `prefix`.
    pub fn record_kv_cache_restore(&self, prefix: &str, status: &str) {
        bump(
            &self.kv_cache_restores_total,
            (prefix.to_string(), status.to_string()),
        );
    }

    /// Render the registry as a Prometheus text-format exposition.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();

        let mut total = 0u64;
        out.push_str("# TYPE bioproxy_requests_total counter\n");
        for entry in &self.requests_total {
            let ((endpoint, status), count) = (entry.key().clone(), entry.value().load(Ordering::Relaxed));
            total += count;
            out.push_str(&format!(
                "bioproxy_requests_total{{endpoint=\"{endpoint}\",status=\"{status}\"}} {count}\n"
            ));
        }
        out.push_str("# TYPE bioproxy_requests_count counter\n");
        out.push_str(&format!("bioproxy_requests_count {total}\n"));

        out.push_str("# TYPE bioproxy_uptime_seconds gauge\n");
        out.push_str(&format!("bioproxy_uptime_seconds {}\n", self.uptime_seconds()));

        out.push_str("# TYPE bioproxy_warmup_checks_total counter\n");
        out.push_str(&format!(
            "bioproxy_warmup_checks_total {}\n",
            self.warmup_checks_total.load(Ordering::Relaxed)
        ));

        render_by_prefix(
            &mut out,
            "bioproxy_warmup_executions_total",
            &self.warmup_executions_total,
        );

        out.push_str("# TYPE bioproxy_warmup_errors_total counter\n");
        for entry in &self.warmup_errors_total {
            let ((prefix, kind), count) = (entry.key().clone(), entry.value().load(Ordering::Relaxed));
            out.push_str(&format!(
                "bioproxy_warmup_errors_total{{prefix=\"{prefix}\",type=\"{kind}\"}} {count}\n"
            ));
        }

        out.push_str("# TYPE bioproxy_warmup_duration_seconds_total counter\n");
        for entry in &self.warmup_duration_seconds_total {
            let prefix = entry.key().clone();
            let nanos = entry.value().load(Ordering::Relaxed);
            let seconds = nanos as f64 / 1_000_000_000.0;
            out.push_str(&format!(
                "bioproxy_warmup_duration_seconds_total{{prefix=\"{prefix}\"}} {seconds}\n"
            ));
        }
        render_by_prefix(
            &mut out,
            "bioproxy_warmup_duration_seconds_count",
            &self.warmup_duration_seconds_count,
        );

        render_by_prefix(
            &mut out,
            "bioproxy_kv_cache_saves_total",
            &self.kv_cache_saves_total,
        );

        out.push_str("# TYPE bioproxy_kv_cache_restores_total counter\n");
        for entry in &self.kv_cache_restores_total {
            let ((prefix, status), count) = (entry.key().clone(), entry.value().load(Ordering::Relaxed));
            out.push_str(&format!(
                "bioproxy_kv_cache_restores_total{{prefix=\"{prefix}\",status=\"{status}\"}} {count}\n"
            ));
        }

        render_by_prefix(
            &mut out,
            "bioproxy_warmup_cancellations_total",
            &self.warmup_cancellations_total,
        );

        out
    }
}

fn bump<K: std::hash::Hash + Eq>(map: &DashMap<K, AtomicU64>, key: K) {
    map.entry(key)
        .or_insert_with(|| AtomicU64::new(0))
        .fetch_add(1, Ordering::Relaxed);
}

fn render_by_prefix(out: &mut String, name: &str, map: &DashMap<String, AtomicU64>) {
    out.push_str(&format!("# TYPE {name} counter\n"));
    for entry in map {
        let count = entry.value().load(Ordering::Relaxed);
        out.push_str(&format!("{name}{{prefix=\"{}\"}} {count}\n", entry.key()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn requests_count_sums_all_labels() {
        let m = Metrics::new();
        m.record_request("/v1/chat/completions", 200);
        m.record_request("/v1/chat/completions", 200);
        m.record_request("/v1/chat/completions", 500);

        let rendered = m.render();
        assert!(rendered.contains("bioproxy_requests_total{endpoint=\"/v1/chat/completions\",status=\"200\"} 2"));
        assert!(rendered.contains("bioproxy_requests_count 3"));
    }

    #[test]
    fn warmup_metrics_are_labeled_by_prefix() {
        let m = Metrics::new();
        m.record_warmup_check();
        m.record_warmup_execution("@code");
        m.record_warmup_error("@code", "completion_failed");
        m.record_warmup_cancellation("@debug");

        let rendered = m.render();
        assert!(rendered.contains("bioproxy_warmup_checks_total 1"));
        assert!(rendered.contains("bioproxy_warmup_executions_total{prefix=\"@code\"} 1"));
        assert!(rendered.contains(
            "bioproxy_warmup_errors_total{prefix=\"@code\",type=\"completion_failed\"} 1"
        ));
        assert!(rendered.contains("bioproxy_warmup_cancellations_total{prefix=\"@debug\"} 1"));
    }

    #[test]
    fn kv_cache_restore_is_labeled_by_status() {
        let m = Metrics::new();
        m.record_kv_cache_restore("@code", "not_found");
        m.record_kv_cache_save("@code");

        let rendered = m.render();
        assert!(rendered.contains("bioproxy_kv_cache_restores_total{prefix=\"@code\",status=\"not_found\"} 1"));
        assert!(rendered.contains("bioproxy_kv_cache_saves_total{prefix=\"@code\"} 1"));
    }

    #[test]
    fn uptime_seconds_starts_near_zero() {
        let m = Metrics::new();
        assert_eq!(m.uptime_seconds(), 0);
    }

    #[test]
    fn warmup_duration_accumulates_correctly_across_multiple_warmups() {
        let m = Metrics::new();
        m.record_warmup_duration("@code", 0.25);
        m.record_warmup_duration("@code", 0.75);

        let rendered = m.render();
        assert!(rendered.contains("bioproxy_warmup_duration_seconds_total{prefix=\"@code\"} 1\n"));
        assert!(rendered.contains("bioproxy_warmup_duration_seconds_count{prefix=\"@code\"} 2"));
    }
}

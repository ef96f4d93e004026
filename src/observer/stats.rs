use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{RequestEvent, RequestListener};

/// Per-route counters
#[derive(Debug, Default)]
pub struct RouteStats {
    pub request_count: AtomicU64,
    pub error_count: AtomicU64,
    pub total_latency_ms: AtomicU64,
}

impl RouteStats {
    fn record(&self, latency_ms: u64, failed: bool) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
        if failed {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Average latency in milliseconds
    pub fn avg_latency_ms(&self) -> f64 {
        let count = self.request_count.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        self.total_latency_ms.load(Ordering::Relaxed) as f64 / count as f64
    }
}

/// Aggregates request events by `METHOD route`
#[derive(Debug, Default)]
pub struct RequestStats {
    total_requests: AtomicU64,
    total_errors: AtomicU64,
    per_route: DashMap<String, RouteStats>,
}

impl RequestStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn total_errors(&self) -> u64 {
        self.total_errors.load(Ordering::Relaxed)
    }

    /// Snapshot as (route, requests, errors, avg latency ms), busiest first
    pub fn snapshot(&self) -> Vec<(String, u64, u64, f64)> {
        let mut rows: Vec<(String, u64, u64, f64)> = self
            .per_route
            .iter()
            .map(|entry| {
                let stats = entry.value();
                (
                    entry.key().clone(),
                    stats.request_count.load(Ordering::Relaxed),
                    stats.error_count.load(Ordering::Relaxed),
                    stats.avg_latency_ms(),
                )
            })
            .collect();
        rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        rows
    }
}

impl RequestListener for RequestStats {
    fn on_request(&self, event: &RequestEvent) {
        let failed = !event.is_success();
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.total_errors.fetch_add(1, Ordering::Relaxed);
        }

        self.per_route
            .entry(format!("{} {}", event.method, event.route))
            .or_default()
            .record(event.latency.as_millis() as u64, failed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;
    use uuid::Uuid;

    fn event(route: &str, status: Option<u16>, latency_ms: u64) -> RequestEvent {
        RequestEvent {
            request_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            method: "GET".to_string(),
            route: route.to_string(),
            path: route.to_string(),
            status,
            latency: Duration::from_millis(latency_ms),
            error: None,
        }
    }

    #[test]
    fn test_stats_new() {
        let stats = RequestStats::new();
        assert_eq!(stats.total_requests(), 0);
        assert!(stats.snapshot().is_empty());
    }

    #[test]
    fn test_stats_group_by_route() {
        let stats = RequestStats::new();
        stats.on_request(&event("/v2/apps", Some(200), 100));
        stats.on_request(&event("/v2/apps", Some(500), 300));
        stats.on_request(&event("/v2/info", None, 10));

        assert_eq!(stats.total_requests(), 3);
        assert_eq!(stats.total_errors(), 2);

        let rows = stats.snapshot();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, "GET /v2/apps");
        assert_eq!(rows[0].1, 2);
        assert_eq!(rows[0].2, 1);
        assert!((rows[0].3 - 200.0).abs() < f64::EPSILON);
    }
}

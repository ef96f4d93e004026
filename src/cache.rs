// Controller info cache

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::models::CloudInfo;

#[derive(Debug, Clone)]
struct CachedInfo {
    info: CloudInfo,
    fetched_at: Instant,
}

/// Thread-safe cache of `/v2/info` documents, keyed by controller URL
#[derive(Debug, Clone)]
pub struct InfoCache {
    entries: Arc<DashMap<String, CachedInfo>>,

    /// Entries older than this are stale
    ttl: Duration,
}

impl InfoCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
        }
    }

    pub fn update(&self, controller_url: &str, info: CloudInfo) {
        tracing::debug!(
            controller = controller_url,
            authorization_endpoint = %info.authorization_endpoint,
            "Updating controller info cache"
        );
        self.entries.insert(
            controller_url.to_string(),
            CachedInfo {
                info,
                fetched_at: Instant::now(),
            },
        );
    }

    /// Fresh entry only; stale entries are left for the next update
    pub fn get(&self, controller_url: &str) -> Option<CloudInfo> {
        self.entries
            .get(controller_url)
            .filter(|entry| entry.fetched_at.elapsed() <= self.ttl)
            .map(|entry| entry.info.clone())
    }

    pub fn is_stale(&self, controller_url: &str) -> bool {
        self.get(controller_url).is_none()
    }

    pub fn invalidate(&self, controller_url: &str) {
        self.entries.remove(controller_url);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

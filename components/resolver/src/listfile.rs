//! The file-id-to-path listfile cache (spec.md §6): a community-maintained
//! `id;path` table the resolver consults to log human-readable paths
//! alongside raw file ids. Cached with an ETag and a short negative
//! cooldown so a listfile outage degrades to numeric-only logging instead
//! of hammering the upstream host every scan.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::ResolverError;

const NEGATIVE_COOLDOWN: Duration = Duration::from_secs(5 * 60);

struct Cached {
    etag: Option<String>,
    by_id: HashMap<u32, String>,
    by_path_lower: HashMap<String, u32>,
}

enum State {
    Empty,
    Cached(Cached),
    NegativeCooldown(Instant),
}

pub struct ListfileCache {
    state: tokio::sync::Mutex<State>,
}

impl Default for ListfileCache {
    fn default() -> Self {
        ListfileCache { state: tokio::sync::Mutex::new(State::Empty) }
    }
}

impl ListfileCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a raw `id;path` listfile body (one record per line) into the
    /// cache, recording `etag` for future conditional requests.
    pub async fn ingest(&self, etag: Option<String>, body: &str) -> Result<(), ResolverError> {
        let mut by_id = HashMap::new();
        let mut by_path_lower = HashMap::new();
        for line in body.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some((id_str, path)) = line.split_once(';') else {
                continue;
            };
            let id: u32 = id_str.parse().map_err(|_| ResolverError::Malformed(format!("bad listfile id: {id_str}")))?;
            by_path_lower.insert(path.to_lowercase(), id);
            by_id.insert(id, path.to_string());
        }
        *self.state.lock().await = State::Cached(Cached { etag, by_id, by_path_lower });
        Ok(())
    }

    pub async fn mark_cooldown(&self) {
        *self.state.lock().await = State::NegativeCooldown(Instant::now());
    }

    /// Whether a refetch should be attempted right now: never cached yet,
    /// or the cooldown window from a prior failure has elapsed.
    pub async fn should_refetch(&self) -> bool {
        match &*self.state.lock().await {
            State::Empty => true,
            State::Cached(_) => true,
            State::NegativeCooldown(since) => since.elapsed() >= NEGATIVE_COOLDOWN,
        }
    }

    pub async fn etag(&self) -> Option<String> {
        match &*self.state.lock().await {
            State::Cached(c) => c.etag.clone(),
            _ => None,
        }
    }

    pub async fn path_for(&self, file_id: u32) -> Option<String> {
        match &*self.state.lock().await {
            State::Cached(c) => c.by_id.get(&file_id).cloned(),
            _ => None,
        }
    }

    pub async fn id_for_path(&self, path: &str) -> Option<u32> {
        match &*self.state.lock().await {
            State::Cached(c) => c.by_path_lower.get(&path.to_lowercase()).copied(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn parses_semicolon_rows_case_insensitively() {
        let cache = ListfileCache::new();
        cache.ingest(Some("W/\"abc\"".into()), "1;world/minimaps/azeroth/map01.blp\n2;World/Minimaps/Azeroth/Map02.blp\n").await.unwrap();

        assert_eq!(cache.path_for(1).await.as_deref(), Some("world/minimaps/azeroth/map01.blp"));
        assert_eq!(cache.id_for_path("WORLD/MINIMAPS/AZEROTH/MAP02.BLP").await, Some(2));
        assert_eq!(cache.etag().await.as_deref(), Some("W/\"abc\""));
    }

    #[tokio::test]
    async fn cooldown_blocks_refetch_until_elapsed() {
        let cache = ListfileCache::new();
        cache.mark_cooldown().await;
        assert!(!cache.should_refetch().await);
    }
}

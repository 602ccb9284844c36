//! Process-local dictionary cache with generation-based invalidation.

use parking_lot::RwLock;
use rocket_db_pools::sqlx::{self, PgPool};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::UNRANKED_PRIORITY;

/// One dictionary entry. Keywords are stored normalized.
#[derive(Debug, Clone)]
pub struct KeywordEntry {
    pub keyword: String,
    pub buyer_persona_id: String,
    pub buyer_persona_name: String,
}

/// Immutable view of the dictionary at one generation.
#[derive(Debug, Clone)]
pub struct CacheSnapshot {
    pub generation: u64,
    pub keywords: Vec<KeywordEntry>,
    pub priorities: HashMap<String, i32>,
}

impl CacheSnapshot {
    pub fn priority_of(&self, buyer_persona_id: &str) -> i32 {
        self.priorities
            .get(buyer_persona_id)
            .copied()
            .unwrap_or(UNRANKED_PRIORITY)
    }
}

/// Swap-on-invalidate snapshot holder.
///
/// Readers compare the snapshot generation against the counter and refetch
/// on mismatch; writers only bump the counter. The snapshot itself is an
/// `Arc` so a refetch never blocks in-flight classifications.
pub struct ClassifierCache {
    generation: AtomicU64,
    snapshot: RwLock<Arc<CacheSnapshot>>,
}

impl ClassifierCache {
    pub fn new() -> Self {
        Self {
            // Start one ahead of the empty snapshot so the first read loads.
            generation: AtomicU64::new(1),
            snapshot: RwLock::new(Arc::new(CacheSnapshot {
                generation: 0,
                keywords: Vec::new(),
                priorities: HashMap::new(),
            })),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Invalidate after any keyword or priority mutation.
    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Current snapshot, refetched from the store when stale.
    pub async fn snapshot(&self, pool: &PgPool) -> Result<Arc<CacheSnapshot>, sqlx::Error> {
        let current = self.generation();
        {
            let guard = self.snapshot.read();
            if guard.generation == current {
                return Ok(Arc::clone(&guard));
            }
        }

        let fresh = Arc::new(Self::load(pool, current).await?);
        let mut guard = self.snapshot.write();
        // Another task may have loaded a newer generation while we fetched.
        if guard.generation < fresh.generation {
            *guard = Arc::clone(&fresh);
        }
        Ok(fresh)
    }

    async fn load(pool: &PgPool, generation: u64) -> Result<CacheSnapshot, sqlx::Error> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT keyword, buyer_persona_id, buyer_persona_name
             FROM job_keywords ORDER BY keyword",
        )
        .fetch_all(pool)
        .await?;

        let priority_rows: Vec<(String, i32)> =
            sqlx::query_as("SELECT buyer_persona_id, priority FROM buyer_persona_priorities")
                .fetch_all(pool)
                .await?;

        log::debug!(
            "classifier cache refreshed: {} keywords, {} priorities (generation {})",
            rows.len(),
            priority_rows.len(),
            generation
        );

        Ok(CacheSnapshot {
            generation,
            keywords: rows
                .into_iter()
                .map(|(keyword, buyer_persona_id, buyer_persona_name)| KeywordEntry {
                    keyword,
                    buyer_persona_id,
                    buyer_persona_name,
                })
                .collect(),
            priorities: priority_rows.into_iter().collect(),
        })
    }
}

impl Default for ClassifierCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalidate_bumps_generation() {
        let cache = ClassifierCache::new();
        let before = cache.generation();
        cache.invalidate();
        assert_eq!(cache.generation(), before + 1);
    }

    #[test]
    fn fresh_cache_starts_stale() {
        let cache = ClassifierCache::new();
        let guard = cache.snapshot.read();
        assert_ne!(guard.generation, cache.generation.load(Ordering::Acquire));
    }
}

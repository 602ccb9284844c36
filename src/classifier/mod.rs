//! Keyword-driven persona classification.
//!
//! Maps a free-form job title to a buyer persona through an ordered keyword
//! dictionary. The dictionary lives in the store (`job_keywords` +
//! `buyer_persona_priorities`) and is served from a process-local cache
//! guarded by a generation counter: every keyword or priority mutation bumps
//! the generation, and the next read refetches.
//!
//! # Winner selection
//!
//! All keywords whose normalized form is a substring of the normalized job
//! title match. Among matches the winner is chosen by:
//!
//! 1. lowest persona priority number (missing priority sorts last),
//! 2. longest keyword,
//! 3. lexicographically smallest keyword.
//!
//! No match yields the default persona (`mateo`) with `is_default = true`.
//!
//! Classification itself is pure and never fails; only snapshot refresh can
//! return a store error.
//!
//! # Single-instance assumption
//!
//! The generation counter is process-local. The deployment runs one worker
//! process; a multi-process setup would need a store-backed generation
//! before cache invalidation becomes cross-process correct.

pub mod cache;
pub mod keywords;
pub mod metrics;
pub mod reclassification;

use cache::{CacheSnapshot, ClassifierCache};
use rocket_db_pools::sqlx::{self, PgPool};
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::LazyLock;

/// Persona assigned when no keyword matches.
pub const DEFAULT_PERSONA_ID: &str = "mateo";
pub const DEFAULT_PERSONA_NAME: &str = "Mateo";

/// Priority assumed for personas missing from the priority table.
pub(crate) const UNRANKED_PRIORITY: i32 = 999;

static TITLE_FOLD: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"[\s\.,;:/\\\-_()&|]+").expect("valid regex"));

/// Lowercase, collapse whitespace, fold common punctuation to single spaces.
pub fn normalize_job_title(title: &str) -> String {
    let lowered = title.trim().to_lowercase();
    TITLE_FOLD.replace_all(&lowered, " ").trim().to_string()
}

/// One keyword that matched a job title.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct KeywordMatch {
    pub keyword: String,
    pub buyer_persona_id: String,
    pub buyer_persona_name: String,
    pub priority: i32,
}

/// Result of classifying one job title.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Classification {
    pub buyer_persona_id: String,
    pub buyer_persona_name: String,
    /// Keywords owned by the winning persona that matched.
    pub matched_keywords: Vec<String>,
    /// Every match, winning or not, for diagnostics.
    pub all_matches: Vec<KeywordMatch>,
    pub normalized_job_title: String,
    pub is_default: bool,
}

impl Classification {
    fn default_for(normalized: String) -> Self {
        Self {
            buyer_persona_id: DEFAULT_PERSONA_ID.to_string(),
            buyer_persona_name: DEFAULT_PERSONA_NAME.to_string(),
            matched_keywords: Vec::new(),
            all_matches: Vec::new(),
            normalized_job_title: normalized,
            is_default: true,
        }
    }
}

/// Pure classification against a dictionary snapshot.
pub fn classify_with_snapshot(snapshot: &CacheSnapshot, job_title: &str) -> Classification {
    let normalized = normalize_job_title(job_title);
    if normalized.is_empty() {
        return Classification::default_for(normalized);
    }

    let mut matches: Vec<KeywordMatch> = snapshot
        .keywords
        .iter()
        .filter(|entry| normalized.contains(entry.keyword.as_str()))
        .map(|entry| KeywordMatch {
            keyword: entry.keyword.clone(),
            buyer_persona_id: entry.buyer_persona_id.clone(),
            buyer_persona_name: entry.buyer_persona_name.clone(),
            priority: snapshot.priority_of(&entry.buyer_persona_id),
        })
        .collect();

    if matches.is_empty() {
        return Classification::default_for(normalized);
    }

    matches.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then(b.keyword.len().cmp(&a.keyword.len()))
            .then(a.keyword.cmp(&b.keyword))
    });

    let winner = matches[0].clone();
    let matched_keywords = matches
        .iter()
        .filter(|m| m.buyer_persona_id == winner.buyer_persona_id)
        .map(|m| m.keyword.clone())
        .collect();

    Classification {
        buyer_persona_id: winner.buyer_persona_id,
        buyer_persona_name: winner.buyer_persona_name,
        matched_keywords,
        all_matches: matches,
        normalized_job_title: normalized,
        is_default: false,
    }
}

/// Classifier service: store handle plus the process-local cache.
#[derive(Clone)]
pub struct PersonaClassifier {
    pool: PgPool,
    cache: Arc<ClassifierCache>,
}

impl PersonaClassifier {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            cache: Arc::new(ClassifierCache::new()),
        }
    }

    pub fn cache(&self) -> &Arc<ClassifierCache> {
        &self.cache
    }

    /// Bump the cache generation; the next read refetches the dictionary.
    pub fn invalidate_cache(&self) {
        self.cache.invalidate();
    }

    /// Classify a single job title, refreshing the snapshot if stale.
    pub async fn classify(&self, job_title: &str) -> Result<Classification, sqlx::Error> {
        let snapshot = self.cache.snapshot(&self.pool).await?;
        Ok(classify_with_snapshot(&snapshot, job_title))
    }

    /// Classify each distinct title once; large sets fan out over rayon.
    ///
    /// Used by the import pre-pass so each raw title is classified exactly
    /// once regardless of how many rows share it.
    pub async fn classify_batch(
        &self,
        titles: &[String],
    ) -> Result<HashMap<String, Classification>, sqlx::Error> {
        let snapshot = self.cache.snapshot(&self.pool).await?;

        const PARALLEL_THRESHOLD: usize = 256;
        let classified: Vec<(String, Classification)> = if titles.len() >= PARALLEL_THRESHOLD {
            use rayon::prelude::*;
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(num_cpus::get())
                .build()
                .map_err(|e| sqlx::Error::Protocol(format!("thread pool: {e}")))?;
            pool.install(|| {
                titles
                    .par_iter()
                    .map(|t| (t.clone(), classify_with_snapshot(&snapshot, t)))
                    .collect()
            })
        } else {
            titles
                .iter()
                .map(|t| (t.clone(), classify_with_snapshot(&snapshot, t)))
                .collect()
        };

        Ok(classified.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::cache::{CacheSnapshot, KeywordEntry};
    use super::*;

    fn snapshot(entries: Vec<(&str, &str, &str)>, priorities: Vec<(&str, i32)>) -> CacheSnapshot {
        CacheSnapshot {
            generation: 1,
            keywords: entries
                .into_iter()
                .map(|(k, id, name)| KeywordEntry {
                    keyword: k.to_string(),
                    buyer_persona_id: id.to_string(),
                    buyer_persona_name: name.to_string(),
                })
                .collect(),
            priorities: priorities
                .into_iter()
                .map(|(id, p)| (id.to_string(), p))
                .collect(),
        }
    }

    #[test]
    fn normalize_folds_punctuation_and_whitespace() {
        assert_eq!(normalize_job_title("  Chief  Executive-Officer "), "chief executive officer");
        assert_eq!(normalize_job_title("VP, Sales & Marketing"), "vp sales marketing");
        assert_eq!(normalize_job_title("CEO/Founder"), "ceo founder");
    }

    #[test]
    fn no_match_yields_default_persona() {
        let snap = snapshot(vec![("ceo", "ana", "Ana")], vec![("ana", 1)]);
        let result = classify_with_snapshot(&snap, "Janitor");
        assert!(result.is_default);
        assert_eq!(result.buyer_persona_id, DEFAULT_PERSONA_ID);
        assert!(result.all_matches.is_empty());
    }

    #[test]
    fn lowest_priority_number_wins() {
        let snap = snapshot(
            vec![("director", "ana", "Ana"), ("medical", "luis", "Luis")],
            vec![("ana", 2), ("luis", 1)],
        );
        let result = classify_with_snapshot(&snap, "Medical Director");
        assert_eq!(result.buyer_persona_id, "luis");
        assert!(!result.is_default);
        assert_eq!(result.all_matches.len(), 2);
    }

    #[test]
    fn longer_keyword_breaks_priority_tie() {
        let snap = snapshot(
            vec![("director", "ana", "Ana"), ("medical director", "luis", "Luis")],
            vec![("ana", 1), ("luis", 1)],
        );
        let result = classify_with_snapshot(&snap, "Senior Medical Director");
        assert_eq!(result.buyer_persona_id, "luis");
    }

    #[test]
    fn lexicographic_order_breaks_remaining_tie() {
        let snap = snapshot(
            vec![("ventas", "zoe", "Zoe"), ("gestor", "ana", "Ana")],
            vec![("zoe", 1), ("ana", 1)],
        );
        // Same priority, same keyword length: "gestor" < "ventas".
        let result = classify_with_snapshot(&snap, "gestor de ventas");
        assert_eq!(result.buyer_persona_id, "ana");
    }

    #[test]
    fn unranked_persona_sorts_after_ranked() {
        let snap = snapshot(
            vec![("manager", "nadie", "Nadie"), ("sales", "ana", "Ana")],
            vec![("ana", 5)],
        );
        let result = classify_with_snapshot(&snap, "Sales Manager");
        assert_eq!(result.buyer_persona_id, "ana");
    }

    #[test]
    fn matched_keywords_only_lists_winning_persona() {
        let snap = snapshot(
            vec![
                ("director", "ana", "Ana"),
                ("comercial", "ana", "Ana"),
                ("ventas", "luis", "Luis"),
            ],
            vec![("ana", 1), ("luis", 2)],
        );
        let result = classify_with_snapshot(&snap, "director comercial de ventas");
        assert_eq!(result.buyer_persona_id, "ana");
        assert_eq!(result.matched_keywords.len(), 2);
        assert_eq!(result.all_matches.len(), 3);
    }

    #[test]
    fn empty_title_is_default() {
        let snap = snapshot(vec![("ceo", "ana", "Ana")], vec![("ana", 1)]);
        assert!(classify_with_snapshot(&snap, "   ").is_default);
    }
}

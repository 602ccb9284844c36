//! LinkedIn connection import pipeline.
//!
//! A caller uploads a CSV export and registers a job; the scheduler's
//! dispatch tick hands it to [`worker::ImportWorker`], which claims it,
//! takes the profile lock, streams the file, resolves companies in bulk,
//! deduplicates contacts across the email and LinkedIn URL namespaces, and
//! writes in unordered batches with heartbeats for liveness.
//!
//! Submodules:
//!
//! - `queue` - persistent job store with CAS claim and orphan recovery
//! - `locks` - per-profile mutual exclusion rows
//! - `csv_stream` - BOM/delimiter/duplicate-header tolerant streaming reader
//! - `normalize` - deduplication key normalization
//! - `dates` - bilingual `connected_on` parsing
//! - `companies` - bulk company resolution with auto-creation
//! - `audit` - conflict / invalid-row / parse-failure records
//! - `worker` - the pipeline itself

pub mod audit;
pub mod companies;
pub mod csv_stream;
pub mod dates;
pub mod locks;
pub mod normalize;
pub mod queue;
pub mod worker;

/// Import source buckets: two personal LinkedIn accounts.
pub const PROFILES: [(&str, &str); 2] = [("GB", "Gerardo Betancourt"), ("MG", "María del Mar Gargari")];

pub fn is_valid_profile(profile: &str) -> bool {
    PROFILES.iter().any(|(code, _)| *code == profile)
}

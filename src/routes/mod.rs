//! HTTP route handlers.
//!
//! Thin adapters between the HTTP surface and the core modules: request
//! parsing, caller identity, response envelopes. Business rules live in
//! the modules they belong to.

pub mod contacts;
pub mod health;
pub mod imports;
pub mod keywords;
pub mod notifications;
pub mod position_search;
pub mod schedules;
pub mod semaphore;

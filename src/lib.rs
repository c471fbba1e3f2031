//! Manga catalog ingestion and sync.
//!
//! Source adapters fetch provider payloads and map them to the canonical
//! model; the reconcilers turn canonical values into the minimal set of
//! store writes; the orchestrator drives crawls and syncs. Every store call
//! passes through one shared [`throttle::ConnectionThrottle`].

pub mod cli;
pub mod config;
pub mod error;
pub mod helpers;
pub mod http_client;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod reconcile;
pub mod sources;
pub mod store;
pub mod sync;
pub mod throttle;

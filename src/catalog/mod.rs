//! Remote catalog of published versions
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐     ┌───────────────┐     ┌──────────────┐
//! │ CatalogSource│────▶│ CatalogClient │────▶│ CatalogCache │
//! │   (fetch)    │     │ (snapshots)   │     │  (catalog.db)│
//! └──────────────┘     └───────────────┘     └──────────────┘
//! ```
//!
//! # Modules
//!
//! - [`source`]: Trait for fetching a candidate's versions
//! - [`http`]: JSON-over-HTTP source
//! - [`cache`]: SQLite copy of the last successful fetches
//! - [`client`]: Immutable snapshots, refresh coalescing
//! - [`types`]: Snapshot and version types

pub mod cache;
pub mod client;
pub mod http;
pub mod source;
pub mod types;

pub use client::{CatalogClient, RefreshScope, Refreshed};
pub use types::{CandidateCatalog, CatalogSnapshot, RemoteVersion};

//! Installed-version inventory
//!
//! - [`store`]: SQLite-backed records of versions and default pointers
//! - [`layout`]: candidate root directories and the `current` link
//! - [`types`]: version entries and their lifecycle states

pub mod layout;
pub mod store;
pub mod types;

pub use store::InventoryStore;
pub use types::{InstallToken, Origin, ReconcileReport, VersionEntry, VersionStatus};

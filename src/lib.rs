pub mod candidate;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod installer;
pub mod inventory;
pub mod logging;
pub mod notify;
pub mod version;

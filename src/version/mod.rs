//! Version identifiers: ordering and token resolution
//!
//! ```text
//! ┌─────────────┐     ┌──────────────────┐
//! │  Ordering   │◀────│  VersionResolver │◀── "latest" / "default" / "21.0.1"
//! │ (per scheme)│     │ (catalog + inv.) │
//! └─────────────┘     └──────────────────┘
//! ```
//!
//! - [`ordering`]: numeric and lexical comparison, vendor suffixes
//! - [`resolver`]: turns a [`resolver::VersionToken`] into a concrete identifier

pub mod ordering;
pub mod resolver;

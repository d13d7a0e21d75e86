//! Link validation
//!
//! - [`prober`] checks one URL, following redirects by hand
//! - [`engine`] extracts, filters and deduplicates links from fetched pages,
//!   probes them under a [`crate::limiter::ConcurrencyLimiter`], and turns
//!   the failures into issues

pub mod engine;
pub mod prober;

pub use engine::*;
pub use prober::*;

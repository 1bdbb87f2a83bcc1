#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Grant-geography distance engine.
//!
//! Resolves ZIP codes to coordinates through a memoizing [`ZipResolver`],
//! measures great-circle distances with [`distance::haversine_miles`], and
//! reduces per-foundation ZIP sets to a centroid plus dispersion. The
//! [`analyzer`] streams `(foundation, related ZIP)` rows into one
//! [`GeoSummary`](grant_scout_geo_models::GeoSummary) per foundation, and
//! [`target`] measures how far each foundation sits from a fixed target.
//!
//! Storage is reached only through the [`CoordinateStore`] and
//! [`target::FoundationGeoSource`] traits.

pub mod analyzer;
pub mod centroid;
pub mod distance;
pub mod progress;
pub mod resolver;
pub mod target;

pub use resolver::{CoordinateStore, Resolution, UnknownZipWrite, ZipLookup, ZipResolver};

/// Boxed collaborator error carried across an entity boundary.
pub type SourceError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised while processing a single foundation.
///
/// Every variant is scoped to one entity: callers log it and move on to
/// the next foundation.
#[derive(Debug, thiserror::Error)]
pub enum GeoError {
    /// Rows for one foundation disagree on its home ZIP under
    /// [`analyzer::HomeZipPolicy::Strict`].
    #[error("Foundation {ein} has conflicting home ZIPs: {first} vs {conflicting}")]
    HomeZipMismatch {
        /// Foundation EIN.
        ein: String,
        /// Home ZIP from the first row seen.
        first: String,
        /// A later, different home ZIP.
        conflicting: String,
    },

    /// A storage collaborator failed while reading this foundation's data.
    #[error("Source error: {0}")]
    Source(#[source] SourceError),
}

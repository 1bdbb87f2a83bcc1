#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Coordinate, geo-summary, and scored-result types.
//!
//! These are the plain data records exchanged between the geo engine, the
//! composite scorer, and the `DuckDB` storage layer. All coordinates are
//! `(latitude, longitude)` in decimal degrees and all distances are miles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// Number of characters in a US ZIP-5 code.
pub const ZIP5_LEN: usize = 5;

/// A `(latitude, longitude)` pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatePair {
    /// Latitude in degrees, `-90..=90`.
    pub latitude: f64,
    /// Longitude in degrees, `-180..=180`.
    pub longitude: f64,
}

impl CoordinatePair {
    /// Builds a pair, rejecting non-finite or out-of-range values.
    #[must_use]
    pub fn new(latitude: f64, longitude: f64) -> Option<Self> {
        let valid = latitude.is_finite()
            && longitude.is_finite()
            && (-90.0..=90.0).contains(&latitude)
            && (-180.0..=180.0).contains(&longitude);

        valid.then_some(Self {
            latitude,
            longitude,
        })
    }

    /// Renders the pair as a WKT point. WKT is x/y, so longitude comes first.
    #[must_use]
    pub fn to_wkt(&self) -> String {
        format!("POINT({} {})", self.longitude, self.latitude)
    }
}

/// The category of related locations being summarized for a foundation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, AsRefStr,
    Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Relation {
    /// Where the foundation's grant money went.
    Grants,
    /// Where the foundation's officers, directors, and key staff live.
    KeyContacts,
}

impl Relation {
    /// Both relations, in the order they are analyzed.
    pub const ALL: [Self; 2] = [Self::Grants, Self::KeyContacts];
}

/// One `(foundation, related location)` row from a relation source query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationRow {
    /// Foundation EIN.
    pub ein: String,
    /// Foundation display name as carried by the source row.
    pub foundation_name: Option<String>,
    /// Foundation's own (home) ZIP code.
    pub home_zip: Option<String>,
    /// ZIP code of the grant recipient or key contact.
    pub related_zip: Option<String>,
    /// Grant amount or key contact title, rendered as text.
    pub detail: Option<String>,
}

/// Derived geographic statistics for one foundation and one relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoSummary {
    /// Foundation EIN.
    pub ein: String,
    /// Which relation these statistics describe.
    pub relation: Relation,
    /// Number of non-empty related ZIP codes accumulated for the foundation.
    pub member_count: u32,
    /// Number of those ZIP codes that resolved to a coordinate.
    pub resolved_count: u32,
    /// Planar mean of the resolved member coordinates.
    pub centroid: Option<CoordinatePair>,
    /// Sample standard deviation of member-to-centroid distances in miles.
    pub dispersion: Option<f64>,
    /// Miles from the foundation's home ZIP to the centroid.
    pub entity_to_centroid_distance: Option<f64>,
}

impl GeoSummary {
    /// A summary for a foundation with nothing resolvable.
    #[must_use]
    pub fn empty(ein: impl Into<String>, relation: Relation) -> Self {
        Self {
            ein: ein.into(),
            relation,
            member_count: 0,
            resolved_count: 0,
            centroid: None,
            dispersion: None,
            entity_to_centroid_distance: None,
        }
    }
}

/// Stored geographic data for one foundation, as read back for scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FoundationGeo {
    /// Foundation EIN.
    pub ein: String,
    /// Foundation's home ZIP code, if on file.
    pub home_zip: Option<String>,
    /// Grants-relation summary, if one was computed.
    pub grants: Option<GeoSummary>,
    /// Key-contacts-relation summary, if one was computed.
    pub key_contacts: Option<GeoSummary>,
}

/// Distances from the target location to a foundation's three locations.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetDistances {
    /// Miles to the foundation's own address.
    pub foundation: Option<f64>,
    /// Miles to the key-contacts centroid.
    pub key_contacts: Option<f64>,
    /// Miles to the grant-recipients centroid.
    pub recipients: Option<f64>,
}

/// Grant volume for one foundation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantStats {
    /// Number of grants on file.
    pub count: u64,
    /// Mean grant amount in dollars (0 when there are no grants).
    pub average_amount: f64,
}

/// The composite candidacy record for one foundation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredResult {
    /// Foundation EIN.
    pub ein: String,
    /// Foundation display name.
    pub name: String,
    /// Weighted composite score in `0..=1`.
    pub score: f64,
    /// Mission-statement similarity, if one was computed.
    pub semantic_similarity: Option<f64>,
    /// Number of grants on file.
    pub total_relevant_grants: u64,
    /// Mean grant amount in dollars.
    pub avg_grant_size: f64,
    /// Grant dispersion in miles, suppressed for small samples.
    pub geographic_coverage: Option<f64>,
    /// Grant-recipient centroid.
    pub grant_center: Option<CoordinatePair>,
    /// Miles from the target to the grant-recipient centroid.
    pub distance_to_target: Option<f64>,
    /// When this scoring run started.
    pub scored_date: DateTime<Utc>,
    /// Identifier shared by every record of one scoring run.
    pub run_id: Uuid,
}

/// A stored scored result joined with filer location, for listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    /// Filer state abbreviation.
    pub state: Option<String>,
    /// Filer ZIP code.
    pub zipcode: Option<String>,
    /// Foundation EIN.
    pub ein: String,
    /// Foundation display name.
    pub name: String,
    /// Composite score.
    pub score: f64,
    /// Mission-statement similarity.
    pub semantic_similarity: Option<f64>,
    /// Number of grants on file.
    pub total_relevant_grants: u64,
    /// Mean grant amount in dollars.
    pub avg_grant_size: f64,
    /// Miles from the target to the grant-recipient centroid.
    pub distance_to_target: Option<f64>,
}

/// Truncates a raw ZIP to ZIP-5, returning `None` for blank input.
///
/// ZIP+4 values like `"02134-1234"` become `"02134"`.
#[must_use]
pub fn zip5(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let end = trimmed
        .char_indices()
        .nth(ZIP5_LEN)
        .map_or(trimmed.len(), |(i, _)| i);
    Some(&trimmed[..end])
}

/// Normalizes a ZIP to its reference-table lookup key by stripping leading
/// zeros (`"02134"` becomes `"2134"`).
#[must_use]
pub fn lookup_key(zip: &str) -> &str {
    zip.trim().trim_start_matches('0')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_coordinates() {
        assert!(CoordinatePair::new(91.0, 0.0).is_none());
        assert!(CoordinatePair::new(0.0, -180.5).is_none());
        assert!(CoordinatePair::new(f64::NAN, 0.0).is_none());
        assert!(CoordinatePair::new(34.0901, -118.4065).is_some());
    }

    #[test]
    fn renders_wkt_longitude_first() {
        let point = CoordinatePair::new(34.5, -118.25).unwrap();
        assert_eq!(point.to_wkt(), "POINT(-118.25 34.5)");
    }

    #[test]
    fn truncates_zip_plus_four() {
        assert_eq!(zip5("02134-1234"), Some("02134"));
        assert_eq!(zip5(" 78701 "), Some("78701"));
        assert_eq!(zip5("787"), Some("787"));
    }

    #[test]
    fn blank_zip_is_none() {
        assert_eq!(zip5(""), None);
        assert_eq!(zip5("   "), None);
    }

    #[test]
    fn lookup_key_strips_leading_zeros() {
        assert_eq!(lookup_key("02134"), "2134");
        assert_eq!(lookup_key("2134"), "2134");
        assert_eq!(lookup_key("00501"), "501");
        assert_eq!(lookup_key("90210"), "90210");
    }

    #[test]
    fn relation_round_trips_through_strings() {
        assert_eq!(Relation::KeyContacts.as_ref(), "key_contacts");
        assert_eq!("grants".parse::<Relation>().unwrap(), Relation::Grants);
    }
}

//! Per-foundation grant and key-contact geography.
//!
//! [`analyze`] consumes one relation's row stream in a single pass, groups
//! the related ZIPs by foundation, and reduces each group to a
//! [`GeoSummary`]. Grants and key contacts are separate invocations over
//! separate streams and are never mixed.
//!
//! A failing row stream aborts the pass. A failure inside one foundation is
//! logged and that foundation is skipped.
//!
//! Rows are expected to arrive grouped by EIN. When the row cap cuts a
//! foundation's rows short, that foundation is skipped rather than
//! summarized from a partial set, and the outcome is marked
//! [`AnalysisOutcome::truncated`].

use std::collections::BTreeMap;
use std::sync::Arc;

use grant_scout_geo_models::{GeoSummary, Relation, RelationRow, zip5};

use crate::GeoError;
use crate::centroid::summarize;
use crate::distance::haversine_miles;
use crate::progress::ProgressCallback;
use crate::resolver::{CoordinateStore, ZipResolver};

/// Upper bound on rows consumed from one relation stream.
pub const DEFAULT_MAX_ROWS: u64 = 10_000_000;

/// How to treat a foundation whose rows disagree on its home ZIP.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HomeZipPolicy {
    /// Keep the first non-empty home ZIP seen in stream order.
    #[default]
    FirstRowWins,
    /// Skip the foundation with [`GeoError::HomeZipMismatch`].
    Strict,
}

/// Options for one analysis pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalyzeOptions {
    /// Home-ZIP consistency policy.
    pub home_zip_policy: HomeZipPolicy,
    /// Stop reading the stream after this many rows.
    pub max_rows: u64,
}

impl Default for AnalyzeOptions {
    fn default() -> Self {
        Self {
            home_zip_policy: HomeZipPolicy::default(),
            max_rows: DEFAULT_MAX_ROWS,
        }
    }
}

/// A foundation left out of the output, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntity {
    /// Foundation EIN.
    pub ein: String,
    /// Rendered error.
    pub reason: String,
}

/// Result of one relation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisOutcome {
    /// Which relation was analyzed.
    pub relation: Relation,
    /// Rows consumed from the stream.
    pub rows_read: u64,
    /// One summary per foundation, ordered by EIN.
    pub summaries: Vec<GeoSummary>,
    /// Foundations that failed and were left out.
    pub skipped: Vec<SkippedEntity>,
    /// The row cap was reached before the stream ended.
    pub truncated: bool,
}

#[derive(Default)]
struct EntityRows {
    home_zip: Option<String>,
    conflicting_home_zip: Option<String>,
    related: Vec<String>,
}

impl EntityRows {
    fn push(&mut self, row: &RelationRow) {
        if let Some(home) = row.home_zip.as_deref().and_then(zip5) {
            match &self.home_zip {
                None => self.home_zip = Some(home.to_string()),
                Some(first) if first != home && self.conflicting_home_zip.is_none() => {
                    self.conflicting_home_zip = Some(home.to_string());
                }
                Some(_) => {}
            }
        }

        if let Some(related) = row.related_zip.as_deref().and_then(zip5) {
            self.related.push(related.to_string());
        }
    }
}

/// Groups a relation row stream by foundation and summarizes each group.
///
/// # Errors
///
/// Returns the stream's error if reading any row fails. Per-foundation
/// failures never surface here; they land in
/// [`AnalysisOutcome::skipped`].
pub fn analyze<S, I, E>(
    resolver: &mut ZipResolver<S>,
    relation: Relation,
    rows: I,
    options: AnalyzeOptions,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<AnalysisOutcome, E>
where
    S: CoordinateStore,
    I: IntoIterator<Item = Result<RelationRow, E>>,
    E: std::fmt::Display,
{
    let mut grouped: BTreeMap<String, EntityRows> = BTreeMap::new();
    let mut skipped = Vec::new();
    let mut rows_read = 0u64;
    let mut last_ein: Option<String> = None;
    let mut truncated = false;

    progress.set_message(format!("Reading {relation} rows"));

    for row in rows {
        let row = row.inspect_err(|e| {
            log::error!("{relation} source query failed after {rows_read} rows: {e}");
        })?;

        if rows_read >= options.max_rows {
            log::warn!(
                "{relation}: row cap of {} reached before the stream ended",
                options.max_rows
            );
            truncated = true;
            if let Some(ein) = last_ein.take_if(|last| *last == row.ein)
                && grouped.remove(&ein).is_some()
            {
                log::error!("{relation}: foundation {ein} was cut off by the row cap; skipping");
                skipped.push(SkippedEntity {
                    ein,
                    reason: format!(
                        "row cap of {} reached before all of its rows were read",
                        options.max_rows
                    ),
                });
            }
            break;
        }

        grouped.entry(row.ein.clone()).or_default().push(&row);
        last_ein = Some(row.ein);
        rows_read += 1;
    }

    log::info!(
        "{relation}: read {rows_read} rows for {} foundations",
        grouped.len()
    );

    progress.set_total(grouped.len() as u64);
    progress.set_message(format!("Summarizing {relation}"));

    let mut summaries = Vec::with_capacity(grouped.len());

    for (ein, entity) in grouped {
        match summarize_entity(resolver, relation, &ein, entity, options.home_zip_policy) {
            Ok(summary) => summaries.push(summary),
            Err(e) => {
                log::error!("Failed to summarize {relation} for foundation {ein}: {e}");
                skipped.push(SkippedEntity {
                    ein,
                    reason: e.to_string(),
                });
            }
        }
        progress.inc(1);
    }

    progress.finish(format!(
        "{relation}: {} summarized, {} skipped",
        summaries.len(),
        skipped.len()
    ));

    Ok(AnalysisOutcome {
        relation,
        rows_read,
        summaries,
        skipped,
        truncated,
    })
}

fn summarize_entity<S: CoordinateStore>(
    resolver: &mut ZipResolver<S>,
    relation: Relation,
    ein: &str,
    entity: EntityRows,
    policy: HomeZipPolicy,
) -> Result<GeoSummary, GeoError> {
    if policy == HomeZipPolicy::Strict
        && let (Some(first), Some(conflicting)) = (&entity.home_zip, entity.conflicting_home_zip)
    {
        return Err(GeoError::HomeZipMismatch {
            ein: ein.to_string(),
            first: first.clone(),
            conflicting,
        });
    }

    let centroid = summarize(resolver, &entity.related);

    let entity_to_centroid_distance = centroid.center.and_then(|center| {
        let home = entity.home_zip.as_deref()?;
        let home_coord = resolver.resolve(home).coordinate()?;
        Some(haversine_miles(home_coord, center))
    });

    Ok(GeoSummary {
        ein: ein.to_string(),
        relation,
        member_count: u32::try_from(entity.related.len()).unwrap_or(u32::MAX),
        resolved_count: u32::try_from(centroid.resolved).unwrap_or(u32::MAX),
        centroid: centroid.center,
        dispersion: centroid.dispersion,
        entity_to_centroid_distance,
    })
}

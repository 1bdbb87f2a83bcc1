#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Composite foundation scoring.
//!
//! [`CompositeScorer`] joins a foundation's name, mission similarity, grant
//! volume, grant geography, and distance to the target into one
//! [`ScoredResult`]. [`score_all_filers`] runs it over every foundation on
//! file, isolating failures so one bad record never stops a full run.

pub mod criteria;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use grant_scout_geo::progress::ProgressCallback;
use grant_scout_geo::target::{FoundationGeoSource, TargetDistanceCalculator};
use grant_scout_geo::{CoordinateStore, GeoError, SourceError, ZipResolver};
use grant_scout_geo_models::{GrantStats, ScoredResult};
use uuid::Uuid;

pub use criteria::ScoringCriteria;

/// Errors raised while scoring.
#[derive(Debug, thiserror::Error)]
pub enum ScoringError {
    /// A metadata, similarity, or grant-volume collaborator failed.
    #[error("Source error: {0}")]
    Source(#[source] SourceError),

    /// Geographic data for the foundation could not be loaded.
    #[error(transparent)]
    Geo(#[from] GeoError),
}

impl ScoringError {
    fn from_source<E: std::error::Error + Send + Sync + 'static>(e: E) -> Self {
        Self::Source(Box::new(e))
    }
}

/// Foundation metadata, mission similarity, and grant volume.
pub trait ScoringSource {
    /// Storage error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Every foundation EIN on file.
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the listing query fails.
    fn list_entity_ids(&self) -> Result<Vec<String>, Self::Error>;

    /// Display name for a foundation.
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the lookup fails.
    fn foundation_name(&self, ein: &str) -> Result<Option<String>, Self::Error>;

    /// Mission-statement similarity, produced by an external embedding job.
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the lookup fails.
    fn similarity(&self, ein: &str) -> Result<Option<f64>, Self::Error>;

    /// Grant count and average amount.
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the aggregate query fails.
    fn grant_stats(&self, ein: &str) -> Result<GrantStats, Self::Error>;
}

/// Destination for scored results, keyed by EIN with last-write-wins.
pub trait ScoredResultSink {
    /// Storage error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Inserts or replaces the result for `result.ein`.
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the write fails.
    fn upsert_scored(&self, result: &ScoredResult) -> Result<(), Self::Error>;
}

/// Scores foundations against one target for one run.
#[derive(Debug, Clone)]
pub struct CompositeScorer {
    criteria: ScoringCriteria,
    target: TargetDistanceCalculator,
    scored_date: DateTime<Utc>,
    run_id: Uuid,
}

impl CompositeScorer {
    /// Starts a run: resolves the target ZIP and stamps the run time and id.
    pub fn new<S: CoordinateStore>(
        resolver: &mut ZipResolver<S>,
        target_zip: &str,
        criteria: ScoringCriteria,
    ) -> Self {
        Self::with_run(
            TargetDistanceCalculator::new(resolver, target_zip),
            criteria,
            Utc::now(),
            Uuid::new_v4(),
        )
    }

    /// Builds a scorer with an explicit run timestamp and id.
    #[must_use]
    pub const fn with_run(
        target: TargetDistanceCalculator,
        criteria: ScoringCriteria,
        scored_date: DateTime<Utc>,
        run_id: Uuid,
    ) -> Self {
        Self {
            criteria,
            target,
            scored_date,
            run_id,
        }
    }

    /// Run identifier stamped on every result.
    #[must_use]
    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Run timestamp stamped on every result.
    #[must_use]
    pub const fn scored_date(&self) -> DateTime<Utc> {
        self.scored_date
    }

    /// Scores one foundation.
    ///
    /// Returns `Ok(None)` when the foundation has no geographic data at
    /// all; such foundations are excluded rather than scored with empty
    /// fields.
    ///
    /// # Errors
    ///
    /// Returns [`ScoringError`] if any collaborator fails for this
    /// foundation.
    pub fn score<S, G>(
        &self,
        resolver: &mut ZipResolver<S>,
        source: &G,
        ein: &str,
    ) -> Result<Option<ScoredResult>, ScoringError>
    where
        S: CoordinateStore,
        G: ScoringSource + FoundationGeoSource,
    {
        let Some(geo) = FoundationGeoSource::foundation_geo(source, ein)
            .map_err(|e| GeoError::Source(Box::new(e)))?
        else {
            log::debug!("Foundation {ein} has no geo data; excluded");
            return Ok(None);
        };

        let Some(distances) = self.target.distances_for_geo(resolver, &geo) else {
            log::debug!("Foundation {ein} has no target distances; excluded");
            return Ok(None);
        };

        let name = source
            .foundation_name(ein)
            .map_err(ScoringError::from_source)?
            .unwrap_or_else(|| ein.to_string());
        let semantic_similarity = source.similarity(ein).map_err(ScoringError::from_source)?;
        let stats = source.grant_stats(ein).map_err(ScoringError::from_source)?;

        let (grant_center, geographic_coverage) = geo.grants.as_ref().map_or((None, None), |g| {
            let sample = g.member_count.min(g.resolved_count);
            (g.centroid, self.criteria.coverage(sample, g.dispersion))
        });

        let distance_to_target = distances.recipients;
        let score = self.criteria.composite(
            semantic_similarity,
            stats.count,
            stats.average_amount,
            distance_to_target,
        );

        Ok(Some(ScoredResult {
            ein: ein.to_string(),
            name,
            score,
            semantic_similarity,
            total_relevant_grants: stats.count,
            avg_grant_size: stats.average_amount,
            geographic_coverage,
            grant_center,
            distance_to_target,
            scored_date: self.scored_date,
            run_id: self.run_id,
        }))
    }
}

/// Counts from one full scoring run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScoringReport {
    /// Foundations attempted.
    pub processed: u64,
    /// Results written.
    pub written: u64,
    /// Foundations with no geographic data.
    pub excluded: u64,
    /// EINs whose scoring failed.
    pub failed: Vec<String>,
    /// EINs whose result could not be written.
    pub write_failed: Vec<String>,
}

/// Scores and persists every foundation on file.
///
/// Each foundation is isolated: a scoring or write failure is logged and the
/// run moves on.
///
/// # Errors
///
/// Returns [`ScoringError::Source`] only if the foundation listing itself
/// fails.
pub fn score_all_filers<S, G, K>(
    scorer: &CompositeScorer,
    resolver: &mut ZipResolver<S>,
    source: &G,
    sink: &K,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<ScoringReport, ScoringError>
where
    S: CoordinateStore,
    G: ScoringSource + FoundationGeoSource,
    K: ScoredResultSink,
{
    let eins = source.list_entity_ids().map_err(|e| {
        log::error!("Failed to list foundations: {e}");
        ScoringError::from_source(e)
    })?;

    log::info!(
        "Scoring {} foundations (run {}, target {})",
        eins.len(),
        scorer.run_id,
        scorer.target.target_zip()
    );
    progress.set_total(eins.len() as u64);
    progress.set_message("Scoring foundations".to_string());

    let mut report = ScoringReport::default();

    for ein in eins {
        report.processed += 1;

        match scorer.score(resolver, source, &ein) {
            Ok(Some(result)) => match sink.upsert_scored(&result) {
                Ok(()) => report.written += 1,
                Err(e) => {
                    log::error!("Failed to write scored result {result:?}: {e}");
                    report.write_failed.push(ein);
                }
            },
            Ok(None) => report.excluded += 1,
            Err(e) => {
                log::error!("Failed to score foundation {ein}: {e:?}");
                report.failed.push(ein);
            }
        }

        progress.inc(1);
    }

    progress.finish(format!(
        "Scored {} foundations ({} written, {} excluded, {} failed)",
        report.processed,
        report.written,
        report.excluded,
        report.failed.len() + report.write_failed.len()
    ));

    Ok(report)
}

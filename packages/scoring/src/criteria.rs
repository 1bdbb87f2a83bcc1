//! Weights and thresholds for the composite score.

use serde::Deserialize;

/// Scoring weights and thresholds, loaded from the `[scoring]` config table.
///
/// Every component is normalized into `0..=1` before weighting, and the
/// composite is the weighted mean of the components.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScoringCriteria {
    /// Weight of mission-statement similarity.
    pub semantic_weight: f64,
    /// Weight of average grant size.
    pub grant_size_weight: f64,
    /// Weight of proximity between the target and the grant centroid.
    pub geographic_weight: f64,
    /// Average grant size (dollars) that earns the full grant-size component.
    pub min_grant_size: f64,
    /// Distance (miles) at which the proximity component falls to one half.
    pub proximity_scale_miles: f64,
    /// Minimum grant members before dispersion is reported as coverage.
    pub min_coverage_members: u32,
}

impl Default for ScoringCriteria {
    fn default() -> Self {
        Self {
            semantic_weight: 1.0,
            grant_size_weight: 1.0,
            geographic_weight: 1.0,
            min_grant_size: 10_000.0,
            proximity_scale_miles: 100.0,
            min_coverage_members: 3,
        }
    }
}

impl ScoringCriteria {
    /// Similarity clamped to `0..=1`; missing similarity scores zero.
    #[must_use]
    pub fn semantic_component(&self, similarity: Option<f64>) -> f64 {
        similarity
            .filter(|s| s.is_finite())
            .map_or(0.0, |s| s.clamp(0.0, 1.0))
    }

    /// Average grant size relative to `min_grant_size`, capped at 1.
    #[must_use]
    pub fn grant_size_component(&self, grant_count: u64, avg_grant_size: f64) -> f64 {
        if grant_count == 0 || !avg_grant_size.is_finite() || avg_grant_size <= 0.0 {
            return 0.0;
        }
        if self.min_grant_size <= 0.0 {
            return 1.0;
        }
        (avg_grant_size / self.min_grant_size).min(1.0)
    }

    /// `1 / (1 + miles / proximity_scale_miles)`; unknown distance scores
    /// zero.
    #[must_use]
    pub fn geographic_component(&self, distance_to_target: Option<f64>) -> f64 {
        let Some(miles) = distance_to_target.filter(|d| d.is_finite() && *d >= 0.0) else {
            return 0.0;
        };
        if self.proximity_scale_miles <= 0.0 {
            return if miles == 0.0 { 1.0 } else { 0.0 };
        }
        1.0 / (1.0 + miles / self.proximity_scale_miles)
    }

    /// Weighted mean of the three components. Zero when all weights are
    /// zero.
    #[must_use]
    pub fn composite(
        &self,
        similarity: Option<f64>,
        grant_count: u64,
        avg_grant_size: f64,
        distance_to_target: Option<f64>,
    ) -> f64 {
        let weights = [
            self.semantic_weight.max(0.0),
            self.grant_size_weight.max(0.0),
            self.geographic_weight.max(0.0),
        ];
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return 0.0;
        }

        let components = [
            self.semantic_component(similarity),
            self.grant_size_component(grant_count, avg_grant_size),
            self.geographic_component(distance_to_target),
        ];

        weights
            .iter()
            .zip(components)
            .map(|(w, c)| w * c)
            .sum::<f64>()
            / total
    }

    /// Dispersion as reported coverage, suppressed below
    /// `min_coverage_members`.
    #[must_use]
    pub fn coverage(&self, member_count: u32, dispersion: Option<f64>) -> Option<f64> {
        if member_count < self.min_coverage_members {
            return None;
        }
        dispersion
    }
}

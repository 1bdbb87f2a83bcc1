//! Scoring inputs and the `grant_analysis_results` table.

use duckdb::params;
use grant_scout_geo_models::{Candidate, GrantStats, ScoredResult};
use grant_scout_scoring::{ScoredResultSink, ScoringSource};

use crate::{DbError, FoundationDb};

/// Timestamp format bound into `TIMESTAMP` columns.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Sort order for candidate listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CandidateOrder {
    /// Highest composite score first.
    #[default]
    Score,
    /// Nearest grant centroid first; unknown distances last.
    Distance,
}

impl CandidateOrder {
    const fn order_by(self) -> &'static str {
        match self {
            Self::Score => "r.score DESC, r.ein",
            Self::Distance => "r.distance_to_target ASC NULLS LAST, r.score DESC, r.ein",
        }
    }
}

fn count_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

impl FoundationDb {
    /// Lists stored scored results joined with filer location.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub fn top_candidates(
        &self,
        limit: usize,
        order: CandidateOrder,
    ) -> Result<Vec<Candidate>, DbError> {
        let sql = format!(
            "SELECT f.state, f.zipcode, r.ein, r.name, r.score, r.semantic_similarity,
                    r.total_relevant_grants, r.avg_grant_size, r.distance_to_target
             FROM grant_analysis_results r
             LEFT JOIN filer f ON f.ein = r.ein
             ORDER BY {}
             LIMIT ?",
            order.order_by()
        );

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params![limit])?;

        let mut candidates = Vec::new();
        while let Some(row) = rows.next()? {
            let total: i64 = row.get(6)?;
            candidates.push(Candidate {
                state: row.get(0)?,
                zipcode: row.get(1)?,
                ein: row.get(2)?,
                name: row.get(3)?,
                score: row.get(4)?,
                semantic_similarity: row.get(5)?,
                total_relevant_grants: count_u64(total),
                avg_grant_size: row.get(7)?,
                distance_to_target: row.get(8)?,
            });
        }

        Ok(candidates)
    }
}

impl ScoringSource for FoundationDb {
    type Error = DbError;

    fn list_entity_ids(&self) -> Result<Vec<String>, DbError> {
        let mut stmt = self.conn.prepare("SELECT ein FROM filer ORDER BY ein")?;
        let mut rows = stmt.query([])?;

        let mut eins = Vec::new();
        while let Some(row) = rows.next()? {
            eins.push(row.get(0)?);
        }

        Ok(eins)
    }

    fn foundation_name(&self, ein: &str) -> Result<Option<String>, DbError> {
        let mut stmt = self.conn.prepare("SELECT name FROM filer WHERE ein = ?")?;
        let mut rows = stmt.query(params![ein])?;

        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        let name: Option<String> = row.get(0)?;

        Ok(name.filter(|n| !n.trim().is_empty()))
    }

    fn similarity(&self, ein: &str) -> Result<Option<f64>, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT MAX(similarity_score) FROM grant_semantic_score WHERE ein = ?")?;
        let similarity: Option<f64> = stmt.query_row(params![ein], |row| row.get(0))?;
        Ok(similarity)
    }

    fn grant_stats(&self, ein: &str) -> Result<GrantStats, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT COUNT(*), AVG(amount) FROM grants WHERE ein = ?")?;
        let (count, average): (i64, Option<f64>) =
            stmt.query_row(params![ein], |row| Ok((row.get(0)?, row.get(1)?)))?;

        Ok(GrantStats {
            count: count_u64(count),
            average_amount: average.unwrap_or(0.0),
        })
    }
}

impl ScoredResultSink for FoundationDb {
    type Error = DbError;

    fn upsert_scored(&self, result: &ScoredResult) -> Result<(), DbError> {
        let total = i64::try_from(result.total_relevant_grants).map_err(|_| DbError::Conversion {
            message: format!(
                "grant count {} for {} exceeds BIGINT",
                result.total_relevant_grants, result.ein
            ),
        })?;

        let mut stmt = self.conn.prepare(
            "INSERT INTO grant_analysis_results (
                ein, name, score, semantic_similarity, total_relevant_grants,
                avg_grant_size, geographic_coverage, grant_center,
                distance_to_target, scored_date, run_id
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (ein) DO UPDATE SET
                name = EXCLUDED.name,
                score = EXCLUDED.score,
                semantic_similarity = EXCLUDED.semantic_similarity,
                total_relevant_grants = EXCLUDED.total_relevant_grants,
                avg_grant_size = EXCLUDED.avg_grant_size,
                geographic_coverage = EXCLUDED.geographic_coverage,
                grant_center = EXCLUDED.grant_center,
                distance_to_target = EXCLUDED.distance_to_target,
                scored_date = EXCLUDED.scored_date,
                run_id = EXCLUDED.run_id",
        )?;

        stmt.raw_bind_parameter(1, &result.ein)?;
        stmt.raw_bind_parameter(2, &result.name)?;
        stmt.raw_bind_parameter(3, result.score)?;
        stmt.raw_bind_parameter(4, result.semantic_similarity)?;
        stmt.raw_bind_parameter(5, total)?;
        stmt.raw_bind_parameter(6, result.avg_grant_size)?;
        stmt.raw_bind_parameter(7, result.geographic_coverage)?;
        stmt.raw_bind_parameter(8, result.grant_center.map(|c| c.to_wkt()))?;
        stmt.raw_bind_parameter(9, result.distance_to_target)?;
        stmt.raw_bind_parameter(10, result.scored_date.format(TIMESTAMP_FORMAT).to_string())?;
        stmt.raw_bind_parameter(11, result.run_id.to_string())?;
        stmt.raw_execute()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use grant_scout_geo::ZipResolver;
    use grant_scout_geo::progress::null_progress;
    use grant_scout_geo::target::TargetDistanceCalculator;
    use grant_scout_geo_models::Relation;
    use grant_scout_scoring::{CompositeScorer, ScoringCriteria, score_all_filers};

    use super::*;
    use crate::geo_scores::tests::{analyze_into, seeded_corpus};

    fn analyzed_corpus() -> FoundationDb {
        let db = seeded_corpus();
        analyze_into(&db, Relation::Grants);
        analyze_into(&db, Relation::KeyContacts);
        db
    }

    fn stored_rows(db: &FoundationDb) -> i64 {
        db.conn()
            .query_row("SELECT COUNT(*) FROM grant_analysis_results", [], |row| {
                row.get(0)
            })
            .unwrap()
    }

    #[test]
    fn reads_scoring_inputs() {
        let db = seeded_corpus();

        assert_eq!(db.list_entity_ids().unwrap(), vec!["E1", "E2", "E3"]);
        assert_eq!(
            db.foundation_name("E2").unwrap().as_deref(),
            Some("Harbor Trust")
        );
        assert_eq!(db.foundation_name("NOPE").unwrap(), None);
        assert_eq!(db.similarity("E1").unwrap(), Some(0.8));
        assert_eq!(db.similarity("E3").unwrap(), None);

        let stats = db.grant_stats("E1").unwrap();
        assert_eq!(stats.count, 4);
        assert!((stats.average_amount - 9_500.0).abs() < 1e-9);
        assert_eq!(db.grant_stats("E3").unwrap(), GrantStats::default());
    }

    #[test]
    fn scores_every_filer_end_to_end() {
        let db = analyzed_corpus();
        let mut resolver = ZipResolver::new(&db);
        let scorer = CompositeScorer::new(&mut resolver, "10001", ScoringCriteria::default());

        let report = score_all_filers(&scorer, &mut resolver, &db, &db, &null_progress()).unwrap();

        assert_eq!(report.processed, 3);
        assert_eq!(report.written, 2);
        assert_eq!(report.excluded, 1);
        assert!(report.failed.is_empty());
        assert_eq!(stored_rows(&db), 2);

        let expected = TargetDistanceCalculator::new(&mut resolver, "10001")
            .distances_to_target(&mut resolver, &db, "E2")
            .unwrap()
            .unwrap();

        let (distance, scored_date, run_id, center, coverage): (
            Option<f64>,
            Option<String>,
            String,
            Option<String>,
            Option<f64>,
        ) = db
            .conn()
            .query_row(
                "SELECT distance_to_target, CAST(scored_date AS VARCHAR), run_id,
                        grant_center, geographic_coverage
                 FROM grant_analysis_results WHERE ein = 'E2'",
                [],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                    ))
                },
            )
            .unwrap();

        assert_eq!(distance, expected.recipients);
        assert!(scored_date.is_some());
        assert_eq!(run_id, scorer.run_id().to_string());
        assert!(center.unwrap().starts_with("POINT("));
        assert_eq!(coverage, None);
    }

    #[test]
    fn rescoring_replaces_rows() {
        let db = analyzed_corpus();
        let mut resolver = ZipResolver::new(&db);

        let first = CompositeScorer::new(&mut resolver, "10001", ScoringCriteria::default());
        score_all_filers(&first, &mut resolver, &db, &db, &null_progress()).unwrap();
        let second = CompositeScorer::new(&mut resolver, "10001", ScoringCriteria::default());
        score_all_filers(&second, &mut resolver, &db, &db, &null_progress()).unwrap();

        assert_eq!(stored_rows(&db), 2);
        let run_ids: i64 = db
            .conn()
            .query_row(
                "SELECT COUNT(DISTINCT run_id) FROM grant_analysis_results",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(run_ids, 1);
    }

    #[test]
    fn lists_candidates_in_either_order() {
        let db = analyzed_corpus();
        let mut resolver = ZipResolver::new(&db);
        let scorer = CompositeScorer::new(&mut resolver, "10001", ScoringCriteria::default());
        score_all_filers(&scorer, &mut resolver, &db, &db, &null_progress()).unwrap();

        let by_score = db.top_candidates(10, CandidateOrder::Score).unwrap();
        let eins: Vec<_> = by_score.iter().map(|c| c.ein.as_str()).collect();
        assert_eq!(eins, vec!["E1", "E2"]);
        assert_eq!(by_score[0].state.as_deref(), Some("TX"));
        assert_eq!(by_score[0].total_relevant_grants, 4);

        let by_distance = db.top_candidates(10, CandidateOrder::Distance).unwrap();
        let eins: Vec<_> = by_distance.iter().map(|c| c.ein.as_str()).collect();
        assert_eq!(eins, vec!["E2", "E1"]);

        assert_eq!(db.top_candidates(1, CandidateOrder::Score).unwrap().len(), 1);
    }
}

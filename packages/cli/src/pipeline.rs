//! Analyze and score passes over the foundation database.
//!
//! Both passes share one [`ZipResolver`] so a full `run` resolves each ZIP
//! against `DuckDB` at most once.

use std::time::Instant;

use grant_scout_cli_utils::{IndicatifProgress, MultiProgress};
use grant_scout_database::FoundationDb;
use grant_scout_database::geo_scores::GeoWriteReport;
use grant_scout_geo::ZipResolver;
use grant_scout_geo::analyzer::{AnalyzeOptions, SkippedEntity, analyze};
use grant_scout_geo_models::Relation;
use grant_scout_scoring::{CompositeScorer, ScoringCriteria, ScoringReport, score_all_filers};

/// Counts from one relation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalyzeReport {
    /// Rows read from the relation query.
    pub rows_read: u64,
    /// Foundations summarized.
    pub summarized: u64,
    /// Foundations skipped by a per-foundation failure.
    pub skipped: Vec<SkippedEntity>,
    /// Persistence counts.
    pub write: GeoWriteReport,
}

/// The row cap ended a relation pass early, so nothing was written.
#[derive(Debug, thiserror::Error)]
#[error("{relation}: row cap of {max_rows} reached before all rows were read; stored summaries left unchanged")]
pub struct TruncatedPass {
    /// Relation being analyzed.
    pub relation: Relation,
    /// Cap in effect.
    pub max_rows: u64,
}

/// Analyzes one relation and replaces its stored summaries.
///
/// # Errors
///
/// Returns an error if the relation query or the column reset fails, or
/// [`TruncatedPass`] if the row cap was reached. A truncated pass writes
/// nothing.
pub fn run_analyze(
    db: &FoundationDb,
    resolver: &mut ZipResolver<&FoundationDb>,
    relation: Relation,
    options: AnalyzeOptions,
    multi: &MultiProgress,
) -> Result<AnalyzeReport, Box<dyn std::error::Error>> {
    let start = Instant::now();
    let progress = IndicatifProgress::analysis_bar(multi, &format!("Analyzing {relation}"));

    let outcome = db.with_relation_rows(relation, |rows| {
        analyze(resolver, relation, rows, options, &progress)
    })??;

    if outcome.truncated {
        return Err(TruncatedPass {
            relation,
            max_rows: options.max_rows,
        }
        .into());
    }

    let write = db.write_geo_summaries(relation, &outcome.summaries)?;

    let report = AnalyzeReport {
        rows_read: outcome.rows_read,
        summarized: outcome.summaries.len() as u64,
        skipped: outcome.skipped,
        write,
    };

    log::info!(
        "{relation}: {} rows, {} summarized, {} skipped, {} written, {} write failures in {:.1}s",
        report.rows_read,
        report.summarized,
        report.skipped.len(),
        report.write.written,
        report.write.failed,
        start.elapsed().as_secs_f64()
    );

    Ok(report)
}

/// Scores every foundation against `target_zip` and persists the results.
///
/// # Errors
///
/// Returns an error only if the foundation listing fails.
pub fn run_score(
    db: &FoundationDb,
    resolver: &mut ZipResolver<&FoundationDb>,
    target_zip: &str,
    criteria: ScoringCriteria,
    multi: &MultiProgress,
) -> Result<ScoringReport, Box<dyn std::error::Error>> {
    let start = Instant::now();
    let scorer = CompositeScorer::new(resolver, target_zip, criteria);
    let progress = IndicatifProgress::scoring_bar(multi, "Scoring foundations");

    let report = score_all_filers(&scorer, resolver, db, db, &progress)?;

    log::info!(
        "Scoring run {} finished in {:.1}s",
        scorer.run_id(),
        start.elapsed().as_secs_f64()
    );

    Ok(report)
}

/// Prints the final counts of a scoring run.
pub fn print_scoring_report(report: &ScoringReport) {
    println!(
        "Processed {} foundations: {} written, {} excluded, {} failed, {} write failures",
        report.processed,
        report.written,
        report.excluded,
        report.failed.len(),
        report.write_failed.len()
    );
    for ein in report.failed.iter().chain(&report.write_failed) {
        println!("  failed: {ein}");
    }
}

/// Prints the final counts of one relation pass.
pub fn print_analyze_report(relation: Relation, report: &AnalyzeReport) {
    println!("{}", format_analyze_report(relation, report));
}

fn format_analyze_report(relation: Relation, report: &AnalyzeReport) -> String {
    let mut out = format!(
        "{relation}: {} foundations summarized, {} skipped, {} written, {} write failures",
        report.summarized,
        report.skipped.len(),
        report.write.written,
        report.write.failed
    );
    for skipped in &report.skipped {
        out.push_str(&format!("\n  skipped: {} ({})", skipped.ein, skipped.reason));
    }
    out
}

#[cfg(test)]
mod tests {
    use grant_scout_geo::target::FoundationGeoSource;

    use super::*;

    fn austin_db() -> FoundationDb {
        let db = FoundationDb::open_in_memory().unwrap();
        db.import_zip_reader(
            "zipcode,latitude,longitude
78701,30.2711,-97.7437
78702,30.2638,-97.7166
78703,30.2907,-97.7684
"
            .as_bytes(),
        )
        .unwrap();
        db.conn()
            .execute_batch(
                "INSERT INTO filer VALUES ('E1', 'Austin Arts Fund', '78701', 'TX');
                 INSERT INTO grants VALUES
                    ('E1', '78701', 5000, 'arts'),
                    ('E1', '78702', 12000, 'arts'),
                    ('E1', '78703', 20000, 'music');",
            )
            .unwrap();
        db
    }

    fn stored_grant_count(db: &FoundationDb) -> Option<u32> {
        db.foundation_geo("E1")
            .unwrap()
            .and_then(|geo| geo.grants)
            .map(|grants| grants.member_count)
    }

    #[test]
    fn truncated_pass_keeps_stored_summaries() {
        let db = austin_db();
        let multi = MultiProgress::new();
        let mut resolver = ZipResolver::new(&db);

        let report = run_analyze(
            &db,
            &mut resolver,
            Relation::Grants,
            AnalyzeOptions::default(),
            &multi,
        )
        .unwrap();
        assert_eq!(report.write.written, 1);
        assert_eq!(stored_grant_count(&db), Some(3));

        let capped = AnalyzeOptions {
            max_rows: 2,
            ..AnalyzeOptions::default()
        };
        let err = run_analyze(&db, &mut resolver, Relation::Grants, capped, &multi).unwrap_err();

        assert!(err.downcast_ref::<TruncatedPass>().is_some());
        assert_eq!(stored_grant_count(&db), Some(3));
    }

    #[test]
    fn analyze_report_lists_skipped_foundations() {
        let report = AnalyzeReport {
            rows_read: 5,
            summarized: 1,
            skipped: vec![SkippedEntity {
                ein: "E7".to_string(),
                reason: "Foundation E7 has conflicting home ZIPs: 78701 vs 90210".to_string(),
            }],
            write: GeoWriteReport {
                written: 1,
                failed: 0,
            },
        };

        let text = format_analyze_report(Relation::Grants, &report);
        let lines: Vec<_> = text.lines().collect();

        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("1 foundations summarized, 1 skipped"));
        assert_eq!(
            lines[1],
            "  skipped: E7 (Foundation E7 has conflicting home ZIPs: 78701 vs 90210)"
        );
    }
}

//! Relation row streams and the `grant_geo_score` table.
//!
//! Each relation owns its own column set in `grant_geo_score`, so writing
//! the grants pass never touches key-contact columns and vice versa.

use duckdb::params;
use grant_scout_geo::target::FoundationGeoSource;
use grant_scout_geo_models::{CoordinatePair, FoundationGeo, GeoSummary, Relation, RelationRow};

use crate::{DbError, FoundationDb, count_u32};

/// Maximum summaries per multi-row upsert.
const CHUNK_SIZE: usize = 500;

/// Column set owned by each relation, in
/// `(count, resolved, latitude, longitude, dispersion, home distance)`
/// order.
const fn relation_columns(relation: Relation) -> [&'static str; 6] {
    match relation {
        Relation::Grants => [
            "grant_count",
            "grant_resolved",
            "latitude",
            "longitude",
            "deviation",
            "filer_to_centroid",
        ],
        Relation::KeyContacts => [
            "key_count",
            "key_resolved",
            "key_latitude",
            "key_longitude",
            "key_deviation",
            "filer_to_key_centroid",
        ],
    }
}

const fn relation_query(relation: Relation) -> &'static str {
    match relation {
        Relation::Grants => {
            "SELECT g.ein, f.name, f.zipcode, g.zipcode, CAST(g.amount AS VARCHAR)
             FROM grants g
             LEFT JOIN filer f ON f.ein = g.ein
             ORDER BY g.ein"
        }
        Relation::KeyContacts => {
            "SELECT k.ein, f.name, f.zipcode, k.zipcode, k.title
             FROM key_contacts k
             LEFT JOIN filer f ON f.ein = k.ein
             ORDER BY k.ein"
        }
    }
}

/// Counts from persisting one relation's summaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GeoWriteReport {
    /// Summaries upserted.
    pub written: u64,
    /// Summaries in chunks that failed and were rolled back.
    pub failed: u64,
}

impl FoundationDb {
    /// Streams one relation's `(foundation, related ZIP)` rows into `f`.
    ///
    /// The stream runs on a cloned connection so `f` may query this
    /// database (e.g. through a resolver) while rows are still being read.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query cannot be started. Errors reading
    /// individual rows are yielded through the iterator.
    pub fn with_relation_rows<T>(
        &self,
        relation: Relation,
        f: impl FnOnce(&mut dyn Iterator<Item = Result<RelationRow, DbError>>) -> T,
    ) -> Result<T, DbError> {
        let conn = self.conn.try_clone()?;
        let mut stmt = conn.prepare(relation_query(relation))?;

        let rows = stmt.query_map([], |row| {
            Ok(RelationRow {
                ein: row.get(0)?,
                foundation_name: row.get(1)?,
                home_zip: row.get(2)?,
                related_zip: row.get(3)?,
                detail: row.get(4)?,
            })
        })?;

        let mut rows = rows.map(|row| row.map_err(DbError::from));
        Ok(f(&mut rows))
    }

    /// Replaces one relation's stored summaries with `summaries`.
    ///
    /// The relation's columns are cleared first so foundations that
    /// dropped out of the source do not keep stale values. Summaries are
    /// then upserted in chunks, each in its own transaction; a failing
    /// chunk is rolled back, logged, and counted without stopping the
    /// rest.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] only if clearing the relation's columns fails.
    pub fn write_geo_summaries(
        &self,
        relation: Relation,
        summaries: &[GeoSummary],
    ) -> Result<GeoWriteReport, DbError> {
        self.write_geo_summaries_in_chunks(relation, summaries, CHUNK_SIZE)
    }

    fn write_geo_summaries_in_chunks(
        &self,
        relation: Relation,
        summaries: &[GeoSummary],
        chunk_size: usize,
    ) -> Result<GeoWriteReport, DbError> {
        let columns = relation_columns(relation);

        let reset = columns
            .iter()
            .map(|c| format!("{c} = NULL"))
            .collect::<Vec<_>>()
            .join(", ");
        let cleared = self
            .conn
            .execute(&format!("UPDATE grant_geo_score SET {reset}"), [])?;
        log::debug!("Cleared {relation} columns on {cleared} rows");

        let mut report = GeoWriteReport::default();

        for chunk in summaries.chunks(chunk_size) {
            match self.in_transaction(|conn| upsert_chunk(conn, columns, chunk)) {
                Ok(rows) => report.written += rows,
                Err(e) => {
                    log::error!(
                        "Failed to write {} {relation} summaries starting at {}: {e}",
                        chunk.len(),
                        chunk[0].ein
                    );
                    report.failed += chunk.len() as u64;
                }
            }
        }

        log::info!(
            "Wrote {} {relation} summaries ({} failed)",
            report.written,
            report.failed
        );
        Ok(report)
    }
}

fn upsert_chunk(
    conn: &duckdb::Connection,
    columns: [&str; 6],
    chunk: &[GeoSummary],
) -> Result<u64, DbError> {
    let mut sql = format!(
        "INSERT INTO grant_geo_score (ein, {}) VALUES ",
        columns.join(", ")
    );

    for (i, _) in chunk.iter().enumerate() {
        if i > 0 {
            sql.push_str(", ");
        }
        sql.push_str("(?, ?, ?, ?, ?, ?, ?)");
    }

    sql.push_str(" ON CONFLICT (ein) DO UPDATE SET ");
    sql.push_str(
        &columns
            .iter()
            .map(|c| format!("{c} = EXCLUDED.{c}"))
            .collect::<Vec<_>>()
            .join(", "),
    );

    let mut stmt = conn.prepare(&sql)?;
    let mut param_idx = 1usize;

    for summary in chunk {
        let center = summary.centroid;

        stmt.raw_bind_parameter(param_idx, &summary.ein)?;
        stmt.raw_bind_parameter(param_idx + 1, i64::from(summary.member_count))?;
        stmt.raw_bind_parameter(param_idx + 2, i64::from(summary.resolved_count))?;
        stmt.raw_bind_parameter(param_idx + 3, center.map(|c| c.latitude))?;
        stmt.raw_bind_parameter(param_idx + 4, center.map(|c| c.longitude))?;
        stmt.raw_bind_parameter(param_idx + 5, summary.dispersion)?;
        stmt.raw_bind_parameter(param_idx + 6, summary.entity_to_centroid_distance)?;

        param_idx += 7;
    }

    let rows = stmt.raw_execute()?;
    Ok(u64::try_from(rows).unwrap_or(0))
}

/// Reads one relation's summary from the six columns starting at `offset`.
fn summary_from_row(
    row: &duckdb::Row<'_>,
    ein: &str,
    relation: Relation,
    offset: usize,
) -> Result<Option<GeoSummary>, duckdb::Error> {
    let Some(count) = row.get::<_, Option<i64>>(offset)? else {
        return Ok(None);
    };
    let resolved: Option<i64> = row.get(offset + 1)?;
    let latitude: Option<f64> = row.get(offset + 2)?;
    let longitude: Option<f64> = row.get(offset + 3)?;

    Ok(Some(GeoSummary {
        ein: ein.to_string(),
        relation,
        member_count: count_u32(count),
        resolved_count: count_u32(resolved.unwrap_or(0)),
        centroid: latitude
            .zip(longitude)
            .and_then(|(lat, lng)| CoordinatePair::new(lat, lng)),
        dispersion: row.get(offset + 4)?,
        entity_to_centroid_distance: row.get(offset + 5)?,
    }))
}

impl FoundationGeoSource for FoundationDb {
    type Error = DbError;

    fn foundation_geo(&self, ein: &str) -> Result<Option<FoundationGeo>, DbError> {
        let grants = relation_columns(Relation::Grants);
        let key_contacts = relation_columns(Relation::KeyContacts);
        let sql = format!(
            "SELECT f.zipcode, {}, {}
             FROM grant_geo_score s
             LEFT JOIN filer f ON f.ein = s.ein
             WHERE s.ein = ?",
            grants.map(|c| format!("s.{c}")).join(", "),
            key_contacts.map(|c| format!("s.{c}")).join(", "),
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params![ein])?;

        let Some(row) = rows.next()? else {
            return Ok(None);
        };

        let home_zip: Option<String> = row.get(0)?;
        let grants = summary_from_row(row, ein, Relation::Grants, 1)?;
        let key_contacts = summary_from_row(row, ein, Relation::KeyContacts, 7)?;

        if grants.is_none() && key_contacts.is_none() {
            return Ok(None);
        }

        Ok(Some(FoundationGeo {
            ein: ein.to_string(),
            home_zip,
            grants,
            key_contacts,
        }))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use grant_scout_geo::ZipResolver;
    use grant_scout_geo::analyzer::{AnalyzeOptions, analyze};
    use grant_scout_geo::progress::null_progress;

    use super::*;

    /// Three foundations: an Austin funder, a New York funder, and one
    /// with no grants or contacts on file.
    pub fn seeded_corpus() -> FoundationDb {
        let db = FoundationDb::open_in_memory().unwrap();
        db.import_zip_reader(
            "zipcode,latitude,longitude
90210,34.0901,-118.4065
10001,40.7500,-73.9967
02134,42.3539,-71.1337
78701,30.2711,-97.7437
78702,30.2638,-97.7166
78703,30.2907,-97.7684
"
            .as_bytes(),
        )
        .unwrap();

        db.conn()
            .execute_batch(
                "INSERT INTO filer VALUES
                    ('E1', 'Austin Arts Fund', '78701', 'TX'),
                    ('E2', 'Harbor Trust', '10001-2203', 'NY'),
                    ('E3', 'Quiet Foundation', '02134', 'MA');

                 INSERT INTO grants VALUES
                    ('E1', '78701', 5000, 'arts'),
                    ('E1', '78702', 12000, 'arts'),
                    ('E1', '78703', 20000, 'music'),
                    ('E1', '99999', 1000, 'misc'),
                    ('E2', '90210', 50000, 'harbor'),
                    ('E2', '02134-1234', 25000, 'harbor');

                 INSERT INTO key_contacts VALUES
                    ('E1', '78701', 'President'),
                    ('E2', '10001', 'Director'),
                    ('E2', '10001', 'Treasurer');

                 INSERT INTO grant_semantic_score VALUES
                    ('E1', 0.8),
                    ('E2', 0.3);",
            )
            .unwrap();

        db
    }

    pub fn analyze_into(db: &FoundationDb, relation: Relation) -> GeoWriteReport {
        let mut resolver = ZipResolver::new(db);
        let outcome = db
            .with_relation_rows(relation, |rows| {
                analyze(
                    &mut resolver,
                    relation,
                    rows,
                    AnalyzeOptions::default(),
                    &null_progress(),
                )
            })
            .unwrap()
            .unwrap();
        db.write_geo_summaries(relation, &outcome.summaries).unwrap()
    }

    #[test]
    fn streams_relation_rows_with_filer_columns() {
        let db = seeded_corpus();

        let rows: Vec<RelationRow> = db
            .with_relation_rows(Relation::Grants, |rows| rows.map(Result::unwrap).collect())
            .unwrap();

        assert_eq!(rows.len(), 6);
        let e2: Vec<_> = rows.iter().filter(|r| r.ein == "E2").collect();
        assert_eq!(e2.len(), 2);
        assert_eq!(e2[0].home_zip.as_deref(), Some("10001-2203"));
        assert_eq!(e2[0].foundation_name.as_deref(), Some("Harbor Trust"));
        assert!(
            e2.iter()
                .any(|r| r.detail.as_deref().is_some_and(|d| d.starts_with("50000")))
        );
    }

    #[test]
    fn writes_and_reads_back_grant_summaries() {
        let db = seeded_corpus();

        let report = analyze_into(&db, Relation::Grants);
        assert_eq!(report, GeoWriteReport { written: 2, failed: 0 });

        let geo = db.foundation_geo("E1").unwrap().unwrap();
        assert_eq!(geo.home_zip.as_deref(), Some("78701"));
        assert!(geo.key_contacts.is_none());

        let grants = geo.grants.unwrap();
        assert_eq!(grants.member_count, 4);
        assert_eq!(grants.resolved_count, 3);
        let center = grants.centroid.unwrap();
        assert!((center.latitude - 30.2752).abs() < 1e-3);
        assert!(grants.dispersion.is_some());
        assert!(grants.entity_to_centroid_distance.unwrap() < 5.0);

        let unknown = db.unknown_zips().unwrap();
        assert_eq!(unknown.len(), 1);
        assert_eq!(unknown[0].0, "99999");
    }

    #[test]
    fn relations_own_separate_columns() {
        let db = seeded_corpus();

        analyze_into(&db, Relation::Grants);
        analyze_into(&db, Relation::KeyContacts);

        let geo = db.foundation_geo("E2").unwrap().unwrap();
        let grants = geo.grants.unwrap();
        let contacts = geo.key_contacts.unwrap();
        assert_eq!(grants.member_count, 2);
        assert_eq!(contacts.member_count, 2);
        assert_eq!(contacts.dispersion, Some(0.0));
        assert!(contacts.entity_to_centroid_distance.unwrap() < 1e-6);
    }

    #[test]
    fn rewrite_clears_stale_summaries() {
        let db = seeded_corpus();
        analyze_into(&db, Relation::Grants);

        db.conn()
            .execute("DELETE FROM grants WHERE ein = 'E1'", [])
            .unwrap();
        analyze_into(&db, Relation::Grants);

        assert_eq!(db.foundation_geo("E1").unwrap(), None);
        assert!(db.foundation_geo("E2").unwrap().is_some());
    }

    fn stored_eins(db: &FoundationDb) -> Vec<String> {
        let mut stmt = db
            .conn()
            .prepare("SELECT ein FROM grant_geo_score WHERE grant_count IS NOT NULL ORDER BY ein")
            .unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .map(Result::unwrap)
            .collect()
    }

    #[test]
    fn failed_chunk_is_rolled_back_and_later_chunks_still_write() {
        let db = FoundationDb::open_in_memory().unwrap();
        let summary = |ein: &str| GeoSummary {
            member_count: 2,
            resolved_count: 2,
            centroid: CoordinatePair::new(30.27, -97.74),
            dispersion: Some(1.5),
            ..GeoSummary::empty(ein, Relation::Grants)
        };

        // Chunks of two: [G1, G2] [G3, G3] [G4]. The duplicate EIN makes
        // the second upsert fail.
        let summaries = vec![
            summary("G1"),
            summary("G2"),
            summary("G3"),
            summary("G3"),
            summary("G4"),
        ];

        let report = db
            .write_geo_summaries_in_chunks(Relation::Grants, &summaries, 2)
            .unwrap();

        assert_eq!(report, GeoWriteReport { written: 3, failed: 2 });
        assert_eq!(stored_eins(&db), vec!["G1", "G2", "G4"]);
        assert_eq!(db.foundation_geo("G3").unwrap(), None);
        assert_eq!(
            db.foundation_geo("G4").unwrap().unwrap().grants.unwrap().dispersion,
            Some(1.5)
        );
    }

    #[test]
    fn foundation_without_row_has_no_geo() {
        let db = seeded_corpus();
        analyze_into(&db, Relation::Grants);

        assert_eq!(db.foundation_geo("E3").unwrap(), None);
        assert_eq!(db.foundation_geo("NOPE").unwrap(), None);
    }
}

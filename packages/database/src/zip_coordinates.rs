//! ZIP reference coordinates and the unknown-ZIP registry.
//!
//! `zip_coordinates` is keyed by the normalized ZIP (leading zeros
//! stripped), matching the resolver's lookup key. Codes that fail to
//! resolve are kept in `unknown_zipcodes` in their original form so they
//! can be backfilled later.

use std::io::Read;
use std::path::Path;

use duckdb::params;
use grant_scout_geo::{CoordinateStore, UnknownZipWrite, ZipLookup};
use grant_scout_geo_models::{CoordinatePair, lookup_key};
use serde::Deserialize;

use crate::{DbError, FoundationDb};

/// Rows per import transaction.
const IMPORT_CHUNK_SIZE: usize = 5_000;

/// One row of a `zipcode,latitude,longitude` reference CSV.
#[derive(Debug, Deserialize)]
struct ZipCsvRow {
    zipcode: String,
    latitude: f64,
    longitude: f64,
}

/// Counts from a reference-data import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportReport {
    /// Rows inserted or updated.
    pub imported: u64,
    /// Rows dropped for a blank ZIP or out-of-range coordinates.
    pub skipped: u64,
}

/// An unresolvable ZIP awaiting curation: `(zipcode, first_seen)`.
pub type UnknownZip = (String, String);

impl FoundationDb {
    /// Imports a reference CSV with `zipcode,latitude,longitude` headers.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the file cannot be read or a write fails.
    pub fn import_zip_csv(&self, path: &Path) -> Result<ImportReport, DbError> {
        log::info!("Importing ZIP coordinates from {}", path.display());
        let file = std::fs::File::open(path)?;
        self.import_zip_reader(file)
    }

    /// Imports reference coordinates from any CSV reader.
    ///
    /// Existing keys are overwritten. Keys are normalized before storage.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if parsing a row's structure or a write fails.
    pub fn import_zip_reader<R: Read>(&self, reader: R) -> Result<ImportReport, DbError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut report = ImportReport::default();
        let mut batch: Vec<(String, CoordinatePair)> = Vec::with_capacity(IMPORT_CHUNK_SIZE);

        for record in csv_reader.deserialize::<ZipCsvRow>() {
            let row = match record {
                Ok(row) => row,
                Err(e) if e.is_io_error() => return Err(e.into()),
                Err(e) => {
                    log::warn!("Skipping malformed ZIP row: {e}");
                    report.skipped += 1;
                    continue;
                }
            };

            let key = lookup_key(&row.zipcode);
            let Some(coord) = CoordinatePair::new(row.latitude, row.longitude) else {
                log::warn!(
                    "Skipping ZIP {} with invalid coordinates ({}, {})",
                    row.zipcode,
                    row.latitude,
                    row.longitude
                );
                report.skipped += 1;
                continue;
            };
            if key.is_empty() {
                report.skipped += 1;
                continue;
            }

            batch.push((key.to_string(), coord));
            if batch.len() >= IMPORT_CHUNK_SIZE {
                report.imported += self.write_zip_batch(&batch)?;
                batch.clear();
            }
        }

        report.imported += self.write_zip_batch(&batch)?;

        log::info!(
            "Imported {} ZIP coordinates ({} skipped)",
            report.imported,
            report.skipped
        );
        Ok(report)
    }

    fn write_zip_batch(&self, batch: &[(String, CoordinatePair)]) -> Result<u64, DbError> {
        if batch.is_empty() {
            return Ok(0);
        }

        self.in_transaction(|conn| {
            let mut stmt = conn.prepare(
                "INSERT INTO zip_coordinates (zipcode, latitude, longitude)
                 VALUES (?, ?, ?)
                 ON CONFLICT (zipcode) DO UPDATE SET
                    latitude = EXCLUDED.latitude,
                    longitude = EXCLUDED.longitude",
            )?;

            for (key, coord) in batch {
                stmt.execute(params![key, coord.latitude, coord.longitude])?;
            }

            Ok(batch.len() as u64)
        })
    }

    /// Lists every ZIP in the unknown registry, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub fn unknown_zips(&self) -> Result<Vec<UnknownZip>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT zipcode, CAST(first_seen AS VARCHAR)
             FROM unknown_zipcodes
             ORDER BY first_seen, zipcode",
        )?;
        let mut rows = stmt.query([])?;

        let mut results = Vec::new();
        while let Some(row) = rows.next()? {
            let zip: String = row.get(0)?;
            let first_seen: Option<String> = row.get(1)?;
            results.push((zip, first_seen.unwrap_or_default()));
        }

        Ok(results)
    }
}

impl CoordinateStore for FoundationDb {
    type Error = DbError;

    fn lookup(&self, key: &str) -> Result<ZipLookup, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT latitude, longitude FROM zip_coordinates WHERE zipcode = ?")?;
        let mut rows = stmt.query(params![key])?;

        let Some(row) = rows.next()? else {
            return Ok(ZipLookup::NotFound);
        };

        let lat: f64 = row.get(0)?;
        let lng: f64 = row.get(1)?;

        Ok(CoordinatePair::new(lat, lng).map_or_else(
            || {
                log::warn!("ZIP {key} has invalid stored coordinates ({lat}, {lng})");
                ZipLookup::NotFound
            },
            ZipLookup::Found,
        ))
    }

    fn record_unknown(&self, zip: &str) -> Result<UnknownZipWrite, DbError> {
        let inserted = self.conn.execute(
            "INSERT INTO unknown_zipcodes (zipcode) VALUES (?) ON CONFLICT (zipcode) DO NOTHING",
            params![zip],
        )?;

        Ok(if inserted > 0 {
            UnknownZipWrite::Recorded
        } else {
            UnknownZipWrite::AlreadyRecorded
        })
    }
}

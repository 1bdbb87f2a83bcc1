//! Centroid and dispersion of a set of ZIP codes.
//!
//! The centroid is the arithmetic mean of latitudes and of longitudes, a
//! planar average of degrees rather than a geodesic centroid. That is
//! adequate at county and metro scale but skews near the poles and across
//! the antimeridian. Stored scores depend on this exact approximation, so it
//! must not be swapped for a spherical mean.

use grant_scout_geo_models::CoordinatePair;

use crate::distance::haversine_miles;
use crate::resolver::{CoordinateStore, ZipResolver};

/// Centroid and dispersion for one set of ZIP codes.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Centroid {
    /// Mean coordinate, `None` when nothing resolved.
    pub center: Option<CoordinatePair>,
    /// Sample standard deviation (n - 1) of member-to-center distances in
    /// miles, `None` with fewer than two resolved members.
    pub dispersion: Option<f64>,
    /// How many of the input codes resolved.
    pub resolved: usize,
}

/// Resolves every ZIP and summarizes the resolved sample.
///
/// Unresolvable codes are dropped from the sample. Calling this twice with
/// the same input against an unchanged store gives bit-identical output.
pub fn summarize<S, Z>(resolver: &mut ZipResolver<S>, zips: &[Z]) -> Centroid
where
    S: CoordinateStore,
    Z: AsRef<str>,
{
    let coords: Vec<CoordinatePair> = zips
        .iter()
        .filter_map(|zip| resolver.resolve(zip.as_ref()).coordinate())
        .collect();

    summarize_coordinates(&coords)
}

/// Summarizes an already-resolved coordinate sample.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn summarize_coordinates(coords: &[CoordinatePair]) -> Centroid {
    match coords {
        [] => Centroid::default(),
        [only] => Centroid {
            center: Some(*only),
            dispersion: None,
            resolved: 1,
        },
        _ => {
            let n = coords.len() as f64;
            let center = CoordinatePair {
                latitude: coords.iter().map(|c| c.latitude).sum::<f64>() / n,
                longitude: coords.iter().map(|c| c.longitude).sum::<f64>() / n,
            };

            let distances: Vec<f64> = coords
                .iter()
                .map(|c| haversine_miles(*c, center))
                .collect();

            Centroid {
                center: Some(center),
                dispersion: Some(sample_std_dev(&distances)),
                resolved: coords.len(),
            }
        }
    }
}

/// Bessel-corrected standard deviation. Requires at least two values.
#[allow(clippy::cast_precision_loss)]
fn sample_std_dev(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    variance.sqrt()
}

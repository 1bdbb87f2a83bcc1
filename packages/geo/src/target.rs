//! Distances from a fixed target location to each foundation.
//!
//! The target ZIP is resolved once per run. For each foundation the
//! calculator measures the distance to its own address, to its key-contacts
//! centroid, and to its grant-recipients centroid.

use grant_scout_geo_models::{CoordinatePair, FoundationGeo, TargetDistances, zip5};

use crate::GeoError;
use crate::distance::haversine_miles;
use crate::resolver::{CoordinateStore, ZipResolver};

/// Read access to a foundation's stored home ZIP and geo summaries.
pub trait FoundationGeoSource {
    /// Storage error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Loads the foundation's home ZIP and both relation summaries.
    ///
    /// Returns `None` when the foundation or its geo row is not on file.
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the lookup fails.
    fn foundation_geo(&self, ein: &str) -> Result<Option<FoundationGeo>, Self::Error>;
}

impl<T: FoundationGeoSource + ?Sized> FoundationGeoSource for &T {
    type Error = T::Error;

    fn foundation_geo(&self, ein: &str) -> Result<Option<FoundationGeo>, Self::Error> {
        (**self).foundation_geo(ein)
    }
}

/// Measures foundation distances against one target ZIP.
#[derive(Debug, Clone)]
pub struct TargetDistanceCalculator {
    target_zip: String,
    target: Option<CoordinatePair>,
}

impl TargetDistanceCalculator {
    /// Resolves the target ZIP, truncated to five digits like every other
    /// ZIP. An unresolvable target makes every later call return `None`.
    pub fn new<S: CoordinateStore>(resolver: &mut ZipResolver<S>, target_zip: &str) -> Self {
        let target = zip5(target_zip).and_then(|zip| resolver.resolve(zip).coordinate());
        if target.is_none() {
            log::warn!("Target ZIP '{target_zip}' could not be resolved; no distances will be produced");
        }

        Self {
            target_zip: target_zip.to_string(),
            target,
        }
    }

    /// The target ZIP as given.
    #[must_use]
    pub fn target_zip(&self) -> &str {
        &self.target_zip
    }

    /// The resolved target coordinate.
    #[must_use]
    pub const fn target(&self) -> Option<CoordinatePair> {
        self.target
    }

    /// Distances from the target to the foundation's address, key-contacts
    /// centroid, and grant-recipients centroid.
    ///
    /// Returns `Ok(None)` when there is no geo data for the foundation at
    /// all. Individual locations that cannot be resolved come back as `None`
    /// slots in an otherwise present result.
    ///
    /// # Errors
    ///
    /// Returns [`GeoError::Source`] if the geo source fails.
    pub fn distances_to_target<S, G>(
        &self,
        resolver: &mut ZipResolver<S>,
        source: &G,
        ein: &str,
    ) -> Result<Option<TargetDistances>, GeoError>
    where
        S: CoordinateStore,
        G: FoundationGeoSource,
    {
        if self.target.is_none() {
            return Ok(None);
        }

        let geo = source
            .foundation_geo(ein)
            .map_err(|e| GeoError::Source(Box::new(e)))?;

        let Some(geo) = geo else {
            log::debug!("No geo data on file for foundation {ein}");
            return Ok(None);
        };

        Ok(self.distances_for_geo(resolver, &geo))
    }

    /// Distances for an already-loaded [`FoundationGeo`].
    ///
    /// Returns `None` when the target is unresolved or the foundation has
    /// neither relation summary on file.
    pub fn distances_for_geo<S: CoordinateStore>(
        &self,
        resolver: &mut ZipResolver<S>,
        geo: &FoundationGeo,
    ) -> Option<TargetDistances> {
        let target = self.target?;

        if geo.grants.is_none() && geo.key_contacts.is_none() {
            log::debug!("No geo summaries for foundation {}", geo.ein);
            return None;
        }

        let home = geo
            .home_zip
            .as_deref()
            .and_then(zip5)
            .and_then(|zip| resolver.resolve(zip).coordinate());

        let key_center = geo.key_contacts.as_ref().and_then(|s| s.centroid);
        let grant_center = geo.grants.as_ref().and_then(|s| s.centroid);

        let to_target = |point: Option<CoordinatePair>| point.map(|p| haversine_miles(target, p));

        Some(TargetDistances {
            foundation: to_target(home),
            key_contacts: to_target(key_center),
            recipients: to_target(grant_center),
        })
    }
}

//! Memoizing ZIP-to-coordinate resolution.
//!
//! [`ZipResolver`] owns an explicit cache keyed by the normalized ZIP
//! (leading zeros stripped). A cache miss falls through to the
//! [`CoordinateStore`]; codes the store does not know are registered in its
//! unknown-ZIP registry for later curation and come back as
//! [`Resolution::Unresolved`]. Nothing in here is fatal to the caller.

use std::collections::BTreeMap;

use grant_scout_geo_models::{CoordinatePair, lookup_key};

/// Result of a reference-store lookup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ZipLookup {
    /// The store has a coordinate for the key.
    Found(CoordinatePair),
    /// The key is absent from the store.
    NotFound,
}

/// Result of writing to the unknown-ZIP registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownZipWrite {
    /// The code was newly added to the registry.
    Recorded,
    /// The code was already present; nothing changed.
    AlreadyRecorded,
}

/// Read-only reference coordinates plus the unknown-ZIP registry.
pub trait CoordinateStore {
    /// Storage error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Looks up a normalized ZIP key.
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the store cannot be queried.
    fn lookup(&self, key: &str) -> Result<ZipLookup, Self::Error>;

    /// Registers an unresolvable ZIP. Must be idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the registry write fails.
    fn record_unknown(&self, zip: &str) -> Result<UnknownZipWrite, Self::Error>;
}

impl<T: CoordinateStore + ?Sized> CoordinateStore for &T {
    type Error = T::Error;

    fn lookup(&self, key: &str) -> Result<ZipLookup, Self::Error> {
        (**self).lookup(key)
    }

    fn record_unknown(&self, zip: &str) -> Result<UnknownZipWrite, Self::Error> {
        (**self).record_unknown(zip)
    }
}

/// Outcome of resolving a ZIP through a [`ZipResolver`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolution {
    /// The ZIP maps to this coordinate.
    Found(CoordinatePair),
    /// The ZIP has no known coordinate. Callers skip the member.
    Unresolved,
}

impl Resolution {
    /// The coordinate, if resolved.
    #[must_use]
    pub const fn coordinate(self) -> Option<CoordinatePair> {
        match self {
            Self::Found(c) => Some(c),
            Self::Unresolved => None,
        }
    }
}

/// Counters describing resolver activity since construction or the last
/// [`ZipResolver::clear`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolverStats {
    /// Lookups answered from the cache.
    pub cache_hits: u64,
    /// Lookups that went to the reference store.
    pub store_lookups: u64,
    /// Resolutions that came back unresolved.
    pub unresolved: u64,
    /// Codes newly added to the unknown-ZIP registry.
    pub unknown_recorded: u64,
    /// Store or registry errors that were downgraded to unresolved.
    pub store_errors: u64,
}

/// ZIP resolver with an owned, per-run coordinate cache.
pub struct ZipResolver<S> {
    store: S,
    cache: BTreeMap<String, CoordinatePair>,
    stats: ResolverStats,
}

impl<S: CoordinateStore> ZipResolver<S> {
    /// Creates a resolver with an empty cache.
    #[must_use]
    pub const fn new(store: S) -> Self {
        Self {
            store,
            cache: BTreeMap::new(),
            stats: ResolverStats {
                cache_hits: 0,
                store_lookups: 0,
                unresolved: 0,
                unknown_recorded: 0,
                store_errors: 0,
            },
        }
    }

    /// Resolves a ZIP to a coordinate.
    ///
    /// `"02134"` and `"2134"` share a cache entry. Only successful lookups
    /// are cached, so a code added to the reference store mid-run resolves
    /// on its next request.
    pub fn resolve(&mut self, zip: &str) -> Resolution {
        let key = lookup_key(zip);

        if let Some(coord) = self.cache.get(key) {
            self.stats.cache_hits += 1;
            return Resolution::Found(*coord);
        }

        if key.is_empty() {
            self.stats.unresolved += 1;
            if !zip.trim().is_empty() {
                self.register_unknown(zip);
            }
            return Resolution::Unresolved;
        }

        self.stats.store_lookups += 1;
        match self.store.lookup(key) {
            Ok(ZipLookup::Found(coord)) => {
                self.cache.insert(key.to_string(), coord);
                Resolution::Found(coord)
            }
            Ok(ZipLookup::NotFound) => {
                self.stats.unresolved += 1;
                self.register_unknown(zip);
                Resolution::Unresolved
            }
            Err(e) => {
                self.stats.unresolved += 1;
                self.stats.store_errors += 1;
                log::warn!("Coordinate lookup failed for ZIP '{zip}': {e}");
                Resolution::Unresolved
            }
        }
    }

    fn register_unknown(&mut self, zip: &str) {
        match self.store.record_unknown(zip) {
            Ok(UnknownZipWrite::Recorded) => {
                self.stats.unknown_recorded += 1;
                log::warn!("Unknown ZIP '{zip}' recorded for curation");
            }
            Ok(UnknownZipWrite::AlreadyRecorded) => {
                log::debug!("Unknown ZIP '{zip}' already recorded");
            }
            Err(e) => {
                self.stats.store_errors += 1;
                log::warn!("Failed to record unknown ZIP '{zip}': {e}");
            }
        }
    }

    /// Drops every cached coordinate and resets the counters.
    ///
    /// Call between independent runs when the reference table may have
    /// changed.
    pub fn clear(&mut self) {
        self.cache.clear();
        self.stats = ResolverStats::default();
    }

    /// Number of cached coordinates.
    #[must_use]
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    /// Activity counters.
    #[must_use]
    pub const fn stats(&self) -> ResolverStats {
        self.stats
    }

    /// The underlying reference store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Logs a one-line summary of resolver activity.
    pub fn log_stats(&self, label: &str) {
        let s = self.stats;
        log::info!(
            "{label}: {} cache hits, {} store lookups, {} unresolved ({} newly recorded, {} store errors)",
            s.cache_hits,
            s.store_lookups,
            s.unresolved,
            s.unknown_recorded,
            s.store_errors,
        );
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::cell::{Cell, RefCell};
    use std::collections::{BTreeMap, BTreeSet};

    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("store offline")]
    pub struct Offline;

    /// In-memory reference store that counts every call.
    #[derive(Default)]
    pub struct FakeStore {
        pub coords: BTreeMap<String, CoordinatePair>,
        pub unknown: RefCell<BTreeSet<String>>,
        pub lookups: Cell<u32>,
        pub record_calls: Cell<u32>,
        pub offline: bool,
    }

    impl FakeStore {
        pub fn with(entries: &[(&str, f64, f64)]) -> Self {
            let coords = entries
                .iter()
                .map(|(zip, lat, lon)| {
                    (
                        lookup_key(zip).to_string(),
                        CoordinatePair::new(*lat, *lon).unwrap(),
                    )
                })
                .collect();
            Self {
                coords,
                ..Self::default()
            }
        }
    }

    impl CoordinateStore for FakeStore {
        type Error = Offline;

        fn lookup(&self, key: &str) -> Result<ZipLookup, Offline> {
            self.lookups.set(self.lookups.get() + 1);
            if self.offline {
                return Err(Offline);
            }
            Ok(self
                .coords
                .get(key)
                .map_or(ZipLookup::NotFound, |c| ZipLookup::Found(*c)))
        }

        fn record_unknown(&self, zip: &str) -> Result<UnknownZipWrite, Offline> {
            self.record_calls.set(self.record_calls.get() + 1);
            if self.unknown.borrow_mut().insert(zip.to_string()) {
                Ok(UnknownZipWrite::Recorded)
            } else {
                Ok(UnknownZipWrite::AlreadyRecorded)
            }
        }
    }

    pub fn sample_store() -> FakeStore {
        FakeStore::with(&[
            ("90210", 34.0901, -118.4065),
            ("10001", 40.7500, -73.9967),
            ("12345", 42.8140, -73.9407),
            ("02134", 42.3539, -71.1337),
            ("78701", 30.2711, -97.7437),
            ("78702", 30.2638, -97.7166),
            ("78703", 30.2907, -97.7684),
        ])
    }

    #[test]
    fn resolves_known_zip() {
        let store = sample_store();
        let mut resolver = ZipResolver::new(&store);
        assert_eq!(
            resolver.resolve("90210").coordinate(),
            CoordinatePair::new(34.0901, -118.4065)
        );
    }

    #[test]
    fn leading_zero_forms_share_a_cache_entry() {
        let store = sample_store();
        let mut resolver = ZipResolver::new(&store);

        let padded = resolver.resolve("02134");
        let stripped = resolver.resolve("2134");

        assert_eq!(padded, stripped);
        assert!(matches!(padded, Resolution::Found(_)));
        assert_eq!(store.lookups.get(), 1);
        assert_eq!(resolver.cached_len(), 1);
        assert_eq!(resolver.stats().cache_hits, 1);
    }

    #[test]
    fn unknown_zip_is_recorded_once() {
        let store = sample_store();
        let mut resolver = ZipResolver::new(&store);

        assert_eq!(resolver.resolve("99999"), Resolution::Unresolved);
        assert_eq!(store.record_calls.get(), 1);
        assert!(store.unknown.borrow().contains("99999"));

        assert_eq!(resolver.resolve("99999"), Resolution::Unresolved);
        assert_eq!(store.record_calls.get(), 2);
        assert_eq!(store.unknown.borrow().len(), 1);
        assert_eq!(resolver.stats().unknown_recorded, 1);
    }

    #[test]
    fn records_the_original_unnormalized_code() {
        let store = sample_store();
        let mut resolver = ZipResolver::new(&store);

        resolver.resolve("00999");

        assert!(store.unknown.borrow().contains("00999"));
    }

    #[test]
    fn all_zero_zip_is_unresolved_without_lookup() {
        let store = sample_store();
        let mut resolver = ZipResolver::new(&store);

        assert_eq!(resolver.resolve("00000"), Resolution::Unresolved);
        assert_eq!(store.lookups.get(), 0);
        assert!(store.unknown.borrow().contains("00000"));
    }

    #[test]
    fn store_errors_are_not_fatal() {
        let store = FakeStore {
            offline: true,
            ..sample_store()
        };
        let mut resolver = ZipResolver::new(&store);

        assert_eq!(resolver.resolve("90210"), Resolution::Unresolved);
        assert_eq!(resolver.stats().store_errors, 1);
        assert_eq!(store.record_calls.get(), 0);
    }

    #[test]
    fn clear_forces_a_fresh_lookup() {
        let store = sample_store();
        let mut resolver = ZipResolver::new(&store);

        resolver.resolve("10001");
        resolver.clear();
        resolver.resolve("10001");

        assert_eq!(store.lookups.get(), 2);
        assert_eq!(resolver.stats().cache_hits, 0);
    }
}

//! The contract shared by all caches that take part in DTO dispatching.

use std::collections::BTreeSet;
use std::fmt;

use crate::dto::{Dto, DtoType};
use crate::error::CacheError;
use crate::health::HealthStatus;
use crate::types::{CacheItemType, CacheName, Culture, Urn};

/// The non-empty set of [`DtoType`]s a cache consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DtoTypeSet(BTreeSet<DtoType>);

impl DtoTypeSet {
    /// # Panics
    ///
    /// Panics if `types` is empty. A cache without DTO types can never receive data, which is a
    /// programming error.
    pub fn new(types: impl IntoIterator<Item = DtoType>) -> Self {
        let types: BTreeSet<_> = types.into_iter().collect();
        assert!(!types.is_empty(), "a cache must register at least one dto type");
        Self(types)
    }

    pub fn contains(&self, dto_type: DtoType) -> bool {
        self.0.contains(&dto_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = DtoType> + '_ {
        self.0.iter().copied()
    }
}

/// A cache that is fed with DTOs by the [`CacheManager`](crate::CacheManager).
pub trait SdkCache: Send + Sync + 'static {
    fn name(&self) -> CacheName;

    fn registered_dto_types(&self) -> &DtoTypeSet;

    /// Merges a DTO that has already been checked to match `dto_type`.
    ///
    /// Returns whether anything was stored.
    fn add_dto_item(
        &self,
        id: &Urn,
        dto: &Dto,
        culture: &Culture,
        dto_type: DtoType,
        requester: Option<&Urn>,
    ) -> Result<bool, CacheError>;

    /// Offers a DTO to this cache.
    ///
    /// DTOs of an unregistered type are ignored. A DTO whose shape does not match `dto_type` is
    /// rejected with a warning. Neither case stores anything.
    fn cache_add_dto(
        &self,
        id: &Urn,
        dto: &Dto,
        culture: &Culture,
        dto_type: DtoType,
        requester: Option<&Urn>,
    ) -> Result<bool, CacheError> {
        if !self.registered_dto_types().contains(dto_type) {
            return Ok(false);
        }
        if !dto.matches(dto_type) {
            log_saving_dto_conflict(self.name(), id, dto_type, dto);
            return Ok(false);
        }
        self.add_dto_item(id, dto, culture, dto_type, requester)
    }

    /// Removes the item with `id` if it is of a kind covered by `item_type`.
    ///
    /// Ids this cache does not know are ignored.
    fn cache_delete_item(&self, id: &str, item_type: CacheItemType) -> Result<(), CacheError>;

    fn cache_has_item(&self, id: &str, item_type: CacheItemType) -> bool;

    fn health_check(&self) -> HealthStatus;

    /// Drops all cached data and rejects any further work.
    fn dispose(&self);
}

/// Reports a DTO that was saved under a type it does not have.
pub fn log_saving_dto_conflict(
    cache: CacheName,
    id: &dyn fmt::Display,
    expected: DtoType,
    dto: &Dto,
) {
    tracing::warn!(
        cache = %cache,
        %id,
        expected = %expected,
        actual = dto.shape(),
        "{cache}: invalid data for item {id}, expected {expected} but received {}",
        dto.shape()
    );
    metric!(counter("caches.dto.rejected") += 1, "cache" => cache.as_ref());
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use sportsfeed_test::capture_logs;

    use crate::dto::{CompetitorDto, PlayerProfileDto};

    use super::*;

    struct CountingCache {
        types: DtoTypeSet,
        added: AtomicUsize,
    }

    impl SdkCache for CountingCache {
        fn name(&self) -> CacheName {
            CacheName::Profiles
        }

        fn registered_dto_types(&self) -> &DtoTypeSet {
            &self.types
        }

        fn add_dto_item(
            &self,
            _id: &Urn,
            _dto: &Dto,
            _culture: &Culture,
            _dto_type: DtoType,
            _requester: Option<&Urn>,
        ) -> Result<bool, CacheError> {
            self.added.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }

        fn cache_delete_item(
            &self,
            _id: &str,
            _item_type: CacheItemType,
        ) -> Result<(), CacheError> {
            Ok(())
        }

        fn cache_has_item(&self, _id: &str, _item_type: CacheItemType) -> bool {
            false
        }

        fn health_check(&self) -> HealthStatus {
            HealthStatus::Healthy
        }

        fn dispose(&self) {}
    }

    fn cache() -> CountingCache {
        CountingCache {
            types: DtoTypeSet::new([DtoType::Competitor]),
            added: AtomicUsize::new(0),
        }
    }

    #[test]
    #[should_panic(expected = "at least one dto type")]
    fn test_empty_dto_types() {
        DtoTypeSet::new([]);
    }

    #[test]
    fn test_add_registered_dto() {
        let cache = cache();
        let id: Urn = "sr:competitor:1".parse().unwrap();
        let dto = Dto::Competitor(CompetitorDto::default());

        let saved = cache
            .cache_add_dto(&id, &dto, &Culture::new("en"), DtoType::Competitor, None)
            .unwrap();
        assert!(saved);
        assert_eq!(cache.added.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unregistered_dto_type_is_ignored() {
        let logs = capture_logs();
        let cache = cache();
        let id: Urn = "sr:player:1".parse().unwrap();
        let dto = Dto::PlayerProfile(PlayerProfileDto::default());

        let saved = cache
            .cache_add_dto(&id, &dto, &Culture::new("en"), DtoType::PlayerProfile, None)
            .unwrap();
        assert!(!saved);
        assert_eq!(cache.added.load(Ordering::SeqCst), 0);
        assert_eq!(logs.count("invalid data for item"), 0);
    }

    #[test]
    fn test_wrong_shape_is_rejected() {
        let logs = capture_logs();
        let cache = cache();
        let id: Urn = "sr:competitor:1".parse().unwrap();
        let dto = Dto::PlayerProfile(PlayerProfileDto::default());

        let saved = cache
            .cache_add_dto(&id, &dto, &Culture::new("en"), DtoType::Competitor, None)
            .unwrap();
        assert!(!saved);
        assert_eq!(cache.added.load(Ordering::SeqCst), 0);

        let warnings = logs.lines_containing("invalid data for item");
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("sr:competitor:1"));
        assert!(warnings[0].contains("PlayerProfileDto"));
    }
}

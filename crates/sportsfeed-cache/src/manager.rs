//! Routing of incoming DTOs to the caches that consume them.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::dto::{Dto, DtoType};
use crate::error::CacheError;
use crate::health::HealthReport;
use crate::sdk_cache::SdkCache;
use crate::types::{CacheItemType, CacheName, Culture, Urn};

#[derive(Default)]
struct Registry {
    caches: BTreeMap<CacheName, Arc<dyn SdkCache>>,
    by_dto_type: HashMap<DtoType, Vec<Arc<dyn SdkCache>>>,
}

/// Dispatches DTOs to every cache registered for their [`DtoType`].
///
/// Caches register themselves when they are created.
#[derive(Default)]
pub struct CacheManager {
    registry: RwLock<Registry>,
}

impl fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheManager")
            .field("caches", &self.registered_caches())
            .finish()
    }
}

impl CacheManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `cache` for all of its DTO types.
    ///
    /// Fails if a cache with the same name is already registered.
    pub fn register_cache(&self, cache: Arc<dyn SdkCache>) -> Result<(), CacheError> {
        let name = cache.name();
        let mut registry = self.registry.write();
        if registry.caches.contains_key(&name) {
            return Err(CacheError::InvalidArgument(format!(
                "cache {name} is already registered"
            )));
        }

        for dto_type in cache.registered_dto_types().iter() {
            registry
                .by_dto_type
                .entry(dto_type)
                .or_default()
                .push(Arc::clone(&cache));
        }
        registry.caches.insert(name, cache);

        tracing::debug!(cache = %name, "registered cache");
        Ok(())
    }

    pub fn registered_caches(&self) -> Vec<CacheName> {
        self.registry.read().caches.keys().copied().collect()
    }

    fn caches_for(&self, dto_type: DtoType) -> Vec<Arc<dyn SdkCache>> {
        self.registry
            .read()
            .by_dto_type
            .get(&dto_type)
            .cloned()
            .unwrap_or_default()
    }

    fn all_caches(&self) -> Vec<Arc<dyn SdkCache>> {
        self.registry.read().caches.values().cloned().collect()
    }

    /// Offers `dto` to every cache registered for `dto_type`.
    ///
    /// Every cache gets to see the DTO, even if another one fails. Returns whether at least one
    /// cache stored it, or the first error any cache reported.
    pub fn save_dto(
        &self,
        id: &Urn,
        dto: &Dto,
        culture: &Culture,
        dto_type: DtoType,
        requester: Option<&Urn>,
    ) -> Result<bool, CacheError> {
        let caches = self.caches_for(dto_type);
        if caches.is_empty() {
            tracing::warn!(%id, %dto_type, "no cache is registered for dto type {dto_type}");
            return Ok(false);
        }

        let mut saved = false;
        let mut first_error = None;
        for cache in caches {
            match cache.cache_add_dto(id, dto, culture, dto_type, requester) {
                Ok(stored) => saved |= stored,
                Err(error) => {
                    tracing::error!(
                        cache = %cache.name(),
                        %id,
                        %dto_type,
                        error = &error as &dyn std::error::Error,
                        "failed to save dto"
                    );
                    first_error.get_or_insert(error);
                }
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(saved),
        }
    }

    /// Async flavor of [`save_dto`](Self::save_dto) for callers running on the runtime.
    pub async fn save_dto_async(
        &self,
        id: &Urn,
        dto: &Dto,
        culture: &Culture,
        dto_type: DtoType,
        requester: Option<&Urn>,
    ) -> Result<bool, CacheError> {
        self.save_dto(id, dto, culture, dto_type, requester)
    }

    /// Asks every cache to drop the item with `id`.
    ///
    /// `source` names whoever requested the removal and is only used for diagnostics.
    pub fn remove_cache_item(
        &self,
        id: &str,
        item_type: CacheItemType,
        source: &str,
    ) -> Result<(), CacheError> {
        tracing::trace!(%id, ?item_type, source, "removing cache item");

        let mut first_error = None;
        for cache in self.all_caches() {
            if let Err(error) = cache.cache_delete_item(id, item_type) {
                first_error.get_or_insert(error);
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    pub fn health_check(&self) -> HealthReport {
        HealthReport::from_caches(
            self.all_caches()
                .iter()
                .map(|cache| (cache.name(), cache.health_check())),
        )
    }

    /// Disposes all registered caches.
    pub fn dispose_all(&self) {
        for cache in self.all_caches() {
            cache.dispose();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use crate::dto::{CompetitorDto, SportEventSummaryDto};
    use crate::health::HealthStatus;
    use crate::sdk_cache::DtoTypeSet;

    use super::*;

    struct TestCache {
        name: CacheName,
        types: DtoTypeSet,
        fail: bool,
        added: AtomicUsize,
        deleted: AtomicUsize,
        disposed: AtomicBool,
    }

    impl TestCache {
        fn new(name: CacheName, types: impl IntoIterator<Item = DtoType>, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                types: DtoTypeSet::new(types),
                fail,
                added: AtomicUsize::new(0),
                deleted: AtomicUsize::new(0),
                disposed: AtomicBool::new(false),
            })
        }
    }

    impl SdkCache for TestCache {
        fn name(&self) -> CacheName {
            self.name
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
            if self.fail {
                return Err(CacheError::Disposed(self.name));
            }
            Ok(true)
        }

        fn cache_delete_item(
            &self,
            _id: &str,
            _item_type: CacheItemType,
        ) -> Result<(), CacheError> {
            self.deleted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn cache_has_item(&self, _id: &str, _item_type: CacheItemType) -> bool {
            false
        }

        fn health_check(&self) -> HealthStatus {
            if self.disposed.load(Ordering::SeqCst) {
                HealthStatus::Unhealthy
            } else {
                HealthStatus::Healthy
            }
        }

        fn dispose(&self) {
            self.disposed.store(true, Ordering::SeqCst);
        }
    }

    fn competitor() -> (Urn, Dto) {
        let id: Urn = "sr:competitor:1".parse().unwrap();
        let dto = Dto::Competitor(CompetitorDto {
            id: id.clone(),
            ..Default::default()
        });
        (id, dto)
    }

    #[test]
    fn test_duplicate_registration() {
        let manager = CacheManager::new();
        let cache = TestCache::new(CacheName::Profiles, [DtoType::Competitor], false);
        manager.register_cache(cache.clone()).unwrap();

        let result = manager.register_cache(cache);
        assert!(matches!(result, Err(CacheError::InvalidArgument(_))));
        assert_eq!(manager.registered_caches(), vec![CacheName::Profiles]);
    }

    #[test]
    fn test_fan_out() {
        let manager = CacheManager::new();
        let profiles = TestCache::new(CacheName::Profiles, [DtoType::Competitor], false);
        let markets = TestCache::new(
            CacheName::VariantMarketDescriptions,
            [DtoType::Competitor, DtoType::MarketDescription],
            false,
        );
        let list = TestCache::new(
            CacheName::VariantDescriptionList,
            [DtoType::VariantDescriptionList],
            false,
        );
        manager.register_cache(profiles.clone()).unwrap();
        manager.register_cache(markets.clone()).unwrap();
        manager.register_cache(list.clone()).unwrap();

        let (id, dto) = competitor();
        let saved = manager
            .save_dto(&id, &dto, &Culture::new("en"), DtoType::Competitor, None)
            .unwrap();

        assert!(saved);
        assert_eq!(profiles.added.load(Ordering::SeqCst), 1);
        assert_eq!(markets.added.load(Ordering::SeqCst), 1);
        assert_eq!(list.added.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_fan_out_continues_past_errors() {
        let manager = CacheManager::new();
        let failing = TestCache::new(CacheName::Profiles, [DtoType::Competitor], true);
        let healthy = TestCache::new(
            CacheName::VariantMarketDescriptions,
            [DtoType::Competitor],
            false,
        );
        manager.register_cache(failing.clone()).unwrap();
        manager.register_cache(healthy.clone()).unwrap();

        let (id, dto) = competitor();
        let result = manager.save_dto(&id, &dto, &Culture::new("en"), DtoType::Competitor, None);

        assert!(matches!(result, Err(CacheError::Disposed(CacheName::Profiles))));
        assert_eq!(failing.added.load(Ordering::SeqCst), 1);
        assert_eq!(healthy.added.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_mismatching_dto_is_rejected() {
        let manager = CacheManager::new();
        let cache = TestCache::new(CacheName::Profiles, [DtoType::Competitor], false);
        manager.register_cache(cache.clone()).unwrap();

        let id: Urn = "sr:match:1".parse().unwrap();
        let dto = Dto::SportEventSummary(SportEventSummaryDto::default());
        let saved = manager
            .save_dto(&id, &dto, &Culture::new("en"), DtoType::Competitor, None)
            .unwrap();

        assert!(!saved);
        assert_eq!(cache.added.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unhandled_dto_type() {
        let manager = CacheManager::new();
        let (id, dto) = competitor();
        let saved = manager
            .save_dto(&id, &dto, &Culture::new("en"), DtoType::Competitor, None)
            .unwrap();
        assert!(!saved);
    }

    #[tokio::test]
    async fn test_save_dto_async() {
        let manager = CacheManager::new();
        let cache = TestCache::new(CacheName::Profiles, [DtoType::Competitor], false);
        manager.register_cache(cache.clone()).unwrap();

        let (id, dto) = competitor();
        let saved = manager
            .save_dto_async(&id, &dto, &Culture::new("en"), DtoType::Competitor, None)
            .await
            .unwrap();
        assert!(saved);
    }

    #[test]
    fn test_remove_health_dispose() {
        let manager = CacheManager::new();
        let profiles = TestCache::new(CacheName::Profiles, [DtoType::Competitor], false);
        let list = TestCache::new(
            CacheName::VariantDescriptionList,
            [DtoType::VariantDescriptionList],
            false,
        );
        manager.register_cache(profiles.clone()).unwrap();
        manager.register_cache(list.clone()).unwrap();

        manager
            .remove_cache_item("sr:competitor:1", CacheItemType::All, "test")
            .unwrap();
        assert_eq!(profiles.deleted.load(Ordering::SeqCst), 1);
        assert_eq!(list.deleted.load(Ordering::SeqCst), 1);

        assert_eq!(manager.health_check().status, HealthStatus::Healthy);
        manager.dispose_all();
        let report = manager.health_check();
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert_eq!(report.caches.len(), 2);
    }
}

//! The bulk catalogue of variant descriptions.
//!
//! Unlike [`VariantMarketDescriptionCache`](crate::VariantMarketDescriptionCache), this cache
//! always loads the complete catalogue of a culture at once. Loads happen on demand for cultures
//! that were never loaded, and periodically for all configured cultures.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Weak};

use futures::future::{self, BoxFuture};
use parking_lot::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::computation::Computations;
use crate::config::{RefreshConfig, StoreConfig};
use crate::data_router::DataRouter;
use crate::dto::{Dto, DtoType, VariantDescriptionDto};
use crate::error::{CacheError, FetchError};
use crate::health::HealthStatus;
use crate::manager::CacheManager;
use crate::markets::{MappingItem, OutcomeItem, merge_mappings, merge_outcomes};
use crate::merge::{Conflicts, log_conflicts};
use crate::sdk_cache::{DtoTypeSet, SdkCache};
use crate::store::CacheStore;
use crate::types::{CacheItemType, CacheName, Culture, Urn};

const NAME: CacheName = CacheName::VariantDescriptionList;

/// A variant description from the catalogue.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantDescriptionItem {
    id: String,
    outcomes: Vec<OutcomeItem>,
    mappings: Vec<MappingItem>,
    cultures: BTreeSet<Culture>,
    source_cache: Option<CacheName>,
}

impl VariantDescriptionItem {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_owned(),
            outcomes: Vec::new(),
            mappings: Vec::new(),
            cultures: BTreeSet::new(),
            source_cache: None,
        }
    }

    fn merge(&mut self, dto: &VariantDescriptionDto, culture: &Culture, conflicts: &mut Conflicts) {
        let conflicted = merge_outcomes(&mut self.outcomes, &dto.outcomes, culture, conflicts);
        merge_mappings(&mut self.mappings, &dto.mappings, culture, conflicted, conflicts);
        self.cultures.insert(culture.clone());
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn outcomes(&self) -> &[OutcomeItem] {
        &self.outcomes
    }

    pub fn mappings(&self) -> &[MappingItem] {
        &self.mappings
    }

    pub fn has_culture(&self, culture: &Culture) -> bool {
        self.cultures.contains(culture)
    }

    /// The cache that last refreshed this item, if any.
    pub fn source_cache(&self) -> Option<CacheName> {
        self.source_cache
    }
}

struct Catalogue {
    store: CacheStore<String, Arc<VariantDescriptionItem>>,
    data_router: Arc<dyn DataRouter>,
    computations: Computations<Culture>,
    /// The loaded cultures, with the ids their last complete catalogue listed.
    loaded: Mutex<BTreeMap<Culture, BTreeSet<String>>>,
    cultures: Vec<Culture>,
}

impl Catalogue {
    fn is_loaded(&self, culture: &Culture) -> bool {
        self.loaded.lock().contains_key(culture)
    }

    /// Forgets the loaded cultures whose catalogue listed `id`.
    ///
    /// Returns whether any culture was forgotten.
    fn forget_cultures_listing(&self, id: &str) -> bool {
        let mut loaded = self.loaded.lock();
        let before = loaded.len();
        loaded.retain(|_, ids| !ids.contains(id));
        before != loaded.len()
    }

    /// Forgets the loaded cultures that lost items to a delete or to expiration.
    fn forget_incomplete(&self) {
        self.loaded
            .lock()
            .retain(|_, ids| ids.iter().all(|id| self.store.contains(id)));
    }

    fn save(
        &self,
        dto: &VariantDescriptionDto,
        culture: &Culture,
        stamp: bool,
    ) -> Result<(), CacheError> {
        let mut conflicts = Conflicts::new();
        self.store.update(dto.id.clone(), |current| {
            let mut item = match current {
                Some(item) => VariantDescriptionItem::clone(item),
                None => VariantDescriptionItem::new(&dto.id),
            };
            item.merge(dto, culture, &mut conflicts);
            if stamp {
                item.source_cache = Some(NAME);
            }
            Some(Arc::new(item))
        })?;
        log_conflicts(NAME, &dto.id, &conflicts);
        Ok(())
    }

    /// Merges the complete catalogue of `culture` and marks the culture as loaded.
    ///
    /// A concurrent dispose may interrupt the commit halfway. The items written so far are
    /// cleared along with the store, and the culture is never marked as loaded.
    fn commit(
        &self,
        dtos: &[VariantDescriptionDto],
        culture: &Culture,
        stamp: bool,
    ) -> Result<(), CacheError> {
        for dto in dtos {
            self.save(dto, culture, stamp)?;
        }
        if self.store.is_disposed() {
            return Err(CacheError::Disposed(NAME));
        }
        let ids = dtos.iter().map(|dto| dto.id.clone()).collect();
        self.loaded.lock().insert(culture.clone(), ids);
        tracing::debug!(%culture, variants = dtos.len(), "loaded variant descriptions");
        Ok(())
    }

    async fn load_culture(&self, culture: &Culture, stamp: bool) -> Result<(), CacheError> {
        tracing::trace!(%culture, "fetching variant descriptions");
        metric!(
            counter("caches.fetch") += 1,
            "cache" => NAME.as_ref(),
            "endpoint" => "variant_descriptions"
        );
        // nothing is committed unless the whole catalogue arrived
        let dtos = self
            .data_router
            .variant_descriptions(culture)
            .await
            .map_err(|err| {
                let id = format!("variants [{culture}]");
                CacheError::from_fetch(err, id, NAME, FetchError::is_missing_data)
            })?;
        self.commit(&dtos, culture, stamp)
    }

    /// Loads `culture`, unless it is already loaded.
    fn ensure_loaded(
        self: &Arc<Self>,
        culture: &Culture,
    ) -> BoxFuture<'static, Result<(), CacheError>> {
        self.computations.run(culture.clone(), || {
            let catalogue = Arc::clone(self);
            let culture = culture.clone();
            async move {
                if catalogue.is_loaded(&culture) {
                    return Ok(());
                }
                catalogue.load_culture(&culture, false).await
            }
        })
    }

    /// Reloads `culture` unconditionally.
    fn reload(
        self: &Arc<Self>,
        culture: &Culture,
        stamp: bool,
    ) -> BoxFuture<'static, Result<(), CacheError>> {
        self.computations.run(culture.clone(), || {
            let catalogue = Arc::clone(self);
            let culture = culture.clone();
            async move { catalogue.load_culture(&culture, stamp).await }
        })
    }

    /// Reloads all configured cultures one after another.
    ///
    /// Returns whether every culture was loaded. Failures are logged and do not stop the
    /// remaining cultures from loading.
    async fn reload_all(self: &Arc<Self>, stamp: bool) -> bool {
        let mut success = true;
        for culture in &self.cultures {
            if let Err(error) = self.reload(culture, stamp).await {
                success = false;
                log_load_error(culture, &error);
            }
        }
        success
    }
}

fn log_load_error(culture: &Culture, error: &CacheError) {
    let recoverable = matches!(error, CacheError::Disposed(_) | CacheError::Interrupted(_))
        || error.fetch_error().is_some_and(FetchError::is_recoverable);
    if recoverable {
        tracing::debug!(
            %culture,
            error = error as &dyn std::error::Error,
            "variant description load was interrupted"
        );
    } else {
        tracing::warn!(
            %culture,
            error = error as &dyn std::error::Error,
            "failed to load variant descriptions"
        );
    }
}

/// Periodically reloads all configured cultures until `cancel` fires or the catalogue is gone.
fn spawn_refresh(catalogue: &Arc<Catalogue>, config: RefreshConfig, cancel: CancellationToken) {
    if config.interval.is_zero() {
        tracing::debug!(cache = %NAME, "periodic refresh is disabled");
        return;
    }
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        tracing::warn!(cache = %NAME, "no runtime available, periodic refresh is disabled");
        return;
    };

    let catalogue: Weak<Catalogue> = Arc::downgrade(catalogue);
    runtime.spawn(async move {
        let start = Instant::now() + config.initial_delay;
        let mut interval = tokio::time::interval_at(start, config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            let Some(catalogue) = catalogue.upgrade() else {
                break;
            };
            if catalogue.store.is_disposed() {
                break;
            }

            tracing::debug!(cache = %NAME, "refreshing variant descriptions");
            catalogue.reload_all(true).await;
        }
        tracing::trace!(cache = %NAME, "periodic refresh stopped");
    });
}

/// Caches the complete catalogue of variant descriptions.
pub struct VariantDescriptionListCache {
    catalogue: Arc<Catalogue>,
    dto_types: DtoTypeSet,
    refresh: CancellationToken,
}

impl fmt::Debug for VariantDescriptionListCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VariantDescriptionListCache")
            .field("store", &self.catalogue.store)
            .field("loaded", &self.loaded_cultures())
            .finish()
    }
}

impl Drop for VariantDescriptionListCache {
    fn drop(&mut self) {
        self.refresh.cancel();
    }
}

impl VariantDescriptionListCache {
    /// Creates the cache, registers it with `manager` and starts the periodic refresh of
    /// `cultures`.
    ///
    /// The refresh only runs when this is called within a Tokio runtime.
    pub fn new(
        manager: &CacheManager,
        data_router: Arc<dyn DataRouter>,
        config: StoreConfig,
        refresh: RefreshConfig,
        cultures: Vec<Culture>,
    ) -> Result<Arc<Self>, CacheError> {
        let catalogue = Arc::new(Catalogue {
            store: CacheStore::new(NAME, config),
            data_router,
            computations: Computations::new(NAME),
            loaded: Mutex::new(BTreeMap::new()),
            cultures,
        });
        let cancel = CancellationToken::new();
        let cache = Arc::new(Self {
            catalogue: Arc::clone(&catalogue),
            dto_types: DtoTypeSet::new([
                DtoType::VariantDescription,
                DtoType::VariantDescriptionList,
            ]),
            refresh: cancel.clone(),
        });
        manager.register_cache(cache.clone())?;

        spawn_refresh(&catalogue, refresh, cancel);
        Ok(cache)
    }

    pub fn store(&self) -> &CacheStore<String, Arc<VariantDescriptionItem>> {
        &self.catalogue.store
    }

    /// The cultures that were loaded completely at least once.
    pub fn loaded_cultures(&self) -> Vec<Culture> {
        self.catalogue.loaded.lock().keys().cloned().collect()
    }

    /// Loads the catalogue for all configured cultures.
    ///
    /// Returns whether all cultures were loaded. A culture that fails to load keeps whatever
    /// earlier loads stored for it.
    pub async fn load_market_descriptions(&self) -> bool {
        if self.catalogue.store.is_disposed() {
            return false;
        }
        self.catalogue.reload_all(false).await
    }

    async fn ensure_loaded(&self, cultures: &[Culture]) -> Result<(), CacheError> {
        if cultures.is_empty() {
            return Err(CacheError::InvalidArgument(
                "at least one culture is required".into(),
            ));
        }
        if self.catalogue.store.is_disposed() {
            return Err(CacheError::Disposed(NAME));
        }
        metric!(counter("caches.access") += 1, "cache" => NAME.as_ref());

        let missing: Vec<_> = cultures
            .iter()
            .filter(|culture| !self.catalogue.is_loaded(culture))
            .collect();
        if missing.is_empty() {
            metric!(counter("caches.memory.hit") += 1, "cache" => NAME.as_ref());
            return Ok(());
        }

        future::join_all(
            missing
                .into_iter()
                .map(|culture| self.catalogue.ensure_loaded(culture)),
        )
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?;
        Ok(())
    }

    /// Returns the variant `id`, loading the catalogues of `cultures` that were never loaded.
    ///
    /// A variant that a loaded catalogue listed but that has since left the store is loaded
    /// again.
    pub async fn get_variant_description(
        &self,
        id: &str,
        cultures: &[Culture],
    ) -> Result<Arc<VariantDescriptionItem>, CacheError> {
        if id.is_empty() {
            return Err(CacheError::InvalidArgument("a variant id is required".into()));
        }
        let key = id.to_owned();
        self.ensure_loaded(cultures).await?;
        if let Some(item) = self.catalogue.store.get(&key) {
            return Ok(item);
        }

        if self.catalogue.forget_cultures_listing(id) {
            tracing::debug!(cache = %NAME, %id, "variant description is gone, reloading");
            self.ensure_loaded(cultures).await?;
        }
        self.catalogue
            .store
            .get(&key)
            .ok_or_else(|| CacheError::not_found(id, NAME))
    }

    /// Returns the whole catalogue, loading the `cultures` that were never loaded.
    pub async fn get_all_variant_descriptions(
        &self,
        cultures: &[Culture],
    ) -> Result<Vec<Arc<VariantDescriptionItem>>, CacheError> {
        self.catalogue.forget_incomplete();
        self.ensure_loaded(cultures).await?;
        let mut items = self.catalogue.store.values();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(items)
    }
}

impl SdkCache for VariantDescriptionListCache {
    fn name(&self) -> CacheName {
        NAME
    }

    fn registered_dto_types(&self) -> &DtoTypeSet {
        &self.dto_types
    }

    fn add_dto_item(
        &self,
        _id: &Urn,
        dto: &Dto,
        culture: &Culture,
        _dto_type: DtoType,
        _requester: Option<&Urn>,
    ) -> Result<bool, CacheError> {
        if self.catalogue.store.is_disposed() {
            return Err(CacheError::Disposed(NAME));
        }
        match dto {
            Dto::VariantDescription(dto) => {
                self.catalogue.save(dto, culture, false)?;
                Ok(true)
            }
            Dto::VariantDescriptionList(dtos) => {
                self.catalogue.commit(dtos, culture, false)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn cache_delete_item(&self, id: &str, item_type: CacheItemType) -> Result<(), CacheError> {
        if self.catalogue.store.is_disposed() {
            return Err(CacheError::Disposed(NAME));
        }
        if !item_type.covers(CacheItemType::VariantDescription) {
            return Ok(());
        }
        if self.catalogue.store.remove(&id.to_owned())?.is_some() {
            tracing::debug!(cache = %NAME, %id, "deleted cache item {id}");
        }
        Ok(())
    }

    fn cache_has_item(&self, id: &str, item_type: CacheItemType) -> bool {
        item_type.covers(CacheItemType::VariantDescription)
            && self.catalogue.store.contains(&id.to_owned())
    }

    fn health_check(&self) -> HealthStatus {
        if self.catalogue.store.is_disposed() {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Healthy
        }
    }

    fn dispose(&self) {
        self.refresh.cancel();
        self.catalogue.store.dispose();
        self.catalogue.computations.clear();
        self.catalogue.loaded.lock().clear();
    }
}

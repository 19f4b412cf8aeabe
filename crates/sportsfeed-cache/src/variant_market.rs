//! Lazily fetched descriptions of variant markets.
//!
//! Variant markets are numerous and usually requested for a few cultures at a time, so every
//! culture of a `(market, variant)` pair is fetched on demand. Upstream legitimately answers
//! some variants without names, which would make every lookup refetch them. Fetch attempts are
//! therefore throttled per culture.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{self, BoxFuture};
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::computation::Computations;
use crate::config::{StoreConfig, ThrottleConfig};
use crate::data_router::DataRouter;
use crate::dto::{Dto, DtoType, MarketAttributeDto, MarketDescriptionDto, SpecifierDto};
use crate::error::{CacheError, FetchError};
use crate::health::HealthStatus;
use crate::manager::CacheManager;
use crate::markets::{MappingItem, OutcomeItem, merge_mappings, merge_outcomes};
use crate::merge::{Conflicts, Translations, log_conflicts, merge_translation, translation};
use crate::sdk_cache::{DtoTypeSet, SdkCache};
use crate::store::CacheStore;
use crate::types::{CacheItemType, CacheName, Culture, Urn};

const NAME: CacheName = CacheName::VariantMarketDescriptions;

/// The key a variant market is stored under.
pub fn cache_key(market_id: u32, variant: &str) -> String {
    format!("{market_id}_{variant}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Specifier {
    pub name: String,
    pub kind: String,
}

impl Specifier {
    fn new(dto: &SpecifierDto) -> Self {
        Self {
            name: dto.name.clone(),
            kind: dto.kind.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketAttribute {
    pub name: String,
    pub description: Option<String>,
}

impl MarketAttribute {
    fn new(dto: &MarketAttributeDto) -> Self {
        Self {
            name: dto.name.clone(),
            description: dto.description.clone(),
        }
    }
}

/// The description of a single variant of a market.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketDescriptionItem {
    id: u32,
    variant: String,
    names: Translations,
    descriptions: Translations,
    outcome_type: Option<String>,
    outcomes: Vec<OutcomeItem>,
    mappings: Vec<MappingItem>,
    specifiers: Vec<Specifier>,
    attributes: Vec<MarketAttribute>,
    groups: Vec<String>,
    source_cache: Option<CacheName>,
}

impl MarketDescriptionItem {
    fn new(id: u32, variant: &str) -> Self {
        Self {
            id,
            variant: variant.to_owned(),
            names: Translations::new(),
            descriptions: Translations::new(),
            outcome_type: None,
            outcomes: Vec::new(),
            mappings: Vec::new(),
            specifiers: Vec::new(),
            attributes: Vec::new(),
            groups: Vec::new(),
            source_cache: None,
        }
    }

    fn merge(&mut self, dto: &MarketDescriptionDto, culture: &Culture, conflicts: &mut Conflicts) {
        merge_translation(&mut self.names, culture, dto.name.as_deref());
        merge_translation(&mut self.descriptions, culture, dto.description.as_deref());
        if self.outcome_type.is_none() {
            self.outcome_type = dto.outcome_type.clone();
        }
        if self.specifiers.is_empty() {
            self.specifiers = dto.specifiers.iter().map(Specifier::new).collect();
        }
        if self.attributes.is_empty() {
            self.attributes = dto.attributes.iter().map(MarketAttribute::new).collect();
        }
        if self.groups.is_empty() {
            self.groups = dto.groups.clone();
        }

        let conflicted = merge_outcomes(&mut self.outcomes, &dto.outcomes, culture, conflicts);
        merge_mappings(&mut self.mappings, &dto.mappings, culture, conflicted, conflicts);
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn variant(&self) -> &str {
        &self.variant
    }

    pub fn name(&self, culture: &Culture) -> Option<&str> {
        translation(&self.names, culture)
    }

    pub fn names(&self) -> &Translations {
        &self.names
    }

    pub fn description(&self, culture: &Culture) -> Option<&str> {
        translation(&self.descriptions, culture)
    }

    pub fn outcome_type(&self) -> Option<&str> {
        self.outcome_type.as_deref()
    }

    pub fn outcomes(&self) -> &[OutcomeItem] {
        &self.outcomes
    }

    pub fn mappings(&self) -> &[MappingItem] {
        &self.mappings
    }

    pub fn specifiers(&self) -> &[Specifier] {
        &self.specifiers
    }

    pub fn attributes(&self) -> &[MarketAttribute] {
        &self.attributes
    }

    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    /// The cache that last revisited this item, if any.
    pub fn source_cache(&self) -> Option<CacheName> {
        self.source_cache
    }

    /// A culture only counts as known once it has a name.
    pub fn has_culture(&self, culture: &Culture) -> bool {
        self.name(culture).is_some()
    }
}

/// Remembers recent fetch attempts per market culture.
#[derive(Debug)]
struct FetchThrottle {
    cooldown: Duration,
    compaction_threshold: usize,
    attempts: Mutex<HashMap<String, Instant>>,
}

impl FetchThrottle {
    fn new(config: ThrottleConfig) -> Self {
        Self {
            cooldown: config.cooldown,
            compaction_threshold: config.compaction_threshold,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    fn key(cache_key: &str, culture: &Culture) -> String {
        format!("{cache_key}_{culture}")
    }

    /// Whether an attempt for `key` was made within the cooldown.
    fn is_throttled(&self, key: &str) -> bool {
        self.attempts
            .lock()
            .get(key)
            .is_some_and(|attempt| attempt.elapsed() < self.cooldown)
    }

    fn record(&self, key: String) {
        let mut attempts = self.attempts.lock();
        attempts.insert(key, Instant::now());

        if attempts.len() > self.compaction_threshold {
            let before = attempts.len();
            attempts.retain(|_, attempt| attempt.elapsed() < self.cooldown);
            tracing::trace!(
                cache = %NAME,
                removed = before - attempts.len(),
                "compacted fetch throttle"
            );
        }
    }

    fn len(&self) -> usize {
        self.attempts.lock().len()
    }

    fn clear(&self) {
        self.attempts.lock().clear();
    }
}

struct Markets {
    store: CacheStore<String, Arc<MarketDescriptionItem>>,
    data_router: Arc<dyn DataRouter>,
    computations: Computations<(String, Culture)>,
    throttle: FetchThrottle,
}

/// Communication failures count as missing data here, unlike for profiles.
fn fetch_error(err: FetchError, key: &str) -> CacheError {
    CacheError::from_fetch(err, key, NAME, |err| {
        matches!(err, FetchError::Communication(_)) || err.is_missing_data()
    })
}

impl Markets {
    fn item(&self, key: &String) -> Option<Arc<MarketDescriptionItem>> {
        self.store.get(key)
    }

    fn has_culture(&self, key: &String, culture: &Culture) -> bool {
        self.item(key).is_some_and(|item| item.has_culture(culture))
    }

    fn save(
        &self,
        market_id: u32,
        variant: &str,
        dto: &MarketDescriptionDto,
        culture: &Culture,
    ) -> Result<(), CacheError> {
        let key = cache_key(market_id, variant);
        let mut conflicts = Conflicts::new();
        self.store.update(key.clone(), |current| {
            let mut item = match current {
                Some(item) => MarketDescriptionItem::clone(item),
                None => MarketDescriptionItem::new(market_id, variant),
            };
            item.merge(dto, culture, &mut conflicts);
            Some(Arc::new(item))
        })?;
        log_conflicts(NAME, &key, &conflicts);
        Ok(())
    }

    fn fetch(
        self: &Arc<Self>,
        market_id: u32,
        variant: &str,
        culture: &Culture,
    ) -> BoxFuture<'static, Result<(), CacheError>> {
        let key = cache_key(market_id, variant);
        self.computations.run((key, culture.clone()), || {
            let markets = Arc::clone(self);
            let variant = variant.to_owned();
            let culture = culture.clone();
            async move { markets.fetch_culture(market_id, &variant, &culture).await }
        })
    }

    async fn fetch_culture(
        &self,
        market_id: u32,
        variant: &str,
        culture: &Culture,
    ) -> Result<(), CacheError> {
        let key = cache_key(market_id, variant);
        let throttle_key = FetchThrottle::key(&key, culture);
        // another fetch may have delivered or attempted this culture in the meantime
        if self.has_culture(&key, culture) || self.throttle.is_throttled(&throttle_key) {
            return Ok(());
        }

        tracing::trace!(%key, %culture, "fetching variant market description");
        metric!(
            counter("caches.fetch") += 1,
            "cache" => NAME.as_ref(),
            "endpoint" => "variant_market_description"
        );
        let result = self
            .data_router
            .variant_market_description(market_id, variant, culture)
            .await;
        self.throttle.record(throttle_key);

        let dto = result.map_err(|err| fetch_error(err, &key))?;
        if dto.name.as_deref().is_none_or(str::is_empty) {
            tracing::debug!(%key, %culture, "received variant market description without a name");
        }
        self.save(market_id, variant, &dto, culture)
    }
}

/// Caches descriptions of variant markets, keyed by market id and variant.
pub struct VariantMarketDescriptionCache {
    markets: Arc<Markets>,
    dto_types: DtoTypeSet,
}

impl fmt::Debug for VariantMarketDescriptionCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VariantMarketDescriptionCache")
            .field("store", &self.markets.store)
            .field("computations", &self.markets.computations)
            .field("throttled", &self.markets.throttle.len())
            .finish()
    }
}

impl VariantMarketDescriptionCache {
    /// Creates the cache and registers it with `manager`.
    pub fn new(
        manager: &CacheManager,
        data_router: Arc<dyn DataRouter>,
        config: StoreConfig,
        throttle: ThrottleConfig,
    ) -> Result<Arc<Self>, CacheError> {
        let cache = Arc::new(Self {
            markets: Arc::new(Markets {
                store: CacheStore::new(NAME, config),
                data_router,
                computations: Computations::new(NAME),
                throttle: FetchThrottle::new(throttle),
            }),
            dto_types: DtoTypeSet::new([DtoType::MarketDescription]),
        });
        manager.register_cache(cache.clone())?;
        Ok(cache)
    }

    pub fn store(&self) -> &CacheStore<String, Arc<MarketDescriptionItem>> {
        &self.markets.store
    }

    /// Returns the description of `variant` of market `market_id`, fetching the `cultures` that
    /// are not known yet.
    ///
    /// Cultures that were attempted within the throttle cooldown are not fetched again. The item
    /// may then lack their names.
    pub async fn get_market_description(
        &self,
        market_id: u32,
        variant: &str,
        cultures: &[Culture],
    ) -> Result<Arc<MarketDescriptionItem>, CacheError> {
        if variant.is_empty() {
            return Err(CacheError::InvalidArgument("a variant is required".into()));
        }
        if cultures.is_empty() {
            return Err(CacheError::InvalidArgument(
                "at least one culture is required".into(),
            ));
        }
        if self.markets.store.is_disposed() {
            return Err(CacheError::Disposed(NAME));
        }
        metric!(counter("caches.access") += 1, "cache" => NAME.as_ref());

        let key = cache_key(market_id, variant);
        let (throttled, missing): (Vec<_>, Vec<_>) = cultures
            .iter()
            .filter(|culture| !self.markets.has_culture(&key, culture))
            .partition(|culture| {
                let throttle_key = FetchThrottle::key(&key, culture);
                self.markets.throttle.is_throttled(&throttle_key)
            });

        for culture in &throttled {
            tracing::trace!(%key, %culture, "skipping throttled fetch");
            metric!(counter("caches.fetch.throttled") += 1, "cache" => NAME.as_ref());
        }

        if missing.is_empty() && throttled.is_empty() {
            metric!(counter("caches.memory.hit") += 1, "cache" => NAME.as_ref());
        } else {
            let fetches = missing
                .into_iter()
                .map(|culture| self.markets.fetch(market_id, variant, culture));
            future::join_all(fetches)
                .await
                .into_iter()
                .collect::<Result<Vec<_>, _>>()?;
        }

        self.markets
            .item(&key)
            .ok_or_else(|| CacheError::not_found(&key, NAME))
    }

    /// Marks the stored variant as revisited by this cache.
    ///
    /// Returns whether the variant was stored.
    pub fn update_cache_item(&self, market_id: u32, variant: &str) -> Result<bool, CacheError> {
        let key = cache_key(market_id, variant);
        let updated = self.markets.store.update(key, |current| {
            current.map(|item| {
                let mut item = MarketDescriptionItem::clone(item);
                item.source_cache = Some(NAME);
                Arc::new(item)
            })
        })?;
        Ok(updated.is_some())
    }
}

impl SdkCache for VariantMarketDescriptionCache {
    fn name(&self) -> CacheName {
        NAME
    }

    fn registered_dto_types(&self) -> &DtoTypeSet {
        &self.dto_types
    }

    fn add_dto_item(
        &self,
        id: &Urn,
        dto: &Dto,
        culture: &Culture,
        _dto_type: DtoType,
        _requester: Option<&Urn>,
    ) -> Result<bool, CacheError> {
        if self.markets.store.is_disposed() {
            return Err(CacheError::Disposed(NAME));
        }
        let Dto::MarketDescription(dto) = dto else {
            return Ok(false);
        };
        // plain markets are not variants and are left to other caches
        let Some(variant) = dto.variant.as_deref().filter(|variant| !variant.is_empty()) else {
            tracing::trace!(%id, market = dto.id, "ignoring market description without variant");
            return Ok(false);
        };

        self.markets.save(dto.id, variant, dto, culture)?;
        Ok(true)
    }

    fn cache_delete_item(&self, id: &str, item_type: CacheItemType) -> Result<(), CacheError> {
        if self.markets.store.is_disposed() {
            return Err(CacheError::Disposed(NAME));
        }
        if !item_type.covers(CacheItemType::MarketDescription) {
            return Ok(());
        }
        if self.markets.store.remove(&id.to_owned())?.is_some() {
            tracing::debug!(cache = %NAME, %id, "deleted cache item {id}");
        }
        Ok(())
    }

    fn cache_has_item(&self, id: &str, item_type: CacheItemType) -> bool {
        item_type.covers(CacheItemType::MarketDescription)
            && self.markets.store.contains(&id.to_owned())
    }

    fn health_check(&self) -> HealthStatus {
        if self.markets.store.is_disposed() {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Healthy
        }
    }

    fn dispose(&self) {
        self.markets.store.dispose();
        self.markets.computations.clear();
        self.markets.throttle.clear();
    }
}

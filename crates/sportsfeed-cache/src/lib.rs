//! Caching layer of the sports data feed SDK.
//!
//! Entity caches keep descriptive data (competitor and player profiles, variant market
//! descriptions) in memory, merge data arriving from the feed into it, and fetch whatever is
//! missing from a [`DataRouter`]. The [`CacheManager`] routes incoming DTOs to the caches that
//! consume them.

use std::sync::Arc;

#[macro_use]
pub mod metrics;

pub mod computation;
pub mod config;
pub mod data_router;
pub mod dto;
pub mod error;
pub mod health;
pub mod logging;
pub mod manager;
pub mod markets;
pub mod merge;
pub mod profile;
pub mod sdk_cache;
pub mod store;
pub mod types;
pub mod variant_list;
pub mod variant_market;


pub use config::Config;
pub use data_router::DataRouter;
pub use dto::{Dto, DtoType};
pub use error::{CacheError, FetchError};
pub use health::{HealthReport, HealthStatus};
pub use manager::CacheManager;
pub use profile::ProfileCache;
pub use sdk_cache::SdkCache;
pub use store::CacheStore;
pub use types::{CacheItemType, CacheName, Culture, Urn};
pub use variant_list::VariantDescriptionListCache;
pub use variant_market::VariantMarketDescriptionCache;

/// All entity caches, registered with a shared [`CacheManager`].
#[derive(Debug)]
pub struct SdkCaches {
    pub manager: Arc<CacheManager>,
    pub profiles: Arc<ProfileCache>,
    pub variant_markets: Arc<VariantMarketDescriptionCache>,
    pub variant_list: Arc<VariantDescriptionListCache>,
}

impl SdkCaches {
    /// Creates all caches as configured.
    ///
    /// The periodic refresh of the variant catalogue only runs when this is called within a
    /// Tokio runtime.
    pub fn from_config(
        config: &Config,
        data_router: Arc<dyn DataRouter>,
    ) -> Result<Self, CacheError> {
        let manager = Arc::new(CacheManager::new());
        let caches = &config.caches;

        let profiles = ProfileCache::new(&manager, Arc::clone(&data_router), caches.profile)?;
        let variant_markets = VariantMarketDescriptionCache::new(
            &manager,
            Arc::clone(&data_router),
            caches.variant_markets,
            config.variant_market_throttle,
        )?;
        let variant_list = VariantDescriptionListCache::new(
            &manager,
            data_router,
            caches.variant_list,
            config.variant_list_refresh,
            config.cultures.clone(),
        )?;

        Ok(Self {
            manager,
            profiles,
            variant_markets,
            variant_list,
        })
    }
}

use async_trait::async_trait;

use crate::dto::{
    CompetitorProfileDto, MarketDescriptionDto, PlayerProfileDto, SimpleTeamProfileDto,
    VariantDescriptionDto,
};
use crate::error::FetchError;
use crate::types::{Culture, Urn};

/// The data source the caches fetch missing data from.
///
/// Every call fetches exactly one culture. Implementations are free to complete concurrent
/// calls in any order.
#[async_trait]
pub trait DataRouter: Send + Sync + 'static {
    async fn competitor_profile(
        &self,
        id: &Urn,
        culture: &Culture,
    ) -> Result<CompetitorProfileDto, FetchError>;

    async fn simple_team_profile(
        &self,
        id: &Urn,
        culture: &Culture,
    ) -> Result<SimpleTeamProfileDto, FetchError>;

    /// Fetches a player profile. `competitor_id` is a hint about the team the player is
    /// known to belong to.
    async fn player_profile(
        &self,
        id: &Urn,
        culture: &Culture,
        competitor_id: Option<&Urn>,
    ) -> Result<PlayerProfileDto, FetchError>;

    async fn variant_market_description(
        &self,
        market_id: u32,
        variant: &str,
        culture: &Culture,
    ) -> Result<MarketDescriptionDto, FetchError>;

    /// Fetches the complete catalogue of variant descriptions.
    async fn variant_descriptions(
        &self,
        culture: &Culture,
    ) -> Result<Vec<VariantDescriptionDto>, FetchError>;
}

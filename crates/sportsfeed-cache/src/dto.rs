//! Data-transfer objects as produced by the deserialization layer.
//!
//! Every DTO carries the data of exactly one culture. The caches merge them into their
//! multi-culture cache items.

use std::collections::BTreeMap;
use std::fmt;

use crate::types::Urn;

/// The dispatch tag a DTO is saved under.
///
/// Caches register for a set of these tags with the [`CacheManager`](crate::CacheManager).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DtoType {
    Competitor,
    CompetitorProfile,
    SimpleTeamProfile,
    PlayerProfile,
    SportEventSummary,
    MatchSummary,
    Fixture,
    SportEventSummaryList,
    MarketDescription,
    VariantDescription,
    VariantDescriptionList,
}

impl fmt::Display for DtoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A basic player as embedded in a competitor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerCompetitorDto {
    pub id: Urn,
    pub name: Option<String>,
    pub abbreviation: Option<String>,
    pub nationality: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JerseyDto {
    pub kind: String,
    pub base: Option<String>,
    pub number: Option<String>,
    pub sleeve: Option<String>,
}

/// A competitor as embedded in summaries and fixtures.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompetitorDto {
    pub id: Urn,
    pub name: Option<String>,
    pub abbreviation: Option<String>,
    pub country_name: Option<String>,
    pub country_code: Option<String>,
    pub gender: Option<String>,
    pub age_group: Option<String>,
    pub state: Option<String>,
    pub reference_ids: BTreeMap<String, String>,
    /// Basic players, if the source lists any.
    pub players: Option<Vec<PlayerCompetitorDto>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerProfileDto {
    pub id: Urn,
    pub name: Option<String>,
    pub full_name: Option<String>,
    pub nationality: Option<String>,
    pub country_code: Option<String>,
    pub kind: Option<String>,
    pub date_of_birth: Option<String>,
    pub gender: Option<String>,
    pub height: Option<u32>,
    pub weight: Option<u32>,
    pub jersey_number: Option<u32>,
    pub nickname: Option<String>,
    /// The competitor this profile was delivered with.
    pub competitor_id: Option<Urn>,
}

/// A full competitor profile, including the profiles of all its players.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompetitorProfileDto {
    pub competitor: CompetitorDto,
    pub players: Vec<PlayerProfileDto>,
    pub jerseys: Vec<JerseyDto>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimpleTeamProfileDto {
    pub competitor: CompetitorDto,
}

/// A sport event summary (also used for match summaries and fixtures).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SportEventSummaryDto {
    pub id: Urn,
    pub competitors: Vec<CompetitorDto>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutcomeDescriptionDto {
    pub id: String,
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutcomeMappingDto {
    pub outcome_id: String,
    pub product_outcome_id: String,
    pub product_outcome_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketMappingDto {
    pub product_ids: Vec<u32>,
    pub sport_id: Option<Urn>,
    pub market_id: String,
    pub valid_for: Option<String>,
    pub outcome_mappings: Vec<OutcomeMappingDto>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpecifierDto {
    pub name: String,
    pub kind: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketAttributeDto {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketDescriptionDto {
    pub id: u32,
    pub variant: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub outcome_type: Option<String>,
    pub outcomes: Vec<OutcomeDescriptionDto>,
    pub mappings: Vec<MarketMappingDto>,
    pub specifiers: Vec<SpecifierDto>,
    pub attributes: Vec<MarketAttributeDto>,
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariantDescriptionDto {
    pub id: String,
    pub outcomes: Vec<OutcomeDescriptionDto>,
    pub mappings: Vec<MarketMappingDto>,
}

/// Any DTO that can be handed to [`CacheManager::save_dto`](crate::CacheManager::save_dto).
#[derive(Debug, Clone, PartialEq)]
pub enum Dto {
    Competitor(CompetitorDto),
    CompetitorProfile(CompetitorProfileDto),
    SimpleTeamProfile(SimpleTeamProfileDto),
    PlayerProfile(PlayerProfileDto),
    SportEventSummary(SportEventSummaryDto),
    SportEventSummaryList(Vec<SportEventSummaryDto>),
    MarketDescription(MarketDescriptionDto),
    VariantDescription(VariantDescriptionDto),
    VariantDescriptionList(Vec<VariantDescriptionDto>),
}

impl Dto {
    /// The concrete shape of this DTO, used for diagnostics.
    pub fn shape(&self) -> &'static str {
        match self {
            Dto::Competitor(_) => "CompetitorDto",
            Dto::CompetitorProfile(_) => "CompetitorProfileDto",
            Dto::SimpleTeamProfile(_) => "SimpleTeamProfileDto",
            Dto::PlayerProfile(_) => "PlayerProfileDto",
            Dto::SportEventSummary(_) => "SportEventSummaryDto",
            Dto::SportEventSummaryList(_) => "Vec<SportEventSummaryDto>",
            Dto::MarketDescription(_) => "MarketDescriptionDto",
            Dto::VariantDescription(_) => "VariantDescriptionDto",
            Dto::VariantDescriptionList(_) => "Vec<VariantDescriptionDto>",
        }
    }

    /// Whether this DTO has the shape that is promised by `dto_type`.
    pub fn matches(&self, dto_type: DtoType) -> bool {
        matches!(
            (self, dto_type),
            (Dto::Competitor(_), DtoType::Competitor)
                | (Dto::CompetitorProfile(_), DtoType::CompetitorProfile)
                | (Dto::SimpleTeamProfile(_), DtoType::SimpleTeamProfile)
                | (Dto::PlayerProfile(_), DtoType::PlayerProfile)
                | (
                    Dto::SportEventSummary(_),
                    DtoType::SportEventSummary | DtoType::MatchSummary | DtoType::Fixture
                )
                | (Dto::SportEventSummaryList(_), DtoType::SportEventSummaryList)
                | (Dto::MarketDescription(_), DtoType::MarketDescription)
                | (Dto::VariantDescription(_), DtoType::VariantDescription)
                | (Dto::VariantDescriptionList(_), DtoType::VariantDescriptionList)
        )
    }
}

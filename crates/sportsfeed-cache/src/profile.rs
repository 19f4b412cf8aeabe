//! Competitor and player profiles.
//!
//! Competitors and players share a single store, keyed by their [`Urn`]. A competitor profile
//! fetch also delivers the profiles of all its players, which are stored as a side effect. A
//! later lookup for one of those players is answered without another fetch.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use futures::future::{self, BoxFuture};

use crate::computation::Computations;
use crate::config::StoreConfig;
use crate::data_router::DataRouter;
use crate::dto::{
    CompetitorDto, CompetitorProfileDto, Dto, DtoType, JerseyDto, PlayerCompetitorDto,
    PlayerProfileDto, SimpleTeamProfileDto, SportEventSummaryDto,
};
use crate::error::{CacheError, FetchError};
use crate::health::HealthStatus;
use crate::manager::CacheManager;
use crate::merge::{
    Conflicts, Translations, log_conflicts, merge_collection, merge_translation, merge_value,
    record_conflict, translation,
};
use crate::sdk_cache::{DtoTypeSet, SdkCache, log_saving_dto_conflict};
use crate::store::CacheStore;
use crate::types::{CacheItemType, CacheName, Culture, Urn};

const NAME: CacheName = CacheName::Profiles;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JerseyItem {
    pub kind: String,
    pub base: Option<String>,
    pub number: Option<String>,
    pub sleeve: Option<String>,
}

impl JerseyItem {
    fn new(dto: &JerseyDto) -> Self {
        Self {
            kind: dto.kind.clone(),
            base: dto.base.clone(),
            number: dto.number.clone(),
            sleeve: dto.sleeve.clone(),
        }
    }
}

/// A competitor, merged from all cultures seen so far.
#[derive(Debug, Clone, PartialEq)]
pub struct CompetitorItem {
    id: Urn,
    names: Translations,
    abbreviations: Translations,
    countries: Translations,
    country_code: Option<String>,
    gender: Option<String>,
    age_group: Option<String>,
    state: Option<String>,
    reference_ids: BTreeMap<String, String>,
    associated_player_ids: Vec<Urn>,
    jerseys: Vec<JerseyItem>,
    fetched_cultures: BTreeSet<Culture>,
}

impl CompetitorItem {
    fn new(id: Urn) -> Self {
        Self {
            id,
            names: Translations::new(),
            abbreviations: Translations::new(),
            countries: Translations::new(),
            country_code: None,
            gender: None,
            age_group: None,
            state: None,
            reference_ids: BTreeMap::new(),
            associated_player_ids: Vec::new(),
            jerseys: Vec::new(),
            fetched_cultures: BTreeSet::new(),
        }
    }

    /// Merges the competitor's own fields.
    ///
    /// The players embedded in a sport event are only a lineup, so the associated players are
    /// left to the full profile.
    fn merge_competitor(&mut self, dto: &CompetitorDto, culture: &Culture) {
        merge_translation(&mut self.names, culture, dto.name.as_deref());
        merge_translation(&mut self.abbreviations, culture, dto.abbreviation.as_deref());
        merge_translation(&mut self.countries, culture, dto.country_name.as_deref());
        merge_value(&mut self.country_code, dto.country_code.as_ref());
        merge_value(&mut self.gender, dto.gender.as_ref());
        merge_value(&mut self.age_group, dto.age_group.as_ref());
        merge_value(&mut self.state, dto.state.as_ref());
        for (key, value) in &dto.reference_ids {
            self.reference_ids
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }

    fn merge_profile(
        &mut self,
        dto: &CompetitorProfileDto,
        culture: &Culture,
        conflicts: &mut Conflicts,
    ) {
        self.merge_competitor(&dto.competitor, culture);

        let result = merge_collection(
            &mut self.associated_player_ids,
            &dto.players,
            Urn::clone,
            |player| player.id.clone(),
            |player| player.id.clone(),
            |_, _| {},
        );
        record_conflict(conflicts, "associated players", result);

        let result = merge_collection(
            &mut self.jerseys,
            &dto.jerseys,
            |jersey| jersey.kind.clone(),
            |jersey| jersey.kind.clone(),
            JerseyItem::new,
            |_, _| {},
        );
        record_conflict(conflicts, "jerseys", result);

        self.fetched_cultures.insert(culture.clone());
    }

    fn merge_simple_team(&mut self, dto: &SimpleTeamProfileDto, culture: &Culture) {
        self.merge_competitor(&dto.competitor, culture);
        self.fetched_cultures.insert(culture.clone());
    }

    pub fn id(&self) -> &Urn {
        &self.id
    }

    pub fn name(&self, culture: &Culture) -> Option<&str> {
        translation(&self.names, culture)
    }

    pub fn names(&self) -> &Translations {
        &self.names
    }

    pub fn abbreviation(&self, culture: &Culture) -> Option<&str> {
        translation(&self.abbreviations, culture)
    }

    pub fn country(&self, culture: &Culture) -> Option<&str> {
        translation(&self.countries, culture)
    }

    pub fn country_code(&self) -> Option<&str> {
        self.country_code.as_deref()
    }

    pub fn gender(&self) -> Option<&str> {
        self.gender.as_deref()
    }

    pub fn age_group(&self) -> Option<&str> {
        self.age_group.as_deref()
    }

    pub fn state(&self) -> Option<&str> {
        self.state.as_deref()
    }

    pub fn reference_ids(&self) -> &BTreeMap<String, String> {
        &self.reference_ids
    }

    pub fn associated_player_ids(&self) -> &[Urn] {
        &self.associated_player_ids
    }

    pub fn jerseys(&self) -> &[JerseyItem] {
        &self.jerseys
    }

    /// Whether the full profile has been fetched for `culture`.
    ///
    /// Data taken from sport event summaries does not count, since it lacks players and jerseys.
    pub fn has_profile(&self, culture: &Culture) -> bool {
        self.fetched_cultures.contains(culture)
    }
}

/// A player, merged from all cultures seen so far.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerItem {
    id: Urn,
    names: Translations,
    full_names: Translations,
    abbreviations: Translations,
    nationalities: Translations,
    country_code: Option<String>,
    kind: Option<String>,
    date_of_birth: Option<String>,
    gender: Option<String>,
    height: Option<u32>,
    weight: Option<u32>,
    jersey_number: Option<u32>,
    nickname: Option<String>,
    competitor_id: Option<Urn>,
    fetched_cultures: BTreeSet<Culture>,
}

impl PlayerItem {
    fn new(id: Urn) -> Self {
        Self {
            id,
            names: Translations::new(),
            full_names: Translations::new(),
            abbreviations: Translations::new(),
            nationalities: Translations::new(),
            country_code: None,
            kind: None,
            date_of_birth: None,
            gender: None,
            height: None,
            weight: None,
            jersey_number: None,
            nickname: None,
            competitor_id: None,
            fetched_cultures: BTreeSet::new(),
        }
    }

    fn merge_basic(&mut self, dto: &PlayerCompetitorDto, culture: &Culture, competitor_id: &Urn) {
        merge_translation(&mut self.names, culture, dto.name.as_deref());
        merge_translation(&mut self.abbreviations, culture, dto.abbreviation.as_deref());
        merge_translation(&mut self.nationalities, culture, dto.nationality.as_deref());
        merge_value(&mut self.competitor_id, Some(competitor_id));
    }

    fn merge_profile(
        &mut self,
        dto: &PlayerProfileDto,
        culture: &Culture,
        competitor_id: Option<&Urn>,
    ) {
        merge_translation(&mut self.names, culture, dto.name.as_deref());
        merge_translation(&mut self.full_names, culture, dto.full_name.as_deref());
        merge_translation(&mut self.nationalities, culture, dto.nationality.as_deref());
        merge_value(&mut self.country_code, dto.country_code.as_ref());
        merge_value(&mut self.kind, dto.kind.as_ref());
        merge_value(&mut self.date_of_birth, dto.date_of_birth.as_ref());
        merge_value(&mut self.gender, dto.gender.as_ref());
        merge_value(&mut self.height, dto.height.as_ref());
        merge_value(&mut self.weight, dto.weight.as_ref());
        merge_value(&mut self.jersey_number, dto.jersey_number.as_ref());
        merge_value(&mut self.nickname, dto.nickname.as_ref());
        merge_value(&mut self.competitor_id, competitor_id.or(dto.competitor_id.as_ref()));
        self.fetched_cultures.insert(culture.clone());
    }

    pub fn id(&self) -> &Urn {
        &self.id
    }

    pub fn name(&self, culture: &Culture) -> Option<&str> {
        translation(&self.names, culture)
    }

    pub fn names(&self) -> &Translations {
        &self.names
    }

    pub fn full_name(&self, culture: &Culture) -> Option<&str> {
        translation(&self.full_names, culture)
    }

    pub fn abbreviation(&self, culture: &Culture) -> Option<&str> {
        translation(&self.abbreviations, culture)
    }

    pub fn nationality(&self, culture: &Culture) -> Option<&str> {
        translation(&self.nationalities, culture)
    }

    pub fn country_code(&self) -> Option<&str> {
        self.country_code.as_deref()
    }

    pub fn kind(&self) -> Option<&str> {
        self.kind.as_deref()
    }

    pub fn date_of_birth(&self) -> Option<&str> {
        self.date_of_birth.as_deref()
    }

    pub fn gender(&self) -> Option<&str> {
        self.gender.as_deref()
    }

    pub fn height(&self) -> Option<u32> {
        self.height
    }

    pub fn weight(&self) -> Option<u32> {
        self.weight
    }

    pub fn jersey_number(&self) -> Option<u32> {
        self.jersey_number
    }

    pub fn nickname(&self) -> Option<&str> {
        self.nickname.as_deref()
    }

    /// The competitor this player was last seen with.
    pub fn competitor_id(&self) -> Option<&Urn> {
        self.competitor_id.as_ref()
    }

    /// Whether anything is known about this player in `culture`.
    ///
    /// Players taken from a competitor only carry a name, which is all a lookup needs.
    pub fn has_culture(&self, culture: &Culture) -> bool {
        self.fetched_cultures.contains(culture) || self.name(culture).is_some()
    }
}

/// An item of the profile store.
#[derive(Debug, Clone)]
pub enum ProfileItem {
    Competitor(Arc<CompetitorItem>),
    Player(Arc<PlayerItem>),
}

impl ProfileItem {
    pub fn item_type(&self) -> CacheItemType {
        match self {
            Self::Competitor(_) => CacheItemType::Competitor,
            Self::Player(_) => CacheItemType::Player,
        }
    }
}

fn fetch_error(err: FetchError, id: &Urn) -> CacheError {
    tracing::debug!(cache = %NAME, %id, error = &err as &dyn std::error::Error, "fetch failed");
    CacheError::from_fetch(err, id, NAME, FetchError::is_missing_data)
}

/// An existing item of another kind is never replaced.
fn log_kind_mismatch(id: &Urn, expected: CacheItemType) {
    tracing::warn!(
        cache = %NAME,
        %id,
        expected = ?expected,
        "stored item has a different kind, skipping update"
    );
}

/// The state shared between the cache and its spawned fetches.
struct Profiles {
    store: CacheStore<Urn, ProfileItem>,
    data_router: Arc<dyn DataRouter>,
    computations: Computations<(Urn, Culture)>,
}

impl Profiles {
    fn competitor(&self, id: &Urn) -> Option<Arc<CompetitorItem>> {
        match self.store.get(id)? {
            ProfileItem::Competitor(item) => Some(item),
            ProfileItem::Player(_) => None,
        }
    }

    fn player(&self, id: &Urn) -> Option<Arc<PlayerItem>> {
        match self.store.get(id)? {
            ProfileItem::Player(item) => Some(item),
            ProfileItem::Competitor(_) => None,
        }
    }

    fn has_competitor_profile(&self, id: &Urn, culture: &Culture) -> bool {
        self.competitor(id)
            .is_some_and(|item| item.has_profile(culture))
    }

    fn has_player(&self, id: &Urn, culture: &Culture) -> bool {
        self.player(id).is_some_and(|item| item.has_culture(culture))
    }

    fn update_competitor<F>(&self, id: &Urn, f: F) -> Result<(), CacheError>
    where
        F: FnOnce(&mut CompetitorItem, &mut Conflicts),
    {
        let mut conflicts = Conflicts::new();
        let mut mismatch = false;
        self.store.update(id.clone(), |current| {
            let mut item = match current {
                Some(ProfileItem::Competitor(item)) => CompetitorItem::clone(item),
                Some(ProfileItem::Player(_)) => {
                    mismatch = true;
                    return None;
                }
                None => CompetitorItem::new(id.clone()),
            };
            f(&mut item, &mut conflicts);
            Some(ProfileItem::Competitor(Arc::new(item)))
        })?;
        if mismatch {
            log_kind_mismatch(id, CacheItemType::Competitor);
        }
        log_conflicts(NAME, id, &conflicts);
        Ok(())
    }

    fn update_player<F>(&self, id: &Urn, f: F) -> Result<(), CacheError>
    where
        F: FnOnce(&mut PlayerItem),
    {
        let mut mismatch = false;
        self.store.update(id.clone(), |current| {
            let mut item = match current {
                Some(ProfileItem::Player(item)) => PlayerItem::clone(item),
                Some(ProfileItem::Competitor(_)) => {
                    mismatch = true;
                    return None;
                }
                None => PlayerItem::new(id.clone()),
            };
            f(&mut item);
            Some(ProfileItem::Player(Arc::new(item)))
        })?;
        if mismatch {
            log_kind_mismatch(id, CacheItemType::Player);
        }
        Ok(())
    }

    fn competitor_or_placeholder(&self, id: &Urn) -> Result<Arc<CompetitorItem>, CacheError> {
        let item = self.store.update(id.clone(), |current| match current {
            Some(_) => None,
            None => Some(ProfileItem::Competitor(Arc::new(CompetitorItem::new(
                id.clone(),
            )))),
        })?;
        match item {
            Some(ProfileItem::Competitor(item)) => Ok(item),
            _ => Err(CacheError::not_found(id, NAME)),
        }
    }

    fn player_or_placeholder(&self, id: &Urn) -> Result<Arc<PlayerItem>, CacheError> {
        let item = self.store.update(id.clone(), |current| match current {
            Some(_) => None,
            None => Some(ProfileItem::Player(Arc::new(PlayerItem::new(id.clone())))),
        })?;
        match item {
            Some(ProfileItem::Player(item)) => Ok(item),
            _ => Err(CacheError::not_found(id, NAME)),
        }
    }

    fn save_competitor(
        &self,
        id: &Urn,
        dto: &CompetitorDto,
        culture: &Culture,
    ) -> Result<(), CacheError> {
        for player in dto.players.iter().flatten() {
            self.update_player(&player.id, |item| item.merge_basic(player, culture, id))?;
        }
        self.update_competitor(id, |item, _| item.merge_competitor(dto, culture))
    }

    /// Stores the players before the competitor, so a competitor marked as fetched always has
    /// its players in place.
    fn save_competitor_profile(
        &self,
        id: &Urn,
        dto: &CompetitorProfileDto,
        culture: &Culture,
    ) -> Result<(), CacheError> {
        for player in &dto.players {
            self.update_player(&player.id, |item| {
                item.merge_profile(player, culture, Some(id))
            })?;
        }
        self.update_competitor(id, |item, conflicts| {
            item.merge_profile(dto, culture, conflicts)
        })
    }

    fn save_simple_team(
        &self,
        id: &Urn,
        dto: &SimpleTeamProfileDto,
        culture: &Culture,
    ) -> Result<(), CacheError> {
        self.update_competitor(id, |item, _| item.merge_simple_team(dto, culture))
    }

    fn save_player_profile(
        &self,
        id: &Urn,
        dto: &PlayerProfileDto,
        culture: &Culture,
    ) -> Result<(), CacheError> {
        self.update_player(id, |item| item.merge_profile(dto, culture, None))
    }

    fn save_summary(
        &self,
        dto: &SportEventSummaryDto,
        culture: &Culture,
    ) -> Result<bool, CacheError> {
        for competitor in &dto.competitors {
            self.save_competitor(&competitor.id, competitor, culture)?;
        }
        Ok(!dto.competitors.is_empty())
    }

    fn fetch_competitor(
        self: &Arc<Self>,
        id: &Urn,
        culture: &Culture,
    ) -> BoxFuture<'static, Result<(), CacheError>> {
        self.computations.run((id.clone(), culture.clone()), || {
            let profiles = Arc::clone(self);
            let id = id.clone();
            let culture = culture.clone();
            async move { profiles.fetch_competitor_culture(&id, &culture).await }
        })
    }

    async fn fetch_competitor_culture(
        &self,
        id: &Urn,
        culture: &Culture,
    ) -> Result<(), CacheError> {
        // a fetch that completed while this one was scheduled may have delivered the culture
        if self.has_competitor_profile(id, culture) {
            return Ok(());
        }

        if id.is_simple_team() {
            tracing::trace!(%id, %culture, "fetching simple team profile");
            metric!(
                counter("caches.fetch") += 1,
                "cache" => NAME.as_ref(),
                "endpoint" => "simple_team_profile"
            );
            let dto = self
                .data_router
                .simple_team_profile(id, culture)
                .await
                .map_err(|err| fetch_error(err, id))?;
            self.save_simple_team(id, &dto, culture)
        } else {
            tracing::trace!(%id, %culture, "fetching competitor profile");
            metric!(
                counter("caches.fetch") += 1,
                "cache" => NAME.as_ref(),
                "endpoint" => "competitor_profile"
            );
            let dto = self
                .data_router
                .competitor_profile(id, culture)
                .await
                .map_err(|err| fetch_error(err, id))?;
            self.save_competitor_profile(id, &dto, culture)
        }
    }

    fn fetch_player(
        self: &Arc<Self>,
        id: &Urn,
        culture: &Culture,
    ) -> BoxFuture<'static, Result<(), CacheError>> {
        self.computations.run((id.clone(), culture.clone()), || {
            let profiles = Arc::clone(self);
            let id = id.clone();
            let culture = culture.clone();
            async move { profiles.fetch_player_culture(&id, &culture).await }
        })
    }

    /// Resolves a player through its competitor if that competitor lacks `culture`, and
    /// through the player endpoint otherwise.
    async fn fetch_player_culture(
        self: &Arc<Self>,
        id: &Urn,
        culture: &Culture,
    ) -> Result<(), CacheError> {
        if self.has_player(id, culture) {
            return Ok(());
        }

        let competitor_id = self
            .player(id)
            .and_then(|player| player.competitor_id().cloned());
        if let Some(competitor_id) = &competitor_id {
            // the competitor may have been evicted or deleted since it delivered this player
            if !self.has_competitor_profile(competitor_id, culture) {
                self.fetch_competitor(competitor_id, culture).await?;
                if self.has_player(id, culture) {
                    return Ok(());
                }
            }
        }

        tracing::trace!(%id, %culture, "fetching player profile");
        metric!(
            counter("caches.fetch") += 1,
            "cache" => NAME.as_ref(),
            "endpoint" => "player_profile"
        );
        let dto = self
            .data_router
            .player_profile(id, culture, competitor_id.as_ref())
            .await
            .map_err(|err| fetch_error(err, id))?;
        self.save_player_profile(id, &dto, culture)
    }
}

fn ensure_cultures(cultures: &[Culture]) -> Result<(), CacheError> {
    if cultures.is_empty() {
        return Err(CacheError::InvalidArgument(
            "at least one culture is required".into(),
        ));
    }
    Ok(())
}

async fn join_fetches(
    fetches: impl IntoIterator<Item = BoxFuture<'static, Result<(), CacheError>>>,
) -> Result<(), CacheError> {
    future::join_all(fetches)
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?;
    Ok(())
}

/// Caches competitor and player profiles.
pub struct ProfileCache {
    profiles: Arc<Profiles>,
    dto_types: DtoTypeSet,
}

impl fmt::Debug for ProfileCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProfileCache")
            .field("store", &self.profiles.store)
            .field("computations", &self.profiles.computations)
            .finish()
    }
}

impl ProfileCache {
    /// Creates the cache and registers it with `manager`.
    pub fn new(
        manager: &CacheManager,
        data_router: Arc<dyn DataRouter>,
        config: StoreConfig,
    ) -> Result<Arc<Self>, CacheError> {
        let cache = Arc::new(Self {
            profiles: Arc::new(Profiles {
                store: CacheStore::new(NAME, config),
                data_router,
                computations: Computations::new(NAME),
            }),
            dto_types: DtoTypeSet::new([
                DtoType::Competitor,
                DtoType::CompetitorProfile,
                DtoType::SimpleTeamProfile,
                DtoType::PlayerProfile,
                DtoType::SportEventSummary,
                DtoType::MatchSummary,
                DtoType::Fixture,
                DtoType::SportEventSummaryList,
            ]),
        });
        manager.register_cache(cache.clone())?;
        Ok(cache)
    }

    /// The underlying store, holding competitors and players alike.
    pub fn store(&self) -> &CacheStore<Urn, ProfileItem> {
        &self.profiles.store
    }

    fn ensure_not_disposed(&self) -> Result<(), CacheError> {
        if self.profiles.store.is_disposed() {
            return Err(CacheError::Disposed(NAME));
        }
        Ok(())
    }

    /// Returns the competitor `id`, fetching the `cultures` not yet known if `fetch_missing` is
    /// set.
    ///
    /// Without `fetch_missing`, whatever is cached is returned, which may be an empty item.
    pub async fn get_competitor_profile(
        &self,
        id: &Urn,
        cultures: &[Culture],
        fetch_missing: bool,
    ) -> Result<Arc<CompetitorItem>, CacheError> {
        ensure_cultures(cultures)?;
        self.ensure_not_disposed()?;
        metric!(counter("caches.access") += 1, "cache" => NAME.as_ref(), "kind" => "competitor");

        let missing: Vec<_> = cultures
            .iter()
            .filter(|culture| !self.profiles.has_competitor_profile(id, culture))
            .collect();

        if missing.is_empty() {
            metric!(counter("caches.memory.hit") += 1, "cache" => NAME.as_ref());
        } else if !fetch_missing {
            return self.profiles.competitor_or_placeholder(id);
        } else {
            join_fetches(
                missing
                    .into_iter()
                    .map(|culture| self.profiles.fetch_competitor(id, culture)),
            )
            .await?;
        }

        self.profiles
            .competitor(id)
            .ok_or_else(|| CacheError::not_found(id, NAME))
    }

    /// Returns the player `id`, fetching the `cultures` not yet known if `fetch_missing` is set.
    pub async fn get_player_profile(
        &self,
        id: &Urn,
        cultures: &[Culture],
        fetch_missing: bool,
    ) -> Result<Arc<PlayerItem>, CacheError> {
        ensure_cultures(cultures)?;
        self.ensure_not_disposed()?;
        metric!(counter("caches.access") += 1, "cache" => NAME.as_ref(), "kind" => "player");

        let missing: Vec<_> = cultures
            .iter()
            .filter(|culture| !self.profiles.has_player(id, culture))
            .collect();

        if missing.is_empty() {
            metric!(counter("caches.memory.hit") += 1, "cache" => NAME.as_ref());
        } else if !fetch_missing {
            return self.profiles.player_or_placeholder(id);
        } else {
            join_fetches(
                missing
                    .into_iter()
                    .map(|culture| self.profiles.fetch_player(id, culture)),
            )
            .await?;
        }

        self.profiles
            .player(id)
            .ok_or_else(|| CacheError::not_found(id, NAME))
    }

    /// Returns the competitor's name per culture, empty where it is not known.
    pub async fn get_competitor_names(
        &self,
        id: &Urn,
        cultures: &[Culture],
        fetch_missing: bool,
    ) -> Result<BTreeMap<Culture, String>, CacheError> {
        let item = self
            .get_competitor_profile(id, cultures, fetch_missing)
            .await?;
        Ok(names_of(cultures, |culture| item.name(culture)))
    }

    pub async fn get_competitor_name(
        &self,
        id: &Urn,
        culture: &Culture,
        fetch_missing: bool,
    ) -> Result<String, CacheError> {
        let mut names = self
            .get_competitor_names(id, std::slice::from_ref(culture), fetch_missing)
            .await?;
        Ok(names.remove(culture).unwrap_or_default())
    }

    /// Returns the player's name per culture, empty where it is not known.
    pub async fn get_player_names(
        &self,
        id: &Urn,
        cultures: &[Culture],
        fetch_missing: bool,
    ) -> Result<BTreeMap<Culture, String>, CacheError> {
        let item = self.get_player_profile(id, cultures, fetch_missing).await?;
        Ok(names_of(cultures, |culture| item.name(culture)))
    }

    pub async fn get_player_name(
        &self,
        id: &Urn,
        culture: &Culture,
        fetch_missing: bool,
    ) -> Result<String, CacheError> {
        let mut names = self
            .get_player_names(id, std::slice::from_ref(culture), fetch_missing)
            .await?;
        Ok(names.remove(culture).unwrap_or_default())
    }
}

fn names_of<'a>(
    cultures: &[Culture],
    name: impl Fn(&Culture) -> Option<&'a str>,
) -> BTreeMap<Culture, String> {
    cultures
        .iter()
        .map(|culture| (culture.clone(), name(culture).unwrap_or_default().to_owned()))
        .collect()
}

impl SdkCache for ProfileCache {
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
        dto_type: DtoType,
        _requester: Option<&Urn>,
    ) -> Result<bool, CacheError> {
        self.ensure_not_disposed()?;
        let profiles = &self.profiles;
        match dto {
            Dto::Competitor(dto) => profiles.save_competitor(id, dto, culture).map(|_| true),
            Dto::CompetitorProfile(dto) => profiles
                .save_competitor_profile(id, dto, culture)
                .map(|_| true),
            Dto::SimpleTeamProfile(dto) => {
                profiles.save_simple_team(id, dto, culture).map(|_| true)
            }
            Dto::PlayerProfile(dto) => {
                profiles.save_player_profile(id, dto, culture).map(|_| true)
            }
            Dto::SportEventSummary(dto) => profiles.save_summary(dto, culture),
            Dto::SportEventSummaryList(summaries) => {
                let mut saved = false;
                for summary in summaries {
                    saved |= profiles.save_summary(summary, culture)?;
                }
                Ok(saved)
            }
            _ => {
                log_saving_dto_conflict(NAME, id, dto_type, dto);
                Ok(false)
            }
        }
    }

    fn cache_delete_item(&self, id: &str, item_type: CacheItemType) -> Result<(), CacheError> {
        self.ensure_not_disposed()?;
        let Ok(urn) = id.parse::<Urn>() else {
            return Ok(());
        };
        let Some(item) = self.profiles.store.get(&urn) else {
            return Ok(());
        };
        if item_type.covers(item.item_type()) && self.profiles.store.remove(&urn)?.is_some() {
            tracing::debug!(cache = %NAME, %id, "deleted cache item {id}");
        }
        Ok(())
    }

    fn cache_has_item(&self, id: &str, item_type: CacheItemType) -> bool {
        let Ok(urn) = id.parse::<Urn>() else {
            return false;
        };
        self.profiles
            .store
            .get(&urn)
            .is_some_and(|item| item_type.covers(item.item_type()))
    }

    fn health_check(&self) -> HealthStatus {
        if self.profiles.store.is_disposed() {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Healthy
        }
    }

    fn dispose(&self) {
        self.profiles.store.dispose();
        self.profiles.computations.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::test::{self, Endpoint, MockDataRouter, urn};
    use crate::types::cultures;

    use super::*;

    fn cache(router: &Arc<MockDataRouter>) -> (CacheManager, Arc<ProfileCache>) {
        test::setup();
        let manager = CacheManager::new();
        let cache = ProfileCache::new(&manager, router.clone(), StoreConfig::default()).unwrap();
        (manager, cache)
    }

    fn en() -> Culture {
        Culture::new("en")
    }

    #[tokio::test]
    async fn test_competitor_fetch_populates_players() {
        let router = MockDataRouter::new().into_arc();
        let (_manager, cache) = cache(&router);
        let id = urn("sr:competitor:1");

        let item = cache
            .get_competitor_profile(&id, &cultures(&["en", "de", "fr"]), true)
            .await
            .unwrap();

        assert_eq!(router.endpoint_hits(Endpoint::CompetitorProfile), 3);
        assert_eq!(router.accesses(), 3);
        assert_eq!(cache.store().count(), 35);
        assert_eq!(item.associated_player_ids().len(), 34);
        assert_eq!(item.jerseys().len(), 2);
        for culture in cultures(&["en", "de", "fr"]) {
            assert_eq!(
                item.name(&culture),
                Some(test::competitor_name(&id, &culture).as_str())
            );
        }

        // everything is cached now
        cache
            .get_competitor_profile(&id, &cultures(&["fr", "en"]), true)
            .await
            .unwrap();
        assert_eq!(router.accesses(), 0);
    }

    #[tokio::test]
    async fn test_partial_fetch() {
        let router = MockDataRouter::new().with_players(2).into_arc();
        let (_manager, cache) = cache(&router);
        let id = urn("sr:competitor:1");

        cache
            .get_competitor_profile(&id, &cultures(&["en"]), true)
            .await
            .unwrap();
        assert_eq!(router.accesses(), 1);

        let names = cache
            .get_competitor_names(&id, &cultures(&["en", "de", "fr"]), true)
            .await
            .unwrap();
        assert_eq!(
            router.all_hits(),
            vec![
                ("competitor_profile/sr:competitor:1/de".to_owned(), 1),
                ("competitor_profile/sr:competitor:1/fr".to_owned(), 1),
            ]
        );
        assert_eq!(names.len(), 3);
        assert!(names.values().all(|name| !name.is_empty()));
    }

    #[tokio::test]
    async fn test_concurrent_requests_are_coalesced() {
        let router = MockDataRouter::new()
            .with_delay(Duration::from_millis(50))
            .into_arc();
        let (_manager, cache) = cache(&router);
        let id = urn("sr:competitor:1");
        let wanted = cultures(&["en"]);

        let requests = (0..10).map(|_| cache.get_competitor_profile(&id, &wanted, true));
        for result in future::join_all(requests).await {
            assert!(result.unwrap().has_profile(&en()));
        }
        assert_eq!(router.accesses(), 1);
    }

    #[tokio::test]
    async fn test_overlapping_cultures_are_coalesced_per_culture() {
        let router = MockDataRouter::new()
            .with_delay(Duration::from_millis(50))
            .into_arc();
        let (_manager, cache) = cache(&router);
        let id = urn("sr:competitor:1");
        let first = cultures(&["en", "de"]);
        let second = cultures(&["de", "fr"]);

        let (a, b) = futures::join!(
            cache.get_competitor_profile(&id, &first, true),
            cache.get_competitor_profile(&id, &second, true),
        );
        a.unwrap();
        b.unwrap();

        for culture in ["en", "de", "fr"] {
            let hits = router.hits(Endpoint::CompetitorProfile, "sr:competitor:1", culture);
            assert_eq!(hits, 1, "{culture}");
        }
        assert_eq!(router.accesses(), 3);
    }

    #[tokio::test]
    async fn test_prepopulated_player() {
        let router = MockDataRouter::new().into_arc();
        let (_manager, cache) = cache(&router);
        let competitor = urn("sr:competitor:1");
        let player = test::player_id(&competitor, 5);

        cache
            .get_competitor_profile(&competitor, &cultures(&["en"]), true)
            .await
            .unwrap();
        router.accesses();

        let name = cache.get_player_name(&player, &en(), true).await.unwrap();
        assert_eq!(name, test::player_name(&player, &en()));
        assert_eq!(router.accesses(), 0);

        // the missing culture is resolved through the competitor
        let item = cache
            .get_player_profile(&player, &cultures(&["en", "de"]), true)
            .await
            .unwrap();
        assert_eq!(item.competitor_id(), Some(&competitor));
        assert!(item.has_culture(&Culture::new("de")));
        assert_eq!(
            router.all_hits(),
            vec![("competitor_profile/sr:competitor:1/de".to_owned(), 1)]
        );
    }

    #[tokio::test]
    async fn test_player_after_competitor_was_deleted() {
        let router = MockDataRouter::new().into_arc();
        let (manager, cache) = cache(&router);
        let competitor = urn("sr:competitor:1");
        let player = test::player_id(&competitor, 0);

        cache
            .get_competitor_profile(&competitor, &cultures(&["en"]), true)
            .await
            .unwrap();
        manager
            .remove_cache_item("sr:competitor:1", CacheItemType::Competitor, "test")
            .unwrap();
        assert!(!cache.cache_has_item("sr:competitor:1", CacheItemType::Competitor));
        assert!(cache.cache_has_item(&player.to_string(), CacheItemType::Player));
        router.accesses();

        cache
            .get_player_profile(&player, &cultures(&["en", "fr"]), true)
            .await
            .unwrap();
        assert_eq!(
            router.all_hits(),
            vec![("competitor_profile/sr:competitor:1/fr".to_owned(), 1)]
        );
        assert!(cache.cache_has_item("sr:competitor:1", CacheItemType::Competitor));
    }

    #[tokio::test]
    async fn test_unknown_player_uses_player_endpoint() {
        let router = MockDataRouter::new().into_arc();
        let (_manager, cache) = cache(&router);
        let player = urn("sr:player:7");

        let item = cache
            .get_player_profile(&player, &cultures(&["en", "de"]), true)
            .await
            .unwrap();
        assert_eq!(item.jersey_number(), Some(7));
        assert_eq!(router.endpoint_hits(Endpoint::PlayerProfile), 2);
        assert_eq!(router.endpoint_hits(Endpoint::CompetitorProfile), 0);
    }

    #[tokio::test]
    async fn test_simple_team() {
        let router = MockDataRouter::new().into_arc();
        let (_manager, cache) = cache(&router);
        let id = urn("sr:simpleteam:9");

        let name = cache.get_competitor_name(&id, &en(), true).await.unwrap();
        assert_eq!(name, test::competitor_name(&id, &en()));
        assert_eq!(
            router.all_hits(),
            vec![("simple_team_profile/sr:simpleteam:9/en".to_owned(), 1)]
        );
    }

    #[tokio::test]
    async fn test_without_fetching() {
        let router = MockDataRouter::new().into_arc();
        let (_manager, cache) = cache(&router);
        let id = urn("sr:competitor:3");

        let names = cache
            .get_competitor_names(&id, &cultures(&["en", "de"]), false)
            .await
            .unwrap();
        assert_eq!(names.get(&en()).map(String::as_str), Some(""));
        assert_eq!(names.len(), 2);
        assert_eq!(router.accesses(), 0);

        // the placeholder does not count as fetched
        assert!(cache.cache_has_item("sr:competitor:3", CacheItemType::Competitor));
        let name = cache.get_competitor_name(&id, &en(), true).await.unwrap();
        assert!(!name.is_empty());
        assert_eq!(router.accesses(), 1);

        let player = cache
            .get_player_name(&urn("sr:player:1"), &en(), false)
            .await
            .unwrap();
        assert_eq!(player, "");
    }

    #[tokio::test]
    async fn test_fetch_errors() {
        let router = MockDataRouter::new().into_arc();
        let (_manager, cache) = cache(&router);
        let id = urn("sr:competitor:1");

        router.fail(Endpoint::CompetitorProfile, Some("de"), || {
            FetchError::Deserialization("unexpected element".into())
        });
        let err = cache
            .get_competitor_profile(&id, &cultures(&["de"]), true)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        insta::assert_snapshot!(err.to_string(), @"item sr:competitor:1 not found in cache profiles");
        assert!(!cache.cache_has_item("sr:competitor:1", CacheItemType::All));

        router.fail(Endpoint::CompetitorProfile, None, || {
            FetchError::Other(anyhow::anyhow!("connection reset"))
        });
        let err = cache
            .get_competitor_profile(&id, &cultures(&["en"]), true)
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Fetch(_)));
        assert_eq!(err.to_string(), "connection reset");

        // failures are not remembered
        router.clear_failures();
        cache
            .get_competitor_profile(&id, &cultures(&["en", "de"]), true)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_invalid_arguments() {
        let router = MockDataRouter::new().into_arc();
        let (_manager, cache) = cache(&router);

        let err = cache
            .get_competitor_profile(&urn("sr:competitor:1"), &[], true)
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::InvalidArgument(_)));
        assert_eq!(router.accesses(), 0);
    }

    #[tokio::test]
    async fn test_names_are_append_only() {
        let router = MockDataRouter::new().into_arc();
        let (manager, cache) = cache(&router);
        let id = urn("sr:competitor:1");

        let mut dto = test::competitor(&id, &en(), 0);
        dto.name = Some("Arsenal".into());
        let saved = Dto::Competitor(dto.clone());
        manager
            .save_dto(&id, &saved, &en(), DtoType::Competitor, None)
            .unwrap();
        dto.name = Some("Arsenal FC".into());
        dto.country_code = Some("ENG".into());
        manager
            .save_dto(&id, &Dto::Competitor(dto), &en(), DtoType::Competitor, None)
            .unwrap();

        let item = cache
            .get_competitor_profile(&id, &cultures(&["en"]), false)
            .await
            .unwrap();
        assert_eq!(item.name(&en()), Some("Arsenal"));
        assert_eq!(item.country_code(), Some("GBR"));
    }

    #[tokio::test]
    async fn test_summary_prepopulates() {
        let logs = test::capture_logs();
        let router = MockDataRouter::new().into_arc();
        let (manager, cache) = cache(&router);
        let event = urn("sr:match:1");
        let home = urn("sr:competitor:1");
        let away = urn("sr:competitor:2");

        let summary = test::sport_event_summary(&event, &[home.clone(), away.clone()], &en(), 3);
        let dto = Dto::SportEventSummary(summary);
        let saved = manager
            .save_dto(&event, &dto, &en(), DtoType::MatchSummary, None)
            .unwrap();
        assert!(saved);
        assert_eq!(cache.store().count(), 8);

        let player = test::player_id(&away, 2);
        let name = cache.get_player_name(&player, &en(), true).await.unwrap();
        assert_eq!(name, test::player_name(&player, &en()));
        let name = cache.get_competitor_name(&home, &en(), false).await.unwrap();
        assert_eq!(name, test::competitor_name(&home, &en()));
        assert_eq!(router.accesses(), 0);

        // the summary only carries a lineup, the full roster comes with the profile
        let item = cache
            .get_competitor_profile(&home, &cultures(&["en"]), true)
            .await
            .unwrap();
        assert_eq!(router.accesses(), 1);
        assert_eq!(item.associated_player_ids().len(), 34);
        assert_eq!(logs.count("associated players mismatch"), 0);
    }

    #[tokio::test]
    async fn test_lookup_of_other_kind_keeps_stored_item() {
        let logs = test::capture_logs();
        let router = MockDataRouter::new().into_arc();
        let (manager, cache) = cache(&router);
        let id = urn("sr:competitor:1");

        let dto = Dto::CompetitorProfile(test::competitor_profile(&id, &en(), 2));
        manager
            .save_dto(&id, &dto, &en(), DtoType::CompetitorProfile, None)
            .unwrap();

        let result = cache.get_player_profile(&id, &cultures(&["en"]), false).await;
        assert!(matches!(result, Err(CacheError::NotFound { .. })));

        let dto = Dto::PlayerProfile(test::player_profile(&id, &en(), None));
        manager
            .save_dto(&id, &dto, &en(), DtoType::PlayerProfile, None)
            .unwrap();
        assert_eq!(logs.count("stored item has a different kind"), 1);

        let Some(ProfileItem::Competitor(item)) = cache.store().get(&id) else {
            panic!("competitor was replaced");
        };
        assert_eq!(item.associated_player_ids().len(), 2);
    }

    #[test]
    fn test_associated_players_conflict() {
        let logs = test::capture_logs();
        let router = MockDataRouter::new().into_arc();
        let (manager, cache) = cache(&router);
        let id = urn("sr:competitor:1");
        let de = Culture::new("de");

        let dto = Dto::CompetitorProfile(test::competitor_profile(&id, &en(), 2));
        manager
            .save_dto(&id, &dto, &en(), DtoType::CompetitorProfile, None)
            .unwrap();

        let mut dto = test::competitor_profile(&id, &de, 2);
        dto.players[1] = test::player_profile(&urn("sr:player:77"), &de, Some(&id));
        let dto = Dto::CompetitorProfile(dto);
        manager
            .save_dto(&id, &dto, &de, DtoType::CompetitorProfile, None)
            .unwrap();

        let Some(ProfileItem::Competitor(item)) = cache.store().get(&id) else {
            panic!("competitor is missing");
        };
        assert_eq!(
            item.associated_player_ids(),
            &[test::player_id(&id, 0), test::player_id(&id, 1)]
        );
        // the rest of the dto is still merged
        assert_eq!(item.name(&de), Some(test::competitor_name(&id, &de).as_str()));
        assert_eq!(logs.count("associated players mismatch"), 1);
        assert!(cache.cache_has_item("sr:player:77", CacheItemType::Player));
    }

    #[test]
    fn test_delete() {
        let logs = test::capture_logs();
        let router = MockDataRouter::new().into_arc();
        let (manager, cache) = cache(&router);
        let id = urn("sr:competitor:1");

        cache
            .cache_delete_item("sr:competitor:1", CacheItemType::All)
            .unwrap();
        cache.cache_delete_item("not an urn", CacheItemType::All).unwrap();
        assert_eq!(logs.count("deleted cache item"), 0);

        let dto = test::competitor(&id, &en(), 1);
        manager
            .save_dto(&id, &Dto::Competitor(dto), &en(), DtoType::Competitor, None)
            .unwrap();

        // a player request does not remove competitors
        cache
            .cache_delete_item("sr:competitor:1", CacheItemType::Player)
            .unwrap();
        assert!(cache.cache_has_item("sr:competitor:1", CacheItemType::Competitor));
        assert!(!cache.cache_has_item("sr:competitor:1", CacheItemType::Player));

        cache
            .cache_delete_item("sr:competitor:1", CacheItemType::Competitor)
            .unwrap();
        assert!(!cache.cache_has_item("sr:competitor:1", CacheItemType::All));
        assert_eq!(logs.count("deleted cache item"), 1);
    }

    #[tokio::test]
    async fn test_dispose() {
        let router = MockDataRouter::new().into_arc();
        let (manager, cache) = cache(&router);
        let id = urn("sr:competitor:1");

        cache
            .get_competitor_profile(&id, &cultures(&["en"]), true)
            .await
            .unwrap();
        assert_eq!(manager.health_check().status, HealthStatus::Healthy);

        cache.dispose();
        cache.dispose();

        assert_eq!(cache.health_check(), HealthStatus::Unhealthy);
        assert!(!cache.cache_has_item("sr:competitor:1", CacheItemType::All));
        let err = cache
            .get_competitor_profile(&id, &cultures(&["en"]), true)
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Disposed(CacheName::Profiles)));

        let dto = Dto::Competitor(test::competitor(&id, &en(), 0));
        let result = manager.save_dto(&id, &dto, &en(), DtoType::Competitor, None);
        assert!(matches!(result, Err(CacheError::Disposed(_))));
    }

    #[tokio::test]
    async fn test_dispose_during_fetch() {
        let router = MockDataRouter::new()
            .with_delay(Duration::from_millis(50))
            .into_arc();
        let (_manager, cache) = cache(&router);
        let id = urn("sr:competitor:1");

        let wanted = cultures(&["en"]);
        let dispose = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cache.dispose();
        };
        let (result, _) = futures::join!(cache.get_competitor_profile(&id, &wanted, true), dispose);

        assert!(matches!(result, Err(CacheError::Disposed(_))));
        assert_eq!(cache.store().count(), 0);
    }
}

//! Outcome and mapping items shared by the market description caches.

use crate::dto::{MarketMappingDto, OutcomeDescriptionDto, OutcomeMappingDto};
use crate::merge::{
    CollectionMerge, Conflicts, Translations, merge_collection, merge_translation, merge_value,
    record_conflict, translation,
};
use crate::types::{Culture, Urn};

#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeItem {
    id: String,
    names: Translations,
    descriptions: Translations,
}

impl OutcomeItem {
    fn new(dto: &OutcomeDescriptionDto, culture: &Culture) -> Self {
        let mut item = Self {
            id: dto.id.clone(),
            names: Translations::new(),
            descriptions: Translations::new(),
        };
        item.merge(dto, culture);
        item
    }

    fn merge(&mut self, dto: &OutcomeDescriptionDto, culture: &Culture) {
        merge_translation(&mut self.names, culture, dto.name.as_deref());
        merge_translation(&mut self.descriptions, culture, dto.description.as_deref());
    }

    pub fn id(&self) -> &str {
        &self.id
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
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeMappingItem {
    outcome_id: String,
    product_outcome_id: String,
    product_outcome_names: Translations,
}

impl OutcomeMappingItem {
    fn new(dto: &OutcomeMappingDto, culture: &Culture) -> Self {
        let mut item = Self {
            outcome_id: dto.outcome_id.clone(),
            product_outcome_id: dto.product_outcome_id.clone(),
            product_outcome_names: Translations::new(),
        };
        item.merge(dto, culture);
        item
    }

    fn merge(&mut self, dto: &OutcomeMappingDto, culture: &Culture) {
        merge_translation(
            &mut self.product_outcome_names,
            culture,
            dto.product_outcome_name.as_deref(),
        );
    }

    pub fn outcome_id(&self) -> &str {
        &self.outcome_id
    }

    pub fn product_outcome_id(&self) -> &str {
        &self.product_outcome_id
    }

    pub fn product_outcome_name(&self, culture: &Culture) -> Option<&str> {
        translation(&self.product_outcome_names, culture)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MappingItem {
    product_ids: Vec<u32>,
    sport_id: Option<Urn>,
    market_id: String,
    valid_for: Option<String>,
    outcome_mappings: Vec<OutcomeMappingItem>,
}

/// Mappings are identified by the mapped market and the specifiers they are valid for.
fn mapping_id(market_id: &str, valid_for: Option<&str>) -> String {
    match valid_for {
        Some(valid_for) => format!("{market_id}[{valid_for}]"),
        None => market_id.to_owned(),
    }
}

impl MappingItem {
    fn new(dto: &MarketMappingDto, culture: &Culture) -> Self {
        Self {
            product_ids: dto.product_ids.clone(),
            sport_id: dto.sport_id.clone(),
            market_id: dto.market_id.clone(),
            valid_for: dto.valid_for.clone(),
            outcome_mappings: dto
                .outcome_mappings
                .iter()
                .map(|mapping| OutcomeMappingItem::new(mapping, culture))
                .collect(),
        }
    }

    fn merge(&mut self, dto: &MarketMappingDto, culture: &Culture, conflicts: &mut Conflicts) {
        merge_value(&mut self.sport_id, dto.sport_id.as_ref());
        if self.product_ids.is_empty() {
            self.product_ids = dto.product_ids.clone();
        }

        let result = merge_collection(
            &mut self.outcome_mappings,
            &dto.outcome_mappings,
            |item| item.outcome_id.clone(),
            |dto| dto.outcome_id.clone(),
            |dto| OutcomeMappingItem::new(dto, culture),
            |item, dto| item.merge(dto, culture),
        );
        record_conflict(conflicts, "outcome mappings", result);
    }

    fn id(&self) -> String {
        mapping_id(&self.market_id, self.valid_for.as_deref())
    }

    pub fn product_ids(&self) -> &[u32] {
        &self.product_ids
    }

    pub fn sport_id(&self) -> Option<&Urn> {
        self.sport_id.as_ref()
    }

    pub fn market_id(&self) -> &str {
        &self.market_id
    }

    pub fn valid_for(&self) -> Option<&str> {
        self.valid_for.as_deref()
    }

    pub fn outcome_mappings(&self) -> &[OutcomeMappingItem] {
        &self.outcome_mappings
    }
}

/// Merges the outcomes of a market into `outcomes`, returning whether the outcome ids conflicted.
///
/// A mismatch of outcome ids keeps the stored outcome set as it is. Outcomes that are known on
/// both sides still receive their translations. Other collections of the same DTO are not
/// affected.
pub(crate) fn merge_outcomes(
    outcomes: &mut Vec<OutcomeItem>,
    dtos: &[OutcomeDescriptionDto],
    culture: &Culture,
    conflicts: &mut Conflicts,
) -> bool {
    let result = merge_collection(
        outcomes,
        dtos,
        |item| item.id.clone(),
        |dto| dto.id.clone(),
        |dto| OutcomeItem::new(dto, culture),
        |item, dto| item.merge(dto, culture),
    );
    let conflicted = matches!(result, CollectionMerge::Conflict(_));
    if conflicted {
        for dto in dtos {
            if let Some(item) = outcomes.iter_mut().find(|item| item.id == dto.id) {
                item.merge(dto, culture);
            }
        }
    }
    record_conflict(conflicts, "outcomes", result);
    conflicted
}

/// Merges the mappings of a market into `mappings`.
///
/// Outcome mappings reference outcome ids, so once the outcomes of the same DTO conflicted,
/// mismatching outcome mappings are still rejected but not reported again.
pub(crate) fn merge_mappings(
    mappings: &mut Vec<MappingItem>,
    dtos: &[MarketMappingDto],
    culture: &Culture,
    outcomes_conflicted: bool,
    conflicts: &mut Conflicts,
) {
    let mut nested = Conflicts::new();
    let result = merge_collection(
        mappings,
        dtos,
        MappingItem::id,
        |dto| mapping_id(&dto.market_id, dto.valid_for.as_deref()),
        |dto| MappingItem::new(dto, culture),
        |item, dto| item.merge(dto, culture, &mut nested),
    );
    record_conflict(conflicts, "mappings", result);
    if !outcomes_conflicted {
        conflicts.extend(nested);
    }
}

//! The merge rules shared by all cache items.
//!
//! - Translations are append-only: once a culture holds a non-empty value, it is never replaced.
//! - Scalar attributes are set from the first source that supplies them.
//! - Child collections are identity sets. The first non-empty collection is taken as is. A later
//!   collection is merged member by member only if it has exactly the same identities, otherwise
//!   it is rejected as a whole.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::types::{CacheName, Culture};

pub type Translations = BTreeMap<Culture, String>;

/// Stores `value` for `culture`, unless a non-empty value is already known.
///
/// Returns whether the translation was stored.
pub fn merge_translation(
    target: &mut Translations,
    culture: &Culture,
    value: Option<&str>,
) -> bool {
    let Some(value) = value.filter(|value| !value.is_empty()) else {
        return false;
    };
    match target.get(culture) {
        Some(existing) if !existing.is_empty() => false,
        _ => {
            target.insert(culture.clone(), value.to_owned());
            true
        }
    }
}

/// Sets `target` unless it is already set.
pub fn merge_value<T: Clone>(target: &mut Option<T>, value: Option<&T>) {
    if target.is_none() {
        *target = value.cloned();
    }
}

/// Returns the translation for `culture`, if a non-empty one is known.
pub fn translation<'a>(translations: &'a Translations, culture: &Culture) -> Option<&'a str> {
    translations
        .get(culture)
        .map(String::as_str)
        .filter(|value| !value.is_empty())
}

/// Two identity sets of a child collection that do not match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub original: Vec<String>,
    pub incoming: Vec<String>,
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "original ids [{}], new ids [{}]",
            self.original.join(", "),
            self.incoming.join(", ")
        )
    }
}

/// The result of [`merge_collection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionMerge {
    /// Nothing was supplied, the stored collection is unchanged.
    Skipped,
    /// The stored collection was empty and has been taken from the incoming one.
    Initialized,
    /// Identities matched and all members were merged.
    Merged,
    /// Identities did not match, nothing was merged.
    Conflict(Conflict),
}

/// Merges an incoming child collection into a stored one, treating both as identity sets.
pub fn merge_collection<T, D, Id>(
    stored: &mut Vec<T>,
    incoming: &[D],
    stored_id: impl Fn(&T) -> Id,
    incoming_id: impl Fn(&D) -> Id,
    create: impl Fn(&D) -> T,
    mut merge: impl FnMut(&mut T, &D),
) -> CollectionMerge
where
    Id: Ord + fmt::Display,
{
    if incoming.is_empty() {
        return CollectionMerge::Skipped;
    }
    if stored.is_empty() {
        *stored = incoming.iter().map(create).collect();
        return CollectionMerge::Initialized;
    }

    let original: BTreeSet<Id> = stored.iter().map(&stored_id).collect();
    let new: BTreeSet<Id> = incoming.iter().map(&incoming_id).collect();
    if original != new || new.len() != incoming.len() {
        return CollectionMerge::Conflict(Conflict {
            original: original.iter().map(ToString::to_string).collect(),
            incoming: incoming
                .iter()
                .map(|dto| incoming_id(dto).to_string())
                .collect(),
        });
    }

    for dto in incoming {
        let id = incoming_id(dto);
        if let Some(item) = stored.iter_mut().find(|item| stored_id(item) == id) {
            merge(item, dto);
        }
    }
    CollectionMerge::Merged
}

/// Conflicts found while merging a single DTO, by collection name.
pub type Conflicts = Vec<(&'static str, Conflict)>;

/// Remembers the conflict of a collection merge, if there was one.
pub fn record_conflict(
    conflicts: &mut Conflicts,
    collection: &'static str,
    result: CollectionMerge,
) {
    if let CollectionMerge::Conflict(conflict) = result {
        conflicts.push((collection, conflict));
    }
}

/// Logs every rejected child collection.
pub fn log_conflicts(cache: CacheName, id: &dyn fmt::Display, conflicts: &Conflicts) {
    for (collection, conflict) in conflicts {
        tracing::warn!(
            cache = %cache,
            %id,
            collection,
            "{collection} mismatch while merging {id}, {conflict}; keeping the stored {collection}"
        );
        metric!(
            counter("caches.merge.conflict") += 1,
            "cache" => cache.as_ref(),
            "collection" => collection
        );
    }
}

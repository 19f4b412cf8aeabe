//! Identifiers shared by all caches.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Deserializer};
use thiserror::Error;

/// An error parsing an [`Urn`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UrnParseError {
    /// The value does not consist of exactly three `:`-separated parts.
    #[error("urn `{0}` is not of the form `prefix:type:id`")]
    Format(String),
    /// One of the parts is empty.
    #[error("urn `{0}` contains an empty component")]
    EmptyComponent(String),
    /// The numeric part could not be parsed.
    #[error("urn `{0}` has an invalid numeric id")]
    InvalidId(String),
}

/// A sport entity identifier such as `sr:competitor:1` or `sr:player:12`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Urn {
    prefix: Arc<str>,
    kind: Arc<str>,
    id: i64,
}

impl Urn {
    pub fn new(prefix: &str, kind: &str, id: i64) -> Self {
        Self {
            prefix: prefix.into(),
            kind: kind.into(),
            id,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    /// Simple teams are resolved through their own profile endpoint.
    pub fn is_simple_team(&self) -> bool {
        matches!(&*self.kind, "simpleteam" | "simple_team")
    }
}

impl Default for Urn {
    fn default() -> Self {
        Self::new("sr", "unknown", 0)
    }
}

impl FromStr for Urn {
    type Err = UrnParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        let (Some(prefix), Some(kind), Some(id), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(UrnParseError::Format(s.to_owned()));
        };
        if prefix.is_empty() || kind.is_empty() || id.is_empty() {
            return Err(UrnParseError::EmptyComponent(s.to_owned()));
        }
        let id = id
            .parse()
            .map_err(|_| UrnParseError::InvalidId(s.to_owned()))?;

        Ok(Self::new(prefix, kind, id))
    }
}

impl fmt::Display for Urn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.prefix, self.kind, self.id)
    }
}

/// A language under which entity names are resolved, e.g. `en` or `de`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Culture(Arc<str>);

impl Culture {
    pub fn new(code: &str) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Culture {
    fn from(code: &str) -> Self {
        Self::new(code)
    }
}

impl AsRef<str> for Culture {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Culture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Culture {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = String::deserialize(deserializer)?;
        Ok(Culture::new(&code))
    }
}

/// Parses a list of culture codes, mostly useful in tests and configuration.
pub fn cultures(codes: &[&str]) -> Vec<Culture> {
    codes.iter().copied().map(Culture::new).collect()
}

/// The kind of item an invalidation request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheItemType {
    All,
    Competitor,
    Player,
    MarketDescription,
    VariantDescription,
}

impl CacheItemType {
    /// Whether a request for `self` covers items of kind `other`.
    pub fn covers(self, other: CacheItemType) -> bool {
        self == CacheItemType::All || self == other
    }
}

/// All known cache names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CacheName {
    Profiles,
    VariantMarketDescriptions,
    VariantDescriptionList,
}

impl AsRef<str> for CacheName {
    fn as_ref(&self) -> &str {
        match self {
            Self::Profiles => "profiles",
            Self::VariantMarketDescriptions => "variant_market_descriptions",
            Self::VariantDescriptionList => "variant_description_list",
        }
    }
}

impl fmt::Display for CacheName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

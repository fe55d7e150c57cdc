//! Identifiers for versioned objects and external references.
//!
//! A [`UniqueId`] names one object inside the system, optionally pinned to a
//! version. An [`ExternalId`] names an object the way an outside source does
//! (ticker, ISIN, ...), and an [`ExternalIdBundle`] groups several external
//! names for the same object.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{IdentifierError, IdentifierResult};

const SEPARATOR: char = '~';

// =============================================================================
// UNIQUE IDENTIFIERS
// =============================================================================

/// Identifier of an object held by the system, optionally versioned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UniqueId {
    scheme: String,
    value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,
}

impl UniqueId {
    /// Creates an unversioned identifier.
    pub fn of(scheme: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            value: value.into(),
            version: None,
        }
    }

    /// Creates a versioned identifier.
    pub fn versioned(
        scheme: impl Into<String>,
        value: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            scheme: scheme.into(),
            value: value.into(),
            version: Some(version.into()),
        }
    }

    /// Returns a copy pinned to the given version.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Identifier scheme.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Identifier value within the scheme.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Version, if pinned.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// True when no version is pinned.
    pub fn is_latest(&self) -> bool {
        self.version.is_none()
    }

    /// Returns the same object identifier with the version stripped.
    #[must_use]
    pub fn to_latest(&self) -> Self {
        if self.version.is_none() {
            return self.clone();
        }
        Self::of(self.scheme.clone(), self.value.clone())
    }

    /// True when both identifiers refer to the same object regardless of version.
    pub fn same_object(&self, other: &UniqueId) -> bool {
        self.scheme == other.scheme && self.value == other.value
    }

    /// Parses the `scheme~value[~version]` form.
    pub fn parse(text: &str) -> IdentifierResult<Self> {
        let parts: Vec<&str> = text.split(SEPARATOR).collect();
        let id = match parts.as_slice() {
            [scheme, value] => Self::of(*scheme, *value),
            [scheme, value, version] => Self::versioned(*scheme, *value, *version),
            _ => {
                return Err(IdentifierError::invalid_format(
                    text,
                    "scheme~value or scheme~value~version",
                ))
            }
        };
        if id.scheme.is_empty() {
            return Err(IdentifierError::EmptyComponent {
                component: "scheme",
            });
        }
        if id.value.is_empty() {
            return Err(IdentifierError::EmptyComponent { component: "value" });
        }
        Ok(id)
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}~{}~{}", self.scheme, self.value, version),
            None => write!(f, "{}~{}", self.scheme, self.value),
        }
    }
}

impl FromStr for UniqueId {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// =============================================================================
// EXTERNAL IDENTIFIERS
// =============================================================================

/// Identifier issued by an outside source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExternalId {
    scheme: String,
    value: String,
}

impl ExternalId {
    /// Creates an external identifier.
    pub fn of(scheme: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            value: value.into(),
        }
    }

    /// Identifier scheme.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Identifier value.
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}~{}", self.scheme, self.value)
    }
}

impl FromStr for ExternalId {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(SEPARATOR) {
            Some((scheme, value)) if !scheme.is_empty() && !value.is_empty() => {
                Ok(Self::of(scheme, value))
            }
            _ => Err(IdentifierError::invalid_format(s, "scheme~value")),
        }
    }
}

/// A set of external identifiers naming one object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExternalIdBundle(BTreeSet<ExternalId>);

impl ExternalIdBundle {
    /// Creates an empty bundle.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates a bundle holding one identifier.
    pub fn of(id: ExternalId) -> Self {
        Self(std::iter::once(id).collect())
    }

    /// Number of identifiers.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when the bundle holds no identifiers.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when the identifier is part of the bundle.
    pub fn contains(&self, id: &ExternalId) -> bool {
        self.0.contains(id)
    }

    /// True when the two bundles share at least one identifier.
    pub fn intersects(&self, other: &ExternalIdBundle) -> bool {
        !self.0.is_disjoint(&other.0)
    }

    /// Iterates the identifiers in order.
    pub fn iter(&self) -> impl Iterator<Item = &ExternalId> {
        self.0.iter()
    }

    /// Returns a bundle with one more identifier.
    #[must_use]
    pub fn with(mut self, id: ExternalId) -> Self {
        self.0.insert(id);
        self
    }
}

impl FromIterator<ExternalId> for ExternalIdBundle {
    fn from_iter<I: IntoIterator<Item = ExternalId>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for ExternalIdBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bundle[")?;
        for (i, id) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{id}")?;
        }
        write!(f, "]")
    }
}

// =============================================================================
// VERSION CORRECTION
// =============================================================================

/// The version/correction instants at which versioned data is read.
///
/// `None` in either position means "latest". A compilation fixes both to a
/// concrete instant before resolving anything so that every lookup in one
/// compile sees the same data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionCorrection {
    /// Version instant, `None` for latest.
    pub version_as_of: Option<DateTime<Utc>>,
    /// Correction instant, `None` for latest.
    pub corrected_to: Option<DateTime<Utc>>,
}

impl VersionCorrection {
    /// Latest version, latest correction.
    pub const LATEST: VersionCorrection = VersionCorrection {
        version_as_of: None,
        corrected_to: None,
    };

    /// Creates a version-correction from explicit instants.
    pub fn of(version_as_of: Option<DateTime<Utc>>, corrected_to: Option<DateTime<Utc>>) -> Self {
        Self {
            version_as_of,
            corrected_to,
        }
    }

    /// True when either instant is left as "latest".
    pub fn contains_latest(&self) -> bool {
        self.version_as_of.is_none() || self.corrected_to.is_none()
    }

    /// Replaces any "latest" instant with `now`.
    #[must_use]
    pub fn with_latest_fixed(&self, now: DateTime<Utc>) -> Self {
        Self {
            version_as_of: Some(self.version_as_of.unwrap_or(now)),
            corrected_to: Some(self.corrected_to.unwrap_or(now)),
        }
    }
}

impl Default for VersionCorrection {
    fn default() -> Self {
        Self::LATEST
    }
}

impl fmt::Display for VersionCorrection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fmt_instant = |instant: &Option<DateTime<Utc>>| match instant {
            Some(t) => t.to_rfc3339(),
            None => "LATEST".to_string(),
        };
        write!(
            f,
            "V{}.C{}",
            fmt_instant(&self.version_as_of),
            fmt_instant(&self.corrected_to)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_unique_id_display_and_parse() {
        let id = UniqueId::versioned("Pos", "42", "3");
        assert_eq!(id.to_string(), "Pos~42~3");
        assert_eq!("Pos~42~3".parse::<UniqueId>().unwrap(), id);
        assert_eq!("Pos~42".parse::<UniqueId>().unwrap(), UniqueId::of("Pos", "42"));
    }

    #[test]
    fn test_unique_id_parse_rejects_bad_input() {
        assert!(UniqueId::parse("nope").is_err());
        assert!(UniqueId::parse("a~b~c~d").is_err());
        assert_eq!(
            UniqueId::parse("~x"),
            Err(IdentifierError::EmptyComponent {
                component: "scheme"
            })
        );
    }

    #[test]
    fn test_to_latest_strips_version() {
        let id = UniqueId::versioned("Node", "1", "v7");
        let latest = id.to_latest();
        assert!(latest.is_latest());
        assert!(latest.same_object(&id));
        assert_ne!(latest, id);
    }

    #[test]
    fn test_external_bundle() {
        let a = ExternalId::of("TICKER", "AAPL");
        let b = ExternalId::of("ISIN", "US0378331005");
        let bundle: ExternalIdBundle = [a.clone(), b.clone()].into_iter().collect();
        assert_eq!(bundle.len(), 2);
        assert!(bundle.contains(&a));
        assert!(bundle.intersects(&ExternalIdBundle::of(b)));
        assert!(!bundle.intersects(&ExternalIdBundle::of(ExternalId::of("X", "Y"))));
        assert_eq!(
            "TICKER~AAPL".parse::<ExternalId>().unwrap(),
            ExternalId::of("TICKER", "AAPL")
        );
    }

    #[test]
    fn test_version_correction_fixing() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let earlier = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let fixed = VersionCorrection::LATEST.with_latest_fixed(now);
        assert_eq!(fixed.version_as_of, Some(now));
        assert_eq!(fixed.corrected_to, Some(now));
        assert!(!fixed.contains_latest());

        let partial = VersionCorrection::of(Some(earlier), None).with_latest_fixed(now);
        assert_eq!(partial.version_as_of, Some(earlier));
        assert_eq!(partial.corrected_to, Some(now));
    }
}

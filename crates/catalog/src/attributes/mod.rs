//! Tag and metadata attributes
//!
//! Both kinds are (key, value) dictionaries shared by all versions and
//! joined to versions through an association table. One implementation
//! serves both; [`AttributeKind`] selects the backing tables and the
//! per-kind rules.

pub mod reconcile;
pub mod store;

use sea_orm::FromQueryResult;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::{CatalogError, Result};

pub use reconcile::{Reconciler, Reconciliation};
pub use store::AttributeStore;

/// Maximum length of an attribute key or value, in characters
pub const MAX_ATTRIBUTE_LEN: usize = 255;

/// Which attribute dictionary an operation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeKind {
    Tag,
    Metadata,
}

/// Table layout backing one attribute kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AttributeTables {
    pub attribute: &'static str,
    pub association: &'static str,
    pub foreign_key: &'static str,
}

impl AttributeKind {
    pub(crate) fn tables(self) -> AttributeTables {
        match self {
            AttributeKind::Tag => AttributeTables {
                attribute: "tag",
                association: "version_tag",
                foreign_key: "tag_id",
            },
            AttributeKind::Metadata => AttributeTables {
                attribute: "metadata",
                association: "version_metadata",
                foreign_key: "metadata_id",
            },
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AttributeKind::Tag => "tag",
            AttributeKind::Metadata => "metadata",
        }
    }

    /// Metadata carries at most one value per key on a version
    pub fn single_value_per_key(self) -> bool {
        matches!(self, AttributeKind::Metadata)
    }

    fn normalize_key(self, key: &str) -> String {
        match self {
            AttributeKind::Tag => key.to_string(),
            AttributeKind::Metadata => key.to_lowercase(),
        }
    }

    /// Normalize and validate an incoming definitive set.
    ///
    /// Lengths are checked on the text as the caller sent it. Exact
    /// duplicates collapse to one pair, first occurrence wins the
    /// position. For metadata, one key with two different values is
    /// rejected.
    pub fn prepare(self, pairs: &[AttributePair]) -> Result<Vec<AttributePair>> {
        let mut prepared: Vec<AttributePair> = Vec::with_capacity(pairs.len());
        let mut seen_pairs: HashSet<AttributePair> = HashSet::with_capacity(pairs.len());
        let mut seen_keys: HashMap<String, String> = HashMap::new();

        for pair in pairs {
            check_len(&pair.key, &pair.key, "key")?;
            check_len(&pair.key, &pair.value, "value")?;
            let key = self.normalize_key(&pair.key);

            if self.single_value_per_key() {
                if let Some(existing) = seen_keys.get(&key) {
                    if existing != &pair.value {
                        return Err(CatalogError::DuplicateKey(key));
                    }
                }
                seen_keys.insert(key.clone(), pair.value.clone());
            }

            let normalized = AttributePair::new(key, pair.value.clone());
            if seen_pairs.insert(normalized.clone()) {
                prepared.push(normalized);
            }
        }

        Ok(prepared)
    }

    /// Normalize removal matchers; keys are required, values are optional
    pub fn prepare_matchers(self, matchers: &[AttributeMatcher]) -> Result<Vec<AttributeMatcher>> {
        matchers
            .iter()
            .map(|m| {
                check_len(&m.key, &m.key, "key")?;
                let key = self.normalize_key(&m.key);
                let value = m.value.clone().filter(|v| !v.is_empty());
                Ok(AttributeMatcher { key, value })
            })
            .collect()
    }
}

fn check_len(key: &str, text: &str, what: &str) -> Result<()> {
    let len = text.chars().count();
    if len == 0 || len > MAX_ATTRIBUTE_LEN {
        return Err(CatalogError::InvalidAttribute {
            key: key.to_string(),
            reason: format!("{} must be 1 to {} characters", what, MAX_ATTRIBUTE_LEN),
        });
    }
    Ok(())
}

/// A (key, value) pair as supplied by a caller
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributePair {
    pub key: String,
    pub value: String,
}

impl AttributePair {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Removal selector: with a value it matches one pair, without a value
/// (or with an empty one) it matches every value under the key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeMatcher {
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
}

impl AttributeMatcher {
    pub fn key(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
        }
    }

    pub fn pair(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
        }
    }

    pub fn matches(&self, record: &AttributeRecord) -> bool {
        if record.key != self.key {
            return false;
        }
        match self.value.as_deref() {
            None | Some("") => true,
            Some(value) => record.value == value,
        }
    }
}

/// A stored attribute row
#[derive(Debug, Clone, PartialEq, Eq, Hash, FromQueryResult, Serialize)]
pub struct AttributeRecord {
    pub id: i32,
    pub key: String,
    pub value: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{metadata, tag, version_metadata, version_tag};
    use sea_orm::EntityName;

    #[test]
    fn test_tables_match_entities() {
        let tags = AttributeKind::Tag.tables();
        assert_eq!(tags.attribute, tag::Entity.table_name());
        assert_eq!(tags.association, version_tag::Entity.table_name());

        let meta = AttributeKind::Metadata.tables();
        assert_eq!(meta.attribute, metadata::Entity.table_name());
        assert_eq!(meta.association, version_metadata::Entity.table_name());
    }

    #[test]
    fn test_prepare_collapses_exact_duplicates() {
        let pairs = vec![
            AttributePair::new("colour", "red"),
            AttributePair::new("colour", "blue"),
            AttributePair::new("colour", "red"),
        ];
        let prepared = AttributeKind::Tag.prepare(&pairs).unwrap();
        assert_eq!(
            prepared,
            vec![AttributePair::new("colour", "red"), AttributePair::new("colour", "blue")]
        );
    }

    #[test]
    fn test_metadata_keys_are_lowercased_and_single_valued() {
        let prepared = AttributeKind::Metadata
            .prepare(&[AttributePair::new("Project", "alpha"), AttributePair::new("project", "alpha")])
            .unwrap();
        assert_eq!(prepared, vec![AttributePair::new("project", "alpha")]);

        let err = AttributeKind::Metadata
            .prepare(&[AttributePair::new("Project", "alpha"), AttributePair::new("project", "beta")])
            .unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateKey(k) if k == "project"));
    }

    #[test]
    fn test_prepare_rejects_bad_lengths() {
        assert!(AttributeKind::Tag.prepare(&[AttributePair::new("", "x")]).is_err());
        assert!(AttributeKind::Tag.prepare(&[AttributePair::new("k", "")]).is_err());
        let long = "v".repeat(MAX_ATTRIBUTE_LEN + 1);
        assert!(AttributeKind::Tag.prepare(&[AttributePair::new("k", long)]).is_err());
        let max = "v".repeat(MAX_ATTRIBUTE_LEN);
        assert!(AttributeKind::Tag.prepare(&[AttributePair::new("k", max)]).is_ok());
    }

    #[test]
    fn test_metadata_key_length_counts_caller_text() {
        // 'İ' lowercases to two code points
        let key = "İ".repeat(MAX_ATTRIBUTE_LEN);
        let prepared = AttributeKind::Metadata
            .prepare(&[AttributePair::new(key.clone(), "v")])
            .unwrap();
        assert_eq!(prepared[0].key, key.to_lowercase());

        let matchers = AttributeKind::Metadata
            .prepare_matchers(&[AttributeMatcher::key(key.clone())])
            .unwrap();
        assert_eq!(matchers[0].key, key.to_lowercase());

        let over = "İ".repeat(MAX_ATTRIBUTE_LEN + 1);
        assert!(AttributeKind::Metadata.prepare(&[AttributePair::new(over, "v")]).is_err());
    }

    #[test]
    fn test_matcher_key_only_matches_every_value() {
        let red = AttributeRecord { id: 1, key: "colour".into(), value: "red".into() };
        let blue = AttributeRecord { id: 2, key: "colour".into(), value: "blue".into() };
        let size = AttributeRecord { id: 3, key: "size".into(), value: "red".into() };

        let by_key = AttributeMatcher::key("colour");
        assert!(by_key.matches(&red) && by_key.matches(&blue));
        assert!(!by_key.matches(&size));

        let empty_value = AttributeMatcher::pair("colour", "");
        assert!(empty_value.matches(&blue));

        let exact = AttributeMatcher::pair("colour", "red");
        assert!(exact.matches(&red));
        assert!(!exact.matches(&blue));
    }

    #[test]
    fn test_prepare_matchers_drops_empty_values() {
        let matchers = AttributeKind::Metadata
            .prepare_matchers(&[AttributeMatcher::pair("Owner", "")])
            .unwrap();
        assert_eq!(matchers, vec![AttributeMatcher::key("owner")]);
        assert!(AttributeKind::Tag.prepare_matchers(&[AttributeMatcher::key("")]).is_err());
    }
}

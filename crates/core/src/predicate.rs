//! Filter expressions over item metadata and documents.
//!
//! Predicates are plain data: built by the request layer, validated once
//! (before any segment is touched), then evaluated row-by-row inside the
//! metadata segment. Evaluation never errors — a predicate that references a
//! key absent on a row simply does not match that row.
//!
//! Ordering comparisons (`Gt`/`Gte`/`Lt`/`Lte`) are defined on numeric
//! operands only; `validate` rejects them for Str/Bool operands. `Eq`/`Ne`
//! and membership accept any scalar.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::error::{Error, Result};
use crate::types::Metadata;
use crate::value::MetadataValue;

/// Filter expression over metadata keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetadataPredicate {
    /// Key equals value
    Eq(String, MetadataValue),
    /// Key does not equal value (a missing key does NOT match)
    Ne(String, MetadataValue),
    /// Key is numerically greater than value
    Gt(String, MetadataValue),
    /// Key is numerically greater than or equal to value
    Gte(String, MetadataValue),
    /// Key is numerically less than value
    Lt(String, MetadataValue),
    /// Key is numerically less than or equal to value
    Lte(String, MetadataValue),
    /// Key's value is one of the listed values (empty list matches nothing)
    In(String, Vec<MetadataValue>),
    /// Key's value is none of the listed values (still requires the key to
    /// be present; empty list matches every row that has the key)
    NotIn(String, Vec<MetadataValue>),
    /// All sub-predicates match
    And(Vec<MetadataPredicate>),
    /// At least one sub-predicate matches
    Or(Vec<MetadataPredicate>),
}

impl MetadataPredicate {
    /// Check the expression is well-formed.
    ///
    /// Rejected before any segment is involved:
    /// - empty `And`/`Or` combinator lists
    /// - ordering comparisons against non-numeric operands
    /// - empty key names
    pub fn validate(&self) -> Result<()> {
        match self {
            MetadataPredicate::Eq(key, _)
            | MetadataPredicate::Ne(key, _)
            | MetadataPredicate::In(key, _)
            | MetadataPredicate::NotIn(key, _) => {
                if key.is_empty() {
                    return Err(Error::Predicate("empty metadata key".to_string()));
                }
                Ok(())
            }
            MetadataPredicate::Gt(key, operand)
            | MetadataPredicate::Gte(key, operand)
            | MetadataPredicate::Lt(key, operand)
            | MetadataPredicate::Lte(key, operand) => {
                if key.is_empty() {
                    return Err(Error::Predicate("empty metadata key".to_string()));
                }
                if !operand.is_numeric() {
                    return Err(Error::Predicate(format!(
                        "ordering comparison on key '{}' requires a numeric operand, got {}",
                        key,
                        operand.type_name()
                    )));
                }
                Ok(())
            }
            MetadataPredicate::And(children) | MetadataPredicate::Or(children) => {
                if children.is_empty() {
                    return Err(Error::Predicate(
                        "combinator requires at least one sub-predicate".to_string(),
                    ));
                }
                for child in children {
                    child.validate()?;
                }
                Ok(())
            }
        }
    }

    /// Evaluate the predicate against a row's metadata.
    ///
    /// `None` metadata behaves as an empty map: every key is absent.
    pub fn matches(&self, metadata: Option<&Metadata>) -> bool {
        match self {
            MetadataPredicate::Eq(key, value) => lookup(metadata, key) == Some(value),
            MetadataPredicate::Ne(key, value) => {
                matches!(lookup(metadata, key), Some(v) if v != value)
            }
            MetadataPredicate::Gt(key, operand) => cmp_matches(metadata, key, operand, |o| {
                o == Ordering::Greater
            }),
            MetadataPredicate::Gte(key, operand) => cmp_matches(metadata, key, operand, |o| {
                o != Ordering::Less
            }),
            MetadataPredicate::Lt(key, operand) => {
                cmp_matches(metadata, key, operand, |o| o == Ordering::Less)
            }
            MetadataPredicate::Lte(key, operand) => cmp_matches(metadata, key, operand, |o| {
                o != Ordering::Greater
            }),
            MetadataPredicate::In(key, values) => {
                matches!(lookup(metadata, key), Some(v) if values.contains(v))
            }
            MetadataPredicate::NotIn(key, values) => {
                matches!(lookup(metadata, key), Some(v) if !values.contains(v))
            }
            MetadataPredicate::And(children) => children.iter().all(|c| c.matches(metadata)),
            MetadataPredicate::Or(children) => children.iter().any(|c| c.matches(metadata)),
        }
    }
}

fn lookup<'a>(metadata: Option<&'a Metadata>, key: &str) -> Option<&'a MetadataValue> {
    metadata.and_then(|m| m.get(key))
}

fn cmp_matches(
    metadata: Option<&Metadata>,
    key: &str,
    operand: &MetadataValue,
    accept: impl Fn(Ordering) -> bool,
) -> bool {
    match lookup(metadata, key).and_then(|v| v.partial_cmp_numeric(operand)) {
        Some(ordering) => accept(ordering),
        // Missing key, non-numeric row value, or NaN: non-matching
        None => false,
    }
}

/// Filter expression over document text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DocumentPredicate {
    /// Document contains the substring (a row without a document never matches)
    Contains(String),
    /// Document is present and does not contain the substring
    NotContains(String),
    /// All sub-predicates match
    And(Vec<DocumentPredicate>),
    /// At least one sub-predicate matches
    Or(Vec<DocumentPredicate>),
}

impl DocumentPredicate {
    /// Check the expression is well-formed (no empty combinators, no empty
    /// search strings).
    pub fn validate(&self) -> Result<()> {
        match self {
            DocumentPredicate::Contains(needle) | DocumentPredicate::NotContains(needle) => {
                if needle.is_empty() {
                    return Err(Error::Predicate(
                        "document predicate requires a non-empty search string".to_string(),
                    ));
                }
                Ok(())
            }
            DocumentPredicate::And(children) | DocumentPredicate::Or(children) => {
                if children.is_empty() {
                    return Err(Error::Predicate(
                        "combinator requires at least one sub-predicate".to_string(),
                    ));
                }
                for child in children {
                    child.validate()?;
                }
                Ok(())
            }
        }
    }

    /// Evaluate the predicate against a row's document.
    pub fn matches(&self, document: Option<&str>) -> bool {
        match self {
            DocumentPredicate::Contains(needle) => {
                matches!(document, Some(doc) if doc.contains(needle.as_str()))
            }
            DocumentPredicate::NotContains(needle) => {
                matches!(document, Some(doc) if !doc.contains(needle.as_str()))
            }
            DocumentPredicate::And(children) => children.iter().all(|c| c.matches(document)),
            DocumentPredicate::Or(children) => children.iter().any(|c| c.matches(document)),
        }
    }
}

// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Node affinity rule parsing.
//!
//! The provisioner accepts a compact node affinity description from its
//! environment, for example:
//!
//! ```text
//! kubernetes.io/zone:[zone-a,zone-b],kubernetes.io/nfs-node
//! ```
//!
//! Terms are separated by commas. A bare key becomes an `Exists` rule, a
//! `key:[v1,v2]` term becomes an `In` rule. Commas inside brackets belong to the
//! value list, so the input is split with a small bracket-aware lexer rather
//! than a plain `split(',')`.
//!
//! Parsing never fails: empty terms, empty keys and empty values are dropped,
//! and an empty value list (`key:[]`) degrades to `Exists`. Text after the
//! closing bracket of a value list is ignored.
//!
//! # Example
//!
//! ```rust
//! use nfs_provisioner::affinity::{parse_node_affinity, AffinityOperator};
//!
//! let rules = parse_node_affinity("kubernetes.io/storage-node:[]");
//! assert_eq!(rules.len(), 1);
//! assert_eq!(rules[0].operator, AffinityOperator::Exists);
//! ```

use k8s_openapi::api::core::v1::NodeSelectorRequirement;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Operator of a single node affinity rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AffinityOperator {
    /// The node must carry the label, any value
    Exists,
    /// The node label value must be one of the listed values
    In,
}

impl fmt::Display for AffinityOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exists => f.write_str("Exists"),
            Self::In => f.write_str("In"),
        }
    }
}

/// A single scheduling constraint on node labels.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAffinityRule {
    pub key: String,
    pub operator: AffinityOperator,
    /// Empty for `Exists`
    pub values: Vec<String>,
}

impl NodeAffinityRule {
    #[must_use]
    pub fn exists(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            operator: AffinityOperator::Exists,
            values: Vec::new(),
        }
    }

    #[must_use]
    pub fn one_of(key: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            key: key.into(),
            operator: AffinityOperator::In,
            values,
        }
    }

    /// Convert the rule into a Kubernetes node selector requirement.
    #[must_use]
    pub fn to_requirement(&self) -> NodeSelectorRequirement {
        NodeSelectorRequirement {
            key: self.key.clone(),
            operator: self.operator.to_string(),
            values: match self.operator {
                AffinityOperator::Exists => None,
                AffinityOperator::In => Some(self.values.clone()),
            },
        }
    }
}

/// Parse a node affinity description into an ordered list of rules.
///
/// Rules are returned in input order.
#[must_use]
pub fn parse_node_affinity(input: &str) -> Vec<NodeAffinityRule> {
    split_terms(input)
        .into_iter()
        .filter_map(parse_term)
        .collect()
}

/// Split on commas that are not inside a `[...]` value list.
fn split_terms(input: &str) -> Vec<&str> {
    let mut terms = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (idx, ch) in input.char_indices() {
        match ch {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                terms.push(&input[start..idx]);
                start = idx + ch.len_utf8();
            }
            _ => {}
        }
    }
    terms.push(&input[start..]);
    terms
}

fn parse_term(term: &str) -> Option<NodeAffinityRule> {
    let term = term.trim();
    if term.is_empty() {
        return None;
    }

    let Some((key, rest)) = term.split_once(":[") else {
        return Some(NodeAffinityRule::exists(term));
    };

    let key = key.trim();
    if key.is_empty() {
        return None;
    }

    // An unterminated list runs to the end of the term; text after `]` is dropped
    let body = rest.rfind(']').map_or(rest, |end| &rest[..end]);
    let values: Vec<String> = body
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
        .collect();

    if values.is_empty() {
        Some(NodeAffinityRule::exists(key))
    } else {
        Some(NodeAffinityRule::one_of(key, values))
    }
}

#[cfg(test)]
#[path = "affinity_tests.rs"]
mod affinity_tests;

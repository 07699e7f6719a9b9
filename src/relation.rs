//! Relation types - typed, weighted knowledge-graph edges
//!
//! An edge connects two context items. The triple
//! `(source_id, target_id, relation_type)` is unique; adding the same triple
//! again updates its weight and metadata.

use crate::item::ContextItem;
use crate::metadata::Metadata;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Default weight for a freshly added edge
pub const DEFAULT_WEIGHT: f64 = 1.0;

/// Kinds of relationship between two items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    Uses,
    Implements,
    DependsOn,
    References,
    Tests,
    Documents,
    Extends,
    Contains,
    Calls,
    Imports,
    Configures,
    Authenticates,
    Validates,
    Transforms,
}

impl RelationType {
    /// Get the string representation stored in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::Uses => "uses",
            RelationType::Implements => "implements",
            RelationType::DependsOn => "depends_on",
            RelationType::References => "references",
            RelationType::Tests => "tests",
            RelationType::Documents => "documents",
            RelationType::Extends => "extends",
            RelationType::Contains => "contains",
            RelationType::Calls => "calls",
            RelationType::Imports => "imports",
            RelationType::Configures => "configures",
            RelationType::Authenticates => "authenticates",
            RelationType::Validates => "validates",
            RelationType::Transforms => "transforms",
        }
    }

    /// Get all relation types
    pub fn all() -> &'static [RelationType] {
        &[
            RelationType::Uses,
            RelationType::Implements,
            RelationType::DependsOn,
            RelationType::References,
            RelationType::Tests,
            RelationType::Documents,
            RelationType::Extends,
            RelationType::Contains,
            RelationType::Calls,
            RelationType::Imports,
            RelationType::Configures,
            RelationType::Authenticates,
            RelationType::Validates,
            RelationType::Transforms,
        ]
    }
}

impl FromStr for RelationType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "uses" | "use" => Ok(RelationType::Uses),
            "implements" | "implement" => Ok(RelationType::Implements),
            "depends_on" | "depends" => Ok(RelationType::DependsOn),
            "references" | "reference" | "ref" => Ok(RelationType::References),
            "tests" | "test" => Ok(RelationType::Tests),
            "documents" | "document" => Ok(RelationType::Documents),
            "extends" | "extend" | "inherits" => Ok(RelationType::Extends),
            "contains" | "contain" => Ok(RelationType::Contains),
            "calls" | "call" => Ok(RelationType::Calls),
            "imports" | "import" => Ok(RelationType::Imports),
            "configures" | "configure" => Ok(RelationType::Configures),
            "authenticates" | "authenticate" => Ok(RelationType::Authenticates),
            "validates" | "validate" => Ok(RelationType::Validates),
            "transforms" | "transform" => Ok(RelationType::Transforms),
            _ => Err(crate::Error::InvalidValue(format!("Unknown relation type: {}", s))),
        }
    }
}

impl std::fmt::Display for RelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A directed edge in the knowledge graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub source_id: String,
    pub target_id: String,
    pub relation_type: RelationType,
    pub weight: f64,
    pub metadata: Option<Metadata>,
    pub created_at: DateTime<Utc>,
}

impl PartialEq for Relation {
    fn eq(&self, other: &Self) -> bool {
        self.source_id == other.source_id
            && self.target_id == other.target_id
            && self.relation_type == other.relation_type
    }
}

impl Eq for Relation {}

impl std::hash::Hash for Relation {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.source_id.hash(state);
        self.target_id.hash(state);
        self.relation_type.hash(state);
    }
}

/// A node reached during graph traversal
#[derive(Debug, Clone)]
pub struct TraversalNode {
    pub item: ContextItem,
    /// Number of hops from the start item (start is depth 0)
    pub depth: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(source: &str, target: &str, kind: RelationType) -> Relation {
        Relation {
            source_id: source.to_string(),
            target_id: target.to_string(),
            relation_type: kind,
            weight: DEFAULT_WEIGHT,
            metadata: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_relation_type_roundtrip() {
        for kind in RelationType::all() {
            let parsed: RelationType = kind.as_str().parse().unwrap();
            assert_eq!(*kind, parsed);
        }
        assert_eq!(RelationType::all().len(), 14);
    }

    #[test]
    fn test_relation_type_aliases() {
        assert_eq!(RelationType::from_str("depends-on").unwrap(), RelationType::DependsOn);
        assert_eq!(RelationType::from_str("inherits").unwrap(), RelationType::Extends);
        assert!(RelationType::from_str("owns").is_err());
    }

    #[test]
    fn test_identity_ignores_weight() {
        let a = sample("code:a", "code:b", RelationType::Calls);
        let mut b = a.clone();
        b.weight = 0.2;
        assert_eq!(a, b);
        assert_ne!(a, sample("code:a", "code:b", RelationType::Uses));
    }
}

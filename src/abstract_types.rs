/// Abstract type classification
///
/// Database types are grouped into a small set of abstract categories that
/// decide how a cell is rendered and edited. The map is supplied by the caller
/// and only ever read here.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbstractTypeCategory {
    Boolean,
    Number,
    Money,
    Text,
    Email,
    Uri,
    Date,
    Time,
    DateTime,
    Duration,
    Json,
    /// Fallback for types the map does not know
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbstractType {
    pub identifier: AbstractTypeCategory,
    pub name: String,
    /// Database types belonging to this abstract type
    pub db_types: Vec<String>,
}

impl AbstractType {
    pub fn new(identifier: AbstractTypeCategory, name: impl Into<String>, db_types: &[&str]) -> Self {
        AbstractType {
            identifier,
            name: name.into(),
            db_types: db_types.iter().map(|t| t.to_uppercase()).collect(),
        }
    }

    pub fn unknown() -> Self {
        AbstractType::new(AbstractTypeCategory::Other, "Unknown", &[])
    }

    pub fn is_unknown(&self) -> bool {
        self.identifier == AbstractTypeCategory::Other
    }
}

/// Lookup from a declared database type to its abstract type
#[derive(Debug, Clone, Default)]
pub struct AbstractTypeMap {
    by_db_type: HashMap<String, AbstractType>,
    fallback: Option<AbstractType>,
}

impl AbstractTypeMap {
    pub fn new(types: Vec<AbstractType>) -> Self {
        let mut by_db_type = HashMap::new();
        for abstract_type in types {
            for db_type in &abstract_type.db_types {
                by_db_type.insert(db_type.clone(), abstract_type.clone());
            }
        }
        AbstractTypeMap {
            by_db_type,
            fallback: None,
        }
    }

    /// Override the classification returned for unknown types
    pub fn with_fallback(mut self, fallback: AbstractType) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Returns the abstract type for `db_type`, or None if unmapped
    pub fn get(&self, db_type: &str) -> Option<&AbstractType> {
        self.by_db_type.get(&db_type.to_uppercase())
    }

    /// Classify a database type, degrading to the fallback for unmapped types
    pub fn classify(&self, db_type: &str) -> AbstractType {
        match self.get(db_type) {
            Some(found) => found.clone(),
            None => {
                log::debug!("No abstract type for db type '{}', using fallback", db_type);
                self.fallback.clone().unwrap_or_else(AbstractType::unknown)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.by_db_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_db_type.is_empty()
    }

    /// A map covering common PostgreSQL types
    pub fn postgres_defaults() -> Self {
        AbstractTypeMap::new(vec![
            AbstractType::new(AbstractTypeCategory::Boolean, "Boolean", &["BOOLEAN"]),
            AbstractType::new(
                AbstractTypeCategory::Number,
                "Number",
                &["INTEGER", "BIGINT", "SMALLINT", "NUMERIC", "DECIMAL", "REAL", "DOUBLE PRECISION", "FLOAT"],
            ),
            AbstractType::new(AbstractTypeCategory::Money, "Money", &["MONEY"]),
            AbstractType::new(
                AbstractTypeCategory::Text,
                "Text",
                &["TEXT", "VARCHAR", "CHARACTER VARYING", "CHAR", "CHARACTER"],
            ),
            AbstractType::new(AbstractTypeCategory::Email, "Email", &["EMAIL"]),
            AbstractType::new(AbstractTypeCategory::Uri, "URI", &["URI"]),
            AbstractType::new(AbstractTypeCategory::Date, "Date", &["DATE"]),
            AbstractType::new(AbstractTypeCategory::Time, "Time", &["TIME", "TIME WITH TIME ZONE"]),
            AbstractType::new(
                AbstractTypeCategory::DateTime,
                "Date & Time",
                &["TIMESTAMP", "TIMESTAMP WITH TIME ZONE"],
            ),
            AbstractType::new(AbstractTypeCategory::Duration, "Duration", &["INTERVAL"]),
            AbstractType::new(AbstractTypeCategory::Json, "JSON", &["JSON", "JSONB"]),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_is_case_insensitive() {
        let map = AbstractTypeMap::postgres_defaults();
        assert_eq!(map.classify("integer").identifier, AbstractTypeCategory::Number);
        assert_eq!(map.classify("VARCHAR").identifier, AbstractTypeCategory::Text);
    }

    #[test]
    fn test_unmapped_type_degrades_to_fallback() {
        let map = AbstractTypeMap::postgres_defaults();
        assert!(map.get("TSVECTOR").is_none());
        assert!(map.classify("TSVECTOR").is_unknown());

        let custom = AbstractType::new(AbstractTypeCategory::Text, "Raw", &[]);
        let map = map.with_fallback(custom.clone());
        assert_eq!(map.classify("TSVECTOR"), custom);
    }
}

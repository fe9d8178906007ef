/// LiveGrid Column Metadata
///
/// A Column describes one field of the remote table: a stable identifier, a
/// display name, the declared database type and its position. Columns are
/// owned by the `ColumnsDataStore`; everything else refers to them by id.
///
/// Cell contents travel as `CellValue`, a small dynamically typed value that
/// converts to and from JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// Stable identifier of a column (the attnum on the server side)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnId(pub u64);

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ColumnId {
    fn from(id: u64) -> Self {
        ColumnId(id)
    }
}

/// Identifier of the table a grid is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableId(pub u64);

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single cell value
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    #[default]
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    String(String),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CellValue::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Float64(v) => Some(*v),
            CellValue::Int64(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            CellValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CellValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Convert to a JSON value. Non-finite floats become `null`.
    pub fn to_json(&self) -> JsonValue {
        match self {
            CellValue::Int64(v) => JsonValue::Number((*v).into()),
            CellValue::Float64(v) => serde_json::Number::from_f64(*v)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            CellValue::String(v) => JsonValue::String(v.clone()),
            CellValue::Bool(v) => JsonValue::Bool(*v),
            CellValue::Null => JsonValue::Null,
        }
    }

    /// Convert from a JSON value. Arrays and objects are kept as their JSON text.
    pub fn from_json(value: &JsonValue) -> CellValue {
        match value {
            JsonValue::Null => CellValue::Null,
            JsonValue::Bool(b) => CellValue::Bool(*b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    CellValue::Int64(i)
                } else {
                    n.as_f64().map(CellValue::Float64).unwrap_or(CellValue::Null)
                }
            }
            JsonValue::String(s) => CellValue::String(s.clone()),
            other => CellValue::String(other.to_string()),
        }
    }
}

impl From<&str> for CellValue {
    fn from(v: &str) -> Self {
        CellValue::String(v.to_string())
    }
}

impl From<i64> for CellValue {
    fn from(v: i64) -> Self {
        CellValue::Int64(v)
    }
}

impl From<bool> for CellValue {
    fn from(v: bool) -> Self {
        CellValue::Bool(v)
    }
}

/// Column metadata as reported by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub id: ColumnId,
    pub name: String,
    /// Declared database type, e.g. `INTEGER` or `VARCHAR`
    #[serde(rename = "type")]
    pub db_type: String,
    /// Ordinal position in the table
    pub index: usize,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
    /// Server-side default, if any. A primary key with a default is generated.
    #[serde(default)]
    pub default: Option<CellValue>,
    #[serde(default)]
    pub display_options: Option<JsonValue>,
}

fn default_nullable() -> bool {
    true
}

impl Column {
    pub fn new(id: impl Into<ColumnId>, name: impl Into<String>, db_type: impl Into<String>, index: usize) -> Self {
        Column {
            id: id.into(),
            name: name.into(),
            db_type: db_type.into(),
            index,
            nullable: true,
            primary_key: false,
            default: None,
            display_options: None,
        }
    }

    /// Mark this column as the table's (generated) primary key
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self.default = Some(CellValue::String("nextval".to_string()));
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// True when the server fills this column in on insert
    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    /// Apply a patch, producing the updated column
    pub fn patched(&self, patch: &ColumnPatch) -> Column {
        let mut next = self.clone();
        if let Some(name) = &patch.name {
            next.name = name.clone();
        }
        if let Some(db_type) = &patch.db_type {
            next.db_type = db_type.clone();
        }
        if let Some(nullable) = patch.nullable {
            next.nullable = nullable;
        }
        if let Some(default) = &patch.default {
            next.default = default.clone();
        }
        if let Some(display_options) = &patch.display_options {
            next.display_options = Some(display_options.clone());
        }
        next
    }
}

/// Partial update of a column's properties
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub db_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nullable: Option<bool>,
    /// `Some(None)` clears the default
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Option<CellValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_options: Option<JsonValue>,
}

impl ColumnPatch {
    pub fn rename(name: impl Into<String>) -> Self {
        ColumnPatch {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn retype(db_type: impl Into<String>) -> Self {
        ColumnPatch {
            db_type: Some(db_type.into()),
            ..Default::default()
        }
    }

    /// A patch that only touches the name is a rename
    pub fn is_rename_only(&self) -> bool {
        self.name.is_some()
            && self.db_type.is_none()
            && self.nullable.is_none()
            && self.default.is_none()
            && self.display_options.is_none()
    }
}

/// Definition of a column to be created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub db_type: String,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

impl NewColumn {
    pub fn new(name: impl Into<String>, db_type: impl Into<String>) -> Self {
        NewColumn {
            name: name.into(),
            db_type: db_type.into(),
            nullable: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_value_json_conversion() {
        assert_eq!(CellValue::from_json(&serde_json::json!(42)), CellValue::Int64(42));
        assert_eq!(CellValue::from_json(&serde_json::json!(1.5)), CellValue::Float64(1.5));
        assert_eq!(CellValue::from_json(&serde_json::json!(null)), CellValue::Null);
        assert_eq!(
            CellValue::from_json(&serde_json::json!([1, 2])),
            CellValue::String("[1,2]".to_string())
        );
        assert_eq!(CellValue::Float64(f64::NAN).to_json(), JsonValue::Null);
    }

    #[test]
    fn test_cell_value_untagged_serde() {
        let values: Vec<CellValue> = serde_json::from_str(r#"[null, true, 7, 2.5, "x"]"#).unwrap();
        assert_eq!(
            values,
            vec![
                CellValue::Null,
                CellValue::Bool(true),
                CellValue::Int64(7),
                CellValue::Float64(2.5),
                CellValue::String("x".to_string()),
            ]
        );
    }

    #[test]
    fn test_column_deserialize_defaults() {
        let column: Column =
            serde_json::from_str(r#"{"id": 3, "name": "title", "type": "VARCHAR", "index": 2}"#).unwrap();
        assert_eq!(column.id, ColumnId(3));
        assert!(column.nullable);
        assert!(!column.primary_key);
        assert!(!column.has_default());
    }

    #[test]
    fn test_column_patched() {
        let column = Column::new(1, "age", "INTEGER", 0);
        let patch = ColumnPatch {
            db_type: Some("NUMERIC".to_string()),
            nullable: Some(false),
            ..Default::default()
        };
        let next = column.patched(&patch);
        assert_eq!(next.db_type, "NUMERIC");
        assert!(!next.nullable);
        assert_eq!(next.name, "age");
        assert!(!patch.is_rename_only());
        assert!(ColumnPatch::rename("years").is_rename_only());
    }
}

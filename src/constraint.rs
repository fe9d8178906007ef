/// Constraint metadata
///
/// Constraints relate to columns many-to-many through their `columns` id set.

use crate::column::{ColumnId, TableId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConstraintId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    PrimaryKey,
    ForeignKey,
    Unique,
    Check,
    Exclude,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub id: ConstraintId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ConstraintKind,
    pub columns: Vec<ColumnId>,
    /// Only set for foreign keys
    #[serde(default)]
    pub referent_table: Option<TableId>,
    #[serde(default)]
    pub referent_columns: Vec<ColumnId>,
}

impl Constraint {
    pub fn new(id: u64, name: impl Into<String>, kind: ConstraintKind, columns: Vec<ColumnId>) -> Self {
        Constraint {
            id: ConstraintId(id),
            name: name.into(),
            kind,
            columns,
            referent_table: None,
            referent_columns: Vec::new(),
        }
    }

    pub fn foreign_key(id: u64, name: impl Into<String>, column: ColumnId, referent_table: TableId) -> Self {
        Constraint {
            referent_table: Some(referent_table),
            ..Constraint::new(id, name, ConstraintKind::ForeignKey, vec![column])
        }
    }

    pub fn covers(&self, column_id: ColumnId) -> bool {
        self.columns.contains(&column_id)
    }

    /// A constraint over exactly one column
    pub fn is_single_column(&self) -> bool {
        self.columns.len() == 1
    }
}

/// Result of a constraints fetch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConstraintsData {
    pub constraints: Vec<Constraint>,
}

impl ConstraintsData {
    pub fn new(constraints: Vec<Constraint>) -> Self {
        ConstraintsData { constraints }
    }

    /// Constraints that include the given column
    pub fn for_column(&self, column_id: ColumnId) -> Vec<Constraint> {
        self.constraints
            .iter()
            .filter(|c| c.covers(column_id))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }
}

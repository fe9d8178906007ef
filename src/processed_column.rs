/// Column processing
///
/// `process_column` enriches one `Column` with everything the rendering layer
/// needs: its abstract type, the constraints it participates in, whether it
/// links to another table, and how its cells should be presented and edited.
/// It performs no I/O and never mutates its inputs.
///
/// `ProcessedColumnIndex` is the full set of processed columns for a table,
/// keyed by column id. It is always rebuilt from scratch; nothing patches an
/// existing index.

use crate::abstract_types::{AbstractType, AbstractTypeCategory, AbstractTypeMap};
use crate::column::{Column, ColumnId, TableId};
use crate::constraint::{Constraint, ConstraintKind, ConstraintsData};
use crate::error::{GridError, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How primary key cells are presented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimaryKeyDisplay {
    /// Like any other read-only cell
    Plain,
    /// As a row identifier with a link to the record page
    #[default]
    Enhanced,
}

impl PrimaryKeyDisplay {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "plain" => Ok(PrimaryKeyDisplay::Plain),
            "enhanced" => Ok(PrimaryKeyDisplay::Enhanced),
            other => Err(GridError::InvalidConfig(format!(
                "unknown primary key display '{}'",
                other
            ))),
        }
    }
}

/// Rendering hint for a column's cells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellKind {
    Boolean,
    Number,
    Text,
    Date,
    Json,
    /// Foreign key: renders the referenced record's summary
    LinkedRecord,
    /// Primary key shown as a row identifier
    RowIdentifier,
    Unknown,
}

impl CellKind {
    fn for_type(abstract_type: &AbstractType) -> Self {
        match abstract_type.identifier {
            AbstractTypeCategory::Boolean => CellKind::Boolean,
            AbstractTypeCategory::Number | AbstractTypeCategory::Money => CellKind::Number,
            AbstractTypeCategory::Text | AbstractTypeCategory::Email | AbstractTypeCategory::Uri => CellKind::Text,
            AbstractTypeCategory::Date
            | AbstractTypeCategory::Time
            | AbstractTypeCategory::DateTime
            | AbstractTypeCategory::Duration => CellKind::Date,
            AbstractTypeCategory::Json => CellKind::Json,
            AbstractTypeCategory::Other => CellKind::Unknown,
        }
    }
}

/// Inputs of `process_column`
pub struct ColumnProcessorInput<'a> {
    pub table_id: TableId,
    pub column: &'a Column,
    pub column_index: usize,
    /// Every constraint of the table; the processor picks the relevant ones
    pub constraints: &'a [Constraint],
    pub abstract_types: &'a AbstractTypeMap,
    pub primary_key_display: PrimaryKeyDisplay,
}

/// A column enriched for display and editing
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedColumn {
    pub table_id: TableId,
    pub id: ColumnId,
    pub column: Column,
    /// Position among the columns it was processed with
    pub column_index: usize,
    pub abstract_type: AbstractType,
    /// Constraints that include this column
    pub constraints: Vec<Constraint>,
    /// Constraints over this column alone
    pub exclusive_constraints: Vec<Constraint>,
    /// Constraints this column shares with others
    pub shared_constraints: Vec<Constraint>,
    pub is_primary_key: bool,
    /// Single-column foreign key, if any
    pub link_fk: Option<Constraint>,
    pub linked_table: Option<TableId>,
    pub cell_kind: CellKind,
    pub is_editable: bool,
    pub allows_null: bool,
}

impl ProcessedColumn {
    pub fn name(&self) -> &str {
        &self.column.name
    }

    pub fn is_linked(&self) -> bool {
        self.link_fk.is_some()
    }

    pub fn has_unique_constraint(&self) -> bool {
        self.exclusive_constraints
            .iter()
            .any(|c| matches!(c.kind, ConstraintKind::Unique | ConstraintKind::PrimaryKey))
    }
}

/// Process one column. Unknown database types degrade to the map's fallback
/// classification instead of failing.
pub fn process_column(input: ColumnProcessorInput<'_>) -> ProcessedColumn {
    let column = input.column;
    let abstract_type = input.abstract_types.classify(&column.db_type);

    let constraints: Vec<Constraint> = input
        .constraints
        .iter()
        .filter(|c| c.covers(column.id))
        .cloned()
        .collect();
    let (exclusive_constraints, shared_constraints): (Vec<_>, Vec<_>) =
        constraints.iter().cloned().partition(|c| c.is_single_column());

    let is_primary_key = column.primary_key
        || constraints
            .iter()
            .any(|c| c.kind == ConstraintKind::PrimaryKey);
    let link_fk = exclusive_constraints
        .iter()
        .find(|c| c.kind == ConstraintKind::ForeignKey)
        .cloned();
    let linked_table = link_fk.as_ref().and_then(|c| c.referent_table);

    let cell_kind = if is_primary_key && input.primary_key_display == PrimaryKeyDisplay::Enhanced {
        CellKind::RowIdentifier
    } else if link_fk.is_some() {
        CellKind::LinkedRecord
    } else {
        CellKind::for_type(&abstract_type)
    };

    // Generated keys are owned by the server
    let is_editable = !(is_primary_key && column.has_default());

    ProcessedColumn {
        table_id: input.table_id,
        id: column.id,
        column: column.clone(),
        column_index: input.column_index,
        abstract_type,
        constraints,
        exclusive_constraints,
        shared_constraints,
        is_primary_key,
        link_fk,
        linked_table,
        cell_kind,
        is_editable,
        allows_null: column.nullable && !is_primary_key,
    }
}

/// Processed columns keyed by id, plus their display order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessedColumnIndex {
    by_id: HashMap<ColumnId, ProcessedColumn>,
    display_order: Vec<ColumnId>,
}

impl ProcessedColumnIndex {
    pub fn get(&self, column_id: ColumnId) -> Option<&ProcessedColumn> {
        self.by_id.get(&column_id)
    }

    pub fn contains(&self, column_id: ColumnId) -> bool {
        self.by_id.contains_key(&column_id)
    }

    /// Column ids ordered by column position
    pub fn display_order(&self) -> &[ColumnId] {
        &self.display_order
    }

    /// Processed columns in display order
    pub fn ordered(&self) -> impl Iterator<Item = &ProcessedColumn> {
        self.display_order.iter().filter_map(|id| self.by_id.get(id))
    }

    pub fn primary_key(&self) -> Option<&ProcessedColumn> {
        self.ordered().find(|c| c.is_primary_key)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// Build the index for a full column list
pub fn build_processed_columns(
    table_id: TableId,
    columns: &[Column],
    constraints: &ConstraintsData,
    abstract_types: &AbstractTypeMap,
    primary_key_display: PrimaryKeyDisplay,
) -> ProcessedColumnIndex {
    let mut ordered: Vec<&Column> = columns.iter().collect();
    ordered.sort_by_key(|c| c.index);

    let mut by_id = HashMap::with_capacity(ordered.len());
    let mut display_order = Vec::with_capacity(ordered.len());
    for (column_index, column) in ordered.into_iter().enumerate() {
        let processed = process_column(ColumnProcessorInput {
            table_id,
            column,
            column_index,
            constraints: &constraints.constraints,
            abstract_types,
            primary_key_display,
        });
        display_order.push(processed.id);
        by_id.insert(processed.id, processed);
    }

    debug!("Processed {} columns for table {}", by_id.len(), table_id);
    ProcessedColumnIndex { by_id, display_order }
}

/// Selection model
///
/// Tracks selected cells over the combined (saved + new) rows and the
/// processed columns in display order. The model never caches its bounds:
/// every operation asks its accessors for the current columns, rows and row
/// limit, because a column delete or a reload can shrink the grid without any
/// explicit "clear selection" signal.
///
/// Mutations are all-or-nothing. A coordinate outside the current bounds
/// yields an error and leaves the selection as it was.

use crate::column::ColumnId;
use crate::error::{GridError, Result};
use crate::meta::Pagination;
use crate::observable::Observable;
use crate::processed_column::ProcessedColumnIndex;
use crate::records::{RecordRow, RowKey};
use std::cell::Cell;
use std::collections::BTreeSet;
use std::rc::Rc;

/// Exclusive upper bound of selectable row indices.
///
/// Selection may reach past the fetched saved rows into the new rows, but
/// never past the page boundary or the rows actually remaining in the table.
pub fn max_selectable_row_index(
    pagination: &Pagination,
    total_count: usize,
    saved_row_count: usize,
    new_row_count: usize,
) -> usize {
    let remaining = total_count.saturating_sub(pagination.offset);
    pagination.size.min(remaining).min(saved_row_count) + new_row_count
}

/// A cell coordinate: row index into the combined rows, column id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellCoord {
    pub row: usize,
    pub column: ColumnId,
}

impl CellCoord {
    pub fn new(row: usize, column: ColumnId) -> Self {
        CellCoord { row, column }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

/// Accessors the selection reads its bounds from
pub struct SelectionAccessors {
    /// Current processed columns
    pub get_columns: Box<dyn Fn() -> Rc<ProcessedColumnIndex>>,
    /// Display order over the same id set
    pub get_column_order: Box<dyn Fn() -> Vec<ColumnId>>,
    /// Saved rows followed by new rows
    pub get_rows: Box<dyn Fn() -> Vec<RecordRow>>,
    /// Exclusive upper bound of row indices
    pub get_max_selection_row_index: Box<dyn Fn() -> usize>,
}

/// Bounds computed fresh for one operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionBounds {
    pub max_row_index: usize,
    pub column_order: Vec<ColumnId>,
}

impl SelectionBounds {
    fn column_position(&self, column_id: ColumnId) -> Option<usize> {
        self.column_order.iter().position(|id| *id == column_id)
    }

    fn contains(&self, coord: &CellCoord) -> bool {
        coord.row < self.max_row_index && self.column_position(coord.column).is_some()
    }
}

pub struct TabularDataSelection {
    accessors: SelectionAccessors,
    selected_cells: Observable<BTreeSet<CellCoord>>,
    active_cell: Observable<Option<CellCoord>>,
    /// Columns picked while the grid has no rows
    empty_table_columns: Observable<BTreeSet<ColumnId>>,
    destroyed: Cell<bool>,
}

impl TabularDataSelection {
    pub fn new(accessors: SelectionAccessors) -> Self {
        TabularDataSelection {
            accessors,
            selected_cells: Observable::new(BTreeSet::new()),
            active_cell: Observable::new(None),
            empty_table_columns: Observable::new(BTreeSet::new()),
            destroyed: Cell::new(false),
        }
    }

    pub fn bounds(&self) -> SelectionBounds {
        let columns = (self.accessors.get_columns)();
        let column_order = (self.accessors.get_column_order)()
            .into_iter()
            .filter(|id| columns.contains(*id))
            .collect();
        SelectionBounds {
            max_row_index: (self.accessors.get_max_selection_row_index)(),
            column_order,
        }
    }

    pub fn max_row_index(&self) -> usize {
        self.bounds().max_row_index
    }

    pub fn selected_cells_observable(&self) -> &Observable<BTreeSet<CellCoord>> {
        &self.selected_cells
    }

    /// Selected cells that are still inside the current bounds
    pub fn selected_cells(&self) -> Vec<CellCoord> {
        let bounds = self.bounds();
        self.selected_cells
            .get()
            .iter()
            .filter(|c| bounds.contains(c))
            .copied()
            .collect()
    }

    pub fn is_cell_selected(&self, coord: CellCoord) -> bool {
        self.bounds().contains(&coord) && self.selected_cells.get().contains(&coord)
    }

    pub fn active_cell(&self) -> Option<CellCoord> {
        let active = *self.active_cell.get();
        active.filter(|c| self.bounds().contains(c))
    }

    /// Rows whose every column is selected
    pub fn selected_rows(&self) -> Vec<usize> {
        let bounds = self.bounds();
        if bounds.column_order.is_empty() {
            return Vec::new();
        }
        let selected = self.selected_cells.get();
        (0..bounds.max_row_index)
            .filter(|row| {
                bounds
                    .column_order
                    .iter()
                    .all(|col| selected.contains(&CellCoord::new(*row, *col)))
            })
            .collect()
    }

    /// Keys of fully selected rows
    pub fn selected_row_keys(&self) -> Vec<RowKey> {
        let rows = (self.accessors.get_rows)();
        self.selected_rows()
            .into_iter()
            .filter_map(|index| rows.get(index).map(|r| r.key()))
            .collect()
    }

    /// Columns whose every row is selected, or that were picked on an empty grid
    pub fn selected_columns(&self) -> Vec<ColumnId> {
        let bounds = self.bounds();
        if bounds.max_row_index == 0 {
            let picked = self.empty_table_columns.get();
            return bounds
                .column_order
                .iter()
                .filter(|id| picked.contains(id))
                .copied()
                .collect();
        }
        let selected = self.selected_cells.get();
        bounds
            .column_order
            .iter()
            .filter(|col| (0..bounds.max_row_index).all(|row| selected.contains(&CellCoord::new(row, **col))))
            .copied()
            .collect()
    }

    /// Select exactly one cell and make it active
    pub fn select_cell(&self, row: usize, column: ColumnId) -> Result<()> {
        let bounds = self.checked_bounds()?;
        let coord = Self::validate(&bounds, row, column)?;
        self.apply(std::iter::once(coord).collect(), Some(coord));
        Ok(())
    }

    /// Select the rectangle between the active cell and `(row, column)`.
    /// Without a valid active cell this behaves like `select_cell`.
    pub fn extend_selection(&self, row: usize, column: ColumnId) -> Result<()> {
        let bounds = self.checked_bounds()?;
        let target = Self::validate(&bounds, row, column)?;
        let anchor = match (*self.active_cell.get()).filter(|c| bounds.contains(c)) {
            Some(anchor) => anchor,
            None => {
                self.apply(std::iter::once(target).collect(), Some(target));
                return Ok(());
            }
        };

        let (Some(a_col), Some(t_col)) = (
            bounds.column_position(anchor.column),
            bounds.column_position(target.column),
        ) else {
            return Err(GridError::ColumnNotFound(column));
        };
        let rows = anchor.row.min(target.row)..=anchor.row.max(target.row);
        let cols = &bounds.column_order[a_col.min(t_col)..=a_col.max(t_col)];

        let cells = rows
            .flat_map(|r| cols.iter().map(move |c| CellCoord::new(r, *c)))
            .collect();
        self.apply(cells, Some(anchor));
        Ok(())
    }

    pub fn select_row(&self, row: usize) -> Result<()> {
        let bounds = self.checked_bounds()?;
        if row >= bounds.max_row_index {
            return Err(GridError::SelectionOutOfBounds {
                row,
                max: bounds.max_row_index,
            });
        }
        let cells: BTreeSet<CellCoord> = bounds
            .column_order
            .iter()
            .map(|c| CellCoord::new(row, *c))
            .collect();
        let active = match *self.active_cell.get() {
            Some(active) if active.row == row && bounds.contains(&active) => Some(active),
            _ => bounds.column_order.first().map(|c| CellCoord::new(row, *c)),
        };
        self.apply(cells, active);
        Ok(())
    }

    /// Select a whole column. Allowed on a grid with no rows.
    pub fn select_column(&self, column: ColumnId) -> Result<()> {
        let bounds = self.checked_bounds()?;
        if bounds.column_position(column).is_none() {
            return Err(GridError::ColumnNotFound(column));
        }
        if bounds.max_row_index == 0 {
            self.selected_cells.set(BTreeSet::new());
            self.active_cell.set(None);
            self.empty_table_columns.set(std::iter::once(column).collect());
            return Ok(());
        }
        let cells = (0..bounds.max_row_index).map(|r| CellCoord::new(r, column)).collect();
        self.apply(cells, Some(CellCoord::new(0, column)));
        Ok(())
    }

    pub fn select_all(&self) -> Result<()> {
        let bounds = self.checked_bounds()?;
        if bounds.max_row_index == 0 {
            self.selected_cells.set(BTreeSet::new());
            self.empty_table_columns
                .set(bounds.column_order.iter().copied().collect());
            return Ok(());
        }
        let cells = (0..bounds.max_row_index)
            .flat_map(|r| bounds.column_order.iter().map(move |c| CellCoord::new(r, *c)))
            .collect();
        let active = (*self.active_cell.get())
            .filter(|c| bounds.contains(c))
            .or_else(|| bounds.column_order.first().map(|c| CellCoord::new(0, *c)));
        self.apply(cells, active);
        Ok(())
    }

    /// Move the active cell one step, clamped at the edges, selecting only it
    pub fn move_active(&self, direction: Direction) -> Result<Option<CellCoord>> {
        let bounds = self.checked_bounds()?;
        let Some(active) = (*self.active_cell.get()).filter(|c| bounds.contains(c)) else {
            return Ok(None);
        };
        let col_pos = bounds.column_position(active.column).unwrap_or(0);
        let last_row = bounds.max_row_index.saturating_sub(1);
        let last_col = bounds.column_order.len().saturating_sub(1);

        let (row, col_pos) = match direction {
            Direction::Up => (active.row.saturating_sub(1), col_pos),
            Direction::Down => ((active.row + 1).min(last_row), col_pos),
            Direction::Left => (active.row, col_pos.saturating_sub(1)),
            Direction::Right => (active.row, (col_pos + 1).min(last_col)),
        };
        let next = CellCoord::new(row, bounds.column_order[col_pos]);
        self.apply(std::iter::once(next).collect(), Some(next));
        Ok(Some(next))
    }

    pub fn clear(&self) {
        self.selected_cells.set(BTreeSet::new());
        self.active_cell.set(None);
        self.empty_table_columns.set(BTreeSet::new());
    }

    /// Forget coordinates that fell out of bounds
    pub fn prune(&self) {
        if self.destroyed.get() {
            return;
        }
        let bounds = self.bounds();
        let current = self.selected_cells.get();
        if current.iter().any(|c| !bounds.contains(c)) {
            self.selected_cells
                .set(current.iter().filter(|c| bounds.contains(c)).copied().collect());
        }
        if let Some(active) = *self.active_cell.get() {
            if !bounds.contains(&active) {
                self.active_cell.set(None);
            }
        }
        let picked = self.empty_table_columns.get();
        if picked.iter().any(|id| bounds.column_position(*id).is_none()) {
            self.empty_table_columns.set(
                picked
                    .iter()
                    .filter(|id| bounds.column_position(**id).is_some())
                    .copied()
                    .collect(),
            );
        }
    }

    pub fn destroy(&self) {
        self.clear();
        self.destroyed.set(true);
    }

    fn checked_bounds(&self) -> Result<SelectionBounds> {
        if self.destroyed.get() {
            return Err(GridError::Destroyed);
        }
        Ok(self.bounds())
    }

    fn validate(bounds: &SelectionBounds, row: usize, column: ColumnId) -> Result<CellCoord> {
        if bounds.column_position(column).is_none() {
            return Err(GridError::ColumnNotFound(column));
        }
        if row >= bounds.max_row_index {
            return Err(GridError::SelectionOutOfBounds {
                row,
                max: bounds.max_row_index,
            });
        }
        Ok(CellCoord::new(row, column))
    }

    fn apply(&self, cells: BTreeSet<CellCoord>, active: Option<CellCoord>) {
        self.selected_cells.set(cells);
        self.active_cell.set(active);
        if !self.empty_table_columns.get().is_empty() {
            self.empty_table_columns.set(BTreeSet::new());
        }
    }
}

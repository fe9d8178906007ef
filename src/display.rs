/// Display model
///
/// Derives what the rendering layer lays out: visible columns in order with
/// their horizontal placement, and the sequence of rows to draw (group
/// headers, saved rows, new rows, help text). Nothing here is cached; every
/// call reads the current processed columns, records and view configuration.

use crate::column::{CellValue, ColumnId};
use crate::config::GridConfig;
use crate::meta::Meta;
use crate::observable::Observable;
use crate::processed_column::{ProcessedColumn, ProcessedColumnIndex};
use crate::records::{RecordsData, RowKey};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

/// Widest a single column can be
pub const MAX_COLUMN_WIDTH: u32 = 10_000;

/// Horizontal position of one column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnPlacement {
    pub column_id: ColumnId,
    pub left: u32,
    pub width: u32,
}

/// One row to draw
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayRow {
    /// Precedes the first row of a group on this page
    GroupHeader {
        group_index: usize,
        eq_value: BTreeMap<ColumnId, CellValue>,
        count: usize,
    },
    /// `index` is the row's position in the combined (saved + new) rows
    Record { index: usize, key: RowKey, is_new: bool },
    /// Shown after new rows
    HelpText,
}

pub struct Display {
    config: GridConfig,
    meta: Meta,
    records: Rc<RecordsData>,
    processed: Observable<ProcessedColumnIndex>,
    custom_widths: Observable<HashMap<ColumnId, u32>>,
}

impl Display {
    pub fn new(
        config: GridConfig,
        meta: Meta,
        records: Rc<RecordsData>,
        processed: Observable<ProcessedColumnIndex>,
    ) -> Self {
        Display {
            config,
            meta,
            records,
            processed,
            custom_widths: Observable::new(HashMap::new()),
        }
    }

    pub fn visible_columns(&self) -> Vec<ProcessedColumn> {
        let processed = self.processed.get();
        let hidden = self.records.contextual_filters().column_ids();
        processed
            .ordered()
            .filter(|c| !hidden.contains(&c.id))
            .cloned()
            .collect()
    }

    pub fn column_widths(&self) -> &Observable<HashMap<ColumnId, u32>> {
        &self.custom_widths
    }

    /// Width of a column: a user resize, else the column's stored display
    /// width, else the default
    pub fn column_width(&self, column_id: ColumnId) -> u32 {
        if let Some(width) = self.custom_widths.get().get(&column_id) {
            return *width;
        }
        let stored = self.processed.get().get(column_id).and_then(|c| {
            c.column
                .display_options
                .as_ref()
                .and_then(|o| o.get("width"))
                .and_then(|w| w.as_u64())
        });
        match stored {
            Some(width) => (width.min(MAX_COLUMN_WIDTH as u64) as u32).max(self.config.min_column_width),
            None => self.config.default_column_width,
        }
    }

    /// Resize a column, clamped to [min_column_width, MAX_COLUMN_WIDTH]
    pub fn set_column_width(&self, column_id: ColumnId, width: u32) {
        let width = width.clamp(self.config.min_column_width, MAX_COLUMN_WIDTH.max(self.config.min_column_width));
        self.custom_widths.update(|widths| {
            let mut widths = widths.clone();
            widths.insert(column_id, width);
            widths
        });
    }

    pub fn reset_column_width(&self, column_id: ColumnId) {
        if self.custom_widths.get().contains_key(&column_id) {
            self.custom_widths.update(|widths| {
                let mut widths = widths.clone();
                widths.remove(&column_id);
                widths
            });
        }
    }

    pub fn column_placements(&self) -> Vec<ColumnPlacement> {
        let mut left = 0;
        self.visible_columns()
            .iter()
            .map(|c| {
                let width = self.column_width(c.id);
                let placement = ColumnPlacement {
                    column_id: c.id,
                    left,
                    width,
                };
                left = left.saturating_add(width);
                placement
            })
            .collect()
    }

    pub fn row_width(&self) -> u32 {
        self.column_placements()
            .last()
            .map(|p| p.left.saturating_add(p.width))
            .unwrap_or(0)
    }

    pub fn displayable_rows(&self) -> Vec<DisplayRow> {
        let saved = self.records.saved_rows().get();
        let new = self.records.new_rows().get();
        let groups = self.records.groups().get();

        // First page position of each group -> group
        let mut group_starts = HashMap::new();
        if !self.meta.grouping().get().is_empty() {
            if let Some(groups) = groups.as_ref() {
                for (group_index, group) in groups.iter().enumerate() {
                    if let Some(first) = group.result_indices.iter().min() {
                        group_starts.insert(*first, (group_index, group));
                    }
                }
            }
        }

        let mut rows = Vec::with_capacity(saved.len() + new.len() + 1);
        for (index, record) in saved.iter().enumerate() {
            if let Some((group_index, group)) = group_starts.get(&index) {
                rows.push(DisplayRow::GroupHeader {
                    group_index: *group_index,
                    eq_value: group.eq_value.clone(),
                    count: group.count,
                });
            }
            rows.push(DisplayRow::Record {
                index,
                key: RowKey::Saved(record.id),
                is_new: false,
            });
        }
        for (offset, record) in new.iter().enumerate() {
            rows.push(DisplayRow::Record {
                index: saved.len() + offset,
                key: RowKey::New(record.key),
                is_new: true,
            });
        }
        if !new.is_empty() {
            rows.push(DisplayRow::HelpText);
        }
        rows
    }

    /// Visible columns carrying a sort, filter or group entry
    pub fn highlighted_columns(&self) -> Vec<ColumnId> {
        let view = self.meta.snapshot();
        self.visible_columns()
            .iter()
            .map(|c| c.id)
            .filter(|id| view.sorting.has(*id) || view.filtering.references(*id) || view.grouping.has_column(*id))
            .collect()
    }
}

/// Record store ("RecordsData")
///
/// Holds the current page of saved rows, the client-side new rows that have
/// not been reloaded from the server yet, the total row count and the fetch
/// state. Requests are shaped by the view configuration (`Meta`) plus a fixed
/// set of contextual filters that the user never sees.
///
/// Rows are presented saved-then-new. Saved and new rows are disjoint: a
/// successful reload clears the new-row segment (or, after a row deletion,
/// drops the saved new rows that came back on the reloaded page), and a saved
/// new row stays in that segment until then.

use crate::api::{RecordsApi, RequestContext, RequestStatus};
use crate::column::{CellValue, ColumnId};
use crate::columns_store::ColumnsDataStore;
use crate::error::{GridError, Result};
use crate::meta::{FilterCombination, FilterCondition, FilterEntry, GroupEntry, Meta, SortDirection};
use crate::observable::Observable;
use crate::selection::max_selectable_row_index;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

/// Primary key value of a saved record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub i64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A row persisted server-side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub cells: HashMap<ColumnId, CellValue>,
}

impl Record {
    pub fn get(&self, column_id: ColumnId) -> &CellValue {
        self.cells.get(&column_id).unwrap_or(&CellValue::Null)
    }
}

/// A client-created row
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    /// Client-generated key, unique within one store
    pub key: u64,
    pub cells: HashMap<ColumnId, CellValue>,
    /// Set once the row has been saved
    pub persisted: Option<RecordId>,
}

/// Stable handle for a row across saved and new segments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RowKey {
    Saved(RecordId),
    New(u64),
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowKey::Saved(id) => write!(f, "{}", id),
            RowKey::New(key) => write!(f, "__new_{}", key),
        }
    }
}

/// One displayable row
#[derive(Debug, Clone, PartialEq)]
pub enum RecordRow {
    Saved(Record),
    New(NewRecord),
}

impl RecordRow {
    pub fn key(&self) -> RowKey {
        match self {
            RecordRow::Saved(record) => RowKey::Saved(record.id),
            RecordRow::New(record) => RowKey::New(record.key),
        }
    }

    pub fn cells(&self) -> &HashMap<ColumnId, CellValue> {
        match self {
            RecordRow::Saved(record) => &record.cells,
            RecordRow::New(record) => &record.cells,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, RecordRow::New(_))
    }

    /// Server id, if the row exists server-side
    pub fn record_id(&self) -> Option<RecordId> {
        match self {
            RecordRow::Saved(record) => Some(record.id),
            RecordRow::New(record) => record.persisted,
        }
    }
}

/// One group reported by the server for a grouped request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordGroup {
    /// Values shared by every row in the group
    pub eq_value: BTreeMap<ColumnId, CellValue>,
    /// Rows in the group across all pages
    pub count: usize,
    /// Positions of the group's rows within the returned page
    pub result_indices: Vec<usize>,
}

/// Response of a records fetch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableRecordsData {
    /// Rows matching the filters, across all pages
    pub count: usize,
    pub results: Vec<Record>,
    #[serde(default)]
    pub groups: Option<Vec<RecordGroup>>,
}

/// Filter tree sent with a records request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterExpr {
    Condition(FilterEntry),
    And(Vec<FilterExpr>),
    Or(Vec<FilterExpr>),
}

impl FilterExpr {
    pub fn evaluate(&self, cells: &HashMap<ColumnId, CellValue>) -> bool {
        match self {
            FilterExpr::Condition(entry) => {
                let cell = cells.get(&entry.column_id).unwrap_or(&CellValue::Null);
                entry.condition.matches(cell, &entry.value)
            }
            FilterExpr::And(children) => children.iter().all(|c| c.evaluate(cells)),
            FilterExpr::Or(children) => children.iter().any(|c| c.evaluate(cells)),
        }
    }

    /// Every column the expression reads
    pub fn column_ids(&self) -> Vec<ColumnId> {
        match self {
            FilterExpr::Condition(entry) => vec![entry.column_id],
            FilterExpr::And(children) | FilterExpr::Or(children) => {
                children.iter().flat_map(|c| c.column_ids()).collect()
            }
        }
    }
}

/// Hidden, always-on equality filters scoping a grid
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextualFilters(BTreeMap<ColumnId, CellValue>);

impl ContextualFilters {
    pub fn new() -> Self {
        ContextualFilters::default()
    }

    pub fn with(mut self, column_id: ColumnId, value: impl Into<CellValue>) -> Self {
        self.0.insert(column_id, value.into());
        self
    }

    pub fn column_ids(&self) -> Vec<ColumnId> {
        self.0.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ColumnId, &CellValue)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn to_expr(&self) -> Option<FilterExpr> {
        if self.0.is_empty() {
            return None;
        }
        Some(FilterExpr::And(
            self.0
                .iter()
                .map(|(id, value)| FilterExpr::Condition(FilterEntry::new(*id, FilterCondition::Equal, value.clone())))
                .collect(),
        ))
    }
}

impl FromIterator<(ColumnId, CellValue)> for ContextualFilters {
    fn from_iter<I: IntoIterator<Item = (ColumnId, CellValue)>>(iter: I) -> Self {
        ContextualFilters(iter.into_iter().collect())
    }
}

/// Everything a records request needs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordsRequestParams {
    pub limit: usize,
    pub offset: usize,
    pub order_by: Vec<(ColumnId, SortDirection)>,
    pub grouping: Vec<GroupEntry>,
    pub filter: Option<FilterExpr>,
}

pub struct RecordsData {
    ctx: RequestContext,
    api: Rc<dyn RecordsApi>,
    meta: Meta,
    columns: Rc<ColumnsDataStore>,
    contextual_filters: ContextualFilters,
    saved_rows: Observable<Vec<Record>>,
    new_rows: Observable<Vec<NewRecord>>,
    total_count: Observable<usize>,
    groups: Observable<Option<Vec<RecordGroup>>>,
    state: Observable<RequestStatus>,
    next_new_key: Cell<u64>,
    latest_request: Cell<u64>,
    destroyed: Cell<bool>,
}

impl RecordsData {
    pub fn new(
        ctx: RequestContext,
        api: Rc<dyn RecordsApi>,
        meta: Meta,
        columns: Rc<ColumnsDataStore>,
        contextual_filters: ContextualFilters,
    ) -> Self {
        RecordsData {
            ctx,
            api,
            meta,
            columns,
            contextual_filters,
            saved_rows: Observable::new(Vec::new()),
            new_rows: Observable::new(Vec::new()),
            total_count: Observable::new(0),
            groups: Observable::new(None),
            state: Observable::new(RequestStatus::Idle),
            next_new_key: Cell::new(0),
            latest_request: Cell::new(0),
            destroyed: Cell::new(false),
        }
    }

    pub fn saved_rows(&self) -> &Observable<Vec<Record>> {
        &self.saved_rows
    }

    pub fn new_rows(&self) -> &Observable<Vec<NewRecord>> {
        &self.new_rows
    }

    pub fn total_count(&self) -> &Observable<usize> {
        &self.total_count
    }

    pub fn groups(&self) -> &Observable<Option<Vec<RecordGroup>>> {
        &self.groups
    }

    pub fn state(&self) -> &Observable<RequestStatus> {
        &self.state
    }

    pub fn contextual_filters(&self) -> &ContextualFilters {
        &self.contextual_filters
    }

    /// Saved rows followed by new rows
    pub fn combined_rows(&self) -> Vec<RecordRow> {
        let saved = self.saved_rows.get();
        let new = self.new_rows.get();
        saved
            .iter()
            .cloned()
            .map(RecordRow::Saved)
            .chain(new.iter().cloned().map(RecordRow::New))
            .collect()
    }

    /// Exclusive upper bound of selectable row indices
    pub fn selectable_row_count(&self) -> usize {
        max_selectable_row_index(
            &self.meta.pagination().get(),
            *self.total_count.get(),
            self.saved_rows.get().len(),
            self.new_rows.get().len(),
        )
    }

    /// Build request parameters from the current view configuration
    pub fn request_params(&self) -> RecordsRequestParams {
        let view = self.meta.snapshot();

        let user_filter = if view.filtering.is_empty() {
            None
        } else {
            let conditions = view
                .filtering
                .entries()
                .iter()
                .cloned()
                .map(FilterExpr::Condition)
                .collect();
            Some(match view.filtering.combination {
                FilterCombination::And => FilterExpr::And(conditions),
                FilterCombination::Or => FilterExpr::Or(conditions),
            })
        };

        let filter = match (self.contextual_filters.to_expr(), user_filter) {
            (Some(hidden), Some(user)) => Some(FilterExpr::And(vec![hidden, user])),
            (hidden, user) => hidden.or(user),
        };

        RecordsRequestParams {
            limit: view.pagination.size,
            offset: view.pagination.offset,
            order_by: view.sorting.iter().copied().collect(),
            grouping: view.grouping.entries().to_vec(),
            filter,
        }
    }

    /// Reload the current page, discarding new rows
    pub async fn fetch(&self) -> Result<Rc<TableRecordsData>> {
        self.fetch_with(false).await
    }

    async fn fetch_with(&self, retain_new_rows: bool) -> Result<Rc<TableRecordsData>> {
        if self.destroyed.get() {
            return Err(GridError::Destroyed);
        }
        let request = self.latest_request.get() + 1;
        self.latest_request.set(request);
        self.state.set(RequestStatus::Loading);

        let params = self.request_params();
        debug!(
            "Fetching records for table {} (request {}, offset {}, limit {})",
            self.ctx.table_id, request, params.offset, params.limit
        );

        let result = self.api.list(&self.ctx, &params).await;

        if self.destroyed.get() || request != self.latest_request.get() {
            return result.map(Rc::new);
        }

        match result {
            Ok(data) => {
                let data = Rc::new(data);
                self.saved_rows.set(data.results.clone());
                self.total_count.set(data.count);
                self.groups.set(data.groups.clone());
                if !retain_new_rows {
                    self.new_rows.set(Vec::new());
                } else {
                    // A saved new row that is on the reloaded page now belongs to the saved rows
                    let on_page: HashSet<RecordId> = data.results.iter().map(|r| r.id).collect();
                    let duplicated = |r: &NewRecord| r.persisted.is_some_and(|id| on_page.contains(&id));
                    if self.new_rows.get().iter().any(duplicated) {
                        self.new_rows
                            .update(|rows| rows.iter().filter(|r| !duplicated(*r)).cloned().collect());
                    }
                }
                self.state.set(RequestStatus::Done);
                Ok(data)
            }
            Err(e) => {
                warn!("Records fetch failed for table {}: {}", self.ctx.table_id, e);
                self.state.set(RequestStatus::Error(e.status_message()));
                Err(e)
            }
        }
    }

    /// Append an unsaved placeholder row. Columns without a server default
    /// start out null; contextual filter values are pre-filled so the row
    /// stays inside the scoped view.
    pub fn add_new_row(&self) -> RowKey {
        let key = self.next_new_key.get();
        self.next_new_key.set(key + 1);

        let mut cells: HashMap<ColumnId, CellValue> = self
            .columns
            .columns()
            .get()
            .iter()
            .filter(|c| !c.has_default())
            .map(|c| (c.id, CellValue::Null))
            .collect();
        for (column_id, value) in self.contextual_filters.iter() {
            cells.insert(*column_id, value.clone());
        }

        self.new_rows.update(|rows| {
            let mut rows = rows.clone();
            rows.push(NewRecord {
                key,
                cells,
                persisted: None,
            });
            rows
        });
        RowKey::New(key)
    }

    /// Persist a new row. It stays in the new-row segment until the next reload.
    pub async fn save_new_row(&self, key: RowKey) -> Result<Record> {
        let RowKey::New(client_key) = key else {
            return Err(GridError::RowNotFound(key.to_string()));
        };
        let pending = self
            .new_rows
            .get()
            .iter()
            .find(|r| r.key == client_key)
            .cloned()
            .ok_or_else(|| GridError::RowNotFound(key.to_string()))?;

        let mut cells = pending.cells.clone();
        cells.retain(|_, v| !v.is_null());
        for (column_id, value) in self.contextual_filters.iter() {
            cells.insert(*column_id, value.clone());
        }

        let saved = self.api.create(&self.ctx, cells).await?;
        self.replace_new_row(client_key, |row| NewRecord {
            key: row.key,
            cells: saved.cells.clone(),
            persisted: Some(saved.id),
        });
        self.total_count.update(|count| count + 1);
        Ok(saved)
    }

    /// Change one cell. Unsaved rows change locally; everything else is
    /// persisted and replaced by the server's version of the row.
    pub async fn update_cell(&self, key: RowKey, column_id: ColumnId, value: CellValue) -> Result<()> {
        let row = self
            .find_row(key)
            .ok_or_else(|| GridError::RowNotFound(key.to_string()))?;

        match (row, key) {
            (RecordRow::New(new_row), RowKey::New(client_key)) if new_row.persisted.is_none() => {
                self.replace_new_row(client_key, |r| {
                    let mut cells = r.cells.clone();
                    cells.insert(column_id, value.clone());
                    NewRecord { cells, ..r.clone() }
                });
                Ok(())
            }
            (row, _) => {
                let record_id = row
                    .record_id()
                    .ok_or_else(|| GridError::RowNotFound(key.to_string()))?;
                let updated = self.api.patch(&self.ctx, record_id, column_id, value).await?;
                match key {
                    RowKey::Saved(_) => self.saved_rows.update(|rows| {
                        rows.iter()
                            .map(|r| if r.id == record_id { updated.clone() } else { r.clone() })
                            .collect()
                    }),
                    RowKey::New(client_key) => self.replace_new_row(client_key, |r| NewRecord {
                        cells: updated.cells.clone(),
                        ..r.clone()
                    }),
                }
                Ok(())
            }
        }
    }

    /// Delete rows. Unsaved rows are dropped locally; rows that exist
    /// server-side are deleted there, then the page is reloaded keeping the
    /// remaining new rows.
    pub async fn delete_rows(&self, keys: &[RowKey]) -> Result<()> {
        let rows = self.combined_rows();
        let mut record_ids = Vec::new();
        let mut new_keys = Vec::new();
        for key in keys {
            let row = rows
                .iter()
                .find(|r| r.key() == *key)
                .ok_or_else(|| GridError::RowNotFound(key.to_string()))?;
            if let Some(id) = row.record_id() {
                record_ids.push(id);
            }
            if let RowKey::New(client_key) = key {
                new_keys.push(*client_key);
            }
        }

        if !record_ids.is_empty() {
            self.api.delete(&self.ctx, record_ids).await?;
        }
        if !new_keys.is_empty() {
            self.new_rows.update(|current| {
                current
                    .iter()
                    .filter(|r| !new_keys.contains(&r.key))
                    .cloned()
                    .collect()
            });
        }
        if keys.iter().any(|k| matches!(k, RowKey::Saved(_))) {
            self.fetch_with(true).await?;
        }
        Ok(())
    }

    pub fn destroy(&self) {
        self.destroyed.set(true);
    }

    fn find_row(&self, key: RowKey) -> Option<RecordRow> {
        match key {
            RowKey::Saved(id) => self
                .saved_rows
                .get()
                .iter()
                .find(|r| r.id == id)
                .cloned()
                .map(RecordRow::Saved),
            RowKey::New(client_key) => self
                .new_rows
                .get()
                .iter()
                .find(|r| r.key == client_key)
                .cloned()
                .map(RecordRow::New),
        }
    }

    fn replace_new_row<F>(&self, client_key: u64, f: F)
    where
        F: Fn(&NewRecord) -> NewRecord,
    {
        self.new_rows.update(|rows| {
            rows.iter()
                .map(|r| if r.key == client_key { f(r) } else { r.clone() })
                .collect()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::TableId;
    use crate::error::Source;
    use crate::memory::MemoryTable;
    use crate::meta::{Filtering, Pagination, Sorting};

    async fn setup(contextual: ContextualFilters) -> (Rc<MemoryTable>, Meta, RecordsData) {
        let table = Rc::new(MemoryTable::sample());
        let ctx = RequestContext::new(TableId(1), None);
        let columns = Rc::new(ColumnsDataStore::new(ctx.clone(), table.clone(), contextual.column_ids()));
        columns.fetch().await.unwrap();
        let meta = Meta::new(3);
        let records = RecordsData::new(ctx, table.clone(), meta.clone(), columns, contextual);
        (table, meta, records)
    }

    #[tokio::test]
    async fn test_fetch_uses_pagination_and_sorting() {
        let (_table, meta, records) = setup(ContextualFilters::new()).await;
        meta.sorting().set(Sorting::new().with(ColumnId(1), SortDirection::Descending));

        let data = records.fetch().await.unwrap();

        assert_eq!(data.count, 5);
        assert_eq!(records.saved_rows().get().len(), 3);
        assert_eq!(records.saved_rows().get()[0].id, RecordId(5));
        assert_eq!(*records.state().get(), RequestStatus::Done);
    }

    #[tokio::test]
    async fn test_contextual_filters_are_merged_but_invisible() {
        let contextual = ContextualFilters::new().with(ColumnId(3), 10i64);
        let (_table, meta, records) = setup(contextual).await;
        meta.filtering().set(Filtering::default().with_entry(FilterEntry::new(
            ColumnId(2),
            FilterCondition::Contains,
            "a",
        )));

        let params = records.request_params();
        let filter = params.filter.clone().unwrap();
        assert!(filter.column_ids().contains(&ColumnId(3)));
        assert!(!meta.references_column(ColumnId(3)));

        records.fetch().await.unwrap();
        for row in records.saved_rows().get().iter() {
            assert_eq!(row.get(ColumnId(3)), &CellValue::Int64(10));
        }
    }

    #[tokio::test]
    async fn test_new_rows_follow_saved_rows_and_clear_on_fetch() {
        let contextual = ContextualFilters::new().with(ColumnId(3), 10i64);
        let (_table, _meta, records) = setup(contextual).await;
        records.fetch().await.unwrap();
        let saved = records.saved_rows().get().len();

        let key = records.add_new_row();
        let rows = records.combined_rows();
        assert_eq!(rows.len(), saved + 1);
        assert_eq!(rows.last().unwrap().key(), key);
        // Generated primary key is left to the server
        assert!(!rows.last().unwrap().cells().contains_key(&ColumnId(1)));
        assert_eq!(rows.last().unwrap().cells()[&ColumnId(3)], CellValue::Int64(10));

        records.fetch().await.unwrap();
        assert!(records.new_rows().get().is_empty());
    }

    #[tokio::test]
    async fn test_save_and_edit_new_row() {
        let (table, _meta, records) = setup(ContextualFilters::new()).await;
        records.fetch().await.unwrap();
        let key = records.add_new_row();

        records.update_cell(key, ColumnId(2), CellValue::from("Draft")).await.unwrap();
        assert_eq!(table.call_count("records.patch"), 0);

        let saved = records.save_new_row(key).await.unwrap();
        assert_eq!(saved.get(ColumnId(2)), &CellValue::from("Draft"));
        assert_eq!(records.new_rows().get()[0].persisted, Some(saved.id));
        assert_eq!(*records.total_count().get(), 6);

        records.update_cell(key, ColumnId(2), CellValue::from("Final")).await.unwrap();
        assert_eq!(table.call_count("records.patch"), 1);
        assert_eq!(records.new_rows().get()[0].cells[&ColumnId(2)], CellValue::from("Final"));
    }

    #[tokio::test]
    async fn test_delete_rows() {
        let (_table, _meta, records) = setup(ContextualFilters::new()).await;
        records.fetch().await.unwrap();
        let unsaved = records.add_new_row();

        records
            .delete_rows(&[RowKey::Saved(RecordId(1)), unsaved])
            .await
            .unwrap();

        assert_eq!(*records.total_count().get(), 4);
        assert!(records.new_rows().get().is_empty());
        assert!(records.saved_rows().get().iter().all(|r| r.id != RecordId(1)));

        let missing = records.delete_rows(&[RowKey::Saved(RecordId(42))]).await;
        assert!(matches!(missing, Err(GridError::RowNotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_rows_does_not_duplicate_saved_new_row() {
        let (_table, meta, records) = setup(ContextualFilters::new()).await;
        meta.pagination().set(Pagination::new(50));
        records.fetch().await.unwrap();
        let key = records.add_new_row();
        records
            .update_cell(key, ColumnId(2), CellValue::from("Ubik"))
            .await
            .unwrap();
        let saved = records.save_new_row(key).await.unwrap();

        records.delete_rows(&[RowKey::Saved(RecordId(1))]).await.unwrap();

        assert!(records.saved_rows().get().iter().any(|r| r.id == saved.id));
        assert!(records.new_rows().get().is_empty());
        let ids: Vec<_> = records.combined_rows().iter().filter_map(|r| r.record_id()).collect();
        assert_eq!(ids, vec![RecordId(2), RecordId(3), RecordId(4), RecordId(5), saved.id]);
        assert_eq!(records.selectable_row_count(), 5);
    }

    #[tokio::test]
    async fn test_delete_rows_keeps_unsaved_new_rows() {
        let (_table, _meta, records) = setup(ContextualFilters::new()).await;
        records.fetch().await.unwrap();
        let unsaved = records.add_new_row();

        records.delete_rows(&[RowKey::Saved(RecordId(2))]).await.unwrap();

        assert_eq!(records.new_rows().get().len(), 1);
        assert_eq!(RowKey::New(records.new_rows().get()[0].key), unsaved);
    }

    #[tokio::test]
    async fn test_selectable_row_count_tracks_page() {
        let (table, meta, records) = setup(ContextualFilters::new()).await;
        meta.pagination().set(Pagination::new(3).with_page(2));
        records.fetch().await.unwrap();

        // 5 rows, offset 3: two saved rows remain on the last page
        assert_eq!(records.selectable_row_count(), 2);
        records.add_new_row();
        assert_eq!(records.selectable_row_count(), 3);

        table.fail_next(Source::Records);
        assert!(records.fetch().await.is_err());
        assert!(records.state().get().is_error());
        assert_eq!(records.saved_rows().get().len(), 2);
    }
}

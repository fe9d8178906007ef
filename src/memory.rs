/// In-memory table backend
///
/// `MemoryTable` implements `ColumnsApi`, `ConstraintsApi` and `RecordsApi`
/// over a table held in process. Record listing honours the request's
/// filter, ordering, grouping and pagination the way a server would.
///
/// Every call yields to the scheduler once before answering, so fetches issued
/// together really interleave. Tests can additionally hold all calls of one
/// source behind a gate (`pause`/`resume`), make the next call fail
/// (`fail_next`), and count calls by name (`"records.list"`, `"columns.delete"`).

use crate::api::{ColumnsApi, ConstraintsApi, RecordsApi, RequestContext};
use crate::column::{CellValue, Column, ColumnId, ColumnPatch, NewColumn, TableId};
use crate::constraint::{Constraint, ConstraintId, ConstraintKind, ConstraintsData};
use crate::error::{GridError, Result, Source};
use crate::meta::SortDirection;
use crate::records::{Record, RecordGroup, RecordId, RecordsRequestParams, TableRecordsData};
use futures::future::{FutureExt, LocalBoxFuture};
use log::debug;
use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::Notify;

#[derive(Default)]
struct TableState {
    columns: Vec<Column>,
    constraints: Vec<Constraint>,
    records: Vec<Record>,
}

/// Holds calls back while closed
#[derive(Default)]
struct Gate {
    closed: Cell<bool>,
    notify: Notify,
}

impl Gate {
    async fn pass(&self) {
        while self.closed.get() {
            let opened = self.notify.notified();
            if !self.closed.get() {
                break;
            }
            opened.await;
        }
    }
}

#[derive(Default)]
pub struct MemoryTable {
    state: RefCell<TableState>,
    failing: RefCell<HashSet<Source>>,
    gates: [Gate; 3],
    calls: RefCell<HashMap<String, usize>>,
}

fn gate_slot(source: Source) -> usize {
    match source {
        Source::Columns => 0,
        Source::Constraints => 1,
        Source::Records => 2,
    }
}

impl MemoryTable {
    pub fn new(columns: Vec<Column>, constraints: Vec<Constraint>, records: Vec<Record>) -> Self {
        MemoryTable {
            state: RefCell::new(TableState {
                columns,
                constraints,
                records,
            }),
            ..Default::default()
        }
    }

    /// A small books table: id (generated primary key), title, author
    /// (foreign key to table 2) and published.
    pub fn sample() -> Self {
        let columns = vec![
            Column::new(1, "id", "INTEGER", 0).primary_key(),
            Column::new(2, "title", "VARCHAR", 1),
            Column::new(3, "author", "INTEGER", 2),
            Column::new(4, "published", "BOOLEAN", 3),
        ];
        let constraints = vec![
            Constraint::new(1, "books_pkey", ConstraintKind::PrimaryKey, vec![ColumnId(1)]),
            Constraint::foreign_key(2, "books_author_fkey", ColumnId(3), TableId(2)),
        ];
        let rows: [(i64, &str, i64, bool); 5] = [
            (1, "Dune", 10, true),
            (2, "Solaris", 20, true),
            (3, "Foundation", 10, false),
            (4, "Hyperion", 10, true),
            (5, "Neuromancer", 20, false),
        ];
        let records = rows
            .iter()
            .map(|(id, title, author, published)| Record {
                id: RecordId(*id),
                cells: HashMap::from([
                    (ColumnId(1), CellValue::Int64(*id)),
                    (ColumnId(2), CellValue::from(*title)),
                    (ColumnId(3), CellValue::Int64(*author)),
                    (ColumnId(4), CellValue::Bool(*published)),
                ]),
            })
            .collect();
        MemoryTable::new(columns, constraints, records)
    }

    /// Make the next call against `source` fail
    pub fn fail_next(&self, source: Source) {
        self.failing.borrow_mut().insert(source);
    }

    /// Hold every call against `source` until `resume`
    pub fn pause(&self, source: Source) {
        self.gates[gate_slot(source)].closed.set(true);
    }

    pub fn resume(&self, source: Source) {
        let gate = &self.gates[gate_slot(source)];
        gate.closed.set(false);
        gate.notify.notify_waiters();
    }

    pub fn call_count(&self, name: &str) -> usize {
        self.calls.borrow().get(name).copied().unwrap_or(0)
    }

    pub fn record_count(&self) -> usize {
        self.state.borrow().records.len()
    }

    /// Rename a column behind the grid's back
    pub fn rename_column_directly(&self, column_id: ColumnId, name: &str) {
        let mut state = self.state.borrow_mut();
        if let Some(column) = state.columns.iter_mut().find(|c| c.id == column_id) {
            column.name = name.to_string();
        }
    }

    /// Move `column_ids` out into another table, leaving one foreign-key
    /// column in their place. Returns the new column's id.
    pub fn extract_columns_directly(&self, column_ids: &[ColumnId], fk_name: &str, referent: TableId) -> ColumnId {
        let mut state = self.state.borrow_mut();
        let fk_id = next_column_id(&state.columns);
        let index = state
            .columns
            .iter()
            .filter(|c| column_ids.contains(&c.id))
            .map(|c| c.index)
            .min()
            .unwrap_or(state.columns.len());

        state.columns.retain(|c| !column_ids.contains(&c.id));
        state.columns.push(Column::new(fk_id, fk_name, "INTEGER", index));
        state.columns.sort_by_key(|c| c.index);
        for (position, column) in state.columns.iter_mut().enumerate() {
            column.index = position;
        }

        state.constraints.retain(|c| !c.columns.iter().any(|id| column_ids.contains(id)));
        let constraint_id = state.constraints.iter().map(|c| c.id.0).max().unwrap_or(0) + 1;
        state
            .constraints
            .push(Constraint::foreign_key(constraint_id, format!("{}_fkey", fk_name), fk_id, referent));

        for (n, record) in state.records.iter_mut().enumerate() {
            record.cells.retain(|id, _| !column_ids.contains(id));
            record.cells.insert(fk_id, CellValue::Int64(n as i64 + 1));
        }
        fk_id
    }

    /// Count the call and take a pending failure for `source`
    fn begin(&self, source: Source, call: &str) -> bool {
        *self.calls.borrow_mut().entry(call.to_string()).or_insert(0) += 1;
        self.failing.borrow_mut().remove(&source)
    }

    async fn settle(&self, source: Source, call: &str, failed: bool) -> Result<()> {
        self.gates[gate_slot(source)].pass().await;
        tokio::task::yield_now().await;
        if failed {
            debug!("Injected failure for {}", call);
            return Err(GridError::fetch(source, format!("{} failed", call)));
        }
        Ok(())
    }

    fn list_records(&self, params: &RecordsRequestParams) -> TableRecordsData {
        let state = self.state.borrow();
        let mut matching: Vec<&Record> = state
            .records
            .iter()
            .filter(|r| params.filter.as_ref().map_or(true, |f| f.evaluate(&r.cells)))
            .collect();

        matching.sort_by(|a, b| {
            for (column_id, direction) in &params.order_by {
                let ordering = compare_cells(a.get(*column_id), b.get(*column_id));
                let ordering = match direction {
                    SortDirection::Ascending => ordering,
                    SortDirection::Descending => ordering.reverse(),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            a.id.cmp(&b.id)
        });

        let count = matching.len();
        let page: Vec<&Record> = matching
            .iter()
            .skip(params.offset)
            .take(params.limit)
            .copied()
            .collect();

        let groups = if params.grouping.is_empty() {
            None
        } else {
            let key_of = |record: &Record| -> BTreeMap<ColumnId, CellValue> {
                params
                    .grouping
                    .iter()
                    .map(|g| (g.column_id, record.get(g.column_id).clone()))
                    .collect()
            };
            let mut groups: Vec<RecordGroup> = Vec::new();
            for (position, record) in page.iter().enumerate() {
                let key = key_of(record);
                match groups.last_mut() {
                    Some(group) if group.eq_value == key => group.result_indices.push(position),
                    _ => {
                        let total = matching.iter().filter(|r| key_of(r) == key).count();
                        groups.push(RecordGroup {
                            eq_value: key,
                            count: total,
                            result_indices: vec![position],
                        });
                    }
                }
            }
            Some(groups)
        };

        TableRecordsData {
            count,
            results: page.into_iter().cloned().collect(),
            groups,
        }
    }
}

fn next_column_id(columns: &[Column]) -> ColumnId {
    ColumnId(columns.iter().map(|c| c.id.0).max().unwrap_or(0) + 1)
}

/// Nulls first, then numbers, booleans and strings in their natural order
fn compare_cells(a: &CellValue, b: &CellValue) -> Ordering {
    match (a, b) {
        (CellValue::Null, CellValue::Null) => Ordering::Equal,
        (CellValue::Null, _) => Ordering::Less,
        (_, CellValue::Null) => Ordering::Greater,
        (CellValue::Bool(x), CellValue::Bool(y)) => x.cmp(y),
        (CellValue::String(x), CellValue::String(y)) => x.cmp(y),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        },
    }
}

impl ColumnsApi for MemoryTable {
    fn list<'a>(&'a self, _ctx: &'a RequestContext) -> LocalBoxFuture<'a, Result<Vec<Column>>> {
        async move {
            let failed = self.begin(Source::Columns, "columns.list");
            let snapshot = self.state.borrow().columns.clone();
            self.settle(Source::Columns, "columns.list", failed).await?;
            Ok(snapshot)
        }
        .boxed_local()
    }

    fn add<'a>(&'a self, _ctx: &'a RequestContext, column: NewColumn) -> LocalBoxFuture<'a, Result<Column>> {
        async move {
            let failed = self.begin(Source::Columns, "columns.add");
            self.settle(Source::Columns, "columns.add", failed).await?;
            let mut state = self.state.borrow_mut();
            let mut created = Column::new(
                next_column_id(&state.columns),
                column.name,
                column.db_type,
                state.columns.len(),
            );
            created.nullable = column.nullable;
            state.columns.push(created.clone());
            Ok(created)
        }
        .boxed_local()
    }

    fn patch<'a>(
        &'a self,
        _ctx: &'a RequestContext,
        column_id: ColumnId,
        patch: ColumnPatch,
    ) -> LocalBoxFuture<'a, Result<Column>> {
        async move {
            let failed = self.begin(Source::Columns, "columns.patch");
            self.settle(Source::Columns, "columns.patch", failed).await?;
            let mut state = self.state.borrow_mut();
            let column = state
                .columns
                .iter_mut()
                .find(|c| c.id == column_id)
                .ok_or(GridError::ColumnNotFound(column_id))?;
            *column = column.patched(&patch);
            Ok(column.clone())
        }
        .boxed_local()
    }

    fn delete<'a>(&'a self, _ctx: &'a RequestContext, column_id: ColumnId) -> LocalBoxFuture<'a, Result<()>> {
        async move {
            let failed = self.begin(Source::Columns, "columns.delete");
            self.settle(Source::Columns, "columns.delete", failed).await?;
            let mut state = self.state.borrow_mut();
            if !state.columns.iter().any(|c| c.id == column_id) {
                return Err(GridError::ColumnNotFound(column_id));
            }
            state.columns.retain(|c| c.id != column_id);
            // Dropping a column drops the constraints built on it
            state.constraints.retain(|c| !c.covers(column_id));
            for record in state.records.iter_mut() {
                record.cells.remove(&column_id);
            }
            Ok(())
        }
        .boxed_local()
    }
}

impl ConstraintsApi for MemoryTable {
    fn list<'a>(&'a self, _ctx: &'a RequestContext) -> LocalBoxFuture<'a, Result<ConstraintsData>> {
        async move {
            let failed = self.begin(Source::Constraints, "constraints.list");
            let snapshot = ConstraintsData::new(self.state.borrow().constraints.clone());
            self.settle(Source::Constraints, "constraints.list", failed).await?;
            Ok(snapshot)
        }
        .boxed_local()
    }

    fn delete<'a>(
        &'a self,
        _ctx: &'a RequestContext,
        constraint_id: ConstraintId,
    ) -> LocalBoxFuture<'a, Result<()>> {
        async move {
            let failed = self.begin(Source::Constraints, "constraints.delete");
            self.settle(Source::Constraints, "constraints.delete", failed).await?;
            self.state.borrow_mut().constraints.retain(|c| c.id != constraint_id);
            Ok(())
        }
        .boxed_local()
    }
}

impl RecordsApi for MemoryTable {
    fn list<'a>(
        &'a self,
        _ctx: &'a RequestContext,
        params: &'a RecordsRequestParams,
    ) -> LocalBoxFuture<'a, Result<TableRecordsData>> {
        async move {
            let failed = self.begin(Source::Records, "records.list");
            let snapshot = self.list_records(params);
            self.settle(Source::Records, "records.list", failed).await?;
            Ok(snapshot)
        }
        .boxed_local()
    }

    fn create<'a>(
        &'a self,
        _ctx: &'a RequestContext,
        cells: HashMap<ColumnId, CellValue>,
    ) -> LocalBoxFuture<'a, Result<Record>> {
        async move {
            let failed = self.begin(Source::Records, "records.create");
            self.settle(Source::Records, "records.create", failed).await?;
            let mut state = self.state.borrow_mut();
            let id = state.records.iter().map(|r| r.id.0).max().unwrap_or(0) + 1;
            let mut cells = cells;
            if let Some(pk) = state.columns.iter().find(|c| c.primary_key) {
                cells.insert(pk.id, CellValue::Int64(id));
            }
            let record = Record {
                id: RecordId(id),
                cells,
            };
            state.records.push(record.clone());
            Ok(record)
        }
        .boxed_local()
    }

    fn patch<'a>(
        &'a self,
        _ctx: &'a RequestContext,
        record_id: RecordId,
        column_id: ColumnId,
        value: CellValue,
    ) -> LocalBoxFuture<'a, Result<Record>> {
        async move {
            let failed = self.begin(Source::Records, "records.patch");
            self.settle(Source::Records, "records.patch", failed).await?;
            let mut state = self.state.borrow_mut();
            let record = state
                .records
                .iter_mut()
                .find(|r| r.id == record_id)
                .ok_or_else(|| GridError::RowNotFound(record_id.to_string()))?;
            record.cells.insert(column_id, value);
            Ok(record.clone())
        }
        .boxed_local()
    }

    fn delete<'a>(&'a self, _ctx: &'a RequestContext, record_ids: Vec<RecordId>) -> LocalBoxFuture<'a, Result<()>> {
        async move {
            let failed = self.begin(Source::Records, "records.delete");
            self.settle(Source::Records, "records.delete", failed).await?;
            self.state
                .borrow_mut()
                .records
                .retain(|r| !record_ids.contains(&r.id));
            Ok(())
        }
        .boxed_local()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{FilterCondition, FilterEntry, GroupEntry};
    use crate::records::FilterExpr;

    fn ctx() -> RequestContext {
        RequestContext::new(TableId(1), None)
    }

    #[tokio::test]
    async fn test_list_sorts_filters_and_paginates() {
        let table = MemoryTable::sample();
        let params = RecordsRequestParams {
            limit: 2,
            offset: 1,
            order_by: vec![(ColumnId(2), SortDirection::Ascending)],
            grouping: vec![],
            filter: Some(FilterExpr::Condition(FilterEntry::new(
                ColumnId(3),
                FilterCondition::Equal,
                10i64,
            ))),
        };

        let data = RecordsApi::list(&table, &ctx(), &params).await.unwrap();

        // Dune, Foundation, Hyperion -> skip one, take two
        assert_eq!(data.count, 3);
        let titles: Vec<&CellValue> = data.results.iter().map(|r| r.get(ColumnId(2))).collect();
        assert_eq!(titles, vec![&CellValue::from("Foundation"), &CellValue::from("Hyperion")]);
        assert!(data.groups.is_none());
    }

    #[tokio::test]
    async fn test_list_reports_groups() {
        let table = MemoryTable::sample();
        let params = RecordsRequestParams {
            limit: 10,
            offset: 0,
            order_by: vec![(ColumnId(3), SortDirection::Ascending)],
            grouping: vec![GroupEntry::new(ColumnId(3))],
            filter: None,
        };

        let data = RecordsApi::list(&table, &ctx(), &params).await.unwrap();
        let groups = data.groups.unwrap();

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].count, 3);
        assert_eq!(groups[0].result_indices, vec![0, 1, 2]);
        assert_eq!(groups[1].eq_value[&ColumnId(3)], CellValue::Int64(20));
    }

    #[tokio::test]
    async fn test_fail_next_applies_once() {
        let table = MemoryTable::sample();
        table.fail_next(Source::Constraints);

        assert!(ConstraintsApi::list(&table, &ctx()).await.is_err());
        assert_eq!(ConstraintsApi::list(&table, &ctx()).await.unwrap().len(), 2);
        assert_eq!(table.call_count("constraints.list"), 2);
    }

    #[tokio::test]
    async fn test_column_delete_cascades() {
        let table = MemoryTable::sample();
        ColumnsApi::delete(&table, &ctx(), ColumnId(3)).await.unwrap();

        let constraints = ConstraintsApi::list(&table, &ctx()).await.unwrap();
        assert!(constraints.for_column(ColumnId(3)).is_empty());
        let columns = ColumnsApi::list(&table, &ctx()).await.unwrap();
        assert_eq!(columns.len(), 3);
    }

    #[test]
    fn test_extract_columns_directly() {
        let table = MemoryTable::sample();
        let fk = table.extract_columns_directly(&[ColumnId(3), ColumnId(4)], "author_info", TableId(5));

        assert_eq!(fk, ColumnId(5));
        let state = table.state.borrow();
        let ids: Vec<ColumnId> = state.columns.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![ColumnId(1), ColumnId(2), ColumnId(5)]);
        assert!(state
            .constraints
            .iter()
            .any(|c| c.kind == ConstraintKind::ForeignKey && c.covers(fk)));
    }
}

/// Column registry ("ColumnsDataStore")
///
/// Owns the table's column list and its fetch status, and announces column
/// lifecycle changes through an `EventChannel<ColumnEvent>`.
///
/// Columns named by a contextual filter are fetched like any other but kept
/// out of `columns()`; they stay reachable through `all_columns()`.

use crate::api::{ColumnsApi, FetchStatus, RequestContext};
use crate::column::{Column, ColumnId, ColumnPatch, NewColumn};
use crate::error::{GridError, Result};
use crate::events::{ColumnEvent, EventChannel};
use crate::observable::{Observable, Subscription};
use log::{debug, warn};
use std::cell::Cell;
use std::collections::HashSet;
use std::rc::Rc;

pub struct ColumnsDataStore {
    ctx: RequestContext,
    api: Rc<dyn ColumnsApi>,
    hidden: HashSet<ColumnId>,
    fetched: Observable<Vec<Column>>,
    visible: Observable<Vec<Column>>,
    fetch_status: Observable<FetchStatus>,
    events: EventChannel<ColumnEvent>,
    /// Number of the newest fetch issued; older results are dropped
    latest_request: Cell<u64>,
    destroyed: Cell<bool>,
}

impl ColumnsDataStore {
    pub fn new(ctx: RequestContext, api: Rc<dyn ColumnsApi>, hidden: impl IntoIterator<Item = ColumnId>) -> Self {
        ColumnsDataStore {
            ctx,
            api,
            hidden: hidden.into_iter().collect(),
            fetched: Observable::new(Vec::new()),
            visible: Observable::new(Vec::new()),
            fetch_status: Observable::new(FetchStatus::Idle),
            events: EventChannel::new(),
            latest_request: Cell::new(0),
            destroyed: Cell::new(false),
        }
    }

    /// Visible columns ordered by position
    pub fn columns(&self) -> &Observable<Vec<Column>> {
        &self.visible
    }

    /// Every fetched column, hidden ones included
    pub fn all_columns(&self) -> Rc<Vec<Column>> {
        self.fetched.get()
    }

    pub fn fetch_status(&self) -> &Observable<FetchStatus> {
        &self.fetch_status
    }

    pub fn get(&self, column_id: ColumnId) -> Option<Column> {
        self.fetched.get().iter().find(|c| c.id == column_id).cloned()
    }

    pub fn is_hidden(&self, column_id: ColumnId) -> bool {
        self.hidden.contains(&column_id)
    }

    pub fn on<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ColumnEvent) + 'static,
    {
        self.events.subscribe(listener)
    }

    pub fn events(&self) -> &EventChannel<ColumnEvent> {
        &self.events
    }

    /// Load the column list. Returns the raw fetched list.
    pub async fn fetch(&self) -> Result<Rc<Vec<Column>>> {
        if self.destroyed.get() {
            return Err(GridError::Destroyed);
        }
        let request = self.latest_request.get() + 1;
        self.latest_request.set(request);
        self.fetch_status.set(FetchStatus::Processing);
        debug!("Fetching columns for table {} (request {})", self.ctx.table_id, request);

        let result = self.api.list(&self.ctx).await;

        if self.destroyed.get() || request != self.latest_request.get() {
            debug!("Discarding columns response {} for table {}", request, self.ctx.table_id);
            return result.map(Rc::new);
        }

        match result {
            Ok(mut columns) => {
                columns.sort_by_key(|c| c.index);
                let columns = Rc::new(columns);
                self.store(columns.clone());
                self.fetch_status.set(FetchStatus::Done);
                Ok(columns)
            }
            Err(e) => {
                warn!("Columns fetch failed for table {}: {}", self.ctx.table_id, e);
                self.fetch_status.set(FetchStatus::Error(e.status_message()));
                Err(e)
            }
        }
    }

    /// Create a column, reload the list, then announce it
    pub async fn add(&self, column: NewColumn) -> Result<Column> {
        self.ensure_live()?;
        let created = self.api.add(&self.ctx, column).await?;
        self.fetch().await?;
        if !self.destroyed.get() {
            self.events.emit(ColumnEvent::Added);
        }
        Ok(created)
    }

    pub async fn rename(&self, column_id: ColumnId, name: impl Into<String>) -> Result<Column> {
        self.persist_patch(column_id, ColumnPatch::rename(name)).await
    }

    /// Change a column's properties. A patch that only renames is announced
    /// as a rename.
    pub async fn patch(&self, column_id: ColumnId, patch: ColumnPatch) -> Result<Column> {
        self.persist_patch(column_id, patch).await
    }

    pub async fn delete(&self, column_id: ColumnId) -> Result<()> {
        self.ensure_live()?;
        self.require(column_id)?;
        self.api.delete(&self.ctx, column_id).await?;
        if self.destroyed.get() {
            return Ok(());
        }

        let remaining: Vec<Column> = self
            .fetched
            .get()
            .iter()
            .filter(|c| c.id != column_id)
            .cloned()
            .collect();
        self.store(Rc::new(remaining));
        debug!("Column {} deleted from table {}", column_id, self.ctx.table_id);
        self.events.emit(ColumnEvent::Deleted(column_id));
        Ok(())
    }

    /// Stop applying results and drop all listeners
    pub fn destroy(&self) {
        self.destroyed.set(true);
        self.events.clear();
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.get()
    }

    async fn persist_patch(&self, column_id: ColumnId, patch: ColumnPatch) -> Result<Column> {
        self.ensure_live()?;
        self.require(column_id)?;
        let event = if patch.is_rename_only() {
            ColumnEvent::Renamed
        } else {
            ColumnEvent::Patched
        };

        let updated = self.api.patch(&self.ctx, column_id, patch).await?;
        if self.destroyed.get() {
            return Ok(updated);
        }

        let columns: Vec<Column> = self
            .fetched
            .get()
            .iter()
            .map(|c| if c.id == column_id { updated.clone() } else { c.clone() })
            .collect();
        self.store(Rc::new(columns));
        self.events.emit(event);
        Ok(updated)
    }

    fn store(&self, columns: Rc<Vec<Column>>) {
        let visible: Vec<Column> = columns
            .iter()
            .filter(|c| !self.hidden.contains(&c.id))
            .cloned()
            .collect();
        self.fetched.replace(columns);
        self.visible.set(visible);
    }

    fn require(&self, column_id: ColumnId) -> Result<()> {
        if self.fetched.get().iter().any(|c| c.id == column_id) {
            Ok(())
        } else {
            Err(GridError::ColumnNotFound(column_id))
        }
    }

    fn ensure_live(&self) -> Result<()> {
        if self.destroyed.get() {
            Err(GridError::Destroyed)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::TableId;
    use crate::error::Source;
    use crate::memory::MemoryTable;
    use std::cell::RefCell;

    fn store_with(hidden: Vec<ColumnId>) -> (Rc<MemoryTable>, ColumnsDataStore) {
        let table = Rc::new(MemoryTable::sample());
        let store = ColumnsDataStore::new(RequestContext::new(TableId(1), None), table.clone(), hidden);
        (table, store)
    }

    #[tokio::test]
    async fn test_fetch_orders_and_hides_columns() {
        let (_table, store) = store_with(vec![ColumnId(3)]);
        let fetched = store.fetch().await.unwrap();

        assert_eq!(fetched.len(), 4);
        assert_eq!(*store.fetch_status().get(), FetchStatus::Done);
        let visible: Vec<ColumnId> = store.columns().get().iter().map(|c| c.id).collect();
        assert_eq!(visible, vec![ColumnId(1), ColumnId(2), ColumnId(4)]);
        assert!(store.get(ColumnId(3)).is_some());
    }

    #[tokio::test]
    async fn test_fetch_failure_sets_error_status() {
        let (table, store) = store_with(vec![]);
        table.fail_next(Source::Columns);

        assert!(store.fetch().await.is_err());
        assert!(matches!(*store.fetch_status().get(), FetchStatus::Error(_)));
        assert!(store.columns().get().is_empty());
    }

    #[tokio::test]
    async fn test_mutations_emit_events() {
        let (_table, store) = store_with(vec![]);
        store.fetch().await.unwrap();
        let events = Rc::new(RefCell::new(Vec::new()));
        let e = events.clone();
        let _sub = store.on(move |event| e.borrow_mut().push(*event));

        store.rename(ColumnId(2), "headline").await.unwrap();
        store.patch(ColumnId(2), ColumnPatch::retype("TEXT")).await.unwrap();
        store.add(NewColumn::new("notes", "TEXT")).await.unwrap();
        store.delete(ColumnId(4)).await.unwrap();

        assert_eq!(
            *events.borrow(),
            vec![
                ColumnEvent::Renamed,
                ColumnEvent::Patched,
                ColumnEvent::Added,
                ColumnEvent::Deleted(ColumnId(4)),
            ]
        );
        assert_eq!(store.get(ColumnId(2)).unwrap().name, "headline");
        assert!(store.get(ColumnId(4)).is_none());
    }

    #[tokio::test]
    async fn test_unknown_column_is_rejected_without_request() {
        let (table, store) = store_with(vec![]);
        store.fetch().await.unwrap();

        let err = store.delete(ColumnId(99)).await.unwrap_err();
        assert!(matches!(err, GridError::ColumnNotFound(ColumnId(99))));
        assert_eq!(table.call_count("columns.delete"), 0);
    }

    #[tokio::test]
    async fn test_result_after_destroy_is_dropped() {
        let (table, store) = store_with(vec![]);
        table.pause(Source::Columns);

        let fetch = store.fetch();
        let teardown = async {
            tokio::task::yield_now().await;
            store.destroy();
            table.resume(Source::Columns);
        };
        let (result, _) = tokio::join!(fetch, teardown);

        assert!(result.is_ok());
        assert!(store.columns().get().is_empty());
        assert_eq!(*store.fetch_status().get(), FetchStatus::Processing);
    }

    #[tokio::test]
    async fn test_stale_response_is_ignored() {
        let (table, store) = store_with(vec![]);
        table.pause(Source::Columns);

        // The first request snapshots the old name and is held back until the
        // second request has been issued.
        let first = store.fetch();
        let second = async {
            tokio::task::yield_now().await;
            table.rename_column_directly(ColumnId(1), "renamed_on_server");
            table.resume(Source::Columns);
            store.fetch().await
        };
        let (first, second) = tokio::join!(first, second);

        assert_eq!(first.unwrap()[0].name, "id");
        assert!(second.is_ok());
        assert_eq!(store.get(ColumnId(1)).unwrap().name, "renamed_on_server");
    }
}

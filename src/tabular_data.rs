/// TabularData - the grid orchestrator
///
/// One `TabularData` exists per table view. It builds and owns the column
/// registry, constraint registry, record store, display model and selection
/// model, wires them together, and keeps the view configuration consistent
/// with the table's shape:
///
/// - column deleted: sort/filter/group entries for the column are stripped
///   synchronously, then constraints are refetched
/// - column renamed: full refresh
/// - column added or patched: records are refetched
/// - any view configuration change: records are refetched
///
/// Refetches triggered by events are not awaited by whoever caused the event.
/// They are queued on a per-grid `RefreshQueue`, which coalesces pending work
/// and is drained one refresh at a time, either by `run_pending_refreshes` or
/// by a background driver started with `spawn_event_driver`.
///
/// The handle is cheap to clone and is meant to be passed down explicitly to
/// everything that renders or edits the grid.

use crate::abstract_types::AbstractTypeMap;
use crate::api::{Backends, FetchStatus, RequestContext, RequestStatus, ShareConsumer};
use crate::column::{Column, ColumnId, ColumnPatch, NewColumn, TableId};
use crate::columns_store::ColumnsDataStore;
use crate::config::GridConfig;
use crate::constraint::ConstraintsData;
use crate::constraints_store::ConstraintsDataStore;
use crate::display::Display;
use crate::error::{GridError, Result};
use crate::events::ColumnEvent;
use crate::meta::{GroupEntry, Meta, SortDirection};
use crate::observable::{derived2, derived3, Derived, Observable, Subscription};
use crate::processed_column::{build_processed_columns, ProcessedColumnIndex};
use crate::records::{ContextualFilters, RecordsData, TableRecordsData};
use crate::selection::{SelectionAccessors, TabularDataSelection};
use futures::future::join3;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Descriptive metadata of the table behind a grid
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableMetadata {
    pub name: String,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl TableMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        TableMetadata {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Construction parameters of a `TabularData`
pub struct TabularDataProps {
    pub id: TableId,
    pub abstract_types: Rc<AbstractTypeMap>,
    pub table: TableMetadata,
    /// Reuse an existing view configuration instead of creating one
    pub meta: Option<Meta>,
    pub share_consumer: Option<ShareConsumer>,
    pub contextual_filters: ContextualFilters,
    pub config: GridConfig,
    pub backends: Backends,
}

impl TabularDataProps {
    pub fn new(id: TableId, table: TableMetadata, backends: Backends) -> Self {
        TabularDataProps {
            id,
            abstract_types: Rc::new(AbstractTypeMap::postgres_defaults()),
            table,
            meta: None,
            share_consumer: None,
            contextual_filters: ContextualFilters::new(),
            config: GridConfig::default(),
            backends,
        }
    }

    pub fn with_abstract_types(mut self, abstract_types: Rc<AbstractTypeMap>) -> Self {
        self.abstract_types = abstract_types;
        self
    }

    pub fn with_meta(mut self, meta: Meta) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn with_share_consumer(mut self, share_consumer: ShareConsumer) -> Self {
        self.share_consumer = Some(share_consumer);
        self
    }

    pub fn with_contextual_filters(mut self, contextual_filters: ContextualFilters) -> Self {
        self.contextual_filters = contextual_filters;
        self
    }

    pub fn with_config(mut self, config: GridConfig) -> Self {
        self.config = config;
        self
    }
}

/// A unit of queued refetch work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshKind {
    Records,
    Constraints,
    /// Columns, records and constraints
    Full,
}

/// Pending refetch work of one grid.
///
/// A pending `Full` absorbs everything else; other kinds are queued at most
/// once each, in arrival order.
#[derive(Default)]
pub struct RefreshQueue {
    pending: RefCell<VecDeque<RefreshKind>>,
    draining: Cell<bool>,
    notify: Rc<Notify>,
}

impl RefreshQueue {
    pub fn push(&self, kind: RefreshKind) {
        {
            let mut pending = self.pending.borrow_mut();
            if pending.contains(&RefreshKind::Full) || pending.contains(&kind) {
                return;
            }
            if kind == RefreshKind::Full {
                pending.clear();
            }
            pending.push_back(kind);
        }
        self.notify.notify_one();
    }

    pub fn pop(&self) -> Option<RefreshKind> {
        self.pending.borrow_mut().pop_front()
    }

    pub fn clear(&self) {
        self.pending.borrow_mut().clear();
    }

    pub fn pending(&self) -> Vec<RefreshKind> {
        self.pending.borrow().iter().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.borrow().is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.borrow().len()
    }

    fn notifier(&self) -> Rc<Notify> {
        self.notify.clone()
    }
}

/// Resets the draining flag even if the drain is dropped midway
struct DrainGuard<'a>(&'a Cell<bool>);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Raw results of a full refresh
#[derive(Debug, Clone)]
pub struct RefreshResult {
    pub columns: Rc<Vec<Column>>,
    pub records: Rc<TableRecordsData>,
    pub constraints: Rc<ConstraintsData>,
}

struct Inner {
    id: TableId,
    table: TableMetadata,
    config: GridConfig,
    abstract_types: Rc<AbstractTypeMap>,
    share_consumer: Option<ShareConsumer>,
    meta: Meta,
    columns: Rc<ColumnsDataStore>,
    constraints: Rc<ConstraintsDataStore>,
    records: Rc<RecordsData>,
    processed: Derived<ProcessedColumnIndex>,
    is_loading: Derived<bool>,
    display: Display,
    selection: TabularDataSelection,
    queue: RefreshQueue,
    subscriptions: RefCell<Vec<Subscription>>,
    driver: RefCell<Option<JoinHandle<()>>>,
    destroyed: Cell<bool>,
}

/// Handle to a grid orchestrator
#[derive(Clone)]
pub struct TabularData {
    inner: Rc<Inner>,
}

impl TabularData {
    /// Build the grid. The initial load is queued, not started; drain the
    /// queue or start the event driver to run it.
    pub fn new(props: TabularDataProps) -> Self {
        let TabularDataProps {
            id,
            abstract_types,
            table,
            meta,
            share_consumer,
            contextual_filters,
            config,
            backends,
        } = props;

        let ctx = RequestContext::new(id, share_consumer.clone());
        let meta = meta.unwrap_or_else(|| Meta::new(config.page_size));

        let columns = Rc::new(ColumnsDataStore::new(
            ctx.clone(),
            backends.columns,
            contextual_filters.column_ids(),
        ));
        let constraints = Rc::new(ConstraintsDataStore::new(ctx.clone(), backends.constraints));
        let records = Rc::new(RecordsData::new(
            ctx,
            backends.records,
            meta.clone(),
            columns.clone(),
            contextual_filters,
        ));

        let processed = {
            let abstract_types = abstract_types.clone();
            let primary_key_display = config.primary_key_display;
            derived2(
                columns.columns(),
                constraints.constraints(),
                move |columns: &Vec<Column>, constraints: &ConstraintsData| {
                    build_processed_columns(id, columns, constraints, &abstract_types, primary_key_display)
                },
            )
        };

        let is_loading = derived3(
            columns.fetch_status(),
            constraints.state(),
            records.state(),
            |columns: &FetchStatus, constraints: &RequestStatus, records: &RequestStatus| {
                columns.is_processing() || constraints.is_loading() || records.is_loading()
            },
        );

        let display = Display::new(config.clone(), meta.clone(), records.clone(), processed.observable());
        let selection = Self::build_selection(processed.observable(), records.clone());

        let inner = Rc::new_cyclic(|weak: &Weak<Inner>| {
            let subscriptions = Self::wire(weak, &meta, &columns);
            Inner {
                id,
                table,
                config,
                abstract_types,
                share_consumer,
                meta,
                columns,
                constraints,
                records,
                processed,
                is_loading,
                display,
                selection,
                queue: RefreshQueue::default(),
                subscriptions: RefCell::new(subscriptions),
                driver: RefCell::new(None),
                destroyed: Cell::new(false),
            }
        });

        inner.queue.push(RefreshKind::Full);
        info!("Grid created for table {} ({})", id, inner.table.name);
        TabularData { inner }
    }

    fn build_selection(
        processed: Observable<ProcessedColumnIndex>,
        records: Rc<RecordsData>,
    ) -> TabularDataSelection {
        let order_source = processed.clone();
        let row_source = records.clone();
        TabularDataSelection::new(SelectionAccessors {
            get_columns: Box::new(move || processed.get()),
            get_column_order: Box::new(move || order_source.get().display_order().to_vec()),
            get_rows: Box::new(move || row_source.combined_rows()),
            get_max_selection_row_index: Box::new(move || records.selectable_row_count()),
        })
    }

    /// Subscribe to column lifecycle events and view configuration changes
    fn wire(weak: &Weak<Inner>, meta: &Meta, columns: &ColumnsDataStore) -> Vec<Subscription> {
        let mut subscriptions = Vec::new();

        let on_event = weak.clone();
        subscriptions.push(columns.on(move |event| {
            if let Some(inner) = on_event.upgrade() {
                inner.handle_column_event(event);
            }
        }));

        let enqueue_records = |weak: &Weak<Inner>| {
            let weak = weak.clone();
            move || {
                if let Some(inner) = weak.upgrade() {
                    if !inner.destroyed.get() {
                        inner.queue.push(RefreshKind::Records);
                    }
                }
            }
        };
        let sorting = enqueue_records(weak);
        subscriptions.push(meta.sorting().subscribe(move |_| sorting()));
        let filtering = enqueue_records(weak);
        subscriptions.push(meta.filtering().subscribe(move |_| filtering()));
        let grouping = enqueue_records(weak);
        subscriptions.push(meta.grouping().subscribe(move |_| grouping()));
        let pagination = enqueue_records(weak);
        subscriptions.push(meta.pagination().subscribe(move |_| pagination()));

        subscriptions
    }

    pub fn id(&self) -> TableId {
        self.inner.id
    }

    pub fn table(&self) -> &TableMetadata {
        &self.inner.table
    }

    pub fn config(&self) -> &GridConfig {
        &self.inner.config
    }

    pub fn abstract_types(&self) -> &Rc<AbstractTypeMap> {
        &self.inner.abstract_types
    }

    pub fn share_consumer(&self) -> Option<&ShareConsumer> {
        self.inner.share_consumer.as_ref()
    }

    pub fn meta(&self) -> &Meta {
        &self.inner.meta
    }

    pub fn columns_data(&self) -> &Rc<ColumnsDataStore> {
        &self.inner.columns
    }

    pub fn constraints_data(&self) -> &Rc<ConstraintsDataStore> {
        &self.inner.constraints
    }

    pub fn records_data(&self) -> &Rc<RecordsData> {
        &self.inner.records
    }

    pub fn display(&self) -> &Display {
        &self.inner.display
    }

    pub fn selection(&self) -> &TabularDataSelection {
        &self.inner.selection
    }

    /// Processed columns, rebuilt whenever columns or constraints change
    pub fn processed_columns(&self) -> Observable<ProcessedColumnIndex> {
        self.inner.processed.observable()
    }

    /// True while any of the three stores is fetching
    pub fn is_loading(&self) -> Observable<bool> {
        self.inner.is_loading.observable()
    }

    pub fn pending_refreshes(&self) -> Vec<RefreshKind> {
        self.inner.queue.pending()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }

    /// Fetch columns, records and constraints together. Resolves once all
    /// three have settled. If any failed, the failure that settled first is
    /// returned; the others still updated their own stores.
    pub async fn refresh(&self) -> Result<RefreshResult> {
        self.inner.queue.clear();
        self.inner.fetch_all().await
    }

    /// Reconcile the view configuration after `extracted` columns were moved
    /// into another table and replaced by `foreign_key`, then refresh.
    ///
    /// A sort or group on the extracted columns carries over to the foreign
    /// key column unless it already has one; filters on them are dropped.
    pub async fn refresh_after_column_extraction(
        &self,
        extracted: &[ColumnId],
        foreign_key: Option<ColumnId>,
    ) -> Result<RefreshResult> {
        let meta = &self.inner.meta;

        let sorting = meta.sorting().get();
        if extracted.iter().any(|id| sorting.has(*id)) {
            let next = match foreign_key {
                Some(fk) if !sorting.has(fk) => {
                    let direction = extracted
                        .iter()
                        .find_map(|id| sorting.get(*id))
                        .unwrap_or(SortDirection::Ascending);
                    sorting.replacing_columns(extracted, fk, direction)
                }
                _ => sorting.without_columns(extracted),
            };
            meta.sorting().set(next);
        }

        if extracted.iter().any(|id| meta.filtering().get().references(*id)) {
            meta.filtering().update(|f| f.without_columns(extracted));
        }

        let grouping = meta.grouping().get();
        if extracted.iter().any(|id| grouping.has_column(*id)) {
            let next = match foreign_key {
                Some(fk) if !grouping.has_column(fk) => {
                    grouping.replacing_columns(extracted, GroupEntry::new(fk))
                }
                _ => grouping.without_columns(extracted),
            };
            meta.grouping().set(next);
        }

        debug!(
            "View configuration reconciled after extracting {:?} into {:?}",
            extracted, foreign_key
        );
        self.refresh().await
    }

    /// Run queued refetches one at a time until the queue is empty.
    ///
    /// Returns how many ran. A failed refetch does not stop the drain; the
    /// first failure is returned at the end. If another drain is already
    /// running this returns `Ok(0)` at once and that drain picks up the work.
    pub async fn run_pending_refreshes(&self) -> Result<usize> {
        let inner = &self.inner;
        if inner.destroyed.get() {
            return Err(GridError::Destroyed);
        }
        if inner.queue.draining.replace(true) {
            return Ok(0);
        }
        let _guard = DrainGuard(&inner.queue.draining);

        let mut ran = 0;
        let mut first_error = None;
        while let Some(kind) = inner.queue.pop() {
            debug!("Running {:?} refresh for table {}", kind, inner.id);
            let result = match kind {
                RefreshKind::Records => inner.records.fetch().await.map(|_| ()),
                RefreshKind::Constraints => inner.constraints.fetch().await.map(|_| ()),
                RefreshKind::Full => inner.fetch_all().await.map(|_| ()),
            };
            ran += 1;
            if let Err(e) = result {
                warn!("{:?} refresh failed for table {}: {}", kind, inner.id, e);
                first_error.get_or_insert(e);
            }
            if inner.destroyed.get() {
                break;
            }
        }
        inner.selection.prune();

        match first_error {
            Some(e) => Err(e),
            None => Ok(ran),
        }
    }

    /// Drain the refresh queue in the background whenever work arrives.
    ///
    /// Must be called from within a `tokio::task::LocalSet`. Replaces a
    /// previously started driver. Stopped by `destroy`.
    pub fn spawn_event_driver(&self) {
        if self.inner.destroyed.get() {
            return;
        }
        let weak = Rc::downgrade(&self.inner);
        let notify = self.inner.queue.notifier();
        let handle = tokio::task::spawn_local(async move {
            loop {
                let Some(inner) = weak.upgrade() else { break };
                if inner.destroyed.get() {
                    break;
                }
                if inner.queue.is_empty() {
                    drop(inner);
                    notify.notified().await;
                    continue;
                }
                // Failures are logged by the drain and shown by the stores
                let _ = TabularData { inner }.run_pending_refreshes().await;
                tokio::task::yield_now().await;
            }
        });
        if let Some(previous) = self.inner.driver.borrow_mut().replace(handle) {
            previous.abort();
        }
    }

    pub async fn add_column(&self, column: NewColumn) -> Result<Column> {
        self.inner.columns.add(column).await
    }

    pub async fn rename_column(&self, column_id: ColumnId, name: impl Into<String>) -> Result<Column> {
        self.inner.columns.rename(column_id, name).await
    }

    pub async fn patch_column(&self, column_id: ColumnId, patch: ColumnPatch) -> Result<Column> {
        self.inner.columns.patch(column_id, patch).await
    }

    pub async fn delete_column(&self, column_id: ColumnId) -> Result<()> {
        self.inner.columns.delete(column_id).await
    }

    /// Tear the grid down: release subscriptions, stop the driver, then
    /// destroy the record store, constraint registry, column registry and
    /// selection, in that order. Later calls do nothing.
    pub fn destroy(&self) {
        let inner = &self.inner;
        if inner.destroyed.replace(true) {
            return;
        }
        for subscription in inner.subscriptions.borrow_mut().drain(..) {
            subscription.unsubscribe();
        }
        if let Some(driver) = inner.driver.borrow_mut().take() {
            driver.abort();
        }
        inner.queue.clear();
        inner.processed.dispose();
        inner.is_loading.dispose();

        inner.records.destroy();
        inner.constraints.destroy();
        inner.columns.destroy();
        inner.selection.destroy();
        debug!("Grid for table {} destroyed", inner.id);
    }
}

impl Inner {
    fn handle_column_event(&self, event: &ColumnEvent) {
        if self.destroyed.get() {
            return;
        }
        debug!("Table {} received {}", self.id, event.name());
        match event {
            ColumnEvent::Renamed => self.queue.push(RefreshKind::Full),
            ColumnEvent::Added | ColumnEvent::Patched => self.queue.push(RefreshKind::Records),
            ColumnEvent::Deleted(column_id) => {
                self.meta.remove_column_references(&[*column_id]);
                self.selection.prune();
                self.queue.push(RefreshKind::Constraints);
            }
        }
    }

    async fn fetch_all(&self) -> Result<RefreshResult> {
        let settled = Cell::new(0u32);
        let stamp = || {
            let n = settled.get();
            settled.set(n + 1);
            n
        };

        let (columns, records, constraints) = join3(
            async {
                let result = self.columns.fetch().await;
                (stamp(), result)
            },
            async {
                let result = self.records.fetch().await;
                (stamp(), result)
            },
            async {
                let result = self.constraints.fetch().await;
                (stamp(), result)
            },
        )
        .await;
        self.selection.prune();

        let mut failures = Vec::new();
        let columns = settle(columns, &mut failures);
        let records = settle(records, &mut failures);
        let constraints = settle(constraints, &mut failures);

        match (columns, records, constraints) {
            (Some(columns), Some(records), Some(constraints)) => Ok(RefreshResult {
                columns,
                records,
                constraints,
            }),
            _ => Err(failures
                .into_iter()
                .min_by_key(|(order, _)| *order)
                .map(|(_, e)| e)
                .unwrap_or(GridError::Destroyed)),
        }
    }
}

fn settle<T>((order, result): (u32, Result<T>), failures: &mut Vec<(u32, GridError)>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            failures.push((order, e));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Source;
    use crate::memory::MemoryTable;
    use crate::meta::{FilterCondition, FilterEntry, Filtering, Grouping, Sorting};

    fn grid_with(props: impl FnOnce(TabularDataProps) -> TabularDataProps) -> (Rc<MemoryTable>, TabularData) {
        let table = Rc::new(MemoryTable::sample());
        let base = TabularDataProps::new(TableId(1), TableMetadata::new("books"), Backends::shared(table.clone()));
        (table, TabularData::new(props(base)))
    }

    fn grid() -> (Rc<MemoryTable>, TabularData) {
        grid_with(|p| p)
    }

    #[test]
    fn test_refresh_queue_coalesces() {
        let queue = RefreshQueue::default();
        queue.push(RefreshKind::Records);
        queue.push(RefreshKind::Constraints);
        queue.push(RefreshKind::Records);
        assert_eq!(queue.pending(), vec![RefreshKind::Records, RefreshKind::Constraints]);

        queue.push(RefreshKind::Full);
        queue.push(RefreshKind::Records);
        assert_eq!(queue.pending(), vec![RefreshKind::Full]);
        assert_eq!(queue.pop(), Some(RefreshKind::Full));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_initial_load_is_queued() {
        let (table, grid) = grid();
        assert_eq!(grid.pending_refreshes(), vec![RefreshKind::Full]);
        assert_eq!(table.call_count("records.list"), 0);

        assert_eq!(grid.run_pending_refreshes().await.unwrap(), 1);
        assert_eq!(grid.processed_columns().get().len(), 4);
        assert_eq!(grid.records_data().saved_rows().get().len(), 5);
    }

    #[tokio::test]
    async fn test_column_delete_strips_view_configuration() {
        let (table, grid) = grid();
        grid.refresh().await.unwrap();
        let meta = grid.meta();
        meta.sorting().set(Sorting::new().with(ColumnId(4), SortDirection::Ascending));
        meta.filtering().set(Filtering::default().with_entry(FilterEntry::new(
            ColumnId(4),
            FilterCondition::Equal,
            true,
        )));
        meta.grouping().set(Grouping::new(vec![GroupEntry::new(ColumnId(4))]));
        grid.run_pending_refreshes().await.unwrap();

        grid.delete_column(ColumnId(4)).await.unwrap();

        // Stripped before any refetch has run
        assert!(!meta.references_column(ColumnId(4)));
        let pending = grid.pending_refreshes();
        assert!(pending.contains(&RefreshKind::Constraints));
        assert!(pending.contains(&RefreshKind::Records));

        let before = table.call_count("constraints.list");
        grid.run_pending_refreshes().await.unwrap();
        assert_eq!(table.call_count("constraints.list"), before + 1);
        assert!(!grid.processed_columns().get().contains(ColumnId(4)));
    }

    #[tokio::test]
    async fn test_lifecycle_events_queue_the_right_refetch() {
        let (_table, grid) = grid();
        grid.refresh().await.unwrap();

        grid.add_column(NewColumn::new("notes", "TEXT")).await.unwrap();
        assert_eq!(grid.pending_refreshes(), vec![RefreshKind::Records]);
        grid.run_pending_refreshes().await.unwrap();

        grid.patch_column(ColumnId(2), ColumnPatch::retype("TEXT")).await.unwrap();
        assert_eq!(grid.pending_refreshes(), vec![RefreshKind::Records]);
        grid.run_pending_refreshes().await.unwrap();

        grid.rename_column(ColumnId(2), "headline").await.unwrap();
        assert_eq!(grid.pending_refreshes(), vec![RefreshKind::Full]);
        grid.run_pending_refreshes().await.unwrap();
        assert_eq!(grid.processed_columns().get().get(ColumnId(2)).unwrap().name(), "headline");
    }

    #[tokio::test]
    async fn test_refresh_fails_but_siblings_settle() {
        let (table, grid) = grid();
        table.fail_next(Source::Records);

        let err = grid.refresh().await.unwrap_err();

        assert!(matches!(
            err,
            GridError::Fetch {
                source_name: Source::Records,
                ..
            }
        ));
        assert_eq!(*grid.columns_data().fetch_status().get(), FetchStatus::Done);
        assert_eq!(*grid.constraints_data().state().get(), RequestStatus::Done);
        assert!(grid.records_data().state().get().is_error());
        assert!(!*grid.is_loading().get());
    }

    #[tokio::test]
    async fn test_refresh_waits_for_slowest_fetch() {
        let (table, grid) = grid();
        table.pause(Source::Constraints);

        let refresh = grid.refresh();
        let observer = async {
            for _ in 0..3 {
                tokio::task::yield_now().await;
            }
            // Columns and records are done; constraints are still held back
            let loading = *grid.is_loading().get();
            let records_done = *grid.records_data().state().get() == RequestStatus::Done;
            table.resume(Source::Constraints);
            (loading, records_done)
        };
        let (result, (loading, records_done)) = tokio::join!(refresh, observer);

        assert!(loading);
        assert!(records_done);
        assert_eq!(result.unwrap().constraints.len(), 2);
        assert!(!*grid.is_loading().get());
    }

    /// Hold one source back during a refresh and report whether the grid
    /// looked loading and whether the other two stores had settled
    async fn observe_with_paused(source: Source) -> (bool, bool) {
        let (table, grid) = grid();
        table.pause(source);

        let refresh = grid.refresh();
        let observer = async {
            for _ in 0..3 {
                tokio::task::yield_now().await;
            }
            let loading = *grid.is_loading().get();
            let columns_done = *grid.columns_data().fetch_status().get() == FetchStatus::Done;
            let constraints_done = *grid.constraints_data().state().get() == RequestStatus::Done;
            let records_done = *grid.records_data().state().get() == RequestStatus::Done;
            let others_done = match source {
                Source::Columns => constraints_done && records_done,
                Source::Constraints => columns_done && records_done,
                Source::Records => columns_done && constraints_done,
            };
            table.resume(source);
            (loading, others_done)
        };
        let (result, observed) = tokio::join!(refresh, observer);

        assert!(result.is_ok());
        assert!(!*grid.is_loading().get());
        observed
    }

    #[tokio::test]
    async fn test_loading_while_only_columns_in_flight() {
        let (loading, others_done) = observe_with_paused(Source::Columns).await;
        assert!(loading);
        assert!(others_done);
    }

    #[tokio::test]
    async fn test_loading_while_only_records_in_flight() {
        let (loading, others_done) = observe_with_paused(Source::Records).await;
        assert!(loading);
        assert!(others_done);
    }

    #[tokio::test]
    async fn test_extraction_transfers_sort_to_foreign_key() {
        let (table, grid) = grid();
        grid.refresh().await.unwrap();
        grid.meta()
            .sorting()
            .set(Sorting::new().with(ColumnId(3), SortDirection::Descending).with(ColumnId(2), SortDirection::Ascending));

        let fk = table.extract_columns_directly(&[ColumnId(3), ColumnId(4)], "author_info", TableId(5));
        grid.refresh_after_column_extraction(&[ColumnId(3), ColumnId(4)], Some(fk))
            .await
            .unwrap();

        let sorting = grid.meta().sorting().get();
        assert_eq!(sorting.column_ids(), vec![fk, ColumnId(2)]);
        assert_eq!(sorting.get(fk), Some(SortDirection::Descending));
        assert!(!sorting.has(ColumnId(3)));
        assert!(grid.pending_refreshes().is_empty());
        assert!(grid.processed_columns().get().get(fk).unwrap().is_linked());
    }

    #[tokio::test]
    async fn test_extraction_prefers_first_sorted_column() {
        let (_table, grid) = grid();
        grid.meta().sorting().set(
            Sorting::new()
                .with(ColumnId(4), SortDirection::Ascending)
                .with(ColumnId(3), SortDirection::Descending),
        );

        grid.refresh_after_column_extraction(&[ColumnId(3), ColumnId(4)], Some(ColumnId(9)))
            .await
            .unwrap();

        assert_eq!(grid.meta().sorting().get().get(ColumnId(9)), Some(SortDirection::Descending));
    }

    #[tokio::test]
    async fn test_extraction_without_grouping_leaves_fk_ungrouped() {
        let (_table, grid) = grid();
        let meta = grid.meta();
        meta.grouping().set(Grouping::new(vec![GroupEntry::new(ColumnId(2))]));
        meta.filtering().set(Filtering::default().with_entry(FilterEntry::new(
            ColumnId(4),
            FilterCondition::Equal,
            true,
        )));

        grid.refresh_after_column_extraction(&[ColumnId(3), ColumnId(4)], Some(ColumnId(9)))
            .await
            .unwrap();

        let grouping = meta.grouping().get();
        assert!(!grouping.has_column(ColumnId(9)));
        assert_eq!(grouping.column_ids(), vec![ColumnId(2)]);
        assert!(meta.filtering().get().is_empty());
    }

    #[tokio::test]
    async fn test_extraction_replaces_grouping() {
        let (_table, grid) = grid();
        grid.meta()
            .grouping()
            .set(Grouping::new(vec![GroupEntry::new(ColumnId(3)), GroupEntry::new(ColumnId(4))]));

        grid.refresh_after_column_extraction(&[ColumnId(3), ColumnId(4)], Some(ColumnId(9)))
            .await
            .unwrap();

        assert_eq!(grid.meta().grouping().get().column_ids(), vec![ColumnId(9)]);
    }

    #[tokio::test]
    async fn test_extraction_drops_sort_when_fk_already_sorted() {
        let (_table, grid) = grid();
        grid.meta().sorting().set(
            Sorting::new()
                .with(ColumnId(9), SortDirection::Ascending)
                .with(ColumnId(3), SortDirection::Descending)
                .with(ColumnId(2), SortDirection::Ascending),
        );

        grid.refresh_after_column_extraction(&[ColumnId(3), ColumnId(4)], Some(ColumnId(9)))
            .await
            .unwrap();

        let sorting = grid.meta().sorting().get();
        assert_eq!(sorting.column_ids(), vec![ColumnId(9), ColumnId(2)]);
        assert_eq!(sorting.get(ColumnId(9)), Some(SortDirection::Ascending));
    }

    #[tokio::test]
    async fn test_extraction_drops_grouping_when_fk_already_grouped() {
        let (_table, grid) = grid();
        grid.meta().grouping().set(Grouping::new(vec![
            GroupEntry::new(ColumnId(9)),
            GroupEntry::new(ColumnId(3)),
        ]));

        grid.refresh_after_column_extraction(&[ColumnId(3), ColumnId(4)], Some(ColumnId(9)))
            .await
            .unwrap();

        assert_eq!(grid.meta().grouping().get().column_ids(), vec![ColumnId(9)]);
    }

    #[tokio::test]
    async fn test_extraction_without_foreign_key_drops_everything() {
        let (_table, grid) = grid();
        let meta = grid.meta();
        meta.sorting().set(
            Sorting::new()
                .with(ColumnId(3), SortDirection::Descending)
                .with(ColumnId(2), SortDirection::Ascending),
        );
        meta.grouping().set(Grouping::new(vec![GroupEntry::new(ColumnId(4))]));
        meta.filtering().set(Filtering::default().with_entry(FilterEntry::new(
            ColumnId(3),
            FilterCondition::Equal,
            10i64,
        )));

        grid.refresh_after_column_extraction(&[ColumnId(3), ColumnId(4)], None)
            .await
            .unwrap();

        assert_eq!(meta.sorting().get().column_ids(), vec![ColumnId(2)]);
        assert!(meta.grouping().get().is_empty());
        assert!(meta.filtering().get().is_empty());
        assert!(!meta.references_column(ColumnId(3)));
        assert!(!meta.references_column(ColumnId(4)));
    }

    #[tokio::test]
    async fn test_processed_columns_identity() {
        let (_table, grid) = grid();
        grid.refresh().await.unwrap();
        let processed = grid.processed_columns();
        let first = processed.get();

        grid.records_data().fetch().await.unwrap();
        assert!(Rc::ptr_eq(&first, &processed.get()));

        grid.constraints_data().fetch().await.unwrap();
        let second = processed.get();
        assert!(!Rc::ptr_eq(&first, &second));
        assert_eq!(*first, *second);

        grid.columns_data().fetch().await.unwrap();
        assert!(!Rc::ptr_eq(&second, &processed.get()));
    }

    #[tokio::test]
    async fn test_contextual_filter_columns_are_hidden() {
        let contextual = ContextualFilters::new().with(ColumnId(3), 10i64);
        let (_table, grid) = grid_with(|p| p.with_contextual_filters(contextual));
        grid.refresh().await.unwrap();

        assert!(!grid.processed_columns().get().contains(ColumnId(3)));
        assert_eq!(grid.records_data().saved_rows().get().len(), 3);
        assert_eq!(grid.display().visible_columns().len(), 3);
    }

    #[tokio::test]
    async fn test_selection_bounds_follow_grid() {
        let (_table, grid) = grid_with(|p| p.with_meta(Meta::new(3)));
        grid.refresh().await.unwrap();
        let selection = grid.selection();

        assert_eq!(selection.max_row_index(), 3);
        grid.records_data().add_new_row();
        assert_eq!(selection.max_row_index(), 4);

        selection.select_column(ColumnId(4)).unwrap();
        grid.delete_column(ColumnId(4)).await.unwrap();
        grid.columns_data().fetch().await.unwrap();
        assert!(selection.selected_cells().is_empty());
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent_and_ignores_late_results() {
        let (table, grid) = grid();
        table.pause(Source::Columns);

        let refresh = grid.refresh();
        let teardown = async {
            tokio::task::yield_now().await;
            grid.destroy();
            grid.destroy();
            table.resume(Source::Columns);
        };
        let (result, _) = tokio::join!(refresh, teardown);

        assert!(result.is_ok());
        assert!(grid.is_destroyed());
        assert!(grid.columns_data().columns().get().is_empty());
        assert!(matches!(grid.run_pending_refreshes().await, Err(GridError::Destroyed)));
    }

    #[tokio::test]
    async fn test_event_driver_drains_queue() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let (table, grid) = grid();
                grid.spawn_event_driver();

                for _ in 0..20 {
                    if !grid.columns_data().columns().get().is_empty() && grid.pending_refreshes().is_empty() {
                        break;
                    }
                    tokio::task::yield_now().await;
                }
                assert_eq!(grid.columns_data().columns().get().len(), 4);

                let before = table.call_count("records.list");
                grid.meta().set_sorting(Sorting::new().with(ColumnId(2), SortDirection::Ascending));
                for _ in 0..20 {
                    if table.call_count("records.list") > before && !*grid.is_loading().get() {
                        break;
                    }
                    tokio::task::yield_now().await;
                }
                assert_eq!(table.call_count("records.list"), before + 1);

                grid.destroy();
            })
            .await;
    }
}

/// Data-access boundary
///
/// The grid never talks to a server itself. Everything it loads or persists
/// goes through these three traits; an HTTP client, a test double, or the
/// in-memory `MemoryTable` can stand behind them.
///
/// All futures are `!Send`: the grid runs on a single logical thread and the
/// stores keep their state in `Rc`/`RefCell`.

use crate::column::{CellValue, Column, ColumnId, ColumnPatch, NewColumn, TableId};
use crate::constraint::{ConstraintId, ConstraintsData};
use crate::error::Result;
use crate::records::{Record, RecordId, RecordsRequestParams, TableRecordsData};
use futures::future::LocalBoxFuture;
use std::collections::HashMap;
use std::rc::Rc;

/// Fetch status of the column registry
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FetchStatus {
    #[default]
    Idle,
    Processing,
    Done,
    Error(String),
}

impl FetchStatus {
    pub fn is_processing(&self) -> bool {
        matches!(self, FetchStatus::Processing)
    }
}

/// Request state of the constraint registry and the record store
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RequestStatus {
    #[default]
    Idle,
    Loading,
    Done,
    Error(String),
}

impl RequestStatus {
    pub fn is_loading(&self) -> bool {
        matches!(self, RequestStatus::Loading)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RequestStatus::Error(_))
    }
}

/// Credential of a viewer reaching the table through a share link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareConsumer {
    pub slug: String,
}

impl ShareConsumer {
    pub fn new(slug: impl Into<String>) -> Self {
        ShareConsumer { slug: slug.into() }
    }
}

/// What every request carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub table_id: TableId,
    pub share_consumer: Option<ShareConsumer>,
}

impl RequestContext {
    pub fn new(table_id: TableId, share_consumer: Option<ShareConsumer>) -> Self {
        RequestContext {
            table_id,
            share_consumer,
        }
    }
}

pub trait ColumnsApi {
    fn list<'a>(&'a self, ctx: &'a RequestContext) -> LocalBoxFuture<'a, Result<Vec<Column>>>;

    fn add<'a>(&'a self, ctx: &'a RequestContext, column: NewColumn) -> LocalBoxFuture<'a, Result<Column>>;

    fn patch<'a>(
        &'a self,
        ctx: &'a RequestContext,
        column_id: ColumnId,
        patch: ColumnPatch,
    ) -> LocalBoxFuture<'a, Result<Column>>;

    fn delete<'a>(&'a self, ctx: &'a RequestContext, column_id: ColumnId) -> LocalBoxFuture<'a, Result<()>>;
}

pub trait ConstraintsApi {
    fn list<'a>(&'a self, ctx: &'a RequestContext) -> LocalBoxFuture<'a, Result<ConstraintsData>>;

    fn delete<'a>(
        &'a self,
        ctx: &'a RequestContext,
        constraint_id: ConstraintId,
    ) -> LocalBoxFuture<'a, Result<()>>;
}

pub trait RecordsApi {
    fn list<'a>(
        &'a self,
        ctx: &'a RequestContext,
        params: &'a RecordsRequestParams,
    ) -> LocalBoxFuture<'a, Result<TableRecordsData>>;

    fn create<'a>(
        &'a self,
        ctx: &'a RequestContext,
        cells: HashMap<ColumnId, CellValue>,
    ) -> LocalBoxFuture<'a, Result<Record>>;

    fn patch<'a>(
        &'a self,
        ctx: &'a RequestContext,
        record_id: RecordId,
        column_id: ColumnId,
        value: CellValue,
    ) -> LocalBoxFuture<'a, Result<Record>>;

    fn delete<'a>(&'a self, ctx: &'a RequestContext, record_ids: Vec<RecordId>) -> LocalBoxFuture<'a, Result<()>>;
}

/// The three collaborators a grid needs
#[derive(Clone)]
pub struct Backends {
    pub columns: Rc<dyn ColumnsApi>,
    pub constraints: Rc<dyn ConstraintsApi>,
    pub records: Rc<dyn RecordsApi>,
}

impl Backends {
    pub fn new(
        columns: Rc<dyn ColumnsApi>,
        constraints: Rc<dyn ConstraintsApi>,
        records: Rc<dyn RecordsApi>,
    ) -> Self {
        Backends {
            columns,
            constraints,
            records,
        }
    }

    /// Use one object for all three roles
    pub fn shared<T>(backend: Rc<T>) -> Self
    where
        T: ColumnsApi + ConstraintsApi + RecordsApi + 'static,
    {
        Backends {
            columns: backend.clone(),
            constraints: backend.clone(),
            records: backend,
        }
    }
}

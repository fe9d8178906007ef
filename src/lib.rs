/// LiveGrid - Reactive Orchestration for Live, Editable Table Grids
///
/// Presents a remote relational table as one consistent grid model: column
/// and constraint metadata, the current page of rows, the user's view
/// configuration (sort, filter, group, pagination) and the cell selection.
/// Each source is fetched and mutated independently; the orchestrator keeps
/// them consistent as columns come and go and refreshes overlap.
///
/// Everything runs on a single thread. Data access goes through the traits
/// in `api`, so any backend (or the in-memory `MemoryTable`) can sit behind
/// a grid.

pub mod error;
pub mod config;
pub mod observable;
pub mod events;
pub mod column;
pub mod constraint;
pub mod abstract_types;
pub mod meta;
pub mod api;
pub mod columns_store;
pub mod constraints_store;
pub mod records;
pub mod processed_column;
pub mod display;
pub mod selection;
pub mod tabular_data;
pub mod memory;

pub use error::{GridError, Result, Source};
pub use config::GridConfig;
pub use observable::{derived2, derived3, Derived, Observable, Subscription};
pub use events::{ColumnEvent, EventChannel};
pub use column::{CellValue, Column, ColumnId, ColumnPatch, NewColumn, TableId};
pub use constraint::{Constraint, ConstraintId, ConstraintKind, ConstraintsData};
pub use abstract_types::{AbstractType, AbstractTypeCategory, AbstractTypeMap};
pub use meta::{
    FilterCombination, FilterCondition, FilterEntry, Filtering, GroupEntry, Grouping, Meta, Pagination,
    SortDirection, Sorting,
};
pub use api::{
    Backends, ColumnsApi, ConstraintsApi, FetchStatus, RecordsApi, RequestContext, RequestStatus, ShareConsumer,
};
pub use columns_store::ColumnsDataStore;
pub use constraints_store::ConstraintsDataStore;
pub use records::{
    ContextualFilters, FilterExpr, NewRecord, Record, RecordGroup, RecordId, RecordRow, RecordsData,
    RecordsRequestParams, RowKey, TableRecordsData,
};
pub use processed_column::{
    build_processed_columns, process_column, CellKind, ColumnProcessorInput, PrimaryKeyDisplay, ProcessedColumn,
    ProcessedColumnIndex,
};
pub use display::{ColumnPlacement, Display, DisplayRow, MAX_COLUMN_WIDTH};
pub use selection::{max_selectable_row_index, CellCoord, Direction, SelectionAccessors, TabularDataSelection};
pub use tabular_data::{RefreshKind, RefreshQueue, RefreshResult, TableMetadata, TabularData, TabularDataProps};
pub use memory::MemoryTable;

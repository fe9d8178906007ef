/// View Configuration ("Meta")
///
/// User-controlled view state for one grid: sorting, filtering, grouping and
/// pagination. Each field is its own `Observable` and is only ever replaced
/// wholesale, so a reader never sees a half-updated structure even when the
/// user and a column-deletion handler edit the same field back to back.

use crate::column::{CellValue, ColumnId};
use crate::error::Result;
use crate::observable::Observable;
use serde::{Deserialize, Serialize};
use std::rc::Rc;

/// Sort direction for one column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SortDirection {
    /// Smallest first
    #[default]
    #[serde(rename = "asc")]
    Ascending,
    /// Largest first
    #[serde(rename = "desc")]
    Descending,
}

impl SortDirection {
    pub fn reversed(self) -> Self {
        match self {
            SortDirection::Ascending => SortDirection::Descending,
            SortDirection::Descending => SortDirection::Ascending,
        }
    }
}

/// Ordered mapping from column id to sort direction.
///
/// Order is significant: the first entry is the primary sort key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<(ColumnId, SortDirection)>", into = "Vec<(ColumnId, SortDirection)>")]
pub struct Sorting {
    entries: Vec<(ColumnId, SortDirection)>,
}

impl From<Vec<(ColumnId, SortDirection)>> for Sorting {
    fn from(entries: Vec<(ColumnId, SortDirection)>) -> Self {
        Sorting::from_entries(entries)
    }
}

impl From<Sorting> for Vec<(ColumnId, SortDirection)> {
    fn from(sorting: Sorting) -> Self {
        sorting.entries
    }
}

impl Sorting {
    pub fn new() -> Self {
        Sorting::default()
    }

    /// Build from entries; later duplicates replace earlier ones in place
    pub fn from_entries(entries: impl IntoIterator<Item = (ColumnId, SortDirection)>) -> Self {
        entries
            .into_iter()
            .fold(Sorting::new(), |sorting, (id, dir)| sorting.with(id, dir))
    }

    /// Returns a copy with `column_id` sorted by `direction`. An existing entry
    /// keeps its position; a new one is appended.
    pub fn with(&self, column_id: ColumnId, direction: SortDirection) -> Self {
        let mut entries = self.entries.clone();
        match entries.iter_mut().find(|(id, _)| *id == column_id) {
            Some(entry) => entry.1 = direction,
            None => entries.push((column_id, direction)),
        }
        Sorting { entries }
    }

    pub fn without(&self, column_id: ColumnId) -> Self {
        self.without_columns(&[column_id])
    }

    pub fn without_columns(&self, column_ids: &[ColumnId]) -> Self {
        Sorting {
            entries: self
                .entries
                .iter()
                .filter(|(id, _)| !column_ids.contains(id))
                .copied()
                .collect(),
        }
    }

    /// Replace every entry on `column_ids` with one entry on `column_id`,
    /// placed where the first of them was
    pub fn replacing_columns(&self, column_ids: &[ColumnId], column_id: ColumnId, direction: SortDirection) -> Self {
        let mut entries = Vec::with_capacity(self.entries.len());
        let mut placed = false;
        for (id, dir) in &self.entries {
            if *id == column_id {
                continue;
            }
            if column_ids.contains(id) {
                if !placed {
                    entries.push((column_id, direction));
                    placed = true;
                }
                continue;
            }
            entries.push((*id, *dir));
        }
        if !placed {
            entries.push((column_id, direction));
        }
        Sorting { entries }
    }

    pub fn get(&self, column_id: ColumnId) -> Option<SortDirection> {
        self.entries
            .iter()
            .find(|(id, _)| *id == column_id)
            .map(|(_, dir)| *dir)
    }

    pub fn has(&self, column_id: ColumnId) -> bool {
        self.get(column_id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(ColumnId, SortDirection)> {
        self.entries.iter()
    }

    pub fn column_ids(&self) -> Vec<ColumnId> {
        self.entries.iter().map(|(id, _)| *id).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// How filter entries are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterCombination {
    #[default]
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterCondition {
    Equal,
    NotEqual,
    Contains,
    GreaterThan,
    LessThan,
    IsNull,
    IsNotNull,
}

impl FilterCondition {
    /// Evaluate the condition against a cell
    pub fn matches(&self, cell: &CellValue, operand: &CellValue) -> bool {
        match self {
            FilterCondition::Equal => cell == operand,
            FilterCondition::NotEqual => cell != operand,
            FilterCondition::Contains => match (cell.as_string(), operand.as_string()) {
                (Some(haystack), Some(needle)) => {
                    haystack.to_lowercase().contains(&needle.to_lowercase())
                }
                _ => false,
            },
            FilterCondition::GreaterThan => match (cell.as_f64(), operand.as_f64()) {
                (Some(a), Some(b)) => a > b,
                _ => matches!((cell.as_string(), operand.as_string()), (Some(a), Some(b)) if a > b),
            },
            FilterCondition::LessThan => match (cell.as_f64(), operand.as_f64()) {
                (Some(a), Some(b)) => a < b,
                _ => matches!((cell.as_string(), operand.as_string()), (Some(a), Some(b)) if a < b),
            },
            FilterCondition::IsNull => cell.is_null(),
            FilterCondition::IsNotNull => !cell.is_null(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterEntry {
    pub column_id: ColumnId,
    pub condition: FilterCondition,
    #[serde(default)]
    pub value: CellValue,
}

impl FilterEntry {
    pub fn new(column_id: ColumnId, condition: FilterCondition, value: impl Into<CellValue>) -> Self {
        FilterEntry {
            column_id,
            condition,
            value: value.into(),
        }
    }
}

/// Predicate set keyed by column id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filtering {
    pub combination: FilterCombination,
    entries: Vec<FilterEntry>,
}

impl Filtering {
    pub fn new(combination: FilterCombination, entries: Vec<FilterEntry>) -> Self {
        Filtering { combination, entries }
    }

    pub fn with_entry(&self, entry: FilterEntry) -> Self {
        let mut entries = self.entries.clone();
        entries.push(entry);
        Filtering {
            combination: self.combination,
            entries,
        }
    }

    pub fn with_combination(&self, combination: FilterCombination) -> Self {
        Filtering {
            combination,
            entries: self.entries.clone(),
        }
    }

    pub fn without_columns(&self, column_ids: &[ColumnId]) -> Self {
        Filtering {
            combination: self.combination,
            entries: self
                .entries
                .iter()
                .filter(|e| !column_ids.contains(&e.column_id))
                .cloned()
                .collect(),
        }
    }

    pub fn references(&self, column_id: ColumnId) -> bool {
        self.entries.iter().any(|e| e.column_id == column_id)
    }

    pub fn entries(&self) -> &[FilterEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupEntry {
    pub column_id: ColumnId,
    /// Optional server-side preprocessing (e.g. truncate a timestamp to its month)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preproc: Option<String>,
}

impl GroupEntry {
    pub fn new(column_id: ColumnId) -> Self {
        GroupEntry {
            column_id,
            preproc: None,
        }
    }
}

/// Ordered set of grouping entries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<GroupEntry>", into = "Vec<GroupEntry>")]
pub struct Grouping {
    entries: Vec<GroupEntry>,
}

impl From<Vec<GroupEntry>> for Grouping {
    fn from(entries: Vec<GroupEntry>) -> Self {
        Grouping::new(entries)
    }
}

impl From<Grouping> for Vec<GroupEntry> {
    fn from(grouping: Grouping) -> Self {
        grouping.entries
    }
}

impl Grouping {
    pub fn new(entries: Vec<GroupEntry>) -> Self {
        let mut grouping = Grouping::default();
        for entry in entries {
            grouping = grouping.with_entry(entry);
        }
        grouping
    }

    /// Append an entry. A column is grouped at most once; re-adding replaces
    /// the existing entry in place.
    pub fn with_entry(&self, entry: GroupEntry) -> Self {
        let mut entries = self.entries.clone();
        match entries.iter_mut().find(|e| e.column_id == entry.column_id) {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
        Grouping { entries }
    }

    pub fn without_columns(&self, column_ids: &[ColumnId]) -> Self {
        Grouping {
            entries: self
                .entries
                .iter()
                .filter(|e| !column_ids.contains(&e.column_id))
                .cloned()
                .collect(),
        }
    }

    /// Replace every entry on `column_ids` with a single `replacement`,
    /// placed where the first of them was
    pub fn replacing_columns(&self, column_ids: &[ColumnId], replacement: GroupEntry) -> Self {
        let mut entries = Vec::with_capacity(self.entries.len());
        let mut placed = false;
        for entry in &self.entries {
            if entry.column_id == replacement.column_id {
                continue;
            }
            if column_ids.contains(&entry.column_id) {
                if !placed {
                    entries.push(replacement.clone());
                    placed = true;
                }
                continue;
            }
            entries.push(entry.clone());
        }
        if !placed {
            entries.push(replacement);
        }
        Grouping { entries }
    }

    pub fn has_column(&self, column_id: ColumnId) -> bool {
        self.entries.iter().any(|e| e.column_id == column_id)
    }

    pub fn entries(&self) -> &[GroupEntry] {
        &self.entries
    }

    pub fn column_ids(&self) -> Vec<ColumnId> {
        self.entries.iter().map(|e| e.column_id).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Offset + page size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub offset: usize,
    pub size: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Pagination::new(crate::config::DEFAULT_PAGE_SIZE)
    }
}

impl Pagination {
    pub fn new(size: usize) -> Self {
        Pagination { offset: 0, size }
    }

    /// 1-based page number containing `offset`
    pub fn page(&self) -> usize {
        if self.size == 0 {
            1
        } else {
            self.offset / self.size + 1
        }
    }

    /// Jump to a 1-based page
    pub fn with_page(&self, page: usize) -> Self {
        Pagination {
            offset: page.saturating_sub(1) * self.size,
            size: self.size,
        }
    }

    /// Change the page size, keeping the first visible row on screen
    pub fn for_size(&self, size: usize) -> Self {
        let offset = if size == 0 { 0 } else { (self.offset / size) * size };
        Pagination { offset, size }
    }

    /// Number of pages needed for `total` rows
    pub fn page_count(&self, total: usize) -> usize {
        if self.size == 0 {
            return 0;
        }
        total.div_ceil(self.size)
    }

    pub fn first_page(&self) -> Self {
        Pagination::new(self.size)
    }
}

/// Immutable snapshot of all four fields
#[derive(Debug, Clone, PartialEq)]
pub struct ViewSnapshot {
    pub sorting: Rc<Sorting>,
    pub filtering: Rc<Filtering>,
    pub grouping: Rc<Grouping>,
    pub pagination: Rc<Pagination>,
}

#[derive(Serialize, Deserialize)]
struct SerializedMeta {
    #[serde(default)]
    sorting: Sorting,
    #[serde(default)]
    filtering: Filtering,
    #[serde(default)]
    grouping: Grouping,
    pagination: Pagination,
}

/// The view configuration of one grid
///
/// # Examples
///
/// ```
/// use livegrid::{ColumnId, Meta, SortDirection};
///
/// let meta = Meta::new(50);
/// meta.set_sorting(meta.sorting().get().with(ColumnId(5), SortDirection::Ascending));
/// meta.remove_column_references(&[ColumnId(5)]);
///
/// assert!(meta.sorting().get().is_empty());
///
/// let saved = meta.serialize().unwrap();
/// let restored = Meta::deserialize(&saved).unwrap();
/// assert_eq!(restored.pagination().get().size, 50);
/// ```
#[derive(Debug, Clone)]
pub struct Meta {
    sorting: Observable<Sorting>,
    filtering: Observable<Filtering>,
    grouping: Observable<Grouping>,
    pagination: Observable<Pagination>,
}

impl Default for Meta {
    fn default() -> Self {
        Meta::new(crate::config::DEFAULT_PAGE_SIZE)
    }
}

impl Meta {
    pub fn new(page_size: usize) -> Self {
        Meta {
            sorting: Observable::new(Sorting::new()),
            filtering: Observable::new(Filtering::default()),
            grouping: Observable::new(Grouping::default()),
            pagination: Observable::new(Pagination::new(page_size)),
        }
    }

    pub fn sorting(&self) -> &Observable<Sorting> {
        &self.sorting
    }

    pub fn filtering(&self) -> &Observable<Filtering> {
        &self.filtering
    }

    pub fn grouping(&self) -> &Observable<Grouping> {
        &self.grouping
    }

    pub fn pagination(&self) -> &Observable<Pagination> {
        &self.pagination
    }

    /// User edit of the sort order. Returns to the first page.
    pub fn set_sorting(&self, sorting: Sorting) {
        self.sorting.set(sorting);
        self.reset_page();
    }

    /// User edit of the filters. Returns to the first page.
    pub fn set_filtering(&self, filtering: Filtering) {
        self.filtering.set(filtering);
        self.reset_page();
    }

    /// User edit of the grouping. Returns to the first page.
    pub fn set_grouping(&self, grouping: Grouping) {
        self.grouping.set(grouping);
        self.reset_page();
    }

    pub fn set_pagination(&self, pagination: Pagination) {
        self.pagination.set(pagination);
    }

    fn reset_page(&self) {
        let current = *self.pagination.get();
        if current.offset != 0 {
            self.pagination.set(current.first_page());
        }
    }

    /// Strip every sort, group and filter entry that references one of
    /// `column_ids`. Fields without such references are left untouched.
    pub fn remove_column_references(&self, column_ids: &[ColumnId]) {
        if column_ids.iter().any(|id| self.sorting.get().has(*id)) {
            self.sorting.update(|s| s.without_columns(column_ids));
        }
        if column_ids.iter().any(|id| self.grouping.get().has_column(*id)) {
            self.grouping.update(|g| g.without_columns(column_ids));
        }
        if column_ids.iter().any(|id| self.filtering.get().references(*id)) {
            self.filtering.update(|f| f.without_columns(column_ids));
        }
    }

    /// True if any field mentions `column_id`
    pub fn references_column(&self, column_id: ColumnId) -> bool {
        self.sorting.get().has(column_id)
            || self.grouping.get().has_column(column_id)
            || self.filtering.get().references(column_id)
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        ViewSnapshot {
            sorting: self.sorting.get(),
            filtering: self.filtering.get(),
            grouping: self.grouping.get(),
            pagination: self.pagination.get(),
        }
    }

    /// Encode the view state as a compact JSON string
    pub fn serialize(&self) -> Result<String> {
        let serialized = SerializedMeta {
            sorting: (*self.sorting.get()).clone(),
            filtering: (*self.filtering.get()).clone(),
            grouping: (*self.grouping.get()).clone(),
            pagination: *self.pagination.get(),
        };
        Ok(serde_json::to_string(&serialized)?)
    }

    /// Build a fresh `Meta` from a string produced by `serialize`
    pub fn deserialize(encoded: &str) -> Result<Meta> {
        let decoded: SerializedMeta = serde_json::from_str(encoded)?;
        Ok(Meta {
            sorting: Observable::new(decoded.sorting),
            filtering: Observable::new(decoded.filtering),
            grouping: Observable::new(decoded.grouping),
            pagination: Observable::new(decoded.pagination),
        })
    }
}

/// Basic Grid Example
///
/// This example demonstrates:
/// - Building a grid over a backend
/// - Loading columns, constraints and records in one refresh
/// - Paging, filtering and selecting cells

use livegrid::{
    Backends, CellCoord, ColumnId, FilterCondition, FilterEntry, Filtering, MemoryTable, Meta, TableId,
    TableMetadata, TabularData, TabularDataProps,
};
use std::rc::Rc;

#[tokio::main(flavor = "current_thread")]
async fn main() -> livegrid::Result<()> {
    println!("=== LiveGrid Basic Grid Example ===\n");

    // 1. Build the grid
    println!("1. Creating grid...");
    let table = Rc::new(MemoryTable::sample());
    let grid = TabularData::new(
        TabularDataProps::new(TableId(1), TableMetadata::new("books"), Backends::shared(table.clone()))
            .with_meta(Meta::new(2)),
    );
    println!("   Pending work: {:?}\n", grid.pending_refreshes());

    // 2. Load everything
    println!("2. Refreshing...");
    let loaded = grid.refresh().await?;
    println!(
        "   {} columns, {} constraints, {} of {} records\n",
        loaded.columns.len(),
        loaded.constraints.len(),
        loaded.records.results.len(),
        loaded.records.count
    );

    // 3. Processed columns
    println!("3. Processed columns:");
    for column in grid.processed_columns().get().ordered() {
        println!(
            "   {:<10} {:?} editable={} pk={}",
            column.name(),
            column.cell_kind,
            column.is_editable,
            column.is_primary_key
        );
    }
    println!();

    // 4. Next page
    println!("4. Moving to page 2...");
    let page = grid.meta().pagination().get().with_page(2);
    grid.meta().set_pagination(page);
    grid.run_pending_refreshes().await?;
    let ids: Vec<_> = grid.records_data().saved_rows().get().iter().map(|r| r.id).collect();
    println!("   Rows on page: {:?}\n", ids);

    // 5. Filter
    println!("5. Filtering on author = 10...");
    grid.meta().set_filtering(Filtering::default().with_entry(FilterEntry::new(
        ColumnId(3),
        FilterCondition::Equal,
        10i64,
    )));
    grid.run_pending_refreshes().await?;
    println!(
        "   {} matching rows, back on page {}\n",
        grid.records_data().total_count().get(),
        grid.meta().pagination().get().page()
    );

    // 6. Select
    println!("6. Selecting a range...");
    let selection = grid.selection();
    selection.select_cell(0, ColumnId(2))?;
    selection.extend_selection(1, ColumnId(3))?;
    println!("   Selected: {:?}", selection.selected_cells());
    println!(
        "   (1, title) selected: {}",
        selection.is_cell_selected(CellCoord::new(1, ColumnId(2)))
    );
    match selection.select_cell(5, ColumnId(2)) {
        Ok(()) => println!("   unexpected: row 5 is selectable"),
        Err(e) => println!("   Row 5 rejected: {}\n", e),
    }

    grid.destroy();
    println!("=== Example Complete ===");
    Ok(())
}

/// Column Extraction Example
///
/// This example demonstrates:
/// - Sorting and grouping on columns that are about to move to another table
/// - Reconciling the view configuration after the extraction
/// - How column deletion strips view configuration automatically

use livegrid::{
    Backends, ColumnId, GroupEntry, Grouping, MemoryTable, SortDirection, Sorting, TableId, TableMetadata,
    TabularData, TabularDataProps,
};
use std::rc::Rc;

#[tokio::main(flavor = "current_thread")]
async fn main() -> livegrid::Result<()> {
    println!("=== LiveGrid Column Extraction Example ===\n");

    let table = Rc::new(MemoryTable::sample());
    let grid = TabularData::new(TabularDataProps::new(
        TableId(1),
        TableMetadata::new("books"),
        Backends::shared(table.clone()),
    ));
    grid.refresh().await?;

    // 1. Configure the view
    println!("1. Sorting by published (desc), grouping by author...");
    grid.meta()
        .set_sorting(Sorting::new().with(ColumnId(4), SortDirection::Descending));
    grid.meta()
        .set_grouping(Grouping::new(vec![GroupEntry::new(ColumnId(3))]));
    grid.run_pending_refreshes().await?;
    println!("   Sorting:  {:?}", grid.meta().sorting().get());
    println!("   Grouping: {:?}\n", grid.meta().grouping().get());

    // 2. Extract author and published into a new table
    println!("2. Extracting author + published into table 5...");
    let extracted = [ColumnId(3), ColumnId(4)];
    let fk = table.extract_columns_directly(&extracted, "author_info", TableId(5));
    let result = grid.refresh_after_column_extraction(&extracted, Some(fk)).await?;
    println!("   Columns now: {:?}", result.columns.iter().map(|c| &c.name).collect::<Vec<_>>());
    println!("   Sorting:  {:?}", grid.meta().sorting().get());
    println!("   Grouping: {:?}\n", grid.meta().grouping().get());

    // 3. Deleting the link column clears what pointed at it
    println!("3. Deleting the link column...");
    grid.delete_column(fk).await?;
    println!("   References left: {}", grid.meta().references_column(fk));
    println!("   Pending: {:?}", grid.pending_refreshes());
    grid.run_pending_refreshes().await?;

    grid.destroy();
    println!("\n=== Example Complete ===");
    Ok(())
}

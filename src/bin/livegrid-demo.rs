/// LiveGrid Demo
///
/// Builds a grid over the in-memory books table, drives it through a few
/// edits with the background event driver running, and prints what a
/// rendering layer would see after each step.

use livegrid::{
    Backends, CellValue, ColumnId, ColumnPatch, DisplayRow, GridConfig, MemoryTable, SortDirection, Sorting, TableId,
    TableMetadata, TabularData, TabularDataProps,
};
use log::info;
use std::rc::Rc;
use tokio::task::LocalSet;

fn print_grid(grid: &TabularData) {
    let processed = grid.processed_columns().get();
    let names: Vec<&str> = processed.ordered().map(|c| c.name()).collect();
    println!("   columns: {}", names.join(" | "));

    let rows = grid.records_data().combined_rows();
    for row in grid.display().displayable_rows() {
        match row {
            DisplayRow::GroupHeader { eq_value, count, .. } => println!("   -- group {:?} ({} rows)", eq_value, count),
            DisplayRow::Record { index, is_new, .. } => {
                let cells: Vec<String> = processed
                    .display_order()
                    .iter()
                    .map(|id| match rows.get(index).and_then(|r| r.cells().get(id)) {
                        Some(CellValue::String(s)) => s.clone(),
                        Some(CellValue::Null) | None => "-".to_string(),
                        Some(other) => other.to_json().to_string(),
                    })
                    .collect();
                println!("   {}{}", if is_new { "* " } else { "  " }, cells.join(" | "));
            }
            DisplayRow::HelpText => println!("   (unsaved rows are marked with *)"),
        }
    }
    println!();
}

async fn settle(grid: &TabularData) {
    for _ in 0..50 {
        if grid.pending_refreshes().is_empty() && !*grid.is_loading().get() {
            break;
        }
        tokio::task::yield_now().await;
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> livegrid::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = GridConfig::from_env()?;
    info!("Page size {}, primary keys shown {:?}", config.page_size, config.primary_key_display);

    let table = Rc::new(MemoryTable::sample());
    let grid = TabularData::new(
        TabularDataProps::new(TableId(1), TableMetadata::new("books"), Backends::shared(table)).with_config(config),
    );

    LocalSet::new()
        .run_until(async {
            grid.spawn_event_driver();
            settle(&grid).await;
            println!("1. Initial load");
            print_grid(&grid);

            println!("2. Sort by title");
            grid.meta()
                .set_sorting(Sorting::new().with(ColumnId(2), SortDirection::Ascending));
            settle(&grid).await;
            print_grid(&grid);

            println!("3. Add a row");
            let key = grid.records_data().add_new_row();
            grid.records_data()
                .update_cell(key, ColumnId(2), CellValue::from("Ubik"))
                .await?;
            print_grid(&grid);

            println!("4. Rename and retype columns");
            grid.rename_column(ColumnId(4), "in_print").await?;
            grid.patch_column(ColumnId(3), ColumnPatch::retype("BIGINT")).await?;
            settle(&grid).await;
            print_grid(&grid);

            println!("5. Delete the sorted column");
            grid.delete_column(ColumnId(2)).await?;
            settle(&grid).await;
            println!("   sorting now: {:?}", grid.meta().sorting().get());
            print_grid(&grid);

            grid.destroy();
            Ok::<(), livegrid::GridError>(())
        })
        .await
}

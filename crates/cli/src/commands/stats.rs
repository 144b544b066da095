use std::process::ExitCode;

use anyhow::Result;
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use photomanager_core::PhotoManager;

use crate::StatsCmd;

pub fn run(cmd: StatsCmd) -> Result<ExitCode> {
    crate::logging::init(false)?;

    let manager = PhotoManager::open(&cmd.db)?;
    let catalog = manager.catalog();
    let stats = manager.stats();

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![Cell::new("Catalog"), Cell::new(cmd.db.display())]);
    table.add_row(vec![Cell::new("Hash algorithm"), Cell::new(catalog.hash_algorithm())]);
    table.add_row(vec![
        Cell::new("Timezone default"),
        Cell::new(catalog.timezone_default()),
    ]);
    table.add_row(vec![Cell::new("Unique items"), Cell::new(stats.num_uids)]);
    table.add_row(vec![Cell::new("Total items"), Cell::new(stats.num_photos)]);
    table.add_row(vec![Cell::new("Stored items"), Cell::new(stats.num_stored)]);
    table.add_row(vec![
        Cell::new("Stored size"),
        Cell::new(super::format_size(stats.total_stored_bytes)),
    ]);
    println!("{table}");

    Ok(ExitCode::SUCCESS)
}

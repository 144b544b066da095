use std::process::ExitCode;

use anyhow::Result;
use photomanager_core::collector::CollectOptions;
use photomanager_core::PhotoManager;

use crate::ImportCmd;

/// `import` = index then collect, saving the catalog once at the end.
/// With `--skip-existing`, collection is restricted to the uids the index
/// pass touched.
pub fn run(cmd: ImportCmd) -> Result<ExitCode> {
    crate::logging::init(cmd.index.debug)?;

    let mut manager = PhotoManager::open_or_new(&cmd.index.db)?;
    let report = super::index::run_index(&mut manager, &cmd.index)?;

    let options = CollectOptions {
        dry_run: cmd.index.dry_run,
        filter_uids: cmd
            .index
            .skip_existing
            .then(|| report.changed_uids.clone()),
    };
    let collect_report = super::collect::run_collect(&mut manager, &cmd.destination, &options)?;

    if !cmd.index.dry_run {
        manager.save(&crate::history_argv())?;
        if cmd.collect_db {
            manager.collect_db_copy(&cmd.destination)?;
        }
    }
    let failed = report.num_errors > 0
        || report.num_damaged > 0
        || collect_report.num_missed > 0
        || collect_report.num_errors > 0;
    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

use std::process::ExitCode;

use anyhow::Result;
use photomanager_core::cleaner::{CleanOptions, CleanProgress};
use photomanager_core::PhotoManager;

use crate::CleanCmd;

pub fn run(cmd: CleanCmd) -> Result<ExitCode> {
    crate::logging::init(cmd.debug)?;

    let mut manager = PhotoManager::open(&cmd.db)?;
    let options = CleanOptions {
        subdir: cmd.subdir,
        dry_run: cmd.dry_run,
    };

    let pb = super::progress_bar();
    let report = manager.clean(
        &cmd.destination,
        &options,
        Some(&mut |progress| match progress {
            CleanProgress::Start { total } => {
                pb.set_length(total as u64);
                pb.set_message("Cleaning...");
            }
            CleanProgress::Removed { path } => {
                pb.inc(1);
                pb.set_message(format!("removed {}", path.display()));
            }
            CleanProgress::Delisted { .. } => {
                pb.inc(1);
            }
        }),
    )?;
    pb.finish_with_message(format!(
        "{} removed, {} de-listed",
        report.num_removed, report.num_delisted
    ));

    println!(
        "{} {} items ({}) and de-listed {}; {} missing, {} unverified",
        if cmd.dry_run { "Would remove" } else { "Removed" },
        report.num_removed,
        super::format_size(report.removed_bytes),
        report.num_delisted,
        report.num_missing,
        report.num_unverified,
    );
    for uid in &report.unverified {
        println!("  not cleaned (stored copy failed verification): {uid}");
    }

    if !cmd.dry_run {
        manager.save(&crate::history_argv())?;
    }
    Ok(if report.num_missing > 0 || report.num_unverified > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

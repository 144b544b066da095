use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use photomanager_core::collector::{CollectOptions, CollectProgress, CollectReport};
use photomanager_core::PhotoManager;

use crate::CollectCmd;

pub(crate) fn run_collect(
    manager: &mut PhotoManager,
    destination: &Path,
    options: &CollectOptions,
) -> Result<CollectReport> {
    let pb = super::progress_bar();
    let report = manager.collect(
        destination,
        options,
        Some(&mut |progress| match progress {
            CollectProgress::Start { total } => {
                pb.set_length(total as u64);
                pb.set_message("Collecting...");
            }
            CollectProgress::Copied { target, .. } => {
                pb.inc(1);
                pb.set_message(format!("-> {}", target.display()));
            }
            CollectProgress::AlreadyStored { .. } => {
                pb.inc(1);
            }
            CollectProgress::Uncollected { uid } => {
                pb.inc(1);
                pb.set_message(format!("uncollected: {uid}"));
            }
            CollectProgress::Complete { copied, stored } => {
                pb.finish_with_message(format!("{copied} copied, {stored} already stored"));
            }
        }),
    )?;

    println!(
        "Collected {} new and restored {} items ({}); {} already stored, {} missed",
        report.num_added,
        report.num_restored,
        super::format_size(report.copied_bytes),
        report.num_stored,
        report.num_missed,
    );
    for uid in &report.uncollected {
        println!("  uncollected: {uid}");
    }
    Ok(report)
}

pub fn run(cmd: CollectCmd) -> Result<ExitCode> {
    crate::logging::init(cmd.debug)?;

    let mut manager = PhotoManager::open(&cmd.db)?;
    let options = CollectOptions {
        dry_run: cmd.dry_run,
        ..Default::default()
    };
    let report = run_collect(&mut manager, &cmd.destination, &options)?;

    if !cmd.dry_run {
        manager.save(&crate::history_argv())?;
        if cmd.collect_db {
            manager.collect_db_copy(&cmd.destination)?;
        }
    }
    Ok(if report.num_missed > 0 || report.num_errors > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

use std::process::ExitCode;

use anyhow::Result;
use photomanager_core::exiftool::ExifTool;
use photomanager_core::indexer::{IndexOptions, IndexProgress, IndexReport};
use photomanager_core::PhotoManager;

use crate::IndexCmd;

/// Build [`IndexOptions`] from the flag surface shared by `index` and
/// `import`.
pub(crate) fn options_from(cmd: &IndexCmd) -> Result<IndexOptions> {
    let mut paths = cmd.paths.clone();
    if let Some(source) = &cmd.source {
        paths.push(source.clone());
    }
    if let Some(file) = &cmd.file {
        paths.push(file.clone());
    }
    if paths.is_empty() {
        anyhow::bail!("nothing to index: pass --source, --file, or paths");
    }
    Ok(IndexOptions {
        paths,
        exclude: cmd.exclude.clone(),
        priority: Some(cmd.priority),
        timezone_default: cmd.timezone_default.clone(),
        storage: cmd.storage_type,
        skip_existing: cmd.skip_existing,
    })
}

pub(crate) fn run_index(manager: &mut PhotoManager, cmd: &IndexCmd) -> Result<IndexReport> {
    let options = options_from(cmd)?;

    let pb = super::progress_bar();
    let report = manager.index(
        &options,
        &ExifTool::default(),
        None,
        Some(&mut |progress| match progress {
            IndexProgress::Discovered { count } => {
                pb.set_length(count as u64);
                pb.set_message("Fingerprinting...");
            }
            IndexProgress::Fingerprinting { count } => {
                pb.set_length(count as u64);
            }
            IndexProgress::Indexed { path } => {
                pb.inc(1);
                pb.set_message(
                    path.file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default(),
                );
            }
        }),
    )?;
    pb.finish_with_message(format!(
        "{} added, {} merged, {} duplicates",
        report.num_added, report.num_merged, report.num_skipped
    ));

    if cmd.dump {
        dump_records(&report);
    }
    Ok(report)
}

fn dump_records(report: &IndexReport) {
    let records: Vec<serde_json::Value> = report
        .records
        .iter()
        .map(|r| {
            serde_json::json!({
                "path": r.path,
                "outcome": r.outcome.map(|o| format!("{o:?}").to_uppercase()),
                "uid": r.uid,
                "error": r.error,
            })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&records).unwrap_or_default());
}

pub fn run(cmd: IndexCmd) -> Result<ExitCode> {
    crate::logging::init(cmd.debug)?;

    let mut manager = PhotoManager::open_or_new(&cmd.db)?;
    let report = run_index(&mut manager, &cmd)?;

    if !cmd.dry_run {
        manager.save(&crate::history_argv())?;
    }
    Ok(if report.num_errors > 0 || report.num_damaged > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

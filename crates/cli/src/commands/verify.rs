use std::process::ExitCode;

use anyhow::Result;
use photomanager_core::verifier::{VerifyOptions, VerifyProgress};
use photomanager_core::PhotoManager;

use crate::VerifyCmd;

pub fn run(cmd: VerifyCmd) -> Result<ExitCode> {
    crate::logging::init(cmd.debug)?;

    let manager = PhotoManager::open(&cmd.db)?;
    let options = VerifyOptions {
        subdir: cmd.subdir,
        random_fraction: cmd.random_fraction,
        storage: cmd.storage_type,
    };

    let pb = super::progress_bar();
    let summary = manager.verify(
        &cmd.destination,
        &options,
        Some(&mut |progress| match progress {
            VerifyProgress::Start { total, total_bytes } => {
                pb.set_length(total as u64);
                pb.set_message(format!("Verifying {}", super::format_size(total_bytes)));
            }
            VerifyProgress::Checked { path, ok } => {
                pb.inc(1);
                if !ok {
                    pb.set_message(format!("FAILED {}", path.display()));
                }
            }
        }),
    )?;
    pb.finish_with_message(format!(
        "{} pass, {} fail, {} missing",
        summary.num_pass, summary.num_fail, summary.num_missing
    ));

    println!(
        "Verified {} items ({}): {} pass, {} fail, {} missing",
        summary.num_pass + summary.num_fail + summary.num_missing,
        super::format_size(summary.total_bytes),
        summary.num_pass,
        summary.num_fail,
        summary.num_missing,
    );
    for sto in &summary.failed {
        println!("  incorrect checksum: {sto}");
    }
    for sto in &summary.missing {
        println!("  missing: {sto}");
    }

    Ok(if summary.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

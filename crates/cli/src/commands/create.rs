use std::process::ExitCode;

use anyhow::Result;
use photomanager_core::PhotoManager;

use crate::CreateCmd;

pub fn run(cmd: CreateCmd) -> Result<ExitCode> {
    crate::logging::init(cmd.debug)?;

    let mut manager =
        PhotoManager::create(&cmd.db, cmd.hash_algorithm, cmd.timezone_default)?;
    manager.save_forced(&crate::history_argv())?;

    println!("Created catalog at {}", cmd.db.display());
    Ok(ExitCode::SUCCESS)
}

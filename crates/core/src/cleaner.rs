//! Cleaning: remove superseded stored variants once a higher-priority
//! variant of the same logical photo is verified on disk.
//!
//! Safety rules: a uid is only cleaned when its surviving stored variant
//! re-verifies by digest; a stored entry whose checksum equals a verified
//! higher-priority one is de-listed without deleting anything (both entries
//! point at the same content). Dry runs log the identical plan and change
//! nothing, on disk or in the catalog.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info, warn};

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::hasher;

#[derive(Debug, Clone, Default)]
pub struct CleanOptions {
    /// Only act on stored files under this destination subdirectory.
    pub subdir: String,
    pub dry_run: bool,
}

pub enum CleanProgress {
    Start { total: usize },
    Removed { path: PathBuf },
    Delisted { path: PathBuf },
}

#[derive(Debug, Default)]
pub struct CleanReport {
    pub num_removed: usize,
    pub num_delisted: usize,
    /// Stored entries scheduled for removal whose file was already gone.
    pub num_missing: usize,
    /// uids skipped because their surviving variant failed verification.
    pub num_unverified: usize,
    pub removed_bytes: u64,
    pub unverified: Vec<String>,
    pub cancelled: bool,
}

enum Action {
    Remove { uid: String, index: usize },
    Delist { uid: String, index: usize },
}

/// Remove superseded stored variants under `destination`.
pub fn clean(
    catalog: &mut Catalog,
    destination: &Path,
    options: &CleanOptions,
    cancel: &AtomicBool,
    mut progress: Option<&mut dyn FnMut(CleanProgress)>,
) -> Result<CleanReport> {
    let subdir = Path::new(&options.subdir);
    if subdir.is_absolute() {
        return Err(Error::AbsoluteSubdir(subdir.to_path_buf()));
    }

    let mut report = CleanReport::default();
    let algorithm = catalog.hash_algorithm();
    let mut actions: Vec<Action> = Vec::new();

    for uid in catalog.uids() {
        if cancel.load(Ordering::Relaxed) {
            report.cancelled = true;
            break;
        }
        let photos = catalog.variants(&uid);

        // Stored variants whose file is actually present.
        let present: Vec<usize> = photos
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_stored() && destination.join(&p.sto).exists())
            .map(|(i, _)| i)
            .collect();
        let Some(&best_prio) = present.iter().map(|&i| &photos[i].prio).min() else {
            continue;
        };

        // Nothing is superseded unless some stored entry sits above the
        // best stored priority.
        let has_candidates = photos
            .iter()
            .any(|p| p.is_stored() && p.prio > best_prio);
        if !has_candidates {
            continue;
        }

        // Verify every best-priority stored file; their checksums guard
        // both deletion and de-listing.
        let mut verified_checksums: HashSet<&str> = HashSet::new();
        let mut verified = true;
        for &i in present.iter().filter(|&&i| photos[i].prio == best_prio) {
            let abs = destination.join(&photos[i].sto);
            match hasher::file_checksum(&abs, algorithm) {
                Ok(chk) if chk == photos[i].chk => {
                    verified_checksums.insert(photos[i].chk.as_str());
                }
                Ok(_) => {
                    warn!("stored photo failed verification: {}", abs.display());
                    verified = false;
                }
                Err(e) => {
                    warn!("could not verify {}: {e}", abs.display());
                    verified = false;
                }
            }
        }
        if !verified {
            report.num_unverified += 1;
            report.unverified.push(uid.clone());
            continue;
        }

        for (i, photo) in photos.iter().enumerate() {
            if !photo.is_stored() || photo.prio <= best_prio {
                continue;
            }
            if !options.subdir.is_empty()
                && !Path::new(&photo.sto).starts_with(subdir)
            {
                continue;
            }
            if verified_checksums.contains(photo.chk.as_str()) {
                // Same content as a verified keeper; unmark without
                // touching the file it shares.
                debug!(
                    "{}: entry {} stored in {}",
                    if options.dry_run { "would de-list" } else { "de-listing" },
                    photo.src,
                    photo.sto
                );
                actions.push(Action::Delist {
                    uid: uid.clone(),
                    index: i,
                });
            } else {
                debug!(
                    "{}: {}",
                    if options.dry_run { "would remove" } else { "removing" },
                    destination.join(&photo.sto).display()
                );
                actions.push(Action::Remove {
                    uid: uid.clone(),
                    index: i,
                });
            }
        }
    }

    if let Some(ref mut cb) = progress {
        cb(CleanProgress::Start {
            total: actions.len(),
        });
    }
    info!(
        "identified {} lower-priority items for removal",
        actions.len()
    );

    for action in actions {
        match action {
            Action::Delist { uid, index } => {
                let path = PathBuf::from(&catalog.variants(&uid)[index].sto);
                report.num_delisted += 1;
                if !options.dry_run {
                    catalog.clear_store_path(&uid, index);
                }
                if let Some(ref mut cb) = progress {
                    cb(CleanProgress::Delisted { path });
                }
            }
            Action::Remove { uid, index } => {
                let photo = catalog.variants(&uid)[index].clone();
                let abs = destination.join(&photo.sto);
                if !abs.exists() {
                    debug!("missing photo: {}", abs.display());
                    report.num_missing += 1;
                    continue;
                }
                if !options.dry_run {
                    std::fs::remove_file(&abs)?;
                    catalog.clear_store_path(&uid, index);
                }
                report.num_removed += 1;
                report.removed_bytes += photo.fsz;
                if let Some(ref mut cb) = progress {
                    cb(CleanProgress::Removed { path: abs });
                }
            }
        }
    }

    info!(
        "{} {} items and de-listed {}, skipped {} missing",
        if options.dry_run { "found" } else { "removed" },
        report.num_removed,
        report.num_delisted,
        report.num_missing
    );
    Ok(report)
}

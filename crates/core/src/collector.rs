//! Collection: copy the preferred variant of every logical photo into the
//! content-named destination layout and mark it stored in the catalog.
//!
//! Collection is resumable and idempotent. A run interrupted mid-copy
//! leaves a short file at the target path; the next run detects it by size,
//! unlinks it, and retries. Re-running after a completed pass copies
//! nothing.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info, warn};

use crate::catalog::Catalog;
use crate::domain::PhotoFile;
use crate::error::{Error, Result};
use crate::hasher::{self, Algorithm};

#[derive(Debug, Clone, Default)]
pub struct CollectOptions {
    pub dry_run: bool,
    /// Restrict collection to these uids (used by `import --skip-existing`).
    pub filter_uids: Option<HashSet<String>>,
}

pub enum CollectProgress {
    Start { total: usize },
    Copied { source: PathBuf, target: PathBuf },
    AlreadyStored { path: PathBuf },
    Uncollected { uid: String },
    Complete { copied: usize, stored: usize },
}

#[derive(Debug, Default)]
pub struct CollectReport {
    /// Previously stored variants whose file was missing and was re-copied.
    pub num_restored: usize,
    /// Newly stored variants.
    pub num_added: usize,
    /// Variants already present at their store path.
    pub num_stored: usize,
    /// uids with no readable variant.
    pub num_missed: usize,
    pub num_errors: usize,
    pub copied_bytes: u64,
    pub uncollected: Vec<String>,
    pub cancelled: bool,
}

/// Relative store path for a variant:
/// `YYYY/MM-Mon/YYYY-MM-DD_HH-MM-SS-<chk[0:7]>-<basename>`, rendered in the
/// variant's own offset. Forward slashes on every host.
pub fn store_path(photo: &PhotoFile) -> String {
    let local = photo.local_datetime();
    let chk7 = photo.chk.get(..7).unwrap_or(&photo.chk);
    // Strip any path separators that survived in the basename.
    let name: String = photo
        .basename()
        .chars()
        .filter(|c| *c != '/' && *c != '\\')
        .collect();
    format!(
        "{}-{}-{}",
        local.format("%Y/%m-%b/%Y-%m-%d_%H-%M-%S"),
        chk7,
        name
    )
}

/// Append `-1`, `-2`, … to the stem of a relative store path.
fn suffixed(rel: &str, n: u32) -> String {
    match rel.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}-{n}.{ext}"),
        _ => format!("{rel}-{n}"),
    }
}

enum TargetState {
    /// Nothing at the target path.
    Free,
    /// The target already holds this exact content.
    Stored,
    /// A shorter file: our own interrupted copy, safe to unlink and retry.
    Partial,
    /// A foreign file; pick a different name.
    Occupied,
}

fn target_state(abs: &Path, photo: &PhotoFile, algorithm: Algorithm) -> Result<TargetState> {
    let meta = match fs::metadata(abs) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(TargetState::Free),
        Err(e) => return Err(e.into()),
    };
    if meta.len() == photo.fsz && hasher::file_checksum(abs, algorithm)? == photo.chk {
        return Ok(TargetState::Stored);
    }
    if meta.len() < photo.fsz {
        Ok(TargetState::Partial)
    } else {
        Ok(TargetState::Occupied)
    }
}

/// Choose a free (or already-matching) relative path for `photo`, removing
/// a leftover partial copy when one is found.
fn resolve_target(
    destination: &Path,
    photo: &PhotoFile,
    algorithm: Algorithm,
) -> Result<(String, bool)> {
    let base = store_path(photo);
    let mut rel = base.clone();
    let mut counter = 0u32;
    loop {
        let abs = destination.join(&rel);
        match target_state(&abs, photo, algorithm)? {
            TargetState::Free => return Ok((rel, false)),
            TargetState::Stored => return Ok((rel, true)),
            TargetState::Partial => {
                warn!("removing partial copy at {}", abs.display());
                fs::remove_file(&abs)?;
                return Ok((rel, false));
            }
            TargetState::Occupied => {
                counter += 1;
                if counter > 1000 {
                    return Err(Error::Collection {
                        path: abs,
                        message: "could not find a unique store path".to_string(),
                    });
                }
                rel = suffixed(&base, counter);
            }
        }
    }
}

/// Stream-copy `source` to `target` and fsync before returning.
fn copy_file(source: &Path, target: &Path) -> Result<u64> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut reader = fs::File::open(source)?;
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(target)?;
    let copied = match io::copy(&mut reader, &mut file).and_then(|n| {
        file.sync_all()?;
        Ok(n)
    }) {
        Ok(n) => n,
        Err(e) => {
            // Do not leave a partial target behind on a failed copy.
            drop(file);
            let _ = fs::remove_file(target);
            return Err(e.into());
        }
    };
    Ok(copied)
}

/// Collect the preferred variant of every uid into `destination`.
pub fn collect(
    catalog: &mut Catalog,
    destination: &Path,
    options: &CollectOptions,
    cancel: &AtomicBool,
    mut progress: Option<&mut dyn FnMut(CollectProgress)>,
) -> Result<CollectReport> {
    let mut report = CollectReport::default();
    let algorithm = catalog.hash_algorithm();
    let uids: Vec<String> = match &options.filter_uids {
        Some(filter) => catalog.uids().into_iter().filter(|u| filter.contains(u)).collect(),
        None => catalog.uids(),
    };

    info!("checking stored photos");
    if let Some(ref mut cb) = progress {
        cb(CollectProgress::Start { total: uids.len() });
    }

    for uid in uids {
        if cancel.load(Ordering::Relaxed) {
            report.cancelled = true;
            break;
        }
        collect_uid(catalog, destination, &uid, algorithm, options, &mut report, &mut progress)?;
    }

    info!(
        "collected {} new items and restored {} items, {} already stored, {} missed",
        report.num_added, report.num_restored, report.num_stored, report.num_missed
    );
    if let Some(ref mut cb) = progress {
        cb(CollectProgress::Complete {
            copied: report.num_added + report.num_restored,
            stored: report.num_stored,
        });
    }
    Ok(report)
}

fn collect_uid(
    catalog: &mut Catalog,
    destination: &Path,
    uid: &str,
    algorithm: Algorithm,
    options: &CollectOptions,
    report: &mut CollectReport,
    progress: &mut Option<&mut dyn FnMut(CollectProgress)>,
) -> Result<()> {
    // Checksums already safely on disk for this uid, with the best priority
    // that claims each one.
    let mut stored_checksums: HashMap<String, i32> = HashMap::new();

    // First pass: variants already marked stored. Missing files are
    // restored from their source when possible (resume after data loss or
    // an interrupted run).
    let marked: Vec<usize> = catalog
        .variants(uid)
        .iter()
        .enumerate()
        .filter(|(_, p)| p.is_stored())
        .map(|(i, _)| i)
        .collect();
    for index in marked {
        let photo = catalog.variants(uid)[index].clone();
        let abs = destination.join(&photo.sto);
        // Size must match for the file to count as stored without a rehash.
        let on_disk_size = fs::metadata(&abs).ok().map(|m| m.len());
        if on_disk_size == Some(photo.fsz) {
            claim(&mut stored_checksums, &photo);
            report.num_stored += 1;
            if let Some(ref mut cb) = progress {
                cb(CollectProgress::AlreadyStored { path: abs });
            }
        } else if Path::new(&photo.src).exists() {
            debug!("restoring {} to {}", photo.src, abs.display());
            if options.dry_run {
                claim(&mut stored_checksums, &photo);
                report.num_restored += 1;
                continue;
            }
            if on_disk_size.is_some() {
                warn!("removing partial copy at {}", abs.display());
                fs::remove_file(&abs)?;
            }
            match copy_file(Path::new(&photo.src), &abs) {
                Ok(n) => {
                    report.copied_bytes += n;
                    report.num_restored += 1;
                    claim(&mut stored_checksums, &photo);
                    if let Some(ref mut cb) = progress {
                        cb(CollectProgress::Copied {
                            source: PathBuf::from(&photo.src),
                            target: abs,
                        });
                    }
                }
                Err(e) => {
                    warn!("error restoring {}: {e}", photo.src);
                    report.num_errors += 1;
                }
            }
        } else {
            warn!("photo not found: {}", photo.src);
            report.num_missed += 1;
        }
    }

    // Second pass: pick the primary among unstored variants, falling back
    // through the preference order when a source is unreadable.
    let candidates: Vec<usize> = catalog
        .best_indices(uid)
        .into_iter()
        .filter(|&i| !catalog.variants(uid)[i].is_stored())
        .collect();
    let mut collected = false;
    let mut any_candidate = false;
    for index in candidates {
        let photo = catalog.variants(uid)[index].clone();
        if let Some(&best) = stored_checksums.get(&photo.chk) {
            if best <= photo.prio {
                debug!("photo duplicate already stored: {}", photo.src);
                report.num_stored += 1;
                collected = true;
                break;
            }
        }
        if stored_checksums.values().any(|&p| p <= photo.prio) {
            // A better or equal variant of this uid is already on disk.
            collected = true;
            break;
        }
        any_candidate = true;
        if !Path::new(&photo.src).exists() {
            warn!("photo not found: {}", photo.src);
            continue;
        }

        let (rel, already) = resolve_target(destination, &photo, algorithm)?;
        if already {
            debug!("photo already present: {rel}");
            catalog.set_store_path(uid, index, rel);
            claim(&mut stored_checksums, &photo);
            report.num_stored += 1;
            collected = true;
            break;
        }
        if options.dry_run {
            debug!("would copy {} to {rel}", photo.src);
            report.num_added += 1;
            collected = true;
            break;
        }
        match copy_file(Path::new(&photo.src), &destination.join(&rel)) {
            Ok(n) => {
                catalog.set_store_path(uid, index, rel.clone());
                claim(&mut stored_checksums, &photo);
                report.copied_bytes += n;
                report.num_added += 1;
                if let Some(ref mut cb) = progress {
                    cb(CollectProgress::Copied {
                        source: PathBuf::from(&photo.src),
                        target: destination.join(&rel),
                    });
                }
                collected = true;
                break;
            }
            Err(e) => {
                warn!("error copying {}: {e}", photo.src);
                report.num_errors += 1;
            }
        }
    }

    if !collected && any_candidate && stored_checksums.is_empty() {
        warn!("uncollected: {uid}");
        report.num_missed += 1;
        report.uncollected.push(uid.to_string());
        if let Some(ref mut cb) = progress {
            cb(CollectProgress::Uncollected {
                uid: uid.to_string(),
            });
        }
    }
    Ok(())
}

fn claim(stored: &mut HashMap<String, i32>, photo: &PhotoFile) {
    let entry = stored.entry(photo.chk.clone()).or_insert(photo.prio);
    *entry = (*entry).min(photo.prio);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DEFAULT_PRIORITY;

    fn photo(chk: &str, src: &str, prio: i32) -> PhotoFile {
        PhotoFile {
            chk: chk.to_string(),
            src: src.to_string(),
            dt: "2021:03:01 10:40:01-0400".to_string(),
            ts: 1614609601.0,
            fsz: 9,
            sto: String::new(),
            prio,
            tzo: Some(-14400),
        }
    }

    // ── store_path ──────────────────────────────────────────────

    #[test]
    fn test_store_path_layout() {
        let p = PhotoFile {
            chk: "cafebabe".repeat(8),
            src: "/A/IMG_0001.JPG".to_string(),
            dt: "2021:03:01 10:40:01-0400".to_string(),
            ts: 1614609601.0,
            fsz: 100,
            sto: String::new(),
            prio: DEFAULT_PRIORITY,
            tzo: Some(-14400),
        };
        assert_eq!(
            store_path(&p),
            "2021/03-Mar/2021-03-01_10-40-01-cafebab-IMG_0001.JPG"
        );
    }

    #[test]
    fn test_store_path_strips_separators_from_basename() {
        let mut p = photo(&"ab".repeat(32), "/A/IMG_0001.JPG", 10);
        p.src = r"C:\camera\weird\IMG.JPG".to_string();
        assert!(!store_path(&p).split('/').last().unwrap().contains('\\'));
    }

    // ── suffixed ────────────────────────────────────────────────

    #[test]
    fn test_suffixed_inserts_before_extension() {
        assert_eq!(suffixed("2021/a/x-abc-IMG.JPG", 1), "2021/a/x-abc-IMG-1.JPG");
        assert_eq!(suffixed("2021/a/noext", 2), "2021/a/noext-2");
    }

    // ── collect end-to-end over a real tree ─────────────────────

    fn setup() -> (tempfile::TempDir, Catalog, PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let src_dir = tmp.path().join("src");
        fs::create_dir_all(&src_dir).unwrap();
        let catalog = Catalog::new(Algorithm::Blake2b256, "local".to_string());
        let dest = tmp.path().join("dst");
        (tmp, catalog, dest)
    }

    fn add_real_file(
        catalog: &mut Catalog,
        dir: &Path,
        name: &str,
        contents: &[u8],
        prio: i32,
    ) -> String {
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        let chk = hasher::file_checksum(&path, Algorithm::Blake2b256).unwrap();
        let mut p = photo(&chk, path.to_str().unwrap(), prio);
        p.fsz = contents.len() as u64;
        let (uid, _) = catalog.add(p);
        uid
    }

    fn run_collect(catalog: &mut Catalog, dest: &Path) -> CollectReport {
        let cancel = AtomicBool::new(false);
        collect(catalog, dest, &CollectOptions::default(), &cancel, None).unwrap()
    }

    #[test]
    fn test_collect_copies_primary() {
        let (tmp, mut catalog, dest) = setup();
        let uid = add_real_file(&mut catalog, &tmp.path().join("src"), "a.jpg", b"bytes a!!", 10);

        let report = run_collect(&mut catalog, &dest);
        assert_eq!(report.num_added, 1);

        let sto = &catalog.variants(&uid)[0].sto;
        assert!(!sto.is_empty());
        assert!(dest.join(sto).exists());
        assert_eq!(fs::read(dest.join(sto)).unwrap(), b"bytes a!!");
    }

    #[test]
    fn test_collect_is_idempotent() {
        let (tmp, mut catalog, dest) = setup();
        add_real_file(&mut catalog, &tmp.path().join("src"), "a.jpg", b"bytes a!!", 10);

        run_collect(&mut catalog, &dest);
        let before = snapshot(&dest);
        let report = run_collect(&mut catalog, &dest);

        assert_eq!(report.num_added, 0);
        assert_eq!(report.num_stored, 1);
        assert_eq!(snapshot(&dest), before);
    }

    fn snapshot(dir: &Path) -> Vec<(PathBuf, Vec<u8>)> {
        let mut out = Vec::new();
        for entry in walkdir::WalkDir::new(dir).into_iter().flatten() {
            if entry.file_type().is_file() {
                out.push((
                    entry.path().to_path_buf(),
                    fs::read(entry.path()).unwrap(),
                ));
            }
        }
        out.sort();
        out
    }

    #[test]
    fn test_collect_only_best_priority_variant() {
        let (tmp, mut catalog, dest) = setup();
        let src = tmp.path().join("src");
        // Same logical photo: same ts, same basename, different content.
        let nef = src.join("a");
        fs::create_dir_all(&nef).unwrap();
        let jpg = src.join("b");
        fs::create_dir_all(&jpg).unwrap();

        let uid = add_real_file(&mut catalog, &nef, "shot.nef", b"raw bytes!", 10);
        let uid2 = add_real_file(&mut catalog, &jpg, "shot.nef", b"jpeg bytes", 30);
        assert_eq!(uid, uid2);

        let report = run_collect(&mut catalog, &dest);
        assert_eq!(report.num_added, 1);

        let stored: Vec<&PhotoFile> = catalog
            .variants(&uid)
            .iter()
            .filter(|p| p.is_stored())
            .collect();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].prio, 10);
    }

    #[test]
    fn test_collect_falls_back_when_source_unreadable() {
        let (tmp, mut catalog, dest) = setup();
        let src = tmp.path().join("src");

        let uid = add_real_file(&mut catalog, &src, "shot.jpg", b"good bytes", 30);
        // Higher-preference variant of the same photo whose source vanished.
        let ghost_src = src.join("gone").join("shot.jpg");
        let ghost = photo(&"99".repeat(32), ghost_src.to_str().unwrap(), 10);
        let (guid, _) = catalog.add(ghost);
        assert_eq!(uid, guid);

        let report = run_collect(&mut catalog, &dest);
        assert_eq!(report.num_added, 1);
        let stored: Vec<&PhotoFile> = catalog
            .variants(&uid)
            .iter()
            .filter(|p| p.is_stored())
            .collect();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].prio, 30);
    }

    #[test]
    fn test_collect_reports_uncollected() {
        let (_tmp, mut catalog, dest) = setup();
        catalog.add(photo(&"77".repeat(32), "/vanished/only.jpg", 10));

        let report = run_collect(&mut catalog, &dest);
        assert_eq!(report.num_missed, 1);
        assert_eq!(report.uncollected.len(), 1);
    }

    #[test]
    fn test_collect_removes_partial_and_retries() {
        let (tmp, mut catalog, dest) = setup();
        let uid = add_real_file(&mut catalog, &tmp.path().join("src"), "a.jpg", b"full content", 10);

        // Simulate an interrupted earlier run: short file at the target.
        let rel = store_path(&catalog.variants(&uid)[0]);
        let abs = dest.join(&rel);
        fs::create_dir_all(abs.parent().unwrap()).unwrap();
        fs::write(&abs, b"full co").unwrap();

        let report = run_collect(&mut catalog, &dest);
        assert_eq!(report.num_added, 1);
        assert_eq!(fs::read(&abs).unwrap(), b"full content");
        assert_eq!(catalog.variants(&uid)[0].sto, rel);
    }

    #[test]
    fn test_collect_foreign_target_gets_suffix() {
        let (tmp, mut catalog, dest) = setup();
        let uid = add_real_file(&mut catalog, &tmp.path().join("src"), "a.jpg", b"real data", 10);

        // A foreign file of the same length occupies the computed path.
        let rel = store_path(&catalog.variants(&uid)[0]);
        let abs = dest.join(&rel);
        fs::create_dir_all(abs.parent().unwrap()).unwrap();
        fs::write(&abs, b"not mine!").unwrap();

        run_collect(&mut catalog, &dest);
        let sto = &catalog.variants(&uid)[0].sto;
        assert_ne!(sto, &rel);
        assert!(sto.contains("-1."));
        assert_eq!(fs::read(dest.join(sto)).unwrap(), b"real data");
        // The foreign file is untouched.
        assert_eq!(fs::read(&abs).unwrap(), b"not mine!");
    }

    #[test]
    fn test_collect_adopts_matching_target() {
        let (tmp, mut catalog, dest) = setup();
        let uid = add_real_file(&mut catalog, &tmp.path().join("src"), "a.jpg", b"same data", 10);

        let rel = store_path(&catalog.variants(&uid)[0]);
        let abs = dest.join(&rel);
        fs::create_dir_all(abs.parent().unwrap()).unwrap();
        fs::write(&abs, b"same data").unwrap();

        let report = run_collect(&mut catalog, &dest);
        assert_eq!(report.num_added, 0);
        assert_eq!(report.num_stored, 1);
        assert_eq!(catalog.variants(&uid)[0].sto, rel);
    }

    #[test]
    fn test_collect_restores_missing_stored_file() {
        let (tmp, mut catalog, dest) = setup();
        let uid = add_real_file(&mut catalog, &tmp.path().join("src"), "a.jpg", b"keep safe", 10);

        run_collect(&mut catalog, &dest);
        let sto = catalog.variants(&uid)[0].sto.clone();
        fs::remove_file(dest.join(&sto)).unwrap();

        let report = run_collect(&mut catalog, &dest);
        assert_eq!(report.num_restored, 1);
        assert!(dest.join(&sto).exists());
    }

    #[test]
    fn test_collect_restores_truncated_stored_file() {
        let (tmp, mut catalog, dest) = setup();
        let uid = add_real_file(&mut catalog, &tmp.path().join("src"), "a.jpg", b"keep safe", 10);

        run_collect(&mut catalog, &dest);
        let sto = catalog.variants(&uid)[0].sto.clone();
        // A size mismatch must not count as stored.
        fs::write(dest.join(&sto), b"keep").unwrap();

        let report = run_collect(&mut catalog, &dest);
        assert_eq!(report.num_stored, 0);
        assert_eq!(report.num_restored, 1);
        assert_eq!(fs::read(dest.join(&sto)).unwrap(), b"keep safe");
    }

    #[test]
    fn test_collect_dry_run_touches_nothing() {
        let (tmp, mut catalog, dest) = setup();
        let uid = add_real_file(&mut catalog, &tmp.path().join("src"), "a.jpg", b"bytes a!!", 10);

        let cancel = AtomicBool::new(false);
        let options = CollectOptions {
            dry_run: true,
            ..Default::default()
        };
        let report = collect(&mut catalog, &dest, &options, &cancel, None).unwrap();

        assert_eq!(report.num_added, 1);
        assert!(!dest.exists());
        assert!(!catalog.variants(&uid)[0].is_stored());
    }

    #[test]
    fn test_collect_filter_uids() {
        let (tmp, mut catalog, dest) = setup();
        let src = tmp.path().join("src");
        let uid_a = add_real_file(&mut catalog, &src, "a.jpg", b"content a", 10);
        let uid_b = add_real_file(&mut catalog, &src, "b.jpg", b"content b", 10);

        let cancel = AtomicBool::new(false);
        let options = CollectOptions {
            filter_uids: Some([uid_a.clone()].into_iter().collect()),
            ..Default::default()
        };
        collect(&mut catalog, &dest, &options, &cancel, None).unwrap();

        assert!(catalog.variants(&uid_a)[0].is_stored());
        assert!(!catalog.variants(&uid_b)[0].is_stored());
    }
}

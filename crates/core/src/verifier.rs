//! Verification: recompute digests of stored files and compare them to the
//! catalog. Nothing is modified; mismatches are accumulated and reported.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use log::{info, warn};
use rand::Rng;

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::hasher;
use crate::storage::StorageClass;

#[derive(Debug, Clone, Default)]
pub struct VerifyOptions {
    /// Restrict to variants whose store path has this prefix.
    pub subdir: String,
    /// Independently sample each stored variant with this probability.
    pub random_fraction: Option<f64>,
    pub storage: StorageClass,
}

pub enum VerifyProgress {
    Start { total: usize, total_bytes: u64 },
    Checked { path: PathBuf, ok: bool },
}

/// Outcome of one verification pass.
#[derive(Debug, Default)]
pub struct VerifySummary {
    pub num_pass: usize,
    pub num_fail: usize,
    pub num_missing: usize,
    pub total_bytes: u64,
    /// Store paths whose digest did not match.
    pub failed: Vec<String>,
    /// Store paths with no file on disk.
    pub missing: Vec<String>,
}

impl VerifySummary {
    pub fn is_clean(&self) -> bool {
        self.num_fail == 0 && self.num_missing == 0
    }
}

/// Verify stored variants against the files under `destination`.
pub fn verify(
    catalog: &Catalog,
    destination: &Path,
    options: &VerifyOptions,
    cancel: &AtomicBool,
    mut progress: Option<&mut dyn FnMut(VerifyProgress)>,
) -> Result<VerifySummary> {
    let subdir = Path::new(&options.subdir);
    if subdir.is_absolute() {
        return Err(Error::AbsoluteSubdir(subdir.to_path_buf()));
    }

    let mut stored: Vec<(&str, &crate::domain::PhotoFile)> = catalog
        .stored_photos()
        .filter(|(_, _, p)| options.subdir.is_empty() || Path::new(&p.sto).starts_with(subdir))
        .map(|(uid, _, p)| (uid, p))
        .collect();

    if let Some(fraction) = options.random_fraction {
        let fraction = fraction.clamp(0.0, 1.0);
        let mut rng = rand::thread_rng();
        stored.retain(|_| rng.gen_bool(fraction));
    }

    let mut summary = VerifySummary {
        total_bytes: stored.iter().map(|(_, p)| p.fsz).sum(),
        ..Default::default()
    };
    info!("verifying {} items", stored.len());
    if let Some(ref mut cb) = progress {
        cb(VerifyProgress::Start {
            total: stored.len(),
            total_bytes: summary.total_bytes,
        });
    }

    let mut to_hash: Vec<(PathBuf, &crate::domain::PhotoFile)> = Vec::new();
    for &(_, photo) in &stored {
        let abs = destination.join(&photo.sto);
        if abs.exists() {
            to_hash.push((abs, photo));
        } else {
            warn!("missing photo: {}", abs.display());
            summary.num_missing += 1;
            summary.missing.push(photo.sto.clone());
            if let Some(ref mut cb) = progress {
                cb(VerifyProgress::Checked {
                    path: abs,
                    ok: false,
                });
            }
        }
    }

    let paths: Vec<PathBuf> = to_hash.iter().map(|(p, _)| p.clone()).collect();
    let digests = hasher::hash_batch(
        &paths,
        catalog.hash_algorithm(),
        options.storage.digest_workers(),
        cancel,
    )?;

    for (abs, photo) in to_hash {
        let ok = match digests.get(&abs) {
            Some(Ok(chk)) => chk == &photo.chk,
            Some(Err(e)) => {
                warn!("could not hash {}: {e}", abs.display());
                false
            }
            // Cancelled before this file was hashed.
            None => continue,
        };
        if ok {
            summary.num_pass += 1;
        } else {
            warn!("incorrect checksum: {}", abs.display());
            summary.num_fail += 1;
            summary.failed.push(photo.sto.clone());
        }
        if let Some(ref mut cb) = progress {
            cb(VerifyProgress::Checked { path: abs, ok });
        }
    }

    if summary.is_clean() {
        info!("verified {} items, no errors found", summary.num_pass);
    } else {
        warn!(
            "found {} incorrect and {} missing items",
            summary.num_fail, summary.num_missing
        );
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PhotoFile;
    use crate::hasher::Algorithm;
    use std::fs;

    fn stored_photo(catalog: &mut Catalog, dest: &Path, rel: &str, contents: &[u8]) -> String {
        let abs = dest.join(rel);
        fs::create_dir_all(abs.parent().unwrap()).unwrap();
        fs::write(&abs, contents).unwrap();
        let chk = hasher::file_checksum(&abs, Algorithm::Blake2b256).unwrap();
        let (uid, _) = catalog.add(PhotoFile {
            chk,
            src: format!("/orig/{rel}"),
            dt: "2021:03:01 10:40:01+0000".to_string(),
            ts: 1614595201.0 + contents.len() as f64,
            fsz: contents.len() as u64,
            sto: rel.to_string(),
            prio: 10,
            tzo: Some(0),
        });
        uid
    }

    fn run_verify(catalog: &Catalog, dest: &Path, options: &VerifyOptions) -> VerifySummary {
        let cancel = AtomicBool::new(false);
        verify(catalog, dest, options, &cancel, None).unwrap()
    }

    #[test]
    fn test_verify_all_pass() {
        let tmp = tempfile::tempdir().unwrap();
        let mut catalog = Catalog::new(Algorithm::Blake2b256, "local".to_string());
        stored_photo(&mut catalog, tmp.path(), "2021/03-Mar/a.jpg", b"alpha");
        stored_photo(&mut catalog, tmp.path(), "2021/03-Mar/b.jpg", b"beta!");

        let summary = run_verify(&catalog, tmp.path(), &VerifyOptions::default());
        assert_eq!(summary.num_pass, 2);
        assert!(summary.is_clean());
        assert_eq!(summary.total_bytes, 10);
    }

    #[test]
    fn test_verify_detects_bit_rot() {
        let tmp = tempfile::tempdir().unwrap();
        let mut catalog = Catalog::new(Algorithm::Blake2b256, "local".to_string());
        stored_photo(&mut catalog, tmp.path(), "2021/03-Mar/a.jpg", b"alpha");

        // Flip one byte without changing the size.
        fs::write(tmp.path().join("2021/03-Mar/a.jpg"), b"alphA").unwrap();

        let summary = run_verify(&catalog, tmp.path(), &VerifyOptions::default());
        assert_eq!(summary.num_fail, 1);
        assert_eq!(summary.failed, vec!["2021/03-Mar/a.jpg".to_string()]);
        // The corrupt file is reported, not touched.
        assert_eq!(fs::read(tmp.path().join("2021/03-Mar/a.jpg")).unwrap(), b"alphA");
    }

    #[test]
    fn test_verify_reports_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let mut catalog = Catalog::new(Algorithm::Blake2b256, "local".to_string());
        stored_photo(&mut catalog, tmp.path(), "2021/03-Mar/a.jpg", b"alpha");
        fs::remove_file(tmp.path().join("2021/03-Mar/a.jpg")).unwrap();

        let summary = run_verify(&catalog, tmp.path(), &VerifyOptions::default());
        assert_eq!(summary.num_missing, 1);
        assert_eq!(summary.missing, vec!["2021/03-Mar/a.jpg".to_string()]);
    }

    #[test]
    fn test_verify_subdir_filter() {
        let tmp = tempfile::tempdir().unwrap();
        let mut catalog = Catalog::new(Algorithm::Blake2b256, "local".to_string());
        stored_photo(&mut catalog, tmp.path(), "2020/01-Jan/a.jpg", b"alpha");
        stored_photo(&mut catalog, tmp.path(), "2021/03-Mar/b.jpg", b"beta!");

        let options = VerifyOptions {
            subdir: "2021".to_string(),
            ..Default::default()
        };
        let summary = run_verify(&catalog, tmp.path(), &options);
        assert_eq!(summary.num_pass, 1);
    }

    #[test]
    fn test_verify_absolute_subdir_rejected() {
        let catalog = Catalog::new(Algorithm::Blake2b256, "local".to_string());
        let options = VerifyOptions {
            subdir: "/abs".to_string(),
            ..Default::default()
        };
        let cancel = AtomicBool::new(false);
        assert!(matches!(
            verify(&catalog, Path::new("/dst"), &options, &cancel, None),
            Err(Error::AbsoluteSubdir(_))
        ));
    }

    #[test]
    fn test_verify_random_fraction_bounds() {
        let tmp = tempfile::tempdir().unwrap();
        let mut catalog = Catalog::new(Algorithm::Blake2b256, "local".to_string());
        stored_photo(&mut catalog, tmp.path(), "2021/03-Mar/a.jpg", b"alpha");

        let none = VerifyOptions {
            random_fraction: Some(0.0),
            ..Default::default()
        };
        let summary = run_verify(&catalog, tmp.path(), &none);
        assert_eq!(summary.num_pass + summary.num_fail + summary.num_missing, 0);

        let all = VerifyOptions {
            random_fraction: Some(1.0),
            ..Default::default()
        };
        let summary = run_verify(&catalog, tmp.path(), &all);
        assert_eq!(summary.num_pass, 1);
    }
}

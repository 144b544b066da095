//! The indexing pipeline: discover candidate files, digest and extract
//! metadata in parallel, then resolve each candidate against the catalog
//! serially so uid allocation is deterministic for a sorted input set.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::FixedOffset;
use log::{debug, error, info};

use crate::catalog::Catalog;
use crate::dates;
use crate::domain::{AddOutcome, PhotoFile};
use crate::error::Result;
use crate::exiftool::MetadataSource;
use crate::hasher;
use crate::scanner;
use crate::storage::StorageClass;

/// Pluggable pre-hash integrity predicate: returns false for files that
/// should be reported as damaged and not indexed.
pub type IntegrityCheck = dyn Fn(&std::path::Path) -> bool + Send + Sync;

#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    /// Root paths: directories are recursed, plain files taken verbatim.
    pub paths: Vec<PathBuf>,
    /// Glob patterns matched against the file basename.
    pub exclude: Vec<String>,
    /// Priority for every indexed file; lower is preferred.
    pub priority: Option<i32>,
    /// Overrides the catalog's timezone default for this run.
    pub timezone_default: Option<String>,
    pub storage: StorageClass,
    /// Skip paths whose absolute string already appears as a variant `src`.
    pub skip_existing: bool,
}

/// Progress events emitted while indexing.
pub enum IndexProgress {
    /// Discovery finished.
    Discovered { count: usize },
    /// Digest and metadata batches are running.
    Fingerprinting { count: usize },
    /// One candidate was resolved against the catalog.
    Indexed { path: PathBuf },
}

/// Per-path outcome record.
#[derive(Debug, Clone)]
pub struct IndexRecord {
    pub path: PathBuf,
    pub outcome: Option<AddOutcome>,
    pub uid: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Default)]
pub struct IndexReport {
    pub records: Vec<IndexRecord>,
    pub num_added: usize,
    pub num_merged: usize,
    pub num_skipped: usize,
    pub num_damaged: usize,
    pub num_errors: usize,
    /// uids touched by this run, for `import --skip-existing` collection.
    pub changed_uids: HashSet<String>,
    pub cancelled: bool,
}

/// Index `options.paths` into the catalog.
///
/// The digest engine and the metadata extractor run concurrently over the
/// full candidate set, each with the worker count of the storage class.
/// Resolution is serialized afterwards; per-file failures are accumulated
/// into the report and never abort the run.
pub fn index(
    catalog: &mut Catalog,
    options: &IndexOptions,
    metadata_source: &dyn MetadataSource,
    integrity: Option<&IntegrityCheck>,
    cancel: &AtomicBool,
    mut progress: Option<&mut dyn FnMut(IndexProgress)>,
) -> Result<IndexReport> {
    let mut report = IndexReport::default();

    let mut files = scanner::list_files(&options.paths, &options.exclude)?;
    if options.skip_existing {
        let known: HashSet<&str> = catalog.sources().collect();
        files.retain(|p| !known.contains(p.to_string_lossy().as_ref()));
    }
    if let Some(ref mut cb) = progress {
        cb(IndexProgress::Discovered { count: files.len() });
    }

    if let Some(check) = integrity {
        let mut sound = Vec::with_capacity(files.len());
        for path in files {
            if check(&path) {
                sound.push(path);
            } else {
                error!("damaged file not indexed: {}", path.display());
                report.num_damaged += 1;
                report.records.push(IndexRecord {
                    path,
                    outcome: None,
                    uid: None,
                    error: Some("failed integrity check".to_string()),
                });
            }
        }
        files = sound;
    }

    if let Some(ref mut cb) = progress {
        cb(IndexProgress::Fingerprinting { count: files.len() });
    }

    info!("collecting media hashes and capture metadata");
    let algorithm = catalog.hash_algorithm();
    let digest_workers = options.storage.digest_workers();
    let exif_workers = options.storage.exif_workers();
    let (digests, metadata) = std::thread::scope(|scope| {
        let digest_task =
            scope.spawn(|| hasher::hash_batch(&files, algorithm, digest_workers, cancel));
        let metadata_task = scope.spawn(|| metadata_source.extract(&files, exif_workers));
        (
            digest_task.join().expect("digest batch panicked"),
            metadata_task.join().expect("metadata batch panicked"),
        )
    });
    let digests = digests?;
    let metadata = metadata?;

    let default_offset = resolve_default_offset(catalog, options)?;
    let priority = options.priority.unwrap_or(crate::domain::DEFAULT_PRIORITY);

    info!("indexing media");
    for path in files {
        if cancel.load(Ordering::Relaxed) {
            report.cancelled = true;
            break;
        }
        debug!("indexing {}", path.display());

        let record = match build_photofile(&path, &digests, &metadata, default_offset, priority) {
            Ok(photo) => {
                let (uid, outcome) = catalog.add(photo);
                match outcome {
                    AddOutcome::Inserted => report.num_added += 1,
                    AddOutcome::Merged => report.num_merged += 1,
                    AddOutcome::Duplicate => report.num_skipped += 1,
                }
                if outcome != AddOutcome::Duplicate {
                    report.changed_uids.insert(uid.clone());
                }
                IndexRecord {
                    path: path.clone(),
                    outcome: Some(outcome),
                    uid: Some(uid),
                    error: None,
                }
            }
            Err(e) => {
                error!("error indexing {}: {e}", path.display());
                report.num_errors += 1;
                IndexRecord {
                    path: path.clone(),
                    outcome: None,
                    uid: None,
                    error: Some(e.to_string()),
                }
            }
        };
        report.records.push(record);

        if let Some(ref mut cb) = progress {
            cb(IndexProgress::Indexed { path });
        }
    }

    info!(
        "indexed {} items: {} added, {} merged, {} duplicates",
        report.num_added + report.num_merged + report.num_skipped,
        report.num_added,
        report.num_merged,
        report.num_skipped
    );
    Ok(report)
}

fn resolve_default_offset(catalog: &Catalog, options: &IndexOptions) -> Result<FixedOffset> {
    let tz = options
        .timezone_default
        .as_deref()
        .unwrap_or_else(|| catalog.timezone_default());
    dates::default_offset(tz)
}

fn build_photofile(
    path: &PathBuf,
    digests: &hasher::BatchDigests,
    metadata: &std::collections::HashMap<PathBuf, crate::exiftool::MediaMetadata>,
    default_offset: FixedOffset,
    priority: i32,
) -> Result<PhotoFile> {
    let chk = match digests.get(path) {
        Some(Ok(chk)) => chk.clone(),
        Some(Err(e)) => {
            return Err(crate::error::Error::Hash {
                path: path.clone(),
                message: e.to_string(),
            })
        }
        None => {
            return Err(crate::error::Error::Hash {
                path: path.clone(),
                message: "digest unavailable".to_string(),
            })
        }
    };

    let meta = metadata.get(path).cloned().unwrap_or_default();
    let resolved = dates::resolve_datetime(&meta, path, default_offset)?;
    let fsz = std::fs::metadata(path)?.len();

    Ok(PhotoFile {
        chk,
        src: path.to_string_lossy().to_string(),
        dt: resolved.dt,
        ts: resolved.ts,
        fsz,
        sto: String::new(),
        prio: priority,
        tzo: resolved.tzo,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exiftool::MediaMetadata;
    use crate::hasher::Algorithm;
    use std::collections::HashMap;
    use std::fs;

    /// Metadata stub: the pipeline runs without exiftool on PATH.
    pub(crate) struct EmptyMetadata;

    impl MetadataSource for EmptyMetadata {
        fn extract(
            &self,
            paths: &[PathBuf],
            _workers: usize,
        ) -> Result<HashMap<PathBuf, MediaMetadata>> {
            Ok(paths
                .iter()
                .map(|p| (p.clone(), MediaMetadata::default()))
                .collect())
        }
    }

    fn options_for(root: &std::path::Path) -> IndexOptions {
        IndexOptions {
            paths: vec![root.to_path_buf()],
            ..Default::default()
        }
    }

    fn run_index(catalog: &mut Catalog, options: &IndexOptions) -> IndexReport {
        let cancel = AtomicBool::new(false);
        index(catalog, options, &EmptyMetadata, None, &cancel, None).unwrap()
    }

    #[test]
    fn test_index_exact_duplicates_share_uid() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("A")).unwrap();
        fs::create_dir_all(tmp.path().join("B")).unwrap();
        fs::write(tmp.path().join("A/IMG_0001.JPG"), b"same bytes").unwrap();
        fs::write(tmp.path().join("B/IMG_0001.JPG"), b"same bytes").unwrap();

        let mut catalog = Catalog::new(Algorithm::Blake2b256, "local".to_string());
        let report = run_index(&mut catalog, &options_for(tmp.path()));

        assert_eq!(report.num_added, 1);
        assert_eq!(report.num_merged, 1);
        assert_eq!(catalog.uids().len(), 1);
        assert_eq!(catalog.variants(&catalog.uids()[0]).len(), 2);
    }

    #[test]
    fn test_index_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("one.jpg"), b"bytes one").unwrap();

        let mut catalog = Catalog::new(Algorithm::Blake2b256, "local".to_string());
        run_index(&mut catalog, &options_for(tmp.path()));
        let report = run_index(&mut catalog, &options_for(tmp.path()));

        assert_eq!(report.num_added, 0);
        assert_eq!(report.num_skipped, 1);
    }

    #[test]
    fn test_index_uid_stable_across_input_order() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a.jpg");
        let b = tmp.path().join("b.jpg");
        fs::write(&a, b"content a").unwrap();
        fs::write(&b, b"content b").unwrap();

        let mut first = Catalog::new(Algorithm::Blake2b256, "local".to_string());
        let mut opts = options_for(tmp.path());
        opts.paths = vec![a.clone(), b.clone()];
        run_index(&mut first, &opts);

        let mut second = Catalog::new(Algorithm::Blake2b256, "local".to_string());
        opts.paths = vec![b, a];
        run_index(&mut second, &opts);

        assert_eq!(first.uids(), second.uids());
    }

    #[test]
    fn test_index_skip_existing_filters_known_sources() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("one.jpg"), b"bytes one").unwrap();

        let mut catalog = Catalog::new(Algorithm::Blake2b256, "local".to_string());
        run_index(&mut catalog, &options_for(tmp.path()));

        fs::write(tmp.path().join("two.jpg"), b"bytes two").unwrap();
        let mut opts = options_for(tmp.path());
        opts.skip_existing = true;
        let report = run_index(&mut catalog, &opts);

        assert_eq!(report.records.len(), 1);
        assert!(report.records[0].path.ends_with("two.jpg"));
    }

    #[test]
    fn test_index_integrity_check_reports_damaged() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("good.jpg"), b"fine").unwrap();
        fs::write(tmp.path().join("bad.jpg"), b"broken").unwrap();

        let mut catalog = Catalog::new(Algorithm::Blake2b256, "local".to_string());
        let cancel = AtomicBool::new(false);
        let check: Box<IntegrityCheck> =
            Box::new(|p: &std::path::Path| !p.ends_with("bad.jpg"));
        let report = index(
            &mut catalog,
            &options_for(tmp.path()),
            &EmptyMetadata,
            Some(check.as_ref()),
            &cancel,
            None,
        )
        .unwrap();

        assert_eq!(report.num_damaged, 1);
        assert_eq!(report.num_added, 1);
        assert_eq!(catalog.stats().num_photos, 1);
    }

    #[test]
    fn test_index_priority_recorded() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("one.jpg"), b"bytes").unwrap();

        let mut catalog = Catalog::new(Algorithm::Blake2b256, "local".to_string());
        let mut opts = options_for(tmp.path());
        opts.priority = Some(30);
        run_index(&mut catalog, &opts);

        let uid = catalog.uids()[0].clone();
        assert_eq!(catalog.variants(&uid)[0].prio, 30);
    }

    #[test]
    fn test_index_cancelled_early() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("one.jpg"), b"bytes").unwrap();

        let mut catalog = Catalog::new(Algorithm::Blake2b256, "local".to_string());
        let cancel = AtomicBool::new(true);
        let report = index(
            &mut catalog,
            &options_for(tmp.path()),
            &EmptyMetadata,
            None,
            &cancel,
            None,
        )
        .unwrap();

        assert!(report.cancelled);
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_index_filename_datetime_used() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("IMG_20210301_104001.jpg"), b"bytes").unwrap();

        let mut catalog = Catalog::new(Algorithm::Blake2b256, "-0400".to_string());
        run_index(&mut catalog, &options_for(tmp.path()));

        let uid = catalog.uids()[0].clone();
        let photo = &catalog.variants(&uid)[0];
        assert_eq!(photo.dt, "2021:03:01 10:40:01-0400");
        assert_eq!(photo.tzo, Some(-14400));
    }
}

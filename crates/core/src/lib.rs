pub mod catalog;
pub mod cleaner;
pub mod collector;
pub mod dates;
pub mod domain;
pub mod error;
pub mod exiftool;
pub mod hasher;
pub mod indexer;
pub mod scanner;
pub mod storage;
pub mod verifier;

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use catalog::codec;
use catalog::Catalog;
use cleaner::{CleanOptions, CleanProgress, CleanReport};
use collector::{CollectOptions, CollectProgress, CollectReport};
use domain::CatalogStats;
use error::{Error, Result};
use exiftool::MetadataSource;
use hasher::Algorithm;
use indexer::{IndexOptions, IndexProgress, IndexReport, IntegrityCheck};
use log::info;
use verifier::{VerifyOptions, VerifyProgress, VerifySummary};

/// The main entry point: a catalog bound to its file on disk, plus the
/// operations that index, collect, verify, and clean a photo archive.
///
/// The catalog lives in memory and is owned here; workers never touch it.
/// A shared cancellation flag is honored between files by every operation.
pub struct PhotoManager {
    catalog: Catalog,
    db_path: PathBuf,
    cancel: Arc<AtomicBool>,
}

impl PhotoManager {
    /// Open an existing catalog.
    pub fn open(db_path: &Path) -> Result<Self> {
        Ok(Self {
            catalog: codec::load(db_path)?,
            db_path: db_path.to_path_buf(),
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Open a catalog, starting a blank one when the file does not exist.
    pub fn open_or_new(db_path: &Path) -> Result<Self> {
        Ok(Self {
            catalog: codec::load_or_new(db_path)?,
            db_path: db_path.to_path_buf(),
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Create a catalog with the given algorithm and timezone default,
    /// loading an existing file first so its content survives (the old
    /// version is rotated aside on save). Changing the algorithm of a
    /// non-empty catalog is refused.
    pub fn create(db_path: &Path, algorithm: Algorithm, timezone_default: String) -> Result<Self> {
        if db_path.exists() {
            let catalog = codec::load(db_path)?;
            if !catalog.is_empty() && catalog.hash_algorithm() != algorithm {
                return Err(Error::Database(format!(
                    "catalog already uses {}; the hash algorithm is fixed at create time",
                    catalog.hash_algorithm()
                )));
            }
            let mut manager = Self {
                catalog,
                db_path: db_path.to_path_buf(),
                cancel: Arc::new(AtomicBool::new(false)),
            };
            if manager.catalog.is_empty() {
                manager.catalog = Catalog::new(algorithm, timezone_default);
            } else {
                manager.catalog.set_timezone_default(timezone_default);
            }
            return Ok(manager);
        }
        Ok(Self {
            catalog: Catalog::new(algorithm, timezone_default),
            db_path: db_path.to_path_buf(),
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Cooperative cancellation flag, checked between files (never
    /// mid-file). Safe to share with a signal handler.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut Catalog {
        &mut self.catalog
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Index media files into the catalog.
    pub fn index(
        &mut self,
        options: &IndexOptions,
        metadata_source: &dyn MetadataSource,
        integrity: Option<&IntegrityCheck>,
        progress: Option<&mut dyn FnMut(IndexProgress)>,
    ) -> Result<IndexReport> {
        indexer::index(
            &mut self.catalog,
            options,
            metadata_source,
            integrity,
            &self.cancel,
            progress,
        )
    }

    /// Copy the preferred variant of each logical photo into `destination`.
    pub fn collect(
        &mut self,
        destination: &Path,
        options: &CollectOptions,
        progress: Option<&mut dyn FnMut(CollectProgress)>,
    ) -> Result<CollectReport> {
        collector::collect(
            &mut self.catalog,
            destination,
            options,
            &self.cancel,
            progress,
        )
    }

    /// Recompute digests of stored files and compare to the catalog.
    pub fn verify(
        &self,
        destination: &Path,
        options: &VerifyOptions,
        progress: Option<&mut dyn FnMut(VerifyProgress)>,
    ) -> Result<VerifySummary> {
        verifier::verify(&self.catalog, destination, options, &self.cancel, progress)
    }

    /// Remove superseded stored variants under `destination`.
    pub fn clean(
        &mut self,
        destination: &Path,
        options: &CleanOptions,
        progress: Option<&mut dyn FnMut(CleanProgress)>,
    ) -> Result<CleanReport> {
        cleaner::clean(
            &mut self.catalog,
            destination,
            options,
            &self.cancel,
            progress,
        )
    }

    pub fn stats(&self) -> CatalogStats {
        self.catalog.stats()
    }

    /// Record the invoking command and save the catalog if it changed.
    pub fn save(&mut self, argv: &[String]) -> Result<bool> {
        if self.catalog.is_modified() || !self.db_path.exists() {
            self.catalog.add_command(shell_join(argv));
        }
        codec::save_if_modified(&mut self.catalog, &self.db_path)
    }

    /// Save unconditionally, rotating any prior differing version.
    pub fn save_forced(&mut self, argv: &[String]) -> Result<bool> {
        self.catalog.add_command(shell_join(argv));
        codec::save(&mut self.catalog, &self.db_path)
    }

    /// Additionally store a copy of the catalog inside the destination
    /// root, under `database/`.
    pub fn collect_db_copy(&mut self, destination: &Path) -> Result<()> {
        let name = self
            .db_path
            .file_name()
            .ok_or_else(|| Error::Database("catalog path has no file name".to_string()))?;
        let copy_path = destination.join("database").join(name);
        info!("collecting catalog copy to {}", copy_path.display());
        codec::save(&mut self.catalog, &copy_path)?;
        Ok(())
    }
}

/// Reconstruct a shell command line, quoting arguments that need it.
fn shell_join(argv: &[String]) -> String {
    argv.iter()
        .map(|arg| {
            if arg.is_empty()
                || arg
                    .chars()
                    .any(|c| c.is_whitespace() || matches!(c, '\'' | '"' | '\\' | '$' | '`'))
            {
                format!("'{}'", arg.replace('\'', r"'\''"))
            } else {
                arg.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

//! Catalog persistence: JSON with optional gzip or zstd framing, chosen by
//! file extension. Saves are atomic (temp file + rename) and never
//! overwrite a prior version: an existing catalog with different content
//! is renamed aside first.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, info, warn};

use crate::catalog::{schema, Catalog};
use crate::error::{Error, Result};

/// zstd level used for `.zst` catalogs.
const ZSTD_LEVEL: i32 = 9;
const GZIP_LEVEL: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Plain,
    Gzip,
    Zstd,
}

fn framing_for(path: &Path) -> Framing {
    match path.extension().and_then(|e| e.to_str()) {
        Some("gz") => Framing::Gzip,
        Some("zst") => Framing::Zstd,
        _ => Framing::Plain,
    }
}

/// Load a catalog from disk, upgrading older versions in memory.
pub fn load(path: &Path) -> Result<Catalog> {
    if !path.exists() {
        return Err(Error::DatabaseNotFound(path.to_path_buf()));
    }
    let json = read_raw(path)?;
    let value: serde_json::Value = serde_json::from_slice(&json)?;
    let doc = schema::upgrade(value)?;
    let mut catalog = Catalog::from_doc(doc);
    catalog.mark_saved();
    Ok(catalog)
}

/// Load a catalog, or start a fresh one when the file does not exist yet.
pub fn load_or_new(path: &Path) -> Result<Catalog> {
    if path.exists() {
        load(path)
    } else {
        warn!("catalog does not exist, starting with a blank catalog");
        Ok(Catalog::new(Default::default(), crate::dates::LOCAL_TIMEZONE.to_string()))
    }
}

fn read_raw(path: &Path) -> Result<Vec<u8>> {
    let raw = fs::read(path)?;
    match framing_for(path) {
        Framing::Plain => Ok(raw),
        Framing::Gzip => {
            let mut json = Vec::new();
            GzDecoder::new(raw.as_slice()).read_to_end(&mut json)?;
            Ok(json)
        }
        Framing::Zstd => zstd::decode_all(raw.as_slice()).map_err(Error::from),
    }
}

fn encode(json: &[u8], framing: Framing) -> Result<Vec<u8>> {
    match framing {
        Framing::Plain => Ok(json.to_vec()),
        Framing::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::new(GZIP_LEVEL));
            encoder.write_all(json)?;
            encoder.finish().map_err(Error::from)
        }
        Framing::Zstd => zstd::encode_all(json, ZSTD_LEVEL).map_err(Error::from),
    }
}

/// Split `photos.json.gz` into (`photos`, `.json.gz`).
fn split_suffixes(path: &Path) -> (String, String) {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    match name.split_once('.') {
        Some((stem, rest)) => (stem.to_string(), format!(".{rest}")),
        None => (name, String::new()),
    }
}

/// Name for rotating an existing catalog aside:
/// `<stem>_<YYYYMMDD>_<HHMMSS>_<digest7><suffixes>`, from the old file's
/// mtime and content digest.
fn rotated_path(path: &Path, old_bytes: &[u8]) -> Result<PathBuf> {
    let mtime = fs::metadata(path)?.modified()?;
    let stamp = DateTime::<Local>::from(mtime).format("%Y%m%d_%H%M%S");
    let digest = blake3::hash(old_bytes).to_hex();
    let (stem, suffixes) = split_suffixes(path);
    let rotated = format!("{stem}_{stamp}_{}{suffixes}", &digest.as_str()[..7]);
    Ok(path.with_file_name(rotated))
}

/// Save a catalog to `path`, rotating any differing prior version aside.
/// Returns false when the on-disk bytes were already identical.
pub fn save(catalog: &mut Catalog, path: &Path) -> Result<bool> {
    let json = serde_json::to_vec(catalog.doc())?;
    let encoded = encode(&json, framing_for(path))?;

    if path.exists() {
        let old_bytes = fs::read(path)?;
        if old_bytes == encoded {
            debug!("catalog at {} is unchanged on disk", path.display());
            catalog.mark_saved();
            return Ok(false);
        }
        let rotated = rotated_path(path, &old_bytes)?;
        info!(
            "rotating previous catalog to {}",
            rotated.file_name().unwrap_or_default().to_string_lossy()
        );
        fs::rename(path, &rotated)?;
    }

    write_atomic(path, &encoded)?;
    catalog.mark_saved();
    Ok(true)
}

/// Save only when the in-memory catalog differs from its last loaded or
/// saved state.
pub fn save_if_modified(catalog: &mut Catalog, path: &Path) -> Result<bool> {
    if !catalog.is_modified() && path.exists() {
        info!("catalog was not modified and will not be saved");
        return Ok(false);
    }
    save(catalog, path)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(dir) = dir {
        fs::create_dir_all(dir)?;
    }
    let mut tmp = tempfile::NamedTempFile::new_in(dir.unwrap_or(Path::new(".")))?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .map_err(|e| Error::Io(e.error))?;
    Ok(())
}

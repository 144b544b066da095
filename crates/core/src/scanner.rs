//! Candidate discovery: walk source trees, keep media files, apply exclude
//! patterns, and hand the indexer a sorted, de-duplicated path list.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use glob::Pattern;
use log::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{Error, Result};

// Extension sets mirror what exiftool can describe; anything else is noise
// (sidecars, databases, edit lists) and is skipped up front.
#[rustfmt::skip]
const PHOTO_EXTENSIONS: &[&str] = &[
    "jpeg", "jpg", "png", "apng", "gif", "nef", "cr2", "orf", "tif", "tiff", "ico",
    "bmp", "dng", "arw", "rw2", "heic", "avif", "heif", "heics", "heifs", "avics",
    "avci", "avcs", "mng", "webp", "psd", "jp2", "psb",
];
#[rustfmt::skip]
const VIDEO_EXTENSIONS: &[&str] = &[
    "mov", "mp4", "m4v", "avi", "mpg", "mpeg", "avchd", "mts", "ts", "m2ts", "3gp",
    "gifv", "mkv", "asf", "ogg", "webm", "flv", "3g2", "svi", "mpv",
];
#[rustfmt::skip]
const AUDIO_EXTENSIONS: &[&str] = &[
    "m4a", "ogg", "aiff", "wav", "flac", "caf", "mp3",
];

/// Whether a lowercase extension names an indexable media type.
pub fn is_media_extension(ext: &str) -> bool {
    PHOTO_EXTENSIONS.contains(&ext)
        || VIDEO_EXTENSIONS.contains(&ext)
        || AUDIO_EXTENSIONS.contains(&ext)
}

fn has_media_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| is_media_extension(e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn compile_patterns(excludes: &[String]) -> Vec<Pattern> {
    excludes
        .iter()
        .filter_map(|raw| match Pattern::new(raw) {
            Ok(pattern) => Some(pattern),
            Err(e) => {
                warn!("ignoring invalid exclude pattern '{raw}': {e}");
                None
            }
        })
        .collect()
}

fn is_excluded(path: &Path, patterns: &[Pattern]) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    patterns.iter().any(|p| p.matches(name))
}

/// List all media files under `roots`, excluding glob patterns matched
/// against the file basename. Directories are recursed; plain files are
/// accepted verbatim. A root path that does not exist is an error. The
/// result is sorted by absolute path so downstream uid allocation is
/// deterministic for a given input set.
pub fn list_files(roots: &[PathBuf], excludes: &[String]) -> Result<Vec<PathBuf>> {
    let patterns = compile_patterns(excludes);
    let mut files: BTreeSet<PathBuf> = BTreeSet::new();
    let mut skipped_extensions: BTreeSet<String> = BTreeSet::new();

    for root in roots {
        if !root.exists() {
            return Err(Error::SourceNotFound(root.clone()));
        }
        let root = match root.canonicalize() {
            Ok(p) => p,
            Err(e) => {
                warn!("skipping unreadable path {}: {e}", root.display());
                continue;
            }
        };

        if root.is_file() {
            consider(&root, &patterns, &mut files, &mut skipped_extensions);
            continue;
        }

        for entry in WalkDir::new(&root).into_iter() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("walk error under {}: {e}", root.display());
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            consider(entry.path(), &patterns, &mut files, &mut skipped_extensions);
        }
    }

    if !skipped_extensions.is_empty() {
        info!(
            "skipped extensions: {}",
            skipped_extensions.into_iter().collect::<Vec<_>>().join(", ")
        );
    }

    Ok(files.into_iter().collect())
}

fn consider(
    path: &Path,
    patterns: &[Pattern],
    files: &mut BTreeSet<PathBuf>,
    skipped_extensions: &mut BTreeSet<String>,
) {
    if !has_media_extension(path) {
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            skipped_extensions.insert(ext.to_ascii_lowercase());
        }
        return;
    }
    if is_excluded(path, patterns) {
        debug!("excluded: {}", path.display());
        return;
    }
    files.insert(path.to_path_buf());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_list_files_recursive_and_sorted() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("b/two.jpg"));
        touch(&tmp.path().join("a/one.nef"));
        touch(&tmp.path().join("a/notes.txt"));

        let files = list_files(&[tmp.path().to_path_buf()], &[]).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("a/one.nef"));
        assert!(files[1].ends_with("b/two.jpg"));
    }

    #[test]
    fn test_list_files_accepts_single_file() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("clip.mp4");
        touch(&file);

        let files = list_files(&[file.clone()], &[]).unwrap();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_list_files_exclude_basename_glob() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("keep.jpg"));
        touch(&tmp.path().join("thumb_small.jpg"));

        let files =
            list_files(&[tmp.path().to_path_buf()], &["thumb_*".to_string()]).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("keep.jpg"));
    }

    #[test]
    fn test_list_files_case_insensitive_extensions() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("IMG_0001.JPG"));

        let files = list_files(&[tmp.path().to_path_buf()], &[]).unwrap();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_list_files_dedupes_overlapping_roots() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("a/one.jpg");
        touch(&file);

        let files = list_files(&[tmp.path().to_path_buf(), file.clone()], &[]).unwrap();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_list_files_missing_root_errors() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("one.jpg"));

        let err = list_files(
            &[tmp.path().to_path_buf(), PathBuf::from("/no/such/dir")],
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, Error::SourceNotFound(p) if p == PathBuf::from("/no/such/dir")));
    }

    #[test]
    fn test_invalid_exclude_pattern_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("one.jpg"));

        let files = list_files(&[tmp.path().to_path_buf()], &["[".to_string()]).unwrap();
        assert_eq!(files.len(), 1);
    }
}

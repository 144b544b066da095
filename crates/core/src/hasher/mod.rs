use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

use blake2::digest::consts::U32;
use blake2::Blake2b;
use rayon::prelude::*;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// 32-byte Blake2b, equivalent to `b2sum -l 256`.
type Blake2b256 = Blake2b<U32>;

const BLOCK_SIZE: usize = 64 * 1024;

/// Content digest algorithm recorded in the catalog.
///
/// The catalog fixes its algorithm at create time; every checksum in a
/// catalog is produced by the same algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum Algorithm {
    #[default]
    #[serde(rename = "blake2b-256")]
    Blake2b256,
    #[serde(rename = "blake3")]
    Blake3,
    #[serde(rename = "sha256")]
    Sha256,
}

impl Algorithm {
    pub const ALL: [Algorithm; 3] = [Algorithm::Blake2b256, Algorithm::Blake3, Algorithm::Sha256];

    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Blake2b256 => "blake2b-256",
            Algorithm::Blake3 => "blake3",
            Algorithm::Sha256 => "sha256",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "blake2b-256" => Ok(Algorithm::Blake2b256),
            "blake3" => Ok(Algorithm::Blake3),
            "sha256" => Ok(Algorithm::Sha256),
            other => Err(Error::UnknownAlgorithm(other.to_string())),
        }
    }
}

/// Compute the content digest of a file using streaming I/O.
/// Reads in 64KB chunks to avoid loading large files entirely into memory.
pub fn file_checksum(path: &Path, algorithm: Algorithm) -> Result<String> {
    let file = File::open(path).map_err(|e| Error::Hash {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let mut reader = BufReader::with_capacity(BLOCK_SIZE, file);

    let hash = match algorithm {
        Algorithm::Blake2b256 => digest_reader::<Blake2b256>(&mut reader),
        Algorithm::Sha256 => digest_reader::<Sha256>(&mut reader),
        Algorithm::Blake3 => {
            let mut hasher = blake3::Hasher::new();
            let mut buf = [0u8; BLOCK_SIZE];
            loop {
                let n = match reader.read(&mut buf) {
                    Ok(n) => n,
                    Err(e) => {
                        return Err(Error::Hash {
                            path: path.to_path_buf(),
                            message: e.to_string(),
                        })
                    }
                };
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            Ok(hasher.finalize().to_hex().to_string())
        }
    };

    hash.map_err(|e| Error::Hash {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn digest_reader<D: Digest>(reader: &mut impl Read) -> std::io::Result<String> {
    let mut hasher = D::new();
    let mut buf = [0u8; BLOCK_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Per-path results of a batch digest run. Errors are per-path and never
/// abort the batch; a cancelled run simply omits the unprocessed paths.
pub type BatchDigests = HashMap<PathBuf, Result<String>>;

/// Digest a batch of files on a dedicated pool of `workers` threads.
///
/// Result ordering is unspecified; completeness is guaranteed unless the
/// cancellation flag is raised, which is honored between files.
pub fn hash_batch(
    paths: &[PathBuf],
    algorithm: Algorithm,
    workers: usize,
    cancel: &AtomicBool,
) -> Result<BatchDigests> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build()
        .map_err(|e| Error::Hash {
            path: PathBuf::new(),
            message: format!("failed to build digest pool: {e}"),
        })?;

    let results: Vec<(PathBuf, Result<String>)> = pool.install(|| {
        paths
            .par_iter()
            .filter(|_| !cancel.load(Ordering::Relaxed))
            .map(|path| (path.clone(), file_checksum(path, algorithm)))
            .collect()
    });

    Ok(results.into_iter().collect())
}

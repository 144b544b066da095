use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::dates;

/// Priority assigned at index time when none is given. Lower is preferred.
pub const DEFAULT_PRIORITY: i32 = 10;

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

/// One captured variant of a logical photo.
///
/// Field names are the catalog's short keys; declaration order is the
/// serialization order. `src` is informational only; identity is the
/// content checksum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoFile {
    /// Content checksum under the catalog's hash algorithm.
    pub chk: String,
    /// Absolute path where the file was found at index time.
    pub src: String,
    /// Best estimated capture datetime, always offset-aware.
    pub dt: String,
    /// POSIX seconds of `dt`.
    pub ts: f64,
    /// File size in bytes at index time.
    pub fsz: u64,
    /// Relative store path under the destination root; empty if not stored.
    #[serde(default)]
    pub sto: String,
    /// Priority; lower is preferred.
    #[serde(default = "default_priority")]
    pub prio: i32,
    /// Offset (seconds) applied to a timezone-naive capture datetime.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tzo: Option<i32>,
}

impl PhotoFile {
    pub fn is_stored(&self) -> bool {
        !self.sto.is_empty()
    }

    /// Final path component of `src`.
    pub fn basename(&self) -> &str {
        self.src
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(self.src.as_str())
    }

    /// The capture instant expressed in the variant's own offset: `tzo`
    /// when the datetime was promoted, else the offset embedded in `dt`,
    /// else UTC.
    pub fn local_datetime(&self) -> DateTime<FixedOffset> {
        let offset = self
            .tzo
            .and_then(FixedOffset::east_opt)
            .or_else(|| {
                let tail = self.dt.len().checked_sub(5).map(|i| &self.dt[i..])?;
                dates::parse_offset(tail)
            })
            .unwrap_or_else(|| FixedOffset::east_opt(0).expect("utc offset"));
        DateTime::from_timestamp(self.ts as i64, 0)
            .unwrap_or_default()
            .with_timezone(&offset)
    }
}

/// How the catalog resolved an incoming `PhotoFile`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// A new uid bucket was created.
    Inserted,
    /// Appended to an existing bucket, by checksum or by
    /// timestamp+basename.
    Merged,
    /// The identical checksum+source pair was already present; nothing
    /// changed.
    Duplicate,
}

/// Catalog item statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogStats {
    pub num_uids: usize,
    pub num_photos: usize,
    pub num_stored: usize,
    pub total_stored_bytes: u64,
}

//! Capture-datetime resolution.
//!
//! A file's best-estimate capture time comes from, in order: EXIF
//! `DateTimeOriginal`, `CreateDate`, `ModifyDate`, a datetime embedded in
//! the filename, `FileModifyDate` as reported by exiftool, and finally the
//! filesystem mtime. Timezone-naive candidates are promoted with the
//! catalog's default offset and the promotion is recorded in `tzo`.

use std::path::Path;

use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, Offset, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};
use crate::exiftool::MediaMetadata;

/// Sentinel value for "use the host's current local offset".
pub const LOCAL_TIMEZONE: &str = "local";

/// The datetime format stored in `PhotoFile::dt`: always offset-aware.
const DT_FORMAT: &str = "%Y:%m:%d %H:%M:%S%z";

/// A parsed capture datetime, before offset promotion.
#[derive(Debug, Clone, PartialEq)]
enum Parsed {
    Aware(DateTime<FixedOffset>),
    Naive(NaiveDateTime),
}

/// The resolved capture datetime of one file.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedDate {
    /// `YYYY:MM:DD HH:MM:SS±ZZZZ`
    pub dt: String,
    /// POSIX seconds.
    pub ts: f64,
    /// Offset applied to a naive source, in seconds. `None` when the source
    /// carried its own offset.
    pub tzo: Option<i32>,
}

/// The host's current UTC offset.
pub fn host_offset() -> FixedOffset {
    Local::now().offset().fix()
}

/// Parse a `±HHMM` offset string.
pub fn parse_offset(s: &str) -> Option<FixedOffset> {
    let bytes = s.as_bytes();
    if !s.is_ascii() || bytes.len() != 5 || (bytes[0] != b'+' && bytes[0] != b'-') {
        return None;
    }
    let hours: i32 = s[1..3].parse().ok()?;
    let minutes: i32 = s[3..5].parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    let seconds = hours * 3600 + minutes * 60;
    if bytes[0] == b'-' {
        FixedOffset::west_opt(seconds)
    } else {
        FixedOffset::east_opt(seconds)
    }
}

/// Resolve the catalog's `timezone_default` into a concrete offset.
pub fn default_offset(timezone_default: &str) -> Result<FixedOffset> {
    if timezone_default == LOCAL_TIMEZONE {
        return Ok(host_offset());
    }
    parse_offset(timezone_default)
        .ok_or_else(|| Error::InvalidTimezone(timezone_default.to_string()))
}

/// Parse an EXIF-style datetime string. Accepts second and minute
/// resolution, an optional fractional part, and an optional UTC offset.
fn parse_exif_datetime(s: &str) -> Option<Parsed> {
    let s = s.trim();
    for fmt in ["%Y:%m:%d %H:%M:%S%.f%z", "%Y:%m:%d %H:%M%z"] {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(Parsed::Aware(dt));
        }
    }
    for fmt in ["%Y:%m:%d %H:%M:%S%.f", "%Y:%m:%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Parsed::Naive(dt));
        }
    }
    None
}

static FILENAME_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        // 2021-03-01_10-40-01, 2021-03-01 10.40.01, Screen Shot 2021-03-01 at 10.40.01
        Regex::new(r"(\d{4})-(\d{2})-(\d{2})(?:[_ ]| at )(\d{2})[-.](\d{2})[-.](\d{2})").unwrap(),
        // 20210301_104001, also prefixed as IMG_… or VID_…
        Regex::new(r"(\d{4})(\d{2})(\d{2})_(\d{2})(\d{2})(\d{2})").unwrap(),
    ]
});

/// Extract a naive datetime embedded in a file name, if any.
fn datetime_from_filename(file_name: &str) -> Option<NaiveDateTime> {
    for pattern in FILENAME_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(file_name) {
            let field = |i: usize| caps[i].parse::<u32>().ok();
            let date = NaiveDate::from_ymd_opt(caps[1].parse().ok()?, field(2)?, field(3)?)?;
            let dt = date.and_hms_opt(field(4)?, field(5)?, field(6)?)?;
            return Some(dt);
        }
    }
    None
}

fn promote(parsed: Parsed, default: FixedOffset) -> ResolvedDate {
    match parsed {
        Parsed::Aware(dt) => ResolvedDate {
            dt: dt.format(DT_FORMAT).to_string(),
            ts: dt.timestamp() as f64,
            tzo: None,
        },
        Parsed::Naive(naive) => {
            let dt = default
                .from_local_datetime(&naive)
                .single()
                .unwrap_or_else(|| Utc.from_utc_datetime(&naive).fixed_offset());
            ResolvedDate {
                dt: dt.format(DT_FORMAT).to_string(),
                ts: dt.timestamp() as f64,
                tzo: Some(default.local_minus_utc()),
            }
        }
    }
}

/// Resolve the best available capture datetime for `path`.
///
/// Never fails outright on bad metadata: only the final filesystem-mtime
/// fallback can return an error, when the file itself is unreadable.
pub fn resolve_datetime(
    meta: &MediaMetadata,
    path: &Path,
    default: FixedOffset,
) -> Result<ResolvedDate> {
    let exif_candidates = [
        meta.date_time_original.as_deref(),
        meta.create_date.as_deref(),
        meta.modify_date.as_deref(),
    ];
    for candidate in exif_candidates.into_iter().flatten() {
        if let Some(parsed) = parse_exif_datetime(candidate) {
            return Ok(promote(parsed, default));
        }
    }

    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        if let Some(naive) = datetime_from_filename(name) {
            return Ok(promote(Parsed::Naive(naive), default));
        }
    }

    if let Some(candidate) = meta.file_modify_date.as_deref() {
        if let Some(parsed) = parse_exif_datetime(candidate) {
            return Ok(promote(parsed, default));
        }
    }

    let mtime = std::fs::metadata(path)?.modified()?;
    let dt = DateTime::<Utc>::from(mtime).with_timezone(&default);
    Ok(promote(Parsed::Aware(dt), default))
}

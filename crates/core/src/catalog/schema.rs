//! Catalog document schema and version upgrades.
//!
//! ## Versioning strategy
//!
//! The catalog JSON carries a `version` field. [`upgrade`] rewrites any
//! accepted older document into the current shape in memory; nothing is
//! written back until the next save.
//!
//! - **v1**: long photo field names (`checksum`, `source_path`, ...); the
//!   hash algorithm was implicitly `sha256` and all times were local.
//! - **v2**: short keys (`chk`, `src`, ...), adds `tz_offset`.
//! - **v3** (current): adds `timezone_default`; the offset field is `tzo`
//!   and marks datetimes that were promoted from a naive source.
//!
//! A document newer than [`CATALOG_VERSION`] fails with
//! [`Error::VersionTooNew`] so the user knows to upgrade photomanager.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dates;
use crate::domain::PhotoFile;
use crate::error::{Error, Result};
use crate::hasher::Algorithm;

/// Current catalog document version. Bump when the shape changes.
pub const CATALOG_VERSION: u32 = 3;

/// Mapping from v1 long photo keys to the current short keys.
const V1_KEY_MAP: [(&str, &str); 8] = [
    ("checksum", "chk"),
    ("source_path", "src"),
    ("datetime", "dt"),
    ("timestamp", "ts"),
    ("file_size", "fsz"),
    ("store_path", "sto"),
    ("priority", "prio"),
    ("tz_offset", "tzo"),
];

/// The persisted catalog document. Field order is the serialization order;
/// maps are sorted by key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogDoc {
    pub version: u32,
    pub hash_algorithm: Algorithm,
    pub timezone_default: String,
    pub photo_db: BTreeMap<String, Vec<PhotoFile>>,
    pub command_history: BTreeMap<String, String>,
}

impl CatalogDoc {
    pub fn new(hash_algorithm: Algorithm, timezone_default: String) -> Self {
        Self {
            version: CATALOG_VERSION,
            hash_algorithm,
            timezone_default,
            photo_db: BTreeMap::new(),
            command_history: BTreeMap::new(),
        }
    }
}

impl Default for CatalogDoc {
    fn default() -> Self {
        Self::new(Algorithm::default(), dates::LOCAL_TIMEZONE.to_string())
    }
}

fn read_version(root: &serde_json::Map<String, Value>) -> Result<u32> {
    match root.get("version") {
        None => Ok(1),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(|v| v as u32)
            .ok_or_else(|| Error::Database(format!("invalid catalog version: {n}"))),
        Some(Value::String(s)) => s
            .parse()
            .map_err(|_| Error::Database(format!("invalid catalog version: {s:?}"))),
        Some(other) => Err(Error::Database(format!("invalid catalog version: {other}"))),
    }
}

/// Upgrade a raw catalog document to the current version.
pub fn upgrade(value: Value) -> Result<CatalogDoc> {
    let Value::Object(mut root) = value else {
        return Err(Error::Database("catalog root must be an object".to_string()));
    };

    let version = read_version(&root)?;
    if version > CATALOG_VERSION {
        return Err(Error::VersionTooNew {
            found: version,
            supported: CATALOG_VERSION,
        });
    }

    if let Some(Value::Object(photo_db)) = root.get_mut("photo_db") {
        for photos in photo_db.values_mut() {
            let Value::Array(photos) = photos else { continue };
            for photo in photos.iter_mut() {
                let Value::Object(fields) = photo else { continue };
                if version < 2 {
                    for (long, short) in V1_KEY_MAP {
                        if let Some(v) = fields.remove(long) {
                            fields.insert(short.to_string(), v);
                        }
                    }
                }
                // Older writers stored the offset as a float of seconds.
                if let Some(Value::Number(n)) = fields.get("tzo") {
                    if let Some(f) = n.as_f64() {
                        if n.as_i64().is_none() {
                            fields.insert("tzo".to_string(), Value::from(f as i64));
                        }
                    }
                }
            }
        }
    }

    // Legacy catalogs predate the algorithm and timezone fields.
    root.entry("hash_algorithm")
        .or_insert_with(|| Value::from("sha256"));
    root.entry("timezone_default")
        .or_insert_with(|| Value::from(dates::LOCAL_TIMEZONE));
    root.entry("photo_db").or_insert_with(|| Value::Object(Default::default()));
    root.entry("command_history")
        .or_insert_with(|| Value::Object(Default::default()));
    root.insert("version".to_string(), Value::from(CATALOG_VERSION));

    serde_json::from_value(Value::Object(root)).map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_upgrade_v1_long_keys() {
        let v1 = json!({
            "photo_db": {
                "abcd1234abcd1234": [{
                    "checksum": "deadbeef",
                    "source_path": "/photos/a.jpg",
                    "datetime": "2015:08:27 04:09:36+0000",
                    "timestamp": 1440648576.0,
                    "file_size": 1024,
                    "store_path": "",
                    "priority": 10
                }]
            },
            "command_history": {}
        });

        let doc = upgrade(v1).unwrap();
        assert_eq!(doc.version, CATALOG_VERSION);
        assert_eq!(doc.hash_algorithm, Algorithm::Sha256);
        assert_eq!(doc.timezone_default, "local");

        let photo = &doc.photo_db["abcd1234abcd1234"][0];
        assert_eq!(photo.chk, "deadbeef");
        assert_eq!(photo.src, "/photos/a.jpg");
        assert_eq!(photo.tzo, None);
    }

    #[test]
    fn test_upgrade_v1_float_tz_offset() {
        let v1 = json!({
            "version": 1,
            "photo_db": {
                "u": [{
                    "checksum": "c", "source_path": "/a.jpg",
                    "datetime": "2015:08:27 04:09:36-0400",
                    "timestamp": 1440662976.0, "file_size": 1,
                    "tz_offset": -14400.0
                }]
            },
            "command_history": {}
        });
        let doc = upgrade(v1).unwrap();
        assert_eq!(doc.photo_db["u"][0].tzo, Some(-14400));
    }

    #[test]
    fn test_upgrade_current_version_is_identity() {
        let doc = CatalogDoc::new(Algorithm::Blake3, "-0400".to_string());
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(upgrade(value).unwrap(), doc);
    }

    #[test]
    fn test_upgrade_rejects_newer_version() {
        let err = upgrade(json!({"version": 99, "photo_db": {}, "command_history": {}}))
            .unwrap_err();
        assert!(matches!(err, Error::VersionTooNew { found: 99, .. }));
    }

    #[test]
    fn test_upgrade_accepts_string_version() {
        let doc = upgrade(json!({"version": "2", "photo_db": {}, "command_history": {}}))
            .unwrap();
        assert_eq!(doc.version, CATALOG_VERSION);
    }

    #[test]
    fn test_upgrade_rejects_non_object_root() {
        assert!(upgrade(json!([1, 2, 3])).is_err());
    }
}

//! Batched metadata extraction through Phil Harvey's `exiftool`.
//!
//! One `exiftool -stay_open True -@ -` subprocess is kept alive per worker
//! and fed argfile blocks terminated by `-execute`; each block's JSON reply
//! ends with the `{ready}` sentinel on stdout. Running the tool in batch
//! mode amortizes its startup cost over hundreds of files.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use log::{debug, warn};
use serde_json::Value;

use crate::error::{Error, Result};

const SENTINEL: &str = "{ready}";
const DEFAULT_BATCH_SIZE: usize = 200;

/// Tags requested from exiftool, in the order they matter to the date
/// resolver.
const TAGS: [&str; 7] = [
    "DateTimeOriginal",
    "CreateDate",
    "ModifyDate",
    "FileModifyDate",
    "FileSize",
    "MIMEType",
    "FileType",
];

/// Fixed-shape capture metadata for one file. Exiftool output is dynamic;
/// fields that are absent or unparseable are simply `None`, and a file with
/// no recoverable metadata yields `MediaMetadata::default()`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaMetadata {
    pub date_time_original: Option<String>,
    pub create_date: Option<String>,
    pub modify_date: Option<String>,
    pub file_modify_date: Option<String>,
    pub file_size: Option<u64>,
    pub mime_type: Option<String>,
    pub file_type: Option<String>,
}

impl MediaMetadata {
    fn from_value(value: &Value) -> Self {
        Self {
            date_time_original: string_field(value, "DateTimeOriginal"),
            create_date: string_field(value, "CreateDate"),
            modify_date: string_field(value, "ModifyDate"),
            file_modify_date: string_field(value, "FileModifyDate"),
            file_size: u64_field(value, "FileSize"),
            mime_type: string_field(value, "MIMEType"),
            file_type: string_field(value, "FileType"),
        }
    }
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn u64_field(value: &Value, key: &str) -> Option<u64> {
    match value.get(key) {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    }
}

/// Source of capture metadata for a set of files.
///
/// The indexer only needs this contract; tests substitute a stub so the
/// pipeline can run without exiftool on PATH.
pub trait MetadataSource: Sync {
    /// Extract metadata for every path. The result map is complete: paths
    /// the tool could not describe map to an empty record.
    fn extract(&self, paths: &[PathBuf], workers: usize) -> Result<HashMap<PathBuf, MediaMetadata>>;
}

/// The production extractor: `exiftool` on PATH in persistent batch mode.
pub struct ExifTool {
    executable: String,
    batch_size: usize,
}

impl Default for ExifTool {
    fn default() -> Self {
        Self {
            executable: "exiftool".to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl ExifTool {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

impl MetadataSource for ExifTool {
    fn extract(&self, paths: &[PathBuf], workers: usize) -> Result<HashMap<PathBuf, MediaMetadata>> {
        let mut results: HashMap<PathBuf, MediaMetadata> =
            paths.iter().map(|p| (p.clone(), MediaMetadata::default())).collect();
        if paths.is_empty() {
            return Ok(results);
        }

        let workers = workers.clamp(1, paths.len().div_ceil(self.batch_size).max(1));

        // Spawn every subprocess up front so a missing executable is a fatal
        // error rather than a per-batch warning.
        let mut processes = Vec::with_capacity(workers);
        for _ in 0..workers {
            processes.push(ExifProcess::spawn(&self.executable)?);
        }

        let (batch_tx, batch_rx) = mpsc::channel::<Vec<PathBuf>>();
        for chunk in paths.chunks(self.batch_size) {
            batch_tx.send(chunk.to_vec()).expect("receiver alive");
        }
        drop(batch_tx);
        let batch_rx = Arc::new(Mutex::new(batch_rx));

        let (out_tx, out_rx) = mpsc::channel::<(Vec<PathBuf>, Vec<Value>)>();

        std::thread::scope(|scope| {
            for mut process in processes.drain(..) {
                let batch_rx = Arc::clone(&batch_rx);
                let out_tx = out_tx.clone();
                let executable = self.executable.clone();
                scope.spawn(move || {
                    loop {
                        let batch = match batch_rx.lock().expect("queue lock").recv() {
                            Ok(batch) => batch,
                            Err(_) => break,
                        };
                        let records = match process.query(&batch) {
                            Ok(records) => records,
                            Err(e) => {
                                warn!("exiftool worker failed on a batch: {e}");
                                // The subprocess may have died; try once to
                                // respawn before giving up on this batch.
                                match ExifProcess::spawn(&executable) {
                                    Ok(fresh) => process = fresh,
                                    Err(e) => warn!("exiftool respawn failed: {e}"),
                                }
                                Vec::new()
                            }
                        };
                        if out_tx.send((batch, records)).is_err() {
                            break;
                        }
                    }
                    process.shutdown();
                });
            }
            drop(out_tx);

            for (batch, records) in out_rx {
                let mut by_source: HashMap<String, MediaMetadata> = HashMap::new();
                for record in &records {
                    if let Some(source) = string_field(record, "SourceFile") {
                        by_source.insert(source, MediaMetadata::from_value(record));
                    }
                }
                for path in batch {
                    let key = path.to_string_lossy().to_string();
                    if let Some(meta) = by_source.remove(&key) {
                        results.insert(path, meta);
                    } else {
                        debug!("no exiftool record for {}", path.display());
                    }
                }
            }
        });

        Ok(results)
    }
}

/// One persistent exiftool subprocess.
struct ExifProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl ExifProcess {
    fn spawn(executable: &str) -> Result<Self> {
        let mut child = Command::new(executable)
            .args(["-stay_open", "True", "-@", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::Exif(format!("failed to start {executable}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Exif("exiftool stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .map(BufReader::new)
            .ok_or_else(|| Error::Exif("exiftool stdout unavailable".to_string()))?;

        Ok(Self { child, stdin, stdout })
    }

    /// Send one batch of paths and parse the JSON array reply.
    fn query(&mut self, paths: &[PathBuf]) -> Result<Vec<Value>> {
        let mut block = String::from("-j\n-n\n");
        for tag in TAGS {
            block.push('-');
            block.push_str(tag);
            block.push('\n');
        }
        for path in paths {
            block.push_str(&path.to_string_lossy());
            block.push('\n');
        }
        block.push_str("-execute\n");

        self.stdin
            .write_all(block.as_bytes())
            .and_then(|_| self.stdin.flush())
            .map_err(|e| Error::Exif(format!("failed to write to exiftool: {e}")))?;

        let mut payload = String::new();
        loop {
            let mut line = String::new();
            let n = self
                .stdout
                .read_line(&mut line)
                .map_err(|e| Error::Exif(format!("failed to read from exiftool: {e}")))?;
            if n == 0 {
                return Err(Error::Exif("exiftool closed its output".to_string()));
            }
            if line.trim_end() == SENTINEL {
                break;
            }
            payload.push_str(&line);
        }

        let trimmed = payload.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }
        match serde_json::from_str::<Value>(trimmed) {
            Ok(Value::Array(records)) => Ok(records),
            Ok(_) => {
                warn!("unexpected exiftool output shape; treating batch as empty");
                Ok(Vec::new())
            }
            Err(e) => {
                warn!("unparseable exiftool output: {e}");
                Ok(Vec::new())
            }
        }
    }

    fn shutdown(mut self) {
        let _ = self.stdin.write_all(b"-stay_open\nFalse\n");
        let _ = self.stdin.flush();
        let _ = self.child.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_metadata_from_complete_record() {
        let record = json!({
            "SourceFile": "/photos/img1.jpg",
            "DateTimeOriginal": "2015:08:27 04:09:36",
            "CreateDate": "2015:08:27 04:09:36",
            "ModifyDate": "2015:08:28 10:00:00",
            "FileModifyDate": "2015:08:28 10:00:00-04:00",
            "FileSize": 771898,
            "MIMEType": "image/jpeg",
            "FileType": "JPEG"
        });
        let meta = MediaMetadata::from_value(&record);
        assert_eq!(meta.date_time_original.as_deref(), Some("2015:08:27 04:09:36"));
        assert_eq!(meta.file_size, Some(771898));
        assert_eq!(meta.file_type.as_deref(), Some("JPEG"));
    }

    #[test]
    fn test_metadata_tolerates_malformed_fields() {
        let record = json!({
            "SourceFile": "/photos/odd.jpg",
            "DateTimeOriginal": 0,
            "FileSize": "12345",
            "MIMEType": null
        });
        let meta = MediaMetadata::from_value(&record);
        // Numeric datetime survives as a string for the resolver to reject
        assert_eq!(meta.date_time_original.as_deref(), Some("0"));
        assert_eq!(meta.file_size, Some(12345));
        assert!(meta.mime_type.is_none());
    }

    #[test]
    fn test_metadata_empty_record() {
        let record = json!({ "SourceFile": "/photos/blank.jpg" });
        assert_eq!(MediaMetadata::from_value(&record), MediaMetadata::default());
    }

    #[test]
    fn test_missing_executable_is_fatal() {
        let tool = ExifTool::new("definitely-not-exiftool-on-path");
        let err = tool
            .extract(&[PathBuf::from("/tmp/x.jpg")], 1)
            .unwrap_err();
        assert!(err.to_string().contains("failed to start"));
    }
}

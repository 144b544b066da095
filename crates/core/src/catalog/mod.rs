pub mod codec;
pub mod schema;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::Local;
use log::warn;

use crate::domain::{AddOutcome, CatalogStats, PhotoFile};
use crate::hasher::Algorithm;
use self::schema::CatalogDoc;

/// The in-memory photo catalog: uid buckets of [`PhotoFile`] variants plus
/// derived lookup indexes.
///
/// Invariants maintained here:
/// - a uid bucket is non-empty and its key never changes;
/// - two variants with the same checksum live in the same bucket;
/// - the derived indexes are updated alongside every mutation and are
///   never persisted.
pub struct Catalog {
    doc: CatalogDoc,
    hash_to_uid: HashMap<String, String>,
    timestamp_to_uids: BTreeMap<i64, BTreeSet<String>>,
    saved_fingerprint: Option<blake3::Hash>,
}

impl Catalog {
    pub fn new(hash_algorithm: Algorithm, timezone_default: String) -> Self {
        Self {
            doc: CatalogDoc::new(hash_algorithm, timezone_default),
            hash_to_uid: HashMap::new(),
            timestamp_to_uids: BTreeMap::new(),
            saved_fingerprint: None,
        }
    }

    pub(crate) fn from_doc(doc: CatalogDoc) -> Self {
        let mut catalog = Self {
            doc,
            hash_to_uid: HashMap::new(),
            timestamp_to_uids: BTreeMap::new(),
            saved_fingerprint: None,
        };
        catalog.rebuild_indexes();
        catalog
    }

    pub(crate) fn doc(&self) -> &CatalogDoc {
        &self.doc
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn version(&self) -> u32 {
        self.doc.version
    }

    pub fn hash_algorithm(&self) -> Algorithm {
        self.doc.hash_algorithm
    }

    pub fn timezone_default(&self) -> &str {
        &self.doc.timezone_default
    }

    pub fn set_timezone_default(&mut self, timezone_default: String) {
        self.doc.timezone_default = timezone_default;
    }

    /// Bucket keys in sorted order.
    pub fn uids(&self) -> Vec<String> {
        self.doc.photo_db.keys().cloned().collect()
    }

    pub fn variants(&self, uid: &str) -> &[PhotoFile] {
        self.doc
            .photo_db
            .get(uid)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.doc.photo_db.is_empty()
    }

    /// Every indexed source path, for `--skip-existing` filtering.
    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.doc
            .photo_db
            .values()
            .flatten()
            .map(|p| p.src.as_str())
    }

    /// All variants with a non-empty store path, as `(uid, index, photo)`.
    pub fn stored_photos(&self) -> impl Iterator<Item = (&str, usize, &PhotoFile)> {
        self.doc.photo_db.iter().flat_map(|(uid, photos)| {
            photos
                .iter()
                .enumerate()
                .filter(|(_, p)| p.is_stored())
                .map(move |(i, p)| (uid.as_str(), i, p))
        })
    }

    // ── Mutation ─────────────────────────────────────────────────────

    /// Resolve an incoming variant into a uid bucket.
    ///
    /// Matching order: identical checksum, then identical integer-second
    /// timestamp plus case-insensitive basename (an alternate version of
    /// the same logical photo), then a fresh uid derived from the checksum.
    pub fn add(&mut self, photo: PhotoFile) -> (String, AddOutcome) {
        if let Some(uid) = self.hash_to_uid.get(&photo.chk).cloned() {
            let bucket = self.doc.photo_db.get_mut(&uid).expect("indexed uid exists");
            if bucket
                .iter()
                .any(|p| p.chk == photo.chk && p.src == photo.src)
            {
                return (uid, AddOutcome::Duplicate);
            }
            let ts_key = photo.ts as i64;
            bucket.push(photo);
            self.timestamp_to_uids
                .entry(ts_key)
                .or_default()
                .insert(uid.clone());
            return (uid, AddOutcome::Merged);
        }

        if let Some(uid) = self.find_alternate(&photo) {
            self.index_photo(&uid, &photo);
            self.doc
                .photo_db
                .get_mut(&uid)
                .expect("alternate uid exists")
                .push(photo);
            return (uid, AddOutcome::Merged);
        }

        let uid = self.allocate_uid(&photo.chk);
        self.index_photo(&uid, &photo);
        self.doc.photo_db.insert(uid.clone(), vec![photo]);
        (uid, AddOutcome::Inserted)
    }

    /// Find a bucket holding an alternate version: same integer-second
    /// timestamp and same basename (case-insensitive, extension included).
    fn find_alternate(&self, photo: &PhotoFile) -> Option<String> {
        let uids = self.timestamp_to_uids.get(&(photo.ts as i64))?;
        let name = photo.basename();
        let matches: Vec<&String> = uids
            .iter()
            .filter(|uid| {
                self.variants(uid)
                    .iter()
                    .any(|p| p.basename().eq_ignore_ascii_case(name))
            })
            .collect();
        if matches.len() > 1 {
            warn!(
                "ambiguous timestamp+name match for {}: {:?}",
                photo.src, matches
            );
        }
        matches.first().map(|uid| (*uid).to_string())
    }

    /// Derive a uid from a checksum: the leading 8 bytes as hex, extended
    /// by one byte at a time on collision with a foreign bucket.
    fn allocate_uid(&self, chk: &str) -> String {
        let mut len = 16.min(chk.len());
        loop {
            let candidate = &chk[..len];
            if !self.doc.photo_db.contains_key(candidate) {
                return candidate.to_string();
            }
            if len >= chk.len() {
                // A full-length collision would mean an identical checksum,
                // which is handled before allocation.
                return chk.to_string();
            }
            len = (len + 2).min(chk.len());
        }
    }

    fn index_photo(&mut self, uid: &str, photo: &PhotoFile) {
        self.hash_to_uid.insert(photo.chk.clone(), uid.to_string());
        self.timestamp_to_uids
            .entry(photo.ts as i64)
            .or_default()
            .insert(uid.to_string());
    }

    fn rebuild_indexes(&mut self) {
        self.hash_to_uid.clear();
        self.timestamp_to_uids.clear();
        for (uid, photos) in &self.doc.photo_db {
            for photo in photos {
                self.hash_to_uid.insert(photo.chk.clone(), uid.clone());
                self.timestamp_to_uids
                    .entry(photo.ts as i64)
                    .or_default()
                    .insert(uid.clone());
            }
        }
    }

    pub fn set_store_path(&mut self, uid: &str, index: usize, sto: String) {
        if let Some(photo) = self
            .doc
            .photo_db
            .get_mut(uid)
            .and_then(|photos| photos.get_mut(index))
        {
            photo.sto = sto;
        }
    }

    pub fn clear_store_path(&mut self, uid: &str, index: usize) {
        self.set_store_path(uid, index, String::new());
    }

    /// Rewrite every checksum through `mapping` and switch the catalog to
    /// `new_algorithm`. Checksums missing from the table are tagged with
    /// their producing algorithm instead. Irreversible. Returns the number
    /// of unmapped checksums.
    pub fn map_hashes(
        &mut self,
        new_algorithm: Algorithm,
        mapping: &HashMap<String, String>,
    ) -> usize {
        let old_algorithm = self.doc.hash_algorithm;
        let mut unmapped = 0;
        for photos in self.doc.photo_db.values_mut() {
            for photo in photos.iter_mut() {
                if let Some(mapped) = mapping.get(&photo.chk) {
                    photo.chk = mapped.clone();
                } else if let Some((bare, _)) = photo.chk.split_once(':') {
                    // Already tagged by a previous migration; remap if the
                    // bare checksum is now known.
                    if let Some(mapped) = mapping.get(bare) {
                        photo.chk = mapped.clone();
                    }
                } else {
                    photo.chk = format!("{}:{}", photo.chk, old_algorithm);
                    unmapped += 1;
                }
            }
        }
        self.doc.hash_algorithm = new_algorithm;
        self.rebuild_indexes();
        unmapped
    }

    /// Record a command into the history, keyed by the current timestamp.
    pub fn add_command(&mut self, command: String) -> String {
        let stamp = Local::now().format("%Y-%m-%d_%H-%M-%S%z").to_string();
        self.doc.command_history.insert(stamp.clone(), command);
        stamp
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// Variant indices of `uid` ordered by preference: priority ascending,
    /// then capture timestamp descending, then source path ascending.
    pub fn best_indices(&self, uid: &str) -> Vec<usize> {
        let photos = self.variants(uid);
        let mut indices: Vec<usize> = (0..photos.len()).collect();
        indices.sort_by(|&a, &b| {
            let (pa, pb) = (&photos[a], &photos[b]);
            pa.prio
                .cmp(&pb.prio)
                .then_with(|| {
                    pb.ts
                        .partial_cmp(&pa.ts)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| pa.src.cmp(&pb.src))
        });
        indices
    }

    /// The variants of `uid` in preference order.
    pub fn best_photos(&self, uid: &str) -> Vec<&PhotoFile> {
        let photos = self.variants(uid);
        self.best_indices(uid)
            .into_iter()
            .map(|i| &photos[i])
            .collect()
    }

    pub fn stats(&self) -> CatalogStats {
        let mut stats = CatalogStats {
            num_uids: self.doc.photo_db.len(),
            num_photos: 0,
            num_stored: 0,
            total_stored_bytes: 0,
        };
        for photo in self.doc.photo_db.values().flatten() {
            stats.num_photos += 1;
            if photo.is_stored() {
                stats.num_stored += 1;
                stats.total_stored_bytes += photo.fsz;
            }
        }
        stats
    }

    // ── Modification tracking ────────────────────────────────────────

    fn fingerprint(&self) -> blake3::Hash {
        blake3::hash(&serde_json::to_vec(&self.doc).unwrap_or_default())
    }

    pub fn is_modified(&self) -> bool {
        self.saved_fingerprint != Some(self.fingerprint())
    }

    pub(crate) fn mark_saved(&mut self) {
        self.saved_fingerprint = Some(self.fingerprint());
    }
}

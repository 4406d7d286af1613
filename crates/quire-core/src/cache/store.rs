use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    config::CacheSettings,
    layout::{CachedLayout, LayoutKey},
    types::{Book, Chapter, ChapterMeta, ContentBlock, ContentFormat, Resource},
};

use super::SourceFingerprint;

/// Bump whenever the on-disk shape changes; older entries become misses.
pub const CACHE_VERSION: u32 = 1;

const MANIFEST_FILE: &str = "manifest.json";
const PAYLOADS_DIR: &str = "payloads";
const LAYOUTS_DIR: &str = "layouts";
const RESOURCES_DIR: &str = "resources";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("cache version {found} does not match {expected}")]
    Version { found: u32, expected: u32 },
    #[error("cached entry was made from a different source")]
    Stale,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterRecord {
    pub number: usize,
    pub title: String,
    pub format: ContentFormat,
    pub raw_content: String,
    #[serde(default)]
    pub metadata: ChapterMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocks: Option<Vec<ContentBlock>>,
}

impl From<&Chapter> for ChapterRecord {
    fn from(chapter: &Chapter) -> Self {
        Self {
            number: chapter.number,
            title: chapter.title.clone(),
            format: chapter.format,
            raw_content: chapter.raw_content.clone(),
            metadata: chapter.metadata.clone(),
            blocks: chapter.has_blocks().then(|| chapter.blocks().to_vec()),
        }
    }
}

impl From<ChapterRecord> for Chapter {
    fn from(record: ChapterRecord) -> Self {
        let chapter = Chapter::new(record.number, record.title, record.raw_content, record.format)
            .with_metadata(record.metadata);
        match record.blocks {
            Some(blocks) => chapter.with_blocks(blocks),
            None => chapter,
        }
    }
}

/// A resource stored as a blob next to the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub href: String,
    pub media_type: String,
    pub blob: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookData {
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    pub chapters: Vec<ChapterRecord>,
    #[serde(default)]
    pub resources: Vec<ResourceRecord>,
}

impl From<&Book> for BookData {
    fn from(book: &Book) -> Self {
        Self {
            title: book.title.clone(),
            author: book.author.clone(),
            chapters: book.chapters.iter().map(ChapterRecord::from).collect(),
            resources: book
                .resources
                .iter()
                .map(|r| ResourceRecord {
                    href: r.href.clone(),
                    media_type: r.media_type.clone(),
                    blob: blob_hash(&r.data),
                    size: r.data.len() as u64,
                })
                .collect(),
        }
    }
}

/// Everything needed to reopen a book without parsing it again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachePayload {
    pub version: u32,
    pub source_sha256: String,
    pub source_path: PathBuf,
    pub source_mtime_ns: u64,
    pub generated_at: DateTime<Utc>,
    pub book: BookData,
    /// Stored one file per key under the layouts directory.
    #[serde(skip)]
    pub layouts: BTreeMap<LayoutKey, CachedLayout>,
}

impl CachePayload {
    pub fn new(fingerprint: &SourceFingerprint, source_path: &Path, book: &Book) -> Self {
        Self {
            version: CACHE_VERSION,
            source_sha256: fingerprint.sha256.clone(),
            source_path: source_path.to_path_buf(),
            source_mtime_ns: fingerprint.mtime_ns,
            generated_at: Utc::now(),
            book: BookData::from(book),
            layouts: BTreeMap::new(),
        }
    }

    pub fn fingerprint(&self) -> &str {
        &self.source_sha256
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LayoutFile {
    version: u32,
    key: LayoutKey,
    layout: CachedLayout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub source_path: PathBuf,
    pub title: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Manifest {
    version: u32,
    #[serde(default)]
    entries: BTreeMap<String, ManifestEntry>,
}

/// On-disk cache rooted at one directory. Every failure is a miss.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `None` when caching is disabled or no cache directory exists.
    pub fn from_settings(settings: &CacheSettings) -> Option<Self> {
        if !settings.enabled {
            return None;
        }
        settings.resolve_root().map(Self::new)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn payload_path(&self, fingerprint: &str) -> PathBuf {
        self.root.join(PAYLOADS_DIR).join(format!("{fingerprint}.json"))
    }

    fn layouts_dir(&self, fingerprint: &str) -> PathBuf {
        self.root.join(LAYOUTS_DIR).join(fingerprint)
    }

    fn layout_path(&self, fingerprint: &str, key: &LayoutKey) -> PathBuf {
        self.layouts_dir(fingerprint).join(format!("{key}.json"))
    }

    fn resources_dir(&self, fingerprint: &str) -> PathBuf {
        self.root.join(RESOURCES_DIR).join(fingerprint)
    }

    /// The payload for `path`, only when it was made from the same bytes.
    pub fn load_for_source(&self, path: &Path) -> Option<CachePayload> {
        let fingerprint = SourceFingerprint::compute(path)?;
        self.purge_superseded(path, fingerprint.key());
        match self.read_payload(&fingerprint) {
            Ok(Some(payload)) => {
                debug!(target: "cache", path = %path.display(), layouts = payload.layouts.len(), "cache hit");
                Some(payload)
            }
            Ok(None) => {
                debug!(target: "cache", path = %path.display(), "cache miss");
                None
            }
            Err(err) => {
                warn!(target: "cache", path = %path.display(), error = %err, "discarding cache entry");
                self.purge(fingerprint.key());
                None
            }
        }
    }

    fn read_payload(
        &self,
        fingerprint: &SourceFingerprint,
    ) -> Result<Option<CachePayload>, CacheError> {
        let path = self.payload_path(fingerprint.key());
        let Some(mut payload) = read_json::<CachePayload>(&path)? else {
            return Ok(None);
        };
        if payload.version != CACHE_VERSION {
            return Err(CacheError::Version {
                found: payload.version,
                expected: CACHE_VERSION,
            });
        }
        if payload.source_sha256 != fingerprint.sha256
            || payload.source_mtime_ns != fingerprint.mtime_ns
        {
            return Err(CacheError::Stale);
        }
        payload.layouts = self.read_layouts(fingerprint.key());
        Ok(Some(payload))
    }

    /// Every readable layout of a fingerprint. Unreadable files are removed.
    fn read_layouts(&self, fingerprint: &str) -> BTreeMap<LayoutKey, CachedLayout> {
        let mut layouts = BTreeMap::new();
        let Ok(entries) = fs::read_dir(self.layouts_dir(fingerprint)) else {
            return layouts;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_json::<LayoutFile>(&path) {
                Ok(Some(file)) if file.version == CACHE_VERSION => {
                    layouts.insert(file.key, file.layout);
                }
                Ok(_) => {
                    debug!(target: "cache", path = %path.display(), "dropping outdated layout");
                    remove_quiet(&path);
                }
                Err(err) => {
                    warn!(target: "cache", path = %path.display(), error = %err, "dropping unreadable layout");
                    remove_quiet(&path);
                }
            }
        }
        layouts
    }

    pub fn load_layout(&self, fingerprint: &str, key: &LayoutKey) -> Option<CachedLayout> {
        let path = self.layout_path(fingerprint, key);
        match read_json::<LayoutFile>(&path) {
            Ok(Some(file)) if file.version == CACHE_VERSION && file.key == *key => {
                debug!(target: "cache", key = %key, "layout hit");
                Some(file.layout)
            }
            Ok(None) => {
                debug!(target: "cache", key = %key, "layout miss");
                None
            }
            Ok(Some(_)) => {
                remove_quiet(&path);
                None
            }
            Err(err) => {
                warn!(target: "cache", key = %key, error = %err, "dropping unreadable layout");
                remove_quiet(&path);
                None
            }
        }
    }

    /// Apply `f` to the stored layouts and write back what it leaves. Keys
    /// already on disk are never deleted here.
    pub fn mutate_layouts(
        &self,
        fingerprint: &str,
        f: impl FnOnce(&mut BTreeMap<LayoutKey, CachedLayout>),
    ) -> bool {
        let before = self.read_layouts(fingerprint);
        let mut layouts = before.clone();
        f(&mut layouts);
        let mut ok = true;
        for (key, layout) in layouts {
            if before.get(&key) == Some(&layout) {
                continue;
            }
            ok &= self.write_layout(fingerprint, key, layout);
        }
        ok
    }

    fn write_layout(&self, fingerprint: &str, key: LayoutKey, layout: CachedLayout) -> bool {
        let file = LayoutFile {
            version: CACHE_VERSION,
            key,
            layout,
        };
        let result = serde_json::to_vec(&file)
            .map_err(CacheError::from)
            .and_then(|bytes| write_atomic(&self.layout_path(fingerprint, &key), &bytes));
        log_write("layout", result)
    }

    /// Store the payload and its layouts, and record it in the manifest.
    pub fn save_payload(&self, payload: &CachePayload) -> bool {
        let fingerprint = payload.fingerprint();
        let result = serde_json::to_vec(payload)
            .map_err(CacheError::from)
            .and_then(|bytes| write_atomic(&self.payload_path(fingerprint), &bytes));
        if !log_write("payload", result) {
            return false;
        }
        let layouts = payload.layouts.clone();
        let layouts_ok = self.mutate_layouts(fingerprint, |stored| stored.extend(layouts));

        let mut manifest = self.read_manifest();
        manifest.entries.insert(
            fingerprint.to_string(),
            ManifestEntry {
                source_path: payload.source_path.clone(),
                title: payload.book.title.clone(),
                updated_at: Utc::now(),
            },
        );
        layouts_ok && self.write_manifest(&manifest)
    }

    /// Store resource blobs first so a saved payload never names a missing blob.
    pub fn save_book(&self, payload: &CachePayload, resources: &[Resource]) -> bool {
        for resource in resources {
            if self.store_resource(payload.fingerprint(), &resource.data).is_none() {
                return false;
            }
        }
        self.save_payload(payload)
    }

    /// Rebuild the book a payload describes, loading its resource blobs.
    pub fn restore_book(&self, payload: &CachePayload) -> Book {
        let fingerprint = payload.fingerprint();
        let chapters = payload
            .book
            .chapters
            .iter()
            .cloned()
            .map(Chapter::from)
            .collect();
        let mut book = Book::new(payload.book.title.clone(), chapters)
            .with_source(payload.source_path.clone(), Some(fingerprint.to_string()));
        book.author = payload.book.author.clone();
        for record in &payload.book.resources {
            match self.load_resource(fingerprint, &record.blob) {
                Some(data) => book.resources.push(Resource {
                    href: record.href.clone(),
                    media_type: record.media_type.clone(),
                    data,
                }),
                None => {
                    debug!(target: "cache", href = %record.href, "resource blob missing")
                }
            }
        }
        book
    }

    /// Returns the blob hash the bytes are stored under.
    pub fn store_resource(&self, fingerprint: &str, bytes: &[u8]) -> Option<String> {
        let blob = blob_hash(bytes);
        let path = self.resources_dir(fingerprint).join(format!("{blob}.bin"));
        if path.exists() {
            return Some(blob);
        }
        log_write("resource", write_atomic(&path, bytes)).then_some(blob)
    }

    pub fn load_resource(&self, fingerprint: &str, blob: &str) -> Option<Vec<u8>> {
        let path = self.resources_dir(fingerprint).join(format!("{blob}.bin"));
        let data = fs::read(&path).ok()?;
        if blob_hash(&data) != blob {
            warn!(target: "cache", path = %path.display(), "resource blob corrupt");
            remove_quiet(&path);
            return None;
        }
        Some(data)
    }

    /// Whether a payload for the file's current bytes exists, without
    /// opening the payload.
    pub fn is_cached(&self, path: &Path) -> bool {
        let Some(fingerprint) = SourceFingerprint::compute(path) else {
            return false;
        };
        self.read_manifest()
            .entries
            .contains_key(fingerprint.key())
            && self.payload_path(fingerprint.key()).exists()
    }

    pub fn manifest_entries(&self) -> BTreeMap<String, ManifestEntry> {
        self.read_manifest().entries
    }

    /// Delete everything stored for a fingerprint.
    pub fn purge(&self, fingerprint: &str) {
        remove_quiet(&self.payload_path(fingerprint));
        let _ = fs::remove_dir_all(self.layouts_dir(fingerprint));
        let _ = fs::remove_dir_all(self.resources_dir(fingerprint));
        let mut manifest = self.read_manifest();
        if manifest.entries.remove(fingerprint).is_some() {
            self.write_manifest(&manifest);
        }
        debug!(target: "cache", fingerprint, "purged cache entry");
    }

    /// Entries made from earlier versions of the same file.
    fn purge_superseded(&self, path: &Path, current: &str) {
        let stale: Vec<String> = self
            .read_manifest()
            .entries
            .into_iter()
            .filter(|(fp, entry)| fp != current && entry.source_path == path)
            .map(|(fp, _)| fp)
            .collect();
        for fingerprint in stale {
            self.purge(&fingerprint);
        }
    }

    fn read_manifest(&self) -> Manifest {
        let path = self.root.join(MANIFEST_FILE);
        match read_json::<Manifest>(&path) {
            Ok(Some(manifest)) if manifest.version == CACHE_VERSION => manifest,
            Ok(Some(_)) | Ok(None) => Manifest {
                version: CACHE_VERSION,
                entries: BTreeMap::new(),
            },
            Err(err) => {
                warn!(target: "cache", error = %err, "manifest unreadable, starting over");
                Manifest {
                    version: CACHE_VERSION,
                    entries: BTreeMap::new(),
                }
            }
        }
    }

    fn write_manifest(&self, manifest: &Manifest) -> bool {
        let result = serde_json::to_vec_pretty(manifest)
            .map_err(CacheError::from)
            .and_then(|bytes| write_atomic(&self.root.join(MANIFEST_FILE), &bytes));
        log_write("manifest", result)
    }
}

pub(crate) fn blob_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, CacheError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
}

/// Write to a temp file beside `path`, fsync, then rename over it.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "cache path has no parent"))?;
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| err.error)?;
    if let Ok(dir) = File::open(dir) {
        let _ = dir.sync_all();
    }
    Ok(())
}

fn log_write(what: &str, result: Result<(), CacheError>) -> bool {
    match result {
        Ok(()) => true,
        Err(err) => {
            warn!(target: "cache", what, error = %err, "cache write failed");
            false
        }
    }
}

fn remove_quiet(path: &Path) {
    let _ = fs::remove_file(path);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReaderConfig;
    use crate::layout::{PageMapEntry, PaginationEngine};

    fn source(dir: &Path, text: &str) -> PathBuf {
        let path = dir.join("book.txt");
        fs::write(&path, text).unwrap();
        path
    }

    fn book() -> Book {
        Book::new(
            "Cached",
            vec![Chapter::new(1, "One", "Some text.", ContentFormat::Text)],
        )
    }

    #[test]
    fn version_mismatch_is_a_miss_and_purges() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path().join("cache"));
        let path = source(dir.path(), "Some text.");
        let fp = SourceFingerprint::compute(&path).unwrap();
        let mut payload = CachePayload::new(&fp, &path, &book());
        payload.version = CACHE_VERSION + 1;
        assert!(store.save_payload(&payload));
        assert!(store.load_for_source(&path).is_none());
        assert!(!store.payload_path(fp.key()).exists());
        assert!(store.manifest_entries().is_empty());
    }

    #[test]
    fn corrupt_payload_self_heals() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path().join("cache"));
        let path = source(dir.path(), "Some text.");
        let fp = SourceFingerprint::compute(&path).unwrap();
        write_atomic(&store.payload_path(fp.key()), b"{ not json").unwrap();
        assert!(store.load_for_source(&path).is_none());
        assert!(!store.payload_path(fp.key()).exists());
    }

    #[test]
    fn corrupt_layout_file_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        let engine = PaginationEngine::new(ReaderConfig::default(), 80, 24);
        let key = engine.layout_key();
        let layout = CachedLayout::Absolute(vec![PageMapEntry {
            chapter_index: 0,
            pages_in_chapter: 1,
            line_count: 3,
        }]);
        assert!(store.mutate_layouts("abc", |m| {
            m.insert(key, layout.clone());
        }));
        assert_eq!(store.load_layout("abc", &key), Some(layout));
        fs::write(store.layout_path("abc", &key), "garbage").unwrap();
        assert_eq!(store.load_layout("abc", &key), None);
        assert!(!store.layout_path("abc", &key).exists());
    }

    #[test]
    fn resource_blobs_are_content_addressed() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        let blob = store.store_resource("fp", b"png bytes").unwrap();
        assert_eq!(blob, blob_hash(b"png bytes"));
        assert_eq!(store.load_resource("fp", &blob).as_deref(), Some(&b"png bytes"[..]));
        assert_eq!(store.load_resource("other", &blob), None);
    }

    #[test]
    fn disabled_settings_have_no_store() {
        let settings = CacheSettings {
            enabled: false,
            root: Some(PathBuf::from("/tmp/quire")),
        };
        assert!(CacheStore::from_settings(&settings).is_none());
    }
}

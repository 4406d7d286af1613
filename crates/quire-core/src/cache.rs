mod fingerprint;
mod store;
mod writer;

pub use fingerprint::SourceFingerprint;
pub use store::{
    BookData, CacheError, CachePayload, CacheStore, ChapterRecord, ManifestEntry, ResourceRecord,
    CACHE_VERSION,
};
pub use writer::{CacheJob, CacheWriter, WriterError};

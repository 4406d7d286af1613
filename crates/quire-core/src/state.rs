use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    config,
    nav::{ChangeSet, LineOffset},
};

const POSITIONS_FILE: &str = "positions.json";

/// The reader's canonical position. Chapter and line offset are the source
/// of truth; the page index is derived from whichever map is installed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderState {
    pub chapter: usize,
    pub line_offset: usize,
    pub page_index: usize,
}

impl ReaderState {
    pub fn new(chapter: usize, line_offset: usize) -> Self {
        Self {
            chapter,
            line_offset,
            page_index: 0,
        }
    }

    /// Apply a change-set. `max_offset_for` resolves `ChapterEnd` and clamps
    /// explicit offsets.
    pub fn apply(&mut self, changes: &ChangeSet, max_offset_for: impl Fn(usize) -> usize) {
        if let Some(chapter) = changes.current_chapter {
            self.chapter = chapter;
        }
        match changes.line_offset {
            Some(LineOffset::At(offset)) => {
                self.line_offset = offset.min(max_offset_for(self.chapter));
            }
            Some(LineOffset::ChapterEnd) => self.line_offset = max_offset_for(self.chapter),
            None => {}
        }
        if let Some(page) = changes.current_page_index {
            self.page_index = page;
        }
    }

    /// Move to a page whose first line is already known.
    pub fn sync_to_page(&mut self, page_index: usize, chapter: usize, line_offset: usize) {
        self.page_index = page_index;
        self.chapter = chapter;
        self.line_offset = line_offset;
    }
}

/// Saved reading position for one source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub source_path: PathBuf,
    pub chapter: usize,
    pub line_offset: usize,
    pub updated_at: DateTime<Utc>,
}

pub fn state_dir() -> Option<PathBuf> {
    config::config_root()
}

pub fn load_position(dir: &Path, source: &Path) -> Option<PositionRecord> {
    let data = fs::read(dir.join(POSITIONS_FILE)).ok()?;
    let records: Vec<PositionRecord> = serde_json::from_slice(&data).ok()?;
    records.into_iter().find(|r| r.source_path == source)
}

pub fn save_position(dir: &Path, record: &PositionRecord) -> std::io::Result<()> {
    fs::create_dir_all(dir)?;
    let path = dir.join(POSITIONS_FILE);
    let mut records: Vec<PositionRecord> = fs::read(&path)
        .ok()
        .and_then(|d| serde_json::from_slice(&d).ok())
        .unwrap_or_default();
    match records
        .iter_mut()
        .find(|r| r.source_path == record.source_path)
    {
        Some(existing) => *existing = record.clone(),
        None => records.push(record.clone()),
    }
    let s = serde_json::to_string_pretty(&records).unwrap_or_else(|_| "[]".into());
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(s.as_bytes())?;
    tmp.persist(&path).map_err(|e| e.error)?;
    Ok(())
}

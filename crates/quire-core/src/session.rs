use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    cache::{CacheJob, CachePayload, CacheStore, CacheWriter, SourceFingerprint, WriterError},
    cells::{center, pad_right},
    config::{AddressingMode, ReaderConfig, ViewMode},
    layout::{
        spaced_rows, CachedLayout, LayoutKey, PageLabel, PaginationEngine, PaginationError,
        WrappedLine,
    },
    nav::{self, ChangeSet, NavContext},
    state::{self, PositionRecord, ReaderState},
    text::import_path,
    types::{Book, Document, DocumentError},
};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Pagination(#[from] PaginationError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavCommand {
    NextPage,
    PrevPage,
    Start,
    End,
    NextChapter,
    PrevChapter,
    Chapter(usize),
}

/// Where the installed page map came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutSource {
    Cache,
    Built,
}

/// What one screen shows.
#[derive(Debug, Clone, Default)]
pub struct Spread {
    pub left: Vec<WrappedLine>,
    pub right: Option<Vec<WrappedLine>>,
    pub label: Option<PageLabel>,
}

pub struct ReaderSession<D: Document = Book> {
    doc: D,
    engine: PaginationEngine,
    state: ReaderState,
    store: Option<CacheStore>,
    writer: Option<CacheWriter>,
    fingerprint: Option<String>,
    known_layouts: BTreeMap<LayoutKey, CachedLayout>,
    /// Stored maps are keyed without margins or styling; off once those change.
    stored_layouts: bool,
    layout_source: Option<LayoutSource>,
    book_from_cache: bool,
    position_dir: Option<PathBuf>,
}

impl ReaderSession<Book> {
    /// Open a file through the cache, importing it on a miss, and paginate it
    /// for the given terminal size.
    pub fn open(
        path: &Path,
        config: ReaderConfig,
        width: usize,
        height: usize,
        progress: impl FnMut(usize, usize),
    ) -> Result<Self, SessionError> {
        let canonical = fs::canonicalize(path).map_err(DocumentError::from)?;
        let store = CacheStore::from_settings(&config.cache);

        let cached = store.as_ref().and_then(|s| s.load_for_source(&canonical));
        let (book, layouts, fingerprint, from_cache) = match (cached, store.as_ref()) {
            (Some(payload), Some(store)) => {
                let book = store.restore_book(&payload);
                let fp = payload.source_sha256.clone();
                (book, payload.layouts, Some(fp), true)
            }
            _ => {
                let mut book = import_path(&canonical)?;
                let fp = SourceFingerprint::compute(&canonical).map(|fp| fp.sha256);
                if let Some(fp) = &fp {
                    book.set_cache_sha(fp.clone());
                }
                (book, BTreeMap::new(), fp, false)
            }
        };

        let writer = store.clone().map(CacheWriter::spawn);
        let mut session = Self::with_parts(book, config, width, height, store, writer);
        session.fingerprint = fingerprint;
        session.known_layouts = layouts;
        session.book_from_cache = from_cache;
        session.ensure_layout(progress)?;

        if !from_cache {
            session.persist_book(&canonical);
        }
        Ok(session)
    }

    fn persist_book(&self, canonical: &Path) {
        let (Some(writer), Some(fp)) = (&self.writer, SourceFingerprint::compute(canonical))
        else {
            return;
        };
        let mut payload = CachePayload::new(&fp, canonical, &self.doc);
        payload.layouts = self.known_layouts.clone();
        let job = CacheJob::StorePayload {
            payload: Box::new(payload),
            resources: self.doc.resources.clone(),
        };
        if let Err(err) = writer.submit(job) {
            warn!(target: "cache", error = %err, "could not queue payload");
        }
    }
}

impl<D: Document> ReaderSession<D> {
    /// A session over an already loaded document, with no cache.
    pub fn new(
        doc: D,
        config: ReaderConfig,
        width: usize,
        height: usize,
    ) -> Result<Self, SessionError> {
        let mut session = Self::with_parts(doc, config, width, height, None, None);
        session.ensure_layout(|_, _| {})?;
        Ok(session)
    }

    fn with_parts(
        doc: D,
        config: ReaderConfig,
        width: usize,
        height: usize,
        store: Option<CacheStore>,
        writer: Option<CacheWriter>,
    ) -> Self {
        let fingerprint = doc.cache_sha().map(str::to_string);
        Self {
            doc,
            engine: PaginationEngine::new(config, width, height),
            state: ReaderState::default(),
            store,
            writer,
            fingerprint,
            known_layouts: BTreeMap::new(),
            stored_layouts: true,
            layout_source: None,
            book_from_cache: false,
            position_dir: None,
        }
    }

    pub fn document(&self) -> &D {
        &self.doc
    }

    pub fn engine(&self) -> &PaginationEngine {
        &self.engine
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    pub fn config(&self) -> &ReaderConfig {
        self.engine.config()
    }

    pub fn layout_source(&self) -> Option<LayoutSource> {
        self.layout_source
    }

    pub fn book_from_cache(&self) -> bool {
        self.book_from_cache
    }

    /// Install a map for the current layout key, from memory, disk or a
    /// fresh build, and put the reader back on the same content.
    pub fn ensure_layout(&mut self, progress: impl FnMut(usize, usize)) -> Result<(), SessionError> {
        if self.doc.chapter_count() == 0 {
            return Err(DocumentError::Empty.into());
        }
        if self.engine.is_ready() {
            return Ok(());
        }
        let key = self.engine.layout_key();
        let (width, height) = self.engine.viewport();
        if let Some(layout) = self.lookup_layout(&key) {
            match self
                .engine
                .install_cached(layout, width, height, self.doc.chapter_count())
            {
                Ok(()) => {
                    self.layout_source = Some(LayoutSource::Cache);
                    self.restore_position();
                    return Ok(());
                }
                Err(err) => debug!(target: "pagination", key = %key, error = %err, "cached layout rejected"),
            }
        }
        self.engine.build(&self.doc, progress)?;
        self.layout_source = Some(LayoutSource::Built);
        self.restore_position();
        self.persist_layout();
        Ok(())
    }

    fn lookup_layout(&self, key: &LayoutKey) -> Option<CachedLayout> {
        if let Some(layout) = self.known_layouts.get(key) {
            return Some(layout.clone());
        }
        if !self.stored_layouts {
            return None;
        }
        let store = self.store.as_ref()?;
        store.load_layout(self.fingerprint.as_deref()?, key)
    }

    fn persist_layout(&mut self) {
        let Some((key, layout)) = self.engine.export_layout() else {
            return;
        };
        self.known_layouts.insert(key, layout.clone());
        let (Some(writer), Some(fingerprint)) = (&self.writer, &self.fingerprint) else {
            return;
        };
        let job = CacheJob::StoreLayout {
            fingerprint: fingerprint.clone(),
            key,
            layout,
        };
        if let Err(err) = writer.submit(job) {
            warn!(target: "cache", error = %err, "could not queue layout");
        }
    }

    fn restore_position(&mut self) {
        let last_chapter = self.doc.chapter_count().saturating_sub(1);
        self.state.chapter = self.state.chapter.min(last_chapter);
        let max = self.engine.max_offset_for(self.state.chapter);
        let lines_per_page = self.engine.lines_per_page();
        // Anything past the chapter's last page belongs to that page.
        let offset = self.state.line_offset.min(max + lines_per_page.saturating_sub(1));
        self.state.line_offset = offset;
        self.state.page_index = self.engine.find_page_index(self.state.chapter, offset);
        if self.engine.config().view_mode == ViewMode::Split
            && self.engine.mode() == AddressingMode::Dynamic
        {
            self.state.page_index -= self.state.page_index % 2;
        }
    }

    /// Returns true when the terminal size changed the layout.
    pub fn resize(
        &mut self,
        width: usize,
        height: usize,
        progress: impl FnMut(usize, usize),
    ) -> Result<bool, SessionError> {
        if !self.engine.set_viewport(width, height) {
            return Ok(false);
        }
        info!(target: "pagination", width, height, "terminal resized");
        self.ensure_layout(progress)?;
        Ok(true)
    }

    pub fn set_config(
        &mut self,
        config: ReaderConfig,
        progress: impl FnMut(usize, usize),
    ) -> Result<bool, SessionError> {
        let reformatted = !self.engine.config().formats_like(&config);
        if !self.engine.set_config(config) {
            return Ok(false);
        }
        if reformatted {
            self.known_layouts.clear();
            self.stored_layouts = false;
        }
        self.ensure_layout(progress)?;
        Ok(true)
    }

    pub fn nav_context(&self) -> NavContext {
        let mode = self.engine.mode();
        let view_mode = self.engine.config().view_mode;
        let page = self.state.page_index;
        let chapter = self.state.chapter;
        let shown = self
            .engine
            .position_of(page)
            .map(|(_, offset)| offset)
            .unwrap_or(self.state.line_offset);
        let column_lines = self.engine.column_lines();
        let (single_page, left_page, right_page) = match (mode, view_mode) {
            (AddressingMode::Dynamic, ViewMode::Single) => (page, page, page),
            (AddressingMode::Dynamic, ViewMode::Split) => {
                let left = page - page % 2;
                (page, left, left + 1)
            }
            (AddressingMode::Absolute, _) => (shown, shown, shown + column_lines),
        };
        NavContext {
            mode,
            view_mode,
            current_chapter: chapter,
            total_chapters: self.doc.chapter_count(),
            current_page_index: page,
            dynamic_total_pages: match mode {
                AddressingMode::Dynamic => self.engine.total_pages(),
                AddressingMode::Absolute => 0,
            },
            single_page,
            left_page,
            right_page,
            max_page_in_chapter: self
                .engine
                .pages_in_chapter(chapter)
                .unwrap_or(1)
                .saturating_sub(1),
            lines_per_page: self.engine.lines_per_page(),
            column_lines_per_page: column_lines,
            max_offset_in_chapter: self.engine.max_offset_for(chapter),
        }
    }

    /// Returns true when the position moved.
    pub fn navigate(&mut self, command: NavCommand) -> bool {
        let ctx = self.nav_context();
        let dynamic = ctx.mode == AddressingMode::Dynamic;
        let changes = match command {
            NavCommand::NextPage => nav::next_page(&ctx),
            NavCommand::PrevPage => nav::prev_page(&ctx),
            NavCommand::Start => nav::go_to_start(&ctx),
            NavCommand::End => nav::go_to_end(&ctx),
            NavCommand::NextChapter if dynamic => {
                if ctx.current_chapter + 1 >= ctx.total_chapters {
                    ChangeSet::default()
                } else {
                    nav::jump_to_chapter(&ctx, ctx.current_chapter + 1, self.engine.chapter_starts())
                }
            }
            NavCommand::PrevChapter if dynamic => {
                if ctx.current_chapter == 0 {
                    ChangeSet::default()
                } else {
                    nav::jump_to_chapter(&ctx, ctx.current_chapter - 1, self.engine.chapter_starts())
                }
            }
            NavCommand::NextChapter => nav::next_chapter(&ctx),
            NavCommand::PrevChapter => nav::prev_chapter(&ctx),
            NavCommand::Chapter(index) => {
                nav::jump_to_chapter(&ctx, index, self.engine.chapter_starts())
            }
        };
        if changes.is_empty() {
            return false;
        }
        self.apply(&changes);
        true
    }

    fn apply(&mut self, changes: &ChangeSet) {
        let engine = &self.engine;
        self.state.apply(changes, |chapter| engine.max_offset_for(chapter));
        match engine.mode() {
            AddressingMode::Dynamic => {
                if let Some(page) = changes.current_page_index {
                    if let Some((chapter, offset)) = engine.position_of(page) {
                        self.state.sync_to_page(page, chapter, offset);
                    }
                }
            }
            AddressingMode::Absolute => {
                self.state.page_index =
                    engine.find_page_index(self.state.chapter, self.state.line_offset);
            }
        }
        debug!(
            target: "pagination",
            chapter = self.state.chapter,
            offset = self.state.line_offset,
            page = self.state.page_index,
            "position changed"
        );
    }

    /// Lines for the current screen, split into columns.
    pub fn current_spread(&mut self) -> Result<Spread, SessionError> {
        let page = self.state.page_index;
        let split = self.engine.config().view_mode == ViewMode::Split;
        let label = if self.engine.config().show_page_numbers {
            self.engine.page_label(page)
        } else {
            None
        };
        let spread = match self.engine.mode() {
            AddressingMode::Dynamic if split => {
                let left_index = page - page % 2;
                let left = self.page_lines(left_index)?;
                let right = if left_index + 1 < self.engine.total_pages() {
                    self.page_lines(left_index + 1)?
                } else {
                    Vec::new()
                };
                Spread {
                    left,
                    right: Some(right),
                    label,
                }
            }
            AddressingMode::Dynamic => Spread {
                left: self.page_lines(page)?,
                right: None,
                label,
            },
            AddressingMode::Absolute => {
                let mut left = self.page_lines(page)?;
                let right = split.then(|| {
                    let at = self.engine.column_lines().min(left.len());
                    left.split_off(at)
                });
                Spread { left, right, label }
            }
        };
        Ok(spread)
    }

    fn page_lines(&mut self, index: usize) -> Result<Vec<WrappedLine>, SessionError> {
        Ok(self
            .engine
            .get_page(&self.doc, index)?
            .lines
            .unwrap_or_default())
    }

    /// The current screen as plain text, one string per terminal row.
    pub fn render_plain(&mut self) -> Result<Vec<String>, SessionError> {
        let spread = self.current_spread()?;
        let config = self.engine.config().clone();
        let (width, height) = self.engine.viewport();
        let metrics = self.engine.metrics();
        let margin = " ".repeat(config.margins.horizontal);
        let divider = " ".repeat(config.margins.divider);

        let mut out = Vec::with_capacity(height);
        for _ in 0..config.margins.header_rows {
            out.push(String::new());
        }
        let left = spaced_rows(&spread.left, config.line_spacing);
        let right = spread
            .right
            .as_ref()
            .map(|lines| spaced_rows(lines, config.line_spacing));
        let rows = metrics.content_height;
        for row in 0..rows {
            let cell = |column: &[Option<&WrappedLine>]| {
                column
                    .get(row)
                    .copied()
                    .flatten()
                    .map(|line| line.text.clone())
                    .unwrap_or_default()
            };
            let mut line = format!("{margin}{}", cell(left.as_slice()));
            if let Some(right) = &right {
                line = pad_right(&line, config.margins.horizontal + metrics.column_width);
                line.push_str(&divider);
                line.push_str(&cell(right.as_slice()));
            }
            out.push(line.trim_end().to_string());
        }
        let footer = spread.label.map(|label| {
            format!(
                "{}/{} · {}/{}",
                label.page_in_chapter, label.total_in_chapter, label.global_page, label.total_pages
            )
        });
        for idx in 0..config.margins.footer_rows {
            match (&footer, idx) {
                (Some(text), 0) => out.push(center(text, width).trim_end().to_string()),
                _ => out.push(String::new()),
            }
        }
        Ok(out)
    }

    /// Load the saved position for this document from `dir` and remember
    /// the directory for [`ReaderSession::close`].
    pub fn remember_positions(&mut self, dir: PathBuf) {
        if let Some(source) = self.doc.canonical_path() {
            if let Some(record) = state::load_position(&dir, source) {
                self.state.chapter = record.chapter;
                self.state.line_offset = record.line_offset;
                self.restore_position();
                debug!(chapter = record.chapter, offset = record.line_offset, "restored position");
            }
        }
        self.position_dir = Some(dir);
    }

    /// Save the position and drain pending cache writes.
    pub fn close(mut self, timeout: Duration) -> Result<(), WriterError> {
        if let (Some(dir), Some(source)) = (&self.position_dir, self.doc.canonical_path()) {
            let record = PositionRecord {
                source_path: source.to_path_buf(),
                chapter: self.state.chapter,
                line_offset: self.state.line_offset,
                updated_at: Utc::now(),
            };
            if let Err(err) = state::save_position(dir, &record) {
                warn!(error = %err, "could not save reading position");
            }
        }
        match self.writer.take() {
            Some(writer) => writer.shutdown(timeout),
            None => Ok(()),
        }
    }
}

use std::{num::NonZeroUsize, time::Instant};

use lru::LruCache;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    config::{AddressingMode, ReaderConfig},
    types::{Document, DocumentError},
};

use super::format::{format_chapter, wrap_window_indexed};
use super::metrics::{calculate_metrics, LayoutKey, LayoutMetrics};
use super::WrappedLine;

const CACHE_PAGES: usize = 16;

#[derive(Debug, Error)]
pub enum PaginationError {
    #[error("Document error: {0}")]
    Document(#[from] DocumentError),
    #[error("No page map installed for layout {0}")]
    NotReady(LayoutKey),
    #[error("Page {0} is out of range")]
    PageOutOfRange(usize),
    #[error("Cached layout is inconsistent")]
    InvalidLayout,
}

/// A page of the dynamic map: an inclusive range of one chapter's lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub chapter_index: usize,
    pub start_line: usize,
    pub end_line: usize,
    pub page_in_chapter: usize,
    pub total_pages_in_chapter: usize,
    #[serde(skip)]
    pub lines: Option<Vec<WrappedLine>>,
}

impl Page {
    fn span(&self) -> usize {
        self.end_line - self.start_line + 1
    }
}

/// Absolute map entry, one per chapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMapEntry {
    pub chapter_index: usize,
    pub pages_in_chapter: usize,
    pub line_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "entries", rename_all = "lowercase")]
pub enum CachedLayout {
    Absolute(Vec<PageMapEntry>),
    Dynamic(Vec<Page>),
}

/// Page numbers for a status line, all 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLabel {
    pub page_in_chapter: usize,
    pub total_in_chapter: usize,
    pub global_page: usize,
    pub total_pages: usize,
}

#[derive(Debug)]
enum PageMap {
    Absolute(Vec<PageMapEntry>),
    Dynamic(Vec<Page>),
}

#[derive(Debug)]
struct Installed {
    key: LayoutKey,
    /// Settings the map was built under, restored when a rebuild fails.
    config: ReaderConfig,
    width: usize,
    height: usize,
    map: PageMap,
    /// First global page of every chapter.
    chapter_starts: Vec<usize>,
    /// Block start lines per chapter, known only for maps built here.
    block_starts: Vec<Option<Vec<usize>>>,
}

struct ChapterScan {
    line_count: usize,
    block_starts: Vec<usize>,
}

pub struct PaginationEngine {
    config: ReaderConfig,
    width: usize,
    height: usize,
    metrics: LayoutMetrics,
    installed: Option<Installed>,
    page_cache: LruCache<usize, Vec<WrappedLine>>,
}

impl PaginationEngine {
    pub fn new(config: ReaderConfig, width: usize, height: usize) -> Self {
        let metrics = calculate_metrics(width, height, config.view_mode, &config.margins);
        Self {
            config,
            width,
            height,
            metrics,
            installed: None,
            page_cache: LruCache::new(NonZeroUsize::new(CACHE_PAGES).unwrap_or(NonZeroUsize::MIN)),
        }
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    pub fn metrics(&self) -> LayoutMetrics {
        self.metrics
    }

    pub fn viewport(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn mode(&self) -> AddressingMode {
        self.config.page_numbering_mode
    }

    /// The key a map must carry to be usable right now.
    pub fn layout_key(&self) -> LayoutKey {
        self.key_for(self.config.page_numbering_mode)
    }

    fn key_for(&self, mode: AddressingMode) -> LayoutKey {
        LayoutKey {
            mode,
            width: self.width,
            height: self.height,
            view_mode: self.config.view_mode,
            line_spacing: self.config.line_spacing,
            image_mode: self.config.image_mode,
        }
    }

    pub fn installed_key(&self) -> Option<LayoutKey> {
        self.installed.as_ref().map(|i| i.key)
    }

    pub fn is_ready(&self) -> bool {
        self.installed.as_ref().is_some_and(|installed| {
            installed.key == self.layout_key() && installed.config.formats_like(&self.config)
        })
    }

    /// Logical lines per column.
    pub fn column_lines(&self) -> usize {
        self.metrics.column_lines(self.config.line_spacing)
    }

    /// Logical lines per screen: all columns of a spread.
    pub fn lines_per_page(&self) -> usize {
        self.metrics.lines_per_page(self.config.line_spacing)
    }

    /// Returns true when the layout key changed, leaving the map stale.
    pub fn set_viewport(&mut self, width: usize, height: usize) -> bool {
        let before = self.layout_key();
        self.width = width;
        self.height = height;
        self.metrics = calculate_metrics(width, height, self.config.view_mode, &self.config.margins);
        self.after_key_change(before, false)
    }

    /// Returns true when the layout key changed, leaving the map stale.
    pub fn set_config(&mut self, config: ReaderConfig) -> bool {
        let before = self.layout_key();
        // Same key, different lines: the installed map no longer applies.
        let reformatted = !self.config.formats_like(&config);
        self.config = config;
        self.metrics = calculate_metrics(
            self.width,
            self.height,
            self.config.view_mode,
            &self.config.margins,
        );
        self.after_key_change(before, reformatted)
    }

    fn after_key_change(&mut self, before: LayoutKey, reformatted: bool) -> bool {
        let after = self.layout_key();
        if before == after && !reformatted {
            return false;
        }
        self.page_cache.clear();
        debug!(target: "pagination", from = %before, to = %after, "layout settings changed, map is stale");
        true
    }

    /// Build the map for the current addressing mode.
    pub fn build<D: Document + ?Sized>(
        &mut self,
        doc: &D,
        progress: impl FnMut(usize, usize),
    ) -> Result<(), PaginationError> {
        match self.mode() {
            AddressingMode::Absolute => self.build_absolute_map(doc, self.width, self.height, progress),
            AddressingMode::Dynamic => self.build_dynamic_map(doc, self.width, self.height, progress),
        }
    }

    pub fn build_absolute_map<D: Document + ?Sized>(
        &mut self,
        doc: &D,
        width: usize,
        height: usize,
        progress: impl FnMut(usize, usize),
    ) -> Result<(), PaginationError> {
        let started = Instant::now();
        let metrics = calculate_metrics(width, height, self.config.view_mode, &self.config.margins);
        let lines_per_page = metrics.lines_per_page(self.config.line_spacing);
        let scans = self.scan_or_restore(
            doc,
            metrics,
            metrics.column_lines(self.config.line_spacing),
            progress,
        )?;
        self.commit_viewport(width, height, metrics);
        let entries: Vec<PageMapEntry> = scans
            .iter()
            .enumerate()
            .map(|(chapter_index, scan)| PageMapEntry {
                chapter_index,
                pages_in_chapter: scan.line_count.div_ceil(lines_per_page).max(1),
                line_count: scan.line_count,
            })
            .collect();
        debug!(
            target: "pagination",
            chapters = entries.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "absolute map built"
        );
        let block_starts = scans.into_iter().map(|s| Some(s.block_starts)).collect();
        self.install(
            self.key_for(AddressingMode::Absolute),
            PageMap::Absolute(entries),
            block_starts,
        );
        Ok(())
    }

    pub fn build_dynamic_map<D: Document + ?Sized>(
        &mut self,
        doc: &D,
        width: usize,
        height: usize,
        progress: impl FnMut(usize, usize),
    ) -> Result<(), PaginationError> {
        let started = Instant::now();
        let metrics = calculate_metrics(width, height, self.config.view_mode, &self.config.margins);
        let column_lines = metrics.column_lines(self.config.line_spacing);
        let scans = self.scan_or_restore(doc, metrics, column_lines, progress)?;
        self.commit_viewport(width, height, metrics);
        let mut pages = Vec::new();
        for (chapter_index, scan) in scans.iter().enumerate() {
            pages.extend(chapter_pages(chapter_index, scan.line_count, column_lines));
        }
        debug!(
            target: "pagination",
            pages = pages.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "dynamic map built"
        );
        let block_starts = scans.into_iter().map(|s| Some(s.block_starts)).collect();
        self.install(
            self.key_for(AddressingMode::Dynamic),
            PageMap::Dynamic(pages),
            block_starts,
        );
        Ok(())
    }

    /// Wrap every chapter under the candidate metrics. On failure the
    /// settings of the installed map are put back so it keeps serving pages.
    fn scan_or_restore<D: Document + ?Sized>(
        &mut self,
        doc: &D,
        metrics: LayoutMetrics,
        column_lines: usize,
        progress: impl FnMut(usize, usize),
    ) -> Result<Vec<ChapterScan>, PaginationError> {
        match scan_chapters(doc, metrics.column_width, column_lines, &self.config, progress) {
            Ok(scans) => Ok(scans),
            Err(err) => {
                warn!(target: "pagination", error = %err, "build failed, keeping the previous map");
                self.restore_installed_settings();
                Err(err.into())
            }
        }
    }

    fn commit_viewport(&mut self, width: usize, height: usize, metrics: LayoutMetrics) {
        self.width = width;
        self.height = height;
        self.metrics = metrics;
    }

    fn restore_installed_settings(&mut self) {
        let Some(installed) = &self.installed else {
            return;
        };
        let (config, width, height) = (installed.config.clone(), installed.width, installed.height);
        self.metrics = calculate_metrics(width, height, config.view_mode, &config.margins);
        self.config = config;
        self.width = width;
        self.height = height;
    }

    /// Install a persisted dynamic map without wrapping anything. The map
    /// must cover exactly `chapters` chapters.
    pub fn hydrate_from_cache(
        &mut self,
        pages: Vec<Page>,
        width: usize,
        height: usize,
        chapters: usize,
    ) -> Result<(), PaginationError> {
        validate_pages(&pages, chapters)?;
        self.set_viewport(width, height);
        self.install(
            self.key_for(AddressingMode::Dynamic),
            PageMap::Dynamic(pages),
            vec![None; chapters],
        );
        Ok(())
    }

    /// Install a persisted absolute map without wrapping anything.
    pub fn hydrate_absolute_from_cache(
        &mut self,
        entries: Vec<PageMapEntry>,
        width: usize,
        height: usize,
        chapters: usize,
    ) -> Result<(), PaginationError> {
        let consistent = entries.len() == chapters
            && !entries.is_empty()
            && entries
                .iter()
                .enumerate()
                .all(|(idx, e)| e.chapter_index == idx && e.pages_in_chapter >= 1);
        if !consistent {
            return Err(PaginationError::InvalidLayout);
        }
        self.set_viewport(width, height);
        self.install(
            self.key_for(AddressingMode::Absolute),
            PageMap::Absolute(entries),
            vec![None; chapters],
        );
        Ok(())
    }

    /// Install a persisted map for a document of `chapters` chapters. A map
    /// that does not fit is rejected before anything is replaced.
    pub fn install_cached(
        &mut self,
        layout: CachedLayout,
        width: usize,
        height: usize,
        chapters: usize,
    ) -> Result<(), PaginationError> {
        match layout {
            CachedLayout::Absolute(entries) => {
                self.hydrate_absolute_from_cache(entries, width, height, chapters)
            }
            CachedLayout::Dynamic(pages) => self.hydrate_from_cache(pages, width, height, chapters),
        }
    }

    fn install(&mut self, key: LayoutKey, map: PageMap, block_starts: Vec<Option<Vec<usize>>>) {
        let chapter_starts = match &map {
            PageMap::Absolute(entries) => {
                let mut starts = Vec::with_capacity(entries.len());
                let mut total = 0usize;
                for entry in entries {
                    starts.push(total);
                    total += entry.pages_in_chapter;
                }
                starts
            }
            PageMap::Dynamic(pages) => {
                let mut starts = Vec::new();
                for (idx, page) in pages.iter().enumerate() {
                    if page.page_in_chapter == 0 {
                        starts.push(idx);
                    }
                }
                starts
            }
        };
        self.page_cache.clear();
        self.installed = Some(Installed {
            key,
            config: self.config.clone(),
            width: self.width,
            height: self.height,
            map,
            chapter_starts,
            block_starts,
        });
        info!(target: "pagination", key = %key, pages = self.total_pages(), "page map installed");
    }

    /// The installed map, for persistence.
    pub fn export_layout(&self) -> Option<(LayoutKey, CachedLayout)> {
        let installed = self.installed.as_ref()?;
        let layout = match &installed.map {
            PageMap::Absolute(entries) => CachedLayout::Absolute(entries.clone()),
            PageMap::Dynamic(pages) => CachedLayout::Dynamic(
                pages
                    .iter()
                    .map(|p| Page {
                        lines: None,
                        ..p.clone()
                    })
                    .collect(),
            ),
        };
        Some((installed.key, layout))
    }

    pub fn total_pages(&self) -> usize {
        match self.installed.as_ref().map(|i| &i.map) {
            Some(PageMap::Absolute(entries)) => entries.iter().map(|e| e.pages_in_chapter).sum(),
            Some(PageMap::Dynamic(pages)) => pages.len(),
            None => 0,
        }
    }

    /// Pages per chapter, in chapter order.
    pub fn page_map(&self) -> Vec<usize> {
        match self.installed.as_ref().map(|i| &i.map) {
            Some(PageMap::Absolute(entries)) => {
                entries.iter().map(|e| e.pages_in_chapter).collect()
            }
            Some(PageMap::Dynamic(pages)) => {
                let mut out: Vec<usize> = Vec::new();
                for page in pages {
                    if page.page_in_chapter == 0 {
                        out.push(page.total_pages_in_chapter);
                    }
                }
                out
            }
            None => Vec::new(),
        }
    }

    pub fn dynamic_pages(&self) -> Option<&[Page]> {
        match self.installed.as_ref().map(|i| &i.map) {
            Some(PageMap::Dynamic(pages)) => Some(pages),
            _ => None,
        }
    }

    pub fn chapter_count(&self) -> usize {
        self.installed
            .as_ref()
            .map(|i| i.chapter_starts.len())
            .unwrap_or(0)
    }

    pub fn chapter_starts(&self) -> &[usize] {
        self.installed
            .as_ref()
            .map(|i| i.chapter_starts.as_slice())
            .unwrap_or(&[])
    }

    pub fn chapter_start_page(&self, chapter: usize) -> Option<usize> {
        self.chapter_starts().get(chapter).copied()
    }

    pub fn pages_in_chapter(&self, chapter: usize) -> Option<usize> {
        match self.installed.as_ref().map(|i| &i.map) {
            Some(PageMap::Absolute(entries)) => entries.get(chapter).map(|e| e.pages_in_chapter),
            Some(PageMap::Dynamic(pages)) => {
                let start = self.chapter_start_page(chapter)?;
                pages.get(start).map(|p| p.total_pages_in_chapter)
            }
            None => None,
        }
    }

    /// Starting line offset of the chapter's last page.
    pub fn max_offset_for(&self, chapter: usize) -> usize {
        match self.installed.as_ref().map(|i| &i.map) {
            Some(PageMap::Absolute(entries)) => entries
                .get(chapter)
                .map(|e| e.pages_in_chapter.saturating_sub(1) * self.lines_per_page())
                .unwrap_or(0),
            Some(PageMap::Dynamic(pages)) => self
                .chapter_start_page(chapter)
                .and_then(|start| {
                    let last = start + pages.get(start)?.total_pages_in_chapter - 1;
                    pages.get(last).map(|p| p.start_line)
                })
                .unwrap_or(0),
            None => 0,
        }
    }

    fn chapter_of_page(&self, index: usize) -> usize {
        self.chapter_starts()
            .partition_point(|start| *start <= index)
            .saturating_sub(1)
    }

    /// Chapter and first line shown by a page.
    pub fn position_of(&self, index: usize) -> Option<(usize, usize)> {
        match self.installed.as_ref().map(|i| &i.map)? {
            PageMap::Dynamic(pages) => pages.get(index).map(|p| (p.chapter_index, p.start_line)),
            PageMap::Absolute(_) => {
                if index >= self.total_pages() {
                    return None;
                }
                let chapter = self.chapter_of_page(index);
                let page_in_chapter = index - self.chapter_start_page(chapter)?;
                Some((chapter, page_in_chapter * self.lines_per_page()))
            }
        }
    }

    /// Global page showing `(chapter, line_offset)` in the installed map.
    pub fn find_page_index(&self, chapter: usize, line_offset: usize) -> usize {
        match self.installed.as_ref().map(|i| &i.map) {
            Some(PageMap::Dynamic(pages)) => find_page_index(pages, chapter, line_offset),
            Some(PageMap::Absolute(entries)) => {
                if entries.is_empty() {
                    return 0;
                }
                let chapter = chapter.min(entries.len() - 1);
                let start = self.chapter_starts()[chapter];
                let page = line_offset / self.lines_per_page().max(1);
                start + page.min(entries[chapter].pages_in_chapter - 1)
            }
            None => 0,
        }
    }

    pub fn page_label(&self, index: usize) -> Option<PageLabel> {
        if index >= self.total_pages() {
            return None;
        }
        let chapter = self.chapter_of_page(index);
        let start = self.chapter_start_page(chapter)?;
        Some(PageLabel {
            page_in_chapter: index - start + 1,
            total_in_chapter: self.pages_in_chapter(chapter)?,
            global_page: index + 1,
            total_pages: self.total_pages(),
        })
    }

    /// The page at `index` with its lines filled in.
    pub fn get_page<D: Document + ?Sized>(
        &mut self,
        doc: &D,
        index: usize,
    ) -> Result<Page, PaginationError> {
        if !self.is_ready() {
            return Err(PaginationError::NotReady(self.layout_key()));
        }
        let mut page = self.page_skeleton(index)?;
        if let Some(lines) = self.page_cache.get(&index) {
            page.lines = Some(lines.clone());
            return Ok(page);
        }
        let block_starts = self
            .installed
            .as_ref()
            .and_then(|i| i.block_starts.get(page.chapter_index))
            .and_then(|s| s.as_deref());
        let lines = wrap_window_indexed(
            doc,
            page.chapter_index,
            self.metrics.column_width,
            page.start_line,
            page.span(),
            &self.config,
            self.column_lines(),
            block_starts,
        )?;
        self.page_cache.put(index, lines.clone());
        page.lines = Some(lines);
        Ok(page)
    }

    fn page_skeleton(&self, index: usize) -> Result<Page, PaginationError> {
        let installed = self
            .installed
            .as_ref()
            .ok_or(PaginationError::NotReady(self.layout_key()))?;
        match &installed.map {
            PageMap::Dynamic(pages) => pages
                .get(index)
                .map(|p| Page {
                    lines: None,
                    ..p.clone()
                })
                .ok_or(PaginationError::PageOutOfRange(index)),
            PageMap::Absolute(entries) => {
                if index >= self.total_pages() {
                    return Err(PaginationError::PageOutOfRange(index));
                }
                let chapter = self.chapter_of_page(index);
                let entry = entries[chapter];
                let page_in_chapter = index - installed.chapter_starts[chapter];
                let lines_per_page = self.lines_per_page();
                let start_line = page_in_chapter * lines_per_page;
                let end_line = (start_line + lines_per_page)
                    .min(entry.line_count)
                    .saturating_sub(1)
                    .max(start_line);
                Ok(Page {
                    chapter_index: chapter,
                    start_line,
                    end_line,
                    page_in_chapter,
                    total_pages_in_chapter: entry.pages_in_chapter,
                    lines: None,
                })
            }
        }
    }
}

fn scan_chapters<D: Document + ?Sized>(
    doc: &D,
    column_width: usize,
    column_lines: usize,
    config: &ReaderConfig,
    mut progress: impl FnMut(usize, usize),
) -> Result<Vec<ChapterScan>, DocumentError> {
    let total = doc.chapter_count();
    let mut scans = Vec::with_capacity(total);
    for idx in 0..total {
        let chapter = doc.chapter(idx)?;
        let formatted = format_chapter(chapter, column_width, config, column_lines);
        scans.push(ChapterScan {
            line_count: formatted.lines.len(),
            block_starts: formatted.block_starts,
        });
        progress(idx + 1, total);
    }
    Ok(scans)
}

fn chapter_pages(chapter_index: usize, line_count: usize, lines_per_page: usize) -> Vec<Page> {
    let lines_per_page = lines_per_page.max(1);
    let total = line_count.div_ceil(lines_per_page).max(1);
    (0..total)
        .map(|page_in_chapter| {
            let start_line = page_in_chapter * lines_per_page;
            let end_line = if line_count == 0 {
                0
            } else {
                (start_line + lines_per_page).min(line_count) - 1
            };
            Page {
                chapter_index,
                start_line,
                end_line,
                page_in_chapter,
                total_pages_in_chapter: total,
                lines: None,
            }
        })
        .collect()
}

/// The flat dynamic page list for a document.
pub fn build_page_map<D: Document + ?Sized>(
    doc: &D,
    column_width: usize,
    lines_per_page: usize,
    config: &ReaderConfig,
) -> Result<Vec<Page>, DocumentError> {
    let scans = scan_chapters(doc, column_width, lines_per_page, config, |_, _| {})?;
    Ok(scans
        .iter()
        .enumerate()
        .flat_map(|(idx, scan)| chapter_pages(idx, scan.line_count, lines_per_page))
        .collect())
}

/// Page containing `(chapter, line_offset)`, or the nearest one.
pub fn find_page_index(pages: &[Page], chapter: usize, line_offset: usize) -> usize {
    if pages.is_empty() {
        return 0;
    }
    let idx = pages.partition_point(|p| (p.chapter_index, p.end_line) < (chapter, line_offset));
    if idx >= pages.len() {
        return pages.len() - 1;
    }
    if pages[idx].chapter_index != chapter && idx > 0 && pages[idx - 1].chapter_index == chapter {
        // Past the end of the chapter.
        return idx - 1;
    }
    idx
}

fn validate_pages(pages: &[Page], chapters: usize) -> Result<(), PaginationError> {
    if pages.is_empty() {
        return Err(PaginationError::InvalidLayout);
    }
    let mut expected_chapter = 0usize;
    let mut expected_line = 0usize;
    for page in pages {
        if page.page_in_chapter == 0 {
            if page.chapter_index != expected_chapter || page.start_line != 0 {
                return Err(PaginationError::InvalidLayout);
            }
            expected_chapter += 1;
        } else if page.start_line != expected_line {
            return Err(PaginationError::InvalidLayout);
        }
        if page.end_line < page.start_line || page.page_in_chapter >= page.total_pages_in_chapter {
            return Err(PaginationError::InvalidLayout);
        }
        expected_line = page.end_line + 1;
    }
    if expected_chapter != chapters {
        return Err(PaginationError::InvalidLayout);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Book, Chapter, ContentBlock, ContentFormat, StyledSegment};

    fn pages_of(counts: &[usize], lpp: usize) -> Vec<Page> {
        counts
            .iter()
            .enumerate()
            .flat_map(|(idx, n)| chapter_pages(idx, *n, lpp))
            .collect()
    }

    #[test]
    fn chapter_pages_partition_lines() {
        let pages = chapter_pages(0, 50, 21);
        let spans: Vec<(usize, usize)> = pages.iter().map(|p| (p.start_line, p.end_line)).collect();
        assert_eq!(spans, vec![(0, 20), (21, 41), (42, 49)]);
        assert!(pages.iter().all(|p| p.total_pages_in_chapter == 3));
    }

    #[test]
    fn empty_chapter_still_has_a_page() {
        let pages = chapter_pages(4, 0, 21);
        assert_eq!(pages.len(), 1);
        assert_eq!((pages[0].start_line, pages[0].end_line), (0, 0));
    }

    #[test]
    fn find_page_index_hits_and_clamps() {
        let pages = pages_of(&[50, 0, 10], 21);
        assert_eq!(find_page_index(&pages, 0, 0), 0);
        assert_eq!(find_page_index(&pages, 0, 21), 1);
        assert_eq!(find_page_index(&pages, 0, 49), 2);
        assert_eq!(find_page_index(&pages, 0, 500), 2);
        assert_eq!(find_page_index(&pages, 1, 0), 3);
        assert_eq!(find_page_index(&pages, 2, 5), 4);
        assert_eq!(find_page_index(&pages, 9, 0), 4);
        assert_eq!(find_page_index(&[], 0, 0), 0);
    }

    #[test]
    fn validation_rejects_gaps() {
        let mut pages = pages_of(&[50, 10], 21);
        assert!(validate_pages(&pages, 2).is_ok());
        assert!(validate_pages(&pages, 3).is_err());
        pages[1].start_line = 22;
        assert!(validate_pages(&pages, 2).is_err());
    }

    fn small_book() -> Book {
        let chapters = (0..3)
            .map(|c| {
                let blocks = (0..c * 4)
                    .map(|i| ContentBlock::paragraph(vec![StyledSegment::plain(format!("line {i}"))]))
                    .collect();
                Chapter::new(c + 1, format!("C{c}"), "", ContentFormat::Text).with_blocks(blocks)
            })
            .collect();
        Book::new("Small", chapters)
    }

    fn config() -> ReaderConfig {
        let mut config = ReaderConfig::default();
        config.margins.horizontal = 0;
        config.margins.header_rows = 0;
        config.margins.footer_rows = 0;
        config
    }

    #[test]
    fn get_page_requires_installed_key() {
        let book = small_book();
        let mut engine = PaginationEngine::new(config(), 20, 5);
        assert!(matches!(
            engine.get_page(&book, 0),
            Err(PaginationError::NotReady(_))
        ));
        engine.build(&book, |_, _| {}).unwrap();
        let page = engine.get_page(&book, 0).unwrap();
        assert_eq!(page.chapter_index, 0);
        assert_eq!(page.lines.as_deref(), Some(&[][..]));
        assert!(matches!(
            engine.get_page(&book, 99),
            Err(PaginationError::PageOutOfRange(99))
        ));
    }

    #[test]
    fn progress_reports_each_chapter() {
        let book = small_book();
        let mut engine = PaginationEngine::new(config(), 20, 5);
        let mut calls = Vec::new();
        engine.build(&book, |done, total| calls.push((done, total))).unwrap();
        assert_eq!(calls, vec![(1, 3), (2, 3), (3, 3)]);
    }

    #[test]
    fn absolute_pages_cover_spreads() {
        let book = small_book();
        let mut config = config();
        config.page_numbering_mode = AddressingMode::Absolute;
        config.view_mode = crate::config::ViewMode::Split;
        let mut engine = PaginationEngine::new(config, 40, 5);
        engine.build(&book, |_, _| {}).unwrap();
        // Chapter 2 has 8 paragraphs, 16 lines; a spread holds 10.
        assert_eq!(engine.page_map(), vec![1, 1, 2]);
        assert_eq!(engine.max_offset_for(2), 10);
        let page = engine.get_page(&book, 3).unwrap();
        assert_eq!((page.chapter_index, page.start_line, page.end_line), (2, 10, 15));
        assert_eq!(page.lines.map(|l| l.len()), Some(6));
        assert_eq!(engine.position_of(3), Some((2, 10)));
        assert_eq!(engine.find_page_index(2, 12), 3);
    }

    #[test]
    fn export_strips_hydrated_lines() {
        let book = small_book();
        let mut engine = PaginationEngine::new(config(), 20, 5);
        engine.build(&book, |_, _| {}).unwrap();
        engine.get_page(&book, 1).unwrap();
        let (key, layout) = engine.export_layout().unwrap();
        assert_eq!(key, engine.layout_key());
        let CachedLayout::Dynamic(pages) = layout else {
            panic!("expected a dynamic layout");
        };
        assert!(pages.iter().all(|p| p.lines.is_none()));
    }
}

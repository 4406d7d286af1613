use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use once_cell::unsync::OnceCell;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Chapter {0} does not exist")]
    MissingChapter(usize),
    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),
    #[error("Document has no readable content")]
    Empty,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum InlineStyle {
    #[default]
    Plain,
    Bold,
    Italic,
    Code,
    Quote,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StyledSegment {
    pub text: String,
    #[serde(default)]
    pub style: InlineStyle,
}

impl StyledSegment {
    pub fn new(text: impl Into<String>, style: InlineStyle) -> Self {
        Self {
            text: text.into(),
            style,
        }
    }

    pub fn plain(text: impl Into<String>) -> Self {
        Self::new(text, InlineStyle::Plain)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Heading,
    Paragraph,
    ListItem,
    Code,
    Blockquote,
    ImageSpacer,
    /// A kind written by a newer cache format.
    #[serde(other)]
    Unknown,
}

pub mod meta {
    pub const ORDERED: &str = "ordered";
    pub const ORDINAL: &str = "ordinal";
    pub const DEPTH: &str = "depth";
    pub const LANG: &str = "lang";
    pub const SRC: &str = "src";
    pub const ALT: &str = "alt";
    pub const CAPTION: &str = "caption";
    pub const WIDTH: &str = "width";
    pub const HEIGHT: &str = "height";
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContentBlock {
    pub kind: BlockKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<u8>,
    #[serde(default)]
    pub segments: Vec<StyledSegment>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl ContentBlock {
    pub fn new(kind: BlockKind, segments: Vec<StyledSegment>) -> Self {
        Self {
            kind,
            level: None,
            segments,
            metadata: BTreeMap::new(),
        }
    }

    pub fn paragraph(segments: Vec<StyledSegment>) -> Self {
        Self::new(BlockKind::Paragraph, segments)
    }

    pub fn heading(level: u8, segments: Vec<StyledSegment>) -> Self {
        let mut block = Self::new(BlockKind::Heading, segments);
        block.level = Some(level.clamp(1, 6));
        block
    }

    pub fn list_item(segments: Vec<StyledSegment>, ordinal: Option<usize>, depth: usize) -> Self {
        let mut block = Self::new(BlockKind::ListItem, segments);
        block.set_meta(meta::ORDERED, ordinal.is_some().to_string());
        if let Some(n) = ordinal {
            block.set_meta(meta::ORDINAL, n.to_string());
        }
        block.set_meta(meta::DEPTH, depth.to_string());
        block
    }

    pub fn code(lang: Option<String>, text: impl Into<String>) -> Self {
        let mut block = Self::new(
            BlockKind::Code,
            vec![StyledSegment::new(text, InlineStyle::Code)],
        );
        if let Some(lang) = lang {
            block.set_meta(meta::LANG, lang);
        }
        block
    }

    pub fn blockquote(segments: Vec<StyledSegment>) -> Self {
        Self::new(BlockKind::Blockquote, segments)
    }

    pub fn image(src: &str, alt: Option<&str>, width: Option<u32>, height: Option<u32>) -> Self {
        let mut block = Self::new(BlockKind::ImageSpacer, Vec::new());
        block.set_meta(meta::SRC, src);
        if let Some(alt) = alt.filter(|a| !a.trim().is_empty()) {
            block.set_meta(meta::ALT, alt.trim());
        }
        if let Some(w) = width {
            block.set_meta(meta::WIDTH, w.to_string());
        }
        if let Some(h) = height {
            block.set_meta(meta::HEIGHT, h.to_string());
        }
        block
    }

    pub fn set_meta(&mut self, key: &str, value: impl Into<String>) {
        self.metadata.insert(key.to_string(), value.into());
    }

    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    pub fn meta_usize(&self, key: &str) -> Option<usize> {
        self.meta(key).and_then(|v| v.trim().parse().ok())
    }

    pub fn plain_text(&self) -> String {
        self.segments.iter().map(|s| s.text.as_str()).collect()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContentFormat {
    Html,
    Markdown,
    #[default]
    Text,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChapterMeta {
    pub source_path: Option<String>,
    pub href: Option<String>,
}

/// One chapter. `raw_content` is authoritative; blocks and plain lines are
/// derived from it at most once.
#[derive(Debug, Clone)]
pub struct Chapter {
    pub number: usize,
    pub title: String,
    pub raw_content: String,
    pub format: ContentFormat,
    pub metadata: ChapterMeta,
    blocks: OnceCell<Vec<ContentBlock>>,
    lines: OnceCell<Vec<String>>,
}

impl Chapter {
    pub fn new(
        number: usize,
        title: impl Into<String>,
        raw_content: impl Into<String>,
        format: ContentFormat,
    ) -> Self {
        Self {
            number,
            title: title.into(),
            raw_content: raw_content.into(),
            format,
            metadata: ChapterMeta::default(),
            blocks: OnceCell::new(),
            lines: OnceCell::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: ChapterMeta) -> Self {
        self.metadata = metadata;
        self
    }

    /// Seed already-parsed blocks, e.g. when restored from the cache.
    pub fn with_blocks(self, blocks: Vec<ContentBlock>) -> Self {
        // A fresh cell never rejects its first value.
        let _ = self.blocks.set(blocks);
        self
    }

    pub fn blocks(&self) -> &[ContentBlock] {
        self.blocks.get_or_init(|| match self.format {
            ContentFormat::Html => crate::normalize::html_to_blocks(&self.raw_content),
            ContentFormat::Markdown => crate::text::markdown_blocks(&self.raw_content),
            ContentFormat::Text => crate::text::text_blocks(&self.raw_content),
        })
    }

    pub fn has_blocks(&self) -> bool {
        self.blocks.get().is_some()
    }

    /// Plain text lines, one per block.
    pub fn lines(&self) -> &[String] {
        self.lines
            .get_or_init(|| self.blocks().iter().map(ContentBlock::plain_text).collect())
    }
}

/// Read access to a loaded document.
pub trait Document {
    fn title(&self) -> &str;
    fn chapter_count(&self) -> usize;
    fn chapter(&self, index: usize) -> Result<&Chapter, DocumentError>;
    fn canonical_path(&self) -> Option<&Path>;
    fn cache_sha(&self) -> Option<&str>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub href: String,
    pub media_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct Book {
    pub title: String,
    pub author: Option<String>,
    pub chapters: Vec<Chapter>,
    pub resources: Vec<Resource>,
    path: Option<PathBuf>,
    sha: Option<String>,
}

impl Book {
    pub fn new(title: impl Into<String>, chapters: Vec<Chapter>) -> Self {
        Self {
            title: title.into(),
            chapters,
            ..Self::default()
        }
    }

    pub fn with_source(mut self, path: PathBuf, sha: Option<String>) -> Self {
        self.path = Some(path);
        self.sha = sha;
        self
    }

    pub fn set_cache_sha(&mut self, sha: impl Into<String>) {
        self.sha = Some(sha.into());
    }

    pub fn resource(&self, href: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.href == href)
    }
}

impl Document for Book {
    fn title(&self) -> &str {
        &self.title
    }

    fn chapter_count(&self) -> usize {
        self.chapters.len()
    }

    fn chapter(&self, index: usize) -> Result<&Chapter, DocumentError> {
        self.chapters
            .get(index)
            .ok_or(DocumentError::MissingChapter(index))
    }

    fn canonical_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn cache_sha(&self) -> Option<&str> {
        self.sha.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chapter_blocks_are_parsed_once() {
        let chapter = Chapter::new(1, "One", "First para.\n\nSecond para.", ContentFormat::Text);
        assert!(!chapter.has_blocks());
        let first = chapter.blocks().as_ptr();
        assert_eq!(chapter.blocks().len(), 2);
        assert_eq!(chapter.blocks().as_ptr(), first);
        assert_eq!(chapter.lines(), ["First para.", "Second para."]);
    }

    #[test]
    fn seeded_blocks_skip_parsing() {
        let seeded = vec![ContentBlock::paragraph(vec![StyledSegment::plain("cached")])];
        let chapter =
            Chapter::new(1, "One", "raw text differs", ContentFormat::Text).with_blocks(seeded);
        assert_eq!(chapter.blocks()[0].plain_text(), "cached");
    }

    #[test]
    fn unknown_block_kind_deserializes() {
        let block: ContentBlock =
            serde_json::from_str(r#"{"kind":"table","segments":[]}"#).unwrap();
        assert_eq!(block.kind, BlockKind::Unknown);
    }

    #[test]
    fn missing_chapter_is_an_error() {
        let book = Book::new("Empty", Vec::new());
        assert!(matches!(
            book.chapter(0),
            Err(DocumentError::MissingChapter(0))
        ));
    }
}

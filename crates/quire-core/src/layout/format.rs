use tracing::warn;

use crate::{
    cells::{center, truncate_to, visible_length, wrap_runs},
    config::{ImageMode, ReaderConfig},
    types::{meta, BlockKind, Chapter, ContentBlock, Document, DocumentError},
};

use super::inline::{push_styled, split_dialogue, wrap_style, LineStyle};
use super::{ImagePlacement, WrappedLine};

const DEFAULT_IMAGE_ROWS: usize = 6;
const MIN_IMAGE_ROWS: usize = 3;
const QUOTE_RULE_MIN_WIDTH: usize = 16;
const TAB: &str = "    ";

/// Wrapped lines of one chapter plus the line at which every block starts.
#[derive(Debug, Clone, Default)]
pub struct FormattedChapter {
    pub lines: Vec<WrappedLine>,
    pub block_starts: Vec<usize>,
}

/// Format a whole chapter into display lines.
pub fn wrap_all<D: Document + ?Sized>(
    document: &D,
    chapter_index: usize,
    column_width: usize,
    config: &ReaderConfig,
    lines_per_page: usize,
) -> Result<Vec<WrappedLine>, DocumentError> {
    let chapter = document.chapter(chapter_index)?;
    Ok(format_chapter(chapter, column_width, config, lines_per_page).lines)
}

/// Lines `offset..offset + length` of a chapter, formatting no further than
/// the end of the window.
pub fn wrap_window<D: Document + ?Sized>(
    document: &D,
    chapter_index: usize,
    column_width: usize,
    offset: usize,
    length: usize,
    config: &ReaderConfig,
    lines_per_page: usize,
) -> Result<Vec<WrappedLine>, DocumentError> {
    wrap_window_indexed(
        document,
        chapter_index,
        column_width,
        offset,
        length,
        config,
        lines_per_page,
        None,
    )
}

/// As [`wrap_window`], also skipping the blocks that end before `offset`
/// when the chapter's block start lines are known.
#[allow(clippy::too_many_arguments)]
pub fn wrap_window_indexed<D: Document + ?Sized>(
    document: &D,
    chapter_index: usize,
    column_width: usize,
    offset: usize,
    length: usize,
    config: &ReaderConfig,
    lines_per_page: usize,
    block_starts: Option<&[usize]>,
) -> Result<Vec<WrappedLine>, DocumentError> {
    let chapter = document.chapter(chapter_index)?;
    let blocks = chapter.blocks();
    let formatter = Formatter::new(column_width, config, lines_per_page);
    let end = offset.saturating_add(length);

    let (first_block, mut line_no) = match block_starts {
        Some(starts) if !starts.is_empty() && starts.len() == blocks.len() => {
            let block = starts.partition_point(|s| *s <= offset).saturating_sub(1);
            (block, starts[block])
        }
        _ => (0, 0),
    };

    let mut window = Vec::with_capacity(length.min(256));
    let mut scratch = Vec::new();
    for idx in first_block..blocks.len() {
        if line_no >= end {
            break;
        }
        formatter.format_block(&blocks[idx], blocks.get(idx + 1), &mut scratch);
        for line in scratch.drain(..) {
            if line_no >= offset && line_no < end {
                window.push(line);
            }
            line_no += 1;
        }
    }
    Ok(window)
}

pub fn format_chapter(
    chapter: &Chapter,
    column_width: usize,
    config: &ReaderConfig,
    lines_per_page: usize,
) -> FormattedChapter {
    let formatter = Formatter::new(column_width, config, lines_per_page);
    let blocks = chapter.blocks();
    let mut out = FormattedChapter {
        lines: Vec::new(),
        block_starts: Vec::with_capacity(blocks.len()),
    };
    for (idx, block) in blocks.iter().enumerate() {
        out.block_starts.push(out.lines.len());
        formatter.format_block(block, blocks.get(idx + 1), &mut out.lines);
    }
    out
}

pub(crate) fn image_rows(
    width: Option<usize>,
    height: Option<usize>,
    cols: usize,
    max_rows: usize,
) -> usize {
    // Terminal cells are about twice as tall as they are wide.
    let rows = match (width, height) {
        (Some(w), Some(h)) if w > 0 => (h * cols.max(1)).div_ceil(w * 2),
        _ => DEFAULT_IMAGE_ROWS,
    };
    rows.max(MIN_IMAGE_ROWS).min(max_rows.max(1))
}

type Runs = Vec<(LineStyle, String)>;

struct Formatter<'a> {
    width: usize,
    config: &'a ReaderConfig,
    lines_per_page: usize,
}

impl<'a> Formatter<'a> {
    fn new(width: usize, config: &'a ReaderConfig, lines_per_page: usize) -> Self {
        Self {
            width: width.max(1),
            config,
            lines_per_page: lines_per_page.max(1),
        }
    }

    fn format_block(
        &self,
        block: &ContentBlock,
        next: Option<&ContentBlock>,
        out: &mut Vec<WrappedLine>,
    ) {
        if block.kind == BlockKind::Unknown
            || (block.kind != BlockKind::ImageSpacer && block.segments.is_empty())
        {
            warn!(target: "format", kind = ?block.kind, "malformed block replaced by a blank line");
            out.push(WrappedLine::blank());
            return;
        }
        match block.kind {
            BlockKind::Heading => self.heading(block, out),
            BlockKind::Paragraph => {
                let runs = self.runs(block);
                self.push_wrapped(&runs, "", "", None, out);
            }
            BlockKind::ListItem => {
                self.list_item(block, out);
                if next.is_some_and(|n| n.kind == BlockKind::ListItem) {
                    return;
                }
            }
            BlockKind::Code => self.code(block, out),
            BlockKind::Blockquote => {
                let prefix = if self.width >= QUOTE_RULE_MIN_WIDTH {
                    "│ "
                } else {
                    "  "
                };
                let runs = self.runs(block);
                self.push_wrapped(&runs, prefix, prefix, Some(LineStyle::Quote), out);
            }
            BlockKind::ImageSpacer => self.image(block, out),
            BlockKind::Unknown => {}
        }
        out.push(WrappedLine::blank());
    }

    fn runs(&self, block: &ContentBlock) -> Runs {
        let highlight = self.config.highlight_quotes;
        let mut runs = Runs::new();
        for seg in &block.segments {
            let style = LineStyle::from_inline(seg.style, highlight);
            if highlight && style == LineStyle::Plain {
                for (quoted, part) in split_dialogue(&seg.text) {
                    let style = if quoted {
                        LineStyle::Quote
                    } else {
                        LineStyle::Plain
                    };
                    runs.push((style, part.to_string()));
                }
            } else {
                runs.push((style, seg.text.clone()));
            }
        }
        runs
    }

    fn push_wrapped(
        &self,
        runs: &[(LineStyle, String)],
        first_prefix: &str,
        rest_prefix: &str,
        line_style: Option<LineStyle>,
        out: &mut Vec<WrappedLine>,
    ) {
        let prefix_width = visible_length(first_prefix).max(visible_length(rest_prefix));
        let available = self.width.saturating_sub(prefix_width).max(1);
        let refs: Vec<(LineStyle, &str)> = runs.iter().map(|(s, t)| (*s, t.as_str())).collect();
        for (idx, line) in wrap_runs(&refs, available).into_iter().enumerate() {
            let prefix = if idx == 0 { first_prefix } else { rest_prefix };
            let mut text = String::from(prefix);
            let mut styled = String::new();
            for (style, piece) in &line {
                text.push_str(piece);
                push_styled(&mut styled, *style, piece);
            }
            let styled = match line_style {
                Some(style) => wrap_style(style, &styled),
                None => styled,
            };
            out.push(self.fit(text, format!("{prefix}{styled}")));
        }
    }

    fn heading(&self, block: &ContentBlock, out: &mut Vec<WrappedLine>) {
        let level = block.level.unwrap_or(1);
        let centered = level <= 2 || self.config.center_headings;
        let runs: Runs = block
            .segments
            .iter()
            .map(|seg| match LineStyle::from_inline(seg.style, self.config.highlight_quotes) {
                LineStyle::Plain => (LineStyle::Bold, seg.text.clone()),
                style => (style, seg.text.clone()),
            })
            .collect();
        let refs: Vec<(LineStyle, &str)> = runs.iter().map(|(s, t)| (*s, t.as_str())).collect();
        for line in wrap_runs(&refs, self.width) {
            let mut text = String::new();
            let mut styled = String::new();
            for (style, piece) in &line {
                text.push_str(piece);
                push_styled(&mut styled, *style, piece);
            }
            let styled = wrap_style(LineStyle::Heading, &styled);
            let pad = if centered {
                self.width.saturating_sub(visible_length(&text)) / 2
            } else {
                0
            };
            let indent = " ".repeat(pad);
            out.push(self.fit(format!("{indent}{text}"), format!("{indent}{styled}")));
        }
    }

    fn list_item(&self, block: &ContentBlock, out: &mut Vec<WrappedLine>) {
        let marker = match block.meta_usize(meta::ORDINAL) {
            Some(n) if block.meta(meta::ORDERED) == Some("true") => format!("{n}. "),
            _ => "• ".to_string(),
        };
        let marker_width = visible_length(&marker);
        let depth = block.meta_usize(meta::DEPTH).unwrap_or(0);
        let indent_width = (depth * 2).min(self.width.saturating_sub(marker_width + 1));
        let indent = " ".repeat(indent_width);
        let first = format!("{indent}{marker}");
        let rest = format!("{indent}{}", " ".repeat(marker_width));
        let runs = self.runs(block);
        self.push_wrapped(&runs, &first, &rest, None, out);
    }

    fn code(&self, block: &ContentBlock, out: &mut Vec<WrappedLine>) {
        let text = block.plain_text();
        for raw in text.split('\n') {
            let expanded = raw.trim_end_matches('\r').replace('\t', TAB);
            let clipped = truncate_to(&expanded, self.width);
            let styled = wrap_style(LineStyle::Code, &clipped);
            out.push(WrappedLine::styled(clipped, styled));
        }
    }

    fn image(&self, block: &ContentBlock, out: &mut Vec<WrappedLine>) {
        let rows = image_rows(
            block.meta_usize(meta::WIDTH),
            block.meta_usize(meta::HEIGHT),
            self.width,
            self.lines_per_page,
        );
        let alt = block.meta(meta::ALT);
        for row in 0..rows {
            let mut line = WrappedLine::blank();
            line.metadata.image_spacer = true;
            if row == 0 {
                line.metadata.image = Some(ImagePlacement {
                    id: block.meta(meta::SRC).unwrap_or_default().to_string(),
                    cols: self.width,
                    rows,
                });
                if self.config.image_mode == ImageMode::Placeholder {
                    let label = match alt {
                        Some(alt) => format!("[image: {alt}]"),
                        None => "[image]".to_string(),
                    };
                    let label = truncate_to(&label, self.width);
                    let pad = " ".repeat(self.width.saturating_sub(visible_length(&label)) / 2);
                    line.styled_text = format!("{pad}{}", wrap_style(LineStyle::Italic, &label));
                    line.text = center(&label, self.width);
                }
            }
            out.push(line);
        }
        if let Some(caption) = block.meta(meta::CAPTION).or(alt) {
            let runs = vec![(LineStyle::Italic, caption.to_string())];
            self.push_wrapped(&runs, "", "", None, out);
        }
    }

    /// Clip a line that a prefix pushed past the column.
    fn fit(&self, text: String, styled: String) -> WrappedLine {
        if visible_length(&text) <= self.width {
            return WrappedLine::styled(text, styled);
        }
        WrappedLine::styled(truncate_to(&text, self.width), truncate_to(&styled, self.width))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::parse_styled;
    use crate::types::{Book, ContentFormat, InlineStyle, StyledSegment};

    fn book_with(blocks: Vec<ContentBlock>) -> Book {
        let chapter = Chapter::new(1, "One", "", ContentFormat::Text).with_blocks(blocks);
        Book::new("Test", vec![chapter])
    }

    fn texts(lines: &[WrappedLine]) -> Vec<&str> {
        lines.iter().map(|l| l.text.as_str()).collect()
    }

    #[test]
    fn paragraphs_wrap_with_one_blank_after() {
        let book = book_with(vec![ContentBlock::paragraph(vec![StyledSegment::plain(
            "alpha beta gamma delta",
        )])]);
        let lines = wrap_all(&book, 0, 11, &ReaderConfig::default(), 20).unwrap();
        assert_eq!(texts(&lines), vec!["alpha beta", "gamma delta", ""]);
    }

    #[test]
    fn headings_center_and_mark() {
        let book = book_with(vec![ContentBlock::heading(
            1,
            vec![StyledSegment::plain("Title")],
        )]);
        let lines = wrap_all(&book, 0, 11, &ReaderConfig::default(), 20).unwrap();
        assert_eq!(texts(&lines), vec!["   Title", ""]);
        let runs = parse_styled(&lines[0].styled_text);
        let title = runs.iter().find(|r| r.text == "Title").unwrap();
        assert!(title.styles.heading && title.styles.bold);
    }

    #[test]
    fn deep_headings_stay_flush_unless_configured() {
        let book = book_with(vec![ContentBlock::heading(
            3,
            vec![StyledSegment::plain("Sub")],
        )]);
        let lines = wrap_all(&book, 0, 11, &ReaderConfig::default(), 20).unwrap();
        assert_eq!(lines[0].text, "Sub");
        let config = ReaderConfig {
            center_headings: true,
            ..ReaderConfig::default()
        };
        let lines = wrap_all(&book, 0, 11, &config, 20).unwrap();
        assert_eq!(lines[0].text, "    Sub");
    }

    #[test]
    fn list_runs_share_one_trailing_blank() {
        let book = book_with(vec![
            ContentBlock::list_item(vec![StyledSegment::plain("first item here")], Some(1), 0),
            ContentBlock::list_item(vec![StyledSegment::plain("second")], Some(2), 0),
            ContentBlock::list_item(vec![StyledSegment::plain("nested")], None, 1),
            ContentBlock::paragraph(vec![StyledSegment::plain("after")]),
        ]);
        let lines = wrap_all(&book, 0, 12, &ReaderConfig::default(), 20).unwrap();
        assert_eq!(
            texts(&lines),
            vec!["1. first", "   item here", "2. second", "  • nested", "", "after", ""]
        );
    }

    #[test]
    fn code_keeps_lines_and_truncates() {
        let book = book_with(vec![ContentBlock::code(
            None,
            "fn main() {\n\tlet value = compute_everything();\n}",
        )]);
        let lines = wrap_all(&book, 0, 20, &ReaderConfig::default(), 20).unwrap();
        assert_eq!(
            texts(&lines),
            vec!["fn main() {", "    let value = comp", "}", ""]
        );
        assert!(lines[0].styled_text.starts_with("\x1Ec"));
    }

    #[test]
    fn blockquotes_get_a_rule_when_wide_enough() {
        let block = ContentBlock::blockquote(vec![StyledSegment::plain("quoted words")]);
        let book = book_with(vec![block]);
        let wide = wrap_all(&book, 0, 20, &ReaderConfig::default(), 20).unwrap();
        assert_eq!(wide[0].text, "│ quoted words");
        let narrow = wrap_all(&book, 0, 10, &ReaderConfig::default(), 20).unwrap();
        assert_eq!(narrow[0].text, "  quoted");
        assert!(parse_styled(&narrow[0].styled_text)
            .iter()
            .any(|r| r.text == "quoted" && r.styles.quote));
    }

    #[test]
    fn dialogue_highlight_follows_config() {
        let book = book_with(vec![ContentBlock::paragraph(vec![
            StyledSegment::plain("She said \"go\" now"),
            StyledSegment::new("\u{201C}aside\u{201D}", InlineStyle::Quote),
        ])]);
        let on = wrap_all(&book, 0, 40, &ReaderConfig::default(), 20).unwrap();
        let quoted: Vec<String> = parse_styled(&on[0].styled_text)
            .into_iter()
            .filter(|r| r.styles.quote)
            .map(|r| r.text)
            .collect();
        assert_eq!(quoted, vec!["\"go\"", "\u{201C}aside\u{201D}"]);
        let config = ReaderConfig {
            highlight_quotes: false,
            ..ReaderConfig::default()
        };
        let off = wrap_all(&book, 0, 40, &config, 20).unwrap();
        assert_eq!(off[0].styled_text, off[0].text);
    }

    #[test]
    fn images_reserve_rows_from_aspect_ratio() {
        let book = book_with(vec![ContentBlock::image(
            "fig.png",
            Some("A chart"),
            Some(200),
            Some(100),
        )]);
        let lines = wrap_all(&book, 0, 40, &ReaderConfig::default(), 30).unwrap();
        // 100 / 200 * 40 / 2 = 10 rows, then caption and blank.
        assert_eq!(lines.len(), 12);
        assert!(lines[..10].iter().all(|l| l.metadata.image_spacer));
        let placement = lines[0].metadata.image.as_ref().unwrap();
        assert_eq!((placement.cols, placement.rows), (40, 10));
        assert_eq!(lines[0].text.trim(), "[image: A chart]");
        assert_eq!(lines[10].text, "A chart");
    }

    #[test]
    fn image_rows_clamp() {
        assert_eq!(image_rows(None, None, 40, 30), 6);
        assert_eq!(image_rows(Some(1000), Some(10), 40, 30), 3);
        assert_eq!(image_rows(Some(10), Some(1000), 40, 21), 21);
        assert_eq!(image_rows(None, None, 40, 2), 2);
    }

    #[derive(Clone, Default)]
    struct Captured(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn malformed_blocks_become_blank_lines() {
        let mut unknown = ContentBlock::paragraph(vec![StyledSegment::plain("x")]);
        unknown.kind = BlockKind::Unknown;
        let empty = ContentBlock::paragraph(Vec::new());
        let book = book_with(vec![unknown, empty]);

        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .finish();
        let lines = tracing::subscriber::with_default(subscriber, || {
            wrap_all(&book, 0, 20, &ReaderConfig::default(), 20).unwrap()
        });
        assert_eq!(texts(&lines), vec!["", ""]);
        let logs = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert_eq!(logs.matches("malformed block").count(), 2);
    }

    #[test]
    fn window_matches_full_wrap() {
        let blocks: Vec<ContentBlock> = (0..12)
            .map(|i| {
                ContentBlock::paragraph(vec![StyledSegment::plain(format!(
                    "paragraph {i} has enough words to wrap twice"
                ))])
            })
            .collect();
        let book = book_with(blocks);
        let config = ReaderConfig::default();
        let chapter = book.chapters[0].clone();
        let full = format_chapter(&chapter, 20, &config, 10);
        for offset in [0, 3, 7, 15, 30] {
            let plain = wrap_window(&book, 0, 20, offset, 6, &config, 10).unwrap();
            let indexed = wrap_window_indexed(
                &book,
                0,
                20,
                offset,
                6,
                &config,
                10,
                Some(&full.block_starts),
            )
            .unwrap();
            let end = (offset + 6).min(full.lines.len());
            let expected = &full.lines[offset.min(end)..end];
            assert_eq!(plain, expected);
            assert_eq!(indexed, expected);
        }
    }

    #[test]
    fn lines_never_exceed_column_width() {
        let book = book_with(vec![
            ContentBlock::list_item(vec![StyledSegment::plain("deep item")], Some(100), 6),
            ContentBlock::blockquote(vec![StyledSegment::plain("日本語のテキスト")]),
            ContentBlock::heading(1, vec![StyledSegment::plain("Supercalifragilistic")]),
        ]);
        for width in 1..12 {
            let lines = wrap_all(&book, 0, width, &ReaderConfig::default(), 20).unwrap();
            for line in &lines {
                assert!(visible_length(&line.text) <= width, "{line:?} at {width}");
                assert!(visible_length(&line.styled_text) <= width);
            }
        }
    }
}

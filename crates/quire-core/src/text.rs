//! Plain text, markdown and standalone HTML import.

use std::{
    fs,
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::{
    cells::truncate_to,
    normalize,
    types::{
        Book, Chapter, ChapterMeta, ContentBlock, ContentFormat, DocumentError, InlineStyle,
        Resource, StyledSegment,
    },
};

const SEPARATOR: &str = "───";
const TITLE_WIDTH: usize = 60;

/// Load a file from disk as a [`Book`]. Markdown is split into chapters at
/// level 1 and 2 headings, plain text at form feeds and separator lines, and
/// an HTML file becomes a single chapter.
pub fn import_path(path: &Path) -> Result<Book, DocumentError> {
    let format = detect_format(path)?;
    let content = fs::read_to_string(path)?;
    let canonical = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let source = canonical.to_string_lossy().into_owned();

    let pieces = match format {
        ContentFormat::Markdown => split_markdown_chapters(&content),
        ContentFormat::Text => split_text_chapters(&content),
        ContentFormat::Html => vec![(normalize::html_title(&content), content.clone())],
    };

    let chapters: Vec<Chapter> = pieces
        .into_iter()
        .enumerate()
        .map(|(idx, (title, raw))| {
            let title = title.unwrap_or_else(|| format!("Chapter {}", idx + 1));
            Chapter::new(idx + 1, title, raw, format).with_metadata(ChapterMeta {
                source_path: Some(source.clone()),
                href: None,
            })
        })
        .collect();

    let title = match format {
        ContentFormat::Html => normalize::html_title(&content),
        _ => None,
    }
    .or_else(|| title_from_path(path))
    .unwrap_or_else(|| "Untitled".to_string());

    let mut book = Book::new(title, chapters).with_source(canonical.clone(), None);
    if format == ContentFormat::Html {
        book.resources = load_local_images(&canonical, &content);
    }
    debug!(
        path = %canonical.display(),
        chapters = book.chapters.len(),
        resources = book.resources.len(),
        "imported document"
    );
    Ok(book)
}

fn detect_format(path: &Path) -> Result<ContentFormat, DocumentError> {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("md") | Some("markdown") => Ok(ContentFormat::Markdown),
        Some("html") | Some("htm") | Some("xhtml") => Ok(ContentFormat::Html),
        Some("txt") | Some("text") | None => Ok(ContentFormat::Text),
        Some(other @ ("epub" | "pdf" | "mobi" | "azw3")) => {
            Err(DocumentError::UnsupportedFormat(other.to_string()))
        }
        Some(_) => Ok(ContentFormat::Text),
    }
}

fn title_from_path(path: &Path) -> Option<String> {
    let stem = path.file_stem().and_then(|s| s.to_str())?;
    let title = prettify_title(stem);
    if title.is_empty() {
        None
    } else {
        Some(title)
    }
}

fn prettify_title(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_space = false;
    for ch in raw.chars() {
        let mapped = match ch {
            '_' | '-' | '.' => ' ',
            _ => ch,
        };
        if mapped.is_whitespace() {
            if !last_space {
                out.push(' ');
            }
            last_space = true;
        } else {
            out.push(mapped);
            last_space = false;
        }
    }
    out.trim().to_string()
}

fn load_local_images(html_path: &Path, content: &str) -> Vec<Resource> {
    let base = html_path.parent().map(Path::to_path_buf).unwrap_or_default();
    normalize::image_sources(content)
        .into_iter()
        .filter_map(|href| {
            if href.contains("://") || href.starts_with("data:") {
                return None;
            }
            let file: PathBuf = base.join(&href);
            let data = fs::read(&file).ok()?;
            Some(Resource {
                media_type: media_type_for(&href).to_string(),
                href,
                data,
            })
        })
        .collect()
}

fn media_type_for(href: &str) -> &'static str {
    let ext = href
        .rsplit('.')
        .next()
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

fn split_markdown_chapters(content: &str) -> Vec<(Option<String>, String)> {
    let mut chapters: Vec<(Option<String>, String)> = Vec::new();
    let mut title: Option<String> = None;
    let mut body = String::new();
    let mut in_fence: Option<char> = None;

    for line in content.lines() {
        let trimmed = line.trim();
        if let Some((fence, _)) = parse_fence(trimmed) {
            match in_fence {
                Some(open) if open == fence => in_fence = None,
                None => in_fence = Some(fence),
                _ => {}
            }
        } else if in_fence.is_none() {
            if let Some((level, text)) = parse_atx_heading(trimmed) {
                if level <= 2 {
                    if !body.trim().is_empty() {
                        chapters.push((title.take(), std::mem::take(&mut body)));
                    }
                    body.clear();
                    title = Some(text);
                }
            }
        }
        body.push_str(line);
        body.push('\n');
    }
    if !body.trim().is_empty() || chapters.is_empty() {
        chapters.push((title, body));
    }
    chapters
}

fn split_text_chapters(content: &str) -> Vec<(Option<String>, String)> {
    let mut chapters: Vec<(Option<String>, String)> = Vec::new();
    let mut body = String::new();
    let mut flush = |body: &mut String| {
        if !body.trim().is_empty() {
            let title = body
                .lines()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .map(|l| truncate_to(l, TITLE_WIDTH));
            chapters.push((title, std::mem::take(body)));
        }
        body.clear();
    };
    for line in content.lines() {
        if line.contains('\u{000C}') || is_separator_line(line) {
            flush(&mut body);
            continue;
        }
        body.push_str(line);
        body.push('\n');
    }
    flush(&mut body);
    if chapters.is_empty() {
        chapters.push((None, String::new()));
    }
    chapters
}

/// Blocks for a plain text chapter: paragraphs split at blank lines.
pub fn text_blocks(content: &str) -> Vec<ContentBlock> {
    parse_blocks(content, false)
}

pub fn markdown_blocks(content: &str) -> Vec<ContentBlock> {
    parse_blocks(content, true)
}

struct ListEntry {
    ordinal: Option<usize>,
    depth: usize,
    text: String,
}

#[derive(Default)]
struct Pending {
    paragraph: Vec<String>,
    list: Vec<ListEntry>,
    quote: Vec<String>,
}

impl Pending {
    fn flush_all(&mut self, blocks: &mut Vec<ContentBlock>, markdown: bool) {
        self.flush_paragraph(blocks, markdown);
        self.flush_list(blocks, markdown);
        self.flush_quote(blocks, markdown);
    }

    fn flush_paragraph(&mut self, blocks: &mut Vec<ContentBlock>, markdown: bool) {
        if self.paragraph.is_empty() {
            return;
        }
        let text = join_lines(&self.paragraph);
        self.paragraph.clear();
        if !text.trim().is_empty() {
            blocks.push(ContentBlock::paragraph(inline_segments(&text, markdown)));
        }
    }

    fn flush_list(&mut self, blocks: &mut Vec<ContentBlock>, markdown: bool) {
        for entry in self.list.drain(..) {
            blocks.push(ContentBlock::list_item(
                inline_segments(&entry.text, markdown),
                entry.ordinal,
                entry.depth,
            ));
        }
    }

    fn flush_quote(&mut self, blocks: &mut Vec<ContentBlock>, markdown: bool) {
        if self.quote.is_empty() {
            return;
        }
        let mut out = String::new();
        for line in self.quote.drain(..) {
            if line.is_empty() {
                out.push('\n');
                continue;
            }
            if !out.is_empty() && !out.ends_with('\n') {
                out.push(' ');
            }
            out.push_str(&line);
        }
        let out = out.trim().to_string();
        if !out.is_empty() {
            blocks.push(ContentBlock::blockquote(inline_segments(&out, markdown)));
        }
    }
}

fn parse_blocks(content: &str, markdown: bool) -> Vec<ContentBlock> {
    let mut blocks = Vec::new();
    let mut pending = Pending::default();
    let mut code_lines: Vec<String> = Vec::new();
    let mut code_lang: Option<String> = None;
    let mut code_fence: Option<char> = None;

    let mut lines = content.lines().peekable();
    while let Some(raw_line) = lines.next() {
        let line = raw_line.trim_end_matches('\r');
        let trimmed = line.trim();

        if let Some(fence_char) = code_fence {
            if let Some((found, _)) = parse_fence(trimmed) {
                if found == fence_char {
                    flush_code(&mut code_lines, &mut code_lang, &mut blocks);
                    code_fence = None;
                    continue;
                }
            }
            code_lines.push(line.to_string());
            continue;
        }

        if markdown {
            if let Some((fence, lang)) = parse_fence(trimmed) {
                pending.flush_all(&mut blocks, markdown);
                code_fence = Some(fence);
                code_lang = lang;
                continue;
            }
        }

        if trimmed.is_empty() {
            pending.flush_all(&mut blocks, markdown);
            continue;
        }

        if markdown {
            if let Some(next_line) = lines.peek() {
                if pending.paragraph.is_empty() {
                    if let Some(level) = setext_level(next_line) {
                        pending.flush_all(&mut blocks, markdown);
                        blocks.push(ContentBlock::heading(level, inline_segments(trimmed, true)));
                        let _ = lines.next();
                        continue;
                    }
                }
            }

            if let Some((level, text)) = parse_atx_heading(trimmed) {
                pending.flush_all(&mut blocks, markdown);
                blocks.push(ContentBlock::heading(level, inline_segments(&text, true)));
                continue;
            }

            if let Some((alt, src)) = parse_image_line(trimmed) {
                pending.flush_all(&mut blocks, markdown);
                blocks.push(ContentBlock::image(&src, Some(&alt), None, None));
                continue;
            }
        }

        if is_separator_line(trimmed) {
            pending.flush_all(&mut blocks, markdown);
            blocks.push(ContentBlock::paragraph(vec![StyledSegment::plain(SEPARATOR)]));
            continue;
        }

        if let Some(entry) = parse_list_item(line) {
            pending.flush_paragraph(&mut blocks, markdown);
            pending.flush_quote(&mut blocks, markdown);
            pending.list.push(entry);
            continue;
        } else if !pending.list.is_empty() {
            pending.flush_list(&mut blocks, markdown);
        }

        if let Some(quote_line) = parse_quote_line(trimmed) {
            pending.flush_paragraph(&mut blocks, markdown);
            pending.flush_list(&mut blocks, markdown);
            pending.quote.push(quote_line);
            continue;
        } else if !pending.quote.is_empty() {
            pending.flush_quote(&mut blocks, markdown);
        }

        pending.paragraph.push(trimmed.to_string());
    }

    if code_fence.is_some() {
        flush_code(&mut code_lines, &mut code_lang, &mut blocks);
    }
    pending.flush_all(&mut blocks, markdown);
    blocks
}

fn parse_fence(line: &str) -> Option<(char, Option<String>)> {
    let trimmed = line.trim();
    let bytes = trimmed.as_bytes();
    let first = *bytes.first()?;
    if first != b'`' && first != b'~' {
        return None;
    }
    let count = bytes.iter().take_while(|&&b| b == first).count();
    if count < 3 {
        return None;
    }
    let rest = trimmed[count..].trim();
    let lang = if rest.is_empty() {
        None
    } else {
        Some(rest.to_string())
    };
    Some((first as char, lang))
}

fn parse_atx_heading(line: &str) -> Option<(u8, String)> {
    let trimmed = line.trim_start();
    let count = trimmed.bytes().take_while(|b| *b == b'#').count();
    if count == 0 || count > 6 {
        return None;
    }
    let rest = &trimmed[count..];
    if !rest.is_empty() && !rest.starts_with([' ', '\t']) {
        return None;
    }
    let rest = rest.trim().trim_end_matches('#').trim();
    if rest.is_empty() {
        return None;
    }
    Some((count as u8, rest.to_string()))
}

fn setext_level(line: &str) -> Option<u8> {
    let trimmed = line.trim();
    if trimmed.len() < 3 {
        return None;
    }
    let first = trimmed.chars().next()?;
    if first != '=' && first != '-' {
        return None;
    }
    if trimmed.chars().all(|c| c == first) {
        Some(if first == '=' { 1 } else { 2 })
    } else {
        None
    }
}

fn parse_image_line(line: &str) -> Option<(String, String)> {
    let rest = line.strip_prefix("![")?;
    let (alt, rest) = rest.split_once("](")?;
    let src = rest.strip_suffix(')')?;
    let src = src.split_whitespace().next()?;
    Some((alt.to_string(), src.to_string()))
}

fn parse_list_item(line: &str) -> Option<ListEntry> {
    let indent: usize = line
        .chars()
        .take_while(|c| c.is_whitespace())
        .map(|c| if c == '\t' { 4 } else { 1 })
        .sum();
    let depth = indent / 2;
    let trimmed = line.trim_start();
    for bullet in ["- ", "* ", "+ ", "• "] {
        if let Some(rest) = trimmed.strip_prefix(bullet) {
            let text = clean_inline(rest);
            if text.is_empty() {
                return None;
            }
            return Some(ListEntry {
                ordinal: None,
                depth,
                text,
            });
        }
    }

    let bytes = trimmed.as_bytes();
    let mut idx = 0;
    while idx < bytes.len() && bytes[idx].is_ascii_digit() {
        idx += 1;
    }
    if idx == 0 || idx + 1 >= bytes.len() {
        return None;
    }
    let sep = bytes[idx];
    if (sep == b'.' || sep == b')') && bytes[idx + 1].is_ascii_whitespace() {
        let ordinal = trimmed[..idx].parse().ok();
        let text = clean_inline(trimmed[idx + 1..].trim_start());
        if text.is_empty() {
            None
        } else {
            Some(ListEntry {
                ordinal,
                depth,
                text,
            })
        }
    } else {
        None
    }
}

fn parse_quote_line(line: &str) -> Option<String> {
    let trimmed = line.trim_start();
    if !trimmed.starts_with('>') {
        return None;
    }
    let rest = trimmed.trim_start_matches('>').trim_start();
    Some(clean_inline(rest))
}

fn is_separator_line(line: &str) -> bool {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return false;
    }
    let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.chars().count() < 3 {
        return false;
    }
    let Some(first) = compact.chars().next() else {
        return false;
    };
    if first != '-' && first != '*' && first != '_' && first != '─' {
        return false;
    }
    compact.chars().all(|c| c == first)
}

fn clean_inline(input: &str) -> String {
    let s = input
        .replace('\u{00A0}', " ")
        .replace(
            ['\u{200B}', '\u{200C}', '\u{200E}', '\u{200F}'],
            "",
        )
        .replace(['\u{2028}', '\u{2029}'], " ")
        .replace('\u{FEFF}', "");
    let mut out = String::with_capacity(s.len());
    let mut last_space = false;
    for ch in s.chars() {
        if ch.is_whitespace() {
            if !last_space {
                out.push(' ');
            }
            last_space = true;
        } else {
            out.push(ch);
            last_space = false;
        }
    }
    out.trim().to_string()
}

fn join_lines(lines: &[String]) -> String {
    let cap = lines.iter().map(|line| line.len() + 1).sum();
    let mut out = String::with_capacity(cap);
    for line in lines {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(trimmed);
    }
    clean_inline(&out)
}

fn flush_code(code_lines: &mut Vec<String>, lang: &mut Option<String>, blocks: &mut Vec<ContentBlock>) {
    if code_lines.is_empty() {
        *lang = None;
        return;
    }
    let text = code_lines.join("\n");
    code_lines.clear();
    blocks.push(ContentBlock::code(lang.take(), text));
}

fn inline_segments(text: &str, markdown: bool) -> Vec<StyledSegment> {
    if markdown {
        parse_inline(text)
    } else {
        vec![StyledSegment::plain(text)]
    }
}

/// Markdown emphasis and code spans.
fn parse_inline(input: &str) -> Vec<StyledSegment> {
    let mut segments = Vec::new();
    let mut plain = String::new();
    let mut rest = input;
    while let Some(ch) = rest.chars().next() {
        let after_word = plain.chars().last().is_some_and(char::is_alphanumeric);
        if let Some((style, inner, tail)) = match_span(rest, after_word) {
            if !plain.is_empty() {
                segments.push(StyledSegment::plain(std::mem::take(&mut plain)));
            }
            segments.push(StyledSegment::new(inner, style));
            rest = tail;
            continue;
        }
        plain.push(ch);
        rest = &rest[ch.len_utf8()..];
    }
    if !plain.is_empty() || segments.is_empty() {
        segments.push(StyledSegment::plain(plain));
    }
    segments
}

fn match_span(s: &str, after_word: bool) -> Option<(InlineStyle, &str, &str)> {
    const DELIMITERS: [(&str, InlineStyle); 5] = [
        ("`", InlineStyle::Code),
        ("**", InlineStyle::Bold),
        ("__", InlineStyle::Bold),
        ("*", InlineStyle::Italic),
        ("_", InlineStyle::Italic),
    ];
    for (delim, style) in DELIMITERS {
        if after_word && delim.starts_with('_') {
            continue;
        }
        let Some(body) = s.strip_prefix(delim) else {
            continue;
        };
        let Some(end) = body.find(delim) else {
            continue;
        };
        let inner = &body[..end];
        if inner.is_empty() || inner.starts_with(' ') || inner.ends_with(' ') {
            continue;
        }
        return Some((style, inner, &body[end + delim.len()..]));
    }
    None
}

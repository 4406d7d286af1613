use kuchiki::{traits::*, NodeRef};

use crate::types::{meta, ContentBlock, StyledSegment};

use super::images::{image_dimensions, image_label_text, image_src};
use super::inline::{inline_segments, list_item_segments, nodes_segments, normalize_inline_text};

const SEPARATOR: &str = "───";

/// Walk chapter (X)HTML into content blocks in document order.
pub fn html_to_blocks(html: &str) -> Vec<ContentBlock> {
    let parser = kuchiki::parse_html().one(html.to_string());
    let mut blocks = Vec::new();
    collect(&parser, &mut blocks);

    if blocks.is_empty() {
        let text = normalize_inline_text(&parser.text_contents());
        if !text.is_empty() {
            blocks.push(ContentBlock::paragraph(vec![StyledSegment::plain(text)]));
        }
    }
    blocks
}

/// Text of `<title>`, falling back to the first `<h1>`.
pub fn html_title(html: &str) -> Option<String> {
    let parser = kuchiki::parse_html().one(html.to_string());
    ["title", "h1"].iter().find_map(|selector| {
        let node = parser.select_first(selector).ok()?;
        let text = normalize_inline_text(&node.as_node().text_contents());
        (!text.is_empty()).then_some(text)
    })
}

/// Every distinct image source referenced by the document.
pub fn image_sources(html: &str) -> Vec<String> {
    let parser = kuchiki::parse_html().one(html.to_string());
    let mut out: Vec<String> = Vec::new();
    if let Ok(images) = parser.select("img") {
        for img in images {
            if let Some(src) = image_src(&img.attributes.borrow()) {
                if !out.contains(&src) {
                    out.push(src);
                }
            }
        }
    }
    out
}

fn heading_level(tag: &str) -> Option<u8> {
    (tag.len() == 2 && tag.starts_with('h'))
        .then(|| tag[1..].parse::<u8>().ok())
        .flatten()
        .map(|lvl| lvl.clamp(1, 6))
}

fn is_inline_tag(tag: &str) -> bool {
    matches!(
        tag,
        "a" | "abbr"
            | "b"
            | "br"
            | "cite"
            | "code"
            | "dfn"
            | "em"
            | "i"
            | "kbd"
            | "mark"
            | "q"
            | "samp"
            | "small"
            | "span"
            | "strong"
            | "sub"
            | "sup"
            | "tt"
            | "u"
    )
}

fn is_skippable_tag(tag: &str) -> bool {
    matches!(
        tag,
        "head" | "meta" | "link" | "script" | "style" | "noscript" | "title"
    )
}

fn collect(node: &NodeRef, out: &mut Vec<ContentBlock>) {
    let mut pending: Vec<NodeRef> = Vec::new();
    for child in node.children() {
        if extract_blocks(&child, out, &mut pending) {
            continue;
        }
        if let Some(el) = child.as_element() {
            let tag = el.name.local.to_lowercase();
            if is_skippable_tag(&tag) {
                continue;
            }
            if is_inline_tag(&tag) {
                pending.push(child);
                continue;
            }
        } else if child.as_text().is_some() {
            pending.push(child);
            continue;
        }
        flush_pending(&mut pending, out);
        collect(&child, out);
    }
    flush_pending(&mut pending, out);
}

/// Loose inline content between blocks becomes its own paragraph.
fn flush_pending(pending: &mut Vec<NodeRef>, out: &mut Vec<ContentBlock>) {
    if pending.is_empty() {
        return;
    }
    let segments = nodes_segments(pending);
    pending.clear();
    if !segments.is_empty() {
        out.push(ContentBlock::paragraph(segments));
    }
}

fn is_block_tag(tag: &str) -> bool {
    heading_level(tag).is_some()
        || matches!(
            tag,
            "p" | "blockquote" | "aside" | "ul" | "ol" | "pre" | "img" | "figure" | "table" | "hr"
        )
}

/// Emit the blocks for `node` when it is a block element. Returns false for
/// anything the caller should descend into instead.
fn extract_blocks(node: &NodeRef, out: &mut Vec<ContentBlock>, pending: &mut Vec<NodeRef>) -> bool {
    let Some(el) = node.as_element() else {
        return false;
    };
    let tag = el.name.local.to_lowercase();
    if !is_block_tag(&tag) {
        return false;
    }
    flush_pending(pending, out);

    if let Some(level) = heading_level(&tag) {
        let segments = inline_segments(node);
        if !segments.is_empty() {
            out.push(ContentBlock::heading(level, segments));
        }
        return true;
    }
    match tag.as_str() {
        "p" => {
            if let Some(image) = sole_image(node) {
                out.push(image);
            } else {
                let segments = inline_segments(node);
                if !segments.is_empty() {
                    out.push(ContentBlock::paragraph(segments));
                }
            }
        }
        "blockquote" | "aside" => {
            let segments = inline_segments(node);
            if !segments.is_empty() {
                out.push(ContentBlock::blockquote(segments));
            }
        }
        "ul" | "ol" => list_blocks(node, 0, out),
        "pre" => out.push(code_block(node)),
        "img" => out.extend(image_block(node, None)),
        "figure" => match figure_block(node) {
            Some(image) => out.push(image),
            None => collect(node, out),
        },
        "table" => table_blocks(node, out),
        _ => out.push(ContentBlock::paragraph(vec![StyledSegment::plain(SEPARATOR)])),
    }
    true
}

fn list_blocks(list: &NodeRef, depth: usize, out: &mut Vec<ContentBlock>) {
    let Some(el) = list.as_element() else {
        return;
    };
    let ordered = el.name.local.as_ref() == "ol";
    let start: usize = el
        .attributes
        .borrow()
        .get("start")
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(1);
    let mut ordinal = start;
    for li in list.children() {
        let is_item = li
            .as_element()
            .is_some_and(|e| e.name.local.as_ref() == "li");
        if !is_item {
            continue;
        }
        let segments = list_item_segments(&li);
        if !segments.is_empty() {
            out.push(ContentBlock::list_item(
                segments,
                ordered.then_some(ordinal),
                depth,
            ));
            ordinal += 1;
        }
        for nested in li.children() {
            let is_list = nested
                .as_element()
                .is_some_and(|e| matches!(e.name.local.as_ref(), "ul" | "ol"));
            if is_list {
                list_blocks(&nested, depth + 1, out);
            }
        }
    }
}

fn code_block(node: &NodeRef) -> ContentBlock {
    let code = node.select_first("code").ok();
    let lang = code.as_ref().and_then(|code| {
        let attrs = code.attributes.borrow();
        attrs.get("class").and_then(|class| {
            class
                .split_whitespace()
                .find_map(|c| c.strip_prefix("language-").or_else(|| c.strip_prefix("lang-")))
                .map(str::to_string)
        })
    });
    let text = code
        .map(|code| code.as_node().text_contents())
        .unwrap_or_else(|| node.text_contents());
    let text = text.replace("\r\n", "\n");
    let text = text.trim_start_matches('\n').trim_end();
    ContentBlock::code(lang, text)
}

/// A paragraph whose only content is one image is an image block.
fn sole_image(node: &NodeRef) -> Option<ContentBlock> {
    let mut image = None;
    for child in node.children() {
        if let Some(text) = child.as_text() {
            if text.borrow().trim().is_empty() {
                continue;
            }
            return None;
        }
        let el = child.as_element()?;
        if el.name.local.as_ref() != "img" || image.is_some() {
            return None;
        }
        image = Some(child.clone());
    }
    image_block(&image?, None)
}

fn image_block(node: &NodeRef, caption: Option<String>) -> Option<ContentBlock> {
    let el = node.as_element()?;
    let attrs = el.attributes.borrow();
    let src = image_src(&attrs)?;
    let alt = image_label_text(&attrs);
    let (width, height) = image_dimensions(&attrs);
    let mut block = ContentBlock::image(&src, alt.as_deref(), width, height);
    if let Some(caption) = caption.filter(|c| !c.is_empty()) {
        block.set_meta(meta::CAPTION, caption);
    }
    Some(block)
}

fn figure_block(node: &NodeRef) -> Option<ContentBlock> {
    let img = node.select_first("img").ok()?;
    let caption = node
        .select_first("figcaption")
        .ok()
        .map(|cap| normalize_inline_text(&cap.as_node().text_contents()));
    image_block(img.as_node(), caption)
}

/// Tables read row by row, cells joined with a bar.
fn table_blocks(node: &NodeRef, out: &mut Vec<ContentBlock>) {
    let Ok(rows) = node.select("tr") else {
        return;
    };
    for row in rows {
        let cells: Vec<String> = row
            .as_node()
            .children()
            .filter(|c| {
                c.as_element()
                    .is_some_and(|e| matches!(e.name.local.as_ref(), "td" | "th"))
            })
            .map(|c| normalize_inline_text(&c.text_contents()))
            .collect();
        if cells.iter().all(String::is_empty) {
            continue;
        }
        out.push(ContentBlock::paragraph(vec![StyledSegment::plain(
            cells.join(" │ "),
        )]));
    }
}

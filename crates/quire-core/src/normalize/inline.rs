use kuchiki::NodeRef;

use crate::types::{InlineStyle, StyledSegment};

/// Accumulates styled segments while walking inline markup, collapsing
/// whitespace across element boundaries.
pub(crate) struct SegmentBuilder {
    segments: Vec<StyledSegment>,
    styles: Vec<InlineStyle>,
    last_space: bool,
    skip_lists: bool,
}

impl SegmentBuilder {
    pub(crate) fn new() -> Self {
        Self {
            segments: Vec::new(),
            styles: Vec::new(),
            last_space: true,
            skip_lists: false,
        }
    }

    /// Nested `ul`/`ol` are left for the caller to emit as their own items.
    pub(crate) fn without_lists() -> Self {
        Self {
            skip_lists: true,
            ..Self::new()
        }
    }

    fn style(&self) -> InlineStyle {
        self.styles.last().copied().unwrap_or_default()
    }

    fn push_char(&mut self, ch: char) {
        let style = self.style();
        match self.segments.last_mut() {
            Some(seg) if seg.style == style => seg.text.push(ch),
            _ => self.segments.push(StyledSegment::new(ch.to_string(), style)),
        }
    }

    pub(crate) fn push_text(&mut self, text: &str) {
        for ch in text.chars() {
            match ch {
                '\u{00AD}' | '\u{200B}' | '\u{200C}' | '\u{200E}' | '\u{200F}' | '\u{FEFF}'
                | '\r' => {}
                c if c.is_whitespace() => {
                    if !self.last_space {
                        self.push_char(' ');
                        self.last_space = true;
                    }
                }
                c => {
                    self.push_char(c);
                    self.last_space = false;
                }
            }
        }
    }

    pub(crate) fn push_break(&mut self) {
        if self.is_empty() {
            return;
        }
        self.trim_trailing_space();
        self.push_char('\n');
        self.last_space = true;
    }

    fn trim_trailing_space(&mut self) {
        if let Some(seg) = self.segments.last_mut() {
            let trimmed = seg.text.trim_end_matches(' ').len();
            seg.text.truncate(trimmed);
        }
    }

    fn is_empty(&self) -> bool {
        self.segments.iter().all(|s| s.text.trim().is_empty())
    }

    fn with_style(&mut self, style: InlineStyle, f: impl FnOnce(&mut Self)) {
        self.styles.push(style);
        f(self);
        self.styles.pop();
    }

    pub(crate) fn append(&mut self, node: &NodeRef) {
        if let Some(text) = node.as_text() {
            self.push_text(&text.borrow());
            return;
        }
        let Some(el) = node.as_element() else {
            self.append_children(node);
            return;
        };
        let tag = el.name.local.to_lowercase();
        match tag.as_str() {
            "br" => self.push_break(),
            "ul" | "ol" if self.skip_lists => {}
            "p" | "div" | "li" | "ul" | "ol" => {
                self.push_break();
                self.append_children(node);
            }
            "script" | "style" | "head" => {}
            "img" => {
                let attrs = el.attributes.borrow();
                if let Some(label) = super::images::image_label_text(&attrs) {
                    self.push_text(&format!("[{label}]"));
                }
            }
            "em" | "i" | "cite" | "dfn" => {
                self.with_style(InlineStyle::Italic, |b| b.append_children(node))
            }
            "strong" | "b" => self.with_style(InlineStyle::Bold, |b| b.append_children(node)),
            "code" | "kbd" | "samp" | "tt" => {
                self.with_style(InlineStyle::Code, |b| b.append_children(node))
            }
            "q" => self.with_style(InlineStyle::Quote, |b| {
                b.push_text("\u{201C}");
                b.append_children(node);
                b.push_text("\u{201D}");
            }),
            "span" => match span_style(el) {
                Some(style) => self.with_style(style, |b| b.append_children(node)),
                None => self.append_children(node),
            },
            _ => self.append_children(node),
        }
    }

    fn append_children(&mut self, node: &NodeRef) {
        for child in node.children() {
            self.append(&child);
        }
    }

    pub(crate) fn finish(mut self) -> Vec<StyledSegment> {
        for seg in &mut self.segments {
            if seg.text.contains(" \n") || seg.text.contains("\n ") {
                seg.text = seg.text.replace(" \n", "\n").replace("\n ", "\n");
            }
        }
        if let Some(first) = self.segments.first_mut() {
            first.text = first.text.trim_start().to_string();
        }
        if let Some(last) = self.segments.last_mut() {
            last.text = last.text.trim_end().to_string();
        }
        self.segments.retain(|s| !s.text.is_empty());
        self.segments
    }
}

pub(crate) fn inline_segments(node: &NodeRef) -> Vec<StyledSegment> {
    let mut builder = SegmentBuilder::new();
    builder.append_children(node);
    builder.finish()
}

pub(crate) fn nodes_segments(nodes: &[NodeRef]) -> Vec<StyledSegment> {
    let mut builder = SegmentBuilder::new();
    for node in nodes {
        builder.append(node);
    }
    builder.finish()
}

pub(crate) fn list_item_segments(node: &NodeRef) -> Vec<StyledSegment> {
    let mut builder = SegmentBuilder::without_lists();
    builder.append_children(node);
    builder.finish()
}

pub(crate) fn normalize_inline_text(s: &str) -> String {
    let mut builder = SegmentBuilder::new();
    builder.push_text(s);
    builder
        .finish()
        .into_iter()
        .map(|seg| seg.text)
        .collect()
}

fn span_style(el: &kuchiki::ElementData) -> Option<InlineStyle> {
    let attrs = el.attributes.borrow();
    let style = attrs.get("style")?.to_ascii_lowercase();
    if style.contains("font-weight: bold")
        || style.contains("font-weight: 600")
        || style.contains("font-weight: 700")
        || style.contains("font-weight: 800")
        || style.contains("font-weight: 900")
    {
        return Some(InlineStyle::Bold);
    }
    if style.contains("font-style: italic") {
        return Some(InlineStyle::Italic);
    }
    if style.contains("monospace") {
        return Some(InlineStyle::Code);
    }
    None
}

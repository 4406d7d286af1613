use crate::cells::{STYLE_END, STYLE_START};
use crate::types::InlineStyle;

/// Style of one run inside a wrapped line. Each non-plain variant has a
/// one character marker code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineStyle {
    Plain,
    Bold,
    Italic,
    Code,
    Quote,
    Heading,
}

impl LineStyle {
    pub fn code(self) -> Option<char> {
        match self {
            LineStyle::Plain => None,
            LineStyle::Bold => Some('b'),
            LineStyle::Italic => Some('i'),
            LineStyle::Code => Some('c'),
            LineStyle::Quote => Some('q'),
            LineStyle::Heading => Some('h'),
        }
    }

    pub fn from_inline(style: InlineStyle, highlight_quotes: bool) -> Self {
        match style {
            InlineStyle::Plain => LineStyle::Plain,
            InlineStyle::Bold => LineStyle::Bold,
            InlineStyle::Italic => LineStyle::Italic,
            InlineStyle::Code => LineStyle::Code,
            InlineStyle::Quote if highlight_quotes => LineStyle::Quote,
            InlineStyle::Quote => LineStyle::Plain,
        }
    }
}

pub(crate) fn push_styled(out: &mut String, style: LineStyle, text: &str) {
    match style.code() {
        Some(code) if !text.is_empty() => {
            out.push(STYLE_START);
            out.push(code);
            out.push_str(text);
            out.push(STYLE_END);
            out.push(code);
        }
        _ => out.push_str(text),
    }
}

/// Wrap an already styled string in one more style.
pub(crate) fn wrap_style(style: LineStyle, styled: &str) -> String {
    let mut out = String::with_capacity(styled.len() + 4);
    push_styled(&mut out, style, styled);
    out
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct StyleCounts {
    bold: u16,
    italic: u16,
    code: u16,
    quote: u16,
    heading: u16,
}

impl StyleCounts {
    fn slot(&mut self, code: char) -> Option<&mut u16> {
        match code {
            'b' => Some(&mut self.bold),
            'i' => Some(&mut self.italic),
            'c' => Some(&mut self.code),
            'q' => Some(&mut self.quote),
            'h' => Some(&mut self.heading),
            _ => None,
        }
    }

    fn active(&self) -> ActiveStyles {
        ActiveStyles {
            bold: self.bold > 0,
            italic: self.italic > 0,
            code: self.code > 0,
            quote: self.quote > 0,
            heading: self.heading > 0,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ActiveStyles {
    pub bold: bool,
    pub italic: bool,
    pub code: bool,
    pub quote: bool,
    pub heading: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyledRun {
    pub text: String,
    pub styles: ActiveStyles,
}

/// Decode the embedded markers of a `styled_text` into runs. Unknown codes
/// and unbalanced closers are ignored.
pub fn parse_styled(styled: &str) -> Vec<StyledRun> {
    let mut runs: Vec<StyledRun> = Vec::new();
    let mut counts = StyleCounts::default();
    let mut text = String::new();
    let mut chars = styled.chars();

    let flush = |runs: &mut Vec<StyledRun>, text: &mut String, counts: &StyleCounts| {
        if text.is_empty() {
            return;
        }
        let styles = counts.active();
        match runs.last_mut() {
            Some(last) if last.styles == styles => last.text.push_str(text),
            _ => runs.push(StyledRun {
                text: text.clone(),
                styles,
            }),
        }
        text.clear();
    };

    while let Some(ch) = chars.next() {
        if ch != STYLE_START && ch != STYLE_END {
            text.push(ch);
            continue;
        }
        let Some(code) = chars.next() else {
            break;
        };
        flush(&mut runs, &mut text, &counts);
        if let Some(slot) = counts.slot(code) {
            if ch == STYLE_START {
                *slot = slot.saturating_add(1);
            } else {
                *slot = slot.saturating_sub(1);
            }
        }
    }
    flush(&mut runs, &mut text, &counts);
    runs
}

/// Split plain text into alternating prose and double-quoted dialogue.
/// An unterminated quote leaves the remainder as prose.
pub(crate) fn split_dialogue(text: &str) -> Vec<(bool, &str)> {
    let mut out = Vec::new();
    let mut start = 0usize;
    let mut open: Option<(usize, char)> = None;
    for (idx, ch) in text.char_indices() {
        match open {
            None if ch == '"' || ch == '\u{201C}' => {
                if idx > start {
                    out.push((false, &text[start..idx]));
                }
                start = idx;
                open = Some((idx, ch));
            }
            Some((_, opener)) if (opener == '"' && ch == '"') || (opener == '\u{201C}' && ch == '\u{201D}') => {
                let end = idx + ch.len_utf8();
                out.push((true, &text[start..end]));
                start = end;
                open = None;
            }
            _ => {}
        }
    }
    if start < text.len() {
        out.push((false, &text[start..]));
    }
    out
}

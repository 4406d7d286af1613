//! Terminal cell measurement.
//!
//! Every width decision in the crate goes through [`cluster_width`]: text is
//! segmented into extended grapheme clusters once, and each cluster occupies
//! zero, one or two terminal columns. Embedded style markers (see
//! [`STYLE_START`]) are skipped by every function here, so styled and plain
//! strings measure the same.

use unicode_linebreak::{linebreaks, BreakOpportunity};
use unicode_segmentation::{GraphemeIndices, UnicodeSegmentation};
use unicode_width::UnicodeWidthChar;

/// Opens an inline style; followed by a one character style code.
pub const STYLE_START: char = '\x1E';
/// Closes an inline style; followed by the same style code.
pub const STYLE_END: char = '\x1F';

const REPLACEMENT: &str = "\u{FFFD}";
const VS16: char = '\u{FE0F}';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell<'a> {
    pub cluster: &'a str,
    pub char_start: usize,
    pub char_end: usize,
    pub display_width: usize,
    pub screen_x: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Piece<'a> {
    Marker(&'a str),
    Cluster(&'a str),
}

struct Pieces<'a> {
    text: &'a str,
    inner: GraphemeIndices<'a>,
}

fn pieces(text: &str) -> Pieces<'_> {
    Pieces {
        text,
        inner: text.grapheme_indices(true),
    }
}

fn is_marker(cluster: &str) -> bool {
    cluster.len() == 1 && cluster.starts_with([STYLE_START, STYLE_END])
}

impl<'a> Iterator for Pieces<'a> {
    type Item = Piece<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let (idx, cluster) = self.inner.next()?;
        if !is_marker(cluster) {
            return Some(Piece::Cluster(cluster));
        }
        // Control characters always stand alone, so the code is the next cluster.
        match self.inner.next() {
            Some((code_idx, code)) => Some(Piece::Marker(
                &self.text[idx..code_idx + code.len()],
            )),
            None => Some(Piece::Marker(cluster)),
        }
    }
}

fn is_regional_indicator(c: char) -> bool {
    ('\u{1F1E6}'..='\u{1F1FF}').contains(&c)
}

/// Display width of one grapheme cluster: 0, 1 or 2 columns.
pub fn cluster_width(cluster: &str) -> usize {
    let mut chars = cluster.chars();
    let Some(first) = chars.next() else {
        return 0;
    };
    // Control characters and anything unknown count as one column.
    if first.width().is_none() {
        return 1;
    }
    if cluster.contains(VS16) {
        return 2;
    }
    if cluster.chars().filter(|c| is_regional_indicator(*c)).count() >= 2 {
        return 2;
    }
    cluster
        .chars()
        .map(|c| c.width().unwrap_or(0))
        .max()
        .unwrap_or(1)
        .min(2)
}

/// Split `text` into display cells. Style markers produce no cells but still
/// advance the character indices.
pub fn cells(text: &str) -> Vec<Cell<'_>> {
    let mut out = Vec::new();
    let mut char_idx = 0usize;
    let mut screen_x = 0usize;
    for piece in pieces(text) {
        match piece {
            Piece::Marker(marker) => char_idx += marker.chars().count(),
            Piece::Cluster(cluster) => {
                let len = cluster.chars().count();
                let display_width = cluster_width(cluster);
                out.push(Cell {
                    cluster,
                    char_start: char_idx,
                    char_end: char_idx + len,
                    display_width,
                    screen_x,
                });
                char_idx += len;
                screen_x += display_width;
            }
        }
    }
    out
}

pub fn visible_length(text: &str) -> usize {
    pieces(text)
        .map(|piece| match piece {
            Piece::Marker(_) => 0,
            Piece::Cluster(cluster) => cluster_width(cluster),
        })
        .sum()
}

pub fn strip_style_markers(text: &str) -> String {
    if !text.contains([STYLE_START, STYLE_END]) {
        return text.to_string();
    }
    pieces(text)
        .filter_map(|piece| match piece {
            Piece::Marker(_) => None,
            Piece::Cluster(cluster) => Some(cluster),
        })
        .collect()
}

/// Cut `text` so its visible width is at most `max_width`.
pub fn truncate_to(text: &str, max_width: usize) -> String {
    truncate_from(text, 0, max_width)
}

/// Keep the columns `start_column..start_column + max_width` of `text`.
///
/// A wide cluster straddling the left edge becomes pad spaces for its visible
/// half; one straddling the right edge is dropped. Style markers are copied
/// through even past the cut so open styles stay balanced.
pub fn truncate_from(text: &str, start_column: usize, max_width: usize) -> String {
    if max_width == 0 {
        return String::new();
    }
    let end = start_column + max_width;
    let mut out = String::with_capacity(text.len());
    let mut x = 0usize;
    for piece in pieces(text) {
        match piece {
            Piece::Marker(marker) => out.push_str(marker),
            Piece::Cluster(cluster) => {
                let width = cluster_width(cluster);
                let cell_end = x + width;
                if x >= start_column && cell_end <= end {
                    out.push_str(cluster);
                } else if x < start_column && cell_end > start_column {
                    let visible = cell_end.min(end) - start_column;
                    out.extend(std::iter::repeat_n(' ', visible));
                }
                x = cell_end;
            }
        }
    }
    out
}

pub fn pad_right(text: &str, width: usize) -> String {
    let len = visible_length(text);
    let mut out = text.to_string();
    out.extend(std::iter::repeat_n(' ', width.saturating_sub(len)));
    out
}

pub fn pad_left(text: &str, width: usize) -> String {
    let len = visible_length(text);
    let mut out: String = std::iter::repeat_n(' ', width.saturating_sub(len)).collect();
    out.push_str(text);
    out
}

/// Left-pad `text` so it sits in the middle of `width` columns.
pub fn center(text: &str, width: usize) -> String {
    let len = visible_length(text);
    let left = width.saturating_sub(len) / 2;
    let mut out: String = std::iter::repeat_n(' ', left).collect();
    out.push_str(text);
    out
}

/// Greedy word wrap of plain text. Always returns at least one line and no
/// line is wider than `width` columns.
///
/// Every word comes back, hard-broken words reassembled, with one exception:
/// a single cluster wider than `width` (a wide glyph at width 1) cannot fit on
/// any line and is emitted as U+FFFD, one column wide.
pub fn wrap_cells(text: &str, width: usize) -> Vec<String> {
    if width == 0 {
        return vec![String::new()];
    }
    wrap_runs(&[((), text)], width)
        .into_iter()
        .map(|line| line.into_iter().map(|(_, piece)| piece).collect())
        .collect()
}

#[derive(Clone, Copy)]
struct Atom<'a, T> {
    tag: T,
    text: &'a str,
    width: usize,
}

struct Word<'a, T> {
    atoms: Vec<Atom<'a, T>>,
    width: usize,
}

impl<T> Word<'_, T> {
    fn new() -> Self {
        Self {
            atoms: Vec::new(),
            width: 0,
        }
    }
}

enum Token<'a, T> {
    Word(Word<'a, T>),
    Space(T),
    Break,
}

/// Word wrap a sequence of tagged runs (typically styled segments). Words may
/// span several runs; whitespace separates words and `\n` forces a break.
/// Each output line is a list of `(tag, text)` pieces with adjacent pieces of
/// the same tag merged.
pub fn wrap_runs<T: Copy + PartialEq>(runs: &[(T, &str)], width: usize) -> Vec<Vec<(T, String)>> {
    let width = width.max(1);
    let tokens = tokenize(runs);

    let mut lines: Vec<Vec<Atom<'_, T>>> = Vec::new();
    let mut current: Vec<Atom<'_, T>> = Vec::new();
    let mut current_width = 0usize;
    let mut pending_space: Option<T> = None;

    for token in tokens {
        match token {
            Token::Space(tag) => {
                pending_space.get_or_insert(tag);
            }
            Token::Break => {
                lines.push(std::mem::take(&mut current));
                current_width = 0;
                pending_space = None;
            }
            Token::Word(word) => {
                let space = pending_space.take();
                let gap = usize::from(!current.is_empty());
                if current_width + gap + word.width <= width {
                    if gap == 1 {
                        let tag = space.unwrap_or(word.atoms[0].tag);
                        current.push(Atom {
                            tag,
                            text: " ",
                            width: 1,
                        });
                    }
                    current_width += gap + word.width;
                    current.extend(word.atoms);
                    continue;
                }
                if !current.is_empty() {
                    lines.push(std::mem::take(&mut current));
                }
                if word.width <= width {
                    current_width = word.width;
                    current = word.atoms;
                    continue;
                }
                let mut parts = split_word(word, width);
                let last = parts.pop().unwrap_or_else(Word::new);
                lines.extend(parts.into_iter().map(|part| part.atoms));
                current_width = last.width;
                current = last.atoms;
            }
        }
    }
    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines.into_iter().map(merge_atoms).collect()
}

fn tokenize<'a, T: Copy>(runs: &[(T, &'a str)]) -> Vec<Token<'a, T>> {
    let mut tokens = Vec::new();
    let mut word: Word<'a, T> = Word::new();
    // Markers met between words wait for the next word so spaces stay clean.
    let mut loose_markers: Vec<Atom<'a, T>> = Vec::new();

    for &(tag, text) in runs {
        for piece in pieces(text) {
            match piece {
                Piece::Marker(marker) => {
                    let atom = Atom {
                        tag,
                        text: marker,
                        width: 0,
                    };
                    if word.atoms.is_empty() {
                        loose_markers.push(atom);
                    } else {
                        word.atoms.push(atom);
                    }
                }
                Piece::Cluster(cluster) if cluster.contains('\n') => {
                    flush_word(&mut tokens, &mut word);
                    tokens.push(Token::Break);
                }
                Piece::Cluster(cluster) if cluster.chars().all(char::is_whitespace) => {
                    flush_word(&mut tokens, &mut word);
                    tokens.push(Token::Space(tag));
                }
                Piece::Cluster(cluster) => {
                    if word.atoms.is_empty() {
                        word.atoms.append(&mut loose_markers);
                    }
                    let width = cluster_width(cluster);
                    word.atoms.push(Atom {
                        tag,
                        text: cluster,
                        width,
                    });
                    word.width += width;
                }
            }
        }
    }
    if !loose_markers.is_empty() {
        word.atoms.append(&mut loose_markers);
    }
    flush_word(&mut tokens, &mut word);
    tokens
}

fn flush_word<'a, T>(tokens: &mut Vec<Token<'a, T>>, word: &mut Word<'a, T>) {
    if !word.atoms.is_empty() {
        tokens.push(Token::Word(std::mem::replace(word, Word::new())));
    }
}

/// Break a word wider than `width` into parts. A Unicode line-break
/// opportunity is preferred; otherwise the cut lands on a cell boundary.
fn split_word<T: Copy>(word: Word<'_, T>, width: usize) -> Vec<Word<'_, T>> {
    let mut offsets = Vec::with_capacity(word.atoms.len());
    let mut joined = String::new();
    for atom in &word.atoms {
        offsets.push(joined.len());
        joined.push_str(atom.text);
    }
    let allowed: Vec<usize> = linebreaks(&joined)
        .filter(|(_, opportunity)| *opportunity == BreakOpportunity::Allowed)
        .map(|(idx, _)| idx)
        .collect();

    let atoms = word.atoms;
    let mut parts = Vec::new();
    let mut start = 0usize;
    while start < atoms.len() {
        let mut used = 0usize;
        let mut end = start;
        let mut best_break: Option<usize> = None;
        while end < atoms.len() && used + atoms[end].width <= width {
            used += atoms[end].width;
            end += 1;
            if end < atoms.len() && allowed.binary_search(&offsets[end]).is_ok() {
                best_break = Some(end);
            }
        }
        if end == atoms.len() {
            parts.push(word_from(&atoms[start..end]));
            break;
        }
        if end == start {
            // A single cluster wider than the whole line.
            parts.push(Word {
                atoms: vec![Atom {
                    tag: atoms[start].tag,
                    text: REPLACEMENT,
                    width: 1,
                }],
                width: 1,
            });
            start += 1;
            continue;
        }
        let cut = best_break.filter(|b| *b > start).unwrap_or(end);
        parts.push(word_from(&atoms[start..cut]));
        start = cut;
    }
    parts
}

fn word_from<'a, T: Copy>(atoms: &[Atom<'a, T>]) -> Word<'a, T> {
    Word {
        width: atoms.iter().map(|a| a.width).sum(),
        atoms: atoms.to_vec(),
    }
}

fn merge_atoms<T: Copy + PartialEq>(atoms: Vec<Atom<'_, T>>) -> Vec<(T, String)> {
    let mut out: Vec<(T, String)> = Vec::new();
    for atom in atoms {
        match out.last_mut() {
            Some((tag, text)) if *tag == atom.tag => text.push_str(atom.text),
            _ => out.push((atom.tag, atom.text.to_string())),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const CORPUS: &[&str] = &[
        "",
        "a",
        "The quick brown fox jumps over the lazy dog",
        "supercalifragilisticexpialidocious is a long word",
        "日本語のテキストは空白なしで続きます",
        "mixed 漢字 and ascii words together",
        "emoji 😀 and family 👨\u{200D}👩\u{200D}👧 in text",
        "cafe\u{0301} na\u{0308}ive combining marks",
        "well-known hyphen-separated compound-words",
        "   leading and trailing spaces   ",
        "flags 🇯🇵🇺🇸 side by side",
    ];

    #[test]
    fn widths_of_common_clusters() {
        assert_eq!(cluster_width("a"), 1);
        assert_eq!(cluster_width("界"), 2);
        assert_eq!(cluster_width("😀"), 2);
        assert_eq!(cluster_width("e\u{0301}"), 1);
        assert_eq!(cluster_width("\u{0301}"), 0);
        assert_eq!(cluster_width("🇯🇵"), 2);
        assert_eq!(cluster_width("✈\u{FE0F}"), 2);
        assert_eq!(cluster_width("\u{0007}"), 1);
    }

    #[test]
    fn cells_track_char_and_screen_positions() {
        let cells = cells("a界e\u{0301}");
        assert_eq!(cells.len(), 3);
        assert_eq!(cells[1].cluster, "界");
        assert_eq!(cells[1].screen_x, 1);
        assert_eq!(cells[1].display_width, 2);
        assert_eq!(cells[2].char_start, 2);
        assert_eq!(cells[2].char_end, 4);
        assert_eq!(cells[2].screen_x, 3);
    }

    #[test]
    fn visible_length_ignores_style_markers() {
        let styled = "\x1Ebbold\x1Fb text";
        assert_eq!(visible_length(styled), 9);
        assert_eq!(strip_style_markers(styled), "bold text");
        assert_eq!(cells(styled).len(), 9);
    }

    #[test]
    fn truncate_never_splits_wide_cells() {
        assert_eq!(truncate_to("日本語", 5), "日本");
        assert_eq!(truncate_to("ab日", 3), "ab");
        assert_eq!(truncate_to("abc", 0), "");
        assert_eq!(truncate_to("e\u{0301}xyz", 1), "e\u{0301}");
    }

    #[test]
    fn truncate_from_pads_straddling_cell() {
        assert_eq!(truncate_from("日本語", 1, 4), " 本");
        assert_eq!(truncate_from("abcdef", 2, 3), "cde");
    }

    #[test]
    fn truncate_keeps_markers_balanced() {
        let styled = "\x1Ebbold words\x1Fb";
        assert_eq!(truncate_to(styled, 4), "\x1Ebbold\x1Fb");
    }

    #[test]
    fn truncate_is_idempotent() {
        for text in CORPUS {
            for width in 0..12 {
                let once = truncate_to(text, width);
                assert_eq!(truncate_to(&once, width), once, "{text:?} at {width}");
                assert!(visible_length(&once) <= width);
            }
        }
    }

    #[test]
    fn padding_measures_visible_columns() {
        assert_eq!(pad_right("日", 4), "日  ");
        assert_eq!(pad_left("ab", 4), "  ab");
        assert_eq!(pad_right("toolong", 3), "toolong");
        assert_eq!(center("ab", 6), "  ab");
    }

    #[test]
    fn wrap_respects_width_for_corpus() {
        for text in CORPUS {
            for width in 1..20 {
                let lines = wrap_cells(text, width);
                assert!(!lines.is_empty());
                for line in &lines {
                    assert!(
                        visible_length(line) <= width,
                        "{line:?} wider than {width} from {text:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn wrap_preserves_words() {
        for text in CORPUS {
            for width in 2..20 {
                let lines = wrap_cells(text, width);
                let rejoined: String = lines.concat().split_whitespace().collect();
                let original: String = text.split_whitespace().collect();
                assert_eq!(rejoined, original, "{text:?} at {width}");
            }
        }
    }

    #[test]
    fn wrap_breaks_greedily() {
        let lines = wrap_cells("one two three four", 9);
        assert_eq!(lines, vec!["one two", "three", "four"]);
    }

    #[test]
    fn wrap_hard_breaks_long_words_at_cells() {
        let lines = wrap_cells("abcdefghij", 4);
        assert_eq!(lines, vec!["abcd", "efgh", "ij"]);
        let lines = wrap_cells("日本語テキスト", 5);
        assert!(lines.iter().all(|l| visible_length(l) <= 5));
        assert_eq!(lines.concat(), "日本語テキスト");
    }

    #[test]
    fn wrap_prefers_hyphen_break_opportunities() {
        let lines = wrap_cells("well-known", 7);
        assert_eq!(lines, vec!["well-", "known"]);
    }

    #[test]
    fn wrap_edge_cases() {
        assert_eq!(wrap_cells("", 10), vec![String::new()]);
        assert_eq!(wrap_cells("text", 0), vec![String::new()]);
        assert_eq!(wrap_cells("a\n\nb", 10), vec!["a", "", "b"]);
    }

    #[test]
    fn cluster_wider_than_the_line_becomes_replacement() {
        assert_eq!(wrap_cells("界", 1), vec![REPLACEMENT]);
        assert_eq!(wrap_cells("a界b", 1), vec!["a", REPLACEMENT, "b"]);
        for line in wrap_cells("日本語", 1) {
            assert_eq!(visible_length(&line), 1);
        }
    }

    #[test]
    fn wrap_runs_keeps_tags_across_breaks() {
        let runs = [(1u8, "plain words "), (2u8, "bold tail")];
        let lines = wrap_runs(&runs, 11);
        assert_eq!(lines[0], vec![(1, "plain words".to_string())]);
        assert_eq!(lines[1], vec![(2, "bold tail".to_string())]);
    }

    #[test]
    fn wrap_runs_joins_words_split_by_style() {
        let runs = [(1u8, "un"), (2u8, "believable"), (1u8, " end")];
        let lines = wrap_runs(&runs, 40);
        assert_eq!(
            lines[0],
            vec![
                (1, "un".to_string()),
                (2, "believable".to_string()),
                (1, " end".to_string())
            ]
        );
    }
}

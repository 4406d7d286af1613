use crate::config::{AddressingMode, ViewMode};

/// Snapshot of where the reader is, built fresh for every navigation call.
///
/// In dynamic mode positions are global page indices. In absolute mode
/// `single_page`, `left_page` and `right_page` are line offsets into
/// `current_chapter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavContext {
    pub mode: AddressingMode,
    pub view_mode: ViewMode,
    pub current_chapter: usize,
    pub total_chapters: usize,
    pub current_page_index: usize,
    pub dynamic_total_pages: usize,
    pub single_page: usize,
    pub left_page: usize,
    pub right_page: usize,
    pub max_page_in_chapter: usize,
    /// Lines shown at once, every column of a spread included.
    pub lines_per_page: usize,
    pub column_lines_per_page: usize,
    pub max_offset_in_chapter: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOffset {
    At(usize),
    /// Start of the chapter's last page, resolved when applied.
    ChapterEnd,
}

/// What a navigation step changes. Empty means nothing moves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub current_page_index: Option<usize>,
    pub current_chapter: Option<usize>,
    pub line_offset: Option<LineOffset>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.current_page_index.is_none()
            && self.current_chapter.is_none()
            && self.line_offset.is_none()
    }

    fn page(index: usize) -> Self {
        Self {
            current_page_index: Some(index),
            ..Self::default()
        }
    }

    fn offset(offset: LineOffset) -> Self {
        Self {
            line_offset: Some(offset),
            ..Self::default()
        }
    }

    fn chapter(chapter: usize, offset: LineOffset) -> Self {
        Self {
            current_chapter: Some(chapter),
            line_offset: Some(offset),
            ..Self::default()
        }
    }
}

fn is_split(ctx: &NavContext) -> bool {
    ctx.view_mode == ViewMode::Split
}

/// Left page of the spread holding `page`.
fn spread_start(ctx: &NavContext, page: usize) -> usize {
    if is_split(ctx) {
        page.saturating_sub(page % 2)
    } else {
        page
    }
}

fn last_dynamic_page(ctx: &NavContext) -> Option<usize> {
    let last = ctx.dynamic_total_pages.checked_sub(1)?;
    Some(spread_start(ctx, last))
}

pub fn next_page(ctx: &NavContext) -> ChangeSet {
    match ctx.mode {
        AddressingMode::Dynamic => {
            let step = ctx.view_mode.columns();
            let target = spread_start(ctx, ctx.current_page_index) + step;
            if target >= ctx.dynamic_total_pages {
                return ChangeSet::default();
            }
            ChangeSet::page(target)
        }
        AddressingMode::Absolute => {
            let next = ctx.single_page + ctx.lines_per_page.max(1);
            if next <= ctx.max_offset_in_chapter {
                ChangeSet::offset(LineOffset::At(next))
            } else if ctx.current_chapter + 1 < ctx.total_chapters {
                ChangeSet::chapter(ctx.current_chapter + 1, LineOffset::At(0))
            } else {
                ChangeSet::default()
            }
        }
    }
}

pub fn prev_page(ctx: &NavContext) -> ChangeSet {
    match ctx.mode {
        AddressingMode::Dynamic => {
            let base = spread_start(ctx, ctx.current_page_index);
            if base == 0 {
                return ChangeSet::default();
            }
            ChangeSet::page(base.saturating_sub(ctx.view_mode.columns()))
        }
        AddressingMode::Absolute => {
            if ctx.single_page > 0 {
                ChangeSet::offset(LineOffset::At(
                    ctx.single_page.saturating_sub(ctx.lines_per_page.max(1)),
                ))
            } else if ctx.current_chapter > 0 {
                ChangeSet::chapter(ctx.current_chapter - 1, LineOffset::ChapterEnd)
            } else {
                ChangeSet::default()
            }
        }
    }
}

pub fn go_to_start(ctx: &NavContext) -> ChangeSet {
    match ctx.mode {
        AddressingMode::Dynamic if ctx.current_page_index == 0 => ChangeSet::default(),
        AddressingMode::Dynamic => ChangeSet::page(0),
        AddressingMode::Absolute if ctx.current_chapter == 0 && ctx.single_page == 0 => {
            ChangeSet::default()
        }
        AddressingMode::Absolute => ChangeSet::chapter(0, LineOffset::At(0)),
    }
}

pub fn go_to_end(ctx: &NavContext) -> ChangeSet {
    match ctx.mode {
        AddressingMode::Dynamic => match last_dynamic_page(ctx) {
            Some(last) if last != spread_start(ctx, ctx.current_page_index) => {
                ChangeSet::page(last)
            }
            _ => ChangeSet::default(),
        },
        AddressingMode::Absolute => {
            let Some(last) = ctx.total_chapters.checked_sub(1) else {
                return ChangeSet::default();
            };
            if ctx.current_chapter == last && ctx.single_page >= ctx.max_offset_in_chapter {
                return ChangeSet::default();
            }
            ChangeSet::chapter(last, LineOffset::ChapterEnd)
        }
    }
}

/// Absolute mode only; dynamic callers use [`jump_to_chapter`].
pub fn next_chapter(ctx: &NavContext) -> ChangeSet {
    if ctx.mode != AddressingMode::Absolute || ctx.current_chapter + 1 >= ctx.total_chapters {
        return ChangeSet::default();
    }
    ChangeSet::chapter(ctx.current_chapter + 1, LineOffset::At(0))
}

/// Lands on the end of the previous chapter.
pub fn prev_chapter(ctx: &NavContext) -> ChangeSet {
    if ctx.mode != AddressingMode::Absolute || ctx.current_chapter == 0 {
        return ChangeSet::default();
    }
    ChangeSet::chapter(ctx.current_chapter - 1, LineOffset::ChapterEnd)
}

/// `chapter_starts[i]` is the first global page of chapter `i`; only used in
/// dynamic mode.
pub fn jump_to_chapter(ctx: &NavContext, index: usize, chapter_starts: &[usize]) -> ChangeSet {
    let Some(last) = ctx.total_chapters.checked_sub(1) else {
        return ChangeSet::default();
    };
    let index = index.min(last);
    match ctx.mode {
        AddressingMode::Dynamic => {
            let Some(start) = chapter_starts.get(index).copied() else {
                return ChangeSet::default();
            };
            let page = spread_start(ctx, start.min(ctx.dynamic_total_pages.saturating_sub(1)));
            ChangeSet {
                current_page_index: Some(page),
                current_chapter: Some(index),
                line_offset: None,
            }
        }
        AddressingMode::Absolute => ChangeSet::chapter(index, LineOffset::At(0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dynamic(view_mode: ViewMode, current: usize, total: usize) -> NavContext {
        NavContext {
            mode: AddressingMode::Dynamic,
            view_mode,
            current_chapter: 0,
            total_chapters: 3,
            current_page_index: current,
            dynamic_total_pages: total,
            single_page: current,
            left_page: current,
            right_page: current + 1,
            max_page_in_chapter: 0,
            lines_per_page: 20,
            column_lines_per_page: 20,
            max_offset_in_chapter: 0,
        }
    }

    fn absolute(chapter: usize, offset: usize, max_offset: usize) -> NavContext {
        NavContext {
            mode: AddressingMode::Absolute,
            view_mode: ViewMode::Single,
            current_chapter: chapter,
            total_chapters: 3,
            current_page_index: 0,
            dynamic_total_pages: 0,
            single_page: offset,
            left_page: offset,
            right_page: offset,
            max_page_in_chapter: max_offset / 20,
            lines_per_page: 20,
            column_lines_per_page: 20,
            max_offset_in_chapter: max_offset,
        }
    }

    #[test]
    fn dynamic_single_steps_by_one() {
        let ctx = dynamic(ViewMode::Single, 3, 10);
        assert_eq!(next_page(&ctx).current_page_index, Some(4));
        assert_eq!(prev_page(&ctx).current_page_index, Some(2));
    }

    #[test]
    fn dynamic_split_keeps_left_even() {
        let ctx = dynamic(ViewMode::Split, 3, 10);
        assert_eq!(next_page(&ctx).current_page_index, Some(4));
        assert_eq!(prev_page(&ctx).current_page_index, Some(0));
        let ctx = dynamic(ViewMode::Split, 8, 10);
        assert!(next_page(&ctx).is_empty());
        let ctx = dynamic(ViewMode::Split, 7, 9);
        assert_eq!(next_page(&ctx).current_page_index, Some(8));
    }

    #[test]
    fn dynamic_boundaries_are_empty() {
        assert!(next_page(&dynamic(ViewMode::Single, 9, 10)).is_empty());
        assert!(prev_page(&dynamic(ViewMode::Single, 0, 10)).is_empty());
        assert!(go_to_start(&dynamic(ViewMode::Single, 0, 10)).is_empty());
        assert!(go_to_end(&dynamic(ViewMode::Single, 9, 10)).is_empty());
        assert!(next_page(&dynamic(ViewMode::Single, 0, 0)).is_empty());
        assert_eq!(
            go_to_end(&dynamic(ViewMode::Split, 0, 9)).current_page_index,
            Some(8)
        );
    }

    #[test]
    fn absolute_page_turns_cross_chapters() {
        let ctx = absolute(0, 0, 40);
        assert_eq!(next_page(&ctx).line_offset, Some(LineOffset::At(20)));
        let ctx = absolute(0, 40, 40);
        assert_eq!(
            next_page(&ctx),
            ChangeSet::chapter(1, LineOffset::At(0))
        );
        let ctx = absolute(1, 0, 40);
        assert_eq!(
            prev_page(&ctx),
            ChangeSet::chapter(0, LineOffset::ChapterEnd)
        );
        assert!(next_page(&absolute(2, 40, 40)).is_empty());
        assert!(prev_page(&absolute(0, 0, 40)).is_empty());
    }

    #[test]
    fn absolute_prev_from_misaligned_offset_clamps() {
        let ctx = absolute(0, 7, 40);
        assert_eq!(prev_page(&ctx).line_offset, Some(LineOffset::At(0)));
    }

    #[test]
    fn chapter_steps_are_absolute_only() {
        let ctx = absolute(1, 20, 40);
        assert_eq!(next_chapter(&ctx), ChangeSet::chapter(2, LineOffset::At(0)));
        assert_eq!(
            prev_chapter(&ctx),
            ChangeSet::chapter(0, LineOffset::ChapterEnd)
        );
        assert!(next_chapter(&absolute(2, 0, 0)).is_empty());
        assert!(prev_chapter(&absolute(0, 0, 0)).is_empty());
        assert!(next_chapter(&dynamic(ViewMode::Single, 0, 10)).is_empty());
    }

    #[test]
    fn jump_to_chapter_uses_starts_in_dynamic_mode() {
        let starts = [0, 3, 7];
        let ctx = dynamic(ViewMode::Single, 0, 10);
        assert_eq!(jump_to_chapter(&ctx, 1, &starts).current_page_index, Some(3));
        assert_eq!(jump_to_chapter(&ctx, 99, &starts).current_chapter, Some(2));
        let ctx = dynamic(ViewMode::Split, 0, 10);
        assert_eq!(jump_to_chapter(&ctx, 1, &starts).current_page_index, Some(2));
        assert_eq!(
            jump_to_chapter(&absolute(0, 20, 40), 2, &[]),
            ChangeSet::chapter(2, LineOffset::At(0))
        );
    }

    #[test]
    fn absolute_go_to_end_and_start() {
        assert_eq!(
            go_to_end(&absolute(0, 0, 40)),
            ChangeSet::chapter(2, LineOffset::ChapterEnd)
        );
        assert!(go_to_end(&absolute(2, 40, 40)).is_empty());
        assert_eq!(
            go_to_start(&absolute(1, 20, 40)),
            ChangeSet::chapter(0, LineOffset::At(0))
        );
        assert!(go_to_start(&absolute(0, 0, 40)).is_empty());
    }
}

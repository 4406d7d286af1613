mod format;
mod inline;
mod metrics;
mod paginate;

use serde::{Deserialize, Serialize};

pub use format::{format_chapter, wrap_all, wrap_window, wrap_window_indexed, FormattedChapter};
pub use inline::{parse_styled, ActiveStyles, LineStyle, StyledRun};
pub use metrics::{
    adjust_for_line_spacing, calculate_metrics, spaced_rows, LayoutKey, LayoutKeyError,
    LayoutMetrics,
};
pub use paginate::{
    build_page_map, find_page_index, CachedLayout, Page, PageLabel, PageMapEntry,
    PaginationEngine, PaginationError,
};

/// Where an image renderer may draw over the placeholder rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePlacement {
    pub id: String,
    pub cols: usize,
    pub rows: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineMeta {
    pub image_spacer: bool,
    /// Set on the first row of an image only.
    pub image: Option<ImagePlacement>,
}

/// One display line. `text` is plain and used for all width arithmetic;
/// `styled_text` carries the same characters plus style markers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WrappedLine {
    pub text: String,
    pub styled_text: String,
    pub metadata: LineMeta,
}

impl WrappedLine {
    pub fn blank() -> Self {
        Self::default()
    }

    pub fn plain(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            styled_text: text.clone(),
            text,
            metadata: LineMeta::default(),
        }
    }

    pub fn styled(text: String, styled_text: String) -> Self {
        Self {
            text,
            styled_text,
            metadata: LineMeta::default(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty() && self.metadata.image.is_none()
    }
}

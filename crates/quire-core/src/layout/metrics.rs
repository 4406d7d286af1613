use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::config::{AddressingMode, ImageMode, LineSpacing, Margins, ViewMode};

use super::WrappedLine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutMetrics {
    pub column_width: usize,
    pub content_height: usize,
    pub columns: usize,
}

impl LayoutMetrics {
    /// Logical lines that fit in one column.
    pub fn column_lines(&self, spacing: LineSpacing) -> usize {
        adjust_for_line_spacing(self.content_height, spacing)
    }

    /// Logical lines shown at once: every column of the spread.
    pub fn lines_per_page(&self, spacing: LineSpacing) -> usize {
        self.column_lines(spacing) * self.columns
    }
}

pub fn calculate_metrics(
    total_width: usize,
    total_height: usize,
    view_mode: ViewMode,
    margins: &Margins,
) -> LayoutMetrics {
    let inner = total_width.saturating_sub(2 * margins.horizontal);
    let column_width = match view_mode {
        ViewMode::Single => inner,
        ViewMode::Split => inner.saturating_sub(margins.divider) / 2,
    };
    let content_height = total_height
        .saturating_sub(margins.header_rows)
        .saturating_sub(margins.footer_rows);
    LayoutMetrics {
        column_width: column_width.max(1),
        content_height: content_height.max(1),
        columns: view_mode.columns(),
    }
}

/// Relaxed spacing puts a blank row between lines, so `n` lines take `2n - 1`
/// rows.
pub fn adjust_for_line_spacing(content_height: usize, spacing: LineSpacing) -> usize {
    let lines = match spacing {
        LineSpacing::Compact | LineSpacing::Normal => content_height,
        LineSpacing::Relaxed => (content_height + 1) / 2,
    };
    lines.max(1)
}

/// Physical rows for one column: `None` marks a spacer row.
pub fn spaced_rows(lines: &[WrappedLine], spacing: LineSpacing) -> Vec<Option<&WrappedLine>> {
    match spacing {
        LineSpacing::Compact | LineSpacing::Normal => lines.iter().map(Some).collect(),
        LineSpacing::Relaxed => {
            let mut rows = Vec::with_capacity(lines.len() * 2);
            for (idx, line) in lines.iter().enumerate() {
                if idx > 0 {
                    rows.push(None);
                }
                rows.push(Some(line));
            }
            rows
        }
    }
}

/// Everything a page map depends on. Its string form names the cache file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LayoutKey {
    pub mode: AddressingMode,
    pub width: usize,
    pub height: usize,
    pub view_mode: ViewMode,
    pub line_spacing: LineSpacing,
    pub image_mode: ImageMode,
}

impl fmt::Display for LayoutKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}x{}-{}-{}-img{}",
            self.mode.as_str(),
            self.width,
            self.height,
            self.view_mode.as_str(),
            self.line_spacing.as_str(),
            self.image_mode.index()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid layout key: {0}")]
pub struct LayoutKeyError(pub String);

impl FromStr for LayoutKey {
    type Err = LayoutKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || LayoutKeyError(s.to_string());
        let parts: Vec<&str> = s.split('-').collect();
        let [mode, size, view, spacing, image] = parts.as_slice() else {
            return Err(bad());
        };
        let mode = match *mode {
            "dynamic" => AddressingMode::Dynamic,
            "absolute" => AddressingMode::Absolute,
            _ => return Err(bad()),
        };
        let (width, height) = size.split_once('x').ok_or_else(bad)?;
        let width = width.parse().map_err(|_| bad())?;
        let height = height.parse().map_err(|_| bad())?;
        let view_mode = match *view {
            "single" => ViewMode::Single,
            "split" => ViewMode::Split,
            _ => return Err(bad()),
        };
        let line_spacing = match *spacing {
            "compact" => LineSpacing::Compact,
            "normal" => LineSpacing::Normal,
            "relaxed" => LineSpacing::Relaxed,
            _ => return Err(bad()),
        };
        let image_mode = match *image {
            "img0" => ImageMode::Placeholder,
            "img1" => ImageMode::External,
            _ => return Err(bad()),
        };
        Ok(Self {
            mode,
            width,
            height,
            view_mode,
            line_spacing,
            image_mode,
        })
    }
}

impl TryFrom<String> for LayoutKey {
    type Error = LayoutKeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LayoutKey> for String {
    fn from(key: LayoutKey) -> Self {
        key.to_string()
    }
}

use std::{
    fs,
    path::{Path, PathBuf},
};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const QUALIFIER: &str = "org";
pub const ORGANIZATION: &str = "quire";
pub const APPLICATION: &str = "quire";

pub const CONFIG_FILE: &str = "config.toml";

pub fn config_root() -> Option<PathBuf> {
    ProjectDirs::from(QUALIFIER, ORGANIZATION, APPLICATION).map(|p| p.config_dir().to_path_buf())
}

pub fn cache_root() -> Option<PathBuf> {
    ProjectDirs::from(QUALIFIER, ORGANIZATION, APPLICATION).map(|p| p.cache_dir().to_path_buf())
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    #[default]
    Single,
    Split,
}

impl ViewMode {
    pub fn columns(self) -> usize {
        match self {
            ViewMode::Single => 1,
            ViewMode::Split => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ViewMode::Single => "single",
            ViewMode::Split => "split",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LineSpacing {
    Compact,
    #[default]
    Normal,
    Relaxed,
}

impl LineSpacing {
    pub fn as_str(self) -> &'static str {
        match self {
            LineSpacing::Compact => "compact",
            LineSpacing::Normal => "normal",
            LineSpacing::Relaxed => "relaxed",
        }
    }
}

/// Page numbering: `Dynamic` keeps one flat page list for the whole book,
/// `Absolute` addresses content as (chapter, line offset).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum AddressingMode {
    #[default]
    Dynamic,
    Absolute,
}

impl AddressingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AddressingMode::Dynamic => "dynamic",
            AddressingMode::Absolute => "absolute",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ImageMode {
    /// Labelled placeholder rows only.
    #[default]
    Placeholder,
    /// Placeholder rows reserved for an external image renderer.
    External,
}

impl ImageMode {
    pub fn index(self) -> u8 {
        match self {
            ImageMode::Placeholder => 0,
            ImageMode::External => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(default)]
pub struct Margins {
    pub horizontal: usize,
    pub divider: usize,
    pub header_rows: usize,
    pub footer_rows: usize,
}

impl Default for Margins {
    fn default() -> Self {
        Self {
            horizontal: 2,
            divider: 3,
            header_rows: 1,
            footer_rows: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,
    /// Overrides the platform cache directory.
    pub root: Option<PathBuf>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            root: None,
        }
    }
}

impl CacheSettings {
    pub fn resolve_root(&self) -> Option<PathBuf> {
        self.root.clone().or_else(cache_root)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReaderConfig {
    pub view_mode: ViewMode,
    pub line_spacing: LineSpacing,
    pub page_numbering_mode: AddressingMode,
    pub highlight_quotes: bool,
    pub show_page_numbers: bool,
    pub center_headings: bool,
    pub image_mode: ImageMode,
    pub margins: Margins,
    pub cache: CacheSettings,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            view_mode: ViewMode::default(),
            line_spacing: LineSpacing::default(),
            page_numbering_mode: AddressingMode::default(),
            highlight_quotes: true,
            show_page_numbers: true,
            center_headings: false,
            image_mode: ImageMode::default(),
            margins: Margins::default(),
            cache: CacheSettings::default(),
        }
    }
}

impl ReaderConfig {
    /// Load `config.toml` from the platform config directory.
    pub fn load() -> Self {
        match config_root() {
            Some(root) => Self::load_from(&root.join(CONFIG_FILE)),
            None => Self::default(),
        }
    }

    /// Missing files give defaults; a malformed file gives defaults and a warning.
    pub fn load_from(path: &Path) -> Self {
        let Ok(content) = fs::read_to_string(path) else {
            debug!(target: "config", path = %path.display(), "no config file, using defaults");
            return Self::default();
        };
        match toml::from_str::<ReaderConfig>(&content) {
            Ok(config) => config,
            Err(err) => {
                warn!(target: "config", path = %path.display(), error = %err, "malformed config, using defaults");
                Self::default()
            }
        }
    }

    /// Settings outside the layout key that still change the wrapped lines.
    pub fn formats_like(&self, other: &ReaderConfig) -> bool {
        self.margins == other.margins
            && self.highlight_quotes == other.highlight_quotes
            && self.center_headings == other.center_headings
    }
}

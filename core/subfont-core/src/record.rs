//! Face records: one entry per face found on disk.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// OS/2 weight class of a regular face.
pub const REGULAR_WEIGHT: u16 = 400;

/// Faces at or above this weight class count as bold.
pub const BOLD_WEIGHT_THRESHOLD: u16 = 600;

/// A family name together with the language it was recorded for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalizedName {
    /// BCP-47-ish language tag (`en`, `zh-CN`, ...); empty when unknown.
    #[serde(default)]
    pub language: String,
    pub name: String,
}

impl LocalizedName {
    pub fn new(language: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            name: name.into(),
        }
    }
}

/// What the extractor learns about a single face, before we know where it lives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FaceMetadata {
    pub full_name: String,
    pub postscript_name: String,
    pub win32_family_name: String,
    pub typographic_family_names: Vec<LocalizedName>,
    pub weight: u16,
    pub italic: bool,
    pub ps_outline: bool,
}

/// Identity of a face: the file it lives in and its position inside that file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FaceId {
    pub path: PathBuf,
    pub index: u32,
}

impl fmt::Display for FaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.path.display(), self.index)
    }
}

/// One font face. Two records with the same [`FaceId`] are the same face.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRecord {
    pub full_name: String,
    pub postscript_name: String,
    pub win32_family_name: String,
    pub typographic_family_names: Vec<LocalizedName>,
    pub source_file_path: PathBuf,
    pub face_index: u32,
    #[serde(default = "default_weight")]
    pub weight: u16,
    #[serde(default)]
    pub italic: bool,
    /// Face carries CFF/CFF2 outlines rather than TrueType glyphs.
    #[serde(default)]
    pub ps_outline: bool,
}

fn default_weight() -> u16 {
    REGULAR_WEIGHT
}

impl FaceRecord {
    pub fn new(path: impl Into<PathBuf>, face_index: u32, meta: FaceMetadata) -> Self {
        Self {
            full_name: meta.full_name,
            postscript_name: meta.postscript_name,
            win32_family_name: meta.win32_family_name,
            typographic_family_names: meta.typographic_family_names,
            source_file_path: path.into(),
            face_index,
            weight: meta.weight,
            italic: meta.italic,
            ps_outline: meta.ps_outline,
        }
    }

    pub fn id(&self) -> FaceId {
        FaceId {
            path: self.source_file_path.clone(),
            index: self.face_index,
        }
    }

    /// Borrowed identity, handy for sorting without cloning paths.
    pub fn id_ref(&self) -> (&Path, u32) {
        (self.source_file_path.as_path(), self.face_index)
    }

    pub fn is_bold(&self) -> bool {
        self.weight >= BOLD_WEIGHT_THRESHOLD
    }

    /// Render the path with a `#<index>` suffix, like collection-aware tools do.
    pub fn path_with_index(&self) -> String {
        format!("{}#{}", self.source_file_path.display(), self.face_index)
    }
}

//! Face metadata extraction.
//!
//! The scanner never touches font bytes itself. It goes through
//! [`FaceExtractor`], which opens a file as a face container, reports how many
//! faces it holds and decodes each face's names and style bits. The default
//! implementation, [`FontationsExtractor`], is built on read-fonts and skrifa.

use std::path::Path;

use crate::error::DecodeError;
use crate::record::{FaceMetadata, BOLD_WEIGHT_THRESHOLD, REGULAR_WEIGHT};

/// Capability that turns font files into per-face metadata.
///
/// Implementations must be stateless per call; the scanner shares one
/// extractor between all of its workers.
pub trait FaceExtractor: Send + Sync {
    /// An opened font file (single face or collection).
    type Container: Send;

    fn open(&self, path: &Path) -> Result<Self::Container, DecodeError>;

    fn face_count(&self, container: &Self::Container) -> u32;

    fn face_metadata(
        &self,
        container: &Self::Container,
        index: u32,
    ) -> Result<FaceMetadata, DecodeError>;
}

const FS_SELECTION_ITALIC: u16 = 1 << 0;
const FS_SELECTION_BOLD: u16 = 1 << 5;
const FS_SELECTION_OBLIQUE: u16 = 1 << 9;

/// Weight and italic flag from the OS/2 `usWeightClass` and `fsSelection`.
///
/// A zero weight class means "unset" and reads as regular. A face flagged
/// bold whose weight class says otherwise is treated as 700.
pub fn style_from_os2(weight_class: u16, selection: u16) -> (u16, bool) {
    let mut weight = if weight_class == 0 {
        REGULAR_WEIGHT
    } else {
        weight_class
    };
    if selection & FS_SELECTION_BOLD != 0 && weight < BOLD_WEIGHT_THRESHOLD {
        weight = 700;
    }
    let italic = selection & (FS_SELECTION_ITALIC | FS_SELECTION_OBLIQUE) != 0;
    (weight, italic)
}

/// True for the table tags that carry PostScript outlines.
pub fn is_cff_table(tag: [u8; 4]) -> bool {
    &tag == b"CFF " || &tag == b"CFF2"
}

#[cfg(feature = "fontations")]
pub use fontations::{FontFile, FontationsExtractor};

#[cfg(feature = "fontations")]
mod fontations {
    use std::fs;
    use std::path::{Path, PathBuf};

    use read_fonts::{FileRef, FontRef, TableProvider};
    use skrifa::string::StringId;
    use skrifa::{FontRef as SkrifaFontRef, MetadataProvider};

    use super::{is_cff_table, style_from_os2, FaceExtractor};
    use crate::error::DecodeError;
    use crate::record::{FaceMetadata, LocalizedName, REGULAR_WEIGHT};

    /// Raw bytes of an opened font file plus its face count.
    #[derive(Debug)]
    pub struct FontFile {
        path: PathBuf,
        data: Vec<u8>,
        faces: u32,
    }

    impl FontFile {
        pub fn path(&self) -> &Path {
            &self.path
        }
    }

    /// [`FaceExtractor`] backed by read-fonts and skrifa.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct FontationsExtractor;

    impl FaceExtractor for FontationsExtractor {
        type Container = FontFile;

        fn open(&self, path: &Path) -> Result<FontFile, DecodeError> {
            let data = fs::read(path).map_err(|source| DecodeError::Io {
                path: path.to_path_buf(),
                source,
            })?;

            let faces = match FileRef::new(&data) {
                Ok(FileRef::Font(_)) => 1,
                Ok(FileRef::Collection(collection)) => collection.len(),
                Err(err) => {
                    return Err(DecodeError::Container {
                        path: path.to_path_buf(),
                        reason: err.to_string(),
                    })
                }
            };

            Ok(FontFile {
                path: path.to_path_buf(),
                data,
                faces,
            })
        }

        fn face_count(&self, container: &FontFile) -> u32 {
            container.faces
        }

        fn face_metadata(&self, file: &FontFile, index: u32) -> Result<FaceMetadata, DecodeError> {
            let face_err = |reason: String| DecodeError::Face {
                path: file.path.clone(),
                index,
                reason,
            };

            let font = FontRef::from_index(&file.data, index).map_err(|e| face_err(e.to_string()))?;
            let sfont =
                SkrifaFontRef::from_index(&file.data, index).map_err(|e| face_err(e.to_string()))?;

            let win32_family_name = english_or_first(&sfont, StringId::FAMILY_NAME);
            if win32_family_name.is_empty() {
                return Err(face_err("face has no family name".to_string()));
            }

            let mut typographic_family_names =
                localized_names(&sfont, StringId::TYPOGRAPHIC_FAMILY_NAME);
            if typographic_family_names.is_empty() {
                typographic_family_names = localized_names(&sfont, StringId::FAMILY_NAME);
            }

            let (weight, italic) = collect_style(&font);

            Ok(FaceMetadata {
                full_name: english_or_first(&sfont, StringId::FULL_NAME),
                postscript_name: english_or_first(&sfont, StringId::POSTSCRIPT_NAME),
                win32_family_name,
                typographic_family_names,
                weight,
                italic,
                ps_outline: has_cff_outlines(&font),
            })
        }
    }

    fn english_or_first(font: &SkrifaFontRef, id: StringId) -> String {
        font.localized_strings(id)
            .english_or_first()
            .map(|s| s.to_string().trim().to_string())
            .unwrap_or_default()
    }

    fn localized_names(font: &SkrifaFontRef, id: StringId) -> Vec<LocalizedName> {
        let mut names: Vec<LocalizedName> = Vec::new();
        for entry in font.localized_strings(id) {
            let rendered = entry.to_string();
            let rendered = rendered.trim();
            if rendered.is_empty() {
                continue;
            }
            let name = LocalizedName::new(entry.language().unwrap_or_default(), rendered);
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    fn collect_style(font: &FontRef) -> (u16, bool) {
        match font.os2() {
            Ok(table) => style_from_os2(table.us_weight_class(), table.fs_selection().bits()),
            Err(_) => (REGULAR_WEIGHT, false),
        }
    }

    fn has_cff_outlines(font: &FontRef) -> bool {
        font.table_directory
            .table_records()
            .iter()
            .any(|rec| is_cff_table(rec.tag().to_be_bytes()))
    }

}

#![allow(dead_code)]

//! Test extractor that reads a JSON description of faces instead of real
//! font bytes, so scans can be set up with plain files.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use subfont_core::{DecodeError, FaceExtractor, FaceMetadata, FaceRecord, LocalizedName};

#[derive(Debug, Deserialize)]
pub struct StubFace {
    pub family: String,
    #[serde(default)]
    pub win32: Option<String>,
    #[serde(default)]
    pub weight: Option<u16>,
    #[serde(default)]
    pub italic: bool,
    #[serde(default)]
    pub broken: bool,
}

#[derive(Debug, Deserialize)]
pub struct StubFile {
    pub faces: Vec<StubFace>,
}

#[derive(Debug, Default)]
pub struct StubExtractor {
    pub delay: Option<Duration>,
    pub opened: AtomicUsize,
}

impl StubExtractor {
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl FaceExtractor for StubExtractor {
    type Container = (PathBuf, StubFile);

    fn open(&self, path: &Path) -> Result<Self::Container, DecodeError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        let text = fs::read_to_string(path).map_err(|source| DecodeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file = serde_json::from_str(&text).map_err(|e| DecodeError::Container {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok((path.to_path_buf(), file))
    }

    fn face_count(&self, container: &Self::Container) -> u32 {
        container.1.faces.len() as u32
    }

    fn face_metadata(&self, container: &Self::Container, index: u32) -> Result<FaceMetadata, DecodeError> {
        let (path, file) = container;
        let face = &file.faces[index as usize];
        if face.broken {
            return Err(DecodeError::Face {
                path: path.clone(),
                index,
                reason: "broken name table".to_string(),
            });
        }
        let weight = face.weight.unwrap_or(400);
        let style = match (weight >= 600, face.italic) {
            (false, false) => "Regular",
            (true, false) => "Bold",
            (false, true) => "Italic",
            (true, true) => "Bold Italic",
        };
        Ok(FaceMetadata {
            full_name: format!("{} {style}", face.family),
            postscript_name: format!("{}-{}", face.family.replace(' ', ""), style.replace(' ', "")),
            win32_family_name: face.win32.clone().unwrap_or_else(|| face.family.clone()),
            typographic_family_names: vec![LocalizedName::new("en", face.family.clone())],
            weight,
            italic: face.italic,
            ps_outline: false,
        })
    }
}

/// Write a stub font file describing `faces`.
pub fn write_font(dir: &Path, name: &str, faces: Value) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create font dir");
    }
    fs::write(&path, json!({ "faces": faces }).to_string()).expect("write stub font");
    path
}

/// Single regular face of `family`.
pub fn regular(family: &str) -> Value {
    json!([{ "family": family }])
}

/// Record as the stub extractor would produce it, for building indexes by hand.
pub fn record(path: &str, index: u32, family: &str, weight: u16, italic: bool) -> FaceRecord {
    FaceRecord::new(
        path,
        index,
        FaceMetadata {
            full_name: format!("{family} {weight}"),
            postscript_name: format!("{}-{weight}", family.replace(' ', "")),
            win32_family_name: family.to_string(),
            typographic_family_names: vec![LocalizedName::new("en", family)],
            weight,
            italic,
            ps_outline: false,
        },
    )
}

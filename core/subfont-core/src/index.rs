//! The face index: every discovered face plus the family-name maps built on top
//!
//! The canonical data is a plain list of [`FaceRecord`]s, sorted by identity
//! and free of duplicates. Everything else in here (typographic and Win32
//! family maps, their fuzzy twins, full-name and PostScript-name maps) is a
//! projection that [`FontFaceIndex::build`] recomputes from that list, so an
//! index read back from disk answers lookups exactly like the one that was
//! written.
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::Write;
use std::path::Path;

use serde::Serialize;
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{Error, IndexLoadError};
use crate::names::{exact_key, family_key, loose_key};
use crate::record::FaceRecord;

/// Version stamped into persisted artifacts.
pub const INDEX_FORMAT_VERSION: u64 = 1;

/// Fields every persisted face entry must carry.
const REQUIRED_FIELDS: [&str; 6] = [
    "full_name",
    "postscript_name",
    "win32_family_name",
    "typographic_family_names",
    "source_file_path",
    "face_index",
];

/// Faces sharing a family name, in index build order.
#[derive(Debug, Clone, Default)]
pub struct FamilyGroup<'a> {
    name: &'a str,
    faces: Vec<&'a FaceRecord>,
}

impl<'a> FamilyGroup<'a> {
    /// Family name as first spelled by a face in build order.
    pub fn name(&self) -> &'a str {
        self.name
    }

    pub fn faces(&self) -> &[&'a FaceRecord] {
        &self.faces
    }

    pub fn first(&self) -> Option<&'a FaceRecord> {
        self.faces.first().copied()
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a FaceRecord> + '_ {
        self.faces.iter().copied()
    }
}

#[derive(Debug, Clone, Default)]
struct NameEntry {
    display: String,
    faces: Vec<usize>,
}

/// name key -> faces carrying that name, as positions into the record list.
#[derive(Debug, Clone, Default)]
struct NameMap {
    entries: HashMap<String, NameEntry>,
}

impl NameMap {
    fn insert(&mut self, key: String, display: &str, face: usize) {
        if key.is_empty() {
            return;
        }
        let entry = self.entries.entry(key).or_insert_with(|| NameEntry {
            display: display.to_string(),
            faces: Vec::new(),
        });
        // Records are visited in order, so a repeat can only be the last push.
        if entry.faces.last() != Some(&face) {
            entry.faces.push(face);
        }
    }

    fn group<'a>(&'a self, key: &str, records: &'a [FaceRecord]) -> FamilyGroup<'a> {
        match self.entries.get(key) {
            Some(entry) => FamilyGroup {
                name: &entry.display,
                faces: entry.faces.iter().map(|&i| &records[i]).collect(),
            },
            None => FamilyGroup::default(),
        }
    }

    fn prefixed<'a>(&'a self, prefix: &str, records: &'a [FaceRecord]) -> FamilyGroup<'a> {
        let mut hits: Vec<&NameEntry> = self
            .entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(_, entry)| entry)
            .collect();
        if hits.is_empty() {
            return FamilyGroup::default();
        }
        hits.sort_by(|a, b| a.faces.first().cmp(&b.faces.first()));

        let faces: BTreeSet<usize> = hits.iter().flat_map(|e| e.faces.iter().copied()).collect();
        FamilyGroup {
            name: &hits[0].display,
            faces: faces.into_iter().map(|i| &records[i]).collect(),
        }
    }
}

/// In-memory face index. Read-only once built.
#[derive(Debug, Clone, Default)]
pub struct FontFaceIndex {
    records: Vec<FaceRecord>,
    typographic: NameMap,
    win32: NameMap,
    typographic_exact: NameMap,
    win32_exact: NameMap,
    typographic_loose: NameMap,
    win32_loose: NameMap,
    full_names: NameMap,
    postscript_names: NameMap,
}

impl FontFaceIndex {
    /// Build an index from a finished record set.
    ///
    /// Records are ordered by (path, face index) and duplicates by identity are
    /// dropped, so the result does not depend on the order the scanner's
    /// workers happened to produce them in.
    pub fn build(mut records: Vec<FaceRecord>) -> Self {
        records.sort_by(|a, b| a.id_ref().cmp(&b.id_ref()));
        records.dedup_by(|a, b| a.id_ref() == b.id_ref());

        let mut index = Self::default();
        for (pos, record) in records.iter().enumerate() {
            for name in &record.typographic_family_names {
                index
                    .typographic
                    .insert(family_key(&name.name), &name.name, pos);
                index
                    .typographic_exact
                    .insert(exact_key(&name.name), &name.name, pos);
                index
                    .typographic_loose
                    .insert(loose_key(&name.name), &name.name, pos);
            }
            let win32 = &record.win32_family_name;
            index.win32.insert(family_key(win32), win32, pos);
            index.win32_exact.insert(exact_key(win32), win32, pos);
            index.win32_loose.insert(loose_key(win32), win32, pos);
            index
                .full_names
                .insert(family_key(&record.full_name), &record.full_name, pos);
            index.postscript_names.insert(
                family_key(&record.postscript_name),
                &record.postscript_name,
                pos,
            );
        }
        index.records = records;

        debug!(
            faces = index.records.len(),
            typographic_families = index.typographic.entries.len(),
            win32_families = index.win32.entries.len(),
            "built face index"
        );
        index
    }

    /// Union several indexes (e.g. one per artifact) into one.
    pub fn merge<I>(indexes: I) -> Self
    where
        I: IntoIterator<Item = FontFaceIndex>,
    {
        let records = indexes.into_iter().flat_map(|i| i.records).collect();
        Self::build(records)
    }

    pub fn records(&self) -> &[FaceRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<FaceRecord> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Typographic family lookup, case-insensitive and whitespace-normalized.
    pub fn lookup_typographic(&self, name: &str) -> FamilyGroup<'_> {
        self.typographic.group(&family_key(name), &self.records)
    }

    /// Win32 family lookup, case-insensitive and whitespace-normalized.
    pub fn lookup_win32(&self, name: &str) -> FamilyGroup<'_> {
        self.win32.group(&family_key(name), &self.records)
    }

    /// Case-insensitive lookup that does not forgive stray whitespace: the
    /// name must be spelled exactly as the face spells it, spaces included.
    pub fn typographic_exact(&self, name: &str) -> FamilyGroup<'_> {
        self.typographic_exact.group(&exact_key(name), &self.records)
    }

    pub fn win32_exact(&self, name: &str) -> FamilyGroup<'_> {
        self.win32_exact.group(&exact_key(name), &self.records)
    }

    /// Lookup on names stripped down to their alphanumerics.
    pub fn typographic_loose(&self, name: &str) -> FamilyGroup<'_> {
        self.typographic_loose.group(&loose_key(name), &self.records)
    }

    pub fn win32_loose(&self, name: &str) -> FamilyGroup<'_> {
        self.win32_loose.group(&loose_key(name), &self.records)
    }

    /// Every typographic family whose name starts with `prefix`, merged.
    pub fn typographic_with_prefix(&self, prefix: &str) -> FamilyGroup<'_> {
        self.typographic_exact.prefixed(&exact_key(prefix), &self.records)
    }

    pub fn win32_with_prefix(&self, prefix: &str) -> FamilyGroup<'_> {
        self.win32_exact.prefixed(&exact_key(prefix), &self.records)
    }

    pub fn lookup_full_name(&self, name: &str) -> FamilyGroup<'_> {
        self.full_names.group(&family_key(name), &self.records)
    }

    pub fn lookup_postscript_name(&self, name: &str) -> FamilyGroup<'_> {
        self.postscript_names.group(&family_key(name), &self.records)
    }

    /// Display names of all typographic families, sorted.
    pub fn typographic_families(&self) -> Vec<&str> {
        sorted_displays(&self.typographic)
    }

    /// Display names of all Win32 families, sorted.
    pub fn win32_families(&self) -> Vec<&str> {
        sorted_displays(&self.win32)
    }

    /// Persisted representation: a JSON document with the ordered face list.
    pub fn serialize(&self) -> Result<Vec<u8>, serde_json::Error> {
        #[derive(Serialize)]
        struct Document<'a> {
            version: u64,
            faces: &'a [FaceRecord],
        }

        serde_json::to_vec_pretty(&Document {
            version: INDEX_FORMAT_VERSION,
            faces: &self.records,
        })
    }

    /// Parse a persisted artifact. Malformed entries fail the whole load.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, IndexLoadError> {
        let document: Value = serde_json::from_slice(bytes).map_err(IndexLoadError::Syntax)?;

        if let Some(version) = document.get("version") {
            let found = version.as_u64().unwrap_or(0);
            if found != INDEX_FORMAT_VERSION {
                return Err(IndexLoadError::UnsupportedVersion {
                    found,
                    expected: INDEX_FORMAT_VERSION,
                });
            }
        }

        let faces = match document {
            Value::Object(mut map) => match map.remove("faces") {
                Some(Value::Array(faces)) => faces,
                _ => return Err(IndexLoadError::MissingFaces),
            },
            _ => return Err(IndexLoadError::MissingFaces),
        };

        let mut records = Vec::with_capacity(faces.len());
        for (entry, face) in faces.into_iter().enumerate() {
            records.push(decode_face(entry, face)?);
        }

        Ok(Self::build(records))
    }

    /// Write the artifact atomically: temp file next to the target, then rename.
    pub fn save(&self, path: &Path) -> Result<(), Error> {
        let save_err = |source| Error::IndexSave {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(save_err)?;
        }

        let bytes = self
            .serialize()
            .map_err(|e| save_err(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut temp = NamedTempFile::new_in(dir).map_err(save_err)?;
        temp.write_all(&bytes).map_err(save_err)?;
        temp.as_file().sync_all().map_err(save_err)?;
        temp.persist(path).map_err(|e| save_err(e.error))?;

        info!(path = %path.display(), faces = self.len(), "index saved");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, IndexLoadError> {
        let bytes = fs::read(path).map_err(|source| IndexLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let index = Self::deserialize(&bytes)?;
        info!(path = %path.display(), faces = index.len(), "index loaded");
        Ok(index)
    }

    /// Load several artifacts and merge them. Any failure aborts the load.
    pub fn load_all<P: AsRef<Path>>(paths: &[P]) -> Result<Self, IndexLoadError> {
        let mut loaded = Vec::with_capacity(paths.len());
        for path in paths {
            loaded.push(Self::load(path.as_ref())?);
        }
        Ok(Self::merge(loaded))
    }
}

fn decode_face(entry: usize, face: Value) -> Result<FaceRecord, IndexLoadError> {
    let Some(object) = face.as_object() else {
        return Err(IndexLoadError::Malformed {
            entry,
            source: serde::de::Error::custom("face entry is not an object"),
        });
    };
    for field in REQUIRED_FIELDS {
        if !object.contains_key(field) {
            return Err(IndexLoadError::MissingField { entry, field });
        }
    }
    serde_json::from_value(face).map_err(|source| IndexLoadError::Malformed { entry, source })
}

fn sorted_displays(map: &NameMap) -> Vec<&str> {
    let mut names: Vec<&str> = map.entries.values().map(|e| e.display.as_str()).collect();
    names.sort_unstable();
    names
}

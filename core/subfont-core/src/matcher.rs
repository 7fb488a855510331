//! Family-name matching over a [`FontFaceIndex`].
//!
//! A query walks a fixed ladder and stops at the first rung that produces
//! candidates:
//!
//! 1. exact (case-insensitive) typographic family name,
//! 2. exact Win32 family name,
//! 3. fuzzy family name: alphanumerics only, plus prefix matching for names
//!    that look GDI-truncated,
//! 4. full name or PostScript name.
//!
//! Inside a candidate group the bold/italic hints pick a face. When no face
//! satisfies every hint the first face of the group is returned: a renderer
//! would rather synthesize bold than show tofu.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::index::{FamilyGroup, FontFaceIndex};
use crate::names::{is_gdi_truncated, loose_key, undecorate};
use crate::record::FaceRecord;

/// Optional style preferences. `None` means "don't care".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleHints {
    pub bold: Option<bool>,
    pub italic: Option<bool>,
}

impl StyleHints {
    fn is_unconstrained(&self) -> bool {
        self.bold.is_none() && self.italic.is_none()
    }

    fn accepts(&self, face: &FaceRecord) -> bool {
        self.bold.map_or(true, |bold| face.is_bold() == bold)
            && self.italic.map_or(true, |italic| face.italic == italic)
    }
}

/// A renderer's request for a face.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchQuery {
    family: String,
    style: StyleHints,
}

impl MatchQuery {
    pub fn new(family: impl Into<String>) -> Self {
        Self {
            family: family.into(),
            style: StyleHints::default(),
        }
    }

    pub fn bold(mut self, bold: Option<bool>) -> Self {
        self.style.bold = bold;
        self
    }

    pub fn italic(mut self, italic: Option<bool>) -> Self {
        self.style.italic = italic;
        self
    }

    pub fn with_style(mut self, style: StyleHints) -> Self {
        self.style = style;
        self
    }

    pub fn family(&self) -> &str {
        &self.family
    }

    pub fn style(&self) -> StyleHints {
        self.style
    }
}

/// Which rung of the ladder produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    ExactTypographic,
    ExactWin32,
    Fuzzy,
    FullName,
}

impl MatchTier {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchTier::ExactTypographic => "exact_typographic",
            MatchTier::ExactWin32 => "exact_win32",
            MatchTier::Fuzzy => "fuzzy",
            MatchTier::FullName => "full_name",
        }
    }

    /// True for the two exact family-name tiers.
    pub fn is_exact(self) -> bool {
        matches!(self, MatchTier::ExactTypographic | MatchTier::ExactWin32)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchResult {
    Found { face: FaceRecord, tier: MatchTier },
    NotFound,
}

impl MatchResult {
    pub fn face(&self) -> Option<&FaceRecord> {
        match self {
            MatchResult::Found { face, .. } => Some(face),
            MatchResult::NotFound => None,
        }
    }

    pub fn tier(&self) -> Option<MatchTier> {
        match self {
            MatchResult::Found { tier, .. } => Some(*tier),
            MatchResult::NotFound => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, MatchResult::Found { .. })
    }
}

/// Answers [`MatchQuery`]s against one immutable index.
#[derive(Debug, Clone, Default)]
pub struct FontMatcher {
    index: FontFaceIndex,
}

impl FontMatcher {
    pub fn new(index: FontFaceIndex) -> Self {
        Self { index }
    }

    pub fn index(&self) -> &FontFaceIndex {
        &self.index
    }

    /// Resolve a query to a single face. Never fails; an unknown family is
    /// [`MatchResult::NotFound`].
    pub fn find(&self, query: &MatchQuery) -> MatchResult {
        let name = undecorate(query.family());
        if name.trim().is_empty() {
            return MatchResult::NotFound;
        }
        let style = query.style();

        let result = self
            .family_candidates(name)
            .map(|(group, tier)| (pick_face(group.faces(), style), tier))
            .or_else(|| {
                self.name_candidates(name)
                    .map(|(faces, tier)| (faces.first().copied(), tier))
            });

        match result {
            Some((Some(face), tier)) => {
                trace!(query = name, face = %face.path_with_index(), tier = tier.as_str(), "matched");
                MatchResult::Found {
                    face: face.clone(),
                    tier,
                }
            }
            _ => {
                trace!(query = name, "no match");
                MatchResult::NotFound
            }
        }
    }

    fn family_candidates(&self, name: &str) -> Option<(FamilyGroup<'_>, MatchTier)> {
        let index = &self.index;

        let exact = [
            (index.typographic_exact(name), MatchTier::ExactTypographic),
            (index.win32_exact(name), MatchTier::ExactWin32),
        ];
        if let Some(hit) = exact.into_iter().find(|(group, _)| !group.is_empty()) {
            return Some(hit);
        }

        if loose_key(name).is_empty() {
            return None;
        }
        let mut fuzzy = vec![index.typographic_loose(name), index.win32_loose(name)];
        if is_gdi_truncated(name) {
            fuzzy.push(index.typographic_with_prefix(name));
            fuzzy.push(index.win32_with_prefix(name));
        }
        fuzzy
            .into_iter()
            .find(|group| !group.is_empty())
            .map(|group| (group, MatchTier::Fuzzy))
    }

    /// Full-name and PostScript-name fallback. A PostScript hit is only
    /// trusted for CFF faces and a full-name hit only for TrueType faces,
    /// unless that filter leaves nothing. A full name already denotes a single
    /// face, so style hints are not consulted here.
    fn name_candidates(&self, name: &str) -> Option<(Vec<&FaceRecord>, MatchTier)> {
        let by_ps = self.index.lookup_postscript_name(name);
        let by_full = self.index.lookup_full_name(name);

        let preferred: Vec<&FaceRecord> = by_ps
            .iter()
            .filter(|face| face.ps_outline)
            .chain(by_full.iter().filter(|face| !face.ps_outline))
            .collect();
        let candidates = if preferred.is_empty() {
            by_ps.iter().chain(by_full.iter()).collect()
        } else {
            preferred
        };

        if candidates.is_empty() {
            None
        } else {
            Some((candidates, MatchTier::FullName))
        }
    }
}

fn pick_face<'a>(faces: &[&'a FaceRecord], style: StyleHints) -> Option<&'a FaceRecord> {
    if style.is_unconstrained() {
        return faces.first().copied();
    }
    faces
        .iter()
        .copied()
        .find(|face| style.accepts(face))
        .or_else(|| faces.first().copied())
}

//! Family-name normalization shared by the index and the matcher.
//!
//! Renderers ask for fonts with whatever spelling the subtitle author typed:
//! stray spaces, odd capitalization, a GDI `@` prefix for vertical text, or a
//! name chopped at 31 characters by `LOGFONT`. These helpers fold all of that
//! into comparable keys.

/// Length, in UTF-16 code units, that GDI truncates face names to.
pub const GDI_FACE_NAME_LIMIT: usize = 31;

/// Trim and collapse internal whitespace runs to a single space.
pub fn normalize_whitespace(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Key for exact, case-insensitive comparison. Whitespace is kept as-is.
pub fn exact_key(raw: &str) -> String {
    raw.to_lowercase()
}

/// Key used by the index maps: case-folded and whitespace-normalized.
pub fn family_key(raw: &str) -> String {
    normalize_whitespace(raw).to_lowercase()
}

/// Key for fuzzy comparison: only alphanumerics survive, case-folded.
pub fn loose_key(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Strip the `@` GDI prepends to request the vertical variant of a face.
pub fn undecorate(raw: &str) -> &str {
    raw.strip_prefix('@').unwrap_or(raw)
}

/// True when `raw` is exactly as long as a GDI-truncated face name.
pub fn is_gdi_truncated(raw: &str) -> bool {
    raw.encode_utf16().count() == GDI_FACE_NAME_LIMIT
}

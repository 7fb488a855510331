//! Scans real font files. Point `SUBFONT_TEST_FONTS` at a directory of fonts
//! to run these; without it they pass trivially.

use std::env;
use std::path::PathBuf;

use subfont_core::{FontMatcher, FontationsExtractor, MatchQuery, PathDiscovery, ScanOptions, ScanSession};

fn fonts_dir() -> Option<PathBuf> {
    let dir = PathBuf::from(env::var_os("SUBFONT_TEST_FONTS")?);
    dir.canonicalize().ok()
}

#[test]
fn every_scanned_face_is_found_by_its_own_family() {
    let Some(dir) = fonts_dir() else {
        eprintln!("skipping: SUBFONT_TEST_FONTS not set");
        return;
    };

    let outcome = ScanSession::new(PathDiscovery::new([dir]), FontationsExtractor, ScanOptions::default())
        .run()
        .expect("scan");
    assert!(!outcome.records.is_empty(), "no faces found");

    let matcher = FontMatcher::new(outcome.into_index());
    for face in matcher.index().records() {
        assert!(!face.win32_family_name.is_empty());
        assert!(!face.typographic_family_names.is_empty());

        let result = matcher.find(&MatchQuery::new(face.win32_family_name.clone()));
        let tier = result.tier().expect("own family must resolve");
        assert!(tier.is_exact(), "{} resolved via {tier:?}", face.path_with_index());
    }
}

#[test]
fn collections_report_every_face() {
    let Some(dir) = fonts_dir() else {
        return;
    };

    let outcome = ScanSession::new(PathDiscovery::new([dir]), FontationsExtractor, ScanOptions::default())
        .run()
        .expect("scan");

    for record in outcome.records.iter().filter(|r| r.face_index > 0) {
        let previous = outcome
            .records
            .iter()
            .any(|r| r.source_file_path == record.source_file_path && r.face_index == record.face_index - 1);
        let failed = outcome
            .failures
            .iter()
            .any(|f| f.path.as_ref() == Some(&record.source_file_path));
        assert!(previous || failed, "gap before {}", record.path_with_index());
    }
}

use super::*;
use clap::CommandFactory;
use std::io::Cursor;
use subfont_core::{FaceMetadata, LocalizedName, MatchTier, ScanPhase};

fn face(path: &str, family: &str, ps_outline: bool) -> FaceRecord {
    FaceRecord::new(
        path,
        0,
        FaceMetadata {
            full_name: format!("{family} Regular"),
            postscript_name: format!("{family}-Regular"),
            win32_family_name: family.to_string(),
            typographic_family_names: vec![LocalizedName::new("en", family)],
            weight: 400,
            italic: false,
            ps_outline,
        },
    )
}

#[test]
fn cli_definition_is_consistent() {
    Cli::command().debug_assert();
}

#[test]
fn parses_scan_args() {
    let cli = Cli::try_parse_from([
        "subfont", "scan", "-o", "/tmp/index.json", "-j", "3", "--dedup", "--ext", "ttf,otf", "/fonts", "/more",
    ])
    .expect("parse cli");

    let Command::Scan(args) = cli.command else {
        panic!("expected scan");
    };
    assert_eq!(args.paths, vec![PathBuf::from("/fonts"), PathBuf::from("/more")]);
    assert_eq!(args.output, Some(PathBuf::from("/tmp/index.json")));
    assert_eq!(args.jobs, Some(3));
    assert!(args.dedup);
    assert_eq!(args.extensions, vec!["ttf", "otf"]);
}

#[test]
fn zero_jobs_is_rejected() {
    assert!(Cli::try_parse_from(["subfont", "scan", "-j", "0", "/fonts"]).is_err());
}

#[test]
fn style_flags_become_tri_state_hints() {
    let cli = Cli::try_parse_from(["subfont", "match", "Foo", "--bold", "--upright"]).expect("parse");
    let Command::Match(args) = cli.command else {
        panic!("expected match");
    };
    assert_eq!(
        args.style.hints(),
        StyleHints {
            bold: Some(true),
            italic: Some(false)
        }
    );

    let cli = Cli::try_parse_from(["subfont", "query", "Foo"]).expect("parse");
    let Command::Query(args) = cli.command else {
        panic!("expected query");
    };
    assert_eq!(args.style.hints(), StyleHints::default());
}

#[test]
fn contradictory_style_flags_conflict() {
    assert!(Cli::try_parse_from(["subfont", "match", "Foo", "--bold", "--regular"]).is_err());
    assert!(Cli::try_parse_from(["subfont", "match", "Foo", "--italic", "--upright"]).is_err());
}

#[test]
fn global_flags_work_after_the_subcommand() {
    let cli = Cli::try_parse_from(["subfont", "stats", "-i", "a.json", "-i", "b.json", "-vv"]).expect("parse");
    assert_eq!(cli.verbose, 2);
    let Command::Stats(args) = cli.command else {
        panic!("expected stats");
    };
    assert_eq!(args.index.index.len(), 2);
}

#[test]
fn gathers_paths_from_stdin_and_args() {
    let stdin = Cursor::new("/from/stdin\n\n  /padded  \n");
    let paths = gather_paths(&[PathBuf::from("/arg")], true, false, stdin).expect("gather");
    assert_eq!(
        paths,
        vec![
            PathBuf::from("/from/stdin"),
            PathBuf::from("/padded"),
            PathBuf::from("/arg")
        ]
    );

    let dash = Cursor::new("/dash\n");
    let paths = gather_paths(&[PathBuf::from("-")], false, false, dash).expect("gather");
    assert_eq!(paths, vec![PathBuf::from("/dash")]);
}

#[test]
fn progress_line_shows_ratio_when_total_is_known() {
    let known = ScanProgress {
        phase: ScanPhase::Extracting,
        claimed: 5,
        total: Some(10),
        faces: 7,
        failures: 1,
    };
    let line = render_progress(&known);
    assert!(line.starts_with("scanning"), "{line}");
    assert!(line.contains("5/10 files ( 50%)"), "{line}");
    assert!(line.contains("7 faces, 1 failures"), "{line}");

    let unknown = ScanProgress { total: None, ..known };
    assert!(render_progress(&unknown).contains("5 files,"));
}

#[test]
fn match_line_is_tab_separated() {
    let result = MatchResult::Found {
        face: face("/fonts/a.ttc", "A", false),
        tier: MatchTier::Fuzzy,
    };
    let mut buf = Vec::new();
    write_match_line(&result, &mut buf).expect("write");
    assert_eq!(String::from_utf8(buf).expect("utf8"), "/fonts/a.ttc#0\tfuzzy\tA Regular\n");
}

#[test]
fn summary_counts_files_and_families() {
    let mut second = face("/fonts/a.ttc", "A", true);
    second.face_index = 1;
    let index = FontFaceIndex::build(vec![
        face("/fonts/a.ttc", "A", false),
        second,
        face("/fonts/b.ttf", "B", false),
    ]);

    let summary = summarize(&index);
    assert_eq!(summary.faces, 3);
    assert_eq!(summary.files, 2);
    assert_eq!(summary.typographic_families, 2);
    assert_eq!(summary.cff_faces, 1);
}

#[cfg(target_os = "linux")]
#[test]
fn linux_font_dirs_include_the_per_user_locations() {
    let dirs = platform_font_dirs();
    assert_eq!(dirs[0], PathBuf::from("/usr/share/fonts"));
    if let Some(home) = env::var_os("HOME").map(PathBuf::from) {
        assert!(dirs.contains(&home.join(".local/share/fonts")));
        assert!(dirs.contains(&home.join(".fonts")));
    }
}

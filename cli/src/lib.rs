//! subfont CLI: build face indexes, inspect them, match against them and
//! run the query server.

use std::env;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};
use serde::Serialize;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use subfont_core::output::{write_json_pretty, write_ndjson};
use subfont_core::protocol::ResponseBody;
use subfont_core::{
    Config, ExtensionFilter, FaceRecord, FontFaceIndex, FontMatcher, FontationsExtractor, MatchQuery, MatchResult,
    QueryClient, QueryServer, ScanOptions, ScanPhase, ScanProgress, ScanSession, StyleHints,
};

const PROGRESS_INTERVAL: Duration = Duration::from_millis(200);

/// CLI entrypoint for subfont.
#[derive(Debug, Parser)]
#[command(
    name = "subfont",
    version,
    about = "Font face index and family matcher for subtitle renderers"
)]
pub struct Cli {
    /// Read configuration from this file instead of the default location
    #[arg(long = "config", global = true, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// More log output (repeat for trace)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short = 'q', long = "quiet", action = ArgAction::SetTrue, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Scan font directories and write an index artifact
    Scan(ScanArgs),
    /// Serve match queries over TCP until interrupted
    Serve(ServeArgs),
    /// Resolve a family name against index artifacts
    Match(MatchArgs),
    /// Ask a running server to resolve a family name
    Query(QueryArgs),
    /// Summarize index artifacts
    Stats(StatsArgs),
}

#[derive(Debug, Args)]
struct ScanArgs {
    /// Directories or files to scan (defaults to the configured roots)
    #[arg(value_hint = ValueHint::DirPath)]
    paths: Vec<PathBuf>,

    /// Read newline-delimited paths from STDIN
    #[arg(long = "stdin-paths", action = ArgAction::SetTrue)]
    stdin_paths: bool,

    /// Include common system font directories automatically
    #[arg(long = "system-fonts", action = ArgAction::SetTrue)]
    system_fonts: bool,

    /// Where to write the index (defaults to the first configured index path)
    #[arg(short = 'o', long = "output", value_hint = ValueHint::FilePath)]
    output: Option<PathBuf>,

    /// Worker threads (defaults to half the available cores)
    #[arg(short = 'j', long = "jobs", value_parser = clap::value_parser!(u16).range(1..))]
    jobs: Option<u16>,

    /// Skip byte-identical copies of the same file
    #[arg(long = "dedup", action = ArgAction::SetTrue)]
    dedup: bool,

    /// Start extracting while the tree is still being walked
    #[arg(long = "no-precount", action = ArgAction::SetTrue)]
    no_precount: bool,

    /// Follow symlinks while walking paths
    #[arg(long = "follow-symlinks", action = ArgAction::SetTrue)]
    follow_symlinks: bool,

    /// File extensions to scan
    #[arg(long = "ext", value_delimiter = ',')]
    extensions: Vec<String>,

    /// Suppress the progress line on stderr
    #[arg(long = "no-progress", action = ArgAction::SetTrue)]
    no_progress: bool,
}

#[derive(Debug, Args)]
struct IndexArgs {
    /// Index artifact to load (repeatable; defaults to the configured paths)
    #[arg(short = 'i', long = "index", value_hint = ValueHint::FilePath)]
    index: Vec<PathBuf>,
}

#[derive(Debug, Args)]
struct StyleArgs {
    /// Prefer a bold face
    #[arg(long = "bold", action = ArgAction::SetTrue, conflicts_with = "regular")]
    bold: bool,

    /// Prefer a non-bold face
    #[arg(long = "regular", action = ArgAction::SetTrue)]
    regular: bool,

    /// Prefer an italic face
    #[arg(long = "italic", action = ArgAction::SetTrue, conflicts_with = "upright")]
    italic: bool,

    /// Prefer an upright face
    #[arg(long = "upright", action = ArgAction::SetTrue)]
    upright: bool,
}

impl StyleArgs {
    fn hints(&self) -> StyleHints {
        StyleHints {
            bold: tri_state(self.bold, self.regular),
            italic: tri_state(self.italic, self.upright),
        }
    }
}

fn tri_state(yes: bool, no: bool) -> Option<bool> {
    match (yes, no) {
        (true, _) => Some(true),
        (false, true) => Some(false),
        (false, false) => None,
    }
}

#[derive(Debug, Args)]
struct ServeArgs {
    #[command(flatten)]
    index: IndexArgs,

    /// Address to listen on
    #[arg(short = 'b', long = "bind")]
    bind: Option<String>,
}

#[derive(Debug, Args)]
struct MatchArgs {
    /// Family name as the subtitle script spells it
    family: String,

    #[command(flatten)]
    style: StyleArgs,

    #[command(flatten)]
    index: IndexArgs,

    /// Emit the full face record as JSON
    #[arg(long = "json", action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(Debug, Args)]
struct QueryArgs {
    /// Family name as the subtitle script spells it
    family: String,

    #[command(flatten)]
    style: StyleArgs,

    /// Server address (defaults to the configured bind address)
    #[arg(short = 'a', long = "addr")]
    addr: Option<String>,

    /// Emit the raw response as JSON
    #[arg(long = "json", action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(Debug, Args)]
struct StatsArgs {
    #[command(flatten)]
    index: IndexArgs,

    /// List every typographic family
    #[arg(long = "families", action = ArgAction::SetTrue, conflicts_with = "ndjson")]
    families: bool,

    /// Dump every face record as NDJSON
    #[arg(long = "ndjson", action = ArgAction::SetTrue)]
    ndjson: bool,

    /// Emit the summary as JSON
    #[arg(long = "json", action = ArgAction::SetTrue)]
    json: bool,
}

/// Parse CLI args and execute the selected command.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Command::Scan(args) => run_scan(args, &config),
        Command::Serve(args) => run_serve(args, &config),
        Command::Match(args) => run_match(args, &config),
        Command::Query(args) => run_query(args, &config),
        Command::Stats(args) => run_stats(args, &config),
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    let level = if quiet {
        "error"
    } else {
        match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => {
            let mut config = Config::load_from(path)?;
            config.apply_env();
            config
        }
        None => Config::load()?,
    };
    Ok(config)
}

fn run_scan(args: ScanArgs, config: &Config) -> Result<()> {
    let stdin = io::stdin();
    let requested = gather_paths(&args.paths, args.stdin_paths, args.system_fonts, stdin.lock())?;
    let roots = if requested.is_empty() {
        config.scan.roots.clone()
    } else {
        requested
    };
    if roots.is_empty() {
        return Err(anyhow!("no scan paths provided and none configured"));
    }

    let output = match args.output {
        Some(path) => path,
        None => config
            .index_paths()?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("no index path to write to"))?,
    };

    let mut discovery = config
        .scan
        .discovery(&roots)
        .follow_symlinks(args.follow_symlinks || config.scan.follow_symlinks);
    if !args.extensions.is_empty() {
        discovery = discovery.extensions(ExtensionFilter::new(&args.extensions));
    }

    let mut options: ScanOptions = config.scan.options();
    if let Some(jobs) = args.jobs {
        options.workers = usize::from(jobs);
    }
    options.dedup |= args.dedup;
    options.precount &= !args.no_precount;

    let session = Arc::new(ScanSession::new(discovery, FontationsExtractor, options));
    let done = Arc::new(AtomicBool::new(false));
    let show_progress = !args.no_progress && io::stderr().is_terminal();
    let reporter = show_progress.then(|| spawn_progress(Arc::clone(&session), Arc::clone(&done)));

    let outcome = session.run();
    done.store(true, Ordering::Release);
    if let Some(reporter) = reporter {
        let _ = reporter.join();
        eprintln!();
    }
    let outcome = outcome?;

    for failure in &outcome.failures {
        warn!(path = ?failure.path, face = ?failure.face_index, "{}", failure.message);
    }
    let failures = outcome.failures.len();
    let index = outcome.into_index();
    index
        .save(&output)
        .with_context(|| format!("writing index to {}", output.display()))?;

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    writeln!(
        handle,
        "{} faces from {} families written to {} ({} failures)",
        index.len(),
        index.typographic_families().len(),
        output.display(),
        failures
    )?;
    Ok(())
}

fn spawn_progress(
    session: Arc<ScanSession<FontationsExtractor>>,
    done: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || loop {
        let finished = done.load(Ordering::Acquire);
        eprint!("\r{}", render_progress(&session.progress()));
        let _ = io::stderr().flush();
        if finished {
            break;
        }
        thread::sleep(PROGRESS_INTERVAL);
    })
}

fn render_progress(progress: &ScanProgress) -> String {
    let phase = match progress.phase {
        ScanPhase::Pending => "starting",
        ScanPhase::Discovering => "walking",
        ScanPhase::Deduplicating => "deduplicating",
        ScanPhase::Extracting => "scanning",
        ScanPhase::Finished => "done",
    };
    let files = match (progress.total, progress.ratio()) {
        (Some(total), Some(ratio)) => {
            format!("{}/{} files ({:>3.0}%)", progress.claimed, total, ratio * 100.0)
        }
        _ => format!("{} files", progress.claimed),
    };
    format!(
        "{phase:<13} {files}, {} faces, {} failures",
        progress.faces, progress.failures
    )
}

fn load_index(args: &IndexArgs, config: &Config) -> Result<FontFaceIndex> {
    let paths = if args.index.is_empty() {
        config.index_paths()?
    } else {
        args.index.clone()
    };
    let index = FontFaceIndex::load_all(&paths)
        .with_context(|| format!("loading index from {}", display_paths(&paths)))?;
    Ok(index)
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn run_serve(args: ServeArgs, config: &Config) -> Result<()> {
    let index = load_index(&args.index, config)?;
    let bind = args.bind.unwrap_or_else(|| config.server.bind.clone());
    let server = Arc::new(QueryServer::new(index).with_max_frame_len(config.server.max_frame_len));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting async runtime")?;

    runtime.block_on(async move {
        let interrupt = Arc::clone(&server);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, shutting down");
                interrupt.cancel();
            }
        });

        server
            .run(&bind)
            .await
            .with_context(|| format!("serving on {bind}"))
    })
}

/// What `match --json` prints.
#[derive(Debug, Serialize)]
struct MatchReport<'a> {
    query: &'a str,
    tier: Option<&'static str>,
    face: Option<&'a FaceRecord>,
}

fn run_match(args: MatchArgs, config: &Config) -> Result<()> {
    let matcher = FontMatcher::new(load_index(&args.index, config)?);
    let query = MatchQuery::new(args.family.clone()).with_style(args.style.hints());
    let result = matcher.find(&query);

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    if args.json {
        let report = MatchReport {
            query: &args.family,
            tier: result.tier().map(|t| t.as_str()),
            face: result.face(),
        };
        serde_json::to_writer_pretty(&mut handle, &report)?;
        writeln!(handle)?;
    } else {
        write_match_line(&result, &mut handle)?;
    }

    if result.is_found() {
        Ok(())
    } else {
        Err(anyhow!("no face matches {:?}", args.family))
    }
}

fn write_match_line(result: &MatchResult, mut w: impl Write) -> Result<()> {
    match result {
        MatchResult::Found { face, tier } => {
            writeln!(w, "{}\t{}\t{}", face.path_with_index(), tier.as_str(), face.full_name)?
        }
        MatchResult::NotFound => writeln!(w, "not found")?,
    }
    Ok(())
}

fn run_query(args: QueryArgs, config: &Config) -> Result<()> {
    let addr = args.addr.unwrap_or_else(|| config.server.bind.clone());
    let mut client = QueryClient::connect(addr.as_str())
        .and_then(|c| c.with_timeout(Duration::from_secs(10)))
        .with_context(|| format!("connecting to {addr}"))?;

    let query = MatchQuery::new(args.family.clone()).with_style(args.style.hints());
    let response = client.query(&query).context("query failed")?;

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    if args.json {
        serde_json::to_writer_pretty(&mut handle, &response)?;
        writeln!(handle)?;
    } else {
        match &response.body {
            ResponseBody::Found { tier, face } => writeln!(
                handle,
                "{}#{}\t{}\t{}",
                face.path.display(),
                face.index,
                tier.as_str(),
                face.full_name
            )?,
            ResponseBody::NotFound => writeln!(handle, "not found")?,
        }
    }

    if response.face().is_some() {
        Ok(())
    } else {
        Err(anyhow!("no face matches {:?}", args.family))
    }
}

#[derive(Debug, Serialize)]
struct IndexSummary {
    faces: usize,
    files: usize,
    typographic_families: usize,
    win32_families: usize,
    cff_faces: usize,
}

fn summarize(index: &FontFaceIndex) -> IndexSummary {
    let mut files: Vec<&Path> = index
        .records()
        .iter()
        .map(|r| r.source_file_path.as_path())
        .collect();
    files.dedup();

    IndexSummary {
        faces: index.len(),
        files: files.len(),
        typographic_families: index.typographic_families().len(),
        win32_families: index.win32_families().len(),
        cff_faces: index.records().iter().filter(|r| r.ps_outline).count(),
    }
}

fn run_stats(args: StatsArgs, config: &Config) -> Result<()> {
    let index = load_index(&args.index, config)?;

    let stdout = io::stdout();
    let mut handle = stdout.lock();

    if args.ndjson {
        return write_ndjson(index.records(), &mut handle);
    }
    if args.families {
        if args.json {
            return write_json_pretty(&index.typographic_families(), &mut handle);
        }
        for family in index.typographic_families() {
            writeln!(handle, "{family}")?;
        }
        return Ok(());
    }

    let summary = summarize(&index);
    if args.json {
        serde_json::to_writer_pretty(&mut handle, &summary)?;
        writeln!(handle)?;
    } else {
        writeln!(handle, "faces:                {}", summary.faces)?;
        writeln!(handle, "files:                {}", summary.files)?;
        writeln!(handle, "typographic families: {}", summary.typographic_families)?;
        writeln!(handle, "win32 families:       {}", summary.win32_families)?;
        writeln!(handle, "cff faces:            {}", summary.cff_faces)?;
    }
    Ok(())
}

/// Scan roots in the order they will be walked: stdin first when
/// `--stdin-paths` is set, then positional roots (a lone `-` splices stdin in
/// at that point), then the platform font directories.
fn gather_paths(
    raw_paths: &[PathBuf],
    read_stdin: bool,
    include_system: bool,
    mut stdin: impl BufRead,
) -> Result<Vec<PathBuf>> {
    let mut roots = if read_stdin {
        read_paths_from(&mut stdin)?
    } else {
        Vec::new()
    };

    for path in raw_paths {
        if path.as_os_str() == "-" {
            roots.append(&mut read_paths_from(&mut stdin)?);
        } else {
            roots.push(path.clone());
        }
    }

    if include_system {
        roots.extend(system_font_roots()?);
    }
    Ok(roots)
}

/// One root per non-blank line; surrounding whitespace is dropped.
fn read_paths_from(reader: &mut impl BufRead) -> Result<Vec<PathBuf>> {
    reader
        .lines()
        .filter_map(|line| match line {
            Ok(line) => {
                let trimmed = line.trim();
                (!trimmed.is_empty()).then(|| Ok(PathBuf::from(trimmed)))
            }
            Err(err) => Some(Err(err.into())),
        })
        .collect()
}

/// Directories a renderer on this platform would look in for installed
/// fonts. `SUBFONT_SYSTEM_FONT_DIRS` (`:` or `;` separated) replaces the
/// built-in list, which is handy for pointing a scan at a fixture tree.
fn system_font_roots() -> Result<Vec<PathBuf>> {
    let (mut roots, source) = match env::var_os("SUBFONT_SYSTEM_FONT_DIRS") {
        Some(raw) => {
            let raw = raw.to_string_lossy().into_owned();
            let listed = raw
                .split([':', ';'])
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .collect();
            (listed, "SUBFONT_SYSTEM_FONT_DIRS")
        }
        None => (platform_font_dirs(), "this platform"),
    };

    roots.retain(|p| p.is_dir());
    roots.sort();
    roots.dedup();

    if roots.is_empty() {
        bail!("no existing system font directories for {source}");
    }
    debug!(roots = roots.len(), source, "system font roots");
    Ok(roots)
}

fn platform_font_dirs() -> Vec<PathBuf> {
    let home = env::var_os("HOME").map(PathBuf::from);
    let under_home = |rel: &str| home.as_ref().map(|h| h.join(rel));

    let mut dirs: Vec<Option<PathBuf>> = Vec::new();
    if cfg!(target_os = "macos") {
        dirs.push(Some("/System/Library/Fonts".into()));
        dirs.push(Some("/Library/Fonts".into()));
        dirs.push(under_home("Library/Fonts"));
    } else if cfg!(target_os = "windows") {
        dirs.push(env::var_os("SYSTEMROOT").map(|r| PathBuf::from(r).join("Fonts")));
        dirs.push(env::var_os("LOCALAPPDATA").map(|r| PathBuf::from(r).join("Microsoft/Windows/Fonts")));
    } else {
        dirs.push(Some("/usr/share/fonts".into()));
        dirs.push(Some("/usr/local/share/fonts".into()));
        dirs.push(under_home(".local/share/fonts"));
        dirs.push(under_home(".fonts"));
    }
    dirs.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests;

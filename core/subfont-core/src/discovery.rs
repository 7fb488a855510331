//! Font file discovery: recursive walking with concurrent hand-out of paths.

use std::collections::{HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::EnumerationError;

/// Extensions scanned when the caller does not pick its own.
pub const DEFAULT_EXTENSIONS: &[&str] = &["ttf", "otf", "ttc", "otc"];

/// Case-insensitive extension filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionFilter {
    allowed: HashSet<String>,
}

impl ExtensionFilter {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let allowed = extensions
            .into_iter()
            .map(|ext| ext.as_ref().trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        Self { allowed }
    }

    pub fn matches(&self, path: &Path) -> bool {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => self.allowed.contains(&ext.to_ascii_lowercase()),
            None => false,
        }
    }
}

impl Default for ExtensionFilter {
    fn default() -> Self {
        Self::new(DEFAULT_EXTENSIONS)
    }
}

/// Recursive filesystem walker configuration.
#[derive(Debug, Clone)]
pub struct PathDiscovery {
    roots: Vec<PathBuf>,
    filter: ExtensionFilter,
    follow_symlinks: bool,
}

impl PathDiscovery {
    pub fn new<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let roots = roots.into_iter().map(Into::into).collect();
        Self {
            roots,
            filter: ExtensionFilter::default(),
            follow_symlinks: false,
        }
    }

    pub fn follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    pub fn extensions(mut self, filter: ExtensionFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Lazy enumerator that walks the tree as workers claim paths.
    pub fn enumerator(&self) -> FileEnumerator {
        FileEnumerator {
            state: Mutex::new(EnumState {
                source: Source::Walking {
                    pending_roots: self.roots.iter().cloned().collect(),
                    current: None,
                },
                seen: HashSet::new(),
                errors: Vec::new(),
            }),
            filter: self.filter.clone(),
            follow_symlinks: self.follow_symlinks,
            discovered: AtomicUsize::new(0),
            total: AtomicUsize::new(UNKNOWN_TOTAL),
        }
    }

    /// Walk everything up front. The returned enumerator knows its total
    /// immediately, which makes progress ratios meaningful from the start.
    pub fn precounted(&self) -> FileEnumerator {
        let walker = self.enumerator();
        let mut paths = VecDeque::new();
        while let Some(path) = walker.claim_next() {
            paths.push_back(path);
        }
        let errors = walker.take_errors();
        FileEnumerator::from_paths_with_errors(paths, errors)
    }
}

const UNKNOWN_TOTAL: usize = usize::MAX;

enum Source {
    Walking {
        pending_roots: VecDeque<PathBuf>,
        current: Option<walkdir::IntoIter>,
    },
    Buffered(VecDeque<PathBuf>),
}

struct EnumState {
    source: Source,
    seen: HashSet<PathBuf>,
    errors: Vec<EnumerationError>,
}

/// Hands out each matching file exactly once to exactly one caller.
///
/// [`claim_next`](Self::claim_next) may be called from any number of threads.
/// It holds an internal lock only while advancing the walk by one match, and
/// returns `None` once every root is exhausted.
pub struct FileEnumerator {
    state: Mutex<EnumState>,
    filter: ExtensionFilter,
    follow_symlinks: bool,
    discovered: AtomicUsize,
    total: AtomicUsize,
}

impl FileEnumerator {
    /// Enumerator over an explicit list of paths (no walking, no filtering).
    /// Paths that cannot be stored in an index are reported, not handed out.
    pub fn from_paths<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let mut accepted = VecDeque::new();
        let mut errors = Vec::new();
        for path in paths.into_iter().map(Into::into) {
            match check_storable(path) {
                Ok(path) => accepted.push_back(path),
                Err(err) => errors.push(err),
            }
        }
        Self::from_paths_with_errors(accepted, errors)
    }

    fn from_paths_with_errors(paths: VecDeque<PathBuf>, errors: Vec<EnumerationError>) -> Self {
        let total = paths.len();
        Self {
            state: Mutex::new(EnumState {
                source: Source::Buffered(paths),
                seen: HashSet::new(),
                errors,
            }),
            filter: ExtensionFilter::default(),
            follow_symlinks: false,
            discovered: AtomicUsize::new(0),
            total: AtomicUsize::new(total),
        }
    }

    /// Claim the next matching path, or `None` when the tree is exhausted.
    pub fn claim_next(&self) -> Option<PathBuf> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let next = match &mut state.source {
            Source::Buffered(paths) => paths.pop_front(),
            Source::Walking {
                pending_roots,
                current,
            } => self.advance_walk(pending_roots, current, &mut state.seen, &mut state.errors),
        };

        match next {
            Some(path) => {
                self.discovered.fetch_add(1, Ordering::Relaxed);
                Some(path)
            }
            None => {
                let discovered = self.discovered.load(Ordering::Relaxed);
                self.total.store(discovered, Ordering::Relaxed);
                None
            }
        }
    }

    fn advance_walk(
        &self,
        pending_roots: &mut VecDeque<PathBuf>,
        current: &mut Option<walkdir::IntoIter>,
        seen: &mut HashSet<PathBuf>,
        errors: &mut Vec<EnumerationError>,
    ) -> Option<PathBuf> {
        loop {
            if current.is_none() {
                let root = pending_roots.pop_front()?;
                if !root.exists() {
                    errors.push(EnumerationError {
                        path: Some(root.clone()),
                        reason: "root path does not exist".to_string(),
                    });
                    continue;
                }
                *current = Some(
                    WalkDir::new(&root)
                        .follow_links(self.follow_symlinks)
                        .into_iter(),
                );
            }

            let Some(walker) = current.as_mut() else {
                continue;
            };

            match walker.next() {
                None => *current = None,
                Some(Err(err)) => {
                    let err = EnumerationError::from(err);
                    debug!(error = %err, "skipping unreadable entry");
                    errors.push(err);
                }
                Some(Ok(entry)) => {
                    if !entry.file_type().is_file() || !self.filter.matches(entry.path()) {
                        continue;
                    }
                    let key = fs::canonicalize(entry.path())
                        .unwrap_or_else(|_| entry.path().to_path_buf());
                    if !seen.insert(key) {
                        continue;
                    }
                    match check_storable(entry.into_path()) {
                        Ok(path) => return Some(path),
                        Err(err) => {
                            debug!(error = %err, "skipping unstorable path");
                            errors.push(err);
                        }
                    }
                }
            }
        }
    }

    /// Number of paths handed out so far.
    pub fn claimed(&self) -> usize {
        self.discovered.load(Ordering::Relaxed)
    }

    /// Total matching files, once known (immediately for precounted
    /// enumerators, after exhaustion for lazy ones).
    pub fn total(&self) -> Option<usize> {
        match self.total.load(Ordering::Relaxed) {
            UNKNOWN_TOTAL => None,
            total => Some(total),
        }
    }

    /// Drain enumeration failures collected so far.
    pub fn take_errors(&self) -> Vec<EnumerationError> {
        std::mem::take(&mut self.state.lock().errors)
    }
}

/// The index artifact and the wire protocol are UTF-8 JSON, so a path that is
/// not valid UTF-8 could be scanned but never saved or sent.
fn check_storable(path: PathBuf) -> Result<PathBuf, EnumerationError> {
    if path.to_str().is_some() {
        Ok(path)
    } else {
        Err(EnumerationError {
            path: Some(path),
            reason: "path is not valid UTF-8".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use tempfile::tempdir;

    fn drain(enumerator: &FileEnumerator) -> Vec<PathBuf> {
        let mut out = Vec::new();
        while let Some(path) = enumerator.claim_next() {
            out.push(path);
        }
        out
    }

    #[test]
    fn recognises_font_extensions_case_insensitively() {
        let filter = ExtensionFilter::default();
        assert!(filter.matches("/A/B/font.ttf".as_ref()));
        assert!(filter.matches("/A/B/font.OTF".as_ref()));
        assert!(!filter.matches("/A/B/font.txt".as_ref()));
        assert!(!filter.matches("/A/B/font".as_ref()));

        let custom = ExtensionFilter::new([".WOFF2"]);
        assert!(custom.matches("x.woff2".as_ref()));
        assert!(!custom.matches("x.ttf".as_ref()));
    }

    #[test]
    fn discovers_nested_fonts_once() {
        let tmp = tempdir().expect("tempdir");
        let nested = tmp.path().join("a/b");
        fs::create_dir_all(&nested).expect("mkdir");
        let font_path = nested.join("sample.ttf");
        fs::write(&font_path, b"").expect("touch font");
        fs::write(nested.join("notes.txt"), b"").expect("touch txt");

        // Overlapping roots must not yield the same file twice.
        let discovery = PathDiscovery::new([tmp.path().to_path_buf(), tmp.path().join("a")]);
        let enumerator = discovery.enumerator();
        let fonts = drain(&enumerator);

        assert_eq!(fonts, vec![font_path]);
        assert_eq!(enumerator.total(), Some(1));
        assert!(enumerator.claim_next().is_none(), "exhaustion is sticky");
    }

    #[test]
    fn missing_root_is_reported_not_fatal() {
        let tmp = tempdir().expect("tempdir");
        fs::write(tmp.path().join("x.otf"), b"").expect("touch");

        let discovery = PathDiscovery::new([tmp.path().join("nope"), tmp.path().to_path_buf()]);
        let enumerator = discovery.enumerator();

        assert_eq!(drain(&enumerator).len(), 1);
        let errors = enumerator.take_errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].reason.contains("does not exist"));
    }

    #[test]
    fn precounted_knows_total_up_front() {
        let tmp = tempdir().expect("tempdir");
        for name in ["a.ttf", "b.ttc", "c.otc"] {
            fs::write(tmp.path().join(name), b"").expect("touch");
        }

        let enumerator = PathDiscovery::new([tmp.path()]).precounted();
        assert_eq!(enumerator.total(), Some(3));
        assert_eq!(enumerator.claimed(), 0);
        assert_eq!(drain(&enumerator).len(), 3);
        assert_eq!(enumerator.claimed(), 3);
    }

    #[test]
    fn concurrent_claims_hand_out_each_path_once() {
        let tmp = tempdir().expect("tempdir");
        for i in 0..64 {
            let dir = tmp.path().join(format!("d{}", i % 7));
            fs::create_dir_all(&dir).expect("mkdir");
            fs::write(dir.join(format!("f{i}.ttf")), b"").expect("touch");
        }

        let enumerator = Arc::new(PathDiscovery::new([tmp.path()]).enumerator());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let enumerator = Arc::clone(&enumerator);
                thread::spawn(move || drain(&enumerator))
            })
            .collect();

        let mut all: Vec<PathBuf> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("join"))
            .collect();
        let count = all.len();
        all.sort();
        all.dedup();

        assert_eq!(count, 64);
        assert_eq!(all.len(), 64);
    }

    #[cfg(unix)]
    #[test]
    fn symlink_cycles_are_skipped() {
        use std::os::unix::fs::symlink;

        let tmp = tempdir().expect("tempdir");
        let real_dir = tmp.path().join("real");
        fs::create_dir_all(&real_dir).expect("mkdir real");
        fs::write(real_dir.join("linked.otf"), b"").expect("touch font");
        symlink(tmp.path(), real_dir.join("loop")).expect("symlink");

        let enumerator = PathDiscovery::new([tmp.path()])
            .follow_symlinks(true)
            .enumerator();
        let fonts = drain(&enumerator);

        assert_eq!(fonts.len(), 1);
        assert!(fonts[0].ends_with("linked.otf"));
        assert!(enumerator
            .take_errors()
            .iter()
            .any(|e| e.reason == "symlink cycle"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn non_utf8_file_names_are_reported_and_skipped() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let tmp = tempdir().expect("tempdir");
        let good = tmp.path().join("good.ttf");
        fs::write(&good, b"").expect("touch good");
        let bad = tmp.path().join(OsStr::from_bytes(b"bad\xff.ttf"));
        fs::write(&bad, b"").expect("touch bad");

        let enumerator = PathDiscovery::new([tmp.path()]).enumerator();
        assert_eq!(drain(&enumerator), vec![good.clone()]);
        let errors = enumerator.take_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path.as_deref(), Some(bad.as_path()));
        assert!(errors[0].reason.contains("UTF-8"));

        let explicit = FileEnumerator::from_paths([good.clone(), bad]);
        assert_eq!(explicit.total(), Some(1));
        assert_eq!(drain(&explicit), vec![good]);
        assert_eq!(explicit.take_errors().len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_directories_are_skipped() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempdir().expect("tempdir");
        fs::write(tmp.path().join("visible.ttf"), b"").expect("touch visible");
        let locked = tmp.path().join("locked");
        fs::create_dir_all(&locked).expect("mkdir locked");
        fs::write(locked.join("hidden.ttf"), b"").expect("touch hidden");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).expect("chmod");

        // Root ignores directory permissions, so only check the error when
        // the directory really is unreadable.
        let denied = fs::read_dir(&locked).is_err();

        let enumerator = PathDiscovery::new([tmp.path()]).enumerator();
        let fonts = drain(&enumerator);
        let errors = enumerator.take_errors();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).expect("restore");

        assert!(fonts.iter().any(|p| p.ends_with("visible.ttf")));
        if denied {
            assert_eq!(fonts.len(), 1);
            assert!(errors
                .iter()
                .any(|e| e.path.as_deref().map_or(false, |p| p.starts_with(&locked))));
        } else {
            assert_eq!(fonts.len(), 2);
        }
    }
}

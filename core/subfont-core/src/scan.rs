//! Concurrent scanning: many workers, one enumerator, one record set.
//!
//! A [`ScanSession`] owns everything a scan needs. Workers pull paths from a
//! shared [`FileEnumerator`], decode them through a [`FaceExtractor`] and
//! append the resulting records under a single lock. Per-file failures are
//! collected and streamed on an event channel; they never stop the scan.
//! Progress can be sampled from any thread while [`ScanSession::run`] is in
//! flight.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::dedup::dedup_paths;
use crate::discovery::{FileEnumerator, PathDiscovery};
use crate::error::{DecodeError, EnumerationError, Error, Result};
use crate::extract::FaceExtractor;
use crate::index::FontFaceIndex;
use crate::record::FaceRecord;

/// Events beyond this many unread ones are dropped rather than blocking workers.
const EVENT_CAPACITY: usize = 1024;

const UNKNOWN: usize = usize::MAX;

/// Worker count used when the caller does not pick one: half the machine.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() / 2)
        .unwrap_or(1)
        .max(1)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOptions {
    pub workers: usize,
    /// Walk everything before extracting so progress has a known total.
    pub precount: bool,
    /// Skip byte-identical files. Implies `precount`.
    pub dedup: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            precount: true,
            dedup: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanPhase {
    Pending,
    Discovering,
    Deduplicating,
    Extracting,
    Finished,
}

impl ScanPhase {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ScanPhase::Pending,
            1 => ScanPhase::Discovering,
            2 => ScanPhase::Deduplicating,
            3 => ScanPhase::Extracting,
            _ => ScanPhase::Finished,
        }
    }
}

/// Point-in-time view of a running scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScanProgress {
    pub phase: ScanPhase,
    /// Files handed to workers (or hashed, while deduplicating).
    pub claimed: usize,
    /// Files in the current phase, once known.
    pub total: Option<usize>,
    pub faces: usize,
    pub failures: usize,
}

impl ScanProgress {
    /// Fraction of the current phase done, when the total is known.
    pub fn ratio(&self) -> Option<f64> {
        match self.total {
            Some(0) => Some(1.0),
            Some(total) => Some((self.claimed as f64 / total as f64).min(1.0)),
            None => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Enumeration,
    Container,
    Face,
}

/// One thing that went wrong during a scan. Never fatal to the scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanFailure {
    pub kind: FailureKind,
    pub path: Option<PathBuf>,
    pub face_index: Option<u32>,
    pub message: String,
}

impl From<&DecodeError> for ScanFailure {
    fn from(err: &DecodeError) -> Self {
        let (kind, path, face_index) = match err {
            DecodeError::Io { path, .. } | DecodeError::Container { path, .. } => {
                (FailureKind::Container, path.clone(), None)
            }
            DecodeError::Face { path, index, .. } => (FailureKind::Face, path.clone(), Some(*index)),
        };
        Self {
            kind,
            path: Some(path),
            face_index,
            message: err.to_string(),
        }
    }
}

impl From<&EnumerationError> for ScanFailure {
    fn from(err: &EnumerationError) -> Self {
        Self {
            kind: FailureKind::Enumeration,
            path: err.path.clone(),
            face_index: None,
            message: err.reason.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    Phase(ScanPhase),
    Failed(ScanFailure),
    Finished { faces: usize, failures: usize, cancelled: bool },
}

/// What a finished (or cancelled) scan produced.
#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    pub records: Vec<FaceRecord>,
    pub failures: Vec<ScanFailure>,
    pub cancelled: bool,
}

impl ScanOutcome {
    pub fn into_index(self) -> FontFaceIndex {
        FontFaceIndex::build(self.records)
    }
}

enum ScanInput {
    Discovery(PathDiscovery),
    Enumerator(FileEnumerator),
}

pub struct ScanSession<E: FaceExtractor> {
    extractor: E,
    options: ScanOptions,
    input: Mutex<Option<ScanInput>>,
    records: Mutex<Vec<FaceRecord>>,
    failures: Mutex<Vec<ScanFailure>>,
    phase: AtomicU8,
    claimed: AtomicUsize,
    total: AtomicUsize,
    faces: AtomicUsize,
    failure_count: AtomicUsize,
    cancelled: AtomicBool,
    events_tx: Sender<ScanEvent>,
    events_rx: Receiver<ScanEvent>,
}

impl<E: FaceExtractor> ScanSession<E> {
    /// Scan everything `discovery` finds.
    pub fn new(discovery: PathDiscovery, extractor: E, options: ScanOptions) -> Self {
        Self::with_input(ScanInput::Discovery(discovery), extractor, options)
    }

    /// Scan whatever an existing enumerator hands out.
    pub fn with_enumerator(enumerator: FileEnumerator, extractor: E, options: ScanOptions) -> Self {
        Self::with_input(ScanInput::Enumerator(enumerator), extractor, options)
    }

    fn with_input(input: ScanInput, extractor: E, options: ScanOptions) -> Self {
        let (events_tx, events_rx) = crossbeam_channel::bounded(EVENT_CAPACITY);
        Self {
            extractor,
            options,
            input: Mutex::new(Some(input)),
            records: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
            phase: AtomicU8::new(ScanPhase::Pending as u8),
            claimed: AtomicUsize::new(0),
            total: AtomicUsize::new(UNKNOWN),
            faces: AtomicUsize::new(0),
            failure_count: AtomicUsize::new(0),
            cancelled: AtomicBool::new(false),
            events_tx,
            events_rx,
        }
    }

    /// Receiver for failures and phase changes. Events are dropped, not
    /// queued without bound, if nobody drains it.
    pub fn events(&self) -> Receiver<ScanEvent> {
        self.events_rx.clone()
    }

    pub fn progress(&self) -> ScanProgress {
        let total = self.total.load(Ordering::Relaxed);
        ScanProgress {
            phase: ScanPhase::from_u8(self.phase.load(Ordering::Relaxed)),
            claimed: self.claimed.load(Ordering::Relaxed),
            total: (total != UNKNOWN).then_some(total),
            faces: self.faces.load(Ordering::Relaxed),
            failures: self.failure_count.load(Ordering::Relaxed),
        }
    }

    /// Stop handing out new files. Files already being decoded finish.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            info!("scan cancellation requested");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Run the scan to completion (or cancellation) on `workers` threads.
    pub fn run(&self) -> Result<ScanOutcome> {
        let input = self.input.lock().take().ok_or(Error::SessionConsumed)?;
        let started = Instant::now();
        let workers = self.options.workers.max(1);

        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("subfont-scan-{i}"))
            .build()?;
        let enumerator = self.prepare(input, &pool);

        self.enter_phase(ScanPhase::Extracting, enumerator.total());
        pool.scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|_| self.worker(&enumerator));
            }
        });
        self.forward_enumeration_errors(&enumerator);

        let cancelled = self.is_cancelled();
        let records = std::mem::take(&mut *self.records.lock());
        let failures = std::mem::take(&mut *self.failures.lock());
        self.set_phase(ScanPhase::Finished);
        self.emit(ScanEvent::Finished {
            faces: records.len(),
            failures: failures.len(),
            cancelled,
        });

        info!(
            files = self.claimed.load(Ordering::Relaxed),
            faces = records.len(),
            failures = failures.len(),
            workers,
            cancelled,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "scan finished"
        );
        Ok(ScanOutcome {
            records,
            failures,
            cancelled,
        })
    }

    /// Turn the input into the enumerator workers will drain. Hashing for
    /// dedup runs on `pool`, so it honours the configured worker count.
    fn prepare(&self, input: ScanInput, pool: &ThreadPool) -> FileEnumerator {
        let discovery = match input {
            ScanInput::Enumerator(enumerator) => return enumerator,
            ScanInput::Discovery(discovery) => discovery,
        };

        if !(self.options.precount || self.options.dedup) {
            return discovery.enumerator();
        }

        self.enter_phase(ScanPhase::Discovering, None);
        let walked = discovery.precounted();
        self.forward_enumeration_errors(&walked);
        if !self.options.dedup || self.is_cancelled() {
            return walked;
        }

        let mut paths = Vec::with_capacity(walked.total().unwrap_or(0));
        while let Some(path) = walked.claim_next() {
            paths.push(path);
        }
        self.enter_phase(ScanPhase::Deduplicating, Some(paths.len()));
        let before = paths.len();
        let unique = pool.install(|| dedup_paths(paths, &self.claimed));
        debug!(before, after = unique.len(), "deduplicated scan inputs");
        FileEnumerator::from_paths(unique)
    }

    fn worker(&self, enumerator: &FileEnumerator) {
        while !self.is_cancelled() {
            let next = enumerator.claim_next();
            if let Some(total) = enumerator.total() {
                self.total.store(total, Ordering::Relaxed);
            }
            let Some(path) = next else {
                break;
            };
            self.claimed.fetch_add(1, Ordering::Relaxed);
            self.scan_file(path);
        }
    }

    fn scan_file(&self, path: PathBuf) {
        trace!(path = %path.display(), "scanning");
        let container = match self.extractor.open(&path) {
            Ok(container) => container,
            Err(err) => {
                self.record_failure(ScanFailure::from(&err));
                return;
            }
        };

        let count = self.extractor.face_count(&container);
        let mut found = Vec::with_capacity(count as usize);
        for index in 0..count {
            match self.extractor.face_metadata(&container, index) {
                Ok(meta) => found.push(FaceRecord::new(path.clone(), index, meta)),
                Err(err) => self.record_failure(ScanFailure::from(&err)),
            }
        }

        if !found.is_empty() {
            self.faces.fetch_add(found.len(), Ordering::Relaxed);
            self.records.lock().extend(found);
        }
    }

    fn forward_enumeration_errors(&self, enumerator: &FileEnumerator) {
        for err in enumerator.take_errors() {
            self.record_failure(ScanFailure::from(&err));
        }
    }

    fn record_failure(&self, failure: ScanFailure) {
        match failure.kind {
            FailureKind::Enumeration => {
                debug!(path = ?failure.path, error = %failure.message, "skipped unreadable entry")
            }
            _ => warn!(path = ?failure.path, face = ?failure.face_index, error = %failure.message, "cannot decode"),
        }
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        self.emit(ScanEvent::Failed(failure.clone()));
        self.failures.lock().push(failure);
    }

    fn enter_phase(&self, phase: ScanPhase, total: Option<usize>) {
        self.claimed.store(0, Ordering::Relaxed);
        self.total.store(total.unwrap_or(UNKNOWN), Ordering::Relaxed);
        self.set_phase(phase);
    }

    fn set_phase(&self, phase: ScanPhase) {
        self.phase.store(phase as u8, Ordering::Relaxed);
        self.emit(ScanEvent::Phase(phase));
    }

    fn emit(&self, event: ScanEvent) {
        match self.events_tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => trace!("scan event dropped, channel full"),
            Err(TrySendError::Disconnected(_)) => warn!("scan event channel disconnected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    use crate::extract::FaceExtractor;
    use crate::record::FaceMetadata;

    struct NoFaces;

    impl FaceExtractor for NoFaces {
        type Container = ();

        fn open(&self, _path: &Path) -> std::result::Result<(), DecodeError> {
            Ok(())
        }

        fn face_count(&self, _container: &()) -> u32 {
            0
        }

        fn face_metadata(&self, _container: &(), index: u32) -> std::result::Result<FaceMetadata, DecodeError> {
            Err(DecodeError::Face {
                path: PathBuf::new(),
                index,
                reason: "no faces".to_string(),
            })
        }
    }

    #[test]
    fn dedup_runs_on_the_session_pool() {
        let tmp = tempfile::tempdir().expect("tempdir");
        fs::write(tmp.path().join("a.ttf"), b"same bytes").expect("write a");
        fs::write(tmp.path().join("b.ttf"), b"same bytes").expect("write b");
        fs::write(tmp.path().join("c.ttf"), b"other byte").expect("write c");

        let options = ScanOptions {
            workers: 1,
            precount: false,
            dedup: true,
        };
        let session = ScanSession::new(PathDiscovery::new([tmp.path()]), NoFaces, options);
        let pool = ThreadPoolBuilder::new().num_threads(1).build().expect("pool");
        let input = session.input.lock().take().expect("input");

        let enumerator = session.prepare(input, &pool);
        assert_eq!(enumerator.total(), Some(2));
        assert_eq!(session.progress().phase, ScanPhase::Deduplicating);
        assert_eq!(session.progress().claimed, 3);
        assert_eq!(pool.install(rayon::current_num_threads), 1);
    }
}

//! subfont-core: the font desk clerk for subtitle renderers
//!
//! A subtitle script names its fonts the way a person would: "Arial",
//! "arial ", "@MS Gothic", or a family name GDI chopped at 31 characters.
//! This crate knows every face on the machine and answers those requests
//! with a file path and a face index.
//!
//! ## How the desk is run
//!
//! **Scanning**: walk the font directories once, with as many hands as you
//! like. [`PathDiscovery`] walks the roots, [`ScanSession`] fans files out to
//! a worker pool and a [`FaceExtractor`] reads each face's names and style.
//!
//! **Indexing**: [`FontFaceIndex`] groups faces by typographic and Win32
//! family name, and keeps them on disk as a small JSON artifact so the next
//! start does not have to rescan.
//!
//! **Matching**: [`FontMatcher`] walks from exact names to fuzzy ones to
//! full names and picks the face whose weight and slant fit best.
//!
//! **Serving**: [`QueryServer`] answers [`QueryClient`]s from other processes
//! over TCP, and can swap in a fresh index without dropping anyone.
//!
//! ## A short visit
//!
//! ```rust,no_run
//! use subfont_core::{FontMatcher, FontationsExtractor, MatchQuery, PathDiscovery, ScanOptions, ScanSession};
//!
//! let discovery = PathDiscovery::new(["/usr/share/fonts"]);
//! let session = ScanSession::new(discovery, FontationsExtractor, ScanOptions::default());
//! let index = session.run()?.into_index();
//! index.save("fonts.json".as_ref())?;
//!
//! let matcher = FontMatcher::new(index);
//! if let Some(face) = matcher.find(&MatchQuery::new("Noto Sans").bold(Some(true))).face() {
//!     println!("{}", face.path_with_index());
//! }
//! # Ok::<(), subfont_core::Error>(())
//! ```

pub mod client;
pub mod config;
pub mod dedup;
pub mod discovery;
pub mod error;
pub mod extract;
pub mod index;
pub mod matcher;
pub mod names;
pub mod output;
pub mod protocol;
pub mod record;
pub mod scan;
pub mod server;

pub use client::QueryClient;
pub use config::Config;
pub use discovery::{ExtensionFilter, FileEnumerator, PathDiscovery};
pub use error::{DecodeError, EnumerationError, Error, IndexLoadError, ProtocolError, Result};
pub use extract::FaceExtractor;
#[cfg(feature = "fontations")]
pub use extract::FontationsExtractor;
pub use index::{FamilyGroup, FontFaceIndex};
pub use matcher::{FontMatcher, MatchQuery, MatchResult, MatchTier, StyleHints};
pub use record::{FaceId, FaceMetadata, FaceRecord, LocalizedName};
pub use scan::{ScanEvent, ScanFailure, ScanOptions, ScanOutcome, ScanPhase, ScanProgress, ScanSession};
pub use server::{QueryServer, RunningServer};

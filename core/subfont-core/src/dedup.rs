//! Content deduplication of font files before extraction.
//!
//! Font directories routinely hold byte-identical copies of the same file
//! (an app bundle and the system folder, say). Files are bucketed by size
//! first and only same-size buckets are hashed with xxh3-128. Each set of
//! identical files keeps its lexicographically smallest path.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use tracing::{debug, warn};
use xxhash_rust::xxh3::xxh3_128;

/// Drop byte-identical duplicates from `paths`, preserving the order of the
/// survivors. `progress` is bumped once per file examined.
///
/// Files that cannot be read are kept: the extractor will report them.
pub fn dedup_paths(paths: Vec<PathBuf>, progress: &AtomicUsize) -> Vec<PathBuf> {
    let sizes: Vec<Option<u64>> = paths
        .par_iter()
        .map(|path| fs::metadata(path).ok().map(|m| m.len()))
        .collect();

    let mut by_size: HashMap<u64, Vec<usize>> = HashMap::new();
    for (pos, size) in sizes.iter().enumerate() {
        match size {
            Some(size) => by_size.entry(*size).or_default().push(pos),
            None => {
                progress.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    let mut keep = vec![true; paths.len()];
    let buckets: Vec<Vec<usize>> = by_size
        .into_values()
        .filter(|bucket| {
            if bucket.len() == 1 {
                progress.fetch_add(1, Ordering::Relaxed);
                false
            } else {
                true
            }
        })
        .collect();

    let dropped: Vec<usize> = buckets
        .par_iter()
        .flat_map_iter(|bucket| duplicates_in_bucket(&paths, bucket, progress))
        .collect();
    for pos in &dropped {
        keep[*pos] = false;
    }

    debug!(
        examined = paths.len(),
        duplicates = dropped.len(),
        "content deduplication finished"
    );
    paths
        .into_iter()
        .zip(keep)
        .filter_map(|(path, keep)| keep.then_some(path))
        .collect()
}

/// Positions in `bucket` that duplicate another file with a smaller path.
fn duplicates_in_bucket(paths: &[PathBuf], bucket: &[usize], progress: &AtomicUsize) -> Vec<usize> {
    let mut by_hash: HashMap<u128, usize> = HashMap::new();
    let mut dropped = Vec::new();

    for &pos in bucket {
        progress.fetch_add(1, Ordering::Relaxed);
        let bytes = match fs::read(&paths[pos]) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(path = %paths[pos].display(), error = %err, "cannot hash file, keeping it");
                continue;
            }
        };

        let digest = xxh3_128(&bytes);
        match by_hash.get_mut(&digest) {
            Some(winner) => {
                if paths[pos] < paths[*winner] {
                    dropped.push(*winner);
                    *winner = pos;
                } else {
                    dropped.push(pos);
                }
            }
            None => {
                by_hash.insert(digest, pos);
            }
        }
    }
    dropped
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn keeps_smallest_path_of_identical_files() {
        let tmp = tempdir().expect("tempdir");
        let write = |name: &str, bytes: &[u8]| {
            let path = tmp.path().join(name);
            fs::write(&path, bytes).expect("write");
            path
        };
        let b = write("b.ttf", b"same bytes");
        let a = write("a.ttf", b"same bytes");
        let c = write("c.ttf", b"diff bytes");
        let d = write("d.ttf", b"unique length");

        let progress = AtomicUsize::new(0);
        let kept = dedup_paths(vec![b.clone(), c.clone(), a.clone(), d.clone()], &progress);

        assert_eq!(kept, vec![c, a, d]);
        assert_eq!(progress.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn unreadable_files_survive() {
        let tmp = tempdir().expect("tempdir");
        let ghost = tmp.path().join("ghost.ttf");

        let progress = AtomicUsize::new(0);
        let kept = dedup_paths(vec![ghost.clone()], &progress);
        assert_eq!(kept, vec![ghost]);
        assert_eq!(progress.load(Ordering::Relaxed), 1);
    }
}

//! Existence checks, stability detection, and segment-range scanning (C2, spec §4.2).

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use crate::ids::SegmentIndex;

/// Outcome of `wait_for_stability`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StabilityOutcome {
    Ok,
    Timeout,
    Missing,
}

/// An inclusive, contiguous run of produced segment indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentRange {
    pub start: SegmentIndex,
    pub end: SegmentIndex,
}

impl SegmentRange {
    pub fn contains(&self, i: SegmentIndex) -> bool {
        i >= self.start && i <= self.end
    }

    /// Distance from the nearest edge of the range to `i`; 0 if `i` is inside it.
    pub fn distance(&self, i: SegmentIndex) -> u64 {
        if self.contains(i) {
            0
        } else if i < self.start {
            self.start - i
        } else {
            i - self.end
        }
    }
}

#[derive(Debug, Default)]
pub struct SegmentStore;

impl SegmentStore {
    pub fn new() -> Self {
        SegmentStore
    }

    pub fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    /// Poll the file size until two consecutive non-zero samples are equal, or
    /// give up after `max_tries` polls spaced `poll` apart (spec §4.2/§5).
    pub async fn wait_for_stability(
        &self,
        path: &Path,
        poll: Duration,
        max_tries: u32,
    ) -> StabilityOutcome {
        let mut last_size: Option<u64> = None;
        for _ in 0..max_tries {
            match tokio::fs::metadata(path).await {
                Ok(meta) => {
                    let size = meta.len();
                    if size > 0 {
                        if last_size == Some(size) {
                            return StabilityOutcome::Ok;
                        }
                        last_size = Some(size);
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    last_size = None;
                }
                Err(_) => {
                    last_size = None;
                }
            }
            tokio::time::sleep(poll).await;
        }
        if last_size.is_none() {
            StabilityOutcome::Missing
        } else {
            StabilityOutcome::Timeout
        }
    }

    /// Scan a variant directory for segment files with the given extension and
    /// merge their indices into ascending, non-overlapping, non-adjacent ranges.
    pub fn scan_ranges(&self, dir: &Path, ext: &str) -> std::io::Result<Vec<SegmentRange>> {
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut indices = BTreeSet::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if let Some(idx) = parse_segment_index(&path, ext) {
                indices.insert(idx);
            }
        }
        Ok(merge_into_ranges(indices))
    }
}

/// Parse `NNN.<ext>` (plain segments only; `iframe_NNN.<ext>` is excluded) into an index.
fn parse_segment_index(path: &Path, ext: &str) -> Option<SegmentIndex> {
    if path.extension().and_then(|e| e.to_str()) != Some(ext) {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    stem.parse::<SegmentIndex>().ok()
}

fn merge_into_ranges(indices: BTreeSet<SegmentIndex>) -> Vec<SegmentRange> {
    let mut ranges: Vec<SegmentRange> = Vec::new();
    for idx in indices {
        match ranges.last_mut() {
            Some(last) if idx == last.end + 1 => {
                last.end = idx;
            }
            _ => ranges.push(SegmentRange { start: idx, end: idx }),
        }
    }
    ranges
}

/// Where a segment request lands relative to the known produced ranges.
pub fn nearest_range<'a>(ranges: &'a [SegmentRange], i: SegmentIndex) -> Option<&'a SegmentRange> {
    ranges.iter().min_by_key(|r| r.distance(i))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn scan_ranges_merges_contiguous_runs() {
        let dir = tempdir().unwrap();
        for i in [0, 1, 2, 5, 6, 9] {
            fs::write(dir.path().join(format!("{:03}.ts", i)), b"x").unwrap();
        }
        let store = SegmentStore::new();
        let ranges = store.scan_ranges(dir.path(), "ts").unwrap();
        assert_eq!(
            ranges,
            vec![
                SegmentRange { start: 0, end: 2 },
                SegmentRange { start: 5, end: 6 },
                SegmentRange { start: 9, end: 9 },
            ]
        );
    }

    #[test]
    fn scan_ranges_ignores_other_extensions_and_iframe_segments() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("000.ts"), b"x").unwrap();
        fs::write(dir.path().join("001.m4s"), b"x").unwrap();
        fs::write(dir.path().join("iframe_002.ts"), b"x").unwrap();
        fs::write(dir.path().join("playlist.m3u8"), b"x").unwrap();
        let store = SegmentStore::new();
        let ranges = store.scan_ranges(dir.path(), "ts").unwrap();
        assert_eq!(ranges, vec![SegmentRange { start: 0, end: 0 }]);
    }

    #[test]
    fn scan_ranges_on_missing_dir_is_empty() {
        let store = SegmentStore::new();
        let ranges = store.scan_ranges(Path::new("/no/such/dir"), "ts").unwrap();
        assert!(ranges.is_empty());
    }

    #[tokio::test]
    async fn wait_for_stability_reports_missing() {
        let store = SegmentStore::new();
        let outcome = store
            .wait_for_stability(Path::new("/no/such/file.ts"), Duration::from_millis(1), 3)
            .await;
        assert_eq!(outcome, StabilityOutcome::Missing);
    }

    #[tokio::test]
    async fn wait_for_stability_detects_stable_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("000.ts");
        fs::write(&path, b"hello").unwrap();
        let store = SegmentStore::new();
        let outcome = store
            .wait_for_stability(&path, Duration::from_millis(1), 5)
            .await;
        assert_eq!(outcome, StabilityOutcome::Ok);
    }

    #[test]
    fn range_distance_is_zero_inside_and_positive_outside() {
        let r = SegmentRange { start: 10, end: 20 };
        assert_eq!(r.distance(15), 0);
        assert_eq!(r.distance(5), 5);
        assert_eq!(r.distance(25), 5);
    }
}

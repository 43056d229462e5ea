// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! On-disk layout.
//!
//! ```text
//! <data_dir>/
//! ├── manifest.1 | manifest.2 | manifest.current
//! ├── shards/<shard_id:04>/<segment:08>.log
//! └── index/<queue_id:08>/<segment:08>.idx
//! ```

use std::path::{Path, PathBuf};

use snafu::OptionExt;

use crate::{Result, error::InvalidPathSnafu};

pub(crate) const SHARD_SEGMENT_EXT: &str = "log";
pub(crate) const INDEX_SEGMENT_EXT: &str = "idx";

/// Directory holding every segment of one shard: `base/shards/NNNN`.
pub fn shard_dir<P: AsRef<Path>>(base: P, shard_id: u32) -> PathBuf {
    base.as_ref().join("shards").join(format!("{shard_id:04}"))
}

/// Directory holding every index segment of one queue: `base/index/NNNNNNNN`.
pub fn index_dir<P: AsRef<Path>>(base: P, queue_id: u64) -> PathBuf {
    base.as_ref().join("index").join(format!("{queue_id:08}"))
}

/// Generates a segment file name: `NNNNNNNN.<ext>`.
pub fn segment_file_name(segment: u64, ext: &str) -> String { format!("{segment:08}.{ext}") }

/// Returns the full path of a segment inside `dir`.
pub fn segment_path<P: AsRef<Path>>(dir: P, segment: u64, ext: &str) -> PathBuf {
    dir.as_ref().join(segment_file_name(segment, ext))
}

/// Lists the segments in `dir` with the given extension, sorted by number.
///
/// A missing directory yields an empty list. Files whose stem is not a
/// segment number are rejected rather than skipped, since they would make
/// the numbering ambiguous.
pub fn scan_segments<P: AsRef<Path>>(dir: P, ext: &str) -> Result<Vec<(u64, PathBuf)>> {
    let dir = dir.as_ref();
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut segments = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|s| s.to_str()) != Some(ext) {
            continue;
        }
        segments.push((parse_segment_number(&path)?, path));
    }

    segments.sort_by_key(|(segment, _)| *segment);
    Ok(segments)
}

fn parse_segment_number(path: &Path) -> Result<u64> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.parse().ok())
        .context(InvalidPathSnafu {
            path: path.to_path_buf(),
        })
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test]
    fn test_layout_paths() {
        assert_eq!(shard_dir("/data", 3), PathBuf::from("/data/shards/0003"));
        assert_eq!(index_dir("/data", 42), PathBuf::from("/data/index/00000042"));
        assert_eq!(
            segment_path(shard_dir("/data", 3), 7, SHARD_SEGMENT_EXT),
            PathBuf::from("/data/shards/0003/00000007.log")
        );
    }

    #[test_case(0, "idx", "00000000.idx")]
    #[test_case(12, "log", "00000012.log")]
    #[test_case(123_456_789, "log", "123456789.log")]
    fn test_segment_file_name(segment: u64, ext: &str, expected: &str) {
        assert_eq!(segment_file_name(segment, ext), expected);
    }

    #[test]
    fn test_scan_segments_sorted_and_filtered() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let dir = temp_dir.path();

        for segment in [2, 0, 10] {
            std::fs::File::create(segment_path(dir, segment, SHARD_SEGMENT_EXT)).unwrap();
        }
        std::fs::File::create(segment_path(dir, 1, INDEX_SEGMENT_EXT)).unwrap();

        let segments = scan_segments(dir, SHARD_SEGMENT_EXT).unwrap();
        let numbers: Vec<u64> = segments.iter().map(|(n, _)| *n).collect();
        assert_eq!(numbers, vec![0, 2, 10]);
    }

    #[test]
    fn test_scan_missing_dir_is_empty() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let segments = scan_segments(temp_dir.path().join("absent"), SHARD_SEGMENT_EXT).unwrap();
        assert!(segments.is_empty());
    }

    #[test]
    fn test_scan_rejects_foreign_segment_name() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        std::fs::File::create(temp_dir.path().join("garbage.log")).unwrap();
        assert!(scan_segments(temp_dir.path(), SHARD_SEGMENT_EXT).is_err());
    }
}

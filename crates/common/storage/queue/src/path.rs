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

use std::path::{Path, PathBuf};

use snafu::ResultExt;

use crate::{Result, error::IoSnafu};

const SEGMENT_EXTENSION: &str = "data";
const QUARANTINE_EXTENSION: &str = "bad";
const METADATA_FILE: &str = "queue.meta";
const METADATA_TMP_FILE: &str = "queue.meta.tmp";

pub fn segment_file_name(segment: u64) -> String { format!("{segment:010}.{SEGMENT_EXTENSION}") }

pub fn segment_path<P: AsRef<Path>>(base: P, segment: u64) -> PathBuf {
    base.as_ref().join(segment_file_name(segment))
}

/// Where a corrupt segment is moved so it no longer takes part in reads.
pub fn quarantine_path<P: AsRef<Path>>(base: P, segment: u64) -> PathBuf {
    base.as_ref().join(format!(
        "{}.{QUARANTINE_EXTENSION}",
        segment_file_name(segment)
    ))
}

pub fn metadata_path<P: AsRef<Path>>(base: P) -> PathBuf { base.as_ref().join(METADATA_FILE) }

pub fn metadata_tmp_path<P: AsRef<Path>>(base: P) -> PathBuf {
    base.as_ref().join(METADATA_TMP_FILE)
}

/// Parse the segment index out of a `NNNNNNNNNN.data` file name.
pub fn parse_segment_index(path: &Path) -> Option<u64> {
    if path.extension().and_then(|s| s.to_str()) != Some(SEGMENT_EXTENSION) {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}

/// List the segment indices present in `base`, ascending.
pub fn scan_segments<P: AsRef<Path>>(base: P) -> Result<Vec<u64>> {
    let base = base.as_ref();
    let mut segments = Vec::new();

    if !base.exists() {
        return Ok(segments);
    }

    for entry in std::fs::read_dir(base).context(IoSnafu { path: base })? {
        let entry = entry.context(IoSnafu { path: base })?;
        let path = entry.path();
        if path.is_file()
            && let Some(index) = parse_segment_index(&path)
        {
            segments.push(index);
        }
    }

    segments.sort_unstable();
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_file_name() {
        assert_eq!(segment_file_name(0), "0000000000.data");
        assert_eq!(segment_file_name(42), "0000000042.data");
    }

    #[test]
    fn test_paths() {
        assert_eq!(
            segment_path("/queue/a", 7),
            PathBuf::from("/queue/a/0000000007.data")
        );
        assert_eq!(
            quarantine_path("/queue/a", 7),
            PathBuf::from("/queue/a/0000000007.data.bad")
        );
        assert_eq!(metadata_path("/queue/a"), PathBuf::from("/queue/a/queue.meta"));
    }

    #[test]
    fn test_parse_segment_index() {
        assert_eq!(parse_segment_index(Path::new("/q/0000000012.data")), Some(12));
        assert_eq!(parse_segment_index(Path::new("/q/0000000012.data.bad")), None);
        assert_eq!(parse_segment_index(Path::new("/q/queue.meta")), None);
        assert_eq!(parse_segment_index(Path::new("/q/notanumber.data")), None);
    }

    #[test]
    fn test_scan_segments_sorted_and_filtered() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let base = temp_dir.path();

        for segment in [3, 1, 2] {
            std::fs::File::create(segment_path(base, segment)).unwrap();
        }
        std::fs::File::create(quarantine_path(base, 0)).unwrap();
        std::fs::File::create(metadata_path(base)).unwrap();

        assert_eq!(scan_segments(base).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_scan_missing_dir_is_empty() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let missing = temp_dir.path().join("nope");
        assert!(scan_segments(missing).unwrap().is_empty());
    }
}

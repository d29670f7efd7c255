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

use std::{path::PathBuf, time::Duration};

use snafu::ensure;

use crate::{Result, error::InvalidConfigSnafu, message::frame_size};

/// Default segment size (1 GiB).
pub const DEFAULT_MAX_BYTES_PER_FILE: u64 = 1024 * 1024 * 1024;
/// Default upper bound for a single payload (10 MiB).
pub const DEFAULT_MAX_MSG_SIZE: usize = 10 * 1024 * 1024;
/// Default number of operations between two syncs.
pub const DEFAULT_SYNC_EVERY: u64 = 10_000;
/// Default maximum time pending operations stay unsynced.
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Name used in logs and errors, usually the endpoint-group name.
    pub name:               String,
    /// Directory holding the segment files and the metadata file.
    pub base_path:          PathBuf,
    pub max_bytes_per_file: u64,
    pub min_msg_size:       usize,
    pub max_msg_size:       usize,
    /// Sync after this many reads and writes.
    pub sync_every:         u64,
    /// Sync at least this often while operations are pending.
    pub sync_timeout:       Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name:               "queue".to_string(),
            base_path:          PathBuf::from("./data"),
            max_bytes_per_file: DEFAULT_MAX_BYTES_PER_FILE,
            min_msg_size:       0,
            max_msg_size:       DEFAULT_MAX_MSG_SIZE,
            sync_every:         DEFAULT_SYNC_EVERY,
            sync_timeout:       DEFAULT_SYNC_TIMEOUT,
        }
    }
}

impl QueueConfig {
    /// Reject settings that would break the segment size invariant.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.name.is_empty(),
            InvalidConfigSnafu {
                reason: "queue name must not be empty",
            }
        );
        ensure!(
            self.min_msg_size <= self.max_msg_size,
            InvalidConfigSnafu {
                reason: format!(
                    "min_msg_size {} is larger than max_msg_size {}",
                    self.min_msg_size, self.max_msg_size
                ),
            }
        );
        ensure!(
            self.max_msg_size <= u32::MAX as usize,
            InvalidConfigSnafu {
                reason: format!("max_msg_size {} does not fit a u32 length", self.max_msg_size),
            }
        );
        ensure!(
            frame_size(self.max_msg_size) <= self.max_bytes_per_file,
            InvalidConfigSnafu {
                reason: format!(
                    "a {} byte message does not fit into a {} byte segment",
                    self.max_msg_size, self.max_bytes_per_file
                ),
            }
        );
        ensure!(
            self.sync_every > 0,
            InvalidConfigSnafu {
                reason: "sync_every must be at least 1",
            }
        );
        ensure!(
            !self.sync_timeout.is_zero(),
            InvalidConfigSnafu {
                reason: "sync_timeout must be positive",
            }
        );
        Ok(())
    }

    /// Whether a payload of `len` bytes is within the configured bounds.
    #[must_use]
    pub const fn accepts(&self, len: usize) -> bool {
        len >= self.min_msg_size && len <= self.max_msg_size
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        QueueConfig::default().validate().unwrap();
    }

    #[test_case(0, 1000, 0, true ; "empty message allowed with zero minimum")]
    #[test_case(0, 1000, 1000, true ; "exactly max")]
    #[test_case(0, 1000, 1001, false ; "one over max")]
    #[test_case(10, 1000, 9, false ; "one under min")]
    fn test_accepts(min: usize, max: usize, len: usize, expected: bool) {
        let config = QueueConfig {
            min_msg_size: min,
            max_msg_size: max,
            ..QueueConfig::default()
        };
        assert_eq!(config.accepts(len), expected);
    }

    #[test]
    fn test_rejects_message_larger_than_segment() {
        let config = QueueConfig {
            max_bytes_per_file: 1000,
            max_msg_size: 1000,
            ..QueueConfig::default()
        };
        assert!(config.validate().is_err());

        let config = QueueConfig {
            max_bytes_per_file: 1008,
            max_msg_size: 1000,
            ..QueueConfig::default()
        };
        config.validate().unwrap();
    }

    #[test]
    fn test_rejects_inverted_bounds_and_zero_sync() {
        let config = QueueConfig {
            min_msg_size: 10,
            max_msg_size: 5,
            ..QueueConfig::default()
        };
        assert!(config.validate().is_err());

        let config = QueueConfig {
            sync_every: 0,
            ..QueueConfig::default()
        };
        assert!(config.validate().is_err());
    }
}

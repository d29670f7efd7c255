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

use crate::{Queue, QueueConfig, Result};

#[derive(Debug, Clone)]
pub struct QueueBuilder {
    config: QueueConfig,
}

impl QueueBuilder {
    pub fn new<P: Into<PathBuf>>(base_path: P) -> Self {
        Self {
            config: QueueConfig {
                base_path: base_path.into(),
                ..Default::default()
            },
        }
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    #[must_use]
    pub const fn max_bytes_per_file(mut self, bytes: u64) -> Self {
        self.config.max_bytes_per_file = bytes;
        self
    }

    #[must_use]
    pub const fn min_msg_size(mut self, size: usize) -> Self {
        self.config.min_msg_size = size;
        self
    }

    #[must_use]
    pub const fn max_msg_size(mut self, size: usize) -> Self {
        self.config.max_msg_size = size;
        self
    }

    #[must_use]
    pub const fn sync_every(mut self, ops: u64) -> Self {
        self.config.sync_every = ops;
        self
    }

    #[must_use]
    pub const fn sync_timeout(mut self, timeout: Duration) -> Self {
        self.config.sync_timeout = timeout;
        self
    }

    pub const fn config(&self) -> &QueueConfig { &self.config }

    /// Validate the configuration and open the queue.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` for rejected settings, `CorruptQueue` when the
    /// directory fails recovery, or the I/O error hit while opening.
    pub fn build(self) -> Result<Queue> {
        self.config.validate()?;
        Queue::open(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_MAX_BYTES_PER_FILE, DEFAULT_MAX_MSG_SIZE, DEFAULT_SYNC_EVERY};

    #[test]
    fn test_builder_default_config() {
        let builder = QueueBuilder::new("/tmp/test_queue");
        assert_eq!(builder.config.base_path, PathBuf::from("/tmp/test_queue"));
        assert_eq!(builder.config.max_bytes_per_file, DEFAULT_MAX_BYTES_PER_FILE);
        assert_eq!(builder.config.max_msg_size, DEFAULT_MAX_MSG_SIZE);
        assert_eq!(builder.config.sync_every, DEFAULT_SYNC_EVERY);
        assert_eq!(builder.config.min_msg_size, 0);
    }

    #[test]
    fn test_builder_custom_config() {
        let builder = QueueBuilder::new("/tmp/test_queue")
            .name("orders")
            .max_bytes_per_file(4096)
            .min_msg_size(1)
            .max_msg_size(1000)
            .sync_every(10)
            .sync_timeout(Duration::from_millis(250));

        let config = builder.config();
        assert_eq!(config.name, "orders");
        assert_eq!(config.max_bytes_per_file, 4096);
        assert_eq!(config.min_msg_size, 1);
        assert_eq!(config.max_msg_size, 1000);
        assert_eq!(config.sync_every, 10);
        assert_eq!(config.sync_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let result = QueueBuilder::new(temp_dir.path())
            .max_bytes_per_file(100)
            .max_msg_size(100)
            .build();
        assert!(matches!(result, Err(crate::QueueError::InvalidConfig { .. })));
    }
}

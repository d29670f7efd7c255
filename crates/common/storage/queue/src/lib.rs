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

//! Disk-backed FIFO queue.
//!
//! Records are appended as CRC-guarded frames to numbered segment files; a
//! small metadata file tracks the read and write cursors. A dedicated IO
//! worker thread owns the files, [`Appender`]s and [`Tailer`]s talk to it
//! over channels.

mod appender;
pub mod builder;
pub mod config;
pub mod error;
pub mod file;
mod io_worker;
pub(crate) mod message;
pub mod metadata;
pub mod path;
mod queue;
pub mod recovery;
mod tailer;

pub use appender::Appender;
pub use builder::QueueBuilder;
pub use config::QueueConfig;
pub use error::{QueueError, Result};
pub use queue::Queue;
pub use tailer::{TailError, Tailer};

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

use shadow_rs::shadow;

shadow!(build);

pub const AUTHOR: &str = env!("CARGO_PKG_AUTHORS");

/// Official release builds set `QFLOW_RELEASE` at compile time.
const fn is_official_release() -> bool { option_env!("QFLOW_RELEASE").is_some() }

const DIRTY_SUFFIX: &str = if build::GIT_CLEAN { "" } else { "-dirty" };

/// `PKG_VERSION` for releases, otherwise tagged `-unofficial` plus the
/// commit when one is known.
#[allow(clippy::const_is_empty)]
pub const FULL_VERSION: &str = {
    if is_official_release() {
        build::PKG_VERSION
    } else if build::SHORT_COMMIT.is_empty() {
        shadow_rs::formatcp!("{}-unofficial", build::PKG_VERSION)
    } else {
        shadow_rs::formatcp!(
            "{}-unofficial+{}{}",
            build::PKG_VERSION,
            build::SHORT_COMMIT,
            DIRTY_SUFFIX
        )
    }
};

/// Shown by `qflow --version` in its long form.
pub const LONG_VERSION: &str = shadow_rs::formatcp!(
    "{}\nbranch: {}\ncommit: {}\nbuilt: {}\nrustc: {}\ntarget: {}",
    FULL_VERSION,
    build::BRANCH,
    build::COMMIT_HASH,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::BUILD_TARGET,
);

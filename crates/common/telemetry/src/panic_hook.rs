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

//! Panic hook that reports panics as structured error events.

use std::panic;

use backtrace::Backtrace;
use prometheus::IntCounter;

/// Replace the panic handler with one that logs the panic with its location
/// and a backtrace, bumps `counter`, then runs the previous handler.
///
/// Panics inside tokio tasks still unwind into their `JoinHandle`; the hook
/// only observes them.
pub fn set_panic_hook(counter: IntCounter) {
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic| {
        let backtrace = format!("{:?}", Backtrace::new());
        if let Some(location) = panic.location() {
            tracing::error!(
                message = %panic,
                backtrace = %backtrace,
                panic.file = location.file(),
                panic.line = location.line(),
                panic.column = location.column(),
            );
        } else {
            tracing::error!(message = %panic, backtrace = %backtrace);
        }
        counter.inc();
        default_hook(panic);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hook_counts_panics() {
        let counter = IntCounter::new("test_panics_total", "panics seen by the hook").unwrap();
        set_panic_hook(counter.clone());

        let result = std::thread::spawn(|| panic!("boom")).join();
        assert!(result.is_err());
        assert!(counter.get() >= 1);

        let _ = panic::take_hook();
    }
}

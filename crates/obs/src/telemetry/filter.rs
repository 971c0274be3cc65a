// Copyright 2024 RustFS Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Level filter shared by every log writer.

use smallvec::SmallVec;
use tracing_subscriber::{EnvFilter, filter::Directive};

/// Runtime crates whose records only help when debugging the runtime itself.
const RUNTIME_TARGETS: [&str; 2] = ["mio", "tokio_util"];

fn is_verbose(level: &str) -> bool {
    matches!(level.trim().to_ascii_lowercase().as_str(), "trace" | "debug")
}

/// Directives appended after the base level for `logger_level`.
fn runtime_directives(logger_level: &str) -> SmallVec<[String; 2]> {
    if is_verbose(logger_level) {
        return SmallVec::new();
    }
    RUNTIME_TARGETS.iter().map(|target| format!("{target}=off")).collect()
}

/// `RUST_LOG` wins over both levels when set; otherwise `default_level`
/// replaces `logger_level` as the base directive.
pub(super) fn build_env_filter(logger_level: &str, default_level: Option<&str>) -> EnvFilter {
    let base = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level.unwrap_or(logger_level)));
    runtime_directives(logger_level)
        .iter()
        .filter_map(|directive| directive.parse::<Directive>().ok())
        .fold(base, EnvFilter::add_directive)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_directives_for_quiet_levels() {
        for level in ["info", "warn", "error"] {
            assert_eq!(runtime_directives(level).as_slice(), ["mio=off", "tokio_util=off"]);
        }
    }

    #[test]
    fn test_runtime_directives_kept_for_verbose_levels() {
        assert!(runtime_directives("debug").is_empty());
        assert!(runtime_directives(" TRACE ").is_empty());
    }

    #[test]
    fn test_build_env_filter_silences_runtime_targets() {
        let dbg = format!("{:?}", build_env_filter("info", None));
        assert!(dbg.contains("\"mio\""), "mio directive missing: {dbg}");
        assert!(dbg.contains("\"tokio_util\""), "tokio_util directive missing: {dbg}");
    }

    #[test]
    fn test_build_env_filter_default_level_replaces_base() {
        let dbg = format!("{:?}", build_env_filter("debug", Some("error")));
        assert!(dbg.contains("LevelFilter::ERROR"), "base level not applied: {dbg}");
        assert!(!dbg.contains("\"mio\""), "debug logging keeps runtime targets: {dbg}");
    }
}

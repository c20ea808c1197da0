// -------------------------------------------------------------------------------------------------
//  Copyright (C) 2015-2026 Nautech Systems Pty Ltd. All rights reserved.
//  https://nautechsystems.io
//
//  Licensed under the GNU Lesser General Public License Version 3.0 (the "License");
//  You may not use this file except in compliance with the License.
//  You may obtain a copy of the License at https://www.gnu.org/licenses/lgpl-3.0.en.html
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.
// -------------------------------------------------------------------------------------------------

//! Process-wide logging initialization.
//!
//! The broker never initializes logging implicitly on a hot path; callers own
//! when (and whether) a backend is installed. [`init_logging`] is idempotent
//! and cheap to call more than once.

use std::sync::atomic::{AtomicBool, Ordering};

use log::LevelFilter;

static LOGGING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Environment variable consulted for the default level when none is passed explicitly.
pub const LOG_LEVEL_ENV_VAR: &str = "RELAY_LOG";

/// Initializes the global logger at the given level, or the level named by
/// [`LOG_LEVEL_ENV_VAR`] if `None` is passed, defaulting to `Info`.
///
/// Calling this more than once is a no-op after the first call wins.
pub fn init_logging(level: Option<LevelFilter>) {
    if LOGGING_INITIALIZED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return;
    }

    let level = level.unwrap_or_else(default_level_from_env);

    #[cfg(feature = "tracing-bridge")]
    {
        install_tracing_bridge(level);
    }

    #[cfg(not(feature = "tracing-bridge"))]
    {
        env_logger_init(level);
    }
}

/// Installs `env_logger` as the process-wide `log` backend. This is the
/// concrete sink behind every `log::debug!`/`info!`/`warn!`/`error!` call site
/// in this crate when the `tracing-bridge` feature is not enabled; without it,
/// `log::set_max_level` alone raises the level ceiling but leaves every record
/// undelivered, since no logger was ever installed via `log::set_logger`.
#[cfg(not(feature = "tracing-bridge"))]
fn env_logger_init(level: LevelFilter) {
    let _ = env_logger::Builder::new().filter_level(level).try_init();
}

#[cfg(feature = "tracing-bridge")]
fn install_tracing_bridge(level: LevelFilter) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::builder()
        .with_default_directive(level.to_string().parse().unwrap())
        .from_env_lossy();

    let _ = fmt().with_env_filter(filter).try_init();
}

fn default_level_from_env() -> LevelFilter {
    std::env::var(LOG_LEVEL_ENV_VAR)
        .ok()
        .and_then(|s| parse_level_filter_str(&s))
        .unwrap_or(LevelFilter::Info)
}

/// Parses a level filter string case-insensitively, remapping the common
/// `WARNING` spelling to `WARN` (the `log` crate only recognizes the latter).
#[must_use]
pub fn parse_level_filter_str(s: &str) -> Option<LevelFilter> {
    let normalized = s.trim().to_ascii_uppercase();
    let normalized = if normalized == "WARNING" {
        "WARN"
    } else {
        normalized.as_str()
    };
    normalized.parse().ok()
}

/// Returns whether [`init_logging`] has already run in this process.
#[must_use]
pub fn is_logging_initialized() -> bool {
    LOGGING_INITIALIZED.load(Ordering::SeqCst)
}

#[cfg(test)]
/// Resets the initialization flag so tests can exercise `init_logging` repeatedly.
///
/// Does not uninstall whichever global logger backend won the first race;
/// only useful for testing the guard itself.
pub fn reset_for_test() {
    LOGGING_INITIALIZED.store(false, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("debug", Some(LevelFilter::Debug))]
    #[case("DEBUG", Some(LevelFilter::Debug))]
    #[case("warning", Some(LevelFilter::Warn))]
    #[case("WARNING", Some(LevelFilter::Warn))]
    #[case("warn", Some(LevelFilter::Warn))]
    #[case("not-a-level", None)]
    fn test_parse_level_filter_str(#[case] input: &str, #[case] expected: Option<LevelFilter>) {
        assert_eq!(parse_level_filter_str(input), expected);
    }

    #[rstest]
    fn test_init_logging_is_idempotent() {
        reset_for_test();
        assert!(!is_logging_initialized());
        init_logging(Some(LevelFilter::Debug));
        assert!(is_logging_initialized());
        // Second call must not panic or re-install.
        init_logging(Some(LevelFilter::Error));
    }
}

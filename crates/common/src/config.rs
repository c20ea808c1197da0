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

//! Configuration resolution: the precedence chain consulted when `Broker::open`
//! is not handed an explicit config string.

use std::sync::RwLock;

/// Environment variable naming a config file to read when no process-wide default is set.
pub const CONFIG_FILE_ENV_VAR: &str = "MESSAGE_BROKER_CONFIG_FILE";

static PROCESS_DEFAULT_CONFIG: RwLock<Option<String>> = RwLock::new(None);

/// Sets the process-wide default configuration string consulted before the
/// environment-variable file and the empty-object fallback.
///
/// Passing an empty string clears the default, falling through to the next
/// precedence step.
pub fn set_default_config(config: impl Into<String>) {
    let config = config.into();
    let mut guard = PROCESS_DEFAULT_CONFIG.write().unwrap();
    *guard = if config.is_empty() { None } else { Some(config) };
}

/// Clears any process-wide default previously set via [`set_default_config`].
pub fn clear_default_config() {
    let mut guard = PROCESS_DEFAULT_CONFIG.write().unwrap();
    *guard = None;
}

/// Resolves the configuration text to open a broker with, per the precedence chain:
/// 1. `explicit`, if `Some` and non-empty.
/// 2. The process-set default (see [`set_default_config`]).
/// 3. The file named by [`CONFIG_FILE_ENV_VAR`], if set and readable.
/// 4. The literal `"{}"`.
#[must_use]
pub fn resolve_config(explicit: Option<&str>) -> String {
    if let Some(s) = explicit
        && !s.is_empty()
    {
        return s.to_string();
    }

    if let Some(s) = PROCESS_DEFAULT_CONFIG.read().unwrap().clone() {
        return s;
    }

    if let Ok(path) = std::env::var(CONFIG_FILE_ENV_VAR)
        && let Ok(contents) = std::fs::read_to_string(&path)
    {
        return contents;
    }

    "{}".to_string()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn test_explicit_wins() {
        clear_default_config();
        assert_eq!(resolve_config(Some(r#"{"a":1}"#)), r#"{"a":1}"#);
    }

    #[rstest]
    fn test_empty_explicit_falls_through_to_empty_object() {
        clear_default_config();
        // SAFETY: test-only, single-threaded env var manipulation scoped to this test.
        unsafe {
            std::env::remove_var(CONFIG_FILE_ENV_VAR);
        }
        assert_eq!(resolve_config(Some("")), "{}");
    }

    #[rstest]
    fn test_process_default_used_when_no_explicit() {
        clear_default_config();
        set_default_config(r#"{"b":2}"#);
        assert_eq!(resolve_config(None), r#"{"b":2}"#);
        clear_default_config();
    }

    #[rstest]
    fn test_falls_back_to_empty_object() {
        clear_default_config();
        unsafe {
            std::env::remove_var(CONFIG_FILE_ENV_VAR);
        }
        assert_eq!(resolve_config(None), "{}");
    }
}

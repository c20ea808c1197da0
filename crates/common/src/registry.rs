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

//! The process-wide Instance Registry: caches a live [`Broker`](crate::broker::Broker) per
//! canonical configuration string so that multiple callers opening the same
//! config share one broker.
//!
//! Two modes, selected per call by `Broker::open`'s `unique` flag (this is the
//! "disable-cache mode" named in the design overview: passing `unique = true`
//! opts a single `open` call out of the cache rather than requiring a
//! process-wide switch):
//! - **Shared** (`unique = false`): key by the canonical config text. A second
//!   `open` with the same text returns the same broker with its entry's
//!   refcount incremented.
//! - **Unique** (`unique = true`): always constructs a fresh broker and never
//!   touches the registry.
//!
//! The registry mutex is never held across a call back into the registry
//! itself (construction happens under its own, separately acquired lock), so
//! the re-entrancy the source relies on (broker teardown removing an entry
//! while another caller holds the registry) falls out of sequencing two
//! independent critical sections rather than requiring a genuinely re-entrant
//! mutex.

use std::sync::{Arc, Mutex, OnceLock};

use ahash::AHashMap;
use relay_core::BrokerResult;

use crate::broker::Broker;

struct Entry {
    broker: Arc<Broker>,
    refcount: usize,
}

fn registry() -> &'static Mutex<AHashMap<String, Entry>> {
    static REGISTRY: OnceLock<Mutex<AHashMap<String, Entry>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(AHashMap::new()))
}

/// Returns the broker registered under `canonical`, incrementing its
/// refcount, or constructs one via `construct` and registers it with a fresh
/// refcount of 1. When `unique` is set, `construct` runs unconditionally and
/// the result is never registered.
///
/// # Errors
///
/// Returns whatever `construct` returns on construction failure.
pub fn acquire<F>(canonical: &str, unique: bool, construct: F) -> BrokerResult<Arc<Broker>>
where
    F: FnOnce() -> BrokerResult<Arc<Broker>>,
{
    if unique {
        return construct();
    }

    let mut reg = registry().lock().unwrap();
    if let Some(entry) = reg.get_mut(canonical) {
        entry.refcount += 1;
        return Ok(entry.broker.clone());
    }

    // Constructed while holding the lock: `construct` only builds in-process
    // state (see `Broker::construct`), so this is not a blocking I/O call
    // that would justify dropping the lock and risking a duplicate insert.
    let broker = construct()?;
    reg.insert(
        canonical.to_string(),
        Entry {
            broker: broker.clone(),
            refcount: 1,
        },
    );
    Ok(broker)
}

/// Decrements the refcount for `canonical`'s registry entry, removing it once
/// the count reaches zero. An unknown key is logged and otherwise ignored,
/// matching the broker surface's general "unknown token is a warning, not an
/// error" policy.
pub fn release(canonical: &str) {
    let mut reg = registry().lock().unwrap();
    match reg.get_mut(canonical) {
        Some(entry) if entry.refcount > 1 => entry.refcount -= 1,
        Some(_) => {
            reg.remove(canonical);
        }
        None => {
            log::warn!("instance registry release of an unknown config key");
        }
    }
}

/// Unconditionally removes `canonical`'s entry regardless of its refcount,
/// used by [`Broker::shutdown`](crate::broker::Broker::shutdown) since a
/// broker tearing itself down must not remain reachable through the cache
/// even if other callers still hold a clone of the `Arc`.
pub fn force_remove(canonical: &str) {
    registry().lock().unwrap().remove(canonical);
}

/// Clears every entry, used for deterministic teardown between tests.
pub fn release_all() {
    registry().lock().unwrap().clear();
}

/// Number of live registry entries, for diagnostics and tests.
#[must_use]
pub fn len() -> usize {
    registry().lock().unwrap().len()
}

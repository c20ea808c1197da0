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

//! The opaque message payload carried through every publish.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque content plus routing metadata, generated once per message.
///
/// `id` is generated at construction and never reassigned. `timestamp`
/// defaults to wall-clock creation time but the caller may overwrite it.
/// `correlation_id` defaults to the empty string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Payload {
    id: String,
    pub timestamp: i64,
    pub correlation_id: String,
    pub bytes: Vec<u8>,
}

impl Payload {
    /// Creates a new payload with a freshly generated id and the current wall-clock time.
    #[must_use]
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: now_millis(),
            correlation_id: String::new(),
            bytes: bytes.into(),
        }
    }

    /// Builder-style setter for `correlation_id`.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    /// Builder-style setter for `timestamp`, overriding the creation-time default.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// The payload's unique id. Never reassigned after construction.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn test_new_generates_unique_id() {
        let a = Payload::new(b"x".to_vec());
        let b = Payload::new(b"x".to_vec());
        assert_ne!(a.id(), b.id());
    }

    #[rstest]
    fn test_correlation_id_defaults_empty() {
        let p = Payload::new(b"x".to_vec());
        assert_eq!(p.correlation_id, "");
    }

    #[rstest]
    fn test_timestamp_override() {
        let p = Payload::new(b"x".to_vec()).with_timestamp(42);
        assert_eq!(p.timestamp, 42);
    }

    #[rstest]
    fn test_with_correlation_id() {
        let p = Payload::new(b"x".to_vec()).with_correlation_id("batch1");
        assert_eq!(p.correlation_id, "batch1");
    }

    #[rstest]
    fn test_id_immutable_after_construction() {
        let p = Payload::new(b"x".to_vec());
        let id_before = p.id().to_string();
        let p = p.with_timestamp(99).with_correlation_id("c");
        assert_eq!(p.id(), id_before);
    }
}

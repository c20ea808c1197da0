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

//! An example, non-loopback Protocol Adapter: a filesystem-writer stand-in
//! backed by an in-memory sink instead of real file I/O (concrete transports
//! are out of scope; this crate ships one anyway so the adapter contract has
//! a second, non-trivial implementation to test fan-out against).
//!
//! Template keys: `directory` (required), `filename` (required), `extension`
//! (optional). A target's publish writes `bytes` under
//! `<directory>/<filename>.<extension>` (or without the extension suffix if
//! none was given) into the sink.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use relay_core::{BrokerError, BrokerOutcome, BrokerResult, Payload};
use serde_json::Value;

use crate::adapter::{AdapterBase, OnMessage, OnPublishComplete, ProtocolAdapterClient, ProtocolAdapterFactory, ProtocolMessage, Subscription};
use crate::job_queue::{JobQueue, JobStatus};

pub const PROTOCOL_NAME: &str = "file";

/// In-memory stand-in for a filesystem, keyed by the path each publish wrote to.
pub type Sink = Arc<Mutex<HashMap<PathBuf, Vec<u8>>>>;

struct QueuedWrite {
    path: PathBuf,
    bytes: Vec<u8>,
}

pub struct FileAdapter {
    #[allow(dead_code)] // reserved for a future subscription-bearing transport; file is sink-only today
    base: AdapterBase,
    sink: Sink,
    queue: JobQueue<QueuedWrite>,
}

impl FileAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self::with_sink(Sink::default())
    }

    #[must_use]
    pub fn with_sink(sink: Sink) -> Self {
        let queue: JobQueue<QueuedWrite> = JobQueue::new();
        queue.set_name(PROTOCOL_NAME);

        let worker_sink = sink.clone();
        queue.set_processor(move |item: &QueuedWrite| {
            worker_sink.lock().unwrap().insert(item.path.clone(), item.bytes.clone());
            JobStatus::Success
        });
        queue.start().expect("file adapter job queue processor was just set");

        Self {
            base: AdapterBase::new(),
            sink,
            queue,
        }
    }

    /// Returns a handle to the sink so tests can inspect what was written.
    #[must_use]
    pub fn sink(&self) -> Sink {
        self.sink.clone()
    }

    fn path_from_routing(routing: &Value) -> BrokerResult<PathBuf> {
        let path = routing
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| BrokerError::invalid_argument("file message missing its resolved 'path' field"))?;
        Ok(PathBuf::from(path))
    }
}

impl Default for FileAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolAdapterClient for FileAdapter {
    fn friendly_name(&self) -> &str {
        PROTOCOL_NAME
    }

    fn publish(&self, msg: &ProtocolMessage) -> BrokerResult<()> {
        let path = Self::path_from_routing(&msg.routing)?;
        self.sink.lock().unwrap().insert(path, msg.payload.bytes.clone());
        Ok(())
    }

    fn publish_async(&self, msg: ProtocolMessage, on_complete: OnPublishComplete) -> BrokerResult<()> {
        let path = Self::path_from_routing(&msg.routing)?;
        let callback_msg = msg.clone();
        self.queue
            .enqueue(
                QueuedWrite {
                    path,
                    bytes: msg.payload.bytes.clone(),
                },
                move |status| {
                    on_complete(PROTOCOL_NAME, &callback_msg, status == JobStatus::Success);
                },
            )
            .map_err(|_| BrokerError::invalid_state("file adapter's job queue has been stopped"))
    }

    fn subscribe(&self, _subscription: Subscription, _on_message: OnMessage) -> BrokerResult<u32> {
        Err(BrokerError::not_implemented("the file protocol is a sink and cannot receive messages"))
    }

    fn unsubscribe(&self, _adapter_token: u32) -> BrokerOutcome {
        BrokerOutcome::OkNoop
    }

    fn reconnect(&self) -> BrokerResult<()> {
        Ok(())
    }
}

/// Constructs [`FileAdapter`] instances. Tests may pin every constructed
/// client to one shared [`Sink`] via [`FileAdapterFactory::with_shared_sink`]
/// so assertions can inspect it after a publish goes through the broker.
pub struct FileAdapterFactory {
    protocol_name: String,
    shared_sink: Mutex<Option<Sink>>,
}

impl FileAdapterFactory {
    #[must_use]
    pub fn new() -> Self {
        Self {
            protocol_name: PROTOCOL_NAME.to_string(),
            shared_sink: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_shared_sink(sink: Sink) -> Self {
        Self {
            protocol_name: PROTOCOL_NAME.to_string(),
            shared_sink: Mutex::new(Some(sink)),
        }
    }

    /// Registers this factory under an alternate protocol name, so tests can
    /// attach a shared, inspectable [`Sink`] without colliding with the
    /// broker's own default `"file"` factory registration.
    #[must_use]
    pub fn with_shared_sink_named(sink: Sink, protocol_name: impl Into<String>) -> Self {
        Self {
            protocol_name: protocol_name.into(),
            shared_sink: Mutex::new(Some(sink)),
        }
    }
}

impl Default for FileAdapterFactory {
    fn default() -> Self {
        Self::new()
    }
}

fn require_nonempty_str<'a>(options: &'a Value, key: &str) -> BrokerResult<&'a str> {
    let s = options
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| BrokerError::invalid_argument(format!("file options missing required non-empty '{key}'")))?;
    relay_core::correctness::check_nonempty_string(s, key)?;
    Ok(s)
}

impl ProtocolAdapterFactory for FileAdapterFactory {
    fn protocol_name(&self) -> &str {
        &self.protocol_name
    }

    fn create_client(
        &self,
        _creation_options: &Value,
        _credentials: Option<&Value>,
    ) -> BrokerResult<Arc<dyn ProtocolAdapterClient>> {
        let client = match self.shared_sink.lock().unwrap().clone() {
            Some(sink) => FileAdapter::with_sink(sink),
            None => FileAdapter::new(),
        };
        Ok(Arc::new(client))
    }

    fn validate_message_options(&self, options: &Value) -> BrokerResult<()> {
        require_nonempty_str(options, "directory")?;
        require_nonempty_str(options, "filename")?;
        if let Some(extension) = options.get("extension")
            && !extension.is_string()
        {
            return Err(BrokerError::invalid_argument("file option 'extension' must be a string when present"));
        }
        Ok(())
    }

    fn create_message(&self, payload: &Payload, expanded_options: &Value) -> BrokerResult<ProtocolMessage> {
        self.validate_message_options(expanded_options)?;
        let directory = require_nonempty_str(expanded_options, "directory")?;
        let filename = require_nonempty_str(expanded_options, "filename")?;
        let extension = expanded_options.get("extension").and_then(Value::as_str);

        let mut path = PathBuf::from(directory);
        path.push(match extension {
            Some(ext) => format!("{filename}.{ext}"),
            None => filename.to_string(),
        });

        Ok(ProtocolMessage {
            payload: payload.clone(),
            subscription_id: String::new(),
            routing: serde_json::json!({ "path": path.to_string_lossy() }),
        })
    }

    fn create_subscription(&self, _options: &Value) -> BrokerResult<Subscription> {
        Err(BrokerError::not_implemented("the file protocol is a sink and cannot receive messages"))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[rstest]
    fn test_validate_message_options_requires_directory_and_filename() {
        let factory = FileAdapterFactory::new();
        assert!(factory.validate_message_options(&json!({})).is_err());
        assert!(
            factory
                .validate_message_options(&json!({"directory": "d", "filename": "f"}))
                .is_ok()
        );
    }

    #[rstest]
    fn test_create_message_builds_path_with_extension() {
        let factory = FileAdapterFactory::new();
        let payload = Payload::new(b"hello".to_vec());
        let msg = factory
            .create_message(&payload, &json!({"directory": "batch1", "filename": "abc", "extension": "bin"}))
            .unwrap();
        assert_eq!(msg.routing["path"], "batch1/abc.bin");
    }

    #[rstest]
    fn test_create_message_without_extension() {
        let factory = FileAdapterFactory::new();
        let payload = Payload::new(b"hello".to_vec());
        let msg = factory
            .create_message(&payload, &json!({"directory": "d", "filename": "f"}))
            .unwrap();
        assert_eq!(msg.routing["path"], "d/f");
    }

    #[rstest]
    fn test_publish_writes_into_sink() {
        let adapter = FileAdapter::new();
        let msg = ProtocolMessage {
            payload: Payload::new(b"contents".to_vec()),
            subscription_id: String::new(),
            routing: json!({"path": "batch1/xyz.bin"}),
        };
        adapter.publish(&msg).unwrap();

        let sink = adapter.sink();
        let sink = sink.lock().unwrap();
        assert_eq!(sink.get(&PathBuf::from("batch1/xyz.bin")), Some(&b"contents".to_vec()));
    }

    #[rstest]
    fn test_create_subscription_is_not_supported() {
        let factory = FileAdapterFactory::new();
        let err = factory.create_subscription(&json!({})).unwrap_err();
        assert_eq!(err.code(), "not-implemented");
    }
}

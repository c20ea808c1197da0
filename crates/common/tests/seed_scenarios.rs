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

//! Crate-level integration coverage for the seed scenarios, driven through
//! the public surface (`relay_common::open`, `Broker::{publish,subscribe}`)
//! rather than any single module's internals, since these scenarios span the
//! broker, its adapters, and the instance registry together.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use relay_common::{Broker, FileAdapterFactory, PublishHandler, SubscribeHandler, open, release_all};
use relay_core::{BrokerOutcome, Payload};
use serde_json::json;

struct RecordingSubscriber {
    received: Mutex<Vec<Vec<u8>>>,
}

impl RecordingSubscriber {
    fn new() -> Arc<Self> {
        Arc::new(Self { received: Mutex::new(Vec::new()) })
    }
}

impl SubscribeHandler for RecordingSubscriber {
    fn on_message_received(&self, payload: Payload) {
        self.received.lock().unwrap().push(payload.bytes);
    }
}

struct CountingPublishHandler {
    calls: AtomicUsize,
}

impl CountingPublishHandler {
    fn new() -> Arc<Self> {
        Arc::new(Self { calls: AtomicUsize::new(0) })
    }
}

impl PublishHandler for CountingPublishHandler {
    fn on_published(&self, _publisher: &str, _message_id: &str, _payload: &Payload, _success: bool) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

fn open_ready(config: &str) -> Arc<Broker> {
    let broker = open(Some(config), None, true).expect("config must be valid for this test");
    broker.initialize().expect("initialize must succeed for this test's config");
    broker
}

// S1 — Loopback synchronous.
#[test]
fn s1_loopback_synchronous_delivery() {
    let broker = open_ready("{}");
    let subscriber = RecordingSubscriber::new();
    broker.subscribe("test", subscriber.clone()).unwrap();

    broker.publish("test", &Payload::new(b"contents".to_vec()), false, None).unwrap();
    broker.publish("other", &Payload::new(b"ignored".to_vec()), false, None).unwrap();

    assert_eq!(*subscriber.received.lock().unwrap(), vec![b"contents".to_vec()]);
}

// S2 — Pattern routing, exercised against the file adapter as the second
// Protocol Adapter implementation (per SPEC_FULL.md's S7 supplement).
#[test]
fn s2_pattern_routing_to_a_non_loopback_target() {
    let sink = relay_common::file_adapter::Sink::default();
    let config = json!({
        "targets": [{"protocol": "file_test", "name": "dst", "file_test_options": {"directory": "d", "filename": "f"}}],
        "pipes": [{
            "message_id": "foo_${a}_${b}",
            "destinations": [{"target_name": "dst", "file_test_message_options": {"directory": "${a}", "filename": "${b}"}}]
        }]
    });

    // `Broker::construct` already registers the built-in "file" protocol, so
    // this test's own shared-sink factory must register under a distinct
    // name ("file_test") rather than colliding with it.
    let broker = Broker::construct(config.to_string(), None).unwrap();
    broker
        .add_factory(Arc::new(FileAdapterFactory::with_shared_sink_named(sink.clone(), "file_test")))
        .unwrap();
    broker.initialize().unwrap();

    broker.publish("foo_x_y", &Payload::new(b"payload-bytes".to_vec()), false, None).unwrap();
    broker.publish("bar", &Payload::new(b"unmatched".to_vec()), false, None).unwrap();

    let sink = sink.lock().unwrap();
    assert_eq!(sink.get(&std::path::PathBuf::from("x/y")), Some(&b"payload-bytes".to_vec()));
    assert_eq!(sink.len(), 1, "the unmatched message_id must not have reached the file target");
}

// S4 — Async completion callback.
#[test]
fn s4_async_publish_invokes_completion_callback_exactly_once() {
    let broker = open_ready("{}");
    let subscriber = RecordingSubscriber::new();
    broker.subscribe("t", subscriber).unwrap();

    let handler = CountingPublishHandler::new();
    let (tx, rx) = std::sync::mpsc::channel();
    struct Notify {
        inner: Arc<CountingPublishHandler>,
        tx: Mutex<std::sync::mpsc::Sender<()>>,
    }
    impl PublishHandler for Notify {
        fn on_published(&self, publisher: &str, message_id: &str, payload: &Payload, success: bool) {
            self.inner.on_published(publisher, message_id, payload, success);
            let _ = self.tx.lock().unwrap().send(());
        }
    }
    let notify = Arc::new(Notify { inner: handler.clone(), tx: Mutex::new(tx) });

    broker.publish("t", &Payload::new(b"x".to_vec()), true, Some(notify)).unwrap();
    rx.recv_timeout(std::time::Duration::from_secs(1)).unwrap();

    assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn s4_async_publish_with_no_subscriber_skips_completion_callback() {
    let broker = open_ready("{}");
    let handler = CountingPublishHandler::new();
    broker.publish("nobody-home", &Payload::new(b"x".to_vec()), true, Some(handler.clone())).unwrap();

    std::thread::sleep(std::time::Duration::from_millis(50));
    assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
}

// S5 — Instance registry, driven through `open` rather than the registry
// module directly, since the scenario is phrased in terms of `open`.
#[test]
fn s5_shared_open_shares_then_reopens_a_fresh_instance_after_release() {
    release_all();
    let config = r#"{"targets":[]}"#;

    let x = open(Some(config), None, false).unwrap();
    let x_again = open(Some(config), None, false).unwrap();
    assert!(Arc::ptr_eq(&x, &x_again), "two shared opens of the same config must share one broker");

    x.release();
    x_again.release();
    let y = open(Some(config), None, false).unwrap();
    assert!(!Arc::ptr_eq(&x, &y), "after every handle releases, a shared open must construct afresh");

    let z = open(Some(config), None, true).unwrap();
    assert!(!Arc::ptr_eq(&y, &z), "a unique open must never alias a shared instance");

    release_all();
}

// S6 — Pipe to missing target.
#[test]
fn s6_pipe_to_missing_target_fails_initialize_with_invalid_argument() {
    let config = json!({
        "pipes": [{"message_id": "m", "destinations": [{"target_name": "nope", "x_message_options": {}}]}]
    });
    let broker = open(Some(&config.to_string()), None, true).unwrap();
    let err = broker.initialize().unwrap_err();
    assert_eq!(err.code(), "invalid-argument");
}

// S7 — File adapter fan-out, keyed by correlation id.
#[test]
fn s7_file_adapter_writes_under_correlation_id_directory() {
    let sink = relay_common::file_adapter::Sink::default();
    let config = json!({
        "targets": [{"protocol": "file_test", "name": "out", "file_test_options": {"directory": "d", "filename": "f"}}],
        "pipes": [{
            "message_id": "save",
            "destinations": [{
                "target_name": "out",
                "file_test_message_options": {"directory": "${c_id}", "filename": "${id}", "extension": "bin"}
            }]
        }]
    });

    // Same "file_test" sidestep as S2: the default "file" protocol is already
    // registered by `Broker::construct`.
    let broker = Broker::construct(config.to_string(), None).unwrap();
    broker
        .add_factory(Arc::new(FileAdapterFactory::with_shared_sink_named(sink.clone(), "file_test")))
        .unwrap();
    broker.initialize().unwrap();

    let payload = Payload::new(b"batch-bytes".to_vec()).with_correlation_id("batch1");
    let expected_path = std::path::PathBuf::from(format!("batch1/{}.bin", payload.id()));
    broker.publish("save", &payload, false, None).unwrap();

    let sink = sink.lock().unwrap();
    assert_eq!(sink.get(&expected_path), Some(&b"batch-bytes".to_vec()));
}

#[test]
fn broker_is_reusable_across_repeated_subscribe_unsubscribe_cycles() {
    let broker = open_ready("{}");
    for _ in 0..3 {
        let subscriber = RecordingSubscriber::new();
        let token = broker.subscribe("cycle", subscriber.clone()).unwrap();
        broker.publish("cycle", &Payload::new(b"x".to_vec()), false, None).unwrap();
        assert_eq!(subscriber.received.lock().unwrap().len(), 1);
        assert_eq!(broker.unsubscribe(token), BrokerOutcome::Ok);
    }
}

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

//! The Protocol Adapter contract: the capability set every transport exposes,
//! plus [`AdapterBase`], the shared subscription-table/token-generation helper
//! every concrete adapter in this crate builds on.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use relay_core::{BrokerError, BrokerOutcome, BrokerResult, Payload};
use serde_json::Value;

/// Adapter-defined opaque object carrying a `subscription_id` and adapter-specific
/// filtering fields, constructed by the adapter factory from a JSON option blob.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub subscription_id: String,
    pub fields: Value,
}

impl Subscription {
    #[must_use]
    pub fn new(subscription_id: impl Into<String>, fields: Value) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            fields,
        }
    }
}

/// Adapter-defined message bound to a payload plus routing fields, short-lived:
/// created per publish, released after dispatch.
#[derive(Debug, Clone)]
pub struct ProtocolMessage {
    pub payload: Payload,
    pub subscription_id: String,
    pub routing: Value,
}

/// Invoked by an adapter's internal worker when it has delivered (or failed to
/// deliver) a message locally. Carries `(publisher_name, message, success)`.
pub type OnPublishComplete = Arc<dyn Fn(&str, &ProtocolMessage, bool) + Send + Sync>;

/// Invoked by an adapter when an inbound message for a subscription arrives.
pub type OnMessage = Arc<dyn Fn(Payload) + Send + Sync>;

/// The factory half of the contract: validates configuration and constructs
/// adapter-specific values from it.
pub trait ProtocolAdapterFactory: Send + Sync {
    fn protocol_name(&self) -> &str;

    /// Validates options and constructs the transport client.
    ///
    /// # Errors
    ///
    /// Returns a [`BrokerError`] describing why construction failed.
    fn create_client(
        &self,
        creation_options: &Value,
        credentials: Option<&Value>,
    ) -> BrokerResult<Arc<dyn ProtocolAdapterClient>>;

    /// Pure structural check of a destination template; does not construct anything.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::InvalidArgument`] describing the structural defect.
    fn validate_message_options(&self, options: &Value) -> BrokerResult<()>;

    /// Binds a payload to adapter-specific routing fields.
    ///
    /// # Errors
    ///
    /// Returns a [`BrokerError`] if `expanded_options` cannot be bound.
    fn create_message(&self, payload: &Payload, expanded_options: &Value) -> BrokerResult<ProtocolMessage>;

    /// Constructs a [`Subscription`] from options, or signals the protocol
    /// cannot receive messages at all via [`BrokerError::NotImplemented`].
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::NotImplemented`] for sink-only protocols (e.g. S3-like
    /// adapters), or another [`BrokerError`] if `options` is structurally invalid.
    fn create_subscription(&self, options: &Value) -> BrokerResult<Subscription>;
}

/// The client half of the contract: the live transport connection.
pub trait ProtocolAdapterClient: Send + Sync {
    /// Identifies the adapter's origin in async completion callbacks (`"loopback"` for loopback).
    fn friendly_name(&self) -> &str;

    /// Synchronous publish: returns once the transport accepted or rejected the message.
    ///
    /// # Errors
    ///
    /// Returns a [`BrokerError`] if the transport rejected the message.
    fn publish(&self, msg: &ProtocolMessage) -> BrokerResult<()>;

    /// Accepts the message for asynchronous delivery; `on_complete` is invoked from
    /// an adapter-internal worker once delivery is attempted.
    ///
    /// # Errors
    ///
    /// Returns a [`BrokerError`] if the message could not even be enqueued.
    fn publish_async(&self, msg: ProtocolMessage, on_complete: OnPublishComplete) -> BrokerResult<()>;

    /// Registers `on_message` for `subscription`, returning a stable per-client
    /// positive token. Duplicate tokens are forbidden by construction.
    ///
    /// # Errors
    ///
    /// Returns a [`BrokerError`] if the adapter cannot subscribe (mirrors
    /// [`ProtocolAdapterFactory::create_subscription`]'s not-supported case).
    fn subscribe(&self, subscription: Subscription, on_message: OnMessage) -> BrokerResult<u32>;

    /// Unregisters `adapter_token`. An unknown token is a no-op, not an error.
    fn unsubscribe(&self, adapter_token: u32) -> BrokerOutcome;

    /// Re-establishes the underlying transport connection.
    ///
    /// # Errors
    ///
    /// Returns a [`BrokerError`] if reconnection failed.
    fn reconnect(&self) -> BrokerResult<()>;
}

impl fmt::Debug for dyn ProtocolAdapterClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolAdapterClient")
            .field("friendly_name", &self.friendly_name())
            .finish()
    }
}

/// Shared subscription-table/token-generation/snapshot-iteration behavior reused
/// by every in-crate adapter, so the random-positive-token and
/// catch-panics-at-the-boundary rules live in exactly one place.
#[derive(Default)]
pub struct AdapterBase {
    subscriptions: Mutex<IndexMap<u32, (Subscription, OnMessage)>>,
}

impl AdapterBase {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `subscription` under a freshly drawn, unused positive 32-bit token.
    pub fn subscribe(&self, subscription: Subscription, on_message: OnMessage) -> u32 {
        let mut subs = self.subscriptions.lock().unwrap();
        loop {
            let token = rand::random::<u32>() & 0x7fff_ffff;
            if token != 0 && !subs.contains_key(&token) {
                subs.insert(token, (subscription, on_message));
                return token;
            }
        }
    }

    /// Removes `token` if present. Unknown tokens are reported as a no-op.
    pub fn unsubscribe(&self, token: u32) -> BrokerOutcome {
        let mut subs = self.subscriptions.lock().unwrap();
        if subs.shift_remove(&token).is_some() {
            BrokerOutcome::Ok
        } else {
            log::warn!("unsubscribe of unknown adapter token {token}");
            BrokerOutcome::OkNoop
        }
    }

    /// Invokes every handler whose subscription id equals `subscription_id`, in
    /// registration order, over a **snapshot** of the table (so handlers may
    /// unsubscribe without mutating the table mid-iteration). Handler panics are
    /// caught and reported as a dispatch failure, never propagated.
    pub fn dispatch(&self, subscription_id: &str, payload: &Payload) {
        let snapshot: Vec<(Subscription, OnMessage)> = {
            let subs = self.subscriptions.lock().unwrap();
            subs.values().cloned().collect()
        };

        for (subscription, handler) in snapshot {
            if subscription.subscription_id != subscription_id {
                continue;
            }
            let payload = payload.clone();
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| handler(payload)));
            if result.is_err() {
                log::error!(
                    "handler panicked dispatching subscription_id={subscription_id}, \
                     caught at the adapter boundary"
                );
            }
        }
    }

    /// Whether any subscription currently matches `subscription_id`.
    #[must_use]
    pub fn has_subscribers(&self, subscription_id: &str) -> bool {
        self.subscriptions
            .lock()
            .unwrap()
            .values()
            .any(|(sub, _)| sub.subscription_id == subscription_id)
    }

    /// Number of live subscriptions, for diagnostics and tests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscriptions.lock().unwrap().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Returns an [`Err`] with [`BrokerError::InvalidArgument`] if `options` is not a JSON object.
pub fn require_object(options: &Value, param: &str) -> BrokerResult<()> {
    if options.is_object() {
        Ok(())
    } else {
        Err(BrokerError::invalid_argument(format!(
            "'{param}' must be a JSON object, was {options}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[rstest]
    fn test_subscribe_returns_positive_token() {
        let base = AdapterBase::new();
        let token = base.subscribe(Subscription::new("t", json!({})), Arc::new(|_| {}));
        assert!(token > 0);
    }

    #[rstest]
    fn test_tokens_are_unique() {
        let base = AdapterBase::new();
        let mut tokens = std::collections::HashSet::new();
        for _ in 0..64 {
            let token = base.subscribe(Subscription::new("t", json!({})), Arc::new(|_| {}));
            assert!(tokens.insert(token), "duplicate token issued");
        }
    }

    #[rstest]
    fn test_unsubscribe_unknown_token_is_noop() {
        let base = AdapterBase::new();
        assert_eq!(base.unsubscribe(999_999), BrokerOutcome::OkNoop);
    }

    #[rstest]
    fn test_unsubscribe_removes_subscription() {
        let base = AdapterBase::new();
        let token = base.subscribe(Subscription::new("t", json!({})), Arc::new(|_| {}));
        assert_eq!(base.unsubscribe(token), BrokerOutcome::Ok);
        assert!(base.is_empty());
    }

    #[rstest]
    fn test_dispatch_filters_by_subscription_id() {
        let base = AdapterBase::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        base.subscribe(
            Subscription::new("topic-a", json!({})),
            Arc::new(move |_| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        base.dispatch("topic-b", &Payload::new(b"x".to_vec()));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        base.dispatch("topic-a", &Payload::new(b"x".to_vec()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[rstest]
    fn test_dispatch_catches_handler_panic() {
        let base = AdapterBase::new();
        base.subscribe(
            Subscription::new("t", json!({})),
            Arc::new(|_| panic!("handler exploded")),
        );
        // Must not propagate the panic out of dispatch.
        base.dispatch("t", &Payload::new(b"x".to_vec()));
    }

    #[rstest]
    fn test_dispatch_registration_order() {
        let base = AdapterBase::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let order = order.clone();
            base.subscribe(
                Subscription::new("t", json!({})),
                Arc::new(move |_| order.lock().unwrap().push(i)),
            );
        }
        base.dispatch("t", &Payload::new(b"x".to_vec()));
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[rstest]
    fn test_require_object() {
        assert!(require_object(&json!({}), "p").is_ok());
        assert!(require_object(&json!([1, 2]), "p").is_err());
    }
}

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

//! The always-present loopback protocol: delivers publishes directly to local
//! subscribers filtered by `subscription_id` equality. Every broker has
//! exactly one target named `"loopback"` backed by this adapter.

use std::sync::Arc;

use relay_core::{BrokerError, BrokerOutcome, BrokerResult, Payload};
use serde_json::Value;

use crate::adapter::{
    AdapterBase, OnMessage, OnPublishComplete, ProtocolAdapterClient, ProtocolAdapterFactory, ProtocolMessage,
    Subscription,
};
use crate::job_queue::{JobQueue, JobStatus};

pub const PROTOCOL_NAME: &str = "loopback";

struct QueuedDelivery {
    msg: ProtocolMessage,
}

/// The loopback client: synchronous fan-out for `publish`, a one-worker FIFO
/// for `publish_async`.
pub struct LoopbackAdapter {
    base: Arc<AdapterBase>,
    queue: JobQueue<QueuedDelivery>,
}

impl LoopbackAdapter {
    #[must_use]
    pub fn new() -> Self {
        let base = Arc::new(AdapterBase::new());
        let queue: JobQueue<QueuedDelivery> = JobQueue::new();
        queue.set_name(PROTOCOL_NAME);

        let worker_base = base.clone();
        queue.set_processor(move |item: &QueuedDelivery| {
            worker_base.dispatch(&item.msg.subscription_id, &item.msg.payload);
            JobStatus::Success
        });
        // The loopback worker must be running before the client can accept
        // async publishes; construction never fails for this protocol.
        queue.start().expect("loopback job queue processor was just set");

        Self { base, queue }
    }
}

impl Default for LoopbackAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolAdapterClient for LoopbackAdapter {
    fn friendly_name(&self) -> &str {
        PROTOCOL_NAME
    }

    fn publish(&self, msg: &ProtocolMessage) -> BrokerResult<()> {
        self.base.dispatch(&msg.subscription_id, &msg.payload);
        Ok(())
    }

    fn publish_async(&self, msg: ProtocolMessage, on_complete: OnPublishComplete) -> BrokerResult<()> {
        // Deliberately preserved: no local subscriber means no completion
        // callback at all, not a callback reporting "no-op".
        if !self.base.has_subscribers(&msg.subscription_id) {
            return Ok(());
        }

        let callback_msg = msg.clone();
        self.queue
            .enqueue(QueuedDelivery { msg }, move |status| {
                on_complete(PROTOCOL_NAME, &callback_msg, status == JobStatus::Success);
            })
            .map_err(|_| BrokerError::invalid_state("loopback adapter's job queue has been stopped"))
    }

    fn subscribe(&self, subscription: Subscription, on_message: OnMessage) -> BrokerResult<u32> {
        Ok(self.base.subscribe(subscription, on_message))
    }

    fn unsubscribe(&self, adapter_token: u32) -> BrokerOutcome {
        self.base.unsubscribe(adapter_token)
    }

    fn reconnect(&self) -> BrokerResult<()> {
        Ok(())
    }
}

/// Constructs [`LoopbackAdapter`] instances; registered under every broker by
/// default and never removable via `AddFactory`.
pub struct LoopbackAdapterFactory;

impl ProtocolAdapterFactory for LoopbackAdapterFactory {
    fn protocol_name(&self) -> &str {
        PROTOCOL_NAME
    }

    fn create_client(
        &self,
        _creation_options: &Value,
        _credentials: Option<&Value>,
    ) -> BrokerResult<Arc<dyn ProtocolAdapterClient>> {
        Ok(Arc::new(LoopbackAdapter::new()))
    }

    fn validate_message_options(&self, _options: &Value) -> BrokerResult<()> {
        // Loopback does not use JSON options; any value is accepted.
        Ok(())
    }

    fn create_message(&self, payload: &Payload, expanded_options: &Value) -> BrokerResult<ProtocolMessage> {
        let subscription_id = expanded_options
            .get("subscription_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(ProtocolMessage {
            payload: payload.clone(),
            subscription_id,
            routing: Value::Null,
        })
    }

    fn create_subscription(&self, options: &Value) -> BrokerResult<Subscription> {
        let subscription_id = options
            .get("subscription_id")
            .and_then(Value::as_str)
            .ok_or_else(|| BrokerError::invalid_argument("loopback subscription requires a 'subscription_id' field"))?;
        Ok(Subscription::new(subscription_id, options.clone()))
    }
}

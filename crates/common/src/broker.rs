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

//! The routing core: holds the target table and pipe table, expands and
//! matches on publish, fans subscriptions out to loopback plus every target
//! that declared a matching `subscription_id`.

use std::sync::{Arc, RwLock};

use ahash::AHashMap;
use indexmap::IndexMap;
use relay_core::{BrokerError, BrokerOutcome, BrokerResult, Payload};
use serde_json::Value;

use crate::adapter::{ProtocolAdapterClient, ProtocolAdapterFactory, ProtocolMessage, Subscription};
use crate::config;
use crate::expander::{CounterTable, expand_value_macros, match_pattern, substitute_value_captures};
use crate::file_adapter::FileAdapterFactory;
use crate::loopback::{LoopbackAdapter, LoopbackAdapterFactory};

const LOOPBACK_TARGET: &str = "loopback";
const STUB_PROTOCOLS: [&str; 3] = ["gpio", "mqtt", "s3"];

/// Lifecycle states a broker passes through exactly once, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    Initialized,
    ShuttingDown,
}

/// Invoked once per destination, per publish, on the asynchronous path.
pub trait PublishHandler: Send + Sync {
    fn on_published(&self, publisher: &str, message_id: &str, payload: &Payload, success: bool);
}

/// Invoked once per delivered message for a given subscription.
pub trait SubscribeHandler: Send + Sync {
    fn on_message_received(&self, payload: Payload);
}

struct Target {
    protocol: String,
    client: Arc<dyn ProtocolAdapterClient>,
    factory: Arc<dyn ProtocolAdapterFactory>,
    /// adapter-side subscriptions declared in config, keyed by `subscription_id`.
    subscriptions: AHashMap<String, Subscription>,
    /// `message_id` pattern -> option template, in declaration order (also
    /// stands in for `messages_handled`: its key set and iteration order).
    message_options: IndexMap<String, Value>,
}

struct BrokerState {
    targets: IndexMap<String, Target>,
    factories: AHashMap<String, Arc<dyn ProtocolAdapterFactory>>,
    cancellation_map: AHashMap<u32, Vec<(Arc<dyn ProtocolAdapterClient>, u32)>>,
    lifecycle: Lifecycle,
}

/// A single broker instance: one routing table, reachable by any number of
/// publishers/subscribers sharing the `Arc`.
pub struct Broker {
    config_canonical: String,
    raw_config: Value,
    credentials: Option<Value>,
    counters: CounterTable,
    state: RwLock<BrokerState>,
}

fn require_object<'a>(value: &'a Value, what: &str) -> BrokerResult<&'a serde_json::Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| BrokerError::invalid_argument(format!("{what} must be a JSON object")))
}

fn require_str<'a>(obj: &'a serde_json::Map<String, Value>, key: &str, what: &str) -> BrokerResult<&'a str> {
    let s = obj
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| BrokerError::invalid_argument(format!("{what} missing required non-empty field '{key}'")))?;
    relay_core::correctness::check_nonempty_string(s, key)?;
    Ok(s)
}

fn require_array<'a>(obj: &'a serde_json::Map<String, Value>, key: &str, what: &str) -> BrokerResult<&'a Vec<Value>> {
    obj.get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| BrokerError::invalid_argument(format!("{what} missing required array field '{key}'")))
}

impl Broker {
    /// Parses and structurally validates `config_canonical` but does not yet
    /// construct any non-loopback adapter client; that happens in
    /// [`Broker::initialize`].
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::InvalidArgument`] if the config does not parse
    /// as a JSON object.
    pub fn construct(config_canonical: String, credentials: Option<&Value>) -> BrokerResult<Arc<Self>> {
        let raw_config: Value = serde_json::from_str(&config_canonical)
            .map_err(|e| BrokerError::invalid_argument(format!("config did not parse as JSON: {e}")))?;
        require_object(&raw_config, "config")?;

        let mut factories: AHashMap<String, Arc<dyn ProtocolAdapterFactory>> = AHashMap::new();
        factories.insert(LOOPBACK_TARGET.to_string(), Arc::new(LoopbackAdapterFactory));
        factories.insert("file".to_string(), Arc::new(FileAdapterFactory::new()));
        for protocol in STUB_PROTOCOLS {
            factories.insert(protocol.to_string(), Arc::new(StubAdapterFactory::new(protocol)));
        }

        let mut targets = IndexMap::new();
        let loopback_client: Arc<dyn ProtocolAdapterClient> = Arc::new(LoopbackAdapter::new());
        targets.insert(
            LOOPBACK_TARGET.to_string(),
            Target {
                protocol: LOOPBACK_TARGET.to_string(),
                client: loopback_client,
                factory: factories[LOOPBACK_TARGET].clone(),
                subscriptions: AHashMap::new(),
                message_options: IndexMap::new(),
            },
        );

        Ok(Arc::new(Self {
            config_canonical,
            raw_config,
            credentials: credentials.cloned(),
            counters: CounterTable::new(),
            state: RwLock::new(BrokerState {
                targets,
                factories,
                cancellation_map: AHashMap::new(),
                lifecycle: Lifecycle::Uninitialized,
            }),
        }))
    }

    #[must_use]
    pub fn config_canonical(&self) -> &str {
        &self.config_canonical
    }

    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        self.state.read().unwrap().lifecycle
    }

    /// Registers a factory so later `Initialize` calls (or targets added by
    /// config) can construct clients for it. May be called before `initialize`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::InvalidArgument`] if the protocol name is already registered.
    pub fn add_factory(&self, factory: Arc<dyn ProtocolAdapterFactory>) -> BrokerResult<()> {
        let mut state = self.state.write().unwrap();
        let name = factory.protocol_name().to_string();
        if state.factories.contains_key(&name) {
            return Err(BrokerError::invalid_argument(format!("factory for protocol '{name}' already registered")));
        }
        state.factories.insert(name, factory);
        Ok(())
    }

    /// Builds the targets and pipes tables from the config captured at
    /// [`Broker::construct`] time. A second call is a no-op success.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::InvalidArgument`] for any structurally invalid
    /// target or pipe entry (unknown protocol, duplicate name, missing
    /// destination target, ...), aborting before any further entries are
    /// processed.
    pub fn initialize(&self) -> BrokerResult<BrokerOutcome> {
        let mut state = self.state.write().unwrap();
        match state.lifecycle {
            Lifecycle::Initialized => return Ok(BrokerOutcome::OkNoop),
            Lifecycle::ShuttingDown => return Err(BrokerError::invalid_state("broker is shutting down")),
            Lifecycle::Uninitialized => {}
        }

        let root = require_object(&self.raw_config, "config")?;
        if let Some(targets_cfg) = root.get("targets") {
            let targets_cfg = targets_cfg
                .as_array()
                .ok_or_else(|| BrokerError::invalid_argument("'targets' must be an array"))?;
            for target_cfg in targets_cfg {
                self.initialize_target(&mut state, target_cfg)?;
            }
        }

        if let Some(pipes_cfg) = root.get("pipes") {
            let pipes_cfg = pipes_cfg
                .as_array()
                .ok_or_else(|| BrokerError::invalid_argument("'pipes' must be an array"))?;
            for pipe_cfg in pipes_cfg {
                self.initialize_pipe(&mut state, pipe_cfg)?;
            }
        }

        state.lifecycle = Lifecycle::Initialized;
        Ok(BrokerOutcome::Ok)
    }

    fn initialize_target(&self, state: &mut BrokerState, target_cfg: &Value) -> BrokerResult<()> {
        let obj = require_object(target_cfg, "target entry")?;
        let protocol = require_str(obj, "protocol", "target entry")?.to_string();
        let name = require_str(obj, "name", "target entry")?.to_string();

        if state.targets.contains_key(&name) {
            return Err(BrokerError::invalid_argument(format!("duplicate target name '{name}'")));
        }

        let options_key = format!("{protocol}_options");
        let options = obj
            .get(&options_key)
            .cloned()
            .ok_or_else(|| BrokerError::invalid_argument(format!("target '{name}' missing '{options_key}'")))?;
        require_object(&options, &format!("'{options_key}'"))?;

        let factory = state
            .factories
            .get(&protocol)
            .cloned()
            .ok_or_else(|| BrokerError::invalid_argument(format!("unknown protocol '{protocol}' for target '{name}'")))?;

        let client = factory.create_client(&options, self.credentials.as_ref()).map_err(|e| {
            log::error!("failed to construct client for target '{name}' (protocol '{protocol}'): {e}");
            e
        })?;

        let mut subscriptions = AHashMap::new();
        let subs_key = format!("{protocol}_subscriptions");
        if let Some(subs_cfg) = obj.get(&subs_key) {
            let subs_cfg = subs_cfg
                .as_array()
                .ok_or_else(|| BrokerError::invalid_argument(format!("'{subs_key}' must be an array")))?;
            for sub_cfg in subs_cfg {
                let sub_obj = require_object(sub_cfg, &format!("'{subs_key}' entry"))?;
                let subscription_id = require_str(sub_obj, "subscription_id", &format!("'{subs_key}' entry"))?.to_string();
                if subscriptions.contains_key(&subscription_id) {
                    return Err(BrokerError::invalid_argument(format!(
                        "duplicate subscription_id '{subscription_id}' within target '{name}'"
                    )));
                }
                let subscription = factory.create_subscription(sub_cfg)?;
                subscriptions.insert(subscription_id, subscription);
            }
        }

        state.targets.insert(
            name,
            Target {
                protocol,
                client,
                factory,
                subscriptions,
                message_options: IndexMap::new(),
            },
        );
        Ok(())
    }

    fn initialize_pipe(&self, state: &mut BrokerState, pipe_cfg: &Value) -> BrokerResult<()> {
        let obj = require_object(pipe_cfg, "pipe entry")?;
        let message_id = require_str(obj, "message_id", "pipe entry")?.to_string();
        relay_core::correctness::check_balanced_macros(&message_id, "pipe entry 'message_id'")?;
        let destinations = require_array(obj, "destinations", "pipe entry")?;

        for destination in destinations {
            let dest_obj = require_object(destination, "destination entry")?;
            let target_name = require_str(dest_obj, "target_name", "destination entry")?.to_string();

            let protocol = state
                .targets
                .get(&target_name)
                .map(|t| t.protocol.clone())
                .ok_or_else(|| BrokerError::invalid_argument(format!("pipe destination references unknown target '{target_name}'")))?;

            let options_key = format!("{protocol}_message_options");
            let options = dest_obj
                .get(&options_key)
                .cloned()
                .ok_or_else(|| BrokerError::invalid_argument(format!("destination for '{target_name}' missing '{options_key}'")))?;
            check_balanced_macros_in_value(&options, &options_key)?;

            let target = state.targets.get(&target_name).expect("looked up above");
            target.factory.validate_message_options(&options)?;

            let target = state.targets.get_mut(&target_name).expect("looked up above");
            target.message_options.insert(message_id.clone(), options);
        }
        Ok(())
    }

    /// Publishes `payload` under `message_id`. Loopback always receives it;
    /// other targets receive it iff a registered pattern matches.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::InvalidState`] if the broker is not initialized,
    /// or whatever error the first failing destination reported (subsequent
    /// targets are not attempted on synchronous failure).
    pub fn publish(
        &self,
        message_id: &str,
        payload: &Payload,
        is_async: bool,
        handler: Option<Arc<dyn PublishHandler>>,
    ) -> BrokerResult<BrokerOutcome> {
        let state = self.state.read().unwrap();
        if state.lifecycle != Lifecycle::Initialized {
            return Err(BrokerError::invalid_state("publish called before initialize"));
        }

        // Held for the whole call, independent of any callback capture below.
        let handler = handler;

        for (name, target) in &state.targets {
            let msg = if name == LOOPBACK_TARGET {
                ProtocolMessage {
                    payload: payload.clone(),
                    subscription_id: message_id.to_string(),
                    routing: Value::Null,
                }
            } else {
                let Some((pattern, captures)) = find_first_match(&target.message_options, message_id) else {
                    continue;
                };
                let template = &target.message_options[&pattern];
                let substituted = substitute_value_captures(template, &captures);
                let expanded = expand_value_macros(&substituted, payload, &self.counters);
                target.factory.create_message(payload, &expanded)?
            };

            if is_async {
                let publisher = target.client.friendly_name().to_string();
                let message_id_owned = message_id.to_string();
                let handler = handler.clone();
                target.client.publish_async(
                    msg,
                    Arc::new(move |_publisher, m, success| {
                        if let Some(handler) = &handler {
                            handler.on_published(&publisher, &message_id_owned, &m.payload, success);
                        }
                    }),
                )?;
            } else {
                target.client.publish(&msg).map_err(|e| {
                    log::error!("synchronous publish to target '{name}' failed: {e}");
                    e
                })?;
            }
        }

        Ok(BrokerOutcome::Ok)
    }

    /// Registers `handler` against `subscription_id` on loopback and every
    /// target that declared it, returning one broker-scoped token covering
    /// all of them.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::InvalidState`] if the broker is not initialized.
    pub fn subscribe(&self, subscription_id: &str, handler: Arc<dyn SubscribeHandler>) -> BrokerResult<u32> {
        let mut state = self.state.write().unwrap();
        if state.lifecycle != Lifecycle::Initialized {
            return Err(BrokerError::invalid_state("subscribe called before initialize"));
        }

        let loopback = state.targets.get(LOOPBACK_TARGET).expect("loopback always present");
        let loopback_subscription = Subscription::new(subscription_id, Value::Null);
        let loopback_handler = handler.clone();
        let broker_token = loopback
            .client
            .subscribe(loopback_subscription, Arc::new(move |p| loopback_handler.on_message_received(p)))?;

        let mut entries = vec![(loopback.client.clone(), broker_token)];

        for (name, target) in &state.targets {
            if name == LOOPBACK_TARGET {
                continue;
            }
            if let Some(subscription) = target.subscriptions.get(subscription_id) {
                let target_handler = handler.clone();
                let adapter_token = target
                    .client
                    .subscribe(subscription.clone(), Arc::new(move |p| target_handler.on_message_received(p)))?;
                entries.push((target.client.clone(), adapter_token));
            }
        }

        state.cancellation_map.insert(broker_token, entries);
        Ok(broker_token)
    }

    /// Tears down every adapter subscription registered under `broker_token`.
    /// An unknown token is a no-op, not an error.
    pub fn unsubscribe(&self, broker_token: u32) -> BrokerOutcome {
        let mut state = self.state.write().unwrap();
        match state.cancellation_map.remove(&broker_token) {
            Some(entries) => {
                for (client, adapter_token) in entries {
                    client.unsubscribe(adapter_token);
                }
                BrokerOutcome::Ok
            }
            None => {
                log::warn!("unsubscribe of unknown broker token {broker_token}");
                BrokerOutcome::OkNoop
            }
        }
    }

    /// Tears down the broker in the order spelled out for destructors: stop
    /// internal job queues, deregister from the instance registry, clear
    /// factories, close protocol clients. Idempotent.
    pub fn shutdown(&self) {
        let targets = {
            let mut state = self.state.write().unwrap();
            if state.lifecycle == Lifecycle::ShuttingDown {
                return;
            }
            state.lifecycle = Lifecycle::ShuttingDown;
            state.cancellation_map.clear();
            std::mem::take(&mut state.targets)
        };

        // Dropping the targets runs every adapter's Drop impl, which stops its
        // job queue and closes the underlying client, before anything below
        // touches the registry or the factories that built them.
        drop(targets);

        crate::registry::force_remove(&self.config_canonical);

        self.state.write().unwrap().factories.clear();
    }

    /// Releases this caller's handle on the shared registry entry (if this
    /// broker was obtained via a shared, non-`unique` [`open`]), decrementing
    /// its refcount and removing the entry once the last holder releases it.
    /// Does not touch the broker's own lifecycle or adapter clients; callers
    /// that also want the broker to stop accepting work should call
    /// [`Broker::shutdown`].
    pub fn release(&self) {
        crate::registry::release(&self.config_canonical);
    }
}

/// Walks every string leaf of `value` (an option template) checking for an
/// unterminated `${...`, per the expander's "reported at validation time, not
/// publish time" failure contract.
fn check_balanced_macros_in_value(value: &Value, what: &str) -> BrokerResult<()> {
    match value {
        Value::String(s) => relay_core::correctness::check_balanced_macros(s, what),
        Value::Array(items) => {
            for item in items {
                check_balanced_macros_in_value(item, what)?;
            }
            Ok(())
        }
        Value::Object(map) => {
            for v in map.values() {
                check_balanced_macros_in_value(v, what)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn find_first_match(message_options: &IndexMap<String, Value>, message_id: &str) -> Option<(String, std::collections::HashMap<String, String>)> {
    for pattern in message_options.keys() {
        if let Some(captures) = match_pattern(pattern, message_id) {
            return Some((pattern.clone(), captures));
        }
    }
    None
}

/// A factory for a transport this crate does not vendor a client for;
/// registration always succeeds, construction always fails with a named diagnostic.
struct StubAdapterFactory {
    protocol: String,
}

impl StubAdapterFactory {
    fn new(protocol: impl Into<String>) -> Self {
        Self { protocol: protocol.into() }
    }

    fn not_vendored(&self) -> BrokerError {
        BrokerError::not_implemented(format!("transport '{}' is not vendored in this crate", self.protocol))
    }
}

impl ProtocolAdapterFactory for StubAdapterFactory {
    fn protocol_name(&self) -> &str {
        &self.protocol
    }

    fn create_client(&self, _creation_options: &Value, _credentials: Option<&Value>) -> BrokerResult<Arc<dyn ProtocolAdapterClient>> {
        Err(self.not_vendored())
    }

    fn validate_message_options(&self, _options: &Value) -> BrokerResult<()> {
        Ok(())
    }

    fn create_message(&self, _payload: &Payload, _expanded_options: &Value) -> BrokerResult<ProtocolMessage> {
        Err(self.not_vendored())
    }

    fn create_subscription(&self, _options: &Value) -> BrokerResult<Subscription> {
        Err(self.not_vendored())
    }
}

/// Resolves configuration per the precedence chain in [`config::resolve_config`]
/// then acquires a broker instance from the registry (or builds a fresh one
/// when `unique` is set).
///
/// # Errors
///
/// Returns whatever [`Broker::construct`] returns for a malformed config.
pub fn open(explicit_config: Option<&str>, credentials: Option<&Value>, unique: bool) -> BrokerResult<Arc<Broker>> {
    let canonical = config::resolve_config(explicit_config);
    crate::registry::acquire(&canonical, unique, || Broker::construct(canonical.clone(), credentials))
}

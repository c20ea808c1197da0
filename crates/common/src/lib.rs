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

//! The in-process message broker: the routing core ([`broker`]), the Protocol
//! Adapter contract and its always-present [`loopback`] implementation plus
//! the example [`file_adapter`], the macro/pattern [`expander`], the
//! [`registry`] of shared instances, the async [`job_queue`] primitive,
//! [`config`] resolution, and [`logging`] initialization.

pub mod adapter;
pub mod broker;
pub mod config;
pub mod expander;
pub mod file_adapter;
pub mod job_queue;
pub mod logging;
pub mod loopback;
pub mod registry;

pub use adapter::{AdapterBase, OnMessage, OnPublishComplete, ProtocolAdapterClient, ProtocolAdapterFactory, ProtocolMessage, Subscription};
pub use broker::{Broker, Lifecycle, PublishHandler, SubscribeHandler, open};
pub use file_adapter::{FileAdapter, FileAdapterFactory};
pub use job_queue::{JobQueue, JobStatus};
pub use loopback::{LoopbackAdapter, LoopbackAdapterFactory};
pub use registry::release_all;

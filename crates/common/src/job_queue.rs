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

//! A single-producer/multi-consumer FIFO job queue with a shared processor
//! callback and a per-item completion callback, used by the loopback adapter
//! to decouple asynchronous publish from the caller's thread.
//!
//! `stop` drains: the worker keeps consuming whatever was already enqueued
//! before the stop request was issued, then exits. No new items are accepted
//! once `stop` has been called.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use relay_core::{BrokerError, BrokerResult};

/// Outcome of processing one item, passed to its completion callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Success,
    Failure,
}

type Processor<T> = Arc<dyn Fn(&T) -> JobStatus + Send + Sync>;
type OnComplete = Box<dyn FnOnce(JobStatus) + Send>;

enum Command<T> {
    Item(T, OnComplete),
    Stop,
}

/// A named FIFO queue of `T` processed one at a time by a single worker thread.
pub struct JobQueue<T: Send + 'static> {
    name: Mutex<String>,
    processor: Mutex<Option<Processor<T>>>,
    sender: Mutex<Option<Sender<Command<T>>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl<T: Send + 'static> Default for JobQueue<T> {
    fn default() -> Self {
        Self {
            name: Mutex::new(String::new()),
            processor: Mutex::new(None),
            sender: Mutex::new(None),
            worker: Mutex::new(None),
            stopped: AtomicBool::new(false),
        }
    }
}

impl<T: Send + 'static> JobQueue<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *self.name.lock().unwrap() = name.into();
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.name.lock().unwrap().clone()
    }

    /// Installs the function applied to every enqueued item. Must be called
    /// before [`JobQueue::start`].
    pub fn set_processor<F>(&self, processor: F)
    where
        F: Fn(&T) -> JobStatus + Send + Sync + 'static,
    {
        *self.processor.lock().unwrap() = Some(Arc::new(processor));
    }

    /// Spawns the worker thread. Idempotent: a second call while already
    /// running is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::InvalidState`] if no processor has been installed.
    pub fn start(&self) -> BrokerResult<()> {
        let mut sender_guard = self.sender.lock().unwrap();
        if sender_guard.is_some() {
            return Ok(());
        }

        let processor = self
            .processor
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| BrokerError::invalid_state("job queue started with no processor set"))?;

        let (tx, rx) = mpsc::channel::<Command<T>>();
        let name = self.name();

        let handle = std::thread::Builder::new()
            .name(format!("job-queue-{name}"))
            .spawn(move || {
                for command in rx {
                    match command {
                        Command::Item(item, on_complete) => {
                            let status = processor(&item);
                            on_complete(status);
                        }
                        Command::Stop => break,
                    }
                }
            })
            .expect("failed to spawn job queue worker thread");

        *sender_guard = Some(tx);
        *self.worker.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Enqueues `item`; `on_complete` fires from the worker thread once
    /// `item` has been processed.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::InvalidState`] if the queue has been stopped or
    /// never started.
    pub fn enqueue<F>(&self, item: T, on_complete: F) -> BrokerResult<()>
    where
        F: FnOnce(JobStatus) + Send + 'static,
    {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(BrokerError::invalid_state(format!(
                "job queue '{}' has been stopped",
                self.name()
            )));
        }

        let sender_guard = self.sender.lock().unwrap();
        let sender = sender_guard
            .as_ref()
            .ok_or_else(|| BrokerError::invalid_state(format!("job queue '{}' was never started", self.name())))?;

        sender
            .send(Command::Item(item, Box::new(on_complete)))
            .map_err(|_| BrokerError::invalid_state("job queue worker thread is gone"))
    }

    /// Marks the queue as stopped (rejecting further `enqueue` calls), then
    /// blocks until the worker has drained everything already enqueued.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        let sender = self.sender.lock().unwrap().take();
        if let Some(sender) = sender {
            let _ = sender.send(Command::Stop);
        }

        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl<T: Send + 'static> Drop for JobQueue<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

/*
 * Copyright 2024 Google LLC
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::sync::watch;

use super::{config::Listener, table::FilterChainTable};

/// Set in the connection count once the instance is retired, after which no
/// connection can be bound to it anymore.
const RETIRED: usize = 1 << (usize::BITS - 1);

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// The lifecycle of a listener instance. Transitions only ever move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, strum_macros::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum State {
    /// Accepting new connections.
    Active,
    /// No longer accepting, waiting for bound connections to close.
    Draining,
    /// Every bound connection is gone, or was forcibly closed.
    Retired,
}

/// A published generation of a single listener: its configuration, its
/// built filter chains, and the connections bound to it.
pub struct ListenerInstance {
    id: u64,
    name: Arc<str>,
    address: SocketAddr,
    config: Listener,
    table: FilterChainTable,
    state: watch::Sender<State>,
    connections: AtomicUsize,
    forced_close: watch::Sender<bool>,
}

impl ListenerInstance {
    /// `name` differs from the configured name when the listener was
    /// configured without one.
    pub fn new(
        name: impl Into<Arc<str>>,
        config: Listener,
        address: SocketAddr,
        table: FilterChainTable,
    ) -> Self {
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            address,
            config,
            table,
            state: watch::channel(State::Active).0,
            connections: AtomicUsize::new(0),
            forced_close: watch::channel(false).0,
        }
    }

    /// Unique for the lifetime of the process, so replaced generations of a
    /// listener can be told apart.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn config(&self) -> &Listener {
        &self.config
    }

    pub fn table(&self) -> &FilterChainTable {
        &self.table
    }

    pub fn state(&self) -> State {
        *self.state.borrow()
    }

    pub fn is_active(&self) -> bool {
        self.state() == State::Active
    }

    /// Notifies of every state transition.
    pub fn subscribe(&self) -> watch::Receiver<State> {
        self.state.subscribe()
    }

    /// The number of connections currently bound to the instance.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::Acquire) & !RETIRED
    }

    /// Binds a connection to the instance until the returned guard is
    /// dropped. Returns `None` once the instance is retired.
    pub fn track(self: &Arc<Self>) -> Option<ConnectionGuard> {
        self.connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                (count & RETIRED == 0).then_some(count + 1)
            })
            .ok()?;

        crate::metrics::connections_active(&self.name).inc();
        Some(ConnectionGuard {
            instance: self.clone(),
        })
    }

    /// Moves an active instance to draining, stopping it from accepting. When
    /// `timeout` is set, the connections still open once it elapses are
    /// forcibly closed. Returns `false` if the instance wasn't active, in
    /// which case any drain already underway is left untouched.
    pub fn begin_drain(self: &Arc<Self>, timeout: Option<Duration>) -> bool {
        if !self.transition(State::Active, State::Draining) {
            return false;
        }

        tracing::info!(
            listener = %self.name,
            id = self.id,
            connections = self.connections(),
            ?timeout,
            "draining listener"
        );

        if self.try_retire() {
            return true;
        }

        if let Some(timeout) = timeout {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(self.clone().drain_deadline(timeout));
                }
                Err(_) => {
                    tracing::warn!(listener = %self.name, "no runtime available to enforce the drain deadline");
                }
            }
        }

        true
    }

    async fn drain_deadline(self: Arc<Self>, timeout: Duration) {
        let mut state = self.subscribe();

        tokio::select! {
            _ = tokio::time::sleep(timeout) => {
                let closed = self.force_retire();
                if closed > 0 {
                    tracing::info!(listener = %self.name, id = self.id, closed, "drain deadline elapsed, closing remaining connections");
                }
            }
            _ = state.wait_for(|state| *state == State::Retired) => {}
        }
    }

    /// Retires the instance if it's draining without connections.
    fn try_retire(&self) -> bool {
        if self.state() != State::Draining {
            return false;
        }

        if self
            .connections
            .compare_exchange(0, RETIRED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        if self.transition(State::Draining, State::Retired) {
            tracing::info!(listener = %self.name, id = self.id, "listener retired");
        }

        true
    }

    /// Retires the instance immediately, forcibly closing every connection
    /// still bound to it. Returns the number of connections closed.
    pub fn force_retire(&self) -> usize {
        let previous = self.connections.fetch_or(RETIRED, Ordering::AcqRel);
        let closed = previous & !RETIRED;

        self.forced_close.send_replace(true);
        if closed > 0 {
            crate::metrics::drain_forced_closes(&self.name).inc_by(closed as u64);
        }

        let from = self.state();
        if from != State::Retired && self.transition(from, State::Retired) {
            tracing::info!(listener = %self.name, id = self.id, closed, "listener retired");
        }

        closed
    }

    /// Resolves once the instance is retired.
    pub async fn retired(&self) {
        let mut state = self.subscribe();
        let _ = state.wait_for(|state| *state == State::Retired).await;
    }

    fn transition(&self, from: State, to: State) -> bool {
        let changed = self.state.send_if_modified(|state| {
            if *state == from && from < to {
                *state = to;
                true
            } else {
                false
            }
        });

        if changed {
            crate::metrics::transition_listener(from, to);
        }

        changed
    }
}

impl std::fmt::Debug for ListenerInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerInstance")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("address", &self.address)
            .field("state", &self.state())
            .field("connections", &self.connections())
            .finish_non_exhaustive()
    }
}

/// Keeps a connection bound to its listener instance, and the instance from
/// retiring, while alive.
#[derive(Debug)]
pub struct ConnectionGuard {
    instance: Arc<ListenerInstance>,
}

impl ConnectionGuard {
    pub fn instance(&self) -> &Arc<ListenerInstance> {
        &self.instance
    }

    /// Resolves once the connection has to be closed because its instance
    /// was forcibly retired.
    pub async fn closed(&self) {
        let mut forced_close = self.instance.forced_close.subscribe();
        let _ = forced_close.wait_for(|closed| *closed).await;
    }

    pub fn is_closed(&self) -> bool {
        *self.instance.forced_close.borrow()
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let previous = self.instance.connections.fetch_sub(1, Ordering::AcqRel);
        crate::metrics::connections_active(&self.instance.name).dec();

        if previous == 1 {
            self.instance.try_retire();
        }
    }
}

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

//! Accepts connections for every active listener and hands each of them to
//! the filter chain the dispatcher binds it to.

mod connection;

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::{net::TcpListener, task::JoinHandle};

use crate::{
    listener::{Dispatcher, ListenerInstance, ListenerRegistry, State},
    signal::ShutdownRx,
};

/// How long an inspecting listener waits for a ClientHello by default.
pub const DEFAULT_SERVER_NAME_TIMEOUT: Duration = Duration::from_millis(200);

/// Keeps one acceptor task running per active listener instance of a
/// [`ListenerRegistry`].
pub struct Server {
    registry: Arc<ListenerRegistry>,
    dispatcher: Dispatcher,
    server_name_timeout: Duration,
}

struct Acceptor {
    instance: Arc<ListenerInstance>,
    task: JoinHandle<()>,
}

impl Server {
    pub fn new(registry: Arc<ListenerRegistry>) -> Self {
        Self {
            dispatcher: Dispatcher::new(registry.clone()),
            registry,
            server_name_timeout: DEFAULT_SERVER_NAME_TIMEOUT,
        }
    }

    /// Sets how long listeners that inspect the server name wait for it.
    pub fn with_server_name_timeout(mut self, timeout: Duration) -> Self {
        self.server_name_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<ListenerRegistry> {
        &self.registry
    }

    /// Runs until `shutdown_rx` fires, binding new listeners as the registry
    /// changes. On return every listener has been shut down.
    pub async fn run(self, mut shutdown_rx: ShutdownRx) -> crate::Result<()> {
        let mut changes = self.registry.subscribe();
        let mut acceptors = HashMap::new();

        loop {
            self.reconcile(&mut acceptors, &shutdown_rx);

            tokio::select! {
                changed = changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = shutdown_rx.changed() => break,
            }
        }

        tracing::info!(listeners = acceptors.len(), "stopping listeners");
        let tasks: Vec<_> = acceptors
            .into_values()
            .map(|acceptor| {
                acceptor.task.abort();
                acceptor.task
            })
            .collect();
        // Every listening socket is closed once its task is gone.
        futures::future::join_all(tasks).await;
        self.registry.shutdown();

        Ok(())
    }

    /// Starts acceptors for listeners that don't have one yet and stops the
    /// ones whose listener left the registry.
    fn reconcile(&self, acceptors: &mut HashMap<u64, Acceptor>, shutdown_rx: &ShutdownRx) {
        let snapshot = self.registry.snapshot();

        acceptors.retain(|id, acceptor| {
            let current = snapshot
                .iter()
                .any(|instance| instance.id() == *id)
                && !acceptor.task.is_finished();

            if !current {
                tracing::debug!(listener = %acceptor.instance.name(), "stopping acceptor");
                acceptor.task.abort();
            }

            current
        });

        for instance in snapshot.iter() {
            if !instance.is_active() || acceptors.contains_key(&instance.id()) {
                continue;
            }

            let listener = match crate::net::tcp_listener_with_reuse(instance.address()) {
                Ok(listener) => listener,
                Err(error) => {
                    tracing::error!(
                        %error,
                        listener = %instance.name(),
                        address = %instance.address(),
                        "failed to bind listener"
                    );
                    continue;
                }
            };

            tracing::info!(
                listener = %instance.name(),
                address = %instance.address(),
                "accepting connections"
            );

            let task = tokio::spawn(accept(
                instance.clone(),
                listener,
                self.dispatcher.clone(),
                self.server_name_timeout,
                shutdown_rx.clone(),
            ));

            acceptors.insert(
                instance.id(),
                Acceptor {
                    instance: instance.clone(),
                    task,
                },
            );
        }
    }
}

/// Accepts connections on `listener` for as long as `instance` is active.
async fn accept(
    instance: Arc<ListenerInstance>,
    listener: TcpListener,
    dispatcher: Dispatcher,
    server_name_timeout: Duration,
    shutdown_rx: ShutdownRx,
) {
    let mut state = instance.subscribe();

    loop {
        tokio::select! {
            biased;

            _ = state.wait_for(|state| *state != State::Active) => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, source)) => {
                    tokio::spawn(connection::handle(
                        stream,
                        source,
                        instance.clone(),
                        dispatcher.clone(),
                        server_name_timeout,
                        shutdown_rx.clone(),
                    ));
                }
                Err(error) => {
                    tracing::warn!(%error, listener = %instance.name(), "failed to accept connection");
                }
            },
        }
    }

    tracing::debug!(listener = %instance.name(), state = instance.state().as_ref(), "no longer accepting connections");
}

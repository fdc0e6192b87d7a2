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

use std::{net::SocketAddr, sync::Arc};

use crate::filters::{ConnectionContext, FilterChain as Filters};

use super::{
    config::TransportSocket,
    instance::{ConnectionGuard, ListenerInstance},
    registry::{ListenerRegistry, Snapshot},
    specificity::{Attributes, Specificity},
    table::FilterChainEntry,
};

/// What the network stack observed about an accepted connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub source: SocketAddr,
    /// The local address the connection was accepted on.
    pub local: SocketAddr,
    /// The destination the connection had before being redirected to the
    /// proxy, when the platform could tell.
    pub original_destination: Option<SocketAddr>,
    /// The server name of the TLS ClientHello, when inspected.
    pub server_name: Option<String>,
}

impl ConnectionInfo {
    pub fn new(source: SocketAddr, local: SocketAddr) -> Self {
        Self {
            source,
            local,
            original_destination: None,
            server_name: None,
        }
    }

    pub fn with_original_destination(mut self, original_destination: Option<SocketAddr>) -> Self {
        self.original_destination = original_destination;
        self
    }

    pub fn with_server_name(mut self, server_name: Option<String>) -> Self {
        self.server_name = server_name;
        self
    }
}

/// A connection bound to a filter chain for the rest of its life.
#[derive(Debug)]
pub struct Binding {
    chain: Arc<FilterChainEntry>,
    specificity: Specificity,
    source: SocketAddr,
    destination: SocketAddr,
    server_name: Option<String>,
    guard: ConnectionGuard,
}

impl Binding {
    pub fn listener(&self) -> &Arc<ListenerInstance> {
        self.guard.instance()
    }

    pub fn chain(&self) -> &Arc<FilterChainEntry> {
        &self.chain
    }

    pub fn specificity(&self) -> Specificity {
        self.specificity
    }

    /// The destination the chain was selected for.
    pub fn destination(&self) -> SocketAddr {
        self.destination
    }

    /// The most data buffered for the connection at any time.
    pub fn buffer_limit(&self) -> usize {
        self.listener().config().buffer_limit()
    }

    pub fn transport_socket(&self) -> Option<&TransportSocket> {
        self.chain.transport_socket()
    }

    pub fn filters(&self) -> &Filters {
        self.chain.filters()
    }

    /// Whether the selected chain expects a PROXY protocol header, see
    /// [`FilterChain::use_proxy_proto`](super::FilterChain::use_proxy_proto).
    pub fn use_proxy_proto(&self) -> bool {
        self.chain.use_proxy_proto()
    }

    /// Creates the context the chain's filters process the connection with.
    pub fn context(&self) -> ConnectionContext {
        ConnectionContext::new(
            self.source,
            self.destination,
            self.listener().name().clone(),
            self.chain.name().clone(),
        )
        .with_server_name(self.server_name.clone())
    }

    /// Resolves once the connection has to be closed because its listener
    /// was forcibly retired.
    pub async fn closed(&self) {
        self.guard.closed().await
    }

    pub fn is_closed(&self) -> bool {
        self.guard.is_closed()
    }
}

#[derive(Debug)]
pub enum DispatchOutcome {
    Matched(Binding),
    /// No filter chain matched, the connection is to be closed. Carries the
    /// listener that was consulted, if any was found.
    NoMatch { listener: Option<Arc<str>> },
}

impl DispatchOutcome {
    pub fn binding(self) -> Option<Binding> {
        match self {
            Self::Matched(binding) => Some(binding),
            Self::NoMatch { .. } => None,
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self, Self::Matched(_))
    }
}

/// Binds accepted connections to the filter chain of the listener owning
/// them. A connection is dispatched once, against a single snapshot of the
/// listener set.
#[derive(Clone, Debug)]
pub struct Dispatcher {
    registry: Arc<ListenerRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ListenerRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ListenerRegistry> {
        &self.registry
    }

    /// Dispatches a connection to the listener bound to its local address.
    pub fn dispatch(&self, info: &ConnectionInfo) -> DispatchOutcome {
        let snapshot = self.registry.snapshot();

        match snapshot.lookup(info.local) {
            Some(accepting) => Self::dispatch_with(&snapshot, accepting, info),
            None => {
                tracing::debug!(local = %info.local, source = %info.source, "no listener owns connection");
                DispatchOutcome::NoMatch { listener: None }
            }
        }
    }

    /// Dispatches a connection accepted by `accepting`.
    pub fn dispatch_on(
        &self,
        accepting: &Arc<ListenerInstance>,
        info: &ConnectionInfo,
    ) -> DispatchOutcome {
        Self::dispatch_with(&self.registry.snapshot(), accepting, info)
    }

    fn dispatch_with(
        snapshot: &Snapshot,
        accepting: &Arc<ListenerInstance>,
        info: &ConnectionInfo,
    ) -> DispatchOutcome {
        let (listener, destination) = Self::resolve(snapshot, accepting, info);

        let attributes = Attributes {
            server_name: info.server_name.as_deref(),
            source: info.source,
            destination,
        };

        // A connection accepted before its listener began draining still
        // binds. Only a retired instance refuses it.
        let selected = listener
            .table()
            .select(&attributes)
            .and_then(|(chain, specificity)| {
                listener
                    .track()
                    .map(|guard| (chain.clone(), specificity, guard))
            });

        match selected {
            Some((chain, specificity, guard)) => {
                crate::metrics::dispatch(listener.name(), crate::metrics::MATCHED).inc();
                tracing::trace!(
                    listener = %listener.name(),
                    chain = %chain.name(),
                    source = %info.source,
                    %destination,
                    ?specificity,
                    "dispatched connection"
                );

                DispatchOutcome::Matched(Binding {
                    chain,
                    specificity,
                    source: info.source,
                    destination,
                    server_name: info.server_name.clone(),
                    guard,
                })
            }
            None => {
                crate::metrics::dispatch(listener.name(), crate::metrics::NO_MATCH).inc();
                tracing::debug!(
                    listener = %listener.name(),
                    source = %info.source,
                    %destination,
                    server_name = ?info.server_name,
                    "no filter chain matched connection"
                );

                DispatchOutcome::NoMatch {
                    listener: Some(listener.name().clone()),
                }
            }
        }
    }

    /// Picks the listener whose chains the connection is matched against,
    /// and the destination it's matched with.
    fn resolve(
        snapshot: &Snapshot,
        accepting: &Arc<ListenerInstance>,
        info: &ConnectionInfo,
    ) -> (Arc<ListenerInstance>, SocketAddr) {
        if !accepting.config().use_original_dst {
            return (accepting.clone(), info.local);
        }

        let Some(original) = info.original_destination else {
            crate::metrics::original_dst_fallback(accepting.name()).inc();
            tracing::debug!(
                listener = %accepting.name(),
                source = %info.source,
                "original destination unavailable, dispatching on accepting listener"
            );
            return (accepting.clone(), info.local);
        };

        if original == info.local {
            return (accepting.clone(), original);
        }

        match snapshot.lookup(original) {
            Some(owner) => (owner.clone(), original),
            None => (accepting.clone(), original),
        }
    }
}

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

//! The process-wide set of listeners.
//!
//! Every update builds a complete [`Snapshot`] off to the side and publishes
//! it with a single pointer swap, so the dispatch path always observes either
//! the previous or the next set of listeners and never a mix of both.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tokio::sync::watch;

use super::{
    config::{DrainType, Listener},
    error::ConfigError,
    instance::{ListenerInstance, State},
    table::FilterChainTable,
};

/// The maximum length of a listener name, unless configured otherwise.
pub const DEFAULT_MAX_NAME_LENGTH: usize = 60;

/// Limits applied to every listener update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    pub max_name_length: usize,
    /// How long a draining listener waits for its connections to close
    /// before closing them forcibly. Unbounded when `None`.
    pub drain_timeout: Option<Duration>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_name_length: DEFAULT_MAX_NAME_LENGTH,
            drain_timeout: None,
        }
    }
}

/// An immutable generation of the active listener set.
#[derive(Debug, Default)]
pub struct Snapshot {
    generation: u64,
    listeners: BTreeMap<Arc<str>, Arc<ListenerInstance>>,
    by_address: HashMap<SocketAddr, Arc<ListenerInstance>>,
}

impl Snapshot {
    fn new(generation: u64, listeners: BTreeMap<Arc<str>, Arc<ListenerInstance>>) -> Self {
        let by_address = listeners
            .values()
            .map(|instance| {
                let address = instance.address();
                (
                    SocketAddr::new(address.ip().to_canonical(), address.port()),
                    instance.clone(),
                )
            })
            .collect();

        Self {
            generation,
            listeners,
            by_address,
        }
    }

    /// Incremented by every change to the listener set.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ListenerInstance>> {
        self.listeners.get(name)
    }

    /// Finds the active listener bound to `address`, or failing that the one
    /// bound to the unspecified address of the same port.
    pub fn lookup(&self, address: SocketAddr) -> Option<&Arc<ListenerInstance>> {
        let address = SocketAddr::new(address.ip().to_canonical(), address.port());
        let port = address.port();

        [
            address,
            SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
            SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port),
        ]
        .iter()
        .filter_map(|address| self.by_address.get(address))
        .find(|instance| instance.is_active())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ListenerInstance>> + '_ {
        self.listeners.values()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    fn without(&self, generation: u64, removed: &HashSet<Arc<str>>) -> Self {
        Self::new(
            generation,
            self.listeners
                .iter()
                .filter(|(name, _)| !removed.contains(*name))
                .map(|(name, instance)| (name.clone(), instance.clone()))
                .collect(),
        )
    }
}

/// What an accepted update changed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UpdateSummary {
    pub generation: u64,
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub unchanged: Vec<String>,
    pub removed: Vec<String>,
}

/// The active listeners of the process, keyed by name, and the instances
/// still draining.
pub struct ListenerRegistry {
    snapshot: ArcSwap<Snapshot>,
    /// Serializes writers, readers never take it.
    update: Mutex<()>,
    draining: Mutex<Vec<Arc<ListenerInstance>>>,
    changes: watch::Sender<u64>,
    settings: Settings,
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

impl ListenerRegistry {
    pub fn new(settings: Settings) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(Snapshot::default()),
            update: Mutex::new(()),
            draining: Mutex::new(Vec::new()),
            changes: watch::channel(0).0,
            settings,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The current generation of active listeners.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.load_full()
    }

    pub fn get(&self, name: &str) -> Option<Arc<ListenerInstance>> {
        self.snapshot.load().get(name).cloned()
    }

    pub fn lookup(&self, address: SocketAddr) -> Option<Arc<ListenerInstance>> {
        self.snapshot.load().lookup(address).cloned()
    }

    /// Notifies of the generation of every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// The instances which stopped accepting and still have connections.
    pub fn draining(&self) -> Vec<Arc<ListenerInstance>> {
        let mut draining = self.draining.lock();
        draining.retain(|instance| instance.state() != State::Retired);
        draining.clone()
    }

    /// Replaces the whole listener set with `listeners`.
    ///
    /// Listeners whose configuration is unchanged keep serving untouched.
    /// Listeners which were removed or modified drain, while their modified
    /// replacements accept new connections right away. If any listener is
    /// invalid the whole update is rejected, and the current set keeps
    /// serving.
    pub fn replace(&self, listeners: Vec<Listener>) -> Result<UpdateSummary, ConfigError> {
        let _update = self.update.lock();
        let current = self.snapshot.load_full();

        let (next, summary) = match self.prepare(&current, listeners) {
            Ok(prepared) => prepared,
            Err(error) => {
                crate::metrics::listener_updates(crate::metrics::REJECTED).inc();
                tracing::warn!(%error, generation = current.generation, "rejected listener update");
                return Err(error);
            }
        };

        let displaced: Vec<_> = current
            .iter()
            .filter(|instance| {
                next.get(instance.name())
                    .map_or(true, |next| !Arc::ptr_eq(next, instance))
            })
            .cloned()
            .collect();

        for instance in next.iter() {
            if current
                .get(instance.name())
                .map_or(true, |current| !Arc::ptr_eq(current, instance))
            {
                crate::metrics::listeners(State::Active).inc();
            }
        }

        self.publish(next);
        self.drain_instances(displaced);

        crate::metrics::listener_updates(crate::metrics::ACCEPTED).inc();
        tracing::info!(
            generation = summary.generation,
            added = ?summary.added,
            modified = ?summary.modified,
            removed = ?summary.removed,
            unchanged = summary.unchanged.len(),
            "applied listener update"
        );

        Ok(summary)
    }

    fn prepare(
        &self,
        current: &Snapshot,
        listeners: Vec<Listener>,
    ) -> Result<(Snapshot, UpdateSummary), ConfigError> {
        let mut summary = UpdateSummary {
            generation: current.generation + 1,
            ..<_>::default()
        };
        let mut next = BTreeMap::new();
        let mut addresses: HashMap<SocketAddr, Arc<str>> = HashMap::new();

        for listener in listeners {
            let name: Arc<str> = if listener.name.is_empty() {
                // an unnamed listener keeps its generated name for as long as
                // its configuration doesn't change.
                current
                    .iter()
                    .find(|existing| existing.config() == &listener && existing.is_active())
                    .map(|existing| existing.name().clone())
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string().into())
            } else {
                listener.name.as_str().into()
            };

            if name.chars().count() > self.settings.max_name_length {
                return Err(ConfigError::NameTooLong {
                    name: name.to_string(),
                    max: self.settings.max_name_length,
                });
            }

            if next.contains_key(&name) {
                return Err(ConfigError::DuplicateName(name.to_string()));
            }

            let address = listener
                .address
                .map(|address| SocketAddr::new(address.ip().to_canonical(), address.port()))
                .ok_or_else(|| ConfigError::MissingAddress {
                    listener: name.to_string(),
                })?;
            if let Some(first) = addresses.insert(address, name.clone()) {
                return Err(ConfigError::DuplicateAddress {
                    address,
                    first: first.to_string(),
                    second: name.to_string(),
                });
            }

            let instance = match current.get(&name) {
                Some(existing) if existing.config() == &listener && existing.is_active() => {
                    summary.unchanged.push(name.to_string());
                    existing.clone()
                }
                existing => {
                    let table = FilterChainTable::build(&name, &listener.filter_chains)?;
                    if existing.is_some() {
                        summary.modified.push(name.to_string());
                    } else {
                        summary.added.push(name.to_string());
                    }
                    Arc::new(ListenerInstance::new(name.clone(), listener, address, table))
                }
            };

            next.insert(name, instance);
        }

        summary.removed = current
            .listeners
            .keys()
            .filter(|name| !next.contains_key(*name))
            .map(|name| name.to_string())
            .collect();

        Ok((Snapshot::new(summary.generation, next), summary))
    }

    /// Stops `name` from accepting new connections, letting its existing
    /// connections finish. Returns `false` if there's no such active
    /// listener.
    pub fn drain(&self, name: &str) -> bool {
        let _update = self.update.lock();
        let current = self.snapshot.load_full();

        let Some(instance) = current.get(name).cloned() else {
            return false;
        };

        let removed = HashSet::from([instance.name().clone()]);
        self.publish(current.without(current.generation + 1, &removed));
        self.drain_instances(vec![instance]);
        true
    }

    /// Drains every listener with [`DrainType::Default`], as the proxy is
    /// about to be taken out of rotation. Returns the names of the drained
    /// listeners.
    pub fn fail_health_check(&self) -> Vec<String> {
        let _update = self.update.lock();
        let current = self.snapshot.load_full();

        let drained: Vec<_> = current
            .iter()
            .filter(|instance| instance.config().drain_type == DrainType::Default)
            .cloned()
            .collect();

        if drained.is_empty() {
            return Vec::new();
        }

        let removed: HashSet<_> = drained.iter().map(|instance| instance.name().clone()).collect();
        self.publish(current.without(current.generation + 1, &removed));

        let names: Vec<String> = drained
            .iter()
            .map(|instance| instance.name().to_string())
            .collect();
        tracing::warn!(listeners = ?names, "health check failed, draining listeners");
        self.drain_instances(drained);
        names
    }

    /// Aborts every drain and closes every connection, leaving the registry
    /// empty.
    pub fn shutdown(&self) {
        let _update = self.update.lock();
        let current = self.snapshot.load_full();

        self.publish(Snapshot::new(current.generation + 1, BTreeMap::new()));

        let draining = std::mem::take(&mut *self.draining.lock());
        let closed: usize = current
            .iter()
            .chain(draining.iter())
            .map(|instance| instance.force_retire())
            .sum();

        tracing::info!(closed, "listener registry shut down");
    }

    fn publish(&self, snapshot: Snapshot) {
        let generation = snapshot.generation;
        self.snapshot.store(Arc::new(snapshot));
        self.changes.send_replace(generation);
    }

    fn drain_instances(&self, instances: Vec<Arc<ListenerInstance>>) {
        let mut draining = self.draining.lock();
        draining.retain(|instance| instance.state() != State::Retired);

        for instance in instances {
            instance.begin_drain(self.settings.drain_timeout);
            if instance.state() != State::Retired {
                draining.push(instance);
            }
        }
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("snapshot", &self.snapshot.load())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

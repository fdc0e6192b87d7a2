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

//! Common utilities for testing

use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::{Arc, Once},
    time::Duration,
};

use tokio::{net::TcpStream, task::JoinHandle};
use tracing_subscriber::EnvFilter;

use crate::{
    filters::{prelude::*, Echo, FilterRegistry},
    listener::{Filter as FilterConfig, FilterChain, Listener, ListenerRegistry},
    server::Server,
    signal::{ShutdownKind, ShutdownTx},
};

static LOG_ONCE: Once = Once::new();

/// Call to safely enable logging calls with a given tracing env filter, e.g. "switchyard=debug"
/// This can be very useful when attempting to debug unit and integration tests.
pub fn enable_log(filter: impl Into<EnvFilter>) {
    LOG_ONCE.call_once(|| {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(filter)
            .init()
    });
}

/// Returns a local address on a port that is not assigned to another test.
pub fn available_addr() -> SocketAddr {
    let socket = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let addr = socket.local_addr().unwrap();

    tracing::debug!(addr = ?addr, "test::available_addr");
    addr
}

// TestFilter is useful for testing that connections are run through their filters.
pub struct TestFilter;

#[async_trait::async_trait]
impl Filter for TestFilter {
    async fn on_new_connection(&self, ctx: &mut ConnectionContext) -> Result<(), FilterError> {
        ctx.metadata
            .insert("test.events".into(), serde_json::json!("connect"));
        Ok(())
    }

    async fn on_data(&self, ctx: &mut ConnectionContext) -> Result<(), FilterError> {
        // append values on each run
        ctx.contents.extend_from_slice(b":odr");
        Ok(())
    }
}

impl StaticFilter for TestFilter {
    const NAME: &'static str = "TestFilter";
    type Configuration = ();

    fn try_from_config(_: Option<Self::Configuration>) -> Result<Self, CreationError> {
        Ok(Self)
    }
}

/// Adds [`TestFilter`] to the filter registry.
pub fn load_test_filters() {
    FilterRegistry::register([TestFilter::factory()]);
}

/// A listener named `name` on `127.0.0.1:port`.
pub fn listener(name: &str, port: u16, filter_chains: Vec<FilterChain>) -> Listener {
    Listener {
        filter_chains,
        ..Listener::new(name, (Ipv4Addr::LOCALHOST, port).into())
    }
}

/// A chain named `name` that matches everything and echoes.
pub fn echo_chain(name: &str) -> FilterChain {
    FilterChain::named(name).with_filter(FilterConfig::new(Echo::NAME))
}

/// Builds a single record TLS ClientHello, with a server name extension
/// when `server_name` is set.
pub fn client_hello(server_name: Option<&str>) -> Vec<u8> {
    let mut extensions = Vec::new();
    if let Some(name) = server_name {
        let name = name.as_bytes();

        let mut names = vec![0x00];
        names.extend((name.len() as u16).to_be_bytes());
        names.extend(name);

        extensions.extend(0u16.to_be_bytes());
        extensions.extend((names.len() as u16 + 2).to_be_bytes());
        extensions.extend((names.len() as u16).to_be_bytes());
        extensions.extend(names);
    }

    // version, random, session id, one cipher suite, null compression
    let mut hello = vec![0x03, 0x03];
    hello.extend([0x5a; 32]);
    hello.push(0);
    hello.extend([0x00, 0x02, 0x13, 0x01]);
    hello.extend([0x01, 0x00]);
    hello.extend((extensions.len() as u16).to_be_bytes());
    hello.extend(extensions);

    let mut handshake = vec![0x01];
    handshake.extend(&(hello.len() as u32).to_be_bytes()[1..]);
    handshake.extend(hello);

    let mut record = vec![0x16, 0x03, 0x01];
    record.extend((handshake.len() as u16).to_be_bytes());
    record.extend(handshake);
    record
}

/// Connects to `addr`, retrying while the server is still binding it.
pub async fn connect(addr: SocketAddr) -> TcpStream {
    let mut attempts = 0;
    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => return stream,
            Err(error) if attempts < 100 => {
                tracing::trace!(%error, %addr, "retrying connection");
                attempts += 1;
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Err(error) => panic!("failed to connect to {addr}: {error}"),
        }
    }
}

/// A [`Server`] running in the background, shut down when dropped.
pub struct TestServer {
    pub registry: Arc<ListenerRegistry>,
    shutdown_tx: ShutdownTx,
    task: Option<JoinHandle<crate::Result<()>>>,
}

impl TestServer {
    pub fn spawn(listeners: Vec<Listener>) -> Self {
        let registry = Arc::new(ListenerRegistry::default());
        registry.replace(listeners).unwrap();

        let (shutdown_tx, shutdown_rx) = crate::signal::channel(ShutdownKind::Testing);
        let task = tokio::spawn(Server::new(registry.clone()).run(shutdown_rx));

        Self {
            registry,
            shutdown_tx,
            task: Some(task),
        }
    }

    /// Stops the server and waits for it to exit.
    pub async fn shutdown(mut self) {
        self.shutdown_tx.send(ShutdownKind::Testing).ok();
        if let Some(task) = self.task.take() {
            task.await.unwrap().unwrap();
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown_tx
            .send(ShutdownKind::Testing)
            .map_err(|error| {
                tracing::warn!(
                    %error,
                    "Failed to send server shutdown over channel"
                )
            })
            .ok();
    }
}

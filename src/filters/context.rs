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

use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use bytes::BytesMut;

/// The state of a connection handed to each [`Filter`][crate::filters::Filter]
/// of its chain.
#[derive(Debug)]
#[non_exhaustive]
pub struct ConnectionContext {
    /// The downstream peer.
    pub source: SocketAddr,
    /// The destination the connection was dispatched on.
    pub destination: SocketAddr,
    /// The server name presented in the TLS ClientHello, if any.
    pub server_name: Option<String>,
    /// The listener the connection is bound to.
    pub listener: Arc<str>,
    /// The filter chain the connection is bound to.
    pub chain: Arc<str>,
    /// Data read from the downstream peer and not yet consumed.
    pub contents: BytesMut,
    /// Data to send to the downstream peer once the chain has run.
    pub response: BytesMut,
    /// Arbitrary values shared between the filters of the chain.
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ConnectionContext {
    pub fn new(
        source: SocketAddr,
        destination: SocketAddr,
        listener: Arc<str>,
        chain: Arc<str>,
    ) -> Self {
        Self {
            source,
            destination,
            server_name: None,
            listener,
            chain,
            contents: BytesMut::new(),
            response: BytesMut::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_server_name(mut self, server_name: Option<String>) -> Self {
        self.server_name = server_name;
        self
    }

    /// Takes everything queued for the downstream peer.
    pub fn take_response(&mut self) -> bytes::Bytes {
        self.response.split().freeze()
    }
}

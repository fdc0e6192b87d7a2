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

//! The listener configuration surface, as delivered by a discovery update or
//! read from the configuration file.

use std::net::{IpAddr, SocketAddr};

use ipnetwork::IpNetwork;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The buffer limit applied when a listener doesn't configure one.
pub const DEFAULT_BUFFER_LIMIT_BYTES: u32 = 1024 * 1024;

fn default_buffer_limit() -> u32 {
    DEFAULT_BUFFER_LIMIT_BYTES
}

/// A bound network endpoint accepting connections, owning one or more
/// [`FilterChain`]s.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Listener {
    /// Unique name within a configuration generation. Assigned by the proxy
    /// when left empty.
    #[serde(default)]
    pub name: String,
    /// The address the listener binds to.
    #[serde(default)]
    pub address: Option<SocketAddr>,
    /// The filter chains of the listener. Declaration order only decides
    /// between chains that are equally specific for a connection.
    #[serde(default)]
    pub filter_chains: Vec<FilterChain>,
    /// Whether connections redirected to this listener should be dispatched
    /// using their original destination address.
    #[serde(default)]
    pub use_original_dst: bool,
    /// The read buffer size limit for each connection, `0` means the default.
    #[serde(default = "default_buffer_limit")]
    pub per_connection_buffer_limit_bytes: u32,
    #[serde(default)]
    pub drain_type: DrainType,
    /// Whether to peek at the TLS ClientHello of new connections to learn
    /// their server name before dispatching them.
    #[serde(default)]
    pub inspect_server_name: bool,
}

impl Listener {
    /// Creates a listener named `name` bound to `address`, without any
    /// filter chains.
    pub fn new(name: impl Into<String>, address: SocketAddr) -> Self {
        Self {
            name: name.into(),
            address: Some(address),
            filter_chains: Vec::new(),
            use_original_dst: false,
            per_connection_buffer_limit_bytes: DEFAULT_BUFFER_LIMIT_BYTES,
            drain_type: DrainType::default(),
            inspect_server_name: false,
        }
    }

    pub fn with_filter_chain(mut self, chain: FilterChain) -> Self {
        self.filter_chains.push(chain);
        self
    }

    pub fn buffer_limit(&self) -> usize {
        match self.per_connection_buffer_limit_bytes {
            0 => DEFAULT_BUFFER_LIMIT_BYTES as usize,
            limit => limit as usize,
        }
    }
}

/// Which events cause a listener to drain.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq, Hash, JsonSchema)]
pub enum DrainType {
    /// Drain on removal or modification, and when the proxy fails its
    /// health check.
    #[default]
    #[serde(rename = "DEFAULT")]
    Default,
    /// Drain only on removal or modification.
    #[serde(rename = "MODIFY_ONLY")]
    ModifyOnly,
}

/// An ordered sequence of filters, the criteria a connection must meet to be
/// handled by them, and the transport socket they run on top of.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct FilterChain {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Absent criteria match every connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_chain_match: Option<FilterChainMatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport_socket: Option<TransportSocket>,
    /// Filters process connection events in exactly this order.
    #[serde(default)]
    pub filters: Vec<Filter>,
    /// Carried through to the connection's binding uninterpreted. The
    /// engine never parses a PROXY protocol header itself, so a chain
    /// setting this needs a filter that does.
    #[serde(default)]
    pub use_proxy_proto: bool,
}

impl FilterChain {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_match(mut self, filter_chain_match: FilterChainMatch) -> Self {
        self.filter_chain_match = Some(filter_chain_match);
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_transport_socket(mut self, transport_socket: TransportSocket) -> Self {
        self.transport_socket = Some(transport_socket);
        self
    }

    /// The name used to refer to the chain in errors and logs, the chain's
    /// position is used for unnamed chains.
    pub fn display_name(&self, index: usize) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("#{index}"))
    }
}

/// Criteria a connection has to satisfy for a [`FilterChain`] to be selected.
/// Every criterion is optional, and an absent criterion doesn't constrain the
/// connection.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct FilterChainMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_port: Option<u16>,
    /// Destination CIDR ranges, either address family.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schemars(with = "Vec<String>")]
    pub prefix_ranges: Vec<IpNetwork>,
    /// Matches the low-order [`Self::suffix_len`] bits of the destination
    /// address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_suffix: Option<IpAddr>,
    /// Number of bits of [`Self::address_suffix`] to compare, the full
    /// address width when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffix_len: Option<u8>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schemars(with = "Vec<String>")]
    pub source_prefix_ranges: Vec<IpNetwork>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_ports: Vec<u16>,
    /// Exact host names, or a single leading wildcard label such as
    /// `*.example.com`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub server_names: Vec<String>,
}

impl FilterChainMatch {
    /// Returns `true` when no criterion is set.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// A network filter and its opaque configuration.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Filter {
    /// The name of a registered filter type.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
}

impl Filter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: None,
        }
    }
}

/// The transport socket selected alongside a filter chain. Its configuration
/// is handed to the transport layer as is.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct TransportSocket {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
}

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

use std::net::SocketAddr;

use crate::filters::CreationError;

/// A listener update that can't be activated. Fatal to the update that
/// carried it, never to the process.
#[derive(Debug, Eq, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("listener `{listener}`: address is required")]
    MissingAddress { listener: String },
    #[error("listener `{listener}`: at least one filter chain is required")]
    NoFilterChains { listener: String },
    #[error("listener name `{name}` is longer than the maximum of {max} characters")]
    NameTooLong { name: String, max: usize },
    #[error("listener `{0}` is defined more than once")]
    DuplicateName(String),
    #[error("listeners `{first}` and `{second}` both bind {address}")]
    DuplicateAddress {
        address: SocketAddr,
        first: String,
        second: String,
    },
    #[error("listener `{listener}`: filter chain `{chain}` contains a filter without a name")]
    EmptyFilterName { listener: String, chain: String },
    #[error(
        "listener `{listener}`: filter chain `{chain}` runs {found:?}, but the listener's other chains run {expected:?}"
    )]
    HeterogeneousFilters {
        listener: String,
        chain: String,
        expected: Vec<String>,
        found: Vec<String>,
    },
    #[error(
        "listener `{listener}`: filter chains `{first}` and `{second}` have identical match criteria"
    )]
    AmbiguousMatch {
        listener: String,
        first: String,
        second: String,
    },
    #[error("listener `{listener}`: filter chain `{chain}`: invalid server name `{pattern}`: {reason}")]
    InvalidServerName {
        listener: String,
        chain: String,
        pattern: String,
        reason: &'static str,
    },
    #[error("listener `{listener}`: filter chain `{chain}`: invalid address suffix: {reason}")]
    InvalidAddressSuffix {
        listener: String,
        chain: String,
        reason: String,
    },
    #[error("listener `{listener}`: filter chain `{chain}`: {source}")]
    Filter {
        listener: String,
        chain: String,
        #[source]
        source: CreationError,
    },
}

impl ConfigError {
    /// A short, stable identifier for the kind of error, used as a metric label.
    pub fn discriminant(&self) -> &'static str {
        match self {
            Self::MissingAddress { .. } => "missing_address",
            Self::NoFilterChains { .. } => "no_filter_chains",
            Self::NameTooLong { .. } => "name_too_long",
            Self::DuplicateName(_) => "duplicate_name",
            Self::DuplicateAddress { .. } => "duplicate_address",
            Self::EmptyFilterName { .. } => "empty_filter_name",
            Self::HeterogeneousFilters { .. } => "heterogeneous_filters",
            Self::AmbiguousMatch { .. } => "ambiguous_match",
            Self::InvalidServerName { .. } => "invalid_server_name",
            Self::InvalidAddressSuffix { .. } => "invalid_address_suffix",
            Self::Filter { .. } => "filter",
        }
    }
}

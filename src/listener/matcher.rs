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

//! Predicates testing a single connection attribute against a single filter
//! chain criterion. Everything here is pure and non-blocking, as it runs on
//! the accept path of every connection.

use std::{net::IpAddr, str::FromStr};

use ipnetwork::{IpNetwork, Ipv4Network};

/// The outcome of testing one attribute against one criterion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchResult<T> {
    /// The criterion isn't configured, so it doesn't constrain the connection.
    NoRule,
    /// The criterion is configured and satisfied, with how precisely.
    Matched(T),
    /// The criterion is configured and not satisfied.
    Failed,
}

impl<T> MatchResult<T> {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

/// How a server name criterion was satisfied. Exact matches are more
/// specific than wildcard ones, longer wildcard suffixes more specific than
/// shorter ones.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ServerNameMatch {
    Wildcard { suffix_len: usize },
    Exact,
}

/// A parsed `server_names` entry.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ServerNamePattern {
    /// A lowercase host name.
    Exact(String),
    /// The lowercase suffix of a `*.suffix` pattern.
    Wildcard(String),
}

impl FromStr for ServerNamePattern {
    type Err = &'static str;

    fn from_str(pattern: &str) -> Result<Self, Self::Err> {
        if pattern.is_empty() {
            return Err("server name is empty");
        }

        let (wildcard, name) = match pattern.strip_prefix("*.") {
            Some(suffix) => (true, suffix),
            None => (false, pattern),
        };

        if name.contains('*') {
            return Err("only a single leading `*.` wildcard label is supported");
        }

        if name.is_empty() || name.split('.').any(str::is_empty) {
            return Err("server name contains an empty label");
        }

        let name = name.to_ascii_lowercase();
        Ok(if wildcard {
            Self::Wildcard(name)
        } else {
            Self::Exact(name)
        })
    }
}

impl ServerNamePattern {
    /// Returns how `server_name` satisfies the pattern, if it does.
    ///
    /// # Examples
    /// ```
    /// use switchyard::listener::matcher::{ServerNameMatch, ServerNamePattern};
    ///
    /// let pattern: ServerNamePattern = "*.example.com".parse().unwrap();
    /// assert!(pattern.matches("a.example.com").is_some());
    /// assert!(pattern.matches("A.Example.COM").is_some());
    /// assert!(pattern.matches("b.a.example.com").is_none());
    /// assert!(pattern.matches("example.com").is_none());
    ///
    /// let pattern: ServerNamePattern = "a.example.com".parse().unwrap();
    /// assert_eq!(Some(ServerNameMatch::Exact), pattern.matches("A.example.com"));
    /// ```
    pub fn matches(&self, server_name: &str) -> Option<ServerNameMatch> {
        match self {
            Self::Exact(name) => server_name
                .eq_ignore_ascii_case(name)
                .then_some(ServerNameMatch::Exact),
            Self::Wildcard(suffix) => server_name
                .split_once('.')
                .filter(|(label, rest)| !label.is_empty() && rest.eq_ignore_ascii_case(suffix))
                .map(|_| ServerNameMatch::Wildcard {
                    suffix_len: suffix.len(),
                }),
        }
    }
}

/// Tests the negotiated server name against a chain's `server_names`.
/// A connection without a server name fails any non-empty list.
pub fn server_names(
    patterns: &[ServerNamePattern],
    server_name: Option<&str>,
) -> MatchResult<ServerNameMatch> {
    if patterns.is_empty() {
        return MatchResult::NoRule;
    }

    let Some(server_name) = server_name else {
        return MatchResult::Failed;
    };

    patterns
        .iter()
        .filter_map(|pattern| pattern.matches(server_name))
        .max()
        .map_or(MatchResult::Failed, MatchResult::Matched)
}

/// Returns whether `ip` falls within `network`. Addresses of the other
/// family never do.
pub fn contains(network: &IpNetwork, ip: IpAddr) -> bool {
    match (network, ip) {
        (IpNetwork::V4(network), IpAddr::V4(ip)) => network.contains(ip),
        (IpNetwork::V6(network), IpAddr::V6(ip)) => network.contains(ip),
        _ => false,
    }
}

/// Rewrites a range within `::ffff:0:0/96` as the IPv4 range it maps, as
/// connection addresses are matched in their canonical form.
pub fn canonical_network(network: IpNetwork) -> IpNetwork {
    let IpNetwork::V6(v6) = network else {
        return network;
    };

    match v6.network().to_ipv4_mapped() {
        Some(ip) if v6.prefix() >= 96 => Ipv4Network::new(ip, v6.prefix() - 96)
            .map(IpNetwork::V4)
            .unwrap_or(network),
        _ => network,
    }
}

/// Tests `ip` against a list of CIDR ranges, matching with the longest
/// prefix length among the ranges containing it.
pub fn prefix_ranges(ranges: &[IpNetwork], ip: IpAddr) -> MatchResult<u8> {
    if ranges.is_empty() {
        return MatchResult::NoRule;
    }

    ranges
        .iter()
        .filter(|range| contains(range, ip))
        .map(IpNetwork::prefix)
        .max()
        .map_or(MatchResult::Failed, MatchResult::Matched)
}

/// Bit width of an address of `ip`'s family.
pub fn address_width(ip: IpAddr) -> u8 {
    match ip {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

fn low_bits(ip: IpAddr, bits: u8) -> u128 {
    let value = match ip {
        IpAddr::V4(ip) => u128::from(u32::from(ip)),
        IpAddr::V6(ip) => u128::from(ip),
    };

    let mask = if bits >= 128 {
        u128::MAX
    } else {
        (1u128 << bits) - 1
    };

    value & mask
}

/// The low-order bits a destination address must end with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AddressSuffix {
    address: IpAddr,
    bits: u8,
}

impl AddressSuffix {
    /// Compares the low `bits` bits of `address`, or all of them when `bits`
    /// is `None`.
    pub fn new(address: IpAddr, bits: Option<u8>) -> Result<Self, String> {
        let width = address_width(address);
        let bits = bits.unwrap_or(width);

        if bits > width {
            return Err(format!(
                "suffix length {bits} exceeds the {width} bits of {address}"
            ));
        }

        // mapped addresses are compared as the IPv4 address they carry.
        match address {
            IpAddr::V6(v6) if v6.to_ipv4_mapped().is_some() => Ok(Self {
                address: address.to_canonical(),
                bits: bits.min(32),
            }),
            _ => Ok(Self { address, bits }),
        }
    }

    pub fn bits(&self) -> u8 {
        self.bits
    }

    /// Returns `true` if the low-order bits of `ip` equal the suffix's. An
    /// address of the other family never matches.
    pub fn matches(&self, ip: IpAddr) -> bool {
        if address_width(ip) != address_width(self.address) {
            return false;
        }

        low_bits(ip, self.bits) == low_bits(self.address, self.bits)
    }

    /// The suffix with every bit above [`Self::bits`] cleared, used to compare
    /// criteria for equality.
    pub fn normalized(&self) -> (u8, u128, u8) {
        (
            address_width(self.address),
            low_bits(self.address, self.bits),
            self.bits,
        )
    }
}

pub fn address_suffix(suffix: Option<&AddressSuffix>, ip: IpAddr) -> MatchResult<u8> {
    match suffix {
        None => MatchResult::NoRule,
        Some(suffix) if suffix.matches(ip) => MatchResult::Matched(suffix.bits()),
        Some(_) => MatchResult::Failed,
    }
}

pub fn destination_port(expected: Option<u16>, port: u16) -> MatchResult<()> {
    match expected {
        None => MatchResult::NoRule,
        Some(expected) if expected == port => MatchResult::Matched(()),
        Some(_) => MatchResult::Failed,
    }
}

/// Tests `port` for membership in `ports`, matching with the size of the
/// set so narrower sets can rank above wider ones.
pub fn source_ports(ports: &[u16], port: u16) -> MatchResult<usize> {
    if ports.is_empty() {
        MatchResult::NoRule
    } else if ports.contains(&port) {
        MatchResult::Matched(ports.len())
    } else {
        MatchResult::Failed
    }
}

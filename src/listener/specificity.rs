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

//! Ranking of filter chains by how precisely their criteria match a
//! connection.
//!
//! Every candidate chain is assigned a [`Specificity`], a tuple compared
//! field by field in declaration order:
//!
//! 1. server name: exact, then wildcard by suffix length, then none.
//! 2. destination address: longest prefix range, then longest suffix.
//! 3. source address: longest prefix range.
//! 4. ports: destination port, then the narrowest source port set.
//!
//! Criteria which are absent contribute nothing, so a chain without any
//! criteria matches everything with the lowest possible specificity.

use std::{
    cmp::Reverse,
    hash::{Hash, Hasher},
    net::{IpAddr, SocketAddr},
};

use ipnetwork::IpNetwork;

use super::{
    config::FilterChainMatch,
    error::ConfigError,
    matcher::{self, AddressSuffix, MatchResult, ServerNameMatch, ServerNamePattern},
};

/// The attributes of a connection observed at accept time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Attributes<'a> {
    pub server_name: Option<&'a str>,
    pub source: SocketAddr,
    pub destination: SocketAddr,
}

impl<'a> Attributes<'a> {
    pub fn new(source: SocketAddr, destination: SocketAddr) -> Self {
        Self {
            server_name: None,
            source,
            destination,
        }
    }

    pub fn with_server_name(mut self, server_name: impl Into<Option<&'a str>>) -> Self {
        self.server_name = server_name.into();
        self
    }

    fn source_ip(&self) -> IpAddr {
        self.source.ip().to_canonical()
    }

    fn destination_ip(&self) -> IpAddr {
        self.destination.ip().to_canonical()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DestinationRank {
    pub prefix_len: Option<u8>,
    pub suffix_len: Option<u8>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortRank {
    pub destination_port: bool,
    /// Smaller sets rank higher.
    pub source_ports: Option<Reverse<usize>>,
}

/// How precisely a chain's criteria matched a connection. Higher is more
/// specific; the default value is the rank of a chain without criteria.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Specificity {
    pub server_name: Option<ServerNameMatch>,
    pub destination: Option<DestinationRank>,
    pub source: Option<u8>,
    pub ports: PortRank,
}

/// Converts a [`MatchResult`] into the rank contribution of the criterion,
/// returning `None` from the enclosing function when it failed.
macro_rules! rank {
    ($result:expr) => {
        match $result {
            MatchResult::NoRule => None,
            MatchResult::Matched(rank) => Some(rank),
            MatchResult::Failed => return None,
        }
    };
}

/// A [`FilterChainMatch`] validated and prepared for evaluation.
#[derive(Clone, Debug, Default)]
pub struct Criteria {
    server_names: Vec<ServerNamePattern>,
    prefix_ranges: Vec<IpNetwork>,
    address_suffix: Option<AddressSuffix>,
    source_prefix_ranges: Vec<IpNetwork>,
    source_ports: Vec<u16>,
    destination_port: Option<u16>,
}

impl Criteria {
    /// Validates `config`, `listener` and `chain` only name the owner in
    /// errors.
    pub fn compile(
        config: Option<&FilterChainMatch>,
        listener: &str,
        chain: &str,
    ) -> Result<Self, ConfigError> {
        let Some(config) = config else {
            return Ok(Self::default());
        };

        let mut server_names = config
            .server_names
            .iter()
            .map(|pattern| {
                pattern
                    .parse::<ServerNamePattern>()
                    .map_err(|reason| ConfigError::InvalidServerName {
                        listener: listener.into(),
                        chain: chain.into(),
                        pattern: pattern.clone(),
                        reason,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        server_names.sort();
        server_names.dedup();

        let address_suffix = match config.address_suffix {
            Some(address) => Some(AddressSuffix::new(address, config.suffix_len).map_err(
                |reason| ConfigError::InvalidAddressSuffix {
                    listener: listener.into(),
                    chain: chain.into(),
                    reason,
                },
            )?),
            None if config.suffix_len.is_some() => {
                return Err(ConfigError::InvalidAddressSuffix {
                    listener: listener.into(),
                    chain: chain.into(),
                    reason: "`suffix_len` is set without an `address_suffix`".into(),
                })
            }
            None => None,
        };

        let mut source_ports = config.source_ports.clone();
        source_ports.sort_unstable();
        source_ports.dedup();

        Ok(Self {
            server_names,
            prefix_ranges: normalize_ranges(&config.prefix_ranges),
            address_suffix,
            source_prefix_ranges: normalize_ranges(&config.source_prefix_ranges),
            source_ports,
            destination_port: config.destination_port,
        })
    }

    /// Returns the chain's specificity for a connection with `attributes`,
    /// or `None` if any configured criterion isn't met.
    pub fn evaluate(&self, attributes: &Attributes) -> Option<Specificity> {
        let destination = attributes.destination_ip();
        let source = attributes.source_ip();

        let server_name = rank!(matcher::server_names(
            &self.server_names,
            attributes.server_name
        ));
        let prefix_len = rank!(matcher::prefix_ranges(&self.prefix_ranges, destination));
        let suffix_len = rank!(matcher::address_suffix(
            self.address_suffix.as_ref(),
            destination
        ));
        let source_prefix_len = rank!(matcher::prefix_ranges(&self.source_prefix_ranges, source));
        let destination_port = rank!(matcher::destination_port(
            self.destination_port,
            attributes.destination.port()
        ));
        let source_ports = rank!(matcher::source_ports(
            &self.source_ports,
            attributes.source.port()
        ));

        Some(Specificity {
            server_name,
            destination: (prefix_len.is_some() || suffix_len.is_some()).then_some(
                DestinationRank {
                    prefix_len,
                    suffix_len,
                },
            ),
            source: source_prefix_len,
            ports: PortRank {
                destination_port: destination_port.is_some(),
                source_ports: source_ports.map(Reverse),
            },
        })
    }

    pub fn is_empty(&self) -> bool {
        self.server_names.is_empty()
            && self.prefix_ranges.is_empty()
            && self.address_suffix.is_none()
            && self.source_prefix_ranges.is_empty()
            && self.source_ports.is_empty()
            && self.destination_port.is_none()
    }

    /// The normalized form two chains are compared by to detect identical
    /// criteria.
    #[allow(clippy::type_complexity)]
    fn key(
        &self,
    ) -> (
        &[ServerNamePattern],
        Vec<(IpAddr, u8)>,
        Option<(u8, u128, u8)>,
        Vec<(IpAddr, u8)>,
        &[u16],
        Option<u16>,
    ) {
        (
            &self.server_names,
            range_keys(&self.prefix_ranges),
            self.address_suffix.as_ref().map(AddressSuffix::normalized),
            range_keys(&self.source_prefix_ranges),
            &self.source_ports,
            self.destination_port,
        )
    }
}

impl PartialEq for Criteria {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Criteria {}

impl Hash for Criteria {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state)
    }
}

fn range_keys(ranges: &[IpNetwork]) -> Vec<(IpAddr, u8)> {
    ranges
        .iter()
        .map(|range| (range.network(), range.prefix()))
        .collect()
}

/// Sorts and deduplicates ranges by their network address, so `10.1.2.3/8`
/// and `10.0.0.0/8` are treated as the same range.
fn normalize_ranges(ranges: &[IpNetwork]) -> Vec<IpNetwork> {
    let mut ranges: Vec<_> = ranges
        .iter()
        .copied()
        .map(matcher::canonical_network)
        .collect();
    ranges.sort_by_key(|range| (range.network(), range.prefix()));
    ranges.dedup_by_key(|range| (range.network(), range.prefix()));
    ranges
}

/// Picks the most specific of `candidates` for a connection, returning its
/// index and specificity. An exact tie goes to the earliest candidate.
pub fn select<'c>(
    candidates: impl IntoIterator<Item = &'c Criteria>,
    attributes: &Attributes,
) -> Option<(usize, Specificity)> {
    let mut best: Option<(usize, Specificity)> = None;

    for (index, criteria) in candidates.into_iter().enumerate() {
        let Some(specificity) = criteria.evaluate(attributes) else {
            continue;
        };

        if best.map_or(true, |(_, current)| specificity > current) {
            best = Some((index, specificity));
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn criteria(config: FilterChainMatch) -> Criteria {
        Criteria::compile(Some(&config), "test", "chain").unwrap()
    }

    fn attributes(source: &str, destination: &str) -> Attributes<'static> {
        Attributes::new(source.parse().unwrap(), destination.parse().unwrap())
    }

    #[test]
    fn exact_server_name_beats_wildcard() {
        let chains = [
            criteria(FilterChainMatch {
                server_names: vec!["*.example.com".into()],
                ..<_>::default()
            }),
            criteria(FilterChainMatch {
                server_names: vec!["a.example.com".into()],
                ..<_>::default()
            }),
        ];

        let exact = attributes("192.0.2.1:5000", "10.0.0.1:443").with_server_name("a.example.com");
        assert_eq!(1, select(&chains, &exact).unwrap().0);

        let wildcard =
            attributes("192.0.2.1:5000", "10.0.0.1:443").with_server_name("b.example.com");
        assert_eq!(0, select(&chains, &wildcard).unwrap().0);
    }

    #[test]
    fn server_name_outranks_everything_else() {
        let chains = [
            criteria(FilterChainMatch {
                destination_port: Some(443),
                prefix_ranges: vec!["10.0.0.0/24".parse().unwrap()],
                source_prefix_ranges: vec!["192.0.2.0/24".parse().unwrap()],
                source_ports: vec![5000],
                ..<_>::default()
            }),
            criteria(FilterChainMatch {
                server_names: vec!["*.example.com".into()],
                ..<_>::default()
            }),
        ];

        let attributes =
            attributes("192.0.2.1:5000", "10.0.0.1:443").with_server_name("a.example.com");
        assert_eq!(1, select(&chains, &attributes).unwrap().0);
        assert_eq!(0, select(chains.iter().rev(), &attributes).unwrap().0);
    }

    #[test]
    fn mapped_ranges_match_mapped_connections() {
        let chains = [criteria(FilterChainMatch {
            prefix_ranges: vec!["::ffff:10.0.0.0/104".parse().unwrap()],
            source_prefix_ranges: vec!["::ffff:192.0.2.0/120".parse().unwrap()],
            ..<_>::default()
        })];

        let (index, specificity) = select(
            &chains,
            &attributes("[::ffff:192.0.2.1]:5000", "[::ffff:10.0.0.1]:9000"),
        )
        .unwrap();
        assert_eq!(0, index);
        assert_eq!(Some(24), specificity.source);
        assert!(select(&chains, &attributes("192.0.2.1:5000", "10.0.0.1:9000")).is_some());
        assert!(select(&chains, &attributes("192.0.2.1:5000", "11.0.0.1:9000")).is_none());
    }

    #[test]
    fn port_beats_no_criteria() {
        let chains = [
            criteria(FilterChainMatch::default()),
            criteria(FilterChainMatch {
                destination_port: Some(443),
                ..<_>::default()
            }),
        ];

        assert_eq!(
            1,
            select(&chains, &attributes("192.0.2.1:5000", "10.0.0.1:443"))
                .unwrap()
                .0
        );
        assert_eq!(
            0,
            select(&chains, &attributes("192.0.2.1:5000", "10.0.0.1:80"))
                .unwrap()
                .0
        );
    }

    #[test]
    fn destination_beats_source() {
        let chains = [
            criteria(FilterChainMatch {
                source_prefix_ranges: vec!["192.0.2.0/32".parse().unwrap()],
                ..<_>::default()
            }),
            criteria(FilterChainMatch {
                prefix_ranges: vec!["0.0.0.0/0".parse().unwrap()],
                ..<_>::default()
            }),
        ];

        assert_eq!(
            1,
            select(&chains, &attributes("192.0.2.0:5000", "10.0.0.1:443"))
                .unwrap()
                .0
        );
    }

    #[test]
    fn longest_prefix_wins() {
        let chains = [
            criteria(FilterChainMatch {
                prefix_ranges: vec!["10.0.0.0/8".parse().unwrap()],
                ..<_>::default()
            }),
            criteria(FilterChainMatch {
                prefix_ranges: vec!["10.1.0.0/16".parse().unwrap()],
                ..<_>::default()
            }),
        ];

        let (index, specificity) =
            select(&chains, &attributes("192.0.2.1:5000", "10.1.0.1:443")).unwrap();
        assert_eq!(1, index);
        assert_eq!(
            Some(DestinationRank {
                prefix_len: Some(16),
                suffix_len: None
            }),
            specificity.destination
        );
        assert_eq!(
            0,
            select(&chains, &attributes("192.0.2.1:5000", "10.2.0.1:443"))
                .unwrap()
                .0
        );
    }

    #[test]
    fn narrower_source_port_set_wins() {
        let chains = [
            criteria(FilterChainMatch {
                source_ports: vec![5000, 5001, 5002],
                ..<_>::default()
            }),
            criteria(FilterChainMatch {
                source_ports: vec![5000],
                ..<_>::default()
            }),
        ];

        assert_eq!(
            1,
            select(&chains, &attributes("192.0.2.1:5000", "10.0.0.1:443"))
                .unwrap()
                .0
        );
        assert_eq!(
            0,
            select(&chains, &attributes("192.0.2.1:5001", "10.0.0.1:443"))
                .unwrap()
                .0
        );
    }

    #[test]
    fn residual_tie_goes_to_first_declared() {
        let chains = [
            criteria(FilterChainMatch {
                prefix_ranges: vec!["10.0.0.0/8".parse().unwrap()],
                ..<_>::default()
            }),
            criteria(FilterChainMatch {
                prefix_ranges: vec!["10.0.0.0/8".parse().unwrap(), "11.0.0.0/8".parse().unwrap()],
                ..<_>::default()
            }),
        ];

        assert_eq!(
            0,
            select(&chains, &attributes("192.0.2.1:5000", "10.0.0.1:443"))
                .unwrap()
                .0
        );
    }

    #[test]
    fn no_candidates() {
        let chains = [criteria(FilterChainMatch {
            server_names: vec!["a.example.com".into()],
            ..<_>::default()
        })];

        assert_eq!(
            None,
            select(&chains, &attributes("192.0.2.1:5000", "10.0.0.1:443"))
        );
        assert_eq!(
            None,
            select(&[] as &[Criteria], &attributes("192.0.2.1:5000", "10.0.0.1:443"))
        );
    }

    #[test]
    fn ipv4_mapped_addresses_match_ipv4_ranges() {
        let chains = [criteria(FilterChainMatch {
            prefix_ranges: vec!["10.0.0.0/8".parse().unwrap()],
            ..<_>::default()
        })];

        assert!(select(&chains, &attributes("[::1]:5000", "[::ffff:10.0.0.1]:443")).is_some());
    }

    #[test]
    fn identical_criteria_compare_equal() {
        let a = criteria(FilterChainMatch {
            prefix_ranges: vec!["10.1.2.3/8".parse().unwrap(), "11.0.0.0/8".parse().unwrap()],
            source_ports: vec![5001, 5000],
            server_names: vec!["A.example.com".into()],
            ..<_>::default()
        });
        let b = criteria(FilterChainMatch {
            prefix_ranges: vec!["11.0.0.0/8".parse().unwrap(), "10.0.0.0/8".parse().unwrap()],
            source_ports: vec![5000, 5001, 5000],
            server_names: vec!["a.example.com".into()],
            ..<_>::default()
        });
        assert_eq!(a, b);

        let c = criteria(FilterChainMatch {
            source_ports: vec![5000],
            ..<_>::default()
        });
        assert_ne!(a, c);

        assert_eq!(
            Criteria::compile(None, "test", "chain").unwrap(),
            criteria(FilterChainMatch::default())
        );
    }

    #[test]
    fn invalid_criteria() {
        let error = Criteria::compile(
            Some(&FilterChainMatch {
                server_names: vec!["a.*.com".into()],
                ..<_>::default()
            }),
            "test",
            "chain",
        )
        .unwrap_err();
        assert!(matches!(error, ConfigError::InvalidServerName { .. }));

        let error = Criteria::compile(
            Some(&FilterChainMatch {
                address_suffix: Some("0.0.0.1".parse().unwrap()),
                suffix_len: Some(40),
                ..<_>::default()
            }),
            "test",
            "chain",
        )
        .unwrap_err();
        assert!(matches!(error, ConfigError::InvalidAddressSuffix { .. }));

        let error = Criteria::compile(
            Some(&FilterChainMatch {
                suffix_len: Some(8),
                ..<_>::default()
            }),
            "test",
            "chain",
        )
        .unwrap_err();
        assert!(matches!(error, ConfigError::InvalidAddressSuffix { .. }));
    }
}

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

use std::{collections::HashMap, sync::Arc};

use crate::filters::FilterChain as Filters;

use super::{
    config::{FilterChain, TransportSocket},
    error::ConfigError,
    specificity::{self, Attributes, Criteria, Specificity},
};

/// A filter chain ready to have connections bound to it.
#[derive(Debug)]
pub struct FilterChainEntry {
    name: Arc<str>,
    criteria: Criteria,
    transport_socket: Option<TransportSocket>,
    filters: Filters,
    use_proxy_proto: bool,
}

impl FilterChainEntry {
    /// The chain's configured name, or its position for unnamed chains.
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn criteria(&self) -> &Criteria {
        &self.criteria
    }

    pub fn transport_socket(&self) -> Option<&TransportSocket> {
        self.transport_socket.as_ref()
    }

    pub fn filters(&self) -> &Filters {
        &self.filters
    }

    pub fn use_proxy_proto(&self) -> bool {
        self.use_proxy_proto
    }
}

/// The filter chains of a single listener, built once per configuration
/// update and immutable afterwards.
#[derive(Debug)]
pub struct FilterChainTable {
    chains: Vec<Arc<FilterChainEntry>>,
}

impl FilterChainTable {
    /// Validates `chains` and instantiates their filters.
    ///
    /// Fails when there are no chains, a filter is unnamed or unknown, the
    /// chains don't all run the same filters, criteria are malformed, or two
    /// chains have identical criteria.
    pub fn build(listener: &str, chains: &[FilterChain]) -> Result<Self, ConfigError> {
        if chains.is_empty() {
            return Err(ConfigError::NoFilterChains {
                listener: listener.into(),
            });
        }

        let expected: Vec<&str> = chains[0]
            .filters
            .iter()
            .map(|filter| filter.name.as_str())
            .collect();
        let mut seen: HashMap<Criteria, String> = HashMap::with_capacity(chains.len());
        let mut entries = Vec::with_capacity(chains.len());

        for (index, chain) in chains.iter().enumerate() {
            let chain_name = chain.display_name(index);

            if chain.filters.iter().any(|filter| filter.name.is_empty()) {
                return Err(ConfigError::EmptyFilterName {
                    listener: listener.into(),
                    chain: chain_name,
                });
            }

            let found: Vec<&str> = chain
                .filters
                .iter()
                .map(|filter| filter.name.as_str())
                .collect();
            if found != expected {
                return Err(ConfigError::HeterogeneousFilters {
                    listener: listener.into(),
                    chain: chain_name,
                    expected: expected.iter().map(|name| name.to_string()).collect(),
                    found: found.iter().map(|name| name.to_string()).collect(),
                });
            }

            let criteria =
                Criteria::compile(chain.filter_chain_match.as_ref(), listener, &chain_name)?;
            if let Some(first) = seen.get(&criteria) {
                return Err(ConfigError::AmbiguousMatch {
                    listener: listener.into(),
                    first: first.clone(),
                    second: chain_name,
                });
            }

            let filters = Filters::try_create(chain.filters.iter().cloned()).map_err(|source| {
                ConfigError::Filter {
                    listener: listener.into(),
                    chain: chain_name.clone(),
                    source,
                }
            })?;

            seen.insert(criteria.clone(), chain_name.clone());
            entries.push(Arc::new(FilterChainEntry {
                name: chain_name.into(),
                criteria,
                transport_socket: chain.transport_socket.clone(),
                filters,
                use_proxy_proto: chain.use_proxy_proto,
            }));
        }

        Ok(Self { chains: entries })
    }

    /// Returns the most specific chain matching a connection with
    /// `attributes`, along with how specific the match was.
    pub fn select(&self, attributes: &Attributes) -> Option<(&Arc<FilterChainEntry>, Specificity)> {
        specificity::select(
            self.chains.iter().map(|chain| chain.criteria()),
            attributes,
        )
        .map(|(index, specificity)| (&self.chains[index], specificity))
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<FilterChainEntry>> + '_ {
        self.chains.iter()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        filters::{Echo, Pass, StaticFilter},
        listener::config::{Filter, FilterChainMatch},
    };

    fn chain(name: &str, criteria: FilterChainMatch) -> FilterChain {
        FilterChain::named(name)
            .with_match(criteria)
            .with_filter(Filter::new(Echo::NAME))
    }

    fn attributes(source: &str, destination: &str) -> Attributes<'static> {
        Attributes::new(source.parse().unwrap(), destination.parse().unwrap())
    }

    #[test]
    fn selects_most_specific() {
        let table = FilterChainTable::build(
            "listener",
            &[
                chain("fallback", FilterChainMatch::default()),
                chain(
                    "https",
                    FilterChainMatch {
                        destination_port: Some(443),
                        ..<_>::default()
                    },
                ),
            ],
        )
        .unwrap();

        assert_eq!(2, table.len());

        let (selected, _) = table
            .select(&attributes("192.0.2.1:5000", "10.0.0.1:443"))
            .unwrap();
        assert_eq!("https", &**selected.name());

        let (selected, specificity) = table
            .select(&attributes("192.0.2.1:5000", "10.0.0.1:80"))
            .unwrap();
        assert_eq!("fallback", &**selected.name());
        assert_eq!(Specificity::default(), specificity);
    }

    #[test]
    fn no_chains() {
        assert_eq!(
            ConfigError::NoFilterChains {
                listener: "listener".into()
            },
            FilterChainTable::build("listener", &[]).unwrap_err()
        );
    }

    #[test]
    fn identical_criteria_are_ambiguous() {
        let criteria = FilterChainMatch {
            source_ports: vec![5000],
            ..<_>::default()
        };

        assert_eq!(
            ConfigError::AmbiguousMatch {
                listener: "listener".into(),
                first: "a".into(),
                second: "b".into(),
            },
            FilterChainTable::build(
                "listener",
                &[chain("a", criteria.clone()), chain("b", criteria)]
            )
            .unwrap_err()
        );
    }

    #[test]
    fn absent_and_empty_criteria_are_ambiguous() {
        let unmatched = FilterChain::named("a").with_filter(Filter::new(Echo::NAME));

        assert!(matches!(
            FilterChainTable::build(
                "listener",
                &[unmatched, chain("b", FilterChainMatch::default())]
            ),
            Err(ConfigError::AmbiguousMatch { .. })
        ));
    }

    #[test]
    fn heterogeneous_filters() {
        let other = FilterChain::named("other")
            .with_match(FilterChainMatch {
                destination_port: Some(80),
                ..<_>::default()
            })
            .with_filter(Filter::new(Pass::NAME));

        assert_eq!(
            ConfigError::HeterogeneousFilters {
                listener: "listener".into(),
                chain: "other".into(),
                expected: vec![Echo::NAME.into()],
                found: vec![Pass::NAME.into()],
            },
            FilterChainTable::build(
                "listener",
                &[chain("echo", FilterChainMatch::default()), other]
            )
            .unwrap_err()
        );
    }

    #[test]
    fn empty_filter_name() {
        let unnamed = FilterChain::default().with_filter(Filter::new(""));

        assert_eq!(
            ConfigError::EmptyFilterName {
                listener: "listener".into(),
                chain: "#0".into(),
            },
            FilterChainTable::build("listener", &[unnamed]).unwrap_err()
        );
    }

    #[test]
    fn unknown_filter() {
        let unknown = FilterChain::named("unknown").with_filter(Filter::new("does.not.exist"));

        assert!(matches!(
            FilterChainTable::build("listener", &[unknown]),
            Err(ConfigError::Filter { .. })
        ));
    }

    #[test]
    fn zero_filters_is_valid() {
        let table = FilterChainTable::build("listener", &[FilterChain::default()]).unwrap();
        let (selected, _) = table
            .select(&attributes("192.0.2.1:5000", "10.0.0.1:443"))
            .unwrap();
        assert!(selected.filters().is_empty());
        assert_eq!("#0", &**selected.name());
    }
}

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

use crate::{
    filters::{prelude::*, FilterRegistry},
    listener::Filter as FilterConfig,
};

/// A chain of [`Filter`]s to be executed in order.
///
/// Executes each filter, passing the same [`ConnectionContext`] from one
/// filter to the next. If any of the filters in the chain returns an error,
/// the chain is broken, and the error is returned.
#[derive(Clone, Default)]
pub struct FilterChain {
    filters: Vec<(String, FilterInstance)>,
}

impl FilterChain {
    pub fn new(filters: Vec<(String, FilterInstance)>) -> Self {
        Self { filters }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// The names of the filters, in execution order.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.filters.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = FilterConfig> + '_ {
        self.filters.iter().map(|(name, instance)| FilterConfig {
            name: name.clone(),
            config: match instance.config() {
                serde_json::Value::Null => None,
                value => Some(value.clone()),
            },
        })
    }

    /// Validates the filter configurations in the provided config and constructs
    /// a [`Self`] if all configurations are valid.
    pub fn try_create(
        filter_configs: impl IntoIterator<Item = FilterConfig>,
    ) -> Result<Self, CreationError> {
        let mut filters = Vec::new();

        for filter_config in filter_configs {
            let filter = FilterRegistry::get(
                &filter_config.name,
                CreateFilterArgs::fixed(filter_config.config),
            )?;

            filters.push((filter_config.name, filter));
        }

        Ok(Self::new(filters))
    }
}

impl std::fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut filters = f.debug_struct("Filters");

        for (id, instance) in &self.filters {
            filters.field(id, instance.config());
        }

        filters.finish()
    }
}

impl PartialEq for FilterChain {
    fn eq(&self, rhs: &Self) -> bool {
        if self.filters.len() != rhs.filters.len() {
            return false;
        }

        self.filters.iter().zip(&rhs.filters).all(
            |((lhs_name, lhs_instance), (rhs_name, rhs_instance))| {
                lhs_name == rhs_name && lhs_instance.config() == rhs_instance.config()
            },
        )
    }
}

impl std::ops::Index<usize> for FilterChain {
    type Output = (String, FilterInstance);

    fn index(&self, index: usize) -> &Self::Output {
        &self.filters[index]
    }
}

#[async_trait::async_trait]
impl Filter for FilterChain {
    async fn on_new_connection(&self, ctx: &mut ConnectionContext) -> Result<(), FilterError> {
        for (id, instance) in &self.filters {
            tracing::trace!(%id, "new connection");
            if let Err(error) = instance.filter().on_new_connection(ctx).await {
                tracing::debug!(%id, %error, kind = error.discriminant(), "filter closed connection");
                crate::metrics::filter_chain_errors(id).inc();
                return Err(error);
            }
        }

        Ok(())
    }

    async fn on_data(&self, ctx: &mut ConnectionContext) -> Result<(), FilterError> {
        for (id, instance) in &self.filters {
            tracing::trace!(%id, len = ctx.contents.len(), "filtering data");
            if let Err(error) = instance.filter().on_data(ctx).await {
                tracing::debug!(%id, %error, kind = error.discriminant(), "filter closed connection");
                crate::metrics::filter_chain_errors(id).inc();
                return Err(error);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        filters::{Debug, Drop, Echo},
        test::TestFilter,
    };

    use super::*;

    fn context() -> ConnectionContext {
        ConnectionContext::new(
            "127.0.0.1:5000".parse().unwrap(),
            "127.0.0.1:8080".parse().unwrap(),
            "listener".into(),
            "chain".into(),
        )
    }

    #[test]
    fn from_config() {
        let provider = Debug::factory();

        // everything is fine
        let filter_configs = [FilterConfig {
            name: provider.name().into(),
            config: Some(serde_json::Map::default().into()),
        }];

        let chain = FilterChain::try_create(filter_configs).unwrap();
        assert_eq!(1, chain.len());
        assert_eq!(vec![Debug::NAME], chain.names().collect::<Vec<_>>());

        // uh oh, something went wrong
        let filter_configs = [FilterConfig {
            name: "this is so wrong".into(),
            config: Default::default(),
        }];
        let result = FilterChain::try_create(filter_configs);
        assert_eq!(
            Err(CreationError::NotFound("this is so wrong".into())),
            result.map(|_| ())
        );
    }

    #[tokio::test]
    async fn chain_single_test_filter() {
        crate::test::load_test_filters();
        let chain =
            FilterChain::try_create([FilterConfig::new(TestFilter::NAME)]).unwrap();

        let mut ctx = context();
        chain.on_new_connection(&mut ctx).await.unwrap();
        ctx.contents.extend_from_slice(b"hello");
        chain.on_data(&mut ctx).await.unwrap();

        assert_eq!(b"hello:odr", &*ctx.contents);
        assert_eq!(
            Some(&serde_json::json!("connect")),
            ctx.metadata.get("test.events")
        );
    }

    #[tokio::test]
    async fn chain_double_test_filter() {
        crate::test::load_test_filters();
        let chain = FilterChain::try_create([
            FilterConfig::new(TestFilter::NAME),
            FilterConfig::new(TestFilter::NAME),
        ])
        .unwrap();

        let mut ctx = context();
        ctx.contents.extend_from_slice(b"hello");
        chain.on_data(&mut ctx).await.unwrap();

        assert_eq!(b"hello:odr:odr", &*ctx.contents);
    }

    #[tokio::test]
    async fn error_stops_the_chain() {
        let chain = FilterChain::try_create([
            FilterConfig::new(Drop::NAME),
            FilterConfig::new(Echo::NAME),
        ])
        .unwrap();

        let mut ctx = context();
        ctx.contents.extend_from_slice(b"hello");

        assert_eq!(Err(FilterError::Dropped), chain.on_data(&mut ctx).await);
        assert!(ctx.response.is_empty());
    }

    #[test]
    fn round_trips_configuration() {
        let configs = vec![
            FilterConfig::new(Echo::NAME),
            FilterConfig {
                name: Debug::NAME.into(),
                config: Some(serde_json::json!({ "id": "edge" })),
            },
        ];

        let chain = FilterChain::try_create(configs.clone()).unwrap();
        assert_eq!(configs, chain.iter().collect::<Vec<_>>());
        assert_eq!(chain, FilterChain::try_create(configs).unwrap());
    }
}

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

use std::sync::Arc;

use crate::filters::{CreationError, Filter, StaticFilter};

/// An owned pointer to a dynamic [`FilterFactory`] instance.
pub type DynFilterFactory = Box<dyn FilterFactory>;

/// The value returned by [`FilterFactory::create_filter`].
#[derive(Clone)]
pub struct FilterInstance {
    /// The configuration the filter was created from, normalized through its
    /// [`StaticFilter::Configuration`].
    config: Arc<serde_json::Value>,
    filter: Arc<dyn Filter>,
}

impl FilterInstance {
    pub fn new(config: serde_json::Value, filter: Arc<dyn Filter>) -> FilterInstance {
        FilterInstance {
            config: Arc::new(config),
            filter,
        }
    }

    pub fn config(&self) -> &serde_json::Value {
        &self.config
    }

    pub fn filter(&self) -> &dyn Filter {
        &*self.filter
    }
}

impl std::fmt::Debug for FilterInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterInstance")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Provides the name and creation function for a given [`Filter`].
pub trait FilterFactory: Sync + Send {
    /// The returned string identifies the filter item's path with the
    /// following format: `switchyard.filters.<module>.<version>.<item-name>`.
    fn name(&self) -> &'static str;

    /// Returns the schema for the configuration of the [`Filter`].
    fn config_schema(&self) -> schemars::schema::RootSchema;

    /// Returns a filter based on the provided arguments.
    fn create_filter(&self, args: CreateFilterArgs) -> Result<FilterInstance, CreationError>;
}

impl<F> FilterFactory for std::marker::PhantomData<fn() -> F>
where
    F: StaticFilter + 'static,
{
    fn name(&self) -> &'static str {
        F::NAME
    }

    fn config_schema(&self) -> schemars::schema::RootSchema {
        schemars::schema_for!(F::Configuration)
    }

    fn create_filter(&self, args: CreateFilterArgs) -> Result<FilterInstance, CreationError> {
        let config = args
            .config
            .filter(|config| !config.is_null())
            .map(serde_json::from_value::<F::Configuration>)
            .transpose()?;

        let config_json = config
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?
            .unwrap_or_default();

        Ok(FilterInstance::new(
            config_json,
            Arc::new(F::try_from_config(config)?),
        ))
    }
}

/// Arguments needed to create a new filter.
#[derive(Clone, Debug, Default)]
pub struct CreateFilterArgs {
    /// Configuration for the filter.
    pub config: Option<serde_json::Value>,
}

impl CreateFilterArgs {
    /// Creates a new instance of [`CreateFilterArgs`] from the configuration
    /// found in a listener's filter chain.
    pub fn fixed(config: Option<serde_json::Value>) -> CreateFilterArgs {
        Self { config }
    }
}

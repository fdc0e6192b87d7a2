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

//! Network filters processing the connections bound to a filter chain.

mod chain;
mod context;
mod error;
mod factory;
mod registry;
mod set;

pub mod debug;
pub mod drop;
pub mod echo;
pub mod pass;

/// Prelude containing all types and traits required to implement [`Filter`] and
/// [`FilterFactory`].
pub mod prelude {
    pub use super::{
        ConnectionContext, CreateFilterArgs, CreationError, DynFilterFactory, Filter,
        FilterError, FilterFactory, FilterInstance, StaticFilter,
    };
}

// Core Filter types
#[doc(inline)]
pub use self::{
    chain::FilterChain,
    context::ConnectionContext,
    debug::Debug,
    drop::Drop,
    echo::Echo,
    error::{CreationError, FilterError},
    factory::{CreateFilterArgs, DynFilterFactory, FilterFactory, FilterInstance},
    pass::Pass,
    registry::FilterRegistry,
    set::{FilterMap, FilterSet},
};

/// Statically safe version of [`Filter`], if you're writing a Rust filter, you
/// should implement [`StaticFilter`] in addition to [`Filter`], as
/// [`StaticFilter`] guarantees all of the required properties through the type
/// system, allowing the proxy to take care of the virtual table boilerplate
/// automatically at compile-time.
/// ```
/// use switchyard::filters::prelude::*;
///
/// struct Greet;
///
/// #[async_trait::async_trait]
/// impl Filter for Greet {
///     async fn on_new_connection(&self, ctx: &mut ConnectionContext) -> Result<(), FilterError> {
///         ctx.response.extend_from_slice(b"Hello\n");
///         Ok(())
///     }
/// }
///
/// impl StaticFilter for Greet {
///     const NAME: &'static str = "greet.v1";
///     type Configuration = ();
///
///     fn try_from_config(_: Option<Self::Configuration>) -> Result<Self, CreationError> {
///         Ok(Self)
///     }
/// }
/// ```
pub trait StaticFilter: Filter + Sized {
    /// The globally unique name of the filter.
    const NAME: &'static str;
    /// The configuration of the filter. **Must** be [`serde`] compatible and
    /// have a JSON schema.
    type Configuration: schemars::JsonSchema + serde::Serialize + for<'de> serde::Deserialize<'de>;

    /// Instantiates a new [`StaticFilter`] from the given configuration, if any.
    /// # Errors
    /// If the provided configuration is invalid.
    fn try_from_config(config: Option<Self::Configuration>) -> Result<Self, CreationError>;

    /// Instantiates a new [`StaticFilter`] from the given configuration, if any.
    /// # Panics
    /// If the provided configuration is invalid.
    fn from_config(config: Option<Self::Configuration>) -> Self {
        Self::try_from_config(config).unwrap()
    }

    /// Creates a new dynamic [`FilterFactory`] virtual table.
    fn factory() -> DynFilterFactory
    where
        Self: 'static,
    {
        Box::from(std::marker::PhantomData::<fn() -> Self>)
    }

    /// Produces the listener configuration entry running this filter.
    fn as_filter_config(
        config: impl Into<Option<Self::Configuration>>,
    ) -> Result<crate::listener::Filter, CreationError> {
        Ok(crate::listener::Filter {
            name: Self::NAME.into(),
            config: config
                .into()
                .map(|config| serde_json::to_value(&config))
                .transpose()?,
        })
    }
}

/// Trait for processing the connections dispatched to a filter chain.
///
/// Both methods are invoked in the chain's declared order and receive the same
/// [`ConnectionContext`] for the lifetime of the connection.
/// - `on_new_connection` is invoked once, right after the connection has been
///   bound to the chain.
/// - `on_data` is invoked every time data is read from the downstream peer.
///
/// Returning an error stops the chain and closes the connection.
///
/// **Metrics**
///
/// * `filter_chain_errors_total` The number of times a filter closed a
///   connection by returning an error.
///   * Labels
///     * `filter` The name of the filter being executed.
#[async_trait::async_trait]
pub trait Filter: Send + Sync {
    /// By default, the connection is accepted unchanged.
    async fn on_new_connection(&self, _: &mut ConnectionContext) -> Result<(), FilterError> {
        Ok(())
    }

    /// By default, the data passes through unchanged.
    async fn on_data(&self, _: &mut ConnectionContext) -> Result<(), FilterError> {
        Ok(())
    }
}

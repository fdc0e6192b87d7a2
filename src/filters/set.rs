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

use crate::filters::{self, DynFilterFactory, StaticFilter};

#[cfg(doc)]
use crate::filters::{FilterFactory, FilterRegistry};

/// A map of [`FilterFactory::name`]s to [`DynFilterFactory`] values.
pub type FilterMap = std::collections::HashMap<&'static str, Arc<DynFilterFactory>>;

/// A set of filters to be registered with a [`FilterRegistry`].
#[derive(Clone)]
pub struct FilterSet(FilterMap);

impl Default for FilterSet {
    /// Returns a default set of filters that can be used in any filter chain.
    ///
    /// Current default filters:
    /// - [`debug`][filters::debug]
    /// - [`drop`][filters::drop]
    /// - [`echo`][filters::echo]
    /// - [`pass`][filters::pass]
    fn default() -> Self {
        Self::default_with(std::iter::empty())
    }
}

impl FilterSet {
    /// Returns a `FilterSet` with the filters provided through `filters` in
    /// addition to the defaults. Any filter factories provided by `filters`
    /// will override any defaults with a matching name.
    ///
    /// See [`FilterSet::default`] for a list of the current defaults.
    pub fn default_with(filters: impl IntoIterator<Item = DynFilterFactory>) -> Self {
        Self::with(
            [
                filters::Debug::factory(),
                filters::Drop::factory(),
                filters::Echo::factory(),
                filters::Pass::factory(),
            ]
            .into_iter()
            .chain(filters),
        )
    }

    /// Creates a new [`FilterSet`] with the set of `filter_factories` without
    /// any defaults.
    pub fn with(filters: impl IntoIterator<Item = DynFilterFactory>) -> Self {
        Self::from_iter(filters)
    }

    /// Returns a [`DynFilterFactory`] if one matches `id`, otherwise returns `None`.
    pub fn get(&self, key: &str) -> Option<&Arc<DynFilterFactory>> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Adds a new [`DynFilterFactory`] to the set, replacing any factory of
    /// the same name.
    pub fn insert(&mut self, factory: DynFilterFactory) -> Option<Arc<DynFilterFactory>> {
        self.0.insert(factory.name(), Arc::new(factory))
    }

    /// Iterates over the factories of the set, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<DynFilterFactory>> + '_ {
        self.0.values()
    }
}

impl<I: Iterator<Item = DynFilterFactory>> From<I> for FilterSet {
    fn from(iter: I) -> Self {
        Self::with(iter)
    }
}

impl FromIterator<DynFilterFactory> for FilterSet {
    fn from_iter<I: IntoIterator<Item = DynFilterFactory>>(iter: I) -> Self {
        let mut set = Self(Default::default());

        for factory in iter {
            set.insert(factory);
        }

        set
    }
}

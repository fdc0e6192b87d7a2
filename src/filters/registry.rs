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

use arc_swap::ArcSwap;
use once_cell::sync::Lazy;

use crate::filters::{CreateFilterArgs, CreationError, DynFilterFactory, FilterInstance, FilterSet};

static REGISTRY: Lazy<ArcSwap<FilterSet>> =
    Lazy::new(|| ArcSwap::new(Arc::new(FilterSet::default())));

/// Registry of all [`Filter`][crate::filters::Filter]s that can be applied in
/// the system. Starts out with the filters of [`FilterSet::default`].
#[derive(Debug)]
pub struct FilterRegistry;

impl FilterRegistry {
    /// Loads the provided factories into the registry of available filters,
    /// replacing registered factories of the same name.
    pub fn register(factories: impl IntoIterator<Item = DynFilterFactory>) {
        let mut registry = FilterSet::clone(&REGISTRY.load_full());
        for factory in factories {
            registry.insert(factory);
        }

        REGISTRY.store(Arc::from(registry));
    }

    /// Creates and returns a new dynamic instance of [`Filter`][crate::filters::Filter] for a given
    /// `key`. Errors if the filter cannot be found, or if there is a
    /// configuration issue.
    pub fn get(key: &str, args: CreateFilterArgs) -> Result<FilterInstance, CreationError> {
        match REGISTRY.load().get(key).map(|p| p.create_filter(args)) {
            None => Err(CreationError::NotFound(key.to_owned())),
            Some(filter) => filter,
        }
    }

    pub fn contains(key: &str) -> bool {
        REGISTRY.load().contains(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        filters::{ConnectionContext, Filter, StaticFilter},
        test::TestFilter,
    };

    #[tokio::test]
    async fn insert_and_get() {
        FilterRegistry::register([TestFilter::factory()]);

        match FilterRegistry::get("not.found", CreateFilterArgs::fixed(None)) {
            Ok(_) => unreachable!("should not be filter"),
            Err(err) => assert_eq!(CreationError::NotFound("not.found".to_string()), err),
        };

        assert!(FilterRegistry::contains(TestFilter::NAME));
        let filter = FilterRegistry::get(TestFilter::NAME, CreateFilterArgs::fixed(None)).unwrap();

        let mut ctx = ConnectionContext::new(
            "127.0.0.1:5000".parse().unwrap(),
            "127.0.0.1:8080".parse().unwrap(),
            "listener".into(),
            "chain".into(),
        );
        ctx.contents.extend_from_slice(b"hello");

        filter.filter().on_data(&mut ctx).await.unwrap();
        assert_eq!(b"hello:odr", &*ctx.contents);
    }
}

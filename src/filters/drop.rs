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

use serde::{Deserialize, Serialize};

use crate::filters::prelude::*;

/// Always closes the connection, mostly useful in combination with other
/// filters.
pub struct Drop;

impl Drop {
    fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl Filter for Drop {
    async fn on_new_connection(&self, _: &mut ConnectionContext) -> Result<(), FilterError> {
        Err(FilterError::Dropped)
    }

    async fn on_data(&self, _: &mut ConnectionContext) -> Result<(), FilterError> {
        Err(FilterError::Dropped)
    }
}

impl StaticFilter for Drop {
    const NAME: &'static str = "switchyard.filters.drop.v1alpha1.Drop";
    type Configuration = Config;

    fn try_from_config(_: Option<Self::Configuration>) -> Result<Self, CreationError> {
        Ok(Drop::new())
    }
}

/// `drop` filter's configuration.
#[derive(Serialize, Deserialize, Debug, Default, schemars::JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Config {}

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

/// Allows a connection to pass through untouched, mostly useful in
/// combination with other filters.
pub struct Pass;

impl Pass {
    fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl Filter for Pass {
    async fn on_new_connection(&self, _: &mut ConnectionContext) -> Result<(), FilterError> {
        Ok(())
    }

    async fn on_data(&self, _: &mut ConnectionContext) -> Result<(), FilterError> {
        Ok(())
    }
}

impl StaticFilter for Pass {
    const NAME: &'static str = "switchyard.filters.pass.v1alpha1.Pass";
    type Configuration = Config;

    fn try_from_config(_config: Option<Self::Configuration>) -> Result<Self, CreationError> {
        Ok(Pass::new())
    }
}

/// `pass` filter's configuration.
#[derive(Serialize, Deserialize, Debug, Default, schemars::JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Config {}

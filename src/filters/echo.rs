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

//! Writes everything received from the downstream peer back to it.

use serde::{Deserialize, Serialize};

use crate::filters::prelude::*;

/// Echoes received data back to the downstream peer, optionally greeting
/// new connections first.
pub struct Echo {
    greeting: Option<bytes::Bytes>,
}

#[async_trait::async_trait]
impl Filter for Echo {
    async fn on_new_connection(&self, ctx: &mut ConnectionContext) -> Result<(), FilterError> {
        if let Some(greeting) = &self.greeting {
            ctx.response.extend_from_slice(greeting);
        }
        Ok(())
    }

    #[cfg_attr(feature = "instrument", tracing::instrument(skip(self, ctx)))]
    async fn on_data(&self, ctx: &mut ConnectionContext) -> Result<(), FilterError> {
        let contents = ctx.contents.split();
        ctx.response.extend_from_slice(&contents);
        Ok(())
    }
}

impl StaticFilter for Echo {
    const NAME: &'static str = "switchyard.filters.echo.v1alpha1.Echo";
    type Configuration = Config;

    fn try_from_config(config: Option<Self::Configuration>) -> Result<Self, CreationError> {
        let greeting = config.and_then(|config| config.greeting);

        if greeting.as_ref().is_some_and(|greeting| greeting.is_empty()) {
            return Err(CreationError::FieldInvalid {
                field: "greeting".into(),
                reason: "must not be empty when set".into(),
            });
        }

        Ok(Self {
            greeting: greeting.map(bytes::Bytes::from),
        })
    }
}

/// `echo` filter's configuration.
#[derive(Serialize, Deserialize, Debug, Default, schemars::JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Sent to every new connection before anything is echoed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub greeting: Option<String>,
}

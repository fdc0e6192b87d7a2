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
use tracing::info;

use crate::filters::prelude::*;

/// Debug logs all connection events.
pub struct Debug {
    /// Identifier that will be optionally included with each log message.
    id: Option<String>,
}

impl Debug {
    /// Constructor for the Debug. Pass in a "id" to append a string to your log
    /// messages from this Filter.
    fn new(id: Option<String>) -> Self {
        Self { id }
    }
}

#[async_trait::async_trait]
impl Filter for Debug {
    #[cfg_attr(feature = "instrument", tracing::instrument(skip(self, ctx)))]
    async fn on_new_connection(&self, ctx: &mut ConnectionContext) -> Result<(), FilterError> {
        info!(
            id = ?self.id,
            source = %ctx.source,
            destination = %ctx.destination,
            server_name = ?ctx.server_name,
            listener = %ctx.listener,
            chain = %ctx.chain,
            "new connection filter event"
        );
        Ok(())
    }

    #[cfg_attr(feature = "instrument", tracing::instrument(skip(self, ctx)))]
    async fn on_data(&self, ctx: &mut ConnectionContext) -> Result<(), FilterError> {
        info!(
            id = ?self.id,
            source = %ctx.source,
            contents = ?String::from_utf8_lossy(&ctx.contents),
            "data filter event"
        );
        Ok(())
    }
}

impl StaticFilter for Debug {
    const NAME: &'static str = "switchyard.filters.debug.v1alpha1.Debug";
    type Configuration = Config;

    fn try_from_config(config: Option<Self::Configuration>) -> Result<Self, CreationError> {
        Ok(Debug::new(config.and_then(|cfg| cfg.id)))
    }
}

/// A Debug filter's configuration.
#[derive(Serialize, Deserialize, Debug, schemars::JsonSchema)]
pub struct Config {
    /// Identifier that will be optionally included with each log message.
    pub id: Option<String>,
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::*;

    fn context() -> ConnectionContext {
        let mut ctx = ConnectionContext::new(
            "127.0.0.1:5000".parse().unwrap(),
            "127.0.0.1:8080".parse().unwrap(),
            "listener".into(),
            "chain".into(),
        );
        ctx.contents.extend_from_slice(b"hello");
        ctx
    }

    #[traced_test]
    #[tokio::test]
    async fn on_new_connection() {
        let df = Debug::new(None);
        let mut ctx = context();
        df.on_new_connection(&mut ctx).await.unwrap();
        assert!(logs_contain("new connection filter event"));
        assert_eq!(b"hello", &*ctx.contents);
    }

    #[traced_test]
    #[tokio::test]
    async fn on_data() {
        let df = Debug::new(Some("edge".into()));
        let mut ctx = context();
        df.on_data(&mut ctx).await.unwrap();
        assert!(logs_contain("data filter event"));
        assert!(logs_contain("edge"));
        assert_eq!(b"hello", &*ctx.contents);
    }

    #[test]
    fn from_config_with_id() {
        let config = serde_json::json!({
            "id": "name".to_string(),
        });

        assert!(Debug::factory()
            .create_filter(CreateFilterArgs::fixed(Some(config)))
            .is_ok());
    }

    #[test]
    fn from_config_without_id() {
        assert!(Debug::factory()
            .create_filter(CreateFilterArgs::fixed(Some(serde_json::json!({}))))
            .is_ok());
        assert!(Debug::factory()
            .create_filter(CreateFilterArgs::fixed(None))
            .is_ok());
    }

    #[test]
    fn from_config_should_error() {
        let config = serde_json::json!({
            "id": {},
        });
        assert!(Debug::factory()
            .create_filter(CreateFilterArgs::fixed(Some(config)))
            .is_err());
    }
}

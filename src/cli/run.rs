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

use std::{sync::Arc, time::Duration};

use tokio::sync::mpsc;

use super::Source;
use crate::{
    discovery::{ListenerManager, UpdateResponse},
    listener::ListenerRegistry,
    server::Server,
    signal::ShutdownRx,
};

/// Serves the configured listeners, applying every change to the
/// configuration file, until the process is signalled to stop.
#[derive(clap::Args, Clone, Debug)]
pub struct Run {
    /// How long a draining listener waits for its connections before closing
    /// them, overrides `drain.timeout_ms`.
    #[clap(long, env = "SWITCHYARD_DRAIN_TIMEOUT_MS")]
    pub drain_timeout_ms: Option<u64>,
    /// How long inspecting listeners wait for a TLS ClientHello.
    #[clap(long, default_value_t = 200)]
    pub server_name_timeout_ms: u64,
}

impl Run {
    pub async fn run(&self, source: Source, shutdown_rx: ShutdownRx) -> crate::Result<()> {
        let Source { config, path } = source;

        let mut settings = config.settings();
        if let Some(timeout) = self.drain_timeout_ms {
            settings.drain_timeout = Some(Duration::from_millis(timeout));
        }

        tracing::info!(id = %config.id(), ?settings, "starting listeners");

        let registry = Arc::new(ListenerRegistry::new(settings));
        let (updates_tx, updates_rx) = mpsc::channel(8);
        let (responses_tx, mut responses_rx) = mpsc::channel(8);

        tokio::spawn(ListenerManager::new(registry.clone(), responses_tx).run(updates_rx));
        tokio::spawn(async move {
            while let Some(response) = responses_rx.recv().await {
                if let UpdateResponse::Nack { error, .. } = &response {
                    tracing::error!(%error, "configuration rejected, keeping the previous listeners");
                }
            }
        });

        match path {
            Some(path) => {
                tokio::spawn(async move {
                    if let Err(error) = crate::config::watch::fs(path, updates_tx).await {
                        tracing::error!(%error, "configuration watch stopped");
                    }
                });
            }
            None => {
                tracing::info!("no configuration file, serving the default configuration");
                updates_tx.send(config.listener_update("0")).await?;
            }
        }

        Server::new(registry)
            .with_server_name_timeout(Duration::from_millis(self.server_name_timeout_ms))
            .run(shutdown_rx)
            .await
    }
}

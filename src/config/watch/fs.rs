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

use std::path::{Path, PathBuf};

use notify::Watcher;
use tokio::sync::mpsc;
use tracing::Instrument;

use crate::{config::Config, discovery::ListenerUpdate};

/// Reads the configuration file at `path` and sends its listeners as an
/// update, then sends a new update every time the file changes. Changes that
/// don't parse are logged and skipped.
pub async fn watch(
    path: impl Into<PathBuf>,
    updates: mpsc::Sender<ListenerUpdate>,
) -> crate::Result<()> {
    let path = path.into();
    let span = tracing::info_span!("config_provider", path = %path.display());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut version = 0u64;

    async fn watch_inner(
        path: &Path,
        tx: mpsc::UnboundedSender<Result<notify::Event, notify::Error>>,
    ) -> crate::Result<(notify::RecommendedWatcher, Config)> {
        tracing::info!("discovering configuration through filesystem");
        let mut watcher = notify::RecommendedWatcher::new(
            move |res| {
                tx.send(res).ok();
            },
            Default::default(),
        )?;

        tracing::trace!("reading file");
        let buf = tokio::fs::read(path).await?;
        let config = Config::from_reader(&*buf)?;
        watcher.watch(path, notify::RecursiveMode::NonRecursive)?;
        tracing::info!("watching file");
        Ok((watcher, config))
    }

    let (_watcher, config) = watch_inner(&path, tx).instrument(span.clone()).await?;

    version += 1;
    tracing::info!(parent: &span, version, "applying initial configuration");
    if updates.send(update(&config, version)).await.is_err() {
        return Ok(());
    }

    while let Some(event) = rx.recv().instrument(span.clone()).await.transpose()? {
        tracing::trace!(parent: &span, event = ?event.kind, "new file event");

        if !matches!(
            event.kind,
            notify::EventKind::Modify(_) | notify::EventKind::Create(_)
        ) {
            continue;
        }

        // At least on macOS it's not always safe to
        // immediately read file after the change, a small
        // delay fixes that.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let config = match tokio::fs::read(&path)
            .await
            .map_err(eyre::Error::from)
            .and_then(|buf| Config::from_reader(&*buf).map_err(From::from))
        {
            Ok(config) => config,
            Err(error) => {
                tracing::warn!(parent: &span, %error, "failed to read changed configuration");
                continue;
            }
        };

        version += 1;
        tracing::info!(parent: &span, version, "file changed, updating listeners");
        if updates.send(update(&config, version)).await.is_err() {
            tracing::debug!(parent: &span, "listener updates are no longer consumed");
            return Ok(());
        }
    }

    Err(eyre::eyre!("filesystem watch unexpectedly stopped"))
}

fn update(config: &Config, version: u64) -> ListenerUpdate {
    config
        .listener_update(version.to_string())
        .with_nonce(uuid::Uuid::new_v4().to_string())
}

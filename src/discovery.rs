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

//! Applies listener updates from a discovery feed to a [`ListenerRegistry`],
//! acknowledging or rejecting each of them.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::listener::{Listener, ListenerRegistry};

/// The complete set of listeners a feed wants to be in effect.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ListenerUpdate {
    pub version_info: String,
    pub nonce: String,
    pub listeners: Vec<Listener>,
}

impl ListenerUpdate {
    pub fn new(version_info: impl Into<String>, listeners: Vec<Listener>) -> Self {
        Self {
            version_info: version_info.into(),
            nonce: String::new(),
            listeners,
        }
    }

    pub fn with_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = nonce.into();
        self
    }
}

/// The reply to a [`ListenerUpdate`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdateResponse {
    /// The update is in effect.
    Ack { version_info: String, nonce: String },
    /// The update was rejected. `version_info` is the last accepted version,
    /// which is still in effect.
    Nack {
        version_info: String,
        nonce: String,
        error: String,
    },
}

impl UpdateResponse {
    pub fn is_ack(&self) -> bool {
        matches!(self, Self::Ack { .. })
    }

    pub fn nonce(&self) -> &str {
        match self {
            Self::Ack { nonce, .. } | Self::Nack { nonce, .. } => nonce,
        }
    }
}

/// Tracks the listener resources of a discovery feed and applies them to the
/// registry as a whole.
pub struct ListenerManager {
    registry: Arc<ListenerRegistry>,
    // Accepted version, echoed back on rejections.
    version_info: String,
    // Send ACKs/NACKs to the feed.
    responses: mpsc::Sender<UpdateResponse>,
}

impl ListenerManager {
    pub fn new(registry: Arc<ListenerRegistry>, responses: mpsc::Sender<UpdateResponse>) -> Self {
        Self {
            registry,
            version_info: String::new(),
            responses,
        }
    }

    /// The version of the last accepted update.
    pub fn version_info(&self) -> &str {
        &self.version_info
    }

    pub async fn on_listener_update(&mut self, update: ListenerUpdate) {
        tracing::debug!(
            version = %update.version_info,
            nonce = %update.nonce,
            listeners = update.listeners.len(),
            "received listener update"
        );

        let response = match self.registry.replace(update.listeners) {
            Ok(summary) => {
                tracing::info!(
                    version = %update.version_info,
                    generation = summary.generation,
                    "applied listener update"
                );
                self.version_info = update.version_info.clone();
                UpdateResponse::Ack {
                    version_info: update.version_info,
                    nonce: update.nonce,
                }
            }
            Err(error) => {
                tracing::warn!(
                    version = %update.version_info,
                    %error,
                    "rejected listener update"
                );
                UpdateResponse::Nack {
                    version_info: self.version_info.clone(),
                    nonce: update.nonce,
                    error: error.to_string(),
                }
            }
        };

        self.responses
            .send(response)
            .await
            .map_err(|_| tracing::warn!("failed to send listener update response on channel"))
            // The feed dropping its receiver means it is no longer interested
            // or we're shutting down.
            .ok();
    }

    /// Applies updates until the feed closes its sender.
    pub async fn run(mut self, mut updates: mpsc::Receiver<ListenerUpdate>) {
        while let Some(update) = updates.recv().await {
            self.on_listener_update(update).await;
        }

        tracing::debug!("listener update feed closed");
    }
}

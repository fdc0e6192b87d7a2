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

//! The configuration file of a switchyard instance.

mod error;
pub mod watch;

use std::{io, time::Duration};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{
    discovery::ListenerUpdate,
    listener::{registry::DEFAULT_MAX_NAME_LENGTH, Listener, ListenerRegistry, Settings, UpdateSummary},
};

pub use self::error::{ValidationError, ValueInvalidArgs};

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
pub enum Version {
    #[default]
    #[serde(rename = "v1alpha1")]
    V1Alpha1,
}

/// Limits applied to every listener update.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Limits {
    #[serde(default = "default_max_listener_name_length")]
    pub max_listener_name_length: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_listener_name_length: DEFAULT_MAX_NAME_LENGTH,
        }
    }
}

fn default_max_listener_name_length() -> usize {
    DEFAULT_MAX_NAME_LENGTH
}

/// How draining listeners are retired.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Drain {
    /// How long a draining listener waits for its connections to close
    /// before closing them. Unset waits indefinitely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl Drain {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Config is the configuration of a switchyard instance.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub version: Version,
    /// The name of this instance, used in logs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub drain: Drain,
    #[serde(default)]
    pub listeners: Vec<Listener>,
}

impl Config {
    /// Attempts to deserialize `input` as a YAML object representing `Self`.
    pub fn from_reader<R: io::Read>(input: R) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_reader(input)
    }

    /// The identifier of this instance, the hostname when not configured.
    pub fn id(&self) -> String {
        self.id.clone().unwrap_or_else(|| {
            std::env::var("HOSTNAME").unwrap_or_else(|_| String::from("switchyard"))
        })
    }

    /// The registry settings this configuration describes.
    pub fn settings(&self) -> Settings {
        Settings {
            max_name_length: self.limits.max_listener_name_length,
            drain_timeout: self.drain.timeout(),
        }
    }

    /// The listeners of this configuration as an update for a
    /// [`ListenerManager`](crate::discovery::ListenerManager).
    pub fn listener_update(&self, version_info: impl Into<String>) -> ListenerUpdate {
        ListenerUpdate::new(version_info, self.listeners.clone())
    }

    /// Validates the current Config, building every listener without
    /// activating it.
    pub fn validate(&self) -> Result<UpdateSummary, ValidationError> {
        if self.limits.max_listener_name_length == 0 {
            return Err(ValueInvalidArgs {
                field: "limits.max_listener_name_length".into(),
                clarification: Some("must be greater than zero".into()),
                examples: None,
            }
            .into());
        }

        if self.drain.timeout_ms == Some(0) {
            return Err(ValueInvalidArgs {
                field: "drain.timeout_ms".into(),
                clarification: Some("must be greater than zero, or unset to wait indefinitely".into()),
                examples: Some(vec!["30000".into()]),
            }
            .into());
        }

        Ok(ListenerRegistry::new(self.settings()).replace(self.listeners.clone())?)
    }
}

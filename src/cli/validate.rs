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

use crate::Config;

/// Checks that the configuration file is valid and every one of its
/// listeners can be built.
#[derive(clap::Args, Clone, Debug)]
pub struct Validate {}

impl Validate {
    pub fn validate(&self, config: &Config) -> crate::Result<()> {
        match config.validate() {
            Ok(summary) => {
                tracing::info!(listeners = ?summary.added, "configuration is valid");
                Ok(())
            }
            Err(error) => {
                tracing::error!(%error, "configuration is invalid");
                Err(error.into())
            }
        }
    }
}

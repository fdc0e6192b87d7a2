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

mod generate_config_schema;
mod run;
mod validate;

use std::path::{Path, PathBuf};

use crate::Config;

pub use self::{generate_config_schema::GenerateConfigSchema, run::Run, validate::Validate};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const ETC_CONFIG_PATH: &str = "/etc/switchyard/switchyard.yaml";

/// The Command-Line Interface for switchyard.
#[derive(clap::Parser)]
#[command(version, about)]
#[non_exhaustive]
pub struct Cli {
    /// The path to the configuration file for the switchyard instance.
    #[clap(short, long, env = "SWITCHYARD_CONFIG", default_value = "switchyard.yaml")]
    pub config: PathBuf,
    /// Whether switchyard will report any results to stdout/stderr.
    #[clap(short, long, env)]
    pub quiet: bool,
    #[clap(subcommand)]
    pub command: Commands,
}

/// The various switchyard commands.
#[derive(Clone, clap::Subcommand)]
pub enum Commands {
    Run(Run),
    Validate(Validate),
    GenerateConfigSchema(GenerateConfigSchema),
}

/// The configuration of the instance, and the file it was read from, if
/// any.
pub struct Source {
    pub config: Config,
    pub path: Option<PathBuf>,
}

impl Cli {
    /// Drives the main switchyard application lifecycle using the command
    /// line arguments.
    #[tracing::instrument(skip_all)]
    pub async fn drive(self) -> crate::Result<()> {
        let version: std::borrow::Cow<'static, str> = if cfg!(debug_assertions) {
            format!("{VERSION}+debug").into()
        } else {
            VERSION.into()
        };

        if !self.quiet {
            let env_filter = tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .from_env_lossy();
            tracing_subscriber::fmt()
                .json()
                .with_file(true)
                .with_env_filter(env_filter)
                .init();
        }

        tracing::info!(version = &*version, "Starting switchyard");

        match self.command {
            Commands::Run(runner) => {
                let source = Self::read_config(&self.config)?;
                let shutdown_rx = crate::signal::spawn_handler()?;
                runner.run(source, shutdown_rx).await
            }
            Commands::Validate(validator) => {
                let source = Self::read_config(&self.config)?;
                validator.validate(&source.config)
            }
            Commands::GenerateConfigSchema(generator) => generator.generate_config_schema(),
        }
    }

    /// Searches for the configuration file, falling back to the default
    /// configuration when there is none.
    pub fn read_config(path: &Path) -> crate::Result<Source> {
        let open = |path: &Path| -> crate::Result<Source> {
            let file = std::fs::File::open(path)?;
            Ok(Source {
                config: Config::from_reader(file)?,
                path: Some(path.to_owned()),
            })
        };

        match std::fs::metadata(path) {
            Ok(_) => (open)(path),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path=%path.display(), "provided path not found");
                let etc = Path::new(ETC_CONFIG_PATH);
                match cfg!(unix).then(|| std::fs::metadata(etc)) {
                    Some(Ok(_)) => (open)(etc),
                    Some(Err(error)) if error.kind() == std::io::ErrorKind::NotFound => {
                        tracing::debug!(path=%etc.display(), "/etc path not found");
                        Ok(Source {
                            config: Config::default(),
                            path: None,
                        })
                    }
                    Some(Err(error)) => Err(error.into()),
                    None => Ok(Source {
                        config: Config::default(),
                        path: None,
                    }),
                }
            }
            Err(error) => Err(error.into()),
        }
    }
}

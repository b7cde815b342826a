// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for a reporting session.

use crate::errors::{ConfigParseError, ConfigParseErrorKind};
use camino::Utf8Path;
use config::{
    Case, Config, ConfigBuilder, ConfigError, Environment, File, FileFormat, builder::DefaultState,
};
use serde::Deserialize;

/// Configuration for a [`Tree`](crate::Tree).
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct TreeConfig {
    /// Namespaces node ids as `<prefix>-<n>`.
    ///
    /// Needed when several reporting sessions feed the same IDE instance in parallel.
    #[serde(default)]
    pub id_prefix: Option<String>,

    /// Whether [`Tree::begin_session`](crate::Tree::begin_session) writes the handshake message.
    #[serde(default = "default_true")]
    pub emit_handshake: bool,
}

fn default_true() -> bool {
    true
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            id_prefix: None,
            emit_handshake: true,
        }
    }
}

impl TreeConfig {
    /// Contains the default config as a TOML file.
    ///
    /// User configuration and the environment are layered on top of the default config.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../default-config.toml");

    /// Environment configuration uses this prefix, plus a _.
    pub const ENVIRONMENT_PREFIX: &'static str = "TEAMCITY_TREE";

    /// Reads the config from the defaults, the given file if any, and `TEAMCITY_TREE_*`
    /// environment variables, in increasing order of priority.
    pub fn from_sources(config_file: Option<&Utf8Path>) -> Result<Self, ConfigParseError> {
        Self::from_sources_impl(config_file, Environment::with_prefix(Self::ENVIRONMENT_PREFIX))
    }

    /// Reads the config from a TOML string layered over the defaults, ignoring the environment.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigParseError> {
        let builder =
            Self::make_default_config().add_source(File::from_str(toml, FileFormat::Toml));
        Self::build_and_deserialize_config(&builder)
            .map_err(|kind| ConfigParseError::new(None, kind))
    }

    // The environment is passed in so tests don't have to modify the process environment.
    fn from_sources_impl(
        config_file: Option<&Utf8Path>,
        environment: Environment,
    ) -> Result<Self, ConfigParseError> {
        let mut builder = Self::make_default_config();
        if let Some(config_file) = config_file {
            builder = builder.add_source(File::new(config_file.as_str(), FileFormat::Toml));
        }
        // TEAMCITY_TREE_ID_PREFIX maps to `id-prefix`.
        builder = builder.add_source(environment.convert_case(Case::Kebab).try_parsing(true));

        Self::build_and_deserialize_config(&builder)
            .map_err(|kind| ConfigParseError::new(config_file.map(|file| file.to_owned()), kind))
    }

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    fn build_and_deserialize_config(
        builder: &ConfigBuilder<DefaultState>,
    ) -> Result<Self, ConfigParseErrorKind> {
        let config = builder
            .build_cloned()
            .map_err(|error| ConfigParseErrorKind::BuildError(Box::new(error)))?;

        serde_path_to_error::deserialize(config).map_err(|error| {
            // The config crate also reports the key. Drop it so the path is only reported once.
            let path = error.path().clone();
            let error = match error.into_inner() {
                ConfigError::At { error, .. } => *error,
                other => other,
            };
            ConfigParseErrorKind::DeserializeError(Box::new(serde_path_to_error::Error::new(
                path, error,
            )))
        })
    }
}

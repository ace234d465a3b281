// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for xctr.
//!
//! The embedded default config is always loaded first. On top of it goes either
//! an explicitly provided config file, or `.config/xctr.toml` in the project
//! root if it exists.

use crate::{
    errors::{ConfigParseError, ConfigParseErrorKind},
    store::RetentionPolicy,
};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, ConfigBuilder, ConfigError, File, FileFormat, builder::DefaultState};
use serde::Deserialize;
use std::collections::BTreeSet;
use tracing::warn;

/// Handling for warnings produced while loading configuration.
pub trait ConfigWarnings {
    /// Called with the unknown keys found in a config file.
    fn unknown_config_keys(
        &mut self,
        config_file: &Utf8Path,
        project_root: &Utf8Path,
        unknown: &BTreeSet<String>,
    );
}

/// Logs config warnings through `tracing`.
pub struct DefaultConfigWarnings;

impl ConfigWarnings for DefaultConfigWarnings {
    fn unknown_config_keys(
        &mut self,
        config_file: &Utf8Path,
        project_root: &Utf8Path,
        unknown: &BTreeSet<String>,
    ) {
        let mut unknown_str = String::new();
        if unknown.len() == 1 {
            unknown_str.push_str("key: ");
            unknown_str.extend(unknown.iter().map(String::as_str));
        } else {
            unknown_str.push_str("keys:\n");
            for key in unknown {
                unknown_str.push_str("\n  - ");
                unknown_str.push_str(key);
            }
        }

        warn!(
            "in config file {}, ignoring unknown configuration {unknown_str}",
            config_file
                .strip_prefix(project_root)
                .unwrap_or(config_file),
        );
    }
}

/// Loaded xctr configuration.
#[derive(Clone, Debug)]
pub struct XctrConfig {
    project_root: Utf8PathBuf,
    inner: XctrConfigDeserialize,
}

impl XctrConfig {
    /// The location of the project config, relative to the project root.
    pub const CONFIG_PATH: &'static str = ".config/xctr.toml";

    /// The default config as a TOML file.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../default-config.toml");

    /// Reads the config from `config_file`, or if not specified from
    /// `.config/xctr.toml` in the project root.
    ///
    /// An explicitly specified file must exist. The project file is optional.
    pub fn from_sources(
        project_root: impl Into<Utf8PathBuf>,
        config_file: Option<&Utf8Path>,
    ) -> Result<Self, ConfigParseError> {
        Self::from_sources_with_warnings(project_root, config_file, &mut DefaultConfigWarnings)
    }

    /// Like [`Self::from_sources`], with custom warning handling.
    pub fn from_sources_with_warnings(
        project_root: impl Into<Utf8PathBuf>,
        config_file: Option<&Utf8Path>,
        warnings: &mut impl ConfigWarnings,
    ) -> Result<Self, ConfigParseError> {
        let project_root = project_root.into();
        let (config_file, source) = match config_file {
            Some(file) => (file.to_owned(), File::new(file.as_str(), FileFormat::Toml)),
            None => {
                let config_file = project_root.join(Self::CONFIG_PATH);
                let source = File::new(config_file.as_str(), FileFormat::Toml).required(false);
                (config_file, source)
            }
        };

        let builder = Self::make_default_config().add_source(source);
        let (inner, unknown) = build_and_deserialize_config(&builder)
            .map_err(|kind| ConfigParseError::new(&config_file, kind))?;
        if !unknown.is_empty() {
            warnings.unknown_config_keys(&config_file, &project_root, &unknown);
        }

        Ok(Self {
            project_root,
            inner,
        })
    }

    /// Returns the project root this config was loaded for.
    pub fn project_root(&self) -> &Utf8Path {
        &self.project_root
    }

    /// Returns the `[run]` settings.
    pub fn run(&self) -> &RunConfig {
        &self.inner.run
    }

    /// Returns the `[backend]` settings.
    pub fn backend(&self) -> &BackendConfig {
        &self.inner.backend
    }

    /// Returns the store directory, resolved against the project root.
    pub fn store_dir(&self) -> Utf8PathBuf {
        self.project_root.join(&self.inner.store.dir)
    }

    /// Returns the retention policy for stored runs.
    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy::from_retain_last_runs(self.inner.store.retain_last_runs)
    }

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }
}

/// The `[run]` section.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct RunConfig {
    /// Stop running further targets once one target fails.
    pub stop_on_first_failure: bool,
    /// The `xcodebuild` destination, or a simulator UDID.
    #[serde(default)]
    pub destination: Option<String>,
}

/// The `[backend]` section.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct BackendConfig {
    /// Run tools under `script -q /dev/null` on macOS.
    pub wrap_in_pty: bool,
    /// The `xcodebuild` program.
    pub xcodebuild: String,
    /// The `swift` program.
    pub swift: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            wrap_in_pty: true,
            xcodebuild: "xcodebuild".to_owned(),
            swift: "swift".to_owned(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct StoreConfig {
    dir: Utf8PathBuf,
    retain_last_runs: usize,
}

#[derive(Clone, Debug, Deserialize)]
struct XctrConfigDeserialize {
    run: RunConfig,
    store: StoreConfig,
    backend: BackendConfig,
}

fn build_and_deserialize_config(
    builder: &ConfigBuilder<DefaultState>,
) -> Result<(XctrConfigDeserialize, BTreeSet<String>), ConfigParseErrorKind> {
    let config = builder
        .build_cloned()
        .map_err(|error| ConfigParseErrorKind::BuildError(Box::new(error)))?;

    let mut ignored = BTreeSet::new();
    let mut cb = |path: serde_ignored::Path| {
        ignored.insert(path.to_string());
    };
    let ignored_de = serde_ignored::Deserializer::new(config, &mut cb);
    let config: XctrConfigDeserialize =
        serde_path_to_error::deserialize(ignored_de).map_err(|error| {
            // The path is reported by serde_path_to_error, so drop it from
            // the config error.
            let path = error.path().clone();
            let error = match error.into_inner() {
                ConfigError::At { error, .. } => *error,
                other => other,
            };
            ConfigParseErrorKind::DeserializeError(Box::new(serde_path_to_error::Error::new(
                path, error,
            )))
        })?;

    Ok((config, ignored))
}

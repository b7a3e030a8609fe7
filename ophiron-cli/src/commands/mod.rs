//! Command handlers -- one module per subcommand

pub mod config;
pub mod container;
pub mod detect;
pub mod scan;

use std::path::{Path, PathBuf};

use tracing::debug;

use ophiron_core::config::OphironConfig;

use crate::cli::DEFAULT_CONFIG_PATH;
use crate::error::CliError;

/// Where the effective configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// An explicit or discovered `ophiron.toml`.
    File(PathBuf),
    /// No file: built-in defaults plus environment overrides.
    Defaults,
}

impl ConfigSource {
    /// Resolve the `--config` argument.
    ///
    /// An explicit path is always used (and must exist). Without one, the
    /// default file is used only when present in the working directory.
    pub fn resolve(explicit: Option<&Path>) -> Self {
        match explicit {
            Some(path) => Self::File(path.to_path_buf()),
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::File(PathBuf::from(DEFAULT_CONFIG_PATH))
            }
            None => Self::Defaults,
        }
    }

    /// Load, apply env overrides, and validate.
    pub async fn load(&self) -> Result<OphironConfig, CliError> {
        match self {
            Self::File(path) => Ok(OphironConfig::load(path).await?),
            Self::Defaults => {
                debug!("no config file, using defaults");
                let mut config = OphironConfig::default();
                config.apply_env_overrides();
                config.validate()?;
                Ok(config)
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Defaults => "(defaults)".to_owned(),
        }
    }
}

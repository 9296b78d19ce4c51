#![warn(clippy::all)]

//! Settings for progress reporting and transfers.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

/// Period of the timed progress updates unless configured otherwise.
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(1);

/// Errors when loading a configuration.
#[derive(Debug, thiserror::Error)]
#[error("Configuration error")]
pub enum Error {
  /// The configuration file could not be read.
  #[error("Cannot read configuration: {0}")]
  Io(#[from] io::Error),
  /// The configuration is not valid JSON or has unexpected fields.
  #[error("Invalid configuration: {0}")]
  Json(#[from] serde_json::Error),
  /// The update interval is zero.
  #[error("Update interval must be greater than zero")]
  ZeroInterval,
}

/// Transfer settings.
///
/// Durations are written in a human-readable form, e.g. `"500ms"` or `"2s"`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct Config {
  /// Period of the timed progress updates.
  #[serde(deserialize_with = "human_duration")]
  pub update_interval: Duration,
  /// Label to publish progress under; generated when absent.
  pub owner: Option<String>,
  /// Whether sources are gzip-compressed and should be decompressed.
  pub gzip: bool,
}

impl Default for Config {
  fn default() -> Self {
    Self { update_interval: DEFAULT_UPDATE_INTERVAL, owner: None, gzip: false }
  }
}

impl Config {
  /// Read a configuration in JSON format.
  ///
  /// # Arguments
  ///
  /// * `reader` - Source of the JSON document.
  pub fn from_reader<R: Read>(reader: R) -> Result<Self, Error> {
    let config: Self = serde_json::from_reader(reader)?;
    config.validate()?;
    Ok(config)
  }

  /// Read a configuration file in JSON format.
  ///
  /// # Arguments
  ///
  /// * `path` - Path of the configuration file.
  pub fn from_path(path: &Path) -> Result<Self, Error> {
    Self::from_reader(BufReader::new(File::open(path)?))
  }

  /// Checks values that deserialize fine but cannot be used.
  pub fn validate(&self) -> Result<(), Error> {
    if self.update_interval.is_zero() {
      return Err(Error::ZeroInterval);
    }

    Ok(())
  }
}

fn human_duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
  let value = String::deserialize(deserializer)?;
  humantime::parse_duration(&value).map_err(serde::de::Error::custom)
}

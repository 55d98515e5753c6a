use std::{error::Error, fs::File, path::Path, path::PathBuf, time::Duration};

use digits::{model::RowPolicy, Settings};
use serde::Deserialize;

/// Config file format. Every field can be omitted; omitted fields keep their defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
  /// `host:port` the server binds
  pub listen_addr: Option<String>,
  /// Grace period for open requests on shutdown
  pub shutdown_timeout_ms: Option<u64>,
  pub train_dataset: Option<PathBuf>,
  pub test_dataset: Option<PathBuf>,
  pub hidden_weights: Option<PathBuf>,
  pub output_weights: Option<PathBuf>,
  /// Key-value service address; empty keeps the cache in process
  pub cache_addr: Option<String>,
  pub cache_timeout_ms: Option<u64>,
  pub input_size: Option<usize>,
  pub hidden_size: Option<usize>,
  pub output_size: Option<usize>,
  pub learning_rate: Option<f64>,
  pub epochs: Option<usize>,
  /// `skip` or `reject`
  pub row_policy: Option<RowPolicy>,
}

impl AppConfig {
  pub fn from_file(path: &Path) -> Result<Self, Box<dyn Error>> {
    let file = File::open(path).map_err(|e| format!("cannot open config {:?}: {}", path, e))?;
    Ok(serde_yaml::from_reader(file)?)
  }

  // merge configs where the second overwrites the first
  pub fn merge(self, other: Self) -> Self {
    Self {
      listen_addr: other.listen_addr.or(self.listen_addr),
      shutdown_timeout_ms: other.shutdown_timeout_ms.or(self.shutdown_timeout_ms),
      train_dataset: other.train_dataset.or(self.train_dataset),
      test_dataset: other.test_dataset.or(self.test_dataset),
      hidden_weights: other.hidden_weights.or(self.hidden_weights),
      output_weights: other.output_weights.or(self.output_weights),
      cache_addr: other.cache_addr.or(self.cache_addr),
      cache_timeout_ms: other.cache_timeout_ms.or(self.cache_timeout_ms),
      input_size: other.input_size.or(self.input_size),
      hidden_size: other.hidden_size.or(self.hidden_size),
      output_size: other.output_size.or(self.output_size),
      learning_rate: other.learning_rate.or(self.learning_rate),
      epochs: other.epochs.or(self.epochs),
      row_policy: other.row_policy.or(self.row_policy),
    }
  }

  pub fn into_settings(self) -> Result<Settings, Box<dyn Error>> {
    let defaults = Settings::default();
    let settings = Settings {
      listen_addr: self.listen_addr.unwrap_or(defaults.listen_addr),
      shutdown_timeout: self
        .shutdown_timeout_ms
        .map_or(defaults.shutdown_timeout, Duration::from_millis),
      train_dataset: self.train_dataset.unwrap_or(defaults.train_dataset),
      test_dataset: self.test_dataset.unwrap_or(defaults.test_dataset),
      hidden_weights: self.hidden_weights.unwrap_or(defaults.hidden_weights),
      output_weights: self.output_weights.unwrap_or(defaults.output_weights),
      cache_addr: match self.cache_addr {
        Some(addr) if addr.trim().is_empty() => None,
        Some(addr) => Some(addr),
        None => defaults.cache_addr,
      },
      cache_timeout: self
        .cache_timeout_ms
        .map_or(defaults.cache_timeout, Duration::from_millis),
      input_size: self.input_size.unwrap_or(defaults.input_size),
      hidden_size: self.hidden_size.unwrap_or(defaults.hidden_size),
      output_size: self.output_size.unwrap_or(defaults.output_size),
      learning_rate: self.learning_rate.unwrap_or(defaults.learning_rate),
      epochs: self.epochs.unwrap_or(defaults.epochs),
      row_policy: self.row_policy.unwrap_or(defaults.row_policy),
    };
    if settings.input_size == 0 || settings.hidden_size == 0 || settings.output_size == 0 {
      return Err("layer sizes must be positive".into());
    }
    if !(settings.learning_rate > 0.0 && settings.learning_rate.is_finite()) {
      return Err(format!("learning rate must be positive, got {}", settings.learning_rate).into());
    }
    Ok(settings)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_second_config_wins() {
    let file: AppConfig = serde_yaml::from_str("listen_addr: 0.0.0.0:9000\nepochs: 3\nrow_policy: reject\n").unwrap();
    let flags = AppConfig {
      epochs: Some(7),
      ..AppConfig::default()
    };
    let settings = file.merge(flags).into_settings().unwrap();
    assert_eq!(settings.listen_addr, "0.0.0.0:9000");
    assert_eq!(settings.epochs, 7);
    assert_eq!(settings.row_policy, RowPolicy::Reject);
    assert_eq!(settings.hidden_size, 200);
  }

  #[test]
  fn test_empty_cache_addr_disables_remote() {
    let config = AppConfig {
      cache_addr: Some(String::new()),
      ..AppConfig::default()
    };
    assert_eq!(config.into_settings().unwrap().cache_addr, None);
  }

  #[test]
  fn test_rejects_bad_values() {
    assert!(serde_yaml::from_str::<AppConfig>("bogus: 1\n").is_err());
    let config = AppConfig {
      learning_rate: Some(-1.0),
      ..AppConfig::default()
    };
    assert!(config.into_settings().is_err());
  }
}

use std::{path::PathBuf, time::Duration};

use crate::model::{
  CsvDataset, RowPolicy, TrainingParams, WeightStore, HIDDEN_DIMENSION, INPUT_DIMENSION, LEARNING_RATE,
  OUTPUT_DIMENSION,
};

/// Fully resolved runtime settings. The executable builds these from its config file and flags.
#[derive(Debug, Clone)]
pub struct Settings {
  pub listen_addr: String,
  /// Grace period for in-flight requests after a shutdown signal.
  pub shutdown_timeout: Duration,
  pub train_dataset: PathBuf,
  pub test_dataset: PathBuf,
  pub hidden_weights: PathBuf,
  pub output_weights: PathBuf,
  /// `host:port` of the key-value service; `None` keeps the cache in process.
  pub cache_addr: Option<String>,
  pub cache_timeout: Duration,
  pub input_size: usize,
  pub hidden_size: usize,
  pub output_size: usize,
  pub learning_rate: f64,
  pub epochs: usize,
  pub row_policy: RowPolicy,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      listen_addr: "0.0.0.0:8080".to_string(),
      shutdown_timeout: Duration::from_millis(5000),
      train_dataset: PathBuf::from("./mnist_dataset/mnist_train.csv"),
      test_dataset: PathBuf::from("./mnist_dataset/mnist_test.csv"),
      hidden_weights: PathBuf::from("./data/hweights.model"),
      output_weights: PathBuf::from("./data/oweights.model"),
      cache_addr: Some("127.0.0.1:6379".to_string()),
      cache_timeout: Duration::from_millis(500),
      input_size: INPUT_DIMENSION,
      hidden_size: HIDDEN_DIMENSION,
      output_size: OUTPUT_DIMENSION,
      learning_rate: LEARNING_RATE,
      epochs: 5,
      row_policy: RowPolicy::Skip,
    }
  }
}

impl Settings {
  pub fn weight_store(&self) -> WeightStore {
    WeightStore::new(&self.hidden_weights, &self.output_weights)
  }

  pub fn train_data(&self) -> CsvDataset {
    CsvDataset::new(&self.train_dataset, self.input_size, self.output_size)
  }

  pub fn test_data(&self) -> CsvDataset {
    CsvDataset::new(&self.test_dataset, self.input_size, self.output_size)
  }

  pub fn training_params(&self) -> TrainingParams {
    TrainingParams {
      epochs: self.epochs,
      policy: self.row_policy,
    }
  }
}

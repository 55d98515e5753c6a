use std::path::PathBuf;

pub mod cache;
pub mod config;
pub mod imaging;
pub mod matrix;
pub mod model;
pub mod pipeline;
pub mod subcommands;
pub mod utils;

pub use config::Settings;
pub use matrix::Matrix;
pub use model::Network;
pub use pipeline::{Payload, Prediction, PredictionPipeline};

/// Failure kinds of the core. Every variant is request scoped: nothing here is
/// fatal to a running server.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// Malformed upload, unparsable flag or a vector of the wrong length.
  #[error("invalid input: {0}")]
  Input(String),
  #[error("shape mismatch in {op}: {left:?} vs {right:?}")]
  ShapeMismatch {
    op: &'static str,
    left: (usize, usize),
    right: (usize, usize),
  },
  #[error("dataset {path:?} unavailable: {source}")]
  DatasetUnavailable {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("malformed dataset row {row}: {reason}")]
  MalformedRow { row: usize, reason: String },
  /// Persisted weights do not fit the configured network.
  #[error("weights in {path:?} are {found:?}, network expects {expected:?}")]
  DimensionMismatch {
    path: PathBuf,
    expected: (usize, usize),
    found: (usize, usize),
  },
  #[error("weight blob {path:?}: {source}")]
  Persistence {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  /// Reports and other files that are not weight blobs.
  #[error("cannot write {path:?}: {source}")]
  Output {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("cache backend unavailable: {0}")]
  CacheUnavailable(String),
  #[error("serialization failed: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

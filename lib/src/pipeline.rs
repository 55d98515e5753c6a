//! Checksum, cache lookup, forward pass, cache store.

use std::{
  collections::BTreeMap,
  sync::{Arc, PoisonError, RwLock},
};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};

use crate::{cache::Cache, model::argmax, Network, Result};

/// Mixed into the digest of uploads that are inverted before decoding.
const INVERTED_KEY_SUFFIX: &[u8] = b"\0digits:inverted";

pub trait Classifier: Send + Sync {
  /// Raw output activations for one feature vector.
  fn classify(&self, features: &[f64]) -> Result<Vec<f64>>;
}

impl Classifier for Network {
  fn classify(&self, features: &[f64]) -> Result<Vec<f64>> {
    self.predict(features)
  }
}

/// Shared with a trainer that takes the write lock.
impl Classifier for RwLock<Network> {
  fn classify(&self, features: &[f64]) -> Result<Vec<f64>> {
    self.read().unwrap_or_else(PoisonError::into_inner).predict(features)
  }
}

/// Turns an uploaded file into a feature vector.
pub trait Decoder: Send + Sync {
  fn decode(&self, bytes: &[u8], invert: bool) -> Result<Vec<f64>>;
}

impl<F> Decoder for F
where
  F: Fn(&[u8], bool) -> Result<Vec<f64>> + Send + Sync,
{
  fn decode(&self, bytes: &[u8], invert: bool) -> Result<Vec<f64>> {
    self(bytes, invert)
  }
}

#[derive(Debug, Clone)]
pub struct Payload {
  pub bytes: Vec<u8>,
  pub invert: bool,
}

impl Payload {
  pub fn new(bytes: Vec<u8>, invert: bool) -> Self {
    Self { bytes, invert }
  }

  /// Lowercase hex SHA-256 of the raw bytes.
  pub fn checksum(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(&self.bytes);
    if self.invert {
      hasher.update(INVERTED_KEY_SUFFIX);
    }
    hex(&hasher.finalize())
  }
}

/// What a client gets back, and what the cache stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
  /// Class label to output activation as a percentage.
  pub results: BTreeMap<String, f64>,
  pub prediction: usize,
  /// Percentage of the predicted class.
  pub accuracy: f64,
}

impl Prediction {
  pub fn from_outputs(outputs: &[f64]) -> Self {
    let percent = |v: f64| round2(v * 100.0);
    let prediction = argmax(outputs);
    Self {
      results: outputs.iter().enumerate().map(|(class, &v)| (class.to_string(), percent(v))).collect(),
      prediction,
      accuracy: outputs.get(prediction).copied().map_or(0.0, percent),
    }
  }
}

fn round2(v: f64) -> f64 {
  (v * 100.0).round() / 100.0
}

pub(crate) fn hex(bytes: &[u8]) -> String {
  bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

pub struct PredictionPipeline<C: ?Sized, D> {
  classifier: Arc<C>,
  decoder: D,
  cache: Arc<dyn Cache>,
}

impl<C: Classifier + ?Sized, D: Decoder> PredictionPipeline<C, D> {
  pub fn new(classifier: Arc<C>, decoder: D, cache: Arc<dyn Cache>) -> Self {
    Self {
      classifier,
      decoder,
      cache,
    }
  }

  pub fn cache(&self) -> &Arc<dyn Cache> {
    &self.cache
  }

  /// Identical payloads reuse the stored result. Concurrent misses on one key each compute and
  /// the last write wins; the results are equal for a fixed network.
  #[instrument(skip_all, fields(key))]
  pub fn predict(&self, payload: &Payload) -> Result<Prediction> {
    let key = payload.checksum();
    tracing::Span::current().record("key", key.as_str());
    if let Some(hit) = self.lookup(&key) {
      debug!("cache hit");
      return Ok(hit);
    }
    debug!("cache miss");

    let features = self.decoder.decode(&payload.bytes, payload.invert)?;
    let outputs = self.classifier.classify(&features)?;
    let prediction = Prediction::from_outputs(&outputs);

    match serde_json::to_vec(&prediction) {
      Ok(value) => {
        if let Err(err) = self.cache.put(&key, &value) {
          warn!(%err, backend = self.cache.backend(), "could not store prediction");
        }
      }
      Err(err) => warn!(%err, "could not serialize prediction"),
    }
    Ok(prediction)
  }

  fn lookup(&self, key: &str) -> Option<Prediction> {
    match self.cache.get(key) {
      Ok(Some(value)) => match serde_json::from_slice(&value) {
        Ok(prediction) => Some(prediction),
        Err(err) => {
          warn!(%err, "ignoring undecodable cache entry");
          None
        }
      },
      Ok(None) => None,
      Err(err) => {
        warn!(%err, backend = self.cache.backend(), "cache lookup failed");
        None
      }
    }
  }
}

use crate::{Error, Result};

/// 28 x 28 pixels, one input per pixel.
pub const INPUT_DIMENSION: usize = 784;
pub const HIDDEN_DIMENSION: usize = 200;
/// Digits 0 to 9.
pub const OUTPUT_DIMENSION: usize = 10;
pub const LEARNING_RATE: f64 = 0.1;

/// One-hot target values. Kept strictly inside (0, 1) since the sigmoid never reaches the bounds.
pub const TARGET_HIGH: f64 = 0.999;
pub const TARGET_LOW: f64 = 0.001;

/// Maps a raw intensity in [0, 255] into [0.001, 1.0].
pub fn normalize_pixel(value: f64) -> f64 {
  (value / 255.0 * 0.999) + 0.001
}

#[derive(Debug, Clone, PartialEq)]
pub enum Target {
  /// A class index, expanded to a one-hot vector.
  Class(usize),
  Vector(Vec<f64>),
}

impl Target {
  pub fn to_vector(&self, outputs: usize) -> Result<Vec<f64>> {
    match self {
      Target::Class(label) => one_hot(*label, outputs),
      Target::Vector(v) if v.len() == outputs => Ok(v.clone()),
      Target::Vector(v) => Err(Error::Input(format!(
        "target has {} entries, network has {} outputs",
        v.len(),
        outputs
      ))),
    }
  }
}

pub fn one_hot(label: usize, outputs: usize) -> Result<Vec<f64>> {
  if label >= outputs {
    return Err(Error::Input(format!("label {} out of range for {} classes", label, outputs)));
  }
  let mut targets = vec![TARGET_LOW; outputs];
  targets[label] = TARGET_HIGH;
  Ok(targets)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
  pub features: Vec<f64>,
  pub target: Target,
}

/// One labelled dataset row, pixels still raw.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
  pub label: usize,
  pub pixels: Vec<f64>,
}

impl Row {
  pub fn to_sample(&self) -> Sample {
    Sample {
      features: self.pixels.iter().map(|&p| normalize_pixel(p)).collect(),
      target: Target::Class(self.label),
    }
  }
}

/// What the training loop does with a row it cannot parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowPolicy {
  #[default]
  Skip,
  Reject,
}

#[derive(Debug, Clone)]
pub struct TrainingParams {
  pub epochs: usize,
  pub policy: RowPolicy,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_normalize_pixel_range() {
    assert!((normalize_pixel(0.0) - 0.001).abs() < 1e-12);
    assert!((normalize_pixel(255.0) - 1.0).abs() < 1e-12);
  }

  #[test]
  fn test_one_hot() {
    let t = one_hot(3, 10).unwrap();
    assert_eq!(t[3], TARGET_HIGH);
    assert_eq!(t.iter().filter(|&&v| v == TARGET_LOW).count(), 9);
    assert!(one_hot(10, 10).is_err());
  }

  #[test]
  fn test_target_vector_length_checked() {
    assert!(Target::Vector(vec![0.0, 1.0]).to_vector(3).is_err());
    assert_eq!(Target::Vector(vec![0.0, 1.0]).to_vector(2).unwrap(), vec![0.0, 1.0]);
  }

  #[test]
  fn test_row_to_sample() {
    let row = Row {
      label: 1,
      pixels: vec![0.0, 255.0],
    };
    let sample = row.to_sample();
    assert_eq!(sample.target, Target::Class(1));
    assert!(sample.features.iter().all(|&f| f > 0.0 && f <= 1.0));
  }
}

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Prediction;

pub const OPERATION_TRAIN: &str = "train";
pub const OPERATION_PREDICT: &str = "predict";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainResponse {
  pub success: bool,
  pub process_time: String,
  pub operation: String,
  pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictResponse {
  pub success: bool,
  pub process_time: String,
  pub operation: String,
  #[serde(flatten)]
  pub prediction: Prediction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
  pub success: bool,
  pub process_time: String,
  pub status: u16,
  pub message: String,
}

impl TrainResponse {
  pub fn new(success: bool, elapsed: Duration, message: impl Into<String>) -> Self {
    Self {
      success,
      process_time: process_time(elapsed),
      operation: OPERATION_TRAIN.to_string(),
      message: message.into(),
    }
  }
}

impl PredictResponse {
  pub fn new(elapsed: Duration, prediction: Prediction) -> Self {
    Self {
      success: true,
      process_time: process_time(elapsed),
      operation: OPERATION_PREDICT.to_string(),
      prediction,
    }
  }
}

impl ErrorResponse {
  pub fn new(status: u16, elapsed: Duration, message: impl Into<String>) -> Self {
    Self {
      success: false,
      process_time: process_time(elapsed),
      status,
      message: message.into(),
    }
  }
}

/// Human readable duration such as `1.5ms`.
pub fn process_time(elapsed: Duration) -> String {
  format!("{:?}", elapsed)
}

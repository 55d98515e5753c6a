use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, instrument, warn};

use super::{argmax, Dataset, Network, RowPolicy, TrainingParams};
use crate::{Error, Result};

#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
  pub epochs: usize,
  pub samples: usize,
  pub skipped: usize,
  /// Running average of the per-sample squared error at the end of training.
  pub loss: f64,
  #[serde(serialize_with = "as_secs")]
  pub elapsed: Duration,
}

fn as_secs<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
  s.serialize_f64(d.as_secs_f64())
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Evaluation {
  pub correct: usize,
  pub total: usize,
  /// Fraction in [0, 1].
  pub accuracy: f64,
}

impl Network {
  /// Trains on every row of `dataset`, `params.epochs` times.
  ///
  /// The dataset is opened before the first weight update, so an unavailable dataset leaves
  /// the network untouched.
  #[instrument(level = "info", skip_all, fields(epochs = params.epochs))]
  pub fn run_training_loop<D: Dataset + ?Sized>(&mut self, dataset: &D, params: &TrainingParams) -> Result<TrainingReport> {
    let start = Instant::now();
    let mut loss_avg = ExponentialAverage::new(1.0);
    let (mut samples, mut skipped) = (0, 0);

    for epoch in 0..params.epochs {
      for row in dataset.rows()? {
        let row = match row {
          Ok(row) => row,
          Err(err @ Error::MalformedRow { .. }) if params.policy == RowPolicy::Skip => {
            warn!(%err, "skipping row");
            skipped += 1;
            continue;
          }
          Err(err) => return Err(err),
        };
        let sample = row.to_sample();
        let targets = sample.target.to_vector(self.output_size())?;
        loss_avg.update(self.train_step(&sample.features, &targets)?);
        samples += 1;
      }
      info!(epoch, samples, loss = loss_avg.value, "epoch finished");
    }

    let report = TrainingReport {
      epochs: params.epochs,
      samples,
      skipped,
      loss: loss_avg.value,
      elapsed: start.elapsed(),
    };
    if samples > 0 {
      info!(
        "Took {:.2}s, {:.2}µs / sample",
        report.elapsed.as_secs_f64(),
        report.elapsed.as_micros() as f64 / samples as f64
      );
    }
    Ok(report)
  }

  /// Fraction of rows whose arg-max prediction equals the label. Malformed rows are skipped.
  #[instrument(level = "info", skip_all)]
  pub fn evaluate<D: Dataset + ?Sized>(&self, dataset: &D) -> Result<Evaluation> {
    let (mut correct, mut total) = (0, 0);
    for row in dataset.rows()? {
      let row = match row {
        Ok(row) => row,
        Err(err @ Error::MalformedRow { .. }) => {
          warn!(%err, "skipping row");
          continue;
        }
        Err(err) => return Err(err),
      };
      let outputs = self.predict(&row.to_sample().features)?;
      if argmax(&outputs) == row.label {
        correct += 1;
      }
      total += 1;
    }
    let accuracy = if total == 0 { 0.0 } else { correct as f64 / total as f64 };
    info!(correct, total, accuracy, "evaluation finished");
    Ok(Evaluation {
      correct,
      total,
      accuracy,
    })
  }
}

/// Bias corrected exponential moving average.
pub struct ExponentialAverage {
  beta: f64,
  moment: f64,
  pub value: f64,
  t: i32,
}

impl ExponentialAverage {
  pub fn new(initial: f64) -> Self {
    ExponentialAverage {
      beta: 0.999,
      moment: 0.,
      value: initial,
      t: 0,
    }
  }

  pub fn update(&mut self, value: f64) {
    self.t = self.t.saturating_add(1);
    self.moment = self.beta * self.moment + (1. - self.beta) * value;
    // bias correction
    self.value = self.moment / (1. - f64::powi(self.beta, self.t));
  }
}

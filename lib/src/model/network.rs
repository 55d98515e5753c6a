use rand::Rng;

use super::{feedback::Context, Feedback};
use crate::{matrix::Matrix, Error, Result};

pub fn sigmoid(z: f64) -> f64 {
  1.0 / (1.0 + (-z).exp())
}

/// `a * (1 - a)`: the sigmoid derivative expressed through the activation itself.
fn sigmoid_prime(activation: &Matrix) -> Matrix {
  activation.apply(|a| a * (1.0 - a))
}

/// Three layer network: input, one sigmoid hidden layer, sigmoid output layer. No biases.
///
/// Dimensions are fixed at construction. Weights change only through [`Network::train`]
/// (and its recurrent form) or when a [`super::WeightStore`] loads them.
#[derive(Debug, Clone)]
pub struct Network {
  inputs: usize,
  hiddens: usize,
  outputs: usize,
  /// hiddens x inputs
  hidden_weights: Matrix,
  /// outputs x hiddens
  output_weights: Matrix,
  learning_rate: f64,
  feedback: Option<Feedback>,
}

/// Activations recorded by one forward pass, as column vectors.
struct Activations {
  hidden: Matrix,
  output: Matrix,
}

impl Network {
  pub fn new(inputs: usize, hiddens: usize, outputs: usize, learning_rate: f64) -> Self {
    Self::with_rng(inputs, hiddens, outputs, learning_rate, &mut rand::thread_rng())
  }

  pub fn with_rng<R: Rng + ?Sized>(
    inputs: usize,
    hiddens: usize,
    outputs: usize,
    learning_rate: f64,
    rng: &mut R,
  ) -> Self {
    Self {
      inputs,
      hiddens,
      outputs,
      hidden_weights: Matrix::random_uniform(hiddens, inputs, inputs, rng),
      output_weights: Matrix::random_uniform(outputs, hiddens, hiddens, rng),
      learning_rate,
      feedback: None,
    }
  }

  /// Builds a network around existing weight matrices; dimensions are taken from them.
  pub fn from_weights(hidden_weights: Matrix, output_weights: Matrix, learning_rate: f64) -> Result<Self> {
    if output_weights.cols() != hidden_weights.rows() {
      return Err(Error::ShapeMismatch {
        op: "from_weights",
        left: hidden_weights.dims(),
        right: output_weights.dims(),
      });
    }
    Ok(Self {
      inputs: hidden_weights.cols(),
      hiddens: hidden_weights.rows(),
      outputs: output_weights.rows(),
      hidden_weights,
      output_weights,
      learning_rate,
      feedback: None,
    })
  }

  /// Turns this into an Elman style network: hidden units in `feedback.source` are fed back
  /// into the last `feedback.source.len()` input units on every step.
  pub fn with_feedback(mut self, feedback: Feedback) -> Result<Self> {
    let width = feedback.context_len();
    if width == 0 || feedback.source.end > self.hiddens || width >= self.inputs {
      return Err(Error::Input(format!(
        "feedback range {:?} does not fit {} hidden and {} input units",
        feedback.source, self.hiddens, self.inputs
      )));
    }
    self.feedback = Some(feedback);
    Ok(self)
  }

  pub fn input_size(&self) -> usize {
    self.inputs
  }

  pub fn hidden_size(&self) -> usize {
    self.hiddens
  }

  pub fn output_size(&self) -> usize {
    self.outputs
  }

  pub fn learning_rate(&self) -> f64 {
    self.learning_rate
  }

  pub fn feedback(&self) -> Option<&Feedback> {
    self.feedback.as_ref()
  }

  pub fn hidden_weights(&self) -> &Matrix {
    &self.hidden_weights
  }

  pub fn output_weights(&self) -> &Matrix {
    &self.output_weights
  }

  /// Expected `(rows, cols)` of the hidden and output weight matrices.
  pub fn weight_dims(&self) -> ((usize, usize), (usize, usize)) {
    ((self.hiddens, self.inputs), (self.outputs, self.hiddens))
  }

  pub(crate) fn replace_weights(&mut self, hidden: Option<Matrix>, output: Option<Matrix>) -> Result<()> {
    let (hidden_dims, output_dims) = self.weight_dims();
    for (m, expected) in [(&hidden, hidden_dims), (&output, output_dims)] {
      if let Some(m) = m {
        if m.dims() != expected {
          return Err(Error::ShapeMismatch {
            op: "replace_weights",
            left: expected,
            right: m.dims(),
          });
        }
      }
    }
    if let Some(hidden) = hidden {
      self.hidden_weights = hidden;
    }
    if let Some(output) = output {
      self.output_weights = output;
    }
    Ok(())
  }

  /// Forward pass. Returns `outputs` activations, each in (0, 1).
  pub fn predict(&self, features: &[f64]) -> Result<Vec<f64>> {
    let inputs = self.input_column(features)?;
    Ok(self.forward(&inputs)?.output.into_vec())
  }

  /// One step of backpropagation on a single sample.
  pub fn train(&mut self, features: &[f64], targets: &[f64]) -> Result<()> {
    self.train_step(features, targets).map(|_| ())
  }

  /// Same as [`Network::train`], returning the squared error seen before the update.
  pub(crate) fn train_step(&mut self, features: &[f64], targets: &[f64]) -> Result<f64> {
    let inputs = self.input_column(features)?;
    let targets = self.target_column(targets)?;
    let activations = self.forward(&inputs)?;
    let error = targets
      .sub(&activations.output)?
      .as_slice()
      .iter()
      .map(|e| e * e)
      .sum();
    self.backpropagate(&inputs, &targets, &activations)?;
    Ok(error)
  }

  /// Squared error of the current prediction against `targets`.
  pub fn squared_error(&self, features: &[f64], targets: &[f64]) -> Result<f64> {
    let outputs = self.predict(features)?;
    self.target_column(targets)?;
    Ok(outputs.iter().zip(targets).map(|(o, t)| (t - o) * (t - o)).sum())
  }

  /// Forward pass of the feedback variant; copies the designated hidden activations into `context`.
  pub fn predict_recurrent(&self, features: &[f64], context: &mut Context) -> Result<Vec<f64>> {
    let feedback = self.require_feedback(context)?;
    let inputs = self.input_column(&context.assemble(features))?;
    let activations = self.forward(&inputs)?;
    context.capture(feedback, activations.hidden.as_slice());
    Ok(activations.output.into_vec())
  }

  pub fn train_recurrent(&mut self, features: &[f64], targets: &[f64], context: &mut Context) -> Result<()> {
    let feedback = self.require_feedback(context)?.clone();
    let inputs = self.input_column(&context.assemble(features))?;
    let targets = self.target_column(targets)?;
    let activations = self.forward(&inputs)?;
    self.backpropagate(&inputs, &targets, &activations)?;
    context.capture(&feedback, activations.hidden.as_slice());
    Ok(())
  }

  fn require_feedback(&self, context: &Context) -> Result<&Feedback> {
    let feedback = self
      .feedback
      .as_ref()
      .ok_or_else(|| Error::Input("network has no feedback loop configured".to_string()))?;
    if context.values().len() != feedback.context_len() {
      return Err(Error::Input(format!(
        "context holds {} units, feedback loop expects {}",
        context.values().len(),
        feedback.context_len()
      )));
    }
    Ok(feedback)
  }

  fn forward(&self, inputs: &Matrix) -> Result<Activations> {
    let hidden = self.hidden_weights.dot(inputs)?.apply(sigmoid);
    let output = self.output_weights.dot(&hidden)?.apply(sigmoid);
    Ok(Activations { hidden, output })
  }

  fn backpropagate(&mut self, inputs: &Matrix, targets: &Matrix, activations: &Activations) -> Result<()> {
    let Activations { hidden, output } = activations;

    let output_errors = targets.sub(output)?;
    let output_delta = output_errors.mul_elem(&sigmoid_prime(output))?;
    // uses the output weights from before this step's update
    let hidden_errors = self.output_weights.transpose().dot(&output_delta)?;
    let hidden_delta = hidden_errors.mul_elem(&sigmoid_prime(hidden))?;

    let output_step = output_delta.dot(&hidden.transpose())?.scale(self.learning_rate);
    let hidden_step = hidden_delta.dot(&inputs.transpose())?.scale(self.learning_rate);
    self.output_weights.add_assign(&output_step)?;
    self.hidden_weights.add_assign(&hidden_step)
  }

  fn input_column(&self, features: &[f64]) -> Result<Matrix> {
    if features.len() != self.inputs {
      return Err(Error::Input(format!(
        "expected {} features, got {}",
        self.inputs,
        features.len()
      )));
    }
    Ok(Matrix::column(features.to_vec()))
  }

  fn target_column(&self, targets: &[f64]) -> Result<Matrix> {
    if targets.len() != self.outputs {
      return Err(Error::Input(format!(
        "expected {} targets, got {}",
        self.outputs,
        targets.len()
      )));
    }
    Ok(Matrix::column(targets.to_vec()))
  }
}

#[cfg(test)]
mod tests {
  use proptest::prelude::*;
  use rand::{rngs::StdRng, SeedableRng};

  use super::*;

  fn seeded(inputs: usize, hiddens: usize, outputs: usize, rate: f64) -> Network {
    Network::with_rng(inputs, hiddens, outputs, rate, &mut StdRng::seed_from_u64(42))
  }

  #[test]
  fn test_initialization_is_fan_in_scaled() {
    let net = seeded(784, 200, 10, 0.1);
    let hidden_limit = 1.0 / (784f64).sqrt();
    let output_limit = 1.0 / (200f64).sqrt();
    assert_eq!(net.hidden_weights().dims(), (200, 784));
    assert_eq!(net.output_weights().dims(), (10, 200));
    assert!(net.hidden_weights().as_slice().iter().all(|w| w.abs() <= hidden_limit));
    assert!(net.output_weights().as_slice().iter().all(|w| w.abs() <= output_limit));
  }

  #[test]
  fn test_predict_rejects_wrong_length() {
    let net = seeded(4, 3, 2, 0.1);
    assert!(matches!(net.predict(&[0.5; 3]), Err(Error::Input(_))));
  }

  #[test]
  fn test_train_rejects_wrong_lengths_without_mutation() {
    let mut net = seeded(4, 3, 2, 0.1);
    let before = net.hidden_weights().clone();
    assert!(net.train(&[0.5; 5], &[0.0, 1.0]).is_err());
    assert!(net.train(&[0.5; 4], &[0.0]).is_err());
    assert_eq!(net.hidden_weights(), &before);
  }

  #[test]
  fn test_predict_does_not_mutate() {
    let net = seeded(6, 4, 3, 0.1);
    let first = net.predict(&[0.2; 6]).unwrap();
    let second = net.predict(&[0.2; 6]).unwrap();
    assert_eq!(first, second);
  }

  #[test]
  fn test_single_sample_error_strictly_decreases() {
    let mut net = seeded(5, 4, 3, 0.05);
    let features = [0.9, 0.1, 0.4, 0.7, 0.3];
    let targets = [0.999, 0.001, 0.001];
    let mut previous = net.squared_error(&features, &targets).unwrap();
    for step in 0..200 {
      net.train(&features, &targets).unwrap();
      let current = net.squared_error(&features, &targets).unwrap();
      assert!(current < previous, "error rose at step {}: {} -> {}", step, previous, current);
      previous = current;
    }
  }

  #[test]
  fn test_two_pattern_convergence() {
    let mut net = Network::with_rng(2, 2, 1, 0.5, &mut StdRng::seed_from_u64(7));
    let patterns = [([1.0, 1.0], [0.0]), ([0.0, 1.0], [1.0])];
    for i in 0..5000 {
      let (features, targets) = &patterns[i % 2];
      net.train(features, targets).unwrap();
    }
    for (features, targets) in &patterns {
      let out = net.predict(features).unwrap();
      assert!((out[0] - targets[0]).abs() < 0.1, "{:?} -> {:?}", features, out);
    }
  }

  #[test]
  fn test_from_weights_checks_shapes() {
    let hidden = Matrix::zeros(3, 2);
    let output = Matrix::zeros(1, 2);
    assert!(Network::from_weights(hidden, output, 0.1).is_err());
  }

  #[test]
  fn test_replace_weights_checks_shapes() {
    let mut net = seeded(4, 3, 2, 0.1);
    assert!(net.replace_weights(Some(Matrix::zeros(4, 3)), None).is_err());
    net.replace_weights(None, Some(Matrix::zeros(2, 3))).unwrap();
    assert!(net.output_weights().as_slice().iter().all(|&w| w == 0.0));
  }

  proptest! {
    #[test]
    fn test_predict_outputs_are_probabilities(features in prop::collection::vec(0.001f64..1.0, 16), seed in any::<u64>()) {
      let net = Network::with_rng(16, 8, 10, 0.1, &mut StdRng::seed_from_u64(seed));
      let out = net.predict(&features).unwrap();
      prop_assert_eq!(out.len(), 10);
      prop_assert!(out.iter().all(|&o| o > 0.0 && o < 1.0));
    }
  }
}

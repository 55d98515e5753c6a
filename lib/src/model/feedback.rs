//! Elman style feedback: selected hidden activations are copied back into context
//! input units before the next step. Only the copy-back differs from the plain network.

use std::ops::Range;

/// Initial value of every context unit.
pub const CONTEXT_REST: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feedback {
  /// Hidden units whose activations are fed back.
  pub source: Range<usize>,
}

impl Feedback {
  pub fn new(source: Range<usize>) -> Self {
    Self { source }
  }

  /// Number of context units at the tail of the input layer.
  pub fn context_len(&self) -> usize {
    self.source.len()
  }
}

/// Context unit values carried from one step to the next.
#[derive(Debug, Clone, PartialEq)]
pub struct Context {
  values: Vec<f64>,
}

impl Context {
  pub fn new(feedback: &Feedback) -> Self {
    Self {
      values: vec![CONTEXT_REST; feedback.context_len()],
    }
  }

  pub fn values(&self) -> &[f64] {
    &self.values
  }

  pub fn reset(&mut self) {
    self.values.iter_mut().for_each(|v| *v = CONTEXT_REST);
  }

  /// External features followed by the context units.
  pub(crate) fn assemble(&self, features: &[f64]) -> Vec<f64> {
    let mut inputs = Vec::with_capacity(features.len() + self.values.len());
    inputs.extend_from_slice(features);
    inputs.extend_from_slice(&self.values);
    inputs
  }

  pub(crate) fn capture(&mut self, feedback: &Feedback, hidden: &[f64]) {
    self.values.copy_from_slice(&hidden[feedback.source.clone()]);
  }
}

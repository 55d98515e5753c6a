use tracing::warn;

use crate::{
  model::{self, Evaluation},
  Error, Result, Settings,
};

/// Accuracy of the stored weights on the test dataset.
pub struct Evaluate {
  settings: Settings,
}

impl Evaluate {
  pub fn new(settings: Settings) -> Self {
    Self { settings }
  }

  pub fn run(self) -> Result<Evaluation> {
    let mut network = model::from_settings(&self.settings);
    let outcome = self.settings.weight_store().load(&mut network)?;
    if outcome.is_cold() {
      return Err(Error::Input(format!(
        "no trained weights at {:?}, run setup first",
        self.settings.hidden_weights
      )));
    }
    if !outcome.is_complete() {
      warn!(?outcome, "only part of the weights were restored");
    }
    network.evaluate(&self.settings.test_data())
  }
}

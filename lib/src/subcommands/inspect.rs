use std::path::{Path, PathBuf};

use crate::{
  imaging::{render_ascii, ImageDecoder},
  model,
  pipeline::{Decoder, Prediction},
  Error, Result, Settings,
};

/// Classifies one image file locally and draws what the network sees.
pub struct Inspect {
  settings: Settings,
  image_path: PathBuf,
  invert: bool,
}

pub struct Inspection {
  pub picture: String,
  pub prediction: Prediction,
  /// False when no weights were found and the network is untrained.
  pub trained: bool,
}

impl Inspect {
  pub fn new(settings: Settings, image_path: &Path, invert: bool) -> Self {
    Self {
      settings,
      image_path: image_path.to_path_buf(),
      invert,
    }
  }

  pub fn run(self) -> Result<Inspection> {
    let bytes = std::fs::read(&self.image_path)
      .map_err(|e| Error::Input(format!("cannot read {:?}: {}", self.image_path, e)))?;
    let decoder = ImageDecoder::default();
    let features = decoder.decode(&bytes, self.invert)?;

    let mut network = model::from_settings(&self.settings);
    let outcome = self.settings.weight_store().load(&mut network)?;
    let outputs = network.predict(&features)?;
    Ok(Inspection {
      picture: render_ascii(&features, decoder.side() as usize),
      prediction: Prediction::from_outputs(&outputs),
      trained: outcome.is_complete(),
    })
  }
}

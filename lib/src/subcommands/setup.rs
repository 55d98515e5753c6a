use std::path::{Path, PathBuf};

use rand::{rngs::StdRng, SeedableRng};
use serde::Serialize;
use tracing::info;

use crate::{
  model::{split_dataset, Evaluation, InMemoryDataset, Network, TrainingReport},
  Result, Settings,
};

/// Offline training: dataset in, weight blobs out.
pub struct Setup {
  settings: Settings,
  holdout: Option<f64>,
  report_output_path: Option<PathBuf>,
  seed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SetupReport {
  pub training: TrainingReport,
  /// Accuracy on the rows held out of training, when a split was requested.
  pub holdout: Option<Evaluation>,
}

impl Setup {
  /// `holdout` is the fraction of rows kept for evaluation.
  pub fn new(settings: Settings, holdout: Option<f64>, report_output_path: Option<&Path>, seed: u64) -> Self {
    Self {
      settings,
      holdout,
      report_output_path: report_output_path.map(PathBuf::from),
      seed,
    }
  }

  pub fn run(self) -> Result<SetupReport> {
    let mut rng = StdRng::seed_from_u64(self.seed);
    let settings = &self.settings;
    let mut network = Network::with_rng(
      settings.input_size,
      settings.hidden_size,
      settings.output_size,
      settings.learning_rate,
      &mut rng,
    );
    let params = settings.training_params();

    let report = match self.holdout {
      None => SetupReport {
        training: network.run_training_loop(&settings.train_data(), &params)?,
        holdout: None,
      },
      Some(fraction) => {
        let (all, dropped) = InMemoryDataset::collect(&settings.train_data(), params.policy)?;
        let (train, test) = split_dataset(all.rows, 1.0 - fraction, Some(&mut rng));
        info!(train = train.len(), test = test.len(), dropped, "split dataset");
        let mut training = network.run_training_loop(&InMemoryDataset::new(train), &params)?;
        // the streaming path counts a malformed row once per epoch
        training.skipped += dropped * params.epochs;
        let holdout = network.evaluate(&InMemoryDataset::new(test))?;
        SetupReport {
          training,
          holdout: Some(holdout),
        }
      }
    };

    settings.weight_store().save(&network)?;
    if let Some(path) = &self.report_output_path {
      crate::utils::serialize_to_file(path, &report)?;
      info!(?path, "wrote report");
    }
    Ok(report)
  }
}

pub mod dataset;
pub mod feedback;
pub mod network;
pub mod training;
pub mod types;
pub mod utils;
pub mod weights;

pub use dataset::*;
pub use feedback::{Context, Feedback};
pub use network::*;
pub use training::*;
pub use types::*;
pub use utils::*;
pub use weights::*;

use crate::Settings;

/// A network with the configured dimensions and freshly randomized weights.
pub fn from_settings(settings: &Settings) -> Network {
  Network::new(
    settings.input_size,
    settings.hidden_size,
    settings.output_size,
    settings.learning_rate,
  )
}

use digits::*;

mod app_config;

use app_config::AppConfig;
use clap::{Parser, Subcommand};
use model::RowPolicy;
use std::{error::Error, path::PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
  /// YAML config file; flags given on the command line take precedence
  #[arg(short, long, global = true, value_name = "PATH")]
  config: Option<PathBuf>,
  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Upload an image to a running server
  Client {
    /// Image to be classified
    #[arg(long, value_name = "PATH")]
    input_file: PathBuf,
    /// Server root
    #[arg(long, default_value = "http://localhost:8080")]
    url: String,
    /// Invert the image before prediction
    #[arg(long)]
    invert: bool,
  },
  /// Serve /train and /predict
  Server {
    #[arg(short, long, value_name = "ADDR")]
    listen: Option<String>,
    /// Key-value service for cached predictions; empty for in-process
    #[arg(long, value_name = "ADDR")]
    cache: Option<String>,
  },
  /// Train on the dataset and save the weights
  Model {
    #[arg(short, long, value_name = "PATH")]
    data: Option<PathBuf>,
    #[arg(short, long, value_name = "INT")]
    epochs: Option<usize>,
    /// Fraction of rows held out for evaluation
    #[arg(long, value_name = "FRACTION", value_parser = parse_fraction)]
    holdout: Option<f64>,
    /// Write a JSON training report here
    #[arg(long, value_name = "PATH")]
    report: Option<PathBuf>,
    #[arg(long, value_name = "INT", default_value_t = 1)]
    seed: u64,
    /// Abort on malformed rows instead of skipping them
    #[arg(long)]
    reject_malformed: bool,
  },
  /// Accuracy of the stored weights on the test dataset
  Evaluate {
    #[arg(short, long, value_name = "PATH")]
    data: Option<PathBuf>,
  },
  /// Classify an image locally and draw it
  Inspect {
    #[arg(long, value_name = "PATH")]
    input_file: PathBuf,
    #[arg(long)]
    invert: bool,
  },
  /// Check weight blobs and the cache service
  Doctor,
}

fn parse_fraction(s: &str) -> Result<f64, String> {
  match s.parse::<f64>() {
    Ok(v) if v > 0.0 && v < 1.0 => Ok(v),
    _ => Err(format!("expected a number strictly between 0 and 1, got {:?}", s)),
  }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
  utils::init_logging()?;
  let args = Cli::parse();

  let file_config = match &args.config {
    Some(path) => AppConfig::from_file(path)?,
    None => AppConfig::default(),
  };

  match args.command {
    Command::Client {
      input_file,
      url,
      invert,
    } => {
      let app = subcommands::Client::new(&input_file, url, invert);
      let response = app.run().await?;
      println!("prediction: {}", response.prediction.prediction);
      println!("accuracy:   {:.2}%", response.prediction.accuracy);
      for (label, percent) in &response.prediction.results {
        println!("  {}: {:6.2}%", label, percent);
      }
      println!("took {}", response.process_time);
    }
    Command::Server { listen, cache } => {
      let flags = AppConfig {
        listen_addr: listen,
        cache_addr: cache,
        ..AppConfig::default()
      };
      let settings = file_config.merge(flags).into_settings()?;
      subcommands::Server::new(settings).run().await?;
    }
    Command::Model {
      data,
      epochs,
      holdout,
      report,
      seed,
      reject_malformed,
    } => {
      let flags = AppConfig {
        train_dataset: data,
        epochs,
        row_policy: reject_malformed.then_some(RowPolicy::Reject),
        ..AppConfig::default()
      };
      let settings = file_config.merge(flags).into_settings()?;
      let result = subcommands::Setup::new(settings, holdout, report.as_deref(), seed).run()?;
      info!(samples = result.training.samples, skipped = result.training.skipped, "done");
      println!(
        "trained {} epochs over {} samples in {:.1}s, loss {:.5}",
        result.training.epochs,
        result.training.samples,
        result.training.elapsed.as_secs_f64(),
        result.training.loss
      );
      if let Some(eval) = result.holdout {
        println!("holdout accuracy: {}/{} = {:.2}%", eval.correct, eval.total, eval.accuracy * 100.0);
      }
    }
    Command::Evaluate { data } => {
      let flags = AppConfig {
        test_dataset: data,
        ..AppConfig::default()
      };
      let settings = file_config.merge(flags).into_settings()?;
      let eval = subcommands::Evaluate::new(settings).run()?;
      println!("accuracy: {}/{} = {:.2}%", eval.correct, eval.total, eval.accuracy * 100.0);
    }
    Command::Inspect { input_file, invert } => {
      let settings = file_config.into_settings()?;
      let inspection = subcommands::Inspect::new(settings, &input_file, invert).run()?;
      println!("{}", inspection.picture);
      if !inspection.trained {
        println!("(no trained weights found, the answer below is from random weights)");
      }
      println!(
        "prediction: {} ({:.2}%)",
        inspection.prediction.prediction, inspection.prediction.accuracy
      );
    }
    Command::Doctor => {
      let settings = file_config.into_settings()?;
      let diagnosis = subcommands::Doctor::new(settings).run()?;
      println!("{}", diagnosis);
      if !diagnosis.healthy() {
        std::process::exit(1);
      }
    }
  }
  Ok(())
}

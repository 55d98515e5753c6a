use std::{
  error::Error,
  path::{Path, PathBuf},
};

use reqwest::multipart::{Form, Part};

use super::packet::{ErrorResponse, PredictResponse};

/// Uploads an image to a running server and returns its answer.
pub struct Client {
  url: String,
  image_path: PathBuf,
  invert: bool,
}

impl Client {
  /// `url` is the server root, e.g. `http://localhost:8080`.
  pub fn new(image_path: &Path, url: String, invert: bool) -> Self {
    Self {
      url,
      image_path: image_path.to_path_buf(),
      invert,
    }
  }

  pub async fn run(self) -> Result<PredictResponse, Box<dyn Error>> {
    let bytes = std::fs::read(&self.image_path)?;
    let file_name = self
      .image_path
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_else(|| "image".to_string());
    let form = Form::new()
      .part("image", Part::bytes(bytes).file_name(file_name))
      .text("invert", self.invert.to_string());

    let client = reqwest::Client::new();
    let response = client
      .post(format!("{}/predict", self.url.trim_end_matches('/')))
      .multipart(form)
      .send()
      .await?;
    let status = response.status();
    let text = response.text().await?;
    if status.is_success() {
      Ok(serde_json::from_str(&text)?)
    } else {
      let message = serde_json::from_str::<ErrorResponse>(&text)
        .map(|e| e.message)
        .unwrap_or(text);
      Err(format!("server answered {}: {}", status, message).into())
    }
  }
}

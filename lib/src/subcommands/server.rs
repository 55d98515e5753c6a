use std::{
  future::IntoFuture,
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc, PoisonError, RwLock,
  },
  time::Instant,
};

use axum::{
  extract::{Multipart, State},
  http::StatusCode,
  response::{IntoResponse, Response},
  routing::post,
  Json, Router,
};
use tokio::sync::Notify;
use tracing::{error, info, warn};

use super::packet::{ErrorResponse, PredictResponse, TrainResponse, OPERATION_PREDICT, OPERATION_TRAIN};
use crate::{
  cache::{self, Cache},
  imaging::ImageDecoder,
  model::{self, WeightStore},
  Error, Network, Payload, PredictionPipeline, Settings,
};

pub struct Server {
  settings: Settings,
}

/// Shared by every request. Training works on a copy of the network and swaps it in when done,
/// so predictions keep being served meanwhile.
#[derive(Clone)]
pub struct AppState {
  settings: Arc<Settings>,
  network: Arc<RwLock<Network>>,
  store: WeightStore,
  pipeline: Arc<PredictionPipeline<RwLock<Network>, ImageDecoder>>,
  training: Arc<AtomicBool>,
}

impl AppState {
  /// Loads whatever weights are on disk; missing blobs leave the network untrained.
  pub fn new(settings: Settings, cache: Arc<dyn Cache>) -> crate::Result<Self> {
    let store = settings.weight_store();
    let mut network = model::from_settings(&settings);
    let outcome = store.load(&mut network)?;
    if !outcome.is_complete() {
      warn!(?outcome, "weights incomplete, serving an untrained network until /train is called");
    }
    let network = Arc::new(RwLock::new(network));
    let pipeline = PredictionPipeline::new(network.clone(), ImageDecoder::default(), cache);
    Ok(Self {
      settings: Arc::new(settings),
      network,
      store,
      pipeline: Arc::new(pipeline),
      training: Arc::new(AtomicBool::new(false)),
    })
  }
}

impl Server {
  pub fn new(settings: Settings) -> Self {
    Self { settings }
  }

  pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
    let (addr, timeout) = (self.settings.cache_addr.clone(), self.settings.cache_timeout);
    let cache = tokio::task::spawn_blocking(move || cache::select_backend(addr.as_deref(), timeout)).await?;
    info!(backend = cache.backend(), "cache ready");

    let grace = self.settings.shutdown_timeout;
    let listen_addr = self.settings.listen_addr.clone();
    let state = tokio::task::spawn_blocking(move || AppState::new(self.settings, cache)).await??;

    let tcp_listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    info!(addr = %tcp_listener.local_addr()?, "listening");

    let stopping = Arc::new(Notify::new());
    let signal = {
      let stopping = stopping.clone();
      async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
          error!(%err, "cannot listen for shutdown signal");
          std::future::pending::<()>().await;
        }
        info!(?grace, "shutting down server");
        stopping.notify_one();
      }
    };
    let serve = axum::serve(tcp_listener, router(state))
      .with_graceful_shutdown(signal)
      .into_future();

    tokio::select! {
      res = serve => res?,
      _ = async {
        stopping.notified().await;
        tokio::time::sleep(grace).await;
      } => warn!("grace period elapsed, dropping open connections"),
    }
    Ok(())
  }
}

pub fn router(state: AppState) -> Router {
  Router::new()
    .route("/", post(dispatch))
    .route("/train", post(train))
    .route("/predict", post(predict))
    .with_state(state)
}

struct ApiError {
  status: StatusCode,
  started: Instant,
  message: String,
}

impl ApiError {
  fn new(status: StatusCode, started: Instant, message: impl Into<String>) -> Self {
    Self {
      status,
      started,
      message: message.into(),
    }
  }

  fn from_core(err: Error, started: Instant) -> Self {
    let status = match &err {
      Error::Input(_) | Error::MalformedRow { .. } => StatusCode::BAD_REQUEST,
      Error::DatasetUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
      _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    Self::new(status, started, err.to_string())
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    if self.status.is_server_error() {
      error!(status = %self.status, message = %self.message, "request failed");
    } else {
      warn!(status = %self.status, message = %self.message, "request rejected");
    }
    let body = ErrorResponse::new(self.status.as_u16(), self.started.elapsed(), self.message);
    (self.status, Json(body)).into_response()
  }
}

#[derive(Default)]
struct PredictForm {
  operation: Option<String>,
  image: Option<Vec<u8>>,
  invert: bool,
}

async fn read_form(mut multipart: Multipart, started: Instant) -> Result<PredictForm, ApiError> {
  let bad_request = |msg: String| ApiError::new(StatusCode::BAD_REQUEST, started, msg);
  let mut form = PredictForm::default();
  while let Some(field) = multipart.next_field().await.map_err(|e| bad_request(e.to_string()))? {
    let name = field.name().unwrap_or_default().to_string();
    match name.as_str() {
      "image" => form.image = Some(field.bytes().await.map_err(|e| bad_request(e.to_string()))?.to_vec()),
      "invert" => {
        let text = field.text().await.map_err(|e| bad_request(e.to_string()))?;
        form.invert = parse_flag(&text).ok_or_else(|| bad_request(format!("invert: cannot parse {:?}", text)))?;
      }
      "operation" => form.operation = Some(field.text().await.map_err(|e| bad_request(e.to_string()))?),
      _ => {}
    }
  }
  Ok(form)
}

/// Accepts the spellings `strconv.ParseBool`-style clients send.
fn parse_flag(text: &str) -> Option<bool> {
  match text.trim() {
    "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
    "" | "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
    _ => None,
  }
}

/// Single endpoint selecting the operation from the `operation` form field.
async fn dispatch(state: State<AppState>, multipart: Multipart) -> Response {
  let started = Instant::now();
  let mut form = match read_form(multipart, started).await {
    Ok(form) => form,
    Err(err) => return err.into_response(),
  };
  let operation = form.operation.take();
  match operation.as_deref() {
    Some(OPERATION_TRAIN) => train(state).await,
    Some(OPERATION_PREDICT) => run_predict(state, form, started).await.into_response(),
    other => ApiError::new(StatusCode::BAD_REQUEST, started, format!("unknown operation {:?}", other)).into_response(),
  }
}

async fn predict(state: State<AppState>, multipart: Multipart) -> Response {
  let started = Instant::now();
  match read_form(multipart, started).await {
    Ok(form) => run_predict(state, form, started).await.into_response(),
    Err(err) => err.into_response(),
  }
}

async fn run_predict(
  State(state): State<AppState>,
  form: PredictForm,
  started: Instant,
) -> Result<Json<PredictResponse>, ApiError> {
  let bytes = form
    .image
    .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, started, "missing image field"))?;
  let payload = Payload::new(bytes, form.invert);
  let pipeline = state.pipeline.clone();
  let prediction = tokio::task::spawn_blocking(move || pipeline.predict(&payload))
    .await
    .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, started, e.to_string()))?
    .map_err(|e| ApiError::from_core(e, started))?;
  info!(prediction = prediction.prediction, elapsed = ?started.elapsed(), "predicted");
  Ok(Json(PredictResponse::new(started.elapsed(), prediction)))
}

/// Clears the flag when training ends, however it ends.
struct TrainingGuard(Arc<AtomicBool>);

impl TrainingGuard {
  fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
    flag
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .ok()
      .map(|_| Self(flag.clone()))
  }
}

impl Drop for TrainingGuard {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

async fn train(State(state): State<AppState>) -> Response {
  let started = Instant::now();
  if state.store.is_trained() {
    info!("weights already on disk, skipping training");
    let body = TrainResponse::new(true, started.elapsed(), "Weights already present, training skipped");
    return (StatusCode::CREATED, Json(body)).into_response();
  }
  let Some(guard) = TrainingGuard::acquire(&state.training) else {
    return ApiError::new(StatusCode::CONFLICT, started, "training already in progress").into_response();
  };

  let job = tokio::task::spawn_blocking(move || {
    let _guard = guard;
    let mut network = state.network.read().unwrap_or_else(PoisonError::into_inner).clone();
    let report = network.run_training_loop(&state.settings.train_data(), &state.settings.training_params())?;
    let saved = state.store.save(&network);
    *state.network.write().unwrap_or_else(PoisonError::into_inner) = network;
    Ok::<_, Error>((report, saved))
  });

  match job.await {
    Ok(Ok((report, Ok(())))) => {
      info!(samples = report.samples, loss = report.loss, "training complete");
      let body = TrainResponse::new(true, started.elapsed(), "Training complete");
      (StatusCode::CREATED, Json(body)).into_response()
    }
    Ok(Ok((_, Err(err)))) => {
      error!(%err, "trained weights are live but could not be saved");
      let body = TrainResponse::new(false, started.elapsed(), format!("Training complete but weights not saved: {}", err));
      (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
    Ok(Err(err)) => ApiError::from_core(err, started).into_response(),
    Err(err) => ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, started, err.to_string()).into_response(),
  }
}

#[cfg(test)]
mod tests {
  use std::{
    io::Cursor,
    path::{Path, PathBuf},
  };

  use image::{GrayImage, ImageFormat, Luma};
  use reqwest::multipart;

  use super::*;
  use crate::{cache::MemoryCache, utils::init_logging_tests};

  fn scratch(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("digits-server-{}-{}", std::process::id(), name));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
  }

  fn settings(dir: &Path) -> Settings {
    Settings {
      train_dataset: dir.join("train.csv"),
      test_dataset: dir.join("test.csv"),
      hidden_weights: dir.join("hweights.model"),
      output_weights: dir.join("oweights.model"),
      cache_addr: None,
      hidden_size: 16,
      epochs: 1,
      ..Settings::default()
    }
  }

  fn digit_png() -> Vec<u8> {
    let img = GrayImage::from_fn(28, 28, |x, y| Luma([if (10..18).contains(&x) && y > 4 { 0 } else { 255 }]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
  }

  async fn spawn(settings: Settings) -> String {
    let state = AppState::new(settings, Arc::new(MemoryCache::new())).unwrap();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, router(state)).await });
    format!("http://{}", addr)
  }

  fn image_form(bytes: Vec<u8>, invert: &str) -> multipart::Form {
    multipart::Form::new()
      .part("image", multipart::Part::bytes(bytes).file_name("digit.png"))
      .text("invert", invert.to_string())
  }

  #[tokio::test]
  async fn test_predict_twice_gives_same_result() {
    let _guard = init_logging_tests();
    let base = spawn(settings(&scratch("predict"))).await;
    let client = reqwest::Client::new();

    let mut bodies = vec![];
    for _ in 0..2 {
      let res = client
        .post(format!("{}/predict", base))
        .multipart(image_form(digit_png(), "false"))
        .send()
        .await
        .unwrap();
      assert_eq!(res.status(), reqwest::StatusCode::OK);
      bodies.push(res.json::<PredictResponse>().await.unwrap());
    }
    assert!(bodies[0].success);
    assert_eq!(bodies[0].prediction, bodies[1].prediction);
    assert_eq!(bodies[0].prediction.results.len(), 10);
    assert!(bodies[0].prediction.prediction < 10);
    let best = bodies[0].prediction.results[&bodies[0].prediction.prediction.to_string()];
    assert_eq!(bodies[0].prediction.accuracy, best);
    assert!(bodies[0].prediction.results.values().all(|&p| (0.0..=100.0).contains(&p)));
  }

  #[tokio::test]
  async fn test_bad_uploads_are_400() {
    let base = spawn(settings(&scratch("bad"))).await;
    let client = reqwest::Client::new();

    let res = client
      .post(format!("{}/predict", base))
      .multipart(image_form(b"garbage".to_vec(), "false"))
      .send()
      .await
      .unwrap();
    assert_eq!(res.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: ErrorResponse = res.json().await.unwrap();
    assert_eq!(body.status, 400);
    assert!(!body.success);

    let res = client
      .post(format!("{}/predict", base))
      .multipart(image_form(digit_png(), "maybe"))
      .send()
      .await
      .unwrap();
    assert_eq!(res.status(), reqwest::StatusCode::BAD_REQUEST);

    let res = client
      .post(format!("{}/predict", base))
      .multipart(multipart::Form::new().text("invert", "true"))
      .send()
      .await
      .unwrap();
    assert_eq!(res.status(), reqwest::StatusCode::BAD_REQUEST);
  }

  #[tokio::test]
  async fn test_train_then_skip() {
    let dir = scratch("train");
    let row = |label: u8, ink: u8| format!("{},{}\n", label, vec![ink.to_string(); 784].join(","));
    std::fs::write(dir.join("train.csv"), format!("{}{}", row(0, 0), row(1, 255))).unwrap();
    let base = spawn(settings(&dir)).await;
    let client = reqwest::Client::new();

    let res = client.post(format!("{}/train", base)).send().await.unwrap();
    assert_eq!(res.status(), reqwest::StatusCode::CREATED);
    let body: TrainResponse = res.json().await.unwrap();
    assert!(body.success);
    assert_eq!(body.message, "Training complete");
    assert!(dir.join("hweights.model").exists());

    let res = client.post(format!("{}/train", base)).send().await.unwrap();
    let body: TrainResponse = res.json().await.unwrap();
    assert!(body.message.contains("skipped"));
  }

  #[tokio::test]
  async fn test_missing_dataset_is_reported() {
    let dir = scratch("nodata");
    let base = spawn(settings(&dir)).await;
    let form = multipart::Form::new().text("operation", "train");
    let res = reqwest::Client::new()
      .post(format!("{}/", base))
      .multipart(form)
      .send()
      .await
      .unwrap();
    assert_eq!(res.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
    assert!(!dir.join("hweights.model").exists());
  }

  #[test]
  fn test_parse_flag() {
    assert_eq!(parse_flag("true"), Some(true));
    assert_eq!(parse_flag("1"), Some(true));
    assert_eq!(parse_flag("F"), Some(false));
    assert_eq!(parse_flag(""), Some(false));
    assert_eq!(parse_flag("yes"), None);
  }

  #[test]
  fn test_training_guard_is_exclusive() {
    let flag = Arc::new(AtomicBool::new(false));
    let guard = TrainingGuard::acquire(&flag).unwrap();
    assert!(TrainingGuard::acquire(&flag).is_none());
    drop(guard);
    assert!(TrainingGuard::acquire(&flag).is_some());
  }
}

use std::fmt;

use crate::{cache, Result, Settings};

/// Checks the pieces a server needs before it starts: weight blobs and the cache service.
pub struct Doctor {
  settings: Settings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlobStatus {
  pub name: &'static str,
  pub expected: (usize, usize),
  /// Shape in the blob header; `None` when the blob is absent or empty.
  pub found: Option<(usize, usize)>,
}

impl BlobStatus {
  pub fn is_ok(&self) -> bool {
    self.found == Some(self.expected)
  }
}

#[derive(Debug, Clone)]
pub struct Diagnosis {
  pub blobs: Vec<BlobStatus>,
  pub cache_backend: &'static str,
}

impl Diagnosis {
  pub fn healthy(&self) -> bool {
    self.blobs.iter().all(BlobStatus::is_ok)
  }
}

impl fmt::Display for Diagnosis {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for blob in &self.blobs {
      match blob.found {
        None => writeln!(f, "{}: missing (network will start untrained)", blob.name)?,
        Some(found) if found == blob.expected => writeln!(f, "{}: ok {:?}", blob.name, found)?,
        Some(found) => writeln!(f, "{}: shape {:?}, expected {:?}", blob.name, found, blob.expected)?,
      }
    }
    write!(f, "cache: {}", self.cache_backend)
  }
}

impl Doctor {
  pub fn new(settings: Settings) -> Self {
    Self { settings }
  }

  pub fn run(self) -> Result<Diagnosis> {
    let s = &self.settings;
    let (hidden, output) = s.weight_store().stored_dims()?;
    let cache = cache::select_backend(s.cache_addr.as_deref(), s.cache_timeout);
    Ok(Diagnosis {
      blobs: vec![
        BlobStatus {
          name: "hidden weights",
          expected: (s.hidden_size, s.input_size),
          found: hidden,
        },
        BlobStatus {
          name: "output weights",
          expected: (s.output_size, s.hidden_size),
          found: output,
        },
      ],
      cache_backend: cache.backend(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model;

  #[test]
  fn test_reports_shape_mismatch() {
    let dir = std::env::temp_dir().join(format!("digits-doctor-{}", std::process::id()));
    let settings = Settings {
      hidden_weights: dir.join("h.model"),
      output_weights: dir.join("o.model"),
      cache_addr: None,
      input_size: 4,
      hidden_size: 3,
      output_size: 2,
      ..Settings::default()
    };
    settings.weight_store().save(&model::from_settings(&settings)).unwrap();

    let ok = Doctor::new(settings.clone()).run().unwrap();
    assert!(ok.healthy());
    assert_eq!(ok.cache_backend, "memory");

    let bigger = Settings {
      hidden_size: 5,
      ..settings
    };
    let diagnosis = Doctor::new(bigger).run().unwrap();
    assert!(!diagnosis.healthy());
    assert_eq!(diagnosis.blobs[0].found, Some((3, 4)));
    assert!(diagnosis.to_string().contains("expected (5, 4)"));
  }
}

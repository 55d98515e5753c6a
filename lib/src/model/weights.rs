//! Persistence of the two weight matrices, one blob each.
//!
//! Blob layout (little endian): `u64` rows, `u64` cols, then `rows * cols` `f64` values in
//! row-major order. Nothing else.

use std::{
  fs::{self, File},
  io::{self, BufReader, BufWriter, Read, Write},
  path::{Path, PathBuf},
};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::{info, instrument};

use super::Network;
use crate::{matrix::Matrix, Error, Result};

#[derive(Debug, Clone)]
pub struct WeightStore {
  hidden_path: PathBuf,
  output_path: PathBuf,
}

/// Which matrices a [`WeightStore::load`] restored. Anything not restored keeps its random
/// initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadOutcome {
  pub hidden: bool,
  pub output: bool,
}

impl LoadOutcome {
  pub fn is_cold(&self) -> bool {
    !self.hidden && !self.output
  }

  pub fn is_complete(&self) -> bool {
    self.hidden && self.output
  }
}

impl WeightStore {
  pub fn new(hidden_path: impl Into<PathBuf>, output_path: impl Into<PathBuf>) -> Self {
    Self {
      hidden_path: hidden_path.into(),
      output_path: output_path.into(),
    }
  }

  pub fn hidden_path(&self) -> &Path {
    &self.hidden_path
  }

  pub fn output_path(&self) -> &Path {
    &self.output_path
  }

  /// Both blobs exist and are non-empty.
  pub fn is_trained(&self) -> bool {
    blob_present(&self.hidden_path) && blob_present(&self.output_path)
  }

  #[instrument(level = "info", skip_all)]
  pub fn save(&self, network: &Network) -> Result<()> {
    write_blob(&self.hidden_path, network.hidden_weights())?;
    info!(path = ?self.hidden_path, "saved hidden weights");
    write_blob(&self.output_path, network.output_weights())?;
    info!(path = ?self.output_path, "saved output weights");
    Ok(())
  }

  /// Restores whichever blobs are present. Both are read and checked before either matrix is
  /// replaced, so a failure leaves `network` as it was.
  #[instrument(level = "info", skip_all)]
  pub fn load(&self, network: &mut Network) -> Result<LoadOutcome> {
    let (hidden_dims, output_dims) = network.weight_dims();
    let hidden = read_blob(&self.hidden_path, hidden_dims)?;
    let output = read_blob(&self.output_path, output_dims)?;
    let outcome = LoadOutcome {
      hidden: hidden.is_some(),
      output: output.is_some(),
    };
    network.replace_weights(hidden, output)?;
    info!(hidden = outcome.hidden, output = outcome.output, "loaded weights");
    Ok(outcome)
  }

  /// Shapes recorded in the blob headers, without reading the values.
  pub fn stored_dims(&self) -> Result<(Option<(usize, usize)>, Option<(usize, usize)>)> {
    Ok((peek_dims(&self.hidden_path)?, peek_dims(&self.output_path)?))
  }
}

fn blob_present(path: &Path) -> bool {
  fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false)
}

fn persistence(path: &Path) -> impl FnOnce(io::Error) -> Error + '_ {
  move |source| Error::Persistence {
    path: path.to_path_buf(),
    source,
  }
}

/// Writes next to `path` and renames into place, so readers see either the old blob or the new one.
fn write_blob(path: &Path, matrix: &Matrix) -> Result<()> {
  if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
    fs::create_dir_all(dir).map_err(persistence(path))?;
  }
  let tmp = path.with_extension("tmp");
  let write = || -> io::Result<()> {
    let mut w = BufWriter::new(File::create(&tmp)?);
    w.write_u64::<LittleEndian>(matrix.rows() as u64)?;
    w.write_u64::<LittleEndian>(matrix.cols() as u64)?;
    for &v in matrix.as_slice() {
      w.write_f64::<LittleEndian>(v)?;
    }
    w.flush()?;
    w.get_ref().sync_all()
  };
  write().map_err(persistence(path))?;
  fs::rename(&tmp, path).map_err(persistence(path))
}

fn open_blob(path: &Path) -> Result<Option<BufReader<File>>> {
  if !blob_present(path) {
    return Ok(None);
  }
  let file = File::open(path).map_err(persistence(path))?;
  Ok(Some(BufReader::new(file)))
}

fn read_header<R: Read>(r: &mut R) -> io::Result<(usize, usize)> {
  let rows = r.read_u64::<LittleEndian>()?;
  let cols = r.read_u64::<LittleEndian>()?;
  let as_usize = |v: u64| usize::try_from(v).map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "dimension overflow"));
  Ok((as_usize(rows)?, as_usize(cols)?))
}

fn peek_dims(path: &Path) -> Result<Option<(usize, usize)>> {
  match open_blob(path)? {
    Some(mut r) => read_header(&mut r).map(Some).map_err(persistence(path)),
    None => Ok(None),
  }
}

fn read_blob(path: &Path, expected: (usize, usize)) -> Result<Option<Matrix>> {
  let mut r = match open_blob(path)? {
    Some(r) => r,
    None => return Ok(None),
  };
  let found = read_header(&mut r).map_err(persistence(path))?;
  if found != expected {
    return Err(Error::DimensionMismatch {
      path: path.to_path_buf(),
      expected,
      found,
    });
  }
  let mut data = vec![0.0; found.0 * found.1];
  r.read_f64_into::<LittleEndian>(&mut data).map_err(persistence(path))?;
  let mut rest = [0u8; 1];
  if r.read(&mut rest).map_err(persistence(path))? != 0 {
    return Err(persistence(path)(io::Error::new(io::ErrorKind::InvalidData, "trailing bytes after weights")));
  }
  Matrix::new(found.0, found.1, data).map(Some)
}

#[cfg(test)]
mod tests {
  use rand::{rngs::StdRng, SeedableRng};

  use super::*;

  fn store(name: &str) -> WeightStore {
    let dir = std::env::temp_dir().join(format!("digits-weights-{}-{}", std::process::id(), name));
    let _ = fs::remove_dir_all(&dir);
    WeightStore::new(dir.join("hweights.model"), dir.join("oweights.model"))
  }

  fn net(seed: u64) -> Network {
    Network::with_rng(12, 5, 3, 0.1, &mut StdRng::seed_from_u64(seed))
  }

  #[test]
  fn test_save_then_load_is_bit_identical() {
    let store = store("roundtrip");
    let mut trained = net(1);
    trained.train(&[0.5; 12], &[0.999, 0.001, 0.001]).unwrap();
    store.save(&trained).unwrap();
    assert!(store.is_trained());

    let mut fresh = net(2);
    assert_ne!(fresh.hidden_weights(), trained.hidden_weights());
    let outcome = store.load(&mut fresh).unwrap();
    assert!(outcome.is_complete());
    let bits = |m: &Matrix| m.as_slice().iter().map(|v| v.to_bits()).collect::<Vec<_>>();
    assert_eq!(bits(fresh.hidden_weights()), bits(trained.hidden_weights()));
    assert_eq!(bits(fresh.output_weights()), bits(trained.output_weights()));
  }

  #[test]
  fn test_missing_blobs_are_a_cold_start() {
    let store = store("cold");
    let mut network = net(3);
    let before = network.clone();
    let outcome = store.load(&mut network).unwrap();
    assert!(outcome.is_cold());
    assert!(!store.is_trained());
    assert_eq!(network.hidden_weights(), before.hidden_weights());
    let out = network.predict(&[0.3; 12]).unwrap();
    assert_eq!(out.len(), 3);
    assert!(out.iter().all(|&o| o > 0.0 && o < 1.0));
  }

  #[test]
  fn test_empty_blob_is_ignored() {
    let store = store("empty");
    store.save(&net(4)).unwrap();
    File::create(store.output_path()).unwrap();
    let mut network = net(5);
    let outcome = store.load(&mut network).unwrap();
    assert_eq!(outcome, LoadOutcome { hidden: true, output: false });
    assert!(!store.is_trained());
  }

  #[test]
  fn test_dimension_mismatch_leaves_network_untouched() {
    let store = store("mismatch");
    store.save(&Network::with_rng(12, 6, 3, 0.1, &mut StdRng::seed_from_u64(6))).unwrap();
    let mut network = net(7);
    let before = network.clone();
    match store.load(&mut network) {
      Err(Error::DimensionMismatch { expected, found, .. }) => {
        assert_eq!(expected, (5, 12));
        assert_eq!(found, (6, 12));
      }
      other => panic!("expected dimension mismatch, got {:?}", other),
    }
    assert_eq!(network.hidden_weights(), before.hidden_weights());
    assert_eq!(network.output_weights(), before.output_weights());
  }

  #[test]
  fn test_truncated_blob_is_a_persistence_error() {
    let store = store("truncated");
    store.save(&net(8)).unwrap();
    let bytes = fs::read(store.hidden_path()).unwrap();
    fs::write(store.hidden_path(), &bytes[..bytes.len() - 4]).unwrap();
    assert!(matches!(store.load(&mut net(9)), Err(Error::Persistence { .. })));
  }

  #[test]
  fn test_trailing_bytes_rejected() {
    let store = store("trailing");
    store.save(&net(10)).unwrap();
    let mut bytes = fs::read(store.output_path()).unwrap();
    bytes.push(0);
    fs::write(store.output_path(), bytes).unwrap();
    assert!(matches!(store.load(&mut net(11)), Err(Error::Persistence { .. })));
  }

  #[test]
  fn test_blob_layout() {
    let store = store("layout");
    let network = net(12);
    store.save(&network).unwrap();
    let bytes = fs::read(store.output_path()).unwrap();
    assert_eq!(bytes.len(), 16 + 3 * 5 * 8);
    assert_eq!(&bytes[..8], &3u64.to_le_bytes());
    assert_eq!(&bytes[8..16], &5u64.to_le_bytes());
    assert_eq!(store.stored_dims().unwrap(), (Some((5, 12)), Some((3, 5))));
  }
}

use std::{fs::File, path::PathBuf};

use csv::{ReaderBuilder, StringRecord};

use super::{Row, RowPolicy};
use crate::{Error, Result};

pub type Rows<'a> = Box<dyn Iterator<Item = Result<Row>> + 'a>;

/// Source of labelled rows. `rows` may be called once per epoch.
pub trait Dataset {
  fn rows(&self) -> Result<Rows<'_>>;
}

/// MNIST in CSV form: `label,p0,...,pN` with intensities in [0, 255], no header.
#[derive(Debug, Clone)]
pub struct CsvDataset {
  path: PathBuf,
  pixels: usize,
  classes: usize,
}

impl CsvDataset {
  pub fn new(path: impl Into<PathBuf>, pixels: usize, classes: usize) -> Self {
    Self {
      path: path.into(),
      pixels,
      classes,
    }
  }

  pub fn path(&self) -> &PathBuf {
    &self.path
  }
}

impl Dataset for CsvDataset {
  fn rows(&self) -> Result<Rows<'_>> {
    let file = File::open(&self.path).map_err(|source| Error::DatasetUnavailable {
      path: self.path.clone(),
      source,
    })?;
    let reader = ReaderBuilder::new()
      .has_headers(false)
      .flexible(true)
      .from_reader(file);
    let (pixels, classes) = (self.pixels, self.classes);
    let rows = reader
      .into_records()
      .enumerate()
      // some exports carry a "label,pixel0,..." header line
      .filter(|(i, record)| !(*i == 0 && matches!(record, Ok(r) if r.get(0) == Some("label"))))
      .map(move |(i, record)| {
        let row = i + 1;
        let record = record.map_err(|e| Error::MalformedRow {
          row,
          reason: e.to_string(),
        })?;
        parse_record(row, &record, pixels, classes)
      });
    Ok(Box::new(rows))
  }
}

fn parse_record(row: usize, record: &StringRecord, pixels: usize, classes: usize) -> Result<Row> {
  let malformed = |reason: String| Error::MalformedRow { row, reason };
  if record.len() != pixels + 1 {
    return Err(malformed(format!("expected {} fields, found {}", pixels + 1, record.len())));
  }
  let label: usize = record[0]
    .trim()
    .parse()
    .map_err(|_| malformed(format!("label {:?} is not a class index", &record[0])))?;
  if label >= classes {
    return Err(malformed(format!("label {} out of range for {} classes", label, classes)));
  }
  let pixels = record
    .iter()
    .skip(1)
    .enumerate()
    .map(|(col, field)| match field.trim().parse::<f64>() {
      Ok(v) if (0.0..=255.0).contains(&v) => Ok(v),
      _ => Err(malformed(format!("pixel {} has value {:?}", col, field))),
    })
    .collect::<Result<Vec<f64>>>()?;
  Ok(Row { label, pixels })
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InMemoryDataset {
  pub rows: Vec<Row>,
}

impl InMemoryDataset {
  pub fn new(rows: Vec<Row>) -> Self {
    Self { rows }
  }

  /// Reads every row of `source` into memory. Under [`RowPolicy::Skip`] malformed rows are
  /// dropped with a warning and counted in the second element; under [`RowPolicy::Reject`]
  /// the first one is returned as the error.
  pub fn collect<D: Dataset + ?Sized>(source: &D, policy: RowPolicy) -> Result<(Self, usize)> {
    let mut rows = Vec::new();
    let mut skipped = 0;
    for row in source.rows()? {
      match row {
        Ok(row) => rows.push(row),
        Err(err @ Error::MalformedRow { .. }) if policy == RowPolicy::Skip => {
          tracing::warn!(%err, "dropping row");
          skipped += 1;
        }
        Err(err) => return Err(err),
      }
    }
    Ok((Self { rows }, skipped))
  }

  pub fn len(&self) -> usize {
    self.rows.len()
  }

  pub fn is_empty(&self) -> bool {
    self.rows.is_empty()
  }
}

impl Dataset for InMemoryDataset {
  fn rows(&self) -> Result<Rows<'_>> {
    Ok(Box::new(self.rows.iter().cloned().map(Ok)))
  }
}

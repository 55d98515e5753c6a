//! Dense row-major matrices of `f64`.
//!
//! Every producing operation allocates its result; the only in-place operation
//! is [`Matrix::add_assign`], used by the weight update.

use rand::{
  distributions::{Distribution, Uniform},
  Rng,
};

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
  rows: usize,
  cols: usize,
  data: Vec<f64>,
}

impl Matrix {
  pub fn new(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self> {
    if data.len() != rows * cols {
      return Err(Error::Input(format!(
        "{} values cannot fill a {}x{} matrix",
        data.len(),
        rows,
        cols
      )));
    }
    Ok(Self { rows, cols, data })
  }

  pub fn zeros(rows: usize, cols: usize) -> Self {
    Self {
      rows,
      cols,
      data: vec![0.0; rows * cols],
    }
  }

  /// A column vector (n x 1).
  pub fn column(values: Vec<f64>) -> Self {
    Self {
      rows: values.len(),
      cols: 1,
      data: values,
    }
  }

  /// Entries sampled uniformly from `[-1/sqrt(fan_in), 1/sqrt(fan_in)]`.
  pub fn random_uniform<R: Rng + ?Sized>(rows: usize, cols: usize, fan_in: usize, rng: &mut R) -> Self {
    let limit = 1.0 / (fan_in.max(1) as f64).sqrt();
    let dist = Uniform::new_inclusive(-limit, limit);
    let data = (0..rows * cols).map(|_| dist.sample(rng)).collect();
    Self { rows, cols, data }
  }

  pub fn rows(&self) -> usize {
    self.rows
  }

  pub fn cols(&self) -> usize {
    self.cols
  }

  pub fn dims(&self) -> (usize, usize) {
    (self.rows, self.cols)
  }

  pub fn at(&self, row: usize, col: usize) -> f64 {
    self.data[row * self.cols + col]
  }

  pub fn as_slice(&self) -> &[f64] {
    &self.data
  }

  pub fn into_vec(self) -> Vec<f64> {
    self.data
  }

  /// Matrix product `self · other`.
  pub fn dot(&self, other: &Matrix) -> Result<Matrix> {
    if self.cols != other.rows {
      return Err(self.mismatch("dot", other));
    }
    let mut out = vec![0.0; self.rows * other.cols];
    for i in 0..self.rows {
      let out_row = &mut out[i * other.cols..(i + 1) * other.cols];
      for k in 0..self.cols {
        let a = self.data[i * self.cols + k];
        if a == 0.0 {
          continue;
        }
        let other_row = &other.data[k * other.cols..(k + 1) * other.cols];
        for (o, b) in out_row.iter_mut().zip(other_row) {
          *o += a * b;
        }
      }
    }
    Ok(Matrix {
      rows: self.rows,
      cols: other.cols,
      data: out,
    })
  }

  /// Hadamard product.
  pub fn mul_elem(&self, other: &Matrix) -> Result<Matrix> {
    self.zip_with("mul_elem", other, |a, b| a * b)
  }

  pub fn add(&self, other: &Matrix) -> Result<Matrix> {
    self.zip_with("add", other, |a, b| a + b)
  }

  pub fn sub(&self, other: &Matrix) -> Result<Matrix> {
    self.zip_with("sub", other, |a, b| a - b)
  }

  pub fn scale(&self, factor: f64) -> Matrix {
    self.apply(|v| v * factor)
  }

  pub fn transpose(&self) -> Matrix {
    let mut data = Vec::with_capacity(self.data.len());
    for c in 0..self.cols {
      for r in 0..self.rows {
        data.push(self.data[r * self.cols + c]);
      }
    }
    Matrix {
      rows: self.cols,
      cols: self.rows,
      data,
    }
  }

  pub fn apply<F: Fn(f64) -> f64>(&self, f: F) -> Matrix {
    Matrix {
      rows: self.rows,
      cols: self.cols,
      data: self.data.iter().map(|&v| f(v)).collect(),
    }
  }

  /// `self += other`, in place.
  pub fn add_assign(&mut self, other: &Matrix) -> Result<()> {
    if self.dims() != other.dims() {
      return Err(self.mismatch("add_assign", other));
    }
    for (a, b) in self.data.iter_mut().zip(&other.data) {
      *a += b;
    }
    Ok(())
  }

  fn zip_with<F: Fn(f64, f64) -> f64>(&self, op: &'static str, other: &Matrix, f: F) -> Result<Matrix> {
    if self.dims() != other.dims() {
      return Err(self.mismatch(op, other));
    }
    Ok(Matrix {
      rows: self.rows,
      cols: self.cols,
      data: self.data.iter().zip(&other.data).map(|(&a, &b)| f(a, b)).collect(),
    })
  }

  fn mismatch(&self, op: &'static str, other: &Matrix) -> Error {
    Error::ShapeMismatch {
      op,
      left: self.dims(),
      right: other.dims(),
    }
  }
}

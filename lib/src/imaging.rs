//! Uploaded image to feature vector.

use image::GrayImage;
use itertools::Itertools;
use rayon::prelude::*;

use crate::{model::normalize_pixel, pipeline::Decoder, Error, Result};

/// Width and height the network was trained on.
pub const IMAGE_SIDE: u32 = 28;

/// Decodes PNG, JPEG, GIF and BMP uploads of exactly `side`×`side` pixels.
#[derive(Debug, Clone, Copy)]
pub struct ImageDecoder {
  side: u32,
}

impl Default for ImageDecoder {
  fn default() -> Self {
    Self { side: IMAGE_SIDE }
  }
}

impl ImageDecoder {
  pub fn new(side: u32) -> Self {
    Self { side }
  }

  pub fn side(&self) -> u32 {
    self.side
  }

  pub fn grayscale(&self, bytes: &[u8]) -> Result<GrayImage> {
    let gray = image::load_from_memory(bytes)
      .map_err(|e| Error::Input(format!("cannot decode image: {}", e)))?
      .into_luma8();
    if gray.dimensions() != (self.side, self.side) {
      let (w, h) = gray.dimensions();
      return Err(Error::Input(format!(
        "image is {}x{}, expected {}x{}",
        w, h, self.side, self.side
      )));
    }
    Ok(gray)
  }
}

impl Decoder for ImageDecoder {
  fn decode(&self, bytes: &[u8], invert: bool) -> Result<Vec<f64>> {
    let mut gray = self.grayscale(bytes)?;
    if invert {
      invert_rows(&mut gray);
    }
    Ok(features(&gray))
  }
}

/// Inverts every pixel. Rows are processed in parallel, each worker owning its own rows.
pub fn invert_rows(image: &mut GrayImage) {
  let width = image.width().max(1) as usize;
  let pixels: &mut [u8] = image;
  pixels
    .par_chunks_mut(width)
    .for_each(|row| row.iter_mut().for_each(|p| *p = 255 - *p));
}

/// Dark ink on a light background maps to high activations.
pub fn features(image: &GrayImage) -> Vec<f64> {
  image
    .as_raw()
    .iter()
    .map(|&g| normalize_pixel(f64::from(255 - g)))
    .collect()
}

/// Draws normalized features as text, darkest glyph for the strongest activation.
pub fn render_ascii(features: &[f64], width: usize) -> String {
  const RAMP: [char; 5] = [' ', '.', ':', '*', '#'];
  features
    .chunks(width.max(1))
    .map(|row| {
      row
        .iter()
        .map(|&v| RAMP[((v.clamp(0.0, 1.0) * (RAMP.len() - 1) as f64).round()) as usize])
        .collect::<String>()
    })
    .join("\n")
}

#[cfg(test)]
mod tests {
  use std::io::Cursor;

  use image::{ImageFormat, Luma};

  use super::*;

  fn png(width: u32, height: u32, f: impl Fn(u32, u32) -> u8) -> Vec<u8> {
    let img = GrayImage::from_fn(width, height, |x, y| Luma([f(x, y)]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
  }

  #[test]
  fn test_decode_white_background() {
    let bytes = png(28, 28, |x, _| if x == 0 { 0 } else { 255 });
    let features = ImageDecoder::default().decode(&bytes, false).unwrap();
    assert_eq!(features.len(), 784);
    assert!((features[0] - 1.0).abs() < 1e-9);
    assert!((features[1] - 0.001).abs() < 1e-9);
  }

  #[test]
  fn test_invert_flips_features() {
    let bytes = png(28, 28, |x, y| ((x * 9 + y) % 256) as u8);
    let decoder = ImageDecoder::default();
    let plain = decoder.decode(&bytes, false).unwrap();
    let inverted = decoder.decode(&bytes, true).unwrap();
    for (a, b) in plain.iter().zip(inverted.iter()) {
      // normalize(v) + normalize(255 - v) is constant
      assert!((a + b - 1.001).abs() < 1e-9);
    }
  }

  #[test]
  fn test_invert_rows_matches_sequential() {
    let mut img = GrayImage::from_fn(13, 7, |x, y| Luma([(x * 17 + y * 3) as u8]));
    let expected: Vec<u8> = img.as_raw().iter().map(|p| 255 - p).collect();
    invert_rows(&mut img);
    assert_eq!(img.as_raw(), &expected);
  }

  #[test]
  fn test_wrong_size_is_input_error() {
    let bytes = png(20, 28, |_, _| 0);
    assert!(matches!(ImageDecoder::default().decode(&bytes, false), Err(Error::Input(_))));
    assert!(matches!(ImageDecoder::new(20).grayscale(&png(20, 20, |_, _| 0)), Ok(_)));
  }

  #[test]
  fn test_garbage_is_input_error() {
    assert!(matches!(ImageDecoder::default().decode(b"not an image", false), Err(Error::Input(_))));
  }

  #[test]
  fn test_render_ascii() {
    assert_eq!(render_ascii(&[0.0, 1.0, 0.5, 0.26], 2), " #\n:.");
  }
}

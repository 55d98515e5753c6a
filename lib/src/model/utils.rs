use rand::{seq::SliceRandom, Rng};

use super::Row;

/// Index of the largest value; the first one wins on ties. Empty input gives 0.
pub fn argmax(values: &[f64]) -> usize {
  let mut best = 0;
  for (i, &v) in values.iter().enumerate() {
    if v > values[best] {
      best = i;
    }
  }
  best
}

/// Splits rows into `(train, test)` with `ratio` of them in the first part.
/// Rows are shuffled first when an rng is given.
pub fn split_dataset<R: Rng + ?Sized>(mut rows: Vec<Row>, ratio: f64, rng: Option<&mut R>) -> (Vec<Row>, Vec<Row>) {
  if let Some(rng) = rng {
    rows.shuffle(rng);
  }
  let splitting_point = ((rows.len() as f64 * ratio.clamp(0.0, 1.0)) as usize).min(rows.len());
  let test = rows.split_off(splitting_point);
  (rows, test)
}

#[cfg(test)]
mod tests {
  use rand::{rngs::StdRng, SeedableRng};

  use super::*;

  fn rows(n: usize) -> Vec<Row> {
    (0..n)
      .map(|label| Row {
        label,
        pixels: vec![label as f64],
      })
      .collect()
  }

  #[test]
  fn test_argmax_first_maximum() {
    assert_eq!(argmax(&[0.1, 0.7, 0.7, 0.2]), 1);
    assert_eq!(argmax(&[0.9]), 0);
    assert_eq!(argmax(&[]), 0);
  }

  #[test]
  fn test_split_keeps_order_without_rng() {
    let (train, test) = split_dataset::<StdRng>(rows(10), 0.8, None);
    assert_eq!(train.len(), 8);
    assert_eq!(test.len(), 2);
    assert_eq!(test[0].label, 8);
  }

  #[test]
  fn test_split_shuffled_is_a_partition() {
    let mut rng = StdRng::seed_from_u64(5);
    let (train, test) = split_dataset(rows(10), 0.5, Some(&mut rng));
    let mut labels: Vec<usize> = train.iter().chain(&test).map(|r| r.label).collect();
    labels.sort_unstable();
    assert_eq!(labels, (0..10).collect::<Vec<_>>());
    assert_eq!(train.len(), 5);
  }

  #[test]
  fn test_split_ratio_clamped() {
    let (train, test) = split_dataset::<StdRng>(rows(4), 1.5, None);
    assert_eq!((train.len(), test.len()), (4, 0));
  }
}

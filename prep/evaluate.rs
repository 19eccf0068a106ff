//! Deterministic glue between the tensors and a downstream forecaster:
//! seeded holdout splits and composite-score error.

use crate::cache::TensorBundle;
use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, Axis};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// Lowest rating of a PANSS item.
pub const ITEM_MIN: f64 = 1.0;
/// Highest rating of a PANSS item.
pub const ITEM_MAX: f64 = 7.0;

/// Patient indices of a holdout split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoldoutSplit {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Shuffles `0..n` with a seeded generator and sets aside `ceil(n * test_fraction)`
/// indices for testing. The same `(n, test_fraction, seed)` always gives the same split.
pub fn holdout_split(n: usize, test_fraction: f64, seed: u64) -> HoldoutSplit {
    let fraction = test_fraction.clamp(0.0, 1.0);
    let n_test = ((n as f64) * fraction).ceil() as usize;
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(&mut StdRng::seed_from_u64(seed));
    let train = indices.split_off(n_test.min(n));
    HoldoutSplit {
        train,
        test: indices,
    }
}

/// Gathers the training inputs and targets of the given patients.
pub fn select_training(bundle: &TensorBundle, patients: &[usize]) -> (Array3<f64>, Array2<f64>) {
    (
        bundle.training_x.select(Axis(0), patients),
        bundle.training_y.select(Axis(0), patients),
    )
}

/// Per-patient composite targets: the sum of the item scores.
pub fn composite_targets(targets: ArrayView2<f64>) -> Array1<f64> {
    targets.sum_axis(Axis(1))
}

/// Per-patient composite predictions: each item prediction is clipped to the
/// rating scale, summed, and rounded to the nearest whole score.
pub fn composite_scores(predictions: ArrayView2<f64>) -> Array1<f64> {
    predictions
        .mapv(|v| v.clamp(ITEM_MIN, ITEM_MAX))
        .sum_axis(Axis(1))
        .mapv(f64::round)
}

/// Root-mean-square error between two equally long vectors. Zero-length input gives 0.
///
/// # Panics
///
/// Panics if `predicted` and `observed` differ in length.
pub fn rmse(predicted: ArrayView1<f64>, observed: ArrayView1<f64>) -> f64 {
    assert_eq!(
        predicted.len(),
        observed.len(),
        "rmse requires vectors of equal length"
    );
    if predicted.is_empty() {
        return 0.0;
    }
    let squared: f64 = predicted
        .iter()
        .zip(observed.iter())
        .map(|(p, o)| (p - o).powi(2))
        .sum();
    (squared / predicted.len() as f64).sqrt()
}

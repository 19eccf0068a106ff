//! Min-max feature scaling with bounds learned jointly over both splits.

use ndarray::{Array1, Array2, ArrayView2, Axis, Zip};
use serde::{Deserialize, Serialize};

/// Per-column bounds learned by [`MinMaxScaler::fit`].
///
/// Fitting over the union of training and inference rows means inference values
/// shape the training scale. That coupling is intentional and lives here, in one
/// visible place, rather than as a side effect of concatenation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinMaxScaler {
    pub min: Array1<f64>,
    pub max: Array1<f64>,
}

impl MinMaxScaler {
    /// Learns column-wise bounds over every row of every given block. All blocks
    /// must have the same number of columns. Columns of zero-row input get
    /// `min == max == 0`.
    pub fn fit<'a>(blocks: impl IntoIterator<Item = ArrayView2<'a, f64>>) -> Self {
        let mut min: Option<Array1<f64>> = None;
        let mut max: Option<Array1<f64>> = None;
        let mut width = 0;

        for block in blocks {
            width = block.ncols();
            if block.nrows() == 0 {
                continue;
            }
            let block_min = block.fold_axis(Axis(0), f64::INFINITY, |&acc, &v| acc.min(v));
            let block_max = block.fold_axis(Axis(0), f64::NEG_INFINITY, |&acc, &v| acc.max(v));
            min = Some(match min {
                Some(current) => Zip::from(&current)
                    .and(&block_min)
                    .map_collect(|&a, &b| a.min(b)),
                None => block_min,
            });
            max = Some(match max {
                Some(current) => Zip::from(&current)
                    .and(&block_max)
                    .map_collect(|&a, &b| a.max(b)),
                None => block_max,
            });
        }

        Self {
            min: min.unwrap_or_else(|| Array1::zeros(width)),
            max: max.unwrap_or_else(|| Array1::zeros(width)),
        }
    }

    /// Indices of columns whose fitted range is empty.
    pub fn constant_columns(&self) -> Vec<usize> {
        Zip::indexed(&self.min)
            .and(&self.max)
            .fold(Vec::new(), |mut acc, i, &lo, &hi| {
                if hi - lo <= 0.0 {
                    acc.push(i);
                }
                acc
            })
    }

    /// Rescales `block` to `(x - min) / (max - min)` per column. A constant column
    /// maps to 0.0 instead of dividing by zero.
    pub fn transform(&self, block: ArrayView2<f64>) -> Array2<f64> {
        let mut scaled = block.to_owned();
        for (mut column, (&lo, &hi)) in scaled
            .axis_iter_mut(Axis(1))
            .zip(self.min.iter().zip(self.max.iter()))
        {
            let range = hi - lo;
            if range > 0.0 {
                column.mapv_inplace(|v| (v - lo) / range);
            } else {
                column.fill(0.0);
            }
        }
        scaled
    }
}

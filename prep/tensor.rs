//! # Left-Padded Sequence Tensors
//!
//! Each patient becomes one `[L, feature_dim]` block of the output tensor. The
//! visits occupy the bottom of the block and zero rows fill the top, so the
//! last time step is always the patient's most recent real visit regardless of
//! how many visits they had.
//!
//! `L` and `feature_dim` are known before construction starts, so the whole
//! tensor is allocated once and filled in place.

use crate::sequence::PatientGroups;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use ndarray::{Array3, ArrayView2, s};
use std::fmt;
use std::io::IsTerminal;

/// The two halves of the combined table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Split {
    Training,
    Inference,
}

impl Split {
    pub fn describe(self) -> &'static str {
        match self {
            Self::Training => "training sequences",
            Self::Inference => "inference sequences",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Observer for reporting incremental progress while tensors are filled.
pub trait TensorProgressObserver {
    fn on_split_start(&mut self, split: Split, total_patients: usize) {
        let _ = (split, total_patients);
    }
    fn on_split_advance(&mut self, split: Split, processed_patients: usize) {
        let _ = (split, processed_patients);
    }
    fn on_split_finish(&mut self, split: Split) {
        let _ = split;
    }
}

#[derive(Default)]
pub struct NoopTensorProgress;

impl TensorProgressObserver for NoopTensorProgress {}

/// Terminal progress bar, hidden when stderr is not a terminal.
#[derive(Default)]
pub struct BarTensorProgress {
    bar: Option<ProgressBar>,
}

/// Patients between two progress bar redraws.
const PROGRESS_STRIDE: usize = 256;

impl TensorProgressObserver for BarTensorProgress {
    fn on_split_start(&mut self, split: Split, total_patients: usize) {
        let draw_target = if std::io::stderr().is_terminal() {
            ProgressDrawTarget::stderr_with_hz(20)
        } else {
            ProgressDrawTarget::hidden()
        };
        let bar = ProgressBar::with_draw_target(Some(total_patients as u64), draw_target);
        if let Ok(style) = ProgressStyle::with_template(
            "> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        ) {
            bar.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
        }
        bar.set_message(split.describe());
        self.bar = Some(bar);
    }

    fn on_split_advance(&mut self, split: Split, processed_patients: usize) {
        let _ = split;
        if let Some(bar) = &self.bar {
            bar.set_position(processed_patients as u64);
        }
    }

    fn on_split_finish(&mut self, split: Split) {
        let _ = split;
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

/// Builds the `[groups.len(), padding_length, features.ncols()]` tensor for one split.
///
/// A group with `n <= padding_length` visits gets `padding_length - n` leading
/// zero rows. A longer group keeps only its last `padding_length` visits; the
/// excess leading visits are dropped without error.
pub fn build_sequence_tensor(
    features: ArrayView2<f64>,
    groups: &PatientGroups,
    padding_length: usize,
    split: Split,
    progress: &mut dyn TensorProgressObserver,
) -> Array3<f64> {
    let feature_dim = features.ncols();
    let mut tensor = Array3::zeros((groups.len(), padding_length, feature_dim));
    progress.on_split_start(split, groups.len());

    let mut truncated = 0usize;
    for (patient, (_, rows)) in groups.iter().enumerate() {
        let kept = rows.len().min(padding_length);
        if kept < rows.len() {
            truncated += 1;
        }
        let offset = padding_length - kept;
        let recent = &rows[rows.len() - kept..];
        for (step, &row) in recent.iter().enumerate() {
            tensor
                .slice_mut(s![patient, offset + step, ..])
                .assign(&features.row(row));
        }
        if (patient + 1) % PROGRESS_STRIDE == 0 {
            progress.on_split_advance(split, patient + 1);
        }
    }

    progress.on_split_advance(split, groups.len());
    progress.on_split_finish(split);
    if truncated > 0 {
        log::warn!(
            "{truncated} patients in the {split} had more than {padding_length} visits; their earliest visits were dropped"
        );
    }
    log::info!("Built {split} tensor with shape {:?}", tensor.shape());
    tensor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VisitOrder;
    use ndarray::{Array2, array};

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    /// Feature row `i` is `[i + 1, 10 * (i + 1), 100 * (i + 1)]`.
    fn numbered_features(n: usize) -> Array2<f64> {
        Array2::from_shape_fn((n, 3), |(row, col)| (row + 1) as f64 * 10f64.powi(col as i32))
    }

    fn build(patients: &[&str], padding_length: usize) -> (Array3<f64>, Array2<f64>) {
        let patients = ids(patients);
        let days = vec![0.0; patients.len()];
        let features = numbered_features(patients.len());
        let groups =
            PatientGroups::from_rows(&patients, &days, 0..patients.len(), VisitOrder::Arrival);
        let tensor = build_sequence_tensor(
            features.view(),
            &groups,
            padding_length,
            Split::Training,
            &mut NoopTensorProgress,
        );
        (tensor, features)
    }

    #[test]
    fn test_two_patients_left_padded() {
        let (tensor, features) = build(&["p1", "p1", "p2", "p2", "p2", "p2"], 4);
        assert_eq!(tensor.shape(), &[2, 4, 3]);

        // Patient 1: two zero rows, then visits 0 and 1.
        assert!(tensor.slice(s![0, 0..2, ..]).iter().all(|&v| v == 0.0));
        assert_eq!(tensor.slice(s![0, 2, ..]), features.row(0));
        assert_eq!(tensor.slice(s![0, 3, ..]), features.row(1));

        // Patient 2 fills the block.
        for step in 0..4 {
            assert_eq!(tensor.slice(s![1, step, ..]), features.row(2 + step));
        }
    }

    #[test]
    fn test_last_row_is_most_recent_visit() {
        let patients = ["a", "b", "b", "c", "c", "c", "d"];
        let (tensor, features) = build(&patients, 3);
        let last_rows = [0usize, 2, 5, 6];
        for (patient, &row) in last_rows.iter().enumerate() {
            assert_eq!(tensor.slice(s![patient, 2, ..]), features.row(row));
        }
    }

    #[test]
    fn test_overlong_group_drops_leading_visits() {
        let (tensor, features) = build(&["a", "a", "a", "a", "a"], 3);
        assert_eq!(tensor.shape(), &[1, 3, 3]);
        assert_eq!(tensor.slice(s![0, 0, ..]), features.row(2));
        assert_eq!(tensor.slice(s![0, 2, ..]), features.row(4));
    }

    #[test]
    fn test_non_contiguous_patient_is_one_block() {
        let (tensor, features) = build(&["a", "b", "a"], 2);
        assert_eq!(tensor.shape(), &[2, 2, 3]);
        assert_eq!(tensor.slice(s![0, 0, ..]), features.row(0));
        assert_eq!(tensor.slice(s![0, 1, ..]), features.row(2));
        assert!(tensor.slice(s![1, 0, ..]).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_empty_split_has_zero_patients() {
        let (tensor, _) = build(&[], 4);
        assert_eq!(tensor.shape(), &[0, 4, 3]);
    }

    #[test]
    fn test_observer_sees_every_patient() {
        #[derive(Default)]
        struct Recorder {
            total: usize,
            last: usize,
            finished: bool,
        }
        impl TensorProgressObserver for Recorder {
            fn on_split_start(&mut self, split: Split, total_patients: usize) {
                assert_eq!(split, Split::Inference);
                self.total = total_patients;
            }
            fn on_split_advance(&mut self, split: Split, processed_patients: usize) {
                let _ = split;
                self.last = processed_patients;
            }
            fn on_split_finish(&mut self, split: Split) {
                let _ = split;
                self.finished = true;
            }
        }

        let patients = ids(&["a", "b", "c"]);
        let days = vec![0.0; 3];
        let groups = PatientGroups::from_rows(&patients, &days, 0..3, VisitOrder::Arrival);
        let features = array![[1.0], [2.0], [3.0]];
        let mut recorder = Recorder::default();
        build_sequence_tensor(features.view(), &groups, 1, Split::Inference, &mut recorder);

        assert_eq!(recorder.total, 3);
        assert_eq!(recorder.last, 3);
        assert!(recorder.finished);
    }
}

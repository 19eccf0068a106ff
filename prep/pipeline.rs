// ========================================================================================
//
//                        The preprocessing conductor of visitseq
//
// ========================================================================================
//
// This module wires the stages together, leaf to root:
//
//   read tables -> deduplicate -> cohort filter (training only) -> combine
//   -> fit encoder over the union -> group and profile -> fingerprint
//   -> cache lookup, or: fit scaler over the union -> targets -> tensors -> cache write
//
// Everything before the cache lookup is cheap and always runs, because the
// fingerprint depends on the combined rows, the encoded schema and the padding
// length.

use crate::cache::{CacheOutcome, TensorBundle, TensorCache, fingerprint};
use crate::cohort::filter_cohort;
use crate::config::{ConfigError, PipelineConfig};
use crate::dedup::deduplicate_visits;
use crate::encode::{
    CategoricalEncoder, CombinedTable, EncodeError, EncodedTable, encode_combined,
};
use crate::normalize::MinMaxScaler;
use crate::sequence::{PatientGroups, SequenceProfile, profile_sequences};
use crate::table::{
    DataError, TableKind, VisitTable, read_frame, stack_frames, visit_table_from_frame,
    write_frame,
};
use crate::target::extract_targets;
use crate::tensor::{Split, TensorProgressObserver, build_sequence_tensor};
use ndarray::{Array2, s};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("At least one training table is required")]
    NoTrainingTables,
}

/// Where the pipeline reads from and writes to.
#[derive(Debug, Clone)]
pub struct PipelineInputs {
    /// Training-eligible study tables, stacked in this order.
    pub training_tables: Vec<PathBuf>,
    pub inference_table: PathBuf,
    /// Tensor cache file; `None` always recomputes and writes nothing.
    pub cache_path: Option<PathBuf>,
    /// Destination of the merged raw training-study table, if wanted.
    pub snapshot_path: Option<PathBuf>,
}

/// Combined, encoded and profiled visits, ready for tensor construction.
#[derive(Debug, Clone)]
pub struct PreparedCohort {
    /// Unscaled features of training rows followed by inference rows.
    pub encoded: EncodedTable,
    /// Raw item scores aligned with `encoded` rows, the source of the targets.
    pub items: Array2<f64>,
    pub training_groups: PatientGroups,
    pub inference_groups: PatientGroups,
    pub profile: SequenceProfile,
}

impl PreparedCohort {
    /// Cache fingerprint of this cohort under `config`.
    pub fn fingerprint(&self, config: &PipelineConfig) -> u64 {
        fingerprint(
            self.encoded.boundary,
            self.encoded.patient_ids.len() - self.encoded.boundary,
            &self.encoded.feature_names,
            &self.encoded.patient_ids,
            self.encoded.features.view(),
            self.profile.padding_length,
            config,
        )
    }
}

/// Everything a downstream trainer needs.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub tensors: TensorBundle,
    pub feature_names: Vec<String>,
    /// Patient of each training block / target row.
    pub training_patients: Vec<String>,
    /// Patient of each inference block.
    pub inference_patients: Vec<String>,
    pub profile: SequenceProfile,
    pub fingerprint: u64,
    /// `None` when no cache file was configured.
    pub cache_outcome: Option<CacheOutcome>,
}

/// Deduplicates, filters, combines, encodes and groups in-memory tables.
pub fn prepare_cohort(
    training: &VisitTable,
    inference: &VisitTable,
    config: &PipelineConfig,
) -> Result<PreparedCohort, PipelineError> {
    let training = filter_cohort(&deduplicate_visits(training), &config.cohort);
    let inference = deduplicate_visits(inference);

    let combined = CombinedTable::concat(&training, &inference)?;
    let encoder = CategoricalEncoder::fit([&combined.table]);
    let encoded = encode_combined(&combined, &encoder)?;
    log::info!(
        "Combined table has {} training and {} inference visits over {} features",
        combined.boundary,
        combined.table.len() - combined.boundary,
        encoded.feature_dim()
    );

    let training_groups = PatientGroups::from_rows(
        &encoded.patient_ids,
        &encoded.visit_days,
        combined.training_rows(),
        config.visit_order,
    );
    let inference_groups = PatientGroups::from_rows(
        &encoded.patient_ids,
        &encoded.visit_days,
        combined.inference_rows(),
        config.visit_order,
    );
    let profile = profile_sequences([&training_groups, &inference_groups]);

    Ok(PreparedCohort {
        encoded,
        items: combined.table.items,
        training_groups,
        inference_groups,
        profile,
    })
}

/// Joint scaling, targets and padded tensors.
pub fn build_tensors(
    prepared: &PreparedCohort,
    progress: &mut dyn TensorProgressObserver,
) -> TensorBundle {
    let features = &prepared.encoded.features;
    let boundary = prepared.encoded.boundary;

    let scaler = MinMaxScaler::fit([
        features.slice(s![..boundary, ..]),
        features.slice(s![boundary.., ..]),
    ]);
    let constant = scaler.constant_columns();
    if !constant.is_empty() {
        let names: Vec<&str> = constant
            .iter()
            .map(|&c| prepared.encoded.feature_names[c].as_str())
            .collect();
        log::debug!("Constant feature columns scaled to zero: {names:?}");
    }
    let scaled = scaler.transform(features.view());
    let padding_length = prepared.profile.padding_length;

    let training_y = extract_targets(prepared.items.view(), &prepared.training_groups);
    let training_x = build_sequence_tensor(
        scaled.view(),
        &prepared.training_groups,
        padding_length,
        Split::Training,
        progress,
    );
    let inference_x = build_sequence_tensor(
        scaled.view(),
        &prepared.inference_groups,
        padding_length,
        Split::Inference,
        progress,
    );

    TensorBundle {
        inference_x,
        training_x,
        training_y,
    }
}

/// Reads the study tables, optionally writes the merged snapshot, and produces
/// the tensors through the cache.
pub fn run_pipeline(
    inputs: &PipelineInputs,
    config: &PipelineConfig,
    progress: &mut dyn TensorProgressObserver,
) -> Result<PipelineOutput, PipelineError> {
    if inputs.training_tables.is_empty() {
        return Err(PipelineError::NoTrainingTables);
    }
    let separator = config.separator_byte()?;

    let frames = inputs
        .training_tables
        .iter()
        .map(|path| read_frame(path, separator))
        .collect::<Result<Vec<_>, _>>()?;

    if let Some(snapshot) = &inputs.snapshot_path {
        let mut merged = stack_frames(&frames)?;
        write_frame(&mut merged, snapshot, separator)?;
    }

    let mut training = VisitTable::empty(TableKind::Training);
    for frame in &frames {
        training.append(&visit_table_from_frame(frame, TableKind::Training)?)?;
    }
    let inference = visit_table_from_frame(
        &read_frame(&inputs.inference_table, separator)?,
        TableKind::Inference,
    )?;

    let prepared = prepare_cohort(&training, &inference, config)?;
    let fingerprint = prepared.fingerprint(config);

    let (tensors, cache_outcome) = match &inputs.cache_path {
        Some(path) => {
            let (tensors, outcome) = TensorCache::new(path)
                .load_or_compute::<PipelineError>(fingerprint, || {
                    Ok(build_tensors(&prepared, progress))
                })?;
            (tensors, Some(outcome))
        }
        None => (build_tensors(&prepared, progress), None),
    };

    Ok(PipelineOutput {
        tensors,
        feature_names: prepared.encoded.feature_names.clone(),
        training_patients: prepared.training_groups.patient_ids().to_vec(),
        inference_patients: prepared.inference_groups.patient_ids().to_vec(),
        profile: prepared.profile.clone(),
        fingerprint,
        cache_outcome,
    })
}

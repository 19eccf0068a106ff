//! # Tensor Cache
//!
//! Persists the `(inference X, training X, training Y)` triple so repeated runs
//! over the same snapshot skip tensor construction.
//!
//! File format:
//! - Header: magic bytes `VSQT`, format version `u8`, fingerprint `u64` (LE)
//! - Payload: bincode-serialized `TensorBundle` (fields in triple order)
//! - Footer: xxhash64 checksum of all preceding bytes (LE)
//!
//! The fingerprint summarizes everything that shapes the tensors (row counts,
//! feature schema, the unscaled feature values and patient of every row, padding
//! length, pipeline settings). A file whose fingerprint
//! differs from the current run is stale and is rebuilt, as is any file that
//! fails to read, checksum or deserialize. The triple is reused whole or not at all.

use crate::config::{PipelineConfig, VisitOrder};
use crate::table::PANSS_ITEMS;
use ndarray::{Array2, Array3, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use xxhash_rust::xxh64::{Xxh64, xxh64};

const CACHE_MAGIC: [u8; 4] = *b"VSQT";
const CACHE_VERSION: u8 = 1;
/// magic(4) + version(1) + fingerprint(8)
const HEADER_LEN: usize = 13;
const CHECKSUM_LEN: usize = 8;

/// The pipeline's numeric output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorBundle {
    /// Shape: [inference patients, L, feature_dim].
    pub inference_x: Array3<f64>,
    /// Shape: [training patients, L, feature_dim].
    pub training_x: Array3<f64>,
    /// Shape: [training patients, 30].
    pub training_y: Array2<f64>,
}

impl TensorBundle {
    /// Checks that the three arrays describe one consistent dataset.
    pub fn validate(&self) -> Result<(), CacheError> {
        let (n_train, train_len, train_dim) = self.training_x.dim();
        let (_, infer_len, infer_dim) = self.inference_x.dim();
        if self.training_y.nrows() != n_train {
            return Err(CacheError::Schema(format!(
                "{} target rows for {} training patients",
                self.training_y.nrows(),
                n_train
            )));
        }
        if self.training_y.ncols() != PANSS_ITEMS.len() {
            return Err(CacheError::Schema(format!(
                "{} target columns, expected {}",
                self.training_y.ncols(),
                PANSS_ITEMS.len()
            )));
        }
        if (train_len, train_dim) != (infer_len, infer_dim) {
            return Err(CacheError::Schema(format!(
                "training blocks are {train_len}x{train_dim} but inference blocks are {infer_len}x{infer_dim}"
            )));
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Failed to read or write cache file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Cache file is {0} bytes, too small to hold a header and checksum")]
    TooSmall(usize),
    #[error("Cache file does not start with the expected magic bytes")]
    BadMagic,
    #[error("Unsupported cache version {found} (expected {expected})")]
    UnsupportedVersion { found: u8, expected: u8 },
    #[error("Checksum mismatch: stored={stored:#x}, computed={computed:#x}")]
    ChecksumMismatch { stored: u64, computed: u64 },
    #[error("Stale cache: stored fingerprint {stored:#x} does not match {expected:#x}")]
    FingerprintMismatch { stored: u64, expected: u64 },
    #[error("Failed to (de)serialize cached tensors: {0}")]
    Serialization(#[from] bincode::Error),
    #[error("Cached tensors are inconsistent: {0}")]
    Schema(String),
}

/// How a call to [`TensorCache::load_or_compute`] obtained its tensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Rebuilt,
    /// Rebuilt, but the fresh entry could not be written.
    RebuiltUnsaved,
}

/// Fingerprint of the inputs that determine the tensors' content. `patient_ids`
/// and `features` are the combined rows before scaling, so a corrected value in
/// any input table yields a different fingerprint.
pub fn fingerprint(
    training_rows: usize,
    inference_rows: usize,
    feature_names: &[String],
    patient_ids: &[String],
    features: ArrayView2<f64>,
    padding_length: usize,
    config: &PipelineConfig,
) -> u64 {
    let mut hasher = Xxh64::new(0);
    hasher.update(&[CACHE_VERSION]);
    hasher.update(&(training_rows as u64).to_le_bytes());
    hasher.update(&(inference_rows as u64).to_le_bytes());
    hasher.update(&(feature_names.len() as u64).to_le_bytes());
    for name in feature_names {
        hasher.update(name.as_bytes());
        hasher.update(&[0]);
    }
    for id in patient_ids {
        hasher.update(id.as_bytes());
        hasher.update(&[0]);
    }
    let (rows, cols) = features.dim();
    hasher.update(&(rows as u64).to_le_bytes());
    hasher.update(&(cols as u64).to_le_bytes());
    for value in features.iter() {
        hasher.update(&value.to_bits().to_le_bytes());
    }
    hasher.update(&(padding_length as u64).to_le_bytes());
    hasher.update(config.cohort.passed_status.as_bytes());
    hasher.update(&[0]);
    hasher.update(&config.cohort.min_followup_day.to_bits().to_le_bytes());
    hasher.update(&[match config.visit_order {
        VisitOrder::Arrival => 0,
        VisitOrder::VisitDay => 1,
    }]);
    hasher.update(config.separator.as_bytes());
    hasher.digest()
}

/// Serializes a cache entry into its on-disk byte layout.
pub fn encode_entry(fingerprint: u64, bundle: &TensorBundle) -> Result<Vec<u8>, CacheError> {
    let payload = bincode::serialize(bundle)?;
    let mut data = Vec::with_capacity(HEADER_LEN + payload.len() + CHECKSUM_LEN);
    data.extend_from_slice(&CACHE_MAGIC);
    data.push(CACHE_VERSION);
    data.extend_from_slice(&fingerprint.to_le_bytes());
    data.extend_from_slice(&payload);
    let checksum = xxh64(&data, 0);
    data.extend_from_slice(&checksum.to_le_bytes());
    Ok(data)
}

/// Parses and verifies a cache entry, returning its stored fingerprint and tensors.
pub fn decode_entry(data: &[u8]) -> Result<(u64, TensorBundle), CacheError> {
    if data.len() < HEADER_LEN + CHECKSUM_LEN {
        return Err(CacheError::TooSmall(data.len()));
    }

    let checksum_offset = data.len() - CHECKSUM_LEN;
    let stored = read_u64(&data[checksum_offset..]);
    let computed = xxh64(&data[..checksum_offset], 0);
    if stored != computed {
        return Err(CacheError::ChecksumMismatch { stored, computed });
    }

    if data[0..4] != CACHE_MAGIC {
        return Err(CacheError::BadMagic);
    }
    if data[4] != CACHE_VERSION {
        return Err(CacheError::UnsupportedVersion {
            found: data[4],
            expected: CACHE_VERSION,
        });
    }

    let fingerprint = read_u64(&data[5..HEADER_LEN]);
    let bundle: TensorBundle = bincode::deserialize(&data[HEADER_LEN..checksum_offset])?;
    bundle.validate()?;
    Ok((fingerprint, bundle))
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

/// A single cache file on disk.
#[derive(Debug, Clone)]
pub struct TensorCache {
    path: PathBuf,
}

impl TensorCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the entry without checking its fingerprint.
    pub fn read(&self) -> Result<(u64, TensorBundle), CacheError> {
        decode_entry(&fs::read(&self.path)?)
    }

    /// Reads the entry and accepts it only if it was built for `expected`.
    pub fn load(&self, expected: u64) -> Result<TensorBundle, CacheError> {
        let (stored, bundle) = self.read()?;
        if stored != expected {
            return Err(CacheError::FingerprintMismatch { stored, expected });
        }
        Ok(bundle)
    }

    /// Writes the entry through a temporary sibling file and renames it into place.
    pub fn store(&self, fingerprint: u64, bundle: &TensorBundle) -> Result<(), CacheError> {
        let data = encode_entry(fingerprint, bundle)?;
        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, &data)?;
        fs::rename(&temp_path, &self.path)?;
        log::info!(
            "Cached tensors ({} bytes) to '{}'",
            data.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Returns the cached tensors for `fingerprint`, or computes and stores them.
    ///
    /// Any load failure is logged and treated as a miss. A failure to write the
    /// fresh entry is logged too; the computed tensors are still returned.
    pub fn load_or_compute<E>(
        &self,
        fingerprint: u64,
        compute: impl FnOnce() -> Result<TensorBundle, E>,
    ) -> Result<(TensorBundle, CacheOutcome), E> {
        log::info!("Attempting to load cached tensors from '{}'", self.path.display());
        match self.load(fingerprint) {
            Ok(bundle) => {
                log::info!("Cache hit for fingerprint {fingerprint:#x}");
                return Ok((bundle, CacheOutcome::Hit));
            }
            Err(CacheError::IoError(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No cache file found, preprocessing data");
            }
            Err(e) => {
                log::warn!("Ignoring unusable cache file: {e}");
            }
        }

        let bundle = compute()?;
        match self.store(fingerprint, &bundle) {
            Ok(()) => Ok((bundle, CacheOutcome::Rebuilt)),
            Err(e) => {
                log::warn!("Could not write cache file '{}': {e}", self.path.display());
                Ok((bundle, CacheOutcome::RebuiltUnsaved))
            }
        }
    }
}

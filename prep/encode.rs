//! # Joint Categorical Encoding
//!
//! Training and inference visits must land in one feature space: the same
//! columns, in the same order, with the same meaning. The encoder is therefore
//! fitted once over the union of both splits and only then applied, so a
//! country or treatment arm seen in a single split cannot shift column indices
//! in the other.
//!
//! Encoded rows are laid out as `[VisitDay | PANSS items | Country one-hot | TxGroup one-hot]`.
//! Categories inside each one-hot block are sorted lexicographically, which
//! makes the layout independent of row order.

use crate::table::{COUNTRY, DataError, PANSS_ITEMS, TX_GROUP, VISIT_DAY, VisitTable};
use itertools::Itertools;
use ndarray::{Array2, s};
use std::ops::Range;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("Category '{value}' of column '{column}' was not seen while fitting the encoder")]
    UnknownCategory { column: &'static str, value: String },
}

/// Training rows followed by inference rows, with the boundary between them.
#[derive(Debug, Clone)]
pub struct CombinedTable {
    pub table: VisitTable,
    /// Index of the first inference row.
    pub boundary: usize,
}

impl CombinedTable {
    pub fn concat(training: &VisitTable, inference: &VisitTable) -> Result<Self, DataError> {
        let boundary = training.len();
        let mut table = training.clone();
        table.append(inference)?;
        Ok(Self { table, boundary })
    }

    pub fn training_rows(&self) -> Range<usize> {
        0..self.boundary
    }

    pub fn inference_rows(&self) -> Range<usize> {
        self.boundary..self.table.len()
    }
}

/// One-hot encoder for `Country` and `TxGroup`, fitted over a value universe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoricalEncoder {
    countries: Vec<String>,
    tx_groups: Vec<String>,
}

impl CategoricalEncoder {
    /// Learns the sorted category sets over every given table.
    pub fn fit<'a>(tables: impl IntoIterator<Item = &'a VisitTable>) -> Self {
        let tables: Vec<&VisitTable> = tables.into_iter().collect();
        let encoder = Self {
            countries: sorted_categories(tables.iter().flat_map(|t| t.countries.iter())),
            tx_groups: sorted_categories(tables.iter().flat_map(|t| t.tx_groups.iter())),
        };
        log::debug!(
            "Fitted encoder with {} countries and {} treatment groups",
            encoder.countries.len(),
            encoder.tx_groups.len()
        );
        encoder
    }

    pub fn countries(&self) -> &[String] {
        &self.countries
    }

    pub fn tx_groups(&self) -> &[String] {
        &self.tx_groups
    }

    /// Number of one-hot columns produced per row.
    pub fn width(&self) -> usize {
        self.countries.len() + self.tx_groups.len()
    }

    /// Column labels of the one-hot block, e.g. `Country=USA`.
    pub fn column_names(&self) -> Vec<String> {
        self.countries
            .iter()
            .map(|c| format!("{COUNTRY}={c}"))
            .chain(self.tx_groups.iter().map(|g| format!("{TX_GROUP}={g}")))
            .collect()
    }

    /// One-hot block for `table`. Shape: [table.len(), self.width()].
    pub fn transform(&self, table: &VisitTable) -> Result<Array2<f64>, EncodeError> {
        let mut block = Array2::zeros((table.len(), self.width()));
        for row in 0..table.len() {
            let country = locate(&self.countries, &table.countries[row], COUNTRY)?;
            let group = locate(&self.tx_groups, &table.tx_groups[row], TX_GROUP)?;
            block[[row, country]] = 1.0;
            block[[row, self.countries.len() + group]] = 1.0;
        }
        Ok(block)
    }
}

fn sorted_categories<'a>(values: impl Iterator<Item = &'a String>) -> Vec<String> {
    values.cloned().sorted().dedup().collect()
}

fn locate(categories: &[String], value: &str, column: &'static str) -> Result<usize, EncodeError> {
    categories
        .binary_search_by(|c| c.as_str().cmp(value))
        .map_err(|_| EncodeError::UnknownCategory {
            column,
            value: value.to_string(),
        })
}

/// Numeric feature rows of a combined table, still keyed by patient.
#[derive(Debug, Clone)]
pub struct EncodedTable {
    pub patient_ids: Vec<String>,
    pub visit_days: Vec<f64>,
    pub feature_names: Vec<String>,
    /// Shape: [n_rows, feature_names.len()].
    pub features: Array2<f64>,
    pub boundary: usize,
}

impl EncodedTable {
    pub fn feature_dim(&self) -> usize {
        self.features.ncols()
    }
}

/// Full feature schema for a fitted encoder.
pub fn feature_names(encoder: &CategoricalEncoder) -> Vec<String> {
    std::iter::once(VISIT_DAY.to_string())
        .chain(PANSS_ITEMS.iter().map(|s| s.to_string()))
        .chain(encoder.column_names())
        .collect()
}

/// Assembles the numeric feature matrix of the combined table. Raw identifying
/// columns never enter it; `PatientID` and `VisitDay` are carried alongside for grouping.
pub fn encode_combined(
    combined: &CombinedTable,
    encoder: &CategoricalEncoder,
) -> Result<EncodedTable, EncodeError> {
    let table = &combined.table;
    let names = feature_names(encoder);
    let n_items = PANSS_ITEMS.len();

    let mut features = Array2::zeros((table.len(), names.len()));
    for (row, &day) in table.visit_days.iter().enumerate() {
        features[[row, 0]] = day;
    }
    features
        .slice_mut(s![.., 1..1 + n_items])
        .assign(&table.items);
    features
        .slice_mut(s![.., 1 + n_items..])
        .assign(&encoder.transform(table)?);

    Ok(EncodedTable {
        patient_ids: table.patient_ids.clone(),
        visit_days: table.visit_days.clone(),
        feature_names: names,
        features,
        boundary: combined.boundary,
    })
}

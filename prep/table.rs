//! # Visit Table Loading and Validation
//!
//! This module is the exclusive entry point for study tables. It reads
//! delimited files with `polars`, validates them against a strict schema, and
//! converts them into the columnar `VisitTable` consumed by the rest of the
//! pipeline.
//!
//! - Strict Schema: Column names are not configurable. `PatientID`, `VisitDay`,
//!   `Country`, `TxGroup`, the thirty PANSS item columns and, for training
//!   studies, `LeadStatus` must be present. Every other column (study, site,
//!   rater and assessment identifiers, the precomputed total) is dropped by
//!   projection and never reaches the feature space.
//! - User-Centric Errors: Failures are assumed to be input errors. `DataError`
//!   names the offending column.

use ndarray::{Array2, Axis};
use polars::prelude::*;
use std::collections::HashSet;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

pub const PATIENT_ID: &str = "PatientID";
pub const VISIT_DAY: &str = "VisitDay";
pub const COUNTRY: &str = "Country";
pub const TX_GROUP: &str = "TxGroup";
pub const LEAD_STATUS: &str = "LeadStatus";

/// The thirty PANSS symptom items, in the canonical order used for both the
/// feature block and the target vector.
pub const PANSS_ITEMS: [&str; 30] = [
    "P1", "P2", "P3", "P4", "P5", "P6", "P7", "N1", "N2", "N3", "N4", "N5", "N6", "N7", "G1",
    "G2", "G3", "G4", "G5", "G6", "G7", "G8", "G9", "G10", "G11", "G12", "G13", "G14", "G15",
    "G16",
];

/// Which study a table comes from. Only training studies carry `LeadStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Training,
    Inference,
}

/// Columnar, validated visit records. Row `i` of every field describes the same visit.
#[derive(Debug, Clone, PartialEq)]
pub struct VisitTable {
    pub patient_ids: Vec<String>,
    pub visit_days: Vec<f64>,
    pub countries: Vec<String>,
    pub tx_groups: Vec<String>,
    /// Present for training tables until the cohort filter consumes it.
    pub lead_status: Option<Vec<String>>,
    /// PANSS item scores. Shape: [n_rows, PANSS_ITEMS.len()].
    pub items: Array2<f64>,
}

impl VisitTable {
    pub fn len(&self) -> usize {
        self.patient_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patient_ids.is_empty()
    }

    /// Gathers the given rows, in the given order, into a new table.
    pub fn select_rows(&self, rows: &[usize]) -> VisitTable {
        fn pick<T: Clone>(values: &[T], rows: &[usize]) -> Vec<T> {
            rows.iter().map(|&r| values[r].clone()).collect()
        }

        VisitTable {
            patient_ids: pick(&self.patient_ids, rows),
            visit_days: pick(&self.visit_days, rows),
            countries: pick(&self.countries, rows),
            tx_groups: pick(&self.tx_groups, rows),
            lead_status: self.lead_status.as_ref().map(|s| pick(s, rows)),
            items: self.items.select(Axis(0), rows),
        }
    }

    /// Appends `other` below `self`. `LeadStatus` survives only if both sides carry it.
    pub fn append(&mut self, other: &VisitTable) -> Result<(), DataError> {
        self.items
            .append(Axis(0), other.items.view())
            .map_err(|e| DataError::ShapeMismatch(e.to_string()))?;
        self.patient_ids.extend_from_slice(&other.patient_ids);
        self.visit_days.extend_from_slice(&other.visit_days);
        self.countries.extend_from_slice(&other.countries);
        self.tx_groups.extend_from_slice(&other.tx_groups);
        self.lead_status = match (self.lead_status.take(), &other.lead_status) {
            (Some(mut mine), Some(theirs)) => {
                mine.extend_from_slice(theirs);
                Some(mine)
            }
            _ => None,
        };
        Ok(())
    }

    /// An empty table with the canonical item width.
    pub fn empty(kind: TableKind) -> VisitTable {
        VisitTable {
            patient_ids: Vec::new(),
            visit_days: Vec::new(),
            countries: Vec::new(),
            tx_groups: Vec::new(),
            lead_status: match kind {
                TableKind::Training => Some(Vec::new()),
                TableKind::Inference => None,
            },
            items: Array2::zeros((0, PANSS_ITEMS.len())),
        }
    }
}

/// A comprehensive error type for all table loading and validation failures.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error(
        "The required column '{0}' was not found in the input file. Please check spelling and case."
    )]
    ColumnNotFound(String),
    #[error(
        "The required column '{column_name}' could not be converted to the expected type '{expected_type}'. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        expected_type: &'static str,
        found_type: String,
    },
    #[error(
        "Missing or null values were found in the required column '{0}'. Every visit must be complete."
    )]
    MissingValuesFound(String),
    #[error(
        "Non-finite values (NaN or Infinity) were found in the required column '{0}'. All numeric data must be finite."
    )]
    NonFiniteValuesFound(String),
    #[error("Visit tables could not be stacked: {0}")]
    ShapeMismatch(String),
}

/// Reads one delimited study file with a header row.
pub fn read_frame(path: &Path, separator: u8) -> Result<DataFrame, DataError> {
    log::info!("Loading study table from '{}'", path.display());
    // Identifiers stay text so that "0101" and "101" remain distinct patients.
    let text_ids = Schema::from_iter([Field::new(PATIENT_ID.into(), DataType::String)]);
    let df = CsvReader::new(File::open(path)?)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                .with_schema_overwrite(Some(Arc::new(text_ids)))
                .with_parse_options(CsvParseOptions::default().with_separator(separator)),
        )
        .finish()?;
    log::debug!(
        "Read {} rows and {} columns from '{}'",
        df.height(),
        df.width(),
        path.display()
    );
    Ok(df)
}

/// Stacks raw study frames vertically, in the order given. Columns are matched by
/// name, a column missing from a study is filled with nulls, and columns whose
/// inferred types differ (integer and float days, say) are cast to a common type.
pub fn stack_frames(frames: &[DataFrame]) -> Result<DataFrame, DataError> {
    if frames.is_empty() {
        return Ok(DataFrame::empty());
    }
    let lazy: Vec<LazyFrame> = frames.iter().map(|f| f.clone().lazy()).collect();
    let stacked = concat_lf_diagonal(
        lazy,
        UnionArgs {
            to_supertypes: true,
            rechunk: true,
            ..Default::default()
        },
    )?
    .collect()?;
    Ok(stacked)
}

/// Writes a raw frame to disk, e.g. the merged training-study snapshot.
pub fn write_frame(df: &mut DataFrame, path: &Path, separator: u8) -> Result<(), DataError> {
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .with_separator(separator)
        .finish(df)?;
    log::info!("Wrote {} rows to '{}'", df.height(), path.display());
    Ok(())
}

/// Validates a raw frame against the visit schema and converts it to a `VisitTable`.
pub fn visit_table_from_frame(df: &DataFrame, kind: TableKind) -> Result<VisitTable, DataError> {
    let mut required: Vec<&str> = vec![PATIENT_ID, VISIT_DAY, COUNTRY, TX_GROUP];
    if kind == TableKind::Training {
        required.push(LEAD_STATUS);
    }
    required.extend_from_slice(&PANSS_ITEMS);

    let present: HashSet<String> = df
        .get_column_names()
        .into_iter()
        .map(|s| s.to_string())
        .collect();
    for name in &required {
        if !present.contains(*name) {
            return Err(DataError::ColumnNotFound(name.to_string()));
        }
    }

    let projected = df.select(required.iter().copied())?;
    let n_rows = projected.height();

    let patient_ids = extract_text_column(&projected, PATIENT_ID)?;
    let visit_days = extract_numeric_column(&projected, VISIT_DAY)?;
    let countries = extract_text_column(&projected, COUNTRY)?;
    let tx_groups = extract_text_column(&projected, TX_GROUP)?;
    let lead_status = match kind {
        TableKind::Training => Some(extract_text_column(&projected, LEAD_STATUS)?),
        TableKind::Inference => None,
    };

    let mut items = Array2::<f64>::zeros((n_rows, PANSS_ITEMS.len()));
    for (col, name) in PANSS_ITEMS.iter().enumerate() {
        let values = extract_numeric_column(&projected, name)?;
        for (row, value) in values.into_iter().enumerate() {
            items[[row, col]] = value;
        }
    }

    Ok(VisitTable {
        patient_ids,
        visit_days,
        countries,
        tx_groups,
        lead_status,
        items,
    })
}

fn extract_numeric_column(df: &DataFrame, column_name: &str) -> Result<Vec<f64>, DataError> {
    let series = df.column(column_name)?;
    if series.null_count() > 0 {
        return Err(DataError::MissingValuesFound(column_name.to_string()));
    }

    let casted = match series.cast(&DataType::Float64) {
        Ok(casted) => casted,
        Err(_) => {
            return Err(DataError::ColumnWrongType {
                column_name: column_name.to_string(),
                expected_type: "f64 (numeric)",
                found_type: format!("{:?}", series.dtype()),
            });
        }
    };

    // A non-strict cast turns unparsable text into nulls.
    if casted.null_count() > 0 {
        return Err(DataError::ColumnWrongType {
            column_name: column_name.to_string(),
            expected_type: "f64 (numeric)",
            found_type: format!("{:?}", series.dtype()),
        });
    }

    let chunked = casted.f64()?.rechunk();
    let values: Vec<f64> = chunked.into_no_null_iter().collect();
    if values.iter().any(|v| !v.is_finite()) {
        return Err(DataError::NonFiniteValuesFound(column_name.to_string()));
    }
    Ok(values)
}

fn extract_text_column(df: &DataFrame, column_name: &str) -> Result<Vec<String>, DataError> {
    let series = df.column(column_name)?;
    if series.null_count() > 0 {
        return Err(DataError::MissingValuesFound(column_name.to_string()));
    }
    let casted = series
        .cast(&DataType::String)
        .map_err(|_| DataError::ColumnWrongType {
            column_name: column_name.to_string(),
            expected_type: "text",
            found_type: format!("{:?}", series.dtype()),
        })?;
    let chunked = casted.str()?.rechunk();
    Ok(chunked
        .into_no_null_iter()
        .map(|value| value.to_string())
        .collect())
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// A single visit row for hand-built test tables.
    pub struct Row<'a> {
        pub patient: &'a str,
        pub day: f64,
        pub country: &'a str,
        pub tx_group: &'a str,
        pub status: Option<&'a str>,
        pub item_value: f64,
    }

    pub fn row<'a>(patient: &'a str, day: f64, item_value: f64) -> Row<'a> {
        Row {
            patient,
            day,
            country: "USA",
            tx_group: "Control",
            status: Some("Passed"),
            item_value,
        }
    }

    /// Builds a table in which every item column of a row holds `item_value`.
    pub fn table(rows: &[Row<'_>]) -> VisitTable {
        let has_status = rows.iter().all(|r| r.status.is_some());
        let mut items = Array2::zeros((rows.len(), PANSS_ITEMS.len()));
        for (i, r) in rows.iter().enumerate() {
            items.row_mut(i).fill(r.item_value);
        }
        VisitTable {
            patient_ids: rows.iter().map(|r| r.patient.to_string()).collect(),
            visit_days: rows.iter().map(|r| r.day).collect(),
            countries: rows.iter().map(|r| r.country.to_string()).collect(),
            tx_groups: rows.iter().map(|r| r.tx_group.to_string()).collect(),
            lead_status: if has_status {
                Some(rows.iter().map(|r| r.status.unwrap_or_default().to_string()).collect())
            } else {
                None
            },
            items,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::io::{self, Write};
    use tempfile::NamedTempFile;

    fn create_test_csv(content: &str) -> io::Result<NamedTempFile> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "{}", content)?;
        file.flush()?;
        Ok(file)
    }

    fn header(with_status: bool) -> String {
        let mut cols = vec!["Study", "Country", "PatientID", "SiteID", "TxGroup", "VisitDay"];
        cols.extend_from_slice(&PANSS_ITEMS);
        cols.push("PANSS_Total");
        if with_status {
            cols.push("LeadStatus");
        }
        cols.join(",")
    }

    fn data_row(patient: &str, day: &str, item: &str, status: Option<&str>) -> String {
        let mut cells = vec!["A", "USA", patient, "11", "Treatment", day];
        cells.extend(std::iter::repeat_n(item, PANSS_ITEMS.len()));
        cells.push("60");
        if let Some(s) = status {
            cells.push(s);
        }
        cells.join(",")
    }

    #[test]
    fn test_load_training_table_success() {
        let content = [
            header(true),
            data_row("1001", "0", "3", Some("Passed")),
            data_row("1001", "7", "2", Some("Passed")),
            data_row("1002", "0", "4", Some("Flagged")),
        ]
        .join("\n");
        let file = create_test_csv(&content).unwrap();
        let df = read_frame(file.path(), b',').unwrap();
        let table = visit_table_from_frame(&df, TableKind::Training).unwrap();

        assert_eq!(table.len(), 3);
        assert_eq!(table.patient_ids, vec!["1001", "1001", "1002"]);
        assert_eq!(table.countries[0], "USA");
        assert_eq!(table.tx_groups[2], "Treatment");
        assert_eq!(
            table.lead_status.as_deref(),
            Some(&["Passed".to_string(), "Passed".to_string(), "Flagged".to_string()][..])
        );
        assert_eq!(table.items.shape(), &[3, 30]);
        assert_abs_diff_eq!(table.visit_days[1], 7.0, epsilon = 1e-12);
        assert_abs_diff_eq!(table.items[[2, 29]], 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_inference_table_does_not_need_lead_status() {
        let content = [header(false), data_row("2001", "0", "1", None)].join("\n");
        let file = create_test_csv(&content).unwrap();
        let df = read_frame(file.path(), b',').unwrap();
        let table = visit_table_from_frame(&df, TableKind::Inference).unwrap();
        assert!(table.lead_status.is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_training_table_requires_lead_status() {
        let content = [header(false), data_row("2001", "0", "1", None)].join("\n");
        let file = create_test_csv(&content).unwrap();
        let df = read_frame(file.path(), b',').unwrap();
        match visit_table_from_frame(&df, TableKind::Training) {
            Err(DataError::ColumnNotFound(col)) => assert_eq!(col, LEAD_STATUS),
            other => panic!("Expected ColumnNotFound(LeadStatus), got {:?}", other),
        }
    }

    #[test]
    fn test_error_wrong_type_in_item() {
        let content = [
            header(false),
            data_row("2001", "0", "1", None),
            data_row("2001", "7", "severe", None),
        ]
        .join("\n");
        let file = create_test_csv(&content).unwrap();
        let df = read_frame(file.path(), b',').unwrap();
        match visit_table_from_frame(&df, TableKind::Inference) {
            Err(DataError::ColumnWrongType { column_name, .. }) => assert_eq!(column_name, "P1"),
            other => panic!("Expected ColumnWrongType(P1), got {:?}", other),
        }
    }

    #[test]
    fn test_error_missing_visit_day() {
        let content = [
            header(false),
            data_row("2001", "0", "1", None),
            data_row("2001", "", "1", None),
        ]
        .join("\n");
        let file = create_test_csv(&content).unwrap();
        let df = read_frame(file.path(), b',').unwrap();
        match visit_table_from_frame(&df, TableKind::Inference) {
            Err(DataError::MissingValuesFound(col)) => assert_eq!(col, VISIT_DAY),
            other => panic!("Expected MissingValuesFound(VisitDay), got {:?}", other),
        }
    }

    #[test]
    fn test_stack_frames_preserves_order() {
        let first = create_test_csv(
            &[header(true), data_row("1", "0", "1", Some("Passed"))].join("\n"),
        )
        .unwrap();
        let second = create_test_csv(
            &[header(true), data_row("2", "0", "2", Some("Passed"))].join("\n"),
        )
        .unwrap();
        let frames = vec![
            read_frame(first.path(), b',').unwrap(),
            read_frame(second.path(), b',').unwrap(),
        ];
        let stacked = stack_frames(&frames).unwrap();
        let table = visit_table_from_frame(&stacked, TableKind::Training).unwrap();
        assert_eq!(table.patient_ids, vec!["1", "2"]);
    }

    #[test]
    fn test_stack_frames_matches_columns_by_name_and_widens_types() {
        let first = create_test_csv(
            &[header(true), data_row("1", "0", "1", Some("Passed"))].join("\n"),
        )
        .unwrap();
        // Country and TxGroup swapped, fractional visit day, no PANSS_Total.
        let mut cols = vec!["Study", "TxGroup", "PatientID", "SiteID", "Country", "VisitDay"];
        cols.extend_from_slice(&PANSS_ITEMS);
        cols.push("LeadStatus");
        let mut cells = vec!["B", "Control", "2", "12", "Canada", "140.5"];
        cells.extend(std::iter::repeat_n("2", PANSS_ITEMS.len()));
        cells.push("Passed");
        let second = create_test_csv(&[cols.join(","), cells.join(",")].join("\n")).unwrap();

        let frames = vec![
            read_frame(first.path(), b',').unwrap(),
            read_frame(second.path(), b',').unwrap(),
        ];
        let stacked = stack_frames(&frames).unwrap();

        assert_eq!(stacked.height(), 2);
        assert_eq!(stacked.get_column_names(), frames[0].get_column_names());
        assert_eq!(stacked.column(VISIT_DAY).unwrap().dtype(), &DataType::Float64);
        assert_eq!(stacked.column("PANSS_Total").unwrap().null_count(), 1);

        let table = visit_table_from_frame(&stacked, TableKind::Training).unwrap();
        assert_eq!(table.countries, vec!["USA", "Canada"]);
        assert_eq!(table.tx_groups, vec!["Treatment", "Control"]);
        assert_abs_diff_eq!(table.visit_days[1], 140.5, epsilon = 1e-12);

        let dir = tempfile::tempdir().unwrap();
        let snapshot = dir.path().join("CombinedStudy.csv");
        let mut merged = stacked;
        write_frame(&mut merged, &snapshot, b',').unwrap();
        assert_eq!(std::fs::read_to_string(&snapshot).unwrap().lines().count(), 3);
    }

    #[test]
    fn test_patient_ids_keep_leading_zeros() {
        let content = [
            header(true),
            data_row("0101", "0", "1", Some("Passed")),
            data_row("101", "0", "2", Some("Passed")),
        ]
        .join("\n");
        let file = create_test_csv(&content).unwrap();
        let df = read_frame(file.path(), b',').unwrap();
        let table = visit_table_from_frame(&df, TableKind::Training).unwrap();
        assert_eq!(table.patient_ids, vec!["0101", "101"]);
    }

    #[test]
    fn test_append_drops_status_when_one_side_lacks_it() {
        let mut train = fixtures::table(&[fixtures::row("a", 0.0, 1.0)]);
        let mut infer_row = fixtures::row("b", 0.0, 2.0);
        infer_row.status = None;
        let infer = fixtures::table(&[infer_row]);

        train.append(&infer).unwrap();
        assert_eq!(train.len(), 2);
        assert!(train.lead_status.is_none());
        assert_abs_diff_eq!(train.items[[1, 0]], 2.0, epsilon = 1e-12);
    }
}

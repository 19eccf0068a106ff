//! Patient grouping and sequence-length profiling.
//!
//! Visits are grouped by `PatientID` explicitly instead of by scanning for
//! runs of equal IDs, so a patient whose rows are not contiguous still forms one
//! sequence. Patients are ordered by their first appearance in the table.

use crate::config::VisitOrder;
use ahash::AHashMap;
use std::ops::Range;

/// Row indices of each patient's visits, in sequence order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientGroups {
    ids: Vec<String>,
    rows: Vec<Vec<usize>>,
}

impl PatientGroups {
    /// Groups `span` of a table by patient. Returned row indices refer to the
    /// whole table, not to the span.
    pub fn from_rows(
        patient_ids: &[String],
        visit_days: &[f64],
        span: Range<usize>,
        order: VisitOrder,
    ) -> Self {
        let mut index: AHashMap<&str, usize> = AHashMap::new();
        let mut ids: Vec<String> = Vec::new();
        let mut rows: Vec<Vec<usize>> = Vec::new();

        for row in span {
            let id = patient_ids[row].as_str();
            let slot = *index.entry(id).or_insert_with(|| {
                ids.push(id.to_string());
                rows.push(Vec::new());
                rows.len() - 1
            });
            rows[slot].push(row);
        }

        if order == VisitOrder::VisitDay {
            for visits in &mut rows {
                visits.sort_by(|&a, &b| visit_days[a].total_cmp(&visit_days[b]));
            }
        }

        Self { ids, rows }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn patient_ids(&self) -> &[String] {
        &self.ids
    }

    /// `(patient, rows)` pairs in first-appearance order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[usize])> {
        self.ids
            .iter()
            .map(String::as_str)
            .zip(self.rows.iter().map(Vec::as_slice))
    }

    /// Total number of visits across every group.
    pub fn visit_count(&self) -> usize {
        self.rows.iter().map(Vec::len).sum()
    }
}

/// Result of profiling sequence lengths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceProfile {
    /// Longest visit sequence of any patient; the padding length `L`.
    pub padding_length: usize,
    /// The first patient, in scan order, whose sequence reaches `padding_length`.
    pub longest_patient: Option<String>,
}

/// Scans the groups of every split, in the order given, for the longest sequence.
pub fn profile_sequences<'a>(splits: impl IntoIterator<Item = &'a PatientGroups>) -> SequenceProfile {
    let mut profile = SequenceProfile {
        padding_length: 0,
        longest_patient: None,
    };
    for groups in splits {
        for (id, rows) in groups.iter() {
            if rows.len() > profile.padding_length {
                profile.padding_length = rows.len();
                profile.longest_patient = Some(id.to_string());
            }
        }
    }
    log::info!(
        "Padding length is {} visits (patient {})",
        profile.padding_length,
        profile.longest_patient.as_deref().unwrap_or("none")
    );
    profile
}

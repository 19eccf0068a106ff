//! Removal of repeated assessments of the same patient on the same study day.

use crate::table::VisitTable;
use ahash::AHashSet;

/// Keeps the first occurrence of every `(PatientID, VisitDay)` pair, preserving
/// the table's row order. Applies equally to training and inference tables.
pub fn deduplicate_visits(table: &VisitTable) -> VisitTable {
    let mut seen: AHashSet<(&str, u64)> = AHashSet::with_capacity(table.len());
    let keep: Vec<usize> = (0..table.len())
        .filter(|&row| {
            // Adding +0.0 folds -0.0 onto 0.0 so both hash as the same day.
            let key = (
                table.patient_ids[row].as_str(),
                (table.visit_days[row] + 0.0).to_bits(),
            );
            seen.insert(key)
        })
        .collect();

    let dropped = table.len() - keep.len();
    if dropped > 0 {
        log::debug!("Dropped {dropped} duplicate visit rows");
    }
    table.select_rows(&keep)
}

//! Selection of the training cohort: patients who completed follow-up with
//! assessments that passed central review.

use crate::config::CohortConfig;
use crate::table::VisitTable;
use ahash::AHashSet;

/// Filters a deduplicated training table down to the training cohort.
///
/// A visit is kept when its own `LeadStatus` equals `config.passed_status` and
/// its patient has at least one such passing visit later than
/// `config.min_followup_day`. Every passing visit of a qualifying patient is
/// kept, not only the late ones. The `LeadStatus` column is consumed.
///
/// A table without `LeadStatus` has no reviewed visits and yields an empty cohort.
pub fn filter_cohort(table: &VisitTable, config: &CohortConfig) -> VisitTable {
    let Some(status) = table.lead_status.as_ref() else {
        log::warn!("Training table carries no LeadStatus column; the cohort is empty");
        let mut empty = table.select_rows(&[]);
        empty.lead_status = None;
        return empty;
    };

    let passed: Vec<usize> = (0..table.len())
        .filter(|&row| status[row] == config.passed_status)
        .collect();

    let completed: AHashSet<&str> = passed
        .iter()
        .filter(|&&row| table.visit_days[row] > config.min_followup_day)
        .map(|&row| table.patient_ids[row].as_str())
        .collect();

    let keep: Vec<usize> = passed
        .into_iter()
        .filter(|&row| completed.contains(table.patient_ids[row].as_str()))
        .collect();

    log::info!(
        "Cohort filter kept {} of {} visits from {} patients",
        keep.len(),
        table.len(),
        completed.len()
    );

    let mut cohort = table.select_rows(&keep);
    cohort.lead_status = None;
    cohort
}

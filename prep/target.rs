use crate::sequence::PatientGroups;
use ndarray::{Array2, ArrayView2};

/// Forecast targets: for every patient group, the item scores of the last visit
/// in sequence order. Rows follow the groups' first-appearance order.
///
/// `items` must be the raw, unscaled item matrix the group row indices refer to.
/// Shape of the result: [groups.len(), items.ncols()].
pub fn extract_targets(items: ArrayView2<f64>, groups: &PatientGroups) -> Array2<f64> {
    let mut targets = Array2::zeros((groups.len(), items.ncols()));
    for (slot, (_, rows)) in groups.iter().enumerate() {
        if let Some(&last) = rows.last() {
            targets.row_mut(slot).assign(&items.row(last));
        }
    }
    log::debug!("Extracted targets for {} patients", targets.nrows());
    targets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VisitOrder;
    use ndarray::array;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_one_row_per_patient_from_last_visit() {
        let patients = ids(&["a", "a", "b", "c", "c", "c"]);
        let days = vec![0.0, 7.0, 0.0, 0.0, 7.0, 14.0];
        let items = array![[1.0, 1.0], [2.0, 2.0], [3.0, 3.0], [4.0, 4.0], [5.0, 5.0], [6.0, 6.0]];
        let groups = PatientGroups::from_rows(&patients, &days, 0..6, VisitOrder::Arrival);

        let targets = extract_targets(items.view(), &groups);
        assert_eq!(targets, array![[2.0, 2.0], [3.0, 3.0], [6.0, 6.0]]);
    }

    #[test]
    fn test_target_follows_visit_day_order() {
        let patients = ids(&["a", "a", "a"]);
        let days = vec![14.0, 28.0, 7.0];
        let items = array![[1.0], [2.0], [3.0]];

        let arrival = PatientGroups::from_rows(&patients, &days, 0..3, VisitOrder::Arrival);
        let by_day = PatientGroups::from_rows(&patients, &days, 0..3, VisitOrder::VisitDay);
        assert_eq!(extract_targets(items.view(), &arrival), array![[3.0]]);
        assert_eq!(extract_targets(items.view(), &by_day), array![[2.0]]);
    }

    #[test]
    fn test_no_patients_gives_empty_targets() {
        let items = Array2::<f64>::zeros((0, 30));
        let groups = PatientGroups::from_rows(&[], &[], 0..0, VisitOrder::Arrival);
        assert_eq!(extract_targets(items.view(), &groups).shape(), &[0, 30]);
    }
}

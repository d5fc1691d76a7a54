use crate::scoring::domain::{DataRecord, SectionFamily, VariableSet};
use crate::scoring::normalizer::interpret_number;

use super::ratio;

pub(super) const POOLED: &[&str] = &["DT", "NPDF", "NLS", "NMBR", "NMBT", "NMB", "NMA"];

pub(super) fn extract(records: &[DataRecord], _family: SectionFamily) -> VariableSet {
    let sum = |field: &str| -> f64 {
        records
            .iter()
            .filter_map(|record| record.get(field))
            .map(interpret_number)
            .sum()
    };

    let capacity = sum("capacity");
    let applicants = sum("applicants");
    let new_regular = sum("new_regular");
    let new_transfer = sum("new_transfer");

    let mut vars = VariableSet::new();
    vars.insert("TOTAL", records.len() as f64);
    vars.insert("DT", capacity);
    vars.insert("NPDF", applicants);
    vars.insert("NLS", sum("passed_selection"));
    vars.insert("NMBR", new_regular);
    vars.insert("NMBT", new_transfer);
    vars.insert("NMB", new_regular + new_transfer);
    vars.insert("NMA", sum("active_regular") + sum("active_transfer"));
    vars.insert("RSEL", ratio(applicants, capacity));
    vars
}

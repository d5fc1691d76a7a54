//! Family-specific reduction of normalized records into formula variables.

mod cooperation;
mod faculty;
mod generic;
mod student;

use super::domain::{DataRecord, FamilyKind, SectionFamily, VariableSet};

/// One row of the dispatch table.
pub struct Extractor {
    pub kind: FamilyKind,
    extract: fn(&[DataRecord], SectionFamily) -> VariableSet,
    /// Variables that may be summed across sections of the same family.
    pub pooled: &'static [&'static str],
}

static GENERIC: Extractor = Extractor {
    kind: FamilyKind::Generic,
    extract: generic::extract,
    pooled: &[],
};

static EXTRACTORS: [Extractor; 3] = [
    Extractor {
        kind: FamilyKind::Cooperation,
        extract: cooperation::extract,
        pooled: cooperation::POOLED,
    },
    Extractor {
        kind: FamilyKind::Student,
        extract: student::extract,
        pooled: student::POOLED,
    },
    Extractor {
        kind: FamilyKind::Faculty,
        extract: faculty::extract,
        pooled: faculty::POOLED,
    },
];

/// Look up the extractor for a family; anything unlisted gets the generic one.
pub fn extractor_for(family: SectionFamily) -> &'static Extractor {
    let kind = family.kind();
    EXTRACTORS
        .iter()
        .find(|extractor| extractor.kind == kind)
        .unwrap_or(&GENERIC)
}

/// Derive the variable set of one section from its (normalized) records.
pub fn extract(family: SectionFamily, records: &[DataRecord]) -> VariableSet {
    (extractor_for(family).extract)(records, family)
}

/// Names of the variables that pool additively across sections of `family`.
pub fn pooled_variables(family: SectionFamily) -> &'static [&'static str] {
    extractor_for(family).pooled
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

fn count(records: &[DataRecord], predicate: impl Fn(&DataRecord) -> bool) -> f64 {
    records.iter().filter(|record| predicate(record)).count() as f64
}

use crate::scoring::domain::{DataRecord, FieldValue, SectionFamily, VariableSet};
use crate::scoring::normalizer::interpret_flag;

use super::{count, ratio};

pub(super) const POOLED: &[&str] = &["NDT", "NDTPS", "NDS3", "NDGB", "NDLK", "NDL", "NDSK"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcademicRank {
    Professor,
    AssociateProfessor,
    AssistantProfessor,
    Lecturer,
}

const RANK_LABELS: &[(&str, AcademicRank)] = &[
    ("professor", AcademicRank::Professor),
    ("guru besar", AcademicRank::Professor),
    ("associate professor", AcademicRank::AssociateProfessor),
    ("lektor kepala", AcademicRank::AssociateProfessor),
    ("assistant professor", AcademicRank::AssistantProfessor),
    ("lektor", AcademicRank::AssistantProfessor),
    ("lecturer", AcademicRank::Lecturer),
    ("asisten ahli", AcademicRank::Lecturer),
];

fn rank_of(record: &DataRecord) -> Option<AcademicRank> {
    let label = match record.get("academic_rank") {
        Some(FieldValue::Text(text)) => text
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase(),
        _ => return None,
    };
    RANK_LABELS
        .iter()
        .find(|(candidate, _)| *candidate == label)
        .map(|(_, rank)| *rank)
}

fn is_set(record: &DataRecord, field: &str) -> bool {
    record.get(field).map(interpret_flag).unwrap_or(false)
}

/// Permanent lecturer whose expertise matches the study program.
fn in_program(record: &DataRecord) -> bool {
    is_set(record, "permanent") && is_set(record, "field_match")
}

pub(super) fn extract(records: &[DataRecord], _family: SectionFamily) -> VariableSet {
    let program: Vec<&DataRecord> = records.iter().filter(|record| in_program(record)).collect();
    let ranked = |rank: AcademicRank| {
        program
            .iter()
            .filter(|record| rank_of(record) == Some(rank))
            .count() as f64
    };

    let ndtps = program.len() as f64;
    let nds3 = program
        .iter()
        .filter(|record| is_set(record, "doctorate"))
        .count() as f64;
    let ndsk = program
        .iter()
        .filter(|record| is_set(record, "certified"))
        .count() as f64;
    let ndgb = ranked(AcademicRank::Professor);
    let ndlk = ranked(AcademicRank::AssociateProfessor);
    let ndl = ranked(AcademicRank::AssistantProfessor);

    let mut vars = VariableSet::new();
    vars.insert("TOTAL", records.len() as f64);
    vars.insert("NDT", count(records, |record| is_set(record, "permanent")));
    vars.insert("NDTPS", ndtps);
    vars.insert("NDS3", nds3);
    vars.insert("NDGB", ndgb);
    vars.insert("NDLK", ndlk);
    vars.insert("NDL", ndl);
    vars.insert("NDSK", ndsk);
    vars.insert("PDS3", ratio(nds3, ndtps) * 100.0);
    vars.insert("PGBLKL", ratio(ndgb + ndlk + ndl, ndtps) * 100.0);
    vars.insert("PDSK", ratio(ndsk, ndtps) * 100.0);
    vars
}

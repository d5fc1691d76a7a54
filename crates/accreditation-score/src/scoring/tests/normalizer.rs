use super::common::*;
use crate::scoring::domain::{DataRecord, FieldValue, SectionFamily, TridharmaActivity};
use crate::scoring::normalizer::normalize;

fn research() -> SectionFamily {
    SectionFamily::Cooperation(TridharmaActivity::Research)
}

fn flag(record: &DataRecord, field: &str) -> Option<bool> {
    record.get(field).and_then(FieldValue::as_bool)
}

#[test]
fn normalization_is_idempotent_for_every_family() {
    let mixed = vec![
        DataRecord::new("a")
            .with("internasional", "Ya")
            .with("lokal", "ya")
            .with("durasi", "2,5"),
        DataRecord::new("b").with("national", 1).with("pkm", "yes"),
        DataRecord::new("c"),
    ];
    let students = vec![DataRecord::new("2024")
        .with("daya_tampung", "120")
        .with("pendaftar", 480)
        .with("maba_reguler", FieldValue::Null)];
    let faculty = faculty_records(3, 1);

    for (records, family) in [
        (mixed, research()),
        (students, SectionFamily::Student),
        (faculty, SectionFamily::Faculty),
        (cooperation_records("x", 1, 1, 1), SectionFamily::Unknown),
    ] {
        let once = normalize(&records, family);
        let twice = normalize(&once, family);
        assert_eq!(once, twice, "{family:?}");
    }
}

#[test]
fn keeps_only_the_highest_cooperation_level() {
    let records = vec![
        DataRecord::new("both")
            .with("level_international", true)
            .with("level_local", "ya"),
        DataRecord::new("national-only").with("nasional", "YES"),
        DataRecord::new("nothing"),
    ];

    let normalized = normalize(&records, research());

    assert_eq!(flag(&normalized[0], "level_international"), Some(true));
    assert_eq!(flag(&normalized[0], "level_local"), Some(false));
    assert_eq!(flag(&normalized[1], "level_national"), Some(true));
    assert_eq!(flag(&normalized[2], "level_local"), Some(true));

    for record in &normalized {
        let set = ["level_international", "level_national", "level_local"]
            .iter()
            .filter(|field| flag(record, field) == Some(true))
            .count();
        assert_eq!(set, 1, "record {} must carry exactly one level", record.id);
    }
}

#[test]
fn defaults_activity_to_the_section_and_keeps_multiple_activities() {
    let records = vec![
        DataRecord::new("unflagged"),
        DataRecord::new("joint")
            .with("pendidikan", "ya")
            .with("penelitian", "ya"),
    ];

    let normalized = normalize(&records, research());

    assert_eq!(flag(&normalized[0], "activity_research"), Some(true));
    assert_eq!(flag(&normalized[0], "activity_education"), Some(false));
    assert_eq!(flag(&normalized[1], "activity_education"), Some(true));
    assert_eq!(flag(&normalized[1], "activity_research"), Some(true));
    assert_eq!(
        flag(&normalized[1], "activity_community_service"),
        Some(false)
    );
}

#[test]
fn migrates_legacy_names_without_overwriting_canonical_fields() {
    let records = vec![DataRecord::new("r")
        .with("level_national", true)
        .with("nasional", "tidak")
        .with("durasi", "3")];

    let normalized = normalize(&records, research());
    let record = &normalized[0];

    assert_eq!(flag(record, "level_national"), Some(true));
    assert!(record.get("nasional").is_none());
    assert!(record.get("durasi").is_none());
    assert_eq!(
        record.get("duration_years").and_then(FieldValue::as_number),
        Some(3.0)
    );
}

#[test]
fn student_numbers_are_parsed_and_defaulted() {
    let records = vec![DataRecord::new("2024")
        .with("daya_tampung", " 120 ")
        .with("lulus_seleksi", "95,5")
        .with("pendaftar", "banyak")
        .with("new_transfer", true)];

    let normalized = normalize(&records, SectionFamily::Student);
    let number = |field: &str| normalized[0].get(field).and_then(FieldValue::as_number);

    assert_eq!(number("capacity"), Some(120.0));
    assert_eq!(number("passed_selection"), Some(95.5));
    assert_eq!(number("applicants"), Some(0.0));
    assert_eq!(number("new_transfer"), Some(1.0));
    assert_eq!(number("active_regular"), Some(0.0));
}

#[test]
fn faculty_flags_and_rank_use_canonical_names() {
    let normalized = normalize(&faculty_records(1, 1), SectionFamily::Faculty);

    assert_eq!(flag(&normalized[0], "permanent"), Some(true));
    assert_eq!(flag(&normalized[0], "doctorate"), Some(true));
    assert_eq!(flag(&normalized[0], "certified"), Some(false));
    assert_eq!(
        normalized[0].get("academic_rank").and_then(FieldValue::as_text),
        Some("Lektor Kepala")
    );
    assert_eq!(flag(&normalized[1], "permanent"), Some(false));
    assert_eq!(flag(&normalized[1], "certified"), Some(false));
}

#[test]
fn unknown_sections_pass_through_untouched() {
    let records = vec![DataRecord::new("x").with("Internasional", "ya")];
    assert_eq!(normalize(&records, SectionFamily::Unknown), records);
}

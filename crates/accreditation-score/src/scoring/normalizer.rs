//! Cleans raw section records into the canonical shape the extractors expect.

use super::domain::{
    CooperationLevel, DataRecord, FamilyKind, FieldValue, SectionFamily, TridharmaActivity,
};

const TRUTHY: [&str; 4] = ["true", "ya", "yes", "1"];

/// Per-family field rules: which fields are numbers, which are flags, and
/// which legacy names map onto canonical ones.
struct NormalizationProfile {
    numeric: &'static [&'static str],
    flags: &'static [&'static str],
    aliases: &'static [(&'static str, &'static str)],
}

const COOPERATION: NormalizationProfile = NormalizationProfile {
    numeric: &["duration_years"],
    flags: &[
        "level_international",
        "level_national",
        "level_local",
        "activity_education",
        "activity_research",
        "activity_community_service",
    ],
    aliases: &[
        ("internasional", "level_international"),
        ("international", "level_international"),
        ("nasional", "level_national"),
        ("national", "level_national"),
        ("lokal", "level_local"),
        ("wilayah", "level_local"),
        ("local", "level_local"),
        ("pendidikan", "activity_education"),
        ("penelitian", "activity_research"),
        ("pkm", "activity_community_service"),
        ("pengabdian", "activity_community_service"),
        ("durasi", "duration_years"),
    ],
};

const STUDENT: NormalizationProfile = NormalizationProfile {
    numeric: &[
        "capacity",
        "applicants",
        "passed_selection",
        "new_regular",
        "new_transfer",
        "active_regular",
        "active_transfer",
    ],
    flags: &[],
    aliases: &[
        ("daya_tampung", "capacity"),
        ("pendaftar", "applicants"),
        ("lulus_seleksi", "passed_selection"),
        ("maba_reguler", "new_regular"),
        ("maba_transfer", "new_transfer"),
        ("mahasiswa_aktif_reguler", "active_regular"),
        ("mahasiswa_aktif_transfer", "active_transfer"),
    ],
};

const FACULTY: NormalizationProfile = NormalizationProfile {
    numeric: &[],
    flags: &["permanent", "doctorate", "certified", "field_match"],
    aliases: &[
        ("dosen_tetap", "permanent"),
        ("s3", "doctorate"),
        ("sertifikat_pendidik", "certified"),
        ("sesuai_ps", "field_match"),
        ("jabatan_akademik", "academic_rank"),
    ],
};

fn profile(kind: FamilyKind) -> Option<&'static NormalizationProfile> {
    match kind {
        FamilyKind::Cooperation => Some(&COOPERATION),
        FamilyKind::Student => Some(&STUDENT),
        FamilyKind::Faculty => Some(&FACULTY),
        FamilyKind::Generic => None,
    }
}

/// Normalize every record of a section. Total and idempotent; the input is left untouched.
pub fn normalize(records: &[DataRecord], family: SectionFamily) -> Vec<DataRecord> {
    let Some(profile) = profile(family.kind()) else {
        return records.to_vec();
    };

    records
        .iter()
        .map(|record| {
            let mut record = record.clone();
            migrate_aliases(&mut record, profile);

            for field in profile.numeric {
                let value = record.get(field).map(interpret_number).unwrap_or(0.0);
                record.fields.insert((*field).to_string(), FieldValue::Number(value));
            }
            for field in profile.flags {
                let value = record.get(field).map(interpret_flag).unwrap_or(false);
                record.fields.insert((*field).to_string(), FieldValue::Bool(value));
            }

            if let SectionFamily::Cooperation(activity) = family {
                settle_level(&mut record);
                default_activity(&mut record, activity);
            }
            record
        })
        .collect()
}

fn migrate_aliases(record: &mut DataRecord, profile: &NormalizationProfile) {
    for (alias, canonical) in profile.aliases {
        if let Some(value) = record.fields.remove(*alias) {
            record
                .fields
                .entry((*canonical).to_string())
                .or_insert(value);
        }
    }
}

/// Keep only the highest-precedence level; fall back to local when none is set.
fn settle_level(record: &mut DataRecord) {
    let winner = CooperationLevel::ordered()
        .into_iter()
        .find(|level| flag(record, level.field()))
        .unwrap_or(CooperationLevel::Local);

    for level in CooperationLevel::ordered() {
        record
            .fields
            .insert(level.field().to_string(), FieldValue::Bool(level == winner));
    }
}

fn default_activity(record: &mut DataRecord, own: TridharmaActivity) {
    let any = TridharmaActivity::ordered()
        .into_iter()
        .any(|activity| flag(record, activity.field()));
    if !any {
        record
            .fields
            .insert(own.field().to_string(), FieldValue::Bool(true));
    }
}

fn flag(record: &DataRecord, field: &str) -> bool {
    record.get(field).map(interpret_flag).unwrap_or(false)
}

/// Read a cell as a classification flag.
pub(crate) fn interpret_flag(value: &FieldValue) -> bool {
    match value {
        FieldValue::Bool(value) => *value,
        FieldValue::Number(value) => *value == 1.0,
        FieldValue::Text(text) => {
            let text = text.trim().to_ascii_lowercase();
            TRUTHY.contains(&text.as_str())
        }
        FieldValue::Null => false,
    }
}

/// Read a cell as a count or measure. Unparseable values count as zero.
pub(crate) fn interpret_number(value: &FieldValue) -> f64 {
    match value {
        FieldValue::Number(value) if value.is_finite() => *value,
        FieldValue::Number(_) | FieldValue::Null => 0.0,
        FieldValue::Bool(value) => f64::from(u8::from(*value)),
        FieldValue::Text(text) => text
            .trim()
            .replace(',', ".")
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .unwrap_or(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_vocabulary_is_case_insensitive() {
        for truthy in ["true", " YA ", "Yes", "1"] {
            assert!(interpret_flag(&FieldValue::from(truthy)), "{truthy}");
        }
        for falsy in ["false", "Tidak", "no", "0", "", "maybe"] {
            assert!(!interpret_flag(&FieldValue::from(falsy)), "{falsy}");
        }
        assert!(interpret_flag(&FieldValue::Number(1.0)));
        assert!(!interpret_flag(&FieldValue::Number(2.0)));
        assert!(!interpret_flag(&FieldValue::Null));
    }

    #[test]
    fn numbers_accept_comma_decimals() {
        assert_eq!(interpret_number(&FieldValue::from("3,5")), 3.5);
        assert_eq!(interpret_number(&FieldValue::from(" 12 ")), 12.0);
        assert_eq!(interpret_number(&FieldValue::from("n/a")), 0.0);
        assert_eq!(interpret_number(&FieldValue::Bool(true)), 1.0);
        assert_eq!(interpret_number(&FieldValue::Null), 0.0);
    }
}

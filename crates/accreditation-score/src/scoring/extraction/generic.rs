use crate::scoring::domain::{DataRecord, FieldValue, SectionFamily, VariableSet};

/// Counts flags and sums/averages numbers over every record, whatever the field names.
///
/// `TOTAL`, `SUM_*` and `AVG_*` are written last and win over flag counts with the same name.
pub(super) fn extract(records: &[DataRecord], _family: SectionFamily) -> VariableSet {
    let mut flags = VariableSet::new();
    let mut sums = VariableSet::new();
    let mut samples = VariableSet::new();

    for record in records {
        for (field, value) in &record.fields {
            let name = variable_name(field);
            match value {
                FieldValue::Bool(flag) => {
                    flags.accumulate(&name, if *flag { 1.0 } else { 0.0 });
                }
                FieldValue::Number(number) if number.is_finite() => {
                    sums.accumulate(&name, *number);
                    samples.accumulate(&name, 1.0);
                }
                _ => {}
            }
        }
    }

    let mut vars = flags;
    for (name, total) in sums.iter() {
        let count = samples.get(name).unwrap_or(1.0);
        vars.insert(format!("SUM_{name}"), total);
        vars.insert(format!("AVG_{name}"), total / count);
    }
    vars.insert("TOTAL", records.len() as f64);
    vars
}

/// Upper-case a field name and replace anything that is not an identifier character.
pub(super) fn variable_name(field: &str) -> String {
    let mut name: String = field
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() {
                ch.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    if name.is_empty() || name.starts_with(|ch: char| ch.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name
}

#[cfg(test)]
mod tests {
    use super::{extract, variable_name};
    use crate::scoring::domain::{DataRecord, SectionFamily};

    #[test]
    fn sanitizes_field_names() {
        assert_eq!(variable_name("has award"), "HAS_AWARD");
        assert_eq!(variable_name("2024-grant"), "_2024_GRANT");
        assert_eq!(variable_name("budget"), "BUDGET");
    }

    #[test]
    fn flag_names_cannot_shadow_summary_variables() {
        let records = vec![
            DataRecord::new("a")
                .with("total", true)
                .with("x", 5)
                .with("sum_x", true),
            DataRecord::new("b")
                .with("total", true)
                .with("x", 7)
                .with("sum_x", true),
        ];

        let vars = extract(&records, SectionFamily::Unknown);

        assert_eq!(vars.get("TOTAL"), Some(2.0));
        assert_eq!(vars.get("SUM_X"), Some(12.0));
        assert_eq!(vars.get("AVG_X"), Some(6.0));
    }
}

use crate::scoring::domain::{
    CooperationLevel, DataRecord, SectionFamily, TridharmaActivity, VariableSet,
};
use crate::scoring::normalizer::interpret_flag;

use super::count;

pub(super) const POOLED: &[&str] = &["N1", "N2", "N3", "NPD", "NPL", "NPKM"];

pub(super) fn extract(records: &[DataRecord], family: SectionFamily) -> VariableSet {
    let own_activity = match family {
        SectionFamily::Cooperation(activity) => Some(activity),
        _ => None,
    };

    let mut vars = VariableSet::new();
    vars.insert("TOTAL", records.len() as f64);

    for (name, level) in [
        ("N1", CooperationLevel::International),
        ("N2", CooperationLevel::National),
        ("N3", CooperationLevel::Local),
    ] {
        vars.insert(name, count(records, |record| level_of(record) == level));
    }

    for (name, activity) in [
        ("NPD", TridharmaActivity::Education),
        ("NPL", TridharmaActivity::Research),
        ("NPKM", TridharmaActivity::CommunityService),
    ] {
        vars.insert(
            name,
            count(records, |record| serves(record, activity, own_activity)),
        );
    }
    vars
}

/// Highest flagged level wins; an unflagged record is local.
fn level_of(record: &DataRecord) -> CooperationLevel {
    CooperationLevel::ordered()
        .into_iter()
        .find(|level| is_set(record, level.field()))
        .unwrap_or(CooperationLevel::Local)
}

fn serves(
    record: &DataRecord,
    activity: TridharmaActivity,
    own_activity: Option<TridharmaActivity>,
) -> bool {
    if is_set(record, activity.field()) {
        return true;
    }
    let unflagged = !TridharmaActivity::ordered()
        .into_iter()
        .any(|candidate| is_set(record, candidate.field()));
    unflagged && own_activity == Some(activity)
}

fn is_set(record: &DataRecord, field: &str) -> bool {
    record.get(field).map(interpret_flag).unwrap_or(false)
}

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use accreditation_score::error::AppError;
use accreditation_score::scoring::{
    DataRecord, FieldValue, FilterContext, FormulaCatalog, FormulaDefinition, FormulaId,
    ScoreWriteBack, ScoringService, SectionCode, SectionStore, StoreError,
};
use async_trait::async_trait;
use metrics_exporter_prometheus::PrometheusHandle;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
    pub(crate) store: Arc<InMemorySectionStore>,
    pub(crate) scoring: Arc<AppScoringService>,
}

pub(crate) type AppScoringService = ScoringService<InMemorySectionStore, InMemoryFormulaCatalog>;

type SectionKey = (String, SectionCode);

/// Section tables and stored scores keyed by study program.
#[derive(Default, Clone)]
pub(crate) struct InMemorySectionStore {
    tables: Arc<Mutex<HashMap<SectionKey, Vec<DataRecord>>>>,
    scores: Arc<Mutex<HashMap<SectionKey, ScoreWriteBack>>>,
}

impl InMemorySectionStore {
    pub(crate) fn replace(&self, program_id: &str, code: SectionCode, records: Vec<DataRecord>) {
        let mut guard = self.tables.lock().expect("section mutex poisoned");
        guard.insert((program_id.to_string(), code), records);
    }

    pub(crate) fn records(&self, program_id: &str, code: &SectionCode) -> Vec<DataRecord> {
        let guard = self.tables.lock().expect("section mutex poisoned");
        guard
            .get(&(program_id.to_string(), code.clone()))
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn score(&self, program_id: &str, code: &SectionCode) -> Option<ScoreWriteBack> {
        let guard = self.scores.lock().expect("score mutex poisoned");
        guard.get(&(program_id.to_string(), code.clone())).cloned()
    }
}

#[async_trait]
impl SectionStore for InMemorySectionStore {
    async fn fetch(
        &self,
        code: &SectionCode,
        filter: &FilterContext,
    ) -> Result<Vec<DataRecord>, StoreError> {
        Ok(self.records(&filter.program_id, code))
    }

    async fn write_back(
        &self,
        code: &SectionCode,
        filter: &FilterContext,
        payload: ScoreWriteBack,
    ) -> Result<(), StoreError> {
        let mut guard = self.scores.lock().expect("score mutex poisoned");
        guard.insert((filter.program_id.clone(), code.clone()), payload);
        Ok(())
    }
}

#[derive(Clone)]
pub(crate) struct InMemoryFormulaCatalog {
    formulas: Arc<Mutex<HashMap<FormulaId, FormulaDefinition>>>,
}

impl InMemoryFormulaCatalog {
    pub(crate) fn seeded() -> Self {
        let formulas = default_formulas()
            .into_iter()
            .map(|formula| (formula.id.clone(), formula))
            .collect();
        Self {
            formulas: Arc::new(Mutex::new(formulas)),
        }
    }

    pub(crate) fn get(&self, id: &FormulaId) -> Option<FormulaDefinition> {
        let guard = self.formulas.lock().expect("formula mutex poisoned");
        guard.get(id).cloned()
    }
}

#[async_trait]
impl FormulaCatalog for InMemoryFormulaCatalog {
    async fn fetch(&self, id: &FormulaId) -> Result<Option<FormulaDefinition>, StoreError> {
        Ok(self.get(id))
    }
}

/// Formulas for the cooperation criterion: `1a` weights cooperations by level
/// per program lecturer, `1b` rates how many tridharma activities are covered.
pub(crate) fn default_formulas() -> Vec<FormulaDefinition> {
    vec![
        FormulaDefinition::new(FormulaId::new("1", "a"), "RK = (a*N1 + b*N2 + c*N3)/NDTPS")
            .with_description("Weighted cooperation count per program lecturer")
            .with_parameter("a", 3.0)
            .with_parameter("b", 2.0)
            .with_parameter("c", 1.0)
            .with_condition("RK >= 4", "4")
            .with_condition("RK < 4", "RK"),
        FormulaDefinition::new(FormulaId::new("1", "b"), "0")
            .with_description("Tridharma coverage of cooperations")
            .with_condition("NPD > 0 && NPL > 0 && NPKM > 0", "4")
            .with_condition("NPD > 0 && NPL > 0 || NPD > 0 && NPKM > 0", "3")
            .with_condition("NPD > 0", "2")
            .with_condition("NPL > 0 || NPKM > 0", "1"),
    ]
}

/// Parse `1a`, `12b` or `3/c` into a formula id.
pub(crate) fn parse_formula_id(raw: &str) -> Result<FormulaId, String> {
    let raw = raw.trim();
    let (number, sub_letter) = match raw.split_once('/') {
        Some((number, sub_letter)) => (number, sub_letter),
        None => {
            let split = raw
                .find(|ch: char| !ch.is_ascii_digit())
                .unwrap_or(raw.len());
            raw.split_at(split)
        }
    };

    if number.is_empty() || sub_letter.is_empty() {
        return Err(format!(
            "'{raw}' is not a formula id; expected a number followed by a sub-letter, e.g. 1a"
        ));
    }
    Ok(FormulaId::new(number, sub_letter))
}

/// Parse a `NAME=VALUE` pair given on the command line.
pub(crate) fn parse_variable(raw: &str) -> Result<(String, f64), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("'{raw}' must look like NAME=VALUE"))?;
    let value = value
        .trim()
        .parse::<f64>()
        .map_err(|err| format!("'{value}' is not a number ({err})"))?;
    Ok((name.trim().to_string(), value))
}

/// Load section records from a JSON array or a CSV export with a header row.
pub(crate) fn load_records(path: &Path) -> Result<Vec<DataRecord>, AppError> {
    let is_csv = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("csv"))
        .unwrap_or(false);

    if is_csv {
        let file = std::fs::File::open(path)?;
        records_from_csv(file)
    } else {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

pub(crate) fn records_from_csv<R: std::io::Read>(reader: R) -> Result<Vec<DataRecord>, AppError> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let headers = reader
        .headers()
        .map_err(|err| AppError::Input(format!("csv header: {err}")))?
        .clone();

    let mut records = Vec::new();
    for (index, row) in reader.records().enumerate() {
        let row = row.map_err(|err| AppError::Input(format!("csv row {}: {err}", index + 1)))?;
        let mut record = DataRecord::new((index + 1).to_string());
        for (header, cell) in headers.iter().zip(row.iter()) {
            if header.eq_ignore_ascii_case("id") {
                if !cell.is_empty() {
                    record.id = cell.to_string();
                }
            } else {
                record.fields.insert(header.to_string(), cell_value(cell));
            }
        }
        records.push(record);
    }
    Ok(records)
}

fn cell_value(cell: &str) -> FieldValue {
    if cell.is_empty() {
        return FieldValue::Null;
    }
    if let Ok(flag) = cell.to_ascii_lowercase().parse::<bool>() {
        return FieldValue::Bool(flag);
    }
    match cell.parse::<f64>() {
        Ok(number) if number.is_finite() => FieldValue::Number(number),
        _ => FieldValue::Text(cell.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formula_ids_parse_with_or_without_separator() {
        assert_eq!(parse_formula_id("1a"), Ok(FormulaId::new("1", "a")));
        assert_eq!(parse_formula_id("12bc"), Ok(FormulaId::new("12", "bc")));
        assert_eq!(parse_formula_id("3/c"), Ok(FormulaId::new("3", "c")));
        assert!(parse_formula_id("12").is_err());
        assert!(parse_formula_id("a").is_err());
    }

    #[test]
    fn variables_parse_from_pairs() {
        assert_eq!(parse_variable("N1=10"), Ok(("N1".to_string(), 10.0)));
        assert_eq!(parse_variable(" NDTPS = 2.5 "), Ok(("NDTPS".to_string(), 2.5)));
        assert!(parse_variable("N1").is_err());
        assert!(parse_variable("N1=many").is_err());
    }

    #[test]
    fn csv_rows_become_records() {
        let csv = "id,partner,internasional,durasi,active\nmou-1,Universiti Malaya,ya,3,true\n,Dinas,,,\n";
        let records = records_from_csv(csv.as_bytes()).expect("csv parses");

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "mou-1");
        assert_eq!(
            records[0].get("internasional"),
            Some(&FieldValue::Text("ya".to_string()))
        );
        assert_eq!(records[0].get("durasi"), Some(&FieldValue::Number(3.0)));
        assert_eq!(records[0].get("active"), Some(&FieldValue::Bool(true)));
        assert_eq!(records[1].id, "2");
        assert_eq!(records[1].get("durasi"), Some(&FieldValue::Null));
    }

    #[test]
    fn csv_without_id_column_numbers_rows() {
        let records = records_from_csv("capacity,applicants\n100,300\n".as_bytes())
            .expect("csv parses");
        assert_eq!(records[0].id, "1");
        assert_eq!(records[0].get("capacity"), Some(&FieldValue::Number(100.0)));
    }

    #[test]
    fn upper_case_id_header_is_the_record_key() {
        let records = records_from_csv("ID,partner\nmou-9,Dinas\n".as_bytes()).expect("csv parses");
        assert_eq!(records[0].id, "mou-9");
        assert!(records[0].get("ID").is_none());
        assert!(records[0].get("id").is_none());
    }

    #[test]
    fn seeded_catalog_holds_cooperation_formulas() {
        let catalog = InMemoryFormulaCatalog::seeded();
        let primary = catalog.get(&FormulaId::new("1", "a")).expect("1a seeded");
        assert_eq!(primary.parameters.get("a"), Some(&3.0));
        assert!(catalog.get(&FormulaId::new("1", "b")).is_some());
    }
}

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use accreditation_score::config::ScoringConfig;
use accreditation_score::scoring::{
    AggregationOutcome, CombinedScoreRequest, DataRecord, FilterContext, FormulaCatalog,
    FormulaDefinition, FormulaId, ScoreWriteBack, ScoringService, SectionCode, SectionStore,
    StoreError, VariableSet,
};
use async_trait::async_trait;
use serde_json::json;

#[derive(Default)]
struct SpreadsheetStore {
    tables: Mutex<HashMap<(String, SectionCode), Vec<DataRecord>>>,
    scores: Mutex<HashMap<(String, SectionCode), ScoreWriteBack>>,
}

impl SpreadsheetStore {
    fn load(&self, program: &str, code: &str, rows: serde_json::Value) {
        let records: Vec<DataRecord> = serde_json::from_value(rows).expect("rows parse");
        self.tables
            .lock()
            .expect("table mutex poisoned")
            .insert((program.to_string(), SectionCode::new(code)), records);
    }

    fn score_for(&self, program: &str, code: &str) -> Option<ScoreWriteBack> {
        self.scores
            .lock()
            .expect("score mutex poisoned")
            .get(&(program.to_string(), SectionCode::new(code)))
            .cloned()
    }
}

#[async_trait]
impl SectionStore for SpreadsheetStore {
    async fn fetch(
        &self,
        code: &SectionCode,
        filter: &FilterContext,
    ) -> Result<Vec<DataRecord>, StoreError> {
        let tables = self.tables.lock().expect("table mutex poisoned");
        Ok(tables
            .get(&(filter.program_id.clone(), code.clone()))
            .cloned()
            .unwrap_or_default())
    }

    async fn write_back(
        &self,
        code: &SectionCode,
        filter: &FilterContext,
        payload: ScoreWriteBack,
    ) -> Result<(), StoreError> {
        self.scores
            .lock()
            .expect("score mutex poisoned")
            .insert((filter.program_id.clone(), code.clone()), payload);
        Ok(())
    }
}

struct StaticCatalog(Vec<FormulaDefinition>);

#[async_trait]
impl FormulaCatalog for StaticCatalog {
    async fn fetch(&self, id: &FormulaId) -> Result<Option<FormulaDefinition>, StoreError> {
        Ok(self.0.iter().find(|formula| &formula.id == id).cloned())
    }
}

fn catalog() -> StaticCatalog {
    let formulas: Vec<FormulaDefinition> = serde_json::from_value(json!([
        {
            "number": "1",
            "sub_letter": "a",
            "description": "Weighted cooperation count per program lecturer",
            "main_formula": "RK = (a*N1 + b*N2 + c*N3)/NDTPS",
            "conditions": [
                { "condition": "RK >= 4", "formula": 4 },
                { "condition": "RK < 4", "formula": "RK" }
            ],
            "parameters": { "a": 3, "b": 2, "c": 1 }
        },
        {
            "number": "1",
            "sub_letter": "b",
            "main_formula": "0",
            "conditions": [
                { "condition": "NPD > 0 && NPL > 0 && NPKM > 0", "formula": 4 },
                { "condition": "NPD + NPL + NPKM > 0", "formula": 2 }
            ]
        }
    ]))
    .expect("catalog parses");
    StaticCatalog(formulas)
}

fn seed_program(store: &SpreadsheetStore, program: &str) {
    store.load(
        program,
        "1-1",
        json!([
            { "id": "mou-01", "partner": "Universiti Malaya", "internasional": "Ya", "durasi": "3" },
            { "id": "mou-02", "partner": "Dinas Pendidikan", "wilayah": "ya" },
            { "id": "mou-03", "partner": "Kemendikbud", "nasional": "ya", "lokal": "ya" }
        ]),
    );
    store.load(
        program,
        "1-2",
        json!([
            { "id": "res-01", "international": true, "pengabdian": "ya" },
            { "id": "res-02", "national": 1 }
        ]),
    );
    store.load(
        program,
        "1-3",
        json!([{ "id": "pkm-01", "local": "TRUE" }]),
    );
    store.load(
        program,
        "3a1",
        json!([
            { "id": "d1", "dosen_tetap": "ya", "sesuai_ps": "ya", "s3": "ya", "jabatan_akademik": "Lektor Kepala" },
            { "id": "d2", "dosen_tetap": "ya", "sesuai_ps": "ya", "s3": "tidak", "jabatan_akademik": "Lektor" },
            { "id": "d3", "dosen_tetap": "ya", "sesuai_ps": "tidak", "s3": "ya" },
            { "id": "d4", "dosen_tetap": "tidak", "sesuai_ps": "ya" }
        ]),
    );
}

fn service(store: Arc<SpreadsheetStore>) -> ScoringService<SpreadsheetStore, StaticCatalog> {
    ScoringService::new(
        store,
        Arc::new(catalog()),
        ScoringConfig {
            throttle: Duration::ZERO,
        },
    )
}

#[tokio::test]
async fn forced_combined_score_is_persisted_for_every_section() {
    let store = Arc::new(SpreadsheetStore::default());
    seed_program(&store, "ps-ti");
    let service = service(store.clone());

    let outcome = service
        .combined_score(CombinedScoreRequest {
            filter: FilterContext::program("ps-ti"),
            force: true,
            variables: VariableSet::new(),
        })
        .await
        .expect("combined score runs");

    // N1 = 2, N2 = 2, N3 = 2, NDTPS = 2  =>  RK = (6 + 4 + 2) / 2 = 6, capped at 4.
    let combined = match outcome {
        AggregationOutcome::Computed(combined) => combined,
        other => panic!("expected computed outcome, got {other:?}"),
    };
    assert_eq!(combined.variables.get("N1"), Some(2.0));
    assert_eq!(combined.variables.get("N2"), Some(2.0));
    assert_eq!(combined.variables.get("N3"), Some(2.0));
    assert_eq!(combined.variables.get("NDTPS"), Some(2.0));
    assert_eq!(combined.score(), Some(4.0));
    assert_eq!(
        combined.secondary.as_ref().and_then(|result| result.score),
        Some(4.0)
    );

    for code in ["1-1", "1-2", "1-3", "3a1"] {
        let stored = store
            .score_for("ps-ti", code)
            .unwrap_or_else(|| panic!("score written back to {code}"));
        assert_eq!(stored.score, 4.0);
    }
    assert!(store.score_for("ps-other", "1-1").is_none());
}

#[tokio::test]
async fn other_program_without_data_is_skipped() {
    let store = Arc::new(SpreadsheetStore::default());
    seed_program(&store, "ps-ti");
    let service = service(store.clone());

    let outcome = service
        .combined_score(CombinedScoreRequest {
            filter: FilterContext::program("ps-si").with_year("2024/2025"),
            force: true,
            variables: VariableSet::new(),
        })
        .await
        .expect("skip is not an error");

    assert!(!outcome.is_computed());
    let payload = serde_json::to_value(&outcome).expect("outcome serializes");
    assert_eq!(payload["status"], "skipped");
    assert_eq!(payload["reason"]["sections"].as_array().map(Vec::len), Some(4));
    assert!(store.score_for("ps-si", "1-1").is_none());
}

#[tokio::test]
async fn audit_log_serializes_as_tagged_steps() {
    let store = Arc::new(SpreadsheetStore::default());
    seed_program(&store, "ps-ti");
    let service = service(store);

    let outcome = service
        .combined_score(CombinedScoreRequest {
            filter: FilterContext::program("ps-ti"),
            force: false,
            variables: VariableSet::new(),
        })
        .await
        .expect("combined score runs");
    let payload = serde_json::to_value(&outcome).expect("outcome serializes");

    let steps = payload["result"]["log"].as_array().expect("log array");
    let kinds: Vec<&str> = steps
        .iter()
        .filter_map(|step| step["step"].as_str())
        .collect();
    assert_eq!(
        kinds.iter().filter(|kind| **kind == "section_extracted").count(),
        4
    );
    assert!(kinds.contains(&"intermediate_bound"));
    assert!(kinds.contains(&"branch_selected"));
    assert_eq!(kinds.last(), Some(&"score_derived"));
}

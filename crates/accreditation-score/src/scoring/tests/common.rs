use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::response::Response;
use serde_json::Value;

use crate::config::ScoringConfig;
use crate::scoring::aggregation::{CombinedScorePlan, DependentSection};
use crate::scoring::domain::{DataRecord, FormulaDefinition, FormulaId, ScoreScale, SectionCode};
use crate::scoring::repository::{
    FilterContext, FormulaCatalog, ScoreWriteBack, SectionStore, StoreError,
};
use crate::scoring::service::ScoringService;

pub(super) const EPSILON: f64 = 1e-9;

pub(super) fn filter() -> FilterContext {
    FilterContext::program("ps-informatika").with_year("2024/2025")
}

/// Cooperation rows flagged with the given level counts, highest level first.
pub(super) fn cooperation_records(
    prefix: &str,
    international: usize,
    national: usize,
    local: usize,
) -> Vec<DataRecord> {
    let levels = std::iter::repeat("level_international")
        .take(international)
        .chain(std::iter::repeat("level_national").take(national))
        .chain(std::iter::repeat("level_local").take(local));

    levels
        .enumerate()
        .map(|(index, level)| {
            DataRecord::new(format!("{prefix}-{index}"))
                .with("partner", format!("Partner {index}"))
                .with(level, true)
        })
        .collect()
}

/// `in_program` permanent, field-matched lecturers plus `outside` adjunct staff.
pub(super) fn faculty_records(in_program: usize, outside: usize) -> Vec<DataRecord> {
    let ranks = ["Lektor Kepala", "Lektor", "Asisten Ahli", "Guru Besar"];
    let mut records: Vec<DataRecord> = (0..in_program)
        .map(|index| {
            DataRecord::new(format!("lecturer-{index}"))
                .with("dosen_tetap", "Ya")
                .with("sesuai_ps", "ya")
                .with("s3", if index % 2 == 0 { "ya" } else { "tidak" })
                .with("sertifikat_pendidik", index % 4 != 0)
                .with("jabatan_akademik", ranks[index % ranks.len()])
        })
        .collect();
    records.extend((0..outside).map(|index| {
        DataRecord::new(format!("adjunct-{index}"))
            .with("dosen_tetap", "tidak")
            .with("sesuai_ps", "ya")
            .with("s3", "ya")
    }));
    records
}

/// `RK = (a*N1 + b*N2 + c*N3)/NDTPS` capped at 4 once it reaches 3.
pub(super) fn rk_formula() -> FormulaDefinition {
    FormulaDefinition::new(
        FormulaId::new("1", "a"),
        "RK = (a*N1 + b*N2 + c*N3)/NDTPS",
    )
    .with_parameter("a", 2.0)
    .with_parameter("b", 1.0)
    .with_parameter("c", 3.0)
    .with_condition("RK >= 3", "4")
    .with_condition("RK < 3", "RK")
}

pub(super) fn coverage_formula() -> FormulaDefinition {
    FormulaDefinition::new(FormulaId::new("1", "b"), "0")
        .with_condition("NPD > 0 && NPL > 0 && NPKM > 0", "4")
        .with_condition("NPD > 0 && NPL > 0 || NPD > 0 && NPKM > 0", "3")
        .with_condition("NPD + NPL + NPKM > 0", "2")
}

pub(super) fn sections() -> Vec<DependentSection> {
    vec![
        DependentSection::new("1-1", "EDU"),
        DependentSection::new("1-2", "RES"),
        DependentSection::new("1-3", "PKM"),
        DependentSection::new("3a1", "FAC"),
    ]
}

pub(super) fn plan() -> CombinedScorePlan {
    CombinedScorePlan {
        sections: sections(),
        filter: filter(),
        primary: rk_formula(),
        secondary: Some(coverage_formula()),
        scale: Some(ScoreScale::default()),
        variables: Default::default(),
    }
}

/// Store seeded so the pooled scope is N1=10, N2=5, N3=2, NDTPS=20.
pub(super) fn seeded_store() -> MemorySectionStore {
    let store = MemorySectionStore::default();
    store.seed("1-1", cooperation_records("edu", 4, 2, 1));
    store.seed("1-2", cooperation_records("res", 3, 2, 1));
    store.seed("1-3", cooperation_records("pkm", 3, 1, 0));
    store.seed("3a1", faculty_records(20, 2));
    store
}

pub(super) fn scoring_config(throttle: Duration) -> ScoringConfig {
    ScoringConfig { throttle }
}

#[derive(Default, Clone)]
pub(super) struct MemorySectionStore {
    sections: Arc<Mutex<HashMap<SectionCode, Vec<DataRecord>>>>,
    writes: Arc<Mutex<Vec<(SectionCode, ScoreWriteBack)>>>,
    fetches: Arc<AtomicUsize>,
}

impl MemorySectionStore {
    pub(super) fn seed(&self, code: &str, records: Vec<DataRecord>) {
        self.sections
            .lock()
            .expect("section mutex poisoned")
            .insert(SectionCode::new(code), records);
    }

    pub(super) fn writes(&self) -> Vec<(SectionCode, ScoreWriteBack)> {
        self.writes.lock().expect("write mutex poisoned").clone()
    }

    pub(super) fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SectionStore for MemorySectionStore {
    async fn fetch(
        &self,
        code: &SectionCode,
        _filter: &FilterContext,
    ) -> Result<Vec<DataRecord>, StoreError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        // Suspend like a real I/O call so concurrent runs interleave.
        tokio::task::yield_now().await;
        let guard = self.sections.lock().expect("section mutex poisoned");
        Ok(guard.get(code).cloned().unwrap_or_default())
    }

    async fn write_back(
        &self,
        code: &SectionCode,
        _filter: &FilterContext,
        payload: ScoreWriteBack,
    ) -> Result<(), StoreError> {
        self.writes
            .lock()
            .expect("write mutex poisoned")
            .push((code.clone(), payload));
        Ok(())
    }
}

pub(super) struct UnavailableSectionStore;

#[async_trait]
impl SectionStore for UnavailableSectionStore {
    async fn fetch(
        &self,
        _code: &SectionCode,
        _filter: &FilterContext,
    ) -> Result<Vec<DataRecord>, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    async fn write_back(
        &self,
        _code: &SectionCode,
        _filter: &FilterContext,
        _payload: ScoreWriteBack,
    ) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }
}

/// Serves seeded sections but rejects every write-back.
pub(super) struct ReadOnlySectionStore(pub(super) MemorySectionStore);

#[async_trait]
impl SectionStore for ReadOnlySectionStore {
    async fn fetch(
        &self,
        code: &SectionCode,
        filter: &FilterContext,
    ) -> Result<Vec<DataRecord>, StoreError> {
        self.0.fetch(code, filter).await
    }

    async fn write_back(
        &self,
        _code: &SectionCode,
        _filter: &FilterContext,
        _payload: ScoreWriteBack,
    ) -> Result<(), StoreError> {
        Err(StoreError::Rejected("section is locked for review".to_string()))
    }
}

#[derive(Default, Clone)]
pub(super) struct MemoryFormulaCatalog {
    formulas: Arc<Mutex<HashMap<FormulaId, FormulaDefinition>>>,
    fetches: Arc<AtomicUsize>,
}

impl MemoryFormulaCatalog {
    pub(super) fn with_formulas(formulas: impl IntoIterator<Item = FormulaDefinition>) -> Self {
        let catalog = Self::default();
        for formula in formulas {
            catalog.put(formula);
        }
        catalog
    }

    pub(super) fn put(&self, formula: FormulaDefinition) {
        self.formulas
            .lock()
            .expect("formula mutex poisoned")
            .insert(formula.id.clone(), formula);
    }

    pub(super) fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FormulaCatalog for MemoryFormulaCatalog {
    async fn fetch(&self, id: &FormulaId) -> Result<Option<FormulaDefinition>, StoreError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let guard = self.formulas.lock().expect("formula mutex poisoned");
        Ok(guard.get(id).cloned())
    }
}

pub(super) struct UnavailableCatalog;

#[async_trait]
impl FormulaCatalog for UnavailableCatalog {
    async fn fetch(&self, _id: &FormulaId) -> Result<Option<FormulaDefinition>, StoreError> {
        Err(StoreError::Unavailable("catalog offline".to_string()))
    }
}

pub(super) fn scoring_service(
    store: MemorySectionStore,
    catalog: MemoryFormulaCatalog,
) -> ScoringService<MemorySectionStore, MemoryFormulaCatalog> {
    ScoringService::new(
        Arc::new(store),
        Arc::new(catalog),
        scoring_config(Duration::ZERO),
    )
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{DataRecord, FormulaDefinition, FormulaId, SectionCode};

/// Narrows a section fetch to one study program and, optionally, one academic year.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilterContext {
    pub program_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub academic_year: Option<String>,
}

impl FilterContext {
    pub fn program(program_id: impl Into<String>) -> Self {
        Self {
            program_id: program_id.into(),
            academic_year: None,
        }
    }

    pub fn with_year(mut self, academic_year: impl Into<String>) -> Self {
        self.academic_year = Some(academic_year.into());
        self
    }
}

/// Payload stored next to each dependent section after a forced computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreWriteBack {
    pub score: f64,
    pub table_data: serde_json::Value,
    pub computed_at: DateTime<Utc>,
}

/// Persistence for section records. Fetches may come back empty.
#[async_trait]
pub trait SectionStore: Send + Sync {
    async fn fetch(
        &self,
        code: &SectionCode,
        filter: &FilterContext,
    ) -> Result<Vec<DataRecord>, StoreError>;

    async fn write_back(
        &self,
        code: &SectionCode,
        filter: &FilterContext,
        payload: ScoreWriteBack,
    ) -> Result<(), StoreError>;
}

/// Source of formula definitions keyed by number and sub-letter.
#[async_trait]
pub trait FormulaCatalog: Send + Sync {
    async fn fetch(&self, id: &FormulaId) -> Result<Option<FormulaDefinition>, StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store rejected the request: {0}")]
    Rejected(String),
}

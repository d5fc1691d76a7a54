//! Accreditation scoring: record normalization, variable extraction, formula
//! resolution, and the combined score across dependent sections.

pub mod aggregation;
pub mod domain;
pub mod extraction;
pub mod formula;
pub mod normalizer;
pub mod repository;
pub mod router;
pub mod service;

#[cfg(test)]
mod tests;

pub use aggregation::{
    AggregateOptions, AggregationError, AggregationOutcome, AggregationState, CombinedScore,
    CombinedScoreAggregator, CombinedScorePlan, DependentSection, SectionSummary, SkipReason,
    MISSING_DATA_MESSAGE,
};
pub use domain::{
    Branch, CalculationLog, CalculationStep, CooperationLevel, DataRecord, FamilyKind,
    FieldValue, FormulaCondition, FormulaDefinition, FormulaId, ScoreDetail, ScoreResult,
    ScoreScale, SectionCode, SectionFamily, TridharmaActivity, VariableSet,
};
pub use extraction::{extract, pooled_variables};
pub use formula::{evaluate_number, resolve, ExpressionError};
pub use normalizer::normalize;
pub use repository::{FilterContext, FormulaCatalog, ScoreWriteBack, SectionStore, StoreError};
pub use router::scoring_router;
pub use service::{
    CombinedScoreConfig, CombinedScoreRequest, ScoringService, ScoringServiceError,
    SectionVariables,
};

//! Combined score over several dependent sections.
//!
//! A run fetches every dependent section, normalizes and extracts each one,
//! pools the variables, resolves the primary and secondary formulas and, when
//! forced, writes the result back to every section. Unforced runs are
//! single-flight and throttled through the shared [`AggregationState`].

mod state;

pub use state::AggregationState;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::domain::{
    CalculationLog, CalculationStep, FormulaDefinition, FormulaId, ScoreResult, ScoreScale,
    SectionCode, SectionFamily, VariableSet,
};
use super::extraction::{extract, pooled_variables};
use super::formula::resolve;
use super::normalizer::normalize;
use super::repository::{FilterContext, ScoreWriteBack, SectionStore, StoreError};

pub const MISSING_DATA_MESSAGE: &str =
    "score will be calculated once all required sections are saved";

/// A section the combined score depends on. `alias` prefixes its variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependentSection {
    pub code: SectionCode,
    pub alias: String,
}

impl DependentSection {
    pub fn new(code: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            code: SectionCode::new(code),
            alias: alias.into(),
        }
    }
}

/// Everything one combined-score run needs from its caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedScorePlan {
    pub sections: Vec<DependentSection>,
    pub filter: FilterContext,
    pub primary: FormulaDefinition,
    #[serde(default)]
    pub secondary: Option<FormulaDefinition>,
    #[serde(default)]
    pub scale: Option<ScoreScale>,
    /// Caller-supplied variables; merged last so they override extracted ones.
    #[serde(default)]
    pub variables: VariableSet,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateOptions {
    /// Bypass the in-flight and throttle guards and persist the result.
    #[serde(default)]
    pub force: bool,
}

impl AggregateOptions {
    pub const fn forced() -> Self {
        Self { force: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    InFlight,
    Throttled,
    MissingSectionData { sections: Vec<SectionCode> },
    MissingFormula { formula: FormulaId },
}

impl SkipReason {
    pub fn message(&self) -> String {
        match self {
            SkipReason::InFlight => "a combined score computation is already running".to_string(),
            SkipReason::Throttled => {
                "a combined score was computed moments ago; retry shortly".to_string()
            }
            SkipReason::MissingSectionData { .. } => MISSING_DATA_MESSAGE.to_string(),
            SkipReason::MissingFormula { formula } => {
                format!("formula {formula} is not defined yet")
            }
        }
    }
}

/// Variables and record count contributed by one section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionSummary {
    pub code: SectionCode,
    pub alias: String,
    pub family: SectionFamily,
    pub records: usize,
    pub variables: VariableSet,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedScore {
    /// Final (clamped) score with the full audit log of the run.
    pub result: ScoreResult,
    pub primary: ScoreResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary: Option<ScoreResult>,
    /// Pooled scope the formulas were resolved against.
    pub variables: VariableSet,
    pub sections: Vec<SectionSummary>,
    pub written_back: bool,
}

impl CombinedScore {
    pub fn score(&self) -> Option<f64> {
        self.result.score
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AggregationOutcome {
    Computed(CombinedScore),
    Skipped { reason: SkipReason, message: String },
}

impl AggregationOutcome {
    pub fn skipped(reason: SkipReason) -> Self {
        let message = reason.message();
        Self::Skipped { reason, message }
    }

    pub fn is_computed(&self) -> bool {
        matches!(self, Self::Computed(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AggregationError {
    #[error("failed to fetch section {section}: {source}")]
    Fetch {
        section: SectionCode,
        #[source]
        source: StoreError,
    },
    #[error("failed to write score back to section {section}: {source}")]
    WriteBack {
        section: SectionCode,
        #[source]
        source: StoreError,
    },
}

struct ExtractedSection {
    summary: SectionSummary,
    table_data: serde_json::Value,
}

/// Runs combined-score computations against a [`SectionStore`].
pub struct CombinedScoreAggregator<S> {
    store: Arc<S>,
    state: Arc<AggregationState>,
    throttle: Duration,
}

impl<S> CombinedScoreAggregator<S>
where
    S: SectionStore + 'static,
{
    pub fn new(store: Arc<S>, state: Arc<AggregationState>, throttle: Duration) -> Self {
        Self {
            store,
            state,
            throttle,
        }
    }

    pub fn state(&self) -> &Arc<AggregationState> {
        &self.state
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub async fn aggregate(
        &self,
        plan: &CombinedScorePlan,
        options: AggregateOptions,
    ) -> Result<AggregationOutcome, AggregationError> {
        let _guard = match self.state.try_begin(options.force, self.throttle) {
            Ok(guard) => guard,
            Err(reason) => {
                tracing::info!(?reason, "combined score skipped");
                return Ok(AggregationOutcome::skipped(reason));
            }
        };

        let mut fetched = Vec::with_capacity(plan.sections.len());
        for section in &plan.sections {
            let records = self
                .store
                .fetch(&section.code, &plan.filter)
                .await
                .map_err(|source| AggregationError::Fetch {
                    section: section.code.clone(),
                    source,
                })?;
            tracing::debug!(section = %section.code, records = records.len(), "section fetched");
            fetched.push((section, records));
        }

        let missing: Vec<SectionCode> = fetched
            .iter()
            .filter(|(_, records)| records.is_empty())
            .map(|(section, _)| section.code.clone())
            .collect();
        if !missing.is_empty() {
            tracing::info!(?missing, "combined score waiting on section data");
            return Ok(AggregationOutcome::skipped(
                SkipReason::MissingSectionData { sections: missing },
            ));
        }

        let mut log = CalculationLog::default();
        let mut scope = VariableSet::new();
        let mut pooled = VariableSet::new();
        let mut extracted = Vec::with_capacity(fetched.len());

        for (section, records) in fetched {
            let family = section.code.family();
            let normalized = normalize(&records, family);
            let variables = extract(family, &normalized);

            for (name, value) in variables.iter() {
                scope.insert(format!("{}_{}", section.alias, name), value);
            }
            for name in pooled_variables(family) {
                if let Some(value) = variables.get(name) {
                    pooled.accumulate(name, value);
                }
            }

            log.push(CalculationStep::SectionExtracted {
                section: section.code.clone(),
                family,
                records: normalized.len(),
                variables: variables.clone(),
            });
            let table_data = match serde_json::to_value(&normalized) {
                Ok(value) => value,
                Err(err) => {
                    tracing::warn!(
                        section = %section.code,
                        error = %err,
                        "section table could not be serialized, writing an empty table"
                    );
                    serde_json::Value::Array(Vec::new())
                }
            };
            extracted.push(ExtractedSection {
                table_data,
                summary: SectionSummary {
                    code: section.code.clone(),
                    alias: section.alias.clone(),
                    family,
                    records: normalized.len(),
                    variables,
                },
            });
        }

        scope.merge(&pooled);
        scope.merge(&plan.variables);

        let primary = resolve(&plan.primary, &scope);
        let secondary = plan.secondary.as_ref().map(|formula| {
            let mut secondary_scope = scope.clone();
            secondary_scope.merge(&primary.detail.bindings);
            resolve(formula, &secondary_scope)
        });

        let raw = primary.score.unwrap_or(0.0);
        let score = plan.scale.map(|scale| scale.clamp(raw)).unwrap_or(raw);

        log.extend(&primary.log);
        if let Some(secondary) = &secondary {
            log.extend(&secondary.log);
        }
        log.push(CalculationStep::ScoreDerived {
            primary: raw,
            secondary: secondary.as_ref().and_then(|result| result.score),
            score,
            clamped: score != raw,
        });

        let written_back = if options.force {
            self.write_back(plan, &extracted, score).await?;
            true
        } else {
            false
        };

        self.state.mark_completed();
        tracing::info!(
            formula = %plan.primary.id,
            sections = extracted.len(),
            score,
            written_back,
            "combined score computed"
        );

        Ok(AggregationOutcome::Computed(CombinedScore {
            result: ScoreResult {
                score: Some(score),
                detail: primary.detail.clone(),
                log,
            },
            primary,
            secondary,
            variables: scope,
            sections: extracted.into_iter().map(|section| section.summary).collect(),
            written_back,
        }))
    }

    async fn write_back(
        &self,
        plan: &CombinedScorePlan,
        sections: &[ExtractedSection],
        score: f64,
    ) -> Result<(), AggregationError> {
        let computed_at = Utc::now();
        for section in sections {
            let payload = ScoreWriteBack {
                score,
                table_data: section.table_data.clone(),
                computed_at,
            };
            self.store
                .write_back(&section.summary.code, &plan.filter, payload)
                .await
                .map_err(|source| AggregationError::WriteBack {
                    section: section.summary.code.clone(),
                    source,
                })?;
        }
        Ok(())
    }
}

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use super::aggregation::{
    AggregateOptions, AggregationError, AggregationOutcome, AggregationState,
    CombinedScoreAggregator, CombinedScorePlan, DependentSection, SkipReason,
};
use super::domain::{
    DataRecord, FormulaDefinition, FormulaId, ScoreResult, ScoreScale, SectionCode,
    SectionFamily, VariableSet,
};
use super::extraction::extract;
use super::formula::resolve;
use super::normalizer::normalize;
use super::repository::{FilterContext, FormulaCatalog, SectionStore, StoreError};
use crate::config::ScoringConfig;

/// Which sections and formulas make up the combined score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedScoreConfig {
    pub sections: Vec<DependentSection>,
    pub primary: FormulaId,
    #[serde(default)]
    pub secondary: Option<FormulaId>,
    #[serde(default)]
    pub scale: Option<ScoreScale>,
}

impl CombinedScoreConfig {
    /// Cooperation tables for the three tridharma activities plus the faculty
    /// table, scored by formulas `1a` (primary) and `1b` on a 0-4 scale.
    pub fn tridharma_cooperation() -> Self {
        Self {
            sections: vec![
                DependentSection::new("1-1", "EDU"),
                DependentSection::new("1-2", "RES"),
                DependentSection::new("1-3", "PKM"),
                DependentSection::new("3a1", "FAC"),
            ],
            primary: FormulaId::new("1", "a"),
            secondary: Some(FormulaId::new("1", "b")),
            scale: Some(ScoreScale::default()),
        }
    }
}

impl Default for CombinedScoreConfig {
    fn default() -> Self {
        Self::tridharma_cooperation()
    }
}

/// Trigger for one combined-score run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedScoreRequest {
    pub filter: FilterContext,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub variables: VariableSet,
}

/// Normalized view of a single section with its extracted variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionVariables {
    pub section: SectionCode,
    pub family: SectionFamily,
    pub records: Vec<DataRecord>,
    pub variables: VariableSet,
}

/// Facade over the formula catalog, the resolver, and the combined-score aggregator.
pub struct ScoringService<S, F> {
    aggregator: CombinedScoreAggregator<S>,
    catalog: Arc<F>,
    formulas: Mutex<HashMap<FormulaId, FormulaDefinition>>,
    combined: CombinedScoreConfig,
}

impl<S, F> ScoringService<S, F>
where
    S: SectionStore + 'static,
    F: FormulaCatalog + 'static,
{
    pub fn new(store: Arc<S>, catalog: Arc<F>, config: ScoringConfig) -> Self {
        Self::with_state(store, catalog, config, Arc::new(AggregationState::new()))
    }

    pub fn with_state(
        store: Arc<S>,
        catalog: Arc<F>,
        config: ScoringConfig,
        state: Arc<AggregationState>,
    ) -> Self {
        Self {
            aggregator: CombinedScoreAggregator::new(store, state, config.throttle),
            catalog,
            formulas: Mutex::new(HashMap::new()),
            combined: CombinedScoreConfig::default(),
        }
    }

    pub fn with_combined(mut self, combined: CombinedScoreConfig) -> Self {
        self.combined = combined;
        self
    }

    pub fn combined_config(&self) -> &CombinedScoreConfig {
        &self.combined
    }

    pub fn aggregation_state(&self) -> &Arc<AggregationState> {
        self.aggregator.state()
    }

    /// Fetch a definition, serving repeats from the in-process cache.
    pub async fn formula(
        &self,
        id: &FormulaId,
    ) -> Result<Option<FormulaDefinition>, ScoringServiceError> {
        let cached = self.cache().get(id).cloned();
        if cached.is_some() {
            return Ok(cached);
        }

        let fetched = self
            .catalog
            .fetch(id)
            .await
            .map_err(ScoringServiceError::Catalog)?;
        if let Some(definition) = &fetched {
            self.cache().insert(id.clone(), definition.clone());
        }
        Ok(fetched)
    }

    /// Drop one cached definition, or all of them when `id` is `None`.
    pub fn invalidate(&self, id: Option<&FormulaId>) {
        let mut cache = self.cache();
        match id {
            Some(id) => {
                cache.remove(id);
            }
            None => cache.clear(),
        }
    }

    pub fn section_variables(&self, code: &SectionCode, records: &[DataRecord]) -> SectionVariables {
        let family = code.family();
        let normalized = normalize(records, family);
        let variables = extract(family, &normalized);
        SectionVariables {
            section: code.clone(),
            family,
            records: normalized,
            variables,
        }
    }

    /// Resolve a catalog formula; an unknown id yields a null score with a message.
    pub async fn resolve_formula(
        &self,
        id: &FormulaId,
        variables: &VariableSet,
    ) -> Result<ScoreResult, ScoringServiceError> {
        match self.formula(id).await? {
            Some(definition) => Ok(resolve(&definition, variables)),
            None => Ok(ScoreResult::missing(format!("formula {id} is not defined"))),
        }
    }

    pub async fn combined_score(
        &self,
        request: CombinedScoreRequest,
    ) -> Result<AggregationOutcome, ScoringServiceError> {
        let Some(primary) = self.formula(&self.combined.primary).await? else {
            tracing::info!(formula = %self.combined.primary, "primary formula missing");
            return Ok(AggregationOutcome::skipped(SkipReason::MissingFormula {
                formula: self.combined.primary.clone(),
            }));
        };

        let secondary = match &self.combined.secondary {
            Some(id) => {
                let definition = self.formula(id).await?;
                if definition.is_none() {
                    tracing::debug!(formula = %id, "secondary formula missing, continuing without it");
                }
                definition
            }
            None => None,
        };

        let plan = CombinedScorePlan {
            sections: self.combined.sections.clone(),
            filter: request.filter,
            primary,
            secondary,
            scale: self.combined.scale,
            variables: request.variables,
        };
        let options = AggregateOptions {
            force: request.force,
        };

        Ok(self.aggregator.aggregate(&plan, options).await?)
    }

    fn cache(&self) -> std::sync::MutexGuard<'_, HashMap<FormulaId, FormulaDefinition>> {
        self.formulas.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScoringServiceError {
    #[error("formula catalog error: {0}")]
    Catalog(#[source] StoreError),
    #[error(transparent)]
    Aggregation(#[from] AggregationError),
}

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Stable code of one reporting table (e.g. `1-1`, `3a1`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SectionCode(pub String);

impl SectionCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn family(&self) -> SectionFamily {
        SectionFamily::for_code(&self.0)
    }
}

impl fmt::Display for SectionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The three pillars of higher education a cooperation can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TridharmaActivity {
    Education,
    Research,
    CommunityService,
}

impl TridharmaActivity {
    pub const fn ordered() -> [Self; 3] {
        [Self::Education, Self::Research, Self::CommunityService]
    }

    /// Canonical record field carrying this activity flag.
    pub const fn field(self) -> &'static str {
        match self {
            Self::Education => "activity_education",
            Self::Research => "activity_research",
            Self::CommunityService => "activity_community_service",
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Education => "Education",
            Self::Research => "Research",
            Self::CommunityService => "Community Service",
        }
    }
}

/// Cooperation level, listed from highest to lowest precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CooperationLevel {
    International,
    National,
    Local,
}

impl CooperationLevel {
    pub const fn ordered() -> [Self; 3] {
        [Self::International, Self::National, Self::Local]
    }

    pub const fn field(self) -> &'static str {
        match self {
            Self::International => "level_international",
            Self::National => "level_national",
            Self::Local => "level_local",
        }
    }
}

/// Behavioral category of a section; drives normalization and extraction rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "activity", rename_all = "snake_case")]
pub enum SectionFamily {
    Cooperation(TridharmaActivity),
    Student,
    Faculty,
    Unknown,
}

/// Checked top to bottom, so longer prefixes must come first.
const FAMILY_PREFIXES: &[(&str, SectionFamily)] = &[
    ("1-1", SectionFamily::Cooperation(TridharmaActivity::Education)),
    ("1-2", SectionFamily::Cooperation(TridharmaActivity::Research)),
    (
        "1-3",
        SectionFamily::Cooperation(TridharmaActivity::CommunityService),
    ),
    ("3a", SectionFamily::Faculty),
    ("2", SectionFamily::Student),
];

impl SectionFamily {
    pub fn for_code(code: &str) -> Self {
        let code = code.trim().to_ascii_lowercase();
        FAMILY_PREFIXES
            .iter()
            .find(|(prefix, _)| code.starts_with(prefix))
            .map(|(_, family)| *family)
            .unwrap_or(Self::Unknown)
    }

    pub const fn kind(self) -> FamilyKind {
        match self {
            Self::Cooperation(_) => FamilyKind::Cooperation,
            Self::Student => FamilyKind::Student,
            Self::Faculty => FamilyKind::Faculty,
            Self::Unknown => FamilyKind::Generic,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Cooperation(_) => "cooperation",
            Self::Student => "student",
            Self::Faculty => "faculty",
            Self::Unknown => "generic",
        }
    }
}

/// Dataless family tag used as the key of the rule tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FamilyKind {
    Cooperation,
    Student,
    Faculty,
    Generic,
}

/// Scalar cell value of a data record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        Self::Number(value as f64)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// One row of a data section: a stable key plus an open field mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRecord {
    pub id: String,
    #[serde(flatten)]
    pub fields: BTreeMap<String, FieldValue>,
}

impl DataRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }
}

/// Named numeric inputs to a formula. Built per computation, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariableSet(BTreeMap<String, f64>);

impl VariableSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.0.insert(name.into(), value);
    }

    /// Add `value` to the current value of `name`, starting from zero.
    pub fn accumulate(&mut self, name: &str, value: f64) {
        *self.0.entry(name.to_string()).or_insert(0.0) += value;
    }

    /// Copy every entry of `other` over this set; `other` wins on conflicts.
    pub fn merge(&mut self, other: &VariableSet) {
        for (name, value) in other.iter() {
            self.0.insert(name.to_string(), value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(name, value)| (name.as_str(), *value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for VariableSet {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(name, value)| (name.into(), value))
                .collect(),
        )
    }
}

/// Two-part key of a scoring rule, e.g. number `1`, sub-letter `a`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FormulaId {
    pub number: String,
    pub sub_letter: String,
}

impl FormulaId {
    pub fn new(number: impl Into<String>, sub_letter: impl Into<String>) -> Self {
        Self {
            number: number.into(),
            sub_letter: sub_letter.into(),
        }
    }
}

impl fmt::Display for FormulaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.number, self.sub_letter)
    }
}

/// Conditional override: when `condition` holds, `formula` replaces the main formula.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormulaCondition {
    pub condition: String,
    #[serde(deserialize_with = "string_or_number")]
    pub formula: String,
}

impl FormulaCondition {
    pub fn new(condition: impl Into<String>, formula: impl Into<String>) -> Self {
        Self {
            condition: condition.into(),
            formula: formula.into(),
        }
    }
}

/// Declarative, numbered scoring rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormulaDefinition {
    #[serde(flatten)]
    pub id: FormulaId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub main_formula: String,
    #[serde(default)]
    pub conditions: Vec<FormulaCondition>,
    #[serde(default)]
    pub parameters: BTreeMap<String, f64>,
}

impl FormulaDefinition {
    pub fn new(id: FormulaId, main_formula: impl Into<String>) -> Self {
        Self {
            id,
            description: None,
            main_formula: main_formula.into(),
            conditions: Vec::new(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_condition(
        mut self,
        condition: impl Into<String>,
        formula: impl Into<String>,
    ) -> Self {
        self.conditions.push(FormulaCondition::new(condition, formula));
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: f64) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(f64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(text) => text,
        Raw::Number(number) => number.to_string(),
    })
}

/// Which path the resolver took through a formula definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Branch {
    Matched { index: usize, condition: String },
    Fallback,
}

/// One audit entry of a score computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum CalculationStep {
    FormulaStarted {
        formula: FormulaId,
    },
    ParametersMerged {
        parameters: BTreeMap<String, f64>,
    },
    IntermediateBound {
        name: String,
        substituted: String,
        value: f64,
    },
    IntermediateFailed {
        name: String,
        expression: String,
        error: String,
    },
    ConditionEvaluated {
        index: usize,
        condition: String,
        substituted: String,
        matched: bool,
    },
    ConditionFailed {
        index: usize,
        condition: String,
        error: String,
    },
    BranchSelected {
        branch: Branch,
        expression: String,
    },
    FormulaEvaluated {
        expression: String,
        substituted: String,
        value: f64,
    },
    FormulaFailed {
        expression: String,
        error: String,
    },
    SectionExtracted {
        section: SectionCode,
        family: SectionFamily,
        records: usize,
        variables: VariableSet,
    },
    ScoreDerived {
        primary: f64,
        secondary: Option<f64>,
        score: f64,
        clamped: bool,
    },
}

/// Append-only audit trail of one computation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CalculationLog(Vec<CalculationStep>);

impl CalculationLog {
    pub fn push(&mut self, step: CalculationStep) {
        self.0.push(step);
    }

    pub fn extend(&mut self, other: &CalculationLog) {
        self.0.extend(other.0.iter().cloned());
    }

    pub fn steps(&self) -> &[CalculationStep] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// How a score was reached, for display next to the number.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formula: Option<FormulaId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<Branch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    /// Parameters and named intermediates visible to later formulas.
    #[serde(default, skip_serializing_if = "VariableSet::is_empty")]
    pub bindings: VariableSet,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub score: Option<f64>,
    pub detail: ScoreDetail,
    pub log: CalculationLog,
}

impl ScoreResult {
    /// Result for a computation whose inputs are not available yet.
    pub fn missing(message: impl Into<String>) -> Self {
        Self {
            score: None,
            detail: ScoreDetail {
                message: Some(message.into()),
                ..ScoreDetail::default()
            },
            log: CalculationLog::default(),
        }
    }
}

/// Closed interval a caller clamps its final score to, e.g. `[0, 4]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreScale {
    pub min: f64,
    pub max: f64,
}

impl ScoreScale {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.max(self.min).min(self.max)
    }
}

impl Default for ScoreScale {
    fn default() -> Self {
        Self::new(0.0, 4.0)
    }
}

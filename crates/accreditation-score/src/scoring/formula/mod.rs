//! Formula resolution: parameters, named intermediate, first matching condition,
//! then the final expression.

pub mod expression;

pub use expression::{Expr, ExpressionError, Statement, Value};

use super::domain::{
    Branch, CalculationLog, CalculationStep, FormulaDefinition, ScoreDetail, ScoreResult,
    VariableSet,
};

/// Evaluate a standalone expression to a number.
pub fn evaluate_number(source: &str, scope: &VariableSet) -> Result<f64, ExpressionError> {
    let statement = Statement::parse(source)?;
    statement.expr.evaluate(scope)?.as_number()
}

/// Resolve `formula` against `variables`. Never fails: a broken final
/// expression scores zero and carries the error in the detail.
pub fn resolve(formula: &FormulaDefinition, variables: &VariableSet) -> ScoreResult {
    let mut log = CalculationLog::default();
    log.push(CalculationStep::FormulaStarted {
        formula: formula.id.clone(),
    });

    let mut scope = variables.clone();
    let mut bindings = VariableSet::new();
    for (name, value) in &formula.parameters {
        scope.insert(name.clone(), *value);
        bindings.insert(name.clone(), *value);
    }
    log.push(CalculationStep::ParametersMerged {
        parameters: formula.parameters.clone(),
    });

    let main = Statement::parse(&formula.main_formula);
    if let Ok(Statement {
        target: Some(name),
        expr,
    }) = &main
    {
        match expr.evaluate(&scope).and_then(Value::as_number) {
            Ok(value) => {
                log.push(CalculationStep::IntermediateBound {
                    name: name.clone(),
                    substituted: expr.render(&scope),
                    value,
                });
                scope.insert(name.clone(), value);
                bindings.insert(name.clone(), value);
            }
            Err(error) => {
                tracing::debug!(formula = %formula.id, %name, %error, "intermediate left unbound");
                log.push(CalculationStep::IntermediateFailed {
                    name: name.clone(),
                    expression: formula.main_formula.clone(),
                    error: error.to_string(),
                });
            }
        }
    }

    let (branch, expression) = select_branch(formula, &scope, &mut log);
    log.push(CalculationStep::BranchSelected {
        branch: branch.clone(),
        expression: expression.to_string(),
    });

    let evaluated = match (&branch, main) {
        (Branch::Fallback, Ok(statement)) => Ok(statement),
        (Branch::Fallback, Err(error)) => Err(error),
        (Branch::Matched { .. }, _) => Statement::parse(expression),
    }
    .and_then(|statement| {
        let rendered = statement.expr.render(&scope);
        statement
            .expr
            .evaluate(&scope)
            .and_then(Value::as_number)
            .map(|value| (rendered, value))
    });

    let mut detail = ScoreDetail {
        formula: Some(formula.id.clone()),
        branch: Some(branch),
        expression: Some(expression.to_string()),
        bindings,
        ..ScoreDetail::default()
    };

    let score = match evaluated {
        Ok((substituted, value)) => {
            log.push(CalculationStep::FormulaEvaluated {
                expression: expression.to_string(),
                substituted,
                value,
            });
            value
        }
        Err(error) => {
            tracing::warn!(formula = %formula.id, expression, %error, "formula evaluation failed, scoring zero");
            log.push(CalculationStep::FormulaFailed {
                expression: expression.to_string(),
                error: error.to_string(),
            });
            detail.error = Some(error.to_string());
            0.0
        }
    };

    ScoreResult {
        score: Some(score),
        detail,
        log,
    }
}

/// First truthy condition wins; failing conditions count as false.
fn select_branch<'f>(
    formula: &'f FormulaDefinition,
    scope: &VariableSet,
    log: &mut CalculationLog,
) -> (Branch, &'f str) {
    for (index, condition) in formula.conditions.iter().enumerate() {
        let parsed = match Expr::parse(&condition.condition) {
            Ok(expr) => expr,
            Err(error) => {
                log.push(CalculationStep::ConditionFailed {
                    index,
                    condition: condition.condition.clone(),
                    error: error.to_string(),
                });
                continue;
            }
        };

        match parsed.evaluate(scope) {
            Ok(value) => {
                let matched = value.truthy();
                log.push(CalculationStep::ConditionEvaluated {
                    index,
                    condition: condition.condition.clone(),
                    substituted: parsed.render(scope),
                    matched,
                });
                if matched {
                    let branch = Branch::Matched {
                        index,
                        condition: condition.condition.clone(),
                    };
                    return (branch, condition.formula.as_str());
                }
            }
            Err(error) => {
                log.push(CalculationStep::ConditionFailed {
                    index,
                    condition: condition.condition.clone(),
                    error: error.to_string(),
                });
            }
        }
    }

    (Branch::Fallback, formula.main_formula.as_str())
}

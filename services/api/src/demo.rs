use crate::infra::{
    load_records, parse_formula_id, parse_variable, AppScoringService, InMemoryFormulaCatalog,
    InMemorySectionStore,
};
use accreditation_score::config::{AppConfig, ScoringConfig};
use accreditation_score::error::AppError;
use accreditation_score::scoring::{
    resolve, AggregationOutcome, CalculationStep, CombinedScoreRequest, DataRecord, FilterContext,
    FormulaDefinition, FormulaId, ScoreResult, ScoringService, SectionCode, VariableSet,
};
use clap::Args;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Args, Debug)]
pub(crate) struct ResolveArgs {
    /// Formula definition as JSON (number, sub_letter, main_formula, conditions, parameters)
    #[arg(long, conflicts_with = "id", required_unless_present = "id")]
    pub(crate) formula: Option<PathBuf>,
    /// Id of a built-in formula, e.g. 1a
    #[arg(long, value_parser = parse_formula_id)]
    pub(crate) id: Option<FormulaId>,
    /// JSON object of variable values
    #[arg(long)]
    pub(crate) variables: Option<PathBuf>,
    /// Extra variable as NAME=VALUE; wins over the variables file
    #[arg(long, value_parser = parse_variable)]
    pub(crate) var: Vec<(String, f64)>,
}

#[derive(Args, Debug)]
pub(crate) struct VariablesArgs {
    /// Section code the records belong to, e.g. 1-1 or 3a1
    #[arg(long)]
    pub(crate) section: String,
    /// Section export as a JSON array or a CSV file with a header row
    #[arg(long)]
    pub(crate) input: PathBuf,
}

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Study program the demo data is saved under
    #[arg(long, default_value = "ps-demo")]
    pub(crate) program: String,
    /// Print the audit log of the final computation
    #[arg(long)]
    pub(crate) log: bool,
}

fn scoring_service(store: Arc<InMemorySectionStore>, config: ScoringConfig) -> AppScoringService {
    ScoringService::new(store, Arc::new(InMemoryFormulaCatalog::seeded()), config)
}

pub(crate) async fn run_resolve(args: ResolveArgs) -> Result<(), AppError> {
    let ResolveArgs {
        formula,
        id,
        variables,
        var,
    } = args;

    let mut scope = match variables {
        Some(path) => serde_json::from_str::<VariableSet>(&std::fs::read_to_string(path)?)?,
        None => VariableSet::new(),
    };
    for (name, value) in var {
        scope.insert(name, value);
    }

    let result = match (formula, id) {
        (Some(path), _) => {
            let definition: FormulaDefinition =
                serde_json::from_str(&std::fs::read_to_string(path)?)?;
            resolve(&definition, &scope)
        }
        (None, Some(id)) => {
            let service = scoring_service(Arc::default(), ScoringConfig::default());
            service.resolve_formula(&id, &scope).await?
        }
        (None, None) => {
            return Err(AppError::Input(
                "either --formula or --id is required".to_string(),
            ))
        }
    };

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

pub(crate) fn run_variables(args: VariablesArgs) -> Result<(), AppError> {
    let records = load_records(&args.input)?;
    let service = scoring_service(Arc::default(), ScoringConfig::default());
    let section = service.section_variables(&SectionCode::new(args.section), &records);
    println!("{}", serde_json::to_string_pretty(&section)?);
    Ok(())
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs { program, log } = args;
    let config = AppConfig::load()?;
    let store = Arc::new(InMemorySectionStore::default());
    let service = scoring_service(store.clone(), config.scoring);

    println!("Accreditation scoring demo for program {program}");
    println!(
        "Combined score: formula {} over sections {}",
        service.combined_config().primary,
        service
            .combined_config()
            .sections
            .iter()
            .map(|section| format!("{} ({})", section.code, section.alias))
            .collect::<Vec<_>>()
            .join(", ")
    );

    println!("\nSaving sections one at a time");
    for (code, records) in demo_sections() {
        let count = records.len();
        store.replace(&program, SectionCode::new(code), records);
        let outcome = service.combined_score(request(&program, false)).await?;
        println!("- saved {code} ({count} rows) -> {}", outcome_line(&outcome));
    }

    println!("\nRecomputing right after the last save");
    let outcome = service.combined_score(request(&program, false)).await?;
    println!("- unforced run -> {}", outcome_line(&outcome));

    println!("\nForced recompute");
    let outcome = service.combined_score(request(&program, true)).await?;
    println!("- forced run -> {}", outcome_line(&outcome));

    if let AggregationOutcome::Computed(combined) = &outcome {
        println!("  Pooled variables:");
        for (name, value) in combined.variables.iter() {
            if !name.contains('_') {
                println!("    {name} = {value}");
            }
        }
        print_result("Primary", &combined.primary);
        if let Some(secondary) = &combined.secondary {
            print_result("Secondary", secondary);
        }

        println!("  Stored next to each section:");
        for section in &service.combined_config().sections {
            match store.score(&program, &section.code) {
                Some(stored) => println!(
                    "    - {}: {:.2} at {}",
                    section.code,
                    stored.score,
                    stored.computed_at.format("%Y-%m-%d %H:%M:%S UTC")
                ),
                None => println!("    - {}: not written", section.code),
            }
        }

        if log {
            println!("  Audit log:");
            for step in combined.result.log.steps() {
                println!("    - {}", step_line(step));
            }
        }
    }

    Ok(())
}

fn request(program: &str, force: bool) -> CombinedScoreRequest {
    CombinedScoreRequest {
        filter: FilterContext::program(program),
        force,
        variables: VariableSet::new(),
    }
}

fn outcome_line(outcome: &AggregationOutcome) -> String {
    match outcome {
        AggregationOutcome::Computed(combined) => match combined.score() {
            Some(score) if combined.written_back => {
                format!("score {score:.2}, written back")
            }
            Some(score) => format!("score {score:.2}"),
            None => "no score".to_string(),
        },
        AggregationOutcome::Skipped { message, .. } => format!("skipped: {message}"),
    }
}

fn print_result(label: &str, result: &ScoreResult) {
    let score = result
        .score
        .map(|score| format!("{score:.2}"))
        .unwrap_or_else(|| "-".to_string());
    let expression = result.detail.expression.as_deref().unwrap_or("-");
    println!("  {label}: {score} via `{expression}`");
    if let Some(error) = &result.detail.error {
        println!("    error: {error}");
    }
}

fn step_line(step: &CalculationStep) -> String {
    match step {
        CalculationStep::SectionExtracted {
            section, records, ..
        } => format!("{section}: {records} records extracted"),
        CalculationStep::IntermediateBound {
            name,
            substituted,
            value,
        } => format!("{name} = {substituted} = {value}"),
        CalculationStep::ConditionEvaluated {
            substituted,
            matched,
            ..
        } => format!("{substituted} -> {matched}"),
        CalculationStep::FormulaEvaluated {
            substituted, value, ..
        } => format!("{substituted} = {value}"),
        other => serde_json::to_string(other).unwrap_or_else(|_| format!("{other:?}")),
    }
}

/// Cooperation and lecturer tables as entered through the legacy Indonesian forms.
fn demo_sections() -> Vec<(&'static str, Vec<DataRecord>)> {
    let rows = |value: serde_json::Value| -> Vec<DataRecord> {
        serde_json::from_value(value).unwrap_or_default()
    };

    vec![
        (
            "1-1",
            rows(json!([
                { "id": "mou-01", "mitra": "Universiti Teknologi Malaysia", "internasional": "ya" },
                { "id": "mou-02", "mitra": "Nanyang Polytechnic", "internasional": "Ya" },
                { "id": "mou-03", "mitra": "Kemendikbudristek", "nasional": "ya" }
            ])),
        ),
        (
            "1-2",
            rows(json!([
                { "id": "lit-01", "mitra": "Universiti Malaya", "internasional": "ya" },
                { "id": "lit-02", "mitra": "Bappeda Kota", "lokal": "ya" }
            ])),
        ),
        (
            "1-3",
            rows(json!([
                { "id": "pkm-01", "mitra": "Dinas Pendidikan", "nasional": "ya" },
                { "id": "pkm-02", "mitra": "Desa Sukamaju", "wilayah": "ya" }
            ])),
        ),
        (
            "3a1",
            rows(json!([
                { "id": "d-01", "dosen_tetap": "ya", "sesuai_ps": "ya", "s3": "ya", "jabatan_akademik": "Lektor Kepala" },
                { "id": "d-02", "dosen_tetap": "ya", "sesuai_ps": "ya", "s3": "tidak", "jabatan_akademik": "Lektor" },
                { "id": "d-03", "dosen_tetap": "ya", "sesuai_ps": "ya", "s3": "ya", "jabatan_akademik": "Guru Besar" },
                { "id": "d-04", "dosen_tetap": "ya", "sesuai_ps": "ya", "s3": "tidak", "jabatan_akademik": "Asisten Ahli" },
                { "id": "d-05", "dosen_tetap": "tidak", "sesuai_ps": "ya", "s3": "ya" }
            ])),
        ),
    ]
}

//! `attestgate verify` — load a layout, a directory of attestations, and an
//! optional parameters file, and report whether the evidence satisfies the
//! layout.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use attestgate_core::expr::EvaluationLimits;
use attestgate_core::{load_layout, verify, Envelope};
use clap::{Args, ValueEnum};
use serde::Serialize;
use tracing::debug;

use crate::exit_codes::{self, EXIT_SUCCESS};

#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Path to the layout YAML file.
    #[arg(long)]
    pub layout: PathBuf,

    /// Directory of DSSE envelope JSON files, one per attestation.
    #[arg(long)]
    pub attestations_directory: PathBuf,

    /// JSON object of `string -> string` layout parameters.
    #[arg(long)]
    pub parameters: Option<PathBuf>,

    /// Output format.
    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Serialize)]
struct JsonResult {
    pass: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

pub fn cmd_verify(args: &VerifyArgs) -> i32 {
    match run(args) {
        Ok(()) => {
            report_pass(args.format);
            EXIT_SUCCESS
        }
        Err(RunError::Usage(e)) => {
            eprintln!("error: {e:#}");
            exit_codes::EXIT_USAGE_ERROR
        }
        Err(RunError::Verify(e)) => {
            report_failure(args.format, &e);
            exit_codes::exit_code_for(&e)
        }
    }
}

enum RunError {
    Usage(anyhow::Error),
    Verify(attestgate_core::VerifyError),
}

fn run(args: &VerifyArgs) -> Result<(), RunError> {
    let layout_yaml = fs::read_to_string(&args.layout)
        .with_context(|| format!("failed to read layout file: {}", args.layout.display()))
        .map_err(RunError::Usage)?;
    let layout = load_layout(&layout_yaml)
        .map_err(|e| RunError::Usage(anyhow::anyhow!("failed to parse layout: {e}")))?;

    let attestations = read_attestations(&args.attestations_directory).map_err(RunError::Usage)?;

    let parameters = match &args.parameters {
        Some(path) => read_parameters(path).map_err(RunError::Usage)?,
        None => BTreeMap::new(),
    };

    verify(layout, &attestations, &parameters, &EvaluationLimits::default()).map_err(RunError::Verify)
}

fn read_attestations(dir: &PathBuf) -> Result<BTreeMap<String, Envelope>> {
    let mut attestations = BTreeMap::new();
    let entries = fs::read_dir(dir)
        .with_context(|| format!("failed to read attestations directory: {}", dir.display()))?;

    for entry in entries {
        let entry = entry.with_context(|| format!("failed to read directory entry in {}", dir.display()))?;
        let path = entry.path();
        if !path.is_file() {
            debug!(path = %path.display(), "skipping non-file entry in attestations directory");
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let body = fs::read_to_string(&path)
            .with_context(|| format!("failed to read attestation file: {}", path.display()))?;
        let envelope: Envelope = serde_json::from_str(&body)
            .with_context(|| format!("failed to parse attestation envelope: {}", path.display()))?;
        attestations.insert(name, envelope);
    }
    Ok(attestations)
}

fn read_parameters(path: &PathBuf) -> Result<BTreeMap<String, String>> {
    let body = fs::read_to_string(path)
        .with_context(|| format!("failed to read parameters file: {}", path.display()))?;
    serde_json::from_str(&body)
        .with_context(|| format!("failed to parse parameters file: {}", path.display()))
}

fn report_pass(format: OutputFormat) {
    match format {
        OutputFormat::Text => println!("PASS"),
        OutputFormat::Json => {
            let result = JsonResult { pass: true, error_code: None, message: None };
            println!("{}", serde_json::to_string(&result).expect("JsonResult always serializes"));
        }
    }
}

fn report_failure(format: OutputFormat, err: &attestgate_core::VerifyError) {
    match format {
        OutputFormat::Text => eprintln!("FAIL [{}]: {err}", err.error_code()),
        OutputFormat::Json => {
            let result = JsonResult {
                pass: false,
                error_code: Some(err.error_code()),
                message: Some(err.to_string()),
            };
            println!("{}", serde_json::to_string(&result).expect("JsonResult always serializes"));
        }
    }
}

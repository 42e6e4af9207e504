// Abacus CLI - route calculation queries to the engine that fits them
// stdout carries results only; logs and diagnostics go to stderr.

mod exit_codes;
mod loader;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::{ArgAction, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use abacus_config::{ConfigError, Settings};
use abacus_core::{CalculationResult, ErrorKind, IntentType};
use abacus_engine::{EngineError, EvalResult, Value, WhatIfChange, WhatIfOutcome, WorkbookRegistry};
use abacus_router::{CalculateOptions, CalculationContext, Router};
use abacus_sandbox::{ExecuteOptions, Executor, SandboxError};

use exit_codes::{
    result_exit_code, EXIT_CALC_FAILED, EXIT_IO, EXIT_NOT_CALCULATION, EXIT_SUCCESS, EXIT_USAGE,
};

const DEFAULT_SHEET: &str = "Sheet1";
const SHEET_DOCUMENT: &str = "sheet";

#[derive(Parser)]
#[command(name = "abacus")]
#[command(about = "Answer calculation queries: arithmetic, finance, statistics, formulas and code")]
#[command(long_version = long_version())]
#[command(version)]
struct Cli {
    /// Settings file (overrides $ABACUS_CONFIG and the default location)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log to stderr (-v info, -vv debug). RUST_LOG takes precedence.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify a query and compute it with the matching engine
    #[command(after_help = "\
Examples:
  abacus calc '(25+75)*2'
  abacus calc '15% of $8,500'
  abacus calc 'monthly payment on a $200,000 mortgage at 5% for 30 years'
  abacus calc '=SUM(B1:B12)' --document sales.csv --sheet Sales
  abacus calc 'run a regression on sales' --code regression.py --json")]
    Calc {
        /// The query, in words or as a formula
        query: String,

        /// Load a CSV file as the document formulas run against
        #[arg(long, value_name = "CSV")]
        document: Option<PathBuf>,

        /// Sheet name for --document
        #[arg(long)]
        sheet: Option<String>,

        /// CSV rows passed inline (used when no document is loaded)
        #[arg(long, value_name = "CSV")]
        data: Option<PathBuf>,

        /// CSV delimiter
        #[arg(long, default_value = ",")]
        delimiter: char,

        /// Only try the primary engine
        #[arg(long)]
        no_fallback: bool,

        /// Code for the sandbox engine (its stdout is the answer)
        #[arg(long, value_name = "FILE")]
        code: Option<PathBuf>,

        #[arg(long)]
        json: bool,
    },

    /// Show how a query is classified, without computing it
    Detect {
        query: String,

        #[arg(long)]
        json: bool,
    },

    /// Evaluate an arithmetic expression
    Eval {
        expression: String,

        #[arg(long)]
        json: bool,
    },

    /// Check sandbox code against the safety rules without running it
    Validate {
        /// Code file, or - for stdin
        file: PathBuf,

        #[arg(long)]
        json: bool,
    },

    /// Run code in the sandbox and print its output
    Run {
        /// Code file, or - for stdin
        file: PathBuf,

        /// Timeout in milliseconds (cannot exceed the configured timeout)
        #[arg(long, value_name = "MS")]
        timeout: Option<u64>,

        #[arg(long)]
        json: bool,
    },

    /// Evaluate a formula against a CSV sheet, optionally under a what-if scenario
    #[command(after_help = "\
Examples:
  abacus sheet model.csv '=B3*12'
  abacus sheet model.csv '=B3' --what-if A1=0.07 --what-if A2=48
  cat model.csv | abacus sheet - '=SUM(A1:A10)'")]
    Sheet {
        /// CSV file, or - for stdin
        csv: PathBuf,

        /// Formula to evaluate (leading = optional)
        formula: String,

        /// Sheet name the CSV is loaded as
        #[arg(long, default_value = DEFAULT_SHEET)]
        sheet: String,

        /// Temporary edit applied before evaluating. Repeatable.
        #[arg(long = "what-if", value_name = "CELL=VALUE")]
        what_if: Vec<String>,

        /// CSV delimiter
        #[arg(long, default_value = ",")]
        delimiter: char,

        #[arg(long)]
        json: bool,
    },

    /// Settings file management
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the settings file in effect
    Path,
    /// Print the effective settings as TOML
    Show,
    /// Write the default settings file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (", env!("GIT_COMMIT_HASH"), ")",
        "\ntarget:  ", env!("TARGET"),
    )
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = cli.config.as_deref();
    let result = match cli.command {
        Commands::Calc { query, document, sheet, data, delimiter, no_fallback, code, json } => {
            cmd_calc(config, query, document, sheet, data, delimiter, no_fallback, code, json)
        }
        Commands::Detect { query, json } => cmd_detect(query, json),
        Commands::Eval { expression, json } => cmd_eval(expression, json),
        Commands::Validate { file, json } => cmd_validate(config, file, json),
        Commands::Run { file, timeout, json } => cmd_run(config, file, timeout, json),
        Commands::Sheet { csv, formula, sheet, what_if, delimiter, json } => {
            cmd_sheet(config, csv, formula, sheet, what_if, delimiter, json)
        }
        Commands::Config(command) => match command {
            ConfigCommands::Path => cmd_config_path(config),
            ConfigCommands::Show => cmd_config_show(config),
            ConfigCommands::Init { force } => cmd_config_init(config, force),
        },
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn args(msg: impl Into<String>) -> Self {
        Self { code: EXIT_USAGE, message: msg.into(), hint: None }
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self { code: EXIT_IO, message: msg.into(), hint: None }
    }

    pub fn calc(msg: impl Into<String>) -> Self {
        Self { code: EXIT_CALC_FAILED, message: msg.into(), hint: None }
    }

    pub fn config(err: ConfigError) -> Self {
        let hint = match &err {
            ConfigError::Parse { .. } | ConfigError::Invalid { .. } => {
                Some("fix the file, or regenerate it with `abacus config init --force`")
            }
            _ => None,
        };
        Self { code: EXIT_IO, message: err.to_string(), hint: hint.map(String::from) }
    }

    pub fn sandbox(err: SandboxError) -> Self {
        let hint = match &err {
            SandboxError::Spawn { .. } => Some("set [sandbox] interpreter in the settings file"),
            SandboxError::AtCapacity { .. } => Some("retry once running executions finish"),
            _ => None,
        };
        let code = match err {
            SandboxError::Spawn { .. } | SandboxError::Io(_) => EXIT_IO,
            _ => EXIT_CALC_FAILED,
        };
        Self { code, message: err.to_string(), hint: hint.map(String::from) }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

// ============================================================================
// Wiring
// ============================================================================

fn load_settings(config: Option<&Path>) -> Result<Settings, CliError> {
    let (settings, path) = Settings::resolve(config).map_err(CliError::config)?;
    match path {
        Some(path) => log::debug!("settings: {}", path.display()),
        None => log::debug!("settings: built-in defaults"),
    }
    Ok(settings)
}

struct Services {
    registry: Arc<Mutex<WorkbookRegistry>>,
    router: Router,
    idle_ttl: Option<Duration>,
}

impl Services {
    fn new(settings: &Settings) -> Self {
        let registry = Arc::new(Mutex::new(WorkbookRegistry::with_stacking_policy(
            settings.stacking_policy(),
        )));
        let executor = Arc::new(Executor::new(settings.sandbox_config()));
        let router = Router::builder()
            .standard_engines(Arc::clone(&registry), executor)
            .config(settings.router_config())
            .build();
        Self { registry, router, idle_ttl: settings.idle_workbook_ttl() }
    }

    /// Drop workbooks untouched for longer than the configured TTL.
    fn evict_idle(&self) {
        let Some(ttl) = self.idle_ttl else { return };
        let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        for id in registry.evict_idle(ttl) {
            log::info!("evicted idle workbook {}", id);
        }
    }
}

fn read_source(path: &Path) -> Result<String, CliError> {
    if path == Path::new("-") {
        let mut text = String::new();
        std::io::Read::read_to_string(&mut std::io::stdin(), &mut text)
            .map_err(|e| CliError::io(format!("stdin: {}", e)))?;
        return Ok(text);
    }
    fs::read_to_string(path).map_err(|e| CliError::io(format!("{}: {}", path.display(), e)))
}

fn delimiter_byte(delimiter: char) -> Result<u8, CliError> {
    u8::try_from(delimiter)
        .ok()
        .filter(|b| b.is_ascii())
        .ok_or_else(|| CliError::args(format!("delimiter must be a single ASCII character, got {:?}", delimiter)))
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| CliError::io(format!("cannot serialize output: {}", e)))?;
    println!("{}", text);
    Ok(())
}

/// Text mode: the answer on stdout, failures on stderr.
fn print_result(result: &CalculationResult, json: bool) -> Result<u8, CliError> {
    if json {
        print_json(result)?;
        return Ok(result_exit_code(result));
    }

    if result.success {
        let text = match (&result.formatted, &result.result) {
            (formatted, _) if !formatted.is_empty() => formatted.clone(),
            (_, Some(value)) => value.display(),
            _ => String::new(),
        };
        println!("{}", text);
        for step in &result.steps {
            log::info!("step: {}", step);
        }
    } else if result.is_not_calculation() {
        eprintln!("not a calculation");
    } else {
        eprintln!("error: {}", result.error.as_deref().unwrap_or("calculation failed"));
        if let Some(kind) = result.error_kind {
            eprintln!("kind:  {}", kind.as_str());
            if kind == ErrorKind::SandboxAtCapacity {
                eprintln!("hint:  the sandbox is busy; retry shortly");
            }
        }
    }
    Ok(result_exit_code(result))
}

// ============================================================================
// Commands
// ============================================================================

#[allow(clippy::too_many_arguments)]
fn cmd_calc(
    config: Option<&Path>,
    query: String,
    document: Option<PathBuf>,
    sheet: Option<String>,
    data: Option<PathBuf>,
    delimiter: char,
    no_fallback: bool,
    code: Option<PathBuf>,
    json: bool,
) -> Result<u8, CliError> {
    if query.trim().is_empty() {
        return Err(CliError::args("query is empty"));
    }
    if sheet.is_some() && document.is_none() {
        return Err(CliError::args("--sheet requires --document"));
    }
    let delimiter = delimiter_byte(delimiter)?;
    let settings = load_settings(config)?;
    let services = Services::new(&settings);

    let mut options = CalculateOptions::default();
    if no_fallback {
        options = options.without_fallback();
    }
    if let Some(path) = code {
        options = options.with_code(read_source(&path)?);
    }

    let mut context: Option<CalculationContext> = None;
    if let Some(path) = document {
        let rows = loader::read_rows(&path, delimiter)?;
        let document_id = path.display().to_string();
        let sheet = sheet.unwrap_or_else(|| DEFAULT_SHEET.to_string());
        {
            let mut registry = services.registry.lock().unwrap_or_else(|e| e.into_inner());
            loader::load_document(&mut registry, &document_id, &sheet, &rows)?;
        }
        context = Some(CalculationContext::for_document(document_id).with_sheet(sheet));
    }
    if let Some(path) = data {
        let rows = loader::read_rows(&path, delimiter)?;
        context.get_or_insert_with(CalculationContext::default).spreadsheet_data = Some(rows);
    }
    if let Some(context) = context {
        options = options.with_context(context);
    }

    services.evict_idle();
    let result = services.router.calculate(&query, &options);
    print_result(&result, json)
}

fn cmd_detect(query: String, json: bool) -> Result<u8, CliError> {
    let detection = abacus_intent::detect(&query);
    if json {
        print_json(&detection)?;
    } else {
        println!("type:       {}", detection.intent);
        println!("confidence: {:.2}", detection.confidence);
        println!("normalized: {}", detection.normalized_expression);
    }
    if detection.intent == IntentType::None {
        Ok(EXIT_NOT_CALCULATION)
    } else {
        Ok(EXIT_SUCCESS)
    }
}

fn cmd_eval(expression: String, json: bool) -> Result<u8, CliError> {
    let result = abacus_calc::evaluate_expression(&expression);
    print_result(&result, json)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RunFailure {
    error: String,
    error_kind: ErrorKind,
}

fn cmd_validate(config: Option<&Path>, file: PathBuf, json: bool) -> Result<u8, CliError> {
    let settings = load_settings(config)?;
    let code = read_source(&file)?;
    let validation = abacus_sandbox::validate_code(&code, &settings.sandbox_config());

    if json {
        print_json(&validation)?;
    } else if validation.valid {
        println!("ok");
    } else {
        println!("rejected: {}", validation.reason.as_deref().unwrap_or("unsafe code"));
    }
    Ok(if validation.valid { EXIT_SUCCESS } else { EXIT_CALC_FAILED })
}

fn cmd_run(config: Option<&Path>, file: PathBuf, timeout: Option<u64>, json: bool) -> Result<u8, CliError> {
    if timeout == Some(0) {
        return Err(CliError::args("--timeout must be positive"));
    }
    let settings = load_settings(config)?;
    let code = read_source(&file)?;
    let executor = Executor::new(settings.sandbox_config());
    let options = ExecuteOptions { timeout: timeout.map(Duration::from_millis) };

    let outcome = match executor.execute_with_limits(&code, &options) {
        Ok(outcome) => outcome,
        Err(err) if json => {
            print_json(&RunFailure { error: err.to_string(), error_kind: err.kind() })?;
            return Ok(CliError::sandbox(err).code);
        }
        Err(err) => return Err(CliError::sandbox(err)),
    };

    let code = if outcome.succeeded() { EXIT_SUCCESS } else { EXIT_CALC_FAILED };
    if json {
        print_json(&outcome)?;
        return Ok(code);
    }

    print!("{}", outcome.stdout);
    if !outcome.stderr.is_empty() {
        eprint!("{}", outcome.stderr);
    }
    if outcome.output_truncated {
        eprintln!("note: output truncated at {} bytes", settings.sandbox.max_output_bytes);
    }
    if outcome.timed_out {
        eprintln!("error: timed out after {} ms", outcome.timeout_ms);
    } else if let Some(status) = outcome.exit_code.filter(|c| *c != 0) {
        eprintln!("error: exited with status {}", status);
    }
    Ok(code)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SheetOutput {
    value: SheetValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    what_if: Option<WhatIfOutcome>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum SheetValue {
    Scalar(Value),
    Array(Vec<Vec<Value>>),
}

fn parse_what_if(spec: &str) -> Result<WhatIfChange, CliError> {
    let (cell, value) = spec
        .split_once('=')
        .filter(|(cell, _)| !cell.trim().is_empty())
        .ok_or_else(|| {
            CliError::args(format!("invalid --what-if {:?}", spec))
                .with_hint("syntax: CELL=VALUE, e.g. A1=0.07 or Inputs!B2==A1*2")
        })?;
    Ok(WhatIfChange::new(cell.trim(), value))
}

fn engine_error(err: EngineError) -> CliError {
    let code = match err.kind() {
        ErrorKind::SheetOrCellNotFound => EXIT_USAGE,
        _ => EXIT_CALC_FAILED,
    };
    CliError { code, message: err.to_string(), hint: None }
}

fn cmd_sheet(
    config: Option<&Path>,
    csv: PathBuf,
    formula: String,
    sheet: String,
    what_if: Vec<String>,
    delimiter: char,
    json: bool,
) -> Result<u8, CliError> {
    let delimiter = delimiter_byte(delimiter)?;
    let changes = what_if.iter().map(|s| parse_what_if(s)).collect::<Result<Vec<_>, _>>()?;
    let settings = load_settings(config)?;
    let rows = loader::read_rows(&csv, delimiter)?;

    let mut registry = WorkbookRegistry::with_stacking_policy(settings.stacking_policy());
    loader::load_document(&mut registry, SHEET_DOCUMENT, &sheet, &rows)?;

    let mut scenario = None;
    if !changes.is_empty() {
        let outcome = registry
            .execute_what_if(SHEET_DOCUMENT, &sheet, &changes)
            .map_err(engine_error)?;
        log::info!(
            "what-if: {} cells changed, {} recomputed",
            outcome.cells_changed,
            outcome.recalc.cells_recomputed
        );
        scenario = Some(outcome);
    }
    let evaluated = registry.evaluate_formula_in_document(SHEET_DOCUMENT, &sheet, &formula);
    if scenario.is_some() {
        registry.revert_what_if(SHEET_DOCUMENT).map_err(engine_error)?;
    }
    let evaluated = evaluated.map_err(|e| engine_error(e).with_hint("check the formula syntax"))?;

    let value = match evaluated {
        EvalResult::Scalar(v) => SheetValue::Scalar(v),
        EvalResult::Array(rows) if rows.len() == 1 && rows[0].len() == 1 => {
            SheetValue::Scalar(rows[0][0].clone())
        }
        EvalResult::Array(rows) => SheetValue::Array(rows),
    };
    let error = match &value {
        SheetValue::Scalar(Value::Error(e)) => Some(e.as_str()),
        _ => None,
    };

    if json {
        print_json(&SheetOutput { value, what_if: scenario })?;
        return Ok(if error.is_some() { EXIT_CALC_FAILED } else { EXIT_SUCCESS });
    }

    match value {
        SheetValue::Scalar(v) => println!("{}", v),
        SheetValue::Array(rows) => print!("{}", array_to_csv(&rows)?),
    }
    match error {
        Some(token) => Err(CliError::calc(format!("formula returned {}", token))),
        None => Ok(EXIT_SUCCESS),
    }
}

fn array_to_csv(rows: &[Vec<Value>]) -> Result<String, CliError> {
    let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
    for row in rows {
        writer
            .write_record(row.iter().map(|v| v.to_string()))
            .map_err(|e| CliError::io(e.to_string()))?;
    }
    let bytes = writer.into_inner().map_err(|e| CliError::io(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| CliError::io(e.to_string()))
}

fn cmd_config_path(config: Option<&Path>) -> Result<u8, CliError> {
    match Settings::locate(config) {
        Some(path) => println!("{}", path.display()),
        None => {
            println!("{}", Settings::config_path().display());
            eprintln!("note: file does not exist; built-in defaults are in effect");
        }
    }
    Ok(EXIT_SUCCESS)
}

fn cmd_config_show(config: Option<&Path>) -> Result<u8, CliError> {
    let settings = load_settings(config)?;
    print!("{}", settings.to_toml().map_err(CliError::config)?);
    Ok(EXIT_SUCCESS)
}

fn cmd_config_init(config: Option<&Path>, force: bool) -> Result<u8, CliError> {
    let path = match config {
        Some(path) => path.to_path_buf(),
        None => Settings::locate(None).unwrap_or_else(Settings::config_path),
    };
    if path.exists() && !force {
        return Err(CliError::args(format!("{} already exists", path.display()))
            .with_hint("pass --force to overwrite it with defaults"));
    }
    Settings::default().save_to(&path).map_err(CliError::config)?;
    eprintln!("wrote {}", path.display());
    Ok(EXIT_SUCCESS)
}

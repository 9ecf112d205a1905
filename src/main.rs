//! edgestack CLI entrypoint.
//!
//! This is the main entrypoint for the edgestack command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use edgestack::cli::{Cli, Commands, OutputFormatter, StateCommands};
use edgestack::config::{ConfigParser, ConfigValidator, StackConfig, StateBackend, find_config_file};
use edgestack::error::{Result, StackError};
use edgestack::graph::ResourceGraph;
use edgestack::planner::{CancelFlag, Plan};
use edgestack::provider::build_provider;
use edgestack::reconciler::{ReconciliationResult, Reconciler};
use edgestack::state::{LocalStateStore, S3StateStore, STATE_DIR, StateStore};

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_json);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

/// Initializes the logging system.
///
/// `RUST_LOG` wins over the verbosity flag when set.
fn init_logging(verbose: bool, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<ExitCode> {
    let formatter = OutputFormatter::new(cli.output);
    let config = cli.config.as_ref();

    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force).map(|()| ExitCode::SUCCESS),
        Commands::Validate { warnings } => cmd_validate(config, warnings, &formatter),
        Commands::Plan { detailed } => cmd_plan(config, detailed, &formatter).await,
        Commands::Apply { yes } => cmd_apply(config, yes, &formatter).await,
        Commands::Destroy { yes } => cmd_destroy(config, yes, &formatter).await,
        Commands::Graph => cmd_graph(config, &formatter),
        Commands::Drift => cmd_drift(config, &formatter).await,
        Commands::Output => cmd_output(config, &formatter).await,
        Commands::State { command } => cmd_state(config, command, &formatter).await,
    }
}

/// Initialize a new stack directory.
fn cmd_init(path: &Path, force: bool) -> Result<()> {
    info!("Initializing new edgestack project in: {}", path.display());

    let config_path = path.join("edgestack.yaml");
    let env_path = path.join(".env.example");
    let gitignore_path = path.join(".gitignore");

    if !force && config_path.exists() {
        eprintln!("Stack file already exists: {}", config_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(());
    }

    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    std::fs::write(&config_path, include_str!("../templates/edgestack.yaml"))?;
    eprintln!("Created: {}", config_path.display());

    std::fs::write(&env_path, include_str!("../templates/.env.example"))?;
    eprintln!("Created: {}", env_path.display());

    let state_entry = format!("{STATE_DIR}/");
    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        let has_env = existing.lines().any(|l| l.trim() == ".env");
        let has_state = existing.lines().any(|l| l.trim() == state_entry);
        if !has_env || !has_state {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&gitignore_path)?;
            writeln!(file, "\n# edgestack")?;
            if !has_env {
                writeln!(file, ".env")?;
            }
            if !has_state {
                writeln!(file, "{state_entry}")?;
            }
            eprintln!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, format!(".env\n{state_entry}\n"))?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    eprintln!("\nProject initialized successfully!");
    eprintln!("Next steps:");
    eprintln!("  1. Copy .env.example to .env and fill in the provider token");
    eprintln!("  2. Edit edgestack.yaml with your domain and bucket names");
    eprintln!("  3. Run 'edgestack validate' to check the stack file");
    eprintln!("  4. Run 'edgestack plan' to see what will be created");
    eprintln!("  5. Run 'edgestack apply' to converge");

    Ok(())
}

/// Validate the stack file and its resource graph.
fn cmd_validate(
    config_path: Option<&PathBuf>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let config_file = resolve_config_path(config_path)?;
    info!("Validating stack file: {}", config_file.display());

    let parser = ConfigParser::new().with_base_path(base_dir(&config_file));
    parser.load_dotenv()?;
    let config = parser.load_file(&config_file)?;

    let mut result = ConfigValidator::new().check(&config);
    if result.is_valid()
        && let Err(e) = ResourceGraph::build(&config.resources)
    {
        result.push_error("resources", e.to_string());
    }

    println!("{}", formatter.format_validation(&result, show_warnings));

    if !result.is_valid() {
        return Ok(ExitCode::from(2));
    }

    if !formatter.is_json() {
        eprintln!("Stack summary:");
        eprintln!("  Stack: {}", config.full_name());
        eprintln!("  Resources: {}", config.resources.len());
        eprintln!("  Outputs: {}", config.outputs.len());
    }

    Ok(ExitCode::SUCCESS)
}

/// Show what apply would change.
async fn cmd_plan(
    config_path: Option<&PathBuf>,
    detailed: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let (config, state_store) = load_config_and_state(config_path).await?;

    let reconciler = Reconciler::read_only(&config, &state_store);
    let plan = reconciler.plan().await?;

    println!("{}", formatter.format_plan(&plan, detailed));
    Ok(ExitCode::SUCCESS)
}

/// Converge remote resources to the stack file.
async fn cmd_apply(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let (config, state_store) = load_config_and_state(config_path).await?;
    let provider = build_provider(&config.provider)?;

    let reconciler = Reconciler::new(&config, &state_store, provider.as_ref())
        .with_cancel_flag(cancel_on_ctrl_c());

    let result = reconciler
        .apply(|plan| approve_plan(plan, auto_approve, formatter, "apply"))
        .await?;

    Ok(report_result(&result, formatter))
}

/// Delete every recorded resource.
async fn cmd_destroy(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let (config, state_store) = load_config_and_state(config_path).await?;
    let provider = build_provider(&config.provider)?;

    let reconciler = Reconciler::new(&config, &state_store, provider.as_ref())
        .with_cancel_flag(cancel_on_ctrl_c());

    let result = reconciler
        .destroy(|plan| approve_plan(plan, auto_approve, formatter, "destroy"))
        .await?;

    Ok(report_result(&result, formatter))
}

/// Print resources in dependency order.
fn cmd_graph(config_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<ExitCode> {
    let config_file = resolve_config_path(config_path)?;
    let parser = ConfigParser::new().with_base_path(base_dir(&config_file));
    parser.load_dotenv()?;
    let config = parser.load_with_env(&config_file)?;
    ConfigValidator::new().validate(&config)?;

    let graph = ResourceGraph::build(&config.resources)?;
    println!("{}", formatter.format_graph(&graph));
    Ok(ExitCode::SUCCESS)
}

/// Check for drift.
async fn cmd_drift(config_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<ExitCode> {
    let (config, state_store) = load_config_and_state(config_path).await?;
    let provider = build_provider(&config.provider)?;

    let reconciler = Reconciler::new(&config, &state_store, provider.as_ref());
    let report = reconciler.check_drift().await?;

    println!("{}", formatter.format_drift(&report));
    Ok(ExitCode::SUCCESS)
}

/// Show stack outputs.
async fn cmd_output(config_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<ExitCode> {
    let (config, state_store) = load_config_and_state(config_path).await?;

    let reconciler = Reconciler::read_only(&config, &state_store);
    let outputs = reconciler.outputs().await?;

    println!("{}", formatter.format_outputs(&outputs));
    Ok(ExitCode::SUCCESS)
}

/// State management commands.
async fn cmd_state(
    config_path: Option<&PathBuf>,
    command: StateCommands,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let (_config, state_store) = load_config_and_state(config_path).await?;

    match command {
        StateCommands::Show => {
            let snapshot = state_store.load().await?;
            if snapshot.is_empty() && snapshot.history.is_empty() && !formatter.is_json() {
                eprintln!("No state found.");
            } else {
                println!("{}", formatter.format_state(&snapshot));
            }
        }
        StateCommands::Unlock { lock_id, force } => {
            if force {
                if let Some(lock_info) = state_store.get_lock_info().await? {
                    state_store.release_lock(&lock_info.lock_id).await?;
                    eprintln!(
                        "{}",
                        formatter.warning(&format!(
                            "State forcefully unlocked (was held by {})",
                            lock_info.holder
                        ))
                    );
                } else {
                    eprintln!("State is not locked.");
                }
            } else if let Some(id) = lock_id {
                state_store.release_lock(&id).await?;
                eprintln!("{}", formatter.success("State unlocked."));
            } else {
                eprintln!("Please provide --lock-id or use --force");
                return Ok(ExitCode::from(2));
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Shows the plan and asks for confirmation unless pre-approved.
fn approve_plan(plan: &Plan, auto_approve: bool, formatter: &OutputFormatter, verb: &str) -> bool {
    if formatter.is_json() {
        return auto_approve;
    }

    eprintln!("{}", formatter.format_plan(plan, false));
    if auto_approve {
        return true;
    }

    eprint!("Do you want to {verb} this plan? [y/N]: ");
    if std::io::stderr().flush().is_err() {
        return false;
    }

    let mut input = String::new();
    if std::io::stdin().read_line(&mut input).is_err() {
        return false;
    }

    let approved = input.trim().eq_ignore_ascii_case("y");
    if !approved {
        eprintln!("{} cancelled.", capitalize(verb));
    }
    approved
}

/// Prints a reconciliation result and picks the exit code.
fn report_result(result: &ReconciliationResult, formatter: &OutputFormatter) -> ExitCode {
    println!("{}", formatter.format_reconciliation(result));
    if result.success || !result.approved {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Spawns a task that raises the cancel flag on Ctrl-C.
fn cancel_on_ctrl_c() -> CancelFlag {
    let cancel = CancelFlag::new();
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current action");
            flag.cancel();
        }
    });
    cancel
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    chars
        .next()
        .map(|c| c.to_uppercase().chain(chars).collect())
        .unwrap_or_default()
}

fn base_dir(config_file: &Path) -> &Path {
    config_file.parent().unwrap_or_else(|| Path::new("."))
}

/// Resolves the stack file path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

/// Loads the stack file and creates the configured state store.
async fn load_config_and_state(
    config_path: Option<&PathBuf>,
) -> Result<(StackConfig, Box<dyn StateStore>)> {
    let config_file = resolve_config_path(config_path)?;
    debug!("Loading stack file from: {}", config_file.display());

    let parser = ConfigParser::new().with_base_path(base_dir(&config_file));
    parser.load_dotenv()?;

    let config = parser.load_with_env(&config_file)?;
    ConfigValidator::new().validate(&config)?;

    let state_store: Box<dyn StateStore> = match config.state.backend {
        StateBackend::Local => Box::new(LocalStateStore::for_stack(
            base_dir(&config_file),
            config.state.path.as_deref(),
        )),
        StateBackend::S3 => {
            let bucket = config
                .state
                .bucket
                .as_deref()
                .ok_or_else(|| StackError::internal("S3 bucket not configured"))?;
            let prefix = config.state.prefix.as_deref();
            let region = config.state.region.as_deref();
            Box::new(S3StateStore::new(bucket, prefix, region).await?)
        }
    };
    debug!("Using {} state backend", state_store.backend_type());

    Ok((config, state_store))
}

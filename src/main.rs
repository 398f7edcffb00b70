//! terragraph CLI entrypoint.
//!
//! This is the main entrypoint for the terragraph command-line tool.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use serde_json::Value;
use terragraph::cli::{Cli, Commands, OutputFormat, OutputFormatter, StateCommands};
use terragraph::config::{ConfigParser, ConfigValidator, Document, find_config_file, parse_var};
use terragraph::error::{ConfigError, Result};
use terragraph::graph::Node;
use terragraph::orchestrator::Orchestrator;
use terragraph::provider::ProviderSet;
use terragraph::state::{LocalStateStore, StateStore};

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Environment variable selecting the log format.
const LOG_FORMAT_ENV: &str = "TERRAGRAPH_LOG_FORMAT";

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
///
/// Logs go to stderr so that command output on stdout stays parseable.
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let json = std::env::var(LOG_FORMAT_ENV).is_ok_and(|v| v.eq_ignore_ascii_case("json"));
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
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);

    match &cli.command {
        Commands::Validate { warnings } => cmd_validate(&cli, *warnings, &formatter),
        Commands::Graph { dot } => cmd_graph(&cli, *dot, &formatter).await,
        Commands::Plan { detailed } => cmd_plan(&cli, *detailed, &formatter).await,
        Commands::Apply { yes } => cmd_apply(&cli, *yes, &formatter).await,
        Commands::State { command } => cmd_state(&cli, command, &formatter).await,
    }
}

/// Validate configuration.
fn cmd_validate(cli: &Cli, show_warnings: bool, formatter: &OutputFormatter) -> Result<()> {
    let workspace = Workspace::load(cli)?;
    info!("Validating configuration: {}", workspace.config_file.display());

    let validator = ConfigValidator::new().with_supplied(workspace.variables.keys().cloned());
    let result = validator.check(&workspace.document);
    println!("{}", formatter.format_validation(&result, show_warnings));

    if !result.is_valid() {
        let message = format!("{} errors found", result.error_count());
        return Err(ConfigError::validation_general(message).into());
    }

    // Module sources and the graph itself are checked too.
    let graph = terragraph::graph::Graph::build(workspace.nodes()?)?;
    debug!("Configuration builds a graph of {} nodes", graph.len());
    Ok(())
}

/// Print the dependency graph.
async fn cmd_graph(cli: &Cli, dot: bool, formatter: &OutputFormatter) -> Result<()> {
    let workspace = Workspace::load(cli)?;
    workspace.validate()?;
    let orchestrator = workspace.orchestrator(cli, CancellationToken::new());
    let graph = orchestrator.graph(workspace.nodes()?).await?;

    if dot {
        print!("{}", graph.to_dot());
    } else {
        println!("{}", formatter.format_graph(&graph));
    }
    Ok(())
}

/// Show the change plan.
async fn cmd_plan(cli: &Cli, detailed: bool, formatter: &OutputFormatter) -> Result<()> {
    let workspace = Workspace::load(cli)?;
    workspace.validate()?;

    let cancel = cancel_on_ctrl_c();
    let plan = workspace.orchestrator(cli, cancel).plan(workspace.nodes()?).await?;
    println!("{}", formatter.format_plan(&plan, detailed));
    Ok(())
}

/// Apply the change plan.
async fn cmd_apply(cli: &Cli, auto_approve: bool, formatter: &OutputFormatter) -> Result<()> {
    let workspace = Workspace::load(cli)?;
    workspace.validate()?;

    let cancel = cancel_on_ctrl_c();
    let orchestrator = workspace.orchestrator(cli, cancel);
    let plan = orchestrator.plan(workspace.nodes()?).await?;

    if plan.is_empty() {
        println!("{}", formatter.success("No changes to apply."));
        return Ok(());
    }

    // Confirm
    if !auto_approve {
        if formatter.format() == OutputFormat::Json {
            let message = "--yes is required with --output json";
            return Err(ConfigError::validation_general(message).into());
        }
        println!("{}", formatter.format_plan(&plan, false));
        eprint!("Do you want to apply this plan? [y/N]: ");
        std::io::stderr().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            eprintln!("Apply cancelled.");
            return Ok(());
        }
    }

    let report = orchestrator.apply(workspace.nodes()?).await?;
    println!("{}", formatter.format_apply(&report));
    report.into_result().map(|_| ())
}

/// State inspection commands.
async fn cmd_state(cli: &Cli, command: &StateCommands, formatter: &OutputFormatter) -> Result<()> {
    let store = match &cli.state {
        Some(path) => state_store(Some(path), Path::new(".")),
        None => state_store(None, &resolve_config_path(cli.config.as_ref())?),
    };

    match command {
        StateCommands::List => {
            let mut records = Vec::new();
            for name in store.list().await? {
                if let Some(record) = store.load(&name).await? {
                    records.push((name, record));
                }
            }
            println!("{}", formatter.format_state_list(&records));
        }
        StateCommands::Show { name } => match store.load(name).await? {
            Some(record) => println!("{}", formatter.format_resource(name, &record)),
            None => eprintln!("{}", formatter.warning(&format!("No state recorded for {name}"))),
        },
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// A loaded configuration with its variable values.
struct Workspace {
    config_file: PathBuf,
    parser: ConfigParser,
    document: Document,
    variables: HashMap<String, Value>,
}

impl Workspace {
    /// Loads `.env`, the configuration document and variable values.
    fn load(cli: &Cli) -> Result<Self> {
        let config_file = resolve_config_path(cli.config.as_ref())?;
        debug!("Loading configuration from: {}", config_file.display());

        let parser = ConfigParser::new().with_base_path(config_dir(&config_file));
        parser.load_dotenv()?;
        let document = parser.load_file(&config_file)?;

        // Flags win over the environment.
        let mut variables = ConfigParser::variables_from_env();
        for assignment in &cli.vars {
            let (name, value) = parse_var(assignment)?;
            variables.insert(name, value);
        }

        Ok(Self {
            config_file,
            parser,
            document,
            variables,
        })
    }

    fn validate(&self) -> Result<()> {
        let result = ConfigValidator::new()
            .with_supplied(self.variables.keys().cloned())
            .validate(&self.document)?;
        for warning in &result.warnings {
            warn!("{warning}");
        }
        Ok(())
    }

    fn nodes(&self) -> Result<Vec<Node>> {
        self.parser.to_nodes(&self.document)
    }

    fn orchestrator(&self, cli: &Cli, cancel: CancellationToken) -> Orchestrator {
        let state = state_store(cli.state.as_ref(), &self.config_file);
        Orchestrator::new(ProviderSet::with_builtins(), state)
            .with_parallelism(cli.parallelism)
            .with_fail_fast(cli.fail_fast)
            .with_variables(self.variables.clone())
            .with_cancellation(cancel)
    }
}

/// Resolves the configuration file path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

fn config_dir(config_file: &Path) -> PathBuf {
    config_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// Opens the state file given by `--state`, or `.terragraph/` next to the configuration.
fn state_store(state: Option<&PathBuf>, config_file: &Path) -> Arc<dyn StateStore> {
    match state {
        Some(path) => Arc::new(LocalStateStore::with_state_path(path)),
        None => {
            let base_dir = config_dir(config_file).join(".terragraph");
            Arc::new(LocalStateStore::with_base_dir(base_dir))
        }
    }
}

/// Returns a token that is canceled on the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, waiting for running operations to stop");
            trigger.cancel();
        }
    });
    cancel
}

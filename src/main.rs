//! Converge CLI entrypoint.
//!
//! This is the main entrypoint for the converge command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use converge::cli::{Cli, Commands, OutputFormatter, StateCommands};
use converge::config::{find_config_file, ConfigParser, ConfigValidator, Manifest};
use converge::error::{ConfigError, ConvergeError, Result};
use converge::graph::GraphBuilder;
use converge::model::ResourceId;
use converge::provider::{LocalProvider, ProviderRegistry, DEFAULT_PROVIDER_ROOT};
use converge::reconciler::Reconciler;
use converge::state::{open_store, StateStore};

use clap::Parser;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Environment variable overriding the log filter.
const LOG_ENV: &str = "CONVERGE_LOG";

const MANIFEST_TEMPLATE: &str = r#"project:
  name: my-project
  environment: dev

state:
  backend: local

engine:
  concurrency: 4

resources:
  - kind: Bucket
    name: artifacts
    attributes:
      name: my-project-artifacts
      location: EU

  - kind: Service
    name: api
    attributes:
      image: registry.example.com/api:latest
      bucket: "${Bucket.artifacts.name}"
      bucket_id: "${Bucket.artifacts.id}"
"#;

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
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
fn init_logging(verbose: bool, json: bool) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("warn")
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
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);
    let config = cli.config.as_ref();

    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force),
        Commands::Validate { warnings } => cmd_validate(config, warnings, &formatter),
        Commands::Plan { detailed } => cmd_plan(config, detailed, &formatter).await,
        Commands::Apply { yes, concurrency } => {
            cmd_apply(config, yes, concurrency, &formatter).await
        }
        Commands::Destroy { yes } => cmd_destroy(config, yes, &formatter).await,
        Commands::Graph => cmd_graph(config, &formatter),
        Commands::Drift => cmd_drift(config, &formatter).await,
        Commands::State { command } => cmd_state(config, command, &formatter).await,
    }
}

/// Initialize a new project.
fn cmd_init(path: &Path, force: bool) -> Result<()> {
    info!("Initializing new project in: {}", path.display());

    let manifest_path = path.join("converge.yaml");
    let gitignore_path = path.join(".gitignore");

    if !force && manifest_path.exists() {
        eprintln!("Manifest already exists: {}", manifest_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(());
    }

    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    std::fs::write(&manifest_path, MANIFEST_TEMPLATE)?;
    eprintln!("Created: {}", manifest_path.display());

    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        if !existing.contains(".converge") {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&gitignore_path)?;
            writeln!(file, "\n# Converge state\n.converge/\n.env")?;
            eprintln!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, ".converge/\n.env\n")?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    eprintln!("\nProject initialized.");
    eprintln!("Next steps:");
    eprintln!("  1. Edit converge.yaml to declare your resources");
    eprintln!("  2. Run 'converge validate' to check the manifest");
    eprintln!("  3. Run 'converge plan' to see what will change");
    eprintln!("  4. Run 'converge apply' to converge");

    Ok(())
}

/// Validate the manifest and its graph.
fn cmd_validate(
    config_path: Option<&PathBuf>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (manifest, _) = load_manifest(config_path)?;

    let validator = ConfigValidator::new();
    let result = validator.check(&manifest);
    println!("{}", formatter.format_validation(&result, show_warnings));
    validator.validate(&manifest)?;

    let graph = GraphBuilder::new().build(&manifest.resources)?;
    eprintln!(
        "Project {}/{}: {} resources, {} present",
        manifest.project.name,
        manifest.project.environment,
        graph.len(),
        manifest.present_count()
    );
    Ok(())
}

/// Show the change set.
async fn cmd_plan(
    config_path: Option<&PathBuf>,
    detailed: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (manifest, dir) = load_project(config_path)?;
    let reconciler = build_reconciler(&manifest, &dir, None);

    let changeset = reconciler.plan(&manifest).await?;
    println!("{}", formatter.format_plan(&changeset, detailed));
    Ok(())
}

/// Plan and apply.
async fn cmd_apply(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    concurrency: Option<usize>,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (manifest, dir) = load_project(config_path)?;
    let reconciler = build_reconciler(&manifest, &dir, concurrency)
        .with_cancellation(cancellation_signal());

    let changeset = reconciler.plan(&manifest).await?;
    if changeset.is_converged() {
        eprintln!("No changes to apply.");
        return Ok(());
    }

    println!("{}", formatter.format_plan(&changeset, false));

    if !auto_approve && !confirm("Do you want to apply these changes? [y/N]: ", "y")? {
        eprintln!("Apply cancelled.");
        return Ok(());
    }

    let result = reconciler.apply(&changeset).await;
    println!("{}", formatter.format_execution(&result));
    result.into_result()?;
    Ok(())
}

/// Delete every recorded resource.
async fn cmd_destroy(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (manifest, dir) = load_project(config_path)?;
    let reconciler =
        build_reconciler(&manifest, &dir, None).with_cancellation(cancellation_signal());

    let changeset = reconciler.plan_destroy().await?;
    if changeset.is_converged() {
        eprintln!("No resources to destroy.");
        return Ok(());
    }

    println!("{}", formatter.format_plan(&changeset, false));

    if !auto_approve
        && !confirm(
            "\nThis action is IRREVERSIBLE. Type 'destroy' to confirm: ",
            "destroy",
        )?
    {
        eprintln!("Destruction cancelled.");
        return Ok(());
    }

    let result = reconciler.apply(&changeset).await;
    println!("{}", formatter.format_execution(&result));
    result.into_result()?;
    Ok(())
}

/// Show the dependency graph.
fn cmd_graph(config_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<()> {
    let (manifest, _) = load_project(config_path)?;
    let graph = GraphBuilder::new().build(&manifest.resources)?;
    println!("{}", formatter.format_graph(&graph));
    Ok(())
}

/// Report pending changes.
async fn cmd_drift(config_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<()> {
    let (manifest, dir) = load_project(config_path)?;
    let reconciler = build_reconciler(&manifest, &dir, None);

    let report = reconciler.check_drift(&manifest).await?;
    println!("{}", formatter.format_drift(&report));
    Ok(())
}

/// State management commands.
async fn cmd_state(
    config_path: Option<&PathBuf>,
    command: StateCommands,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (manifest, dir) = load_project(config_path)?;
    let store = open_store(&manifest.state, &dir);

    match command {
        StateCommands::Show { resource } => {
            let id = parse_resource(&resource)?;
            match store.get(&id).await? {
                Some(record) => println!("{}", formatter.format_record(&record)),
                None => eprintln!("{id} is not recorded."),
            }
        }
        StateCommands::List => {
            let records = store.list_all().await?;
            println!("{}", formatter.format_records(&records));
        }
        StateCommands::Rm { resource, yes } => {
            let id = parse_resource(&resource)?;
            forget(store.as_ref(), &id, yes).await?;
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Removes a record without touching the resource it describes.
async fn forget(store: &dyn StateStore, id: &ResourceId, auto_approve: bool) -> Result<()> {
    let Some(record) = store.get(id).await? else {
        eprintln!("{id} is not recorded.");
        return Ok(());
    };
    let revision = record
        .revision
        .ok_or_else(|| ConvergeError::internal(format!("record {id} has no revision")))?;

    if !auto_approve
        && !confirm(
            &format!("Forget {id} ({})? The resource itself is kept. [y/N]: ", record.provider_id),
            "y",
        )?
    {
        eprintln!("Cancelled.");
        return Ok(());
    }

    store.delete(id, &revision).await?;
    eprintln!("Removed {id} from state.");
    Ok(())
}

/// Asks for confirmation on stderr; true if the answer matches `expected`.
fn confirm(prompt: &str, expected: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case(expected))
}

/// Returns a receiver that flips to true on Ctrl-C.
fn cancellation_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight changes");
            let _ = tx.send(true);
        }
    });
    rx
}

fn parse_resource(resource: &str) -> Result<ResourceId> {
    resource
        .parse()
        .map_err(|e: String| ConvergeError::Config(ConfigError::validation(e, "resource")))
}

/// Resolves the manifest path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

/// Loads the manifest with `.env` and environment overrides applied.
fn load_manifest(config_path: Option<&PathBuf>) -> Result<(Manifest, PathBuf)> {
    let config_file = resolve_config_path(config_path)?;
    debug!("Loading manifest from: {}", config_file.display());

    let project_dir = config_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

    let parser = ConfigParser::new().with_base_path(&project_dir);
    parser.load_dotenv()?;
    let manifest = parser.load_with_env(&config_file)?;

    Ok((manifest, project_dir))
}

/// Loads and validates the manifest.
fn load_project(config_path: Option<&PathBuf>) -> Result<(Manifest, PathBuf)> {
    let (manifest, project_dir) = load_manifest(config_path)?;
    ConfigValidator::new().validate(&manifest)?;
    Ok((manifest, project_dir))
}

/// Wires the state store and provider named by the manifest.
fn build_reconciler(
    manifest: &Manifest,
    project_dir: &Path,
    concurrency: Option<usize>,
) -> Reconciler {
    let store = open_store(&manifest.state, project_dir);

    let root = manifest
        .provider
        .root
        .as_deref()
        .unwrap_or(DEFAULT_PROVIDER_ROOT);
    let provider = ProviderRegistry::new()
        .with_fallback(Arc::new(LocalProvider::new(project_dir.join(root))));

    let concurrency = concurrency.unwrap_or(manifest.engine.concurrency).max(1);
    debug!(
        "Using {} state backend with concurrency {concurrency}",
        store.backend_type()
    );

    Reconciler::new(store, Arc::new(provider)).with_concurrency(concurrency)
}

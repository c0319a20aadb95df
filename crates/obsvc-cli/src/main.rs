//! obsvc - source services and kiwi image configuration from the command line
//!
//! ## Commands
//!
//! - `service`: show a package's service document, run it, or add `kiwi_import`
//! - `binaries`: look up and search the binaries a repository provides
//! - `image`: edit the image build configuration owned by a package

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, Level};

use obsvc_core::{
    index_for, AvailableBinaries, BackendClient, BackendConfig, BinaryIndex, ExecutionOutcome,
    HttpBackendClient, ImageBuildConfig, ImageConfigStore, ImageEditor, ListingMode, PackageKey,
    RepositoryKey, ServiceDocument, ServiceOrchestrator, SurrealImageStore,
};

#[derive(Parser)]
#[command(name = "obsvc")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Source service execution and kiwi image configuration", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Source backend base URL
    #[arg(long, global = true, env = "OBSVC_SOURCE_URL")]
    source_url: Option<String>,

    /// Binary listing endpoint (`path` or `command`)
    #[arg(long, global = true, env = "OBSVC_LISTING_MODE")]
    listing_mode: Option<ListingMode>,

    /// Identity recorded on run and merge
    #[arg(long, global = true, env = "OBSVC_USER")]
    user: Option<String>,

    /// Image configuration database URL (default: local `.obsvc/db`)
    #[arg(long, global = true)]
    db: Option<String>,

    /// Output format for command results
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Source service operations
    Service {
        #[command(subcommand)]
        action: ServiceAction,
    },

    /// Available-binaries index
    Binaries {
        #[command(subcommand)]
        action: BinariesAction,
    },

    /// Kiwi image build configuration
    Image {
        #[command(subcommand)]
        action: ImageAction,
    },
}

#[derive(Subcommand)]
enum ServiceAction {
    /// Run the package's service document (or a local one) through run, merge and wait
    Run {
        project: String,
        package: String,

        /// Local `_service` file to send instead of the package's own
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Append `kiwi_import` to the package's services and run them
    KiwiImport { project: String, package: String },

    /// Print the package's service document
    Show { project: String, package: String },
}

#[derive(Subcommand)]
enum BinariesAction {
    /// List binaries of a repository
    Lookup {
        project: String,
        repository: String,

        /// Architecture (default: the first configured one)
        #[arg(short, long)]
        arch: Option<String>,
    },

    /// Binary names matching a query: exact name first, then prefixes
    Search {
        project: String,
        repository: String,
        query: String,

        #[arg(short, long)]
        arch: Option<String>,
    },
}

#[derive(Subcommand)]
enum ImageAction {
    /// Print the image configuration
    Show { project: String, package: String },

    /// Add a repository
    AddRepo {
        project: String,
        package: String,
        target_project: String,
        repository: String,
    },

    /// Set or reset (when omitted) a repository alias
    AliasRepo {
        project: String,
        package: String,
        target_project: String,
        repository: String,
        alias: Option<String>,
    },

    /// Remove a repository
    RmRepo {
        project: String,
        package: String,
        target_project: String,
        repository: String,
    },

    /// Add a package resolved from the image repositories
    AddPackage {
        project: String,
        package: String,
        name: String,

        /// Restrict the package to one architecture
        #[arg(short, long)]
        arch: Option<String>,

        /// Require an exact binary name instead of expanding the query
        #[arg(long)]
        exact: bool,
    },

    /// Restrict a package to one architecture, or clear the restriction
    SetArch {
        project: String,
        package: String,
        name: String,
        arch: Option<String>,
    },

    /// Remove a package
    RmPackage {
        project: String,
        package: String,
        name: String,
    },

    /// Set or clear the image author
    SetAuthor {
        project: String,
        package: String,
        author: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    obsvc_core::telemetry::init_tracing(cli.json, level);

    let config = backend_config(&cli);
    let client: Arc<dyn BackendClient> =
        Arc::new(HttpBackendClient::new(&config).context("Failed to create backend client")?);
    let output = cli.output;

    match cli.command {
        Commands::Service { action } => {
            let orchestrator = ServiceOrchestrator::from_config(client, &config);
            let user = cli.user.as_deref();
            cmd_service(&orchestrator, action, user, output).await
        }
        Commands::Binaries { action } => {
            let index = index_for(&config, client);
            cmd_binaries(index.as_ref(), &config, action, output).await
        }
        Commands::Image { action } => {
            let store = open_store(cli.db.as_deref()).await?;
            let index = index_for(&config, client);
            cmd_image(store, index, &config, action, output).await
        }
    }
}

fn backend_config(cli: &Cli) -> BackendConfig {
    let mut config = BackendConfig::from_env();
    if let Some(url) = &cli.source_url {
        config.source_url = url.clone();
    }
    if let Some(mode) = cli.listing_mode {
        config = config.with_listing_mode(mode);
    }
    config
}

async fn open_store(db: Option<&str>) -> Result<Arc<dyn ImageConfigStore>> {
    let store = match db {
        Some(url) => SurrealImageStore::open(url).await,
        None => SurrealImageStore::from_env().await,
    }
    .context("Failed to open image configuration database")?;
    Ok(Arc::new(store))
}

// ---------------------------------------------------------------------------
// service
// ---------------------------------------------------------------------------

async fn cmd_service(
    orchestrator: &ServiceOrchestrator,
    action: ServiceAction,
    user: Option<&str>,
    output: OutputFormat,
) -> Result<()> {
    match action {
        ServiceAction::Show { project, package } => {
            let document = orchestrator
                .fetch_document(&project, &package)
                .await
                .with_context(|| format!("Failed to fetch services of {project}/{package}"))?;
            println!("{}", document.to_xml()?);
        }
        ServiceAction::Run {
            project,
            package,
            file,
        } => {
            let user = require_user(user)?;
            let document = match file {
                Some(path) => read_document(&path)?,
                None => orchestrator.fetch_document(&project, &package).await?,
            };
            let outcome = orchestrator
                .execute(&project, &package, user, &document)
                .await
                .with_context(|| format!("Service run failed for {project}/{package}"))?;
            println!("{}", render_outcome(&outcome, output)?);
        }
        ServiceAction::KiwiImport { project, package } => {
            let user = require_user(user)?;
            let outcome = orchestrator
                .add_kiwi_import(&project, &package, user)
                .await
                .with_context(|| format!("kiwi_import failed for {project}/{package}"))?;
            println!("{}", render_outcome(&outcome, output)?);
        }
    }
    Ok(())
}

fn require_user(user: Option<&str>) -> Result<&str> {
    match user.map(str::trim).filter(|u| !u.is_empty()) {
        Some(user) => Ok(user),
        None => bail!("--user (or OBSVC_USER) is required for service runs"),
    }
}

fn read_document(path: &Path) -> Result<ServiceDocument> {
    let xml = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    ServiceDocument::from_xml(&xml)
        .with_context(|| format!("Invalid service file {}", path.display()))
}

fn render_outcome(outcome: &ExecutionOutcome, output: OutputFormat) -> Result<String> {
    if output == OutputFormat::Json {
        return Ok(serde_json::to_string_pretty(outcome)?);
    }
    let mut lines = vec![format!(
        "run {} for {}/{} finished in {}ms",
        outcome.run_id, outcome.project, outcome.package, outcome.duration_ms
    )];
    for result in &outcome.results {
        lines.push(format!(
            "  {:<6} {} ({}ms)",
            result.stage, result.backend_status, result.duration_ms
        ));
    }
    Ok(lines.join("\n"))
}

// ---------------------------------------------------------------------------
// binaries
// ---------------------------------------------------------------------------

async fn cmd_binaries(
    index: &dyn BinaryIndex,
    config: &BackendConfig,
    action: BinariesAction,
    output: OutputFormat,
) -> Result<()> {
    match action {
        BinariesAction::Lookup {
            project,
            repository,
            arch,
        } => {
            let arch = arch_or_default(arch, config);
            let binaries = index
                .lookup(&project, &repository, &arch)
                .await
                .with_context(|| format!("Binary lookup failed for {project}/{repository}"))?;
            println!("{}", render_binaries(&binaries, output)?);
        }
        BinariesAction::Search {
            project,
            repository,
            query,
            arch,
        } => {
            let arch = arch_or_default(arch, config);
            let binaries = index
                .lookup(&project, &repository, &arch)
                .await
                .with_context(|| format!("Binary lookup failed for {project}/{repository}"))?;
            let names = binaries.matching(&query);
            if output == OutputFormat::Json {
                println!("{}", serde_json::to_string_pretty(&names)?);
            } else if names.is_empty() {
                println!("No binaries match '{query}'");
            } else {
                println!("{}", names.join("\n"));
            }
        }
    }
    Ok(())
}

fn arch_or_default(arch: Option<String>, config: &BackendConfig) -> String {
    arch.or_else(|| config.lookup_architectures.first().cloned())
        .unwrap_or_else(|| obsvc_core::config::DEFAULT_ARCHITECTURE.to_string())
}

fn render_binaries(binaries: &AvailableBinaries, output: OutputFormat) -> Result<String> {
    if output == OutputFormat::Json {
        return Ok(serde_json::to_string_pretty(binaries)?);
    }
    if binaries.is_empty() {
        return Ok("No binaries built yet".to_string());
    }
    let lines: Vec<String> = binaries
        .iter()
        .map(|(name, archs)| {
            let archs: Vec<&str> = archs.iter().map(String::as_str).collect();
            format!("{name} ({})", archs.join(", "))
        })
        .collect();
    Ok(lines.join("\n"))
}

// ---------------------------------------------------------------------------
// image
// ---------------------------------------------------------------------------

async fn cmd_image(
    store: Arc<dyn ImageConfigStore>,
    index: Arc<dyn BinaryIndex>,
    config: &BackendConfig,
    action: ImageAction,
    output: OutputFormat,
) -> Result<()> {
    let (project, package) = match &action {
        ImageAction::Show { project, package }
        | ImageAction::AddRepo {
            project, package, ..
        }
        | ImageAction::AliasRepo {
            project, package, ..
        }
        | ImageAction::RmRepo {
            project, package, ..
        }
        | ImageAction::AddPackage {
            project, package, ..
        }
        | ImageAction::SetArch {
            project, package, ..
        }
        | ImageAction::RmPackage {
            project, package, ..
        }
        | ImageAction::SetAuthor {
            project, package, ..
        } => (project.clone(), package.clone()),
    };
    let owner = PackageKey::new(project, package);
    let mut editor = ImageEditor::open(
        owner.clone(),
        store,
        index,
        config.lookup_architectures.clone(),
    )
    .await
    .with_context(|| format!("Failed to load image configuration of {owner}"))?;

    match action {
        ImageAction::Show { .. } => {
            println!("{}", render_config(editor.config(), output)?);
            return Ok(());
        }
        ImageAction::AddRepo {
            target_project,
            repository,
            ..
        } => {
            let added = editor.add_repository(&target_project, &repository)?;
            info!(repository = %added.default_alias(), "repository added");
        }
        ImageAction::AliasRepo {
            target_project,
            repository,
            alias,
            ..
        } => {
            let key = RepositoryKey::new(target_project, repository);
            editor.set_repository_alias(&key, alias.as_deref())?;
        }
        ImageAction::RmRepo {
            target_project,
            repository,
            ..
        } => {
            editor.remove_repository(&RepositoryKey::new(target_project, repository))?;
        }
        ImageAction::AddPackage {
            name, arch, exact, ..
        } => {
            let added = if exact {
                editor.add_package(&name, arch.as_deref()).await?
            } else {
                editor.add_package_matching(&name, arch.as_deref()).await?
            };
            println!("Added package {}", added.name);
        }
        ImageAction::SetArch { name, arch, .. } => {
            editor.set_package_architecture(&name, arch.as_deref())?;
        }
        ImageAction::RmPackage { name, .. } => {
            editor.remove_package(&name)?;
        }
        ImageAction::SetAuthor { author, .. } => {
            editor.set_author(author.as_deref());
        }
    }

    let revision = editor
        .save()
        .await
        .with_context(|| format!("Failed to save image configuration of {owner}"))?;
    println!("Saved {owner} at revision {revision}");
    Ok(())
}

fn render_config(config: &ImageBuildConfig, output: OutputFormat) -> Result<String> {
    if output == OutputFormat::Json {
        return Ok(serde_json::to_string_pretty(config)?);
    }

    let mut lines = Vec::new();
    let description = &config.description;
    for (label, value) in [
        ("Name", &description.name),
        ("Author", &description.author),
        ("Contact", &description.contact),
        ("Specification", &description.specification),
    ] {
        if let Some(value) = value {
            lines.push(format!("{label}: {value}"));
        }
    }

    lines.push("Repositories:".to_string());
    if config.repositories.is_empty() {
        lines.push("  (none)".to_string());
    }
    for repository in &config.repositories {
        lines.push(format!(
            "  {} [{}/{}]",
            repository.display_name(),
            repository.target_project,
            repository.repository_name
        ));
    }

    lines.push("Packages:".to_string());
    if config.packages.is_empty() {
        lines.push("  (none)".to_string());
    }
    for package in &config.packages {
        match package.display_architectures() {
            Some(archs) => lines.push(format!("  {} {archs}", package.name)),
            None => lines.push(format!("  {}", package.name)),
        }
    }
    Ok(lines.join("\n"))
}

//! CLI command definitions, routing, and tracing setup.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use larder_core::{
    BackoffPolicy, BatchReport, Enricher, Pacer, ProgressReporter, Selection, enrich_records,
    import_rows, select_records,
};
use larder_shared::{
    AppConfig, Category, EnrichmentConfig, ImportConfig, PacingConfig, init_config, load_config,
    load_config_from, parse_delimiter, resolve_db_path,
};
use larder_storage::Storage;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Larder: bulk-load, reconcile and enrich a recipe catalog.
#[derive(Parser)]
#[command(
    name = "larder",
    version,
    about = "Bulk-import catalog records from delimited files and complete them with generated content.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Catalog database path (overrides `storage.db_path`).
    #[arg(long, env = "LARDER_DB", global = true)]
    pub db: Option<PathBuf>,

    /// Config file to use instead of `~/.larder/larder.toml`.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Import records from a delimited file.
    Import {
        /// File to import.
        file: PathBuf,

        /// Field delimiter (overrides `import.delimiter`; `tab` for tabs).
        #[arg(short, long)]
        delimiter: Option<String>,

        /// Category for rows without one (overrides `import.default_category`).
        #[arg(long)]
        default_category: Option<String>,

        /// Enrich imported records that are still incomplete.
        #[arg(long)]
        enrich: bool,

        /// With --enrich, never call the generative service.
        #[arg(long, requires = "enrich")]
        offline: bool,
    },

    /// Fill in descriptions and steps for existing records.
    Enrich {
        /// Record id(s) to enrich.
        #[arg(long = "id", conflicts_with_all = ["all", "incomplete"])]
        ids: Vec<String>,

        /// Enrich every record.
        #[arg(long, conflicts_with = "incomplete")]
        all: bool,

        /// Enrich records that still need it (the default).
        #[arg(long)]
        incomplete: bool,

        /// Never call the generative service; synthesize offline.
        #[arg(long)]
        offline: bool,
    },

    /// List catalog records.
    List {
        /// Only records that still need enrichment.
        #[arg(long)]
        incomplete: bool,
    },

    /// Show one record by id or name.
    Show {
        /// Record id or exact (case-insensitive) name.
        record: String,
    },

    /// Delete a record.
    Delete {
        /// Record id.
        id: String,
    },

    /// Category management.
    Categories {
        #[command(subcommand)]
        action: CategoryAction,
    },

    /// Show recent import and enrichment runs.
    Jobs {
        /// Number of runs to show.
        #[arg(long, default_value = "10")]
        limit: u32,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Category subcommands.
#[derive(Subcommand)]
pub(crate) enum CategoryAction {
    /// List categories.
    List,
    /// Add a category.
    Add { name: String },
    /// Rename a category (by id or name).
    Rename { category: String, new_name: String },
    /// Delete an unused category (by id or name).
    Delete { category: String },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "larder=info",
        1 => "larder=debug",
        _ => "larder=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Resolved settings shared by every command.
struct Context {
    config: AppConfig,
    db_path: PathBuf,
}

impl Context {
    fn load(db: Option<PathBuf>, config_path: Option<&Path>) -> Result<Self> {
        let config = match config_path {
            Some(path) => load_config_from(path)?,
            None => load_config()?,
        };
        let db_path = match db {
            Some(path) => path,
            None => resolve_db_path(&config.storage.db_path)?,
        };
        Ok(Self { config, db_path })
    }

    async fn open(&self) -> Result<Storage> {
        Storage::open(&self.db_path)
            .await
            .wrap_err_with(|| format!("opening catalog at {}", self.db_path.display()))
    }

    async fn open_readonly(&self) -> Result<Storage> {
        Storage::open_readonly(&self.db_path)
            .await
            .wrap_err_with(|| format!("opening catalog at {}", self.db_path.display()))
    }
}

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    if let Command::Config { action } = &cli.command {
        return match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(cli.config.as_deref()),
        };
    }

    let ctx = Context::load(cli.db, cli.config.as_deref())?;
    match cli.command {
        Command::Import {
            file,
            delimiter,
            default_category,
            enrich,
            offline,
        } => {
            cmd_import(
                &ctx,
                &file,
                delimiter.as_deref(),
                default_category,
                enrich,
                offline,
            )
            .await
        }
        Command::Enrich {
            ids,
            all,
            incomplete: _,
            offline,
        } => {
            let selection = if !ids.is_empty() {
                Selection::Ids(ids)
            } else if all {
                Selection::All
            } else {
                Selection::Incomplete
            };
            cmd_enrich(&ctx, selection, offline).await
        }
        Command::List { incomplete } => cmd_list(&ctx, incomplete).await,
        Command::Show { record } => cmd_show(&ctx, &record).await,
        Command::Delete { id } => cmd_delete(&ctx, &id).await,
        Command::Categories { action } => cmd_categories(&ctx, action).await,
        Command::Jobs { limit } => cmd_jobs(&ctx, limit).await,
        Command::Config { .. } => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Batch commands
// ---------------------------------------------------------------------------

async fn cmd_import(
    ctx: &Context,
    file: &Path,
    delimiter: Option<&str>,
    default_category: Option<String>,
    enrich: bool,
    offline: bool,
) -> Result<()> {
    let mut import_config = ImportConfig::try_from(&ctx.config)?;
    if let Some(d) = delimiter {
        import_config.delimiter = parse_delimiter(d)?;
    }
    if let Some(category) = default_category {
        import_config.default_category = category;
    }

    let reader = std::fs::File::open(file)
        .wrap_err_with(|| format!("cannot open {}", file.display()))?;
    let storage = ctx.open().await?;
    let cancel = cancel_on_ctrl_c();

    info!(file = %file.display(), db = %ctx.db_path.display(), "importing");
    let reporter = CliProgress::new();
    let report = import_rows(reader, &import_config, &storage, &cancel, &reporter).await?;
    print_report("Import", &report);

    if enrich && !report.cancelled {
        let incomplete: HashSet<String> = select_records(&storage, &Selection::Incomplete)
            .await?
            .into_iter()
            .collect();
        let ids: Vec<String> = report
            .touched_ids
            .iter()
            .filter(|id| incomplete.contains(*id))
            .cloned()
            .collect();
        run_enrichment(ctx, &storage, &ids, offline, &cancel).await?;
    }

    Ok(())
}

async fn cmd_enrich(ctx: &Context, selection: Selection, offline: bool) -> Result<()> {
    let storage = ctx.open().await?;
    let ids = select_records(&storage, &selection).await?;
    let cancel = cancel_on_ctrl_c();
    run_enrichment(ctx, &storage, &ids, offline, &cancel).await
}

async fn run_enrichment(
    ctx: &Context,
    storage: &Storage,
    ids: &[String],
    offline: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    if ids.is_empty() {
        println!("Nothing to enrich.");
        return Ok(());
    }

    let enricher = build_enricher(&ctx.config, offline)?;
    if enricher.is_online() {
        let pacing = PacingConfig::from(&ctx.config);
        info!(
            items = ids.len(),
            interval_ms = pacing.item_interval.as_millis(),
            "enriching via generative service"
        );
    }

    let reporter = CliProgress::new();
    let report = enrich_records(ids, storage, &enricher, cancel, &reporter).await?;
    print_report("Enrichment", &report);
    Ok(())
}

fn build_enricher(config: &AppConfig, offline: bool) -> Result<Enricher> {
    let pacing = PacingConfig::from(config);
    let enrichment = if offline {
        EnrichmentConfig::offline()
    } else {
        EnrichmentConfig::from_app(config)
    };
    let pacer = Arc::new(Pacer::new(&pacing));
    Ok(Enricher::new(&enrichment, BackoffPolicy::from(&pacing))?.with_pacer(pacer))
}

/// Cancel the returned token on Ctrl-C. The current item finishes first.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current item");
            child.cancel();
        }
    });
    token
}

fn print_report(label: &str, report: &BatchReport) {
    println!();
    println!(
        "  {label} {}",
        if report.cancelled { "cancelled" } else { "finished" }
    );
    println!("  Created:   {}", report.created);
    println!("  Updated:   {}", report.updated);
    println!("  Failed:    {}", report.failed);
    println!("  Skipped:   {}", report.skipped);
    if report.fallbacks > 0 {
        println!("  Offline:   {}", report.fallbacks);
    }
    println!("  Time:      {:.1}s", report.elapsed.as_secs_f64());
    if let Some(job_id) = &report.job_id {
        println!("  Job:       {job_id}");
    }
    for failure in &report.failures {
        println!("    ✗ {}: {}", failure.item, failure.reason);
    }
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn item(&self, current: usize, total: usize, name: &str) {
        self.spinner
            .set_message(format!("[{current}/{total}] {name}"));
    }

    fn done(&self, _report: &BatchReport) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// Catalog commands
// ---------------------------------------------------------------------------

async fn cmd_list(ctx: &Context, incomplete: bool) -> Result<()> {
    let storage = ctx.open_readonly().await?;
    let summaries = storage.list_summaries().await?;

    let mut shown = 0;
    for s in summaries.iter().filter(|s| !incomplete || s.needs_enrichment) {
        let status = if s.needs_enrichment {
            "needs enrichment"
        } else {
            "complete"
        };
        println!(
            "{}  {:<32}  {:<20}  {status}",
            s.id,
            s.name,
            s.category.as_deref().unwrap_or("-"),
        );
        shown += 1;
    }
    println!("{shown} record(s)");
    Ok(())
}

async fn cmd_show(ctx: &Context, key: &str) -> Result<()> {
    let storage = ctx.open_readonly().await?;
    let record = match storage.get_record(key).await? {
        Some(record) => record,
        None => {
            let id = storage
                .find_record_id_by_name(key)
                .await?
                .ok_or_else(|| eyre!("no record with id or name '{key}'"))?;
            storage
                .get_record(&id)
                .await?
                .ok_or_else(|| eyre!("record {id} disappeared"))?
        }
    };
    let category = storage
        .list_categories()
        .await?
        .into_iter()
        .find(|c| c.id == record.category_id)
        .map(|c| c.name)
        .unwrap_or_else(|| "-".into());

    println!("{}", record.name);
    println!("  ID:          {}", record.id);
    println!("  Category:    {category}");
    println!(
        "  Description: {}",
        record.description.as_deref().unwrap_or("-")
    );
    if !record.media_url.is_empty() {
        println!("  Media:       {}", record.media_url);
    }
    if let Some(note) = &record.serving_note {
        println!("  Serving:     {note}");
    }
    println!("  Created:     {}", record.created_at.to_rfc3339());
    println!("  Ingredients:");
    for ingredient in &record.ingredients {
        println!("    - {ingredient}");
    }
    println!("  Tools:");
    for tool in &record.tools {
        println!("    - {tool}");
    }
    println!("  Steps:");
    for (i, step) in record.steps.iter().enumerate() {
        println!("    {}. {step}", i + 1);
    }
    if record.needs_enrichment() {
        println!("  (needs enrichment)");
    }
    Ok(())
}

async fn cmd_delete(ctx: &Context, id: &str) -> Result<()> {
    let storage = ctx.open().await?;
    storage.delete_record(id).await?;
    println!("Deleted record {id}");
    Ok(())
}

async fn cmd_categories(ctx: &Context, action: CategoryAction) -> Result<()> {
    match action {
        CategoryAction::List => {
            let storage = ctx.open_readonly().await?;
            let categories = storage.list_categories().await?;
            for c in &categories {
                println!("{}  {}", c.id, c.name);
            }
            println!("{} categor{}", categories.len(), if categories.len() == 1 { "y" } else { "ies" });
        }
        CategoryAction::Add { name } => {
            let storage = ctx.open().await?;
            let category = storage.insert_category(&name).await?;
            println!("Added category {} ({})", category.name, category.id);
        }
        CategoryAction::Rename { category, new_name } => {
            let storage = ctx.open().await?;
            let existing = find_category(&storage, &category).await?;
            storage.rename_category(&existing.id, &new_name).await?;
            println!("Renamed {} to {new_name}", existing.name);
        }
        CategoryAction::Delete { category } => {
            let storage = ctx.open().await?;
            let existing = find_category(&storage, &category).await?;
            storage.delete_category(&existing.id).await?;
            println!("Deleted category {}", existing.name);
        }
    }
    Ok(())
}

/// Find a category by name, falling back to id.
async fn find_category(storage: &Storage, key: &str) -> Result<Category> {
    if let Some(category) = storage.find_category_by_name(key).await? {
        return Ok(category);
    }
    storage
        .list_categories()
        .await?
        .into_iter()
        .find(|c| c.id == key)
        .ok_or_else(|| eyre!("no category with name or id '{key}'"))
}

async fn cmd_jobs(ctx: &Context, limit: u32) -> Result<()> {
    let storage = ctx.open_readonly().await?;
    let jobs = storage.list_batch_jobs(limit).await?;
    if jobs.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }
    for job in jobs {
        println!(
            "{}  {:<7}  {}  {}",
            job.id,
            job.kind,
            job.started_at,
            job.stats_json.as_deref().unwrap_or("(unfinished)")
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Config commands
// ---------------------------------------------------------------------------

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config: AppConfig = match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    };
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn enrich_flags_parse() {
        let cli = Cli::try_parse_from(["larder", "enrich", "--id", "a", "--id", "b"]).unwrap();
        match cli.command {
            Command::Enrich { ids, all, .. } => {
                assert_eq!(ids, vec!["a", "b"]);
                assert!(!all);
            }
            _ => panic!("expected enrich"),
        }
        assert!(Cli::try_parse_from(["larder", "enrich", "--id", "a", "--all"]).is_err());
    }

    #[test]
    fn import_offline_requires_enrich() {
        assert!(Cli::try_parse_from(["larder", "import", "f.csv", "--offline"]).is_err());
        let cli = Cli::try_parse_from([
            "larder", "-vv", "import", "f.csv", "--enrich", "--offline", "-d", "tab",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(
            cli.command,
            Command::Import { enrich: true, offline: true, .. }
        ));
    }
}

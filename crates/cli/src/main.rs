//! usermigrate command-line tool.
//!
//! Runs the user migration (import phase, registration phase, or both) and
//! provides helpers for writing, checking, and previewing a configuration.

mod render;
mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgGroup, Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use usermigrate_core::config::AppConfig;
use usermigrate_core::coordinator::{Coordinator, RunMode, RunOptions};
use usermigrate_core::errors::RunError;
use usermigrate_core::identity::{FusionAuthClient, IdentityService};
use usermigrate_core::mapping::{FieldMapper, RoleResolver};
use usermigrate_core::source::{SourceStore, SqliteSourceStore};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Migrate legacy user records into an identity service.
#[derive(Parser, Debug)]
#[command(
    name = "usermigrate",
    version,
    about = "Import legacy users into FusionAuth and register them with applications"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true, default_value = "./usermigrate.toml")]
    config: PathBuf,

    /// Log filter, overriding `run.log_level` (e.g. "debug", "usermigrate_core=trace").
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(flatten)]
    run: RunArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Perform every lookup but create nothing.
    #[arg(long)]
    dry_run: bool,

    /// Run only the import phase.
    #[arg(long)]
    import_only: bool,

    /// Run only the registration phase.
    #[arg(long)]
    register_only: bool,

    /// Import log file: written after an import phase, read by --register-only.
    #[arg(long)]
    import_log: Option<PathBuf>,

    /// Print the report as JSON instead of tables.
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./usermigrate.toml")]
        output: PathBuf,
    },

    /// Validate the configuration and probe the source and identity service.
    Check,

    /// Show the payload one source record would be imported with.
    #[command(group(ArgGroup::new("target").required(true).args(["email", "id"])))]
    Preview {
        /// Look the record up by email.
        #[arg(long)]
        email: Option<String>,

        /// Look the record up by primary key.
        #[arg(long)]
        id: Option<i64>,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", style::error(&format!("{:#}", e)));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Some(Commands::Init { ref output }) => {
            let _guard = init_tracing(cli.log_level.as_deref().unwrap_or("warn"), None)?;
            cmd_init(output)
        }
        Some(Commands::Check) => {
            let config = load_config_lenient(&cli.config)?;
            let _guard = init_tracing(log_level(&cli, &config), config.run.log_file.as_deref())?;
            cmd_check(&config).await
        }
        Some(Commands::Preview { ref email, id }) => {
            let config = load_config_lenient(&cli.config)?;
            let _guard = init_tracing(log_level(&cli, &config), config.run.log_file.as_deref())?;
            cmd_preview(&config, email.as_deref(), id)
        }
        None => {
            // Reject contradictory flags before touching anything external.
            let mode = RunMode::from_flags(cli.run.import_only, cli.run.register_only)?;
            let config = load_config(&cli.config)?;
            let _guard = init_tracing(log_level(&cli, &config), config.run.log_file.as_deref())?;
            cmd_migrate(&config, mode, &cli.run).await
        }
    }
}

fn log_level<'a>(cli: &'a Cli, config: &'a AppConfig) -> &'a str {
    cli.log_level.as_deref().unwrap_or(&config.run.log_level)
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Install the stderr layer and, when a log file is configured, a
/// non-blocking file layer. The returned guard flushes the file on drop.
fn init_tracing(level: &str, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    let mut guard = None;
    let file_layer = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .with_context(|| format!("log file has no file name: {}", path.display()))?;
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory: {}", dir.display()))?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, file_guard) = tracing_appender::non_blocking(appender);
            guard = Some(file_guard);
            Some(fmt::layer().with_writer(writer).with_ansi(false))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(file_layer)
        .init();

    Ok(guard)
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn load_config(path: &Path) -> Result<AppConfig> {
    let mut config =
        AppConfig::load_from_file(path).context("failed to load configuration file")?;
    config
        .resolve_env_vars()
        .context("failed to resolve environment variables")?;
    config
        .validate()
        .context("configuration validation failed")?;
    Ok(config)
}

/// Like [`load_config`], but a missing API key is tolerated so that the
/// offline helpers still work.
fn load_config_lenient(path: &Path) -> Result<AppConfig> {
    let mut config =
        AppConfig::load_from_file(path).context("failed to load configuration file")?;
    let _ = config.resolve_env_vars();
    config
        .validate()
        .context("configuration validation failed")?;
    Ok(config)
}

fn open_source(config: &AppConfig) -> Result<SqliteSourceStore, RunError> {
    SqliteSourceStore::open(&config.source.path, &config.source, &config.mapping.email_field)
        .map_err(RunError::SourceUnavailable)
}

fn build_mapper(config: &AppConfig) -> Result<FieldMapper> {
    let roles = RoleResolver::new(&config.roles).context("invalid role table")?;
    Ok(FieldMapper::new(
        config.mapping.clone(),
        roles,
        config.identity.primary_application().map(str::to_string),
    ))
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

async fn cmd_migrate(config: &AppConfig, mode: RunMode, args: &RunArgs) -> Result<()> {
    info!(
        source = %config.source.path.display(),
        identity = %config.identity.base_url,
        tenant = %config.identity.tenant_id,
        "usermigrate v{}",
        env!("CARGO_PKG_VERSION")
    );
    let source = open_source(config)?;
    let identity = FusionAuthClient::new(&config.identity)
        .map_err(RunError::IdentityUnavailable)
        .context("failed to create identity service client")?;
    let coordinator =
        Coordinator::new(config, &source, &identity).context("invalid role table")?;

    let options = RunOptions {
        mode,
        dry_run: args.dry_run,
        import_log: args.import_log.clone(),
    };

    let spinner = if args.json {
        ProgressBar::hidden()
    } else {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.blue} {msg}")
                .context("invalid progress template")?
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.set_message(format!(
            "Migrating users ({}{})...",
            mode,
            if args.dry_run { ", dry run" } else { "" }
        ));
        spinner.enable_steady_tick(std::time::Duration::from_millis(100));
        spinner
    };

    let result = coordinator.run(&options).await;
    spinner.finish_and_clear();
    let result = result.context("migration run aborted")?;

    if args.json {
        let json = serde_json::to_string_pretty(&result.report)
            .context("failed to serialize report")?;
        println!("{}", json);
        return Ok(());
    }

    if args.dry_run {
        if let Some(log) = &result.import {
            render::print_dry_run_imports(log);
        }
    }
    render::print_report(&result.report);
    Ok(())
}

fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, DEFAULT_CONFIG).context("failed to write config file")?;

    println!("{}", style::success(&format!("Default configuration written to {}", output.display())));
    println!();
    println!("Next steps:");
    println!("  1. Point [source] at the exported user database");
    println!("  2. Fill in the tenant and application ids under [identity]");
    println!("  3. Export FUSIONAUTH_API_KEY (or put it in a .env file)");
    println!("  4. Check with: usermigrate check --config {}", output.display());
    println!("  5. Rehearse with: usermigrate --dry-run --config {}", output.display());

    Ok(())
}

async fn cmd_check(config: &AppConfig) -> Result<()> {
    println!("{}", style::header("Configuration"));
    println!("{}", style::success("TOML structure and values are valid"));
    println!("  Source database  : {}", config.source.path.display());
    println!("  Source table     : {}", config.source.table);
    println!("  Identity service : {}", config.identity.base_url);
    println!("  Tenant           : {}", config.identity.tenant_id);
    println!("  Applications     : {}", config.identity.applications.join(", "));
    println!(
        "  API key          : {}",
        if config.identity.api_key.is_some() {
            "set"
        } else {
            "NOT SET"
        }
    );
    println!();

    println!("{}", style::header("Source"));
    let source = open_source(config)?;
    let count = source.count().context("failed to count source records")?;
    println!("{}", style::success(&format!("{} user record(s) readable", count)));
    let stats = source
        .stats(&config.mapping.confirmed_field, &config.mapping.level_field)
        .context("failed to read source statistics")?;
    let mapper = build_mapper(config)?;
    render::print_stats(&stats, mapper.roles());
    println!();

    println!("{}", style::header("Identity service"));
    if config.identity.api_key.is_none() {
        println!(
            "{}",
            style::warn(&format!(
                "${} is not set, skipping connectivity check",
                config.identity.api_key_env
            ))
        );
        return Ok(());
    }
    let client = FusionAuthClient::new(&config.identity)
        .context("failed to create identity service client")?;
    match client.check_health().await {
        Ok(()) => println!("{}", style::success("reachable")),
        Err(e) => {
            println!("{}", style::error(&format!("unreachable: {}", e)));
            anyhow::bail!("identity service check failed");
        }
    }

    Ok(())
}

fn cmd_preview(config: &AppConfig, email: Option<&str>, id: Option<i64>) -> Result<()> {
    let source = open_source(config)?;
    let record = match (email, id) {
        (Some(email), _) => source
            .find_by_email(email)
            .context("failed to query source")?
            .with_context(|| format!("no source record with email '{}'", email))?,
        (None, Some(id)) => source
            .find_by_id(id)
            .context("failed to query source")?
            .with_context(|| format!("no source record with id {}", id))?,
        (None, None) => anyhow::bail!("pass --email or --id"),
    };

    let mapper = build_mapper(config)?;
    let payload = mapper.map(&record).redacted();

    println!("{}", style::header(&format!("Source record {}", record.id)));
    println!("  Level : {}", mapper.level_of(&record).map(|l| l.to_string()).unwrap_or_else(|| "none".into()));
    println!("  Role  : {}", mapper.role_of(&record));
    if payload.email.is_empty() {
        println!("{}", style::warn("record has no email and would fail to import"));
    }
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to serialize payload")?
    );

    Ok(())
}

// ---------------------------------------------------------------------------
// Default configuration
// ---------------------------------------------------------------------------

const DEFAULT_CONFIG: &str = r#"# usermigrate configuration
# Secrets are never stored here: *_env fields name environment variables.

[source]
# SQLite export of the legacy user table.
path = "./legacy_users.db"
table = "users"
id_column = "id"
batch_size = 100

[identity]
base_url = "http://localhost:9011"
api_key_env = "FUSIONAUTH_API_KEY"
tenant_id = "00000000-0000-0000-0000-000000000000"
timeout_secs = 30
verify_tls = true
# The first application also receives a registration inside the import call.
applications = [
    "00000000-0000-0000-0000-000000000001",
]

[mapping]
# image_base_url = "https://www.example.com/"
encryption_scheme = "leaguejoe-password-encryptor"
factor = 1
# Columns copied verbatim into the user's data bag.
passthrough = [
    "user_url", "gender", "company", "jersey_name", "jersey_number",
    "title", "approved", "created", "updated",
]

[roles]
default_role = "Rookie"

[roles.levels]
1 = "Global Admin"
2 = "Rookie"
5 = "Player"
6 = "Coach"

[run]
log_level = "info"
# log_file = "./usermigrate.log"
concurrency = 1
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_flags_parse() {
        let cli = Cli::try_parse_from([
            "usermigrate",
            "--dry-run",
            "--register-only",
            "--import-log",
            "log.json",
        ])
        .unwrap();
        assert!(cli.command.is_none());
        assert!(cli.run.dry_run);
        assert!(cli.run.register_only);
        assert_eq!(cli.run.import_log.as_deref(), Some(Path::new("log.json")));
    }

    #[test]
    fn test_both_phase_flags_rejected_by_coordinator() {
        let cli =
            Cli::try_parse_from(["usermigrate", "--import-only", "--register-only"]).unwrap();
        assert!(RunMode::from_flags(cli.run.import_only, cli.run.register_only).is_err());
    }

    #[test]
    fn test_preview_requires_target() {
        assert!(Cli::try_parse_from(["usermigrate", "preview"]).is_err());
        let cli = Cli::try_parse_from(["usermigrate", "preview", "--id", "7"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Preview { id: Some(7), .. })
        ));
    }

    #[test]
    fn test_default_config_parses_and_validates() {
        let config: AppConfig = toml::from_str(DEFAULT_CONFIG).unwrap();
        config.validate().unwrap();
        assert_eq!(config.roles.level_table().unwrap().len(), 4);
        assert_eq!(config.source.batch_size, 100);
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usermigrate.toml");
        cmd_init(&path).unwrap();
        assert!(AppConfig::load_from_file(&path).is_ok());
        assert!(cmd_init(&path).is_err());
    }
}

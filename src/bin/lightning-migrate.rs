//! Lightning data migration CLI
//!
//! Runs the shipped data migrations against a directory of JSON collection
//! dumps:
//! - Show the schema version and pending migrations
//! - Apply pending migrations under the maintenance lock
//! - View migration history
//! - Audit access-group consistency
//! - Clear a maintenance lock left behind by a failed run

use clap::{Arg, ArgAction, ArgMatches, Command};
use lightning_migrate::{
    config_management,
    logging::{init_logging, parse_level},
    migrations,
    schema_migration::{MaintenanceLock, MigrationConfig, MigrationManager},
    store::{DocumentStore, JsonFileStore},
};
use std::path::PathBuf;
use std::sync::Arc;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

fn main() {
    let matches = create_cli().get_matches();

    let log_level = matches
        .get_one::<String>("log-level")
        .and_then(|level| parse_level(level))
        .unwrap_or(tracing::Level::INFO);
    init_logging(log_level, matches.get_flag("json-logs"));

    if let Err(e) = run_command(&matches) {
        eprintln!("Error: {}", e);
        std::process::exit(exit_code(e.as_ref()));
    }
}

/// Process exit status for a failed command: the negated crate error code,
/// or 1 for anything else.
fn exit_code(error: &(dyn std::error::Error + 'static)) -> i32 {
    error
        .downcast_ref::<lightning_migrate::Error>()
        .map(|e| -e.error_code())
        .unwrap_or(1)
}

fn store_arg() -> Arg {
    Arg::new("store")
        .help("Directory of <collection>.json dumps")
        .required(true)
        .value_parser(clap::value_parser!(PathBuf))
        .index(1)
}

fn create_cli() -> Command {
    Command::new("lightning-migrate")
        .about("Lightning data migration runner")
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("log-level")
                .help("Log level (trace, debug, info, warn, error)")
                .long("log-level")
                .global(true)
                .default_value("info"),
        )
        .arg(
            Arg::new("json-logs")
                .help("Emit logs as JSON lines")
                .long("json-logs")
                .global(true)
                .action(ArgAction::SetTrue),
        )
        .subcommand(
            Command::new("status")
                .about("Show schema version and pending migrations")
                .arg(store_arg()),
        )
        .subcommand(
            Command::new("migrate")
                .about("Apply pending migrations")
                .arg(store_arg())
                .arg(
                    Arg::new("batch-size")
                        .help("Documents fetched per page")
                        .long("batch-size")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    Arg::new("config")
                        .help("JSON configuration file")
                        .long("config")
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("no-audit")
                        .help("Skip the post-migration audit")
                        .long("no-audit")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("history")
                .about("Show migration history")
                .arg(store_arg())
                .arg(
                    Arg::new("limit")
                        .help("Number of entries to show")
                        .long("limit")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("10"),
                )
                .arg(
                    Arg::new("failed")
                        .help("Show only failed executions")
                        .long("failed")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("audit")
                .about("Check access-group consistency without changing anything")
                .arg(store_arg())
                .arg(
                    Arg::new("batch-size")
                        .help("Documents fetched per page")
                        .long("batch-size")
                        .value_parser(clap::value_parser!(usize)),
                ),
        )
        .subcommand(
            Command::new("unlock")
                .about("Remove a maintenance lock left by a failed run")
                .arg(store_arg()),
        )
}

fn run_command(matches: &ArgMatches) -> CliResult<()> {
    match matches.subcommand() {
        Some(("status", sub_matches)) => cmd_status(sub_matches),
        Some(("migrate", sub_matches)) => cmd_migrate(sub_matches),
        Some(("history", sub_matches)) => cmd_history(sub_matches),
        Some(("audit", sub_matches)) => cmd_audit(sub_matches),
        Some(("unlock", sub_matches)) => cmd_unlock(sub_matches),
        _ => Err("Unknown command. Use --help to see available commands.".into()),
    }
}

fn open_store(matches: &ArgMatches) -> CliResult<Arc<JsonFileStore>> {
    let path = matches
        .get_one::<PathBuf>("store")
        .ok_or("store path is required")?;
    Ok(Arc::new(JsonFileStore::open(path)?))
}

fn open_manager(
    store: Arc<JsonFileStore>,
    config: MigrationConfig,
) -> CliResult<MigrationManager> {
    let manager = MigrationManager::new(store, config)?;
    for migration in migrations::all() {
        manager.register_migration(migration)?;
    }
    Ok(manager)
}

fn cmd_status(matches: &ArgMatches) -> CliResult<()> {
    let store = open_store(matches)?;

    println!("Migration Status");
    println!("================");
    println!("Store: {}", store.path().display());

    if let Some((holder, since)) = MaintenanceLock::current(store.as_ref())? {
        println!("Maintenance lock: held by {} since {}", holder, since);
    }

    let manager = open_manager(store, config_management::load_config(None)?)?;
    println!("Current version: {}", manager.current_version()?);
    println!("Target version: {}", manager.target_version()?);
    if let Some(last) = manager.get_last_successful_migration()? {
        println!(
            "Last applied: {} at {}",
            last.version,
            last.executed_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }

    let pending = manager.pending_migrations()?;
    if pending.is_empty() {
        println!("\nData set is up to date");
    } else {
        println!("\nPending migrations:");
        for (i, (version, description)) in pending.iter().enumerate() {
            println!("  {}. {} - {}", i + 1, version, description);
        }
    }

    Ok(())
}

fn cmd_migrate(matches: &ArgMatches) -> CliResult<()> {
    let mut config =
        config_management::load_config(matches.get_one::<PathBuf>("config").map(|p| p.as_path()))?;
    if let Some(&batch_size) = matches.get_one::<usize>("batch-size") {
        config.batch_size = batch_size;
    }
    if matches.get_flag("no-audit") {
        config.validate_after_migration = false;
    }
    config.validate()?;

    let store = open_store(matches)?;
    let manager = open_manager(store.clone(), config)?;

    let results = manager.migrate()?;
    if results.is_empty() {
        println!("Nothing to do: data set is at {}", manager.current_version()?);
        return Ok(());
    }

    for result in &results {
        println!(
            "Applied {} in {}ms: {}",
            result.version, result.duration_ms, result.description
        );
        for stage in &result.stages {
            println!(
                "  {:<24} read {:>8}  updates {:>8}  matched {:>8}  modified {:>8}  {}ms",
                stage.name,
                stage.documents_read,
                stage.update_calls,
                stage.documents_matched,
                stage.documents_modified,
                stage.duration_ms
            );
        }
    }

    let stats = store.stats();
    println!(
        "\nStore totals: {} read, {} update calls, {} modified",
        stats.documents_read, stats.update_calls, stats.documents_modified
    );
    Ok(())
}

fn cmd_history(matches: &ArgMatches) -> CliResult<()> {
    let limit = matches.get_one::<usize>("limit").copied().unwrap_or(10);
    let store = open_store(matches)?;
    let manager = open_manager(store, config_management::load_config(None)?)?;

    println!("Migration History");
    println!("=================");

    let history = if matches.get_flag("failed") {
        let mut failed = manager.get_failed_migrations()?;
        failed.truncate(limit);
        failed
    } else {
        manager.get_history(Some(limit))?
    };
    if history.is_empty() {
        println!("No matching migration history found");
        return Ok(());
    }

    for (i, record) in history.iter().enumerate() {
        println!(
            "{}. Version: {} | Success: {} | By: {}",
            i + 1,
            record.version,
            record.success,
            record.executed_by.as_deref().unwrap_or("unknown")
        );
        if let Some(error) = &record.error {
            println!("   Error: {}", error);
        }
        println!(
            "   Applied: {}",
            record.executed_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        if record.duration_ms > 0 {
            println!("   Duration: {}ms", record.duration_ms);
        }
        println!();
    }

    Ok(())
}

fn cmd_audit(matches: &ArgMatches) -> CliResult<()> {
    let mut config = config_management::load_config(None)?;
    if let Some(&batch_size) = matches.get_one::<usize>("batch-size") {
        config.batch_size = batch_size;
    }
    config.validate()?;

    let store = open_store(matches)?;
    let report = migrations::audit_access_groups(store.as_ref(), config.batch_size)?;

    println!("Access-group audit");
    println!("==================");
    println!("Records checked: {}", report.records_checked);
    println!("Orphans: {}", report.orphans);
    if !report.skipped_collections.is_empty() {
        println!("Skipped (absent): {}", report.skipped_collections.join(", "));
    }

    if report.is_clean() {
        println!("\nNo violations");
        return Ok(());
    }

    println!("\nViolations: {}", report.violation_count);
    for violation in &report.violations {
        println!("  {}", violation);
    }
    Err(format!("{} violation(s) found", report.violation_count).into())
}

fn cmd_unlock(matches: &ArgMatches) -> CliResult<()> {
    let store = open_store(matches)?;
    match MaintenanceLock::current(store.as_ref())? {
        Some((holder, since)) => {
            MaintenanceLock::force_release(store.as_ref())?;
            println!("Released maintenance lock held by {} since {}", holder, since);
        }
        None => println!("No maintenance lock present"),
    }
    Ok(())
}

//! kiln: load data from a tenant service into the warehouse
//!
//! Usage:
//!   # Extract from a configured source and load
//!   kiln load --source folio
//!
//!   # Load previously extracted page files (testing)
//!   kiln load --unsafe --sourcedir ./pages
//!
//! The configuration file is found through --config or the KILN_CONFIG
//! environment variable.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::time::Instant;
use tracing::{debug, info};

use kiln::catalog::default_catalog;
use kiln::config::Config;
use kiln::db::{DbClient, SqlExecutor};
use kiln::extract::{make_load_dir, ExtractionFiles, Extractor};
use kiln::loader::load_catalog;
use kiln::stage::TableStager;

#[derive(Parser, Debug)]
#[command(name = "kiln")]
#[command(about = "Load data from a tenant service into the warehouse", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load data into the warehouse
    Load {
        /// Name of a data source in the configuration file
        #[arg(long)]
        source: Option<String>,

        /// Location of the configuration file, overriding KILN_CONFIG
        #[arg(long)]
        config: Option<PathBuf>,

        /// Load page files from a directory instead of extracting (unsafe)
        #[arg(long)]
        sourcedir: Option<PathBuf>,

        /// Disable SSL in the database connection (unsafe)
        #[arg(long)]
        nossl: bool,

        /// Keep temporary files containing extracted data (unsafe)
        #[arg(long)]
        savetemps: bool,

        /// Enable functions used for testing and debugging
        #[arg(long = "unsafe")]
        unsafe_mode: bool,

        /// Enable verbose output
        #[arg(long, short = 'v')]
        verbose: bool,

        /// Enable extremely verbose debugging output
        #[arg(long)]
        debug: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    match args.command {
        Command::Load {
            source,
            config,
            sourcedir,
            nossl,
            savetemps,
            unsafe_mode,
            verbose,
            debug,
        } => {
            init_tracing(verbose, debug);
            if !unsafe_mode && (sourcedir.is_some() || nossl || savetemps) {
                bail!("--sourcedir, --nossl and --savetemps require --unsafe");
            }
            let started = Instant::now();
            run_load(source, config.as_deref(), sourcedir, nossl, savetemps)?;
            info!(elapsed_ms = started.elapsed().as_millis() as u64, "total time");
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool, debug: bool) {
    let level = if debug {
        "trace"
    } else if verbose {
        "info"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(level)
        .with_writer(std::io::stderr)
        .init();
}

fn run_load(
    source: Option<String>,
    config_path: Option<&Path>,
    sourcedir: Option<PathBuf>,
    nossl: bool,
    savetemps: bool,
) -> Result<()> {
    let config = Config::load(&Config::locate(config_path)?)?;
    let flavor = config.database.flavor()?;

    init_database(&config, nossl)?;
    run_preload_checks(&config, nossl)?;

    let mut tables = default_catalog();

    // Resolve the load directory: given, or filled by extraction
    let directory_mode = sourcedir.is_some();
    let _extraction_guard;
    let load_dir = match sourcedir {
        Some(dir) => {
            info!(dir = %dir.display(), "reading data from directory");
            dir
        }
        None => {
            let source_name =
                source.ok_or_else(|| anyhow::anyhow!("--source is required when extracting"))?;
            let source = config.source(&source_name)?;
            let extractor = Extractor::login(source)?;
            let load_dir = make_load_dir(&source.extract_dir)?;
            _extraction_guard = ExtractionFiles::new(load_dir.clone(), savetemps);
            for table in &mut tables {
                let found = if source.is_direct(&table.source_path) {
                    extractor.extract_direct(table, &load_dir)?
                } else {
                    extractor.extract_pages(table, &load_dir)?
                };
                if !found {
                    table.skip = true;
                }
            }
            load_dir
        }
    };

    let cancel = AtomicBool::new(false);
    let stager = TableStager::new(flavor, &load_dir, &config.database.reader_roles, &cancel)
        .include_test_files(directory_mode);

    let outcome = load_catalog(&mut tables, &stager, || {
        debug!("connecting to database");
        let client = DbClient::connect(&config.database, nossl)?;
        Ok(Box::new(client) as Box<dyn SqlExecutor>)
    })?;

    info!(
        loaded = outcome.loaded,
        skipped = outcome.skipped,
        failed = outcome.failed,
        "run complete"
    );
    if outcome.failed > 0 {
        bail!("{} table(s) failed to load", outcome.failed);
    }
    Ok(())
}

/// Create the schemas the warehouse expects before any table is loaded
fn init_database(config: &Config, nossl: bool) -> Result<()> {
    debug!("initializing database");
    let mut db = DbClient::connect(&config.database, nossl)?;
    db.begin()?;
    db.exec("CREATE SCHEMA IF NOT EXISTS ldp_catalog;")?;
    db.exec("CREATE SCHEMA IF NOT EXISTS history;")?;
    db.exec("CREATE SCHEMA IF NOT EXISTS local;")?;
    db.commit()?;
    Ok(())
}

/// Catch obvious problems before extraction starts
fn run_preload_checks(config: &Config, nossl: bool) -> Result<()> {
    let mut db = DbClient::connect(&config.database, nossl)
        .context("pre-load check: database is unreachable")?;
    for role in &config.database.reader_roles {
        db.begin()?;
        db.exec(&format!(
            "GRANT SELECT ON ALL TABLES IN SCHEMA public TO {};",
            role
        ))
        .with_context(|| format!("pre-load check: role {} is not grantable", role))?;
        db.rollback()?;
    }
    Ok(())
}

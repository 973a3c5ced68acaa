//! Trellis CLI - Keep per-category repository indexes reconciled

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use trellis_core::store::TRELLIS_DIR;
use trellis_core::{watch, Config, GhCli, Reconciler, Store};

#[derive(Parser)]
#[command(name = "trellis")]
#[command(about = "Reconcile per-category repository indexes", long_about = None)]
struct Cli {
    /// Override managed root detection
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create .trellis/, config.toml, and the category directories
    Init,

    /// Run one reconciliation pass
    Scan,

    /// Run continuously: periodic passes plus the document watcher
    Watch,

    /// Show indexed counts per category and cache state
    Status,

    /// Drop the cached remote listing and reconcile from scratch
    Reindex,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init => cmd_init(cli.root),
        Commands::Scan => cmd_scan(cli.root, cli.json),
        Commands::Watch => cmd_watch(cli.root),
        Commands::Status => cmd_status(cli.root, cli.json),
        Commands::Reindex => cmd_reindex(cli.root, cli.json),
    };

    if let Err(e) = result {
        if cli.json {
            let error_json = serde_json::json!({ "error": e.to_string() });
            eprintln!("{}", serde_json::to_string_pretty(&error_json).unwrap());
        } else {
            eprintln!("Error: {}", e);
        }
        std::process::exit(1);
    }
}

fn cmd_init(root: Option<PathBuf>) -> trellis_core::Result<()> {
    use colored::Colorize;

    let root = match root {
        Some(path) => path,
        None => std::env::current_dir()?,
    };
    Store::init(&root)?;

    println!("{} {}/config.toml", "Created".green(), TRELLIS_DIR);
    println!(
        "{} category directories with seeded READMEs",
        "Created".green()
    );
    println!("Set github.username in {}/config.toml to begin", TRELLIS_DIR);
    Ok(())
}

fn cmd_scan(root: Option<PathBuf>, json: bool) -> trellis_core::Result<()> {
    use colored::Colorize;

    let (root, config, store) = setup(root)?;
    let gh = GhCli::new(config.command_timeout());
    gh.ensure_available()?;

    let mut reconciler = Reconciler::new(&root, config, store, gh);
    let summary = reconciler.scan_once()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary).unwrap());
    } else {
        println!(
            "{}: {} added, {} modified, {} deleted",
            "Local changes".blue(),
            summary.changes.added.len(),
            summary.changes.modified.len(),
            summary.changes.deleted.len()
        );
        if summary.candidates.is_empty() {
            println!("{}: none", "New repositories".blue());
        } else {
            println!("{}:", "New repositories".blue());
            for candidate in &summary.candidates {
                println!("  {} [{}]", candidate.name.cyan(), candidate.category);
            }
        }
        println!(
            "{}: {} categories published",
            "Done".green(),
            summary.categories_published
        );
    }
    Ok(())
}

fn cmd_watch(root: Option<PathBuf>) -> trellis_core::Result<()> {
    let (root, config, store) = setup(root)?;
    let gh = GhCli::new(config.command_timeout());
    gh.ensure_available()?;

    let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    std::thread::spawn(move || {
        runtime.block_on(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = shutdown_tx.send(());
            }
        });
    });

    let reconciler = Reconciler::new(&root, config.clone(), store, gh);
    watch::run(reconciler, &root, &config, shutdown_rx)
}

fn cmd_status(root: Option<PathBuf>, json: bool) -> trellis_core::Result<()> {
    use colored::Colorize;

    let (root, config, store) = setup(root)?;
    // Status never contacts the remote, so gh availability is not checked.
    let gh = GhCli::new(config.command_timeout());
    let mut reconciler = Reconciler::new(&root, config, store, gh);
    let report = reconciler.status()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report).unwrap());
    } else {
        for entry in &report.categories {
            println!(
                "{}: {} indexed",
                entry.category.to_string().blue(),
                entry.indexed
            );
        }
        println!("{}: {}", "Unindexed".yellow(), report.unindexed);
        println!(
            "{}: {}",
            "Listing cache".blue(),
            if report.listing_cached { "warm" } else { "cold" }
        );
    }
    Ok(())
}

fn cmd_reindex(root: Option<PathBuf>, json: bool) -> trellis_core::Result<()> {
    let (root, config, store) = setup(root)?;
    let gh = GhCli::new(config.command_timeout());
    gh.ensure_available()?;

    let mut reconciler = Reconciler::new(&root, config, store, gh);
    reconciler.purge_listing_cache()?;
    drop(reconciler);

    cmd_scan(Some(root), json)
}

/// Resolve the managed root, open its store, and load a validated config.
/// Everything fatal happens here, before any loop starts.
fn setup(root: Option<PathBuf>) -> trellis_core::Result<(PathBuf, Config, Store)> {
    let root = detect_root(root)?;
    let store = Store::open(&root)?;
    let config = Config::load(&Store::config_path(&root))?;
    config.validate()?;
    Ok((root, config, store))
}

fn detect_root(override_path: Option<PathBuf>) -> trellis_core::Result<PathBuf> {
    if let Some(path) = override_path {
        return Ok(path);
    }

    // Walk up from the current directory looking for .trellis
    let mut current = std::env::current_dir()?;
    loop {
        if current.join(TRELLIS_DIR).exists() {
            return Ok(current);
        }
        if !current.pop() {
            return Ok(std::env::current_dir()?);
        }
    }
}

//! corroflow CLI - corrosion-rate category flows for TML populations

// Global invariants enforced:
// - Deterministic output ordering
// - Logs go to stderr, results to stdout

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use corroflow_core::config::{self, ResolvedConfig};
use corroflow_core::session::{ExplorerSession, Status};
use corroflow_core::source::RecordSource;
use corroflow_core::window::{
    month_name, parse_period, validate_rate_ceiling, WindowRequest,
};
use corroflow_core::{export, report};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "corroflow")]
#[command(about = "Track how TML populations move between corrosion-rate categories")]
#[command(version = env!("CORROFLOW_VERSION"))]
struct Cli {
    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the measurement periods available in the database
    Periods {
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Build the top-level category flow for a window
    Flow {
        #[command(flatten)]
        source: SourceArgs,

        #[command(flatten)]
        window: WindowArgs,

        /// Output format
        #[arg(long, default_value = "text")]
        format: OutputFormat,

        /// List the member TMLs of this node instead of the whole graph
        #[arg(long)]
        members: Option<usize>,
    },
    /// Follow one category's TMLs into the next period
    Drill {
        #[command(flatten)]
        source: SourceArgs,

        #[command(flatten)]
        window: WindowArgs,

        /// Node index to drill into; repeat to drill again from the result
        #[arg(long = "node", required = true)]
        nodes: Vec<usize>,

        /// Output format
        #[arg(long, default_value = "text")]
        format: OutputFormat,
    },
    /// Per-circuit category counts for a window
    Summary {
        #[command(flatten)]
        source: SourceArgs,

        #[command(flatten)]
        window: WindowArgs,

        /// Output format (csv is not supported here)
        #[arg(long, default_value = "text")]
        format: OutputFormat,
    },
    /// Validate or show configuration
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate a config file
    Validate {
        /// Path to config file (default: auto-discover from current directory)
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// Show the resolved configuration (merged defaults + config file)
    Show {
        /// Path to config file (default: auto-discover from current directory)
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[derive(Args)]
struct SourceArgs {
    /// SQLite inspection database (overrides config file)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Path to config file (default: auto-discover)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Args)]
struct WindowArgs {
    /// Start period (YYYY-MM-DD, default: earliest available)
    #[arg(long, value_parser = parse_period_arg)]
    start: Option<NaiveDate>,

    /// End period (YYYY-MM-DD, default: first period after start)
    #[arg(long, value_parser = parse_period_arg)]
    end: Option<NaiveDate>,

    /// Inclusive ceiling on the starting corrosion rate in mpy (overrides config file)
    #[arg(long, value_parser = parse_ceiling_arg)]
    ceiling: Option<f64>,
}

impl WindowArgs {
    fn request(&self) -> WindowRequest {
        WindowRequest {
            start: self.start,
            end: self.end,
            rate_ceiling: self.ceiling,
        }
    }
}

#[derive(Clone, Copy, PartialEq, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
    Csv,
}

fn parse_period_arg(s: &str) -> Result<NaiveDate, String> {
    parse_period(s).map_err(|e| format!("{:#}", e))
}

fn parse_ceiling_arg(s: &str) -> Result<f64, String> {
    let ceiling: f64 = s.trim().parse().map_err(|e| format!("{}", e))?;
    validate_rate_ceiling(ceiling).map_err(|e| format!("{:#}", e))?;
    Ok(ceiling)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Periods { source } => {
            let resolved = load_config(source.config.as_deref())?;
            let store = corroflow_core::open_source(&resolved, source.db.as_deref())?;
            let periods = store
                .list_available_periods()
                .context("failed to list available periods")?;

            if periods.is_empty() {
                println!("No measurement periods found.");
                println!(
                    "Fallback window: {} -> {}",
                    resolved.fallback_start, resolved.fallback_end
                );
            }
            for period in periods {
                println!("{}  {}", period, month_name(period));
            }
        }
        Commands::Flow {
            source,
            window,
            format,
            members,
        } => {
            let resolved = load_config(source.config.as_deref())?;
            let store = corroflow_core::open_source(&resolved, source.db.as_deref())?;
            let session = open_session(store, &resolved, &window)?;
            ensure_graph(&session)?;

            if let Some(node) = members {
                print_members(&session, node)?;
            } else {
                print_graph(&session, format)?;
            }
        }
        Commands::Drill {
            source,
            window,
            nodes,
            format,
        } => {
            let resolved = load_config(source.config.as_deref())?;
            let store = corroflow_core::open_source(&resolved, source.db.as_deref())?;
            let mut session = open_session(store, &resolved, &window)?;
            ensure_graph(&session)?;

            for node in nodes {
                let status = session.drill_down(node).clone();
                if status != Status::Ready {
                    anyhow::bail!("cannot drill into node {}: {}", node, describe(&status));
                }
            }
            print_graph(&session, format)?;
        }
        Commands::Summary {
            source,
            window,
            format,
        } => {
            if format == OutputFormat::Csv {
                anyhow::bail!("--format csv is not supported for summary (use text or json)");
            }
            let resolved = load_config(source.config.as_deref())?;
            let store = corroflow_core::open_source(&resolved, source.db.as_deref())?;
            let session = open_session(store, &resolved, &window)?;
            ensure_graph(&session)?;

            let graph = session
                .graph()
                .context("no graph available for the selected window")?;
            let summaries = report::circuit_summary(graph);
            match format {
                OutputFormat::Json => println!("{}", report::summary_to_json(&summaries)?),
                _ => print!("{}", report::render_summary_text(&summaries)),
            }
        }
        Commands::Config { action } => match action {
            ConfigAction::Validate { path } => {
                let project_root = std::env::current_dir()?;
                match config::load_and_resolve(&project_root, path.as_deref()) {
                    Ok(resolved) => {
                        if let Some(ref p) = resolved.config_path {
                            println!("Config valid: {}", p.display());
                        } else {
                            println!("No config file found. Using defaults.");
                        }
                    }
                    Err(e) => {
                        eprintln!("Config validation failed: {:#}", e);
                        std::process::exit(1);
                    }
                }
            }
            ConfigAction::Show { path } => {
                let project_root = std::env::current_dir()?;
                let resolved = config::load_and_resolve(&project_root, path.as_deref())
                    .context("failed to load configuration")?;
                print_config(&resolved);
            }
        },
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(config_path: Option<&Path>) -> anyhow::Result<ResolvedConfig> {
    let project_root = std::env::current_dir()?;
    let resolved = config::load_and_resolve(&project_root, config_path)
        .context("failed to load configuration")?;
    if let Some(path) = &resolved.config_path {
        tracing::info!("using config: {}", path.display());
    }
    Ok(resolved)
}

/// Start a session with the requested window applied before the first build
fn open_session<S: RecordSource>(
    source: S,
    resolved: &ResolvedConfig,
    window: &WindowArgs,
) -> anyhow::Result<ExplorerSession<S>> {
    corroflow_core::explore(source, resolved, &window.request())
}

/// Fail unless the session holds a graph; warn on degraded graphs
fn ensure_graph<S: RecordSource>(session: &ExplorerSession<S>) -> anyhow::Result<()> {
    match session.status() {
        Status::NoWindow => anyhow::bail!("{}", describe(session.status())),
        Status::Ready => {}
        other => tracing::warn!("{}", describe(other)),
    }
    Ok(())
}

fn describe(status: &Status) -> String {
    match status {
        Status::Ready => "ready".to_string(),
        Status::NoData => "no TMLs in the selected window".to_string(),
        Status::NoWindow => "no period is available after the start period".to_string(),
        Status::RetrievalFailed(e) => format!("failed to retrieve records: {}", e),
        Status::NoNextPeriod => "no data available for the next period".to_string(),
        Status::NoDrillDownData => "no drill-down data for the selected TMLs".to_string(),
        Status::NotExpandable => "node is the root or has no TMLs".to_string(),
    }
}

fn print_graph<S: RecordSource>(
    session: &ExplorerSession<S>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let graph = session
        .graph()
        .context("no graph available for the selected window")?;
    match format {
        OutputFormat::Text => print!("{}", report::render_text(graph)),
        OutputFormat::Json => println!("{}", graph.to_json()?),
        OutputFormat::Csv => println!("{}", export::to_csv(graph)?),
    }
    Ok(())
}

fn print_members<S: RecordSource>(session: &ExplorerSession<S>, node: usize) -> anyhow::Result<()> {
    let graph = session
        .graph()
        .context("no graph available for the selected window")?;
    let text = report::render_members_text(graph, node)
        .with_context(|| format!("node {} is the root or has no TMLs", node))?;
    print!("{}", text);
    Ok(())
}

fn print_config(resolved: &ResolvedConfig) {
    println!("Configuration:");
    if let Some(ref p) = resolved.config_path {
        println!("  Source: {}", p.display());
    } else {
        println!("  Source: defaults (no config file found)");
    }
    println!();
    println!("Database:");
    println!(
        "  path: {}",
        resolved
            .database
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "none".to_string())
    );
    println!("  narrow_query: {}", resolved.narrow_query);
    println!();
    println!("Window:");
    println!("  rate_ceiling: {} mpy", resolved.rate_ceiling);
    println!(
        "  fallback: {} -> {}",
        resolved.fallback_start, resolved.fallback_end
    );
    println!();
    println!("Filters:");
    println!(
        "  circuits: {}",
        if resolved.circuits.is_restrictive() {
            "custom patterns"
        } else {
            "all"
        }
    );
}

//! corroflow core library - corrosion-rate category flows for TML populations

// Global invariants enforced in this crate:
// - Every TML falls in exactly one of five rate categories
// - Link values equal their member counts; node values sum to the root
// - No global mutable state
// - Deterministic ordering of nodes, links, circuits, and members
// - Identical input yields byte-for-byte identical output

pub mod category;
pub mod config;
pub mod drilldown;
pub mod export;
pub mod graph;
pub mod joiner;
pub mod record;
pub mod report;
pub mod session;
pub mod source;
pub mod store;
pub mod window;

pub use category::{classify, Category};
pub use config::ResolvedConfig;
pub use graph::{build, FlowGraph, GraphView};
pub use record::{TmlKey, TmlRecord};
pub use session::{ExplorerSession, Status, View};
pub use source::{FetchError, FilteredSource, MemorySource, RecordSource};
pub use store::SqliteStore;
pub use window::{Window, WindowRequest, WindowSelector};

use anyhow::{Context, Result};

/// Open the configured database with circuit filtering applied
///
/// `database` overrides the configured path; one of the two must be set.
pub fn open_source(
    config: &ResolvedConfig,
    database: Option<&std::path::Path>,
) -> Result<FilteredSource<SqliteStore>> {
    let path = database
        .or(config.database.as_deref())
        .context("no database given (use --db or set \"database\" in the config file)")?;
    if !path.exists() {
        anyhow::bail!("database does not exist: {}", path.display());
    }
    let mut store = SqliteStore::open(path)?;
    store.set_narrow_query(config.narrow_query);
    Ok(FilteredSource::new(store, config.circuits.clone()))
}

/// Start an explorer session over `source` using configured defaults
///
/// `request` is applied on top of the defaults before the first graph is
/// built. An invalid ceiling or period in `request` is an error.
pub fn explore<S: RecordSource>(
    source: S,
    config: &ResolvedConfig,
    request: &WindowRequest,
) -> Result<ExplorerSession<S>> {
    ExplorerSession::with_request(
        source,
        config.rate_ceiling,
        (config.fallback_start, config.fallback_end),
        request,
    )
}

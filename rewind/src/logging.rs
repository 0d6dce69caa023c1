//! Diagnostics for debugging rollbacks and forks.
//!
//! Tracing output goes to stderr and is never persisted. Run records
//! (`io/run_record`) are the product artifacts and do not depend on
//! `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset.
fn default_filter(verbose: bool) -> &'static str {
    if verbose { "warn,rewind=debug" } else { "warn" }
}

/// Install the stderr subscriber.
///
/// `RUST_LOG` wins over `verbose`:
/// ```bash
/// RUST_LOG=rewind::agent=debug rewind rollback run.traj --workdir repo --problem issue.md --step 3
/// ```
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}

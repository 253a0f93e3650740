//! Log output for the `atlas-fusion` binary.
//!
//! Logs go to stderr; stdout carries only the end-of-run summary and the
//! `check` listing. Without `RUST_LOG`, only the atlas-fusion crates log at
//! the requested level and everything else is held to warnings.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const CRATES: [&str; 3] = ["atlas_fusion", "atlas_fusion_core", "atlas_fusion_tools"];

/// Filter directives used when `RUST_LOG` is unset.
pub fn default_directives(level: Level) -> String {
    let mut directives = vec!["warn".to_string()];
    directives.extend(CRATES.iter().map(|krate| format!("{}={}", krate, level)));
    directives.join(",")
}

/// Install the global subscriber; `-v` maps to `Level::DEBUG`, `--json` to `json`.
///
/// A second call leaves the first subscriber in place.
pub fn init_tracing(json: bool, level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));
    let layer = fmt::layer().with_target(false).with_writer(std::io::stderr);

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if json {
        registry.with(layer.json()).try_init()
    } else {
        registry.with(layer).try_init()
    };
    installed.ok();
}

//==================================================
// File: logging.rs
//==================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Tracing setup shared by the console and embedding hosts
// Objective: Install one stderr subscriber per process with a component label
//==================================================

use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::SubscriberBuilder;

static INIT: OnceLock<()> = OnceLock::new();

/// Installs the subscriber once. `RUST_LOG` wins over `default_filter`.
///
/// A subscriber installed elsewhere first is left in place.
pub fn init(component: &str, default_filter: &str) {
    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(default_filter))
            .unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = SubscriberBuilder::default()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .compact()
            .try_init();
    });
    tracing::debug!(component, "tracing initialised");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_harmless() {
        init("test", "debug");
        init("test", "not a [valid filter");
        assert!(INIT.get().is_some());
    }
}

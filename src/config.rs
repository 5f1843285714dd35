//! Bridge configuration loaded from TOML with environment overrides.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BridgeError, BridgeResult};

/// File name under the user's configuration directory.
const CONFIG_FILE: &str = "config.toml";
const CONFIG_DIR: &str = "solvra_embed";

pub const ENV_PRINT_STACK: &str = "SOLVRA_EMBED_PRINT_STACK";
pub const ENV_MAPPED_EXCEPTIONS: &str = "SOLVRA_EMBED_MAPPED_EXCEPTIONS";

/// Process-wide bridge options.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Initial diagnostic-trace flag of every new context.
    pub print_stack: bool,
    /// Translate Host exceptions into per-class Script error types.
    pub mapped_exceptions: bool,
    /// Name the bridge module is registered under in each context.
    pub bridge_module: String,
    /// `tracing` filter directive used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            print_stack: false,
            mapped_exceptions: cfg!(feature = "mapped-exceptions"),
            bridge_module: "embed".to_string(),
            log_filter: "warn".to_string(),
        }
    }
}

impl BridgeConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    pub fn from_toml(text: &str) -> BridgeResult<Self> {
        let config: Self = toml::from_str(text).map_err(|err| BridgeError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads `path`. A missing or malformed file is an error.
    pub fn load(path: &Path) -> BridgeResult<Self> {
        let text = fs::read_to_string(path)
            .map_err(|err| BridgeError::Config(format!("reading {}: {err}", path.display())))?;
        let config = Self::from_toml(&text)
            .map_err(|err| BridgeError::Config(format!("parsing {}: {err}", path.display())))?;
        debug!(path = %path.display(), "bridge configuration loaded");
        Ok(config)
    }

    /// Loads the default file when it exists, then applies environment
    /// overrides.
    pub fn load_or_default() -> BridgeResult<Self> {
        let config = match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path)?,
            _ => Self::default(),
        };
        config.with_env_overrides()
    }

    pub fn with_env_overrides(self) -> BridgeResult<Self> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> BridgeResult<Self> {
        if let Some(value) = lookup(ENV_PRINT_STACK) {
            self.print_stack = parse_flag(ENV_PRINT_STACK, &value)?;
        }
        if let Some(value) = lookup(ENV_MAPPED_EXCEPTIONS) {
            self.mapped_exceptions = parse_flag(ENV_MAPPED_EXCEPTIONS, &value)?;
        }
        Ok(self)
    }

    pub fn with_print_stack(mut self, flag: bool) -> Self {
        self.print_stack = flag;
        self
    }

    pub fn with_mapped_exceptions(mut self, flag: bool) -> Self {
        self.mapped_exceptions = flag;
        self
    }

    pub fn with_bridge_module(mut self, name: impl Into<String>) -> Self {
        self.bridge_module = name.into();
        self
    }

    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = filter.into();
        self
    }

    pub fn validate(&self) -> BridgeResult<()> {
        let name = self.bridge_module.as_str();
        let valid = !name.is_empty()
            && !name.starts_with(|c: char| c.is_ascii_digit())
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if valid {
            Ok(())
        } else {
            Err(BridgeError::Config(format!("bridge_module '{name}' is not an identifier")))
        }
    }
}

fn parse_flag(name: &str, value: &str) -> BridgeResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(BridgeError::Config(format!("{name}: expected a boolean, got '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_files_keep_defaults() {
        let config = BridgeConfig::from_toml("print_stack = true\n").expect("parse");
        assert!(config.print_stack);
        assert_eq!(config.bridge_module, "embed");
        assert_eq!(config.log_filter, "warn");
    }

    #[test]
    fn load_reads_file_and_reports_bad_input() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "bridge_module = \"bridge\"\nmapped_exceptions = false").expect("write");
        let config = BridgeConfig::load(file.path()).expect("load");
        assert_eq!(config.bridge_module, "bridge");
        assert!(!config.mapped_exceptions);

        let err = BridgeConfig::from_toml("bridge_module = \"not valid\"").expect_err("invalid");
        assert!(matches!(err, BridgeError::Config(_)));
        assert!(BridgeConfig::load(Path::new("/nonexistent/solvra.toml")).is_err());
    }

    #[test]
    fn overrides_apply_flags() {
        let config = BridgeConfig::default()
            .with_overrides(|name| match name {
                ENV_PRINT_STACK => Some("on".into()),
                ENV_MAPPED_EXCEPTIONS => Some("0".into()),
                _ => None,
            })
            .expect("overrides");
        assert!(config.print_stack);
        assert!(!config.mapped_exceptions);
        let err = BridgeConfig::default()
            .with_overrides(|name| (name == ENV_PRINT_STACK).then(|| "maybe".into()))
            .expect_err("bad flag");
        assert!(err.to_string().contains(ENV_PRINT_STACK));
    }
}

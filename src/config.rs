//! Configuration handling for the query server
//!
//! Settings are layered: built-in defaults, an optional TOML file, then
//! environment variables (a `.env` file next to the process is loaded first),
//! and finally command line flags applied by the binary.
//!
//! ## Environment Variables
//!
//! - `VIEWSERVER_LANGUAGE` - Default function language (`python` or `lua`)
//! - `VIEWSERVER_REDUCE_LIMIT` - Reject reduce output that does not shrink
//! - `VIEWSERVER_RESET_CLEARS_DDOCS` - Make `reset` also drop design documents
//! - `VIEWSERVER_RECURSION_LIMIT` - Maximum nested calls in Python functions
//! - `VIEWSERVER_LUA_MEMORY_LIMIT` - Lua heap limit in bytes

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ServerError, ServerResult};

/// Environment variable names
pub const ENV_LANGUAGE: &str = "VIEWSERVER_LANGUAGE";
pub const ENV_REDUCE_LIMIT: &str = "VIEWSERVER_REDUCE_LIMIT";
pub const ENV_RESET_CLEARS_DDOCS: &str = "VIEWSERVER_RESET_CLEARS_DDOCS";
pub const ENV_RECURSION_LIMIT: &str = "VIEWSERVER_RECURSION_LIMIT";
pub const ENV_LUA_MEMORY_LIMIT: &str = "VIEWSERVER_LUA_MEMORY_LIMIT";

/// Default `tracing` filter when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "solidb_viewserver=info";

/// Process-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Language used by `add_fun`, `reduce` and design documents without one
    pub language: String,
    /// Initial value of the session's reduce overflow check
    pub reduce_limit: bool,
    /// Whether `reset` also clears registered design documents
    pub reset_clears_ddocs: bool,
    /// Maximum nested user function calls (Python)
    pub recursion_limit: usize,
    /// Lua heap limit in bytes
    pub lua_memory_limit: Option<usize>,
    /// `tracing` filter directive
    pub log_filter: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            language: crate::scripting::PYTHON.to_string(),
            reduce_limit: false,
            reset_clears_ddocs: false,
            recursion_limit: pyfun_core::DEFAULT_RECURSION_LIMIT,
            lua_memory_limit: None,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl ServerConfig {
    /// Load a TOML file over the defaults.
    pub fn from_file(path: &Path) -> ServerResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ServerError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        toml::from_str(&content)
            .map_err(|e| ServerError::Config(format!("invalid {}: {}", path.display(), e)))
    }

    /// Load defaults or the given file, then apply `.env` and environment overrides.
    pub fn load(path: Option<&Path>) -> ServerResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        // Missing .env is fine
        let _ = dotenvy::dotenv();
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    /// Apply overrides read through `lookup`; unparsable values are ignored.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(language) = lookup(ENV_LANGUAGE) {
            if !language.is_empty() {
                self.language = language;
            }
        }

        if let Some(flag) = lookup(ENV_REDUCE_LIMIT).as_deref().and_then(parse_flag) {
            self.reduce_limit = flag;
        }

        if let Some(flag) = lookup(ENV_RESET_CLEARS_DDOCS)
            .as_deref()
            .and_then(parse_flag)
        {
            self.reset_clears_ddocs = flag;
        }

        if let Some(limit) = lookup(ENV_RECURSION_LIMIT).and_then(|v| v.parse::<usize>().ok()) {
            self.recursion_limit = limit;
        }

        if let Some(limit) = lookup(ENV_LUA_MEMORY_LIMIT).and_then(|v| v.parse::<usize>().ok()) {
            self.lua_memory_limit = Some(limit);
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Per-session settings sent by the host with `reset`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryConfig {
    pub reduce_limit: Option<bool>,
    /// The raw object, kept for keys this server does not interpret
    pub raw: Map<String, Value>,
}

impl QueryConfig {
    pub fn from_map(raw: Map<String, Value>) -> Self {
        let reduce_limit = match raw.get("reduce_limit") {
            Some(Value::Bool(flag)) => Some(*flag),
            Some(Value::String(s)) => parse_flag(s),
            _ => None,
        };
        Self { reduce_limit, raw }
    }

    /// Whether reduce overflow is checked, falling back to the server setting.
    pub fn reduce_limit(&self, server: &ServerConfig) -> bool {
        self.reduce_limit.unwrap_or(server.reduce_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.language, "python");
        assert!(!config.reduce_limit);
        assert!(!config.reset_clears_ddocs);
        assert_eq!(config.recursion_limit, 200);
        assert_eq!(config.lua_memory_limit, None);
        assert_eq!(config.log_filter, DEFAULT_LOG_FILTER);
    }

    #[test]
    fn test_from_file_keeps_defaults_for_missing_keys() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "language = \"lua\"\nlua_memory_limit = 1048576").unwrap();

        let config = ServerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.language, "lua");
        assert_eq!(config.lua_memory_limit, Some(1_048_576));
        assert_eq!(config.recursion_limit, 200);
    }

    #[test]
    fn test_from_file_errors() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "recursion_limit = \"deep\"").unwrap();
        let err = ServerConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ServerError::Config(_)));

        let dir = tempfile::tempdir().unwrap();
        let err = ServerConfig::from_file(&dir.path().join("missing.toml")).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_LANGUAGE, "lua"),
            (ENV_REDUCE_LIMIT, "true"),
            (ENV_RESET_CLEARS_DDOCS, "maybe"),
            (ENV_RECURSION_LIMIT, "50"),
            (ENV_LUA_MEMORY_LIMIT, "not a number"),
        ]
        .into_iter()
        .collect();

        let mut config = ServerConfig::default();
        config.apply_overrides_from(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.language, "lua");
        assert!(config.reduce_limit);
        assert!(!config.reset_clears_ddocs);
        assert_eq!(config.recursion_limit, 50);
        assert_eq!(config.lua_memory_limit, None);
    }

    #[test]
    fn test_query_config() {
        let server = ServerConfig::default();

        let config = QueryConfig::default();
        assert!(!config.reduce_limit(&server));

        let raw = json!({"reduce_limit": true, "timeout": 5000});
        let config = QueryConfig::from_map(raw.as_object().cloned().unwrap());
        assert!(config.reduce_limit(&server));
        assert_eq!(config.raw.get("timeout"), Some(&json!(5000)));
    }
}

//! Configuration management

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Json, Serialized};
use figment::Figment;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{Error, Result};

/// Main configuration, loaded once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Host the proxy listener binds to
    pub proxy_host: String,
    /// Port the proxy listener binds to
    pub proxy_port: u16,
    /// Host the admin/health listener binds to
    pub admin_host: String,
    /// Port the admin/health listener binds to
    pub admin_port: u16,
    /// Base URL of the LLM inference backend
    pub backend_url: String,
    /// Seconds between warmup-scheduler change checks
    pub warmup_check_interval: u64,
    /// Prefix (e.g. `"@code"`) to template file path mapping
    pub prefixes: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            proxy_host: "localhost".to_string(),
            proxy_port: 8088,
            admin_host: "localhost".to_string(),
            admin_port: 8089,
            backend_url: "http://localhost:8081".to_string(),
            warmup_check_interval: 30,
            prefixes: HashMap::new(),
        }
    }
}

impl Config {
    /// Load configuration from an optional JSON file, layered with
    /// `BIOPROXY_`-prefixed environment variables. A missing file falls back
    /// entirely to defaults (env vars still apply); a file that exists but
    /// fails to parse is a fatal error.
    ///
    /// # Errors
    ///
    /// Returns an error if the given path does not exist, or if the merged
    /// configuration cannot be extracted (malformed JSON, wrong types).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Json::file(p));
        }

        figment = figment.merge(Env::prefixed("BIOPROXY_"));

        let config: Self = figment.extract().map_err(|e| Error::Config(e.to_string()))?;

        config.warn_on_ambiguous_prefixes();

        Ok(config)
    }

    /// The warmup scheduler's check interval as a [`Duration`].
    #[must_use]
    pub fn warmup_check_interval(&self) -> Duration {
        Duration::from_secs(self.warmup_check_interval)
    }

    /// First-match-wins prefix resolution depends on the iteration order of
    /// `prefixes`, which a `HashMap` does not guarantee. If any configured
    /// prefix is itself a prefix of another, log a warning naming both so an
    /// operator sees the ambiguity at startup rather than being surprised by
    /// it later.
    fn warn_on_ambiguous_prefixes(&self) {
        let mut keys: Vec<&String> = self.prefixes.keys().collect();
        keys.sort();
        for (i, a) in keys.iter().enumerate() {
            for b in &keys[i + 1..] {
                if b.starts_with(a.as_str()) || a.starts_with(b.as_str()) {
                    warn!(
                        prefix_a = %a,
                        prefix_b = %b,
                        "configured prefixes overlap; first-match order is not guaranteed"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn load_with_no_path_uses_defaults() {
        let config = Config::load(None).unwrap();
        assert_eq!(config.proxy_host, "localhost");
        assert_eq!(config.proxy_port, 8088);
        assert_eq!(config.admin_port, 8089);
        assert_eq!(config.warmup_check_interval, 30);
        assert!(config.prefixes.is_empty());
    }

    #[test]
    fn load_missing_file_is_fatal() {
        let err = Config::load(Some(Path::new("/nonexistent/bioproxy.json"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn load_merges_file_over_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"proxy_port": 9000, "prefixes": {{"@code": "t_code.txt"}}}}"#
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.proxy_port, 9000);
        assert_eq!(config.proxy_host, "localhost");
        assert_eq!(config.prefixes.get("@code"), Some(&"t_code.txt".to_string()));
    }

    #[test]
    fn malformed_json_is_fatal() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let err = Config::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}

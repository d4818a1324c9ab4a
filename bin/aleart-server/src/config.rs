//! Server configuration, loaded from environment variables at startup.

use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration for aleart-server.
///
/// Every field has a default so the server starts without any environment
/// variables set.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:8000"`).
    pub bind_address: String,

    /// sqlx SQLite URL of the job-record database (default: `"sqlite://aleart.db"`).
    pub database_url: String,

    /// Directory holding generated artifacts (default: `"generated_images"`).
    pub artifact_dir: PathBuf,

    /// Base URL of the diffusion web service.
    pub synth_url: String,

    /// Checkpoint to select at load time; the service's current one when unset.
    pub synth_model: Option<String>,

    /// Upper bound on a single synthesis.
    pub synth_timeout: Duration,

    /// Load the model in the background at startup instead of on first request.
    pub preload_model: bool,

    /// Record images generated without a `userId` in the unowned collection.
    pub record_unowned: bool,

    /// `tracing` filter string, e.g. `"info"` or `"debug,sqlx=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// Comma-separated allowed origins; any origin when unset.
    pub cors_allowed_origins: Option<String>,

    /// Serve Swagger UI at `/swagger-ui`.
    pub enable_swagger: bool,
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build [`Config`] from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            bind_address: var("ALEART_BIND").unwrap_or_else(|| "0.0.0.0:8000".to_owned()),
            database_url: var("ALEART_DATABASE_URL")
                .unwrap_or_else(|| "sqlite://aleart.db".to_owned()),
            artifact_dir: var("ALEART_ARTIFACT_DIR")
                .map_or_else(|| PathBuf::from("generated_images"), PathBuf::from),
            synth_url: var("ALEART_SYNTH_URL")
                .unwrap_or_else(|| "http://127.0.0.1:7860".to_owned()),
            synth_model: var("ALEART_SYNTH_MODEL"),
            synth_timeout: Duration::from_secs(parse_or(var("ALEART_SYNTH_TIMEOUT_SECS"), 600)),
            preload_model: flag_or(var("ALEART_PRELOAD_MODEL"), true),
            record_unowned: flag_or(var("ALEART_RECORD_UNOWNED"), false),
            log_level: var("ALEART_LOG").unwrap_or_else(|| "info".to_owned()),
            log_json: flag_or(var("ALEART_LOG_JSON"), false),
            cors_allowed_origins: var("ALEART_CORS_ORIGINS"),
            enable_swagger: flag_or(var("ALEART_ENABLE_SWAGGER"), true),
        }
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn flag_or(value: Option<String>, default: bool) -> bool {
    match value.as_deref().map(str::trim) {
        Some(v) if v == "1" || v.eq_ignore_ascii_case("true") => true,
        Some(v) if v == "0" || v.eq_ignore_ascii_case("false") => false,
        _ => default,
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use super::*;

    fn config(pairs: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_apply_without_environment() {
        let c = config(&[]);
        assert_eq!(c.bind_address, "0.0.0.0:8000");
        assert_eq!(c.database_url, "sqlite://aleart.db");
        assert_eq!(c.artifact_dir, PathBuf::from("generated_images"));
        assert_eq!(c.synth_timeout, Duration::from_secs(600));
        assert!(c.preload_model && c.enable_swagger);
        assert!(!c.record_unowned && !c.log_json);
        assert!(c.synth_model.is_none() && c.cors_allowed_origins.is_none());
    }

    #[test]
    fn environment_overrides_defaults() {
        let c = config(&[
            ("ALEART_BIND", "127.0.0.1:9000"),
            ("ALEART_SYNTH_TIMEOUT_SECS", "30"),
            ("ALEART_PRELOAD_MODEL", "false"),
            ("ALEART_RECORD_UNOWNED", "1"),
            ("ALEART_SYNTH_MODEL", "v1-5-pruned-emaonly.safetensors"),
        ]);
        assert_eq!(c.bind_address, "127.0.0.1:9000");
        assert_eq!(c.synth_timeout, Duration::from_secs(30));
        assert!(!c.preload_model);
        assert!(c.record_unowned);
        assert_eq!(c.synth_model.as_deref(), Some("v1-5-pruned-emaonly.safetensors"));
    }

    #[test]
    fn malformed_values_fall_back() {
        let c = config(&[("ALEART_SYNTH_TIMEOUT_SECS", "soon"), ("ALEART_LOG_JSON", "maybe")]);
        assert_eq!(c.synth_timeout, Duration::from_secs(600));
        assert!(!c.log_json);
    }
}

use std::time::Duration;

use marketplace_common::llm::{LlmClientConfig, LlmProvider};
use marketplace_common::search::DEFAULT_THRESHOLD;
use marketplace_common::supabase::SupabaseConfig;

use crate::error::AppError;

const DEFAULT_BUCKET: &str = "project-files";
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:5000";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Service configuration, read once at startup and handed to each collaborator.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: String,
    pub supabase: SupabaseConfig,
    pub llm: LlmClientConfig,
    /// Redis connection URL. `None` disables response caching.
    pub redis_url: Option<String>,
    pub search_threshold: u8,
    /// Requests per second allowed on AI routes. `None` disables limiting.
    pub rate_limit_rps: Option<u32>,
    /// Largest accepted project upload body, in bytes.
    pub max_upload_bytes: usize,
}

impl Config {
    /// Load configuration from the process environment (after `.env`, if present).
    ///
    /// Required:
    /// - `SUPABASE_URL`
    /// - `SUPABASE_ANON_KEY`
    ///
    /// Optional:
    /// - `SUPABASE_SERVICE_ROLE_KEY`, `SUPABASE_BUCKET_NAME` (default "project-files")
    /// - `LLM_PROVIDER` (gemini | openrouter | ollama, default gemini)
    /// - `GEMINI_API_KEY`, `GEMINI_MODEL`
    /// - `OPENROUTER_API_KEY`, `OPENROUTER_MODEL`
    /// - `OLLAMA_BASE_URL`, `OLLAMA_MODEL`
    /// - `LLM_TIMEOUT_SECS` (default 30), `LLM_MAX_RETRIES` (default 3)
    /// - `REDIS_URL`, `SEARCH_THRESHOLD` (default 60), `RATE_LIMIT_RPS`
    /// - `MAX_UPLOAD_BYTES` (default 50 MiB)
    /// - `LISTEN_ADDR` (default "0.0.0.0:5000")
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &str| {
            var(key).ok_or_else(|| AppError::Config(format!("{key} environment variable is required")))
        };

        let supabase = SupabaseConfig {
            url: required("SUPABASE_URL")?,
            anon_key: required("SUPABASE_ANON_KEY")?,
            service_role_key: var("SUPABASE_SERVICE_ROLE_KEY"),
            bucket: var("SUPABASE_BUCKET_NAME").unwrap_or_else(|| DEFAULT_BUCKET.to_string()),
            timeout: Duration::from_secs(30),
        };

        let provider = match var("LLM_PROVIDER") {
            Some(name) => LlmProvider::parse(&name)
                .ok_or_else(|| AppError::Config(format!("unknown LLM_PROVIDER: {name}")))?,
            None => LlmProvider::Gemini,
        };
        let mut llm = LlmClientConfig::new(provider);
        match provider {
            LlmProvider::Gemini => {
                llm.api_key = Some(required("GEMINI_API_KEY")?);
                if let Some(model) = var("GEMINI_MODEL") {
                    llm.model = model;
                }
            }
            LlmProvider::OpenRouter => {
                llm.api_key = Some(required("OPENROUTER_API_KEY")?);
                if let Some(model) = var("OPENROUTER_MODEL") {
                    llm.model = model;
                }
            }
            LlmProvider::Ollama => {
                if let Some(url) = var("OLLAMA_BASE_URL") {
                    llm.base_url = url;
                }
                if let Some(model) = var("OLLAMA_MODEL") {
                    llm.model = model;
                }
            }
        }
        if let Some(secs) = parse_var::<u64>(&var, "LLM_TIMEOUT_SECS")? {
            llm.default_timeout = Duration::from_secs(secs);
        }
        if let Some(retries) = parse_var::<u32>(&var, "LLM_MAX_RETRIES")? {
            llm.max_retries = retries;
        }

        let search_threshold = parse_var::<u8>(&var, "SEARCH_THRESHOLD")?.unwrap_or(DEFAULT_THRESHOLD);
        if search_threshold > 100 {
            return Err(AppError::Config(format!(
                "SEARCH_THRESHOLD must be within 0..=100, got {search_threshold}"
            )));
        }

        Ok(Self {
            listen_addr: var("LISTEN_ADDR").unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string()),
            supabase,
            llm,
            redis_url: var("REDIS_URL"),
            search_threshold,
            rate_limit_rps: parse_var::<u32>(&var, "RATE_LIMIT_RPS")?.filter(|&n| n > 0),
            max_upload_bytes: parse_var::<usize>(&var, "MAX_UPLOAD_BYTES")?
                .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
        })
    }
}

fn parse_var<T: std::str::FromStr>(
    var: &dyn Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, AppError> {
    var(key)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|_| AppError::Config(format!("{key} has an invalid value: {raw}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(pairs: &[(&str, &str)]) -> Result<Config, AppError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| env.get(k).cloned())
    }

    const BASE: [(&str, &str); 3] = [
        ("SUPABASE_URL", "https://abc.supabase.co"),
        ("SUPABASE_ANON_KEY", "anon"),
        ("GEMINI_API_KEY", "g-key"),
    ];

    #[test]
    fn test_defaults() {
        let config = load(&BASE).unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:5000");
        assert_eq!(config.supabase.bucket, "project-files");
        assert_eq!(config.llm.provider, LlmProvider::Gemini);
        assert_eq!(config.llm.model, "gemini-1.5-flash");
        assert_eq!(config.llm.api_key.as_deref(), Some("g-key"));
        assert_eq!(config.search_threshold, 60);
        assert!(config.redis_url.is_none());
        assert!(config.rate_limit_rps.is_none());
        assert_eq!(config.max_upload_bytes, 50 * 1024 * 1024);
    }

    #[test]
    fn test_missing_required() {
        let err = load(&[("SUPABASE_URL", "https://abc.supabase.co")]).unwrap_err();
        assert!(err.to_string().contains("SUPABASE_ANON_KEY"));

        let err = load(&BASE[..2]).unwrap_err();
        assert!(err.to_string().contains("GEMINI_API_KEY"));
    }

    #[test]
    fn test_ollama_needs_no_key() {
        let config = load(&[
            ("SUPABASE_URL", "https://abc.supabase.co"),
            ("SUPABASE_ANON_KEY", "anon"),
            ("LLM_PROVIDER", "ollama"),
            ("OLLAMA_BASE_URL", "http://ai:11434/v1"),
            ("OLLAMA_MODEL", "mistral"),
        ])
        .unwrap();
        assert_eq!(config.llm.provider, LlmProvider::Ollama);
        assert_eq!(config.llm.base_url, "http://ai:11434/v1");
        assert_eq!(config.llm.model, "mistral");
        assert!(config.llm.api_key.is_none());
    }

    #[test]
    fn test_numeric_overrides() {
        let mut pairs = BASE.to_vec();
        pairs.extend([
            ("SEARCH_THRESHOLD", "75"),
            ("RATE_LIMIT_RPS", "0"),
            ("LLM_MAX_RETRIES", "1"),
            ("LLM_TIMEOUT_SECS", "5"),
            ("MAX_UPLOAD_BYTES", "1048576"),
        ]);
        let config = load(&pairs).unwrap();
        assert_eq!(config.search_threshold, 75);
        assert!(config.rate_limit_rps.is_none());
        assert_eq!(config.llm.max_retries, 1);
        assert_eq!(config.llm.default_timeout, Duration::from_secs(5));
        assert_eq!(config.max_upload_bytes, 1024 * 1024);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut pairs = BASE.to_vec();
        pairs.push(("SEARCH_THRESHOLD", "high"));
        assert!(load(&pairs).is_err());

        let mut pairs = BASE.to_vec();
        pairs.push(("SEARCH_THRESHOLD", "150"));
        assert!(load(&pairs).is_err());

        let mut pairs = BASE.to_vec();
        pairs.push(("LLM_PROVIDER", "gpt"));
        assert!(load(&pairs).is_err());
    }
}

use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::analysis::PipelineSettings;
use crate::export::ExportMode;
use crate::llm_client::DEFAULT_BASE_URL;
use crate::rate_limit::QuotaLimits;

/// Application configuration loaded from environment variables.
/// Startup fails if a required variable is missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub default_model: String,
    pub max_requests_per_hour: u32,
    pub max_requests_per_day: u32,
    pub max_tokens_per_request: u32,
    pub temperature: f32,
    pub llm_timeout: Duration,
    pub export_strict: bool,
    pub charge_failed_calls: bool,
    pub trust_forwarded_for: bool,
    pub max_upload_bytes: usize,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let openai_api_key = lookup("OPENAI_API_KEY")
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .context("Required environment variable 'OPENAI_API_KEY' is not set")?;
        if !openai_api_key.starts_with("sk-") || openai_api_key.chars().any(char::is_whitespace) {
            bail!("OPENAI_API_KEY is malformed (expected a key starting with 'sk-')");
        }

        let temperature: f32 = parse_or(&lookup, "TEMPERATURE", 0.7)?;
        if !(0.0..=2.0).contains(&temperature) {
            bail!("TEMPERATURE must be between 0.0 and 2.0, got {temperature}");
        }

        let max_requests_per_hour: u32 = parse_or(&lookup, "MAX_REQUESTS_PER_HOUR", 5)?;
        let max_requests_per_day: u32 = parse_or(&lookup, "MAX_REQUESTS_PER_DAY", 20)?;
        if max_requests_per_hour == 0 || max_requests_per_day == 0 {
            bail!("MAX_REQUESTS_PER_HOUR and MAX_REQUESTS_PER_DAY must be at least 1");
        }

        let timeout_secs: u64 = parse_or(&lookup, "LLM_TIMEOUT_SECS", 120)?;
        if timeout_secs == 0 {
            bail!("LLM_TIMEOUT_SECS must be at least 1");
        }

        Ok(Config {
            openai_api_key,
            openai_base_url: lookup("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            default_model: lookup("DEFAULT_MODEL")
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| "gpt-3.5-turbo".to_string()),
            max_requests_per_hour,
            max_requests_per_day,
            max_tokens_per_request: parse_or(&lookup, "MAX_TOKENS_PER_REQUEST", 3000)?,
            temperature,
            llm_timeout: Duration::from_secs(timeout_secs),
            export_strict: flag(&lookup, "EXPORT_STRICT")?,
            charge_failed_calls: flag(&lookup, "CHARGE_FAILED_CALLS")?,
            trust_forwarded_for: flag(&lookup, "TRUST_FORWARDED_FOR")?,
            max_upload_bytes: parse_or(&lookup, "MAX_UPLOAD_BYTES", 10 * 1024 * 1024)?,
            port: parse_or(&lookup, "PORT", 8080).context("PORT must be a valid port number")?,
            rust_log: lookup("RUST_LOG").unwrap_or_else(|| "info".to_string()),
        })
    }

    pub fn quota_limits(&self) -> QuotaLimits {
        QuotaLimits {
            max_per_hour: self.max_requests_per_hour,
            max_per_day: self.max_requests_per_day,
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            max_output_tokens: self.max_tokens_per_request,
            temperature: self.temperature,
            charge_failed_calls: self.charge_failed_calls,
        }
    }

    pub fn export_mode(&self) -> ExportMode {
        if self.export_strict {
            ExportMode::Strict
        } else {
            ExportMode::Lenient
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{key} is invalid ('{raw}'): {e}")),
    }
}

fn flag<F>(lookup: &F, key: &str) -> Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(false),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "" | "0" | "false" | "no" | "off" => Ok(false),
            _ => bail!("{key} must be a boolean, got '{v}'"),
        },
    }
}

#[cfg(test)]
impl Config {
    /// Config for router tests; no environment access.
    pub fn for_tests() -> Self {
        Self::from_lookup(|key| match key {
            "OPENAI_API_KEY" => Some("sk-test-key".to_string()),
            _ => None,
        })
        .expect("test config")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("OPENAI_API_KEY", "sk-abc")]).unwrap();
        assert_eq!(config.default_model, "gpt-3.5-turbo");
        assert_eq!(config.quota_limits(), QuotaLimits::default());
        assert_eq!(config.max_tokens_per_request, 3000);
        assert!((config.temperature - 0.7).abs() < f32::EPSILON);
        assert_eq!(config.llm_timeout, Duration::from_secs(120));
        assert_eq!(config.export_mode(), ExportMode::Lenient);
        assert!(!config.charge_failed_calls);
        assert!(!config.trust_forwarded_for);
        assert_eq!(config.max_upload_bytes, 10_485_760);
        assert_eq!(config.port, 8080);
        assert_eq!(config.openai_base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_missing_or_malformed_key_is_fatal() {
        assert!(load(&[]).is_err());
        assert!(load(&[("OPENAI_API_KEY", "   ")]).is_err());
        assert!(load(&[("OPENAI_API_KEY", "your-key-here")]).is_err());
        assert!(load(&[("OPENAI_API_KEY", "sk-abc def")]).is_err());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("OPENAI_API_KEY", "sk-abc"),
            ("MAX_REQUESTS_PER_HOUR", "2"),
            ("MAX_REQUESTS_PER_DAY", "7"),
            ("TEMPERATURE", "0.2"),
            ("EXPORT_STRICT", "true"),
            ("CHARGE_FAILED_CALLS", "1"),
            ("PORT", "9000"),
        ])
        .unwrap();
        assert_eq!(config.quota_limits().max_per_hour, 2);
        assert_eq!(config.quota_limits().max_per_day, 7);
        assert_eq!(config.export_mode(), ExportMode::Strict);
        assert!(config.pipeline_settings().charge_failed_calls);
        assert_eq!(config.port, 9000);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(load(&[("OPENAI_API_KEY", "sk-abc"), ("TEMPERATURE", "3.5")]).is_err());
        assert!(load(&[("OPENAI_API_KEY", "sk-abc"), ("MAX_REQUESTS_PER_HOUR", "0")]).is_err());
        assert!(load(&[("OPENAI_API_KEY", "sk-abc"), ("PORT", "eighty")]).is_err());
        assert!(load(&[("OPENAI_API_KEY", "sk-abc"), ("EXPORT_STRICT", "maybe")]).is_err());
    }
}

//! Carga y gestión de configuración de la aplicación (servidor + Gemini).

use std::env;
use anyhow::{anyhow, Context, Result};
use url::Url;

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com";

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,
    pub open_browser: bool,
    pub max_upload_bytes: usize,

    /// `None` no impide arrancar: cada generación falla con error de
    /// configuración hasta que se defina la clave.
    pub api_key: Option<String>,
    pub api_base: Url,
    pub model: String,
    pub request_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:3322".to_string(),
            open_browser: true,
            max_upload_bytes: 20 * 1024 * 1024,
            api_key: None,
            api_base: Url::parse(DEFAULT_API_BASE).expect("URL base por defecto válida"),
            model: DEFAULT_MODEL.to_string(),
            request_timeout_secs: 120,
        }
    }
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Igual que `from_env` pero con una fuente de variables arbitraria.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let server_addr = var("SERVER_ADDR").unwrap_or(defaults.server_addr);

        let open_browser = match var("OPEN_BROWSER") {
            Some(v) => parse_bool(&v).ok_or_else(|| anyhow!("OPEN_BROWSER no válido: {v}"))?,
            None => defaults.open_browser,
        };

        let max_upload_bytes = match var("MAX_UPLOAD_MB") {
            Some(v) => {
                let mb: usize = v
                    .parse()
                    .with_context(|| format!("MAX_UPLOAD_MB no es un número: {v}"))?;
                mb.checked_mul(1024 * 1024)
                    .ok_or_else(|| anyhow!("MAX_UPLOAD_MB demasiado grande: {v}"))?
            }
            None => defaults.max_upload_bytes,
        };

        let api_key = var("GEMINI_API_KEY").or_else(|| var("API_KEY"));

        let api_base = match var("GEMINI_API_BASE") {
            Some(v) => Url::parse(&v).with_context(|| format!("GEMINI_API_BASE no es una URL válida: {v}"))?,
            None => defaults.api_base,
        };

        let model = var("GEMINI_MODEL").unwrap_or(defaults.model);

        let request_timeout_secs = match var("REQUEST_TIMEOUT_SECS") {
            Some(v) => v
                .parse()
                .with_context(|| format!("REQUEST_TIMEOUT_SECS no es un número: {v}"))?,
            None => defaults.request_timeout_secs,
        };

        Ok(Self {
            server_addr,
            open_browser,
            max_upload_bytes,
            api_key,
            api_base,
            model,
            request_timeout_secs,
        })
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_without_environment() {
        let cfg = config_from(&[]).unwrap();
        assert_eq!(cfg.server_addr, "127.0.0.1:3322");
        assert_eq!(cfg.model, DEFAULT_MODEL);
        assert!(cfg.api_key.is_none());
        assert_eq!(cfg.max_upload_bytes, 20 * 1024 * 1024);
    }

    #[test]
    fn api_key_falls_back_to_generic_variable() {
        let cfg = config_from(&[("API_KEY", "abc")]).unwrap();
        assert_eq!(cfg.api_key.as_deref(), Some("abc"));

        let cfg = config_from(&[("API_KEY", "abc"), ("GEMINI_API_KEY", "xyz")]).unwrap();
        assert_eq!(cfg.api_key.as_deref(), Some("xyz"));
    }

    #[test]
    fn blank_api_key_counts_as_missing() {
        let cfg = config_from(&[("GEMINI_API_KEY", "   ")]).unwrap();
        assert!(cfg.api_key.is_none());
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(config_from(&[("MAX_UPLOAD_MB", "mucho")]).is_err());
        assert!(config_from(&[("GEMINI_API_BASE", "no es url")]).is_err());
        assert!(config_from(&[("OPEN_BROWSER", "quizá")]).is_err());
    }

    #[test]
    fn oversized_upload_limit_is_rejected() {
        let huge = usize::MAX.to_string();
        let err = config_from(&[("MAX_UPLOAD_MB", huge.as_str())]).unwrap_err();
        assert!(err.to_string().contains("demasiado grande"));

        let config = config_from(&[("MAX_UPLOAD_MB", "5")]).unwrap();
        assert_eq!(config.max_upload_bytes, 5 * 1024 * 1024);
    }
}

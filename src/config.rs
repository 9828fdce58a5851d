//! Application configuration management.
//!
//! This module handles loading configuration from environment variables.
//! It uses the `envy` crate to deserialize environment variables into a type-safe struct,
//! after `dotenvy` has merged an optional `.env` file into the process environment.

use serde::Deserialize;

/// Application configuration loaded from environment variables.
///
/// # Environment Variables
///
/// - `DATABASE_URL` (required): PostgreSQL connection string
/// - `SERVER_PORT` (optional): HTTP server port, defaults to 3000
/// - `VEND_BASE_URL`, `VEND_TOKEN` (required): POS API
/// - `XERO_TENANT_ID`, `XERO_ACCESS_TOKEN` (required): payroll API
/// - `PAYMENT_GATEWAY_URL`, `PAYMENT_GATEWAY_SECRET` (required): card gateway
/// - `OPENAI_API_KEY` (optional): smart replies are disabled without it
///
/// Everything else has a default, see the `default_*` functions below.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,

    #[serde(default = "default_port")]
    pub server_port: u16,

    #[serde(default = "default_max_connections")]
    pub database_max_connections: u32,

    /// POS (Vend/Lightspeed) API base, e.g. `https://store.vendhq.com/api/2.0`
    pub vend_base_url: String,
    pub vend_token: String,

    /// Payment type used when recording staff-account payments on the POS
    #[serde(default = "default_vend_payment_type_id")]
    pub vend_payment_type_id: String,

    #[serde(default = "default_xero_base_url")]
    pub xero_base_url: String,
    pub xero_tenant_id: String,
    pub xero_access_token: String,

    pub payment_gateway_url: String,

    /// Used both as the gateway API secret and the callback HMAC key
    pub payment_gateway_secret: String,

    #[serde(default)]
    pub openai_api_key: Option<String>,

    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,

    #[serde(default = "default_openai_model")]
    pub openai_model: String,

    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: String,

    #[serde(default = "default_id_upload_dir")]
    pub id_upload_dir: String,

    #[serde(default = "default_tesseract_bin")]
    pub tesseract_bin: String,

    /// Push consignment state changes to the POS
    #[serde(default)]
    pub consignment_sync_enabled: bool,

    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

fn default_port() -> u16 {
    3000
}

fn default_max_connections() -> u32 {
    5
}

fn default_vend_payment_type_id() -> String {
    "3".to_string()
}

fn default_xero_base_url() -> String {
    "https://api.xero.com/payroll.xro/2.0".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_openai_model() -> String {
    "gpt-4-turbo-preview".to_string()
}

fn default_snapshot_dir() -> String {
    "./snapshots".to_string()
}

fn default_id_upload_dir() -> String {
    "./uploads/id".to_string()
}

fn default_tesseract_bin() -> String {
    "tesseract".to_string()
}

fn default_http_timeout_secs() -> u64 {
    30
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// This method first attempts to load a `.env` file (which is optional),
    /// then reads environment variables and deserializes them into a Config struct.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Required environment variables are missing (e.g., DATABASE_URL)
    /// - Environment variable values cannot be parsed into expected types
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();

        // Field names are converted automatically: vend_base_url -> VEND_BASE_URL
        envy::from_env::<Config>()
    }

    /// Parse configuration from an explicit list of variables.
    ///
    /// Same rules as [`Config::from_env`] without touching the process environment.
    pub fn from_pairs<I>(pairs: I) -> Result<Self, envy::Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::from_iter::<_, Config>(pairs)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn required_pairs() -> Vec<(String, String)> {
        [
            ("DATABASE_URL", "postgres://localhost/backoffice"),
            ("VEND_BASE_URL", "https://store.vendhq.com/api/2.0"),
            ("VEND_TOKEN", "vend-token"),
            ("XERO_TENANT_ID", "tenant"),
            ("XERO_ACCESS_TOKEN", "xero-token"),
            ("PAYMENT_GATEWAY_URL", "https://gateway.example.com"),
            ("PAYMENT_GATEWAY_SECRET", "gateway-secret"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    /// Config suitable for unit tests that never touch the network.
    pub(crate) fn test_config() -> Config {
        Config::from_pairs(required_pairs()).unwrap()
    }

    #[test]
    fn test_defaults_applied() {
        let config = test_config();

        assert_eq!(config.server_port, 3000);
        assert_eq!(config.database_max_connections, 5);
        assert_eq!(config.vend_payment_type_id, "3");
        assert_eq!(config.openai_model, "gpt-4-turbo-preview");
        assert!(config.openai_api_key.is_none());
        assert!(!config.consignment_sync_enabled);
        assert_eq!(config.http_timeout_secs, 30);
    }

    #[test]
    fn test_overrides_parsed() {
        let mut pairs = required_pairs();
        pairs.push(("SERVER_PORT".to_string(), "8080".to_string()));
        pairs.push(("CONSIGNMENT_SYNC_ENABLED".to_string(), "true".to_string()));
        pairs.push(("OPENAI_API_KEY".to_string(), "sk-test".to_string()));

        let config = Config::from_pairs(pairs).unwrap();

        assert_eq!(config.server_port, 8080);
        assert!(config.consignment_sync_enabled);
        assert_eq!(config.openai_api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn test_missing_required_variable_fails() {
        let pairs: Vec<(String, String)> = required_pairs()
            .into_iter()
            .filter(|(k, _)| k != "VEND_TOKEN")
            .collect();

        assert!(Config::from_pairs(pairs).is_err());
    }
}

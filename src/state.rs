//! Shared router state.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::FromRef;

use crate::clients::{self, ClientError, gateway::GatewayClient, llm::LlmClient, vend::VendClient, xero::XeroClient};
use crate::config::Config;
use crate::db::DbPool;
use crate::rate_limit::AttemptLimiter;

/// Card payments allowed per staff member per window.
const PAYMENT_ATTEMPTS: usize = 3;
const PAYMENT_WINDOW: Duration = Duration::from_secs(300);

/// Everything handlers need. `FromRef` lets a handler take `State<DbPool>`
/// or `State<VendClient>` directly.
#[derive(Clone, FromRef)]
pub struct AppState {
    pub pool: DbPool,
    pub config: Arc<Config>,
    pub vend: VendClient,
    pub xero: XeroClient,
    pub gateway: GatewayClient,

    /// `None` when no LLM key is configured
    pub llm: Option<LlmClient>,

    pub payment_limiter: AttemptLimiter,
}

impl AppState {
    pub fn build(pool: DbPool, config: Config) -> Result<Self, ClientError> {
        let http = clients::build_http_client(config.http_timeout_secs)?;

        let vend = VendClient::new(http.clone(), &config.vend_base_url, config.vend_token.clone())?;
        let xero = XeroClient::new(
            http.clone(),
            &config.xero_base_url,
            config.xero_tenant_id.clone(),
            config.xero_access_token.clone(),
        )?;
        let gateway = GatewayClient::new(
            http.clone(),
            &config.payment_gateway_url,
            config.payment_gateway_secret.clone(),
        )?;

        let llm = match config.openai_api_key.as_deref().filter(|k| !k.trim().is_empty()) {
            Some(key) => Some(LlmClient::new(
                http,
                &config.openai_base_url,
                key,
                config.openai_model.clone(),
            )?),
            None => {
                tracing::warn!("OPENAI_API_KEY not set, smart replies disabled");
                None
            }
        };

        Ok(Self {
            pool,
            config: Arc::new(config),
            vend,
            xero,
            gateway,
            llm,
            payment_limiter: AttemptLimiter::new(PAYMENT_ATTEMPTS, PAYMENT_WINDOW),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// State over a pool that never connects, for router tests.
    pub(crate) fn lazy_state() -> AppState {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();
        AppState::build(pool, crate::config::tests::test_config()).unwrap()
    }

    #[tokio::test]
    async fn test_build_without_llm_key() {
        let state = lazy_state();
        assert!(state.llm.is_none());
        assert_eq!(state.config.server_port, 3000);
    }
}

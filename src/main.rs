//! Staff Back-Office Service - Main Application Entry Point
//!
//! REST API for store back-office work: staff account deductions and
//! payments, consignments between outlets, and the staff email/CRM hub.
//!
//! # Architecture
//!
//! - **Web Framework**: Axum (async HTTP server)
//! - **Database**: PostgreSQL with sqlx (async queries)
//! - **Upstreams**: POS, payroll, card gateway and an optional LLM over reqwest
//! - **Authentication**: staff API key with SHA-256 hashing
//! - **Format**: JSON requests/responses
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment variables
//! 2. Create database connection pool
//! 3. Run database migrations
//! 4. Build shared state (upstream clients, rate limiter)
//! 5. Build HTTP router with routes and middleware
//! 6. Start server on configured port

mod clients;
mod config;
mod db;
mod error;
mod handlers;
mod middleware;
mod models;
mod rate_limit;
mod services;
mod state;

use tracing_subscriber::EnvFilter;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post, put},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Reads RUST_LOG (defaults to "info" level)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = config::Config::from_env()?;
    tracing::info!("Configuration loaded");

    let pool = db::create_pool(&config.database_url, config.database_max_connections).await?;
    tracing::info!("Database pool created");

    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    let addr = format!("0.0.0.0:{}", config.server_port);
    let state = AppState::build(pool, config)?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

fn build_router(state: AppState) -> Router {
    use handlers::{
        credit_limits, crm, deductions, email_features, health, id_verification, mappings, payments, payroll,
        reconciliation, search, smart_replies, snapshots, transfers,
    };

    let authenticated_routes = Router::new()
        // Deductions and allocations
        .route("/api/v1/deductions", get(deductions::list_pending))
        .route("/api/v1/deductions/failed", get(deductions::list_failed))
        .route("/api/v1/deductions/summary", get(deductions::pending_summary))
        .route("/api/v1/deductions/allocate-pending", post(deductions::allocate_pending))
        .route("/api/v1/deductions/{id}/allocate", post(deductions::allocate))
        .route("/api/v1/deductions/{id}/retry", post(deductions::retry))
        .route("/api/v1/customers/{vend_id}/allocate", post(deductions::allocate_customer))
        .route("/api/v1/customers/{vend_id}/retry-failed", post(deductions::retry_customer_failed))
        .route("/api/v1/customers/{vend_id}/allocations", get(deductions::customer_allocations))
        .route("/api/v1/allocations/stats", get(deductions::stats))
        .route("/api/v1/allocations/recent", get(deductions::recent))
        .route("/api/v1/allocations/success-rate", get(deductions::success_rate))
        // Payroll
        .route("/api/v1/payroll/sync", post(payroll::sync))
        .route("/api/v1/payroll/summary", get(payroll::summary))
        .route("/api/v1/payroll/mark-cached", post(payroll::mark_cached))
        // Employee mappings
        .route("/api/v1/mappings", get(mappings::list).post(mappings::create))
        .route("/api/v1/mappings/unmapped", get(mappings::unmapped))
        .route("/api/v1/mappings/stats", get(mappings::stats))
        .route("/api/v1/mappings/suggestions", get(mappings::suggestions))
        .route("/api/v1/mappings/auto-match", post(mappings::auto_match))
        .route("/api/v1/mappings/validate", post(mappings::validate))
        .route("/api/v1/mappings/bulk-approve", post(mappings::bulk_approve))
        .route(
            "/api/v1/mappings/{id}",
            get(mappings::get).put(mappings::update).delete(mappings::delete),
        )
        .route("/api/v1/mappings/{id}/approve", post(mappings::approve))
        .route("/api/v1/mappings/{id}/reject", post(mappings::reject))
        // Credit limits
        .route(
            "/api/v1/credit-limits/default",
            get(credit_limits::get_default).put(credit_limits::set_default),
        )
        .route("/api/v1/credit-limits/apply-default", post(credit_limits::apply_default))
        .route("/api/v1/credit-limits/bulk", post(credit_limits::bulk))
        .route("/api/v1/credit-limits/sync-all", post(credit_limits::sync_all))
        .route("/api/v1/credit-limits/report", get(credit_limits::report))
        .route(
            "/api/v1/credit-limits/{id}",
            get(credit_limits::get_limit).put(credit_limits::set_limit),
        )
        .route("/api/v1/credit-limits/{id}/revert", post(credit_limits::revert))
        .route("/api/v1/credit-limits/{id}/sync", post(credit_limits::sync_one))
        .route("/api/v1/credit-limits/{id}/history", get(credit_limits::history))
        // Reconciliation
        .route("/api/v1/reconciliation/run", post(reconciliation::run_all))
        .route("/api/v1/reconciliation/summary", get(reconciliation::summary))
        .route("/api/v1/reconciliation/{id}", post(reconciliation::reconcile_one))
        .route("/api/v1/reconciliation/{id}/refresh", post(reconciliation::refresh))
        // Staff payments
        .route("/api/v1/payments", get(payments::history).post(payments::create))
        // Payroll snapshots
        .route("/api/v1/snapshots", get(snapshots::list))
        .route("/api/v1/snapshots/aggregate", get(snapshots::aggregate))
        .route("/api/v1/snapshots/diff", get(snapshots::diff))
        // Consignments
        .route("/api/v1/transfers", get(transfers::list).post(transfers::create))
        .route("/api/v1/transfers/stats", get(transfers::stats))
        .route("/api/v1/transfers/{id}", get(transfers::get))
        .route("/api/v1/transfers/{id}/items", post(transfers::add_item))
        .route(
            "/api/v1/transfers/{id}/items/{item_id}",
            put(transfers::update_item).delete(transfers::remove_item),
        )
        .route("/api/v1/transfers/{id}/items/{item_id}/receive", post(transfers::receive_item))
        .route("/api/v1/transfers/{id}/open", post(transfers::open))
        .route("/api/v1/transfers/{id}/send", post(transfers::send))
        .route("/api/v1/transfers/{id}/receiving", post(transfers::receiving))
        .route("/api/v1/transfers/{id}/receive-all", post(transfers::receive_all))
        .route("/api/v1/transfers/{id}/cancel", post(transfers::cancel))
        .route("/api/v1/transfers/{id}/notes", post(transfers::add_note))
        .route("/api/v1/transfers/{id}/events", get(transfers::events))
        .route("/api/v1/products/search", get(transfers::search_products))
        // Customer hub
        .route("/api/v1/crm/customers", get(crm::list))
        .route("/api/v1/crm/customers/search", get(crm::search))
        .route("/api/v1/crm/customers/{id}", get(crm::get).patch(crm::update))
        .route("/api/v1/crm/customers/{id}/emails", get(crm::emails))
        .route("/api/v1/crm/customers/{id}/purchases", get(crm::purchases))
        .route(
            "/api/v1/crm/customers/{id}/communications",
            get(crm::communications).post(crm::record_communication),
        )
        .route("/api/v1/crm/customers/{id}/notes", post(crm::add_note))
        .route("/api/v1/crm/customers/{id}/flag", post(crm::flag))
        .route("/api/v1/crm/customers/{id}/unflag", post(crm::unflag))
        .route("/api/v1/crm/customers/{id}/vip", post(crm::set_vip))
        .route("/api/v1/crm/customers/{id}/tags", post(crm::add_tag))
        // ID verification
        .route(
            "/api/v1/crm/customers/{id}/id-verification",
            get(id_verification::latest).post(id_verification::upload),
        )
        .route("/api/v1/id-verifications/{id}/approve", post(id_verification::approve))
        .route("/api/v1/id-verifications/{id}/reject", post(id_verification::reject))
        // Search
        .route("/api/v1/search", get(search::search))
        .route("/api/v1/search/recent", get(search::recent))
        .route("/api/v1/search/popular", get(search::popular))
        // Smart replies
        .route(
            "/api/v1/emails/{id}/smart-replies",
            get(smart_replies::list).post(smart_replies::generate),
        )
        .route("/api/v1/smart-replies/metrics", get(smart_replies::metrics))
        .route("/api/v1/smart-replies/{id}/use", post(smart_replies::use_suggestion))
        .route("/api/v1/smart-replies/{id}/feedback", post(smart_replies::feedback))
        // Mailbox
        .route(
            "/api/v1/email-templates",
            get(email_features::templates).post(email_features::create_template),
        )
        .route("/api/v1/emails/{id}/reminders", post(email_features::add_reminder))
        .route("/api/v1/emails/{id}/flag", post(email_features::flag))
        .route("/api/v1/emails/{id}/unflag", post(email_features::unflag))
        .route("/api/v1/reminders/due", get(email_features::due_reminders))
        .route("/api/v1/inbox/priority", get(email_features::priority_inbox))
        // Apply authentication middleware to all routes in this group
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::auth_middleware,
        ));

    Router::new()
        // Public routes (no authentication required)
        .route("/health", get(health::health_check))
        .route("/api/v1/payments/callback", post(payments::callback))
        .merge(authenticated_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_callback_with_bad_signature_is_unauthorized() {
        let app = build_router(state::tests::lazy_state());

        let response = app
            .oneshot(
                Request::post("/api/v1/payments/callback")
                    .header("content-type", "application/json")
                    .header(clients::gateway::SIGNATURE_HEADER, "deadbeef")
                    .body(Body::from(r#"{"reference":"TXN-1","status":"success"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_protected_route_without_key_is_unauthorized() {
        let app = build_router(state::tests::lazy_state());

        let response = app
            .oneshot(Request::get("/api/v1/transfers").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let app = build_router(state::tests::lazy_state());

        let response = app
            .oneshot(Request::get("/api/v2/nothing").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

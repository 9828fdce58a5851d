//! Universal search HTTP handlers.

use super::LimitQuery;
use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::search::{PopularParams, PopularSearch, RecentSearch, SearchParams, SearchResponse},
    services::search_service,
    state::AppState,
};
use axum::{
    Extension, Json,
    extract::{Query, State},
};

/// Search emails, products, orders and customers in one query.
///
/// # Endpoint
///
/// `GET /api/v1/search?q=<text>&context=<emails|products|orders|customers|all>`
///
/// The context is detected from the query when not given. Filters such
/// as `status:` or `last week` are pulled out of the text.
///
/// # Response
///
/// ```json
/// {
///   "query": "refund ORD-12345 last week",
///   "context": "orders",
///   "results": [ ... ],
///   "grouped": { "orders": [ ... ] },
///   "total_results": 3,
///   "response_time_ms": 12.4,
///   "keywords": [ ... ],
///   "entities": { "order_id": ["ORD-12345"] },
///   "filters": { "date": "last_week" }
/// }
/// ```
pub async fn search(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, AppError> {
    let response = search_service::search(&state.pool, auth.staff_id, &params.q, params.context.as_deref()).await?;
    Ok(Json(response))
}

pub async fn recent(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(params): Query<LimitQuery>,
) -> Result<Json<Vec<RecentSearch>>, AppError> {
    Ok(Json(
        search_service::recent_searches(&state.pool, auth.staff_id, params.limit(10)).await?,
    ))
}

pub async fn popular(
    State(state): State<AppState>,
    Query(params): Query<PopularParams>,
) -> Result<Json<Vec<PopularSearch>>, AppError> {
    let days = params.days.unwrap_or(7).clamp(1, 365);
    let limit = params.limit.unwrap_or(10).clamp(1, 100);
    Ok(Json(search_service::popular_searches(&state.pool, days, limit).await?))
}

//! Universal search across emails, products, orders and customers.
//!
//! A query is tokenized, expanded with synonyms and scanned for entities
//! (email addresses, phone numbers, order ids, SKUs, invoices, amounts).
//! The detected context decides which tables are searched; hits are then
//! ranked with a weighted heuristic and every search is recorded for the
//! recent/popular lists.

use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use uuid::Uuid;

use crate::db::{DbPool, contains_pattern};
use crate::error::AppError;
use crate::models::search::{
    ParsedQuery, PopularSearch, RecentSearch, SearchContext, SearchHit, SearchHitRow, SearchResponse,
};

pub const MIN_QUERY_LEN: usize = 2;
const RESULTS_PER_CONTEXT: i64 = 20;

const STOPWORDS: &[&str] = &["the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for"];

const SYNONYMS: &[(&str, &[&str])] = &[
    ("customer", &["client", "buyer", "purchaser"]),
    ("order", &["purchase", "sale", "transaction"]),
    ("product", &["item", "goods", "merchandise"]),
    ("email", &["message", "mail", "correspondence"]),
    ("urgent", &["important", "critical", "high-priority"]),
    ("pending", &["waiting", "in-progress", "processing"]),
];

const CONTEXT_KEYWORDS: &[(SearchContext, &[&str])] = &[
    (SearchContext::Emails, &["email", "message", "inbox", "sent", "urgent", "attachment"]),
    (SearchContext::Products, &["product", "item", "stock", "inventory", "sku", "price"]),
    (SearchContext::Orders, &["order", "purchase", "invoice", "payment", "delivery"]),
    (SearchContext::Customers, &["customer", "client", "buyer", "contact"]),
];

fn pattern(re: &str) -> Regex {
    Regex::new(re).expect("search pattern is valid")
}

static NON_WORD: LazyLock<Regex> = LazyLock::new(|| pattern(r"[^\w\s]"));

static ENTITY_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    vec![
        ("email", pattern(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b")),
        ("phone", pattern(r"\b(\+?64|0)\s?(\d\s?){8,9}\b")),
        ("order_id", pattern(r"(?i)\b(ORD|ORDER)[#\-\s]?(\d{4,})\b")),
        ("sku", pattern(r"\b[A-Z]{2,}-\d{4,}\b")),
        ("invoice", pattern(r"(?i)\b(INV|INVOICE)[#\-\s]?(\d{4,})\b")),
        ("amount", pattern(r"\$\s?\d+(?:,\d{3})*(?:\.\d{2})?")),
    ]
});

static DATE_FILTER: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?i)\b(today|yesterday|last\s+week|last\s+month)\b"));
static STATUS_FILTER: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?i)\b(urgent|pending|completed|cancelled)\b"));
static EXPLICIT_FILTER: LazyLock<Regex> = LazyLock::new(|| pattern(r"(\w+):(\w+)"));

pub fn tokenize(query: &str) -> Vec<String> {
    let lowered = query.to_lowercase();
    NON_WORD
        .replace_all(&lowered, " ")
        .split_whitespace()
        .filter(|word| !STOPWORDS.contains(word))
        .map(str::to_string)
        .collect()
}

pub fn expand_synonyms(keywords: &[String]) -> Vec<String> {
    let mut expanded: Vec<String> = Vec::new();
    let mut push = |word: &str| {
        if !expanded.iter().any(|w| w == word) {
            expanded.push(word.to_string());
        }
    };

    for keyword in keywords {
        push(keyword.as_str());
        if let Some((_, synonyms)) = SYNONYMS.iter().find(|(word, _)| *word == keyword.as_str()) {
            synonyms.iter().for_each(|s| push(*s));
        }
    }
    expanded
}

pub fn detect_entities(query: &str) -> BTreeMap<String, Vec<String>> {
    ENTITY_PATTERNS
        .iter()
        .filter_map(|(kind, re)| {
            let values: Vec<String> = re.find_iter(query).map(|m| m.as_str().trim().to_string()).collect();
            (!values.is_empty()).then(|| (kind.to_string(), values))
        })
        .collect()
}

pub fn extract_filters(query: &str) -> BTreeMap<String, String> {
    let mut filters = BTreeMap::new();

    if let Some(m) = DATE_FILTER.captures(query).and_then(|c| c.get(1)) {
        let date = m.as_str().to_lowercase().split_whitespace().collect::<Vec<_>>().join("_");
        filters.insert("date".to_string(), date);
    }

    if let Some(m) = STATUS_FILTER.captures(query).and_then(|c| c.get(1)) {
        filters.insert("status".to_string(), m.as_str().to_lowercase());
    }

    for caps in EXPLICIT_FILTER.captures_iter(query) {
        filters.insert(caps[1].to_string(), caps[2].to_string());
    }

    filters
}

pub fn parse_query(query: &str) -> ParsedQuery {
    let keywords = tokenize(query);
    ParsedQuery {
        original: query.to_string(),
        expanded: expand_synonyms(&keywords),
        entities: detect_entities(query),
        filters: extract_filters(query),
        keywords,
    }
}

/// Entities win; otherwise the context whose keyword list hits most often.
pub fn detect_context(parsed: &ParsedQuery) -> SearchContext {
    if parsed.entities.contains_key("email") {
        return SearchContext::Emails;
    }
    if parsed.entities.contains_key("order_id") {
        return SearchContext::Orders;
    }
    if parsed.entities.contains_key("sku") {
        return SearchContext::Products;
    }

    let text = parsed.original.trim().to_lowercase();
    let mut best = (SearchContext::All, 0);
    for (context, words) in CONTEXT_KEYWORDS {
        let score = words.iter().filter(|w| text.contains(**w)).count();
        if score > best.1 {
            best = (*context, score);
        }
    }
    best.0
}

/// Time window for a `date` filter, as `[since, until)`.
pub fn date_window(
    filters: &BTreeMap<String, String>,
    now: DateTime<Utc>,
) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    let today = now.date_naive().and_hms_opt(0, 0, 0).map(|t| t.and_utc());

    match filters.get("date").map(String::as_str) {
        Some("today") => (today, None),
        Some("yesterday") => (today.map(|t| t - Duration::days(1)), today),
        Some("last_week") => (Some(now - Duration::days(7)), None),
        Some("last_month") => (Some(now - Duration::days(30)), None),
        _ => (None, None),
    }
}

fn keyword_score(text: &str, keywords: &[String]) -> f64 {
    if keywords.is_empty() {
        return 0.0;
    }
    let matches = keywords.iter().filter(|k| text.contains(k.as_str())).count();
    matches as f64 / keywords.len() as f64
}

fn recency_score(created_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    match created_at {
        Some(at) => {
            let days = (now - at).num_seconds() as f64 / 86_400.0;
            (1.0 - days / 90.0).clamp(0.0, 1.0)
        }
        None => 0.5,
    }
}

fn interaction_score(interactions: Option<i64>) -> f64 {
    match interactions {
        Some(n) if n > 0 => (n as f64 / 10.0).min(1.0),
        _ => 0.5,
    }
}

fn entity_score(text: &str, entities: &BTreeMap<String, Vec<String>>) -> f64 {
    let values: Vec<&String> = entities.values().flatten().collect();
    if values.is_empty() {
        return 0.5;
    }
    let matches = values.iter().filter(|v| text.contains(&v.to_lowercase())).count();
    matches as f64 / values.len() as f64
}

pub fn relevance(hit: &SearchHit, parsed: &ParsedQuery, now: DateTime<Utc>) -> f64 {
    let text = hit.searchable_text();
    let score = 0.4 * keyword_score(&text, &parsed.keywords)
        + 0.2 * recency_score(hit.created_at, now)
        + 0.2 * interaction_score(hit.interactions)
        + 0.2 * entity_score(&text, &parsed.entities);
    score.min(1.0)
}

/// ILIKE patterns for a parsed query.
fn like_patterns(parsed: &ParsedQuery) -> Vec<String> {
    let mut terms: Vec<&str> = parsed.expanded.iter().map(String::as_str).collect();
    terms.extend(parsed.entities.values().flatten().map(String::as_str));
    if terms.is_empty() {
        terms.push(parsed.original.trim());
    }
    terms.into_iter().map(contains_pattern).collect()
}

async fn search_context(
    pool: &DbPool,
    context: SearchContext,
    parsed: &ParsedQuery,
    patterns: &[String],
    now: DateTime<Utc>,
) -> Result<Vec<SearchHitRow>, AppError> {
    let (since, until) = date_window(&parsed.filters, now);

    let rows = match context {
        SearchContext::Emails => {
            sqlx::query_as::<_, SearchHitRow>(
                r#"
                SELECT e.id::TEXT AS id,
                       COALESCE(e.subject, '(no subject)') AS title,
                       CONCAT_WS(' ', e.from_name, e.from_address) AS subtitle,
                       e.created_at,
                       (SELECT COUNT(*) FROM emails t WHERE t.thread_id = e.thread_id)::BIGINT AS interactions
                FROM emails e
                WHERE (e.subject ILIKE ANY($1) OR e.body ILIKE ANY($1)
                       OR e.from_address ILIKE ANY($1) OR e.from_name ILIKE ANY($1))
                  AND ($2::TEXT IS NULL OR e.status = $2)
                  AND ($3::TIMESTAMPTZ IS NULL OR e.created_at >= $3)
                  AND ($4::TIMESTAMPTZ IS NULL OR e.created_at < $4)
                ORDER BY e.created_at DESC
                LIMIT $5
                "#,
            )
            .bind(patterns)
            .bind(parsed.filters.get("status").map(String::as_str))
            .bind(since)
            .bind(until)
            .bind(RESULTS_PER_CONTEXT)
            .fetch_all(pool)
            .await?
        }
        SearchContext::Products => {
            sqlx::query_as::<_, SearchHitRow>(
                r#"
                SELECT id, name AS title, sku AS subtitle, created_at, NULL::BIGINT AS interactions
                FROM vend_products
                WHERE deleted_at IS NULL
                  AND (name ILIKE ANY($1) OR sku ILIKE ANY($1) OR handle ILIKE ANY($1))
                ORDER BY name
                LIMIT $2
                "#,
            )
            .bind(patterns)
            .bind(RESULTS_PER_CONTEXT)
            .fetch_all(pool)
            .await?
        }
        SearchContext::Orders => {
            sqlx::query_as::<_, SearchHitRow>(
                r#"
                SELECT id,
                       COALESCE(invoice_number, id) AS title,
                       CONCAT_WS(' ', customer_id, status) AS subtitle,
                       sale_date AS created_at,
                       NULL::BIGINT AS interactions
                FROM vend_sales
                WHERE deleted_at IS NULL
                  AND (id ILIKE ANY($1) OR invoice_number ILIKE ANY($1) OR customer_id ILIKE ANY($1))
                  AND ($2::TIMESTAMPTZ IS NULL OR sale_date >= $2)
                  AND ($3::TIMESTAMPTZ IS NULL OR sale_date < $3)
                ORDER BY sale_date DESC NULLS LAST
                LIMIT $4
                "#,
            )
            .bind(patterns)
            .bind(since)
            .bind(until)
            .bind(RESULTS_PER_CONTEXT)
            .fetch_all(pool)
            .await?
        }
        SearchContext::Customers => {
            sqlx::query_as::<_, SearchHitRow>(
                r#"
                SELECT id::TEXT AS id,
                       full_name AS title,
                       CONCAT_WS(' ', email, phone) AS subtitle,
                       created_at,
                       purchase_count::BIGINT AS interactions
                FROM customer_hub_profile
                WHERE full_name ILIKE ANY($1) OR email ILIKE ANY($1) OR phone ILIKE ANY($1)
                ORDER BY is_vip DESC, full_name
                LIMIT $2
                "#,
            )
            .bind(patterns)
            .bind(RESULTS_PER_CONTEXT)
            .fetch_all(pool)
            .await?
        }
        SearchContext::All => Vec::new(),
    };
    Ok(rows)
}

/// Rank hits by relevance and group them per context.
pub fn rank(
    mut hits: Vec<SearchHit>,
    parsed: &ParsedQuery,
    now: DateTime<Utc>,
) -> (Vec<SearchHit>, BTreeMap<SearchContext, Vec<SearchHit>>) {
    for hit in &mut hits {
        hit.relevance = relevance(hit, parsed, now);
    }
    hits.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));

    let mut grouped: BTreeMap<SearchContext, Vec<SearchHit>> = BTreeMap::new();
    for hit in &hits {
        grouped.entry(hit.context).or_default().push(hit.clone());
    }
    (hits, grouped)
}

pub async fn search(
    pool: &DbPool,
    staff_id: Uuid,
    query: &str,
    context_override: Option<&str>,
) -> Result<SearchResponse, AppError> {
    let started = Instant::now();
    let query = query.trim();
    if query.chars().count() < MIN_QUERY_LEN {
        return Err(AppError::InvalidRequest(format!(
            "Query must be at least {} characters",
            MIN_QUERY_LEN
        )));
    }

    let parsed = parse_query(query);
    let context = context_override
        .and_then(SearchContext::parse)
        .unwrap_or_else(|| detect_context(&parsed));
    let patterns = like_patterns(&parsed);
    let now = Utc::now();

    let mut hits = Vec::new();
    for target in context.targets() {
        let rows = search_context(pool, target, &parsed, &patterns, now).await?;
        hits.extend(rows.into_iter().map(|row| SearchHit::from_row(target, row)));
    }

    let (results, grouped) = rank(hits, &parsed, now);
    let response_time_ms = (started.elapsed().as_secs_f64() * 1000.0 * 100.0).round() / 100.0;

    tracing::info!(
        staff_id = %staff_id,
        context = context.as_str(),
        results = results.len(),
        "Search executed"
    );

    if let Err(e) = record(pool, staff_id, query, context, results.len(), response_time_ms).await {
        tracing::warn!(error = %e, "Failed to record search analytics");
    }

    Ok(SearchResponse {
        query: parsed.original,
        context,
        total_results: results.len(),
        results,
        grouped,
        response_time_ms,
        keywords: parsed.keywords,
        entities: parsed.entities,
        filters: parsed.filters,
    })
}

async fn record(
    pool: &DbPool,
    staff_id: Uuid,
    query: &str,
    context: SearchContext,
    total: usize,
    response_time_ms: f64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO search_analytics (staff_id, query, context, total_results, response_time_ms)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(staff_id)
    .bind(query)
    .bind(context.as_str())
    .bind(total as i32)
    .bind(response_time_ms)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn recent_searches(pool: &DbPool, staff_id: Uuid, limit: i64) -> Result<Vec<RecentSearch>, AppError> {
    let rows = sqlx::query_as::<_, RecentSearch>(
        r#"
        SELECT query, MAX(created_at) AS searched_at
        FROM search_analytics
        WHERE staff_id = $1
        GROUP BY query
        ORDER BY searched_at DESC
        LIMIT $2
        "#,
    )
    .bind(staff_id)
    .bind(limit.clamp(1, 50))
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn popular_searches(pool: &DbPool, days: i64, limit: i64) -> Result<Vec<PopularSearch>, AppError> {
    let rows = sqlx::query_as::<_, PopularSearch>(
        r#"
        SELECT query, COUNT(*)::BIGINT AS count
        FROM search_analytics
        WHERE created_at >= NOW() - make_interval(days => $1)
        GROUP BY query
        ORDER BY count DESC, query
        LIMIT $2
        "#,
    )
    .bind(days.clamp(1, 365) as i32)
    .bind(limit.clamp(1, 50))
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap()
    }

    fn hit(title: &str, created_at: Option<DateTime<Utc>>, interactions: Option<i64>) -> SearchHit {
        SearchHit {
            id: "1".to_string(),
            context: SearchContext::Emails,
            title: title.to_string(),
            subtitle: None,
            created_at,
            relevance: 0.0,
            interactions,
        }
    }

    #[test]
    fn test_tokenize_drops_stopwords_and_punctuation() {
        assert_eq!(
            tokenize("Find the order, for Jane!"),
            vec!["find".to_string(), "order".to_string(), "jane".to_string()]
        );
        assert!(tokenize("  the and ").is_empty());
    }

    #[test]
    fn test_synonyms_expand_once() {
        let expanded = expand_synonyms(&["order".to_string(), "sale".to_string()]);
        assert_eq!(expanded, vec!["order", "purchase", "sale", "transaction"]);
    }

    #[test]
    fn test_entities_detected() {
        let entities = detect_entities("jane@example.com re ORD-12345 and VP-1234 for $1,250.00");
        assert_eq!(entities["email"], vec!["jane@example.com"]);
        assert_eq!(entities["order_id"], vec!["ORD-12345"]);
        assert!(entities["sku"].contains(&"VP-1234".to_string()));
        assert_eq!(entities["amount"], vec!["$1,250.00"]);
        assert!(!entities.contains_key("invoice"));
    }

    #[test]
    fn test_filters_extracted() {
        let filters = extract_filters("urgent emails from Last Week status:open");
        assert_eq!(filters["date"], "last_week");
        assert_eq!(filters["status"], "open");

        let filters = extract_filters("pending refunds today");
        assert_eq!(filters["status"], "pending");
        assert_eq!(filters["date"], "today");
    }

    #[test]
    fn test_context_detection() {
        assert_eq!(detect_context(&parse_query("mail from bob@shop.nz")), SearchContext::Emails);
        assert_eq!(detect_context(&parse_query("order 1234 ORD-5678")), SearchContext::Orders);
        assert_eq!(detect_context(&parse_query("stock price check")), SearchContext::Products);
        assert_eq!(detect_context(&parse_query("client contact")), SearchContext::Customers);
        assert_eq!(detect_context(&parse_query("hello world")), SearchContext::All);
    }

    #[test]
    fn test_date_window() {
        let mut filters = BTreeMap::new();
        filters.insert("date".to_string(), "yesterday".to_string());
        let (since, until) = date_window(&filters, now());
        assert_eq!(since, Some(Utc.with_ymd_and_hms(2025, 6, 14, 0, 0, 0).unwrap()));
        assert_eq!(until, Some(Utc.with_ymd_and_hms(2025, 6, 15, 0, 0, 0).unwrap()));

        assert_eq!(date_window(&BTreeMap::new(), now()), (None, None));
    }

    #[test]
    fn test_relevance_neutral_defaults() {
        // no keywords matched, undated, unknown interactions, no entities
        let parsed = parse_query("zzz");
        let score = relevance(&hit("Invoice", None, None), &parsed, now());
        assert!((score - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_relevance_full_match() {
        let parsed = parse_query("refund ORD-1234");
        let h = hit("Refund for ORD-1234", Some(now()), Some(25));
        assert!((relevance(&h, &parsed, now()) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_relevance_entity_miss_and_old_item() {
        let parsed = parse_query("refund ORD-1234");
        let h = hit("refund", Some(now() - Duration::days(120)), None);
        // one of three keywords, zero recency, neutral interaction, entity miss
        let expected = 0.4 / 3.0 + 0.2 * 0.5;
        assert!((relevance(&h, &parsed, now()) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_rank_orders_and_groups() {
        let parsed = parse_query("refund");
        let mut other = hit("Shipping", None, None);
        other.context = SearchContext::Orders;
        let hits = vec![other, hit("Refund request", Some(now()), None)];

        let (ranked, grouped) = rank(hits, &parsed, now());
        assert_eq!(ranked[0].title, "Refund request");
        assert!(ranked[0].relevance > ranked[1].relevance);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[&SearchContext::Orders].len(), 1);
    }

    #[test]
    fn test_like_patterns_fall_back_to_query() {
        let parsed = parse_query("the an");
        assert_eq!(like_patterns(&parsed), vec!["%the an%".to_string()]);
    }
}

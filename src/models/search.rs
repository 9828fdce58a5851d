//! Universal search models.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a query is aimed. `All` fans out to every other context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchContext {
    Emails,
    Products,
    Orders,
    Customers,
    All,
}

impl SearchContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Emails => "emails",
            Self::Products => "products",
            Self::Orders => "orders",
            Self::Customers => "customers",
            Self::All => "all",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "emails" => Some(Self::Emails),
            "products" => Some(Self::Products),
            "orders" => Some(Self::Orders),
            "customers" => Some(Self::Customers),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    /// The concrete contexts searched for this one.
    pub fn targets(&self) -> Vec<SearchContext> {
        match self {
            Self::All => vec![Self::Emails, Self::Products, Self::Orders, Self::Customers],
            other => vec![*other],
        }
    }
}

/// A query broken into keywords, synonyms, entities and filters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ParsedQuery {
    pub original: String,
    pub keywords: Vec<String>,

    /// Keywords plus their synonyms, deduplicated in first-seen order
    pub expanded: Vec<String>,

    /// Entity kind (`email`, `phone`, `order_id`, ...) to matched values
    pub entities: BTreeMap<String, Vec<String>>,

    pub filters: BTreeMap<String, String>,
}

/// Row shape every context query projects into.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SearchHitRow {
    pub id: String,
    pub title: String,
    pub subtitle: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub interactions: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub context: SearchContext,
    pub title: String,
    pub subtitle: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub relevance: f64,

    #[serde(skip)]
    pub interactions: Option<i64>,
}

impl SearchHit {
    pub fn from_row(context: SearchContext, row: SearchHitRow) -> Self {
        Self {
            id: row.id,
            context,
            title: row.title,
            subtitle: row.subtitle,
            created_at: row.created_at,
            relevance: 0.0,
            interactions: row.interactions,
        }
    }

    /// Lowercased text keywords and entities are matched against.
    pub fn searchable_text(&self) -> String {
        let mut text = format!("{} {}", self.id, self.title);
        if let Some(subtitle) = &self.subtitle {
            text.push(' ');
            text.push_str(subtitle);
        }
        text.to_lowercase()
    }
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub context: SearchContext,
    pub results: Vec<SearchHit>,
    pub grouped: BTreeMap<SearchContext, Vec<SearchHit>>,
    pub total_results: usize,
    pub response_time_ms: f64,
    pub keywords: Vec<String>,
    pub entities: BTreeMap<String, Vec<String>>,
    pub filters: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,

    /// Overrides context detection
    #[serde(default)]
    pub context: Option<String>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct RecentSearch {
    pub query: String,
    pub searched_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct PopularSearch {
    pub query: String,
    pub count: i64,
}

#[derive(Debug, Deserialize)]
pub struct PopularParams {
    #[serde(default)]
    pub days: Option<i64>,

    #[serde(default)]
    pub limit: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_targets_every_context() {
        assert_eq!(SearchContext::All.targets().len(), 4);
        assert_eq!(SearchContext::Orders.targets(), vec![SearchContext::Orders]);
        assert_eq!(SearchContext::parse("Products"), Some(SearchContext::Products));
        assert_eq!(SearchContext::parse("invoices"), None);
    }

    #[test]
    fn test_grouped_serializes_with_context_keys() {
        let mut grouped = BTreeMap::new();
        grouped.insert(SearchContext::Emails, Vec::<SearchHit>::new());
        let json = serde_json::to_value(&grouped).unwrap();
        assert!(json.get("emails").is_some());
    }
}

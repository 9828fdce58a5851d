//! POS (Vend/Lightspeed) REST client.
//!
//! Covers the endpoints the back office needs: open on-account sales,
//! sale payments, customer balances and credit accounts, and consignments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::json;

use super::{ClientError, cents_to_dollars, check_status, dollars_to_cents, endpoint, format_dollars};
use crate::models::deduction::{OpenSale, SalePayment};
use crate::services::allocation_service::SalePaymentSink;

/// Vend API 2.0 client.
#[derive(Debug, Clone)]
pub struct VendClient {
    http: reqwest::Client,
    base_url: url::Url,
    token: String,
}

/// Sale as returned by the search endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct VendSale {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub sale_date: Option<DateTime<Utc>>,

    #[serde(default, deserialize_with = "de_opt_amount")]
    pub total_price: Option<f64>,

    #[serde(default, deserialize_with = "de_opt_amount")]
    pub total_paid: Option<f64>,

    #[serde(default)]
    pub totals: Option<VendSaleTotals>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VendSaleTotals {
    #[serde(default, deserialize_with = "de_opt_amount")]
    pub total_to_pay: Option<f64>,

    #[serde(default, deserialize_with = "de_opt_amount")]
    pub total_price: Option<f64>,

    #[serde(default, deserialize_with = "de_opt_amount")]
    pub total_paid: Option<f64>,
}

impl VendSale {
    /// Amount still owed on the sale in cents, never negative.
    ///
    /// `totals.total_to_pay` wins when present; otherwise price minus paid.
    pub fn due_cents(&self) -> i64 {
        let totals = self.totals.clone().unwrap_or_default();
        if let Some(to_pay) = totals.total_to_pay {
            return dollars_to_cents(to_pay).max(0);
        }

        let price = totals.total_price.or(self.total_price).unwrap_or(0.0);
        let paid = totals.total_paid.or(self.total_paid).unwrap_or(0.0);
        (dollars_to_cents(price) - dollars_to_cents(paid)).max(0)
    }
}

impl From<VendSale> for OpenSale {
    fn from(sale: VendSale) -> Self {
        let due_cents = sale.due_cents();
        OpenSale {
            id: sale.id,
            sale_date: sale.sale_date,
            due_cents,
        }
    }
}

/// Customer record with its optional credit account relation.
#[derive(Debug, Clone, Deserialize)]
pub struct VendCustomer {
    pub id: String,

    #[serde(default)]
    pub first_name: Option<String>,

    #[serde(default)]
    pub last_name: Option<String>,

    #[serde(default)]
    pub email: Option<String>,

    /// Account balance in dollars, negative when the customer owes the store
    #[serde(default, deserialize_with = "de_opt_amount")]
    pub balance: Option<f64>,

    #[serde(default)]
    pub credit_account: Option<VendCreditAccount>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VendCreditAccount {
    #[serde(alias = "id")]
    pub credit_account_id: String,

    #[serde(default, deserialize_with = "de_opt_amount")]
    pub credit_limit: Option<f64>,
}

impl VendCustomer {
    pub fn balance_cents(&self) -> i64 {
        self.balance.map(dollars_to_cents).unwrap_or(0)
    }
}

/// Consignment fields pushed to the POS when a transfer changes state.
#[derive(Debug, Clone, Serialize)]
pub struct ConsignmentPayload {
    pub name: String,
    #[serde(rename = "type")]
    pub consignment_type: String,
    pub status: String,
    pub outlet_id: Option<String>,
    pub source_outlet_id: Option<String>,
    pub supplier_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct IdOnly {
    id: String,
}

#[derive(Debug, Deserialize)]
struct CustomerEnvelope {
    #[serde(alias = "data")]
    customer: VendCustomer,
}

impl VendClient {
    pub fn new(http: reqwest::Client, base_url: &str, token: impl Into<String>) -> Result<Self, ClientError> {
        Ok(Self {
            http,
            base_url: super::parse_base_url(base_url)?,
            token: token.into(),
        })
    }

    /// Open on-account sales for a customer, newest first.
    pub async fn search_open_sales(&self, customer_id: &str) -> Result<Vec<VendSale>, ClientError> {
        let url = endpoint(&self.base_url, "search")?;
        let resp = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .query(&[
                ("type", "sales"),
                ("customer_id", customer_id),
                ("state", "pending"),
                ("attributes", "onaccount"),
                ("page_size", "100"),
                ("order_by", "sale_date"),
                ("order_direction", "desc"),
            ])
            .send()
            .await?;

        let envelope: DataEnvelope<Vec<VendSale>> = check_status(resp).await?.json().await?;
        Ok(envelope.data)
    }

    /// Record one payment against one sale and return the POS payment id.
    pub async fn create_sale_payment(&self, payment: &SalePayment) -> Result<String, ClientError> {
        let url = endpoint(&self.base_url, "register_sale_payments")?;
        let body = json!({
            "register_sale_id": payment.register_sale_id,
            "amount": cents_to_dollars(payment.amount_cents),
            "payment_type_id": payment.payment_type_id,
            "payment_date": payment.payment_date.to_rfc3339(),
            "retailer_payment_type": "Account",
            "label": payment.label,
        });

        let resp = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;

        let envelope: DataEnvelope<IdOnly> = check_status(resp)
            .await?
            .json()
            .await
            .map_err(|e| ClientError::Decode(format!("register_sale_payments: {}", e)))?;
        Ok(envelope.data.id)
    }

    /// Fetch a customer including the CreditAccount relation.
    pub async fn get_customer(&self, customer_id: &str) -> Result<VendCustomer, ClientError> {
        let url = endpoint(&self.base_url, &format!("customers/{}", customer_id))?;
        let resp = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .query(&[("load_relations", "[\"CreditAccount\"]")])
            .send()
            .await?;

        let envelope: CustomerEnvelope = check_status(resp).await?.json().await?;
        Ok(envelope.customer)
    }

    /// Set the credit limit on a POS credit account.
    pub async fn update_credit_limit(&self, credit_account_id: &str, limit_cents: i64) -> Result<(), ClientError> {
        let url = endpoint(&self.base_url, &format!("credit_accounts/{}", credit_account_id))?;
        let body = json!({
            "credit_account": {
                "credit_limit": format_dollars(limit_cents)
            }
        });

        let resp = self
            .http
            .put(url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;

        let value: serde_json::Value = check_status(resp).await?.json().await?;
        if value.get("credit_account").is_none() {
            return Err(ClientError::Decode(
                "credit_accounts: missing credit_account in response".to_string(),
            ));
        }
        Ok(())
    }

    /// Create the consignment on the POS, or update it when an id is already known.
    pub async fn upsert_consignment(
        &self,
        existing_id: Option<&str>,
        payload: &ConsignmentPayload,
    ) -> Result<String, ClientError> {
        let request = match existing_id {
            Some(id) => self
                .http
                .put(endpoint(&self.base_url, &format!("consignments/{}", id))?),
            None => self.http.post(endpoint(&self.base_url, "consignments")?),
        };

        let resp = request
            .bearer_auth(&self.token)
            .json(payload)
            .send()
            .await?;

        let envelope: DataEnvelope<IdOnly> = check_status(resp).await?.json().await?;
        Ok(envelope.data.id)
    }
}

#[async_trait]
impl SalePaymentSink for VendClient {
    async fn record_payment(&self, payment: &SalePayment) -> Result<String, ClientError> {
        self.create_sale_payment(payment).await
    }
}

/// Vend returns money as numbers on some endpoints and strings on others.
fn de_opt_amount<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Amount {
        Number(f64),
        Text(String),
    }

    match Option::<Amount>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Amount::Number(n)) => Ok(Some(n)),
        Some(Amount::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(Amount::Text(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn client(server: &Server) -> VendClient {
        VendClient::new(reqwest::Client::new(), &server.url(), "token").unwrap()
    }

    #[test]
    fn test_due_prefers_total_to_pay() {
        let sale: VendSale = serde_json::from_value(json!({
            "id": "s1",
            "total_price": 100.0,
            "totals": {"total_to_pay": "42.50", "total_paid": 10}
        }))
        .unwrap();
        assert_eq!(sale.due_cents(), 4250);
    }

    #[test]
    fn test_due_falls_back_to_price_minus_paid() {
        let sale: VendSale = serde_json::from_value(json!({
            "id": "s1",
            "total_price": "80.00",
            "total_paid": 30.25
        }))
        .unwrap();
        assert_eq!(sale.due_cents(), 4975);

        let overpaid: VendSale = serde_json::from_value(json!({
            "id": "s2",
            "total_price": 10,
            "total_paid": 20
        }))
        .unwrap();
        assert_eq!(overpaid.due_cents(), 0);
    }

    #[tokio::test]
    async fn test_create_sale_payment_posts_dollars() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/register_sale_payments")
            .match_header("authorization", "Bearer token")
            .match_body(Matcher::PartialJson(json!({
                "register_sale_id": "sale-1",
                "amount": 12.5,
                "payment_type_id": "3",
                "retailer_payment_type": "Account",
                "label": "Payroll deduction"
            })))
            .with_status(200)
            .with_body(r#"{"data":{"id":"pay-9"}}"#)
            .create_async()
            .await;

        let payment = SalePayment {
            register_sale_id: "sale-1".to_string(),
            amount_cents: 1250,
            payment_type_id: "3".to_string(),
            payment_date: Utc::now(),
            label: "Payroll deduction".to_string(),
        };

        let id = client(&server).create_sale_payment(&payment).await.unwrap();
        assert_eq!(id, "pay-9");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_get_customer_reads_credit_account() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/customers/c-1")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                r#"{"customer":{"id":"c-1","first_name":"Sam","last_name":"Lee","balance":"-45.10",
                   "credit_account":{"credit_account_id":"ca-7","credit_limit":"250.00"}}}"#,
            )
            .create_async()
            .await;

        let customer = client(&server).get_customer("c-1").await.unwrap();
        assert_eq!(customer.balance_cents(), -4510);
        let account = customer.credit_account.unwrap();
        assert_eq!(account.credit_account_id, "ca-7");
        assert_eq!(account.credit_limit, Some(250.0));
    }

    #[tokio::test]
    async fn test_update_credit_limit_sends_formatted_amount() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("PUT", "/credit_accounts/ca-7")
            .match_body(Matcher::Json(json!({"credit_account": {"credit_limit": "300.00"}})))
            .with_status(200)
            .with_body(r#"{"credit_account":{"id":"ca-7"}}"#)
            .create_async()
            .await;

        client(&server).update_credit_limit("ca-7", 30000).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_status_surfaces_body() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/search")
            .match_query(Matcher::Any)
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let err = client(&server).search_open_sales("c-1").await.unwrap_err();
        match err {
            ClientError::Status { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}

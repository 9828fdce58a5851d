//! Payroll (Xero Payroll NZ) REST client.
//!
//! Read-only: pay runs, payslips, employees and deduction types.
//! Rate limiting surfaces as [`ClientError::RateLimited`] so the sync loop
//! can decide how long to back off.

use async_trait::async_trait;
use serde::Deserialize;

use super::{ClientError, check_status, endpoint};
use crate::models::payroll::{PayRun, PaySlip, XeroDeductionType, XeroEmployee};
use crate::services::payroll_sync_service::PayrollSource;

#[derive(Debug, Clone)]
pub struct XeroClient {
    http: reqwest::Client,
    base_url: url::Url,
    tenant_id: String,
    access_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PayRunsEnvelope {
    #[serde(default)]
    pay_runs: Vec<PayRun>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaySlipsEnvelope {
    #[serde(default)]
    pay_slips: Vec<PaySlip>,
}

#[derive(Debug, Deserialize)]
struct EmployeeEnvelope {
    employee: XeroEmployee,
}

#[derive(Debug, Deserialize)]
struct DeductionEnvelope {
    deduction: XeroDeductionType,
}

impl XeroClient {
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        tenant_id: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Result<Self, ClientError> {
        Ok(Self {
            http,
            base_url: super::parse_base_url(base_url)?,
            tenant_id: tenant_id.into(),
            access_token: access_token.into(),
        })
    }

    async fn get<T>(&self, operation: &str, path: &str, query: &[(&str, String)]) -> Result<T, ClientError>
    where
        T: serde::de::DeserializeOwned,
    {
        let url = endpoint(&self.base_url, path)?;
        let resp = self
            .http
            .get(url)
            .bearer_auth(&self.access_token)
            .header("Xero-Tenant-Id", &self.tenant_id)
            .header("Accept", "application/json")
            .query(query)
            .send()
            .await?;

        if !resp.status().is_success() {
            let correlation_id = resp
                .headers()
                .get("Xero-Correlation-Id")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("-")
                .to_string();
            let rate_limit_problem = resp
                .headers()
                .get("X-Rate-Limit-Problem")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("-")
                .to_string();
            tracing::warn!(
                operation,
                status = resp.status().as_u16(),
                correlation_id = %correlation_id,
                rate_limit_problem = %rate_limit_problem,
                "Payroll API call failed"
            );
        }

        let resp = check_status(resp).await?;
        resp.json::<T>()
            .await
            .map_err(|e| ClientError::Decode(format!("{}: {}", operation, e)))
    }

    pub async fn get_pay_runs(&self, page: u32) -> Result<Vec<PayRun>, ClientError> {
        let envelope: PayRunsEnvelope = self
            .get("getPayRuns", "PayRuns", &[("page", page.to_string())])
            .await?;
        Ok(envelope.pay_runs)
    }

    pub async fn get_pay_slips(&self, pay_run_id: &str, page: u32) -> Result<Vec<PaySlip>, ClientError> {
        let envelope: PaySlipsEnvelope = self
            .get(
                "getPaySlips",
                "PaySlips",
                &[("PayRunID", pay_run_id.to_string()), ("page", page.to_string())],
            )
            .await?;
        Ok(envelope.pay_slips)
    }

    pub async fn get_employee(&self, employee_id: &str) -> Result<XeroEmployee, ClientError> {
        let envelope: EmployeeEnvelope = self
            .get("getEmployee", &format!("Employees/{}", employee_id), &[])
            .await?;
        Ok(envelope.employee)
    }

    pub async fn get_deduction(&self, deduction_type_id: &str) -> Result<XeroDeductionType, ClientError> {
        let envelope: DeductionEnvelope = self
            .get("getDeduction", &format!("Deductions/{}", deduction_type_id), &[])
            .await?;
        Ok(envelope.deduction)
    }
}

#[async_trait]
impl PayrollSource for XeroClient {
    async fn pay_runs(&self, page: u32) -> Result<Vec<PayRun>, ClientError> {
        self.get_pay_runs(page).await
    }

    async fn pay_slips(&self, pay_run_id: &str, page: u32) -> Result<Vec<PaySlip>, ClientError> {
        self.get_pay_slips(pay_run_id, page).await
    }

    async fn employee(&self, employee_id: &str) -> Result<XeroEmployee, ClientError> {
        self.get_employee(employee_id).await
    }

    async fn deduction_type(&self, deduction_type_id: &str) -> Result<XeroDeductionType, ClientError> {
        self.get_deduction(deduction_type_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn client(server: &Server) -> XeroClient {
        XeroClient::new(reqwest::Client::new(), &server.url(), "tenant-1", "token").unwrap()
    }

    #[tokio::test]
    async fn test_pay_runs_sends_tenant_header() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/PayRuns")
            .match_query(Matcher::UrlEncoded("page".into(), "2".into()))
            .match_header("xero-tenant-id", "tenant-1")
            .with_status(200)
            .with_body(
                r#"{"payRuns":[{"payRunID":"pr-1","periodStartDate":"2025-03-01T00:00:00",
                   "periodEndDate":"2025-03-14T00:00:00","paymentDate":"2025-03-16T00:00:00",
                   "payRunStatus":"Posted"}]}"#,
            )
            .create_async()
            .await;

        let runs = client(&server).get_pay_runs(2).await.unwrap();
        mock.assert_async().await;
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].pay_run_id.as_deref(), Some("pr-1"));
        assert_eq!(
            runs[0].payment_date(),
            chrono::NaiveDate::from_ymd_opt(2025, 3, 16)
        );
    }

    #[tokio::test]
    async fn test_rate_limit_reads_retry_after() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/PaySlips")
            .match_query(Matcher::Any)
            .with_status(429)
            .with_header("Retry-After", "7")
            .create_async()
            .await;

        let err = client(&server).get_pay_slips("pr-1", 1).await.unwrap_err();
        assert!(matches!(err, ClientError::RateLimited { retry_after: Some(7) }));
    }

    #[tokio::test]
    async fn test_employee_and_deduction_lookup() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/Employees/e-1")
            .with_status(200)
            .with_body(r#"{"employee":{"employeeID":"e-1","firstName":"Ana","lastName":"Ngata"}}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/Deductions/d-1")
            .with_status(200)
            .with_body(r#"{"deduction":{"deductionId":"d-1","deductionName":"Staff Account"}}"#)
            .create_async()
            .await;

        let client = client(&server);
        assert_eq!(client.get_employee("e-1").await.unwrap().full_name(), "Ana Ngata");
        assert_eq!(
            client.get_deduction("d-1").await.unwrap().deduction_name.as_deref(),
            Some("Staff Account")
        );
    }
}

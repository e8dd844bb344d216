use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{header, Client, Method, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::fmt;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::auth::Authorized;
use crate::model::{Association, ExpenseClaim, FileObject, Invoice};
use crate::sync::artifact::Artifact;
use crate::xero::model::{Connection, ExpenseClaimsResp, FilesResp, InvoicesResp};

pub mod date;
pub mod model;

const XERO_API_BASE: &str = "https://api.xero.com/";
const ACCOUNTING: &str = "api.xro/2.0/";
const FILES: &str = "files.xro/1.0/";

#[derive(Clone)]
pub struct XeroClient {
    http: Client,
    base_url: Url,
    access_token: String,
    tenant_id: String,
}

impl fmt::Debug for XeroClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XeroClient")
            .field("base_url", &self.base_url)
            .field("tenant_id", &self.tenant_id)
            .finish_non_exhaustive()
    }
}

/// Parameters of the paid-invoice listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceQuery {
    pub modified_since: NaiveDate,
    pub statuses: Vec<String>,
    pub order: String,
    pub page_size: u32,
    pub include_archived: bool,
}

/// Parameters of the expense-claim listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpenseQuery {
    pub modified_since: NaiveDate,
    pub where_clause: String,
}

/// Remote operations the sync pipeline depends on.
#[async_trait]
pub trait XeroService: Send + Sync {
    async fn invoices_page(&self, query: &InvoiceQuery, page: u32) -> Result<Vec<Invoice>>;

    /// Download the PDF rendering of an invoice into a temporary file in `dir`.
    async fn invoice_pdf(&self, invoice_id: &str, dir: &Path) -> Result<Artifact>;

    async fn expense_claims(&self, query: &ExpenseQuery) -> Result<Vec<ExpenseClaim>>;

    /// One page of the Files inbox, newest first.
    async fn files_page(&self, page: u32, page_size: u32) -> Result<Vec<FileObject>>;

    async fn file_associations(&self, file_id: &str) -> Result<Vec<Association>>;

    /// Download a file's binary content into a temporary file in `dir`.
    async fn file_content(&self, file_id: &str, dir: &Path) -> Result<Artifact>;
}

fn http_client() -> Result<Client> {
    Client::builder()
        .user_agent("xero-archiver/0.1")
        .build()
        .context("failed to build HTTP client")
}

fn modified_since_header(date: NaiveDate) -> String {
    format!("{}T00:00:00", date.format("%Y-%m-%d"))
}

/// Turn a non-2xx response into an error carrying status and body.
async fn check_status(res: Response) -> Result<Response> {
    if res.status() == StatusCode::TOO_MANY_REQUESTS {
        let body = res.text().await.unwrap_or_default();
        warn!("Rate limited by Xero: {}", body);
        return Err(anyhow!("received 429 from Xero: {}", body));
    }
    if !res.status().is_success() {
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        return Err(anyhow!("xero error {}: {}", status, body));
    }
    Ok(res)
}

/// List the tenants the access token is connected to.
pub async fn connections(base_url: &Url, access_token: &str) -> Result<Vec<Connection>> {
    let url = base_url.join("connections")?;
    let res = http_client()?
        .get(url)
        .bearer_auth(access_token)
        .header(header::ACCEPT, "application/json")
        .send()
        .await
        .context("failed to reach Xero")?;
    let res = check_status(res).await?;
    Ok(res.json::<Vec<Connection>>().await?)
}

/// First connection of type `ORGANISATION`.
pub fn organisation_tenant(connections: &[Connection]) -> Option<&str> {
    connections
        .iter()
        .find(|c| c.tenant_type == "ORGANISATION")
        .map(|c| c.tenant_id.as_str())
}

impl XeroClient {
    pub fn new(access_token: String, tenant_id: String) -> Result<Self> {
        let base_url = Url::parse(XERO_API_BASE).expect("valid default Xero URL");
        Self::with_base_url(access_token, tenant_id, base_url)
    }

    pub fn with_base_url(access_token: String, tenant_id: String, base_url: Url) -> Result<Self> {
        Ok(Self {
            http: http_client()?,
            base_url,
            access_token,
            tenant_id,
        })
    }

    /// Client for a session that passed the token gate.
    pub fn authorized(auth: &Authorized, tenant_id: String, base_url: Url) -> Result<Self> {
        Self::with_base_url(auth.access_token().to_string(), tenant_id, base_url)
    }

    /// Build a tenant-scoped request against `path` (relative to the API base).
    pub fn build_request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        accept: &str,
    ) -> Result<reqwest::Request> {
        let endpoint = self
            .base_url
            .join(path)
            .context("invalid Xero base URL")?;
        self.http
            .request(method, endpoint)
            .bearer_auth(&self.access_token)
            .header("xero-tenant-id", &self.tenant_id)
            .header(header::ACCEPT, accept)
            .query(query)
            .build()
            .context("failed to build Xero request")
    }

    async fn execute(&self, request: reqwest::Request) -> Result<Response> {
        debug!(method=%request.method(), url=%request.url(), "sending xero request");
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach Xero")?;
        check_status(res).await
    }

    async fn fetch_json<T: DeserializeOwned>(&self, request: reqwest::Request) -> Result<T> {
        let res = self.execute(request).await?;
        res.json::<T>().await.context("invalid Xero response JSON")
    }

    /// Stream a binary response body into a fresh artifact in `dir`.
    async fn download(&self, request: reqwest::Request, dir: &Path) -> Result<Artifact> {
        let mut res = self.execute(request).await?;
        let (artifact, mut file) = Artifact::create_in(dir).await?;
        while let Some(chunk) = res.chunk().await.context("failed to read download body")? {
            file.write_all(&chunk)
                .await
                .with_context(|| format!("failed to write {}", artifact.path().display()))?;
        }
        file.flush().await?;
        Ok(artifact)
    }

    pub fn invoices_request(&self, query: &InvoiceQuery, page: u32) -> Result<reqwest::Request> {
        let params = vec![
            ("Statuses", query.statuses.join(",")),
            ("order", query.order.clone()),
            ("page", page.to_string()),
            ("pageSize", query.page_size.to_string()),
            ("includeArchived", query.include_archived.to_string()),
        ];
        let mut request = self.build_request(
            Method::GET,
            &format!("{}Invoices", ACCOUNTING),
            &params,
            "application/json",
        )?;
        request.headers_mut().insert(
            header::IF_MODIFIED_SINCE,
            modified_since_header(query.modified_since).parse()?,
        );
        Ok(request)
    }

    pub fn files_request(&self, page: u32, page_size: u32) -> Result<reqwest::Request> {
        let params = vec![
            ("pagesize", page_size.to_string()),
            ("page", page.to_string()),
            ("sort", "CreatedDateUTC".to_string()),
            ("direction", "DESC".to_string()),
        ];
        self.build_request(
            Method::GET,
            &format!("{}Files", FILES),
            &params,
            "application/json",
        )
    }
}

#[async_trait]
impl XeroService for XeroClient {
    async fn invoices_page(&self, query: &InvoiceQuery, page: u32) -> Result<Vec<Invoice>> {
        let request = self.invoices_request(query, page)?;
        let resp: InvoicesResp = self.fetch_json(request).await?;
        Ok(resp.invoices)
    }

    async fn invoice_pdf(&self, invoice_id: &str, dir: &Path) -> Result<Artifact> {
        let request = self.build_request(
            Method::GET,
            &format!("{}Invoices/{}", ACCOUNTING, invoice_id),
            &[],
            "application/pdf",
        )?;
        self.download(request, dir).await
    }

    async fn expense_claims(&self, query: &ExpenseQuery) -> Result<Vec<ExpenseClaim>> {
        let mut request = self.build_request(
            Method::GET,
            &format!("{}ExpenseClaims", ACCOUNTING),
            &[("where", query.where_clause.clone())],
            "application/json",
        )?;
        request.headers_mut().insert(
            header::IF_MODIFIED_SINCE,
            modified_since_header(query.modified_since).parse()?,
        );
        let resp: ExpenseClaimsResp = self.fetch_json(request).await?;
        Ok(resp.expense_claims)
    }

    async fn files_page(&self, page: u32, page_size: u32) -> Result<Vec<FileObject>> {
        let request = self.files_request(page, page_size)?;
        let resp: FilesResp = self.fetch_json(request).await?;
        debug!(page, total = ?resp.total_count, returned = resp.items.len(), "files page");
        Ok(resp.items)
    }

    async fn file_associations(&self, file_id: &str) -> Result<Vec<Association>> {
        let request = self.build_request(
            Method::GET,
            &format!("{}Files/{}/Associations", FILES, file_id),
            &[],
            "application/json",
        )?;
        self.fetch_json(request).await
    }

    async fn file_content(&self, file_id: &str, dir: &Path) -> Result<Artifact> {
        let request = self.build_request(
            Method::GET,
            &format!("{}Files/{}/Content", FILES, file_id),
            &[],
            "application/octet-stream",
        )?;
        self.download(request, dir).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> XeroClient {
        XeroClient::new("token".into(), "tenant-1".into()).unwrap()
    }

    fn header<'a>(request: &'a reqwest::Request, name: &str) -> &'a str {
        request
            .headers()
            .get(name)
            .and_then(|h| h.to_str().ok())
            .unwrap()
    }

    #[test]
    fn build_request_sets_headers() {
        let request = client()
            .build_request(Method::GET, "api.xro/2.0/Invoices/abc", &[], "application/pdf")
            .unwrap();
        assert_eq!(request.method(), Method::GET);
        assert_eq!(request.url().path(), "/api.xro/2.0/Invoices/abc");
        assert_eq!(header(&request, "Authorization"), "Bearer token");
        assert_eq!(header(&request, "xero-tenant-id"), "tenant-1");
        assert_eq!(header(&request, "Accept"), "application/pdf");
    }

    #[test]
    fn invoices_request_carries_filters() {
        let query = InvoiceQuery {
            modified_since: NaiveDate::from_ymd_opt(2019, 1, 1).unwrap(),
            statuses: vec!["PAID".into()],
            order: "InvoiceNumber DESC".into(),
            page_size: 100,
            include_archived: true,
        };
        let request = client().invoices_request(&query, 3).unwrap();
        let pairs: Vec<(String, String)> = request
            .url()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(pairs.contains(&("Statuses".into(), "PAID".into())));
        assert!(pairs.contains(&("order".into(), "InvoiceNumber DESC".into())));
        assert!(pairs.contains(&("page".into(), "3".into())));
        assert!(pairs.contains(&("pageSize".into(), "100".into())));
        assert!(pairs.contains(&("includeArchived".into(), "true".into())));
        assert_eq!(header(&request, "If-Modified-Since"), "2019-01-01T00:00:00");
    }

    #[test]
    fn files_request_sorts_newest_first() {
        let request = client().files_request(2, 50).unwrap();
        assert_eq!(request.url().path(), "/files.xro/1.0/Files");
        let query = request.url().query().unwrap();
        assert!(query.contains("pagesize=50"));
        assert!(query.contains("page=2"));
        assert!(query.contains("sort=CreatedDateUTC"));
        assert!(query.contains("direction=DESC"));
    }

    #[test]
    fn organisation_tenant_picks_first_organisation() {
        let conns = vec![
            Connection {
                id: "c1".into(),
                tenant_id: "practice".into(),
                tenant_type: "PRACTICEMANAGER".into(),
                tenant_name: None,
            },
            Connection {
                id: "c2".into(),
                tenant_id: "org-1".into(),
                tenant_type: "ORGANISATION".into(),
                tenant_name: Some("Demo Co".into()),
            },
        ];
        assert_eq!(organisation_tenant(&conns), Some("org-1"));
        assert_eq!(organisation_tenant(&conns[..1]), None);
    }
}

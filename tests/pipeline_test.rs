use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use xero_archiver::auth::{require_token, CredentialStore, MemoryCredentialStore, OAuth2Token};
use xero_archiver::config::{self, Config};
use xero_archiver::db;
use xero_archiver::model::{Association, ExpenseClaim, FileObject, Invoice};
use xero_archiver::sync::artifact::Artifact;
use xero_archiver::sync::endpoints::{ExpensesEndpoint, FileKind, FilesEndpoint, InvoicesEndpoint};
use xero_archiver::sync::report::{render, summarize, Retention};
use xero_archiver::sync::walker::{walk, WalkEnd, WalkPlan};
use xero_archiver::sync::Archiver;
use xero_archiver::xero::{ExpenseQuery, InvoiceQuery, XeroService};

async fn setup_pool() -> sqlx::SqlitePool {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

#[derive(Clone, Default)]
struct RecordingXero {
    invoice_pages: Arc<Mutex<VecDeque<Result<Vec<Invoice>>>>>,
    file_pages: Arc<Mutex<VecDeque<Result<Vec<FileObject>>>>>,
    expenses: Arc<Mutex<Vec<ExpenseClaim>>>,
    associations: Arc<Mutex<HashMap<String, Result<Vec<Association>>>>>,
    page_calls: Arc<Mutex<Vec<u32>>>,
    expense_calls: Arc<Mutex<u32>>,
    downloads: Arc<Mutex<Vec<String>>>,
    download_delay: Option<Duration>,
}

impl RecordingXero {
    fn with_invoice_pages(pages: Vec<Result<Vec<Invoice>>>) -> Self {
        Self {
            invoice_pages: Arc::new(Mutex::new(VecDeque::from(pages))),
            ..Default::default()
        }
    }

    fn with_file_pages(pages: Vec<Result<Vec<FileObject>>>) -> Self {
        Self {
            file_pages: Arc::new(Mutex::new(VecDeque::from(pages))),
            ..Default::default()
        }
    }

    async fn associate(&self, file_id: &str, assocs: Result<Vec<Association>>) {
        self.associations
            .lock()
            .await
            .insert(file_id.to_string(), assocs);
    }

    async fn page_calls(&self) -> Vec<u32> {
        self.page_calls.lock().await.clone()
    }

    async fn downloads(&self) -> Vec<String> {
        self.downloads.lock().await.clone()
    }

    async fn fake_download(&self, id: &str, dir: &Path) -> Result<Artifact> {
        self.downloads.lock().await.push(id.to_string());
        let artifact = Artifact::from_bytes(dir, format!("content of {}", id).as_bytes()).await?;
        if let Some(delay) = self.download_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(artifact)
    }
}

#[async_trait]
impl XeroService for RecordingXero {
    async fn invoices_page(&self, _query: &InvoiceQuery, page: u32) -> Result<Vec<Invoice>> {
        self.page_calls.lock().await.push(page);
        self.invoice_pages
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok(vec![]))
    }

    async fn invoice_pdf(&self, invoice_id: &str, dir: &Path) -> Result<Artifact> {
        self.fake_download(invoice_id, dir).await
    }

    async fn expense_claims(&self, _query: &ExpenseQuery) -> Result<Vec<ExpenseClaim>> {
        *self.expense_calls.lock().await += 1;
        Ok(self.expenses.lock().await.clone())
    }

    async fn files_page(&self, page: u32, _page_size: u32) -> Result<Vec<FileObject>> {
        self.page_calls.lock().await.push(page);
        self.file_pages
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok(vec![]))
    }

    async fn file_associations(&self, file_id: &str) -> Result<Vec<Association>> {
        match self.associations.lock().await.remove(file_id) {
            Some(result) => result,
            None => Ok(vec![]),
        }
    }

    async fn file_content(&self, file_id: &str, dir: &Path) -> Result<Artifact> {
        self.fake_download(file_id, dir).await
    }
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn invoice(id: &str, number: &str, paid_on: &str) -> Invoice {
    serde_json::from_value(json!({
        "InvoiceID": id,
        "InvoiceNumber": number,
        "Type": "ACCREC",
        "Status": "PAID",
        "Date": "2019-05-20T00:00:00",
        "FullyPaidOnDate": paid_on,
        "AmountPaid": 1500.75,
        "Total": 1500.75,
    }))
    .unwrap()
}

fn file(id: &str, name: &str, created: &str) -> FileObject {
    serde_json::from_value(json!({
        "Id": id,
        "Name": name,
        "MimeType": "application/pdf",
        "Size": 1024,
        "CreatedDateUtc": created,
        "User": { "Id": "u-1", "FullName": "Jane Doe" },
    }))
    .unwrap()
}

fn association(object_id: &str, object_type: &str) -> Association {
    serde_json::from_value(json!({
        "ObjectId": object_id,
        "ObjectType": object_type,
    }))
    .unwrap()
}

fn plan(max_pages: u32) -> WalkPlan {
    WalkPlan::paged(max_pages, Duration::from_secs(60), Duration::from_secs(5))
}

fn leftover_parts(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".part"))
        .collect()
}

#[tokio::test]
async fn cutoff_stops_scan_within_page_and_before_next_page() {
    let td = tempfile::tempdir().unwrap();
    let api = RecordingXero::with_invoice_pages(vec![
        Ok(vec![
            invoice("i-1", "INV-003", "2019-06-01T00:00:00"),
            invoice("i-2", "INV-002", "2018-12-31T00:00:00"),
            invoice("i-3", "INV-001", "2019-01-15T00:00:00"),
        ]),
        Ok(vec![invoice("i-4", "INV-000", "2019-03-01T00:00:00")]),
    ]);
    let endpoint = InvoicesEndpoint::new(&api, date(2019, 1, 1), 100, td.path().to_path_buf());

    let batch = walk(&endpoint, &plan(7), Retention::Items).await.unwrap();

    assert_eq!(batch.end, WalkEnd::Cutoff { page: 1, index: 1 });
    assert_eq!(batch.count, 1);
    assert_eq!(api.page_calls().await, vec![1]);
    assert_eq!(api.downloads().await, vec!["i-1".to_string()]);
    let kept: Vec<String> = batch
        .items
        .unwrap()
        .iter()
        .map(|i| i.invoice_id.clone())
        .collect();
    assert_eq!(kept, vec!["i-1"]);
    assert!(td
        .path()
        .join("2019-05-20_INV-003_2019-06-01_1500.pdf")
        .is_file());
}

#[tokio::test]
async fn invoices_of_other_kind_or_status_are_excluded() {
    let td = tempfile::tempdir().unwrap();
    let mut purchase = invoice("i-2", "BILL-1", "2019-06-01T00:00:00");
    purchase.kind = Some("ACCPAY".into());
    let mut draft = invoice("i-3", "INV-9", "2019-06-01T00:00:00");
    draft.status = Some("AUTHORISED".into());
    let api = RecordingXero::with_invoice_pages(vec![Ok(vec![
        invoice("i-1", "INV-1", "2019-06-01T00:00:00"),
        purchase,
        draft,
    ])]);
    let endpoint = InvoicesEndpoint::new(&api, date(2019, 1, 1), 100, td.path().to_path_buf());

    let batch = walk(&endpoint, &plan(7), Retention::Items).await.unwrap();

    assert_eq!(batch.count, 1);
    assert_eq!(batch.skipped, 2);
    assert_eq!(api.downloads().await, vec!["i-1".to_string()]);
    // page 2 comes back empty
    assert_eq!(batch.end, WalkEnd::Exhausted);
    assert_eq!(api.page_calls().await, vec![1, 2]);
}

#[tokio::test]
async fn receipts_need_a_receipt_association() {
    let td = tempfile::tempdir().unwrap();
    let api = RecordingXero::with_file_pages(vec![Ok(vec![
        file("f-1", "lonely.pdf", "2024-03-01T10:00:00"),
        file("f-2", "coffee shop.jpg", "2024-02-01T09:30:00"),
        file("f-3", "supplier.pdf", "2024-01-15T08:00:00"),
        file("f-4", "broken.pdf", "2024-01-10T08:00:00"),
    ])]);
    api.associate("f-2", Ok(vec![association("r-9", "Receipt")]))
        .await;
    api.associate("f-3", Ok(vec![association("b-1", "ACCPAY")]))
        .await;
    api.associate("f-4", Err(anyhow!("500 from Xero"))).await;
    let endpoint = FilesEndpoint::new(
        &api,
        FileKind::Receipts,
        date(2020, 1, 1),
        100,
        td.path().to_path_buf(),
    );

    let batch = walk(&endpoint, &plan(25), Retention::Count).await.unwrap();

    assert_eq!(batch.count, 1);
    assert_eq!(batch.skipped, 3);
    assert_eq!(batch.failed, 0);
    assert!(batch.items.is_none());
    assert_eq!(api.downloads().await, vec!["f-2".to_string()]);
    assert!(td
        .path()
        .join("2024-02-01_Jane-Doe_r-9_coffee_shop.jpg")
        .is_file());
}

#[tokio::test]
async fn bills_accept_payable_associations() {
    let td = tempfile::tempdir().unwrap();
    let api = RecordingXero::with_file_pages(vec![Ok(vec![
        file("f-1", "rent march.pdf", "2024-03-01T10:00:00"),
        file("f-2", "cash buy.pdf", "2024-02-01T10:00:00"),
        file("f-3", "receipt.pdf", "2024-01-01T10:00:00"),
        file("f-4", "old.pdf", "2019-12-31T23:59:59"),
    ])]);
    api.associate("f-1", Ok(vec![association("b-1", "ACCPAY")]))
        .await;
    api.associate("f-2", Ok(vec![association("b-2", "CASHPAID")]))
        .await;
    api.associate("f-3", Ok(vec![association("r-1", "RECEIPT")]))
        .await;
    let endpoint = FilesEndpoint::new(
        &api,
        FileKind::Bills,
        date(2020, 1, 1),
        100,
        td.path().to_path_buf(),
    );

    let batch = walk(&endpoint, &plan(25), Retention::Count).await.unwrap();

    assert_eq!(batch.count, 2);
    assert_eq!(batch.end, WalkEnd::Cutoff { page: 1, index: 3 });
    assert!(td.path().join("2024-03-01_rent_march.pdf").is_file());
    assert!(td.path().join("2024-02-01_cash_buy.pdf").is_file());
}

#[tokio::test]
async fn failed_rename_removes_temp_file_and_batch_continues() {
    let td = tempfile::tempdir().unwrap();
    // A non-empty directory where the first file should land.
    let blocker = td.path().join("2024-03-01_first.pdf");
    std::fs::create_dir(&blocker).unwrap();
    std::fs::write(blocker.join("keep"), b"x").unwrap();

    let api = RecordingXero::with_file_pages(vec![Ok(vec![
        file("f-1", "first.pdf", "2024-03-01T10:00:00"),
        file("f-2", "second.pdf", "2024-02-01T10:00:00"),
    ])]);
    api.associate("f-1", Ok(vec![association("b-1", "ACCPAY")]))
        .await;
    api.associate("f-2", Ok(vec![association("b-2", "ACCPAY")]))
        .await;
    let endpoint = FilesEndpoint::new(
        &api,
        FileKind::Bills,
        date(2020, 1, 1),
        100,
        td.path().to_path_buf(),
    );

    let batch = walk(&endpoint, &plan(25), Retention::Count).await.unwrap();

    assert_eq!(batch.count, 1);
    assert_eq!(batch.failed, 1);
    assert_eq!(api.downloads().await, vec!["f-1".to_string(), "f-2".to_string()]);
    assert!(td.path().join("2024-02-01_second.pdf").is_file());
    assert!(leftover_parts(td.path()).is_empty());
}

#[tokio::test]
async fn zero_match_batch_reports_zero() {
    let td = tempfile::tempdir().unwrap();
    let api = RecordingXero::default();
    let endpoint = InvoicesEndpoint::new(&api, date(2019, 1, 1), 100, td.path().to_path_buf());

    let batch = walk(&endpoint, &plan(7), Retention::Items).await.unwrap();
    let summary = summarize("Invoices", &batch).unwrap();

    assert_eq!(summary.count, 0);
    assert_eq!(summary.items, Some(vec![]));
    assert_eq!(summary.scan, WalkEnd::Exhausted);
    assert!(!summary.incomplete);
    assert!(render(&summary).unwrap().contains("\"count\": 0"));
}

#[tokio::test]
async fn page_cap_marks_result_incomplete() {
    let td = tempfile::tempdir().unwrap();
    let api = RecordingXero::with_invoice_pages(vec![
        Ok(vec![invoice("i-1", "INV-3", "2019-06-01T00:00:00")]),
        Ok(vec![invoice("i-2", "INV-2", "2019-05-01T00:00:00")]),
        Ok(vec![invoice("i-3", "INV-1", "2019-04-01T00:00:00")]),
    ]);
    let endpoint = InvoicesEndpoint::new(&api, date(2019, 1, 1), 100, td.path().to_path_buf());

    let batch = walk(&endpoint, &plan(2), Retention::Items).await.unwrap();

    assert_eq!(batch.end, WalkEnd::PageCap);
    assert!(batch.incomplete());
    assert_eq!(batch.count, 2);
    assert_eq!(api.page_calls().await, vec![1, 2]);
}

#[tokio::test]
async fn page_error_aborts_run() {
    let td = tempfile::tempdir().unwrap();
    let api = RecordingXero::with_invoice_pages(vec![
        Ok(vec![invoice("i-1", "INV-3", "2019-06-01T00:00:00")]),
        Err(anyhow!("429 rate limited")),
        Ok(vec![invoice("i-3", "INV-1", "2019-04-01T00:00:00")]),
    ]);
    let endpoint = InvoicesEndpoint::new(&api, date(2019, 1, 1), 100, td.path().to_path_buf());

    let err = walk(&endpoint, &plan(7), Retention::Items).await.unwrap_err();

    assert!(format!("{:#}", err).contains("page 2"));
    assert_eq!(api.page_calls().await, vec![1, 2]);
}

#[tokio::test]
async fn expired_deadline_yields_partial_result() {
    let td = tempfile::tempdir().unwrap();
    let api = RecordingXero::with_invoice_pages(vec![Ok(vec![
        invoice("i-1", "INV-3", "2019-06-01T00:00:00"),
        invoice("i-2", "INV-2", "2019-05-01T00:00:00"),
    ])]);
    let endpoint = InvoicesEndpoint::new(&api, date(2019, 1, 1), 100, td.path().to_path_buf());
    let mut plan = plan(7);
    plan.deadline = tokio::time::Instant::now();

    let batch = walk(&endpoint, &plan, Retention::Items).await.unwrap();

    assert_eq!(batch.end, WalkEnd::Deadline);
    assert!(batch.incomplete());
    assert_eq!(batch.count, 0);
    assert!(api.downloads().await.is_empty());
}

#[tokio::test]
async fn run_deadline_interrupts_item_in_flight() {
    let td = tempfile::tempdir().unwrap();
    let mut api = RecordingXero::with_invoice_pages(vec![Ok(vec![
        invoice("i-1", "INV-3", "2019-06-01T00:00:00"),
        invoice("i-2", "INV-2", "2019-05-01T00:00:00"),
    ])]);
    api.download_delay = Some(Duration::from_secs(2));
    let endpoint = InvoicesEndpoint::new(&api, date(2019, 1, 1), 100, td.path().to_path_buf());
    let plan = WalkPlan::paged(7, Duration::from_millis(100), Duration::from_secs(30));

    let started = std::time::Instant::now();
    let batch = walk(&endpoint, &plan, Retention::Items).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(batch.end, WalkEnd::Deadline);
    assert!(batch.incomplete());
    assert_eq!(batch.count, 0);
    assert_eq!(batch.failed, 0);
    assert_eq!(api.downloads().await, vec!["i-1".to_string()]);
    assert!(leftover_parts(td.path()).is_empty());
    assert!(!td
        .path()
        .join("2019-05-20_INV-3_2019-06-01_1500.pdf")
        .exists());
}

#[tokio::test]
async fn item_timeout_fails_item_and_cleans_up() {
    let td = tempfile::tempdir().unwrap();
    let mut api = RecordingXero::with_invoice_pages(vec![Ok(vec![
        invoice("i-1", "INV-3", "2019-06-01T00:00:00"),
        invoice("i-2", "INV-2", "2019-05-01T00:00:00"),
    ])]);
    api.download_delay = Some(Duration::from_secs(2));
    let endpoint = InvoicesEndpoint::new(&api, date(2019, 1, 1), 100, td.path().to_path_buf());
    let plan = WalkPlan::paged(7, Duration::from_secs(60), Duration::from_millis(200));

    let batch = walk(&endpoint, &plan, Retention::Items).await.unwrap();

    assert_eq!(batch.end, WalkEnd::Exhausted);
    assert_eq!(batch.count, 0);
    assert_eq!(batch.failed, 2);
    assert_eq!(api.downloads().await, vec!["i-1".to_string(), "i-2".to_string()]);
    assert!(leftover_parts(td.path()).is_empty());
    let stored = std::fs::read_dir(td.path()).unwrap().count();
    assert_eq!(stored, 0);
}

#[tokio::test]
async fn expenses_use_one_call_and_keep_paid_claims() {
    let api = RecordingXero::default();
    let claims: Vec<ExpenseClaim> = serde_json::from_value(json!([
        { "ExpenseClaimID": "e-1", "Status": "PAID", "Total": 42.5,
          "UpdatedDateUTC": "/Date(1718000000000+0000)/" },
        { "ExpenseClaimID": "e-2", "Status": "AUTHORISED", "Total": 10 },
    ]))
    .unwrap();
    *api.expenses.lock().await = claims;
    let endpoint = ExpensesEndpoint::new(&api, date(2024, 1, 1));
    let plan = WalkPlan::single(Duration::from_secs(60), Duration::from_secs(5));

    let batch = walk(&endpoint, &plan, Retention::Items).await.unwrap();

    assert_eq!(*api.expense_calls.lock().await, 1);
    assert_eq!(batch.end, WalkEnd::Exhausted);
    assert_eq!(batch.count, 1);
    assert_eq!(batch.items.unwrap()[0].expense_claim_id, "e-1");
}

#[tokio::test]
async fn archiver_snapshots_invoices() {
    let td = tempfile::tempdir().unwrap();
    let mut cfg: Config = serde_yaml::from_str(config::example()).unwrap();
    cfg.app.data_dir = td.path().display().to_string();
    cfg.ensure_dirs().unwrap();
    let pool = setup_pool().await;

    let store = MemoryCredentialStore::default();
    let token: OAuth2Token = serde_json::from_value(json!({ "access_token": "at" })).unwrap();
    store.put("default", &token).await.unwrap();
    let auth = require_token(&store, "default").await.unwrap();

    let api = RecordingXero::with_invoice_pages(vec![Ok(vec![
        invoice("i-1", "INV-2", "2019-06-01T00:00:00"),
        invoice("i-2", "INV-1", "2018-06-01T00:00:00"),
    ])]);
    let summary = Archiver::new(&api, &cfg, &auth)
        .invoices(&pool)
        .await
        .unwrap();

    assert_eq!(summary.title, "Invoices");
    assert_eq!(summary.count, 1);
    let snap = db::latest_snapshot(&pool, "invoices").await.unwrap().unwrap();
    assert_eq!(snap.item_count, 1);
    let stored: Vec<Invoice> = snap.items().unwrap();
    assert_eq!(stored[0].invoice_id, "i-1");
    assert_eq!(stored[0].fully_paid_on_date, Some(date(2019, 6, 1)));
    assert!(cfg
        .endpoint_dir("invoices")
        .join("2019-05-20_INV-2_2019-06-01_1500.pdf")
        .is_file());
}

#[tokio::test]
async fn gate_blocks_sessions_without_token() {
    let store = MemoryCredentialStore::default();
    assert!(require_token(&store, "default").await.is_err());
    store
        .put(
            "other",
            &serde_json::from_value(json!({ "access_token": "at" })).unwrap(),
        )
        .await
        .unwrap();
    assert!(require_token(&store, "default").await.is_err());
    assert!(require_token(&store, "other").await.is_ok());
}

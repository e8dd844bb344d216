//! The archiving pipeline and its four endpoint runs.
//!
//! Every run goes through [`Archiver`], which can only be built from an
//! [`Authorized`] session.
use anyhow::Result;
use std::path::PathBuf;
use tracing::{info, instrument};

use crate::auth::Authorized;
use crate::config::Config;
use crate::db::{self, Pool};
use crate::xero::XeroService;

pub mod artifact;
pub mod endpoints;
pub mod filter;
pub mod naming;
pub mod report;
pub mod resolve;
pub mod walker;

use endpoints::{ExpensesEndpoint, FileKind, FilesEndpoint, InvoicesEndpoint};
use report::{summarize, Retention, Summary};
use walker::{walk, Endpoint, WalkPlan};

pub struct Archiver<'a> {
    api: &'a dyn XeroService,
    cfg: &'a Config,
    auth: &'a Authorized,
}

impl<'a> Archiver<'a> {
    pub fn new(api: &'a dyn XeroService, cfg: &'a Config, auth: &'a Authorized) -> Self {
        Self { api, cfg, auth }
    }

    fn paged(&self, max_pages: u32) -> WalkPlan {
        WalkPlan::paged(max_pages, self.cfg.app.run_deadline(), self.cfg.app.item_timeout())
    }

    fn dest(&self, dir: &str) -> PathBuf {
        self.cfg.endpoint_dir(dir)
    }

    /// Download paid sales invoices and store the accepted set as a snapshot.
    #[instrument(skip_all, fields(session = self.auth.session_id()))]
    pub async fn invoices(&self, pool: &Pool) -> Result<Summary> {
        let ep = &self.cfg.endpoints.invoices;
        let endpoint =
            InvoicesEndpoint::new(self.api, ep.floor, self.cfg.xero.page_size, self.dest(&ep.dir));
        let batch = walk(&endpoint, &self.paged(ep.max_pages), Retention::Items).await?;

        let items = batch.items.as_deref().unwrap_or_default();
        let snapshot = db::save_snapshot(pool, "invoices", items).await?;
        info!(count = batch.count, snapshot, "invoices run finished");
        summarize("Invoices", &batch)
    }

    /// List paid expense claims.
    #[instrument(skip_all, fields(session = self.auth.session_id()))]
    pub async fn expenses(&self) -> Result<Summary> {
        let ep = &self.cfg.endpoints.expenses;
        let endpoint = ExpensesEndpoint::new(self.api, ep.floor);
        let plan = WalkPlan::single(self.cfg.app.run_deadline(), self.cfg.app.item_timeout());
        let batch = walk(&endpoint, &plan, Retention::Items).await?;
        info!(count = batch.count, "expenses run finished");
        summarize("Expenses", &batch)
    }

    /// Download receipt files from the Files inbox.
    #[instrument(skip_all, fields(session = self.auth.session_id()))]
    pub async fn receipts(&self) -> Result<Summary> {
        let ep = &self.cfg.endpoints.receipts;
        self.files(FileKind::Receipts, ep, "Receipts").await
    }

    /// Download bill files from the Files inbox.
    #[instrument(skip_all, fields(session = self.auth.session_id()))]
    pub async fn bills(&self) -> Result<Summary> {
        let ep = &self.cfg.endpoints.bills;
        self.files(FileKind::Bills, ep, "Bills").await
    }

    async fn files(
        &self,
        kind: FileKind,
        ep: &crate::config::Paged,
        title: &str,
    ) -> Result<Summary> {
        let endpoint = FilesEndpoint::new(
            self.api,
            kind,
            ep.floor,
            self.cfg.xero.page_size,
            self.dest(&ep.dir),
        );
        let batch = walk(&endpoint, &self.paged(ep.max_pages), Retention::Count).await?;
        info!(
            count = batch.count,
            skipped = batch.skipped,
            failed = batch.failed,
            "{} run finished",
            endpoint.name()
        );
        summarize(title, &batch)
    }
}

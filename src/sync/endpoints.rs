//! The concrete pipelines: invoices, expenses, receipts and bills.
use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::model::{ExpenseClaim, FileObject, Invoice, Record};
use crate::sync::artifact::Artifact;
use crate::sync::filter::{classify, Cutoff, Rules, SkipReason, Verdict};
use crate::sync::naming::{bill_file_name, invoice_file_name, receipt_file_name};
use crate::sync::resolve::{resolve, AssociationRule};
use crate::sync::walker::{Endpoint, ItemResult, PageSource};
use crate::xero::{ExpenseQuery, InvoiceQuery, XeroService};

/// Relocate a freshly downloaded artifact to `dir/name`.
fn store(download: Result<Artifact>, dir: &Path, name: &str) -> ItemResult {
    let artifact = match download {
        Ok(artifact) => artifact,
        Err(err) => return ItemResult::failed(&err.context("download failed")),
    };
    match artifact.persist(&dir.join(name)) {
        Ok(_) => ItemResult::Accepted,
        Err(err) => ItemResult::Failed(err.to_string()),
    }
}

/// Paid sales invoices, downloaded as PDFs.
pub struct InvoicesEndpoint<'a> {
    api: &'a dyn XeroService,
    query: InvoiceQuery,
    rules: Rules,
    cutoff: Cutoff,
    dest: PathBuf,
}

impl<'a> InvoicesEndpoint<'a> {
    pub fn new(api: &'a dyn XeroService, floor: chrono::NaiveDate, page_size: u32, dest: PathBuf) -> Self {
        Self {
            api,
            query: InvoiceQuery {
                modified_since: floor,
                statuses: vec!["PAID".into()],
                order: "InvoiceNumber DESC".into(),
                page_size,
                include_archived: true,
            },
            rules: Rules {
                kind: Some("ACCREC".into()),
                statuses: Some(vec!["PAID".into()]),
                date_floor: Some(floor),
            },
            cutoff: Cutoff::new(floor),
            dest,
        }
    }
}

#[async_trait]
impl PageSource for InvoicesEndpoint<'_> {
    type Item = Invoice;

    async fn fetch_page(&self, page: u32) -> Result<Vec<Invoice>> {
        self.api.invoices_page(&self.query, page).await
    }
}

#[async_trait]
impl Endpoint for InvoicesEndpoint<'_> {
    fn name(&self) -> &'static str {
        "invoices"
    }

    fn verdict(&self, item: &Invoice) -> Verdict {
        classify(item, Some(&self.cutoff), &self.rules)
    }

    async fn process(&self, item: &Invoice) -> ItemResult {
        let name = match invoice_file_name(item) {
            Ok(name) => name,
            Err(err) => return ItemResult::Skipped(SkipReason::Unnameable(err.to_string())),
        };
        let download = self.api.invoice_pdf(item.id(), &self.dest).await;
        store(download, &self.dest, &name)
    }
}

/// Paid expense claims. One list call, nothing to download.
pub struct ExpensesEndpoint<'a> {
    api: &'a dyn XeroService,
    query: ExpenseQuery,
    rules: Rules,
}

impl<'a> ExpensesEndpoint<'a> {
    pub fn new(api: &'a dyn XeroService, floor: chrono::NaiveDate) -> Self {
        Self {
            api,
            query: ExpenseQuery {
                modified_since: floor,
                where_clause: r#"Status=="PAID""#.into(),
            },
            rules: Rules {
                statuses: Some(vec!["PAID".into()]),
                ..Rules::default()
            },
        }
    }
}

#[async_trait]
impl PageSource for ExpensesEndpoint<'_> {
    type Item = ExpenseClaim;

    async fn fetch_page(&self, _page: u32) -> Result<Vec<ExpenseClaim>> {
        self.api.expense_claims(&self.query).await
    }
}

#[async_trait]
impl Endpoint for ExpensesEndpoint<'_> {
    fn name(&self) -> &'static str {
        "expenses"
    }

    fn verdict(&self, item: &ExpenseClaim) -> Verdict {
        classify(item, None, &self.rules)
    }

    async fn process(&self, _item: &ExpenseClaim) -> ItemResult {
        ItemResult::Accepted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Receipts,
    Bills,
}

/// Files-inbox documents classified by their association.
pub struct FilesEndpoint<'a> {
    api: &'a dyn XeroService,
    kind: FileKind,
    page_size: u32,
    cutoff: Cutoff,
    rules: Rules,
    association: AssociationRule,
    dest: PathBuf,
}

impl<'a> FilesEndpoint<'a> {
    pub fn new(
        api: &'a dyn XeroService,
        kind: FileKind,
        floor: chrono::NaiveDate,
        page_size: u32,
        dest: PathBuf,
    ) -> Self {
        let association = match kind {
            FileKind::Receipts => AssociationRule::receipts(),
            FileKind::Bills => AssociationRule::bills(),
        };
        Self {
            api,
            kind,
            page_size,
            cutoff: Cutoff::new(floor),
            rules: Rules::default(),
            association,
            dest,
        }
    }
}

#[async_trait]
impl PageSource for FilesEndpoint<'_> {
    type Item = FileObject;

    async fn fetch_page(&self, page: u32) -> Result<Vec<FileObject>> {
        self.api.files_page(page, self.page_size).await
    }
}

#[async_trait]
impl Endpoint for FilesEndpoint<'_> {
    fn name(&self) -> &'static str {
        match self.kind {
            FileKind::Receipts => "receipts",
            FileKind::Bills => "bills",
        }
    }

    fn verdict(&self, item: &FileObject) -> Verdict {
        classify(item, Some(&self.cutoff), &self.rules)
    }

    async fn process(&self, item: &FileObject) -> ItemResult {
        let Some(assoc) = resolve(self.api, item.id()).await else {
            return ItemResult::Skipped(SkipReason::NoAssociation);
        };
        if !self.association.accepts(&assoc) {
            return ItemResult::Skipped(SkipReason::AssociationMismatch(
                assoc.object_type.to_string(),
            ));
        }
        let name = match self.kind {
            FileKind::Receipts => receipt_file_name(item, &assoc),
            FileKind::Bills => bill_file_name(item),
        };
        let name = match name {
            Ok(name) => name,
            Err(err) => return ItemResult::Skipped(SkipReason::Unnameable(err.to_string())),
        };
        let download = self.api.file_content(item.id(), &self.dest).await;
        store(download, &self.dest, &name)
    }
}

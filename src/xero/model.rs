use serde::Deserialize;

use crate::model::{ExpenseClaim, FileObject, Invoice};

#[derive(Deserialize, Debug)]
pub struct InvoicesResp {
    #[serde(rename = "Invoices", default)]
    pub invoices: Vec<Invoice>,
}

#[derive(Deserialize, Debug)]
pub struct ExpenseClaimsResp {
    #[serde(rename = "ExpenseClaims", default)]
    pub expense_claims: Vec<ExpenseClaim>,
}

#[derive(Deserialize, Debug)]
pub struct FilesResp {
    #[serde(rename = "TotalCount", default)]
    pub total_count: Option<u64>,
    #[serde(rename = "Page", default)]
    pub page: Option<u32>,
    #[serde(rename = "Items", default)]
    pub items: Vec<FileObject>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub id: String,
    pub tenant_id: String,
    pub tenant_type: String,
    #[serde(default)]
    pub tenant_name: Option<String>,
}

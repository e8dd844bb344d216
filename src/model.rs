use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::xero::date as xero_date;

/// Common view over the remote records the pipeline walks.
pub trait Record {
    /// Opaque remote identity.
    fn id(&self) -> &str;

    /// Type discriminator, e.g. `ACCREC` for sales invoices.
    fn kind(&self) -> Option<&str> {
        None
    }

    fn status(&self) -> Option<&str> {
        None
    }

    /// The date filters and cutoffs are evaluated against. `None` when the
    /// remote value is missing or malformed.
    fn relevant_date(&self) -> Option<NaiveDate>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContactRef {
    #[serde(rename = "ContactID", default)]
    pub contact_id: Option<String>,
    #[serde(rename = "Name", default)]
    pub name: Option<String>,
}

/// An accounting invoice (`ACCREC` sales or `ACCPAY` purchase).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Invoice {
    #[serde(rename = "InvoiceID")]
    pub invoice_id: String,
    #[serde(rename = "InvoiceNumber", default)]
    pub invoice_number: Option<String>,
    #[serde(rename = "Type", default)]
    pub kind: Option<String>,
    #[serde(rename = "Status", default)]
    pub status: Option<String>,
    #[serde(rename = "Date", default, deserialize_with = "xero_date::lenient_date")]
    pub date: Option<NaiveDate>,
    #[serde(
        rename = "FullyPaidOnDate",
        default,
        deserialize_with = "xero_date::lenient_date"
    )]
    pub fully_paid_on_date: Option<NaiveDate>,
    #[serde(rename = "AmountPaid", default)]
    pub amount_paid: Option<Decimal>,
    #[serde(rename = "Total", default)]
    pub total: Option<Decimal>,
    #[serde(rename = "CurrencyCode", default)]
    pub currency_code: Option<String>,
    #[serde(rename = "Contact", default)]
    pub contact: Option<ContactRef>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Record for Invoice {
    fn id(&self) -> &str {
        &self.invoice_id
    }

    fn kind(&self) -> Option<&str> {
        self.kind.as_deref()
    }

    fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    fn relevant_date(&self) -> Option<NaiveDate> {
        self.fully_paid_on_date
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExpenseClaim {
    #[serde(rename = "ExpenseClaimID")]
    pub expense_claim_id: String,
    #[serde(rename = "Status", default)]
    pub status: Option<String>,
    #[serde(rename = "Total", default)]
    pub total: Option<Decimal>,
    #[serde(rename = "AmountPaid", default)]
    pub amount_paid: Option<Decimal>,
    #[serde(
        rename = "PaymentDueDate",
        default,
        deserialize_with = "xero_date::lenient_date"
    )]
    pub payment_due_date: Option<NaiveDate>,
    #[serde(
        rename = "UpdatedDateUTC",
        default,
        deserialize_with = "xero_date::lenient_datetime"
    )]
    pub updated: Option<NaiveDateTime>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Record for ExpenseClaim {
    fn id(&self) -> &str {
        &self.expense_claim_id
    }

    fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    fn relevant_date(&self) -> Option<NaiveDate> {
        self.updated.map(|d| d.date())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct FileOwner {
    #[serde(rename = "Id", default)]
    pub id: Option<String>,
    #[serde(rename = "FullName", default)]
    pub full_name: Option<String>,
}

/// A document stored in the Files inbox.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileObject {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "MimeType", default)]
    pub mime_type: Option<String>,
    #[serde(rename = "Size", default)]
    pub size: Option<u64>,
    #[serde(
        rename = "CreatedDateUtc",
        default,
        deserialize_with = "xero_date::lenient_datetime"
    )]
    pub created: Option<NaiveDateTime>,
    #[serde(rename = "User", default)]
    pub user: Option<FileOwner>,
}

impl Record for FileObject {
    fn id(&self) -> &str {
        &self.id
    }

    fn relevant_date(&self) -> Option<NaiveDate> {
        self.created.map(|d| d.date())
    }
}

/// Business object a file is attached to. Names follow the upper-case
/// convention of the Files API enum; unknown values are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Receipt,
    Accpay,
    Accrec,
    CashPaid,
    CashRec,
    Other(String),
}

impl ObjectType {
    pub fn as_str(&self) -> &str {
        match self {
            ObjectType::Receipt => "RECEIPT",
            ObjectType::Accpay => "ACCPAY",
            ObjectType::Accrec => "ACCREC",
            ObjectType::CashPaid => "CASHPAID",
            ObjectType::CashRec => "CASHREC",
            ObjectType::Other(name) => name,
        }
    }
}

impl From<&str> for ObjectType {
    fn from(raw: &str) -> Self {
        match raw.to_ascii_uppercase().as_str() {
            "RECEIPT" => ObjectType::Receipt,
            "ACCPAY" => ObjectType::Accpay,
            "ACCREC" => ObjectType::Accrec,
            "CASHPAID" => ObjectType::CashPaid,
            "CASHREC" => ObjectType::CashRec,
            other => ObjectType::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ObjectType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ObjectType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(ObjectType::from(raw.as_str()))
    }
}

/// Binds a file to the business object it documents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Association {
    #[serde(rename = "FileId", default)]
    pub file_id: Option<String>,
    #[serde(rename = "ObjectId")]
    pub object_id: String,
    #[serde(rename = "ObjectType")]
    pub object_type: ObjectType,
    #[serde(rename = "ObjectGroup", default)]
    pub object_group: Option<String>,
}

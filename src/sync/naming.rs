//! Destination filenames for archived documents.
//!
//! These templates must stay byte-for-byte stable: existing archives are
//! keyed on them.
use rust_decimal::prelude::ToPrimitive;
use thiserror::Error;

use crate::model::{Association, FileObject, Invoice};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NameError {
    #[error("missing {0}")]
    Missing(&'static str),
    #[error("name contains a path separator: {0}")]
    Unsafe(String),
}

/// `{date}_{invoice_number}_{paid_date}_{integer_amount_paid}.pdf`
pub fn invoice_file_name(invoice: &Invoice) -> Result<String, NameError> {
    let date = invoice.date.ok_or(NameError::Missing("Date"))?;
    let number = invoice
        .invoice_number
        .as_deref()
        .ok_or(NameError::Missing("InvoiceNumber"))?;
    let paid = invoice
        .fully_paid_on_date
        .ok_or(NameError::Missing("FullyPaidOnDate"))?;
    let amount = invoice
        .amount_paid
        .and_then(|a| a.trunc().to_i64())
        .ok_or(NameError::Missing("AmountPaid"))?;
    checked(format!(
        "{}_{}_{}_{}.pdf",
        date.format("%Y-%m-%d"),
        number,
        paid.format("%Y-%m-%d"),
        amount
    ))
}

/// `{created}_{owner-with-dashes}_{object_id}_{name}`, then spaces become underscores.
pub fn receipt_file_name(file: &FileObject, assoc: &Association) -> Result<String, NameError> {
    let created = file.created.ok_or(NameError::Missing("CreatedDateUtc"))?;
    let owner = file
        .user
        .as_ref()
        .and_then(|u| u.full_name.as_deref())
        .ok_or(NameError::Missing("User.FullName"))?
        .replace(' ', "-");
    checked(
        format!(
            "{}_{}_{}_{}",
            created.format("%Y-%m-%d"),
            owner,
            assoc.object_id,
            file.name
        )
        .replace(' ', "_"),
    )
}

/// `{created}_{name}`, then spaces become underscores.
pub fn bill_file_name(file: &FileObject) -> Result<String, NameError> {
    let created = file.created.ok_or(NameError::Missing("CreatedDateUtc"))?;
    checked(format!("{}_{}", created.format("%Y-%m-%d"), file.name).replace(' ', "_"))
}

fn checked(name: String) -> Result<String, NameError> {
    if name.contains(['/', '\\', '\0']) {
        return Err(NameError::Unsafe(name));
    }
    Ok(name)
}

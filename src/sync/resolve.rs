//! Association lookup for Files inbox items.
//!
//! Only the first association returned by the API is consulted. The API does
//! not document any ordering, so "first" is not guaranteed to be the primary
//! association of a file that is attached to several objects.
use tracing::{debug, warn};

use crate::model::{Association, ObjectType};
use crate::xero::XeroService;

/// First association of `file_id`, or `None` when there is none or the
/// lookup failed.
pub async fn resolve(api: &dyn XeroService, file_id: &str) -> Option<Association> {
    match api.file_associations(file_id).await {
        Ok(assocs) => {
            if assocs.len() > 1 {
                debug!(file_id, count = assocs.len(), "several associations, using the first");
            }
            assocs.into_iter().next()
        }
        Err(err) => {
            warn!(?err, file_id, "association lookup failed");
            None
        }
    }
}

/// Object types an endpoint accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationRule {
    pub allowed: Vec<ObjectType>,
}

impl AssociationRule {
    pub fn receipts() -> Self {
        Self {
            allowed: vec![ObjectType::Receipt],
        }
    }

    pub fn bills() -> Self {
        Self {
            allowed: vec![ObjectType::Accpay, ObjectType::CashPaid],
        }
    }

    pub fn accepts(&self, assoc: &Association) -> bool {
        self.allowed.contains(&assoc.object_type)
    }
}

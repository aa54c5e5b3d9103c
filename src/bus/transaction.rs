//! Audited transaction scope.
//!
//! Groups a sequence of publishes under one `transaction_id` so their audit
//! events correlate. This is an auditing aggregate, not an ACID boundary:
//! records already appended to the log are not undone on rollback.

use uuid::Uuid;

/// Scope handle passed to the transaction closure. Stamp the id into each
/// publish (`PublishOptions::transaction_id`) so audit events correlate.
#[derive(Debug, Clone)]
pub struct TransactionScope {
    pub transaction_id: String,
}

impl TransactionScope {
    pub(crate) fn new() -> Self {
        Self {
            transaction_id: Uuid::new_v4().to_string(),
        }
    }
}

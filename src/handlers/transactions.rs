use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::domain::{AuditEntry, Transaction};
use crate::error::AppError;
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionView {
    pub transaction: Transaction,
    pub audit_trail: Vec<AuditEntry>,
}

pub async fn get_transaction(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> Result<Json<TransactionView>, AppError> {
    let (transaction, audit_trail) = state.services.ledger.history(&reference).await?;
    Ok(Json(TransactionView {
        transaction,
        audit_trail,
    }))
}

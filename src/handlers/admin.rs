use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;

use crate::domain::{StatementEntry, TransactionType};
use crate::error::AppError;
use crate::services::ledger::{LegacyRefundRequest, RefundRequest};
use crate::AppState;

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/reconciliation/statement", post(reconcile_statement))
        .route("/reconciliation/sweep", post(sweep_stale))
        .route("/transactions/:reference/review", post(review_mismatch))
        .route("/refunds", post(refund))
        .route("/conflicts", get(open_conflicts))
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum StatementPayload {
    Wrapped { entries: Vec<StatementEntry> },
    Bare(Vec<StatementEntry>),
}

impl StatementPayload {
    fn into_entries(self) -> Vec<StatementEntry> {
        match self {
            StatementPayload::Wrapped { entries } | StatementPayload::Bare(entries) => entries,
        }
    }
}

pub async fn reconcile_statement(
    State(state): State<AppState>,
    Json(payload): Json<StatementPayload>,
) -> Result<impl IntoResponse, AppError> {
    let entries = payload.into_entries();
    let report = state
        .services
        .reconciliation
        .reconcile_statement(&entries, Utc::now())
        .await?;
    Ok((StatusCode::OK, Json(report)))
}

pub async fn sweep_stale(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let report = state.services.reconciliation.sweep_stale(Utc::now()).await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReviewRequest {
    pub accept: bool,
    #[serde(default)]
    pub note: Option<String>,
}

pub async fn review_mismatch(
    State(state): State<AppState>,
    Path(reference): Path<String>,
    Json(review): Json<ReviewRequest>,
) -> Result<impl IntoResponse, AppError> {
    let now = Utc::now();
    let tx = state.services.ledger.get(&reference).await?;
    if tx.kind == TransactionType::Deposit {
        state
            .services
            .virtual_accounts
            .review_mismatch(&reference, review.accept, review.note, now)
            .await?;
        return Ok(Json(state.services.ledger.get(&reference).await?));
    }
    let outcome = state
        .services
        .ledger
        .review_mismatch(&reference, review.accept, review.note, now)
        .await?;
    Ok(Json(outcome.into_transaction()))
}

/// Accepts the current request shape and the older ones.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RefundPayload {
    Current(RefundRequest),
    Legacy(LegacyRefundRequest),
}

impl From<RefundPayload> for RefundRequest {
    fn from(payload: RefundPayload) -> Self {
        match payload {
            RefundPayload::Current(request) => request,
            RefundPayload::Legacy(legacy) => legacy.into(),
        }
    }
}

pub async fn refund(
    State(state): State<AppState>,
    Json(payload): Json<RefundPayload>,
) -> Result<impl IntoResponse, AppError> {
    let request = RefundRequest::from(payload);
    let outcome = state.services.ledger.refund(&request, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

#[derive(Debug, Deserialize)]
pub struct ConflictQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

pub async fn open_conflicts(
    State(state): State<AppState>,
    Query(query): Query<ConflictQuery>,
) -> Result<impl IntoResponse, AppError> {
    let limit = query.limit.clamp(1, 500);
    Ok(Json(state.services.ledger.open_conflicts(limit).await?))
}

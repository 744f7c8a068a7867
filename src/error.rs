use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::ports::RepositoryError;
use crate::services::charges::ChargeError;
use crate::services::reconciliation::ReconciliationError;
use crate::services::transfers::TransferError;
use crate::services::virtual_accounts::VirtualAccountError;
use crate::services::LedgerError;
use crate::validation::ValidationError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rejected: {0}")]
    Unprocessable(String),

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Gateway(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), "request failed: {}", self);
        }
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(what) => AppError::NotFound(what),
            RepositoryError::Duplicate(what) => AppError::Conflict(what),
            e @ (RepositoryError::InsufficientBalance { .. }
            | RepositoryError::QuotaExceeded { .. }) => AppError::Unprocessable(e.to_string()),
            e => AppError::Internal(e.to_string()),
        }
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::UnknownReference(reference) => {
                AppError::NotFound(format!("transaction {reference}"))
            }
            LedgerError::Validation(message) => AppError::Validation(message),
            e @ (LedgerError::InvalidTransition { .. }
            | LedgerError::KindMismatch { .. }
            | LedgerError::Contention(_)) => {
                AppError::Conflict(e.to_string())
            }
            e @ (LedgerError::InsufficientBalance { .. }
            | LedgerError::RefundExceedsRemaining { .. }
            | LedgerError::NotRefundable(_)) => AppError::Unprocessable(e.to_string()),
            LedgerError::Repository(e) => e.into(),
        }
    }
}

impl From<TransferError> for AppError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::Validation(e) => e.into(),
            TransferError::NotFound(what) => AppError::NotFound(format!("transfer {what}")),
            e @ (TransferError::InvalidState { .. }
            | TransferError::RetryLimitReached(_)
            | TransferError::AlreadyRetried(_)) => AppError::Conflict(e.to_string()),
            e @ (TransferError::AmountOutOfRange { .. }
            | TransferError::LimitExceeded { .. }
            | TransferError::InsufficientBalance { .. }
            | TransferError::BeneficiaryUnresolved(_)
            | TransferError::BatchTooLarge { .. }) => AppError::Unprocessable(e.to_string()),
            TransferError::Gateway(e) => AppError::Gateway(e.to_string()),
            TransferError::Ledger(e) => e.into(),
            TransferError::Repository(e) => e.into(),
        }
    }
}

impl From<VirtualAccountError> for AppError {
    fn from(err: VirtualAccountError) -> Self {
        match err {
            e @ VirtualAccountError::QuotaExceeded { .. } => AppError::Unprocessable(e.to_string()),
            VirtualAccountError::Validation(e) => e.into(),
            VirtualAccountError::NotFound(what) => {
                AppError::NotFound(format!("virtual account {what}"))
            }
            VirtualAccountError::Gateway(e) => AppError::Gateway(e.to_string()),
            VirtualAccountError::Ledger(e) => e.into(),
            VirtualAccountError::Repository(e) => e.into(),
        }
    }
}

impl From<ChargeError> for AppError {
    fn from(err: ChargeError) -> Self {
        match err {
            ChargeError::Validation(e) => e.into(),
            ChargeError::NotFound(what) => AppError::NotFound(format!("charge {what}")),
            ChargeError::Gateway(e) => AppError::Gateway(e.to_string()),
            ChargeError::Ledger(e) => e.into(),
        }
    }
}

impl From<ReconciliationError> for AppError {
    fn from(err: ReconciliationError) -> Self {
        match err {
            ReconciliationError::Statement(message) => AppError::BadRequest(message),
            ReconciliationError::Ledger(e) => e.into(),
            ReconciliationError::Repository(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TransactionStatus;

    #[test]
    fn test_validation_error_status_code() {
        let error = AppError::Validation("Invalid input".to_string());
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_unknown_reference_is_not_found() {
        let error: AppError = LedgerError::UnknownReference("DVA_1".to_string()).into();
        assert_eq!(error.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_invalid_transition_is_conflict() {
        let error: AppError = LedgerError::InvalidTransition {
            from: TransactionStatus::Success,
            to: TransactionStatus::Failed,
        }
        .into();
        assert_eq!(error.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_insufficient_balance_is_unprocessable() {
        let error: AppError = TransferError::InsufficientBalance {
            required: 10_150,
            available: 10_000,
        }
        .into();
        assert_eq!(error.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_quota_exceeded_is_unprocessable() {
        let error: AppError = VirtualAccountError::QuotaExceeded { active: 5, limit: 5 }.into();
        assert_eq!(error.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_database_error_is_internal() {
        let error: AppError = RepositoryError::Database(sqlx::Error::RowNotFound).into();
        assert_eq!(error.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_statement_error_is_bad_request() {
        let error: AppError = ReconciliationError::Statement("row 1: bad amount".to_string()).into();
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unauthorized_error_response() {
        let error = AppError::Unauthorized("missing admin key".to_string());
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_gateway_error_response() {
        let error = AppError::Gateway("gateway error timeout: no answer".to_string());
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}

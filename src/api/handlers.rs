use crate::errors::VaultServiceError;
use crate::models::*;
use crate::vault_manager::VaultManager;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tokio::sync::broadcast;

pub struct AppState {
    pub vault_manager: Arc<VaultManager>,
    pub events: broadcast::Sender<WsMessage>,
}

fn status_for_kind(kind: &str) -> StatusCode {
    match kind {
        "VALIDATION_ERROR" | "INSUFFICIENT_FUNDS" => StatusCode::BAD_REQUEST,
        "UTXO_ALREADY_SPENT" => StatusCode::CONFLICT,
        "SIGNING_ERROR" | "SUBMISSION_ERROR" | "LEDGER_ERROR" => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// Error response helper
impl IntoResponse for VaultServiceError {
    fn into_response(self) -> Response {
        let status = status_for_kind(self.kind());
        let body = Json(ErrorResponse {
            error: self.kind().to_string(),
            message: self.to_string(),
        });

        (status, body).into_response()
    }
}

impl IntoResponse for OperationResponse {
    fn into_response(self) -> Response {
        let status = match (&self.success, self.error_kind.as_deref()) {
            (true, _) => StatusCode::OK,
            (false, Some(kind)) => status_for_kind(kind),
            (false, None) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

// ============ API Handlers ============

/// Withdraw ADA from the vault to the connected wallet
pub async fn withdraw(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<WithdrawRequest>,
) -> OperationResponse {
    state.vault_manager.request_withdrawal(payload.amount_ada).await
}

/// Toggle the emergency stop
pub async fn emergency_stop(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<EmergencyStopRequest>,
) -> OperationResponse {
    state
        .vault_manager
        .request_emergency_stop(payload.current_state)
        .await
}

/// Move funds to the trading venue under the agent key
pub async fn agent_trade(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AgentTradeRequest>,
) -> OperationResponse {
    state
        .vault_manager
        .request_agent_trade(payload.amount_ada, payload.destination)
        .await
}

/// Current vault record at a script address
pub async fn get_vault_state(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
) -> Result<Response, VaultServiceError> {
    match state.vault_manager.get_vault_state(&address).await? {
        Some(record) => Ok(Json(record).into_response()),
        None => Ok((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "NOT_FOUND".to_string(),
                message: format!("No vault found at {}", address),
            }),
        )
            .into_response()),
    }
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        let spent = VaultServiceError::Submission {
            primary: "a".into(),
            fallback: "b".into(),
            inputs_spent: true,
        };
        assert_eq!(spent.into_response().status(), StatusCode::CONFLICT);
        assert_eq!(
            VaultServiceError::validation("no").into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            VaultServiceError::assembly("broken").into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_operation_response_status() {
        let ok = OperationResponse {
            success: true,
            tx_hash: Some("ab".repeat(32)),
            error: None,
            error_kind: None,
        };
        assert_eq!(ok.into_response().status(), StatusCode::OK);

        let declined = OperationResponse {
            success: false,
            tx_hash: None,
            error: Some("signer declined".into()),
            error_kind: Some("SIGNING_ERROR".into()),
        };
        assert_eq!(declined.into_response().status(), StatusCode::BAD_GATEWAY);
    }
}

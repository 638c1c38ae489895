use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde::Serialize;

/// Why an inbound gateway notification was rejected before decryption.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Notify {
  #[error("missing `{0}` header")]
  MissingHeader(&'static str),
  #[error("unexpected platform certificate serial `{0}`")]
  UnknownSerial(String),
  #[error("timestamp is outside the accepted window")]
  Stale,
  #[error("signature does not match")]
  BadSignature,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error("database error: {0}")]
  Db(#[from] sea_orm::DbErr),
  #[error("invalid arguments: {0}")]
  InvalidArgs(String),
  #[error("incorrect format: {0}")]
  IncorrectFormat(String),
  #[error("unsupported withdrawal method `{0}`")]
  InvalidMethod(String),
  #[error("amount is below the minimum of {0} cents")]
  BelowMinimum(i64),
  #[error("unauthorized notification: {0}")]
  Notify(#[from] Notify),
  #[error("failed to decrypt notification: {0}")]
  Decrypt(String),
  #[error("user not found")]
  UserNotFound,
  #[error("order not found")]
  OrderNotFound,
  #[error("withdrawal not found")]
  WithdrawalNotFound,
  #[error("commission not found")]
  CommissionNotFound,
  #[error("referral code not found")]
  ReferralNotFound,
  #[error("user is not an agent")]
  WithdrawalNotAllowed,
  #[error("another withdrawal is still in flight")]
  WithdrawalInFlight,
  #[error("insufficient balance")]
  InsufficientBalance,
  #[error("{entity} is `{from}`, cannot move to `{to}`")]
  InvalidTransition {
    entity: &'static str,
    from: &'static str,
    to: &'static str,
  },
  #[error("gateway error: {0}")]
  Gateway(String),
  #[error("operation timed out")]
  Timeout,
  #[error("internal error: {0}")]
  Internal(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
  pub fn status(&self) -> StatusCode {
    match self {
      Self::InvalidArgs(_)
      | Self::IncorrectFormat(_)
      | Self::InvalidMethod(_)
      | Self::BelowMinimum(_)
      | Self::Decrypt(_) => StatusCode::BAD_REQUEST,
      Self::Notify(_) => StatusCode::UNAUTHORIZED,
      Self::WithdrawalNotAllowed => StatusCode::FORBIDDEN,
      Self::UserNotFound
      | Self::OrderNotFound
      | Self::WithdrawalNotFound
      | Self::CommissionNotFound
      | Self::ReferralNotFound => StatusCode::NOT_FOUND,
      Self::WithdrawalInFlight
      | Self::InsufficientBalance
      | Self::InvalidTransition { .. } => StatusCode::CONFLICT,
      Self::Gateway(_) => StatusCode::BAD_GATEWAY,
      Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
      Self::Db(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }

  /// Whether a database error is a unique constraint violation.
  pub fn is_conflict(err: &sea_orm::DbErr) -> bool {
    matches!(
      err.sql_err(),
      Some(sea_orm::SqlErr::UniqueConstraintViolation(_))
    )
  }
}

#[derive(Serialize)]
pub struct Status {
  pub success: bool,
  pub msg: Option<String>,
}

impl IntoResponse for Error {
  fn into_response(self) -> Response {
    let status = self.status();
    if status.is_server_error() {
      tracing::error!("request failed: {self}");
    }

    // storage details stay in the log
    let msg = match &self {
      Self::Db(_) | Self::Internal(_) => "internal error".to_string(),
      other => other.to_string(),
    };

    (status, Json(Status { success: false, msg: Some(msg) })).into_response()
  }
}

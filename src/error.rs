use axum::{
	extract::rejection::{JsonRejection, PathRejection, QueryRejection},
	http::StatusCode,
	response::{IntoResponse, Response},
	Json,
};
use serde_json::json;
use thiserror::Error;

use crate::types::ItemStatus;

#[derive(Error, Debug)]
pub enum AppError {
	#[error("{0} not found")]
	NotFound(&'static str),

	#[error("{0}")]
	Conflict(String),

	#[error("Item is not available")]
	ItemUnavailable,

	#[error("Item is in {0} state and cannot be borrowed")]
	ItemUnderMaintenance(ItemStatus),

	#[error("No active loan to return")]
	NoActiveLoan,

	#[error("Access denied")]
	Forbidden,

	#[error("Not authenticated")]
	Unauthorized,

	#[error("{0}")]
	BadRequest(String),

	#[error("Storage error: {0}")]
	Storage(#[from] sqlx::Error),

	#[error("Internal error: {0}")]
	Internal(String),
}

impl AppError {
	pub fn kind(&self) -> &'static str {
		match self {
			AppError::NotFound(_) => "not_found",
			AppError::Conflict(_) => "conflict",
			AppError::ItemUnavailable => "item_unavailable",
			AppError::ItemUnderMaintenance(_) => "item_under_maintenance",
			AppError::NoActiveLoan => "no_active_loan",
			AppError::Forbidden => "forbidden",
			AppError::Unauthorized => "unauthorized",
			AppError::BadRequest(_) => "bad_request",
			AppError::Storage(_) => "storage",
			AppError::Internal(_) => "internal",
		}
	}

	/// Transient store failures the caller may retry. Domain errors never are.
	pub fn is_retryable(&self) -> bool {
		match self {
			AppError::Storage(e) => is_transient(e),
			_ => false,
		}
	}

	pub fn status(&self) -> StatusCode {
		match self {
			AppError::NotFound(_) => StatusCode::NOT_FOUND,
			AppError::Conflict(_)
			| AppError::ItemUnavailable
			| AppError::ItemUnderMaintenance(_)
			| AppError::NoActiveLoan => StatusCode::CONFLICT,
			AppError::Forbidden => StatusCode::FORBIDDEN,
			AppError::Unauthorized => StatusCode::UNAUTHORIZED,
			AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
			AppError::Storage(_) if self.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
			AppError::Storage(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}

	pub fn bad_request(msg: impl Into<String>) -> Self {
		AppError::BadRequest(msg.into())
	}
}

// SQLITE_BUSY / SQLITE_LOCKED and their extended codes
const BUSY_CODES: [&str; 5] = ["5", "6", "261", "262", "517"];

fn is_transient(e: &sqlx::Error) -> bool {
	match e {
		sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
		sqlx::Error::Database(db) => db
			.code()
			.map(|code| BUSY_CODES.iter().any(|busy| *busy == code))
			.unwrap_or(false),
		_ => false,
	}
}

pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
	matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

impl From<JsonRejection> for AppError {
	fn from(rejection: JsonRejection) -> Self {
		AppError::BadRequest(rejection.body_text())
	}
}

impl From<QueryRejection> for AppError {
	fn from(rejection: QueryRejection) -> Self {
		AppError::BadRequest(rejection.body_text())
	}
}

impl From<PathRejection> for AppError {
	fn from(rejection: PathRejection) -> Self {
		AppError::BadRequest(rejection.body_text())
	}
}

impl IntoResponse for AppError {
	fn into_response(self) -> Response {
		let status = self.status();
		match &self {
			AppError::Storage(e) => tracing::error!("storage failure: {e}"),
			AppError::Internal(e) => tracing::error!("internal failure: {e}"),
			_ => {}
		}

		let body = json!({
			"kind": self.kind(),
			"message": self.to_string(),
			"retryable": self.is_retryable(),
		});
		(status, Json(body)).into_response()
	}
}

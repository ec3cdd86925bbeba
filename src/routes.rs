use std::sync::Arc;

use axum::{
	extract::State,
	http::StatusCode,
	response::IntoResponse,
	Json,
};
use chrono::Utc;
use serde_json::json;
use tower_cookies::{Cookie, Cookies};

use crate::{
	auth::{self, Admin, Session, SESSION_COOKIE},
	error::AppError,
	extract::{JsonBody, PathArg, QueryArgs},
	items, ledger,
	ledger::Scope,
	state::State as AppState,
	stats,
	types::{FormLogin, FormPassword, FormRegister, ItemFilter, ItemId, ItemPatch, ItemRef, LoanId, NewItem, Role, Uid},
};

type Shared = State<Arc<AppState>>;

pub async fn index() -> &'static str {
	"invsys backend is running"
}

// auth

pub async fn register(State(state): Shared, JsonBody(form): JsonBody<FormRegister>) -> Result<impl IntoResponse, AppError> {
	let role = match form.role {
		None => Role::Student,
		Some(Role::Admin) => return Err(AppError::bad_request("Administrators cannot self-register")),
		Some(role) => role,
	};
	let user = auth::register(&state.db, &form, role, state.config.hash_cost, Utc::now()).await?;
	Ok((
		StatusCode::CREATED,
		Json(json!({ "message": "Registration successful", "user": user })),
	))
}

pub async fn login(
	State(state): Shared,
	cookies: Cookies,
	JsonBody(form): JsonBody<FormLogin>,
) -> Result<impl IntoResponse, AppError> {
	let (session, user) = auth::login(
		&state.db,
		&form.email,
		&form.pass,
		state.config.session_ttl,
		Utc::now(),
	)
	.await?;

	let token = session.token.to_string();
	cookies.add(
		Cookie::build((SESSION_COOKIE, token.clone()))
			.path("/")
			.http_only(true)
			.build(),
	);
	Ok(Json(json!({
		"token": token,
		"expires_at": session.expires_at,
		"user": user,
	})))
}

pub async fn logout(State(state): Shared, session: Session, cookies: Cookies) -> Result<impl IntoResponse, AppError> {
	auth::logout(&state.db, &session).await?;
	cookies.remove(Cookie::build(SESSION_COOKIE).path("/").build());
	Ok(Json(json!({ "message": "Logged out" })))
}

pub async fn profile(State(state): Shared, session: Session) -> Result<impl IntoResponse, AppError> {
	let user = auth::find_account(&state.db, session.account_id)
		.await?
		.ok_or(AppError::NotFound("User"))?;
	Ok(Json(json!({ "user": user, "session": session })))
}

pub async fn change_password(
	State(state): Shared,
	session: Session,
	JsonBody(form): JsonBody<FormPassword>,
) -> Result<impl IntoResponse, AppError> {
	auth::change_password(
		&state.db,
		session.account_id,
		&form.current,
		&form.new,
		state.config.hash_cost,
	)
	.await?;
	Ok(Json(json!({ "message": "Password changed" })))
}

// items

pub async fn list_items(
	State(state): Shared,
	_: Session,
	QueryArgs(filter): QueryArgs<ItemFilter>,
) -> Result<impl IntoResponse, AppError> {
	Ok(Json(items::list(&state.db, &filter).await?))
}

pub async fn get_item(State(state): Shared, _: Session, PathArg(id): PathArg<ItemId>) -> Result<impl IntoResponse, AppError> {
	let item = items::find(&state.db, id).await?.ok_or(AppError::NotFound("Item"))?;
	Ok(Json(item))
}

/// Resolves a scanned QR payload.
pub async fn item_by_code(
	State(state): Shared,
	_: Session,
	PathArg(code): PathArg<String>,
) -> Result<impl IntoResponse, AppError> {
	let item = items::find_by_code(&state.db, &code)
		.await?
		.ok_or(AppError::NotFound("Item"))?;
	Ok(Json(item))
}

pub async fn create_item(
	State(state): Shared,
	Admin(_): Admin,
	JsonBody(new): JsonBody<NewItem>,
) -> Result<impl IntoResponse, AppError> {
	let item = items::create(&state.db, &new, Utc::now()).await?;
	tracing::info!("item {} created with code {}", item.id, item.code);
	Ok((
		StatusCode::CREATED,
		Json(json!({ "message": "Item added successfully", "item": item })),
	))
}

pub async fn update_item(
	State(state): Shared,
	Admin(_): Admin,
	PathArg(id): PathArg<ItemId>,
	JsonBody(patch): JsonBody<ItemPatch>,
) -> Result<impl IntoResponse, AppError> {
	let item = state.lending.update_item(id, &patch, Utc::now()).await?;
	Ok(Json(json!({ "message": "Item updated successfully", "item": item })))
}

pub async fn delete_item(
	State(state): Shared,
	Admin(_): Admin,
	PathArg(id): PathArg<ItemId>,
) -> Result<impl IntoResponse, AppError> {
	state.lending.remove_item(id).await?;
	Ok(Json(json!({ "message": "Item deleted successfully" })))
}

// transactions

pub async fn all_transactions(State(state): Shared, Admin(_): Admin) -> Result<impl IntoResponse, AppError> {
	Ok(Json(ledger::list_all(&state.db, Utc::now()).await?))
}

pub async fn my_transactions(State(state): Shared, session: Session) -> Result<impl IntoResponse, AppError> {
	Ok(Json(ledger::list_for(&state.db, session.account_id, Utc::now()).await?))
}

/// Everyone's active loans for admins, otherwise the caller's own.
pub async fn active_transactions(State(state): Shared, session: Session) -> Result<impl IntoResponse, AppError> {
	let scope = if session.role.is_admin() {
		Scope::Everyone
	} else {
		Scope::Account(session.account_id)
	};
	Ok(Json(ledger::list_active(&state.db, scope, Utc::now()).await?))
}

pub async fn overdue_transactions(State(state): Shared, Admin(_): Admin) -> Result<impl IntoResponse, AppError> {
	Ok(Json(ledger::list_overdue(&state.db, Utc::now()).await?))
}

pub async fn get_transaction(
	State(state): Shared,
	session: Session,
	PathArg(id): PathArg<LoanId>,
) -> Result<impl IntoResponse, AppError> {
	let row = ledger::details(&state.db, id, Utc::now())
		.await?
		.ok_or(AppError::NotFound("Transaction"))?;
	if row.loan.account_id != session.account_id && !session.role.is_admin() {
		return Err(AppError::Forbidden);
	}
	Ok(Json(row))
}

pub async fn borrow(
	State(state): Shared,
	session: Session,
	JsonBody(item): JsonBody<ItemRef>,
) -> Result<impl IntoResponse, AppError> {
	let outcome = state.lending.borrow(&session, &item, Utc::now()).await?;
	Ok((
		StatusCode::CREATED,
		Json(json!({
			"message": "Item borrowed successfully",
			"transaction": outcome.transaction,
			"item": outcome.item,
		})),
	))
}

pub async fn return_transaction(
	State(state): Shared,
	session: Session,
	PathArg(id): PathArg<LoanId>,
) -> Result<impl IntoResponse, AppError> {
	let outcome = state.lending.return_loan(&session, id, Utc::now()).await?;
	Ok(Json(json!({
		"message": "Item returned successfully",
		"transaction": outcome.transaction,
		"item": outcome.item,
	})))
}

pub async fn return_item(
	State(state): Shared,
	session: Session,
	JsonBody(item): JsonBody<ItemRef>,
) -> Result<impl IntoResponse, AppError> {
	let outcome = state.lending.return_item(&session, &item, Utc::now()).await?;
	Ok(Json(json!({
		"message": "Item returned successfully",
		"transaction": outcome.transaction,
		"item": outcome.item,
	})))
}

// administration

pub async fn list_users(State(state): Shared, Admin(_): Admin) -> Result<impl IntoResponse, AppError> {
	Ok(Json(auth::list_accounts(&state.db).await?))
}

pub async fn toggle_user(
	State(state): Shared,
	Admin(admin): Admin,
	PathArg(id): PathArg<Uid>,
) -> Result<impl IntoResponse, AppError> {
	let user = auth::toggle_active(&state.db, &admin, id).await?;
	Ok(Json(json!({ "message": "User status updated", "user": user })))
}

pub async fn stats(State(state): Shared, Admin(_): Admin) -> Result<impl IntoResponse, AppError> {
	Ok(Json(stats::collect(&state.db, Utc::now()).await?))
}

pub async fn audit(State(state): Shared, Admin(_): Admin) -> Result<impl IntoResponse, AppError> {
	let discrepancies = state.lending.audit().await?;
	Ok(Json(json!({
		"consistent": discrepancies.is_empty(),
		"discrepancies": discrepancies,
	})))
}

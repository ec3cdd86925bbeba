//! Accounts and per-request sessions.
//!
//! A session is looked up from `Authorization: Bearer <token>` or the
//! `session` cookie and handed to handlers as an explicit [`Session`] value.

use std::sync::Arc;

use axum::{
	async_trait,
	extract::FromRequestParts,
	http::{header::AUTHORIZATION, request::Parts},
};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::{SqliteExecutor, SqlitePool};
use tower_cookies::Cookies;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
	config::AdminSeed,
	error::{is_unique_violation, AppError},
	state::State,
	types::{Account, FormRegister, Role, Uid},
};

pub const SESSION_COOKIE: &str = "session";
const MIN_PASSWORD: usize = 6;

/// Who is making the request, resolved once per request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
	#[serde(skip)]
	pub token: Uuid,
	pub account_id: Uid,
	pub role: Role,
	pub expires_at: DateTime<Utc>,
}

/// A session whose account is an administrator.
#[derive(Debug, Clone)]
pub struct Admin(pub Session);

#[derive(sqlx::FromRow)]
struct SessionRow {
	account_id: Uid,
	role: Role,
	active: bool,
	expires_at: DateTime<Utc>,
}

// CPU bound, run on the blocking pool
async fn hash_password(pass: &str, cost: u32) -> Result<String, AppError> {
	let pass = pass.to_string();
	tokio::task::spawn_blocking(move || bcrypt::hash(pass, cost))
		.await
		.map_err(|e| AppError::Internal(e.to_string()))?
		.map_err(|e| AppError::Internal(e.to_string()))
}

async fn verify_password(pass: &str, hash: &str) -> Result<bool, AppError> {
	let (pass, hash) = (pass.to_string(), hash.to_string());
	tokio::task::spawn_blocking(move || bcrypt::verify(pass, &hash))
		.await
		.map_err(|e| AppError::Internal(e.to_string()))?
		.map_err(|e| AppError::Internal(e.to_string()))
}

fn check_password(pass: &str) -> Result<(), AppError> {
	if pass.chars().count() < MIN_PASSWORD {
		return Err(AppError::bad_request(format!(
			"Password must be at least {MIN_PASSWORD} characters"
		)));
	}
	Ok(())
}

pub async fn find_account(db: impl SqliteExecutor<'_>, id: Uid) -> Result<Option<Account>, AppError> {
	let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = ?")
		.bind(id)
		.fetch_optional(db)
		.await?;
	Ok(account)
}

async fn find_by_email(db: impl SqliteExecutor<'_>, email: &str) -> Result<Option<Account>, AppError> {
	let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE email = ?")
		.bind(email.trim().to_lowercase())
		.fetch_optional(db)
		.await?;
	Ok(account)
}

pub async fn register(
	db: &SqlitePool,
	form: &FormRegister,
	role: Role,
	cost: u32,
	now: DateTime<Utc>,
) -> Result<Account, AppError> {
	let name = form.name.trim();
	let email = form.email.trim().to_lowercase();
	if name.is_empty() {
		return Err(AppError::bad_request("Name is required"));
	}
	if !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
		return Err(AppError::bad_request("A valid email is required"));
	}
	check_password(&form.pass)?;

	let pass_hash = hash_password(&form.pass, cost).await?;
	let account = sqlx::query_as::<_, Account>(
		r#"
INSERT INTO accounts
	(name, email, phone, pass_hash, role, active, created_at)
VALUES
	(?, ?, ?, ?, ?, true, ?)
RETURNING *
		"#,
	)
	.bind(name)
	.bind(&email)
	.bind(form.phone.as_deref().map(str::trim).filter(|p| !p.is_empty()))
	.bind(pass_hash)
	.bind(role)
	.bind(now)
	// to completion, so a login on another connection sees the account
	.fetch_all(db)
	.await
	.map_err(|e| {
		if is_unique_violation(&e) {
			AppError::Conflict("Email already registered".to_string())
		} else {
			AppError::from(e)
		}
	})?
	.pop()
	.ok_or(AppError::Storage(sqlx::Error::RowNotFound))?;

	info!("registered account {} ({:?})", account.id, account.role);
	Ok(account)
}

/// Checks credentials and opens a session valid for `ttl`.
pub async fn login(
	db: &SqlitePool,
	email: &str,
	pass: &str,
	ttl: Duration,
	now: DateTime<Utc>,
) -> Result<(Session, Account), AppError> {
	let account = find_by_email(db, email).await?.ok_or(AppError::Unauthorized)?;
	if !verify_password(pass, &account.pass_hash).await? {
		debug!("bad password for account {}", account.id);
		return Err(AppError::Unauthorized);
	}
	if !account.active {
		return Err(AppError::Forbidden);
	}
	let expires_at = now
		.checked_add_signed(ttl)
		.ok_or_else(|| AppError::bad_request("Session lifetime out of range"))?;

	let purged = sqlx::query("DELETE FROM sessions WHERE expires_at < ?")
		.bind(now)
		.execute(db)
		.await?
		.rows_affected();
	if purged > 0 {
		debug!("purged {purged} expired sessions");
	}

	let session = Session {
		token: Uuid::new_v4(),
		account_id: account.id,
		role: account.role,
		expires_at,
	};
	sqlx::query("INSERT INTO sessions (token, account_id, expires_at) VALUES (?, ?, ?)")
		.bind(session.token.to_string())
		.bind(session.account_id)
		.bind(session.expires_at)
		.execute(db)
		.await?;

	info!("account {} logged in", account.id);
	Ok((session, account))
}

pub async fn logout(db: &SqlitePool, session: &Session) -> Result<(), AppError> {
	sqlx::query("DELETE FROM sessions WHERE token = ?")
		.bind(session.token.to_string())
		.execute(db)
		.await?;
	Ok(())
}

/// Resolves a bearer token to a live session.
pub async fn resolve(db: &SqlitePool, token: &str, now: DateTime<Utc>) -> Result<Session, AppError> {
	let token = Uuid::parse_str(token.trim()).map_err(|_| AppError::Unauthorized)?;
	let row = sqlx::query_as::<_, SessionRow>(
		r#"
SELECT s.account_id AS account_id, s.expires_at AS expires_at, a.role AS role, a.active AS active
FROM sessions s JOIN accounts a ON a.id = s.account_id
WHERE s.token = ?
		"#,
	)
	.bind(token.to_string())
	.fetch_optional(db)
	.await?
	.ok_or(AppError::Unauthorized)?;

	if row.expires_at <= now || !row.active {
		return Err(AppError::Unauthorized);
	}
	Ok(Session {
		token,
		account_id: row.account_id,
		role: row.role,
		expires_at: row.expires_at,
	})
}

pub async fn change_password(
	db: &SqlitePool,
	account_id: Uid,
	current: &str,
	new: &str,
	cost: u32,
) -> Result<(), AppError> {
	let account = find_account(db, account_id).await?.ok_or(AppError::NotFound("User"))?;
	if !verify_password(current, &account.pass_hash).await? {
		return Err(AppError::bad_request("Current password is incorrect"));
	}
	check_password(new)?;

	sqlx::query("UPDATE accounts SET pass_hash = ? WHERE id = ?")
		.bind(hash_password(new, cost).await?)
		.bind(account_id)
		.execute(db)
		.await?;
	Ok(())
}

pub async fn list_accounts(db: &SqlitePool) -> Result<Vec<Account>, AppError> {
	let accounts = sqlx::query_as::<_, Account>("SELECT * FROM accounts ORDER BY name, id")
		.fetch_all(db)
		.await?;
	Ok(accounts)
}

/// Blocks or unblocks an account. Blocking drops its sessions.
pub async fn toggle_active(db: &SqlitePool, by: &Session, id: Uid) -> Result<Account, AppError> {
	if by.account_id == id {
		return Err(AppError::bad_request("Administrators cannot block themselves"));
	}

	let mut tx = db.begin().await?;
	let account = sqlx::query_as::<_, Account>("UPDATE accounts SET active = NOT active WHERE id = ? RETURNING *")
		.bind(id)
		.fetch_all(&mut *tx)
		.await?
		.pop()
		.ok_or(AppError::NotFound("User"))?;
	if !account.active {
		sqlx::query("DELETE FROM sessions WHERE account_id = ?")
			.bind(id)
			.execute(&mut *tx)
			.await?;
	}
	tx.commit().await?;

	info!("account {} is now {}", id, if account.active { "active" } else { "blocked" });
	Ok(account)
}

/// Creates the configured administrator unless the email is already taken.
pub async fn ensure_admin(db: &SqlitePool, seed: &AdminSeed, cost: u32, now: DateTime<Utc>) -> Result<(), AppError> {
	if let Some(existing) = find_by_email(db, &seed.email).await? {
		if !existing.role.is_admin() {
			warn!("{} exists but is not an administrator", seed.email);
		}
		return Ok(());
	}

	let form = FormRegister {
		name: "Admin User".to_string(),
		email: seed.email.clone(),
		pass: seed.password.clone(),
		phone: None,
		role: None,
	};
	register(db, &form, Role::Admin, cost, now).await?;
	info!("created administrator {}", seed.email);
	Ok(())
}

fn bearer(parts: &Parts) -> Option<String> {
	let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
	let token = value
		.strip_prefix("Bearer ")
		.or_else(|| value.strip_prefix("bearer "))?;
	Some(token.to_string())
}

#[async_trait]
impl FromRequestParts<Arc<State>> for Session {
	type Rejection = AppError;

	async fn from_request_parts(parts: &mut Parts, state: &Arc<State>) -> Result<Self, Self::Rejection> {
		let token = match bearer(parts) {
			Some(token) => token,
			None => {
				let cookies = Cookies::from_request_parts(parts, state)
					.await
					.map_err(|_| AppError::Unauthorized)?;
				cookies
					.get(SESSION_COOKIE)
					.map(|c| c.value().to_string())
					.ok_or(AppError::Unauthorized)?
			}
		};
		resolve(&state.db, &token, Utc::now()).await
	}
}

#[async_trait]
impl FromRequestParts<Arc<State>> for Admin {
	type Rejection = AppError;

	async fn from_request_parts(parts: &mut Parts, state: &Arc<State>) -> Result<Self, Self::Rejection> {
		let session = Session::from_request_parts(parts, state).await?;
		if !session.role.is_admin() {
			return Err(AppError::Forbidden);
		}
		Ok(Admin(session))
	}
}

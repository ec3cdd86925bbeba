//! Transaction ledger: one row per loan episode.
//!
//! Rows are appended by borrowing and updated exactly once when the loan is
//! closed. Nothing here is ever deleted; `overdue` is computed on read.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqliteExecutor};

use crate::{
	error::{is_unique_violation, AppError},
	types::{ItemId, Loan, LoanDetails, LoanId, Uid},
};

const DETAILS: &str = r#"
SELECT
	l.id AS id, l.account_id AS account_id, l.item_id AS item_id,
	l.borrowed_at AS borrowed_at, l.due_at AS due_at,
	l.returned_at AS returned_at, l.status AS status,
	i.code AS item_code, i.name AS item_name, i.category AS item_category,
	a.name AS user_name, a.email AS user_email
FROM loans l
	LEFT JOIN items i ON i.id = l.item_id
	LEFT JOIN accounts a ON a.id = l.account_id
"#;

/// Whose loans a listing covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
	Everyone,
	Account(Uid),
}

pub async fn create(
	db: impl SqliteExecutor<'_>,
	account_id: Uid,
	item_id: ItemId,
	borrowed_at: DateTime<Utc>,
	due_at: DateTime<Utc>,
) -> Result<Loan, AppError> {
	if due_at <= borrowed_at {
		return Err(AppError::bad_request("Due date must be after the borrow date"));
	}

	sqlx::query_as::<_, Loan>(
		r#"
INSERT INTO loans
	(account_id, item_id, borrowed_at, due_at, status)
VALUES
	(?, ?, ?, ?, 'active')
RETURNING *
		"#,
	)
	.bind(account_id)
	.bind(item_id)
	.bind(borrowed_at)
	.bind(due_at)
	// run RETURNING to completion, see items::create
	.fetch_all(db)
	.await
	.map_err(|e| {
		// loans_one_active_per_item
		if is_unique_violation(&e) {
			AppError::ItemUnavailable
		} else {
			e.into()
		}
	})?
	.pop()
	.ok_or(AppError::Storage(sqlx::Error::RowNotFound))
}

pub async fn find(db: impl SqliteExecutor<'_>, id: LoanId) -> Result<Option<Loan>, AppError> {
	let loan = sqlx::query_as::<_, Loan>("SELECT * FROM loans WHERE id = ?")
		.bind(id)
		.fetch_optional(db)
		.await?;
	Ok(loan)
}

pub async fn find_active_for(db: impl SqliteExecutor<'_>, item_id: ItemId) -> Result<Option<Loan>, AppError> {
	let loan = sqlx::query_as::<_, Loan>("SELECT * FROM loans WHERE item_id = ? AND status = 'active'")
		.bind(item_id)
		.fetch_optional(db)
		.await?;
	Ok(loan)
}

/// Marks an active loan returned. Closing twice yields `NoActiveLoan`, a
/// missing id `NotFound`.
pub async fn close(conn: &mut SqliteConnection, id: LoanId, returned_at: DateTime<Utc>) -> Result<Loan, AppError> {
	let loan = find(&mut *conn, id).await?.ok_or(AppError::NotFound("Transaction"))?;
	if !loan.is_active() {
		return Err(AppError::NoActiveLoan);
	}

	// clock skew must not produce a return before the borrow
	let returned_at = returned_at.max(loan.borrowed_at);
	let closed = sqlx::query_as::<_, Loan>(
		r#"
UPDATE loans SET
	status = 'returned',
	returned_at = ?
WHERE id = ? AND status = 'active'
RETURNING *
		"#,
	)
	.bind(returned_at)
	.bind(id)
	.fetch_all(&mut *conn)
	.await?
	.pop();

	closed.ok_or(AppError::NoActiveLoan)
}

pub async fn details(db: impl SqliteExecutor<'_>, id: LoanId, now: DateTime<Utc>) -> Result<Option<LoanDetails>, AppError> {
	let sql = format!("{DETAILS} WHERE l.id = ?");
	let row = sqlx::query_as::<_, LoanDetails>(&sql)
		.bind(id)
		.fetch_optional(db)
		.await?;
	Ok(row.map(|row| with_overdue(row, now)))
}

pub async fn list_for(db: impl SqliteExecutor<'_>, account_id: Uid, now: DateTime<Utc>) -> Result<Vec<LoanDetails>, AppError> {
	let sql = format!("{DETAILS} WHERE l.account_id = ? ORDER BY l.borrowed_at DESC, l.id DESC");
	let rows = sqlx::query_as::<_, LoanDetails>(&sql)
		.bind(account_id)
		.fetch_all(db)
		.await?;
	Ok(rows.into_iter().map(|row| with_overdue(row, now)).collect())
}

pub async fn list_all(db: impl SqliteExecutor<'_>, now: DateTime<Utc>) -> Result<Vec<LoanDetails>, AppError> {
	let sql = format!("{DETAILS} ORDER BY l.borrowed_at DESC, l.id DESC");
	let rows = sqlx::query_as::<_, LoanDetails>(&sql).fetch_all(db).await?;
	Ok(rows.into_iter().map(|row| with_overdue(row, now)).collect())
}

pub async fn list_active(db: impl SqliteExecutor<'_>, scope: Scope, now: DateTime<Utc>) -> Result<Vec<LoanDetails>, AppError> {
	let account = match scope {
		Scope::Everyone => None,
		Scope::Account(uid) => Some(uid),
	};
	let sql = format!(
		"{DETAILS} WHERE l.status = 'active' AND (?1 IS NULL OR l.account_id = ?1) ORDER BY l.borrowed_at DESC, l.id DESC"
	);
	let rows = sqlx::query_as::<_, LoanDetails>(&sql)
		.bind(account)
		.fetch_all(db)
		.await?;
	Ok(rows.into_iter().map(|row| with_overdue(row, now)).collect())
}

/// Exactly the active loans whose due date lies before `now`, earliest due first.
pub async fn list_overdue(db: impl SqliteExecutor<'_>, now: DateTime<Utc>) -> Result<Vec<LoanDetails>, AppError> {
	let mut overdue: Vec<LoanDetails> = list_active(db, Scope::Everyone, now)
		.await?
		.into_iter()
		.filter(|row| row.overdue)
		.collect();
	overdue.sort_by_key(|row| (row.loan.due_at, row.loan.id));
	Ok(overdue)
}

fn with_overdue(mut row: LoanDetails, now: DateTime<Utc>) -> LoanDetails {
	row.overdue = row.loan.is_overdue(now);
	row
}

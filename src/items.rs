//! Item registry: durable storage and lookup of items by id or label code.

use chrono::{DateTime, Utc};
use sqlx::SqliteExecutor;

use crate::{
	error::{is_unique_violation, AppError},
	types::{Item, ItemFilter, ItemId, ItemPatch, ItemStatus, NewItem, Uid},
};

pub async fn find(db: impl SqliteExecutor<'_>, id: ItemId) -> Result<Option<Item>, AppError> {
	let item = sqlx::query_as::<_, Item>("SELECT * FROM items WHERE id = ?")
		.bind(id)
		.fetch_optional(db)
		.await?;
	Ok(item)
}

/// Exact match on the code printed on the item's QR label.
pub async fn find_by_code(db: impl SqliteExecutor<'_>, code: &str) -> Result<Option<Item>, AppError> {
	let item = sqlx::query_as::<_, Item>("SELECT * FROM items WHERE code = ?")
		.bind(code.trim())
		.fetch_optional(db)
		.await?;
	Ok(item)
}

pub async fn list(db: impl SqliteExecutor<'_>, filter: &ItemFilter) -> Result<Vec<Item>, AppError> {
	let q = filter
		.q
		.as_deref()
		.map(str::trim)
		.filter(|q| !q.is_empty())
		.map(|q| format!("%{q}%"));

	let items = sqlx::query_as::<_, Item>(
		r#"
SELECT * FROM items
WHERE (?1 IS NULL OR status = ?1)
	AND (?2 IS NULL OR category = ?2)
	AND (?3 IS NULL OR name LIKE ?3 OR code LIKE ?3 OR description LIKE ?3)
ORDER BY name, id
		"#,
	)
	.bind(filter.status)
	.bind(filter.category.as_deref())
	.bind(q)
	.fetch_all(db)
	.await?;
	Ok(items)
}

pub async fn create(db: impl SqliteExecutor<'_>, new: &NewItem, now: DateTime<Utc>) -> Result<Item, AppError> {
	let code = new.code.trim();
	if code.is_empty() {
		return Err(AppError::bad_request("Item code is required"));
	}
	if new.name.trim().is_empty() {
		return Err(AppError::bad_request("Item name is required"));
	}
	if new.quantity < 0 {
		return Err(AppError::bad_request("Quantity cannot be negative"));
	}

	sqlx::query_as::<_, Item>(
		r#"
INSERT INTO items
	(code, name, category, description, quantity, status, created_at, updated_at)
VALUES
	(?, ?, ?, ?, ?, 'available', ?, ?)
RETURNING *
		"#,
	)
	.bind(code)
	.bind(new.name.trim())
	.bind(new.category.trim())
	.bind(&new.description)
	.bind(new.quantity)
	.bind(now)
	.bind(now)
	// fetch_all steps the statement to completion, so the implicit
	// transaction has committed before other connections look for the row
	.fetch_all(db)
	.await
	.map_err(|e| {
		if is_unique_violation(&e) {
			AppError::Conflict(format!("Item with code {code} already exists"))
		} else {
			e.into()
		}
	})?
	.pop()
	.ok_or(AppError::Storage(sqlx::Error::RowNotFound))
}

/// Applies an administrative patch. A status override clears the holder,
/// `borrowed` itself can only be reached by borrowing.
pub async fn update(
	db: impl SqliteExecutor<'_>,
	id: ItemId,
	patch: &ItemPatch,
	now: DateTime<Utc>,
) -> Result<Item, AppError> {
	if patch.status == Some(ItemStatus::Borrowed) {
		return Err(AppError::bad_request("Items become borrowed only by borrowing them"));
	}
	if matches!(patch.name.as_deref(), Some(name) if name.trim().is_empty()) {
		return Err(AppError::bad_request("Item name cannot be blank"));
	}
	if matches!(patch.quantity, Some(q) if q < 0) {
		return Err(AppError::bad_request("Quantity cannot be negative"));
	}

	sqlx::query_as::<_, Item>(
		r#"
UPDATE items SET
	name = COALESCE(?1, name),
	category = COALESCE(?2, category),
	description = COALESCE(?3, description),
	quantity = COALESCE(?4, quantity),
	status = COALESCE(?5, status),
	borrowed_by = CASE WHEN ?5 IS NULL THEN borrowed_by ELSE NULL END,
	updated_at = ?6
WHERE id = ?7
RETURNING *
		"#,
	)
	.bind(patch.name.as_deref().map(str::trim))
	.bind(patch.category.as_deref().map(str::trim))
	.bind(patch.description.as_deref())
	.bind(patch.quantity)
	.bind(patch.status)
	.bind(now)
	.bind(id)
	.fetch_all(db)
	.await?
	.pop()
	.ok_or(AppError::NotFound("Item"))
}

/// Compare-and-swap on the status column: only moves `from -> to`.
/// Returns false when the item is missing or not in `from`.
pub async fn set_status(
	db: impl SqliteExecutor<'_>,
	id: ItemId,
	from: ItemStatus,
	to: ItemStatus,
	holder: Option<Uid>,
	now: DateTime<Utc>,
) -> Result<bool, AppError> {
	let done = sqlx::query(
		"UPDATE items SET status = ?, borrowed_by = ?, updated_at = ? WHERE id = ? AND status = ?",
	)
	.bind(to)
	.bind(holder)
	.bind(now)
	.bind(id)
	.bind(from)
	.execute(db)
	.await?;
	Ok(done.rows_affected() == 1)
}

pub async fn delete(db: impl SqliteExecutor<'_>, id: ItemId) -> Result<(), AppError> {
	let done = sqlx::query("DELETE FROM items WHERE id = ?")
		.bind(id)
		.execute(db)
		.await?;
	if done.rows_affected() == 0 {
		return Err(AppError::NotFound("Item"));
	}
	Ok(())
}

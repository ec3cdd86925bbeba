use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, SqlitePool};

use crate::{
	error::AppError,
	ledger,
	types::{ItemId, ItemStatus},
};

const MOST_BORROWED: i64 = 10;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Popular {
	pub item_id: ItemId,
	pub code: Option<String>,
	pub name: Option<String>,
	pub times_borrowed: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Stats {
	pub total_items: i64,
	pub items_by_status: BTreeMap<String, i64>,
	pub items_by_category: BTreeMap<String, i64>,
	pub active_loans: i64,
	pub overdue_loans: i64,
	pub most_borrowed: Vec<Popular>,
}

pub async fn collect(db: &SqlitePool, now: DateTime<Utc>) -> Result<Stats, AppError> {
	let by_status: Vec<(ItemStatus, i64)> =
		sqlx::query_as("SELECT status, COUNT(*) FROM items GROUP BY status")
			.fetch_all(db)
			.await?;
	let by_category: Vec<(String, i64)> =
		sqlx::query_as("SELECT category, COUNT(*) FROM items GROUP BY category")
			.fetch_all(db)
			.await?;
	let (active_loans,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM loans WHERE status = 'active'")
		.fetch_one(db)
		.await?;

	let most_borrowed = sqlx::query_as::<_, Popular>(
		r#"
SELECT l.item_id AS item_id, i.code AS code, i.name AS name, COUNT(*) AS times_borrowed
FROM loans l LEFT JOIN items i ON i.id = l.item_id
GROUP BY l.item_id
ORDER BY times_borrowed DESC, l.item_id
LIMIT ?
		"#,
	)
	.bind(MOST_BORROWED)
	.fetch_all(db)
	.await?;

	let overdue_loans = ledger::list_overdue(db, now).await?.len() as i64;

	let items_by_status: BTreeMap<String, i64> = by_status
		.into_iter()
		.map(|(status, n)| (status.to_string(), n))
		.collect();

	Ok(Stats {
		total_items: items_by_status.values().sum(),
		items_by_status,
		items_by_category: by_category.into_iter().collect(),
		active_loans,
		overdue_loans,
		most_borrowed,
	})
}

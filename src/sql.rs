use std::{str::FromStr, time::Duration};

use sqlx::{
	sqlite::{SqliteConnectOptions, SqlitePoolOptions},
	Executor, SqlitePool,
};
use tracing::info;

pub const TABLE_SCHEMA: &str = r#"

CREATE TABLE IF NOT EXISTS accounts (
	id INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
	name TEXT NOT NULL,
	email TEXT NOT NULL UNIQUE,
	phone TEXT DEFAULT NULL,
	pass_hash TEXT NOT NULL,
	role TEXT NOT NULL DEFAULT 'student',
	active BOOL NOT NULL DEFAULT true,
	created_at TEXT NOT NULL,
	CHECK(role IN ('admin', 'student', 'faculty'))
);

CREATE TABLE IF NOT EXISTS sessions (
	token TEXT NOT NULL PRIMARY KEY,
	account_id INTEGER NOT NULL,
	expires_at TEXT NOT NULL,
	FOREIGN KEY(account_id) REFERENCES accounts(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS items (
	id INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
	code TEXT NOT NULL UNIQUE,
	name TEXT NOT NULL,
	category TEXT NOT NULL DEFAULT 'Other',
	description TEXT NOT NULL DEFAULT '',
	quantity INTEGER NOT NULL DEFAULT 1,
	status TEXT NOT NULL DEFAULT 'available',
	borrowed_by INTEGER DEFAULT NULL,
	created_at TEXT NOT NULL,
	updated_at TEXT NOT NULL,
	CHECK(quantity >= 0),
	CHECK(status IN ('available', 'borrowed', 'maintenance', 'damaged')),
	CHECK((status == 'borrowed') == (borrowed_by IS NOT NULL))
);

CREATE TABLE IF NOT EXISTS loans (
	id INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
	account_id INTEGER NOT NULL,
	item_id INTEGER NOT NULL,
	borrowed_at TEXT NOT NULL,
	due_at TEXT NOT NULL,
	returned_at TEXT DEFAULT NULL,
	status TEXT NOT NULL DEFAULT 'active',
	CHECK(status IN ('active', 'returned')),
	CHECK((returned_at IS NULL) == (status == 'active')),
	CHECK(due_at > borrowed_at)
);

CREATE UNIQUE INDEX IF NOT EXISTS loans_one_active_per_item
	ON loans(item_id) WHERE status = 'active';

CREATE INDEX IF NOT EXISTS loans_by_account ON loans(account_id);

"#;

pub async fn open(url: &str, max_connections: u32) -> Result<SqlitePool, sqlx::Error> {
	let options = SqliteConnectOptions::from_str(url)?
		.create_if_missing(true)
		.foreign_keys(true);

	// every connection to :memory: is its own database, keep exactly one alive
	let in_memory = url.contains(":memory:");
	let pool = if in_memory {
		SqlitePoolOptions::new()
			.max_connections(1)
			.min_connections(1)
			.idle_timeout(None)
			.max_lifetime(None)
	} else {
		SqlitePoolOptions::new().max_connections(max_connections)
	}
	.acquire_timeout(Duration::from_secs(3))
	.connect_with(options)
	.await?;

	pool.execute(TABLE_SCHEMA).await?;
	info!("Database ready at {url}");

	Ok(pool)
}

pub async fn open_in_memory() -> Result<SqlitePool, sqlx::Error> {
	open("sqlite::memory:", 1).await
}

//! # Lending
//!
//! The only place that changes an item's availability together with the
//! ledger. Borrow and return each run as one store transaction:
//!
//! - borrow: `items.status` is swapped `available -> borrowed` with a
//!   conditional update, then the loan row is appended
//! - return: the loan is closed, then `items.status` is swapped back
//!
//! A zero-row swap aborts the transaction, so an item and its loan never
//! disagree. On top of that, calls touching the same item are serialized
//! inside the process by [`ItemLocks`], which keeps concurrent requests
//! from queueing on the database's writer lock.

use std::{
	collections::HashMap,
	sync::{Arc, Mutex, PoisonError},
};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::{
	auth::Session,
	error::AppError,
	items, ledger,
	types::{Item, ItemId, ItemPatch, ItemRef, ItemStatus, Loan, LoanId},
};

/// Per-item critical sections.
#[derive(Debug, Clone, Default)]
pub struct ItemLocks {
	inner: Arc<Mutex<HashMap<ItemId, Arc<AsyncMutex<()>>>>>,
}

impl ItemLocks {
	pub async fn lock(&self, item: ItemId) -> OwnedMutexGuard<()> {
		let slot = {
			let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
			// drop slots nobody holds or waits on
			map.retain(|_, slot| Arc::strong_count(slot) > 1);
			map.entry(item).or_default().clone()
		};
		slot.lock_owned().await
	}

	#[cfg(test)]
	fn held(&self) -> usize {
		self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
	}
}

/// Result of a lifecycle transition: the loan and the item after it.
#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
	pub transaction: Loan,
	pub item: Item,
}

/// A mismatch between an item's status and the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Discrepancy {
	pub item_id: ItemId,
	pub item_status: Option<ItemStatus>,
	pub active_loans: i64,
}

#[derive(Debug, Clone)]
pub struct Lending {
	db: SqlitePool,
	locks: ItemLocks,
	loan_period: Duration,
}

impl Lending {
	pub fn new(db: SqlitePool, loan_period: Duration) -> Self {
		Self {
			db,
			locks: ItemLocks::default(),
			loan_period,
		}
	}

	pub fn loan_period(&self) -> Duration {
		self.loan_period
	}

	async fn resolve(&self, item: &ItemRef) -> Result<Item, AppError> {
		let found = match (item.item_id, item.code.as_deref()) {
			(Some(id), _) => items::find(&self.db, id).await?,
			(None, Some(code)) if !code.trim().is_empty() => items::find_by_code(&self.db, code).await?,
			_ => return Err(AppError::bad_request("Item ID or code is required")),
		};
		found.ok_or(AppError::NotFound("Item"))
	}

	pub async fn borrow(&self, who: &Session, item: &ItemRef, now: DateTime<Utc>) -> Result<Outcome, AppError> {
		let due_at = now
			.checked_add_signed(self.loan_period)
			.ok_or_else(|| AppError::bad_request("Loan due date is out of range"))?;
		let item_id = self.resolve(item).await?.id;
		let _guard = self.locks.lock(item_id).await;

		let mut tx = self.db.begin().await?;
		let swapped = items::set_status(
			&mut *tx,
			item_id,
			ItemStatus::Available,
			ItemStatus::Borrowed,
			Some(who.account_id),
			now,
		)
		.await?;

		if !swapped {
			let err = match items::find(&mut *tx, item_id).await? {
				None => AppError::NotFound("Item"),
				Some(item) if item.status.is_out_of_service() => AppError::ItemUnderMaintenance(item.status),
				Some(_) => AppError::ItemUnavailable,
			};
			debug!("borrow of item {item_id} by {} rejected: {err}", who.account_id);
			return Err(err);
		}

		let transaction = ledger::create(&mut *tx, who.account_id, item_id, now, due_at).await?;
		let item = items::find(&mut *tx, item_id).await?.ok_or(AppError::NotFound("Item"))?;
		tx.commit().await?;

		info!(
			"item {} ({}) borrowed by {}, loan {} due {}",
			item.id, item.code, who.account_id, transaction.id, transaction.due_at
		);
		Ok(Outcome { transaction, item })
	}

	/// Returns a loan by its id. Owners and admins only.
	pub async fn return_loan(&self, who: &Session, loan_id: LoanId, now: DateTime<Utc>) -> Result<Outcome, AppError> {
		let loan = ledger::find(&self.db, loan_id)
			.await?
			.ok_or(AppError::NotFound("Transaction"))?;
		check_owner(who, &loan)?;

		let _guard = self.locks.lock(loan.item_id).await;
		let mut tx = self.db.begin().await?;
		let outcome = close_loan(&mut tx, who, loan.id, now).await?;
		tx.commit().await?;

		info!("loan {} returned by {}", outcome.transaction.id, who.account_id);
		Ok(outcome)
	}

	/// Returns whatever is currently borrowed on a scanned item.
	pub async fn return_item(&self, who: &Session, item: &ItemRef, now: DateTime<Utc>) -> Result<Outcome, AppError> {
		let item_id = self.resolve(item).await?.id;
		let _guard = self.locks.lock(item_id).await;

		let mut tx = self.db.begin().await?;
		let loan = ledger::find_active_for(&mut *tx, item_id)
			.await?
			.ok_or(AppError::NoActiveLoan)?;
		let outcome = close_loan(&mut tx, who, loan.id, now).await?;
		tx.commit().await?;

		info!("item {} returned by {}", item_id, who.account_id);
		Ok(outcome)
	}

	/// Administrative edit. Status overrides are refused while the item is on loan.
	pub async fn update_item(&self, id: ItemId, patch: &ItemPatch, now: DateTime<Utc>) -> Result<Item, AppError> {
		let _guard = self.locks.lock(id).await;
		let mut tx = self.db.begin().await?;

		if patch.status.is_some() && patch.status != Some(ItemStatus::Borrowed) {
			if let Some(loan) = ledger::find_active_for(&mut *tx, id).await? {
				return Err(AppError::Conflict(format!(
					"Item is on loan (transaction {}), return it before changing its status",
					loan.id
				)));
			}
		}
		let item = items::update(&mut *tx, id, patch, now).await?;
		tx.commit().await?;

		info!("item {} updated, status {}", item.id, item.status);
		Ok(item)
	}

	pub async fn remove_item(&self, id: ItemId) -> Result<(), AppError> {
		let _guard = self.locks.lock(id).await;
		let mut tx = self.db.begin().await?;

		if ledger::find_active_for(&mut *tx, id).await?.is_some() {
			return Err(AppError::Conflict("Item is on loan and cannot be deleted".to_string()));
		}
		items::delete(&mut *tx, id).await?;
		tx.commit().await?;

		info!("item {id} deleted");
		Ok(())
	}

	/// Items whose status disagrees with the ledger. Empty when consistent.
	pub async fn audit(&self) -> Result<Vec<Discrepancy>, AppError> {
		let found = sqlx::query_as::<_, Discrepancy>(
			r#"
SELECT i.id AS item_id, i.status AS item_status,
	(SELECT COUNT(*) FROM loans l WHERE l.item_id = i.id AND l.status = 'active') AS active_loans
FROM items i
WHERE (i.status = 'borrowed')
	!= ((SELECT COUNT(*) FROM loans l WHERE l.item_id = i.id AND l.status = 'active') = 1)
UNION ALL
SELECT l.item_id AS item_id, NULL AS item_status, COUNT(*) AS active_loans
FROM loans l
WHERE l.status = 'active' AND NOT EXISTS (SELECT 1 FROM items i WHERE i.id = l.item_id)
GROUP BY l.item_id
ORDER BY item_id
			"#,
		)
		.fetch_all(&self.db)
		.await?;

		if !found.is_empty() {
			warn!("{} items disagree with the ledger", found.len());
		}
		Ok(found)
	}
}

fn check_owner(who: &Session, loan: &Loan) -> Result<(), AppError> {
	if loan.account_id != who.account_id && !who.role.is_admin() {
		return Err(AppError::Forbidden);
	}
	Ok(())
}

// caller holds the item lock and an open transaction
async fn close_loan(
	conn: &mut SqliteConnection,
	who: &Session,
	loan_id: LoanId,
	now: DateTime<Utc>,
) -> Result<Outcome, AppError> {
	let loan = ledger::find(&mut *conn, loan_id)
		.await?
		.ok_or(AppError::NotFound("Transaction"))?;
	if !loan.is_active() {
		return Err(AppError::NoActiveLoan);
	}
	check_owner(who, &loan)?;

	let transaction = ledger::close(&mut *conn, loan.id, now).await?;
	let swapped = items::set_status(
		&mut *conn,
		loan.item_id,
		ItemStatus::Borrowed,
		ItemStatus::Available,
		None,
		now,
	)
	.await?;

	if !swapped {
		warn!("item {} was not marked borrowed while loan {} was active", loan.item_id, loan.id);
	}
	let item = items::find(&mut *conn, loan.item_id)
		.await?
		.ok_or(AppError::NotFound("Item"))?;

	Ok(Outcome { transaction, item })
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn locks_serialize_same_item() {
		let locks = ItemLocks::default();
		let first = locks.lock(1).await;

		let other = locks.clone();
		let waiter = tokio::spawn(async move {
			let _second = other.lock(1).await;
		});
		tokio::task::yield_now().await;
		assert!(!waiter.is_finished());

		// unrelated items do not wait
		let _two = locks.lock(2).await;

		drop(first);
		waiter.await.unwrap();
	}

	#[tokio::test]
	async fn idle_slots_are_pruned() {
		let locks = ItemLocks::default();
		for id in 0..10 {
			drop(locks.lock(id).await);
		}
		let _last = locks.lock(99).await;
		assert_eq!(locks.held(), 1);
	}
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub type ItemId = i64;
pub type LoanId = i64;
pub type Uid = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ItemStatus {
	Available,
	Borrowed,
	Maintenance,
	Damaged,
}

impl ItemStatus {
	pub fn as_str(self) -> &'static str {
		match self {
			ItemStatus::Available => "available",
			ItemStatus::Borrowed => "borrowed",
			ItemStatus::Maintenance => "maintenance",
			ItemStatus::Damaged => "damaged",
		}
	}

	// maintenance and damaged are administrative side states
	pub fn is_out_of_service(self) -> bool {
		matches!(self, ItemStatus::Maintenance | ItemStatus::Damaged)
	}
}

impl std::fmt::Display for ItemStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Stored loan state. `overdue` is derived, see [`Loan::is_overdue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum LoanStatus {
	Active,
	Returned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Role {
	Admin,
	Student,
	Faculty,
}

impl Role {
	pub fn is_admin(self) -> bool {
		matches!(self, Role::Admin)
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Item {
	pub id: ItemId,
	pub code: String,
	pub name: String,
	pub category: String,
	pub description: String,
	pub quantity: i64,
	pub status: ItemStatus,
	pub borrowed_by: Option<Uid>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewItem {
	pub code: String,
	pub name: String,
	#[serde(default = "default_category")]
	pub category: String,
	#[serde(default)]
	pub description: String,
	#[serde(default = "default_quantity")]
	pub quantity: i64,
}

fn default_category() -> String {
	"Other".to_string()
}

fn default_quantity() -> i64 {
	1
}

/// Partial admin update, absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemPatch {
	pub name: Option<String>,
	pub category: Option<String>,
	pub description: Option<String>,
	pub quantity: Option<i64>,
	pub status: Option<ItemStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemFilter {
	pub status: Option<ItemStatus>,
	pub category: Option<String>,
	pub q: Option<String>,
}

/// How a client names an item: internal id or the code printed on its label.
#[derive(Debug, Clone, Deserialize)]
pub struct ItemRef {
	#[serde(alias = "itemId")]
	pub item_id: Option<ItemId>,
	pub code: Option<String>,
}

impl ItemRef {
	pub fn id(item_id: ItemId) -> Self {
		ItemRef { item_id: Some(item_id), code: None }
	}

	pub fn code(code: impl Into<String>) -> Self {
		ItemRef { item_id: None, code: Some(code.into()) }
	}
}

/// One loan episode of one item by one account.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Loan {
	pub id: LoanId,
	pub account_id: Uid,
	pub item_id: ItemId,
	pub borrowed_at: DateTime<Utc>,
	pub due_at: DateTime<Utc>,
	pub returned_at: Option<DateTime<Utc>>,
	pub status: LoanStatus,
}

impl Loan {
	pub fn is_active(&self) -> bool {
		self.status == LoanStatus::Active
	}

	pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
		self.is_active() && self.due_at < now
	}
}

/// A loan joined with what a listing needs to show about its item and borrower.
/// Item fields are absent when the item has since been deleted.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct LoanDetails {
	#[sqlx(flatten)]
	#[serde(flatten)]
	pub loan: Loan,
	pub item_code: Option<String>,
	pub item_name: Option<String>,
	pub item_category: Option<String>,
	pub user_name: Option<String>,
	pub user_email: Option<String>,
	#[sqlx(skip)]
	pub overdue: bool,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Account {
	pub id: Uid,
	pub name: String,
	pub email: String,
	pub phone: Option<String>,
	pub role: Role,
	pub active: bool,
	pub created_at: DateTime<Utc>,
	#[serde(skip)]
	pub pass_hash: String,
}

#[derive(Deserialize, Debug)]
pub struct FormLogin {
	pub email: String,
	pub pass: String,
}

#[derive(Deserialize, Debug)]
pub struct FormRegister {
	pub name: String,
	pub email: String,
	pub pass: String,
	pub phone: Option<String>,
	pub role: Option<Role>,
}

#[derive(Deserialize, Debug)]
pub struct FormPassword {
	pub current: String,
	pub new: String,
}

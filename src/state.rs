use std::sync::Arc;

use chrono::Utc;
use sqlx::SqlitePool;

use crate::{auth, config::Config, error::AppError, lending::Lending, sql};

pub struct State {
	pub config: Config,
	pub db: SqlitePool,
	pub lending: Lending,
}

impl State {
	pub async fn new(config: Config) -> Result<Arc<Self>, AppError> {
		let db = sql::open(&config.database_url, config.db_max_connections).await?;

		if let Some(seed) = &config.admin {
			auth::ensure_admin(&db, seed, config.hash_cost, Utc::now()).await?;
		}

		Ok(Self::with_pool(db, config))
	}

	pub fn with_pool(db: SqlitePool, config: Config) -> Arc<Self> {
		let lending = Lending::new(db.clone(), config.loan_period);
		Arc::new(Self { config, db, lending })
	}
}

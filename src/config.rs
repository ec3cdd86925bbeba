use std::{env, fmt::Display, ops::RangeInclusive, str::FromStr};

use chrono::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ConfigError {
	#[error("Invalid {key} value: {reason}")]
	Invalid { key: &'static str, reason: String },

	#[error("ADMIN_EMAIL and ADMIN_PASSWORD must be set together, {0} is missing")]
	IncompleteAdmin(&'static str),
}

#[derive(Clone)]
pub struct AdminSeed {
	pub email: String,
	pub password: String,
}

impl std::fmt::Debug for AdminSeed {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("AdminSeed")
			.field("email", &self.email)
			.field("password", &"***")
			.finish()
	}
}

#[derive(Debug, Clone)]
pub struct Config {
	pub port: u16,
	pub database_url: String,
	pub db_max_connections: u32,
	pub loan_period: Duration,
	pub session_ttl: Duration,
	pub hash_cost: u32,
	pub admin: Option<AdminSeed>,
	pub static_dir: Option<String>,
	pub cors_origin: Option<String>,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			port: 8080,
			database_url: "sqlite://invsys.db".to_string(),
			db_max_connections: 5,
			loan_period: Duration::days(7),
			session_ttl: Duration::hours(24),
			hash_cost: bcrypt::DEFAULT_COST,
			admin: None,
			static_dir: None,
			cors_origin: None,
		}
	}
}

impl Config {
	pub fn load() -> Result<Self, ConfigError> {
		if dotenvy::dotenv().is_err() {
			info!("No .env file, reading process environment only");
		}

		let admin = match (var("ADMIN_EMAIL"), var("ADMIN_PASSWORD")) {
			(Some(email), Some(password)) => Some(AdminSeed { email, password }),
			(Some(_), None) => return Err(ConfigError::IncompleteAdmin("ADMIN_PASSWORD")),
			(None, Some(_)) => return Err(ConfigError::IncompleteAdmin("ADMIN_EMAIL")),
			(None, None) => None,
		};

		let loan_days = in_range("LOAN_DAYS", try_load("LOAN_DAYS", "7")?, LOAN_DAYS)?;
		let session_hours = in_range("SESSION_HOURS", try_load("SESSION_HOURS", "24")?, SESSION_HOURS)?;
		let hash_cost = in_range("BCRYPT_COST", try_load("BCRYPT_COST", "12")?, BCRYPT_COST)?;

		Ok(Self {
			port: try_load("PORT", "8080")?,
			database_url: try_load("DATABASE_URL", "sqlite://invsys.db")?,
			db_max_connections: try_load("DB_MAX_CONNECTIONS", "5")?,
			loan_period: Duration::days(loan_days),
			session_ttl: Duration::hours(session_hours),
			hash_cost,
			admin,
			static_dir: var("STATIC_DIR"),
			cors_origin: var("CORS_ORIGIN"),
		})
	}
}

// ten years
const LOAN_DAYS: RangeInclusive<i64> = 1..=3650;
// one year
const SESSION_HOURS: RangeInclusive<i64> = 1..=8760;
const BCRYPT_COST: RangeInclusive<u32> = 4..=31;

fn in_range<T>(key: &'static str, value: T, range: RangeInclusive<T>) -> Result<T, ConfigError>
where
	T: PartialOrd + Display,
{
	if !range.contains(&value) {
		return Err(ConfigError::Invalid {
			key,
			reason: format!("{value} is outside {}..={}", range.start(), range.end()),
		});
	}
	Ok(value)
}

fn var(key: &str) -> Option<String> {
	env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn try_load<T: FromStr>(key: &'static str, default: &str) -> Result<T, ConfigError>
where
	T::Err: Display,
{
	var(key)
		.unwrap_or_else(|| {
			info!("{key} not set, using default: {default}");
			default.to_string()
		})
		.parse()
		.map_err(|e: T::Err| {
			warn!("Invalid {key} value: {e}");
			ConfigError::Invalid { key, reason: e.to_string() }
		})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_and_parse_errors() {
		let port: u16 = try_load("INVSYS_TEST_UNSET_PORT", "8080").unwrap();
		assert_eq!(port, 8080);

		env::set_var("INVSYS_TEST_BAD_PORT", "eighty");
		let err = try_load::<u16>("INVSYS_TEST_BAD_PORT", "8080").unwrap_err();
		assert!(matches!(err, ConfigError::Invalid { key: "INVSYS_TEST_BAD_PORT", .. }));

		env::set_var("INVSYS_TEST_BLANK", "  ");
		assert_eq!(var("INVSYS_TEST_BLANK"), None);
	}

	#[test]
	fn durations_are_bounded() {
		assert_eq!(in_range("LOAN_DAYS", 7, LOAN_DAYS).unwrap(), 7);
		assert!(in_range("LOAN_DAYS", 0, LOAN_DAYS).is_err());
		assert!(in_range("LOAN_DAYS", 100_000_000, LOAN_DAYS).is_err());
		assert!(in_range("SESSION_HOURS", 0, SESSION_HOURS).is_err());
		assert!(in_range("SESSION_HOURS", -5, SESSION_HOURS).is_err());
		assert!(in_range("BCRYPT_COST", 3, BCRYPT_COST).is_err());

		let err = in_range("SESSION_HOURS", 9000, SESSION_HOURS).unwrap_err();
		assert!(err.to_string().contains("SESSION_HOURS"));
	}

	#[test]
	fn admin_password_is_redacted() {
		let seed = AdminSeed { email: "a@b.c".into(), password: "hunter22".into() };
		assert!(!format!("{seed:?}").contains("hunter22"));
	}
}

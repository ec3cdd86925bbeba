//! Inventory lending backend.
//!
//! Physical items carry a QR label with their item code. Scanning the label
//! resolves the item, and borrowing or returning it goes through
//! [`lending::Lending`], which keeps the item's status and the loan ledger in
//! step.
//!
//! # Layout
//! - [`items`]: item registry
//! - [`ledger`]: loan records, one active loan per item at most
//! - [`lending`]: borrow/return coordinator
//! - [`auth`]: accounts and per-request sessions
//! - [`routes`]: JSON handlers, [`views`]: printable label sheet
//!
//! # Configuration
//! Read from the environment (and `.env`), see [`config::Config::load`].
//! `RUST_LOG` controls log output.
use std::{sync::Arc, time::Duration};

use axum::{
	http::{header, HeaderValue, Method},
	routing::{get, patch, post, put},
	Router,
};
use thiserror::Error;
use tokio::{net::TcpListener, signal};
use tower_cookies::CookieManagerLayer;
use tower_http::{
	cors::{Any, CorsLayer},
	services::ServeDir,
	trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

pub mod auth;
pub mod config;
pub mod error;
pub mod extract;
pub mod items;
pub mod ledger;
pub mod lending;
pub mod routes;
pub mod sql;
pub mod state;
pub mod stats;
pub mod types;
pub mod views;

use config::{Config, ConfigError};
use error::AppError;
use state::State;

#[derive(Error, Debug)]
pub enum StartupError {
	#[error("Configuration error: {0}")]
	Config(#[from] ConfigError),

	#[error("Failed to initialize state: {0}")]
	State(#[from] AppError),

	#[error("Failed to bind {address}: {source}")]
	Bind {
		address: String,
		source: std::io::Error,
	},

	#[error("Server error: {0}")]
	Serve(std::io::Error),
}

pub fn app(state: Arc<State>) -> Router {
	let api = Router::new()
		.route("/auth/register", post(routes::register))
		.route("/auth/login", post(routes::login))
		.route("/auth/logout", post(routes::logout))
		.route("/auth/profile", get(routes::profile))
		.route("/auth/password", put(routes::change_password))
		.route("/items", get(routes::list_items).post(routes::create_item))
		.route("/items/code/:code", get(routes::item_by_code))
		.route(
			"/items/:id",
			get(routes::get_item)
				.put(routes::update_item)
				.delete(routes::delete_item),
		)
		.route("/transactions", get(routes::all_transactions))
		.route("/transactions/mine", get(routes::my_transactions))
		.route("/transactions/active", get(routes::active_transactions))
		.route("/transactions/overdue", get(routes::overdue_transactions))
		.route("/transactions/borrow", post(routes::borrow))
		.route("/transactions/return", post(routes::return_item))
		.route("/transactions/return/:id", post(routes::return_transaction))
		.route("/transactions/:id", get(routes::get_transaction))
		.route("/users", get(routes::list_users))
		.route("/users/:id/toggle-status", patch(routes::toggle_user))
		.route("/stats", get(routes::stats))
		.route("/admin/audit", get(routes::audit));

	let mut app = Router::new()
		.route("/", get(routes::index))
		.route("/labels", get(views::labels))
		.nest("/api", api);

	if let Some(dir) = &state.config.static_dir {
		info!("Serving static files from {dir}");
		app = app.fallback_service(ServeDir::new(dir));
	}

	app.layer(CookieManagerLayer::new())
		.layer(cors(&state.config))
		.layer(TraceLayer::new_for_http())
		.with_state(state)
}

fn cors(config: &Config) -> CorsLayer {
	let layer = CorsLayer::new()
		.allow_methods([
			Method::GET,
			Method::POST,
			Method::PUT,
			Method::PATCH,
			Method::DELETE,
			Method::OPTIONS,
		])
		.allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
		.max_age(Duration::from_secs(60 * 60));

	match config.cors_origin.as_deref().map(HeaderValue::from_str) {
		Some(Ok(origin)) => layer.allow_origin(origin).allow_credentials(true),
		Some(Err(e)) => {
			warn!("Invalid CORS_ORIGIN ({e}), allowing any origin");
			layer.allow_origin(Any)
		}
		None => layer.allow_origin(Any),
	}
}

/// Installs logging, loads [`Config`] and serves until shutdown.
pub async fn start_server() -> Result<(), StartupError> {
	fmt().with_env_filter(EnvFilter::from_default_env()).init();

	let result = match Config::load() {
		Ok(config) => run(config).await,
		Err(e) => Err(e.into()),
	};
	if let Err(e) = &result {
		error!("{e}");
	}
	result
}

pub async fn run(config: Config) -> Result<(), StartupError> {
	info!("Initializing state...");
	let state = State::new(config).await?;

	let address = format!("0.0.0.0:{}", state.config.port);
	info!("Binding to {address}");
	let listener = TcpListener::bind(&address)
		.await
		.map_err(|source| StartupError::Bind { address: address.clone(), source })?;
	info!("Server running on {address}");

	axum::serve(listener, app(state))
		.with_graceful_shutdown(shutdown_signal())
		.await
		.map_err(StartupError::Serve)?;

	info!("Server shut down");
	Ok(())
}

async fn shutdown_signal() {
	let ctrl_c = async {
		if let Err(e) = signal::ctrl_c().await {
			warn!("Failed to install Ctrl+C handler: {e}");
			std::future::pending::<()>().await;
		}
		info!("Received Ctrl+C, shutting down");
	};

	#[cfg(unix)]
	let terminate = async {
		match signal::unix::signal(signal::unix::SignalKind::terminate()) {
			Ok(mut sig) => {
				sig.recv().await;
				info!("Received terminate signal, shutting down");
			}
			Err(e) => {
				warn!("Failed to install signal handler: {e}");
				std::future::pending::<()>().await;
			}
		}
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {},
		_ = terminate => {},
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn unusable_database_fails_startup() {
		let path = std::env::temp_dir()
			.join(format!("invsys-missing-{}", uuid::Uuid::new_v4()))
			.join("nested")
			.join("inventory.db");
		let config = Config {
			database_url: format!("sqlite://{}", path.display()),
			..Default::default()
		};

		let err = run(config).await.unwrap_err();
		assert!(matches!(err, StartupError::State(AppError::Storage(_))), "got {err:?}");
	}
}

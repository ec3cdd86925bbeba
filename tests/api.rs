use axum::{
	body::Body,
	http::{
		header::{AUTHORIZATION, CONTENT_TYPE, COOKIE, SET_COOKIE},
		Method, Request, StatusCode,
	},
	Router,
};
use invsys::{
	app,
	config::{AdminSeed, Config},
	state::State,
};
use serde_json::{json, Value};
use tower::ServiceExt;

async fn test_app() -> Router {
	let config = Config {
		database_url: "sqlite::memory:".to_string(),
		hash_cost: 4,
		admin: Some(AdminSeed {
			email: "admin@example.com".to_string(),
			password: "admin123".to_string(),
		}),
		..Default::default()
	};
	app(State::new(config).await.unwrap())
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
	let resp = app.clone().oneshot(req).await.unwrap();
	let status = resp.status();
	let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
	(status, bytes.to_vec())
}

async fn call(app: &Router, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
	let mut req = Request::builder().method(method).uri(uri);
	if let Some(token) = token {
		req = req.header(AUTHORIZATION, format!("Bearer {token}"));
	}
	let req = match body {
		Some(body) => req
			.header(CONTENT_TYPE, "application/json")
			.body(Body::from(body.to_string()))
			.unwrap(),
		None => req.body(Body::empty()).unwrap(),
	};

	let (status, bytes) = send(app, req).await;
	let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
	(status, value)
}

async fn login(app: &Router, email: &str, pass: &str) -> String {
	let (status, body) = call(app, Method::POST, "/api/auth/login", None, Some(json!({ "email": email, "pass": pass }))).await;
	assert_eq!(status, StatusCode::OK, "{body}");
	body["token"].as_str().unwrap().to_string()
}

async fn register(app: &Router, name: &str, email: &str) -> String {
	let (status, body) = call(
		app,
		Method::POST,
		"/api/auth/register",
		None,
		Some(json!({ "name": name, "email": email, "pass": "secret123" })),
	)
	.await;
	assert_eq!(status, StatusCode::CREATED, "{body}");
	assert_eq!(body["user"]["role"], "student");
	login(app, email, "secret123").await
}

#[tokio::test]
async fn borrow_and_return_over_http() {
	let app = test_app().await;
	let admin = login(&app, "admin@example.com", "admin123").await;
	let alice = register(&app, "Alice", "alice@example.com").await;
	let bob = register(&app, "Bob", "bob@example.com").await;

	let (status, body) = call(
		&app,
		Method::POST,
		"/api/items",
		Some(&admin),
		Some(json!({ "code": "ITEM001", "name": "Multimeter", "category": "Electronics" })),
	)
	.await;
	assert_eq!(status, StatusCode::CREATED, "{body}");
	assert_eq!(body["item"]["status"], "available");
	let item_id = body["item"]["id"].as_i64().unwrap();

	let (status, body) = call(&app, Method::GET, "/api/items/code/ITEM001", Some(&alice), None).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["id"], item_id);

	let (status, body) = call(&app, Method::POST, "/api/transactions/borrow", Some(&alice), Some(json!({ "code": "ITEM001" }))).await;
	assert_eq!(status, StatusCode::CREATED, "{body}");
	assert_eq!(body["transaction"]["status"], "active");
	assert_eq!(body["item"]["status"], "borrowed");
	let loan_id = body["transaction"]["id"].as_i64().unwrap();

	let (status, body) = call(&app, Method::POST, "/api/transactions/borrow", Some(&bob), Some(json!({ "item_id": item_id }))).await;
	assert_eq!(status, StatusCode::CONFLICT);
	assert_eq!(body["kind"], "item_unavailable");
	assert_eq!(body["retryable"], false);

	// bob sees neither alice's loan nor the admin views
	let (status, _) = call(&app, Method::GET, &format!("/api/transactions/{loan_id}"), Some(&bob), None).await;
	assert_eq!(status, StatusCode::FORBIDDEN);
	let (status, body) = call(&app, Method::GET, "/api/transactions/active", Some(&bob), None).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body.as_array().unwrap().len(), 0);
	let (status, _) = call(&app, Method::GET, "/api/transactions/overdue", Some(&bob), None).await;
	assert_eq!(status, StatusCode::FORBIDDEN);
	let (status, _) = call(&app, Method::POST, &format!("/api/transactions/return/{loan_id}"), Some(&bob), None).await;
	assert_eq!(status, StatusCode::FORBIDDEN);

	let (status, body) = call(&app, Method::GET, "/api/transactions/mine", Some(&alice), None).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body[0]["item_code"], "ITEM001");
	assert_eq!(body[0]["overdue"], false);

	let (status, body) = call(&app, Method::POST, "/api/transactions/return", Some(&alice), Some(json!({ "code": "ITEM001" }))).await;
	assert_eq!(status, StatusCode::OK, "{body}");
	assert_eq!(body["transaction"]["status"], "returned");
	assert_eq!(body["item"]["status"], "available");

	let (status, body) = call(&app, Method::POST, &format!("/api/transactions/return/{loan_id}"), Some(&alice), None).await;
	assert_eq!(status, StatusCode::CONFLICT);
	assert_eq!(body["kind"], "no_active_loan");

	let (status, _) = call(&app, Method::POST, "/api/transactions/borrow", Some(&bob), Some(json!({ "code": "ITEM001" }))).await;
	assert_eq!(status, StatusCode::CREATED);

	let (status, body) = call(&app, Method::GET, "/api/transactions/active", Some(&admin), None).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body.as_array().unwrap().len(), 1);
	assert_eq!(body[0]["user_email"], "bob@example.com");

	let (status, body) = call(&app, Method::GET, "/api/stats", Some(&admin), None).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["active_loans"], 1);
	assert_eq!(body["most_borrowed"][0]["times_borrowed"], 2);

	let (status, body) = call(&app, Method::GET, "/api/admin/audit", Some(&admin), None).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["consistent"], true);

	let (status, body) = call(&app, Method::DELETE, &format!("/api/items/{item_id}"), Some(&admin), None).await;
	assert_eq!(status, StatusCode::CONFLICT, "{body}");
}

#[tokio::test]
async fn authentication_and_roles() {
	let app = test_app().await;

	let (status, body) = call(&app, Method::GET, "/api/items", None, None).await;
	assert_eq!(status, StatusCode::UNAUTHORIZED);
	assert_eq!(body["kind"], "unauthorized");

	let (status, _) = call(&app, Method::GET, "/api/items", Some("not-a-token"), None).await;
	assert_eq!(status, StatusCode::UNAUTHORIZED);

	let (status, _) = call(
		&app,
		Method::POST,
		"/api/auth/register",
		None,
		Some(json!({ "name": "Mallory", "email": "m@example.com", "pass": "secret123", "role": "admin" })),
	)
	.await;
	assert_eq!(status, StatusCode::BAD_REQUEST);

	let alice = register(&app, "Alice", "alice@example.com").await;
	let (status, _) = call(&app, Method::POST, "/api/items", Some(&alice), Some(json!({ "code": "X", "name": "X" }))).await;
	assert_eq!(status, StatusCode::FORBIDDEN);
	let (status, _) = call(&app, Method::GET, "/api/users", Some(&alice), None).await;
	assert_eq!(status, StatusCode::FORBIDDEN);

	let (status, body) = call(&app, Method::GET, "/api/auth/profile", Some(&alice), None).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["user"]["email"], "alice@example.com");
	assert!(body["user"].get("pass_hash").is_none());

	let (status, _) = call(&app, Method::POST, "/api/auth/logout", Some(&alice), None).await;
	assert_eq!(status, StatusCode::OK);
	let (status, _) = call(&app, Method::GET, "/api/auth/profile", Some(&alice), None).await;
	assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn session_cookie_is_accepted() {
	let app = test_app().await;
	let req = Request::builder()
		.method(Method::POST)
		.uri("/api/auth/login")
		.header(CONTENT_TYPE, "application/json")
		.body(Body::from(json!({ "email": "admin@example.com", "pass": "admin123" }).to_string()))
		.unwrap();
	let resp = app.clone().oneshot(req).await.unwrap();
	assert_eq!(resp.status(), StatusCode::OK);
	let cookie = resp
		.headers()
		.get(SET_COOKIE)
		.and_then(|v| v.to_str().ok())
		.and_then(|v| v.split(';').next())
		.unwrap()
		.to_string();
	assert!(cookie.starts_with("session="));

	let (status, body) = call(&app, Method::POST, "/api/items", None, None).await;
	assert_eq!(status, StatusCode::UNAUTHORIZED, "{body}");

	let req = Request::builder()
		.method(Method::POST)
		.uri("/api/items")
		.header(COOKIE, &cookie)
		.header(CONTENT_TYPE, "application/json")
		.body(Body::from(json!({ "code": "LBL-1", "name": "Label printer" }).to_string()))
		.unwrap();
	let (status, _) = send(&app, req).await;
	assert_eq!(status, StatusCode::CREATED);

	let req = Request::builder()
		.uri("/labels")
		.header(COOKIE, &cookie)
		.body(Body::empty())
		.unwrap();
	let (status, page) = send(&app, req).await;
	assert_eq!(status, StatusCode::OK);
	let page = String::from_utf8(page).unwrap();
	assert!(page.contains("LBL-1"));
	assert!(page.contains("Label printer"));
}

#[tokio::test]
async fn item_admin_endpoints() {
	let app = test_app().await;
	let admin = login(&app, "admin@example.com", "admin123").await;

	let new = json!({ "code": "T-1", "name": "Drill", "category": "Tools" });
	let (status, body) = call(&app, Method::POST, "/api/items", Some(&admin), Some(new.clone())).await;
	assert_eq!(status, StatusCode::CREATED);
	let id = body["item"]["id"].as_i64().unwrap();

	let (status, body) = call(&app, Method::POST, "/api/items", Some(&admin), Some(new)).await;
	assert_eq!(status, StatusCode::CONFLICT);
	assert_eq!(body["kind"], "conflict");

	let (status, body) = call(&app, Method::PUT, &format!("/api/items/{id}"), Some(&admin), Some(json!({ "status": "damaged" }))).await;
	assert_eq!(status, StatusCode::OK, "{body}");
	assert_eq!(body["item"]["status"], "damaged");
	assert_eq!(body["item"]["name"], "Drill");

	let (status, body) = call(&app, Method::GET, "/api/items?status=damaged", Some(&admin), None).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body.as_array().unwrap().len(), 1);

	let (status, body) = call(&app, Method::POST, "/api/transactions/borrow", Some(&admin), Some(json!({ "item_id": id }))).await;
	assert_eq!(status, StatusCode::CONFLICT);
	assert_eq!(body["kind"], "item_under_maintenance");

	let (status, _) = call(&app, Method::DELETE, &format!("/api/items/{id}"), Some(&admin), None).await;
	assert_eq!(status, StatusCode::OK);
	let (status, body) = call(&app, Method::GET, &format!("/api/items/{id}"), Some(&admin), None).await;
	assert_eq!(status, StatusCode::NOT_FOUND);
	assert_eq!(body["kind"], "not_found");
}

#[tokio::test]
async fn malformed_requests_get_json_errors() {
	let app = test_app().await;
	let admin = login(&app, "admin@example.com", "admin123").await;

	let req = Request::builder()
		.method(Method::POST)
		.uri("/api/auth/login")
		.header(CONTENT_TYPE, "application/json")
		.body(Body::from(r#"{"email": 1"#))
		.unwrap();
	let resp = app.clone().oneshot(req).await.unwrap();
	assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
	let content_type = resp.headers().get(CONTENT_TYPE).unwrap().to_str().unwrap().to_string();
	assert!(content_type.starts_with("application/json"), "{content_type}");
	let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
	let body: Value = serde_json::from_slice(&bytes).unwrap();
	assert_eq!(body["kind"], "bad_request");
	assert_eq!(body["retryable"], false);

	let (status, body) = call(&app, Method::GET, "/api/items/not-a-number", Some(&admin), None).await;
	assert_eq!(status, StatusCode::BAD_REQUEST);
	assert_eq!(body["kind"], "bad_request");

	let (status, body) = call(&app, Method::GET, "/api/items?status=lost", Some(&admin), None).await;
	assert_eq!(status, StatusCode::BAD_REQUEST);
	assert_eq!(body["kind"], "bad_request");

	// the web client names the item with camelCase
	let (status, _) = call(&app, Method::POST, "/api/items", Some(&admin), Some(json!({ "code": "CC-1", "name": "Camera" }))).await;
	assert_eq!(status, StatusCode::CREATED);
	let (status, body) = call(&app, Method::GET, "/api/items/code/CC-1", Some(&admin), None).await;
	assert_eq!(status, StatusCode::OK);
	let id = body["id"].as_i64().unwrap();
	let (status, body) = call(&app, Method::POST, "/api/transactions/borrow", Some(&admin), Some(json!({ "itemId": id }))).await;
	assert_eq!(status, StatusCode::CREATED, "{body}");
	assert_eq!(body["item"]["code"], "CC-1");
}

//! End-to-end API tests against a real server socket, running in the
//! storeless in-memory mode (`-d` empty): registration, login, order upload
//! and the auth wall all work out of the in-process maps.

use std::sync::Arc;

use bonusledger::auth::Authenticator;
use bonusledger::cache::MemCache;
use bonusledger::gateway::{self, state::AppState};
use reqwest::StatusCode;
use tokio::sync::watch;

struct TestServer {
    base: String,
    client: reqwest::Client,
    // dropping the sender would shut the server down mid-test
    _shutdown: watch::Sender<bool>,
}

impl TestServer {
    async fn spawn() -> Self {
        let cache = Arc::new(MemCache::new(None).await);
        let state = Arc::new(AppState::new(
            cache,
            Arc::new(Authenticator::new("test_key")),
        ));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(gateway::run_server(listener, state, shutdown_rx));

        Self {
            base: format!("http://{addr}"),
            client: reqwest::Client::new(),
            _shutdown: shutdown_tx,
        }
    }

    /// Register a user and return the issued token.
    async fn register(&self, login: &str, password: &str) -> String {
        let resp = self
            .client
            .post(format!("{}/api/user/register", self.base))
            .json(&serde_json::json!({"login": login, "password": password}))
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        resp.headers()["authorization"]
            .to_str()
            .unwrap()
            .to_string()
    }

    async fn submit_order(&self, token: &str, number: &str) -> StatusCode {
        self.client
            .post(format!("{}/api/user/orders", self.base))
            .header("Authorization", token)
            .header("Content-Type", "text/plain")
            .body(number.to_string())
            .send()
            .await
            .unwrap()
            .status()
    }
}

#[tokio::test]
async fn register_sets_token_in_header_and_cookies() {
    let server = TestServer::spawn().await;

    let resp = server
        .client
        .post(format!("{}/api/user/register", server.base))
        .json(&serde_json::json!({"login": "a@x", "password": "p"}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().contains_key("authorization"));

    let cookies: Vec<&str> = resp
        .headers()
        .get_all("set-cookie")
        .iter()
        .map(|v| v.to_str().unwrap())
        .collect();
    assert!(cookies.iter().any(|c| c.starts_with("Authorization=")));
    assert!(cookies.iter().any(|c| c.starts_with("jwt-token=")));
}

#[tokio::test]
async fn register_then_login_then_duplicate_registration() {
    let server = TestServer::spawn().await;
    server.register("a@x", "p").await;

    // same credentials log in
    let resp = server
        .client
        .post(format!("{}/api/user/login", server.base))
        .json(&serde_json::json!({"login": "a@x", "password": "p"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().contains_key("authorization"));

    // wrong password is rejected
    let resp = server
        .client
        .post(format!("{}/api/user/login", server.base))
        .json(&serde_json::json!({"login": "a@x", "password": "wrong"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    // the login is taken now
    let resp = server
        .client
        .post(format!("{}/api/user/register", server.base))
        .json(&serde_json::json!({"login": "a@x", "password": "other"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn register_rejects_missing_fields() {
    let server = TestServer::spawn().await;

    for body in [
        serde_json::json!({"login": "", "password": "p"}),
        serde_json::json!({"login": "a@x", "password": ""}),
        serde_json::json!({"login": "a@x"}),
    ] {
        let resp = server
            .client
            .post(format!("{}/api/user/register", server.base))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "body: {body}");
    }
}

#[tokio::test]
async fn order_upload_statuses_cover_the_contract() {
    let server = TestServer::spawn().await;
    let token_a = server.register("a@x", "p").await;
    let token_b = server.register("b@x", "p").await;

    // fresh upload is accepted
    assert_eq!(
        server.submit_order(&token_a, "79927398713").await,
        StatusCode::ACCEPTED
    );
    // re-upload by the same user is fine
    assert_eq!(
        server.submit_order(&token_a, "79927398713").await,
        StatusCode::OK
    );
    // another user hits the conflict
    assert_eq!(
        server.submit_order(&token_b, "79927398713").await,
        StatusCode::CONFLICT
    );
    // bad checksum
    assert_eq!(
        server.submit_order(&token_a, "12345678901").await,
        StatusCode::UNPROCESSABLE_ENTITY
    );
    // not a number at all
    assert_eq!(
        server.submit_order(&token_a, "not-a-number").await,
        StatusCode::BAD_REQUEST
    );
}

#[tokio::test]
async fn order_listing_shows_the_uploaded_order() {
    let server = TestServer::spawn().await;
    let token = server.register("a@x", "p").await;

    // nothing yet
    let resp = server
        .client
        .get(format!("{}/api/user/orders", server.base))
        .header("Authorization", &token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    server.submit_order(&token, "79927398713").await;

    let resp = server
        .client
        .get(format!("{}/api/user/orders", server.base))
        .header("Authorization", &token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let listing: serde_json::Value = resp.json().await.unwrap();
    let orders = listing.as_array().unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0]["number"], "79927398713");
    assert_eq!(orders[0]["status"], "NEW");
    assert!(orders[0].get("accrual").is_none());
    assert!(orders[0]["uploaded_at"].as_str().unwrap().contains('T'));
}

#[tokio::test]
async fn protected_routes_demand_a_valid_token() {
    let server = TestServer::spawn().await;

    for path in [
        "/api/user/orders",
        "/api/user/balance",
        "/api/user/withdrawals",
    ] {
        let resp = server
            .client
            .get(format!("{}{path}", server.base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "path: {path}");

        let resp = server
            .client
            .get(format!("{}{path}", server.base))
            .header("Authorization", "Bearer garbage")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "path: {path}");
    }
}

#[tokio::test]
async fn token_in_the_jwt_cookie_is_accepted() {
    let server = TestServer::spawn().await;
    let token = server.register("a@x", "p").await;

    let resp = server
        .client
        .get(format!("{}/api/user/orders", server.base))
        .header("Cookie", format!("jwt-token={token}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn withdraw_validation_precedes_the_store() {
    let server = TestServer::spawn().await;
    let token = server.register("a@x", "p").await;

    // bad checksum fails before the (absent) store is consulted
    let resp = server
        .client
        .post(format!("{}/api/user/balance/withdraw", server.base))
        .header("Authorization", &token)
        .json(&serde_json::json!({"order": "12345678901", "sum": 100}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let resp = server
        .client
        .post(format!("{}/api/user/balance/withdraw", server.base))
        .header("Authorization", &token)
        .json(&serde_json::json!({"order": "79927398713", "sum": -5}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn storeless_mode_reports_not_ready() {
    let server = TestServer::spawn().await;

    let resp = server
        .client
        .get(format!("{}/ping", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

    // ledger operations surface the missing store as a server error
    let token = server.register("a@x", "p").await;
    let resp = server
        .client
        .get(format!("{}/api/user/balance", server.base))
        .header("Authorization", &token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

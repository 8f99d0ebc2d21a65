use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
    response::Response,
};
use order_book_engine::{api::router, config::Config, state::AppState};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

fn test_config(dir: &TempDir) -> Config {
    Config {
        store_path: dir.path().to_string_lossy().to_string(),
        jwt_secret_key: "test-secret".to_string(),
        algorithm: "HS256".to_string(),
        access_token_expire_minutes: 60,
        symbol: "BTC-USD".to_string(),
        default_last_trade_price: Decimal::ZERO,
    }
}

async fn test_app() -> (Router, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let state = AppState::open(dir.path(), config).await.unwrap();
    (router(state), dir)
}

async fn body_json(res: Response) -> Value {
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn signup_and_login(app: &Router, email: &str) -> String {
    let signup = json!({"email": email, "password": "hunter2", "name": "Alice"});
    let res = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/auth/signup")
                .header("content-type", "application/json")
                .body(Body::from(signup.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);

    let login = json!({"email": email, "password": "hunter2"});
    let res = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/auth/login")
                .header("content-type", "application/json")
                .body(Body::from(login.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let tokens = body_json(res).await;
    tokens["access_token"].as_str().unwrap().to_string()
}

async fn signup_admin_and_login(app: &Router, email: &str) -> String {
    let signup = json!({"email": email, "password": "hunter2", "name": "Bob", "user_type": "ADMIN"});
    let res = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/auth/signup")
                .header("content-type", "application/json")
                .body(Body::from(signup.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);

    let login = json!({"email": email, "password": "hunter2"});
    let res = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/auth/login")
                .header("content-type", "application/json")
                .body(Body::from(login.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let tokens = body_json(res).await;
    tokens["access_token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn signup_twice_with_same_email_is_conflict() {
    let (app, _tmp) = test_app().await;
    let body = json!({"email": "dup@example.com", "password": "x", "name": "Dup"});

    let first = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/auth/signup")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/auth/signup")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn missing_auth_header_is_rejected_before_any_order_code_runs() {
    let (app, _tmp) = test_app().await;
    let body = json!({"side": "BUY", "order_type": "LIMIT", "price": "100", "quantity": "1"});

    let res = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/orders/place")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_auth_header_is_rejected() {
    let (app, _tmp) = test_app().await;
    let res = app
        .oneshot(
            Request::builder()
                .uri("/orders/my-orders")
                .header("authorization", "not-a-bearer-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn non_admin_calling_recent_trades_is_forbidden() {
    let (app, _tmp) = test_app().await;
    let token = signup_and_login(&app, "trader@example.com").await;

    let res = app
        .oneshot(
            Request::builder()
                .uri("/orders/recent-trades")
                .header("authorization", format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn admin_can_read_recent_trades() {
    let (app, _tmp) = test_app().await;
    let token = signup_admin_and_login(&app, "admin@example.com").await;

    let res = app
        .oneshot(
            Request::builder()
                .uri("/orders/recent-trades")
                .header("authorization", format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn limit_cross_produces_one_trade_and_fills_both_orders() {
    let (app, _tmp) = test_app().await;
    let seller = signup_and_login(&app, "seller@example.com").await;
    let buyer = signup_and_login(&app, "buyer@example.com").await;

    let sell = json!({"side": "SELL", "order_type": "LIMIT", "price": "100", "quantity": "5"});
    let res = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/orders/place")
                .header("authorization", format!("Bearer {seller}"))
                .header("content-type", "application/json")
                .body(Body::from(sell.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let buy = json!({"side": "BUY", "order_type": "LIMIT", "price": "100", "quantity": "5"});
    let res = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/orders/place")
                .header("authorization", format!("Bearer {buyer}"))
                .header("content-type", "application/json")
                .body(Body::from(buy.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let ack = body_json(res).await;
    assert_eq!(ack["trades"].as_array().unwrap().len(), 1);
    assert_eq!(ack["order"]["status"], "FILLED");

    let res = app
        .oneshot(
            Request::builder()
                .uri("/orders/book")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let snap = body_json(res).await;
    assert!(snap["bids"].as_array().unwrap().is_empty());
    assert!(snap["asks"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn market_order_against_empty_book_is_persisted_canceled() {
    let (app, _tmp) = test_app().await;
    let token = signup_and_login(&app, "lonely@example.com").await;

    let body = json!({"side": "BUY", "order_type": "MARKET", "quantity": "10"});
    let res = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/orders/place")
                .header("authorization", format!("Bearer {token}"))
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let ack = body_json(res).await;
    assert_eq!(ack["order_executed"], false);
    assert!(ack["trades"].as_array().unwrap().is_empty());
    assert_eq!(ack["order"]["status"], "CANCELED");
}

#[tokio::test]
async fn resting_order_can_be_placed_then_canceled() {
    let (app, _tmp) = test_app().await;
    let token = signup_and_login(&app, "resting@example.com").await;

    let body = json!({"side": "BUY", "order_type": "LIMIT", "price": "90", "quantity": "3"});
    let res = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/orders/place")
                .header("authorization", format!("Bearer {token}"))
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let ack = body_json(res).await;
    let order_id = ack["order"]["id"].as_str().unwrap().to_string();

    let res = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/orders/cancel/{order_id}"))
                .header("authorization", format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/orders/cancel/{order_id}"))
                .header("authorization", format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

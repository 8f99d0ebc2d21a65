use serde::{Deserialize, de::DeserializeOwned};
use serde_json::json;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{error, warn};

use axum::{
    Json, Router,
    body::Bytes,
    extract::{
        FromRequest, Path, Query, Request, State, WebSocketUpgrade,
        ws::{CloseFrame, Message, WebSocket},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
};
use uuid::Uuid;

use crate::{
    auth::{AdminUser, AuthUser, LoginRequest, SignupRequest, UserView, decode_access_token, login, signup},
    engine::BookSnapshot,
    errors::AppError,
    order_service::PlaceOrderRequest,
    publisher::Event,
    state::AppState,
};

type ApiErr = (StatusCode, Json<serde_json::Value>);
fn err(status: StatusCode, msg: &str) -> ApiErr {
    (status, Json(json!({ "error": msg })))
}

/// Deserializes the request body as JSON, logging a preview of the rejected payload on
/// failure rather than silently 422ing.
pub struct LoggedJson<T>(pub T);

impl<S, T> FromRequest<S> for LoggedJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiErr;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let method = req.method().clone();
        let uri = req.uri().clone();
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| err(StatusCode::BAD_REQUEST, &e.to_string()))?;

        match serde_json::from_slice::<T>(&bytes) {
            Ok(val) => Ok(LoggedJson(val)),
            Err(e) => {
                let preview = String::from_utf8_lossy(&bytes);
                let preview = &preview[..preview.len().min(4096)];
                warn!(
                    error = %e,
                    %method,
                    uri = %uri,
                    body_preview = %preview,
                    "request rejected: JSON deserialization failed"
                );
                Err(err(StatusCode::UNPROCESSABLE_ENTITY, &e.to_string()))
            }
        }
    }
}

fn default_limit() -> usize {
    100
}

#[derive(Deserialize)]
pub struct OrdersQuery {
    #[serde(default)]
    active_only: bool,
}

#[derive(Deserialize)]
pub struct LimitQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}

#[derive(Deserialize)]
pub struct WsAuthQuery {
    token: Option<String>,
}

// ---- auth ----

pub async fn signup_handler(
    State(state): State<AppState>,
    LoggedJson(req): LoggedJson<SignupRequest>,
) -> Result<(StatusCode, Json<UserView>), AppError> {
    let user = signup(&state, req).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn login_handler(
    State(state): State<AppState>,
    LoggedJson(req): LoggedJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let tokens = login(&state, req).await?;
    Ok(Json(tokens))
}

// ---- orders ----

pub async fn place_order_handler(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    LoggedJson(req): LoggedJson<PlaceOrderRequest>,
) -> Result<impl IntoResponse, AppError> {
    let result = state.orders.place_order(user.id, req).await?;
    Ok(Json(result))
}

pub async fn cancel_order_handler(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let canceled = state.orders.cancel_order(user.id, order_id).await?;
    Ok(Json(json!({ "message": "order canceled", "order_id": canceled.id })))
}

pub async fn my_orders_handler(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(q): Query<OrdersQuery>,
) -> Result<impl IntoResponse, AppError> {
    let orders = state
        .orders
        .get_user_orders(user.id, q.active_only, 1000)
        .await?;
    Ok(Json(orders))
}

pub async fn my_trades_handler(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(q): Query<LimitQuery>,
) -> Result<impl IntoResponse, AppError> {
    let trades = state.orders.get_user_trades(user.id, q.limit).await?;
    Ok(Json(trades))
}

pub async fn order_book_handler(State(state): State<AppState>) -> Json<BookSnapshot> {
    Json(state.orders.get_order_book_snapshot())
}

pub async fn market_stats_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.orders.get_market_stats())
}

pub async fn recent_trades_handler(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Query(q): Query<LimitQuery>,
) -> Result<impl IntoResponse, AppError> {
    let trades = state.orders.get_recent_trades(q.limit).await?;
    Ok(Json(trades))
}

pub async fn prices_handler(
    State(state): State<AppState>,
    Query(q): Query<LimitQuery>,
) -> Result<impl IntoResponse, AppError> {
    let prices = state.store.read().await.list_recent_prices(q.limit)?;
    Ok(Json(prices))
}

// ---- websocket ----

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ClientFrame {
    #[serde(rename = "ping")]
    Ping,
}

pub async fn ws_handler(
    State(state): State<AppState>,
    Query(q): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, q.token))
}

/// Validates `token` (if present), registers a publisher session, and drives the bidirectional
/// message loop: forwards published events to the client, and answers `{"type":"ping"}` with
/// `{"type":"pong"}` without touching any engine state.
async fn handle_socket(mut socket: WebSocket, state: AppState, token: Option<String>) {
    let user_id = match &token {
        Some(token) => match decode_access_token(token, &state.config) {
            Ok(claims) => Some(claims.user_id),
            Err(_) => {
                let _ = socket
                    .send(Message::Text(
                        serde_json::to_string(&Event::Error {
                            message: "invalid or expired token".to_string(),
                        })
                        .unwrap()
                        .into(),
                    ))
                    .await;
                let _ = socket
                    .send(Message::Close(Some(CloseFrame {
                        code: 1008,
                        reason: "invalid or expired token".into(),
                    })))
                    .await;
                return;
            }
        },
        None => None,
    };

    let (session_id, mut rx) = state.publisher.register(user_id);
    if let Some(user_id) = user_id {
        let _ = socket
            .send(Message::Text(
                serde_json::to_string(&Event::Connected { user_id }).unwrap().into(),
            ))
            .await;
    }

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                let text = match serde_json::to_string(&event) {
                    Ok(t) => t,
                    Err(e) => {
                        error!(error = %e, "failed to serialize outgoing ws event");
                        continue;
                    }
                };
                if socket.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Ok(ClientFrame::Ping) = serde_json::from_str::<ClientFrame>(&text) {
                            if socket.send(Message::Text(r#"{"type":"pong"}"#.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(error = %e, "websocket receive error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    state.publisher.unregister(session_id);
}

/// Constructs the application's `Router` with all routes and shared state.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/auth/signup", post(signup_handler))
        .route("/auth/login", post(login_handler))
        .route("/orders/place", post(place_order_handler))
        .route("/orders/cancel/{order_id}", delete(cancel_order_handler))
        .route("/orders/my-orders", get(my_orders_handler))
        .route("/orders/my-trades", get(my_trades_handler))
        .route("/orders/book", get(order_book_handler))
        .route("/orders/market-stats", get(market_stats_handler))
        .route("/orders/recent-trades", get(recent_trades_handler))
        .route("/prices", get(prices_handler))
        .route("/ws/update", get(ws_handler))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(
                    DefaultMakeSpan::new()
                        .include_headers(false)
                        .level(tracing::Level::TRACE),
                )
                .on_response(DefaultOnResponse::new().level(tracing::Level::TRACE)),
        )
        .with_state(state)
}

use axum::{
    extract::{FromRequestParts, State},
    http::request::Parts,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{errors::AppError, state::AppState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UserType {
    Trader,
    Admin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    /// bcrypt hash; never serialized back out to a client-facing response type.
    pub password_hash: String,
    pub name: String,
    pub user_type: UserType,
}

#[derive(Debug, Serialize)]
pub struct UserView {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub user_type: UserType,
}

impl From<&User> for UserView {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            email: u.email.clone(),
            name: u.name.clone(),
            user_type: u.user_type,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    #[serde(default = "default_user_type")]
    pub user_type: UserType,
}

fn default_user_type() -> UserType {
    UserType::Trader
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub user_id: Uuid,
    pub exp: usize,
}

fn hash_password(password: &str) -> Result<String, AppError> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST)
        .map_err(|e| AppError::Internal(format!("password hashing failed: {e}")))
}

fn verify_password(password: &str, hash: &str) -> Result<bool, AppError> {
    bcrypt::verify(password, hash)
        .map_err(|e| AppError::Internal(format!("password verification failed: {e}")))
}

fn algorithm_from_name(name: &str) -> Algorithm {
    name.parse().unwrap_or(Algorithm::HS256)
}

pub fn create_auth_token(user: &User, config: &crate::config::Config) -> Result<TokenPair, AppError> {
    let alg = algorithm_from_name(&config.algorithm);
    let key = EncodingKey::from_secret(config.jwt_secret_key.as_bytes());
    let now = Utc::now();

    let access_exp = now + Duration::minutes(config.access_token_expire_minutes);
    let refresh_exp = access_exp + Duration::days(7);

    let access_claims = Claims {
        sub: user.email.clone(),
        user_id: user.id,
        exp: access_exp.timestamp() as usize,
    };
    let refresh_claims = Claims {
        sub: user.email.clone(),
        user_id: user.id,
        exp: refresh_exp.timestamp() as usize,
    };

    let access_token = encode(&Header::new(alg), &access_claims, &key)
        .map_err(|e| AppError::Internal(format!("token encoding failed: {e}")))?;
    let refresh_token = encode(&Header::new(alg), &refresh_claims, &key)
        .map_err(|e| AppError::Internal(format!("token encoding failed: {e}")))?;

    Ok(TokenPair {
        access_token,
        refresh_token,
    })
}

pub fn decode_access_token(token: &str, config: &crate::config::Config) -> Result<Claims, AppError> {
    let alg = algorithm_from_name(&config.algorithm);
    let key = DecodingKey::from_secret(config.jwt_secret_key.as_bytes());
    decode::<Claims>(token, &key, &Validation::new(alg))
        .map(|data| data.claims)
        .map_err(|_| AppError::Unauthorized("invalid or expired token".to_string()))
}

pub async fn signup(state: &AppState, req: SignupRequest) -> Result<UserView, AppError> {
    let store = state.store.read().await;
    if store.get_user_by_email(&req.email)?.is_some() {
        return Err(AppError::Conflict("email already registered".to_string()));
    }
    drop(store);

    let password_hash = hash_password(&req.password)?;
    let user = User {
        id: Uuid::new_v4(),
        email: req.email,
        password_hash,
        name: req.name,
        user_type: req.user_type,
    };

    let mut store = state.store.write().await;
    store.insert_user(&user)?;
    Ok(UserView::from(&user))
}

pub async fn login(state: &AppState, req: LoginRequest) -> Result<TokenPair, AppError> {
    let store = state.store.read().await;
    let user = store
        .get_user_by_email(&req.email)?
        .ok_or_else(|| AppError::Unauthorized("invalid email or password".to_string()))?;
    drop(store);

    if !verify_password(&req.password, &user.password_hash)? {
        return Err(AppError::Unauthorized("invalid email or password".to_string()));
    }

    create_auth_token(&user, &state.config)
}

/// Extracts and validates the bearer token, then resolves it to the full [`User`] row.
pub struct AuthUser(pub User);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let State(state) = State::<AppState>::from_request_parts(parts, state)
            .await
            .map_err(|_| AppError::Internal("state extraction failed".to_string()))?;

        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized("missing authorization header".to_string()))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::Unauthorized("malformed authorization header".to_string()))?;

        let claims = decode_access_token(token, &state.config)?;

        let store = state.store.read().await;
        let user = store
            .get_user(claims.user_id)?
            .ok_or_else(|| AppError::Unauthorized("user not found".to_string()))?;

        Ok(AuthUser(user))
    }
}

/// Same as [`AuthUser`] but additionally requires `user_type == ADMIN`.
pub struct AdminUser(pub User);

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let AuthUser(user) = AuthUser::from_request_parts(parts, state).await?;
        if user.user_type != UserType::Admin {
            return Err(AppError::Forbidden("admin privileges required".to_string()));
        }
        Ok(AdminUser(user))
    }
}

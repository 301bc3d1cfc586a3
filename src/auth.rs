//! Token issuing, password hashing and the request-level authorization layer.
//!
//! Every request passes through [`authenticate`], which turns a bearer token
//! (API clients) or the `token` cookie (browser pages) into a [`Principal`]
//! stored in the request extensions. Route groups then attach
//! [`require_capability`] with the capability they need.

use std::{str::FromStr, sync::Arc};

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::{
    AppState,
    config::Config,
    entities::{role, user},
    error::{AppError, AppResult},
};

pub const TOKEN_COOKIE: &str = "token";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Role {
    Admin,
    Cashier,
    User,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "Admin",
            Role::Cashier => "Cashier",
            Role::User => "User",
        }
    }

    pub fn grants(self, capability: Capability) -> bool {
        match self {
            Role::Admin => true,
            Role::Cashier => {
                matches!(capability, Capability::SellTickets | Capability::ManageTickets)
            },
            Role::User => false,
        }
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Admin" => Ok(Role::Admin),
            "Cashier" => Ok(Role::Cashier),
            "User" => Ok(Role::User),
            other => Err(AppError::validation(format!("unknown role: {other}"))),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Capability {
    /// Create, update and delete movies and screenings.
    ManageCatalog,
    /// Sell tickets in person, to guests or to any account.
    SellTickets,
    /// List and refund tickets that belong to other users.
    ManageTickets,
    /// List users and roles, assign roles.
    ManageUsers,
}

/// The authenticated caller, decoded from a verified token.
#[derive(Clone, Debug)]
pub struct Principal {
    pub user_id: i32,
    pub email: String,
    pub roles: Vec<String>,
}

impl Principal {
    pub fn can(&self, capability: Capability) -> bool {
        self.roles
            .iter()
            .filter_map(|name| name.parse::<Role>().ok())
            .any(|role| role.grants(capability))
    }
}

impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .ok_or_else(|| AppError::unauthorized("authentication required"))
    }
}

/// Like [`Principal`] but does not reject anonymous callers.
#[derive(Clone, Debug)]
pub struct MaybePrincipal(pub Option<Principal>);

impl<S> FromRequestParts<S> for MaybePrincipal
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(parts.extensions.get::<Principal>().cloned()))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default, rename = "roleIds")]
    pub role_ids: Vec<i32>,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    issuer: String,
    audience: String,
    ttl_seconds: i64,
}

impl TokenIssuer {
    pub fn new(config: &Config) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&config.jwt_issuer]);
        validation.set_audience(&[&config.jwt_audience]);

        Self {
            encoding: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation,
            issuer: config.jwt_issuer.clone(),
            audience: config.jwt_audience.clone(),
            ttl_seconds: config.jwt_expire_days.max(1) * 86_400,
        }
    }

    pub fn ttl_seconds(&self) -> i64 {
        self.ttl_seconds
    }

    pub fn issue(&self, user: &user::Model, roles: &[role::Model]) -> AppResult<String> {
        let now = jiff::Timestamp::now().as_second();
        let claims = Claims {
            sub: user.id.to_string(),
            email: user.email.clone(),
            roles: roles.iter().map(|r| r.name.clone()).collect(),
            role_ids: roles.iter().map(|r| r.id).collect(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now,
            exp: now + self.ttl_seconds,
        };
        Ok(jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?)
    }

    pub fn verify(&self, token: &str) -> AppResult<Principal> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|err| AppError::unauthorized(format!("invalid token: {err}")))?;
        let user_id = data
            .claims
            .sub
            .parse()
            .map_err(|_| AppError::unauthorized("invalid token subject"))?;
        Ok(Principal { user_id, email: data.claims.email, roles: data.claims.roles })
    }
}

pub async fn hash_password(password: String, cost: u32) -> AppResult<String> {
    let hash = tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(anyhow::Error::from)??;
    Ok(hash)
}

/// Guest rows carry an empty hash and never verify.
pub async fn verify_password(password: String, hash: String) -> AppResult<bool> {
    if hash.is_empty() {
        return Ok(false);
    }
    let ok = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash).unwrap_or(false))
        .await
        .map_err(anyhow::Error::from)?;
    Ok(ok)
}

/// Resolves the caller and stores it in the request extensions.
///
/// A malformed or expired bearer token is rejected outright; a stale cookie
/// just leaves the request anonymous so the browser pages keep working.
pub async fn authenticate(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let principal = match req.headers().get(header::AUTHORIZATION) {
        Some(value) => {
            let value = value
                .to_str()
                .map_err(|_| AppError::unauthorized("invalid authorization header"))?;
            let token = value
                .strip_prefix("Bearer ")
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .ok_or_else(|| AppError::unauthorized("expected 'Bearer <token>'"))?;
            Some(state.tokens.verify(token)?)
        },
        None => CookieJar::from_headers(req.headers())
            .get(TOKEN_COOKIE)
            .and_then(|cookie| state.tokens.verify(cookie.value()).ok()),
    };

    if let Some(principal) = principal {
        tracing::debug!(user_id = principal.user_id, roles = ?principal.roles, "authenticated");
        req.extensions_mut().insert(principal);
    }
    Ok(next.run(req).await)
}

/// Route-group guard: 401 without a principal, 403 without the capability.
pub async fn require_capability(
    State(capability): State<Capability>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(principal) = req.extensions().get::<Principal>() else {
        return Err(AppError::unauthorized("authentication required"));
    };
    if !principal.can(capability) {
        tracing::info!(user_id = principal.user_id, ?capability, "capability denied");
        return Err(AppError::forbidden("insufficient permissions"));
    }
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    fn principal(roles: &[&str]) -> Principal {
        Principal {
            user_id: 1,
            email: "a@b.hu".to_string(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
        }
    }

    #[test]
    fn capabilities_follow_roles() {
        let admin = principal(&["Admin"]);
        let cashier = principal(&["Cashier"]);
        let user = principal(&["User"]);

        assert!(admin.can(Capability::ManageCatalog));
        assert!(admin.can(Capability::ManageUsers));
        assert!(cashier.can(Capability::SellTickets));
        assert!(cashier.can(Capability::ManageTickets));
        assert!(!cashier.can(Capability::ManageCatalog));
        assert!(!user.can(Capability::SellTickets));
        assert!(!principal(&["Projectionist"]).can(Capability::ManageTickets));
    }

    #[test]
    fn issued_token_round_trips_claims() {
        let config = test_support::config();
        let issuer = TokenIssuer::new(&config);
        let user = user::Model {
            id: 42,
            email: "jane@example.com".to_string(),
            password_hash: String::new(),
            phone_number: "+36301234567".to_string(),
            is_registered: true,
        };
        let roles = vec![role::Model { id: 2, name: "Cashier".to_string() }];

        let token = issuer.issue(&user, &roles).unwrap();
        let principal = issuer.verify(&token).unwrap();

        assert_eq!(principal.user_id, 42);
        assert_eq!(principal.email, "jane@example.com");
        assert_eq!(principal.roles, ["Cashier"]);
    }

    #[test]
    fn expired_and_foreign_tokens_are_rejected() {
        let config = test_support::config();
        let issuer = TokenIssuer::new(&config);
        let now = jiff::Timestamp::now().as_second();

        let expired = Claims {
            sub: "1".to_string(),
            email: "a@b.hu".to_string(),
            roles: vec!["Admin".to_string()],
            role_ids: vec![1],
            iss: config.jwt_issuer.clone(),
            aud: config.jwt_audience.clone(),
            iat: now - 7_200,
            exp: now - 3_600,
        };
        let token = jsonwebtoken::encode(
            &Header::default(),
            &expired,
            &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
        )
        .unwrap();
        assert!(matches!(issuer.verify(&token), Err(AppError::Unauthorized(_))));

        let forged = Claims { iat: now, exp: now + 3_600, ..expired };
        let token = jsonwebtoken::encode(
            &Header::default(),
            &forged,
            &EncodingKey::from_secret(b"some-other-secret-some-other-secret"),
        )
        .unwrap();
        assert!(matches!(issuer.verify(&token), Err(AppError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn password_hash_verifies() {
        let hash = hash_password("hunter22".to_string(), 4).await.unwrap();
        assert!(verify_password("hunter22".to_string(), hash.clone()).await.unwrap());
        assert!(!verify_password("hunter23".to_string(), hash).await.unwrap());
        assert!(!verify_password("anything".to_string(), String::new()).await.unwrap());
    }
}

// src/services/auth.rs
//! Session tokens for the role portals.
//!
//! Login hands out an HS256 JWT carrying the session user. Every role
//! scoped router is wrapped in [`require_role`], which rejects requests
//! without a valid bearer token for that role and otherwise stores the
//! [`SessionUser`] in the request extensions for handlers to extract.

use crate::error::{ServiceError, ServiceResult};
use crate::utils::address::{is_candidate_id, require_address, short_address};
use crate::utils::formatters::mask_id;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use log::{debug, info};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

static VALIDATION: Lazy<Validation> = Lazy::new(|| Validation::new(Algorithm::HS256));

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Candidate,
    Recruiter,
    Issuer,
    Admin,
}

/// JWT payload.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub name: String,
    pub exp: usize,
}

/// Authenticated caller, as seen by handlers.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SessionUser {
    pub id: String,
    pub role: Role,
    pub name: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub role: Role,
    /// Wallet address for candidates and issuers, recruiter id for recruiters.
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Admin only.
    #[serde(default)]
    pub passphrase: Option<String>,
}

#[derive(Serialize, Debug, Clone)]
pub struct LoginResponse {
    pub token: String,
    pub user: SessionUser,
}

pub struct AuthService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    admin_passphrase: String,
    ttl: Duration,
}

impl AuthService {
    pub fn new(secret: &str, admin_passphrase: &str, ttl_hours: u64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            admin_passphrase: admin_passphrase.to_string(),
            ttl: Duration::hours(ttl_hours.min(i64::MAX as u64) as i64),
        }
    }

    /// Starts a session for the requested role.
    ///
    /// # Errors
    /// - `Unauthorized` for a wrong admin passphrase
    /// - `InvalidAddress` when a candidate or issuer address does not normalize
    /// - `Validation` for a missing recruiter id
    pub fn login(&self, request: LoginRequest) -> ServiceResult<LoginResponse> {
        let address = request.address.as_deref().unwrap_or_default().trim();
        let id = match request.role {
            Role::Admin => {
                if request.passphrase.as_deref() != Some(self.admin_passphrase.as_str()) {
                    return Err(ServiceError::Unauthorized("invalid admin passphrase".to_string()));
                }
                "admin".to_string()
            }
            Role::Candidate | Role::Issuer => require_address(address)?,
            Role::Recruiter => {
                if address.is_empty() {
                    return Err(ServiceError::Validation("recruiter id is required".to_string()));
                }
                if is_candidate_id(address) {
                    require_address(address)?
                } else {
                    address.to_string()
                }
            }
        };
        let name = request
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| match request.role {
                Role::Admin => "Admin".to_string(),
                _ => short_address(&id),
            });
        let user = SessionUser {
            id,
            role: request.role,
            name,
        };
        let token = self.issue_token(&user)?;
        info!("{:?} session started for {}", user.role, mask_id(&user.id));
        Ok(LoginResponse { token, user })
    }

    pub fn issue_token(&self, user: &SessionUser) -> ServiceResult<String> {
        let exp = (Utc::now() + self.ttl).timestamp().max(0) as usize;
        let claims = Claims {
            sub: user.id.clone(),
            role: user.role,
            name: user.name.clone(),
            exp,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| ServiceError::Storage(format!("token encoding failed: {}", e)))
    }

    pub fn verify(&self, token: &str) -> ServiceResult<SessionUser> {
        let data = decode::<Claims>(token, &self.decoding, &VALIDATION).map_err(|e| {
            debug!("rejected token: {}", e);
            ServiceError::Unauthorized("invalid or expired session".to_string())
        })?;
        Ok(SessionUser {
            id: data.claims.sub,
            role: data.claims.role,
            name: data.claims.name,
        })
    }

    /// Resolves the bearer token in `headers` and checks its role.
    pub fn authorize(&self, headers: &HeaderMap, role: Role) -> ServiceResult<SessionUser> {
        let token = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ServiceError::Unauthorized("missing bearer token".to_string()))?;
        let user = self.verify(token)?;
        if user.role != role {
            return Err(ServiceError::Unauthorized(format!(
                "{:?} session cannot access {:?} routes",
                user.role, role
            )));
        }
        Ok(user)
    }
}

/// Middleware state: the role a router requires.
#[derive(Clone)]
pub struct RoleGuard {
    pub auth: Arc<AuthService>,
    pub role: Role,
}

pub async fn require_role(State(guard): State<RoleGuard>, mut request: Request, next: Next) -> Response {
    match guard.auth.authorize(request.headers(), guard.role) {
        Ok(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}

#[axum::async_trait]
impl<S: Send + Sync> axum::extract::FromRequestParts<S> for SessionUser {
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<SessionUser>()
            .cloned()
            .ok_or_else(|| ServiceError::Unauthorized("no session in request".to_string()))
    }
}

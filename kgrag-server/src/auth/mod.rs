// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Bearer-token authorization for the question endpoint.
//!
//! Tokens are issued elsewhere; this module only verifies them.

use axum::{
    extract::Request,
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const FORBIDDEN_MESSAGE: &str = "You are not authorized to access this resource";

/// Authentication context attached to each authorized request
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub subject: Option<String>,
    pub scopes: Vec<String>,
}

/// Authentication error
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authentication credentials")]
    MissingCredentials,

    #[error("JWT token validation failed: {0}")]
    JwtValidation(String),

    #[error("Token lacks required scope '{0}'")]
    MissingScope(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        tracing::warn!(reason = %self, "Rejected request");
        (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({ "error": FORBIDDEN_MESSAGE })),
        )
            .into_response()
    }
}

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub sub: Option<String>,
    pub exp: usize,
    #[serde(default)]
    pub scope: ScopeClaim,
}

/// `scope` is a list in UAA tokens and a space-separated string in others.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScopeClaim {
    List(Vec<String>),
    Joined(String),
}

impl Default for ScopeClaim {
    fn default() -> Self {
        ScopeClaim::List(Vec::new())
    }
}

impl ScopeClaim {
    pub fn scopes(&self) -> Vec<String> {
        match self {
            ScopeClaim::List(list) => list.clone(),
            ScopeClaim::Joined(joined) => joined.split_whitespace().map(String::from).collect(),
        }
    }
}

/// Authenticator trait for pluggable auth strategies
pub trait Authenticator: Send + Sync {
    /// Authenticate request by examining headers (synchronous)
    fn authenticate(&self, headers: &HeaderMap) -> Result<AuthContext, AuthError>;
}

/// Bearer token (JWT, HS256) authenticator with a scope check
pub struct BearerTokenAuth {
    jwt_secret: Vec<u8>,
    required_scope: String,
}

impl BearerTokenAuth {
    pub fn new(jwt_secret: String, required_scope: String) -> Self {
        Self {
            jwt_secret: jwt_secret.into_bytes(),
            required_scope,
        }
    }
}

impl Authenticator for BearerTokenAuth {
    fn authenticate(&self, headers: &HeaderMap) -> Result<AuthContext, AuthError> {
        let auth_header = headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or(AuthError::MissingCredentials)?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(AuthError::MissingCredentials)?;

        let token_data = jsonwebtoken::decode::<Claims>(
            token,
            &jsonwebtoken::DecodingKey::from_secret(&self.jwt_secret),
            &jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::HS256),
        )
        .map_err(|e| AuthError::JwtValidation(e.to_string()))?;

        let scopes = token_data.claims.scope.scopes();
        if !scopes.iter().any(|s| s == &self.required_scope) {
            return Err(AuthError::MissingScope(self.required_scope.clone()));
        }

        Ok(AuthContext {
            subject: token_data.claims.sub,
            scopes,
        })
    }
}

/// No-op authenticator for development (no auth required)
pub struct NoAuth;

impl Authenticator for NoAuth {
    fn authenticate(&self, _headers: &HeaderMap) -> Result<AuthContext, AuthError> {
        Ok(AuthContext {
            subject: None,
            scopes: Vec::new(),
        })
    }
}

/// Authentication middleware
pub async fn auth_middleware(
    auth: axum::Extension<Arc<dyn Authenticator>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let ctx = auth.authenticate(req.headers())?;
    req.extensions_mut().insert(ctx);
    Ok(next.run(req).await)
}

/// Authentication against the hosted identity provider.
///
/// Tokens are never verified locally: every authenticated request resolves its
/// bearer token through the provider, then loads the caller's `profiles` row for
/// the role checks.
use std::time::Duration;

use axum::extract::{FromRequestParts, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use marketplace_common::model::{Role, UserProfile};
use marketplace_common::supabase::SupabaseClient;

use crate::error::AppError;
use crate::server::AppState;

pub const PROFILES_TABLE: &str = "profiles";

// New auth users can take a moment to become visible to the profiles FK.
const PROFILE_INSERT_ATTEMPTS: u32 = 5;
const PROFILE_INSERT_DELAY: Duration = Duration::from_secs(2);

/// The raw bearer token of a request. Presence only, not validated.
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

impl<S: Send + Sync> FromRequestParts<S> for BearerToken {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_bearer)
            .map(|t| BearerToken(t.to_string()))
            .ok_or_else(|| AppError::Unauthorized("Not authenticated: Bearer token missing.".to_string()))
    }
}

fn parse_bearer(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// The authenticated caller's profile.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub UserProfile);

impl CurrentUser {
    pub fn require(&self, role: Role, message: &str) -> Result<(), AppError> {
        if self.0.role == role {
            Ok(())
        } else {
            Err(AppError::Forbidden(message.to_string()))
        }
    }
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let BearerToken(token) = BearerToken::from_request_parts(parts, state).await?;
        let user = match state.supabase.get_user(&token).await {
            Ok(user) => user,
            // The provider answered: the token itself is bad.
            Err(e) if e.status().is_some() => {
                warn!(error = %e, "token rejected by auth provider");
                return Err(AppError::Unauthorized("Invalid or expired token.".to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let profile = fetch_profile(&state.supabase, &user.id)
            .await?
            .ok_or_else(|| {
                warn!(user_id = %user.id, "user profile not found");
                AppError::Unauthorized("Invalid or expired token.".to_string())
            })?;
        Ok(CurrentUser(profile))
    }
}

async fn fetch_profile(supabase: &SupabaseClient, user_id: &str) -> Result<Option<UserProfile>, AppError> {
    let rows = supabase.select_eq(PROFILES_TABLE, "id", user_id).await?;
    let Some(row) = rows.into_iter().next() else {
        return Ok(None);
    };
    serde_json::from_value(row)
        .map(Some)
        .map_err(|e| AppError::Internal(format!("malformed profile row: {e}")))
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Role,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
struct PublicUser<'a> {
    id: &'a str,
    email: &'a str,
    name: &'a str,
    role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    access_token: Option<&'a str>,
}

impl<'a> PublicUser<'a> {
    fn from_profile(profile: &'a UserProfile, access_token: Option<&'a str>) -> Self {
        Self {
            id: &profile.id,
            email: &profile.email,
            name: &profile.name,
            role: profile.role,
            access_token,
        }
    }
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<Value>, AppError> {
    let name = req.name.trim();
    let email = req.email.trim();
    if name.is_empty() || email.is_empty() || req.password.is_empty() {
        return Err(AppError::BadRequest(
            "name, email and password must not be empty".to_string(),
        ));
    }

    let user = state
        .supabase
        .sign_up(email, &req.password)
        .await
        .map_err(|e| AppError::BadRequest(format!("Failed to create user: {e}")))?;

    let profile = UserProfile {
        id: user.id,
        name: name.to_string(),
        email: email.to_string(),
        role: req.role,
        created_at: Some(Utc::now().to_rfc3339()),
    };
    insert_profile(&state.supabase, &profile).await?;
    info!(user_id = %profile.id, role = profile.role.as_str(), "user registered");

    Ok(Json(json!({
        "message": "User created successfully",
        "user": PublicUser::from_profile(&profile, None),
    })))
}

async fn insert_profile(supabase: &SupabaseClient, profile: &UserProfile) -> Result<(), AppError> {
    for attempt in 1..=PROFILE_INSERT_ATTEMPTS {
        match supabase.insert(PROFILES_TABLE, profile).await {
            Ok(_) => return Ok(()),
            Err(e) => {
                warn!(
                    attempt,
                    max_attempts = PROFILE_INSERT_ATTEMPTS,
                    error = %e,
                    "profile insert failed, auth user not synced yet"
                );
                if attempt < PROFILE_INSERT_ATTEMPTS {
                    tokio::time::sleep(PROFILE_INSERT_DELAY).await;
                }
            }
        }
    }
    Err(AppError::BadRequest(
        "Failed to insert user profile after multiple retries".to_string(),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<Value>, AppError> {
    let session = state
        .supabase
        .sign_in_with_password(req.email.trim(), &req.password)
        .await
        .map_err(|e| {
            warn!(error = %e, "login failed");
            AppError::Unauthorized("Invalid email or password".to_string())
        })?;

    let profile = fetch_profile(&state.supabase, &session.user.id)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Invalid credentials".to_string()))?;
    info!(user_id = %profile.id, "user logged in");

    Ok(Json(json!({
        "message": "Login successful",
        "user": PublicUser::from_profile(&profile, Some(session.access_token.as_str())),
    })))
}

/// Sessions live with the identity provider; the client discards its token.
pub async fn logout(_token: BearerToken) -> Json<Value> {
    Json(json!({ "message": "Logged out successfully" }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bearer() {
        assert_eq!(parse_bearer("Bearer abc"), Some("abc"));
        assert_eq!(parse_bearer("bearer  abc "), Some("abc"));
        assert_eq!(parse_bearer("Basic abc"), None);
        assert_eq!(parse_bearer("Bearer "), None);
        assert_eq!(parse_bearer("abc"), None);
    }

    #[test]
    fn test_role_gate() {
        let user = CurrentUser(UserProfile {
            id: "u1".to_string(),
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            role: Role::Teacher,
            created_at: None,
        });
        assert!(user.require(Role::Teacher, "teachers only").is_ok());
        let err = user.require(Role::Examiner, "Only examiners can download files").unwrap_err();
        assert!(matches!(err, AppError::Forbidden(ref m) if m == "Only examiners can download files"));
    }

    #[test]
    fn test_public_user_hides_missing_token() {
        let profile = UserProfile {
            id: "u1".to_string(),
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            role: Role::Student,
            created_at: None,
        };
        let v = serde_json::to_value(PublicUser::from_profile(&profile, None)).unwrap();
        assert_eq!(v, json!({"id": "u1", "email": "ada@example.com", "name": "Ada", "role": "student"}));
    }
}

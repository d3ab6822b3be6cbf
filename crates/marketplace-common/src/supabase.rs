/// Thin REST client for the hosted backend (Supabase): auth, PostgREST tables and
/// object storage.
///
/// The client only moves JSON and bytes; it has no opinion on schemas beyond the
/// few auth response fields it reads. Reads use the anon key, writes and storage
/// use the service-role key when one is configured.
use std::time::Duration;

use reqwest::{header, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

#[derive(Clone, Debug)]
pub struct SupabaseConfig {
    pub url: String,
    pub anon_key: String,
    pub service_role_key: Option<String>,
    pub bucket: String,
    pub timeout: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum SupabaseError {
    #[error("request failed: {0}")]
    Request(reqwest::Error),

    #[error("invalid response JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("supabase returned error: status={status} message={message}")]
    Upstream { status: StatusCode, message: String },

    #[error("auth response did not contain a user")]
    MissingUser,
}

// Keep project URLs and storage paths out of logs and responses.
impl From<reqwest::Error> for SupabaseError {
    fn from(e: reqwest::Error) -> Self {
        Self::Request(e.without_url())
    }
}

impl SupabaseError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Upstream { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    pub user: AuthUser,
}

#[derive(Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

/// Which key a request is signed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyKind {
    Anon,
    Privileged,
}

#[derive(Clone)]
pub struct SupabaseClient {
    config: SupabaseConfig,
    http: reqwest::Client,
}

impl SupabaseClient {
    pub fn new(config: SupabaseConfig) -> Result<Self, SupabaseError> {
        let http = reqwest::Client::builder()
            .user_agent("project-marketplace/api")
            .timeout(config.timeout)
            .build()?;
        let config = SupabaseConfig {
            url: config.url.trim_end_matches('/').to_string(),
            ..config
        };
        Ok(Self { config, http })
    }

    // --- Auth ---

    /// Create an auth user. Returns the new user's identity.
    pub async fn sign_up(&self, email: &str, password: &str) -> Result<AuthUser, SupabaseError> {
        let url = format!("{}/auth/v1/signup", self.config.url);
        let req = self
            .sign(self.http.post(url), KeyKind::Anon)
            .json(&Credentials { email, password });
        let body: Value = send_json(req).await?;
        // With email confirmation on, the user is returned bare; otherwise under `user`.
        let user = body.get("user").filter(|u| !u.is_null()).unwrap_or(&body);
        if user.get("id").and_then(Value::as_str).is_none() {
            return Err(SupabaseError::MissingUser);
        }
        Ok(serde_json::from_value(user.clone())?)
    }

    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthSession, SupabaseError> {
        let url = format!("{}/auth/v1/token?grant_type=password", self.config.url);
        let req = self
            .sign(self.http.post(url), KeyKind::Anon)
            .json(&Credentials { email, password });
        send_json(req).await
    }

    /// Resolve an access token to its user. Fails with 401/403 upstream status on
    /// invalid or expired tokens.
    pub async fn get_user(&self, access_token: &str) -> Result<AuthUser, SupabaseError> {
        let url = format!("{}/auth/v1/user", self.config.url);
        let req = self
            .http
            .get(url)
            .header("apikey", &self.config.anon_key)
            .bearer_auth(access_token);
        send_json(req).await
    }

    // --- Tables ---

    pub async fn select_all(&self, table: &str) -> Result<Vec<Value>, SupabaseError> {
        let url = format!("{}/rest/v1/{table}", self.config.url);
        let req = self
            .sign(self.http.get(url), KeyKind::Privileged)
            .query(&[("select", "*")]);
        send_json(req).await
    }

    pub async fn select_eq(
        &self,
        table: &str,
        column: &str,
        value: &str,
    ) -> Result<Vec<Value>, SupabaseError> {
        let url = format!("{}/rest/v1/{table}", self.config.url);
        let filter = format!("eq.{value}");
        let req = self
            .sign(self.http.get(url), KeyKind::Privileged)
            .query(&[("select", "*"), (column, filter.as_str())]);
        send_json(req).await
    }

    /// Insert one row and return the stored representation.
    pub async fn insert<T: Serialize + ?Sized>(
        &self,
        table: &str,
        row: &T,
    ) -> Result<Value, SupabaseError> {
        let url = format!("{}/rest/v1/{table}", self.config.url);
        let req = self
            .sign(self.http.post(url), KeyKind::Privileged)
            .header("Prefer", "return=representation")
            .json(row);
        let rows: Vec<Value> = send_json(req).await?;
        debug!(table, rows = rows.len(), "row inserted");
        Ok(rows.into_iter().next().unwrap_or_else(|| json!({})))
    }

    // --- Storage ---

    pub async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<StoredObject, SupabaseError> {
        let url = self.object_url(path);
        let req = self
            .sign(self.http.post(url), KeyKind::Privileged)
            .header(header::CONTENT_TYPE, content_type)
            .body(bytes);
        let stored: StoredObject = send_json(req).await?;
        debug!(bucket = %self.config.bucket, path, "object uploaded");
        Ok(stored)
    }

    pub async fn download(&self, path: &str) -> Result<Vec<u8>, SupabaseError> {
        let url = self.object_url(path);
        let resp = self
            .sign(self.http.get(url), KeyKind::Privileged)
            .send()
            .await?;
        let resp = check_status(resp).await?;
        Ok(resp.bytes().await?.to_vec())
    }

    fn object_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.config.url,
            self.config.bucket,
            path.trim_start_matches('/')
        )
    }

    fn sign(&self, req: RequestBuilder, kind: KeyKind) -> RequestBuilder {
        let key = match kind {
            KeyKind::Privileged => self
                .config
                .service_role_key
                .as_deref()
                .unwrap_or(self.config.anon_key.as_str()),
            KeyKind::Anon => self.config.anon_key.as_str(),
        };
        req.header("apikey", key).bearer_auth(key)
    }
}

/// Storage upload acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredObject {
    #[serde(rename = "Key", alias = "key", default)]
    pub full_path: Option<String>,
    #[serde(rename = "Id", alias = "id", default)]
    pub id: Option<String>,
}

async fn send_json<T: for<'de> Deserialize<'de>>(req: RequestBuilder) -> Result<T, SupabaseError> {
    let resp = check_status(req.send().await?).await?;
    let bytes = resp.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, SupabaseError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(SupabaseError::Upstream {
        status,
        message: error_message(&body),
    })
}

/// Supabase services disagree on error field names; take the first one present.
fn error_message(body: &str) -> String {
    let Ok(v) = serde_json::from_str::<Value>(body) else {
        return body.chars().take(512).collect();
    };
    ["msg", "message", "error_description", "error"]
        .iter()
        .find_map(|k| v.get(*k).and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SupabaseConfig {
        SupabaseConfig {
            url: "https://abc.supabase.co/".to_string(),
            anon_key: "anon".to_string(),
            service_role_key: None,
            bucket: "project-files".to_string(),
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_transport_error_omits_url() {
        let client = SupabaseClient::new(SupabaseConfig {
            url: "http://127.0.0.1:9".to_string(),
            timeout: Duration::from_secs(2),
            ..config()
        })
        .unwrap();
        let err = client.get_user("user-token").await.unwrap_err();
        assert!(matches!(err, SupabaseError::Request(_)));
        assert!(err.status().is_none());
        assert!(!err.to_string().contains("127.0.0.1:9"), "{err}");
    }

    #[test]
    fn test_object_url() {
        let client = SupabaseClient::new(config()).unwrap();
        assert_eq!(
            client.object_url("/a1b2.pdf"),
            "https://abc.supabase.co/storage/v1/object/project-files/a1b2.pdf"
        );
    }

    #[test]
    fn test_error_message_picks_known_fields() {
        assert_eq!(error_message(r#"{"msg": "Invalid login credentials"}"#), "Invalid login credentials");
        assert_eq!(
            error_message(r#"{"error": "invalid_grant", "error_description": "bad password"}"#),
            "bad password"
        );
        assert_eq!(error_message(r#"{"message": "duplicate key"}"#), "duplicate key");
        assert_eq!(error_message("gateway timeout"), "gateway timeout");
    }

    #[test]
    fn test_stored_object_accepts_key_casing() {
        let o: StoredObject =
            serde_json::from_value(json!({"Key": "project-files/x.pdf", "Id": "1"})).unwrap();
        assert_eq!(o.full_path.as_deref(), Some("project-files/x.pdf"));
        let o: StoredObject = serde_json::from_value(json!({})).unwrap();
        assert!(o.full_path.is_none());
    }

    #[test]
    fn test_session_deserializes() {
        let s: AuthSession = serde_json::from_value(json!({
            "access_token": "tok",
            "token_type": "bearer",
            "user": {"id": "u1", "email": "a@b.c", "aud": "authenticated"}
        }))
        .unwrap();
        assert_eq!(s.access_token, "tok");
        assert_eq!(s.user.id, "u1");
    }
}

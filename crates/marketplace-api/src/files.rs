/// Project file handlers: teachers upload, examiners list and download.
///
/// Files are stored under a random name (keeping the original extension) and
/// described by a `project_data` row whose `file_url` is the storage key.
use std::path::Path;

use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, Path as UrlPath, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use marketplace_common::model::Role;

use crate::auth::CurrentUser;
use crate::error::AppError;
use crate::server::{AppState, PROJECTS_TABLE};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Default)]
struct UploadForm {
    file_name: Option<String>,
    content_type: Option<String>,
    bytes: Option<Vec<u8>>,
    title: Option<String>,
    student_name: Option<String>,
    student_id: Option<String>,
    abstract_text: Option<String>,
}

#[derive(Debug, Serialize)]
struct ProjectRow<'a> {
    student_name: &'a str,
    student_id: &'a str,
    project_title: &'a str,
    #[serde(rename = "abstract")]
    abstract_text: &'a str,
    file_url: &'a str,
    uploaded_by: &'a str,
}

impl UploadForm {
    async fn read(mut multipart: Multipart) -> Result<Self, AppError> {
        let mut form = Self::default();
        while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "file" => {
                    form.file_name = field.file_name().map(str::to_string);
                    form.content_type = field.content_type().map(str::to_string);
                    form.bytes = Some(field.bytes().await.map_err(bad_multipart)?.to_vec());
                }
                "title" => form.title = Some(field.text().await.map_err(bad_multipart)?),
                "student_name" => form.student_name = Some(field.text().await.map_err(bad_multipart)?),
                "student_id" => form.student_id = Some(field.text().await.map_err(bad_multipart)?),
                "abstract" => form.abstract_text = Some(field.text().await.map_err(bad_multipart)?),
                // `description` and unknown fields are accepted but not stored
                _ => {}
            }
        }
        Ok(form)
    }
}

fn bad_multipart(e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return AppError::PayloadTooLarge(format!("upload exceeds the size limit: {e}"));
    }
    AppError::BadRequest(format!("invalid multipart body: {e}"))
}

fn required_field(value: Option<String>, name: &str) -> Result<String, AppError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::BadRequest(format!("missing form field: {name}")))
}

/// `{uuid}{.ext}`, keeping the uploaded file's extension if it has one.
pub fn storage_name(original: Option<&str>) -> String {
    let ext = original
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default();
    format!("{}{ext}", Uuid::new_v4())
}

pub async fn upload(
    State(state): State<AppState>,
    user: CurrentUser,
    multipart: Multipart,
) -> Result<Json<Value>, AppError> {
    user.require(Role::Teacher, "Only teachers can upload files")?;

    let form = UploadForm::read(multipart).await?;
    let bytes = form
        .bytes
        .ok_or_else(|| AppError::BadRequest("missing form field: file".to_string()))?;
    let title = required_field(form.title, "title")?;
    let student_name = required_field(form.student_name, "student_name")?;
    let student_id = required_field(form.student_id, "student_id")?;
    let abstract_text = required_field(form.abstract_text, "abstract")?;

    let key = storage_name(form.file_name.as_deref());
    let content_type = form.content_type.as_deref().unwrap_or(DEFAULT_CONTENT_TYPE);
    let size = bytes.len();
    let stored = state.supabase.upload(&key, bytes, content_type).await?;

    let row = ProjectRow {
        student_name: &student_name,
        student_id: &student_id,
        project_title: &title,
        abstract_text: &abstract_text,
        file_url: &key,
        uploaded_by: &user.0.id,
    };
    let project = state.supabase.insert(PROJECTS_TABLE, &row).await?;
    info!(key = %key, size, uploaded_by = %user.0.id, "project file uploaded");

    Ok(Json(json!({
        "message": "File uploaded successfully",
        "project": project,
        "storage": {
            "path": key,
            "full_path": stored.full_path,
        },
    })))
}

pub async fn submissions(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<Value>, AppError> {
    user.require(Role::Examiner, "Only examiners can view submissions")?;
    let files = state.supabase.select_all(PROJECTS_TABLE).await?;
    Ok(Json(json!({ "files": files })))
}

pub async fn download(
    State(state): State<AppState>,
    user: CurrentUser,
    UrlPath(file_key): UrlPath<String>,
) -> Result<Response, AppError> {
    user.require(Role::Examiner, "Only examiners can download files")?;

    let rows = state
        .supabase
        .select_eq(PROJECTS_TABLE, "file_url", &file_key)
        .await?;
    let file_name = rows
        .first()
        .and_then(|row| row.get("file_url"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| AppError::NotFound("File not found in database".to_string()))?;

    let bytes = state.supabase.download(&file_name).await?;
    info!(key = %file_name, size = bytes.len(), "project file downloaded");

    let disposition = format!("attachment; filename={file_name}");
    Ok((
        [
            (header::CONTENT_TYPE, DEFAULT_CONTENT_TYPE.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::access;
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::models::{EventDocument, NewEventDocument};
use crate::response::ApiResponse;
use crate::schema::event_documents;
use crate::state::AppState;
use crate::storage::generate_storage_key;
use crate::validation::FieldErrors;

#[derive(Serialize)]
pub struct DocumentResponse {
    pub id: Uuid,
    pub event_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub url: String,
    pub uploaded_by: Option<Uuid>,
    pub uploaded_at: NaiveDateTime,
}

impl From<EventDocument> for DocumentResponse {
    fn from(document: EventDocument) -> Self {
        Self {
            url: format!("/api/files/{}", document.storage_key),
            id: document.id,
            event_id: document.event_id,
            title: document.title,
            description: document.description,
            file_name: document.file_name,
            content_type: document.content_type,
            size_bytes: document.size_bytes,
            uploaded_by: document.uploaded_by,
            uploaded_at: document.uploaded_at,
        }
    }
}

pub(crate) fn active_documents(
    conn: &mut PgConnection,
    event_id: Uuid,
) -> QueryResult<Vec<EventDocument>> {
    event_documents::table
        .filter(event_documents::event_id.eq(event_id))
        .filter(event_documents::is_active.eq(true))
        .order(event_documents::uploaded_at.desc())
        .load(conn)
}

pub async fn list_documents(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(event_id): Path<Uuid>,
) -> AppResult<ApiResponse<Vec<DocumentResponse>>> {
    let mut conn = state.db()?;
    access::load_event(&mut conn, &user, event_id)?;
    let documents = active_documents(&mut conn, event_id)?
        .into_iter()
        .map(DocumentResponse::from)
        .collect();
    Ok(ApiResponse::ok(documents))
}

struct UploadedFile {
    bytes: Vec<u8>,
    file_name: String,
    content_type: Option<String>,
}

pub async fn upload_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(event_id): Path<Uuid>,
    mut multipart: Multipart,
) -> AppResult<ApiResponse<DocumentResponse>> {
    {
        let mut conn = state.db()?;
        let (_, access) = access::load_event(&mut conn, &user, event_id)?;
        access.ensure(access.can_manage_documents(), "upload event documents")?;
    }

    let mut title: Option<String> = None;
    let mut description: Option<String> = None;
    let mut file: Option<UploadedFile> = None;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        error!(error = %err, "invalid multipart data");
        AppError::bad_request(format!("invalid multipart data: {err}"))
    })? {
        match field.name() {
            Some("title") => {
                title = Some(field.text().await.map_err(|err| {
                    AppError::bad_request(format!("invalid title: {err}"))
                })?);
            }
            Some("description") => {
                description = Some(field.text().await.map_err(|err| {
                    AppError::bad_request(format!("invalid description: {err}"))
                })?);
            }
            Some("file") => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await.map_err(|err| {
                    error!(error = %err, "failed to read uploaded file");
                    AppError::bad_request(format!("failed to read file bytes: {err}"))
                })?;
                file = Some(UploadedFile {
                    bytes: bytes.to_vec(),
                    file_name,
                    content_type,
                });
            }
            _ => {}
        }
    }

    let mut errors = FieldErrors::new();
    let title = title.map(|t| t.trim().to_string()).unwrap_or_default();
    errors.require("title", &title);
    match &file {
        None => errors.push("file", "file is required"),
        Some(file) if file.bytes.is_empty() => errors.push("file", "file must not be empty"),
        Some(file) if file.file_name.trim().is_empty() => {
            errors.push("file", "file name is required")
        }
        Some(_) => {}
    }
    errors.into_result()?;
    let file = file.ok_or_else(|| AppError::bad_request("file is required"))?;

    let max = state.config.max_upload_bytes;
    if file.bytes.len() > max {
        return Err(AppError::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("file exceeds the {max} byte upload limit"),
        ));
    }

    let content_type = file
        .content_type
        .filter(|ct| !ct.is_empty() && ct != "application/octet-stream")
        .unwrap_or_else(|| {
            mime_guess::from_path(&file.file_name)
                .first_or_octet_stream()
                .to_string()
        });
    let storage_key = generate_storage_key(&file.file_name);
    let size_bytes = file.bytes.len() as i64;

    state.storage.put_object(&storage_key, file.bytes).await?;

    let new_document = NewEventDocument {
        id: Uuid::new_v4(),
        event_id,
        title,
        description: description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty()),
        file_name: file.file_name,
        storage_key: storage_key.clone(),
        content_type,
        size_bytes,
        uploaded_by: Some(user.user_id),
    };
    let inserted = state.db().and_then(|mut conn| {
        diesel::insert_into(event_documents::table)
            .values(&new_document)
            .get_result::<EventDocument>(&mut conn)
            .map_err(AppError::from)
    });
    let document = match inserted {
        Ok(document) => document,
        Err(err) => {
            if let Err(cleanup) = state.storage.delete_object(&storage_key).await {
                warn!(
                    error = %cleanup,
                    storage_key = %storage_key,
                    "failed to remove orphaned upload"
                );
            }
            return Err(err);
        }
    };

    info!(
        event_id = %event_id,
        document_id = %document.id,
        size_bytes,
        "event document uploaded"
    );
    Ok(ApiResponse::created(DocumentResponse::from(document))
        .with_message("Document uploaded successfully"))
}

pub async fn delete_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((event_id, document_id)): Path<(Uuid, Uuid)>,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let mut conn = state.db()?;
    let (_, access) = access::load_event(&mut conn, &user, event_id)?;
    access.ensure(access.can_manage_documents(), "delete event documents")?;

    let updated = diesel::update(
        event_documents::table
            .filter(event_documents::id.eq(document_id))
            .filter(event_documents::event_id.eq(event_id))
            .filter(event_documents::is_active.eq(true)),
    )
    .set(event_documents::is_active.eq(false))
    .execute(&mut conn)?;
    if updated == 0 {
        return Err(AppError::not_found_entity("document"));
    }

    info!(event_id = %event_id, document_id = %document_id, "event document removed");
    Ok(ApiResponse::ok(serde_json::json!({ "id": document_id }))
        .with_message("Document removed"))
}

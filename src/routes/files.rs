use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::Response;
use diesel::dsl::count_star;
use diesel::prelude::*;
use tracing::debug;

use crate::access;
use crate::auth::Viewer;
use crate::error::{AppError, AppResult};
use crate::models::EventDocument;
use crate::schema::{event_attendants, event_documents};
use crate::state::AppState;
use crate::storage::validate_key;

fn inline_content_disposition(file_name: &str) -> Option<String> {
    if file_name.is_empty() {
        return None;
    }

    let sanitized: String = file_name
        .chars()
        .map(|ch| match ch {
            '"' | '\\' | '\r' | '\n' => '_',
            _ => ch,
        })
        .collect();

    let encoded =
        percent_encoding::utf8_percent_encode(&sanitized, percent_encoding::NON_ALPHANUMERIC);
    Some(format!(
        "inline; filename=\"{sanitized}\"; filename*=UTF-8''{encoded}"
    ))
}

/// Streams an uploaded event document to staff with access to the event or
/// to attendants on its roster.
pub async fn serve_file(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(key): Path<String>,
) -> AppResult<Response> {
    validate_key(&key)?;

    let mut conn = state.db()?;
    let document: EventDocument = event_documents::table
        .filter(event_documents::storage_key.eq(&key))
        .filter(event_documents::is_active.eq(true))
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::not_found_entity("file"))?;

    let allowed = match &viewer {
        Viewer::User(user) => access::event_access(&mut conn, user, document.event_id)?.is_some(),
        Viewer::Attendant(session) => {
            let on_roster: i64 = event_attendants::table
                .filter(event_attendants::event_id.eq(document.event_id))
                .filter(event_attendants::attendant_id.eq(session.attendant_id))
                .filter(event_attendants::is_active.eq(true))
                .select(count_star())
                .first(&mut conn)?;
            on_roster > 0
        }
    };
    if !allowed {
        return Err(AppError::forbidden("no access to this file"));
    }
    drop(conn);

    let bytes = state.storage.get_object(&key).await?;
    debug!(storage_key = %key, size = bytes.len(), "serving event document");

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, document.content_type.as_str())
        .header(header::CONTENT_LENGTH, bytes.len())
        .header(header::CACHE_CONTROL, "private, max-age=300");
    if let Some(disposition) = inline_content_disposition(&document.file_name) {
        builder = builder.header(header::CONTENT_DISPOSITION, disposition);
    }

    builder
        .body(Body::from(bytes))
        .map_err(|err| AppError::internal(format!("failed to build response: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_disposition_escapes_quotes_and_encodes_utf8() {
        let value = inline_content_disposition("Plan \"B\" für Halle.pdf").unwrap();
        assert!(value.starts_with("inline; filename=\"Plan _B_ für Halle.pdf\""));
        assert!(value.contains("filename*=UTF-8''Plan%20%5FB%5F%20f%C3%BCr%20Halle%2Epdf"));
        assert!(inline_content_disposition("").is_none());
    }
}

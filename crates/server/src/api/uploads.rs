//! Upload handler and the multipart-to-disk streaming shared with batch uploads.

use axum::{
    extract::{multipart::Field, Multipart, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use tracing::warn;
use transmute_core::{remove_if_exists, ConversionError, ConversionService, ReceivedFile};

use super::conversions::JobResponse;
use super::error::ApiError;
use super::middleware::ClientIp;
use crate::state::AppState;

/// Upload a single file (multipart field `file`) and create its job
pub async fn upload(
    State(state): State<Arc<AppState>>,
    client: ClientIp,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<JobResponse>), ApiError> {
    while let Some(field) = multipart.next_field().await.map_err(ApiError::multipart)? {
        if field.name() != Some("file") {
            continue;
        }
        if field.file_name().map_or(true, str::is_empty) {
            return Err(ApiError::bad_request("Uploaded file has no filename"));
        }

        let received = receive_field(state.service(), field).await?;
        let stored = received.upload?;
        let path = stored.path.clone();

        return match state.service().register_upload(stored, client.originator()) {
            Ok(job) => Ok((StatusCode::CREATED, Json(job.into()))),
            Err(e) => {
                if let Err(io) = remove_if_exists(&path).await {
                    warn!("Failed to remove orphaned upload {}: {}", path.display(), io);
                }
                Err(e.into())
            }
        };
    }

    Err(ApiError::bad_request("Missing multipart field 'file'"))
}

/// Streams one multipart field to disk.
///
/// File-level rejections (unknown format, too large) land in the returned
/// [`ReceivedFile`]; a broken request body is an `Err`.
pub(crate) async fn receive_field(
    service: &ConversionService,
    mut field: Field<'_>,
) -> Result<ReceivedFile, ApiError> {
    let original_filename = field.file_name().unwrap_or_default().to_string();

    let mut writer = match service.begin_upload(&original_filename).await {
        Ok(writer) => writer,
        Err(e) => {
            return Ok(ReceivedFile {
                original_filename,
                upload: Err(e),
            })
        }
    };

    loop {
        match field.chunk().await {
            Ok(Some(chunk)) => {
                if let Err(e) = writer.write_chunk(&chunk).await {
                    writer.abort().await;
                    return Ok(ReceivedFile {
                        original_filename,
                        upload: Err(e.into()),
                    });
                }
            }
            Ok(None) => break,
            Err(e) => {
                writer.abort().await;
                return Err(ApiError::multipart(e));
            }
        }
    }

    let upload = writer.finish().await.map_err(ConversionError::from);
    Ok(ReceivedFile {
        original_filename,
        upload,
    })
}

/// Removes the stored bytes of files that will never be registered.
pub(crate) async fn discard_received(files: &[ReceivedFile]) {
    for file in files {
        if let Ok(stored) = &file.upload {
            if let Err(e) = remove_if_exists(&stored.path).await {
                warn!("Failed to remove discarded upload {}: {}", stored.path.display(), e);
            }
        }
    }
}

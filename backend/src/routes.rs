use actix_files::Files;
use actix_multipart::{Field, Multipart, MultipartError};
use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, ResponseError};
use futures::TryStreamExt;
use log::{error, info};
use shared::{ApiDocs, ApiInfo, ErrorDetail, PredictionResponse, RouteDoc};
use std::path::PathBuf;

use crate::predict::service::{PredictionService, UploadedImage};
use crate::storage::static_store::{StaticStore, StorageError, URL_PREFIX};

const API_TITLE: &str = "Brain Tumor Detection API";
const FILE_FIELD: &str = "file";

#[derive(Debug, Clone, Copy)]
pub struct UploadLimits {
    pub max_upload_bytes: usize,
}

/// Rejections raised while reading the upload, before any processing.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("File must be an image (JPEG, PNG, etc.)")]
    NotAnImage,
    #[error("Missing file field in multipart body")]
    MissingFile,
    #[error("{0}")]
    TooLarge(#[from] StorageError),
    #[error("Malformed multipart body: {0}")]
    Multipart(#[from] MultipartError),
}

impl ResponseError for UploadError {
    fn status_code(&self) -> StatusCode {
        match self {
            UploadError::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorDetail {
            detail: self.to_string(),
        })
    }
}

pub fn configure_routes(cfg: &mut web::ServiceConfig, static_dir: PathBuf) {
    cfg.service(web::resource("/").route(web::get().to(root)))
        .service(web::resource("/docs").route(web::get().to(docs)))
        .service(web::resource("/predict").route(web::post().to(handle_predict)))
        .service(Files::new(URL_PREFIX, static_dir));
}

async fn root() -> HttpResponse {
    HttpResponse::Ok().json(ApiInfo {
        message: API_TITLE.to_string(),
        status: "running".to_string(),
        documentation: "/docs".to_string(),
    })
}

async fn docs() -> HttpResponse {
    let route = |method: &str, path: &str, summary: &str| RouteDoc {
        method: method.to_string(),
        path: path.to_string(),
        summary: summary.to_string(),
    };
    HttpResponse::Ok().json(ApiDocs {
        title: API_TITLE.to_string(),
        description: "API for detecting brain tumors in MRI scans".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        routes: vec![
            route("GET", "/", "Service status"),
            route("GET", "/docs", "This document"),
            route(
                "POST",
                "/predict",
                "Classify an uploaded MRI image (multipart field `file`) and render a Grad-CAM overlay",
            ),
            route("GET", "/static/{path}", "Stored uploads and Grad-CAM overlays"),
        ],
    })
}

async fn handle_predict(
    service: web::Data<PredictionService>,
    limits: web::Data<UploadLimits>,
    mut payload: Multipart,
) -> Result<HttpResponse, UploadError> {
    let upload = read_upload(&mut payload, limits.max_upload_bytes).await?;
    info!(
        "Received upload {:?} ({} bytes)",
        upload.filename.as_deref().unwrap_or("<unnamed>"),
        upload.bytes.len()
    );

    let service = service.clone();
    let outcome = web::block(move || service.predict(&upload)).await;
    let response = match outcome {
        Ok(Ok(response)) => HttpResponse::Ok().json(response),
        Ok(Err(e)) => {
            error!("Prediction failed: {}", e);
            HttpResponse::InternalServerError().json(PredictionResponse::failure(e.to_string()))
        }
        Err(e) => {
            error!("Prediction task failed: {}", e);
            HttpResponse::InternalServerError().json(PredictionResponse::failure(e.to_string()))
        }
    };
    Ok(response)
}

/// Pulls the image part out of the multipart stream: the `file` field, or,
/// when the body has none, the first field that carries a filename.
async fn read_upload(
    payload: &mut Multipart,
    max_upload_bytes: usize,
) -> Result<UploadedImage, UploadError> {
    let mut fallback: Option<(Option<String>, Option<String>, Vec<u8>)> = None;

    while let Some(mut field) = payload.try_next().await? {
        let filename = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .map(str::to_owned);
        let content_type = field
            .content_type()
            .map(|mime| mime.essence_str().to_ascii_lowercase());

        if field.name() == Some(FILE_FIELD) {
            let content_type = image_content_type(content_type)?;
            let bytes = read_field(&mut field, max_upload_bytes).await?;
            return Ok(UploadedImage {
                bytes,
                content_type,
                filename,
            });
        }

        if filename.is_some() && fallback.is_none() {
            let bytes = read_field(&mut field, max_upload_bytes).await?;
            fallback = Some((filename, content_type, bytes));
        }
    }

    let (filename, content_type, bytes) = fallback.ok_or(UploadError::MissingFile)?;
    Ok(UploadedImage {
        bytes,
        content_type: image_content_type(content_type)?,
        filename,
    })
}

fn image_content_type(content_type: Option<String>) -> Result<String, UploadError> {
    content_type
        .filter(|ct| ct.starts_with("image/"))
        .ok_or(UploadError::NotAnImage)
}

async fn read_field(field: &mut Field, max_upload_bytes: usize) -> Result<Vec<u8>, UploadError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field.try_next().await? {
        StaticStore::validate_image_size(bytes.len() + chunk.len(), max_upload_bytes)?;
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

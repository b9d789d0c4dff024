// src/handlers.rs
use crate::services::exporter::single_download;
use crate::services::{ArchiveExporter, StartedBatch};
use crate::{AppState, errors::BatchError, models::*, services::Download};
use actix_web::http::header::{self, ContentDisposition};
use actix_web::{HttpResponse, web};
use bytes::Bytes;
use futures_util::stream;
use log::{error, info};
use std::sync::Arc;

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/options", web::get().to(list_options))
            .route("/generate", web::post().to(generate))
            .route("/results", web::get().to(get_results))
            .route("/events", web::get().to(stream_events))
            .route(
                "/results/{entry}/images/{image}",
                web::get().to(download_image),
            )
            .route("/export", web::post().to(export_archive)),
    );
}

fn batch_view(state: &QueueState, exporter: &ArchiveExporter) -> BatchView {
    let mut view = BatchView::from(state);
    view.exporting = exporter.is_exporting();
    view
}

/// Answers with the blob as a named attachment, which saves it client-side.
fn attachment(download: Download) -> HttpResponse {
    HttpResponse::Ok()
        .content_type(download.content_type)
        .insert_header(ContentDisposition::attachment(download.filename))
        .body(download.data)
}

pub async fn list_options() -> HttpResponse {
    let styles: Vec<_> = StylePreset::ALL
        .iter()
        .map(|style| serde_json::json!({ "id": style, "text": style.text() }))
        .collect();

    HttpResponse::Ok().json(serde_json::json!({
        "aspect_ratios": AspectRatio::ALL,
        "models": ImageModel::ALL,
        "styles": styles,
        "count": { "min": MIN_IMAGE_COUNT, "max": MAX_IMAGE_COUNT }
    }))
}

pub async fn generate(body: web::Json<GenerateRequest>, data: web::Data<AppState>) -> HttpResponse {
    let options = body.options();

    match data.orchestrator.start(&body.prompts, options) {
        Some(StartedBatch {
            batch_id,
            total,
            handle,
        }) => {
            actix_web::rt::spawn(async move {
                if let Err(e) = handle.await {
                    error!("Batch {} task ended abnormally: {}", batch_id, e);
                }
            });
            HttpResponse::Accepted().json(serde_json::json!({
                "started": true,
                "batch_id": batch_id,
                "total": total
            }))
        }
        None => HttpResponse::Ok().json(serde_json::json!({
            "started": false,
            "running": data.orchestrator.is_running()
        })),
    }
}

pub async fn get_results(data: web::Data<AppState>) -> HttpResponse {
    let state = data.orchestrator.snapshot();
    HttpResponse::Ok().json(batch_view(&state, &data.exporter))
}

/// Server-sent events: the current state first, then one frame per change.
pub async fn stream_events(data: web::Data<AppState>) -> HttpResponse {
    let rx = data.orchestrator.subscribe();
    let exporter = Arc::clone(&data.exporter);

    let frames = stream::unfold((rx, exporter, true), |(mut rx, exporter, first)| async move {
        if !first && rx.changed().await.is_err() {
            return None;
        }
        let view = batch_view(&rx.borrow_and_update(), &exporter);
        let frame = serde_json::to_string(&view)
            .map(|json| Bytes::from(format!("data: {}\n\n", json)))
            .map_err(|e| BatchError::Serialization(e.to_string()));
        Some((frame, (rx, exporter, false)))
    });

    HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, "text/event-stream"))
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .streaming(frames)
}

pub async fn download_image(
    path: web::Path<(usize, usize)>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, BatchError> {
    let (entry_index, image_index) = path.into_inner();
    let state = data.orchestrator.snapshot();

    let entry = state
        .entries
        .get(entry_index)
        .ok_or_else(|| BatchError::NotFound(format!("No result entry {}", entry_index)))?;
    let image = entry
        .images
        .as_ref()
        .and_then(|images| images.get(image_index))
        .ok_or_else(|| {
            BatchError::NotFound(format!("No image {} for entry {}", image_index, entry_index))
        })?;

    Ok(
        match single_download(&data.image_processor, image, &entry.prompt, image_index) {
            Some(download) => attachment(download),
            None => HttpResponse::NoContent().finish(),
        },
    )
}

pub async fn export_archive(data: web::Data<AppState>) -> HttpResponse {
    let entries = data.orchestrator.snapshot().entries;

    match data.exporter.export(&entries).await {
        Some(download) => {
            info!("Serving {}", download.filename);
            attachment(download)
        }
        None => HttpResponse::NoContent().finish(),
    }
}

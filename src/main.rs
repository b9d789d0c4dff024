// src/main.rs
use actix_web::{App, HttpResponse, HttpServer, middleware, web};
use log::info;
use std::sync::Arc;

mod config;
mod errors;
mod handlers;
mod models;
mod services;

use crate::config::Settings;
use crate::services::exporter::Packager;
use crate::services::{
    ArchiveExporter, GeminiClient, GenerationClient, ImageProcessor, QueueOrchestrator,
    ResultStore, ZipPackager,
};

#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<QueueOrchestrator>,
    exporter: Arc<ArchiveExporter>,
    image_processor: Arc<ImageProcessor>,
}

impl AppState {
    pub fn new(client: Arc<dyn GenerationClient>, packager: Arc<dyn Packager>) -> Self {
        Self {
            orchestrator: Arc::new(QueueOrchestrator::new(ResultStore::new(), client)),
            exporter: Arc::new(ArchiveExporter::new(packager)),
            image_processor: Arc::new(ImageProcessor::new()),
        }
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    info!("Starting imagen-batch service...");

    let settings = Settings::from_env().map_err(|e| std::io::Error::other(e.to_string()))?;

    // Initialize services
    let client = Arc::new(GeminiClient::new(
        settings.api_key.clone(),
        settings.api_base.clone(),
    ));
    let app_state = AppState::new(client, Arc::new(ZipPackager));

    info!("Starting HTTP server on {}", settings.bind_addr);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(middleware::Logger::default())
            .configure(handlers::routes)
            .route("/health", web::get().to(health_check))
    })
    .bind(settings.bind_addr.as_str())?
    .run()
    .await
}

async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "imagen-batch",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

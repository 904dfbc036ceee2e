mod config;
mod gradcam;
mod inference;
mod predict;
mod routes;
mod storage;

use actix_cors::Cors;
use actix_web::middleware::Logger;
use actix_web::{web, App, HttpServer};
use config::ServiceConfig;
use predict::service::PredictionService;
use routes::{configure_routes, UploadLimits};
use std::env;
use storage::retention;
use storage::static_store::StaticStore;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    if let Ok(current_dir) = env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    } else {
        log::error!("Failed to get the current working directory.");
    }

    let (config, config_path) = ServiceConfig::load().map_err(|e| {
        log::error!("Invalid configuration: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?;
    match &config_path {
        Some(path) => log::info!("Loaded configuration from {}", path.display()),
        None => log::info!("No configuration file found, using defaults"),
    }

    let store = StaticStore::new(&config.storage.static_dir);
    store.ensure_layout().map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("Failed to prepare static directory: {}", e),
        )
    })?;

    let (classifier, saliency) = inference::load_backend(&config.model).map_err(|e| {
        log::error!("Failed to load model at startup: {}", e);
        std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("Model loading failed: {}", e),
        )
    })?;
    log::info!("Model loaded from {}", config.model.path.display());

    let service = web::Data::new(PredictionService::new(
        classifier,
        saliency,
        store.clone(),
        config.gradcam.clone(),
    ));
    let limits = web::Data::new(UploadLimits {
        max_upload_bytes: config.server.max_upload_bytes,
    });
    let static_dir = service.store().root().to_path_buf();
    log::info!("Serving static files from {}", static_dir.display());

    retention::spawn_sweeper(store, &config.retention);

    let bind_address = config.bind_address();
    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allow_any_method()
                    .allow_any_header()
                    .max_age(3600),
            )
            .app_data(service.clone())
            .app_data(limits.clone())
            .configure(|cfg| configure_routes(cfg, static_dir.clone()))
    })
    .bind(&bind_address)?
    .run()
    .await
}

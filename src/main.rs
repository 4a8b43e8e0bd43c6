// Web server entry point
use actix_web::{middleware::Logger, App, HttpServer};
use ai_detection_server::api::{self, ApiConfig};
use ai_detection_server::{AppState, Settings};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let settings = Settings::from_env();

    // Models load in the background; requests are answered with 503 until ready.
    let state = AppState::new();
    state.spawn_loaders(&settings);

    let api_config = ApiConfig {
        max_upload_bytes: settings.max_upload_bytes,
    };
    let (host, port) = settings.bind_address();
    log::info!("listening on {host}:{port}");

    let mut server = HttpServer::new(move || {
        App::new()
            .wrap(api::cors())
            .wrap(Logger::default())
            .configure(api::configure(state.clone(), api_config))
    });
    if let Some(workers) = settings.workers {
        server = server.workers(workers);
    }
    server.bind((host, port))?.run().await
}

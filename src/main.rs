/*!
Here we go!
*/
use std::sync::Arc;

use axum::{
    Extension,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    Router,
    routing::{get_service, post},
};
use simplelog::{ColorChoice, TerminalMode, TermLogger};
use tokio::sync::RwLock;
use tower_http::services::fs::{ServeDir, ServeFile};

use ojt::{config, inter};

async fn catchall_error_handler(e: std::io::Error) -> impl IntoResponse {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("Unhandled internal error: {}", &e)
    )
}

#[tokio::main]
async fn main() {
    let log_cfg = simplelog::ConfigBuilder::new()
        .add_filter_allow_str("ojt")
        .build();
    if let Err(e) = TermLogger::init(
        ojt::log_level_from_env(),
        log_cfg,
        TerminalMode::Stdout,
        ColorChoice::Auto
    ) {
        eprintln!("Unable to start logging: {}", &e);
        std::process::exit(1);
    }
    log::info!("Logging started.");

    let config_path = std::env::args().nth(1)
        .unwrap_or_else(|| "config.toml".to_owned());

    let (cfg, glob) = match config::load_configuration(&config_path).await {
        Ok(x) => x,
        Err(e) => {
            log::error!("Error loading configuration from {:?}: {}", &config_path, &e);
            std::process::exit(1);
        },
    };

    if let Err(e) = inter::init(&cfg.templates_dir) {
        log::error!("Error initializing templates: {}", &e);
        std::process::exit(1);
    }

    let addr = glob.addr;
    let glob = Arc::new(RwLock::new(glob));

    let serve_root = get_service(ServeFile::new(cfg.static_dir.join("index.html")))
        .handle_error(catchall_error_handler);
    let serve_static = get_service(ServeDir::new(&cfg.static_dir))
        .handle_error(catchall_error_handler);

    let app = Router::new()
        .route("/admin", post(inter::admin::api))
        .route("/teacher", post(inter::teacher::api))
        .route("/student", post(inter::student::api))
        .route_layer(middleware::from_fn(inter::key_authenticate))
        .route_layer(middleware::from_fn(inter::request_identity))
        .route("/login", post(inter::login))
        .route("/", serve_root)
        .nest("/static", serve_static)
        .layer(Extension(glob));

    log::info!("Listening on {}", &addr);

    if let Err(e) = axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await
    {
        log::error!("Server error: {}", &e);
        std::process::exit(1);
    }
}

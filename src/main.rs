use actix_web::middleware::NormalizePath;
use actix_web::web::Data;
use actix_web::{App, HttpServer, Responder, get};
use dotenvy::dotenv;
use std::sync::Arc;
use std::time::Duration;

use smart_attendance::clock::{SchoolCalendar, SystemClock};
use smart_attendance::config::Config;
use smart_attendance::db::init_db;
use smart_attendance::docs::ApiDoc;
use smart_attendance::routes::{self, Limiters};
use smart_attendance::service::notifier::{SettingsGateway, SmsNotifier};
use smart_attendance::state::AppState;
use smart_attendance::store::directory_cache::CachedDirectory;
use smart_attendance::store::mysql::MySqlStore;

use tracing::{info, warn};
use tracing_appender::rolling;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[get("/")]
async fn index() -> impl Responder {
    "Smart Attendance"
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let config = Config::from_env()?;

    // Rolling daily log
    let file_appender = rolling::daily("logs", "app.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .pretty()
        .init();

    info!(offset = %config.school_utc_offset, "Server starting...");

    let pool = init_db(&config.database_url).await?;
    let store = MySqlStore::new(pool);
    let clock = Arc::new(SystemClock);
    let calendar = SchoolCalendar::new(config.school_utc_offset);

    let directory = Arc::new(CachedDirectory::new(
        Arc::new(store.clone()),
        Duration::from_secs(config.directory_cache_ttl_secs),
    ));
    let warm_directory = directory.clone();
    actix_web::rt::spawn(async move {
        if let Err(e) = warm_directory.warmup(250).await {
            warn!(error = %e, "Failed to warm up student directory");
        }
    });

    let sink = Arc::new(SmsNotifier::new(
        Arc::new(SettingsGateway::new(store.clone())),
        Arc::new(store.clone()),
        clock.clone(),
        Duration::from_millis(config.notify_timeout_ms),
    ));

    let state = Data::new(AppState::new(
        Arc::new(store.clone()),
        directory,
        Arc::new(store),
        sink,
        clock,
        calendar,
    ));
    let limiters = Limiters::from_config(&config)?;
    let server_addr = config.server_addr.clone();

    HttpServer::new(move || {
        App::new()
            .wrap(actix_web::middleware::Logger::default())
            .wrap(NormalizePath::trim())
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}") // wildcard matches the JS/CSS assets
                    .url("/api-doc/openapi.json", ApiDoc::openapi()),
            )
            .app_data(state.clone())
            .app_data(Data::new(config.clone()))
            .service(index)
            .configure(|cfg| routes::configure(cfg, &config.api_prefix, &limiters))
    })
    .bind(server_addr)?
    .run()
    .await?;

    Ok(())
}

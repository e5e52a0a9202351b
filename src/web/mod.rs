pub mod api;
pub mod export;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use actix_cors::Cors;
use actix_files::{Files, NamedFile};
use actix_web::dev::{ServiceRequest, ServiceResponse, fn_service};
use actix_web::web::{self, Data, JsonConfig, ServiceConfig};
use actix_web::{App, HttpServer, middleware};
use tokio::task::{self, JoinHandle};
use tracing::{info, warn};

use crate::config::{MAX_BODY_BYTES, ServeArgs};
use crate::error::AppError;
use crate::model::{Application, IpAddress, NatRule, Record, Subnet, WifiNetwork};
use crate::state::AppState;

/// JSON extractor settings shared by every route: large bodies for whole
/// dataset saves, and malformed bodies reported as `InvalidInput`.
pub fn json_config() -> JsonConfig {
    JsonConfig::default()
        .limit(MAX_BODY_BYTES)
        .error_handler(|err, _req| AppError::InvalidInput(err.to_string()).into())
}

/// List/create at `/api/{path}`, update/delete at `/api/{path}/{id}`.
fn record_routes<R: Record>(cfg: &mut ServiceConfig, path: &str) {
    cfg.service(
        web::resource(format!("/api/{}", path))
            .route(web::get().to(api::list_records::<R>))
            .route(web::post().to(api::create_record::<R>)),
    )
    .service(
        web::resource(format!("/api/{}/{{id}}", path))
            .route(web::put().to(api::update_record::<R>))
            .route(web::delete().to(api::delete_record::<R>)),
    );
}

pub fn configure(cfg: &mut ServiceConfig) {
    cfg
        // Dataset
        .service(api::get_data)
        .service(api::replace_data)
        .service(api::get_vlans)
        .service(api::get_dashboard)
        // Scanning and monitoring
        .service(api::scan_network)
        .service(api::import_hosts)
        .service(api::check_devices)
        .service(api::monitor_status)
        .service(api::monitor_refresh)
        .service(api::toggle_device)
        // Notifications
        .service(api::get_notification_settings)
        .service(api::save_notification_settings)
        .service(api::send_smtp)
        .service(api::test_notification)
        .service(api::list_notifications)
        .service(api::mark_notifications_read)
        .service(api::clear_notifications)
        // Views
        .service(api::get_topology)
        .service(api::export_workbook)
        // Auth
        .service(api::login)
        .service(api::logout)
        .service(api::session)
        .service(api::change_credentials);

    record_routes::<Subnet>(cfg, "subnets");
    record_routes::<IpAddress>(cfg, "ip-addresses");
    record_routes::<NatRule>(cfg, "nat-rules");
    record_routes::<WifiNetwork>(cfg, "wifi-networks");
    record_routes::<Application>(cfg, "applications");
}

/// Serve the built UI from `dir`, answering unknown paths with `index.html`
/// so client-side routes survive a reload.
fn spa(dir: &Path) -> Files {
    let index: PathBuf = dir.join("index.html");
    Files::new("/", dir)
        .index_file("index.html")
        .default_handler(fn_service(move |req: ServiceRequest| {
            let index = index.clone();
            async move {
                let (req, _) = req.into_parts();
                let file = NamedFile::open_async(index).await?;
                let res = file.into_response(&req);
                Ok(ServiceResponse::new(req, res))
            }
        }))
}

/// Run the HTTP server on its own actix system off the tokio workers.
pub fn start(state: Arc<AppState>, serve: &ServeArgs) -> JoinHandle<std::io::Result<()>> {
    let bind = (serve.bind.clone(), serve.port);
    let static_dir = serve.static_dir.clone();
    let serve_ui = static_dir.join("index.html").is_file();
    if !serve_ui {
        warn!(dir = %static_dir.display(), "No index.html in static dir; serving the API only");
    }

    task::spawn_blocking(move || {
        info!(bind = %bind.0, port = bind.1, "Starting web server");
        let sys = actix_rt::System::new();
        let data = Data::from(state);
        sys.block_on(async move {
            HttpServer::new(move || {
                let app = App::new()
                    .app_data(data.clone())
                    .app_data(json_config())
                    .wrap(Cors::permissive())
                    .wrap(middleware::Logger::default())
                    .configure(configure);
                if serve_ui {
                    app.service(spa(&static_dir))
                } else {
                    app
                }
            })
            .bind(bind)?
            .run()
            .await
        })
    })
}

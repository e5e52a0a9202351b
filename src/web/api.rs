use std::net::IpAddr;

use actix_web::web::{Data, Json, Path};
use actix_web::{HttpRequest, HttpResponse, delete, get, post};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::auth;
use crate::error::AppError;
use crate::model::{Dataset, IpAddress, Record, Subnet, derive_vlans};
use crate::monitor::poller;
use crate::notify::smtp::{self, MailMessage};
use crate::notify::{self, Channel, NotificationSettings, SmtpConfig};
use crate::scanner::{self, DiscoveredHost};
use crate::state::AppState;
use crate::topology::build_topology;

use super::export;

// ============================================================================
// Dataset
// ============================================================================

#[get("/api/data")]
pub async fn get_data(state: Data<AppState>) -> Result<HttpResponse, AppError> {
    let data = state.load().await?;
    Ok(HttpResponse::Ok().json(data.view()))
}

/// Replace the stored dataset wholesale. A `vlans` key in the body is
/// ignored; VLANs are always derived from the subnets.
#[post("/api/data")]
pub async fn replace_data(
    state: Data<AppState>,
    body: Json<Dataset>,
) -> Result<HttpResponse, AppError> {
    let data = body.into_inner();
    info!(
        subnets = data.subnets.len(),
        ip_addresses = data.ip_addresses.len(),
        "Replacing dataset"
    );
    state.replace(data).await?;
    Ok(HttpResponse::Ok().json(json!({ "success": true })))
}

#[get("/api/vlans")]
pub async fn get_vlans(state: Data<AppState>) -> Result<HttpResponse, AppError> {
    let data = state.load().await?;
    Ok(HttpResponse::Ok().json(derive_vlans(&data.subnets)))
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub subnets: usize,
    pub vlans: usize,
    pub ip_addresses: usize,
    pub nat_rules: usize,
    pub wifi_networks: usize,
    pub applications: usize,
    pub used_ips: u64,
    pub total_ips: u64,
    /// Share of addressable hosts in use, one decimal.
    pub utilization_percent: f64,
    pub online: usize,
    pub offline: usize,
}

fn dashboard(data: &Dataset) -> Dashboard {
    let used_ips: u64 = data.subnets.iter().map(|s| s.used_ips).sum();
    let total_ips: u64 = data
        .subnets
        .iter()
        .fold(0u64, |acc, s| acc.saturating_add(s.total_ips));
    let utilization_percent = if total_ips == 0 {
        0.0
    } else {
        (used_ips as f64 * 1000.0 / total_ips as f64).round() / 10.0
    };

    Dashboard {
        subnets: data.subnets.len(),
        vlans: derive_vlans(&data.subnets).len(),
        ip_addresses: data.ip_addresses.len(),
        nat_rules: data.nat_rules.len(),
        wifi_networks: data.wifi_networks.len(),
        applications: data.applications.len(),
        used_ips,
        total_ips,
        utilization_percent,
        online: data
            .ip_addresses
            .iter()
            .filter(|ip| ip.is_online == Some(true))
            .count(),
        offline: data
            .ip_addresses
            .iter()
            .filter(|ip| ip.is_online == Some(false))
            .count(),
    }
}

#[get("/api/dashboard")]
pub async fn get_dashboard(state: Data<AppState>) -> Result<HttpResponse, AppError> {
    let data = state.load().await?;
    Ok(HttpResponse::Ok().json(dashboard(&data)))
}

// ============================================================================
// Record collections (routes registered per type in `web::record_routes`)
// ============================================================================

pub async fn list_records<R: Record>(state: Data<AppState>) -> Result<HttpResponse, AppError> {
    let data = state.load().await?;
    Ok(HttpResponse::Ok().json(R::collection(&data)))
}

pub async fn create_record<R: Record>(
    state: Data<AppState>,
    body: Json<R>,
) -> Result<HttpResponse, AppError> {
    let record = body.into_inner();
    let created = state.modify(move |data| data.insert(record)).await?;
    info!(kind = R::KIND, id = created.id(), "Record created");
    Ok(HttpResponse::Created().json(created))
}

pub async fn update_record<R: Record>(
    state: Data<AppState>,
    path: Path<String>,
    body: Json<R>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let record = body.into_inner();
    let updated = state.modify(move |data| data.update(&id, record)).await?;
    Ok(HttpResponse::Ok().json(updated))
}

pub async fn delete_record<R: Record>(
    state: Data<AppState>,
    path: Path<String>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let removed: R = {
        let id = id.clone();
        state.modify(move |data| data.remove::<R>(&id)).await?
    };
    info!(kind = R::KIND, id = removed.id(), "Record deleted");
    Ok(HttpResponse::Ok().json(json!({ "success": true, "id": id })))
}

// ============================================================================
// Scanning
// ============================================================================

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    cidr: String,
    #[serde(default = "default_true")]
    resolve_names: bool,
}

/// Sweep a subnet with fping.
#[post("/api/scan")]
pub async fn scan_network(
    state: Data<AppState>,
    body: Json<ScanRequest>,
) -> Result<HttpResponse, AppError> {
    let cidr = body.cidr.trim();
    info!(cidr, "Scanning network");
    let hosts = scanner::scan_hosts(&state.fping, cidr, body.resolve_names).await?;
    let alive: Vec<&str> = hosts.iter().map(|h| h.ip.as_str()).collect();
    Ok(HttpResponse::Ok().json(json!({ "aliveHosts": alive, "hosts": hosts })))
}

#[derive(Deserialize)]
pub struct ImportRequest {
    hosts: Vec<DiscoveredHost>,
}

#[derive(Debug, Default, Serialize)]
pub struct ImportSummary {
    imported: Vec<IpAddress>,
    /// Addresses the subnet already held.
    skipped: Vec<String>,
}

fn import_hosts_into(
    data: &mut Dataset,
    subnet_id: &str,
    hosts: Vec<DiscoveredHost>,
) -> Result<ImportSummary, AppError> {
    if data.find::<Subnet>(subnet_id).is_none() {
        return Err(AppError::NotFound(format!("subnet '{}' not found", subnet_id)));
    }

    let mut summary = ImportSummary::default();
    for host in hosts {
        let ip = host.ip.trim().to_string();
        let known = data
            .ip_addresses
            .iter()
            .any(|r| r.subnet_id == subnet_id && r.address.trim() == ip);
        if known {
            summary.skipped.push(ip);
            continue;
        }
        let hostname = if host.hostname.trim().is_empty() {
            ip.clone()
        } else {
            host.hostname
        };
        let record = data.insert(IpAddress {
            address: ip,
            subnet_id: subnet_id.to_string(),
            hostname,
            mac: host.mac,
            is_online: Some(host.is_online),
            ..Default::default()
        })?;
        summary.imported.push(record);
    }
    Ok(summary)
}

/// Record scanned hosts in a subnet. Addresses already present are skipped;
/// any invalid host rejects the whole batch.
#[post("/api/subnets/{id}/import")]
pub async fn import_hosts(
    state: Data<AppState>,
    path: Path<String>,
    body: Json<ImportRequest>,
) -> Result<HttpResponse, AppError> {
    let subnet_id = path.into_inner();
    let hosts = body.into_inner().hosts;
    let summary = {
        let subnet_id = subnet_id.clone();
        state
            .modify(move |data| import_hosts_into(data, &subnet_id, hosts))
            .await?
    };
    info!(
        subnet = %subnet_id,
        imported = summary.imported.len(),
        skipped = summary.skipped.len(),
        "Scan results imported"
    );
    Ok(HttpResponse::Ok().json(summary))
}

// ============================================================================
// Monitoring
// ============================================================================

/// A device to probe: a bare address or an object carrying one.
#[derive(Deserialize)]
#[serde(untagged)]
pub enum DeviceRef {
    Address(String),
    Device {
        #[serde(rename = "ipAddress", alias = "address")]
        ip_address: String,
    },
}

impl DeviceRef {
    fn address(&self) -> &str {
        match self {
            DeviceRef::Address(addr) => addr,
            DeviceRef::Device { ip_address } => ip_address,
        }
    }
}

#[derive(Deserialize)]
pub struct CheckRequest {
    #[serde(default)]
    devices: Vec<DeviceRef>,
}

fn parse_targets(devices: &[DeviceRef]) -> Result<Vec<IpAddr>, AppError> {
    devices
        .iter()
        .map(|d| {
            let addr = d.address().trim();
            addr.parse()
                .map_err(|_| AppError::InvalidInput(format!("'{}' is not an IP address", addr)))
        })
        .collect()
}

/// One-shot reachability probe; does not touch the monitor's state.
#[post("/api/monitor/check")]
pub async fn check_devices(
    state: Data<AppState>,
    body: Json<CheckRequest>,
) -> Result<HttpResponse, AppError> {
    let targets = parse_targets(&body.devices)?;
    let results = state.fping.probe(&targets).await?;
    Ok(HttpResponse::Ok().json(json!({ "results": results })))
}

#[get("/api/monitor/status")]
pub async fn monitor_status(state: Data<AppState>) -> Result<HttpResponse, AppError> {
    let data = state.load().await?;
    let mut monitor = state.monitor.write().await;
    monitor.sync(&data.ip_addresses);
    Ok(HttpResponse::Ok().json(json!({
        "devices": monitor.devices(),
        "stats": monitor.stats(),
    })))
}

#[post("/api/monitor/refresh")]
pub async fn monitor_refresh(state: Data<AppState>) -> Result<HttpResponse, AppError> {
    let summary = poller::run_cycle(&state).await?;
    let monitor = state.monitor.read().await;
    Ok(HttpResponse::Ok().json(json!({
        "summary": summary,
        "devices": monitor.devices(),
        "stats": monitor.stats(),
    })))
}

#[post("/api/monitor/devices/{id}/toggle")]
pub async fn toggle_device(
    state: Data<AppState>,
    path: Path<String>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let data = state.load().await?;
    let mut monitor = state.monitor.write().await;
    monitor.sync(&data.ip_addresses);
    let device = monitor.toggle(&id)?;
    info!(id = %device.id, enabled = device.enabled, "Monitoring toggled");
    Ok(HttpResponse::Ok().json(device))
}

// ============================================================================
// Notifications
// ============================================================================

#[get("/api/notifications/settings")]
pub async fn get_notification_settings(state: Data<AppState>) -> Result<HttpResponse, AppError> {
    Ok(HttpResponse::Ok().json(state.notification_settings().await?))
}

#[post("/api/notifications/settings")]
pub async fn save_notification_settings(
    state: Data<AppState>,
    body: Json<NotificationSettings>,
) -> Result<HttpResponse, AppError> {
    let settings = body.into_inner();
    let saved = settings.clone();
    state
        .run_blocking(move |store| notify::save_settings(store, &saved))
        .await?;
    info!("Notification settings saved");
    Ok(HttpResponse::Ok().json(settings))
}

#[derive(Deserialize)]
pub struct SmtpRequest {
    config: SmtpConfig,
    payload: MailMessage,
}

/// Send one mail with caller-supplied server settings.
#[post("/api/notifications/smtp")]
pub async fn send_smtp(body: Json<SmtpRequest>) -> Result<HttpResponse, AppError> {
    let request = body.into_inner();
    smtp::send(&request.config, &request.payload).await?;
    Ok(HttpResponse::Ok().json(json!({ "success": true })))
}

#[derive(Deserialize)]
pub struct TestRequest {
    channel: Channel,
    /// Unsaved settings from the form; the stored ones when absent.
    #[serde(default)]
    settings: Option<NotificationSettings>,
}

#[post("/api/notifications/test")]
pub async fn test_notification(
    state: Data<AppState>,
    body: Json<TestRequest>,
) -> Result<HttpResponse, AppError> {
    let request = body.into_inner();
    let settings = match request.settings {
        Some(settings) => settings,
        None => state.notification_settings().await?,
    };
    if let Err(e) = state.notifier.test_channel(request.channel, &settings).await {
        warn!(channel = request.channel.as_str(), error = %e, "Test notification failed");
        return Err(e);
    }
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "channel": request.channel.as_str(),
    })))
}

#[get("/api/notifications")]
pub async fn list_notifications(state: Data<AppState>) -> HttpResponse {
    let log = state.notifier.log();
    HttpResponse::Ok().json(json!({
        "notifications": log.list(),
        "unread": log.unread(),
    }))
}

#[derive(Deserialize, Default)]
pub struct ReadRequest {
    /// Mark everything read when absent.
    #[serde(default)]
    ids: Option<Vec<String>>,
}

#[post("/api/notifications/read")]
pub async fn mark_notifications_read(
    state: Data<AppState>,
    body: Option<Json<ReadRequest>>,
) -> HttpResponse {
    let request = body.map(Json::into_inner).unwrap_or_default();
    let marked = state.notifier.log().mark_read(request.ids.as_deref());
    HttpResponse::Ok().json(json!({ "marked": marked }))
}

#[delete("/api/notifications")]
pub async fn clear_notifications(state: Data<AppState>) -> HttpResponse {
    state.notifier.log().clear();
    HttpResponse::Ok().json(json!({ "success": true }))
}

// ============================================================================
// Topology and export
// ============================================================================

#[get("/api/topology")]
pub async fn get_topology(state: Data<AppState>) -> Result<HttpResponse, AppError> {
    let data = state.load().await?;
    Ok(HttpResponse::Ok().json(build_topology(&data)))
}

#[get("/api/export")]
pub async fn export_workbook(state: Data<AppState>) -> Result<HttpResponse, AppError> {
    let data = state.load().await?;
    let buffer = tokio::task::spawn_blocking(move || export::build_workbook(&data)).await??;
    Ok(HttpResponse::Ok()
        .content_type(export::CONTENT_TYPE)
        .insert_header((
            "Content-Disposition",
            format!("attachment; filename=\"{}\"", export::FILE_NAME),
        ))
        .body(buffer))
}

// ============================================================================
// Auth
// ============================================================================

/// Session token from `Authorization: Bearer ..` or `X-Session-Token`.
fn session_token(req: &HttpRequest) -> Option<String> {
    let headers = req.headers();
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .or_else(|| headers.get("X-Session-Token").and_then(|v| v.to_str().ok()))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

#[derive(Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

#[post("/api/auth/login")]
pub async fn login(
    state: Data<AppState>,
    body: Json<LoginRequest>,
) -> Result<HttpResponse, AppError> {
    let LoginRequest { username, password } = body.into_inner();
    let user = username.clone();
    let ok = state
        .run_blocking(move |store| auth::verify(store, &user, &password))
        .await?;
    if !ok {
        warn!(username = %username, "Failed login");
        return Err(AppError::Unauthorized(
            "Invalid username or password".to_string(),
        ));
    }
    let token = state.sessions.create(&username);
    info!(username = %username, "Login");
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "token": token,
        "username": username,
    })))
}

#[post("/api/auth/logout")]
pub async fn logout(state: Data<AppState>, req: HttpRequest) -> HttpResponse {
    let removed = session_token(&req).is_some_and(|t| state.sessions.remove(&t));
    HttpResponse::Ok().json(json!({ "success": removed }))
}

#[get("/api/auth/session")]
pub async fn session(state: Data<AppState>, req: HttpRequest) -> HttpResponse {
    match session_token(&req).and_then(|t| state.sessions.get(&t)) {
        Some(session) => HttpResponse::Ok().json(json!({
            "authenticated": true,
            "username": session.username,
            "createdAt": session.created_at,
        })),
        None => HttpResponse::Ok().json(json!({ "authenticated": false })),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsRequest {
    #[serde(default)]
    username: String,
    password: String,
    confirm_password: String,
}

/// Change the admin account. Requires a live session; every other session
/// is signed out.
#[post("/api/auth/credentials")]
pub async fn change_credentials(
    state: Data<AppState>,
    req: HttpRequest,
    body: Json<CredentialsRequest>,
) -> Result<HttpResponse, AppError> {
    let token = session_token(&req)
        .filter(|t| state.sessions.get(t).is_some())
        .ok_or_else(|| AppError::Unauthorized("Login required".to_string()))?;

    let request = body.into_inner();
    let username = state
        .run_blocking(move |store| {
            auth::update_credentials(
                store,
                &request.username,
                &request.password,
                &request.confirm_password,
            )
        })
        .await?;
    state.sessions.retain_only(&token);
    Ok(HttpResponse::Ok().json(json!({ "success": true, "username": username })))
}

#[cfg(test)]
mod tests {
    use actix_web::http::StatusCode;
    use actix_web::{App, test};
    use serde_json::Value;

    use super::*;
    use crate::model::tests::sample_dataset;
    use crate::state::tests::test_state;
    use crate::web::{configure, json_config};

    macro_rules! app {
        ($dir:expr) => {
            test::init_service(
                App::new()
                    .app_data(Data::new(test_state($dir)))
                    .app_data(json_config())
                    .configure(configure),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn test_get_data_includes_vlans() {
        let dir = tempfile::tempdir().unwrap();
        let app = app!(&dir);

        let req = test::TestRequest::get().uri("/api/data").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["subnets"][0]["id"], "lan");
        assert_eq!(body["ipAddresses"].as_array().unwrap().len(), 2);
        assert_eq!(body["vlans"][0]["id"], "10");
        assert_eq!(body["vlans"][0]["subnets"][0], "lan");
    }

    #[actix_web::test]
    async fn test_replace_data_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let app = app!(&dir);

        let mut data = sample_dataset();
        data.applications.clear();
        let mut payload = serde_json::to_value(&data).unwrap();
        payload["vlans"] = json!([{ "id": "99" }]);

        let req = test::TestRequest::post()
            .uri("/api/data")
            .set_json(&payload)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let req = test::TestRequest::get().uri("/api/data").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert!(body["applications"].as_array().unwrap().is_empty());
        assert_eq!(body["vlans"].as_array().unwrap().len(), 1);
        assert_eq!(body["vlans"][0]["id"], "10");
    }

    #[actix_web::test]
    async fn test_malformed_body_is_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let app = app!(&dir);

        let req = test::TestRequest::post()
            .uri("/api/data")
            .insert_header(("Content-Type", "application/json"))
            .set_payload("{ not json")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["kind"], "InvalidInput");
    }

    #[actix_web::test]
    async fn test_subnet_crud() {
        let dir = tempfile::tempdir().unwrap();
        let app = app!(&dir);

        let req = test::TestRequest::post()
            .uri("/api/subnets")
            .set_json(json!({ "name": "iot", "cidr": "10.0.20.0/24", "gateway": "10.0.20.1" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let created: Value = test::read_body_json(resp).await;
        let id = created["id"].as_str().unwrap().to_string();
        assert!(!id.is_empty());
        assert_eq!(created["totalIps"], 254);

        let req = test::TestRequest::put()
            .uri(&format!("/api/subnets/{}", id))
            .set_json(json!({ "name": "iot-2", "cidr": "10.0.20.0/25", "gateway": "10.0.20.1" }))
            .to_request();
        let updated: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(updated["name"], "iot-2");
        assert_eq!(updated["totalIps"], 126);

        let req = test::TestRequest::delete()
            .uri(&format!("/api/subnets/{}", id))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let req = test::TestRequest::get().uri("/api/subnets").to_request();
        let list: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(list.as_array().unwrap().len(), 1);
    }

    #[actix_web::test]
    async fn test_deleting_subnet_drops_its_addresses() {
        let dir = tempfile::tempdir().unwrap();
        let app = app!(&dir);

        let req = test::TestRequest::delete().uri("/api/subnets/lan").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let req = test::TestRequest::get().uri("/api/ip-addresses").to_request();
        let list: Value = test::call_and_read_body_json(&app, req).await;
        assert!(list.as_array().unwrap().is_empty());
    }

    #[actix_web::test]
    async fn test_record_errors() {
        let dir = tempfile::tempdir().unwrap();
        let app = app!(&dir);

        let req = test::TestRequest::put()
            .uri("/api/nat-rules/missing")
            .set_json(json!({ "internalIp": "10.0.0.2", "externalIp": "1.2.3.4" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::post()
            .uri("/api/ip-addresses")
            .set_json(json!({ "address": "10.9.9.9", "hostname": "x", "subnetId": "nope" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let req = test::TestRequest::post()
            .uri("/api/wifi-networks")
            .set_json(json!({ "ssid": "" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["kind"], "InvalidInput");
    }

    #[actix_web::test]
    async fn test_dashboard_counts() {
        let dir = tempfile::tempdir().unwrap();
        let app = app!(&dir);

        let req = test::TestRequest::get().uri("/api/dashboard").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["subnets"], 1);
        assert_eq!(body["vlans"], 1);
        assert_eq!(body["usedIps"], 2);
        assert_eq!(body["totalIps"], 254);
        assert_eq!(body["utilizationPercent"], 0.8);
        assert_eq!(body["online"], 1);
        assert_eq!(body["offline"], 1);
    }

    #[actix_web::test]
    async fn test_scan_validates_and_surfaces_fping_errors() {
        let dir = tempfile::tempdir().unwrap();
        let app = app!(&dir);

        let req = test::TestRequest::post()
            .uri("/api/scan")
            .set_json(json!({ "cidr": "192.168.1.0/24; rm -rf /" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post()
            .uri("/api/scan")
            .set_json(json!({ "cidr": "192.168.1.0/24" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["kind"], "Scan");
    }

    #[actix_web::test]
    async fn test_monitor_check() {
        let dir = tempfile::tempdir().unwrap();
        let app = app!(&dir);

        let req = test::TestRequest::post()
            .uri("/api/monitor/check")
            .set_json(json!({ "devices": [] }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert!(body["results"].as_array().unwrap().is_empty());

        let req = test::TestRequest::post()
            .uri("/api/monitor/check")
            .set_json(json!({ "devices": ["10.0.0.1", { "ipAddress": "not-an-ip" }] }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_monitor_status_and_toggle() {
        let dir = tempfile::tempdir().unwrap();
        let app = app!(&dir);

        let req = test::TestRequest::get().uri("/api/monitor/status").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["devices"].as_array().unwrap().len(), 2);
        assert_eq!(body["stats"]["totalDevices"], 2);
        assert_eq!(body["stats"]["onlineDevices"], 1);

        let req = test::TestRequest::post()
            .uri("/api/monitor/devices/nas/toggle")
            .to_request();
        let device: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(device["enabled"], false);

        let req = test::TestRequest::post()
            .uri("/api/monitor/devices/missing/toggle")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_notification_settings_merge_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let app = app!(&dir);

        let req = test::TestRequest::post()
            .uri("/api/notifications/settings")
            .set_json(json!({ "ntfy": { "enabled": true, "topic": "lab" }, "cooldownMinutes": 1 }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let req = test::TestRequest::get()
            .uri("/api/notifications/settings")
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["ntfy"]["topic"], "lab");
        assert_eq!(body["ntfy"]["serverUrl"], "https://ntfy.sh");
        assert_eq!(body["cooldownMinutes"], 1);
        assert_eq!(body["smtp"]["port"], 587);
    }

    #[actix_web::test]
    async fn test_unconfigured_channel_test_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = app!(&dir);

        let req = test::TestRequest::post()
            .uri("/api/notifications/test")
            .set_json(json!({ "channel": "discord" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_notification_log_endpoints() {
        let dir = tempfile::tempdir().unwrap();
        let state = Data::new(test_state(&dir));
        state
            .notifier
            .log()
            .push("gw", &crate::notify::AlertPayload::offline("gw", "192.168.1.1"));
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .app_data(json_config())
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/notifications").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["unread"], 1);
        assert_eq!(body["notifications"][0]["deviceId"], "gw");

        let req = test::TestRequest::post()
            .uri("/api/notifications/read")
            .set_json(json!({}))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["marked"], 1);
        assert_eq!(state.notifier.log().unread(), 0);

        let req = test::TestRequest::delete().uri("/api/notifications").to_request();
        test::call_service(&app, req).await;
        assert!(state.notifier.log().list().is_empty());
    }

    #[actix_web::test]
    async fn test_topology_and_export() {
        let dir = tempfile::tempdir().unwrap();
        let app = app!(&dir);

        let req = test::TestRequest::get().uri("/api/topology").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["nodes"].as_array().unwrap().len(), 4);
        assert_eq!(body["links"].as_array().unwrap().len(), 3);

        let req = test::TestRequest::get().uri("/api/export").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get("content-type").unwrap(),
            export::CONTENT_TYPE
        );
        let bytes = test::read_body(resp).await;
        assert_eq!(&bytes[..2], b"PK");
    }

    #[actix_web::test]
    async fn test_login_session_and_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let app = app!(&dir);

        let req = test::TestRequest::post()
            .uri("/api/auth/login")
            .set_json(json!({ "username": "admin", "password": "nope" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let req = test::TestRequest::post()
            .uri("/api/auth/login")
            .set_json(json!({ "username": "admin", "password": "admin" }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        let token = body["token"].as_str().unwrap().to_string();

        let req = test::TestRequest::get()
            .uri("/api/auth/session")
            .insert_header(("Authorization", format!("Bearer {}", token)))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["authenticated"], true);

        let change = json!({ "username": "ops", "password": "abcd", "confirmPassword": "abcd" });
        let req = test::TestRequest::post()
            .uri("/api/auth/credentials")
            .set_json(&change)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let req = test::TestRequest::post()
            .uri("/api/auth/credentials")
            .insert_header(("X-Session-Token", token.clone()))
            .set_json(json!({ "password": "abcd", "confirmPassword": "abce" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post()
            .uri("/api/auth/credentials")
            .insert_header(("X-Session-Token", token.clone()))
            .set_json(&change)
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["username"], "ops");

        let req = test::TestRequest::post()
            .uri("/api/auth/logout")
            .insert_header(("X-Session-Token", token.clone()))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["success"], true);

        let req = test::TestRequest::get()
            .uri("/api/auth/session")
            .insert_header(("X-Session-Token", token))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["authenticated"], false);
    }

    #[actix_web::test]
    async fn test_import_scan_results_skips_known_addresses() {
        let dir = tempfile::tempdir().unwrap();
        let app = app!(&dir);

        let req = test::TestRequest::post()
            .uri("/api/subnets/lan/import")
            .set_json(json!({ "hosts": [
                { "ip": "192.168.1.1", "hostname": "router" },
                { "ip": "192.168.1.50", "hostname": "printer.lan", "isOnline": true },
                { "ip": "192.168.1.51" },
                { "ip": "192.168.1.50" }
            ]}))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        let imported = body["imported"].as_array().unwrap();
        assert_eq!(imported.len(), 2);
        assert_eq!(imported[0]["hostname"], "printer.lan");
        assert_eq!(imported[0]["subnetId"], "lan");
        assert_eq!(imported[0]["isOnline"], true);
        assert_eq!(imported[1]["hostname"], "192.168.1.51");
        assert_eq!(body["skipped"], json!(["192.168.1.1", "192.168.1.50"]));

        let req = test::TestRequest::get().uri("/api/subnets").to_request();
        let subnets: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(subnets[0]["usedIps"], 4);
    }

    #[actix_web::test]
    async fn test_import_rejects_unknown_subnet_and_bad_batches() {
        let dir = tempfile::tempdir().unwrap();
        let app = app!(&dir);

        let req = test::TestRequest::post()
            .uri("/api/subnets/nope/import")
            .set_json(json!({ "hosts": [{ "ip": "10.0.0.1" }] }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::post()
            .uri("/api/subnets/lan/import")
            .set_json(json!({ "hosts": [{ "ip": "192.168.1.60" }, { "ip": "not-an-ip" }] }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::get().uri("/api/ip-addresses").to_request();
        let list: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(list.as_array().unwrap().len(), 2);
    }

    #[cfg(unix)]
    #[actix_web::test]
    async fn test_dashboard_counts_follow_monitor_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = test_state(&dir);
        state.fping = crate::scanner::fping::tests::fake_fping(
            &dir,
            "",
            "192.168.1.1  : xmt/rcv/%loss = 1/1/0%, min/avg/max = 0.52/0.52/0.52\n\
             192.168.1.20 : xmt/rcv/%loss = 1/1/0%, min/avg/max = 4.10/4.10/4.10",
        );
        let app = test::init_service(
            App::new()
                .app_data(Data::new(state))
                .app_data(json_config())
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/dashboard").to_request();
        let before: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(before["online"], 1);
        assert_eq!(before["offline"], 1);

        let req = test::TestRequest::post().uri("/api/monitor/refresh").to_request();
        let refreshed: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(refreshed["stats"]["onlineDevices"], 2);

        let req = test::TestRequest::get().uri("/api/dashboard").to_request();
        let after: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(after["online"], 2);
        assert_eq!(after["offline"], 0);
    }

    #[actix_web::test]
    async fn test_send_smtp_validates_before_connecting() {
        let dir = tempfile::tempdir().unwrap();
        let app = app!(&dir);
        let payload = json!({ "subject": "hello", "html": "<p>hi</p>" });

        let req = test::TestRequest::post()
            .uri("/api/notifications/smtp")
            .set_json(json!({
                "config": { "host": "", "username": "a@example.com", "toAddresses": ["b@example.com"] },
                "payload": payload,
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["kind"], "InvalidInput");

        let req = test::TestRequest::post()
            .uri("/api/notifications/smtp")
            .set_json(json!({
                "config": { "host": "127.0.0.1", "username": "a@example.com", "toAddresses": ["not an address"] },
                "payload": payload,
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_send_smtp_reports_unreachable_server() {
        let dir = tempfile::tempdir().unwrap();
        let app = app!(&dir);
        let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = closed.local_addr().unwrap().port();
        drop(closed);

        let req = test::TestRequest::post()
            .uri("/api/notifications/smtp")
            .set_json(json!({
                "config": {
                    "host": "127.0.0.1",
                    "port": port,
                    "username": "a@example.com",
                    "toAddresses": ["b@example.com"],
                },
                "payload": { "subject": "hello", "html": "<p>hi</p>" },
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["kind"], "Notification");
    }
}

// SPDX-License-Identifier: GPL-3.0-only
use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use crate::api::handlers::{
    ApiError, ApiHandlers, ApiResponse, CreateVmRequest, DeleteVmQuery, ImportRequest, ImportResult, LaunchRequest,
    LaunchResponse, MoveVmRequest, RelocateVmRequest, ScanRequest, SettingsPatch, VmEntry,
};
use crate::api::websocket;
use crate::config::Settings;
use crate::context::AppContext;
use crate::installer::{InstallEvent, JobKind};
use crate::launcher::RunningInstance;
use crate::provisioning::{ImportCandidate, VmTemplate};
use crate::registry::{VmRecord, VmUpdate};
use crate::specs::MachineSpecs;
use crate::version::VersionSnapshot;

type Handlers = State<Arc<ApiHandlers>>;
type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

pub struct HttpServer {
    handlers: ApiHandlers,
    addr: SocketAddr,
}

impl HttpServer {
    pub fn new(ctx: Arc<AppContext>, addr: SocketAddr) -> Self {
        Self {
            handlers: ApiHandlers::new(ctx),
            addr,
        }
    }

    pub fn router(handlers: Arc<ApiHandlers>) -> Router {
        Router::new()
            .route("/api/health", get(ApiHandlers::health))
            .route("/api/vms", get(list_vms_handler).post(create_vm_handler))
            .route("/api/vms/move", post(move_vm_handler))
            .route(
                "/api/vms/:index",
                get(get_vm_handler).patch(update_vm_handler).delete(delete_vm_handler),
            )
            .route("/api/vms/:index/relocate", post(relocate_vm_handler))
            .route("/api/vms/:index/specs", get(vm_specs_handler))
            .route("/api/vms/:index/launch", post(launch_vm_handler))
            .route("/api/running", get(running_handler))
            .route("/api/templates", get(templates_handler))
            .route("/api/import", post(import_handler))
            .route("/api/import/scan", post(scan_handler))
            .route("/api/import/cancel", post(cancel_scan_handler))
            .route("/api/settings", get(get_settings_handler).patch(update_settings_handler))
            .route("/api/versions", get(versions_handler))
            .route("/api/versions/refresh", post(refresh_versions_handler))
            .route("/api/updates", get(update_states_handler))
            .route("/api/updates/cancel", post(cancel_updates_handler))
            .route("/api/updates/relaunch", post(relaunch_handler))
            .route("/api/updates/:kind", post(start_update_handler))
            .route("/api/updates/:kind/cancel", post(cancel_update_handler))
            .route("/ws", get(websocket::ws_handler))
            .with_state(handlers)
    }

    /// Serve until `shutdown` resolves.
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = Self::router(Arc::new(self.handlers));

        info!(addr = %self.addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

        Ok(())
    }
}

async fn list_vms_handler(State(handlers): Handlers) -> ApiResult<Vec<VmEntry>> {
    handlers.list_vms().await
}

async fn create_vm_handler(State(handlers): Handlers, Json(request): Json<CreateVmRequest>) -> ApiResult<VmEntry> {
    handlers.create_vm(request).await
}

async fn get_vm_handler(State(handlers): Handlers, Path(index): Path<usize>) -> ApiResult<VmRecord> {
    handlers.get_vm(index).await
}

async fn update_vm_handler(
    State(handlers): Handlers,
    Path(index): Path<usize>,
    Json(update): Json<VmUpdate>,
) -> ApiResult<VmRecord> {
    handlers.update_vm(index, update).await
}

async fn delete_vm_handler(
    State(handlers): Handlers,
    Path(index): Path<usize>,
    Query(query): Query<DeleteVmQuery>,
) -> ApiResult<VmRecord> {
    handlers.delete_vm(index, query).await
}

async fn move_vm_handler(State(handlers): Handlers, Json(request): Json<MoveVmRequest>) -> ApiResult<()> {
    handlers.move_vm(request).await
}

async fn relocate_vm_handler(
    State(handlers): Handlers,
    Path(index): Path<usize>,
    Json(request): Json<RelocateVmRequest>,
) -> ApiResult<VmRecord> {
    handlers.relocate_vm(index, request).await
}

async fn vm_specs_handler(State(handlers): Handlers, Path(index): Path<usize>) -> ApiResult<MachineSpecs> {
    handlers.vm_specs(index).await
}

async fn launch_vm_handler(
    State(handlers): Handlers,
    Path(index): Path<usize>,
    request: Option<Json<LaunchRequest>>,
) -> ApiResult<LaunchResponse> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    handlers.launch_vm(index, request).await
}

async fn running_handler(State(handlers): Handlers) -> ApiResult<Vec<RunningInstance>> {
    handlers.running().await
}

async fn templates_handler(State(handlers): Handlers) -> ApiResult<Vec<VmTemplate>> {
    handlers.templates().await
}

async fn scan_handler(State(handlers): Handlers, Json(request): Json<ScanRequest>) -> ApiResult<Vec<ImportCandidate>> {
    handlers.scan_import(request).await
}

async fn cancel_scan_handler(State(handlers): Handlers) -> ApiResult<bool> {
    handlers.cancel_scan().await
}

async fn import_handler(State(handlers): Handlers, Json(request): Json<ImportRequest>) -> ApiResult<Vec<ImportResult>> {
    handlers.import_vms(request).await
}

async fn get_settings_handler(State(handlers): Handlers) -> ApiResult<Settings> {
    handlers.get_settings().await
}

async fn update_settings_handler(State(handlers): Handlers, Json(patch): Json<SettingsPatch>) -> ApiResult<Settings> {
    handlers.update_settings(patch).await
}

async fn versions_handler(State(handlers): Handlers) -> ApiResult<VersionSnapshot> {
    handlers.versions().await
}

async fn refresh_versions_handler(State(handlers): Handlers) -> ApiResult<VersionSnapshot> {
    handlers.refresh_versions().await
}

async fn update_states_handler(State(handlers): Handlers) -> ApiResult<Vec<InstallEvent>> {
    handlers.update_states().await
}

async fn start_update_handler(State(handlers): Handlers, Path(kind): Path<JobKind>) -> ApiResult<JobKind> {
    handlers.start_update(kind).await
}

async fn cancel_update_handler(State(handlers): Handlers, Path(kind): Path<JobKind>) -> ApiResult<bool> {
    handlers.cancel_update(kind).await
}

async fn cancel_updates_handler(State(handlers): Handlers) -> ApiResult<usize> {
    handlers.cancel_updates().await
}

async fn relaunch_handler(State(handlers): Handlers) -> ApiResult<()> {
    handlers.relaunch().await
}

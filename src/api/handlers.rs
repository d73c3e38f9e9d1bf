// SPDX-License-Identifier: GPL-3.0-only
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::context::{AppContext, AppError, NewVm};
use crate::installer::{InstallError, InstallEvent, JobKind};
use crate::launcher::{LaunchError, LaunchMode, Locator, RunningInstance};
use crate::provisioning::{ImportCandidate, VmTemplate};
use crate::registry::{RegistryError, VmRecord, VmUpdate};
use crate::specs::MachineSpecs;
use crate::version::VersionSnapshot;

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

impl ApiResponse<()> {
    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

/// Error answered with a status code and the error envelope.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<AppError> for ApiError {
    fn from(e: AppError) -> Self {
        let status = match &e {
            AppError::Registry(RegistryError::IndexOutOfRange(_)) => StatusCode::NOT_FOUND,
            AppError::Registry(RegistryError::EmptyName) => StatusCode::BAD_REQUEST,
            AppError::Registry(RegistryError::NameTaken(_) | RegistryError::DuplicatePath(_)) => StatusCode::CONFLICT,
            AppError::Launch(LaunchError::NoPath(_)) => StatusCode::CONFLICT,
            AppError::Install(InstallError::AlreadyRunning(_) | InstallError::NotAvailable(_)) => StatusCode::CONFLICT,
            AppError::Install(InstallError::NoAsset(_)) => StatusCode::NOT_FOUND,
            AppError::Import(_) => StatusCode::BAD_REQUEST,
            AppError::UnknownTemplate(_) => StatusCode::NOT_FOUND,
            AppError::Registry(RegistryError::Persist(_))
            | AppError::Launch(LaunchError::Spawn { .. })
            | AppError::Install(InstallError::Other(_))
            | AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = format!("{e:#}");
        if status.is_server_error() {
            error!(error = %message, "Request failed");
        } else {
            warn!(error = %message, "Request rejected");
        }
        Self { status, message }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        AppError::Other(e).into()
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        AppError::Registry(e).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ApiResponse::error(self.message))).into_response()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVmRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub template: Option<String>,
    #[serde(default)]
    pub use_shader: bool,
}

#[derive(Debug, Deserialize)]
pub struct MoveVmRequest {
    pub from: usize,
    pub to: usize,
}

#[derive(Debug, Deserialize)]
pub struct RelocateVmRequest {
    pub path: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteVmQuery {
    #[serde(default)]
    pub trash: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct LaunchRequest {
    pub mode: Option<LaunchMode>,
}

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    pub root: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    pub paths: Vec<PathBuf>,
}

/// Settings change; `None` leaves a value as is, an empty `vmHome` resets it.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    pub update_channel: Option<String>,
    pub emulator_path: Option<String>,
    pub vm_home: Option<String>,
    pub last_selected_vm: Option<usize>,
    pub appearance: Option<String>,
    pub prevent_sleep: Option<bool>,
}

impl SettingsPatch {
    fn apply(self, settings: &mut Settings) {
        if let Some(channel) = self.update_channel {
            settings.update_channel = channel;
        }
        if let Some(path) = self.emulator_path {
            settings.emulator_path = path;
        }
        if let Some(home) = self.vm_home {
            settings.vm_home = (!home.is_empty()).then(|| PathBuf::from(home));
        }
        if let Some(index) = self.last_selected_vm {
            settings.last_selected_vm = Some(index);
        }
        if let Some(appearance) = self.appearance {
            settings.appearance = appearance;
        }
        if let Some(prevent_sleep) = self.prevent_sleep {
            settings.prevent_sleep = prevent_sleep;
        }
    }
}

#[derive(Debug, Serialize)]
pub struct VmEntry {
    pub index: usize,
    pub running: bool,
    #[serde(flatten)]
    pub vm: VmRecord,
}

#[derive(Debug, Serialize)]
pub struct LaunchResponse {
    pub pid: Option<u32>,
    pub locator: Locator,
    pub warnings: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ImportResult {
    pub path: PathBuf,
    pub index: Option<usize>,
    pub error: Option<String>,
}

pub struct ApiHandlers {
    ctx: Arc<AppContext>,
}

impl ApiHandlers {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<AppContext> {
        &self.ctx
    }

    pub async fn health() -> Json<ApiResponse<&'static str>> {
        Json(ApiResponse::success("ok"))
    }

    pub async fn list_vms(&self) -> ApiResult<Vec<VmEntry>> {
        let vms = self.ctx.registry().await.list_vms().await;
        let mut entries = Vec::with_capacity(vms.len());
        for (index, vm) in vms.into_iter().enumerate() {
            let running = match &vm.path {
                Some(path) => self.ctx.launcher.is_running(path).await,
                None => false,
            };
            entries.push(VmEntry { index, running, vm });
        }
        Ok(Json(ApiResponse::success(entries)))
    }

    pub async fn get_vm(&self, index: usize) -> ApiResult<VmRecord> {
        let vm = self
            .ctx
            .registry()
            .await
            .get_vm(index)
            .await
            .ok_or(RegistryError::IndexOutOfRange(index))?;
        Ok(Json(ApiResponse::success(vm)))
    }

    pub async fn create_vm(&self, request: CreateVmRequest) -> ApiResult<VmEntry> {
        info!(name = %request.name, template = ?request.template, "Create VM request received");
        let (index, vm) = self
            .ctx
            .create_vm(NewVm {
                name: request.name,
                description: request.description,
                template: request.template,
                use_shader: request.use_shader,
            })
            .await?;
        Ok(Json(ApiResponse::success(VmEntry {
            index,
            running: false,
            vm,
        })))
    }

    pub async fn update_vm(&self, index: usize, update: VmUpdate) -> ApiResult<VmRecord> {
        let vm = self.ctx.registry().await.update_vm(index, update).await?;
        Ok(Json(ApiResponse::success(vm)))
    }

    pub async fn delete_vm(&self, index: usize, query: DeleteVmQuery) -> ApiResult<VmRecord> {
        let removed = self.ctx.delete_vm(index, query.trash).await?;
        Ok(Json(ApiResponse::success(removed)))
    }

    pub async fn move_vm(&self, request: MoveVmRequest) -> ApiResult<()> {
        self.ctx.registry().await.move_vm(request.from, request.to).await?;
        Ok(Json(ApiResponse::success(())))
    }

    pub async fn relocate_vm(&self, index: usize, request: RelocateVmRequest) -> ApiResult<VmRecord> {
        let vm = self.ctx.registry().await.relocate_vm(index, request.path).await?;
        Ok(Json(ApiResponse::success(vm)))
    }

    pub async fn vm_specs(&self, index: usize) -> ApiResult<MachineSpecs> {
        Ok(Json(ApiResponse::success(self.ctx.vm_specs(index).await?)))
    }

    pub async fn launch_vm(&self, index: usize, request: LaunchRequest) -> ApiResult<LaunchResponse> {
        let mode = request.mode.unwrap_or(LaunchMode::Run);
        let outcome = self.ctx.launch_vm(index, mode).await?;
        Ok(Json(ApiResponse::success(LaunchResponse {
            pid: outcome.pid,
            locator: outcome.resolution.locator,
            warnings: outcome.resolution.warnings,
        })))
    }

    pub async fn running(&self) -> ApiResult<Vec<RunningInstance>> {
        Ok(Json(ApiResponse::success(self.ctx.launcher.running().await)))
    }

    pub async fn templates(&self) -> ApiResult<Vec<VmTemplate>> {
        Ok(Json(ApiResponse::success(self.ctx.templates().await?)))
    }

    pub async fn scan_import(&self, request: ScanRequest) -> ApiResult<Vec<ImportCandidate>> {
        let found = self.ctx.scan_import(request.root).await?;
        Ok(Json(ApiResponse::success(found)))
    }

    pub async fn cancel_scan(&self) -> ApiResult<bool> {
        Ok(Json(ApiResponse::success(self.ctx.scanner.cancel())))
    }

    pub async fn import_vms(&self, request: ImportRequest) -> ApiResult<Vec<ImportResult>> {
        let mut results = Vec::with_capacity(request.paths.len());
        for path in request.paths {
            let result = match self.ctx.import_vm(&path).await {
                Ok(index) => ImportResult {
                    path,
                    index: Some(index),
                    error: None,
                },
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Import failed");
                    ImportResult {
                        path,
                        index: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            results.push(result);
        }
        Ok(Json(ApiResponse::success(results)))
    }

    pub async fn get_settings(&self) -> ApiResult<Settings> {
        Ok(Json(ApiResponse::success(self.ctx.settings.get())))
    }

    pub async fn update_settings(&self, patch: SettingsPatch) -> ApiResult<Settings> {
        let settings = self.ctx.update_settings(|s| patch.apply(s)).await?;
        Ok(Json(ApiResponse::success(settings)))
    }

    pub async fn versions(&self) -> ApiResult<VersionSnapshot> {
        let snapshot = self.ctx.snapshot.current();
        Ok(Json(ApiResponse::success(VersionSnapshot::clone(&snapshot))))
    }

    pub async fn refresh_versions(&self) -> ApiResult<VersionSnapshot> {
        let snapshot = self.ctx.resolver.reconcile().await;
        Ok(Json(ApiResponse::success(VersionSnapshot::clone(&snapshot))))
    }

    pub async fn update_states(&self) -> ApiResult<Vec<InstallEvent>> {
        Ok(Json(ApiResponse::success(self.ctx.installer.states())))
    }

    pub async fn start_update(&self, kind: JobKind) -> ApiResult<JobKind> {
        let handle = self.ctx.start_update(kind).map_err(AppError::from)?;
        info!(%kind, "Update job started");
        Ok(Json(ApiResponse::success(handle.kind)))
    }

    pub async fn cancel_update(&self, kind: JobKind) -> ApiResult<bool> {
        let cancelled = self.ctx.installer.cancel(kind);
        if cancelled {
            info!(%kind, "Update job cancellation requested");
        }
        Ok(Json(ApiResponse::success(cancelled)))
    }

    pub async fn cancel_updates(&self) -> ApiResult<usize> {
        Ok(Json(ApiResponse::success(self.ctx.installer.cancel_all())))
    }

    pub async fn relaunch(&self) -> ApiResult<()> {
        self.ctx.request_relaunch()?;
        Ok(Json(ApiResponse::success(())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{OfflineFeeds, test_config};
    use tempfile::TempDir;

    async fn handlers(temp_dir: &TempDir) -> ApiHandlers {
        let ctx = AppContext::with_feeds(test_config(temp_dir.path()), Arc::new(OfflineFeeds))
            .await
            .unwrap();
        ApiHandlers::new(ctx)
    }

    fn create(name: &str) -> CreateVmRequest {
        CreateVmRequest {
            name: name.to_string(),
            description: String::new(),
            template: None,
            use_shader: false,
        }
    }

    #[tokio::test]
    async fn test_create_and_list() {
        let temp_dir = TempDir::new().unwrap();
        let handlers = handlers(&temp_dir).await;

        handlers.create_vm(create("XT")).await.unwrap();
        handlers.create_vm(create("AT")).await.unwrap();

        let Json(response) = handlers.list_vms().await.unwrap();
        let names: Vec<String> = response.data.unwrap().into_iter().map(|e| e.vm.name).collect();
        assert_eq!(names, ["XT", "AT"]);
    }

    #[tokio::test]
    async fn test_duplicate_name_is_conflict() {
        let temp_dir = TempDir::new().unwrap();
        let handlers = handlers(&temp_dir).await;

        handlers.create_vm(create("XT")).await.unwrap();
        let error = handlers.create_vm(create("XT")).await.unwrap_err();
        assert_eq!(error.status, StatusCode::CONFLICT);

        let error = handlers.create_vm(create("")).await.unwrap_err();
        assert_eq!(error.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_missing_vm_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let handlers = handlers(&temp_dir).await;

        assert_eq!(handlers.get_vm(3).await.unwrap_err().status, StatusCode::NOT_FOUND);
        assert_eq!(handlers.vm_specs(0).await.unwrap_err().status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_update_without_release_is_conflict() {
        let temp_dir = TempDir::new().unwrap();
        let handlers = handlers(&temp_dir).await;

        let error = handlers.start_update(JobKind::Emulator).await.unwrap_err();
        assert_eq!(error.status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_idle_queries() {
        let temp_dir = TempDir::new().unwrap();
        let handlers = handlers(&temp_dir).await;

        let Json(response) = handlers.cancel_update(JobKind::Roms).await.unwrap();
        assert_eq!(response.data, Some(false));
        let Json(response) = handlers.running().await.unwrap();
        assert!(response.data.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_settings_patch() {
        let temp_dir = TempDir::new().unwrap();
        let handlers = handlers(&temp_dir).await;

        let patch = SettingsPatch {
            appearance: Some("dark".to_string()),
            prevent_sleep: Some(true),
            ..Default::default()
        };
        let Json(response) = handlers.update_settings(patch).await.unwrap();
        let settings = response.data.unwrap();
        assert_eq!(settings.appearance, "dark");
        assert!(settings.prevent_sleep);
        assert!(temp_dir.path().join("settings.toml").is_file());
    }

    #[test]
    fn test_error_envelope() {
        let response = ApiResponse::error("boom".to_string());
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "boom");
    }
}

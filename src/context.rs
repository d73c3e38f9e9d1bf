// SPDX-License-Identifier: GPL-3.0-only
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{Config, Settings, SettingsStore};
use crate::installer::{InstallError, InstallPaths, InstallerService, JobHandle, JobKind};
use crate::launcher::{LaunchError, LaunchMode, Launcher, LocatorInputs, Resolution, resolve_binary};
use crate::layout::derive_config_path;
use crate::provisioning::{self, ImportCandidate, ImportError, ImportScanner, VmTemplate};
use crate::registry::{JsonRegistry, Registry, RegistryError, VmRecord};
use crate::specs::{MachineSpecs, SpecsParser};
use crate::version::{BundleProbe, FeedClient, HttpFeedClient, SnapshotHandle, VersionResolver, VersionSnapshot};

/// Version compared against the manager release feed.
pub const MANAGER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error(transparent)]
    Install(#[from] InstallError),

    #[error(transparent)]
    Import(#[from] ImportError),

    #[error("unknown template {0}")]
    UnknownTemplate(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Request to create a new VM, optionally seeded from a template.
#[derive(Debug, Clone, Default)]
pub struct NewVm {
    pub name: String,
    pub description: String,
    pub template: Option<String>,
    pub use_shader: bool,
}

#[derive(Debug, Clone)]
pub struct LaunchOutcome {
    pub pid: Option<u32>,
    pub resolution: Resolution,
}

/// Everything the daemon's surfaces operate on, passed around as `Arc<AppContext>`.
pub struct AppContext {
    pub config: Config,
    pub settings: Arc<SettingsStore>,
    pub snapshot: SnapshotHandle,
    pub resolver: Arc<VersionResolver>,
    pub launcher: Launcher,
    pub installer: Arc<InstallerService>,
    pub specs: SpecsParser,
    pub scanner: ImportScanner,
    registry: RwLock<Arc<dyn Registry>>,
    shutdown: Notify,
    relaunch_requested: AtomicBool,
}

/// Bundle of the running manager: the nearest `*.app` above the executable,
/// else the executable itself.
pub fn manager_bundle_from_exe(exe: &Path) -> PathBuf {
    exe.ancestors()
        .find(|p| p.extension().is_some_and(|ext| ext == "app"))
        .unwrap_or(exe)
        .to_path_buf()
}

impl AppContext {
    pub async fn new(config: Config) -> anyhow::Result<Arc<Self>> {
        let feeds: Arc<dyn FeedClient> = Arc::new(HttpFeedClient::new(
            config.feeds.connectivity_url.clone(),
            Duration::from_secs(config.feed_timeout_secs),
        )?);
        Self::with_feeds(config, feeds).await
    }

    pub async fn with_feeds(config: Config, feeds: Arc<dyn FeedClient>) -> anyhow::Result<Arc<Self>> {
        let settings = Arc::new(SettingsStore::load(&config.settings_path));
        let home = config.effective_home(settings.get().vm_home.as_deref());
        let registry: Arc<dyn Registry> = Arc::new(JsonRegistry::open(&home).await?);

        let snapshot = SnapshotHandle::new(VersionSnapshot::initial(MANAGER_VERSION));
        let probe = BundleProbe::new(config.app_search_dirs.clone(), config.emulator_bundle_id.clone());
        let resolver = Arc::new(VersionResolver::new(
            feeds,
            config.feeds.clone(),
            probe,
            config.app_support_dir.clone(),
            Arc::clone(&settings),
            snapshot.clone(),
            MANAGER_VERSION,
        ));

        let manager_bundle = match &config.manager_bundle_path {
            Some(path) => path.clone(),
            None => manager_bundle_from_exe(&std::env::current_exe()?),
        };
        let installer = Arc::new(InstallerService::new(
            snapshot.clone(),
            Arc::clone(&settings),
            InstallPaths {
                default_home: config.home_dir.clone(),
                app_support_dir: config.app_support_dir.clone(),
                manager_bundle,
                ci_artifact_base: config.feeds.emulator_ci_artifact_base.clone(),
                roms_archive_url: config.feeds.roms_archive_url.clone(),
            },
        )?);

        let specs = match &config.namedefs_path {
            Some(path) => SpecsParser::with_names_file(path),
            None => SpecsParser::bundled(),
        };

        Ok(Arc::new(Self {
            launcher: Launcher::new(config.launch_command.clone()),
            config,
            settings,
            snapshot,
            resolver,
            installer,
            specs,
            scanner: ImportScanner::new(),
            registry: RwLock::new(registry),
            shutdown: Notify::new(),
            relaunch_requested: AtomicBool::new(false),
        }))
    }

    pub async fn registry(&self) -> Arc<dyn Registry> {
        Arc::clone(&*self.registry.read().await)
    }

    /// Run a reconciliation pass in the background.
    pub fn spawn_reconcile(self: &Arc<Self>) -> JoinHandle<()> {
        let ctx = Arc::clone(self);
        tokio::spawn(async move {
            ctx.resolver.reconcile().await;
        })
    }

    /// Which emulator `vm` would be launched with right now.
    pub fn resolve_locator(&self, vm: &VmRecord) -> Resolution {
        let custom = self.settings.get().emulator_custom_path();
        let snapshot = self.snapshot.current();
        resolve_binary(&LocatorInputs {
            vm_override: vm.app_path.as_deref(),
            global_custom: custom.as_deref(),
            auto_detected: snapshot.local.auto_path.as_deref(),
            bundle_id: &self.config.emulator_bundle_id,
        })
    }

    pub async fn launch_vm(&self, index: usize, mode: LaunchMode) -> Result<LaunchOutcome, AppError> {
        let vm = self
            .registry()
            .await
            .get_vm(index)
            .await
            .ok_or(RegistryError::IndexOutOfRange(index))?;

        let resolution = self.resolve_locator(&vm);
        let pid = self.launcher.launch(&vm, &resolution.locator, mode).await?;
        Ok(LaunchOutcome { pid, resolution })
    }

    pub async fn templates(&self) -> anyhow::Result<Vec<VmTemplate>> {
        let dir = self.config.templates_dir.clone();
        Ok(tokio::task::spawn_blocking(move || provisioning::scan_templates(&dir)).await?)
    }

    /// Register a new VM and seed its folder. A template failure leaves the
    /// VM registered with whatever was copied so far.
    pub async fn create_vm(&self, request: NewVm) -> Result<(usize, VmRecord), AppError> {
        let template = match &request.template {
            Some(id) => Some(
                self.templates()
                    .await?
                    .into_iter()
                    .find(|t| &t.id == id)
                    .ok_or_else(|| AppError::UnknownTemplate(id.clone()))?,
            ),
            None => None,
        };

        let mut vm = VmRecord::new(request.name);
        vm.description = request.description;
        vm.logo = template.as_ref().and_then(|t| t.machine_logo.clone());

        let registry = self.registry().await;
        let index = registry.add_vm(vm).await?;
        let vm = registry
            .get_vm(index)
            .await
            .ok_or(RegistryError::IndexOutOfRange(index))?;

        if let (Some(template), Some(path)) = (template, vm.path.clone()) {
            let use_shader = request.use_shader;
            tokio::task::spawn_blocking(move || provisioning::apply_template(&template, &path, use_shader))
                .await
                .map_err(anyhow::Error::from)??;
        }

        Ok((index, vm))
    }

    async fn registered_paths(&self) -> HashSet<PathBuf> {
        self.registry()
            .await
            .list_vms()
            .await
            .into_iter()
            .filter_map(|vm| vm.path)
            .collect()
    }

    pub async fn scan_import(&self, root: PathBuf) -> anyhow::Result<Vec<ImportCandidate>> {
        let registered = self.registered_paths().await;
        self.scanner.scan(root, registered).await
    }

    /// Register an existing VM folder under its folder name.
    pub async fn import_vm(&self, dir: &Path) -> Result<usize, AppError> {
        let candidate = provisioning::candidate_for_dir(dir, &self.registered_paths().await)?;
        let index = self
            .registry()
            .await
            .add_vm(VmRecord::new(candidate.name).with_path(candidate.path))
            .await?;
        Ok(index)
    }

    /// Remove a VM from the list, optionally trashing its folder and disk images.
    pub async fn delete_vm(&self, index: usize, trash_files: bool) -> Result<VmRecord, AppError> {
        let removed = self.registry().await.remove_vm(index).await?;

        if trash_files {
            if let Some(path) = removed.path.clone() {
                tokio::task::spawn_blocking(move || provisioning::trash_vm_files(&path))
                    .await
                    .map_err(anyhow::Error::from)??;
            }
        }
        Ok(removed)
    }

    pub async fn vm_specs(&self, index: usize) -> Result<MachineSpecs, AppError> {
        let vm = self
            .registry()
            .await
            .get_vm(index)
            .await
            .ok_or(RegistryError::IndexOutOfRange(index))?;
        let path = vm.path.ok_or(LaunchError::NoPath(vm.name))?;
        Ok(self.specs.summarize(&derive_config_path(&path)))
    }

    /// Apply a settings change. Relocating the home reopens the registry;
    /// path or channel changes trigger a reconciliation pass.
    pub async fn update_settings<F>(self: &Arc<Self>, change: F) -> anyhow::Result<Settings>
    where
        F: FnOnce(&mut Settings),
    {
        let before = self.settings.get();
        let after = self.settings.update(change)?;

        if before.vm_home != after.vm_home {
            let home = self.config.effective_home(after.vm_home.as_deref());
            let registry = match JsonRegistry::open(&home).await {
                Ok(registry) => registry,
                Err(e) => {
                    warn!(home = %home.display(), error = %e, "Registry home unusable, keeping the previous one");
                    let previous = before.vm_home.clone();
                    self.settings.update(|s| s.vm_home = previous)?;
                    return Err(e);
                }
            };
            info!(document = %registry.document_path().display(), "Registry home relocated");
            let registry: Arc<dyn Registry> = Arc::new(registry);
            *self.registry.write().await = registry;
        }

        if before.update_channel != after.update_channel
            || before.emulator_path != after.emulator_path
            || before.vm_home != after.vm_home
        {
            self.spawn_reconcile();
        }
        Ok(after)
    }

    pub fn start_update(self: &Arc<Self>, kind: JobKind) -> Result<JobHandle, AppError> {
        Ok(self.installer.start(kind)?)
    }

    /// Ask the daemon to exit; the updated manager is started once it has
    /// stopped serving (see `finish_relaunch`).
    pub fn request_relaunch(&self) -> anyhow::Result<()> {
        let bundle = self.installer.manager_bundle();
        if !bundle.exists() {
            anyhow::bail!("Manager bundle {} does not exist", bundle.display());
        }
        self.relaunch_requested.store(true, Ordering::SeqCst);
        self.shutdown.notify_one();
        Ok(())
    }

    /// Start the updated manager if a relaunch was requested.
    /// Returns whether one was started.
    pub fn finish_relaunch(&self) -> anyhow::Result<bool> {
        if !self.relaunch_requested.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.installer.relaunch(&self.config.launch_command)?;
        Ok(true)
    }

    /// Resolves once a shutdown has been requested from inside the daemon.
    pub async fn shutdown_requested(&self) {
        self.shutdown.notified().await
    }

    /// Teardown: cancel outstanding jobs and scans.
    pub fn teardown(&self) {
        let jobs = self.installer.cancel_all();
        let scanning = self.scanner.cancel();
        if jobs > 0 || scanning {
            warn!(jobs, scanning, "Cancelled outstanding work");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{OfflineFeeds, test_config};
    use tempfile::TempDir;

    async fn context(temp_dir: &TempDir) -> Arc<AppContext> {
        AppContext::with_feeds(test_config(temp_dir.path()), Arc::new(OfflineFeeds))
            .await
            .unwrap()
    }

    #[test]
    fn test_manager_bundle_from_exe() {
        assert_eq!(
            manager_bundle_from_exe(Path::new("/Applications/BoxKeeper.app/Contents/MacOS/boxkeeper")),
            PathBuf::from("/Applications/BoxKeeper.app")
        );
        assert_eq!(
            manager_bundle_from_exe(Path::new("/usr/local/bin/boxkeeper")),
            PathBuf::from("/usr/local/bin/boxkeeper")
        );
    }

    #[tokio::test]
    async fn test_create_from_template() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = context(&temp_dir).await;
        let template_dir = ctx.config.templates_dir.join("xt");
        std::fs::create_dir_all(&template_dir).unwrap();
        std::fs::write(
            template_dir.join(provisioning::templates::TEMPLATE_INFO_FILE),
            "[General]\nDescription = IBM PC/XT\nYear = 1982\nLogo = ibm\n",
        )
        .unwrap();
        std::fs::write(
            template_dir.join("86box.cfg"),
            "[Machine]\nmachine = ibmxt\ncpu_family = 8088\ncpu_speed = 4772728\nmem_size = 640\n",
        )
        .unwrap();

        let (index, vm) = ctx
            .create_vm(NewVm {
                name: "My XT".to_string(),
                template: Some("xt".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(index, 0);
        assert_eq!(vm.logo.as_deref(), Some("ibm"));
        let specs = ctx.vm_specs(index).await.unwrap();
        assert_eq!(specs.machine, "[8088] IBM XT (1982)");
        assert_eq!(specs.cpu, "Intel 8088 4.77 MHz");
        assert_eq!(specs.hdd, "No HDD");
    }

    #[tokio::test]
    async fn test_unknown_template_registers_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = context(&temp_dir).await;

        let result = ctx
            .create_vm(NewVm {
                name: "Ghost".to_string(),
                template: Some("missing".to_string()),
                ..Default::default()
            })
            .await;
        assert!(matches!(result, Err(AppError::UnknownTemplate(_))));
        assert!(ctx.registry().await.list_vms().await.is_empty());
    }

    #[tokio::test]
    async fn test_import_then_scan_skips_it() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = context(&temp_dir).await;
        let old = temp_dir.path().join("old-vms");
        for name in ["Tandy", "Compaq"] {
            std::fs::create_dir_all(old.join(name)).unwrap();
            std::fs::write(old.join(name).join("86box.cfg"), "").unwrap();
        }

        ctx.import_vm(&old.join("Tandy")).await.unwrap();
        assert!(matches!(
            ctx.import_vm(&old.join("Tandy")).await,
            Err(AppError::Import(ImportError::AlreadyRegistered(_)))
        ));

        let found = ctx.scan_import(old.clone()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Compaq");
    }

    #[tokio::test]
    async fn test_delete_with_trash() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = context(&temp_dir).await;
        let (index, vm) = ctx
            .create_vm(NewVm {
                name: "Scratch".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let path = vm.path.unwrap();
        assert!(path.join("disks").is_dir());

        let removed = ctx.delete_vm(index, true).await.unwrap();
        assert_eq!(removed.name, "Scratch");
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_relocating_home_reopens_registry() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = context(&temp_dir).await;
        ctx.create_vm(NewVm {
            name: "First".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

        let new_home = temp_dir.path().join("elsewhere");
        ctx.update_settings(|s| s.vm_home = Some(new_home.clone())).await.unwrap();

        assert!(ctx.registry().await.list_vms().await.is_empty());
        assert!(new_home.join("Config").is_file());
    }

    #[tokio::test]
    async fn test_unusable_home_keeps_previous_registry() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = context(&temp_dir).await;
        ctx.create_vm(NewVm {
            name: "First".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

        let blocker = temp_dir.path().join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();
        let result = ctx.update_settings(|s| s.vm_home = Some(blocker.join("home"))).await;

        assert!(result.is_err());
        assert_eq!(ctx.settings.get().vm_home, None);
        let stored = SettingsStore::load(ctx.settings.path());
        assert_eq!(stored.get().vm_home, None);
        assert_eq!(ctx.registry().await.list_vms().await.len(), 1);
    }

    #[tokio::test]
    async fn test_relaunch_waits_for_shutdown() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = context(&temp_dir).await;

        assert!(ctx.request_relaunch().is_err());
        assert!(!ctx.finish_relaunch().unwrap());

        std::fs::create_dir_all(ctx.installer.manager_bundle()).unwrap();
        ctx.request_relaunch().unwrap();
        tokio::time::timeout(Duration::from_secs(1), ctx.shutdown_requested())
            .await
            .expect("shutdown not requested");
        assert!(ctx.finish_relaunch().unwrap());
    }

    #[tokio::test]
    async fn test_resolve_locator_falls_back_to_bundle_id() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = context(&temp_dir).await;

        let resolution = ctx.resolve_locator(&VmRecord::new("XT"));
        assert_eq!(
            resolution.locator,
            crate::launcher::Locator::BundleId("net.86Box.86Box".to_string())
        );
    }
}

// SPDX-License-Identifier: GPL-3.0-only
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Remote endpoints queried by the version resolver and installer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Stable channel: latest emulator release
    pub emulator_release_url: String,

    /// Experimental channel: latest successful CI job
    pub emulator_ci_url: String,

    /// Prefix joined with CI artifact relative paths
    pub emulator_ci_artifact_base: String,

    /// Latest commit on the ROM repository branch
    pub roms_commit_url: String,

    /// Archive of the ROM repository branch
    pub roms_archive_url: String,

    /// Latest release of this manager
    pub manager_release_url: String,

    /// Probed once before a reconciliation pass
    pub connectivity_url: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            emulator_release_url: "https://api.github.com/repos/86Box/86Box/releases/latest".into(),
            emulator_ci_url: "https://ci.86box.net/job/86Box/lastSuccessfulBuild/api/json".into(),
            emulator_ci_artifact_base: "https://ci.86box.net/job/86Box/lastSuccessfulBuild/artifact/".into(),
            roms_commit_url: "https://api.github.com/repos/86Box/roms/commits/master".into(),
            roms_archive_url: "https://api.github.com/repos/86Box/roms/zipball/master".into(),
            manager_release_url: "https://api.github.com/repos/Moonif/MacBox/releases/latest".into(),
            connectivity_url: "https://api.github.com".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Default registry home (VM folders, registry document, scratch space)
    pub home_dir: PathBuf,

    /// TOML file holding user settings
    pub settings_path: PathBuf,

    /// Local API bind address (e.g., "127.0.0.1:8086")
    pub local_api_bind: SocketAddr,

    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Emit JSON log lines instead of the human-readable format
    #[serde(default)]
    pub log_json: bool,

    /// Bundle identifier of the emulator application
    pub emulator_bundle_id: String,

    /// Directories scanned for installed application bundles
    pub app_search_dirs: Vec<PathBuf>,

    /// Per-user application data directory; ROMs are installed below it
    #[serde(default = "default_app_support_dir")]
    pub app_support_dir: PathBuf,

    /// Directory holding bundled VM templates
    pub templates_dir: PathBuf,

    /// Optional replacement for the bundled machine/CPU name table
    #[serde(default)]
    pub namedefs_path: Option<PathBuf>,

    /// Program used to start the emulator (`open` on macOS)
    pub launch_command: PathBuf,

    /// Per-request timeout for feed queries
    pub feed_timeout_secs: u64,

    /// Bundle replaced by a self-update; defaults to the running executable
    #[serde(default)]
    pub manager_bundle_path: Option<PathBuf>,

    #[serde(default)]
    pub feeds: FeedConfig,
}

impl Config {
    /// Load configuration from TOML file with environment variable overrides
    pub fn load() -> anyhow::Result<Self> {
        let config_path = std::env::var("BOXKEEPER_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
        Self::load_with(Path::new(&config_path), |key| std::env::var(key).ok())
    }

    /// Load from `config_path` (defaults when absent), then apply overrides
    /// looked up through `env`.
    pub fn load_with<F>(config_path: &Path, env: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config: Config = if config_path.exists() {
            let contents = std::fs::read_to_string(config_path)?;
            toml::from_str(&contents)?
        } else {
            Config::default()
        };

        if let Some(val) = env("BOXKEEPER_HOME_DIR") {
            config.home_dir = PathBuf::from(val);
        }
        if let Some(val) = env("BOXKEEPER_SETTINGS_PATH") {
            config.settings_path = PathBuf::from(val);
        }
        if let Some(val) = env("BOXKEEPER_LOCAL_API_BIND") {
            config.local_api_bind = SocketAddr::from_str(&val)?;
        }
        if let Some(val) = env("BOXKEEPER_LOG_LEVEL") {
            config.log_level = val;
        }
        if let Some(val) = env("BOXKEEPER_LOG_JSON") {
            config.log_json = val.parse()?;
        }
        if let Some(val) = env("BOXKEEPER_TEMPLATES_DIR") {
            config.templates_dir = PathBuf::from(val);
        }
        if let Some(val) = env("BOXKEEPER_LAUNCH_COMMAND") {
            config.launch_command = PathBuf::from(val);
        }
        if let Some(val) = env("BOXKEEPER_FEED_TIMEOUT_SECS") {
            config.feed_timeout_secs = val.parse()?;
        }
        if let Some(val) = env("BOXKEEPER_EMULATOR_BUNDLE_ID") {
            config.emulator_bundle_id = val;
        }
        if let Some(val) = env("BOXKEEPER_APP_SEARCH_DIRS") {
            config.app_search_dirs = std::env::split_paths(&val).collect();
        }
        if let Some(val) = env("BOXKEEPER_APP_SUPPORT_DIR") {
            config.app_support_dir = PathBuf::from(val);
        }
        if let Some(val) = env("BOXKEEPER_NAMEDEFS_PATH") {
            config.namedefs_path = Some(PathBuf::from(val));
        }
        if let Some(val) = env("BOXKEEPER_MANAGER_BUNDLE_PATH") {
            config.manager_bundle_path = Some(PathBuf::from(val));
        }

        let feeds = &mut config.feeds;
        for (key, field) in [
            ("BOXKEEPER_FEEDS_EMULATOR_RELEASE_URL", &mut feeds.emulator_release_url),
            ("BOXKEEPER_FEEDS_EMULATOR_CI_URL", &mut feeds.emulator_ci_url),
            ("BOXKEEPER_FEEDS_EMULATOR_CI_ARTIFACT_BASE", &mut feeds.emulator_ci_artifact_base),
            ("BOXKEEPER_FEEDS_ROMS_COMMIT_URL", &mut feeds.roms_commit_url),
            ("BOXKEEPER_FEEDS_ROMS_ARCHIVE_URL", &mut feeds.roms_archive_url),
            ("BOXKEEPER_FEEDS_MANAGER_RELEASE_URL", &mut feeds.manager_release_url),
            ("BOXKEEPER_FEEDS_CONNECTIVITY_URL", &mut feeds.connectivity_url),
        ] {
            if let Some(val) = env(key) {
                *field = val;
            }
        }

        Ok(config)
    }

    /// Registry home, honoring the user's relocation setting
    pub fn effective_home(&self, vm_home: Option<&Path>) -> PathBuf {
        vm_home.map(Path::to_path_buf).unwrap_or_else(|| self.home_dir.clone())
    }

    /// Scratch space for downloads and unpacking
    pub fn scratch_dir(home: &Path) -> PathBuf {
        home.join("tmp")
    }
}

fn user_home() -> PathBuf {
    home::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

fn default_app_support_dir() -> PathBuf {
    user_home().join("Library").join("Application Support")
}

impl Default for Config {
    fn default() -> Self {
        let home = user_home();
        Self {
            home_dir: home.join("BoxKeeper"),
            settings_path: home.join(".boxkeeper").join("settings.toml"),
            local_api_bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8086),
            log_level: String::from("info"),
            log_json: false,
            emulator_bundle_id: String::from("net.86Box.86Box"),
            app_search_dirs: vec![PathBuf::from("/Applications"), home.join("Applications")],
            app_support_dir: default_app_support_dir(),
            templates_dir: PathBuf::from("resources/templates"),
            namedefs_path: None,
            launch_command: PathBuf::from("/usr/bin/open"),
            feed_timeout_secs: 5,
            manager_bundle_path: None,
            feeds: FeedConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::NamedTempFile;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.home_dir.ends_with("BoxKeeper"));
        assert_eq!(config.local_api_bind, SocketAddr::from_str("127.0.0.1:8086").unwrap());
        assert_eq!(config.emulator_bundle_id, "net.86Box.86Box");
        assert_eq!(config.feed_timeout_secs, 5);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.feeds, FeedConfig::default());
    }

    #[test]
    fn test_load_missing_config_file() {
        let config = Config::load_with(Path::new("/nonexistent/boxkeeper.toml"), no_env).unwrap();
        assert_eq!(config.launch_command, PathBuf::from("/usr/bin/open"));
        assert_eq!(config.manager_bundle_path, None);
    }

    #[test]
    fn test_load_from_toml() {
        let temp_file = NamedTempFile::new().unwrap();
        let config_content = r#"
home_dir = "/custom/home"
settings_path = "/custom/settings.toml"
local_api_bind = "0.0.0.0:9000"
log_level = "debug"
emulator_bundle_id = "org.example.emu"
app_search_dirs = ["/opt/apps"]
templates_dir = "/custom/templates"
launch_command = "/usr/local/bin/open"
feed_timeout_secs = 3

[feeds]
emulator_release_url = "http://feeds.example.com/release"
"#;
        fs::write(temp_file.path(), config_content).unwrap();

        let config = Config::load_with(temp_file.path(), no_env).unwrap();
        assert_eq!(config.home_dir, PathBuf::from("/custom/home"));
        assert_eq!(config.settings_path, PathBuf::from("/custom/settings.toml"));
        assert_eq!(config.local_api_bind, SocketAddr::from_str("0.0.0.0:9000").unwrap());
        assert_eq!(config.emulator_bundle_id, "org.example.emu");
        assert_eq!(config.app_search_dirs, vec![PathBuf::from("/opt/apps")]);
        assert_eq!(config.feed_timeout_secs, 3);
        assert!(config.app_support_dir.ends_with("Application Support"));
        assert_eq!(config.feeds.emulator_release_url, "http://feeds.example.com/release");
        // Unspecified feed URLs keep their defaults
        assert_eq!(config.feeds.roms_archive_url, FeedConfig::default().roms_archive_url);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("BOXKEEPER_HOME_DIR", "/env/home"),
            ("BOXKEEPER_LOCAL_API_BIND", "192.168.1.1:9090"),
            ("BOXKEEPER_LOG_LEVEL", "trace"),
            ("BOXKEEPER_FEED_TIMEOUT_SECS", "12"),
        ]);
        let env = |key: &str| vars.get(key).map(|v| v.to_string());

        let config = Config::load_with(Path::new("/nonexistent/boxkeeper.toml"), env).unwrap();
        assert_eq!(config.home_dir, PathBuf::from("/env/home"));
        assert_eq!(config.local_api_bind, SocketAddr::from_str("192.168.1.1:9090").unwrap());
        assert_eq!(config.log_level, "trace");
        assert_eq!(config.feed_timeout_secs, 12);
    }

    #[test]
    fn test_env_overrides_paths_and_feeds() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("BOXKEEPER_EMULATOR_BUNDLE_ID", "org.example.emu"),
            ("BOXKEEPER_APP_SEARCH_DIRS", "/opt/apps:/srv/apps"),
            ("BOXKEEPER_APP_SUPPORT_DIR", "/env/support"),
            ("BOXKEEPER_NAMEDEFS_PATH", "/env/namedefs.toml"),
            ("BOXKEEPER_MANAGER_BUNDLE_PATH", "/env/BoxKeeper.app"),
            ("BOXKEEPER_FEEDS_EMULATOR_RELEASE_URL", "http://127.0.0.1:1/release"),
            ("BOXKEEPER_FEEDS_ROMS_ARCHIVE_URL", "http://127.0.0.1:1/roms.zip"),
            ("BOXKEEPER_FEEDS_CONNECTIVITY_URL", "http://127.0.0.1:1/"),
        ]);
        let env = |key: &str| vars.get(key).map(|v| v.to_string());

        let config = Config::load_with(Path::new("/nonexistent/boxkeeper.toml"), env).unwrap();
        assert_eq!(config.emulator_bundle_id, "org.example.emu");
        assert_eq!(
            config.app_search_dirs,
            vec![PathBuf::from("/opt/apps"), PathBuf::from("/srv/apps")]
        );
        assert_eq!(config.app_support_dir, PathBuf::from("/env/support"));
        assert_eq!(config.namedefs_path, Some(PathBuf::from("/env/namedefs.toml")));
        assert_eq!(config.manager_bundle_path, Some(PathBuf::from("/env/BoxKeeper.app")));
        assert_eq!(config.feeds.emulator_release_url, "http://127.0.0.1:1/release");
        assert_eq!(config.feeds.roms_archive_url, "http://127.0.0.1:1/roms.zip");
        assert_eq!(config.feeds.connectivity_url, "http://127.0.0.1:1/");
        assert_eq!(config.feeds.roms_commit_url, FeedConfig::default().roms_commit_url);
    }

    #[test]
    fn test_invalid_env_override_is_error() {
        let env = |key: &str| (key == "BOXKEEPER_FEED_TIMEOUT_SECS").then(|| "soon".to_string());
        assert!(Config::load_with(Path::new("/nonexistent/boxkeeper.toml"), env).is_err());
    }

    #[test]
    fn test_effective_home() {
        let config = Config::default();
        assert_eq!(config.effective_home(None), config.home_dir);
        assert_eq!(
            config.effective_home(Some(Path::new("/Volumes/VMs"))),
            PathBuf::from("/Volumes/VMs")
        );
        assert_eq!(Config::scratch_dir(Path::new("/h")), PathBuf::from("/h/tmp"));
    }
}

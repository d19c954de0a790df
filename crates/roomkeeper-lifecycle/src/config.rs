use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use roomkeeper_core::UserId;
use serde::Deserialize;

use crate::allowed::AllowedSurfaces;
use crate::error::LifecycleError;
use crate::json_file;
use crate::reconcile::ReconcileSettings;
use crate::registry::RegistryStore;

pub const CONFIG_FILE_NAME: &str = "roomkeeper.toml";
pub const ADMIN_IDS_ENV: &str = "ROOMKEEPER_ADMIN_IDS";
pub const GATEWAY_TOKEN_ENV: &str = "ROOMKEEPER_GATEWAY_TOKEN";

#[derive(Debug, Default, Deserialize)]
pub struct RoomkeeperConfig {
    /// Users allowed to run the allowed-surface commands.
    #[serde(default)]
    pub admins: Vec<UserId>,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
}

#[derive(Debug, Deserialize)]
pub struct LifecycleConfig {
    #[serde(default = "default_idle_threshold_secs")]
    pub idle_threshold_secs: u64,
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    #[serde(default = "default_confirm_timeout_secs")]
    pub confirm_timeout_secs: u64,
    #[serde(default = "default_adapter_timeout_secs")]
    pub adapter_timeout_secs: u64,
}

fn default_idle_threshold_secs() -> u64 {
    600
}
fn default_tick_interval_secs() -> u64 {
    60
}
fn default_confirm_timeout_secs() -> u64 {
    60
}
fn default_adapter_timeout_secs() -> u64 {
    10
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            idle_threshold_secs: default_idle_threshold_secs(),
            tick_interval_secs: default_tick_interval_secs(),
            confirm_timeout_secs: default_confirm_timeout_secs(),
            adapter_timeout_secs: default_adapter_timeout_secs(),
        }
    }
}

impl LifecycleConfig {
    pub fn reconcile_settings(&self) -> ReconcileSettings {
        ReconcileSettings {
            tick_interval: Duration::from_secs(self.tick_interval_secs),
            idle_threshold: chrono::Duration::seconds(self.idle_threshold_secs as i64),
            adapter_timeout: self.adapter_timeout(),
        }
    }

    pub fn confirm_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.confirm_timeout_secs as i64)
    }

    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_secs(self.adapter_timeout_secs)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StorageConfig {
    /// Directory holding rooms.json and allowed_surfaces.json.
    pub dir: Option<PathBuf>,
}

impl StorageConfig {
    pub fn dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(json_file::default_dir)
    }

    pub fn rooms_path(&self) -> PathBuf {
        self.dir().join("rooms.json")
    }

    pub fn allowed_surfaces_path(&self) -> PathBuf {
        self.dir().join("allowed_surfaces.json")
    }

    pub fn open_registry(&self) -> RegistryStore {
        RegistryStore::open(self.rooms_path())
    }

    pub fn open_allowed_surfaces(&self) -> AllowedSurfaces {
        AllowedSurfaces::new(self.allowed_surfaces_path())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum ProviderKind {
    /// REST chat-gateway sidecar.
    #[serde(rename = "http")]
    Http,
    /// In-process rooms, nothing leaves the process.
    #[default]
    #[serde(rename = "memory")]
    Memory,
}

#[derive(Debug, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub kind: ProviderKind,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    pub token: Option<String>,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8787".into()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            base_url: default_base_url(),
            token: None,
        }
    }
}

impl ProviderConfig {
    /// Configured token, else `ROOMKEEPER_GATEWAY_TOKEN`.
    pub fn resolved_token(&self) -> Option<String> {
        self.token
            .clone()
            .or_else(|| std::env::var(GATEWAY_TOKEN_ENV).ok())
            .filter(|t| !t.is_empty())
    }
}

impl RoomkeeperConfig {
    pub fn from_file(path: &Path) -> Result<Self, LifecycleError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Look for `roomkeeper.toml` in the working directory, then in
    /// ~/.config/roomkeeper/.
    pub fn find() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.is_file() {
            return Some(local);
        }
        dirs::home_dir()
            .map(|home| home.join(".config").join("roomkeeper").join(CONFIG_FILE_NAME))
            .filter(|path| path.is_file())
    }

    /// Load `explicit` if given, otherwise the first config found, otherwise
    /// the defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, LifecycleError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        match Self::find() {
            Some(path) => {
                tracing::debug!(path = %path.display(), "Using config file");
                Self::from_file(&path)
            }
            None => {
                tracing::debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn validate(&self) -> Result<(), LifecycleError> {
        let lifecycle = &self.lifecycle;
        for (name, value) in [
            ("lifecycle.idle_threshold_secs", lifecycle.idle_threshold_secs),
            ("lifecycle.tick_interval_secs", lifecycle.tick_interval_secs),
            ("lifecycle.confirm_timeout_secs", lifecycle.confirm_timeout_secs),
            ("lifecycle.adapter_timeout_secs", lifecycle.adapter_timeout_secs),
        ] {
            if value == 0 {
                return Err(LifecycleError::ConfigError(format!("{name} must be greater than 0")));
            }
        }
        if self.provider.kind == ProviderKind::Http && self.provider.base_url.trim().is_empty() {
            return Err(LifecycleError::ConfigError(
                "provider.base_url is required for the http provider".into(),
            ));
        }
        Ok(())
    }

    /// Configured admins merged with `ROOMKEEPER_ADMIN_IDS`.
    pub fn admin_set(&self) -> AdminSet {
        let from_env = std::env::var(ADMIN_IDS_ENV).unwrap_or_default();
        AdminSet::new(self.admins.iter().copied().chain(AdminSet::parse_list(&from_env)))
    }
}

/// Users allowed to run admin-only commands. Fixed at startup.
#[derive(Debug, Clone, Default)]
pub struct AdminSet(HashSet<UserId>);

impl AdminSet {
    pub fn new(ids: impl IntoIterator<Item = UserId>) -> Self {
        Self(ids.into_iter().collect())
    }

    /// Parse a comma-separated id list. Blank entries are ignored, invalid
    /// ones are logged and skipped.
    pub fn parse_list(raw: &str) -> Vec<UserId> {
        raw.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .filter_map(|part| match part.parse::<u64>() {
                Ok(id) => Some(UserId(id)),
                Err(_) => {
                    tracing::warn!(entry = part, "Ignoring invalid admin id");
                    None
                }
            })
            .collect()
    }

    pub fn contains(&self, user: UserId) -> bool {
        self.0.contains(&user)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

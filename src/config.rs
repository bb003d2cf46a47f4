//! Settings parsing, validation, and persistence.
//!
//! Settings live in a TOML file selected with `--config`. Both the capture
//! client and the vault sync client go through a [`SettingsStore`] and read
//! it fresh at the start of every operation, so a value changed between two
//! captures is always picked up.
//!
//! ```toml
//! [api]
//! base = "http://localhost:8000"
//! key = "devkey"
//!
//! [vault]
//! path = "./vault"
//! subfolder = "ZgrWise"
//! ```

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::sync::RwLock;

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct ApiConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct VaultConfig {
    #[serde(default = "default_vault_path")]
    pub path: PathBuf,
    #[serde(default = "default_subfolder")]
    pub subfolder: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            path: default_vault_path(),
            subfolder: default_subfolder(),
        }
    }
}

fn default_vault_path() -> PathBuf {
    PathBuf::from(".")
}
fn default_subfolder() -> String {
    "ZgrWise".to_string()
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct HttpConfig {
    /// Request timeout. Unset means the transport default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct NotifierConfig {
    #[serde(default = "default_dismiss_ms")]
    pub dismiss_ms: u64,
    #[serde(default = "default_fade_ms")]
    pub fade_ms: u64,
    #[serde(default = "default_flash_ms")]
    pub flash_ms: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            dismiss_ms: default_dismiss_ms(),
            fade_ms: default_fade_ms(),
            flash_ms: default_flash_ms(),
        }
    }
}

fn default_dismiss_ms() -> u64 {
    3000
}
fn default_fade_ms() -> u64 {
    300
}
fn default_flash_ms() -> u64 {
    1000
}

/// Base URL and key needed before any write or pull may start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiCredentials {
    pub base: String,
    pub key: String,
}

impl Settings {
    /// Both API values, or `None` if either is missing or blank.
    pub fn api_credentials(&self) -> Option<ApiCredentials> {
        let base = self.api.base.as_deref().map(str::trim).unwrap_or("");
        let key = self.api.key.as_deref().map(str::trim).unwrap_or("");
        if base.is_empty() || key.is_empty() {
            return None;
        }
        Some(ApiCredentials {
            base: base.to_string(),
            key: key.to_string(),
        })
    }

    pub fn get(&self, key: SettingKey) -> Option<String> {
        match key {
            SettingKey::ApiBase => self.api.base.clone(),
            SettingKey::ApiKey => self.api.key.clone(),
            SettingKey::VaultPath => Some(self.vault.path.display().to_string()),
            SettingKey::VaultSubfolder => Some(self.vault.subfolder.clone()),
            SettingKey::HttpTimeoutSecs => self.http.timeout_secs.map(|t| t.to_string()),
        }
    }

    /// Set a single value. Values are trimmed; an empty value clears
    /// optional settings.
    pub fn set(&mut self, key: SettingKey, value: &str) -> Result<()> {
        let value = value.trim();
        let optional = if value.is_empty() {
            None
        } else {
            Some(value.to_string())
        };
        match key {
            SettingKey::ApiBase => self.api.base = optional,
            SettingKey::ApiKey => self.api.key = optional,
            SettingKey::VaultPath => self.vault.path = PathBuf::from(value),
            SettingKey::VaultSubfolder => self.vault.subfolder = value.to_string(),
            SettingKey::HttpTimeoutSecs => {
                self.http.timeout_secs = match optional {
                    Some(v) => Some(
                        v.parse()
                            .with_context(|| format!("httpTimeoutSecs must be a number: '{}'", v))?,
                    ),
                    None => None,
                }
            }
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(base) = self.api.base.as_deref().map(str::trim) {
            if !base.is_empty() {
                let parsed = url::Url::parse(base)
                    .with_context(|| format!("api.base is not a valid URL: '{}'", base))?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    bail!("api.base must use http or https, got '{}'", parsed.scheme());
                }
            }
        }

        if self.vault.subfolder.trim().is_empty() {
            bail!("vault.subfolder must not be empty");
        }
        let subfolder = Path::new(&self.vault.subfolder);
        if subfolder
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            bail!(
                "vault.subfolder must be a relative path inside the vault: '{}'",
                self.vault.subfolder
            );
        }

        if self.http.timeout_secs == Some(0) {
            bail!("http.timeout_secs must be > 0");
        }
        if self.notifier.dismiss_ms == 0 {
            bail!("notifier.dismiss_ms must be > 0");
        }

        Ok(())
    }
}

/// The persisted keys, named as the settings surfaces name them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKey {
    ApiBase,
    ApiKey,
    VaultPath,
    VaultSubfolder,
    HttpTimeoutSecs,
}

impl SettingKey {
    pub const ALL: [SettingKey; 5] = [
        SettingKey::ApiBase,
        SettingKey::ApiKey,
        SettingKey::VaultPath,
        SettingKey::VaultSubfolder,
        SettingKey::HttpTimeoutSecs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SettingKey::ApiBase => "apiBase",
            SettingKey::ApiKey => "apiKey",
            SettingKey::VaultPath => "vaultPath",
            SettingKey::VaultSubfolder => "vaultSubfolder",
            SettingKey::HttpTimeoutSecs => "httpTimeoutSecs",
        }
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SettingKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        SettingKey::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Unknown setting: '{}'. Must be one of apiBase, apiKey, vaultPath, vaultSubfolder, httpTimeoutSecs.",
                    s
                )
            })
    }
}

/// Key-value settings persistence.
///
/// Implementations must not cache across calls: every `load` returns what
/// is stored right now.
pub trait SettingsStore: Send + Sync {
    fn load(&self) -> Result<Settings>;

    fn save(&self, settings: &Settings) -> Result<()>;

    fn get(&self, key: SettingKey) -> Result<Option<String>> {
        Ok(self.load()?.get(key))
    }

    fn set(&self, key: SettingKey, value: &str) -> Result<()> {
        let mut settings = self.load()?;
        settings.set(key, value)?;
        self.save(&settings)
    }
}

/// Settings stored in a TOML file on disk.
pub struct TomlSettingsStore {
    path: PathBuf,
}

impl TomlSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for TomlSettingsStore {
    fn load(&self) -> Result<Settings> {
        if !self.path.exists() {
            tracing::debug!("settings file not found at {:?}, using defaults", self.path);
            return Ok(Settings::default());
        }
        load_settings(&self.path)
    }

    /// Atomic write: serialize to a sibling temp file, then rename over.
    fn save(&self, settings: &Settings) -> Result<()> {
        settings.validate()?;
        let content = toml::to_string_pretty(settings).context("Failed to serialize settings")?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create settings directory: {}", parent.display())
                })?;
            }
        }

        let tmp = self.path.with_extension("toml.tmp");
        std::fs::write(&tmp, content)
            .with_context(|| format!("Failed to write settings file: {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace settings file: {}", self.path.display()))?;
        tracing::debug!("saved settings to {:?}", self.path);
        Ok(())
    }
}

/// In-process settings, for embedded hosts and tests.
#[derive(Default)]
pub struct MemorySettingsStore {
    inner: RwLock<Settings>,
}

impl MemorySettingsStore {
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: RwLock::new(settings),
        }
    }

    /// Shortcut for a store holding just API credentials.
    pub fn with_api(base: &str, key: &str) -> Self {
        let mut settings = Settings::default();
        settings.api.base = Some(base.to_string());
        settings.api.key = Some(key.to_string());
        Self::new(settings)
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self) -> Result<Settings> {
        self.inner
            .read()
            .map(|s| s.clone())
            .map_err(|_| anyhow::anyhow!("settings lock poisoned"))
    }

    fn save(&self, settings: &Settings) -> Result<()> {
        settings.validate()?;
        let mut guard = self
            .inner
            .write()
            .map_err(|_| anyhow::anyhow!("settings lock poisoned"))?;
        *guard = settings.clone();
        Ok(())
    }
}

/// `zgw config get <key>`.
pub fn run_config_get(store: &dyn SettingsStore, key: &str) -> Result<()> {
    let key: SettingKey = key.parse()?;
    match store.get(key)? {
        Some(value) => println!("{}", value),
        None => bail!("{} is not set", key),
    }
    Ok(())
}

/// `zgw config set <key> <value>`.
pub fn run_config_set(store: &dyn SettingsStore, key: &str, value: &str) -> Result<()> {
    let key: SettingKey = key.parse()?;
    store.set(key, value)?;
    println!("Settings saved successfully!");
    Ok(())
}

pub fn load_settings(path: &Path) -> Result<Settings> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let settings: Settings =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    settings.validate()?;
    Ok(settings)
}

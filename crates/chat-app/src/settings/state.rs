use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use deskchat_render::RenderSettings;
use deskchat_transport::{DEFAULT_CHAT_METHOD, DEFAULT_EMBEDDINGS_METHOD, TransportConfig};
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

pub const DEFAULT_ENDPOINT: &str = "http://localhost:8000";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_EMBEDDINGS_TIMEOUT_SECS: u64 = 900;
pub const DEFAULT_GREETING: &str =
    "Hello! I can help you find information in your ERP. What would you like to know?";
pub const SETTINGS_DIRECTORY_NAME: &str = "deskchat";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const SETTINGS_ENV_PREFIX: &str = "DESKCHAT_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSettings {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    #[serde(default = "default_chat_method")]
    pub chat_method: String,
    #[serde(default = "default_embeddings_method")]
    pub embeddings_method: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_embeddings_timeout_secs")]
    pub embeddings_timeout_secs: u64,
    #[serde(default = "default_greeting")]
    pub greeting: String,
    #[serde(default)]
    pub render: RenderSettings,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: String::new(),
            api_secret: String::new(),
            chat_method: default_chat_method(),
            embeddings_method: default_embeddings_method(),
            request_timeout_secs: default_request_timeout_secs(),
            embeddings_timeout_secs: default_embeddings_timeout_secs(),
            greeting: default_greeting(),
            render: RenderSettings::default(),
        }
    }
}

impl ChatSettings {
    pub fn to_transport_config(&self) -> TransportConfig {
        TransportConfig::new(&self.endpoint)
            .with_credentials(&self.api_key, &self.api_secret)
            .with_chat_method(&self.chat_method)
            .with_embeddings_method(&self.embeddings_method)
            .with_request_timeout(Duration::from_secs(self.request_timeout_secs))
            .with_embeddings_timeout(Duration::from_secs(self.embeddings_timeout_secs))
    }

    pub fn has_credentials(&self) -> bool {
        !self.api_key.trim().is_empty() && !self.api_secret.trim().is_empty()
    }

    pub fn normalized(mut self) -> Self {
        self.endpoint = non_empty_or(&self.endpoint, default_endpoint)
            .trim_end_matches('/')
            .to_string();
        self.api_key = self.api_key.trim().to_string();
        self.api_secret = self.api_secret.trim().to_string();
        self.chat_method = non_empty_or(&self.chat_method, default_chat_method);
        self.embeddings_method = non_empty_or(&self.embeddings_method, default_embeddings_method);
        if self.request_timeout_secs == 0 {
            self.request_timeout_secs = default_request_timeout_secs();
        }
        if self.embeddings_timeout_secs == 0 {
            self.embeddings_timeout_secs = default_embeddings_timeout_secs();
        }
        self.greeting = non_empty_or(&self.greeting, default_greeting);
        self.render.route_prefix = self.render.route_prefix.trim().to_string();
        self
    }
}

fn non_empty_or(value: &str, fallback: fn() -> String) -> String {
    let value = value.trim();
    if value.is_empty() {
        fallback()
    } else {
        value.to_string()
    }
}

pub struct SettingsStore {
    settings: Arc<ArcSwap<ChatSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".deskchat"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_from_disk(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> Arc<ChatSettings> {
        self.settings.load_full()
    }

    /// Normalizes, writes to disk, then publishes the new snapshot.
    pub fn update(&self, settings: ChatSettings) -> Result<(), SettingsError> {
        let settings = settings.normalized();
        let content = serde_json::to_string_pretty(&settings).context(EncodeSnafu {
            stage: "encode-settings",
        })?;
        write_atomically(&self.config_path, &content)?;

        tracing::info!(path = ?self.config_path, endpoint = %settings.endpoint, "settings saved");
        self.settings.store(Arc::new(settings));
        Ok(())
    }

    /// Saves `settings` as the first-run file. An existing file is only
    /// replaced with `force`; returns `false` when it was left in place.
    pub fn init_file(&self, settings: ChatSettings, force: bool) -> Result<bool, SettingsError> {
        if self.config_path.exists() && !force {
            return Ok(false);
        }

        self.update(settings)?;
        Ok(true)
    }

    fn load_from_disk(path: &Path) -> ChatSettings {
        let mut figment = Figment::from(Serialized::defaults(ChatSettings::default()));
        if path.exists() {
            figment = figment.merge(Json::file(path));
        } else {
            tracing::info!(path = ?path, "settings file not found, using defaults");
        }
        let figment = figment.merge(Env::prefixed(SETTINGS_ENV_PREFIX).split("__"));

        match figment.extract::<ChatSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    path = ?path,
                    error = %error,
                    "failed to parse settings, using defaults"
                );
                ChatSettings::default()
            }
        }
    }
}

/// Stages `content` next to `path` and renames it over the target, so readers
/// see either the old file or the new one.
fn write_atomically(path: &Path, content: &str) -> Result<(), SettingsError> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).context(SettingsDirSnafu {
            stage: "prepare-settings-dir",
            path: dir.to_path_buf(),
        })?;
    }

    let staging = path.with_extension("json.tmp");
    std::fs::write(&staging, content).context(WriteSnafu {
        stage: "write-settings-staging",
        path: staging.clone(),
    })?;
    std::fs::rename(&staging, path).context(ReplaceSnafu {
        stage: "swap-settings-file",
        from: staging,
        to: path.to_path_buf(),
    })
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("cannot create settings directory {path:?} on `{stage}`: {source}"))]
    SettingsDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("cannot encode settings on `{stage}`: {source}"))]
    Encode {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("cannot write {path:?} on `{stage}`: {source}"))]
    Write {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("cannot move {from:?} over {to:?} on `{stage}`: {source}"))]
    Replace {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

impl SettingsError {
    pub fn stage(&self) -> &'static str {
        match self {
            Self::SettingsDir { stage, .. }
            | Self::Encode { stage, .. }
            | Self::Write { stage, .. }
            | Self::Replace { stage, .. } => stage,
        }
    }
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_chat_method() -> String {
    DEFAULT_CHAT_METHOD.to_string()
}

fn default_embeddings_method() -> String {
    DEFAULT_EMBEDDINGS_METHOD.to_string()
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_embeddings_timeout_secs() -> u64 {
    DEFAULT_EMBEDDINGS_TIMEOUT_SECS
}

fn default_greeting() -> String {
    DEFAULT_GREETING.to_string()
}

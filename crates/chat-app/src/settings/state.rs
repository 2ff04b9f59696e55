use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Format, Json, Serialized},
};
use serde::{Deserialize, Deserializer, Serialize};
use snafu::{ResultExt, Snafu};
use vqa_backend::{BackendConfig, ClearRoute, DEFAULT_BACKEND_URL, ProcessingMode};

use crate::chat::{ClearPolicy, DisplayMode};

pub const SETTINGS_DIRECTORY_NAME: &str = "vqa-chat";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const CACHE_FILE_NAME: &str = "cache.db";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSettings {
    #[serde(default = "default_backend_url")]
    pub backend_url: String,
    #[serde(default, deserialize_with = "deserialize_lenient")]
    pub clear_route: ClearRoute,
    #[serde(default, deserialize_with = "deserialize_lenient")]
    pub clear_policy: ClearPolicy,
    #[serde(default, deserialize_with = "deserialize_lenient")]
    pub display_mode: DisplayMode,
    #[serde(default)]
    pub search_enabled: bool,
    #[serde(default, deserialize_with = "deserialize_lenient")]
    pub processing_mode: ProcessingMode,
    /// Overrides the sqlite cache location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            backend_url: default_backend_url(),
            clear_route: ClearRoute::default(),
            clear_policy: ClearPolicy::default(),
            display_mode: DisplayMode::default(),
            search_enabled: false,
            processing_mode: ProcessingMode::default(),
            cache_path: None,
            request_timeout_secs: None,
        }
    }
}

impl ChatSettings {
    pub fn normalized(mut self) -> Self {
        self.backend_url = if self.backend_url.trim().is_empty() {
            default_backend_url()
        } else {
            self.backend_url.trim().to_string()
        };
        self.cache_path = self
            .cache_path
            .filter(|path| !path.as_os_str().is_empty());
        // A zero timeout would fail every request immediately.
        self.request_timeout_secs = self.request_timeout_secs.filter(|secs| *secs > 0);
        self
    }

    pub fn to_backend_config(&self) -> BackendConfig {
        let config = BackendConfig::new(&self.backend_url).with_clear_route(self.clear_route);
        match self.request_timeout_secs {
            Some(secs) => config.with_request_timeout(Duration::from_secs(secs)),
            None => config,
        }
    }

    pub fn resolved_cache_path(&self) -> PathBuf {
        self.cache_path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
                .unwrap_or_else(|| PathBuf::from(".vqa-chat"))
                .join(CACHE_FILE_NAME)
        })
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
            .unwrap_or_else(|| PathBuf::from(".vqa-chat"))
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

    pub fn update(&self, settings: ChatSettings) -> Result<(), SettingsError> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings.store(Arc::new(normalized_settings));
        Ok(())
    }

    /// Persists a new display mode while leaving every other stored key untouched.
    pub fn store_display_mode(&self, display_mode: DisplayMode) -> Result<(), SettingsError> {
        let current = self.settings();
        if current.display_mode == display_mode {
            return Ok(());
        }

        let mut next = ChatSettings::clone(&current);
        next.display_mode = display_mode;
        self.update(next)
    }

    fn load_from_disk(path: &Path) -> ChatSettings {
        if !path.exists() {
            tracing::info!(path = ?path, "settings file not found, using defaults");
            return ChatSettings::default();
        }

        let figment =
            Figment::from(Serialized::defaults(ChatSettings::default())).merge(Json::file(path));

        match figment.extract::<ChatSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(path = ?path, error = %error, "failed to parse settings, using defaults");
                ChatSettings::default()
            }
        }
    }

    fn persist(&self, settings: &ChatSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!(path = ?self.config_path, "saved settings");
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

fn default_backend_url() -> String {
    DEFAULT_BACKEND_URL.to_string()
}

/// Deserializes an enum setting, falling back to its default on unknown values.
fn deserialize_lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: for<'a> Deserialize<'a> + Default + std::fmt::Debug,
{
    let raw = serde_json::Value::deserialize(deserializer)?;
    let normalized = match raw {
        serde_json::Value::String(value) => {
            serde_json::Value::String(value.trim().to_ascii_lowercase())
        }
        other => other,
    };

    match T::deserialize(&normalized) {
        Ok(value) => Ok(value),
        Err(error) => {
            let fallback = T::default();
            tracing::warn!(
                value = %normalized,
                error = %error,
                fallback = ?fallback,
                "invalid setting value, using default"
            );
            Ok(fallback)
        }
    }
}

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use lectern_api::{ClientConfig, DEFAULT_BASE_URL, DEFAULT_ERROR_EXCERPT_LIMIT};
use serde::{Deserialize, Serialize};
use snafu::{Snafu, ensure};

pub const SETTINGS_DIRECTORY_NAME: &str = "lectern";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const ENV_PREFIX: &str = "LECTERN_";
/// Overrides the settings file location.
pub const CONFIG_PATH_ENV: &str = "LECTERN_CONFIG";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_error_excerpt_limit")]
    pub error_excerpt_limit: usize,
    /// Seed the upload record from the server's document list at startup.
    #[serde(default = "default_sync_documents_on_start")]
    pub sync_documents_on_start: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            error_excerpt_limit: default_error_excerpt_limit(),
            sync_documents_on_start: default_sync_documents_on_start(),
        }
    }
}

impl ClientSettings {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".lectern"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    /// Settings path from `LECTERN_CONFIG`, falling back to the config directory.
    pub fn config_path() -> PathBuf {
        std::env::var_os(CONFIG_PATH_ENV)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(Self::default_config_path)
    }

    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Defaults, then the JSON file if present, then `LECTERN_*` variables.
    ///
    /// A file that does not parse is logged and ignored.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            tracing::info!(path = %path.display(), "settings file not found, using defaults");
        }

        match Self::figment(path).extract::<ClientSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    %error,
                    "failed to parse settings, using defaults"
                );
                ClientSettings::default()
            }
        }
    }

    fn figment(path: &Path) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(ClientSettings::default()));
        if path.exists() {
            figment = figment.merge(Json::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).only(&[
            "base_url",
            "error_excerpt_limit",
            "sync_documents_on_start",
        ]))
    }

    pub fn normalized(mut self) -> Self {
        self.base_url = self.base_url.trim().trim_end_matches('/').to_string();
        if self.base_url.is_empty() {
            self.base_url = default_base_url();
        }
        if self.error_excerpt_limit == 0 {
            self.error_excerpt_limit = default_error_excerpt_limit();
        }
        self
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        ensure!(
            self.base_url.starts_with("http://") || self.base_url.starts_with("https://"),
            InvalidBaseUrlSnafu {
                stage: "validate-base-url",
                base_url: self.base_url.clone(),
            }
        );
        Ok(())
    }

    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig::new(&self.base_url).with_error_excerpt_limit(self.error_excerpt_limit)
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("base url `{base_url}` is not an http(s) url on `{stage}`"))]
    InvalidBaseUrl {
        stage: &'static str,
        base_url: String,
    },
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_error_excerpt_limit() -> usize {
    DEFAULT_ERROR_EXCERPT_LIMIT
}

fn default_sync_documents_on_start() -> bool {
    true
}

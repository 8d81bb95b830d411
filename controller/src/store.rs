use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use perfektday_common::{ControllerConfig, PersistedSettings};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid json in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl PersistenceError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn json(path: &Path, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Clone)]
pub struct AppStore {
    settings_path: Arc<PathBuf>,
    config_path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

impl AppStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref();
        Self {
            settings_path: Arc::new(data_dir.join("settings.json")),
            config_path: Arc::new(data_dir.join("controller.json")),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn from_env() -> Self {
        let data_dir = std::env::var("PERFEKTDAY_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.perfektday"));
        Self::new(data_dir)
    }

    /// Never fails: a missing document is created with defaults, an
    /// unreadable one is deleted and recreated.
    pub async fn load_settings(&self) -> PersistedSettings {
        let path = self.settings_path.as_ref();
        let raw = {
            let _guard = self.lock.lock().await;
            tokio::fs::read(path).await
        };

        match raw {
            Ok(raw) => match serde_json::from_slice::<PersistedSettings>(&raw) {
                Ok(mut settings) => {
                    settings.sanitize();
                    return settings;
                }
                Err(err) => {
                    warn!("discarding corrupt settings at {}: {err}", path.display());
                    if let Err(err) = tokio::fs::remove_file(path).await {
                        warn!("failed to remove {}: {err}", path.display());
                    }
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!("no settings at {}, writing defaults", path.display());
            }
            Err(err) => {
                warn!("failed to read settings at {}: {err}", path.display());
                return PersistedSettings::default();
            }
        }

        let defaults = PersistedSettings::default();
        if let Err(err) = self.save_settings(&defaults).await {
            warn!("failed to write default settings: {err}");
        }
        defaults
    }

    /// Writes to a sibling temp file and renames it over the document, so a
    /// failed write leaves the previous version intact.
    pub async fn save_settings(&self, settings: &PersistedSettings) -> Result<(), PersistenceError> {
        let _guard = self.lock.lock().await;
        let path = self.settings_path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| PersistenceError::io(parent, err))?;
        }

        let payload =
            serde_json::to_vec_pretty(settings).map_err(|err| PersistenceError::json(path, err))?;
        let temp = path.with_extension("json.tmp");
        tokio::fs::write(&temp, payload)
            .await
            .map_err(|err| PersistenceError::io(&temp, err))?;
        tokio::fs::rename(&temp, path)
            .await
            .map_err(|err| PersistenceError::io(path, err))?;
        Ok(())
    }

    pub async fn load_controller_config(&self) -> Result<ControllerConfig, PersistenceError> {
        let path = self.config_path.as_ref();
        match tokio::fs::read(path).await {
            Ok(raw) => serde_json::from_slice(&raw).map_err(|err| PersistenceError::json(path, err)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(ControllerConfig::default()),
            Err(err) => Err(PersistenceError::io(path, err)),
        }
    }
}

/// Environment wins over `controller.json`.
pub fn apply_env_overrides(config: &mut ControllerConfig, var: impl Fn(&str) -> Option<String>) {
    if let Some(host) = var("DECONZ_HOST") {
        config.gateway.host = host;
    }
    if let Some(key) = var("DECONZ_API_KEY") {
        config.gateway.api_key = key;
    }
    if let Some(host) = var("MQTT_HOST") {
        config.mqtt.host = host;
    }
    if let Some(port) = var("MQTT_PORT").and_then(|value| value.parse::<u16>().ok()) {
        config.mqtt.port = port;
    }
    if let Some(user) = var("MQTT_USER") {
        config.mqtt.user = user;
    }
    if let Some(pass) = var("MQTT_PASS") {
        config.mqtt.pass = pass;
    }
    if let Some(port) = var("CONTROLLER_HTTP_PORT").and_then(|value| value.parse::<u16>().ok()) {
        config.http_port = port;
    }
    if let Some(listen) = var("PERFEKTDAY_LISTEN") {
        config.transport.listen = listen;
    }
}

//! Persisted device state: network settings and device identity

use fingerbot_shared::NetworkSettings;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

pub const SETTINGS_FILE: &str = "wifi_config.json";
pub const DEVICE_ID_FILE: &str = "device_id.txt";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt settings in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Files under the device's state directory
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Stored settings, or defaults when nothing has been saved yet
    pub async fn load_settings(&self) -> Result<NetworkSettings, StoreError> {
        let path = self.dir.join(SETTINGS_FILE);
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| StoreError::Json { path, source }),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "No stored settings");
                Ok(NetworkSettings::default())
            }
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    pub async fn save_settings(&self, settings: &NetworkSettings) -> Result<(), StoreError> {
        let path = self.dir.join(SETTINGS_FILE);
        let bytes = serde_json::to_vec_pretty(settings).map_err(|source| StoreError::Json {
            path: path.clone(),
            source,
        })?;
        self.write(&path, &bytes).await?;
        info!(path = %path.display(), ssid = %settings.ssid, "Settings saved");
        Ok(())
    }

    /// Stored device id; on first boot the MAC becomes the id and is saved
    pub async fn device_id(&self, mac: &str) -> Result<String, StoreError> {
        let path = self.dir.join(DEVICE_ID_FILE);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) if !text.trim().is_empty() => return Ok(text.trim().to_string()),
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(source) => return Err(StoreError::Io { path, source }),
        }

        self.write(&path, mac.as_bytes()).await?;
        info!(device_id = %mac, "Device id created");
        Ok(mac.to_string())
    }

    async fn write(&self, path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        };
        tokio::fs::create_dir_all(&self.dir).await.map_err(io_err)?;
        tokio::fs::write(path, bytes).await.map_err(io_err)
    }
}

//! Model retrieval from the hub API and the local decrypted-model cache.

use std::fs;
use std::path::PathBuf;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::config::HubSettings;
use crate::error::{Error, Result};
use crate::seed::ModelId;

const API_VERSION_HEADER: &str = "X-Api-Version";

/// Encrypted model body plus the URL it was finally served from.
#[derive(Debug, Clone)]
pub struct DownloadedModel {
    pub bytes: Vec<u8>,
    pub resolved_url: String,
}

/// Blocking client for the character-model preview endpoints.
pub struct HubClient {
    client: reqwest::blocking::Client,
    settings: HubSettings,
}

impl HubClient {
    pub fn new(settings: &HubSettings) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(settings.user_agent.as_str())
            .build()?;
        Ok(Self {
            client,
            settings: settings.clone(),
        })
    }

    fn endpoint(&self, id: &ModelId, variant: &str) -> String {
        format!(
            "{}/character_models/{}/{variant}",
            self.settings.api_base.trim_end_matches('/'),
            id
        )
    }

    /// Downloads the optimized preview, falling back to the plain preview
    /// when the former does not exist.
    pub fn download(&self, id: &ModelId) -> Result<DownloadedModel> {
        let url = self.endpoint(id, "optimized_preview");
        tracing::info!(%url, "downloading model");
        let mut response = self.get(&url)?;

        if response.status() == StatusCode::NOT_FOUND {
            let fallback = self.endpoint(id, "preview");
            tracing::info!(url = %fallback, "optimized preview missing, trying preview");
            response = self.get(&fallback)?;
        }

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Network {
                url: response.url().to_string(),
                status: status.as_u16(),
            });
        }

        let resolved_url = response.url().to_string();
        let bytes = response.bytes()?.to_vec();
        tracing::info!(bytes = bytes.len(), %resolved_url, "model downloaded");
        Ok(DownloadedModel {
            bytes,
            resolved_url,
        })
    }

    fn get(&self, url: &str) -> Result<reqwest::blocking::Response> {
        Ok(self
            .client
            .get(url)
            .header(API_VERSION_HEADER, self.settings.api_version.as_str())
            .send()?)
    }
}

// ─── Cache ────────────────────────────────────────────────────────────────────

/// Sidecar metadata stored next to a cached model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub id: String,
    pub url: String,
}

/// Decrypted model bytes with the URL they were downloaded from.
#[derive(Debug, Clone)]
pub struct CachedModel {
    pub bytes: Vec<u8>,
    pub entry: CacheEntry,
}

/// `{dir}/{id}.glb` holds decrypted bytes, `{dir}/{id}.json` the metadata.
#[derive(Debug, Clone)]
pub struct ModelCache {
    dir: PathBuf,
}

impl ModelCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn model_path(&self, id: &ModelId) -> PathBuf {
        self.dir.join(format!("{id}.glb"))
    }

    fn entry_path(&self, id: &ModelId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Returns the cached model only when both files are present.
    pub fn load(&self, id: &ModelId) -> Result<Option<CachedModel>> {
        let model_path = self.model_path(id);
        let entry_path = self.entry_path(id);
        if !model_path.is_file() || !entry_path.is_file() {
            return Ok(None);
        }

        let entry: CacheEntry = serde_json::from_slice(&fs::read(&entry_path)?)?;
        let bytes = fs::read(&model_path)?;
        tracing::info!(path = %model_path.display(), "using cached model");
        Ok(Some(CachedModel { bytes, entry }))
    }

    pub fn store(&self, id: &ModelId, bytes: &[u8], url: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let entry = CacheEntry {
            id: id.to_string(),
            url: url.to_string(),
        };
        fs::write(self.model_path(id), bytes)?;
        fs::write(self.entry_path(id), serde_json::to_vec_pretty(&entry)?)?;
        tracing::debug!(dir = %self.dir.display(), "cached decrypted model");
        Ok(())
    }
}

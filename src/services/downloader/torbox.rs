//! TorBox API client

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use super::{Container, ContainerFile, DebridClient, TorrentFile, TorrentInfo};
use crate::config::DebridProviderSettings;
use crate::error::{CoreError, CoreResult};
use crate::services::rate_limiter::RateLimitedClient;

const BASE_URL: &str = "https://api.torbox.app/v1/api";

#[derive(Debug, Deserialize)]
struct TbEnvelope<T> {
    #[serde(default)]
    success: bool,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct TbUser {
    #[serde(default)]
    plan: i64,
}

#[derive(Debug, Deserialize)]
struct TbAvailability {
    hash: String,
    #[serde(default)]
    files: Vec<TbFile>,
}

#[derive(Debug, Deserialize)]
struct TbFile {
    #[serde(default)]
    id: i64,
    name: String,
    size: i64,
}

#[derive(Debug, Deserialize)]
struct TbTorrent {
    id: i64,
    hash: String,
    #[serde(default)]
    download_state: String,
    name: Option<String>,
    #[serde(default)]
    files: Vec<TbFile>,
}

impl From<TbTorrent> for TorrentInfo {
    fn from(t: TbTorrent) -> Self {
        TorrentInfo {
            id: t.id.to_string(),
            hash: t.hash.to_lowercase(),
            status: t.download_state,
            original_filename: t.name.clone(),
            filename: t.name,
            files: t
                .files
                .into_iter()
                .map(|f| TorrentFile {
                    file_id: f.id,
                    path: f.name,
                    bytes: f.size,
                    // TorBox always materializes the whole torrent.
                    selected: true,
                })
                .collect(),
        }
    }
}

pub struct TorBoxClient {
    http: RateLimitedClient,
    api_key: String,
    enabled: bool,
}

impl TorBoxClient {
    pub fn new(settings: &DebridProviderSettings) -> Self {
        Self {
            http: RateLimitedClient::for_debrid("torbox"),
            api_key: settings.api_key.clone(),
            enabled: settings.enabled,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> CoreResult<T> {
        let auth = format!("Bearer {}", self.api_key);
        let response = self
            .http
            .get(url, &[("Authorization", auth.as_str())])
            .await
            .map_err(|e| CoreError::ExternalTransient(format!("torbox: {e}")))?;
        if !response.status().is_success() {
            return Err(CoreError::from_status(response.status(), "torbox"));
        }
        let envelope: TbEnvelope<T> = response
            .json()
            .await
            .map_err(|e| CoreError::ExternalTransient(format!("torbox decode: {e}")))?;
        if !envelope.success {
            return Err(CoreError::ExternalPermanent("torbox: request refused".into()));
        }
        envelope
            .data
            .ok_or_else(|| CoreError::NotFound("torbox: empty payload".into()))
    }

    async fn post_form<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        form: &[(&str, &str)],
    ) -> CoreResult<T> {
        let auth = format!("Bearer {}", self.api_key);
        let response = self
            .http
            .post_form(url, &[("Authorization", auth.as_str())], form)
            .await
            .map_err(|e| CoreError::ExternalTransient(format!("torbox: {e}")))?;
        if !response.status().is_success() {
            return Err(CoreError::from_status(response.status(), "torbox"));
        }
        let envelope: TbEnvelope<T> = response
            .json()
            .await
            .map_err(|e| CoreError::ExternalTransient(format!("torbox decode: {e}")))?;
        if !envelope.success {
            return Err(CoreError::ExternalPermanent("torbox: request refused".into()));
        }
        envelope
            .data
            .ok_or_else(|| CoreError::NotFound("torbox: empty payload".into()))
    }
}

#[async_trait]
impl DebridClient for TorBoxClient {
    fn name(&self) -> &'static str {
        "TorBox"
    }

    fn host(&self) -> &str {
        "api.torbox.app"
    }

    async fn validate(&self) -> bool {
        if !self.enabled || self.api_key.is_empty() {
            return false;
        }
        match self.get_json::<TbUser>(&format!("{BASE_URL}/user/me")).await {
            Ok(user) => user.plan > 0,
            Err(e) => {
                warn!(error = %e, "TorBox validation failed");
                false
            }
        }
    }

    async fn instant_availability(
        &self,
        hashes: &[String],
    ) -> CoreResult<HashMap<String, Vec<Container>>> {
        if hashes.is_empty() {
            return Ok(HashMap::new());
        }
        let url = format!(
            "{BASE_URL}/torrents/checkcached?hash={}&format=list&list_files=true",
            hashes.join(",")
        );
        let cached: Vec<TbAvailability> = self.get_json(&url).await?;

        let mut out: HashMap<String, Vec<Container>> = HashMap::new();
        for hash in hashes {
            out.insert(hash.to_lowercase(), Vec::new());
        }
        for entry in cached {
            let container: Container = entry
                .files
                .into_iter()
                .map(|f| ContainerFile {
                    file_id: f.id,
                    filename: f.name,
                    filesize: f.size,
                })
                .collect();
            if !container.is_empty() {
                out.entry(entry.hash.to_lowercase()).or_default().push(container);
            }
        }
        Ok(out)
    }

    async fn add_magnet(&self, infohash: &str) -> CoreResult<String> {
        let magnet = format!("magnet:?xt=urn:btih:{infohash}");
        let torrent: TbTorrent = self
            .post_form(
                &format!("{BASE_URL}/torrents/createtorrent"),
                &[("magnet", magnet.as_str())],
            )
            .await?;
        Ok(torrent.id.to_string())
    }

    async fn select_files(&self, _torrent_id: &str, _file_ids: &[i64]) -> CoreResult<()> {
        // TorBox has no per-file selection; the wanted set is filtered when
        // paths are read back.
        Ok(())
    }

    async fn get_torrent_info(&self, torrent_id: &str) -> CoreResult<TorrentInfo> {
        let url = format!("{BASE_URL}/torrents/mylist?id={torrent_id}");
        let torrent: TbTorrent = self.get_json(&url).await?;
        Ok(torrent.into())
    }

    async fn get_torrents(&self, limit: usize) -> CoreResult<HashMap<String, TorrentInfo>> {
        let url = format!("{BASE_URL}/torrents/mylist?limit={limit}");
        let torrents: Vec<TbTorrent> = self.get_json(&url).await?;
        Ok(torrents
            .into_iter()
            .map(TorrentInfo::from)
            .map(|t| (t.hash.clone(), t))
            .collect())
    }
}
